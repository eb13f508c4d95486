//! Micro-benchmarks for SST build and random-access read, the two hot
//! paths named in the component budget (§2 BTree + SST Reader/Writer).
//!
//! ```bash
//! cargo bench --bench sst_bench
//! ```

use std::collections::BTreeMap;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tempfile::TempDir;

use srdb::schema::{Field, FieldType, Schema};
use srdb::sst::{SstReader, SstWriter};
use srdb::value::{Row, TaggedValue};

fn schema() -> Schema {
    Schema::new(
        "bench",
        vec![
            Field {
                name: "tag".into(),
                type_: FieldType::String,
                indexed: false,
                nullable: false,
                comment: String::new(),
            },
            Field {
                name: "value".into(),
                type_: FieldType::Int64,
                indexed: false,
                nullable: false,
                comment: String::new(),
            },
        ],
    )
}

fn row(seq: i64) -> Row {
    let mut data = BTreeMap::new();
    data.insert("tag".to_string(), TaggedValue::Str(format!("tag-{}", seq)));
    data.insert("value".to_string(), TaggedValue::Int64(seq * 7));
    Row::new(seq, seq, data)
}

fn build_sst(dir: &std::path::Path, row_count: i64) -> std::path::PathBuf {
    let schema = schema();
    let path = dir.join("bench.sst");
    let mut writer = SstWriter::create(&path, 0).unwrap();
    for seq in 0..row_count {
        writer.add(&schema, &row(seq)).unwrap();
    }
    writer.finish(0).unwrap();
    path
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("sst_build");
    for &row_count in &[1_000i64, 10_000, 100_000] {
        group.throughput(Throughput::Elements(row_count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(row_count), &row_count, |b, &n| {
            b.iter(|| {
                let dir = TempDir::new().unwrap();
                black_box(build_sst(dir.path(), n));
            });
        });
    }
    group.finish();
}

fn bench_random_get(c: &mut Criterion) {
    let schema = schema();
    let dir = TempDir::new().unwrap();
    let row_count = 100_000i64;
    let path = build_sst(dir.path(), row_count);
    let reader = SstReader::open(&path, &schema).unwrap();

    let mut group = c.benchmark_group("sst_random_get");
    group.throughput(Throughput::Elements(1));
    group.bench_function("get", |b| {
        let mut seq = 0i64;
        b.iter(|| {
            seq = (seq * 2654435761 + 1) % row_count;
            black_box(reader.get(&schema, seq).unwrap());
        });
    });
    group.finish();
}

criterion_group!(benches, bench_build, bench_random_get);
criterion_main!(benches);
