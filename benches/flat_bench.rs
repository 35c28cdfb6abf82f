use criterion::{criterion_group, criterion_main, Criterion};
use kyma::{AddRecord, IndexEngine, SearchRequest};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde_json::json;

fn config(dim: usize, quantization: &str) -> String {
    json!({
        "CollectionName": "bench",
        "ScalarIndex": {"bucket": "int64"},
        "VectorIndex": {
            "IndexType": "flat",
            "Dimension": dim,
            "DistanceType": "l2",
            "QuantizationType": quantization
        }
    })
    .to_string()
}

fn populate(engine: &IndexEngine, dim: usize, n: usize) {
    let mut rng = StdRng::seed_from_u64(1);
    let records: Vec<AddRecord> = (0..n)
        .map(|i| AddRecord {
            label: i as u64,
            vector: (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect(),
            fields_json: Some(json!({"bucket": (i % 16) as i64}).to_string()),
            ..AddRecord::default()
        })
        .collect();
    engine.add_data(&records).unwrap();
}

fn bench_recall(c: &mut Criterion) {
    let dim = 128;
    let mut rng = StdRng::seed_from_u64(2);
    let query: Vec<f32> = (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect();

    let mut group = c.benchmark_group("FlatRecall");
    for quantization in ["float", "int8"] {
        let engine = IndexEngine::open(&config(dim, quantization)).unwrap();
        populate(&engine, dim, 10_000);

        let plain = SearchRequest {
            query: query.clone(),
            topk: 10,
            ..SearchRequest::default()
        };
        group.bench_function(format!("scan_10k_{quantization}"), |b| {
            b.iter(|| engine.search(&plain).unwrap())
        });

        let filtered = SearchRequest {
            query: query.clone(),
            topk: 10,
            dsl: json!({"filter": {"op": "must", "field": "bucket", "conds": [3]}}).to_string(),
            ..SearchRequest::default()
        };
        group.bench_function(format!("filtered_10k_{quantization}"), |b| {
            b.iter(|| engine.search(&filtered).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_recall);
criterion_main!(benches);
