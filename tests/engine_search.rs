use kyma::{AddRecord, DeleteRecord, IndexEngine, SearchRequest};
use serde_json::json;

fn config() -> String {
    json!({
        "CollectionName": "docs",
        "IndexName": "docs_flat",
        "ScalarIndex": {
            "title": "string",
            "count": "int64",
            "weight": "float32",
            "dir": "path"
        },
        "VectorIndex": {
            "IndexType": "flat",
            "Dimension": 4,
            "DistanceType": "l2",
            "QuantizationType": "float"
        }
    })
    .to_string()
}

fn add(engine: &IndexEngine, label: u64, vector: [f32; 4], fields: serde_json::Value) {
    engine
        .add_data(&[AddRecord {
            label,
            vector: vector.to_vec(),
            fields_json: Some(fields.to_string()),
            ..AddRecord::default()
        }])
        .unwrap();
}

fn two_docs() -> IndexEngine {
    let engine = IndexEngine::open(&config()).unwrap();
    add(
        &engine,
        1001,
        [0.1, 0.1, 0.1, 0.1],
        json!({"title": "apple", "count": 10, "weight": 1.5, "dir": "/fruit/red"}),
    );
    add(
        &engine,
        1002,
        [0.2, 0.2, 0.2, 0.2],
        json!({"title": "banana", "count": 20, "weight": 2.5, "dir": "/fruit/yellow"}),
    );
    engine
}

fn search(engine: &IndexEngine, query: &[f32], topk: usize, dsl: &str) -> kyma::SearchResult {
    engine
        .search(&SearchRequest {
            query: query.to_vec(),
            topk,
            dsl: dsl.to_string(),
            ..SearchRequest::default()
        })
        .unwrap()
}

#[test]
fn plain_knn_orders_by_distance() {
    let engine = two_docs();
    let res = search(&engine, &[0.1; 4], 5, "");
    assert_eq!(res.labels, vec![1001, 1002]);
    assert!(res.scores[0] >= res.scores[1]);
}

#[test]
fn must_filter_restricts_recall() {
    let engine = two_docs();
    let res = search(
        &engine,
        &[0.1; 4],
        5,
        r#"{"filter":{"op":"must","field":"title","conds":["apple"]}}"#,
    );
    assert_eq!(res.labels, vec![1001]);
}

#[test]
fn count_without_filter_reports_total() {
    let engine = two_docs();
    let res = search(&engine, &[], 0, r#"{"sorter":{"op":"count"}}"#);
    let extra: serde_json::Value = serde_json::from_str(&res.extra_json).unwrap();
    assert_eq!(extra, json!({"__total_count__": 2}));
}

#[test]
fn delete_removes_from_scalar_and_vector() {
    let engine = two_docs();
    engine
        .delete_data(&[DeleteRecord {
            label: 1001,
            old_fields_json: Some(json!({"title": "apple", "count": 10}).to_string()),
        }])
        .unwrap();
    let res = search(
        &engine,
        &[0.1; 4],
        5,
        r#"{"filter":{"op":"must","field":"title","conds":["apple"]}}"#,
    );
    assert!(res.labels.is_empty());

    let res = search(&engine, &[0.1; 4], 5, "");
    assert_eq!(res.labels, vec![1002]);
    assert_eq!(engine.get_state().element_count, 1);
}

#[test]
fn range_filter_on_int_field() {
    let engine = two_docs();
    let res = search(
        &engine,
        &[0.1; 4],
        5,
        r#"{"filter":{"op":"range","field":"count","gte":15}}"#,
    );
    assert_eq!(res.labels, vec![1002]);
}

#[test]
fn prefix_filter_unions_matching_keys() {
    let engine = IndexEngine::open(&config()).unwrap();
    for (label, title) in [(1u64, "foobar"), (2, "foobaz"), (3, "other")] {
        add(&engine, label, [0.1; 4], json!({"title": title}));
    }
    let res = search(
        &engine,
        &[0.1; 4],
        5,
        r#"{"filter":{"op":"prefix","field":"title","prefix":"foob"}}"#,
    );
    let mut labels = res.labels.clone();
    labels.sort_unstable();
    assert_eq!(labels, vec![1, 2]);
}

#[test]
fn path_filter_with_depth_parameter() {
    let engine = two_docs();
    add(&engine, 1003, [0.3; 4], json!({"dir": "/fruit/red/small"}));

    let res = search(
        &engine,
        &[0.1; 4],
        5,
        r#"{"filter":{"op":"must","field":"dir","conds":["/fruit/red"]}}"#,
    );
    let mut labels = res.labels.clone();
    labels.sort_unstable();
    assert_eq!(labels, vec![1001, 1003]);

    let res = search(
        &engine,
        &[0.1; 4],
        5,
        r#"{"filter":{"op":"must","field":"dir","conds":["/fruit/red"],"para":"-d=0"}}"#,
    );
    assert_eq!(res.labels, vec![1001]);
}

#[test]
fn label_in_resolves_through_vector_store() {
    let engine = two_docs();
    let res = search(
        &engine,
        &[0.1; 4],
        5,
        r#"{"filter":{"op":"label_in","labels":[1002, 4040]}}"#,
    );
    assert_eq!(res.labels, vec![1002]);
}

#[test]
fn sorter_ranks_by_field() {
    let engine = two_docs();
    let res = search(
        &engine,
        &[],
        0,
        r#"{"sorter":{"op":"sort","field":"weight","order":"desc","topk":2}}"#,
    );
    assert_eq!(res.labels, vec![1002, 1001]);
    assert_eq!(res.scores, vec![2.5, 1.5]);
}

#[test]
fn count_by_field_with_filter() {
    let engine = two_docs();
    let res = search(
        &engine,
        &[],
        0,
        r#"{"filter":{"op":"range","field":"count","gte":15},
            "sorter":{"op":"count","field":"title"}}"#,
    );
    let extra: serde_json::Value = serde_json::from_str(&res.extra_json).unwrap();
    assert_eq!(extra["banana"], json!(1));
    assert_eq!(extra.get("apple"), Some(&json!(0)));
}

#[test]
fn update_replaces_scalar_values() {
    let engine = two_docs();
    engine
        .add_data(&[AddRecord {
            label: 1001,
            vector: vec![0.1; 4],
            fields_json: Some(json!({"title": "apricot", "count": 11}).to_string()),
            old_fields_json: Some(json!({"title": "apple", "count": 10}).to_string()),
            ..AddRecord::default()
        }])
        .unwrap();
    let res = search(
        &engine,
        &[0.1; 4],
        5,
        r#"{"filter":{"op":"must","field":"title","conds":["apple"]}}"#,
    );
    assert!(res.labels.is_empty());
    let res = search(
        &engine,
        &[0.1; 4],
        5,
        r#"{"filter":{"op":"must","field":"title","conds":["apricot"]}}"#,
    );
    assert_eq!(res.labels, vec![1001]);
    assert_eq!(engine.get_state().element_count, 2);
}

#[test]
fn bad_dsl_is_an_error_not_a_result() {
    let engine = two_docs();
    let err = engine.search(&SearchRequest {
        query: vec![0.1; 4],
        topk: 5,
        dsl: r#"{"filter":{"op":"frobnicate"}}"#.to_string(),
        ..SearchRequest::default()
    });
    assert!(err.is_err());
}

#[test]
fn sparse_fusion_end_to_end() {
    let config = json!({
        "CollectionName": "hybrid",
        "ScalarIndex": {},
        "VectorIndex": {
            "IndexType": "flat",
            "Dimension": 2,
            "DistanceType": "ip",
            "QuantizationType": "float",
            "EnableSparse": true,
            "SearchSparseAlpha": 0.5
        }
    })
    .to_string();
    let engine = IndexEngine::open(&config).unwrap();
    let terms = |ts: &[&str]| ts.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    engine
        .add_data(&[
            AddRecord {
                label: 1,
                vector: vec![1.0, 0.0],
                sparse_terms: terms(&["rust", "index"]),
                sparse_values: vec![1.0, 0.5],
                ..AddRecord::default()
            },
            AddRecord {
                label: 2,
                vector: vec![1.0, 0.0],
                sparse_terms: terms(&["go"]),
                sparse_values: vec![1.0],
                ..AddRecord::default()
            },
        ])
        .unwrap();
    let res = engine
        .search(&SearchRequest {
            query: vec![1.0, 0.0],
            sparse_terms: terms(&["rust"]),
            sparse_values: vec![1.0],
            topk: 2,
            dsl: String::new(),
        })
        .unwrap();
    assert_eq!(res.labels[0], 1);
    assert!(res.scores[0] > res.scores[1]);
}

#[test]
fn unsupported_index_type_is_fatal() {
    let config = json!({
        "CollectionName": "x",
        "VectorIndex": {"IndexType": "hnsw", "Dimension": 4}
    })
    .to_string();
    assert!(IndexEngine::open(&config).is_err());
}

#[test]
fn int8_engine_recalls_nearest() {
    let config = json!({
        "CollectionName": "q",
        "ScalarIndex": {},
        "VectorIndex": {
            "IndexType": "flat",
            "Dimension": 8,
            "DistanceType": "l2",
            "QuantizationType": "int8"
        }
    })
    .to_string();
    let engine = IndexEngine::open(&config).unwrap();
    for label in 0..20u64 {
        let v: Vec<f32> = (0..8).map(|i| (label as f32) * 0.05 + i as f32 * 0.01).collect();
        engine
            .add_data(&[AddRecord {
                label,
                vector: v,
                ..AddRecord::default()
            }])
            .unwrap();
    }
    let query: Vec<f32> = (0..8).map(|i| 0.25 + i as f32 * 0.01).collect();
    let res = search(&engine, &query, 3, "");
    assert_eq!(res.labels[0], 5);
}
