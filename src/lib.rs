//! Embedded hybrid retrieval index: a single collection of dense (and
//! optionally sparse) vectors with per-field scalar indexes sharing one
//! logical offset space. Filtering and aggregation run through a JSON DSL;
//! vector recall is brute force with optional int8 quantization and
//! dense/sparse score fusion.
//!
//! ```no_run
//! use kyma::{AddRecord, IndexEngine, SearchRequest};
//!
//! let config = r#"{
//!     "CollectionName": "docs",
//!     "ScalarIndex": {"title": "string", "count": "int64"},
//!     "VectorIndex": {"IndexType": "flat", "Dimension": 4, "DistanceType": "l2"}
//! }"#;
//! let engine = IndexEngine::open(config).unwrap();
//! engine
//!     .add_data(&[AddRecord {
//!         label: 1001,
//!         vector: vec![0.1, 0.1, 0.1, 0.1],
//!         fields_json: Some(r#"{"title": "apple", "count": 10}"#.into()),
//!         ..AddRecord::default()
//!     }])
//!     .unwrap();
//! let hits = engine
//!     .search(&SearchRequest {
//!         query: vec![0.1, 0.1, 0.1, 0.1],
//!         topk: 5,
//!         dsl: r#"{"filter": {"op": "must", "field": "title", "conds": ["apple"]}}"#.into(),
//!         ..SearchRequest::default()
//!     })
//!     .unwrap();
//! assert_eq!(hits.labels, vec![1001]);
//! ```

pub mod dsl;
pub mod fields;
pub(crate) mod io;
pub mod manager;
pub mod meta;
pub mod scalar;
pub mod vector;

pub use dsl::DslError;
pub use fields::{FieldValue, FieldValues};
pub use manager::{
    AddRecord, DeleteRecord, EngineError, EngineState, IndexEngine, SearchRequest, SearchResult,
};
pub use meta::{ManagerMeta, VectorIndexMeta};
pub use scalar::bitmap::Bitmap;
pub use scalar::ScalarError;
pub use vector::VectorError;
