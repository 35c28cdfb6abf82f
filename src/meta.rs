use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

pub const META_FILE: &str = "manager_meta.json";

fn default_distance_type() -> String {
    "l2".to_string()
}

fn default_quantization_type() -> String {
    "float".to_string()
}

fn default_max_element_count() -> usize {
    1
}

/// Configuration and persisted state of the vector side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorIndexMeta {
    #[serde(rename = "IndexType")]
    pub index_type: String,
    #[serde(rename = "Dimension")]
    pub dimension: usize,
    #[serde(rename = "DistanceType", default = "default_distance_type")]
    pub distance_type: String,
    #[serde(rename = "QuantizationType", default = "default_quantization_type")]
    pub quantization_type: String,
    #[serde(rename = "EnableSparse", default)]
    pub enable_sparse: bool,
    #[serde(rename = "IndexSparseAlpha", default)]
    pub index_sparse_alpha: f32,
    #[serde(rename = "SearchSparseAlpha", default)]
    pub search_sparse_alpha: f32,
    #[serde(rename = "MaxElementCount", default = "default_max_element_count")]
    pub max_element_count: usize,
    #[serde(rename = "ElementCount", default)]
    pub element_count: u64,
}

/// Collection metadata persisted as `manager_meta.json` at the index root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerMeta {
    #[serde(rename = "CollectionName", default)]
    pub collection_name: String,
    #[serde(rename = "IndexName", default)]
    pub index_name: String,
    #[serde(rename = "UpdateTimeStamp", default)]
    pub update_timestamp: u64,
    #[serde(rename = "ScalarIndex", default)]
    pub scalar_index: BTreeMap<String, String>,
    #[serde(rename = "VectorIndex")]
    pub vector_index: VectorIndexMeta,
}

impl ManagerMeta {
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).context("parse manager meta json")
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let file =
            File::open(path).with_context(|| format!("open manager meta {}", path.display()))?;
        serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("parse manager meta {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let file =
            File::create(path).with_context(|| format!("create manager meta {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self).context("write manager meta")?;
        writer.flush().context("flush manager meta")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SAMPLE: &str = r#"{
        "CollectionName": "docs",
        "IndexName": "docs_flat",
        "ScalarIndex": {"title": "string", "count": "int64"},
        "VectorIndex": {
            "IndexType": "flat",
            "Dimension": 4,
            "DistanceType": "l2",
            "QuantizationType": "int8",
            "EnableSparse": true,
            "SearchSparseAlpha": 0.5
        }
    }"#;

    #[test]
    fn parse_with_defaults() {
        let meta = ManagerMeta::from_json(SAMPLE).unwrap();
        assert_eq!(meta.collection_name, "docs");
        assert_eq!(meta.vector_index.dimension, 4);
        assert_eq!(meta.vector_index.max_element_count, 1);
        assert_eq!(meta.vector_index.index_sparse_alpha, 0.0);
        assert_eq!(meta.update_timestamp, 0);
        assert_eq!(meta.scalar_index["count"], "int64");
    }

    #[test]
    fn missing_vector_index_is_an_error() {
        assert!(ManagerMeta::from_json(r#"{"CollectionName":"x"}"#).is_err());
    }

    #[test]
    fn save_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(META_FILE);
        let mut meta = ManagerMeta::from_json(SAMPLE).unwrap();
        meta.update_timestamp = 12345;
        meta.save(&path).unwrap();
        let loaded = ManagerMeta::load(&path).unwrap();
        assert_eq!(loaded.update_timestamp, 12345);
        assert_eq!(loaded.vector_index.quantization_type, "int8");
    }
}
