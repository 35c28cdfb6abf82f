use crate::dsl::{self, DslError};
use crate::fields::FieldValues;
use crate::meta::{ManagerMeta, META_FILE};
use crate::scalar::{ScalarError, ScalarStore};
use crate::vector::{FlatIndex, VectorError};
use anyhow::{bail, Context};
use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

pub const VECTOR_INDEX_DIR: &str = "vector_index";
pub const SCALAR_INDEX_DIR: &str = "scalar_index";

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("dsl error: {0}")]
    Dsl(#[from] DslError),
    #[error("fields json error: {0}")]
    FieldsJson(#[from] serde_json::Error),
    #[error(transparent)]
    Vector(#[from] VectorError),
    #[error(transparent)]
    Scalar(#[from] ScalarError),
}

/// One record of a batched add. `old_fields_json` carries the previous field
/// values when the add is an update, so the scalar side can unindex them.
#[derive(Debug, Clone, Default)]
pub struct AddRecord {
    pub label: u64,
    pub vector: Vec<f32>,
    pub sparse_terms: Vec<String>,
    pub sparse_values: Vec<f32>,
    pub fields_json: Option<String>,
    pub old_fields_json: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteRecord {
    pub label: u64,
    pub old_fields_json: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub query: Vec<f32>,
    pub sparse_terms: Vec<String>,
    pub sparse_values: Vec<f32>,
    pub topk: usize,
    pub dsl: String,
}

#[derive(Debug, Clone, Default)]
pub struct SearchResult {
    pub labels: Vec<u64>,
    pub scores: Vec<f32>,
    pub extra_json: String,
}

impl SearchResult {
    pub fn result_num(&self) -> usize {
        self.labels.len()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EngineState {
    pub update_timestamp: u64,
    pub element_count: u64,
}

struct Core {
    meta: ManagerMeta,
    scalar: ScalarStore,
    vector: FlatIndex,
}

/// The index handle. One readers-writer lock serialises mutations against
/// any number of concurrent searches; scalar and vector sides are updated
/// together under it, so every search observes a consistent snapshot.
pub struct IndexEngine {
    core: RwLock<Core>,
}

fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

impl IndexEngine {
    /// Opens an index: an existing path wins, otherwise the argument must be
    /// the collection config JSON. Unsupported index types are fatal.
    pub fn open(path_or_json: &str) -> anyhow::Result<Self> {
        let path = Path::new(path_or_json);
        if path.exists() {
            return Self::load_from_path(path);
        }
        let meta = ManagerMeta::from_json(path_or_json)?;
        Self::init_from_meta(meta)
    }

    fn init_from_meta(meta: ManagerMeta) -> anyhow::Result<Self> {
        if meta.vector_index.index_type != "flat" {
            bail!("unsupported vector index type '{}'", meta.vector_index.index_type);
        }
        let vector = FlatIndex::new(&meta.vector_index).context("init vector index")?;
        let mut scalar = ScalarStore::from_schema(&meta.scalar_index).context("init scalar index")?;
        scalar
            .field_set_mut()
            .register_label_offsets(Arc::downgrade(vector.label_offsets()));
        Ok(Self {
            core: RwLock::new(Core {
                meta,
                scalar,
                vector,
            }),
        })
    }

    fn load_from_path(dir: &Path) -> anyhow::Result<Self> {
        let meta = ManagerMeta::load(&dir.join(META_FILE))?;
        if meta.vector_index.index_type != "flat" {
            bail!("unsupported vector index type '{}'", meta.vector_index.index_type);
        }
        let mut vector = FlatIndex::new(&meta.vector_index).context("init vector index")?;
        vector
            .load(&dir.join(VECTOR_INDEX_DIR))
            .context("load vector index")?;
        let mut scalar = ScalarStore::load(&dir.join(SCALAR_INDEX_DIR))?;
        scalar
            .field_set_mut()
            .register_label_offsets(Arc::downgrade(vector.label_offsets()));
        tracing::debug!(path = %dir.display(), elements = vector.len(), "index loaded");
        Ok(Self {
            core: RwLock::new(Core {
                meta,
                scalar,
                vector,
            }),
        })
    }

    /// Batched add. Field JSON parses before the writer lock is taken, so a
    /// malformed record fails the batch with no side effects. Per-record
    /// lookup misses skip only that record's scalar update.
    pub fn add_data(&self, records: &[AddRecord]) -> Result<(), EngineError> {
        let mut parsed: Vec<(FieldValues, FieldValues)> = Vec::with_capacity(records.len());
        for record in records {
            let fields = match &record.fields_json {
                Some(json) => FieldValues::parse(json)?,
                None => FieldValues::new(),
            };
            let old_fields = match &record.old_fields_json {
                Some(json) => FieldValues::parse(json)?,
                None => FieldValues::new(),
            };
            parsed.push((fields, old_fields));
        }

        let mut core = self.core.write();
        let mut has_update = false;
        for (record, (fields, old_fields)) in records.iter().zip(&parsed) {
            if let Err(err) = core.vector.add(
                record.label,
                &record.vector,
                &record.sparse_terms,
                &record.sparse_values,
            ) {
                tracing::warn!(label = record.label, error = %err, "vector add failed, record skipped");
                continue;
            }
            let Some(offset) = core.vector.offset_by_label(record.label) else {
                tracing::warn!(label = record.label, "label missing after vector add, scalar skipped");
                continue;
            };
            has_update = true;
            if let Err(err) = core.scalar.add_row(offset, fields, old_fields) {
                tracing::warn!(label = record.label, offset, error = %err, "scalar add incomplete");
            }
        }
        if has_update {
            core.meta.update_timestamp = now_ns();
        }
        Ok(())
    }

    /// Batched delete: scalar then vector per record, absent labels skipped.
    pub fn delete_data(&self, records: &[DeleteRecord]) -> Result<(), EngineError> {
        let mut parsed: Vec<FieldValues> = Vec::with_capacity(records.len());
        for record in records {
            parsed.push(match &record.old_fields_json {
                Some(json) => FieldValues::parse(json)?,
                None => FieldValues::new(),
            });
        }

        let mut core = self.core.write();
        let mut has_update = false;
        for (record, old_fields) in records.iter().zip(&parsed) {
            let Some(offset) = core.vector.offset_by_label(record.label) else {
                tracing::debug!(label = record.label, "delete of absent label skipped");
                continue;
            };
            has_update = true;
            if let Err(err) = core.scalar.delete_row(offset, old_fields) {
                tracing::warn!(label = record.label, offset, error = %err, "scalar delete incomplete");
            }
            core.vector.delete(record.label)?;
        }
        if has_update {
            core.meta.update_timestamp = now_ns();
        }
        Ok(())
    }

    pub fn search(&self, req: &SearchRequest) -> Result<SearchResult, EngineError> {
        let query = dsl::parse_query(&req.dsl)?;

        let core = self.core.read();
        let field_set = core.scalar.field_set();

        let bitmap = match &query.filter {
            Some(filter) => match filter.eval(field_set) {
                Some(bitmap) => Some(bitmap),
                // filter matched nothing: empty result, not an error
                None => return Ok(SearchResult::default()),
            },
            None => None,
        };

        if let Some(sorter) = &query.sorter {
            if query.filter.is_none() && sorter.is_total_count() {
                let mut extra = serde_json::Map::new();
                extra.insert(
                    "__total_count__".to_string(),
                    serde_json::Value::from(core.vector.len() as u64),
                );
                return Ok(SearchResult {
                    extra_json: serde_json::Value::Object(extra).to_string(),
                    ..SearchResult::default()
                });
            }
            let Some(outcome) = sorter.eval(field_set, bitmap.as_ref()) else {
                return Ok(SearchResult::default());
            };
            let mut labels = Vec::with_capacity(outcome.offsets.len());
            let mut scores = Vec::with_capacity(outcome.offsets.len());
            for (offset, score) in outcome.offsets.iter().zip(&outcome.scores) {
                match core.vector.label_by_offset(*offset) {
                    Some(label) => {
                        labels.push(label);
                        scores.push(*score);
                    }
                    None => tracing::debug!(offset, "sorter offset has no live label"),
                }
            }
            let extra_json = outcome
                .extra
                .map(|m| serde_json::Value::Object(m).to_string())
                .unwrap_or_default();
            return Ok(SearchResult {
                labels,
                scores,
                extra_json,
            });
        }

        if !req.query.is_empty() {
            let (labels, scores) = core.vector.search(
                &req.query,
                req.topk,
                bitmap.as_ref(),
                &req.sparse_terms,
                &req.sparse_values,
            )?;
            return Ok(SearchResult {
                labels,
                scores,
                extra_json: String::new(),
            });
        }

        Ok(SearchResult::default())
    }

    /// Writes the on-disk layout under `dir` and returns the update
    /// timestamp. Runs under the reader lock: searches proceed, writers wait.
    pub fn dump(&self, dir: &Path) -> anyhow::Result<u64> {
        let core = self.core.read();
        let scalar_dir = dir.join(SCALAR_INDEX_DIR);
        std::fs::create_dir_all(&scalar_dir)
            .with_context(|| format!("create {}", scalar_dir.display()))?;
        core.scalar.dump(&scalar_dir)?;

        let vector_dir = dir.join(VECTOR_INDEX_DIR);
        std::fs::create_dir_all(&vector_dir)
            .with_context(|| format!("create {}", vector_dir.display()))?;
        core.vector.save(&vector_dir).context("dump vector index")?;

        let mut meta = core.meta.clone();
        meta.vector_index.element_count = core.vector.len() as u64;
        meta.save(&dir.join(META_FILE))?;
        tracing::debug!(path = %dir.display(), "index dumped");
        Ok(core.meta.update_timestamp)
    }

    pub fn get_state(&self) -> EngineState {
        let core = self.core.read();
        EngineState {
            update_timestamp: core.meta.update_timestamp,
            element_count: core.vector.len() as u64,
        }
    }
}
