pub mod bitmap;
pub mod field;
pub mod path_trie;
pub mod ranged_map;

use crate::fields::FieldValues;
use anyhow::Context;
use field::{FieldGroup, FieldKind, FieldSet};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

pub const SCALAR_INDEX_FILE: &str = "scalar_index.data";

#[derive(Debug, thiserror::Error)]
pub enum ScalarError {
    #[error("offset {offset} already holds a range value")]
    DuplicateRangeAdd { offset: u32 },
    #[error("offset {offset} not present")]
    OffsetNotFound { offset: u32 },
    #[error("offset {offset} beyond element size {element_size}")]
    OffsetOutOfRange { offset: u32, element_size: u32 },
    #[error("value type does not match field {field}")]
    TypeMismatch { field: String },
    #[error("field {field} registered twice")]
    DuplicateField { field: String },
    #[error("field {field} not in schema")]
    UnknownField { field: String },
    #[error("count supports 1 or 2 fields, got {count}")]
    BadCountFields { count: usize },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Per-collection scalar store: one FieldGroup per schema field, updated at
/// the logical offsets the vector store hands out.
#[derive(Debug)]
pub struct ScalarStore {
    field_set: FieldSet,
}

impl ScalarStore {
    /// Builds empty field groups from the schema's `{field: type}` map.
    /// Fields with an unrecognised type are skipped with a warning.
    pub fn from_schema(schema: &BTreeMap<String, String>) -> Result<Self, ScalarError> {
        let mut field_set = FieldSet::new();
        for (name, type_str) in schema {
            match FieldKind::from_type_str(type_str) {
                Some(kind) => field_set.add_group(FieldGroup::new(name.clone(), kind))?,
                None => {
                    tracing::warn!(field = %name, field_type = %type_str, "unknown scalar field type, skipped");
                }
            }
        }
        Ok(Self { field_set })
    }

    pub fn load(dir: &Path) -> anyhow::Result<Self> {
        let path = dir.join(SCALAR_INDEX_FILE);
        let file = File::open(&path)
            .with_context(|| format!("open scalar index {}", path.display()))?;
        let mut reader = BufReader::new(file);
        let field_set = FieldSet::deserialize_from(&mut reader)
            .with_context(|| format!("parse scalar index {}", path.display()))?;
        Ok(Self { field_set })
    }

    pub fn dump(&self, dir: &Path) -> anyhow::Result<()> {
        let path = dir.join(SCALAR_INDEX_FILE);
        let file = File::create(&path)
            .with_context(|| format!("create scalar index {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        self.field_set
            .serialize_into(&mut writer)
            .context("write scalar index")?;
        writer.flush().context("flush scalar index")?;
        Ok(())
    }

    /// Applies one record at `offset`: old values are unindexed first so an
    /// update replaces rather than accumulates.
    pub fn add_row(
        &mut self,
        offset: u32,
        fields: &FieldValues,
        old_fields: &FieldValues,
    ) -> Result<(), ScalarError> {
        if !old_fields.is_empty() {
            if let Err(err) = self.field_set.delete_values(old_fields, offset) {
                tracing::warn!(offset, error = %err, "old field cleanup failed");
            }
        }
        self.field_set.add_values(fields, offset)
    }

    pub fn delete_row(&mut self, offset: u32, old_fields: &FieldValues) -> Result<(), ScalarError> {
        self.field_set.delete_values(old_fields, offset)
    }

    pub fn field_set(&self) -> &FieldSet {
        &self.field_set
    }

    pub fn field_set_mut(&mut self) -> &mut FieldSet {
        &mut self.field_set
    }
}
