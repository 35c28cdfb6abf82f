use serde_json::Value;
use std::collections::BTreeMap;

/// One user-supplied scalar attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

/// Typed per-field values parsed from a user `fields_str` JSON object.
#[derive(Debug, Clone, Default)]
pub struct FieldValues {
    values: BTreeMap<String, FieldValue>,
}

impl FieldValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON object of `{field: value}`. Nested values are skipped
    /// with a warning; a non-object document parses to the empty dictionary.
    pub fn parse(json_str: &str) -> Result<Self, serde_json::Error> {
        let doc: Value = serde_json::from_str(json_str)?;
        let mut values = BTreeMap::new();
        let Value::Object(obj) = doc else {
            tracing::warn!("fields json is not an object, ignoring");
            return Ok(Self { values });
        };
        for (name, v) in obj {
            let parsed = match v {
                Value::String(s) => FieldValue::Str(s),
                Value::Bool(b) => FieldValue::Bool(b),
                Value::Number(n) => {
                    if let Some(i) = n.as_i64() {
                        FieldValue::Int(i)
                    } else if let Some(f) = n.as_f64() {
                        FieldValue::Float(f)
                    } else {
                        tracing::warn!(field = %name, "unrepresentable number in fields json, skipped");
                        continue;
                    }
                }
                other => {
                    tracing::warn!(field = %name, kind = ?other, "unsupported value kind in fields json, skipped");
                    continue;
                }
            };
            values.insert(name, parsed);
        }
        Ok(Self { values })
    }

    pub fn insert(&mut self, field: impl Into<String>, value: FieldValue) {
        self.values.insert(field.into(), value);
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.values.iter()
    }
}
