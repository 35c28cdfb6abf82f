use crate::dsl::DslError;
use crate::scalar::bitmap::Bitmap;
use crate::scalar::field::FieldSet;
use serde_json::Value;

/// How an operator folds its own bitmap into the caller's running result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combine {
    And,
    Or,
}

/// Sealed filter-operator tree. Evaluation returns `None` for "no match";
/// an empty bitmap means "matched an empty key set" and participates in
/// set algebra normally.
#[derive(Debug, Clone)]
pub enum FilterOp {
    And {
        conds: Vec<FilterOp>,
        ignore_empty: bool,
    },
    Or {
        conds: Vec<FilterOp>,
    },
    Must {
        field: String,
        keys: Vec<String>,
        depth: i32,
    },
    MustNot {
        field: String,
        keys: Vec<String>,
        depth: i32,
    },
    Range {
        fields: Vec<String>,
        lower_than: f64,
        include_le: bool,
        greater_than: f64,
        include_ge: bool,
        range_out: bool,
        center: Vec<f64>,
        radius: f64,
    },
    LabelIn {
        labels: Vec<u64>,
    },
    Prefix {
        field: String,
        prefix: String,
    },
    Contains {
        field: String,
        substring: String,
    },
    Regex {
        field: String,
        pattern: String,
    },
}

pub fn parse_filter(doc: &Value) -> Result<FilterOp, DslError> {
    let obj = doc.as_object().ok_or(DslError::MissingOp)?;
    let op = obj
        .get("op")
        .and_then(Value::as_str)
        .ok_or(DslError::MissingOp)?;
    match op {
        "and" => {
            let conds = parse_logic_conds(doc, "and")?;
            let ignore_empty = obj
                .get("ignore_empty_condition")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            Ok(FilterOp::And { conds, ignore_empty })
        }
        "or" => Ok(FilterOp::Or {
            conds: parse_logic_conds(doc, "or")?,
        }),
        "must" => {
            let (field, keys) = parse_field_conds(doc, "must")?;
            let depth = parse_depth_para(doc)?;
            Ok(FilterOp::Must { field, keys, depth })
        }
        "must_not" => {
            let (field, keys) = parse_field_conds(doc, "must_not")?;
            let depth = parse_depth_para(doc)?;
            Ok(FilterOp::MustNot { field, keys, depth })
        }
        "range" | "geo_range" => parse_range(doc, false),
        "range_out" => parse_range(doc, true),
        "label_in" => {
            let arr = obj
                .get("labels")
                .ok_or(DslError::MissingKey {
                    op: "label_in",
                    key: "labels",
                })?
                .as_array()
                .ok_or(DslError::InvalidKey {
                    op: "label_in",
                    key: "labels",
                })?;
            if arr.is_empty() {
                return Err(DslError::InvalidKey {
                    op: "label_in",
                    key: "labels",
                });
            }
            let mut labels = Vec::with_capacity(arr.len());
            for v in arr {
                let label = v
                    .as_u64()
                    .or_else(|| v.as_i64().map(|i| i as u64))
                    .ok_or(DslError::InvalidKey {
                        op: "label_in",
                        key: "labels",
                    })?;
                labels.push(label);
            }
            Ok(FilterOp::LabelIn { labels })
        }
        "prefix" => Ok(FilterOp::Prefix {
            field: parse_single_field(doc, "prefix")?,
            prefix: parse_str_key(doc, "prefix", "prefix")?,
        }),
        "contains" => Ok(FilterOp::Contains {
            field: parse_single_field(doc, "contains")?,
            substring: parse_str_key(doc, "contains", "substring")?,
        }),
        "regex" => Ok(FilterOp::Regex {
            field: parse_single_field(doc, "regex")?,
            pattern: parse_str_key(doc, "regex", "pattern")?,
        }),
        other => Err(DslError::UnknownOp {
            op: other.to_string(),
        }),
    }
}

fn parse_logic_conds(doc: &Value, op: &'static str) -> Result<Vec<FilterOp>, DslError> {
    let arr = doc
        .get("conds")
        .ok_or(DslError::MissingKey { op, key: "conds" })?
        .as_array()
        .ok_or(DslError::InvalidKey { op, key: "conds" })?;
    if arr.is_empty() {
        return Err(DslError::InvalidKey { op, key: "conds" });
    }
    arr.iter().map(parse_filter).collect()
}

fn parse_fields(doc: &Value, op: &'static str) -> Result<Vec<String>, DslError> {
    let field_val = doc
        .get("field")
        .ok_or(DslError::MissingKey { op, key: "field" })?;
    let fields: Vec<String> = match field_val {
        Value::String(s) => vec![s.clone()],
        Value::Array(arr) => arr
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => return Err(DslError::InvalidKey { op, key: "field" }),
    };
    if fields.is_empty() {
        return Err(DslError::InvalidKey { op, key: "field" });
    }
    Ok(fields)
}

fn parse_single_field(doc: &Value, op: &'static str) -> Result<String, DslError> {
    doc.get("field")
        .ok_or(DslError::MissingKey { op, key: "field" })?
        .as_str()
        .map(str::to_string)
        .ok_or(DslError::InvalidKey { op, key: "field" })
}

fn parse_str_key(doc: &Value, op: &'static str, key: &'static str) -> Result<String, DslError> {
    doc.get(key)
        .ok_or(DslError::MissingKey { op, key })?
        .as_str()
        .map(str::to_string)
        .ok_or(DslError::InvalidKey { op, key })
}

/// Conds atoms are i64, bool or string; bools coerce to "1"/"0"; numeric and
/// string atoms cannot mix. An empty array parses to empty keys, which
/// evaluates to no-match.
fn parse_field_conds(doc: &Value, op: &'static str) -> Result<(String, Vec<String>), DslError> {
    let fields = parse_fields(doc, op)?;
    let arr = doc
        .get("conds")
        .ok_or(DslError::MissingKey { op, key: "conds" })?;
    let Some(arr) = arr.as_array() else {
        return Ok((fields[0].clone(), Vec::new()));
    };
    let mut keys = Vec::with_capacity(arr.len());
    let (mut saw_id, mut saw_str) = (false, false);
    for atom in arr {
        match atom {
            Value::Number(n) => {
                let id = n
                    .as_i64()
                    .ok_or(DslError::InvalidKey { op, key: "conds" })?;
                if saw_str {
                    return Err(DslError::MixedConds { op });
                }
                saw_id = true;
                keys.push(id.to_string());
            }
            Value::String(s) => {
                if saw_id {
                    return Err(DslError::MixedConds { op });
                }
                saw_str = true;
                keys.push(s.clone());
            }
            Value::Bool(b) => {
                if saw_str {
                    return Err(DslError::MixedConds { op });
                }
                saw_id = true;
                keys.push(if *b { "1" } else { "0" }.to_string());
            }
            _ => return Err(DslError::InvalidKey { op, key: "conds" }),
        }
    }
    Ok((fields[0].clone(), keys))
}

/// `para: "-d=N"` recursion depth for path fields, whitespace stripped,
/// clamped to [-1, 50]. Other non-empty content is ignored with a warning.
fn parse_depth_para(doc: &Value) -> Result<i32, DslError> {
    let Some(para_val) = doc.get("para") else {
        return Ok(-1);
    };
    let para_str = match para_val {
        Value::String(s) => s.clone(),
        Value::Array(arr) => {
            if arr.len() > 1 {
                tracing::warn!("'para' array has multiple values, only the first is used");
            }
            match arr.first().and_then(Value::as_str) {
                Some(s) => s.to_string(),
                None => String::new(),
            }
        }
        _ => {
            return Err(DslError::BadDepth {
                para: para_val.to_string(),
            })
        }
    };
    let stripped: String = para_str.chars().filter(|c| !c.is_whitespace()).collect();
    if stripped.is_empty() {
        return Ok(-1);
    }
    if let Some(num) = stripped.strip_prefix("-d=") {
        let depth: i32 = num.parse().map_err(|_| DslError::BadDepth {
            para: para_str.clone(),
        })?;
        Ok(depth.clamp(-1, 50))
    } else {
        tracing::warn!(para = %stripped, "invalid 'para' content ignored");
        Ok(-1)
    }
}

fn json_f64(v: &Value, op: &'static str, key: &'static str) -> Result<f64, DslError> {
    v.as_f64().ok_or(DslError::InvalidKey { op, key })
}

fn parse_range(doc: &Value, range_out: bool) -> Result<FilterOp, DslError> {
    let op: &'static str = if range_out { "range_out" } else { "range" };
    let fields = parse_fields(doc, op)?;

    let mut center = Vec::new();
    if let Some(center_val) = doc.get("center") {
        let arr = center_val
            .as_array()
            .ok_or(DslError::InvalidKey { op, key: "center" })?;
        if arr.is_empty() {
            return Err(DslError::InvalidKey { op, key: "center" });
        }
        for v in arr {
            center.push(json_f64(v, op, "center")?);
        }
    }
    let mut radius = 0.0;
    if let Some(radius_val) = doc.get("radius") {
        radius = json_f64(radius_val, op, "radius")?;
        if radius < 0.0 {
            return Err(DslError::InvalidKey { op, key: "radius" });
        }
    }

    if fields.len() == 1 {
        let mut greater_than = f64::MIN;
        let mut less_than = f64::MAX;
        let mut include_ge = false;
        let mut include_le = false;
        let mut has_condition = false;

        if center.len() == 1 {
            greater_than = center[0] - radius;
            less_than = center[0] + radius;
            include_ge = true;
            include_le = true;
            has_condition = true;
        }
        if let Some(v) = doc.get("gte") {
            greater_than = json_f64(v, op, "gte")?;
            include_ge = true;
            has_condition = true;
        } else if let Some(v) = doc.get("gt") {
            greater_than = json_f64(v, op, "gt")?;
            include_ge = false;
            has_condition = true;
        }
        if let Some(v) = doc.get("lte") {
            less_than = json_f64(v, op, "lte")?;
            include_le = true;
            has_condition = true;
        } else if let Some(v) = doc.get("lt") {
            less_than = json_f64(v, op, "lt")?;
            include_le = false;
            has_condition = true;
        }
        if !has_condition {
            return Err(DslError::MissingKey { op, key: "gte" });
        }
        Ok(FilterOp::Range {
            fields,
            lower_than: less_than,
            include_le,
            greater_than,
            include_ge,
            range_out,
            center,
            radius,
        })
    } else if fields.len() == 2 && center.len() == 2 {
        Ok(FilterOp::Range {
            fields,
            lower_than: f64::MAX,
            include_le: false,
            greater_than: f64::MIN,
            include_ge: false,
            range_out,
            center,
            radius,
        })
    } else {
        Err(DslError::InvalidKey { op, key: "field" })
    }
}

impl FilterOp {
    /// Evaluates the tree against the field set. `None` means no candidates.
    pub fn eval(&self, fields: &FieldSet) -> Option<Bitmap> {
        self.calc(fields, None, Combine::Or)
    }

    /// One step of the threaded evaluation: fold this operator's own bitmap
    /// into the caller's running result under the on-result operator.
    fn calc(&self, fields: &FieldSet, acc: Option<Bitmap>, on: Combine) -> Option<Bitmap> {
        // Degenerate leaves contribute nothing under OR and poison AND.
        let degenerate = match self {
            FilterOp::Must { keys, .. } | FilterOp::MustNot { keys, .. } => keys.is_empty(),
            FilterOp::Prefix { prefix, .. } => prefix.is_empty(),
            FilterOp::Contains { substring, .. } => substring.is_empty(),
            FilterOp::Regex { pattern, .. } => pattern.is_empty(),
            FilterOp::LabelIn { labels } => labels.is_empty(),
            _ => false,
        };
        if degenerate {
            return match (acc, on) {
                (Some(acc), Combine::Or) => Some(acc),
                _ => None,
            };
        }
        match acc {
            None => self.self_bitmap(fields),
            Some(mut acc) => {
                match on {
                    Combine::And => {
                        // must_not under AND subtracts in place
                        if let FilterOp::MustNot { field, keys, depth } = self {
                            let matched = if fields.is_path_field(field) {
                                fields.path_field_copy(field, keys, *depth)
                            } else {
                                fields.field_copy(field, keys)
                            };
                            if let Some(matched) = matched {
                                acc.exclude(&matched);
                            }
                            return Some(acc);
                        }
                        let own = self.self_bitmap(fields)?;
                        acc.intersect(&own);
                        Some(acc)
                    }
                    Combine::Or => {
                        if let Some(own) = self.self_bitmap(fields) {
                            acc.union(&own);
                        }
                        Some(acc)
                    }
                }
            }
        }
    }

    fn self_bitmap(&self, fields: &FieldSet) -> Option<Bitmap> {
        match self {
            FilterOp::And { conds, ignore_empty } => {
                if *ignore_empty {
                    let mut acc: Option<Bitmap> = None;
                    for cond in conds {
                        if let Some(own) = cond.calc(fields, None, Combine::And) {
                            match &mut acc {
                                None => acc = Some(own),
                                Some(acc) => acc.intersect(&own),
                            }
                        }
                    }
                    return acc;
                }
                let mut acc: Option<Bitmap> = None;
                for cond in conds {
                    acc = cond.calc(fields, acc, Combine::And);
                    acc.as_ref()?;
                }
                acc
            }
            FilterOp::Or { conds } => {
                // a no-match child never drops an already accumulated result
                let mut acc: Option<Bitmap> = None;
                for cond in conds {
                    acc = cond.calc(fields, acc, Combine::Or);
                }
                acc
            }
            FilterOp::Must { field, keys, depth } => {
                if fields.is_path_field(field) {
                    fields.path_field_copy(field, keys, *depth)
                } else {
                    fields.field_copy(field, keys)
                }
            }
            FilterOp::MustNot { field, keys, depth } => {
                if fields.is_path_field(field) {
                    Some(fields.path_field_exclude_copy(field, keys, *depth))
                } else {
                    Some(fields.field_exclude_copy(field, keys))
                }
            }
            FilterOp::Range {
                fields: range_fields,
                lower_than,
                include_le,
                greater_than,
                include_ge,
                range_out,
                center,
                radius,
            } => {
                if range_fields.len() == 2 && center.len() == 2 {
                    fields.range2d_copy(range_fields, center, *radius)
                } else {
                    fields.range_copy(
                        *range_out,
                        &range_fields[0],
                        *lower_than,
                        *include_le,
                        *greater_than,
                        *include_ge,
                    )
                }
            }
            FilterOp::LabelIn { labels } => {
                let offsets = fields.offsets_for_labels(labels)?;
                if offsets.is_empty() {
                    return None;
                }
                Some(Bitmap::from_offsets(&offsets))
            }
            FilterOp::Prefix { field, prefix } => fields.field_prefix_copy(field, prefix),
            FilterOp::Contains { field, substring } => fields.field_contains_copy(field, substring),
            FilterOp::Regex { field, pattern } => fields.field_regex_copy(field, pattern),
        }
    }
}
