use crate::dsl::DslError;
use crate::scalar::bitmap::Bitmap;
use crate::scalar::field::FieldSet;
use crate::scalar::ranged_map::RangedMap;
use serde_json::{Map, Value};
use std::cmp::Ordering;

const DEFAULT_MAX_ENTRY: usize = 10_000;
/// Filters below this cardinality (or below 0.5% of the element space) take
/// the materialized sort path instead of streaming over the slots.
const SMALL_BITMAP_LIMIT: u32 = 10_000;
const SMALL_BITMAP_RATIO: f64 = 0.005;
/// Primary-key comparisons in the materialized path tolerate this slack.
const SORT_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq)]
enum SortKind {
    Single,
    Multi,
    Center1d(f64),
}

#[derive(Debug, Clone)]
pub struct SortSpec {
    fields: Vec<String>,
    order_ascs: Vec<bool>,
    topk: usize,
    kind: SortKind,
}

#[derive(Debug, Clone)]
pub struct CountSpec {
    fields: Vec<String>,
    gt: i64,
    max_entry: usize,
}

/// Sealed sorter-operator set: rank by field values, or aggregate counts.
#[derive(Debug, Clone)]
pub enum SortOp {
    Sort(SortSpec),
    Count(CountSpec),
}

/// Offsets with their primary scores, plus aggregation output for `count`.
#[derive(Debug, Default)]
pub struct SortOutcome {
    pub offsets: Vec<u32>,
    pub scores: Vec<f32>,
    pub extra: Option<Map<String, Value>>,
}

pub fn parse_sort(doc: &Value) -> Result<SortOp, DslError> {
    let op = doc
        .get("op")
        .and_then(Value::as_str)
        .ok_or(DslError::MissingOp)?;
    match op {
        "sort" => parse_sort_spec(doc).map(SortOp::Sort),
        "count" => parse_count_spec(doc).map(SortOp::Count),
        other => Err(DslError::UnknownOp {
            op: other.to_string(),
        }),
    }
}

fn parse_sort_fields(doc: &Value, op: &'static str, required: bool) -> Result<Vec<String>, DslError> {
    let Some(field_val) = doc.get("field") else {
        return if required {
            Err(DslError::MissingKey { op, key: "field" })
        } else {
            Ok(Vec::new())
        };
    };
    let fields: Vec<String> = match field_val {
        Value::String(s) => vec![s.clone()],
        Value::Array(arr) => {
            let mut out = Vec::with_capacity(arr.len());
            for v in arr {
                out.push(
                    v.as_str()
                        .ok_or(DslError::InvalidKey { op, key: "field" })?
                        .to_string(),
                );
            }
            out
        }
        _ => return Err(DslError::InvalidKey { op, key: "field" }),
    };
    if fields.is_empty() {
        return Err(DslError::InvalidKey { op, key: "field" });
    }
    Ok(fields)
}

fn parse_orders(doc: &Value) -> Result<Vec<bool>, DslError> {
    let Some(order_val) = doc.get("order") else {
        return Ok(Vec::new());
    };
    let parse_one = |s: &str| match s {
        "asc" => Ok(true),
        "desc" => Ok(false),
        other => Err(DslError::BadOrder {
            got: other.to_string(),
        }),
    };
    match order_val {
        Value::String(s) => Ok(vec![parse_one(s)?]),
        Value::Array(arr) => arr
            .iter()
            .map(|v| {
                v.as_str()
                    .ok_or(DslError::InvalidKey {
                        op: "sort",
                        key: "order",
                    })
                    .and_then(parse_one)
            })
            .collect(),
        _ => Err(DslError::InvalidKey {
            op: "sort",
            key: "order",
        }),
    }
}

fn parse_sort_spec(doc: &Value) -> Result<SortSpec, DslError> {
    let fields = parse_sort_fields(doc, "sort", true)?;
    let mut order_ascs = parse_orders(doc)?;

    let mut centers = Vec::new();
    if let Some(center_val) = doc.get("center") {
        match center_val {
            Value::Number(n) => centers.push(n.as_f64().ok_or(DslError::InvalidKey {
                op: "sort",
                key: "center",
            })?),
            Value::Array(arr) => {
                for v in arr {
                    centers.push(v.as_f64().ok_or(DslError::InvalidKey {
                        op: "sort",
                        key: "center",
                    })?);
                }
            }
            _ => {
                return Err(DslError::InvalidKey {
                    op: "sort",
                    key: "center",
                })
            }
        }
    }

    let topk = match doc.get("topk") {
        Some(v) => v
            .as_i64()
            .filter(|k| *k >= 0)
            .ok_or(DslError::InvalidKey {
                op: "sort",
                key: "topk",
            })? as usize,
        None => 0,
    };

    let is_center1d = match doc.get("type") {
        Some(Value::String(s)) if s == "center1d" => true,
        Some(_) => {
            return Err(DslError::InvalidKey {
                op: "sort",
                key: "type",
            })
        }
        None => false,
    };

    let kind = if is_center1d {
        if fields.len() != 1 || centers.len() != 1 {
            return Err(DslError::BadCenter1d);
        }
        match order_ascs.len() {
            0 => order_ascs.push(true),
            1 if order_ascs[0] => {}
            _ => return Err(DslError::BadCenter1d),
        }
        SortKind::Center1d(centers[0])
    } else if fields.len() == 1 {
        match order_ascs.len() {
            0 => order_ascs.push(false),
            1 => {}
            _ => {
                return Err(DslError::InvalidKey {
                    op: "sort",
                    key: "order",
                })
            }
        }
        SortKind::Single
    } else {
        match order_ascs.len() {
            0 => order_ascs = vec![false; fields.len()],
            1 => order_ascs = vec![order_ascs[0]; fields.len()],
            n if n == fields.len() => {}
            _ => {
                return Err(DslError::InvalidKey {
                    op: "sort",
                    key: "order",
                })
            }
        }
        SortKind::Multi
    };

    Ok(SortSpec {
        fields,
        order_ascs,
        topk,
        kind,
    })
}

fn parse_count_spec(doc: &Value) -> Result<CountSpec, DslError> {
    let fields = parse_sort_fields(doc, "count", false)?;
    let gt = match doc.get("gt") {
        Some(v) => v.as_i64().ok_or(DslError::InvalidKey {
            op: "count",
            key: "gt",
        })?,
        None => -1,
    };
    let max_entry = match doc.get("max_entry") {
        Some(v) => v.as_i64().filter(|m| *m >= 0).ok_or(DslError::InvalidKey {
            op: "count",
            key: "max_entry",
        })? as usize,
        None => DEFAULT_MAX_ENTRY,
    };
    Ok(CountSpec {
        fields,
        gt,
        max_entry,
    })
}

impl SortOp {
    pub fn is_count(&self) -> bool {
        matches!(self, SortOp::Count(_))
    }

    /// `count` with no fields: answered from the live element count when no
    /// filter is present.
    pub fn is_total_count(&self) -> bool {
        matches!(self, SortOp::Count(spec) if spec.fields.is_empty())
    }

    /// Evaluates against the field set under an optional filter bitmap.
    /// `None` means the sorter could not run (missing range field, bad count
    /// fields) and the query answers empty.
    pub fn eval(&self, fields: &FieldSet, valid: Option<&Bitmap>) -> Option<SortOutcome> {
        match self {
            SortOp::Sort(spec) => spec.eval(fields, valid),
            SortOp::Count(spec) => spec.eval(fields, valid),
        }
    }
}

impl SortSpec {
    fn eval(&self, fields: &FieldSet, valid: Option<&Bitmap>) -> Option<SortOutcome> {
        if let Some(valid) = valid {
            let cardinality = valid.cardinality();
            let ratio = cardinality as f64 / (1 + fields.element_size()) as f64;
            if cardinality < SMALL_BITMAP_LIMIT || ratio < SMALL_BITMAP_RATIO {
                return self.eval_materialized(fields, valid);
            }
            let admit = |o: u32| valid.is_set(o);
            return self.eval_streaming(fields, Some(&admit as &dyn Fn(u32) -> bool));
        }
        self.eval_streaming(fields, None)
    }

    fn eval_streaming(
        &self,
        fields: &FieldSet,
        admit: Option<&dyn Fn(u32) -> bool>,
    ) -> Option<SortOutcome> {
        let topk = match &self.kind {
            SortKind::Single => fields.top_k(&self.fields[0], self.topk, self.order_ascs[0], admit),
            SortKind::Multi => {
                fields.top_k_with_conditions(&self.fields, self.topk, &self.order_ascs, admit)
            }
            SortKind::Center1d(center) => {
                fields.top_k_center1d(&self.fields[0], self.topk, *center, admit)
            }
        }?;
        Some(SortOutcome {
            offsets: topk.offsets,
            scores: topk.scores,
            extra: None,
        })
    }

    /// Small filters: materialize the candidate offsets and select the top k
    /// by the composed key instead of walking the slot structures.
    fn eval_materialized(&self, fields: &FieldSet, valid: &Bitmap) -> Option<SortOutcome> {
        let mut candidates = Vec::new();
        valid.get_set_list(&mut candidates);

        let mut conditions: Vec<(&RangedMap, bool)> = Vec::with_capacity(self.fields.len());
        for (field, asc) in self.fields.iter().zip(self.order_ascs.iter()) {
            match fields.ranged(field) {
                Some(map) => conditions.push((map, *asc)),
                None => {
                    tracing::warn!(field = %field, "sort field has no range index");
                    return None;
                }
            }
        }

        let search_k = self.topk.max(1).min(candidates.len());
        let compare = |a: &u32, b: &u32| -> Ordering {
            match &self.kind {
                SortKind::Single | SortKind::Multi => {
                    for (map, asc) in &conditions {
                        let (va, vb) = (map.score_or_absent(*a), map.score_or_absent(*b));
                        let diff = va - vb;
                        if diff > SORT_EPSILON || diff < -SORT_EPSILON {
                            let ord = va.partial_cmp(&vb).unwrap_or(Ordering::Equal);
                            return if *asc { ord } else { ord.reverse() };
                        }
                    }
                    Ordering::Equal
                }
                SortKind::Center1d(center) => {
                    let (map, _) = conditions[0];
                    let (va, vb) = (map.score_or_absent(*a), map.score_or_absent(*b));
                    let (da, db) = ((va - center).abs(), (vb - center).abs());
                    if da != db {
                        da.partial_cmp(&db).unwrap_or(Ordering::Equal)
                    } else {
                        va.partial_cmp(&vb).unwrap_or(Ordering::Equal)
                    }
                }
            }
        };
        if candidates.len() > search_k {
            candidates.select_nth_unstable_by(search_k.saturating_sub(1), compare);
            candidates.truncate(search_k);
        }
        candidates.sort_by(compare);

        let scores = candidates
            .iter()
            .map(|&o| conditions[0].0.score_or_absent(o) as f32)
            .collect();
        Some(SortOutcome {
            offsets: candidates,
            scores,
            extra: None,
        })
    }
}

impl CountSpec {
    fn eval(&self, fields: &FieldSet, valid: Option<&Bitmap>) -> Option<SortOutcome> {
        if self.fields.is_empty() {
            let count = match valid {
                Some(valid) => valid.cardinality() as u64,
                None => fields.element_size() as u64,
            };
            let mut extra = Map::new();
            extra.insert("__total_count__".to_string(), Value::from(count));
            return Some(SortOutcome {
                extra: Some(extra),
                ..SortOutcome::default()
            });
        }
        let enum_count = match fields.count_field_enums(&self.fields, valid) {
            Ok(counts) => counts,
            Err(err) => {
                tracing::warn!(error = %err, "count evaluation failed");
                return None;
            }
        };
        let mut extra = Map::new();
        for (key, cnt) in enum_count {
            if (cnt as i64) > self.gt {
                extra.insert(key, Value::from(cnt));
                if self.max_entry > 0 && extra.len() >= self.max_entry {
                    break;
                }
            }
        }
        let extra = (!extra.is_empty()).then_some(extra);
        Some(SortOutcome {
            extra,
            ..SortOutcome::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::{FieldValue, FieldValues};
    use crate::scalar::field::{FieldGroup, FieldKind};

    fn sample_fields(n: u32) -> FieldSet {
        let mut set = FieldSet::new();
        set.add_group(FieldGroup::new("price", FieldKind::Range)).unwrap();
        set.add_group(FieldGroup::new("rank", FieldKind::Range)).unwrap();
        set.add_group(FieldGroup::new("tag", FieldKind::Enum)).unwrap();
        for o in 0..n {
            let mut fv = FieldValues::new();
            fv.insert("price", FieldValue::Float((o % 7) as f64));
            fv.insert("rank", FieldValue::Float((n - o) as f64));
            fv.insert("tag", FieldValue::Str(if o % 2 == 0 { "even" } else { "odd" }.into()));
            set.add_values(&fv, o).unwrap();
        }
        set
    }

    fn sort_op(dsl: &str) -> SortOp {
        parse_sort(&serde_json::from_str(dsl).unwrap()).unwrap()
    }

    #[test]
    fn default_order_is_desc() {
        let fields = sample_fields(20);
        let out = sort_op(r#"{"op":"sort","field":"price","topk":3}"#)
            .eval(&fields, None)
            .unwrap();
        assert_eq!(out.scores, vec![6.0, 6.0, 6.0]);
    }

    #[test]
    fn asc_sort_with_filter_streams_or_materializes_identically() {
        let fields = sample_fields(50);
        let mut valid = Bitmap::new();
        for o in 10..30 {
            valid.set(o);
        }
        // 20 candidates < 10k: materialized path
        let out = sort_op(r#"{"op":"sort","field":"price","order":"asc","topk":5}"#)
            .eval(&fields, Some(&valid))
            .unwrap();
        assert_eq!(out.offsets.len(), 5);
        assert!(out.offsets.iter().all(|o| (10..30).contains(o)));
        assert!(out.scores.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn multi_field_sort_breaks_ties() {
        let fields = sample_fields(21);
        let out = sort_op(
            r#"{"op":"sort","field":["price","rank"],"order":["asc","asc"],"topk":3}"#,
        )
        .eval(&fields, None)
        .unwrap();
        // price 0 at offsets 0, 7, 14; rank = n - o so ascending rank reverses
        assert_eq!(out.offsets, vec![14, 7, 0]);
    }

    #[test]
    fn center1d_sort() {
        let fields = sample_fields(14);
        let out = sort_op(
            r#"{"op":"sort","field":"price","type":"center1d","center":3.0,"topk":4}"#,
        )
        .eval(&fields, None)
        .unwrap();
        assert!(out.scores.iter().all(|&s| (s - 3.0).abs() <= 1.0));
        assert_eq!(out.scores[0], 3.0);
    }

    #[test]
    fn center1d_materialized_matches_streaming() {
        let fields = sample_fields(40);
        let mut valid = Bitmap::new();
        for o in 0..40 {
            valid.set(o);
        }
        let op = sort_op(
            r#"{"op":"sort","field":"price","type":"center1d","center":2.5,"topk":6}"#,
        );
        let small = op.eval(&fields, Some(&valid)).unwrap();
        let streamed = op.eval(&fields, None).unwrap();
        assert_eq!(small.scores, streamed.scores[..small.scores.len()].to_vec());
    }

    #[test]
    fn sort_on_enum_field_answers_empty() {
        let fields = sample_fields(5);
        assert!(sort_op(r#"{"op":"sort","field":"tag","topk":3}"#)
            .eval(&fields, None)
            .is_none());
    }

    #[test]
    fn count_total() {
        let fields = sample_fields(9);
        let out = sort_op(r#"{"op":"count"}"#).eval(&fields, None).unwrap();
        assert_eq!(out.extra.unwrap()["__total_count__"], Value::from(9u64));

        let mut valid = Bitmap::new();
        valid.set(1);
        valid.set(2);
        let out = sort_op(r#"{"op":"count"}"#).eval(&fields, Some(&valid)).unwrap();
        assert_eq!(out.extra.unwrap()["__total_count__"], Value::from(2u64));
    }

    #[test]
    fn count_by_field_with_gate() {
        let fields = sample_fields(10);
        let out = sort_op(r#"{"op":"count","field":"tag"}"#).eval(&fields, None).unwrap();
        let extra = out.extra.unwrap();
        assert_eq!(extra["even"], Value::from(5u32));
        assert_eq!(extra["odd"], Value::from(5u32));

        let out = sort_op(r#"{"op":"count","field":"tag","gt":5}"#)
            .eval(&fields, None)
            .unwrap();
        assert!(out.extra.is_none());
    }

    #[test]
    fn count_max_entry_caps_output() {
        let mut set = FieldSet::new();
        set.add_group(FieldGroup::new("k", FieldKind::Enum)).unwrap();
        for o in 0..20u32 {
            let mut fv = FieldValues::new();
            fv.insert("k", FieldValue::Str(format!("v{o:02}")));
            set.add_values(&fv, o).unwrap();
        }
        let out = sort_op(r#"{"op":"count","field":"k","max_entry":3}"#)
            .eval(&set, None)
            .unwrap();
        assert_eq!(out.extra.unwrap().len(), 3);
    }

    #[test]
    fn parse_rejects_bad_sorts() {
        for dsl in [
            r#"{"op":"sort"}"#,
            r#"{"op":"sort","field":"f","order":"sideways"}"#,
            r#"{"op":"sort","field":["a","b"],"order":["asc","asc","asc"]}"#,
            r#"{"op":"sort","field":"f","type":"center1d"}"#,
            r#"{"op":"sort","field":"f","type":"center1d","center":1.0,"order":"desc"}"#,
            r#"{"op":"sort","field":"f","topk":-1}"#,
        ] {
            assert!(parse_sort(&serde_json::from_str(dsl).unwrap()).is_err(), "{dsl}");
        }
    }

    #[test]
    fn single_order_broadcasts_to_all_fields() {
        let op = sort_op(r#"{"op":"sort","field":["a","b","c"],"order":"asc","topk":1}"#);
        match op {
            SortOp::Sort(spec) => assert_eq!(spec.order_ascs, vec![true, true, true]),
            _ => unreachable!(),
        }
    }
}
