pub mod filter;
pub mod sort;

pub use filter::FilterOp;
pub use sort::{SortOp, SortOutcome};

use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum DslError {
    #[error("dsl json parse failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("operator object needs a string 'op' key")]
    MissingOp,
    #[error("unsupported operator '{op}'")]
    UnknownOp { op: String },
    #[error("operator '{op}': missing key '{key}'")]
    MissingKey { op: &'static str, key: &'static str },
    #[error("operator '{op}': invalid value for '{key}'")]
    InvalidKey { op: &'static str, key: &'static str },
    #[error("operator '{op}': conds mix numeric and string atoms")]
    MixedConds { op: &'static str },
    #[error("sort order must be \"asc\" or \"desc\", got '{got}'")]
    BadOrder { got: String },
    #[error("center1d sort needs one field, ascending order and a single center")]
    BadCenter1d,
    #[error("invalid depth parameter '{para}'")]
    BadDepth { para: String },
}

/// A parsed query document: at most one filter tree and one sorter tree.
/// Both trees are immutable and live for a single query.
#[derive(Debug, Default)]
pub struct Query {
    pub filter: Option<FilterOp>,
    pub sorter: Option<SortOp>,
}

const SORTER_OP_NAMES: [&str; 2] = ["sort", "count"];

/// Parses the DSL document. The two trees normally live under `filter` and
/// `sorter` (`counter` is accepted for the latter); a bare operator object at
/// the outer level is routed by its op name.
pub fn parse_query(dsl: &str) -> Result<Query, DslError> {
    if dsl.is_empty() {
        return Ok(Query::default());
    }
    let doc: Value = serde_json::from_str(dsl)?;
    let mut query = Query::default();
    let Value::Object(obj) = &doc else {
        return Err(DslError::MissingOp);
    };

    if let Some(filter_doc) = obj.get("filter") {
        query.filter = Some(filter::parse_filter(filter_doc)?);
    }
    if let Some(sorter_doc) = obj.get("counter").or_else(|| obj.get("sorter")) {
        query.sorter = Some(sort::parse_sort(sorter_doc)?);
    }

    if query.filter.is_none() && query.sorter.is_none() {
        let op = obj
            .get("op")
            .and_then(Value::as_str)
            .ok_or(DslError::MissingOp)?;
        if SORTER_OP_NAMES.contains(&op) {
            query.sorter = Some(sort::parse_sort(&doc)?);
        } else {
            query.filter = Some(filter::parse_filter(&doc)?);
        }
    }
    Ok(query)
}
