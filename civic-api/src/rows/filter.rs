//! Filter DSL for `select_rows` / `drop_rows`.
//!
//! On the wire a filter set is a JSON object mapping a column to either a
//! bare literal (equality) or `{ "op": ..., "value": ... }`. It is parsed
//! once at the edge into [`Condition`]s; everything past that point works
//! with the typed [`FilterOp`].

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde_json::{Map, Value};

use super::RowError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Neq,
    Gt,
    Lt,
    Gte,
    Lte,
    Like,
    Ilike,
    In,
    Is,
}

impl FilterOp {
    pub const ALL: [FilterOp; 10] = [
        FilterOp::Eq,
        FilterOp::Neq,
        FilterOp::Gt,
        FilterOp::Lt,
        FilterOp::Gte,
        FilterOp::Lte,
        FilterOp::Like,
        FilterOp::Ilike,
        FilterOp::In,
        FilterOp::Is,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Neq => "neq",
            FilterOp::Gt => "gt",
            FilterOp::Lt => "lt",
            FilterOp::Gte => "gte",
            FilterOp::Lte => "lte",
            FilterOp::Like => "like",
            FilterOp::Ilike => "ilike",
            FilterOp::In => "in",
            FilterOp::Is => "is",
        }
    }
}

impl FromStr for FilterOp {
    type Err = RowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "eq" => FilterOp::Eq,
            "neq" => FilterOp::Neq,
            "gt" => FilterOp::Gt,
            "lt" => FilterOp::Lt,
            "gte" => FilterOp::Gte,
            "lte" => FilterOp::Lte,
            "like" => FilterOp::Like,
            "ilike" => FilterOp::Ilike,
            "in" => FilterOp::In,
            "is" => FilterOp::Is,
            other => return Err(RowError::UnsupportedOperator(other.to_string())),
        })
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub column: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Condition {
    pub fn new(column: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        Self { column: column.into(), op, value: value.into() }
    }

    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, FilterOp::Eq, value)
    }

    pub fn is_in(column: impl Into<String>, values: Vec<Value>) -> Self {
        Self::new(column, FilterOp::In, Value::Array(values))
    }

    /// Shape checks that do not depend on the column type.
    pub(crate) fn check_shape(&self) -> Result<(), RowError> {
        match self.op {
            FilterOp::In if !self.value.is_array() => Err(RowError::Validation(format!(
                "filter \"{}\": `in` expects an array",
                self.column
            ))),
            FilterOp::Is if !matches!(self.value, Value::Null | Value::Bool(_)) => {
                Err(RowError::Validation(format!(
                    "filter \"{}\": `is` expects null, true or false",
                    self.column
                )))
            }
            FilterOp::Like | FilterOp::Ilike if !self.value.is_string() => {
                Err(RowError::Validation(format!(
                    "filter \"{}\": `{}` expects a string pattern",
                    self.column, self.op
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Parse a JSON filter object. A literal means equality; an object with an
/// `op` key is an explicit operator.
pub fn parse_filters(filters: &Map<String, Value>) -> Result<Vec<Condition>, RowError> {
    filters
        .iter()
        .map(|(column, spec)| match spec {
            Value::Object(obj) if obj.contains_key("op") => {
                let op = obj
                    .get("op")
                    .and_then(Value::as_str)
                    .ok_or_else(|| RowError::Validation(format!("filter \"{column}\": `op` must be a string")))?
                    .parse::<FilterOp>()?;
                let value = obj.get("value").cloned().unwrap_or(Value::Null);
                Ok(Condition::new(column.clone(), op, value))
            }
            literal => Ok(Condition::eq(column.clone(), literal.clone())),
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    /// Anything other than `"desc"` is ascending.
    pub fn lenient(order: Option<&str>) -> Self {
        match order {
            Some("desc") => SortOrder::Desc,
            _ => SortOrder::Asc,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    pub column: String,
    pub order: SortOrder,
}

impl Sort {
    pub fn asc(column: impl Into<String>) -> Self {
        Self { column: column.into(), order: SortOrder::Asc }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self { column: column.into(), order: SortOrder::Desc }
    }
}

/// Wire form of a sort: `{ "column": "created_at", "order": "desc" }`.
#[derive(Debug, Clone, Deserialize)]
pub struct SortSpec {
    pub column: String,
    #[serde(default)]
    pub order: Option<String>,
}

impl From<SortSpec> for Sort {
    fn from(spec: SortSpec) -> Self {
        Self { order: SortOrder::lenient(spec.order.as_deref()), column: spec.column }
    }
}
