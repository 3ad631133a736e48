//! Filter grammar issued to the remote data source.
//!
//! An ordered list of `(field, operator, value)` condition triples combined
//! with implicit conjunction, plus an explicit disjunction marker for
//! alternate groups. This is the only query shape the core produces.

use serde_json::{json, Value};

/// Comparison operator in a filter condition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    NotEq,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    In,
}

impl CmpOp {
    /// Wire representation understood by the remote
    pub const fn wire(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "!=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Like => "like",
            Self::In => "in",
        }
    }
}

/// One element of a filter
#[derive(Debug, Clone, PartialEq)]
pub enum FilterItem {
    /// A condition triple
    Condition {
        field: String,
        op: CmpOp,
        value: Value,
    },
    /// Disjunction marker combining the following alternate group
    Or,
}

/// Conjunction of condition triples, empty meaning "match everything"
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Filter {
    items: Vec<FilterItem>,
}

impl Filter {
    /// The unfiltered query
    pub fn none() -> Self {
        Self::default()
    }

    /// Start an empty filter for chaining
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a condition triple
    #[must_use]
    pub fn and(mut self, field: impl Into<String>, op: CmpOp, value: Value) -> Self {
        self.items.push(FilterItem::Condition {
            field: field.into(),
            op,
            value,
        });
        self
    }

    /// Append a disjunction marker
    #[must_use]
    pub fn or(mut self) -> Self {
        self.items.push(FilterItem::Or);
        self
    }

    /// Records modified strictly after the given server timestamp
    pub fn modified_since(write_date: &str) -> Self {
        Self::new().and("write_date", CmpOp::Gt, json!(write_date))
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[FilterItem] {
        &self.items
    }

    /// Serialize into the remote's nested-array domain format
    pub fn to_wire(&self) -> Value {
        Value::Array(
            self.items
                .iter()
                .map(|item| match item {
                    FilterItem::Condition { field, op, value } => {
                        json!([field, op.wire(), value])
                    }
                    FilterItem::Or => json!("|"),
                })
                .collect(),
        )
    }
}
