//! The structured query specification.
//!
//! Created from client JSON at the coordinator, persisted as an opaque string
//! on the job, re-parsed by the worker, evaluated once, discarded. The model
//! is engine-agnostic; translation to a physical plan lives in the worker.

use serde::{Deserialize, Serialize};

/// Aggregation names accepted in a select entry.
pub const ALLOWED_AGGREGATIONS: &[&str] =
    &["sum", "avg", "average", "count", "min", "max", "first", "last"];

/// Filter operator names accepted in a filter entry.
pub const ALLOWED_OPERATORS: &[&str] = &[
    "=", "==", "!=", "<>", "<", "<=", ">", ">=", "like", "in", "between", "is_null", "is_not_null",
];

/// A column to project, optionally aggregated and renamed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectColumn {
    /// Column name, or `*` for all columns / row counts.
    pub column: String,
    /// Aggregation function, one of [`ALLOWED_AGGREGATIONS`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<String>,
    /// Output column name.
    #[serde(default, rename = "as", skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

/// A filter condition combined with the others by conjunction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterCondition {
    /// Column name to filter on.
    pub column: String,
    /// Operator, one of [`ALLOWED_OPERATORS`]. Unknown operators are dropped
    /// with a warning at execution time; they never fail the query.
    pub operator: String,
    /// Comparison value; an array for `in`, unused for the null checks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    /// Upper bound for `between`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value2: Option<serde_json::Value>,
}

/// An ordering directive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    /// Column or alias to order by.
    pub column: String,
    /// `asc` or `desc`, case-insensitive; defaults to ascending.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
}

impl OrderBy {
    /// Returns true when the directive requests descending order.
    #[must_use]
    pub fn is_descending(&self) -> bool {
        self.direction
            .as_deref()
            .is_some_and(|d| d.eq_ignore_ascii_case("desc"))
    }
}

/// The structured query specification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    /// `project.table`, or a job id resolved by the coordinator.
    pub source: String,
    /// Ordered projection list.
    #[serde(default)]
    pub select: Vec<SelectColumn>,
    /// Filter conditions, combined by conjunction.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<FilterCondition>,
    /// Explicit grouping key. Implicit when any select entry aggregates: the
    /// non-aggregated entries form the key.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group_by: Vec<String>,
    /// Ordering directives.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order_by: Vec<OrderBy>,
    /// Row limit, applied after `offset`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    /// Rows to skip before the limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    /// Opaque client passthrough; never interpreted, echoed back with the
    /// stored spec.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<serde_json::Value>,
}

impl QuerySpec {
    /// Returns true when any select entry carries an aggregation.
    #[must_use]
    pub fn has_aggregation(&self) -> bool {
        self.select
            .iter()
            .any(|entry| entry.aggregation.as_deref().is_some_and(|a| !a.is_empty()))
    }
}

/// Returns true when `aggregation` is one of the supported functions.
#[must_use]
pub fn is_known_aggregation(aggregation: &str) -> bool {
    ALLOWED_AGGREGATIONS.contains(&aggregation.to_ascii_lowercase().as_str())
}

/// Returns true when `operator` is one of the supported filter operators.
#[must_use]
pub fn is_known_operator(operator: &str) -> bool {
    ALLOWED_OPERATORS.contains(&operator.to_ascii_lowercase().as_str())
}
