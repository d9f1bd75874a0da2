//! Serializable form of rule conditions.
//!
//! A `Condition` is untrusted input (config files, admin API). It is compiled
//! into a checked predicate by `caseflow-rules` before any rule can hold it.

use serde::{Deserialize, Serialize};

use super::case::{CaseStatus, Priority};

/// Case attributes a condition may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Category,
    Priority,
    Status,
    CommitteeId,
    AssigneeId,
    /// Whole hours since the case was created.
    AgeHours,
    /// Whole hours since the last status change.
    HoursInStatus,
    Overdue,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Category => "category",
            Field::Priority => "priority",
            Field::Status => "status",
            Field::CommitteeId => "committee_id",
            Field::AssigneeId => "assignee_id",
            Field::AgeHours => "age_hours",
            Field::HoursInStatus => "hours_in_status",
            Field::Overdue => "overdue",
        }
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A literal compared against a field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Text(String),
    Priority(Priority),
    Status(CaseStatus),
    Number(i64),
    Bool(bool),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Text(_) => "text",
            Value::Priority(_) => "priority",
            Value::Status(_) => "status",
            Value::Number(_) => "number",
            Value::Bool(_) => "bool",
        }
    }
}

/// Closed condition algebra over case attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Condition {
    Equals { field: Field, value: Value },
    In { field: Field, values: Vec<Value> },
    Gte { field: Field, value: Value },
    And { all: Vec<Condition> },
    Or { any: Vec<Condition> },
}

impl Condition {
    pub fn equals(field: Field, value: Value) -> Self {
        Condition::Equals { field, value }
    }

    pub fn one_of(field: Field, values: Vec<Value>) -> Self {
        Condition::In { field, values }
    }

    pub fn gte(field: Field, value: Value) -> Self {
        Condition::Gte { field, value }
    }

    pub fn and(all: Vec<Condition>) -> Self {
        Condition::And { all }
    }

    pub fn or(any: Vec<Condition>) -> Self {
        Condition::Or { any }
    }

    pub fn category(category: &str) -> Self {
        Condition::equals(Field::Category, Value::Text(category.to_string()))
    }

    /// The condition that matches every case.
    pub fn always() -> Self {
        Condition::And { all: vec![] }
    }
}
