//! Compiled predicates.
//!
//! A [`Predicate`] can only be obtained through [`Predicate::compile`] (or by
//! deserializing, which compiles), so every predicate a rule holds is
//! well-typed and evaluation cannot fail.

use caseflow_core::error::{CaseflowError, Result};
use caseflow_core::types::{Condition, Field, Value};
use serde::{Deserialize, Serialize};

use crate::attributes::CaseAttributes;

/// Deepest `And`/`Or` nesting accepted.
pub const MAX_DEPTH: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldType {
    Text,
    Priority,
    Status,
    Number,
    Bool,
}

fn field_type(field: Field) -> FieldType {
    match field {
        Field::Category | Field::CommitteeId | Field::AssigneeId => FieldType::Text,
        Field::Priority => FieldType::Priority,
        Field::Status => FieldType::Status,
        Field::AgeHours | Field::HoursInStatus => FieldType::Number,
        Field::Overdue => FieldType::Bool,
    }
}

fn value_type(value: &Value) -> FieldType {
    match value {
        Value::Text(_) => FieldType::Text,
        Value::Priority(_) => FieldType::Priority,
        Value::Status(_) => FieldType::Status,
        Value::Number(_) => FieldType::Number,
        Value::Bool(_) => FieldType::Bool,
    }
}

/// A type-checked condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Condition", into = "Condition")]
pub struct Predicate(Condition);

impl TryFrom<Condition> for Predicate {
    type Error = CaseflowError;

    fn try_from(condition: Condition) -> Result<Self> {
        Predicate::compile(condition)
    }
}

impl From<Predicate> for Condition {
    fn from(predicate: Predicate) -> Self {
        predicate.0
    }
}

impl Predicate {
    /// Type-check a condition. Malformed conditions are rejected here with
    /// `Configuration`, never at evaluation time.
    pub fn compile(condition: Condition) -> Result<Self> {
        check(&condition, 0)?;
        Ok(Self(condition))
    }

    /// The predicate that matches every case.
    pub fn always() -> Self {
        Self(Condition::always())
    }

    pub fn condition(&self) -> &Condition {
        &self.0
    }

    /// Evaluate against a case's attributes. Total and side-effect free.
    pub fn matches(&self, attrs: &CaseAttributes) -> bool {
        eval(&self.0, attrs)
    }
}

fn check(condition: &Condition, depth: usize) -> Result<()> {
    if depth > MAX_DEPTH {
        return Err(CaseflowError::Configuration(format!(
            "condition nested deeper than {MAX_DEPTH} levels"
        )));
    }
    match condition {
        Condition::Equals { field, value } => check_value(*field, value),
        Condition::In { field, values } => {
            if values.is_empty() {
                return Err(CaseflowError::Configuration(format!(
                    "'in' on {field} needs at least one value"
                )));
            }
            values.iter().try_for_each(|v| check_value(*field, v))
        }
        Condition::Gte { field, value } => {
            match field_type(*field) {
                FieldType::Priority | FieldType::Number => {}
                other => {
                    return Err(CaseflowError::Configuration(format!(
                        "'gte' is not defined for {field} ({other:?} field)"
                    )));
                }
            }
            check_value(*field, value)
        }
        // An empty `and` is vacuously true and serves as "always".
        Condition::And { all } => all.iter().try_for_each(|c| check(c, depth + 1)),
        Condition::Or { any } => {
            if any.is_empty() {
                return Err(CaseflowError::Configuration("'or' needs at least one branch".into()));
            }
            any.iter().try_for_each(|c| check(c, depth + 1))
        }
    }
}

fn check_value(field: Field, value: &Value) -> Result<()> {
    if field_type(field) != value_type(value) {
        return Err(CaseflowError::Configuration(format!(
            "{field} cannot be compared with a {} value",
            value.type_name()
        )));
    }
    if let Value::Text(s) = value {
        if s.trim().is_empty() {
            return Err(CaseflowError::Configuration(format!("empty text value for {field}")));
        }
    }
    Ok(())
}

fn eval(condition: &Condition, attrs: &CaseAttributes) -> bool {
    match condition {
        Condition::Equals { field, value } => field_equals(*field, value, attrs),
        Condition::In { field, values } => values.iter().any(|v| field_equals(*field, v, attrs)),
        Condition::Gte { field, value } => match (field, value) {
            (Field::Priority, Value::Priority(p)) => attrs.priority >= *p,
            (Field::AgeHours, Value::Number(n)) => attrs.age_hours >= *n,
            (Field::HoursInStatus, Value::Number(n)) => attrs.hours_in_status >= *n,
            _ => false,
        },
        Condition::And { all } => all.iter().all(|c| eval(c, attrs)),
        Condition::Or { any } => any.iter().any(|c| eval(c, attrs)),
    }
}

fn field_equals(field: Field, value: &Value, attrs: &CaseAttributes) -> bool {
    match (field, value) {
        (Field::Category, Value::Text(s)) => attrs.category == *s,
        (Field::CommitteeId, Value::Text(s)) => attrs.committee_id.as_deref() == Some(s.as_str()),
        (Field::AssigneeId, Value::Text(s)) => attrs.assignee_id.as_deref() == Some(s.as_str()),
        (Field::Priority, Value::Priority(p)) => attrs.priority == *p,
        (Field::Status, Value::Status(s)) => attrs.status == *s,
        (Field::AgeHours, Value::Number(n)) => attrs.age_hours == *n,
        (Field::HoursInStatus, Value::Number(n)) => attrs.hours_in_status == *n,
        (Field::Overdue, Value::Bool(b)) => attrs.overdue == *b,
        _ => false,
    }
}
