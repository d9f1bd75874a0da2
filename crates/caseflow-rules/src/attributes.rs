//! The typed attribute view of a case that predicates are evaluated against.

use caseflow_core::types::{Case, CaseStatus, Priority};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq)]
pub struct CaseAttributes {
    pub category: String,
    pub priority: Priority,
    pub status: CaseStatus,
    pub committee_id: Option<String>,
    pub assignee_id: Option<String>,
    pub age_hours: i64,
    pub hours_in_status: i64,
    pub overdue: bool,
}

impl CaseAttributes {
    pub fn from_case(case: &Case, now: DateTime<Utc>) -> Self {
        Self {
            category: case.category.clone(),
            priority: case.priority,
            status: case.status,
            committee_id: case.committee_id.clone(),
            assignee_id: case.assignee_id.clone(),
            age_hours: (now - case.created_at).num_hours().max(0),
            hours_in_status: (now - case.status_updated_at).num_hours().max(0),
            overdue: case.due_date.is_some_and(|due| now > due),
        }
    }
}
