//! Case records and the vocabulary of the case lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CaseflowError, Result};

/// Case priority. Ordered, so `Gte` predicates can compare it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Priority::Low),
            "medium" => Some(Priority::Medium),
            "high" => Some(Priority::High),
            "critical" => Some(Priority::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Case lifecycle status.
///
/// ```text
/// submitted → acknowledged → investigating → in_review → resolved → closed
///     └───────────┴──────────────┴──────────────┴──→ escalated ──→ investigating | resolved
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Submitted,
    Acknowledged,
    Investigating,
    InReview,
    Escalated,
    Resolved,
    Closed,
}

impl CaseStatus {
    pub const ALL: [CaseStatus; 7] = [
        CaseStatus::Submitted,
        CaseStatus::Acknowledged,
        CaseStatus::Investigating,
        CaseStatus::InReview,
        CaseStatus::Escalated,
        CaseStatus::Resolved,
        CaseStatus::Closed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CaseStatus::Submitted => "submitted",
            CaseStatus::Acknowledged => "acknowledged",
            CaseStatus::Investigating => "investigating",
            CaseStatus::InReview => "in_review",
            CaseStatus::Escalated => "escalated",
            CaseStatus::Resolved => "resolved",
            CaseStatus::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|st| st.as_str() == s)
    }

    /// `closed` is the only state no transition leaves.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CaseStatus::Closed)
    }

    /// Resolved and closed cases no longer need state-dependent alerts.
    pub fn is_settled(&self) -> bool {
        matches!(self, CaseStatus::Resolved | CaseStatus::Closed)
    }
}

impl std::fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Actions that move a case between statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseAction {
    Acknowledge,
    StartInvestigation,
    SubmitForReview,
    ReturnToInvestigation,
    Resolve,
    Close,
    Escalate,
    Deescalate,
}

impl CaseAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseAction::Acknowledge => "acknowledge",
            CaseAction::StartInvestigation => "start_investigation",
            CaseAction::SubmitForReview => "submit_for_review",
            CaseAction::ReturnToInvestigation => "return_to_investigation",
            CaseAction::Resolve => "resolve",
            CaseAction::Close => "close",
            CaseAction::Escalate => "escalate",
            CaseAction::Deescalate => "deescalate",
        }
    }
}

impl std::fmt::Display for CaseAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extra data carried by a transition request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransitionPayload {
    /// Required for `Escalate`.
    #[serde(default)]
    pub reason: Option<String>,
    /// Required for `Resolve`.
    #[serde(default)]
    pub notes: Option<String>,
}

impl TransitionPayload {
    pub fn reason(reason: &str) -> Self {
        Self {
            reason: Some(reason.to_string()),
            notes: None,
        }
    }

    pub fn notes(notes: &str) -> Self {
        Self {
            reason: None,
            notes: Some(notes.to_string()),
        }
    }
}

/// Input for creating a case. Status, timestamps and committee are assigned by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCase {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub category: String,
    pub priority: Priority,
    #[serde(default)]
    pub assignee_id: Option<String>,
    #[serde(default)]
    pub reporter_id: Option<String>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
}

impl NewCase {
    pub fn new(title: &str, category: &str, priority: Priority) -> Self {
        Self {
            title: title.to_string(),
            description: String::new(),
            category: category.to_string(),
            priority,
            assignee_id: None,
            reporter_id: None,
            due_date: None,
        }
    }
}

/// A grievance / corrective-action case tracked through the workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Case {
    pub id: String,
    pub title: String,
    pub description: String,
    pub category: String,
    pub priority: Priority,
    pub status: CaseStatus,
    pub committee_id: Option<String>,
    pub assignee_id: Option<String>,
    pub reporter_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub status_updated_at: DateTime<Utc>,
    pub due_date: Option<DateTime<Utc>>,
    /// Non-empty iff status is `escalated`.
    pub escalation_reason: Option<String>,
    /// Non-empty iff status is `resolved` or `closed`.
    pub resolution_notes: Option<String>,
    /// Routing rule that placed the case with its current committee (None after escalation or manual reassignment).
    pub routing_rule_id: Option<String>,
    /// Optimistic concurrency version; bumped by the store on every save.
    pub version: u64,
}

impl Case {
    /// Build a fresh, unsaved `submitted` case.
    pub fn from_new(new: NewCase, now: DateTime<Utc>) -> Self {
        Self {
            id: super::new_id("case"),
            title: new.title,
            description: new.description,
            category: new.category,
            priority: new.priority,
            status: CaseStatus::Submitted,
            committee_id: None,
            assignee_id: new.assignee_id,
            reporter_id: new.reporter_id,
            created_at: now,
            status_updated_at: now,
            due_date: new.due_date,
            escalation_reason: None,
            resolution_notes: None,
            routing_rule_id: None,
            version: 0,
        }
    }

    /// Check the record-level invariants that tie status to its payload fields.
    pub fn check_invariants(&self) -> Result<()> {
        let has_reason = non_empty(&self.escalation_reason);
        if has_reason != (self.status == CaseStatus::Escalated) {
            return Err(CaseflowError::Validation(format!(
                "case {}: escalation_reason must be set exactly when escalated (status '{}')",
                self.id, self.status
            )));
        }
        let has_notes = non_empty(&self.resolution_notes);
        if has_notes != self.status.is_settled() {
            return Err(CaseflowError::Validation(format!(
                "case {}: resolution_notes must be set exactly when resolved or closed (status '{}')",
                self.id, self.status
            )));
        }
        Ok(())
    }

    /// Resolved no later than the due date (or no due date at all).
    pub fn resolved_on_time(&self) -> bool {
        match self.due_date {
            Some(due) => self.status_updated_at <= due,
            None => true,
        }
    }
}

fn non_empty(field: &Option<String>) -> bool {
    field.as_deref().is_some_and(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_case_is_submitted() {
        let case = Case::from_new(
            NewCase::new("Blocked exit", "workplace_safety", Priority::High),
            Utc::now(),
        );
        assert_eq!(case.status, CaseStatus::Submitted);
        assert!(case.id.starts_with("case-"));
        assert!(case.committee_id.is_none());
        assert!(case.check_invariants().is_ok());
    }

    #[test]
    fn test_invariants_tie_reason_to_escalation() {
        let mut case = Case::from_new(NewCase::new("Wages", "wages", Priority::Low), Utc::now());
        case.status = CaseStatus::Escalated;
        assert!(case.check_invariants().is_err());
        case.escalation_reason = Some("  ".into());
        assert!(case.check_invariants().is_err());
        case.escalation_reason = Some("no response".into());
        assert!(case.check_invariants().is_ok());

        case.status = CaseStatus::Resolved;
        case.escalation_reason = None;
        assert!(case.check_invariants().is_err());
        case.resolution_notes = Some("paid".into());
        assert!(case.check_invariants().is_ok());
    }

    #[test]
    fn test_priority_ordering_and_parse() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::Low < Priority::Medium);
        assert_eq!(Priority::parse("critical"), Some(Priority::Critical));
        assert_eq!(CaseStatus::parse("in_review"), Some(CaseStatus::InReview));
        assert_eq!(CaseStatus::parse("bogus"), None);
    }
}
