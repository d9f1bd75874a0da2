//! Vocabulary for notification rules: what fires them, who hears about it, and when.

use serde::{Deserialize, Serialize};

use super::case::CaseStatus;
use super::event::{DomainEvent, EventKind};

/// Workflow event a notification rule listens for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    pub event: EventKind,
    /// Only for status-changing events: fire only when the case moved into this status.
    #[serde(default)]
    pub to_status: Option<CaseStatus>,
}

impl Trigger {
    pub fn on(event: EventKind) -> Self {
        Self {
            event,
            to_status: None,
        }
    }

    pub fn on_status(to_status: CaseStatus) -> Self {
        Self {
            event: EventKind::CaseTransitioned,
            to_status: Some(to_status),
        }
    }

    pub fn matches(&self, event: &DomainEvent) -> bool {
        if event.kind() != self.event {
            return false;
        }
        match self.to_status {
            Some(expected) => event.to_status() == Some(expected),
            None => true,
        }
    }
}

/// Who receives the notifications a rule produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "user_id", rename_all = "snake_case")]
pub enum Audience {
    Assignee,
    Reporter,
    CommitteeMembers,
    User(String),
}

/// When the produced notification is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "anchor", rename_all = "snake_case")]
pub enum Timing {
    /// `minutes` after the triggering event (0 = immediately).
    AfterEvent { minutes: i64 },
    /// `minutes` before the case due date; skipped for cases without one.
    BeforeDue { minutes: i64 },
}

impl Default for Timing {
    fn default() -> Self {
        Timing::AfterEvent { minutes: 0 }
    }
}
