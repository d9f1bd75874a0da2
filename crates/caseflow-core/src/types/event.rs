//! Domain events and the audit records that carry them.
//!
//! The workflow controller and dispatcher never perform side effects on each
//! other directly: they return these events, append them to the audit log,
//! and the scheduler subscribes to them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::case::{CaseAction, CaseStatus};
use super::notification::{Channel, ChannelOutcome, NotificationType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    CaseCreated {
        case_id: String,
        committee_id: String,
        routing_rule_id: Option<String>,
    },
    CaseTransitioned {
        case_id: String,
        from: CaseStatus,
        to: CaseStatus,
        action: CaseAction,
    },
    CaseEscalated {
        case_id: String,
        from: CaseStatus,
        reason: String,
        previous_committee_id: Option<String>,
        committee_id: String,
    },
    CaseReassigned {
        case_id: String,
        previous_committee_id: Option<String>,
        committee_id: String,
    },
    DispatchAttempted {
        notification_id: String,
        case_id: String,
        attempt: u32,
        results: BTreeMap<Channel, ChannelOutcome>,
    },
    NotificationDispatched {
        notification_id: String,
        case_id: String,
        notification_type: NotificationType,
        channels: Vec<Channel>,
    },
    NotificationFailed {
        notification_id: String,
        case_id: String,
        attempts: u32,
    },
    NotificationCancelled {
        notification_id: String,
        case_id: String,
        reason: String,
    },
}

/// Discriminant of a [`DomainEvent`], used by notification rule triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    CaseCreated,
    CaseTransitioned,
    CaseEscalated,
    CaseReassigned,
    DispatchAttempted,
    NotificationDispatched,
    NotificationFailed,
    NotificationCancelled,
}

impl DomainEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            DomainEvent::CaseCreated { .. } => EventKind::CaseCreated,
            DomainEvent::CaseTransitioned { .. } => EventKind::CaseTransitioned,
            DomainEvent::CaseEscalated { .. } => EventKind::CaseEscalated,
            DomainEvent::CaseReassigned { .. } => EventKind::CaseReassigned,
            DomainEvent::DispatchAttempted { .. } => EventKind::DispatchAttempted,
            DomainEvent::NotificationDispatched { .. } => EventKind::NotificationDispatched,
            DomainEvent::NotificationFailed { .. } => EventKind::NotificationFailed,
            DomainEvent::NotificationCancelled { .. } => EventKind::NotificationCancelled,
        }
    }

    pub fn case_id(&self) -> &str {
        match self {
            DomainEvent::CaseCreated { case_id, .. }
            | DomainEvent::CaseTransitioned { case_id, .. }
            | DomainEvent::CaseEscalated { case_id, .. }
            | DomainEvent::CaseReassigned { case_id, .. }
            | DomainEvent::DispatchAttempted { case_id, .. }
            | DomainEvent::NotificationDispatched { case_id, .. }
            | DomainEvent::NotificationFailed { case_id, .. }
            | DomainEvent::NotificationCancelled { case_id, .. } => case_id,
        }
    }

    /// Status the case moved into, for status-changing events.
    pub fn to_status(&self) -> Option<CaseStatus> {
        match self {
            DomainEvent::CaseTransitioned { to, .. } => Some(*to),
            DomainEvent::CaseEscalated { .. } => Some(CaseStatus::Escalated),
            DomainEvent::CaseCreated { .. } => Some(CaseStatus::Submitted),
            _ => None,
        }
    }
}

/// One append-only audit log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: String,
    pub case_id: String,
    pub actor: String,
    pub event: DomainEvent,
    pub recorded_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(actor: &str, event: DomainEvent) -> Self {
        Self {
            id: super::new_id("audit"),
            case_id: event.case_id().to_string(),
            actor: actor.to_string(),
            event,
            recorded_at: Utc::now(),
        }
    }
}
