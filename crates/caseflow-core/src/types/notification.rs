//! Scheduled notifications and the channels they travel over.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default number of dispatch attempts before a notification is failed.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    CaseCreated,
    Assignment,
    StatusChanged,
    Escalated,
    Reminder,
    DeadlineApproaching,
}

impl NotificationType {
    pub const ALL: [NotificationType; 6] = [
        NotificationType::CaseCreated,
        NotificationType::Assignment,
        NotificationType::StatusChanged,
        NotificationType::Escalated,
        NotificationType::Reminder,
        NotificationType::DeadlineApproaching,
    ];

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::CaseCreated => "case_created",
            NotificationType::Assignment => "assignment",
            NotificationType::StatusChanged => "status_changed",
            NotificationType::Escalated => "escalated",
            NotificationType::Reminder => "reminder",
            NotificationType::DeadlineApproaching => "deadline_approaching",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_str() == s)
    }

    /// Alerts that only make sense while the case is still open.
    /// They are cancelled instead of sent once the case is resolved or closed.
    pub fn is_case_state_dependent(&self) -> bool {
        !matches!(self, NotificationType::StatusChanged)
    }
}

impl std::fmt::Display for NotificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Sms,
    Push,
    InApp,
}

impl Channel {
    pub const ALL: [Channel; 4] = [Channel::Email, Channel::Sms, Channel::Push, Channel::InApp];

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Sms => "sms",
            Channel::Push => "push",
            Channel::InApp => "in_app",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.as_str() == s)
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Pending,
    Processing,
    Sent,
    Failed,
    Cancelled,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Pending => "pending",
            NotificationStatus::Processing => "processing",
            NotificationStatus::Sent => "sent",
            NotificationStatus::Failed => "failed",
            NotificationStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(NotificationStatus::Pending),
            "processing" => Some(NotificationStatus::Processing),
            "sent" => Some(NotificationStatus::Sent),
            "failed" => Some(NotificationStatus::Failed),
            "cancelled" => Some(NotificationStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NotificationStatus::Sent | NotificationStatus::Failed | NotificationStatus::Cancelled
        )
    }

    /// Allowed edges: pending → processing → {sent | failed}, processing → pending
    /// (retry requeue), and {pending | processing} → cancelled.
    pub fn can_become(&self, next: NotificationStatus) -> bool {
        use NotificationStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Processing, Sent)
                | (Processing, Failed)
                | (Processing, Pending)
                | (Pending, Cancelled)
                | (Processing, Cancelled)
        )
    }
}

impl std::fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one channel send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "error", rename_all = "snake_case")]
pub enum ChannelOutcome {
    Success,
    Failed(String),
}

impl ChannelOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ChannelOutcome::Success)
    }
}

/// A notification waiting for (or finished with) dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledNotification {
    pub id: String,
    pub subject_case_id: String,
    pub recipient_id: String,
    pub notification_type: NotificationType,
    pub payload: serde_json::Value,
    /// Logical due time, kept unchanged for SLA reporting.
    pub scheduled_for: DateTime<Utc>,
    /// Effective dispatch time after quiet-hour, batching and backoff adjustment.
    pub dispatch_at: DateTime<Utc>,
    pub status: NotificationStatus,
    pub retry_count: u32,
    pub max_attempts: u32,
    #[serde(default)]
    pub channel_results: BTreeMap<Channel, ChannelOutcome>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduledNotification {
    pub fn new(
        subject_case_id: &str,
        recipient_id: &str,
        notification_type: NotificationType,
        payload: serde_json::Value,
        scheduled_for: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: super::new_id("ntf"),
            subject_case_id: subject_case_id.to_string(),
            recipient_id: recipient_id.to_string(),
            notification_type,
            payload,
            scheduled_for,
            dispatch_at: scheduled_for,
            status: NotificationStatus::Pending,
            retry_count: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            channel_results: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Whether another attempt is allowed after the current failure count.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_edges() {
        use NotificationStatus::*;
        assert!(Pending.can_become(Processing));
        assert!(Processing.can_become(Sent));
        assert!(Processing.can_become(Pending));
        assert!(Pending.can_become(Cancelled));
        assert!(!Pending.can_become(Sent));
        assert!(!Sent.can_become(Cancelled));
        assert!(!Failed.can_become(Pending));
        assert!(!Cancelled.can_become(Processing));
    }

    #[test]
    fn test_state_dependent_types() {
        assert!(NotificationType::Reminder.is_case_state_dependent());
        assert!(NotificationType::Escalated.is_case_state_dependent());
        assert!(!NotificationType::StatusChanged.is_case_state_dependent());
    }

    #[test]
    fn test_channel_results_serialize_as_map() {
        let mut n = ScheduledNotification::new(
            "case-1",
            "u1",
            NotificationType::Reminder,
            serde_json::json!({}),
            Utc::now(),
        );
        n.channel_results.insert(Channel::Email, ChannelOutcome::Failed("timeout".into()));
        n.channel_results.insert(Channel::InApp, ChannelOutcome::Success);
        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["channel_results"]["in_app"]["outcome"], "success");
        assert_eq!(json["channel_results"]["email"]["error"], "timeout");
    }
}
