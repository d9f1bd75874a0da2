//! Domain types for cases, committees, notifications, preferences and events.

pub mod case;
pub mod committee;
pub mod condition;
pub mod event;
pub mod notification;
pub mod preference;
pub mod trigger;

pub use case::{Case, CaseAction, CaseStatus, NewCase, Priority, TransitionPayload};
pub use committee::{CaseOutcome, Committee};
pub use condition::{Condition, Field, Value};
pub use event::{AuditEvent, DomainEvent, EventKind};
pub use notification::{
    Channel, ChannelOutcome, NotificationStatus, NotificationType, ScheduledNotification,
};
pub use preference::{ChannelMatrix, ChannelPreference, ChannelToggles, Frequency, QuietHours};
pub use trigger::{Audience, Timing, Trigger};

/// Generate a prefixed unique id (`case-3f2a…`).
pub fn new_id(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4().simple())
}
