//! Storage contracts. The case store is the system of record; the engine
//! never caches case state across a scheduler tick.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{AuditEvent, Case, NotificationStatus, ScheduledNotification};

#[async_trait]
pub trait CaseStore: Send + Sync {
    /// Persist a case with an optimistic version check.
    ///
    /// `case.version` is the version the caller loaded (0 for a new case). If the
    /// stored version differs the save fails with `Conflict`. On success the stored
    /// copy, with its version bumped, is returned.
    async fn save(&self, case: &Case) -> Result<Case>;

    /// Load a case, or `NotFound`.
    async fn load(&self, id: &str) -> Result<Case>;

    async fn list_by_committee(&self, committee_id: &str) -> Result<Vec<Case>>;

    async fn append_audit_event(&self, event: &AuditEvent) -> Result<()>;

    /// Audit history of one case, oldest first.
    async fn list_audit(&self, case_id: &str) -> Result<Vec<AuditEvent>>;
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn insert(&self, notification: &ScheduledNotification) -> Result<()>;

    /// Load a notification, or `NotFound`.
    async fn get(&self, id: &str) -> Result<ScheduledNotification>;

    /// Replace the stored record with `next` only if its current status is `expected`.
    /// Returns `false` (and changes nothing) when the status has moved on.
    async fn compare_and_set(
        &self,
        expected: NotificationStatus,
        next: &ScheduledNotification,
    ) -> Result<bool>;

    async fn list_by_status(
        &self,
        status: NotificationStatus,
    ) -> Result<Vec<ScheduledNotification>>;
}
