//! In-memory stores. Cheap to build, lost on exit.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, RwLock};

use async_trait::async_trait;
use caseflow_core::error::{CaseflowError, Result};
use caseflow_core::traits::{CaseStore, NotificationStore, PreferenceProvider};
use caseflow_core::types::{
    AuditEvent, Case, ChannelPreference, NotificationStatus, ScheduledNotification,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Reject status moves outside the notification lifecycle. Same-status writes are updates.
pub(crate) fn check_edge(expected: NotificationStatus, next: NotificationStatus) -> Result<()> {
    if expected == next || expected.can_become(next) {
        Ok(())
    } else {
        Err(CaseflowError::Validation(format!(
            "notification cannot move from {expected} to {next}"
        )))
    }
}

#[derive(Default)]
pub struct MemoryCaseStore {
    cases: Mutex<HashMap<String, Case>>,
    audit: Mutex<Vec<AuditEvent>>,
}

impl MemoryCaseStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CaseStore for MemoryCaseStore {
    async fn save(&self, case: &Case) -> Result<Case> {
        let mut cases = lock(&self.cases);
        let stored_version = cases.get(&case.id).map(|c| c.version);
        match stored_version {
            Some(v) if v != case.version => {
                return Err(CaseflowError::Conflict(format!(
                    "case {} was modified (expected version {}, found {v})",
                    case.id, case.version
                )));
            }
            None if case.version != 0 => return Err(CaseflowError::not_found("case", &case.id)),
            _ => {}
        }
        let mut saved = case.clone();
        saved.version = case.version + 1;
        cases.insert(saved.id.clone(), saved.clone());
        Ok(saved)
    }

    async fn load(&self, id: &str) -> Result<Case> {
        lock(&self.cases)
            .get(id)
            .cloned()
            .ok_or_else(|| CaseflowError::not_found("case", id))
    }

    async fn list_by_committee(&self, committee_id: &str) -> Result<Vec<Case>> {
        let mut found: Vec<Case> = lock(&self.cases)
            .values()
            .filter(|c| c.committee_id.as_deref() == Some(committee_id))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(found)
    }

    async fn append_audit_event(&self, event: &AuditEvent) -> Result<()> {
        lock(&self.audit).push(event.clone());
        Ok(())
    }

    async fn list_audit(&self, case_id: &str) -> Result<Vec<AuditEvent>> {
        Ok(lock(&self.audit)
            .iter()
            .filter(|e| e.case_id == case_id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct MemoryNotificationStore {
    items: Mutex<HashMap<String, ScheduledNotification>>,
}

impl MemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NotificationStore for MemoryNotificationStore {
    async fn insert(&self, notification: &ScheduledNotification) -> Result<()> {
        let mut items = lock(&self.items);
        if items.contains_key(&notification.id) {
            return Err(CaseflowError::Validation(format!(
                "notification {} already exists",
                notification.id
            )));
        }
        items.insert(notification.id.clone(), notification.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<ScheduledNotification> {
        lock(&self.items)
            .get(id)
            .cloned()
            .ok_or_else(|| CaseflowError::not_found("notification", id))
    }

    async fn compare_and_set(
        &self,
        expected: NotificationStatus,
        next: &ScheduledNotification,
    ) -> Result<bool> {
        check_edge(expected, next.status)?;
        let mut items = lock(&self.items);
        let current = items
            .get_mut(&next.id)
            .ok_or_else(|| CaseflowError::not_found("notification", &next.id))?;
        if current.status != expected {
            return Ok(false);
        }
        *current = next.clone();
        Ok(true)
    }

    async fn list_by_status(
        &self,
        status: NotificationStatus,
    ) -> Result<Vec<ScheduledNotification>> {
        let mut found: Vec<ScheduledNotification> = lock(&self.items)
            .values()
            .filter(|n| n.status == status)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.dispatch_at.cmp(&b.dispatch_at).then_with(|| a.id.cmp(&b.id)));
        Ok(found)
    }
}

/// Settings provider backed by a map. Users without an entry get the defaults.
#[derive(Default)]
pub struct MemoryPreferences {
    prefs: RwLock<HashMap<String, ChannelPreference>>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_list(prefs: impl IntoIterator<Item = ChannelPreference>) -> Result<Self> {
        let store = Self::new();
        for pref in prefs {
            store.set(pref)?;
        }
        Ok(store)
    }

    pub fn set(&self, pref: ChannelPreference) -> Result<()> {
        pref.validate()?;
        let mut prefs = self.prefs.write().unwrap_or_else(|p| p.into_inner());
        prefs.insert(pref.user_id.clone(), pref);
        Ok(())
    }
}

#[async_trait]
impl PreferenceProvider for MemoryPreferences {
    async fn channel_preference(&self, user_id: &str) -> Result<ChannelPreference> {
        let prefs = self.prefs.read().unwrap_or_else(|p| p.into_inner());
        Ok(prefs
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| ChannelPreference::default_for(user_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caseflow_core::ErrorKind;
    use caseflow_core::types::{DomainEvent, NewCase, NotificationType, Priority};
    use chrono::Utc;

    fn case() -> Case {
        let mut c = Case::from_new(
            NewCase::new("Broken ladder", "workplace_safety", Priority::High),
            Utc::now(),
        );
        c.committee_id = Some("safety".into());
        c
    }

    #[tokio::test]
    async fn test_save_bumps_version_and_detects_conflicts() {
        let store = MemoryCaseStore::new();
        let first = store.save(&case()).await.unwrap();
        assert_eq!(first.version, 1);

        let mut a = first.clone();
        a.title = "a".into();
        let mut b = first.clone();
        b.title = "b".into();
        assert_eq!(store.save(&a).await.unwrap().version, 2);
        let err = store.save(&b).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(store.load(&first.id).await.unwrap().title, "a");
    }

    #[tokio::test]
    async fn test_save_unknown_with_version_is_not_found() {
        let store = MemoryCaseStore::new();
        let mut c = case();
        c.version = 3;
        assert_eq!(store.save(&c).await.unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_list_by_committee_and_audit() {
        let store = MemoryCaseStore::new();
        let saved = store.save(&case()).await.unwrap();
        assert_eq!(store.list_by_committee("safety").await.unwrap().len(), 1);
        assert!(store.list_by_committee("general").await.unwrap().is_empty());

        let event = DomainEvent::CaseCreated {
            case_id: saved.id.clone(),
            committee_id: "safety".into(),
            routing_rule_id: None,
        };
        store.append_audit_event(&AuditEvent::new("worker", event)).await.unwrap();
        let history = store.list_audit(&saved.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].actor, "worker");
    }

    #[tokio::test]
    async fn test_compare_and_set_only_from_expected_status() {
        let store = MemoryNotificationStore::new();
        let n = ScheduledNotification::new(
            "case-1",
            "u1",
            NotificationType::Reminder,
            serde_json::json!({}),
            Utc::now(),
        );
        store.insert(&n).await.unwrap();
        assert!(store.insert(&n).await.is_err());

        let mut processing = n.clone();
        processing.status = NotificationStatus::Processing;
        assert!(store.compare_and_set(NotificationStatus::Pending, &processing).await.unwrap());
        // second claimer loses
        assert!(!store.compare_and_set(NotificationStatus::Pending, &processing).await.unwrap());

        let mut sent = processing.clone();
        sent.status = NotificationStatus::Sent;
        assert!(store.compare_and_set(NotificationStatus::Processing, &sent).await.unwrap());

        let mut cancelled = sent.clone();
        cancelled.status = NotificationStatus::Cancelled;
        assert!(store.compare_and_set(NotificationStatus::Sent, &cancelled).await.is_err());
        assert_eq!(store.list_by_status(NotificationStatus::Sent).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_preferences_default_for_unknown_user() {
        let prefs = MemoryPreferences::new();
        let p = prefs.channel_preference("nobody").await.unwrap();
        assert_eq!(p.user_id, "nobody");

        assert!(prefs.set(ChannelPreference::default_for("")).is_err());
    }
}
