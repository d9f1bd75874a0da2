//! SQLite-backed store for cases, the audit log and scheduled notifications.
//! Survives restarts; one connection behind a mutex.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use caseflow_core::error::{CaseflowError, Result};
use caseflow_core::traits::{CaseStore, NotificationStore};
use caseflow_core::types::{
    AuditEvent, Case, CaseStatus, NotificationStatus, NotificationType, Priority,
    ScheduledNotification,
};
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};

use crate::memory::check_edge;

fn db_err(e: rusqlite::Error) -> CaseflowError {
    CaseflowError::Storage(e.to_string())
}

fn json_err(e: serde_json::Error) -> CaseflowError {
    CaseflowError::Storage(format!("corrupt JSON column: {e}"))
}

fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| CaseflowError::Storage(format!("bad timestamp '{s}': {e}")))
}

fn parse_enum<T>(value: &str, what: &str, parse: impl Fn(&str) -> Option<T>) -> Result<T> {
    parse(value).ok_or_else(|| CaseflowError::Storage(format!("unknown {what} '{value}'")))
}

const CASE_COLUMNS: &str = "id, title, description, category, priority, status, committee_id, assignee_id, \
     reporter_id, created_at, status_updated_at, due_date, escalation_reason, resolution_notes, \
     routing_rule_id, version";

const NOTIFICATION_COLUMNS: &str = "id, subject_case_id, recipient_id, notification_type, payload, \
     scheduled_for, dispatch_at, status, retry_count, max_attempts, channel_results, created_at, updated_at";

/// A case row as stored, before enum and timestamp parsing.
struct CaseRow {
    id: String,
    title: String,
    description: String,
    category: String,
    priority: String,
    status: String,
    committee_id: Option<String>,
    assignee_id: Option<String>,
    reporter_id: Option<String>,
    created_at: String,
    status_updated_at: String,
    due_date: Option<String>,
    escalation_reason: Option<String>,
    resolution_notes: Option<String>,
    routing_rule_id: Option<String>,
    version: i64,
}

impl CaseRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            category: row.get(3)?,
            priority: row.get(4)?,
            status: row.get(5)?,
            committee_id: row.get(6)?,
            assignee_id: row.get(7)?,
            reporter_id: row.get(8)?,
            created_at: row.get(9)?,
            status_updated_at: row.get(10)?,
            due_date: row.get(11)?,
            escalation_reason: row.get(12)?,
            resolution_notes: row.get(13)?,
            routing_rule_id: row.get(14)?,
            version: row.get(15)?,
        })
    }

    fn into_case(self) -> Result<Case> {
        Ok(Case {
            priority: parse_enum(&self.priority, "priority", Priority::parse)?,
            status: parse_enum(&self.status, "case status", CaseStatus::parse)?,
            created_at: parse_time(&self.created_at)?,
            status_updated_at: parse_time(&self.status_updated_at)?,
            due_date: self.due_date.as_deref().map(parse_time).transpose()?,
            version: self.version.max(0) as u64,
            id: self.id,
            title: self.title,
            description: self.description,
            category: self.category,
            committee_id: self.committee_id,
            assignee_id: self.assignee_id,
            reporter_id: self.reporter_id,
            escalation_reason: self.escalation_reason,
            resolution_notes: self.resolution_notes,
            routing_rule_id: self.routing_rule_id,
        })
    }
}

struct NotificationRow {
    id: String,
    subject_case_id: String,
    recipient_id: String,
    notification_type: String,
    payload: String,
    scheduled_for: String,
    dispatch_at: String,
    status: String,
    retry_count: u32,
    max_attempts: u32,
    channel_results: String,
    created_at: String,
    updated_at: String,
}

impl NotificationRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            subject_case_id: row.get(1)?,
            recipient_id: row.get(2)?,
            notification_type: row.get(3)?,
            payload: row.get(4)?,
            scheduled_for: row.get(5)?,
            dispatch_at: row.get(6)?,
            status: row.get(7)?,
            retry_count: row.get(8)?,
            max_attempts: row.get(9)?,
            channel_results: row.get(10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
        })
    }

    fn into_notification(self) -> Result<ScheduledNotification> {
        Ok(ScheduledNotification {
            notification_type: parse_enum(
                &self.notification_type,
                "notification type",
                NotificationType::parse,
            )?,
            payload: serde_json::from_str(&self.payload).map_err(json_err)?,
            scheduled_for: parse_time(&self.scheduled_for)?,
            dispatch_at: parse_time(&self.dispatch_at)?,
            status: parse_enum(&self.status, "notification status", NotificationStatus::parse)?,
            channel_results: serde_json::from_str(&self.channel_results).map_err(json_err)?,
            created_at: parse_time(&self.created_at)?,
            updated_at: parse_time(&self.updated_at)?,
            id: self.id,
            subject_case_id: self.subject_case_id,
            recipient_id: self.recipient_id,
            retry_count: self.retry_count,
            max_attempts: self.max_attempts,
        })
    }
}

/// SQLite-backed persistence for everything the engine owns.
pub struct SqliteStore {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteStore {
    /// Open or create the database file.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = rusqlite::Connection::open(path).map_err(db_err)?;
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        tracing::info!("🗄️ Caseflow database opened at {}", path.display());
        Ok(store)
    }

    /// Private in-memory database, for tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory().map_err(db_err)?;
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    fn conn(&self) -> MutexGuard<'_, rusqlite::Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run migrations to create tables.
    fn migrate(&self) -> Result<()> {
        self.conn()
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS cases (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                category TEXT NOT NULL,
                priority TEXT NOT NULL,          -- 'low', 'medium', 'high', 'critical'
                status TEXT NOT NULL,
                committee_id TEXT,
                assignee_id TEXT,
                reporter_id TEXT,
                created_at TEXT NOT NULL,
                status_updated_at TEXT NOT NULL,
                due_date TEXT,
                escalation_reason TEXT,
                resolution_notes TEXT,
                routing_rule_id TEXT,
                version INTEGER NOT NULL         -- optimistic concurrency
            );
            CREATE INDEX IF NOT EXISTS idx_cases_committee ON cases(committee_id);

            -- Append-only audit log
            CREATE TABLE IF NOT EXISTS audit_log (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                case_id TEXT NOT NULL,
                actor TEXT NOT NULL,
                event TEXT NOT NULL,             -- JSON DomainEvent
                recorded_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_audit_case ON audit_log(case_id);

            CREATE TABLE IF NOT EXISTS notifications (
                id TEXT PRIMARY KEY,
                subject_case_id TEXT NOT NULL,
                recipient_id TEXT NOT NULL,
                notification_type TEXT NOT NULL,
                payload TEXT NOT NULL,           -- JSON
                scheduled_for TEXT NOT NULL,
                dispatch_at TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                retry_count INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL,
                channel_results TEXT NOT NULL DEFAULT '{}',  -- JSON map channel -> outcome
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_notifications_status ON notifications(status, dispatch_at);
         ",
            )
            .map_err(|e| CaseflowError::Storage(format!("migration: {e}")))
    }
}

#[async_trait]
impl CaseStore for SqliteStore {
    async fn save(&self, case: &Case) -> Result<Case> {
        let mut saved = case.clone();
        saved.version = case.version + 1;
        let priority = saved.priority.as_str();
        let status = saved.status.as_str();
        let created_at = saved.created_at.to_rfc3339();
        let status_updated_at = saved.status_updated_at.to_rfc3339();
        let due_date = saved.due_date.map(|t| t.to_rfc3339());
        let version = saved.version as i64;
        let expected_version = case.version as i64;
        let values = params![
            saved.id,
            saved.title,
            saved.description,
            saved.category,
            priority,
            status,
            saved.committee_id,
            saved.assignee_id,
            saved.reporter_id,
            created_at,
            status_updated_at,
            due_date,
            saved.escalation_reason,
            saved.resolution_notes,
            saved.routing_rule_id,
            version,
            expected_version,
        ];

        let conn = self.conn();
        let changed = if case.version == 0 {
            conn.execute(
                &format!(
                    "INSERT OR IGNORE INTO cases ({CASE_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"
                ),
                &values[..16],
            )
        } else {
            conn.execute(
                "UPDATE cases SET title = ?2, description = ?3, category = ?4, priority = ?5, status = ?6,
                    committee_id = ?7, assignee_id = ?8, reporter_id = ?9, created_at = ?10,
                    status_updated_at = ?11, due_date = ?12, escalation_reason = ?13,
                    resolution_notes = ?14, routing_rule_id = ?15, version = ?16
                 WHERE id = ?1 AND version = ?17",
                values,
            )
        }
        .map_err(db_err)?;

        if changed == 1 {
            return Ok(saved);
        }
        let stored: Option<i64> = conn
            .query_row("SELECT version FROM cases WHERE id = ?1", params![case.id], |r| r.get(0))
            .optional()
            .map_err(db_err)?;
        match stored {
            Some(v) => Err(CaseflowError::Conflict(format!(
                "case {} was modified (expected version {}, found {v})",
                case.id, case.version
            ))),
            None => Err(CaseflowError::not_found("case", &case.id)),
        }
    }

    async fn load(&self, id: &str) -> Result<Case> {
        let row = self
            .conn()
            .query_row(
                &format!("SELECT {CASE_COLUMNS} FROM cases WHERE id = ?1"),
                params![id],
                CaseRow::read,
            )
            .optional()
            .map_err(db_err)?;
        row.ok_or_else(|| CaseflowError::not_found("case", id))?.into_case()
    }

    async fn list_by_committee(&self, committee_id: &str) -> Result<Vec<Case>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {CASE_COLUMNS} FROM cases WHERE committee_id = ?1 ORDER BY created_at, id"
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![committee_id], CaseRow::read)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        rows.into_iter().map(CaseRow::into_case).collect()
    }

    async fn append_audit_event(&self, event: &AuditEvent) -> Result<()> {
        let json = serde_json::to_string(&event.event).map_err(json_err)?;
        self.conn()
            .execute(
                "INSERT INTO audit_log (id, case_id, actor, event, recorded_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![event.id, event.case_id, event.actor, json, event.recorded_at.to_rfc3339()],
            )
            .map_err(db_err)?;
        Ok(())
    }

    async fn list_audit(&self, case_id: &str) -> Result<Vec<AuditEvent>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT id, case_id, actor, event, recorded_at FROM audit_log WHERE case_id = ?1 ORDER BY seq")
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![case_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        rows.into_iter()
            .map(|(id, case_id, actor, event, recorded_at)| {
                Ok(AuditEvent {
                    id,
                    case_id,
                    actor,
                    event: serde_json::from_str(&event).map_err(json_err)?,
                    recorded_at: parse_time(&recorded_at)?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl NotificationStore for SqliteStore {
    async fn insert(&self, n: &ScheduledNotification) -> Result<()> {
        let payload = serde_json::to_string(&n.payload).map_err(json_err)?;
        let results = serde_json::to_string(&n.channel_results).map_err(json_err)?;
        let changed = self
            .conn()
            .execute(
                &format!(
                    "INSERT OR IGNORE INTO notifications ({NOTIFICATION_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
                ),
                params![
                    n.id,
                    n.subject_case_id,
                    n.recipient_id,
                    n.notification_type.as_str(),
                    payload,
                    n.scheduled_for.to_rfc3339(),
                    n.dispatch_at.to_rfc3339(),
                    n.status.as_str(),
                    n.retry_count,
                    n.max_attempts,
                    results,
                    n.created_at.to_rfc3339(),
                    n.updated_at.to_rfc3339(),
                ],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(CaseflowError::Validation(format!("notification {} already exists", n.id)));
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<ScheduledNotification> {
        let row = self
            .conn()
            .query_row(
                &format!("SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = ?1"),
                params![id],
                NotificationRow::read,
            )
            .optional()
            .map_err(db_err)?;
        row.ok_or_else(|| CaseflowError::not_found("notification", id))?
            .into_notification()
    }

    async fn compare_and_set(
        &self,
        expected: NotificationStatus,
        next: &ScheduledNotification,
    ) -> Result<bool> {
        check_edge(expected, next.status)?;
        let payload = serde_json::to_string(&next.payload).map_err(json_err)?;
        let results = serde_json::to_string(&next.channel_results).map_err(json_err)?;
        let conn = self.conn();
        let changed = conn
            .execute(
                "UPDATE notifications SET payload = ?3, dispatch_at = ?4, status = ?5, retry_count = ?6,
                    max_attempts = ?7, channel_results = ?8, updated_at = ?9
                 WHERE id = ?1 AND status = ?2",
                params![
                    next.id,
                    expected.as_str(),
                    payload,
                    next.dispatch_at.to_rfc3339(),
                    next.status.as_str(),
                    next.retry_count,
                    next.max_attempts,
                    results,
                    next.updated_at.to_rfc3339(),
                ],
            )
            .map_err(db_err)?;
        if changed == 1 {
            return Ok(true);
        }
        let exists: Option<String> = conn
            .query_row(
                "SELECT status FROM notifications WHERE id = ?1",
                params![next.id],
                |r| r.get(0),
            )
            .optional()
            .map_err(db_err)?;
        match exists {
            Some(_) => Ok(false),
            None => Err(CaseflowError::not_found("notification", &next.id)),
        }
    }

    async fn list_by_status(
        &self,
        status: NotificationStatus,
    ) -> Result<Vec<ScheduledNotification>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE status = ?1 ORDER BY dispatch_at, id"
            ))
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![status.as_str()], NotificationRow::read)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        rows.into_iter().map(NotificationRow::into_notification).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caseflow_core::ErrorKind;
    use caseflow_core::types::{Channel, ChannelOutcome, DomainEvent, NewCase};
    use chrono::Duration;

    #[tokio::test]
    async fn test_case_round_trip_with_versioning() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut case = Case::from_new(
            NewCase::new("Unsafe scaffold", "workplace_safety", Priority::Critical),
            Utc::now(),
        );
        case.committee_id = Some("safety".into());
        case.due_date = Some(Utc::now() + Duration::days(7));

        let v1 = store.save(&case).await.unwrap();
        assert_eq!(v1.version, 1);
        let loaded = store.load(&case.id).await.unwrap();
        assert_eq!(loaded.title, "Unsafe scaffold");
        assert_eq!(loaded.priority, Priority::Critical);
        assert_eq!(loaded.version, 1);

        let mut next = loaded.clone();
        next.status = CaseStatus::Acknowledged;
        assert_eq!(store.save(&next).await.unwrap().version, 2);
        // same base version again
        assert_eq!(store.save(&next).await.unwrap_err().kind(), ErrorKind::Conflict);
        // re-inserting as new
        assert_eq!(store.save(&case).await.unwrap_err().kind(), ErrorKind::Conflict);

        assert_eq!(store.list_by_committee("safety").await.unwrap().len(), 1);
        assert_eq!(store.load("case-missing").await.unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_audit_log_keeps_order() {
        let store = SqliteStore::open_in_memory().unwrap();
        for to in [CaseStatus::Acknowledged, CaseStatus::Investigating] {
            let event = DomainEvent::CaseTransitioned {
                case_id: "case-1".into(),
                from: CaseStatus::Submitted,
                to,
                action: caseflow_core::types::CaseAction::Acknowledge,
            };
            store.append_audit_event(&AuditEvent::new("u1", event)).await.unwrap();
        }
        let history = store.list_audit("case-1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].event.to_status(), Some(CaseStatus::Investigating));
    }

    #[tokio::test]
    async fn test_notification_compare_and_set() {
        let store = SqliteStore::open_in_memory().unwrap();
        let n = ScheduledNotification::new(
            "case-1",
            "u1",
            NotificationType::Escalated,
            serde_json::json!({"title": "x"}),
            Utc::now(),
        );
        store.insert(&n).await.unwrap();
        assert!(store.insert(&n).await.is_err());

        let mut claimed = n.clone();
        claimed.status = NotificationStatus::Processing;
        assert!(store.compare_and_set(NotificationStatus::Pending, &claimed).await.unwrap());
        assert!(!store.compare_and_set(NotificationStatus::Pending, &claimed).await.unwrap());

        let mut sent = claimed.clone();
        sent.status = NotificationStatus::Sent;
        sent.channel_results.insert(Channel::InApp, ChannelOutcome::Success);
        assert!(store.compare_and_set(NotificationStatus::Processing, &sent).await.unwrap());

        let loaded = store.get(&n.id).await.unwrap();
        assert_eq!(loaded.status, NotificationStatus::Sent);
        assert_eq!(loaded.channel_results.get(&Channel::InApp), Some(&ChannelOutcome::Success));
        assert!(store.list_by_status(NotificationStatus::Pending).await.unwrap().is_empty());
    }
}
