//! Test doubles shared by the scheduler tests.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use caseflow_core::error::{CaseflowError, Result};
use caseflow_core::traits::{CaseStore, ChannelSender, NotificationStore};
use caseflow_core::types::{
    Case, CaseStatus, Channel, NewCase, NotificationStatus, Priority, ScheduledNotification,
};
use caseflow_store::{MemoryCaseStore, MemoryNotificationStore, MemoryPreferences};
use chrono::Utc;
use tokio::sync::{Notify, watch};

use crate::dispatch::Dispatcher;
use crate::retry::RetryPolicy;

/// Records every send; fails on the channels it is told to. A held sender
/// parks every send until [`ScriptedSender::open`] is called.
pub struct ScriptedSender {
    failing: Mutex<HashSet<Channel>>,
    calls: Mutex<Vec<(Channel, String, serde_json::Value)>>,
    held: bool,
    gate: watch::Sender<bool>,
    entered: Notify,
}

impl Default for ScriptedSender {
    fn default() -> Self {
        Self {
            failing: Mutex::default(),
            calls: Mutex::default(),
            held: false,
            gate: watch::channel(false).0,
            entered: Notify::new(),
        }
    }
}

impl ScriptedSender {
    pub fn failing(channels: &[Channel]) -> Self {
        let sender = Self::default();
        sender.failing.lock().unwrap().extend(channels.iter().copied());
        sender
    }

    pub fn held() -> Self {
        Self {
            held: true,
            ..Self::default()
        }
    }

    /// Wait until some send is parked at the gate.
    pub async fn wait_for_send(&self) {
        self.entered.notified().await;
    }

    pub fn open(&self) {
        self.gate.send_replace(true);
    }

    pub fn calls(&self) -> Vec<(Channel, String, serde_json::Value)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChannelSender for ScriptedSender {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send(
        &self,
        channel: Channel,
        recipient: &str,
        payload: &serde_json::Value,
    ) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push((channel, recipient.to_string(), payload.clone()));
        if self.held {
            self.entered.notify_one();
            let mut gate = self.gate.subscribe();
            let _ = gate.wait_for(|open| *open).await;
        }
        if self.failing.lock().unwrap().contains(&channel) {
            return Err(CaseflowError::Dispatch {
                channel,
                reason: "scripted failure".into(),
            });
        }
        Ok(())
    }
}

/// Memory notification store whose next status change to an armed status fails once.
pub struct FlakyNotifications {
    inner: Arc<MemoryNotificationStore>,
    armed: Mutex<Vec<NotificationStatus>>,
}

impl FlakyNotifications {
    pub fn fail_next(&self, statuses: &[NotificationStatus]) {
        self.armed.lock().unwrap().extend_from_slice(statuses);
    }
}

#[async_trait]
impl NotificationStore for FlakyNotifications {
    async fn insert(&self, notification: &ScheduledNotification) -> Result<()> {
        self.inner.insert(notification).await
    }

    async fn get(&self, id: &str) -> Result<ScheduledNotification> {
        self.inner.get(id).await
    }

    async fn compare_and_set(
        &self,
        expected: NotificationStatus,
        next: &ScheduledNotification,
    ) -> Result<bool> {
        let tripped = {
            let mut armed = self.armed.lock().unwrap();
            match armed.iter().position(|s| *s == next.status) {
                Some(idx) => {
                    armed.remove(idx);
                    true
                }
                None => false,
            }
        };
        if tripped {
            return Err(CaseflowError::Storage("disk I/O error".into()));
        }
        self.inner.compare_and_set(expected, next).await
    }

    async fn list_by_status(
        &self,
        status: NotificationStatus,
    ) -> Result<Vec<ScheduledNotification>> {
        self.inner.list_by_status(status).await
    }
}

pub struct Harness {
    pub cases: Arc<MemoryCaseStore>,
    pub notifications: Arc<MemoryNotificationStore>,
    pub prefs: Arc<MemoryPreferences>,
    pub sender: Arc<ScriptedSender>,
    pub dispatcher: Arc<Dispatcher>,
}

impl Harness {
    pub fn new(sender: ScriptedSender) -> Self {
        let cases = Arc::new(MemoryCaseStore::new());
        let notifications = Arc::new(MemoryNotificationStore::new());
        let prefs = Arc::new(MemoryPreferences::new());
        let sender = Arc::new(sender);
        let dispatcher = Arc::new(Dispatcher::new(
            cases.clone(),
            notifications.clone(),
            prefs.clone(),
            sender.clone(),
            RetryPolicy::default(),
        ));
        Self {
            cases,
            notifications,
            prefs,
            sender,
            dispatcher,
        }
    }

    /// Like [`Harness::new`], but the dispatcher writes through a
    /// [`FlakyNotifications`] wrapped around `notifications`.
    pub fn flaky(sender: ScriptedSender) -> (Self, Arc<FlakyNotifications>) {
        let mut h = Self::new(sender);
        let flaky = Arc::new(FlakyNotifications {
            inner: h.notifications.clone(),
            armed: Mutex::default(),
        });
        h.dispatcher = Arc::new(Dispatcher::new(
            h.cases.clone(),
            flaky.clone(),
            h.prefs.clone(),
            h.sender.clone(),
            RetryPolicy::default(),
        ));
        (h, flaky)
    }

    /// Save a case directly in `status`, bypassing the workflow.
    pub async fn case_in(&self, status: CaseStatus) -> Case {
        let mut case = Case::from_new(
            NewCase::new("Blocked exit", "workplace_safety", Priority::High),
            Utc::now(),
        );
        case.committee_id = Some("safety".into());
        case.status = status;
        if status.is_settled() {
            case.resolution_notes = Some("done".into());
        }
        if status == CaseStatus::Escalated {
            case.escalation_reason = Some("sla".into());
        }
        self.cases.save(&case).await.unwrap()
    }
}
