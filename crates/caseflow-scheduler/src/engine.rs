//! Scheduler Engine — the time-ordered queue and the periodic tick that drains it.
//! Uses a tokio interval owned by a cancellable background task.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use caseflow_core::config::SchedulerConfig;
use caseflow_core::error::{CaseflowError, ErrorKind, Result};
use caseflow_core::traits::NotificationStore;
use caseflow_core::types::{Case, DomainEvent, NotificationStatus, ScheduledNotification};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::dispatch::{DispatchResult, Dispatcher};
use crate::planner::NotificationPlanner;
use crate::policy;
use crate::queue::DispatchQueue;

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Queue entries that came due.
    pub due: usize,
    /// Dispatch groups handed to the dispatcher (a digest counts once).
    pub batches: usize,
    pub sent: usize,
    pub retried: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Entries put back untouched after a storage error.
    pub deferred: usize,
    /// Entries dropped because their stored record was no longer pending.
    pub discarded: usize,
}

impl TickReport {
    pub fn is_idle(&self) -> bool {
        self.due == 0
    }
}

pub struct Scheduler {
    notifications: Arc<dyn NotificationStore>,
    dispatcher: Arc<Dispatcher>,
    planner: NotificationPlanner,
    queue: DispatchQueue,
    max_attempts: u32,
    max_concurrent: usize,
}

impl Scheduler {
    pub fn new(
        notifications: Arc<dyn NotificationStore>,
        dispatcher: Arc<Dispatcher>,
        planner: NotificationPlanner,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            notifications,
            dispatcher,
            planner,
            queue: DispatchQueue::new(),
            max_attempts: config.max_attempts.max(1),
            max_concurrent: config.max_concurrent_dispatches.max(1),
        }
    }

    pub fn planner(&self) -> &NotificationPlanner {
        &self.planner
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Store a notification as pending and queue it at its effective dispatch time.
    ///
    /// `scheduled_for` is kept as given; only `dispatch_at` reflects batching and quiet hours.
    pub async fn schedule(
        &self,
        mut notification: ScheduledNotification,
    ) -> Result<ScheduledNotification> {
        if notification.recipient_id.trim().is_empty() {
            return Err(CaseflowError::Validation("notification needs a recipient".into()));
        }
        if notification.subject_case_id.trim().is_empty() {
            return Err(CaseflowError::Validation("notification needs a subject case".into()));
        }
        let pref = self.dispatcher.preference_for(&notification.recipient_id).await;
        notification.status = NotificationStatus::Pending;
        notification.retry_count = 0;
        notification.max_attempts = notification.max_attempts.max(1);
        notification.dispatch_at =
            policy::effective_dispatch_time(notification.scheduled_for, &pref);

        self.notifications.insert(&notification).await?;
        self.queue.push(&notification.id, notification.dispatch_at);
        tracing::info!(
            "📅 Notification {} ({}) for {} due {}",
            notification.id,
            notification.notification_type,
            notification.recipient_id,
            notification.dispatch_at
        );
        Ok(notification)
    }

    /// Lazy cancellation: marks the stored record only.
    pub async fn cancel(
        &self,
        notification_id: &str,
        reason: &str,
    ) -> Result<ScheduledNotification> {
        self.dispatcher.cancel(notification_id, reason).await
    }

    pub async fn list_pending(&self) -> Result<Vec<ScheduledNotification>> {
        self.notifications.list_by_status(NotificationStatus::Pending).await
    }

    /// Plan and schedule the notifications that workflow events call for.
    pub async fn handle_events(
        &self,
        events: &[DomainEvent],
        case: &Case,
        committee_members: &[String],
    ) -> Result<Vec<ScheduledNotification>> {
        let now = Utc::now();
        let mut scheduled = Vec::new();
        for event in events {
            for planned in self.planner.plan(event, case, committee_members, now) {
                scheduled.push(self.schedule(planned.with_max_attempts(self.max_attempts)).await?);
            }
        }
        Ok(scheduled)
    }

    /// Rebuild the queue from the store after a restart. Anything left
    /// `processing` by a previous run goes back to `pending`.
    pub async fn recover(&self) -> Result<usize> {
        for mut stuck in self.notifications.list_by_status(NotificationStatus::Processing).await? {
            stuck.status = NotificationStatus::Pending;
            stuck.updated_at = Utc::now();
            self.notifications
                .compare_and_set(NotificationStatus::Processing, &stuck)
                .await?;
        }
        let pending = self.list_pending().await?;
        for n in &pending {
            self.queue.push(&n.id, n.dispatch_at);
        }
        if !pending.is_empty() {
            tracing::info!("♻️ Recovered {} pending notification(s)", pending.len());
        }
        Ok(pending.len())
    }

    /// Pop everything due at `now`, drop what is no longer pending, and dispatch
    /// the rest with bounded concurrency. Retryable failures go back on the queue.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let ids = self.queue.pop_due(now);
        let mut report = TickReport {
            due: ids.len(),
            ..TickReport::default()
        };
        if ids.is_empty() {
            return Ok(report);
        }

        let mut single: Vec<Vec<ScheduledNotification>> = Vec::new();
        let mut batched: BTreeMap<(String, DateTime<Utc>), Vec<ScheduledNotification>> =
            BTreeMap::new();
        for id in ids {
            let notification = match self.notifications.get(&id).await {
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    report.discarded += 1;
                    continue;
                }
                Err(e) => {
                    tracing::warn!("⚠️ Could not load notification {id}, retrying next tick: {e}");
                    self.queue.push(&id, now);
                    continue;
                }
            };
            // Ids are queued only while pending, so a processing record here
            // is one whose release failed.
            let notification = match notification.status {
                NotificationStatus::Pending => notification,
                NotificationStatus::Processing => {
                    match self.dispatcher.reset_stranded(&notification, now).await {
                        Ok(Some(reset)) => reset,
                        Ok(None) => {
                            report.discarded += 1;
                            continue;
                        }
                        Err(e) => {
                            tracing::warn!("⚠️ Could not reset notification {id}: {e}");
                            report.deferred += 1;
                            self.queue.push(&id, now + self.dispatcher.retry_policy().base_delay);
                            continue;
                        }
                    }
                }
                _ => {
                    report.discarded += 1;
                    continue;
                }
            };
            if notification.dispatch_at > now {
                self.queue.push(&notification.id, notification.dispatch_at);
                continue;
            }
            let pref = self.dispatcher.preference_for(&notification.recipient_id).await;
            if policy::is_batched(&pref) {
                batched
                    .entry((notification.recipient_id.clone(), notification.dispatch_at))
                    .or_default()
                    .push(notification);
            } else {
                single.push(vec![notification]);
            }
        }

        let groups: Vec<Vec<ScheduledNotification>> =
            single.into_iter().chain(batched.into_values()).collect();
        report.batches = groups.len();

        let outcomes: Vec<Vec<(String, DispatchResult)>> = futures::stream::iter(groups)
            .map(|group| self.dispatcher.dispatch_batch(group, now))
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        for results in outcomes {
            for (id, result) in results {
                match result {
                    DispatchResult::Sent { .. } => report.sent += 1,
                    DispatchResult::Retrying { next_at, .. } => {
                        report.retried += 1;
                        self.queue.push(&id, next_at);
                    }
                    DispatchResult::Deferred { next_at } => {
                        report.deferred += 1;
                        self.queue.push(&id, next_at);
                    }
                    DispatchResult::Failed { .. } => report.failed += 1,
                    DispatchResult::Cancelled { .. } => report.cancelled += 1,
                    DispatchResult::Skipped => report.discarded += 1,
                }
            }
        }

        tracing::info!(
            "⏰ Tick: {} due, {} sent, {} retrying, {} failed, {} cancelled, {} deferred, {} discarded",
            report.due,
            report.sent,
            report.retried,
            report.failed,
            report.cancelled,
            report.deferred,
            report.discarded
        );
        Ok(report)
    }

    /// Spawn the periodic tick loop as a background tokio task.
    pub fn start(self: &Arc<Self>, every: StdDuration) -> SchedulerTask {
        let token = CancellationToken::new();
        let cancel = token.clone();
        let scheduler = Arc::clone(self);
        let every = every.max(StdDuration::from_millis(10));

        let handle = tokio::spawn(async move {
            tracing::info!("⏰ Scheduler started (tick every {:?})", every);
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!("⏹️ Scheduler stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = scheduler.tick(Utc::now()).await {
                            tracing::warn!("⚠️ Scheduler tick failed: {e}");
                        }
                    }
                }
            }
        });

        SchedulerTask { token, handle }
    }
}

/// Handle to a running scheduler loop.
pub struct SchedulerTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl SchedulerTask {
    pub fn is_running(&self) -> bool {
        !self.token.is_cancelled() && !self.handle.is_finished()
    }

    /// Token that stops the loop when cancelled; useful for wiring shutdown signals.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Stop after the in-flight tick (if any) and wait for the loop to exit.
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            tracing::warn!("⚠️ Scheduler task ended abnormally: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{FlakyNotifications, Harness, ScriptedSender};
    use caseflow_core::traits::CaseStore;
    use caseflow_core::types::{
        Audience, CaseStatus, Channel, ChannelPreference, EventKind, Frequency, NotificationType,
        QuietHours, Trigger,
    };
    use caseflow_rules::{NotificationRule, Predicate};
    use chrono::{Duration, NaiveTime, TimeZone};

    fn scheduler(h: &Harness) -> Arc<Scheduler> {
        Arc::new(Scheduler::new(
            h.notifications.clone(),
            h.dispatcher.clone(),
            NotificationPlanner::default(),
            &SchedulerConfig::default(),
        ))
    }

    fn note(case_id: &str, at: DateTime<Utc>) -> ScheduledNotification {
        ScheduledNotification::new(
            case_id,
            "u1",
            NotificationType::Reminder,
            serde_json::json!({"title": "t"}),
            at,
        )
    }

    #[tokio::test]
    async fn test_quiet_hours_delay_dispatch_not_schedule() {
        let h = Harness::new(ScriptedSender::default());
        let mut pref = ChannelPreference::default_for("u1");
        pref.quiet_hours = QuietHours::new(
            NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
        );
        h.prefs.set(pref).unwrap();
        let case = h.case_in(CaseStatus::Investigating).await;
        let s = scheduler(&h);

        let at = Utc.with_ymd_and_hms(2026, 3, 10, 23, 30, 0).unwrap();
        let n = s.schedule(note(&case.id, at)).await.unwrap();
        assert_eq!(n.scheduled_for, at);
        assert_eq!(n.dispatch_at, Utc.with_ymd_and_hms(2026, 3, 11, 8, 0, 0).unwrap());

        let early = s.tick(at + Duration::minutes(15)).await.unwrap();
        assert!(early.is_idle());
        assert!(h.sender.calls().is_empty());

        let report = s.tick(n.dispatch_at).await.unwrap();
        assert_eq!(report.sent, 1);
        assert_eq!(h.notifications.get(&n.id).await.unwrap().scheduled_for, at);
    }

    #[tokio::test]
    async fn test_retries_stop_after_max_attempts() {
        let h = Harness::new(ScriptedSender::failing(&Channel::ALL));
        let mut pref = ChannelPreference::default_for("u1");
        pref.toggles.email = false;
        pref.toggles.push = false;
        h.prefs.set(pref).unwrap();
        let case = h.case_in(CaseStatus::Investigating).await;
        let s = scheduler(&h);

        let start = Utc::now();
        let n = s.schedule(note(&case.id, start)).await.unwrap();
        let mut now = start;
        let mut reports = Vec::new();
        for _ in 0..4 {
            reports.push(s.tick(now).await.unwrap());
            now += Duration::hours(2);
        }

        assert_eq!(reports[0].retried, 1);
        assert_eq!(reports[1].retried, 1);
        assert_eq!(reports[2].failed, 1);
        assert!(reports[3].is_idle());
        assert_eq!(h.sender.calls().len(), 3);

        let stored = h.notifications.get(&n.id).await.unwrap();
        assert_eq!(stored.status, NotificationStatus::Failed);
        assert_eq!(stored.retry_count, 3);
        assert_eq!(h.cases.load(&case.id).await.unwrap().status, CaseStatus::Investigating);

        let attempts = h
            .cases
            .list_audit(&case.id)
            .await
            .unwrap()
            .into_iter()
            .filter(|a| matches!(a.event, DomainEvent::DispatchAttempted { .. }))
            .count();
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn test_cancelled_entry_is_discarded_on_pop() {
        let h = Harness::new(ScriptedSender::default());
        let case = h.case_in(CaseStatus::Investigating).await;
        let s = scheduler(&h);

        let n = s.schedule(note(&case.id, Utc::now())).await.unwrap();
        s.cancel(&n.id, "withdrawn").await.unwrap();
        assert_eq!(s.queued(), 1);
        assert!(s.list_pending().await.unwrap().is_empty());

        let report = s.tick(Utc::now()).await.unwrap();
        assert_eq!(report.discarded, 1);
        assert_eq!(report.sent, 0);
        assert!(h.sender.calls().is_empty());
    }

    #[tokio::test]
    async fn test_batched_recipient_gets_one_digest_per_channel() {
        let h = Harness::new(ScriptedSender::default());
        let mut pref = ChannelPreference::default_for("u1");
        pref.frequency = Frequency::Hourly;
        pref.toggles.push = false;
        pref.toggles.in_app = false;
        h.prefs.set(pref).unwrap();
        let case = h.case_in(CaseStatus::Investigating).await;
        let s = scheduler(&h);

        let at = Utc.with_ymd_and_hms(2026, 3, 11, 10, 5, 0).unwrap();
        let a = s.schedule(note(&case.id, at)).await.unwrap();
        let b = s.schedule(note(&case.id, at + Duration::minutes(30))).await.unwrap();
        assert_eq!(a.dispatch_at, b.dispatch_at);

        let report = s.tick(a.dispatch_at).await.unwrap();
        assert_eq!(report.batches, 1);
        assert_eq!(report.sent, 2);
        let calls = h.sender.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, Channel::Email);
        assert_eq!(calls[0].2["count"], 2);
    }

    #[tokio::test]
    async fn test_handle_events_schedules_from_rules() {
        let h = Harness::new(ScriptedSender::default());
        let case = h.case_in(CaseStatus::Submitted).await;
        let s = scheduler(&h);
        s.planner().add_rule(NotificationRule::new(
            "new case",
            Trigger::on(EventKind::CaseCreated),
            Predicate::always(),
            NotificationType::CaseCreated,
            Audience::CommitteeMembers,
        ));

        let event = DomainEvent::CaseCreated {
            case_id: case.id.clone(),
            committee_id: "safety".into(),
            routing_rule_id: None,
        };
        let members = vec!["m1".to_string(), "m2".to_string()];
        let scheduled = s.handle_events(&[event], &case, &members).await.unwrap();
        assert_eq!(scheduled.len(), 2);
        assert_eq!(s.list_pending().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_recover_requeues_stuck_processing() {
        let h = Harness::new(ScriptedSender::default());
        let case = h.case_in(CaseStatus::Investigating).await;
        let mut n = note(&case.id, Utc::now());
        h.notifications.insert(&n).await.unwrap();
        n.status = NotificationStatus::Processing;
        h.notifications
            .compare_and_set(NotificationStatus::Pending, &n)
            .await
            .unwrap();

        let s = scheduler(&h);
        assert_eq!(s.recover().await.unwrap(), 1);
        assert_eq!(s.tick(Utc::now()).await.unwrap().sent, 1);
    }

    fn flaky_scheduler(h: &Harness, store: Arc<FlakyNotifications>) -> Arc<Scheduler> {
        Arc::new(Scheduler::new(
            store,
            h.dispatcher.clone(),
            NotificationPlanner::default(),
            &SchedulerConfig::default(),
        ))
    }

    #[tokio::test]
    async fn test_store_error_after_send_releases_for_next_tick() {
        let (h, flaky) = Harness::flaky(ScriptedSender::default());
        let case = h.case_in(CaseStatus::Investigating).await;
        let s = flaky_scheduler(&h, flaky.clone());
        let now = Utc::now();
        let n = s.schedule(note(&case.id, now)).await.unwrap();

        flaky.fail_next(&[NotificationStatus::Sent]);
        let first = s.tick(now).await.unwrap();
        assert_eq!(first.sent, 0);
        assert_eq!(first.deferred, 1);
        let stored = h.notifications.get(&n.id).await.unwrap();
        assert_eq!(stored.status, NotificationStatus::Pending);
        assert_eq!(stored.retry_count, 0);
        assert_eq!(s.queued(), 1);

        let second = s.tick(now + h.dispatcher.retry_policy().base_delay).await.unwrap();
        assert_eq!(second.sent, 1);
        assert_eq!(h.notifications.get(&n.id).await.unwrap().status, NotificationStatus::Sent);
    }

    #[tokio::test]
    async fn test_failed_release_is_picked_up_on_next_pop() {
        let (h, flaky) = Harness::flaky(ScriptedSender::default());
        let case = h.case_in(CaseStatus::Investigating).await;
        let s = flaky_scheduler(&h, flaky.clone());
        let now = Utc::now();
        let n = s.schedule(note(&case.id, now)).await.unwrap();

        flaky.fail_next(&[NotificationStatus::Sent, NotificationStatus::Pending]);
        let first = s.tick(now).await.unwrap();
        assert_eq!(first.deferred, 1);
        let stuck = h.notifications.get(&n.id).await.unwrap();
        assert_eq!(stuck.status, NotificationStatus::Processing);

        let second = s.tick(now + h.dispatcher.retry_policy().base_delay).await.unwrap();
        assert_eq!(second.sent, 1);
        assert_eq!(h.notifications.get(&n.id).await.unwrap().status, NotificationStatus::Sent);
        assert!(s.list_pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_claim_error_keeps_entry_queued() {
        let (h, flaky) = Harness::flaky(ScriptedSender::default());
        let case = h.case_in(CaseStatus::Investigating).await;
        let s = flaky_scheduler(&h, flaky.clone());
        let now = Utc::now();
        let n = s.schedule(note(&case.id, now)).await.unwrap();

        flaky.fail_next(&[NotificationStatus::Processing]);
        let first = s.tick(now).await.unwrap();
        assert_eq!(first.deferred, 1);
        assert!(h.sender.calls().is_empty());
        assert_eq!(h.notifications.get(&n.id).await.unwrap().status, NotificationStatus::Pending);

        let second = s.tick(now + h.dispatcher.retry_policy().base_delay).await.unwrap();
        assert_eq!(second.sent, 1);
    }

    #[tokio::test]
    async fn test_schedule_and_cancel_during_tick() {
        let h = Harness::new(ScriptedSender::held());
        let case = h.case_in(CaseStatus::Investigating).await;
        let config = SchedulerConfig {
            max_concurrent_dispatches: 1,
            ..SchedulerConfig::default()
        };
        let s = Arc::new(Scheduler::new(
            h.notifications.clone(),
            h.dispatcher.clone(),
            NotificationPlanner::default(),
            &config,
        ));
        let now = Utc::now();
        let payload = |title: &str| serde_json::json!({ "title": title });
        let first = ScheduledNotification::new(
            &case.id,
            "u1",
            NotificationType::Reminder,
            payload("first"),
            now,
        );
        let doomed = ScheduledNotification::new(
            &case.id,
            "u1",
            NotificationType::Reminder,
            payload("doomed"),
            now,
        );
        s.schedule(first).await.unwrap();
        let doomed = s.schedule(doomed).await.unwrap();

        let ticking = tokio::spawn({
            let s = Arc::clone(&s);
            async move { s.tick(now).await }
        });
        h.sender.wait_for_send().await;

        s.cancel(&doomed.id, "withdrawn").await.unwrap();
        let late = ScheduledNotification::new(
            &case.id,
            "u1",
            NotificationType::Reminder,
            payload("late"),
            now,
        );
        let late = s.schedule(late).await.unwrap();
        h.sender.open();

        let report = ticking.await.unwrap().unwrap();
        assert_eq!(report.sent, 1);
        assert_eq!(report.discarded, 1);
        assert_eq!(
            h.notifications.get(&doomed.id).await.unwrap().status,
            NotificationStatus::Cancelled
        );

        let next = s.tick(now + Duration::seconds(1)).await.unwrap();
        assert_eq!(next.sent, 1);
        assert_eq!(h.notifications.get(&late.id).await.unwrap().status, NotificationStatus::Sent);

        let titles: Vec<String> = h
            .sender
            .calls()
            .iter()
            .filter_map(|(_, _, p)| p["title"].as_str().map(str::to_string))
            .collect();
        assert!(titles.iter().any(|t| t == "first"));
        assert!(titles.iter().any(|t| t == "late"));
        assert!(!titles.iter().any(|t| t == "doomed"));
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let h = Harness::new(ScriptedSender::default());
        let case = h.case_in(CaseStatus::Investigating).await;
        let s = scheduler(&h);
        s.schedule(note(&case.id, Utc::now() - Duration::seconds(1))).await.unwrap();

        let task = s.start(StdDuration::from_millis(20));
        assert!(task.is_running());
        for _ in 0..50 {
            if !h.sender.calls().is_empty() {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(20)).await;
        }
        assert!(!h.sender.calls().is_empty());

        let token = task.cancellation_token();
        task.stop().await;
        assert!(token.is_cancelled());
    }
}
