//! Dispatcher — performs channel sends and reconciles notification status.
//!
//! Every status change goes through `NotificationStore::compare_and_set`, so
//! a notification is claimed by exactly one worker and the terminal marks
//! (`sent`, `failed`, `cancelled`) are applied, and counted, at most once.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use caseflow_core::error::{CaseflowError, ErrorKind, Result};
use caseflow_core::traits::{CaseStore, ChannelSender, NotificationStore, PreferenceProvider};
use caseflow_core::types::{
    AuditEvent, Channel, ChannelOutcome, ChannelPreference, DomainEvent, NotificationStatus,
    ScheduledNotification,
};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;

use crate::policy;
use crate::retry::RetryPolicy;

const ACTOR: &str = "dispatcher";

/// Outcome of one dispatch attempt for one notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum DispatchResult {
    Sent { channels: Vec<Channel> },
    Retrying { attempt: u32, next_at: DateTime<Utc> },
    /// Not attempted because of a storage error; left `pending` for `next_at`.
    Deferred { next_at: DateTime<Utc> },
    Failed { attempts: u32 },
    Cancelled { reason: String },
    /// Another worker or a cancellation got there first.
    Skipped,
}

#[derive(Debug, Default)]
pub struct DispatchMetrics {
    sent: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    retried: AtomicU64,
    attempts: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub sent: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub retried: u64,
    pub attempts: u64,
}

impl DispatchMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sent: self.sent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            attempts: self.attempts.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct Dispatcher {
    cases: Arc<dyn CaseStore>,
    notifications: Arc<dyn NotificationStore>,
    preferences: Arc<dyn PreferenceProvider>,
    sender: Arc<dyn ChannelSender>,
    retry: RetryPolicy,
    metrics: DispatchMetrics,
}

impl Dispatcher {
    pub fn new(
        cases: Arc<dyn CaseStore>,
        notifications: Arc<dyn NotificationStore>,
        preferences: Arc<dyn PreferenceProvider>,
        sender: Arc<dyn ChannelSender>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            cases,
            notifications,
            preferences,
            sender,
            retry,
            metrics: DispatchMetrics::default(),
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Recipient preferences, or the defaults when the settings provider fails.
    pub async fn preference_for(&self, user_id: &str) -> ChannelPreference {
        match self.preferences.channel_preference(user_id).await {
            Ok(pref) => pref,
            Err(e) => {
                tracing::warn!("⚠️ Preferences for {user_id} unavailable, using defaults: {e}");
                ChannelPreference::default_for(user_id)
            }
        }
    }

    /// Dispatch a single pending notification.
    pub async fn dispatch(
        &self,
        notification: ScheduledNotification,
        now: DateTime<Utc>,
    ) -> DispatchResult {
        let id = notification.id.clone();
        self.dispatch_batch(vec![notification], now)
            .await
            .into_iter()
            .find(|(nid, _)| *nid == id)
            .map(|(_, r)| r)
            .unwrap_or(DispatchResult::Skipped)
    }

    /// Dispatch pending notifications together. Notifications for the same
    /// recipient share one send per channel; several of them make a digest.
    ///
    /// Every member gets a result. A storage error never drops a member: a
    /// claimed one is released back to `pending`, an unclaimed one is deferred.
    pub async fn dispatch_batch(
        &self,
        batch: Vec<ScheduledNotification>,
        now: DateTime<Utc>,
    ) -> Vec<(String, DispatchResult)> {
        let mut results = Vec::with_capacity(batch.len());
        let mut live: BTreeMap<String, Vec<ScheduledNotification>> = BTreeMap::new();

        for notification in batch {
            let claimed = match self.claim(&notification, now).await {
                Ok(Some(claimed)) => claimed,
                Ok(None) => {
                    results.push((notification.id, DispatchResult::Skipped));
                    continue;
                }
                Err(e) => {
                    tracing::warn!("⚠️ Could not claim notification {}: {e}", notification.id);
                    let next_at = now + self.retry.base_delay;
                    results.push((notification.id, DispatchResult::Deferred { next_at }));
                    continue;
                }
            };
            match self.stale_reason(&claimed).await {
                Ok(Some(reason)) => {
                    let cancelled = self
                        .finish_cancel(&claimed, NotificationStatus::Processing, &reason)
                        .await;
                    match cancelled {
                        Ok(true) => {
                            results.push((claimed.id, DispatchResult::Cancelled { reason }))
                        }
                        Ok(false) => results.push((claimed.id, DispatchResult::Skipped)),
                        Err(e) => {
                            tracing::warn!(
                                "⚠️ Could not cancel stale notification {}: {e}",
                                claimed.id
                            );
                            results.push(self.release(claimed, now).await);
                        }
                    }
                }
                Ok(None) => live.entry(claimed.recipient_id.clone()).or_default().push(claimed),
                Err(e) => {
                    tracing::warn!("⚠️ Could not re-read case {}: {e}", claimed.subject_case_id);
                    results.push(self.release(claimed, now).await);
                }
            }
        }

        for (recipient, members) in live {
            results.extend(self.send_group(&recipient, members, now).await);
        }
        results
    }

    /// pending → processing, or `None` if someone else moved it first.
    async fn claim(
        &self,
        notification: &ScheduledNotification,
        now: DateTime<Utc>,
    ) -> Result<Option<ScheduledNotification>> {
        if notification.status != NotificationStatus::Pending {
            return Ok(None);
        }
        let mut claimed = notification.clone();
        claimed.status = NotificationStatus::Processing;
        claimed.updated_at = now;
        let won = self
            .notifications
            .compare_and_set(NotificationStatus::Pending, &claimed)
            .await?;
        Ok(won.then_some(claimed))
    }

    /// Why a claimed notification must not be sent, if anything.
    async fn stale_reason(&self, notification: &ScheduledNotification) -> Result<Option<String>> {
        match self.cases.load(&notification.subject_case_id).await {
            Ok(case) => {
                if case.status.is_settled()
                    && notification.notification_type.is_case_state_dependent()
                {
                    Ok(Some(format!("case is {}", case.status)))
                } else {
                    Ok(None)
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Some("case no longer exists".into())),
            Err(e) => Err(e),
        }
    }

    /// Put a claimed notification back without counting an attempt.
    ///
    /// If even the release fails the record stays `processing`; the result is
    /// still `Deferred` so the id is queued again and [`Dispatcher::reset_stranded`]
    /// picks it up when it next comes due.
    async fn release(
        &self,
        mut notification: ScheduledNotification,
        now: DateTime<Utc>,
    ) -> (String, DispatchResult) {
        notification.status = NotificationStatus::Pending;
        notification.dispatch_at = now + self.retry.base_delay;
        notification.updated_at = now;
        let next_at = notification.dispatch_at;
        let result = match self
            .notifications
            .compare_and_set(NotificationStatus::Processing, &notification)
            .await
        {
            Ok(true) => DispatchResult::Deferred { next_at },
            Ok(false) => DispatchResult::Skipped,
            Err(e) => {
                tracing::warn!("⚠️ Could not release notification {}: {e}", notification.id);
                DispatchResult::Deferred { next_at }
            }
        };
        (notification.id, result)
    }

    /// processing → pending for a record a failed release left behind.
    /// `None` if it is no longer processing.
    pub async fn reset_stranded(
        &self,
        notification: &ScheduledNotification,
        now: DateTime<Utc>,
    ) -> Result<Option<ScheduledNotification>> {
        let mut reset = notification.clone();
        reset.status = NotificationStatus::Pending;
        reset.updated_at = now;
        let done = self
            .notifications
            .compare_and_set(NotificationStatus::Processing, &reset)
            .await?;
        if done {
            tracing::info!("♻️ Notification {} was stuck in processing, queued again", reset.id);
        }
        Ok(done.then_some(reset))
    }

    async fn send_group(
        &self,
        recipient: &str,
        members: Vec<ScheduledNotification>,
        now: DateTime<Utc>,
    ) -> Vec<(String, DispatchResult)> {
        let pref = self.preference_for(recipient).await;

        let plans: Vec<Vec<Channel>> = members
            .iter()
            .map(|n| {
                let channels = pref.enabled_channels(n.notification_type);
                if channels.is_empty() {
                    tracing::debug!(
                        "📥 {recipient} has no channel for {}, falling back to in-app",
                        n.notification_type
                    );
                    vec![Channel::InApp]
                } else {
                    channels
                }
            })
            .collect();

        let mut by_channel: BTreeMap<Channel, Vec<usize>> = BTreeMap::new();
        for (idx, channels) in plans.iter().enumerate() {
            for channel in channels {
                by_channel.entry(*channel).or_default().push(idx);
            }
        }

        let sends = by_channel.iter().map(|(channel, idxs)| {
            let channel = *channel;
            let payload = match idxs.as_slice() {
                [only] => members[*only].payload.clone(),
                many => digest(many.iter().map(|i| &members[*i])),
            };
            async move { (channel, self.sender.send(channel, recipient, &payload).await) }
        });
        let outcomes: BTreeMap<Channel, ChannelOutcome> = join_all(sends)
            .await
            .into_iter()
            .map(|(channel, sent)| match sent {
                Ok(()) => (channel, ChannelOutcome::Success),
                Err(e) => {
                    tracing::warn!("❌ [{channel}] delivery to {recipient} failed: {e}");
                    (channel, ChannelOutcome::Failed(e.to_string()))
                }
            })
            .collect();

        let mut results = Vec::with_capacity(members.len());
        for (notification, channels) in members.into_iter().zip(plans) {
            let channel_results: BTreeMap<Channel, ChannelOutcome> = channels
                .iter()
                .filter_map(|c| outcomes.get(c).map(|o| (*c, o.clone())))
                .collect();
            let claimed = notification.clone();
            match self.settle(notification, channel_results, &pref, now).await {
                Ok(result) => results.push(result),
                Err(e) => {
                    tracing::warn!("⚠️ Could not record dispatch of {}: {e}", claimed.id);
                    results.push(self.release(claimed, now).await);
                }
            }
        }
        results
    }

    /// Record one attempt's per-channel outcomes and move the notification on.
    async fn settle(
        &self,
        mut notification: ScheduledNotification,
        channel_results: BTreeMap<Channel, ChannelOutcome>,
        pref: &ChannelPreference,
        now: DateTime<Utc>,
    ) -> Result<(String, DispatchResult)> {
        DispatchMetrics::bump(&self.metrics.attempts);
        self.audit(DomainEvent::DispatchAttempted {
            notification_id: notification.id.clone(),
            case_id: notification.subject_case_id.clone(),
            attempt: notification.retry_count + 1,
            results: channel_results.clone(),
        })
        .await;

        let delivered: Vec<Channel> = channel_results
            .iter()
            .filter(|(_, o)| o.is_success())
            .map(|(c, _)| *c)
            .collect();
        notification.channel_results = channel_results;
        notification.updated_at = now;
        let id = notification.id.clone();

        if !delivered.is_empty() {
            let result = if self.mark_sent(&notification).await? {
                DispatchResult::Sent { channels: delivered }
            } else {
                DispatchResult::Skipped
            };
            return Ok((id, result));
        }

        notification.retry_count += 1;
        if notification.can_retry() {
            let attempt = notification.retry_count;
            let next_at = policy::quiet_adjust(
                now + self.retry.backoff(attempt),
                &pref.quiet_hours,
                pref.utc_offset_minutes,
            );
            notification.status = NotificationStatus::Pending;
            notification.dispatch_at = next_at;
            let requeued = self
                .notifications
                .compare_and_set(NotificationStatus::Processing, &notification)
                .await?;
            if !requeued {
                return Ok((id, DispatchResult::Skipped));
            }
            DispatchMetrics::bump(&self.metrics.retried);
            tracing::info!(
                "🔁 Notification {id} attempt {attempt}/{} failed, retry at {next_at}",
                notification.max_attempts
            );
            return Ok((id, DispatchResult::Retrying { attempt, next_at }));
        }

        let attempts = notification.retry_count;
        let result = if self.mark_failed(&notification).await? {
            DispatchResult::Failed { attempts }
        } else {
            DispatchResult::Skipped
        };
        Ok((id, result))
    }

    /// processing → sent. Returns `false`, changing nothing, if the notification
    /// is no longer processing (already marked, or cancelled meanwhile).
    pub async fn mark_sent(&self, notification: &ScheduledNotification) -> Result<bool> {
        let mut next = notification.clone();
        next.status = NotificationStatus::Sent;
        if !self
            .notifications
            .compare_and_set(NotificationStatus::Processing, &next)
            .await?
        {
            return Ok(false);
        }
        DispatchMetrics::bump(&self.metrics.sent);
        let channels: Vec<Channel> = next
            .channel_results
            .iter()
            .filter(|(_, o)| o.is_success())
            .map(|(c, _)| *c)
            .collect();
        tracing::info!(
            "✅ Notification {} sent to {} via {:?}",
            next.id,
            next.recipient_id,
            channels
        );
        self.audit(DomainEvent::NotificationDispatched {
            notification_id: next.id.clone(),
            case_id: next.subject_case_id.clone(),
            notification_type: next.notification_type,
            channels,
        })
        .await;
        Ok(true)
    }

    /// processing → failed. Same idempotency as [`Dispatcher::mark_sent`].
    pub async fn mark_failed(&self, notification: &ScheduledNotification) -> Result<bool> {
        let mut next = notification.clone();
        next.status = NotificationStatus::Failed;
        if !self
            .notifications
            .compare_and_set(NotificationStatus::Processing, &next)
            .await?
        {
            return Ok(false);
        }
        DispatchMetrics::bump(&self.metrics.failed);
        tracing::warn!(
            "🛑 Notification {} failed after {} attempt(s)",
            next.id,
            next.retry_count
        );
        self.audit(DomainEvent::NotificationFailed {
            notification_id: next.id.clone(),
            case_id: next.subject_case_id.clone(),
            attempts: next.retry_count,
        })
        .await;
        Ok(true)
    }

    /// Mark a pending or in-flight notification cancelled.
    ///
    /// Only the backing store changes; queued entries are dropped when popped.
    pub async fn cancel(
        &self,
        notification_id: &str,
        reason: &str,
    ) -> Result<ScheduledNotification> {
        for _ in 0..3 {
            let current = self.notifications.get(notification_id).await?;
            if current.status.is_terminal() {
                return Err(CaseflowError::Validation(format!(
                    "notification {notification_id} is already {}",
                    current.status
                )));
            }
            if self.finish_cancel(&current, current.status, reason).await? {
                return self.notifications.get(notification_id).await;
            }
        }
        Err(CaseflowError::Conflict(format!(
            "notification {notification_id} kept changing while cancelling"
        )))
    }

    async fn finish_cancel(
        &self,
        notification: &ScheduledNotification,
        expected: NotificationStatus,
        reason: &str,
    ) -> Result<bool> {
        let mut next = notification.clone();
        next.status = NotificationStatus::Cancelled;
        next.updated_at = Utc::now();
        if !self.notifications.compare_and_set(expected, &next).await? {
            return Ok(false);
        }
        DispatchMetrics::bump(&self.metrics.cancelled);
        tracing::info!("🚫 Notification {} cancelled: {reason}", next.id);
        self.audit(DomainEvent::NotificationCancelled {
            notification_id: next.id.clone(),
            case_id: next.subject_case_id.clone(),
            reason: reason.to_string(),
        })
        .await;
        Ok(true)
    }

    async fn audit(&self, event: DomainEvent) {
        let record = AuditEvent::new(ACTOR, event);
        if let Err(e) = self.cases.append_audit_event(&record).await {
            tracing::warn!("⚠️ Audit append failed for case {}: {e}", record.case_id);
        }
    }
}

fn digest<'a>(members: impl Iterator<Item = &'a ScheduledNotification>) -> serde_json::Value {
    let items: Vec<serde_json::Value> = members
        .map(|n| {
            serde_json::json!({
                "notification_id": n.id,
                "notification_type": n.notification_type,
                "case_id": n.subject_case_id,
                "payload": n.payload,
            })
        })
        .collect();
    serde_json::json!({
        "title": format!("{} case update(s)", items.len()),
        "digest": true,
        "count": items.len(),
        "items": items,
    })
}
