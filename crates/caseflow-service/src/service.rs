//! `CaseService` — one facade over workflow, routing and notifications.

use std::sync::Arc;
use std::time::Duration;

use caseflow_channels::{ChannelRouter, InAppInbox};
use caseflow_core::config::{CaseflowConfig, NotificationRuleConfig};
use caseflow_core::error::{CaseflowError, Result};
use caseflow_core::traits::{CaseStore, ChannelSender, NotificationStore, PreferenceProvider};
use caseflow_core::types::{
    AuditEvent, Case, CaseAction, Committee, Condition, NewCase, ScheduledNotification,
    TransitionPayload,
};
use caseflow_rules::{NotificationRule, Predicate, RoutingRule};
use caseflow_scheduler::{
    Dispatcher, MetricsSnapshot, NotificationPlanner, RetryPolicy, Scheduler, SchedulerTask,
    TickReport,
};
use caseflow_store::{MemoryCaseStore, MemoryNotificationStore, MemoryPreferences};
use caseflow_workflow::{CommitteeRouter, TransitionOutcome, WorkflowController};
use chrono::{DateTime, Utc};

pub struct CaseService {
    cases: Arc<dyn CaseStore>,
    router: Arc<CommitteeRouter>,
    workflow: WorkflowController,
    scheduler: Arc<Scheduler>,
    tick_interval: Duration,
}

impl CaseService {
    /// Assemble the engine from its collaborators and a validated config.
    ///
    /// Committees, routing rules and notification rules are seeded from the
    /// config; any predicate that does not compile aborts with `Configuration`.
    pub fn new(
        config: &CaseflowConfig,
        cases: Arc<dyn CaseStore>,
        notifications: Arc<dyn NotificationStore>,
        preferences: Arc<dyn PreferenceProvider>,
        sender: Arc<dyn ChannelSender>,
    ) -> Result<Self> {
        config.validate()?;

        let router = Arc::new(CommitteeRouter::new(
            &config.routing.default_committee_id,
            &config.routing.escalation_committee_id,
        ));
        for committee in &config.committees {
            router.create_committee(
                Committee::new(&committee.id, &committee.name, &committee.committee_type)
                    .with_members(committee.members.iter().cloned()),
            )?;
        }
        for rule in &config.routing_rules {
            router.create_rule(RoutingRule::from_config(rule)?)?;
        }

        let notification_rules = config
            .notification_rules
            .iter()
            .map(NotificationRule::from_config)
            .collect::<Result<Vec<_>>>()?;

        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&cases),
            Arc::clone(&notifications),
            preferences,
            sender,
            RetryPolicy::from_config(&config.scheduler),
        ));
        let scheduler = Arc::new(Scheduler::new(
            notifications,
            dispatcher,
            NotificationPlanner::new(notification_rules),
            &config.scheduler,
        ));

        tracing::info!(
            "🏭 Caseflow ready: {} committee(s), {} routing rule(s), {} notification rule(s)",
            config.committees.len(),
            config.routing_rules.len(),
            config.notification_rules.len()
        );
        Ok(Self {
            workflow: WorkflowController::new(Arc::clone(&cases), Arc::clone(&router)),
            cases,
            router,
            scheduler,
            tick_interval: Duration::from_secs(config.scheduler.tick_interval_secs.max(1)),
        })
    }

    /// Everything in memory; in-app deliveries land in `inbox`, the rest go
    /// to the config's webhook or the log.
    pub fn in_memory(config: &CaseflowConfig, inbox: Arc<InAppInbox>) -> Result<Self> {
        let preferences = MemoryPreferences::from_list(config.preferences.iter().cloned())?;
        Self::new(
            config,
            Arc::new(MemoryCaseStore::new()),
            Arc::new(MemoryNotificationStore::new()),
            Arc::new(preferences),
            Arc::new(ChannelRouter::from_config(config, inbox)),
        )
    }

    // ─── Cases ──────────────────────────────────────────────

    pub async fn create_case(&self, new: NewCase, actor: &str) -> Result<Case> {
        let outcome = self.workflow.create(new, actor).await?;
        Ok(self.publish(outcome).await)
    }

    pub async fn transition(
        &self,
        case_id: &str,
        action: CaseAction,
        actor: &str,
        payload: TransitionPayload,
    ) -> Result<Case> {
        let outcome = self.workflow.transition(case_id, action, actor, payload).await?;
        Ok(self.publish(outcome).await)
    }

    pub async fn reassign(&self, case_id: &str, committee_id: &str, actor: &str) -> Result<Case> {
        let outcome = self.workflow.reassign(case_id, committee_id, actor).await?;
        Ok(self.publish(outcome).await)
    }

    pub async fn get_case(&self, case_id: &str) -> Result<Case> {
        self.workflow.get_case(case_id).await
    }

    pub async fn list_cases_by_committee(&self, committee_id: &str) -> Result<Vec<Case>> {
        self.router.get_committee(committee_id)?;
        self.workflow.list_by_committee(committee_id).await
    }

    pub async fn list_audit(&self, case_id: &str) -> Result<Vec<AuditEvent>> {
        self.cases.load(case_id).await?;
        self.workflow.history(case_id).await
    }

    /// Hand the outcome's events to the scheduler. The case change already
    /// happened, so planning failures are logged rather than returned.
    async fn publish(&self, outcome: TransitionOutcome) -> Case {
        let TransitionOutcome { case, events } = outcome;
        if events.is_empty() {
            return case;
        }
        let members = case
            .committee_id
            .as_deref()
            .map(|id| self.router.members_of(id))
            .unwrap_or_default();
        if let Err(e) = self.scheduler.handle_events(&events, &case, &members).await {
            tracing::warn!("⚠️ Notifications for case {} not scheduled: {e}", case.id);
        }
        case
    }

    // ─── Routing rules ──────────────────────────────────────

    pub fn create_routing_rule(
        &self,
        name: &str,
        condition: Condition,
        target_committee_id: &str,
        priority: i64,
    ) -> Result<RoutingRule> {
        let predicate = Predicate::compile(condition)
            .map_err(|e| CaseflowError::Configuration(format!("routing rule '{name}': {e}")))?;
        self.router
            .create_rule(RoutingRule::new(name, predicate, target_committee_id, priority)?)
    }

    pub fn list_routing_rules(&self) -> Vec<RoutingRule> {
        self.router.list_rules()
    }

    pub fn toggle_rule(&self, rule_id: &str, active: bool) -> Result<RoutingRule> {
        self.router.toggle_rule(rule_id, active)
    }

    pub fn delete_routing_rule(&self, rule_id: &str) -> Result<RoutingRule> {
        self.router.delete_rule(rule_id)
    }

    // ─── Notification rules ─────────────────────────────────

    pub fn create_notification_rule(
        &self,
        config: &NotificationRuleConfig,
    ) -> Result<NotificationRule> {
        Ok(self.scheduler.planner().add_rule(NotificationRule::from_config(config)?))
    }

    pub fn list_notification_rules(&self) -> Vec<NotificationRule> {
        self.scheduler.planner().rules()
    }

    pub fn toggle_notification_rule(
        &self,
        rule_id: &str,
        enabled: bool,
    ) -> Result<NotificationRule> {
        self.scheduler.planner().set_enabled(rule_id, enabled)
    }

    // ─── Committees ─────────────────────────────────────────

    pub fn create_committee(&self, committee: Committee) -> Result<Committee> {
        self.router.create_committee(committee)
    }

    pub fn add_committee_member(&self, committee_id: &str, user_id: &str) -> Result<Committee> {
        self.router.add_member(committee_id, user_id)
    }

    /// Delete a committee. Open cases in the store block deletion even when
    /// the in-memory counter says otherwise.
    pub async fn delete_committee(&self, committee_id: &str) -> Result<Committee> {
        self.router.get_committee(committee_id)?;
        let open = self
            .workflow
            .list_by_committee(committee_id)
            .await?
            .iter()
            .filter(|c| !c.status.is_settled())
            .count();
        if open > 0 {
            return Err(CaseflowError::Validation(format!(
                "committee '{committee_id}' still owns {open} open case(s)"
            )));
        }
        self.router.delete_committee(committee_id)
    }

    /// Rebuild committee counters from the case store. Call once at startup
    /// when the store persists across runs.
    pub async fn restore_committee_counts(&self) -> Result<u64> {
        self.workflow.reconcile_committees().await
    }

    pub fn get_committee(&self, committee_id: &str) -> Result<Committee> {
        self.router.get_committee(committee_id)
    }

    pub fn list_committees(&self) -> Vec<Committee> {
        self.router.list_committees()
    }

    // ─── Notifications ──────────────────────────────────────

    /// Schedule a notification directly. The subject case must exist.
    pub async fn schedule_notification(
        &self,
        notification: ScheduledNotification,
    ) -> Result<ScheduledNotification> {
        self.cases.load(&notification.subject_case_id).await?;
        self.scheduler.schedule(notification).await
    }

    pub async fn cancel_notification(
        &self,
        notification_id: &str,
        reason: &str,
    ) -> Result<ScheduledNotification> {
        self.scheduler.cancel(notification_id, reason).await
    }

    pub async fn list_pending_notifications(&self) -> Result<Vec<ScheduledNotification>> {
        self.scheduler.list_pending().await
    }

    pub fn dispatch_metrics(&self) -> MetricsSnapshot {
        self.scheduler.dispatcher().metrics()
    }

    // ─── Scheduler lifecycle ────────────────────────────────

    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport> {
        self.scheduler.tick(now).await
    }

    /// Re-queue what a previous run left behind, then start ticking.
    pub async fn start_scheduler(&self) -> Result<SchedulerTask> {
        self.scheduler.recover().await?;
        Ok(self.scheduler.start(self.tick_interval))
    }
}
