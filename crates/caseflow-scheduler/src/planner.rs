//! Notification planner — trigger-based notification rules.
//!
//! ```text
//! DomainEvent + current Case
//!   → NotificationPlanner.plan(event, case, committee members)
//!     → for each enabled rule whose trigger and condition match (evaluation order):
//!       → resolve audience (assignee, reporter, committee members, fixed user)
//!       → compute scheduled_for from timing (after event / before due)
//!       → one ScheduledNotification per recipient
//! ```

use std::collections::BTreeSet;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use caseflow_core::error::{CaseflowError, Result};
use caseflow_core::types::{Audience, Case, DomainEvent, ScheduledNotification, Timing};
use caseflow_rules::{CaseAttributes, NotificationRule, matching};
use chrono::{DateTime, Duration, Utc};

#[derive(Default)]
pub struct NotificationPlanner {
    rules: RwLock<Vec<NotificationRule>>,
}

impl NotificationPlanner {
    pub fn new(rules: Vec<NotificationRule>) -> Self {
        Self {
            rules: RwLock::new(rules),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<NotificationRule>> {
        self.rules.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<NotificationRule>> {
        self.rules.write().unwrap_or_else(|p| p.into_inner())
    }

    pub fn add_rule(&self, rule: NotificationRule) -> NotificationRule {
        tracing::info!("🔔 Notification rule '{}' added ({})", rule.name, rule.notification_type);
        self.write().push(rule.clone());
        rule
    }

    pub fn rules(&self) -> Vec<NotificationRule> {
        self.read().clone()
    }

    pub fn set_enabled(&self, rule_id: &str, enabled: bool) -> Result<NotificationRule> {
        let mut rules = self.write();
        let rule = rules
            .iter_mut()
            .find(|r| r.id == rule_id)
            .ok_or_else(|| CaseflowError::not_found("notification rule", rule_id))?;
        rule.enabled = enabled;
        Ok(rule.clone())
    }

    pub fn remove_rule(&self, rule_id: &str) -> Result<NotificationRule> {
        let mut rules = self.write();
        let idx = rules
            .iter()
            .position(|r| r.id == rule_id)
            .ok_or_else(|| CaseflowError::not_found("notification rule", rule_id))?;
        Ok(rules.remove(idx))
    }

    /// Notifications produced by `event` for `case` (the case as it is after the event).
    pub fn plan(
        &self,
        event: &DomainEvent,
        case: &Case,
        committee_members: &[String],
        now: DateTime<Utc>,
    ) -> Vec<ScheduledNotification> {
        let attrs = CaseAttributes::from_case(case, now);
        let snapshot = self.rules();
        let mut planned = Vec::new();
        let mut fired = Vec::new();

        for rule in matching(&snapshot, &attrs) {
            if !rule.trigger.matches(event) {
                continue;
            }
            let Some(scheduled_for) = scheduled_for(rule.timing, case, now) else {
                tracing::debug!(
                    "⏭️ Rule '{}' skipped: case {} has no due date",
                    rule.name,
                    case.id
                );
                continue;
            };
            let recipients = recipients(&rule.audience, case, committee_members);
            if recipients.is_empty() {
                tracing::debug!(
                    "⏭️ Rule '{}' skipped: no recipients for case {}",
                    rule.name,
                    case.id
                );
                continue;
            }

            tracing::info!(
                "⚡ Notification rule '{}' matched {:?} on case {} ({} recipient(s))",
                rule.name,
                event.kind(),
                case.id,
                recipients.len()
            );
            let payload = payload(rule, event, case);
            for recipient in recipients {
                planned.push(ScheduledNotification::new(
                    &case.id,
                    &recipient,
                    rule.notification_type,
                    payload.clone(),
                    scheduled_for,
                ));
            }
            fired.push(rule.id.clone());
        }

        if !fired.is_empty() {
            for rule in self.write().iter_mut().filter(|r| fired.contains(&r.id)) {
                rule.last_run = Some(now);
            }
        }
        planned
    }
}

fn scheduled_for(timing: Timing, case: &Case, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match timing {
        Timing::AfterEvent { minutes } => Some(now + Duration::minutes(minutes.max(0))),
        Timing::BeforeDue { minutes } => case
            .due_date
            .map(|due| (due - Duration::minutes(minutes.max(0))).max(now)),
    }
}

fn recipients(audience: &Audience, case: &Case, committee_members: &[String]) -> BTreeSet<String> {
    match audience {
        Audience::Assignee => case.assignee_id.iter().cloned().collect(),
        Audience::Reporter => case.reporter_id.iter().cloned().collect(),
        Audience::CommitteeMembers => committee_members.iter().cloned().collect(),
        Audience::User(user) => BTreeSet::from([user.clone()]),
    }
}

fn payload(rule: &NotificationRule, event: &DomainEvent, case: &Case) -> serde_json::Value {
    serde_json::json!({
        "title": format!("[{}] {}", rule.notification_type, case.title),
        "case_id": case.id,
        "category": case.category,
        "priority": case.priority,
        "status": case.status,
        "committee_id": case.committee_id,
        "due_date": case.due_date,
        "event": event.kind(),
        "rule_id": rule.id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use caseflow_core::types::{
        CaseAction, CaseStatus, EventKind, NewCase, NotificationType, Priority, Trigger,
    };
    use caseflow_rules::Predicate;

    fn case() -> Case {
        let mut new = NewCase::new("Missing guard rail", "workplace_safety", Priority::High);
        new.assignee_id = Some("inspector".into());
        new.reporter_id = Some("worker".into());
        let mut c = Case::from_new(new, Utc::now());
        c.committee_id = Some("safety".into());
        c
    }

    fn created(c: &Case) -> DomainEvent {
        DomainEvent::CaseCreated {
            case_id: c.id.clone(),
            committee_id: "safety".into(),
            routing_rule_id: None,
        }
    }

    #[test]
    fn test_committee_audience_fans_out() {
        let planner = NotificationPlanner::default();
        let rule = planner.add_rule(NotificationRule::new(
            "new case",
            Trigger::on(EventKind::CaseCreated),
            Predicate::always(),
            NotificationType::CaseCreated,
            Audience::CommitteeMembers,
        ));
        let c = case();
        let members = vec!["m1".to_string(), "m2".to_string(), "m1".to_string()];
        let planned = planner.plan(&created(&c), &c, &members, Utc::now());

        assert_eq!(planned.len(), 2);
        assert!(planned.iter().all(|n| n.subject_case_id == c.id));
        assert!(planner.rules().iter().find(|r| r.id == rule.id).unwrap().last_run.is_some());
    }

    #[test]
    fn test_trigger_and_status_filter() {
        let planner = NotificationPlanner::default();
        planner.add_rule(NotificationRule::new(
            "resolved",
            Trigger::on_status(CaseStatus::Resolved),
            Predicate::always(),
            NotificationType::StatusChanged,
            Audience::Reporter,
        ));
        let c = case();
        assert!(planner.plan(&created(&c), &c, &[], Utc::now()).is_empty());

        let resolved = DomainEvent::CaseTransitioned {
            case_id: c.id.clone(),
            from: CaseStatus::InReview,
            to: CaseStatus::Resolved,
            action: CaseAction::Resolve,
        };
        let planned = planner.plan(&resolved, &c, &[], Utc::now());
        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].recipient_id, "worker");
    }

    #[test]
    fn test_before_due_needs_due_date() {
        let planner = NotificationPlanner::default();
        planner.add_rule(
            NotificationRule::new(
                "deadline",
                Trigger::on(EventKind::CaseCreated),
                Predicate::always(),
                NotificationType::DeadlineApproaching,
                Audience::Assignee,
            )
            .with_timing(Timing::BeforeDue { minutes: 24 * 60 }),
        );
        let now = Utc::now();
        let mut c = case();
        assert!(planner.plan(&created(&c), &c, &[], now).is_empty());

        c.due_date = Some(now + Duration::days(3));
        let planned = planner.plan(&created(&c), &c, &[], now);
        assert_eq!(planned[0].scheduled_for, now + Duration::days(2));
    }

    #[test]
    fn test_disabled_rule_does_not_fire() {
        let planner = NotificationPlanner::default();
        let rule = planner.add_rule(NotificationRule::new(
            "new case",
            Trigger::on(EventKind::CaseCreated),
            Predicate::always(),
            NotificationType::CaseCreated,
            Audience::User("admin".into()),
        ));
        planner.set_enabled(&rule.id, false).unwrap();
        let c = case();
        assert!(planner.plan(&created(&c), &c, &[], Utc::now()).is_empty());
        assert!(planner.set_enabled("nrule-missing", true).is_err());
    }
}
