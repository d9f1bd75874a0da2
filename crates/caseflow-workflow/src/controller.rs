//! Workflow Controller — validates and applies case lifecycle transitions.
//!
//! Every accepted transition produces exactly one domain event, appended to the
//! audit log and handed back to the caller. Nothing here talks to the scheduler.

use std::collections::HashMap;
use std::sync::Arc;

use caseflow_core::error::{CaseflowError, Result};
use caseflow_core::traits::CaseStore;
use caseflow_core::types::{
    AuditEvent, Case, CaseAction, CaseOutcome, CaseStatus, DomainEvent, NewCase, TransitionPayload,
};
use chrono::Utc;
use serde::Serialize;

use crate::router::CommitteeRouter;
use crate::transitions;

/// Result of an accepted create/transition/reassign.
#[derive(Debug, Clone, Serialize)]
pub struct TransitionOutcome {
    pub case: Case,
    pub events: Vec<DomainEvent>,
}

pub struct WorkflowController {
    store: Arc<dyn CaseStore>,
    router: Arc<CommitteeRouter>,
}

fn required<'a>(value: &'a Option<String>, what: &str, action: CaseAction) -> Result<&'a str> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(CaseflowError::Validation(format!("{action} requires a non-empty {what}"))),
    }
}

impl WorkflowController {
    pub fn new(store: Arc<dyn CaseStore>, router: Arc<CommitteeRouter>) -> Self {
        Self { store, router }
    }

    pub fn router(&self) -> &Arc<CommitteeRouter> {
        &self.router
    }

    /// Create a case in `submitted` and route it synchronously.
    pub async fn create(&self, new: NewCase, actor: &str) -> Result<TransitionOutcome> {
        if new.title.trim().is_empty() {
            return Err(CaseflowError::Validation("case title must not be empty".into()));
        }
        if new.category.trim().is_empty() {
            return Err(CaseflowError::Validation("case category must not be empty".into()));
        }

        let now = Utc::now();
        let mut case = Case::from_new(new, now);
        let decision = self.router.decide(&case, now);
        case.committee_id = Some(decision.committee_id.clone());
        case.routing_rule_id = decision.rule_id.clone();
        case.check_invariants()?;

        let saved = self.store.save(&case).await?;
        self.router.commit(None, &decision);

        let event = DomainEvent::CaseCreated {
            case_id: saved.id.clone(),
            committee_id: decision.committee_id,
            routing_rule_id: decision.rule_id,
        };
        self.audit(actor, &event).await;
        tracing::info!(
            "📥 Case {} '{}' created → committee {}",
            saved.id,
            saved.title,
            saved.committee_id.as_deref().unwrap_or("-")
        );
        Ok(TransitionOutcome {
            case: saved,
            events: vec![event],
        })
    }

    /// Apply `action` to a case.
    ///
    /// Fails with `InvalidTransition` if the action is not allowed from the current
    /// status, `Validation` if the payload is missing a required field, and
    /// `Conflict` if another transition saved the case first.
    pub async fn transition(
        &self,
        case_id: &str,
        action: CaseAction,
        actor: &str,
        payload: TransitionPayload,
    ) -> Result<TransitionOutcome> {
        let current = self.store.load(case_id).await?;
        let from = current.status;
        let to = transitions::next_status(from, action)
            .ok_or(CaseflowError::InvalidTransition { from, action })?;

        let now = Utc::now();
        let mut next = current.clone();
        next.status = to;
        next.status_updated_at = now;

        let mut decision = None;
        match action {
            CaseAction::Escalate => {
                let reason = required(&payload.reason, "reason", action)?;
                next.escalation_reason = Some(reason.to_string());
                let escalation = self.router.escalation_decision();
                next.committee_id = Some(escalation.committee_id.clone());
                next.routing_rule_id = None;
                decision = Some(escalation);
            }
            CaseAction::Resolve => {
                let notes = required(&payload.notes, "resolution notes", action)?;
                next.resolution_notes = Some(notes.to_string());
                next.escalation_reason = None;
            }
            CaseAction::Deescalate => {
                next.escalation_reason = None;
            }
            _ => {}
        }
        next.check_invariants()?;

        let saved = self.store.save(&next).await?;

        let event = match &decision {
            Some(decision) => {
                self.router.commit(current.committee_id.as_deref(), decision);
                DomainEvent::CaseEscalated {
                    case_id: saved.id.clone(),
                    from,
                    reason: saved.escalation_reason.clone().unwrap_or_default(),
                    previous_committee_id: current.committee_id.clone(),
                    committee_id: decision.committee_id.clone(),
                }
            }
            None => DomainEvent::CaseTransitioned {
                case_id: saved.id.clone(),
                from,
                to,
                action,
            },
        };

        if to == CaseStatus::Resolved {
            let outcome = if saved.resolved_on_time() {
                CaseOutcome::OnTime
            } else {
                CaseOutcome::Late
            };
            self.router.record_outcome(&saved, outcome);
        }

        self.audit(actor, &event).await;
        tracing::info!("🔀 Case {}: {} → {} ({}, by {})", saved.id, from, to, action, actor);
        Ok(TransitionOutcome {
            case: saved,
            events: vec![event],
        })
    }

    /// Move an open case to another committee by hand.
    ///
    /// Resolved and closed cases stay with the committee that settled them;
    /// their outcome has already been counted there.
    pub async fn reassign(
        &self,
        case_id: &str,
        committee_id: &str,
        actor: &str,
    ) -> Result<TransitionOutcome> {
        let current = self.store.load(case_id).await?;
        if current.status.is_settled() {
            return Err(CaseflowError::Validation(format!(
                "case {case_id} is {} and can no longer be reassigned",
                current.status
            )));
        }
        let decision = self.router.reassignment_decision(committee_id)?;
        if current.committee_id.as_deref() == Some(committee_id) {
            return Ok(TransitionOutcome {
                case: current,
                events: Vec::new(),
            });
        }

        let mut next = current.clone();
        next.committee_id = Some(decision.committee_id.clone());
        next.routing_rule_id = None;
        let saved = self.store.save(&next).await?;
        self.router.commit(current.committee_id.as_deref(), &decision);

        let event = DomainEvent::CaseReassigned {
            case_id: saved.id.clone(),
            previous_committee_id: current.committee_id,
            committee_id: decision.committee_id,
        };
        self.audit(actor, &event).await;
        tracing::info!("👥 Case {} reassigned to {}", saved.id, committee_id);
        Ok(TransitionOutcome {
            case: saved,
            events: vec![event],
        })
    }

    /// Recount every committee's open cases from the store, e.g. when a
    /// persistent store outlives the process. Returns the number of open cases.
    pub async fn reconcile_committees(&self) -> Result<u64> {
        let mut counts = HashMap::new();
        for committee in self.router.list_committees() {
            let open = self
                .store
                .list_by_committee(&committee.id)
                .await?
                .iter()
                .filter(|c| !c.status.is_settled())
                .count() as u64;
            counts.insert(committee.id, open);
        }
        self.router.restore_active_counts(&counts);
        let total = counts.values().sum();
        tracing::info!("🧮 Committee counters rebuilt: {total} open case(s)");
        Ok(total)
    }

    pub async fn get_case(&self, case_id: &str) -> Result<Case> {
        self.store.load(case_id).await
    }

    pub async fn list_by_committee(&self, committee_id: &str) -> Result<Vec<Case>> {
        self.store.list_by_committee(committee_id).await
    }

    pub async fn history(&self, case_id: &str) -> Result<Vec<AuditEvent>> {
        self.store.list_audit(case_id).await
    }

    /// The case write already succeeded, so a failed audit append is logged, not returned.
    async fn audit(&self, actor: &str, event: &DomainEvent) {
        let record = AuditEvent::new(actor, event.clone());
        if let Err(e) = self.store.append_audit_event(&record).await {
            tracing::warn!("⚠️ Audit append failed for case {}: {e}", record.case_id);
        }
    }
}
