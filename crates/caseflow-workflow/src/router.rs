//! Committee Router — routing decisions and committee bookkeeping.
//!
//! Rule reads go through a copy-on-write snapshot: readers clone an `Arc<RuleSet>`
//! under a momentary read lock and evaluate without holding anything, while a
//! rule edit builds a new set and swaps the pointer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use caseflow_core::error::{CaseflowError, Result};
use caseflow_core::types::{Case, CaseOutcome, Committee};
use caseflow_rules::{CaseAttributes, RoutingRule, RuleSet, RuleStats};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Where a case should live, and which rule (if any) put it there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteDecision {
    pub committee_id: String,
    pub rule_id: Option<String>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct CommitteeRouter {
    rules: RwLock<Arc<RuleSet>>,
    rule_stats: Mutex<HashMap<String, RuleStats>>,
    committees: Mutex<HashMap<String, Committee>>,
    escalation_committee_id: String,
}

impl CommitteeRouter {
    /// Both committees must be registered before cases are routed.
    pub fn new(default_committee_id: &str, escalation_committee_id: &str) -> Self {
        Self {
            rules: RwLock::new(Arc::new(RuleSet::new(default_committee_id))),
            rule_stats: Mutex::new(HashMap::new()),
            committees: Mutex::new(HashMap::new()),
            escalation_committee_id: escalation_committee_id.to_string(),
        }
    }

    pub fn escalation_committee_id(&self) -> &str {
        &self.escalation_committee_id
    }

    /// Current rule snapshot.
    pub fn snapshot(&self) -> Arc<RuleSet> {
        match self.rules.read() {
            Ok(guard) => Arc::clone(&*guard),
            Err(poisoned) => Arc::clone(&*poisoned.into_inner()),
        }
    }

    fn update_rules<T>(&self, edit: impl FnOnce(&mut RuleSet) -> Result<T>) -> Result<T> {
        let mut guard = self.rules.write().unwrap_or_else(|p| p.into_inner());
        let mut next = RuleSet::clone(&**guard);
        let out = edit(&mut next)?;
        *guard = Arc::new(next);
        Ok(out)
    }

    fn with_stats(&self, mut rule: RoutingRule) -> RoutingRule {
        if let Some(stats) = lock(&self.rule_stats).get(&rule.id) {
            rule.stats = stats.clone();
        }
        rule
    }

    // ─── Rules ──────────────────────────────────────────────

    /// Install a rule. Its target committee must exist.
    pub fn create_rule(&self, rule: RoutingRule) -> Result<RoutingRule> {
        if !lock(&self.committees).contains_key(&rule.target_committee_id) {
            return Err(CaseflowError::not_found("committee", &rule.target_committee_id));
        }
        let created = rule.clone();
        self.update_rules(|set| set.insert(rule))?;
        tracing::info!(
            "🧭 Routing rule '{}' installed (priority {}, → {})",
            created.name,
            created.priority,
            created.target_committee_id
        );
        Ok(created)
    }

    /// All rules in evaluation order, default last, with live counters.
    pub fn list_rules(&self) -> Vec<RoutingRule> {
        let snapshot = self.snapshot();
        snapshot.list().into_iter().map(|r| self.with_stats(r.clone())).collect()
    }

    pub fn toggle_rule(&self, rule_id: &str, active: bool) -> Result<RoutingRule> {
        let rule = self.update_rules(|set| set.set_active(rule_id, active).cloned())?;
        let state = if active { "enabled" } else { "disabled" };
        tracing::info!("🧭 Routing rule '{}' {}", rule.name, state);
        Ok(self.with_stats(rule))
    }

    pub fn delete_rule(&self, rule_id: &str) -> Result<RoutingRule> {
        let rule = self.update_rules(|set| set.remove(rule_id))?;
        lock(&self.rule_stats).remove(rule_id);
        Ok(rule)
    }

    // ─── Routing ────────────────────────────────────────────

    /// Pure routing decision for a case. Never fails: if the winning rule's
    /// committee has been deleted, the default committee is used.
    pub fn decide(&self, case: &Case, now: DateTime<Utc>) -> RouteDecision {
        let snapshot = self.snapshot();
        let attrs = CaseAttributes::from_case(case, now);
        let winner = snapshot.evaluate(&attrs);
        if !winner.is_default && !lock(&self.committees).contains_key(&winner.target_committee_id) {
            tracing::warn!(
                "⚠️ Rule '{}' targets missing committee '{}', using default",
                winner.name,
                winner.target_committee_id
            );
            let default = snapshot.default_rule();
            return RouteDecision {
                committee_id: default.target_committee_id.clone(),
                rule_id: Some(default.id.clone()),
            };
        }
        RouteDecision {
            committee_id: winner.target_committee_id.clone(),
            rule_id: Some(winner.id.clone()),
        }
    }

    /// Decision that sends a case to the escalation committee.
    pub fn escalation_decision(&self) -> RouteDecision {
        RouteDecision {
            committee_id: self.escalation_committee_id.clone(),
            rule_id: None,
        }
    }

    /// Decision for a manual reassignment; the committee must exist.
    pub fn reassignment_decision(&self, committee_id: &str) -> Result<RouteDecision> {
        if !lock(&self.committees).contains_key(committee_id) {
            return Err(CaseflowError::not_found("committee", committee_id));
        }
        Ok(RouteDecision {
            committee_id: committee_id.to_string(),
            rule_id: None,
        })
    }

    /// Apply the bookkeeping of a decision once the case save has succeeded.
    pub fn commit(&self, previous_committee_id: Option<&str>, decision: &RouteDecision) {
        if let Some(rule_id) = &decision.rule_id {
            lock(&self.rule_stats).entry(rule_id.clone()).or_default().match_count += 1;
        }
        if previous_committee_id == Some(decision.committee_id.as_str()) {
            return;
        }
        let mut committees = lock(&self.committees);
        if let Some(prev) = previous_committee_id.and_then(|id| committees.get_mut(id)) {
            prev.active_case_count = prev.active_case_count.saturating_sub(1);
        }
        if let Some(target) = committees.get_mut(&decision.committee_id) {
            target.active_case_count += 1;
        }
    }

    /// Decide and commit in one step: Route(case) → committee id.
    pub fn route(&self, case: &Case) -> String {
        let decision = self.decide(case, Utc::now());
        self.commit(case.committee_id.as_deref(), &decision);
        decision.committee_id
    }

    /// Called once when a case reaches `resolved`.
    pub fn record_outcome(&self, case: &Case, outcome: CaseOutcome) {
        if let Some(committee_id) = &case.committee_id {
            if let Some(committee) = lock(&self.committees).get_mut(committee_id) {
                committee.record_outcome(outcome);
            }
        }
        if let Some(rule_id) = &case.routing_rule_id {
            lock(&self.rule_stats)
                .entry(rule_id.clone())
                .or_default()
                .record_outcome(outcome.is_success());
        }
        tracing::debug!("📊 Outcome {:?} recorded for case {}", outcome, case.id);
    }

    // ─── Committees ─────────────────────────────────────────

    /// Overwrite every committee's active count. Committees absent from
    /// `counts` drop to zero.
    pub fn restore_active_counts(&self, counts: &HashMap<String, u64>) {
        for committee in lock(&self.committees).values_mut() {
            committee.active_case_count = counts.get(&committee.id).copied().unwrap_or(0);
        }
    }

    pub fn create_committee(&self, committee: Committee) -> Result<Committee> {
        if committee.id.trim().is_empty() || committee.name.trim().is_empty() {
            return Err(CaseflowError::Validation("committee needs an id and a name".into()));
        }
        let mut committees = lock(&self.committees);
        if committees.contains_key(&committee.id) {
            return Err(CaseflowError::Validation(format!(
                "committee '{}' already exists",
                committee.id
            )));
        }
        tracing::info!(
            "👥 Committee '{}' created ({} members)",
            committee.name,
            committee.member_ids.len()
        );
        committees.insert(committee.id.clone(), committee.clone());
        Ok(committee)
    }

    pub fn add_member(&self, committee_id: &str, user_id: &str) -> Result<Committee> {
        let mut committees = lock(&self.committees);
        let committee = committees
            .get_mut(committee_id)
            .ok_or_else(|| CaseflowError::not_found("committee", committee_id))?;
        committee.member_ids.insert(user_id.to_string());
        Ok(committee.clone())
    }

    /// Delete a committee with no active cases. Routing targets stay protected.
    pub fn delete_committee(&self, committee_id: &str) -> Result<Committee> {
        let default_id = self.snapshot().default_rule().target_committee_id.clone();
        if committee_id == default_id || committee_id == self.escalation_committee_id {
            return Err(CaseflowError::Validation(format!(
                "committee '{committee_id}' is a fixed routing target"
            )));
        }
        let mut committees = lock(&self.committees);
        let committee = committees
            .get(committee_id)
            .ok_or_else(|| CaseflowError::not_found("committee", committee_id))?;
        if committee.active_case_count > 0 {
            return Err(CaseflowError::Validation(format!(
                "committee '{}' still has {} active case(s)",
                committee_id, committee.active_case_count
            )));
        }
        committees
            .remove(committee_id)
            .ok_or_else(|| CaseflowError::not_found("committee", committee_id))
    }

    pub fn get_committee(&self, committee_id: &str) -> Result<Committee> {
        lock(&self.committees)
            .get(committee_id)
            .cloned()
            .ok_or_else(|| CaseflowError::not_found("committee", committee_id))
    }

    pub fn list_committees(&self) -> Vec<Committee> {
        let mut all: Vec<Committee> = lock(&self.committees).values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub fn members_of(&self, committee_id: &str) -> Vec<String> {
        lock(&self.committees)
            .get(committee_id)
            .map(|c| c.member_ids.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caseflow_core::types::{Condition, Field, NewCase, Priority, Value};
    use caseflow_rules::Predicate;

    fn router() -> CommitteeRouter {
        let r = CommitteeRouter::new("general", "escalation");
        r.create_committee(Committee::new("general", "General", "grievance")).unwrap();
        r.create_committee(Committee::new("escalation", "Escalation", "escalation")).unwrap();
        r.create_committee(Committee::new("safety", "Safety", "safety").with_members(["hs1"]))
            .unwrap();
        r
    }

    fn safety_rule() -> RoutingRule {
        let p = Predicate::compile(Condition::and(vec![
            Condition::category("workplace_safety"),
            Condition::one_of(
                Field::Priority,
                vec![Value::Priority(Priority::High), Value::Priority(Priority::Critical)],
            ),
        ]))
        .unwrap();
        RoutingRule::new("R1", p, "safety", 10).unwrap()
    }

    fn case(category: &str, priority: Priority) -> Case {
        Case::from_new(NewCase::new("t", category, priority), Utc::now())
    }

    #[test]
    fn test_route_counts_matches_and_active_cases() {
        let r = router();
        let rule = r.create_rule(safety_rule()).unwrap();

        let committee = r.route(&case("workplace_safety", Priority::Critical));
        assert_eq!(committee, "safety");
        assert_eq!(r.get_committee("safety").unwrap().active_case_count, 1);

        let listed = r.list_rules();
        let stats = &listed.iter().find(|x| x.id == rule.id).unwrap().stats;
        assert_eq!(stats.match_count, 1);
    }

    #[test]
    fn test_reroute_moves_active_count() {
        let r = router();
        let mut c = case("wages", Priority::Low);
        c.committee_id = Some(r.route(&c));
        assert_eq!(r.get_committee("general").unwrap().active_case_count, 1);

        let decision = r.escalation_decision();
        r.commit(c.committee_id.as_deref(), &decision);
        assert_eq!(r.get_committee("general").unwrap().active_case_count, 0);
        assert_eq!(r.get_committee("escalation").unwrap().active_case_count, 1);
    }

    #[test]
    fn test_missing_target_falls_back_to_default() {
        let r = router();
        r.create_rule(safety_rule()).unwrap();
        r.create_committee(Committee::new("temp", "Temp", "x")).unwrap();
        let p = Predicate::always();
        r.create_rule(RoutingRule::new("to-temp", p, "temp", 99).unwrap()).unwrap();
        r.delete_committee("temp").unwrap();

        let decision = r.decide(&case("wages", Priority::Low), Utc::now());
        assert_eq!(decision.committee_id, "general");
    }

    #[test]
    fn test_rule_for_unknown_committee_rejected() {
        let r = router();
        let rule = RoutingRule::new("ghost", Predicate::always(), "ghost", 1).unwrap();
        let err = r.create_rule(rule).unwrap_err();
        assert_eq!(err.kind(), caseflow_core::ErrorKind::NotFound);
    }

    #[test]
    fn test_snapshot_is_stable_across_edits() {
        let r = router();
        let before = r.snapshot();
        r.create_rule(safety_rule()).unwrap();
        assert_eq!(before.len(), 1);
        assert_eq!(r.snapshot().len(), 2);
    }

    #[test]
    fn test_delete_committee_requires_no_active_cases() {
        let r = router();
        let c = case("workplace_safety", Priority::High);
        r.create_rule(safety_rule()).unwrap();
        r.route(&c);
        let err = r.delete_committee("safety").unwrap_err();
        assert_eq!(err.kind(), caseflow_core::ErrorKind::Validation);
        assert!(r.delete_committee("general").is_err());
    }

    #[test]
    fn test_record_outcome_updates_committee_and_rule() {
        let r = router();
        let rule = r.create_rule(safety_rule()).unwrap();
        let mut c = case("workplace_safety", Priority::High);
        let decision = r.decide(&c, Utc::now());
        r.commit(None, &decision);
        c.committee_id = Some(decision.committee_id);
        c.routing_rule_id = decision.rule_id;

        r.record_outcome(&c, CaseOutcome::OnTime);
        let safety = r.get_committee("safety").unwrap();
        assert_eq!(safety.completed_case_count, 1);
        assert_eq!(safety.active_case_count, 0);
        assert!((safety.success_rate - 1.0).abs() < f64::EPSILON);

        let listed = r.list_rules();
        let stats = &listed.iter().find(|x| x.id == rule.id).unwrap().stats;
        assert_eq!(stats.completed_count, 1);
    }

    #[test]
    fn test_restore_active_counts_overwrites_all() {
        let r = router();
        r.route(&case("workplace_safety", Priority::Low));
        assert_eq!(r.get_committee("general").unwrap().active_case_count, 1);

        r.restore_active_counts(&HashMap::from([("safety".to_string(), 4)]));
        assert_eq!(r.get_committee("safety").unwrap().active_case_count, 4);
        assert_eq!(r.get_committee("general").unwrap().active_case_count, 0);
    }

    #[test]
    fn test_toggle_default_rule_rejected() {
        let r = router();
        let default_id = r.snapshot().default_rule().id.clone();
        assert!(r.toggle_rule(&default_id, false).is_err());
        assert_eq!(r.members_of("safety"), vec!["hs1".to_string()]);
    }
}
