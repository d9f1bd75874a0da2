//! Rule Engine — deterministic first-match evaluation.
//!
//! ## Ordering
//! ```text
//! active rules
//!   → sort by (priority desc, created_at asc, id asc)
//!   → first rule whose predicate matches the case attributes
//!   → none matched? the default rule (RuleSet only)
//! ```

use std::cmp::Ordering;

use caseflow_core::error::{CaseflowError, Result};

use crate::attributes::CaseAttributes;
use crate::rule::{Rule, RoutingRule};

fn evaluation_order<R: Rule>(a: &R, b: &R) -> Ordering {
    b.priority()
        .cmp(&a.priority())
        .then_with(|| a.created_at().cmp(&b.created_at()))
        .then_with(|| a.id().cmp(b.id()))
}

/// Active rules in evaluation order.
pub fn ordered<R: Rule>(rules: &[R]) -> Vec<&R> {
    let mut active: Vec<&R> = rules.iter().filter(|r| r.is_active()).collect();
    active.sort_by(|a, b| evaluation_order(*a, *b));
    active
}

/// First active rule (in evaluation order) whose predicate matches.
pub fn evaluate<'a, R: Rule>(rules: &'a [R], attrs: &CaseAttributes) -> Option<&'a R> {
    ordered(rules).into_iter().find(|r| r.predicate().matches(attrs))
}

/// Every active rule whose predicate matches, in evaluation order.
pub fn matching<'a, R: Rule>(rules: &'a [R], attrs: &CaseAttributes) -> Vec<&'a R> {
    ordered(rules)
        .into_iter()
        .filter(|r| r.predicate().matches(attrs))
        .collect()
}

/// Routing rules plus the always-present default rule.
///
/// The set is an immutable value; the router publishes a fresh copy on every
/// edit so readers evaluate against a stable snapshot.
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: Vec<RoutingRule>,
    default: RoutingRule,
}

impl RuleSet {
    pub fn new(default_committee_id: &str) -> Self {
        Self {
            rules: Vec::new(),
            default: RoutingRule::default_rule(default_committee_id),
        }
    }

    /// Add a rule. Rule ids are unique and only the set owns a default rule.
    pub fn insert(&mut self, rule: RoutingRule) -> Result<()> {
        if rule.is_default {
            return Err(CaseflowError::Configuration(
                "a rule set has exactly one default rule".into(),
            ));
        }
        if rule.id == self.default.id || self.rules.iter().any(|r| r.id == rule.id) {
            return Err(CaseflowError::Configuration(format!("duplicate rule id '{}'", rule.id)));
        }
        tracing::debug!("🧭 Routing rule added: '{}' → {}", rule.name, rule.target_committee_id);
        self.rules.push(rule);
        Ok(())
    }

    /// Enable or disable a rule. The default rule is always active.
    pub fn set_active(&mut self, id: &str, active: bool) -> Result<&RoutingRule> {
        if id == self.default.id {
            return Err(CaseflowError::Validation("the default rule cannot be toggled".into()));
        }
        let rule = self
            .rules
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| CaseflowError::not_found("routing rule", id))?;
        rule.active = active;
        Ok(rule)
    }

    /// Delete a rule. The default rule is never deleted.
    pub fn remove(&mut self, id: &str) -> Result<RoutingRule> {
        if id == self.default.id {
            return Err(CaseflowError::Validation("the default rule cannot be deleted".into()));
        }
        let idx = self
            .rules
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| CaseflowError::not_found("routing rule", id))?;
        Ok(self.rules.remove(idx))
    }

    pub fn get(&self, id: &str) -> Option<&RoutingRule> {
        if id == self.default.id {
            return Some(&self.default);
        }
        self.rules.iter().find(|r| r.id == id)
    }

    pub fn default_rule(&self) -> &RoutingRule {
        &self.default
    }

    /// All rules, default last, in evaluation order for active ones.
    pub fn list(&self) -> Vec<&RoutingRule> {
        let mut all: Vec<&RoutingRule> = self.rules.iter().collect();
        all.sort_by(|a, b| evaluation_order(*a, *b));
        all.push(&self.default);
        all
    }

    /// Winning rule for these attributes; falls back to the default rule.
    pub fn evaluate(&self, attrs: &CaseAttributes) -> &RoutingRule {
        evaluate(&self.rules, attrs).unwrap_or(&self.default)
    }

    pub fn len(&self) -> usize {
        self.rules.len() + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}
