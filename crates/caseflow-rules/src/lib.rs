//! # Caseflow Rules
//!
//! One evaluator for routing rules and notification rules.
//!
//! ```text
//! Condition (serde, untrusted) ──compile──▶ Predicate (checked)
//!                                              │
//! Case ──▶ CaseAttributes ──▶ evaluate(rules) ─┴─▶ first matching rule
//!                                                  (priority desc, created_at asc)
//! ```
//!
//! Compilation rejects malformed conditions with `ConfigurationError`, so
//! evaluation is total: it never fails and never mutates anything.

pub mod attributes;
pub mod engine;
pub mod predicate;
pub mod rule;

pub use attributes::CaseAttributes;
pub use engine::{evaluate, matching, RuleSet};
pub use predicate::Predicate;
pub use rule::{NotificationRule, Rule, RoutingRule, RuleStats};
