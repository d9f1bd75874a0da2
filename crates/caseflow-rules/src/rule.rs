//! Routing and notification rules.

use caseflow_core::config::{NotificationRuleConfig, RoutingRuleConfig};
use caseflow_core::error::{CaseflowError, Result};
use caseflow_core::types::{new_id, Audience, NotificationType, Timing, Trigger};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::predicate::Predicate;

/// What the evaluator needs from a rule.
pub trait Rule {
    fn id(&self) -> &str;
    /// Higher numeric priority is evaluated first.
    fn priority(&self) -> i64;
    /// Tie-break among equal priorities: oldest first.
    fn created_at(&self) -> DateTime<Utc>;
    fn is_active(&self) -> bool;
    fn predicate(&self) -> &Predicate;
}

/// Derived routing counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleStats {
    pub match_count: u64,
    pub completed_count: u64,
    pub successful_count: u64,
    pub success_rate: f64,
}

impl RuleStats {
    pub fn record_outcome(&mut self, success: bool) {
        self.completed_count += 1;
        if success {
            self.successful_count += 1;
        }
        self.success_rate = self.successful_count as f64 / self.completed_count as f64;
    }
}

/// A condition/committee pair used to auto-assign cases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingRule {
    pub id: String,
    pub name: String,
    pub predicate: Predicate,
    pub target_committee_id: String,
    pub priority: i64,
    pub active: bool,
    /// The catch-all rule: lowest priority, always active, never deleted.
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub stats: RuleStats,
}

impl RoutingRule {
    pub fn new(
        name: &str,
        predicate: Predicate,
        target_committee_id: &str,
        priority: i64,
    ) -> Result<Self> {
        if name.trim().is_empty() {
            return Err(CaseflowError::Configuration("routing rule needs a name".into()));
        }
        if target_committee_id.trim().is_empty() {
            return Err(CaseflowError::Configuration(format!(
                "routing rule '{name}' has no target committee"
            )));
        }
        if priority == i64::MIN {
            return Err(CaseflowError::Configuration(format!(
                "routing rule '{name}': the lowest priority is reserved for the default rule"
            )));
        }
        Ok(Self {
            id: new_id("rule"),
            name: name.to_string(),
            predicate,
            target_committee_id: target_committee_id.to_string(),
            priority,
            active: true,
            is_default: false,
            created_at: Utc::now(),
            stats: RuleStats::default(),
        })
    }

    /// Compile a rule from its config form.
    pub fn from_config(config: &RoutingRuleConfig) -> Result<Self> {
        let predicate = Predicate::compile(config.condition.clone()).map_err(|e| {
            CaseflowError::Configuration(format!("routing rule '{}': {e}", config.name))
        })?;
        let mut rule = Self::new(
            &config.name,
            predicate,
            &config.target_committee_id,
            config.priority,
        )?;
        rule.active = config.active;
        Ok(rule)
    }

    pub(crate) fn default_rule(target_committee_id: &str) -> Self {
        Self {
            id: "rule-default".to_string(),
            name: "default".to_string(),
            predicate: Predicate::always(),
            target_committee_id: target_committee_id.to_string(),
            priority: i64::MIN,
            active: true,
            is_default: true,
            created_at: DateTime::<Utc>::MIN_UTC,
            stats: RuleStats::default(),
        }
    }
}

impl Rule for RoutingRule {
    fn id(&self) -> &str {
        &self.id
    }
    fn priority(&self) -> i64 {
        self.priority
    }
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
    fn is_active(&self) -> bool {
        self.active
    }
    fn predicate(&self) -> &Predicate {
        &self.predicate
    }
}

/// When a workflow event matches `trigger` and the case matches `condition`,
/// schedule a `notification_type` notification for `audience` at `timing`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRule {
    pub id: String,
    pub name: String,
    pub trigger: Trigger,
    pub condition: Predicate,
    pub notification_type: NotificationType,
    pub audience: Audience,
    pub timing: Timing,
    pub priority: i64,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub last_run: Option<DateTime<Utc>>,
}

impl NotificationRule {
    pub fn new(
        name: &str,
        trigger: Trigger,
        condition: Predicate,
        notification_type: NotificationType,
        audience: Audience,
    ) -> Self {
        Self {
            id: new_id("nrule"),
            name: name.to_string(),
            trigger,
            condition,
            notification_type,
            audience,
            timing: Timing::default(),
            priority: 0,
            enabled: true,
            created_at: Utc::now(),
            last_run: None,
        }
    }

    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    pub fn from_config(config: &NotificationRuleConfig) -> Result<Self> {
        let condition = Predicate::compile(config.condition.clone()).map_err(|e| {
            CaseflowError::Configuration(format!("notification rule '{}': {e}", config.name))
        })?;
        if let Audience::User(user) = &config.audience {
            if user.trim().is_empty() {
                return Err(CaseflowError::Configuration(format!(
                    "notification rule '{}': empty user audience",
                    config.name
                )));
            }
        }
        let mut rule = Self::new(
            &config.name,
            config.trigger,
            condition,
            config.notification_type,
            config.audience.clone(),
        );
        rule.timing = config.timing;
        rule.priority = config.priority;
        rule.enabled = config.enabled;
        Ok(rule)
    }
}

impl Rule for NotificationRule {
    fn id(&self) -> &str {
        &self.id
    }
    fn priority(&self) -> i64 {
        self.priority
    }
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
    fn is_active(&self) -> bool {
        self.enabled
    }
    fn predicate(&self) -> &Predicate {
        &self.condition
    }
}
