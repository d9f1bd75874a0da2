//! Caseflow configuration system.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::error::{CaseflowError, Result};
use crate::types::{Audience, ChannelPreference, Condition, NotificationType, Timing, Trigger};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseflowConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default = "default_committees")]
    pub committees: Vec<CommitteeConfig>,
    #[serde(default)]
    pub routing_rules: Vec<RoutingRuleConfig>,
    #[serde(default)]
    pub notification_rules: Vec<NotificationRuleConfig>,
    #[serde(default)]
    pub preferences: Vec<ChannelPreference>,
    #[serde(default)]
    pub webhook: Option<WebhookConfig>,
}

fn default_database_path() -> String { "~/.caseflow/caseflow.db".into() }
fn default_committees() -> Vec<CommitteeConfig> {
    vec![
        CommitteeConfig {
            id: default_committee_id(),
            name: "General Grievance Committee".into(),
            committee_type: "grievance".into(),
            members: vec![],
        },
        CommitteeConfig {
            id: default_escalation_committee_id(),
            name: "Escalation Committee".into(),
            committee_type: "escalation".into(),
            members: vec![],
        },
    ]
}

impl Default for CaseflowConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            scheduler: SchedulerConfig::default(),
            routing: RoutingConfig::default(),
            committees: default_committees(),
            routing_rules: vec![],
            notification_rules: vec![],
            preferences: vec![],
            webhook: None,
        }
    }
}

impl CaseflowConfig {
    /// Load config from the default path (~/.caseflow/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CaseflowError::Configuration(format!("Failed to read config: {e}")))?;
        Self::parse(&content)
    }

    /// Parse and validate config text.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| CaseflowError::Configuration(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to the given path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| CaseflowError::Configuration(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Caseflow home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".caseflow")
    }

    /// Check cross references. Predicates themselves are compiled (and rejected)
    /// by the rule engine when the rules are installed.
    pub fn validate(&self) -> Result<()> {
        let mut ids = BTreeSet::new();
        for committee in &self.committees {
            if !ids.insert(committee.id.as_str()) {
                return Err(CaseflowError::Configuration(format!(
                    "duplicate committee id '{}'",
                    committee.id
                )));
            }
        }
        for id in [&self.routing.default_committee_id, &self.routing.escalation_committee_id] {
            if !ids.contains(id.as_str()) {
                return Err(CaseflowError::Configuration(format!(
                    "routing references unknown committee '{id}'"
                )));
            }
        }
        for rule in &self.routing_rules {
            if !ids.contains(rule.target_committee_id.as_str()) {
                return Err(CaseflowError::Configuration(format!(
                    "routing rule '{}' targets unknown committee '{}'",
                    rule.name, rule.target_committee_id
                )));
            }
        }
        if self.scheduler.max_attempts == 0 {
            return Err(CaseflowError::Configuration(
                "scheduler.max_attempts must be at least 1".into(),
            ));
        }
        if self.scheduler.backoff_base_secs > self.scheduler.backoff_max_secs {
            return Err(CaseflowError::Configuration(
                "scheduler.backoff_base_secs exceeds backoff_max_secs".into(),
            ));
        }
        for pref in &self.preferences {
            pref.validate()?;
        }
        Ok(())
    }
}

/// Scheduler / dispatcher tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base")]
    pub backoff_base_secs: u64,
    #[serde(default = "default_backoff_max")]
    pub backoff_max_secs: u64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_dispatches: usize,
}

fn default_tick_interval() -> u64 { 30 }
fn default_max_attempts() -> u32 { 3 }
fn default_backoff_base() -> u64 { 60 }
fn default_backoff_max() -> u64 { 3600 }
fn default_max_concurrent() -> usize { 8 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval(),
            max_attempts: default_max_attempts(),
            backoff_base_secs: default_backoff_base(),
            backoff_max_secs: default_backoff_max(),
            max_concurrent_dispatches: default_max_concurrent(),
        }
    }
}

/// Fixed routing targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Committee of the always-present default rule.
    #[serde(default = "default_committee_id")]
    pub default_committee_id: String,
    /// Committee every escalated case is moved to.
    #[serde(default = "default_escalation_committee_id")]
    pub escalation_committee_id: String,
}

fn default_committee_id() -> String { "general".into() }
fn default_escalation_committee_id() -> String { "escalation".into() }

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            default_committee_id: default_committee_id(),
            escalation_committee_id: default_escalation_committee_id(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitteeConfig {
    pub id: String,
    pub name: String,
    #[serde(default = "default_committee_type")]
    pub committee_type: String,
    #[serde(default)]
    pub members: Vec<String>,
}

fn default_committee_type() -> String { "grievance".into() }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingRuleConfig {
    pub name: String,
    pub condition: Condition,
    pub target_committee_id: String,
    #[serde(default)]
    pub priority: i64,
    #[serde(default = "bool_true")]
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRuleConfig {
    pub name: String,
    pub trigger: Trigger,
    #[serde(default = "Condition::always")]
    pub condition: Condition,
    pub notification_type: NotificationType,
    pub audience: Audience,
    #[serde(default)]
    pub timing: Timing,
    #[serde(default)]
    pub priority: i64,
    #[serde(default = "bool_true")]
    pub enabled: bool,
}

/// Outbound webhook used as a delivery channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default = "default_webhook_timeout")]
    pub timeout_secs: u64,
}

fn default_webhook_timeout() -> u64 { 10 }

fn bool_true() -> bool { true }

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventKind, Field, Value};

    #[test]
    fn test_default_config() {
        let config = CaseflowConfig::default();
        assert_eq!(config.scheduler.tick_interval_secs, 30);
        assert_eq!(config.scheduler.max_attempts, 3);
        assert_eq!(config.routing.default_committee_id, "general");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            database_path = "/tmp/caseflow-test.db"

            [scheduler]
            tick_interval_secs = 5
            max_attempts = 4

            [[committees]]
            id = "general"
            name = "General"

            [[committees]]
            id = "escalation"
            name = "Escalation"
            committee_type = "escalation"

            [[committees]]
            id = "safety"
            name = "Safety Committee"
            committee_type = "safety"
            members = ["hs-officer", "union-rep"]

            [[routing_rules]]
            name = "safety-critical"
            target_committee_id = "safety"
            priority = 10
            condition = { op = "equals", field = "category", value = { text = "workplace_safety" } }

            [[notification_rules]]
            name = "notify-committee-on-create"
            notification_type = "case_created"
            trigger = { event = "case_created" }
            audience = { kind = "committee_members" }
        "#;

        let config = CaseflowConfig::parse(toml_str).unwrap();
        assert_eq!(config.scheduler.tick_interval_secs, 5);
        assert_eq!(config.scheduler.max_attempts, 4);
        assert_eq!(config.scheduler.backoff_base_secs, 60);
        assert_eq!(config.committees.len(), 3);
        assert_eq!(config.routing_rules[0].priority, 10);
        assert!(config.routing_rules[0].active);
        assert_eq!(
            config.routing_rules[0].condition,
            Condition::equals(Field::Category, Value::Text("workplace_safety".into()))
        );
        assert_eq!(config.notification_rules[0].trigger.event, EventKind::CaseCreated);
        assert_eq!(config.notification_rules[0].condition, Condition::always());
    }

    #[test]
    fn test_config_missing_fields_use_defaults() {
        let config = CaseflowConfig::parse("").unwrap();
        assert_eq!(config.database_path, "~/.caseflow/caseflow.db");
        assert_eq!(config.committees.len(), 2);
    }

    #[test]
    fn test_rule_targeting_unknown_committee_rejected() {
        let toml_str = r#"
            [[routing_rules]]
            name = "ghost"
            target_committee_id = "nowhere"
            condition = { op = "and", all = [] }
        "#;
        let err = CaseflowConfig::parse(toml_str).unwrap_err();
        assert!(err.to_string().contains("nowhere"));
    }

    #[test]
    fn test_home_dir() {
        let home = CaseflowConfig::home_dir();
        assert!(home.to_string_lossy().contains("caseflow"));
    }
}
