//! Committees that own cases, with their derived bookkeeping counters.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// How a case ended, as far as committee statistics are concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseOutcome {
    /// Resolved on or before its due date.
    OnTime,
    /// Resolved after its due date.
    Late,
}

impl CaseOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CaseOutcome::OnTime)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Committee {
    pub id: String,
    pub name: String,
    /// Free-form committee type ("safety", "grievance", "escalation", …).
    pub committee_type: String,
    #[serde(default)]
    pub member_ids: BTreeSet<String>,
    #[serde(default)]
    pub active_case_count: u64,
    #[serde(default)]
    pub completed_case_count: u64,
    #[serde(default)]
    pub successful_case_count: u64,
    #[serde(default)]
    pub success_rate: f64,
}

impl Committee {
    pub fn new(id: &str, name: &str, committee_type: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            committee_type: committee_type.to_string(),
            member_ids: BTreeSet::new(),
            active_case_count: 0,
            completed_case_count: 0,
            successful_case_count: 0,
            success_rate: 0.0,
        }
    }

    pub fn with_members<I, S>(mut self, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.member_ids.extend(members.into_iter().map(Into::into));
        self
    }

    /// Record a finished case and recompute the success rate.
    pub fn record_outcome(&mut self, outcome: CaseOutcome) {
        self.active_case_count = self.active_case_count.saturating_sub(1);
        self.completed_case_count += 1;
        if outcome.is_success() {
            self.successful_case_count += 1;
        }
        self.success_rate = self.successful_case_count as f64 / self.completed_case_count as f64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_outcome_updates_rate() {
        let mut c =
            Committee::new("safety", "Safety Committee", "safety").with_members(["u1", "u2"]);
        c.active_case_count = 2;
        c.record_outcome(CaseOutcome::OnTime);
        c.record_outcome(CaseOutcome::Late);
        assert_eq!(c.active_case_count, 0);
        assert_eq!(c.completed_case_count, 2);
        assert!((c.success_rate - 0.5).abs() < f64::EPSILON);
        assert_eq!(c.member_ids.len(), 2);
    }
}
