//! The case transition table.

use caseflow_core::types::{CaseAction, CaseStatus};

/// Status reached by applying `action` in `from`, or `None` if the action is illegal there.
pub fn next_status(from: CaseStatus, action: CaseAction) -> Option<CaseStatus> {
    use CaseAction::*;
    use CaseStatus::*;
    match (from, action) {
        (Submitted, Acknowledge) => Some(Acknowledged),
        (Acknowledged, StartInvestigation) => Some(Investigating),
        (Investigating, SubmitForReview) => Some(InReview),
        (InReview, ReturnToInvestigation) => Some(Investigating),
        (InReview, Resolve) => Some(Resolved),
        (Escalated, Resolve) => Some(Resolved),
        (Escalated, Deescalate) => Some(Investigating),
        (Resolved, Close) => Some(Closed),
        (Submitted | Acknowledged | Investigating | InReview, Escalate) => Some(Escalated),
        _ => None,
    }
}

const ACTIONS: [CaseAction; 8] = [
    CaseAction::Acknowledge,
    CaseAction::StartInvestigation,
    CaseAction::SubmitForReview,
    CaseAction::ReturnToInvestigation,
    CaseAction::Resolve,
    CaseAction::Close,
    CaseAction::Escalate,
    CaseAction::Deescalate,
];

/// Actions legal in `from`.
pub fn allowed_actions(from: CaseStatus) -> Vec<CaseAction> {
    ACTIONS
        .iter()
        .copied()
        .filter(|a| next_status(from, *a).is_some())
        .collect()
}

/// Whether `to` is reachable from `from` in one step.
pub fn is_edge(from: CaseStatus, to: CaseStatus) -> bool {
    ACTIONS.iter().any(|a| next_status(from, *a) == Some(to))
}

/// Whether an observed status history is a valid walk starting at `submitted`.
pub fn is_valid_walk(statuses: &[CaseStatus]) -> bool {
    match statuses.first() {
        None => true,
        Some(CaseStatus::Submitted) => statuses.windows(2).all(|w| is_edge(w[0], w[1])),
        Some(_) => false,
    }
}
