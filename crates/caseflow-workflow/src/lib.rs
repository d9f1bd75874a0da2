//! # Caseflow Workflow
//!
//! The case state machine and the committee bookkeeping around it.
//!
//! ## Architecture
//! ```text
//! create / transition / reassign
//!   → WorkflowController
//!       ├── transitions::next_status   (table lookup, InvalidTransition)
//!       ├── payload validation         (Validation)
//!       ├── CommitteeRouter::decide    (rule snapshot, pure)
//!       ├── CaseStore::save            (optimistic version check, Conflict)
//!       ├── CommitteeRouter::commit    (counters, only after the save won)
//!       └── CaseStore::append_audit_event
//!   ← TransitionOutcome { case, events }   (the caller forwards events to the scheduler)
//! ```

pub mod controller;
pub mod router;
pub mod transitions;

pub use controller::{TransitionOutcome, WorkflowController};
pub use router::{CommitteeRouter, RouteDecision};
