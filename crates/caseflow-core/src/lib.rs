//! # Caseflow Core
//!
//! Shared vocabulary for the case workflow and notification dispatch engine:
//! the data model, the error taxonomy, domain events, the collaborator traits
//! (case store, settings provider, channel senders) and configuration.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::CaseflowConfig;
pub use error::{CaseflowError, ErrorKind, Result};
