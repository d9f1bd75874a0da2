//! # Caseflow Service
//!
//! The operations exposed to collaborators (UI, reporting), wired together:
//! the workflow controller returns domain events, the service hands them to the
//! scheduler, and the scheduler's task drains due notifications.

pub mod service;

pub use service::CaseService;
