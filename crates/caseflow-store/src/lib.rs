//! # Caseflow Store
//!
//! Implementations of the storage and settings contracts from `caseflow-core`:
//! - [`MemoryCaseStore`] / [`MemoryNotificationStore`] / [`MemoryPreferences`] for tests and ephemeral runs
//! - [`SqliteStore`] for a single-node deployment that survives restarts

pub mod memory;
pub mod sqlite;

pub use memory::{MemoryCaseStore, MemoryNotificationStore, MemoryPreferences};
pub use sqlite::SqliteStore;
