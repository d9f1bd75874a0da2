//! # Caseflow Scheduler
//!
//! Turns workflow events into timed, channel-aware, retryable notifications.
//!
//! ## Architecture
//! ```text
//! DomainEvent
//!   → NotificationPlanner.plan(event, case)     (notification rules → ScheduledNotification)
//!   → Scheduler.schedule(n)                      (policy: batching window, quiet hours → dispatch_at)
//!       → NotificationStore.insert + DispatchQueue.push
//! SchedulerTask (tokio interval, CancellationToken)
//!   → Scheduler.tick(now)
//!       → pop due ids, drop anything no longer pending (lazy cancellation)
//!       → group batched recipients, fan out to Dispatcher (bounded concurrency)
//!           → re-read case, cancel stale, resolve channels, send in parallel
//!           → mark sent / requeue with backoff / mark failed, audit every attempt
//! ```

pub mod dispatch;
pub mod engine;
pub mod planner;
pub mod policy;
pub mod queue;
pub mod retry;

#[cfg(test)]
mod testkit;

pub use dispatch::{DispatchMetrics, DispatchResult, Dispatcher, MetricsSnapshot};
pub use engine::{Scheduler, SchedulerTask, TickReport};
pub use planner::NotificationPlanner;
pub use queue::DispatchQueue;
pub use retry::RetryPolicy;
