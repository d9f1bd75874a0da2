//! # Caseflow Channels
//!
//! Concrete [`ChannelSender`](caseflow_core::traits::ChannelSender) transports.
//! Lightweight: no broker, no queue. The scheduler owns retries; a sender makes
//! one attempt and reports `Dispatch` on failure.

pub mod inbox;
pub mod log;
pub mod router;
pub mod webhook;

pub use inbox::{InAppInbox, InboxMessage};
pub use log::LogSender;
pub use router::ChannelRouter;
pub use webhook::WebhookSender;
