//! In-app inbox — the delivery channel that needs no external transport.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use caseflow_core::error::Result;
use caseflow_core::traits::ChannelSender;
use caseflow_core::types::Channel;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Per-user inbox size; older messages are dropped first.
const INBOX_CAPACITY: usize = 200;

#[derive(Debug, Clone, Serialize)]
pub struct InboxMessage {
    pub channel: Channel,
    pub payload: serde_json::Value,
    pub delivered_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct InAppInbox {
    messages: Mutex<HashMap<String, Vec<InboxMessage>>>,
}

impl InAppInbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<InboxMessage>>> {
        self.messages.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Messages for a user, oldest first.
    pub fn messages_for(&self, user_id: &str) -> Vec<InboxMessage> {
        self.lock().get(user_id).cloned().unwrap_or_default()
    }

    pub fn total(&self) -> usize {
        self.lock().values().map(Vec::len).sum()
    }
}

#[async_trait]
impl ChannelSender for InAppInbox {
    fn name(&self) -> &str {
        "inbox"
    }

    async fn send(
        &self,
        channel: Channel,
        recipient: &str,
        payload: &serde_json::Value,
    ) -> Result<()> {
        let mut messages = self.lock();
        let inbox = messages.entry(recipient.to_string()).or_default();
        inbox.push(InboxMessage {
            channel,
            payload: payload.clone(),
            delivered_at: Utc::now(),
        });
        if inbox.len() > INBOX_CAPACITY {
            let overflow = inbox.len() - INBOX_CAPACITY;
            inbox.drain(..overflow);
        }
        tracing::debug!("📬 In-app message for {recipient}");
        Ok(())
    }
}
