//! Channel router — maps each channel to the sender that carries it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use caseflow_core::config::CaseflowConfig;
use caseflow_core::error::{CaseflowError, Result};
use caseflow_core::traits::ChannelSender;
use caseflow_core::types::Channel;

use crate::inbox::InAppInbox;
use crate::log::LogSender;
use crate::webhook::WebhookSender;

#[derive(Default, Clone)]
pub struct ChannelRouter {
    senders: HashMap<Channel, Arc<dyn ChannelSender>>,
}

impl ChannelRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the sender for a channel.
    pub fn with(mut self, channel: Channel, sender: Arc<dyn ChannelSender>) -> Self {
        self.senders.insert(channel, sender);
        self
    }

    /// In-app goes to `inbox`; the other channels go to the configured webhook,
    /// or to the log when none is set.
    pub fn from_config(config: &CaseflowConfig, inbox: Arc<InAppInbox>) -> Self {
        let external: Arc<dyn ChannelSender> = match &config.webhook {
            Some(webhook) => {
                tracing::info!("🔗 External channels delivered via webhook {}", webhook.url);
                Arc::new(WebhookSender::new(webhook))
            }
            None => Arc::new(LogSender),
        };
        Self::new()
            .with(Channel::Email, Arc::clone(&external))
            .with(Channel::Sms, Arc::clone(&external))
            .with(Channel::Push, external)
            .with(Channel::InApp, inbox)
    }

    pub fn sender_for(&self, channel: Channel) -> Option<&Arc<dyn ChannelSender>> {
        self.senders.get(&channel)
    }

    pub fn channels(&self) -> Vec<Channel> {
        let mut channels: Vec<Channel> = self.senders.keys().copied().collect();
        channels.sort();
        channels
    }
}

#[async_trait]
impl ChannelSender for ChannelRouter {
    fn name(&self) -> &str {
        "router"
    }

    async fn send(
        &self,
        channel: Channel,
        recipient: &str,
        payload: &serde_json::Value,
    ) -> Result<()> {
        let sender = self.senders.get(&channel).ok_or_else(|| CaseflowError::Dispatch {
            channel,
            reason: "no sender registered".into(),
        })?;
        sender.send(channel, recipient, payload).await
    }
}
