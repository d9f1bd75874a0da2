//! Generic HTTP webhook transport: POST a JSON envelope per delivery.

use std::time::Duration;

use async_trait::async_trait;
use caseflow_core::config::WebhookConfig;
use caseflow_core::error::{CaseflowError, Result};
use caseflow_core::traits::ChannelSender;
use caseflow_core::types::Channel;

pub struct WebhookSender {
    client: reqwest::Client,
    url: String,
    headers: Vec<(String, String)>,
    timeout: Duration,
}

impl WebhookSender {
    pub fn new(config: &WebhookConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: config.url.clone(),
            headers: config.headers.clone(),
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ChannelSender for WebhookSender {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(
        &self,
        channel: Channel,
        recipient: &str,
        payload: &serde_json::Value,
    ) -> Result<()> {
        let mut req = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({
                "channel": channel,
                "recipient": recipient,
                "payload": payload,
                "sent_at": chrono::Utc::now().to_rfc3339(),
            }))
            .timeout(self.timeout);

        for (key, value) in &self.headers {
            req = req.header(key.as_str(), value.as_str());
        }

        let resp = req.send().await.map_err(|e| CaseflowError::Dispatch {
            channel,
            reason: format!("webhook send failed: {e}"),
        })?;

        if resp.status().is_success() {
            tracing::info!("✅ Webhook delivery [{channel}] to {recipient} via {}", self.url);
            Ok(())
        } else {
            Err(CaseflowError::Dispatch {
                channel,
                reason: format!("webhook error {}", resp.status()),
            })
        }
    }
}
