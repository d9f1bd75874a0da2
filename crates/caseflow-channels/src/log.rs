//! Log-only sender for channels with no transport configured.

use async_trait::async_trait;
use caseflow_core::error::Result;
use caseflow_core::traits::ChannelSender;
use caseflow_core::types::Channel;

#[derive(Debug, Default, Clone)]
pub struct LogSender;

#[async_trait]
impl ChannelSender for LogSender {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(
        &self,
        channel: Channel,
        recipient: &str,
        payload: &serde_json::Value,
    ) -> Result<()> {
        let title = payload.get("title").and_then(|v| v.as_str()).unwrap_or("(no title)");
        tracing::info!("📨 [{channel}] → {recipient}: {title}");
        Ok(())
    }
}
