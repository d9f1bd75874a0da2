use async_trait::async_trait;

use crate::error::Result;
use crate::types::Channel;

/// Transport for one or more channels (email, SMS, push, in-app).
///
/// Implementations report failures as `CaseflowError::Dispatch`; the dispatcher
/// retries them with backoff.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    fn name(&self) -> &str;

    async fn send(
        &self,
        channel: Channel,
        recipient: &str,
        payload: &serde_json::Value,
    ) -> Result<()>;
}
