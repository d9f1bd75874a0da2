use async_trait::async_trait;

use crate::error::Result;
use crate::types::ChannelPreference;

/// Identity/settings collaborator. Unknown users get default preferences.
#[async_trait]
pub trait PreferenceProvider: Send + Sync {
    async fn channel_preference(&self, user_id: &str) -> Result<ChannelPreference>;
}
