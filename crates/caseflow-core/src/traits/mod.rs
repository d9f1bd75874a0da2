//! Contracts consumed from collaborators: storage, settings and channel transports.

pub mod channel;
pub mod settings;
pub mod store;

pub use channel::ChannelSender;
pub use settings::PreferenceProvider;
pub use store::{CaseStore, NotificationStore};
