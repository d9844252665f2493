pub mod history_service;
pub mod notification_service;
pub mod webhook_channels;

pub use history_service::{ExecutionReporter, HistoryRecorder};
pub use notification_service::{ChannelSender, NotificationDispatcher, NotifyError};
pub use webhook_channels::{ChannelConfig, ChannelKind, WebhookChannels};
