use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::constants::notifications::{EMOJI_ERROR, EMOJI_OK};
use crate::database::HistoryRecord;

#[derive(Debug, Clone, PartialEq)]
pub enum NotifyError {
    UnknownChannel(String),
    Delivery { channel: String, reason: String },
}

impl fmt::Display for NotifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotifyError::UnknownChannel(channel) => write!(f, "Unknown channel '{}'", channel),
            NotifyError::Delivery { channel, reason } => {
                write!(f, "Delivery to '{}' failed: {}", channel, reason)
            }
        }
    }
}

impl std::error::Error for NotifyError {}

/// Delivers a text message to a named channel
#[async_trait]
pub trait ChannelSender: Send + Sync {
    async fn send(&self, channel: &str, message: &str) -> Result<(), NotifyError>;
}

/// Chooses channels by execution status and fans a message out to them.
#[derive(Clone)]
pub struct NotificationDispatcher {
    sender: Arc<dyn ChannelSender>,
}

impl NotificationDispatcher {
    pub fn new(sender: Arc<dyn ChannelSender>) -> Self {
        Self { sender }
    }

    pub fn select_channels<'a>(
        record: &HistoryRecord,
        channels_ok: &'a [String],
        channels_fail: &'a [String],
    ) -> &'a [String] {
        if record.is_ok() {
            channels_ok
        } else {
            channels_fail
        }
    }

    pub fn format_message(record: &HistoryRecord, alias: &str) -> String {
        if record.is_ok() {
            format!(
                "{} - {} Executed OK in {:.2} secs. NB: {} Alias: {}.",
                EMOJI_OK, record.workflow_id, record.elapsed_seconds, record.notebook, alias
            )
        } else {
            format!(
                "{} - {} FAILED in {:.2} secs. NB: {} Alias: {}.",
                EMOJI_ERROR, record.workflow_id, record.elapsed_seconds, record.notebook, alias
            )
        }
    }

    /// Send one message per selected channel. Returns the number delivered;
    /// unknown channels and delivery failures are logged and skipped.
    pub async fn notify(
        &self,
        record: &HistoryRecord,
        alias: &str,
        channels_ok: &[String],
        channels_fail: &[String],
    ) -> usize {
        let channels = Self::select_channels(record, channels_ok, channels_fail);
        if channels.is_empty() {
            debug!("No channels configured for {} outcome", record.execution_id);
            return 0;
        }

        let message = Self::format_message(record, alias);
        let mut delivered = 0;

        for channel in channels {
            match self.sender.send(channel, &message).await {
                Ok(()) => {
                    delivered += 1;
                    debug!("Notified '{}' about {}", channel, record.execution_id);
                }
                Err(NotifyError::UnknownChannel(name)) => {
                    warn!("Skipping unknown notification channel '{}'", name);
                }
                Err(e) => {
                    warn!("Notification for {} not delivered: {}", record.execution_id, e);
                }
            }
        }

        info!(
            "Sent {}/{} notifications for execution {}",
            delivered,
            channels.len(),
            record.execution_id
        );
        delivered
    }

    /// Run `notify` on a detached task
    pub fn spawn_notify(
        &self,
        record: HistoryRecord,
        alias: String,
        channels_ok: Vec<String>,
        channels_fail: Vec<String>,
    ) -> JoinHandle<usize> {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            dispatcher
                .notify(&record, &alias, &channels_ok, &channels_fail)
                .await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::ExecutionResult;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn record(error: Option<&str>) -> HistoryRecord {
        HistoryRecord::from_result(ExecutionResult {
            execution_id: "exec-1".to_string(),
            workflow_id: "wf-1".to_string(),
            project_id: "analytics".to_string(),
            notebook: "daily.ipynb".to_string(),
            params: BTreeMap::new(),
            output_location: None,
            error: error.map(str::to_string),
            elapsed_seconds: 12.5,
            created_at: Utc::now(),
        })
    }

    #[test]
    fn test_format_ok_message() {
        let message = NotificationDispatcher::format_message(&record(None), "daily");
        assert_eq!(
            message,
            "✅ - wf-1 Executed OK in 12.50 secs. NB: daily.ipynb Alias: daily."
        );
    }

    #[test]
    fn test_format_failed_message() {
        let message = NotificationDispatcher::format_message(&record(Some("boom")), "daily");
        assert_eq!(
            message,
            "🔥 - wf-1 FAILED in 12.50 secs. NB: daily.ipynb Alias: daily."
        );
    }

    #[test]
    fn test_select_channels_by_status() {
        let ok = vec!["slack".to_string()];
        let fail = vec!["discord".to_string()];

        assert_eq!(NotificationDispatcher::select_channels(&record(None), &ok, &fail), &ok[..]);
        assert_eq!(
            NotificationDispatcher::select_channels(&record(Some("boom")), &ok, &fail),
            &fail[..]
        );
    }
}
