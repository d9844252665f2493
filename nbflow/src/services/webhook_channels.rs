use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::notification_service::{ChannelSender, NotifyError};
use crate::constants::notifications::WEBHOOK_TIMEOUT_SECONDS;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Slack,
    Discord,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelConfig {
    pub kind: ChannelKind,
    pub webhook_url: String,
}

/// Named Slack and Discord incoming webhooks
pub struct WebhookChannels {
    channels: HashMap<String, ChannelConfig>,
    client: Client,
}

impl WebhookChannels {
    pub fn new(channels: HashMap<String, ChannelConfig>) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(WEBHOOK_TIMEOUT_SECONDS))
            .build()?;

        info!("Configured {} notification channels", channels.len());
        Ok(Self { channels, client })
    }

    pub fn has_channel(&self, channel: &str) -> bool {
        self.channels.contains_key(channel)
    }

    pub fn payload(kind: ChannelKind, message: &str) -> serde_json::Value {
        match kind {
            ChannelKind::Slack => json!({ "text": message }),
            ChannelKind::Discord => json!({ "content": message }),
        }
    }
}

#[async_trait]
impl ChannelSender for WebhookChannels {
    async fn send(&self, channel: &str, message: &str) -> Result<(), NotifyError> {
        let config = self
            .channels
            .get(channel)
            .ok_or_else(|| NotifyError::UnknownChannel(channel.to_string()))?;

        if config.webhook_url.is_empty() {
            debug!("No webhook URL configured for '{}', skipping", channel);
            return Ok(());
        }

        let payload = Self::payload(config.kind, message);

        match timeout(
            Duration::from_secs(WEBHOOK_TIMEOUT_SECONDS),
            self.client.post(&config.webhook_url).json(&payload).send(),
        )
        .await
        {
            Ok(Ok(response)) => {
                if response.status().is_success() {
                    debug!("Webhook delivered to '{}'", channel);
                    Ok(())
                } else {
                    warn!("Webhook '{}' returned status: {}", channel, response.status());
                    Err(NotifyError::Delivery {
                        channel: channel.to_string(),
                        reason: format!("status {}", response.status()),
                    })
                }
            }
            Ok(Err(e)) => Err(NotifyError::Delivery {
                channel: channel.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => Err(NotifyError::Delivery {
                channel: channel.to_string(),
                reason: "timeout".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_shapes() {
        assert_eq!(
            WebhookChannels::payload(ChannelKind::Slack, "hi"),
            json!({ "text": "hi" })
        );
        assert_eq!(
            WebhookChannels::payload(ChannelKind::Discord, "hi"),
            json!({ "content": "hi" })
        );
    }

    #[tokio::test]
    async fn test_unknown_channel_is_reported() {
        let channels = WebhookChannels::new(HashMap::new()).unwrap();
        let err = channels.send("ops", "hi").await.unwrap_err();
        assert_eq!(err, NotifyError::UnknownChannel("ops".to_string()));
    }

    #[test]
    fn test_channel_kind_from_toml() {
        let config: ChannelConfig =
            toml::from_str("kind = \"discord\"\nwebhook_url = \"https://example.com/hook\"").unwrap();
        assert_eq!(config.kind, ChannelKind::Discord);
    }
}
