//! Mock webhook server for testing notification delivery
//!
//! Stands in for Slack and Discord incoming webhooks so tests can check
//! the payloads `WebhookChannels` posts.

use serde_json::Value;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

pub struct MockWebhookServer {
    pub server: MockServer,
}

impl MockWebhookServer {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Accept posts on `/<name>`
    pub async fn mock_success(&self, name: &str) {
        Mock::given(method("POST"))
            .and(path(format!("/{}", name)))
            .respond_with(ResponseTemplate::new(200))
            .mount(&self.server)
            .await;
    }

    /// Reject posts on `/<name>` with `status_code`
    pub async fn mock_failure(&self, name: &str, status_code: u16) {
        Mock::given(method("POST"))
            .and(path(format!("/{}", name)))
            .respond_with(ResponseTemplate::new(status_code))
            .mount(&self.server)
            .await;
    }

    pub fn webhook_url(&self, name: &str) -> String {
        format!("{}/{}", self.server.uri(), name)
    }

    /// JSON bodies received on `/<name>`, in arrival order
    pub async fn bodies(&self, name: &str) -> Vec<Value> {
        let wanted = format!("/{}", name);
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|req| req.url.path() == wanted)
            .filter_map(|req| req.body_json::<Value>().ok())
            .collect()
    }
}
