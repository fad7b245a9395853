//! Push channel — JSON POST to a configurable push gateway.

use async_trait::async_trait;
use secrecy::ExposeSecret;

use crate::config::PushConfig;
use crate::error::DispatchError;
use crate::notify::{Notification, Notifier};

/// Sends notifications to an HTTP push gateway (`{user, title, body}`).
pub struct PushNotifier {
    config: PushConfig,
    client: reqwest::Client,
}

impl PushNotifier {
    pub fn new(config: PushConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Notifier for PushNotifier {
    fn name(&self) -> &str {
        "push"
    }

    async fn send(&self, note: &Notification) -> Result<(), DispatchError> {
        let payload = serde_json::json!({
            "user": note.owner_id,
            "title": note.title,
            "body": note.body,
        });

        let mut request = self.client.post(&self.config.gateway_url).json(&payload);
        if let Some(ref token) = self.config.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|e| DispatchError::ChannelFailed {
                channel: "push".into(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(DispatchError::ChannelFailed {
                channel: "push".into(),
                reason: format!("gateway returned {}", response.status()),
            });
        }
        Ok(())
    }
}
