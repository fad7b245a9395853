//! Email channel — SMTP via lettre.
//!
//! lettre's `SmtpTransport` is blocking, so the actual send runs on the
//! blocking thread pool.

use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::ExposeSecret;

use crate::config::EmailConfig;
use crate::error::DispatchError;
use crate::notify::{Notification, Notifier};

/// Sends notification emails over SMTP.
pub struct EmailNotifier {
    config: EmailConfig,
}

impl EmailNotifier {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    fn channel_failed(reason: String) -> DispatchError {
        DispatchError::ChannelFailed {
            channel: "email".into(),
            reason,
        }
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    fn name(&self) -> &str {
        "email"
    }

    async fn send(&self, note: &Notification) -> Result<(), DispatchError> {
        let recipient = self
            .config
            .default_recipient
            .clone()
            .ok_or_else(|| Self::channel_failed("no recipient configured".into()))?;

        let email = Message::builder()
            .from(
                self.config
                    .from_address
                    .parse()
                    .map_err(|e| Self::channel_failed(format!("bad from address: {e}")))?,
            )
            .to(recipient
                .parse()
                .map_err(|e| Self::channel_failed(format!("bad recipient address: {e}")))?)
            .subject(&note.title)
            .body(note.body.clone())
            .map_err(|e| Self::channel_failed(format!("building message: {e}")))?;

        let config = self.config.clone();
        tokio::task::spawn_blocking(move || {
            let transport = SmtpTransport::relay(&config.smtp_host)
                .map_err(|e| Self::channel_failed(format!("smtp relay: {e}")))?
                .port(config.smtp_port)
                .credentials(Credentials::new(
                    config.username.clone(),
                    config.password.expose_secret().to_string(),
                ))
                .build();

            transport
                .send(&email)
                .map_err(|e| Self::channel_failed(format!("smtp send: {e}")))?;
            Ok(())
        })
        .await
        .map_err(|e| Self::channel_failed(format!("send task panicked: {e}")))?
    }
}
