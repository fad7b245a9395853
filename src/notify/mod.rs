//! Notification fan-out.
//!
//! The scheduler only sees the `Dispatcher`; transports live behind the
//! `Notifier` trait. Every send is bounded by a timeout and a failing
//! channel never prevents the others from being tried.

pub mod email;
pub mod push;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::warn;

use crate::error::DispatchError;

pub use email::EmailNotifier;
pub use push::PushNotifier;

/// A resolved notification payload.
#[derive(Debug, Clone)]
pub struct Notification {
    pub owner_id: String,
    pub title: String,
    pub body: String,
}

/// A single delivery transport.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Channel name for logging.
    fn name(&self) -> &str;

    /// Deliver one notification.
    async fn send(&self, note: &Notification) -> Result<(), DispatchError>;
}

/// Outcome of one fan-out.
#[derive(Debug)]
pub struct DispatchOutcome {
    pub delivered: Vec<String>,
    pub failed: Vec<(String, DispatchError)>,
}

impl DispatchOutcome {
    /// The dispatch counts as successful when any channel delivered.
    pub fn any_delivered(&self) -> bool {
        !self.delivered.is_empty()
    }
}

/// Fans one notification out to every configured channel.
pub struct Dispatcher {
    channels: Vec<Arc<dyn Notifier>>,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(channels: Vec<Arc<dyn Notifier>>, timeout: Duration) -> Self {
        Self { channels, timeout }
    }

    /// Send `note` on every channel.
    ///
    /// Each call is bounded by the configured timeout; a timed-out or
    /// failed channel is recorded and the rest are still tried.
    pub async fn dispatch(&self, note: &Notification) -> Result<DispatchOutcome, DispatchError> {
        if self.channels.is_empty() {
            return Err(DispatchError::NoChannels);
        }

        let results = join_all(self.channels.iter().map(|channel| async {
            let result = tokio::time::timeout(self.timeout, channel.send(note)).await;
            (channel.name().to_string(), result)
        }))
        .await;

        let mut outcome = DispatchOutcome {
            delivered: Vec::new(),
            failed: Vec::new(),
        };

        for (name, result) in results {
            match result {
                Ok(Ok(())) => outcome.delivered.push(name),
                Ok(Err(e)) => {
                    warn!(channel = %name, error = %e, "Notification channel failed");
                    outcome.failed.push((name, e));
                }
                Err(_) => {
                    warn!(channel = %name, timeout = ?self.timeout, "Notification channel timed out");
                    let err = DispatchError::Timeout {
                        channel: name.clone(),
                        timeout: self.timeout,
                    };
                    outcome.failed.push((name, err));
                }
            }
        }

        Ok(outcome)
    }
}
