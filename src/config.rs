//! Configuration types.
//!
//! Every scheduling constant (tick interval, trigger tolerance, action
//! window, dispatch pacing) is policy, so all of them live here and can be
//! overridden from the environment.

use std::time::Duration;

use chrono::FixedOffset;
use secrecy::SecretString;

use crate::error::ConfigError;

/// Scheduler timing configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Reminder engine tick interval.
    pub tick_interval: Duration,
    /// Tolerance around a reminder's exact trigger instant (± this value).
    pub trigger_tolerance: Duration,
    /// Action window around a dose's scheduled time (± this value).
    pub action_window: Duration,
    /// Pause between consecutive notification dispatches within one tick.
    pub dispatch_delay: Duration,
    /// Per-channel timeout for a single notification send.
    pub dispatch_timeout: Duration,
    /// Missed-dose sweeper interval.
    pub sweep_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
            trigger_tolerance: Duration::from_secs(30),
            action_window: Duration::from_secs(2 * 60 * 60),
            dispatch_delay: Duration::from_secs(5),
            dispatch_timeout: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl SchedulerConfig {
    /// Build from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            tick_interval: env_secs("MEDTRACK_TICK_SECS", defaults.tick_interval),
            trigger_tolerance: env_secs("MEDTRACK_TRIGGER_TOLERANCE_SECS", defaults.trigger_tolerance),
            action_window: env_secs("MEDTRACK_ACTION_WINDOW_SECS", defaults.action_window),
            dispatch_delay: env_secs("MEDTRACK_DISPATCH_DELAY_SECS", defaults.dispatch_delay),
            dispatch_timeout: env_secs("MEDTRACK_DISPATCH_TIMEOUT_SECS", defaults.dispatch_timeout),
            sweep_interval: env_secs("MEDTRACK_SWEEP_SECS", defaults.sweep_interval),
        }
    }

    /// `trigger_tolerance` as a chrono duration.
    pub fn trigger_tolerance_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.trigger_tolerance).unwrap_or(chrono::Duration::seconds(30))
    }

    /// `action_window` as a chrono duration.
    pub fn action_window_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.action_window).unwrap_or(chrono::Duration::hours(2))
    }
}

/// Push notification gateway configuration.
#[derive(Debug, Clone)]
pub struct PushConfig {
    /// Gateway endpoint that accepts `{user, title, body}` JSON posts.
    pub gateway_url: String,
    /// Optional bearer token for the gateway.
    pub token: Option<SecretString>,
}

impl PushConfig {
    /// Returns `None` if `MEDTRACK_PUSH_URL` is not set (channel disabled).
    pub fn from_env() -> Option<Self> {
        let gateway_url = std::env::var("MEDTRACK_PUSH_URL").ok()?;
        let token = std::env::var("MEDTRACK_PUSH_TOKEN")
            .ok()
            .map(SecretString::from);
        Some(Self { gateway_url, token })
    }
}

/// SMTP email channel configuration.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
    /// Recipient address per owner is resolved by the caller; this is the
    /// fallback when an owner has no address on file.
    pub default_recipient: Option<String>,
}

impl EmailConfig {
    /// Returns `None` if `MEDTRACK_SMTP_HOST` is not set (channel disabled).
    pub fn from_env() -> Option<Self> {
        let smtp_host = std::env::var("MEDTRACK_SMTP_HOST").ok()?;

        let smtp_port: u16 = std::env::var("MEDTRACK_SMTP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(587);

        let username = std::env::var("MEDTRACK_SMTP_USERNAME").unwrap_or_default();
        let password =
            SecretString::from(std::env::var("MEDTRACK_SMTP_PASSWORD").unwrap_or_default());
        let from_address =
            std::env::var("MEDTRACK_SMTP_FROM").unwrap_or_else(|_| username.clone());
        let default_recipient = std::env::var("MEDTRACK_NOTIFY_EMAIL").ok();

        Some(Self {
            smtp_host,
            smtp_port,
            username,
            password,
            from_address,
            default_recipient,
        })
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Path to the libsql database file.
    pub db_path: String,
    /// HTTP bind port.
    pub port: u16,
    /// Fixed local UTC offset all wall-clock values are interpreted in.
    pub utc_offset: FixedOffset,
    pub scheduler: SchedulerConfig,
    pub push: Option<PushConfig>,
    pub email: Option<EmailConfig>,
}

impl AppConfig {
    /// Build the full configuration from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let db_path =
            std::env::var("MEDTRACK_DB_PATH").unwrap_or_else(|_| "./data/medtrack.db".to_string());

        let port: u16 = std::env::var("MEDTRACK_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue {
                key: "MEDTRACK_PORT".to_string(),
                message: "expected a port number".to_string(),
            })?;

        let utc_offset = match std::env::var("MEDTRACK_UTC_OFFSET") {
            Ok(raw) => parse_utc_offset(&raw)?,
            Err(_) => FixedOffset::east_opt(0).expect("zero offset is representable"),
        };

        Ok(Self {
            db_path,
            port,
            utc_offset,
            scheduler: SchedulerConfig::from_env(),
            push: PushConfig::from_env(),
            email: EmailConfig::from_env(),
        })
    }
}

/// Parse a `+HH:MM` / `-HH:MM` offset string.
fn parse_utc_offset(raw: &str) -> Result<FixedOffset, ConfigError> {
    let invalid = || ConfigError::InvalidValue {
        key: "MEDTRACK_UTC_OFFSET".to_string(),
        message: format!("expected +HH:MM or -HH:MM, got '{raw}'"),
    };

    let (sign, rest) = match raw.split_at_checked(1) {
        Some(("+", rest)) => (1i32, rest),
        Some(("-", rest)) => (-1i32, rest),
        _ => return Err(invalid()),
    };

    let (hours, minutes) = rest.split_once(':').ok_or_else(invalid)?;
    let hours: i32 = hours.parse().map_err(|_| invalid())?;
    let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
    if hours > 23 || minutes > 59 {
        return Err(invalid());
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}

fn env_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduler_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.tick_interval.as_secs(), 60);
        assert_eq!(config.trigger_tolerance.as_secs(), 30);
        assert_eq!(config.action_window.as_secs(), 7200);
        assert_eq!(config.dispatch_delay.as_secs(), 5);
    }

    #[test]
    fn parse_offset_positive() {
        let offset = parse_utc_offset("+05:30").unwrap();
        assert_eq!(offset.local_minus_utc(), 5 * 3600 + 30 * 60);
    }

    #[test]
    fn parse_offset_negative() {
        let offset = parse_utc_offset("-08:00").unwrap();
        assert_eq!(offset.local_minus_utc(), -8 * 3600);
    }

    #[test]
    fn parse_offset_rejects_garbage() {
        assert!(parse_utc_offset("utc").is_err());
        assert!(parse_utc_offset("+25:00").is_err());
        assert!(parse_utc_offset("05:30").is_err());
    }
}
