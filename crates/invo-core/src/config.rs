//! Application configuration
//!
//! Read once at startup from the environment (a `.env` file is honored via
//! dotenvy in the binary). Everything has a default except the database URL
//! and the Stripe webhook secret, which the binary refuses to run without.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Errors raised while reading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("invalid value for {0}: {1}")]
    InvalidVar(&'static str, String),
}

/// Top-level configuration for the invo services
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Postgres connection string
    pub database_url: String,

    /// Shared secret for verifying Stripe webhook signatures
    pub stripe_webhook_secret: String,

    /// Resend API key for outbound email (optional; email is skipped without it)
    pub resend_api_key: Option<String>,

    /// From address for outbound email
    pub email_from: String,

    /// Fixed debounce window for the evaluation scheduler
    #[serde(with = "duration_secs")]
    pub debounce_interval: Duration,

    /// Address the HTTP server binds to
    pub bind_addr: String,
}

impl AppConfig {
    /// Default debounce window: 3 minutes
    pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(180);

    /// Load configuration from the environment
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url =
            std::env::var("DATABASE_URL").map_err(|_| ConfigError::MissingVar("DATABASE_URL"))?;
        let stripe_webhook_secret = std::env::var("STRIPE_WEBHOOK_SECRET")
            .map_err(|_| ConfigError::MissingVar("STRIPE_WEBHOOK_SECRET"))?;

        let debounce_interval = match std::env::var("INVO_DEBOUNCE_SECS") {
            Ok(raw) => {
                let secs: u64 = raw
                    .parse()
                    .map_err(|_| ConfigError::InvalidVar("INVO_DEBOUNCE_SECS", raw.clone()))?;
                Duration::from_secs(secs)
            }
            Err(_) => Self::DEFAULT_DEBOUNCE,
        };

        Ok(Self {
            database_url,
            stripe_webhook_secret,
            resend_api_key: std::env::var("RESEND_API_KEY").ok(),
            email_from: std::env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "invoices@invo.app".to_string()),
            debounce_interval,
            bind_addr: std::env::var("INVO_BIND_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
        })
    }

    /// Set the debounce interval
    pub fn with_debounce_interval(mut self, interval: Duration) -> Self {
        self.debounce_interval = interval;
        self
    }
}

/// Serde support for Duration as whole seconds
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_debounce_is_three_minutes() {
        assert_eq!(AppConfig::DEFAULT_DEBOUNCE, Duration::from_secs(180));
    }

    #[test]
    fn test_with_debounce_interval() {
        let config = AppConfig {
            database_url: "postgres://localhost/invo".into(),
            stripe_webhook_secret: "whsec_test".into(),
            resend_api_key: None,
            email_from: "invoices@invo.app".into(),
            debounce_interval: AppConfig::DEFAULT_DEBOUNCE,
            bind_addr: "127.0.0.1:0".into(),
        };
        let config = config.with_debounce_interval(Duration::from_secs(1));
        assert_eq!(config.debounce_interval, Duration::from_secs(1));
    }
}
