//! Default values and configuration presets

use super::ConnectionConfig;
use crate::constants::{CLOSE_TIMEOUT, DEFAULT_ENDPOINT_TEMPLATE};
use std::time::Duration;

/// Default configuration values
pub struct Defaults;

impl Defaults {
    pub const MAX_RETRY_ATTEMPTS: u32 = 3;
    pub const RETRY_DELAY_SECONDS: f64 = 5.0;
    pub const CONNECT_TIMEOUT_SECONDS: f64 = 10.0;
    // Aligned with the gateway's 25s Engine.IO ping interval
    pub const STATUS_INTERVAL_SECONDS: f64 = 25.0;
    pub const KEEPALIVE_INTERVAL_SECONDS: f64 = 20.0;
    pub const SHUTDOWN_GRACE_SECONDS: f64 = 10.0;
    pub const START_STAGGER_MS: u64 = 10;
}

impl ConnectionConfig {
    /// Default configuration against the production gateway template
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            endpoint_url_template: DEFAULT_ENDPOINT_TEMPLATE.to_string(),
            token: token.into(),
            ssl_verify: true,
            max_retry_attempts: Defaults::MAX_RETRY_ATTEMPTS,
            retry_delay: Duration::from_secs_f64(Defaults::RETRY_DELAY_SECONDS),
            connect_timeout: Duration::from_secs_f64(Defaults::CONNECT_TIMEOUT_SECONDS),
            status_interval: Duration::from_secs_f64(Defaults::STATUS_INTERVAL_SECONDS),
            keepalive_interval: Duration::from_secs_f64(Defaults::KEEPALIVE_INTERVAL_SECONDS),
            shutdown_grace: Duration::from_secs_f64(Defaults::SHUTDOWN_GRACE_SECONDS),
            close_timeout: CLOSE_TIMEOUT,
            start_stagger: Duration::from_millis(Defaults::START_STAGGER_MS),
        }
    }

    /// Short timings for local gateways and tests
    pub fn quick_test(endpoint_url_template: impl Into<String>, token: impl Into<String>) -> Self {
        let mut config = Self::with_token(token);
        config.endpoint_url_template = endpoint_url_template.into();
        config.retry_delay = Duration::from_millis(500);
        config.connect_timeout = Duration::from_secs(2);
        config.status_interval = Duration::from_secs(5);
        config.keepalive_interval = Duration::from_secs(1);
        config.shutdown_grace = Duration::from_secs(3);
        config.start_stagger = Duration::ZERO;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_connection_config() {
        let config = ConnectionConfig::with_token("t");
        assert_eq!(config.max_retry_attempts, Defaults::MAX_RETRY_ATTEMPTS);
        assert_eq!(config.retry_delay, Duration::from_secs(5));
        assert_eq!(config.status_interval, Duration::from_secs(25));
        assert!(config.ssl_verify);
        assert_eq!(config.endpoint_url_template, DEFAULT_ENDPOINT_TEMPLATE);
    }

    #[test]
    fn test_quick_test_config() {
        let config = ConnectionConfig::quick_test("ws://localhost:3000/?mid={mid}&tid={tid}&token={token}", "t");
        assert_eq!(config.keepalive_interval, Duration::from_secs(1));
        assert_eq!(config.start_stagger, Duration::ZERO);
        assert!(config.endpoint_url_template.starts_with("ws://localhost"));
    }
}
