//! Command-line and environment parsing for the harness configuration

use clap::Parser;
use clap::builder::BoolishValueParser;
use std::path::PathBuf;
use std::time::Duration;

use super::defaults::Defaults;
use super::{Config, ConnectionConfig, LogLevel};
use crate::constants::{CLOSE_TIMEOUT, DEFAULT_ENDPOINT_TEMPLATE, DEFAULT_TERMINALS_FILE};
use crate::errors::{HarnessError, Result};

/// Raw configuration from command line arguments and environment variables
#[derive(Parser, Debug, Clone)]
#[command(
    name = "terminal-harness",
    version,
    about = "Opens and sustains one Socket.IO connection per configured terminal against a gateway",
    long_about = None
)]
pub struct RawConfig {
    /// Shared authentication token
    #[arg(
        long = "token",
        env = "TOKEN",
        hide_env_values = true,
        value_name = "TOKEN",
        help = "Authentication token sent with every terminal connection"
    )]
    pub token: Option<String>,

    #[arg(
        short = 'f',
        long = "terminals",
        env = "TERMINALS_FILE",
        value_name = "PATH",
        default_value = DEFAULT_TERMINALS_FILE,
        help = "Terminal list with a 'mid,tid' header"
    )]
    pub terminals: PathBuf,

    #[arg(
        short = 'e',
        long = "endpoint",
        env = "ENDPOINT_URL",
        value_name = "TEMPLATE",
        default_value = DEFAULT_ENDPOINT_TEMPLATE,
        help = "Endpoint template with {mid}, {tid} and {token} placeholders"
    )]
    pub endpoint: String,

    #[arg(
        short = 'l',
        long = "log-level",
        env = "LOG_LEVEL",
        value_name = "LEVEL",
        default_value = "INFO",
        help = "DEBUG, INFO, WARNING, ERROR or CRITICAL"
    )]
    pub log_level: String,

    #[arg(
        long = "ssl-verify",
        env = "SSL_VERIFY",
        value_name = "BOOL",
        default_value = "true",
        value_parser = BoolishValueParser::new(),
        help = "Verify the gateway's TLS certificate"
    )]
    pub ssl_verify: bool,

    /// Allow insecure connections
    #[arg(
        long = "insecure",
        help = "Skip TLS certificate verification (insecure, same as --ssl-verify false)"
    )]
    pub insecure: bool,

    #[arg(
        long = "max-retries",
        env = "MAX_RETRY_ATTEMPTS",
        value_name = "COUNT",
        default_value_t = Defaults::MAX_RETRY_ATTEMPTS,
        help = "Connect attempts per disconnection episode"
    )]
    pub max_retries: u32,

    #[arg(
        long = "retry-delay",
        env = "RETRY_DELAY_SECONDS",
        value_name = "SECONDS",
        default_value_t = Defaults::RETRY_DELAY_SECONDS,
        help = "Delay between connect attempts"
    )]
    pub retry_delay: f64,

    #[arg(
        long = "connect-timeout",
        env = "CONNECT_TIMEOUT_SECONDS",
        value_name = "SECONDS",
        default_value_t = Defaults::CONNECT_TIMEOUT_SECONDS,
        help = "Upper bound on a single connect attempt"
    )]
    pub connect_timeout: f64,

    #[arg(
        long = "status-interval",
        env = "STATUS_INTERVAL_SECONDS",
        value_name = "SECONDS",
        default_value_t = Defaults::STATUS_INTERVAL_SECONDS,
        help = "Interval between fleet status lines"
    )]
    pub status_interval: f64,

    #[arg(
        long = "keepalive-interval",
        env = "KEEPALIVE_INTERVAL_SECONDS",
        value_name = "SECONDS",
        default_value_t = Defaults::KEEPALIVE_INTERVAL_SECONDS,
        help = "Interval between application keep-alive probes"
    )]
    pub keepalive_interval: f64,

    #[arg(
        long = "shutdown-grace",
        env = "SHUTDOWN_GRACE_SECONDS",
        value_name = "SECONDS",
        default_value_t = Defaults::SHUTDOWN_GRACE_SECONDS,
        help = "How long shutdown waits for terminals to disconnect"
    )]
    pub shutdown_grace: f64,

    #[arg(
        long = "start-stagger-ms",
        env = "START_STAGGER_MS",
        value_name = "MILLIS",
        default_value_t = Defaults::START_STAGGER_MS,
        help = "Delay between starting consecutive terminals"
    )]
    pub start_stagger_ms: u64,
}

impl RawConfig {
    /// Parse from command line arguments.
    ///
    /// `--help` and `--version` print and exit here; every other parse failure is a
    /// configuration error so it maps to the configuration exit code.
    pub fn parse_from_args() -> Result<Self> {
        match Self::try_parse() {
            Ok(raw) => Ok(raw),
            Err(e) if !e.use_stderr() => e.exit(),
            Err(e) => Err(HarnessError::config(e.to_string())),
        }
    }

    fn seconds(name: &str, value: f64) -> Result<Duration> {
        Duration::try_from_secs_f64(value).map_err(|_| {
            HarnessError::config(format!(
                "{} must be a non-negative number of seconds, got {}",
                name, value
            ))
        })
    }
}

impl TryFrom<RawConfig> for Config {
    type Error = HarnessError;

    fn try_from(raw: RawConfig) -> Result<Self> {
        let token = raw
            .token
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| HarnessError::config("TOKEN not found in environment, .env or --token"))?;

        let (log_level, unknown_log_level) = match raw.log_level.parse::<LogLevel>() {
            Ok(level) => (level, None),
            Err(_) => (LogLevel::Info, Some(raw.log_level.clone())),
        };

        Ok(Config {
            connection: ConnectionConfig {
                endpoint_url_template: raw.endpoint,
                token,
                ssl_verify: raw.ssl_verify && !raw.insecure,
                max_retry_attempts: raw.max_retries,
                retry_delay: RawConfig::seconds("retry delay", raw.retry_delay)?,
                connect_timeout: RawConfig::seconds("connect timeout", raw.connect_timeout)?,
                status_interval: RawConfig::seconds("status interval", raw.status_interval)?,
                keepalive_interval: RawConfig::seconds(
                    "keep-alive interval",
                    raw.keepalive_interval,
                )?,
                shutdown_grace: RawConfig::seconds("shutdown grace", raw.shutdown_grace)?,
                close_timeout: CLOSE_TIMEOUT,
                start_stagger: Duration::from_millis(raw.start_stagger_ms),
            },
            terminals_file: raw.terminals,
            log_level,
            unknown_log_level,
        })
    }
}
