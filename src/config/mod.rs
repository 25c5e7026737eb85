//! Configuration management for the terminal harness
//!
//! This module provides a layered approach to configuration:
//! - Core structures and enums
//! - CLI / environment parsing
//! - Configuration validation
//! - Default value management
//! - Terminal list loading

pub mod defaults;
pub mod parser;
pub mod terminals;
pub mod validation;

use crate::common::TerminalIdentity;
use crate::constants::REDACTED;
use crate::errors::{HarnessError, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Log verbosity as accepted on the command line and in `LOG_LEVEL`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    /// Directive value understood by `tracing_subscriber::EnvFilter`
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error | LogLevel::Critical => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARNING" | "WARN" => Ok(LogLevel::Warning),
            "ERROR" => Ok(LogLevel::Error),
            "CRITICAL" => Ok(LogLevel::Critical),
            other => Err(HarnessError::config(format!(
                "Unknown log level '{}'. Use DEBUG, INFO, WARNING, ERROR or CRITICAL",
                other
            ))),
        }
    }
}

/// Process-wide connection settings, read-only after startup
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Endpoint with `{mid}`, `{tid}` and `{token}` placeholders
    pub endpoint_url_template: String,
    pub token: String,
    pub ssl_verify: bool,
    pub max_retry_attempts: u32,
    pub retry_delay: Duration,
    /// Upper bound on a single connect attempt, including the Socket.IO handshake
    pub connect_timeout: Duration,
    pub status_interval: Duration,
    pub keepalive_interval: Duration,
    pub shutdown_grace: Duration,
    pub close_timeout: Duration,
    pub start_stagger: Duration,
}

impl ConnectionConfig {
    /// Resolve the endpoint for one terminal.
    ///
    /// Placeholder values are percent-encoded. The literal token only ever appears in the
    /// returned `Url`; use [`ConnectionConfig::masked_endpoint`] for anything that is rendered.
    pub fn endpoint_for(&self, terminal: &TerminalIdentity) -> Result<Url> {
        let resolved = fill_template(
            &self.endpoint_url_template,
            &encode(&terminal.merchant_id),
            &encode(&terminal.terminal_id),
            &encode(&self.token),
        );
        Url::parse(&resolved).map_err(|e| {
            HarnessError::config(format!(
                "Invalid endpoint for [{}] '{}': {}",
                terminal,
                self.masked_endpoint(terminal),
                e
            ))
        })
    }

    /// The endpoint for one terminal with the token replaced by the redaction marker
    pub fn masked_endpoint(&self, terminal: &TerminalIdentity) -> String {
        fill_template(
            &self.endpoint_url_template,
            &encode(&terminal.merchant_id),
            &encode(&terminal.terminal_id),
            REDACTED,
        )
    }
}

fn fill_template(template: &str, mid: &str, tid: &str, token: &str) -> String {
    template
        .replace("{mid}", mid)
        .replace("{tid}", tid)
        .replace("{token}", token)
}

fn encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// Main configuration structure
#[derive(Debug, Clone)]
pub struct Config {
    pub connection: ConnectionConfig,
    pub terminals_file: PathBuf,
    pub log_level: LogLevel,
    /// Raw `LOG_LEVEL` value that could not be parsed and was replaced by INFO
    pub unknown_log_level: Option<String>,
}

impl Config {
    /// Parse and validate configuration from the environment and command line
    pub fn from_args() -> Result<Self> {
        let raw_config = parser::RawConfig::parse_from_args()?;
        let config: Config = raw_config.try_into()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Read and validate the terminal list named by the configuration
    pub fn load_terminals(&self) -> Result<Vec<TerminalIdentity>> {
        let terminals = terminals::read_terminals(&self.terminals_file)?;
        validation::validate_terminals(&terminals)?;
        Ok(terminals)
    }

    /// Print configuration summary
    pub fn print_summary(&self, terminal_count: usize) {
        let connection = &self.connection;

        println!("Terminal Harness Configuration:");
        println!(
            "   Endpoint:           {}",
            connection.endpoint_url_template.replace("{token}", REDACTED)
        );
        println!(
            "   Terminals:          {} (from {})",
            terminal_count,
            self.terminals_file.display()
        );
        println!(
            "   Retries:            {} per episode, {:.1}s apart",
            connection.max_retry_attempts,
            connection.retry_delay.as_secs_f64()
        );
        println!(
            "   Connect Timeout:    {:.1}s",
            connection.connect_timeout.as_secs_f64()
        );
        println!(
            "   Keep-Alive:         every {:.1}s",
            connection.keepalive_interval.as_secs_f64()
        );
        println!(
            "   Status Interval:    {:.1}s",
            connection.status_interval.as_secs_f64()
        );
        println!(
            "   Shutdown Grace:     {:.1}s",
            connection.shutdown_grace.as_secs_f64()
        );
        println!("   Log Level:          {:?}", self.log_level);

        if !connection.ssl_verify {
            println!("   Security:           TLS certificate verification DISABLED (insecure)");
        }

        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_parsing() {
        assert_eq!("debug".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warning);
        assert_eq!(" Critical ".parse::<LogLevel>().unwrap(), LogLevel::Critical);
        assert!("verbose".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_log_level_directives() {
        assert_eq!(LogLevel::Warning.as_directive(), "warn");
        assert_eq!(LogLevel::Critical.as_directive(), "error");
        assert_eq!(LogLevel::default(), LogLevel::Info);
    }

    #[test]
    fn test_endpoint_substitution() {
        let config = ConnectionConfig::with_token("secret123");
        let terminal = TerminalIdentity::new("mid1", "test-mid1");
        let url = config.endpoint_for(&terminal).unwrap();

        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(pairs.contains(&("mid".to_string(), "mid1".to_string())));
        assert!(pairs.contains(&("tid".to_string(), "test-mid1".to_string())));
        assert!(pairs.contains(&("token".to_string(), "secret123".to_string())));
    }

    #[test]
    fn test_masked_endpoint_never_contains_token() {
        let config = ConnectionConfig::with_token("secret123");
        let terminal = TerminalIdentity::new("mid1", "test-mid1");
        let masked = config.masked_endpoint(&terminal);

        assert!(!masked.contains("secret123"));
        assert!(masked.contains("token=***"));
        assert!(masked.contains("mid=mid1"));
    }

    #[test]
    fn test_placeholder_values_are_encoded() {
        let config = ConnectionConfig::with_token("a&b=c");
        let terminal = TerminalIdentity::new("m 1", "t/1");
        let url = config.endpoint_for(&terminal).unwrap();

        let token = url
            .query_pairs()
            .find(|(k, _)| k == "token")
            .map(|(_, v)| v.into_owned());
        assert_eq!(token.as_deref(), Some("a&b=c"));
    }
}
