//! Configuration validation logic

use super::{Config, ConnectionConfig};
use crate::common::TerminalIdentity;
use crate::constants::MAX_TERMINALS_LIMIT;
use crate::errors::{HarnessError, Result};
use url::Url;

/// Validate the configuration
pub fn validate(config: &Config) -> Result<()> {
    validate_connection(&config.connection)
}

/// Validate the connection settings
pub fn validate_connection(connection: &ConnectionConfig) -> Result<()> {
    validate_token(connection)?;
    validate_endpoint(connection)?;
    validate_retry(connection)?;
    validate_intervals(connection)?;
    Ok(())
}

fn validate_token(connection: &ConnectionConfig) -> Result<()> {
    if connection.token.trim().is_empty() {
        return Err(HarnessError::config("Token must not be empty"));
    }
    Ok(())
}

/// Validate the endpoint template
fn validate_endpoint(connection: &ConnectionConfig) -> Result<()> {
    let template = &connection.endpoint_url_template;

    for placeholder in ["{mid}", "{tid}", "{token}"] {
        if !template.contains(placeholder) {
            return Err(HarnessError::config(format!(
                "Endpoint template must contain the {} placeholder",
                placeholder
            )));
        }
    }

    let probe = TerminalIdentity::new("mid", "tid");
    let masked = connection.masked_endpoint(&probe);
    let url = Url::parse(&masked).map_err(|e| {
        HarnessError::config(format!("Invalid endpoint template '{}': {}", masked, e))
    })?;

    match url.scheme() {
        "ws" | "wss" => Ok(()),
        scheme => Err(HarnessError::config(format!(
            "Invalid endpoint scheme '{}'. Only 'ws' and 'wss' are supported",
            scheme
        ))),
    }
}

fn validate_retry(connection: &ConnectionConfig) -> Result<()> {
    if connection.max_retry_attempts == 0 {
        return Err(HarnessError::config(
            "Max retry attempts must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_intervals(connection: &ConnectionConfig) -> Result<()> {
    let intervals = [
        ("Connect timeout", connection.connect_timeout),
        ("Status interval", connection.status_interval),
        ("Keep-alive interval", connection.keepalive_interval),
        ("Shutdown grace", connection.shutdown_grace),
    ];

    for (name, value) in intervals {
        if value.is_zero() {
            return Err(HarnessError::config(format!(
                "{} must be greater than 0",
                name
            )));
        }
    }
    Ok(())
}

/// Validate the terminal list handed over by the loader
pub fn validate_terminals(terminals: &[TerminalIdentity]) -> Result<()> {
    if terminals.is_empty() {
        return Err(HarnessError::config("No terminals found in terminal list"));
    }

    if terminals.len() > MAX_TERMINALS_LIMIT {
        return Err(HarnessError::config(format!(
            "Number of terminals cannot exceed {}",
            MAX_TERMINALS_LIMIT
        )));
    }

    Ok(())
}
