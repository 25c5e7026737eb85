use terminal_harness::client::{Fleet, WebSocketConnector};
use terminal_harness::config::{Config, LogLevel};
use terminal_harness::errors::{EXIT_FATAL, EXIT_OK, ErrorContext, Result};
use terminal_harness::events::format::LineFormat;
use terminal_harness::events::{self, Redactor};
use terminal_harness::signals;

use std::process;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{error, info, warn};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() {
    // A missing .env file is not an error
    dotenvy::dotenv().ok();

    let config = match Config::from_args() {
        Ok(config) => config,
        Err(e) => {
            let _ = init_logging(LogLevel::Info);
            error!("{}", e);
            process::exit(e.exit_code());
        }
    };

    if let Err(e) = init_logging(config.log_level) {
        eprintln!("{}", e);
        process::exit(EXIT_FATAL);
    }

    match run(config).await {
        Ok(code) => process::exit(code),
        Err(e) => {
            error!("{}", e);
            process::exit(e.exit_code());
        }
    }
}

/// Main application logic; returns the process exit code
async fn run(config: Config) -> Result<i32> {
    if let Some(raw) = &config.unknown_log_level {
        warn!("Unknown log level '{}', falling back to INFO", raw);
    }

    let terminals = config.load_terminals()?;

    info!("Terminal Harness v{}", env!("CARGO_PKG_VERSION"));
    config.print_summary(terminals.len());
    if !config.connection.ssl_verify {
        warn!("TLS certificate verification is disabled");
    }

    // Before any supervisor starts, so an early SIGINT/SIGTERM still shuts down gracefully
    let shutdown_signal = signals::ShutdownSignal::install()?;
    let connector = Arc::new(WebSocketConnector::new(&config.connection)?);
    let (events, sink) = events::channel(Redactor::new(&config.connection.token));
    let sink_task = sink.spawn();

    info!(
        "Starting Socket.IO clients for {} terminals...",
        terminals.len()
    );
    let started = Instant::now();
    let fleet = Fleet::new(config.connection.clone(), connector, events);
    let metrics = fleet.metrics();
    let result = fleet
        .run(terminals, shutdown_signal.recv())
        .await;

    // Last sender gone: the sink drains and exits
    drop(fleet);
    let _ = sink_task.await;

    let report = result?;
    metrics.print_report(started.elapsed(), report.connected).await;

    if report.all_failed() {
        error!("Every terminal gave up connecting");
        return Ok(EXIT_FATAL);
    }

    info!("All terminals disconnected. Exiting.");
    Ok(EXIT_OK)
}

/// Initialize logging at the configured level; `RUST_LOG` directives are honoured too
fn init_logging(level: LogLevel) -> Result<()> {
    let mut filter = EnvFilter::from_default_env();
    for directive in [
        format!("terminal_harness={}", level.as_directive()),
        "tokio_tungstenite=warn".to_string(),
        "tungstenite=warn".to_string(),
        "rustls=warn".to_string(),
    ] {
        filter = filter.add_directive(
            directive
                .parse::<Directive>()
                .with_config_context(&format!("Invalid filter directive '{}'", directive))?,
        );
    }

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .event_format(LineFormat)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .with_config_context("Failed to set global default subscriber")
}
