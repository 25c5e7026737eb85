//! Metrics collection and reporting for the terminal fleet
//!
//! This module provides:
//! - Per-terminal connection counters
//! - Fleet-wide totals aggregated across all supervisors
//! - The end-of-run summary report

pub mod aggregate;
pub mod reporting;
pub mod terminal;

// Re-export public types for easier access
pub use aggregate::FleetMetrics;
pub use terminal::TerminalMetrics;
