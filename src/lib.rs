//! Terminal harness
//!
//! Opens one persistent Socket.IO connection per configured payment terminal against a
//! gateway, keeps each alive, reconnects with bounded retries after a drop and reports the
//! fleet's connected set on a fixed interval.

pub mod client;
pub mod common;
pub mod config;
pub mod constants;
pub mod errors;
pub mod events;
pub mod metrics;
pub mod signals;

pub use client::{ConnectTarget, Connector, Fleet, Prober, Session, SessionEvent};
pub use common::{ConnectedSet, SupervisorId, TerminalIdentity};
pub use errors::{HarnessError, Result};
