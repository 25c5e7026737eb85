//! Application-wide constants

use std::time::Duration;

// Fleet limits
pub const MAX_TERMINALS_LIMIT: usize = 10_000;

// Graceful close of one connection is bounded separately from the shutdown grace period
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

// Channel sizes
pub const OUTBOUND_BUFFER_SIZE: usize = 32;
pub const INBOUND_BUFFER_SIZE: usize = 256;

// Redaction marker used wherever the token would otherwise be rendered
pub const REDACTED: &str = "***";

// Engine.IO defaults used until the server's OPEN packet says otherwise
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(25);
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(20);

// Socket.IO event name for the application keep-alive probe
pub const KEEPALIVE_EVENT: &str = "keepalive";

pub const DEFAULT_ENDPOINT_TEMPLATE: &str = "wss://api-terminal-gateway.tillpayments.dev/socket.io/?EIO=4&transport=websocket&tid={tid}&mid={mid}&token={token}";
pub const DEFAULT_TERMINALS_FILE: &str = "terminals.csv";
