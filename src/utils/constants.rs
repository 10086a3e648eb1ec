/// Constants for the Aperture dashboard backend
///
/// Defaults for the telemetry hub, its producers and the WebSocket sessions.
/// Every value here can be overridden from the config file.

use std::time::Duration;

/// Application name, used for the config directory
pub const APP_NAME: &str = "aperture";

// ============================================================================
// Server
// ============================================================================

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_STATIC_PATH: &str = "./static";

/// Path the WebSocket upgrade is served on
pub const WS_PATH: &str = "/ws";

// ============================================================================
// Hub backpressure policy
// ============================================================================

/// Capacity of each session's outbound queue.
///
/// The hub never waits on a session: when a broadcast finds this queue full
/// the session is treated as unresponsive, evicted from the registry and its
/// queue closed. At the default producer rates this is roughly ten minutes of
/// telemetry a client may fall behind before it is dropped.
pub const SEND_QUEUE_CAPACITY: usize = 256;

/// Capacity of the hub's command mailbox
pub const HUB_MAILBOX_CAPACITY: usize = 64;

// ============================================================================
// Producers
// ============================================================================

pub const SYSTEM_STATS_INTERVAL: Duration = Duration::from_secs(2);
pub const CONTAINER_STATS_INTERVAL: Duration = Duration::from_secs(3);

/// Upper bound for one metric source call (or one container collection cycle)
pub const SOURCE_TIMEOUT: Duration = Duration::from_secs(5);

/// Length of the shortened container identifiers used as payload keys
pub const CONTAINER_ID_LEN: usize = 12;

// ============================================================================
// Sessions
// ============================================================================

/// Keepalive ping period. Must stay below `PONG_WAIT`.
pub const PING_INTERVAL: Duration = Duration::from_secs(54);

/// Read deadline, refreshed by every inbound frame
pub const PONG_WAIT: Duration = Duration::from_secs(60);

/// Deadline for a single outbound write
pub const WRITE_WAIT: Duration = Duration::from_secs(10);

/// Largest inbound message accepted from a client
pub const MAX_MESSAGE_SIZE: usize = 512;
