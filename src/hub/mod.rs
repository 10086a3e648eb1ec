/// Real-time telemetry broadcast hub
///
/// Producers poll the host and the container runtime, the hub fans every
/// envelope out to all connected sessions, and each session writes to its
/// own WebSocket.

pub mod envelope;
pub mod producer;
pub mod registry;
pub mod session;

pub use envelope::{ContainerStatsPayload, Envelope};
pub use producer::{collect_container_stats, collect_system_snapshot, spawn_producers, ContainerStatsProducer, ProducerSettings, SystemStatsProducer, TickOutcome};
pub use registry::{Broadcaster, Frame, Hub, HubError, SessionHandle, SessionId};
pub use session::{Session, SessionEnd, SessionSettings, SessionState};
