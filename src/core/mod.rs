/// Metric source adapters
///
/// The telemetry hub reads the host and the container runtime only through
/// the two traits exported here, so production probes and the generated demo
/// data are interchangeable.

pub mod docker;
pub mod demo;
pub mod system_stats;

use std::time::Duration;

pub use docker::{ContainerRef, ContainerStats, ContainerStatsSource, DockerManager};
pub use demo::{DemoContainers, DemoHost};
pub use system_stats::{HostStats, SystemSnapshot, SystemStatsSource};

/// Failure reading a metric source
#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    #[error("Docker API error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0} unavailable")]
    Unavailable(String),

    #[error("collector task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
