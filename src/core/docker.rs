/// Docker integration for container telemetry
///
/// Lists running containers and reads one-shot resource stats per container

use anyhow::{Context, Result};
use async_trait::async_trait;
use bollard::container::{ListContainersOptions, Stats, StatsOptions};
use bollard::Docker;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use super::CollectError;
use crate::utils::{percent, short_container_id};

/// A running container as returned by the listing call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRef {
    /// Shortened runtime id, used as the payload key
    pub id: String,
    pub name: String,
}

/// Resource usage of one container. One entry of the `container_stats` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStats {
    pub cpu_percent: f64,
    pub memory_usage: u64,
    pub memory_limit: u64,
    pub memory_percent: f64,
    pub network_rx: u64,
    pub network_tx: u64,
    pub block_read: u64,
    pub block_write: u64,
}

/// Read-only view of the container runtime used by the container producer
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContainerStatsSource: Send + Sync {
    async fn list_running(&self) -> Result<Vec<ContainerRef>, CollectError>;

    async fn container_stats(&self, id: &str) -> Result<ContainerStats, CollectError>;
}

#[derive(Clone)]
pub struct DockerManager {
    docker: Docker,
}

impl DockerManager {
    /// Connect to the local Docker daemon (socket or DOCKER_HOST)
    pub fn new() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .context("Failed to connect to Docker daemon. Is Docker running?")?;

        Ok(Self { docker })
    }
}

#[async_trait]
impl ContainerStatsSource for DockerManager {
    async fn list_running(&self) -> Result<Vec<ContainerRef>, CollectError> {
        let options = Some(ListContainersOptions::<String> {
            all: false,
            ..Default::default()
        });

        let containers = self.docker.list_containers(options).await?;

        Ok(containers
            .into_iter()
            .filter_map(|c| {
                let id = c.id?;
                let name = c
                    .names
                    .and_then(|names| names.into_iter().next())
                    .map(|n| n.trim_start_matches('/').to_string())
                    .unwrap_or_default();

                Some(ContainerRef {
                    id: short_container_id(&id),
                    name,
                })
            })
            .collect())
    }

    async fn container_stats(&self, id: &str) -> Result<ContainerStats, CollectError> {
        // stream=false waits for a second sample so precpu_stats is populated
        let mut stats_stream = self.docker.stats(
            id,
            Some(StatsOptions {
                stream: false,
                one_shot: false,
            }),
        );

        match stats_stream.next().await {
            Some(stats) => Ok(summarize_stats(&stats?)),
            None => Err(CollectError::Unavailable(format!("stats for container {}", id))),
        }
    }
}

/// Reduce a raw Docker stats sample to the dashboard fields
fn summarize_stats(stats: &Stats) -> ContainerStats {
    let cpu_delta = stats
        .cpu_stats
        .cpu_usage
        .total_usage
        .saturating_sub(stats.precpu_stats.cpu_usage.total_usage);
    let system_delta = stats
        .cpu_stats
        .system_cpu_usage
        .unwrap_or(0)
        .saturating_sub(stats.precpu_stats.system_cpu_usage.unwrap_or(0));
    let num_cpus = stats
        .cpu_stats
        .online_cpus
        .or_else(|| {
            stats
                .cpu_stats
                .cpu_usage
                .percpu_usage
                .as_ref()
                .map(|per_cpu| per_cpu.len() as u64)
        })
        .unwrap_or(1);

    let memory_usage = stats.memory_stats.usage.unwrap_or(0);
    let memory_limit = stats.memory_stats.limit.unwrap_or(0);

    let (network_rx, network_tx) = stats
        .networks
        .as_ref()
        .map(|networks| {
            networks.values().fold((0u64, 0u64), |(rx, tx), net| {
                (rx + net.rx_bytes, tx + net.tx_bytes)
            })
        })
        .unwrap_or((0, 0));

    let (block_read, block_write) = stats
        .blkio_stats
        .io_service_bytes_recursive
        .as_ref()
        .map(|entries| {
            entries.iter().fold((0u64, 0u64), |(read, write), entry| {
                if entry.op.eq_ignore_ascii_case("read") {
                    (read + entry.value, write)
                } else if entry.op.eq_ignore_ascii_case("write") {
                    (read, write + entry.value)
                } else {
                    (read, write)
                }
            })
        })
        .unwrap_or((0, 0));

    ContainerStats {
        cpu_percent: cpu_percent(cpu_delta, system_delta, num_cpus),
        memory_usage,
        memory_limit,
        memory_percent: percent(memory_usage, memory_limit),
        network_rx,
        network_tx,
        block_read,
        block_write,
    }
}

/// CPU share over the sampling window, scaled to the number of online CPUs
pub fn cpu_percent(cpu_delta: u64, system_delta: u64, num_cpus: u64) -> f64 {
    if cpu_delta == 0 || system_delta == 0 {
        return 0.0;
    }

    (cpu_delta as f64 / system_delta as f64) * num_cpus as f64 * 100.0
}
