/// Generated telemetry for demo mode
///
/// Lets the dashboard run on a machine without Docker: host figures drift
/// around plausible values and a fixed set of containers reports jittered
/// usage on every poll.

use async_trait::async_trait;
use rand::Rng;
use std::time::Instant;

use super::{CollectError, ContainerRef, ContainerStats, ContainerStatsSource, SystemSnapshot, SystemStatsSource};
use crate::utils::percent;

const GIB: u64 = 1024 * 1024 * 1024;
const MIB: u64 = 1024 * 1024;

/// Fake host: 4 cores, 16 GiB memory, 500 GiB disk
pub struct DemoHost {
    started: Instant,
}

impl DemoHost {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    fn generate(&self) -> SystemSnapshot {
        let mut rng = rand::thread_rng();
        let elapsed = self.started.elapsed().as_secs_f64();

        // Oscillates between 15% and 45% with some noise
        let cpu_usage = (30.0 + 15.0 * (elapsed / 10.0).sin() + rng.gen_range(-5.0..5.0))
            .clamp(5.0, 95.0);

        let memory_total = 16 * GIB;
        let memory_used = (10 * GIB).saturating_add_signed(rng.gen_range(-256 * MIB as i64..256 * MIB as i64));

        let disk_total = 500 * GIB;
        let disk_used = 200 * GIB;

        SystemSnapshot {
            cpu_usage,
            cpu_cores: 4,
            memory_used,
            memory_total,
            memory_percent: percent(memory_used, memory_total),
            disk_used,
            disk_total,
            disk_percent: percent(disk_used, disk_total),
            uptime: 86_400 + self.started.elapsed().as_secs(),
            hostname: "debug-server".to_string(),
            os: "linux".to_string(),
            platform: "debian".to_string(),
        }
    }
}

impl Default for DemoHost {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SystemStatsSource for DemoHost {
    async fn snapshot(&self) -> Result<SystemSnapshot, CollectError> {
        Ok(self.generate())
    }
}

/// (id, name, base cpu %, base memory, memory limit)
const DEMO_CONTAINERS: &[(&str, &str, f64, u64, u64)] = &[
    ("a1b2c3d4e5f6", "celeste-frontend", 5.0, 128 * MIB, 512 * MIB),
    ("b2c3d4e5f6a7", "celeste-backend", 10.0, 256 * MIB, 1024 * MIB),
    ("c3d4e5f6a7b8", "prometheus", 7.0, 512 * MIB, 2048 * MIB),
];

/// Fake container runtime with three running containers
#[derive(Default)]
pub struct DemoContainers;

impl DemoContainers {
    pub fn new() -> Self {
        Self
    }

    fn generate(id: &str) -> Option<ContainerStats> {
        let &(_, _, base_cpu, base_memory, memory_limit) =
            DEMO_CONTAINERS.iter().find(|c| c.0 == id)?;
        let mut rng = rand::thread_rng();

        let cpu_percent = (base_cpu + rng.gen_range(-3.0..3.0)).max(0.0);
        let jitter = (base_memory / 10) as i64;
        let memory_usage = base_memory.saturating_add_signed(rng.gen_range(-jitter..jitter));

        Some(ContainerStats {
            cpu_percent,
            memory_usage,
            memory_limit,
            memory_percent: percent(memory_usage, memory_limit),
            network_rx: rng.gen_range(0..1_000_000),
            network_tx: rng.gen_range(0..500_000),
            block_read: rng.gen_range(0..10_000_000),
            block_write: rng.gen_range(0..5_000_000),
        })
    }
}

#[async_trait]
impl ContainerStatsSource for DemoContainers {
    async fn list_running(&self) -> Result<Vec<ContainerRef>, CollectError> {
        Ok(DEMO_CONTAINERS
            .iter()
            .map(|&(id, name, ..)| ContainerRef {
                id: id.to_string(),
                name: name.to_string(),
            })
            .collect())
    }

    async fn container_stats(&self, id: &str) -> Result<ContainerStats, CollectError> {
        Self::generate(id)
            .ok_or_else(|| CollectError::Unavailable(format!("stats for container {}", id)))
    }
}
