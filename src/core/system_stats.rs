/// Host resource snapshot (CPU, memory, root filesystem, host identity)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use sysinfo::{Disks, System};

use super::CollectError;
use crate::utils::percent;

/// Point-in-time read of the host. Serialized as the `stats` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemSnapshot {
    pub cpu_usage: f64,
    pub cpu_cores: usize,
    pub memory_used: u64,
    pub memory_total: u64,
    pub memory_percent: f64,
    pub disk_used: u64,
    pub disk_total: u64,
    pub disk_percent: f64,
    /// Seconds since boot
    pub uptime: u64,
    pub hostname: String,
    pub os: String,
    pub platform: String,
}

/// Source of system snapshots. Returns a fully populated snapshot or an error.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SystemStatsSource: Send + Sync {
    async fn snapshot(&self) -> Result<SystemSnapshot, CollectError>;
}

/// Reads the local host through `sysinfo`.
///
/// The `System` handle is kept between calls: CPU usage is measured against
/// the previous refresh, so each poll reports usage over the last interval.
pub struct HostStats {
    system: Arc<Mutex<System>>,
    disk_mount: PathBuf,
}

impl HostStats {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        system.refresh_memory();

        Self {
            system: Arc::new(Mutex::new(system)),
            disk_mount: PathBuf::from("/"),
        }
    }

    fn collect(system: &mut System, disk_mount: &Path) -> Result<SystemSnapshot, CollectError> {
        system.refresh_cpu();
        system.refresh_memory();

        let cpu_usage = system.global_cpu_info().cpu_usage() as f64;
        let cpu_cores = system
            .physical_core_count()
            .unwrap_or_else(|| system.cpus().len());

        let memory_total = system.total_memory();
        let memory_used = system.used_memory();

        let disks = Disks::new_with_refreshed_list();
        let disk = disks
            .list()
            .iter()
            .find(|d| d.mount_point() == disk_mount)
            .ok_or_else(|| {
                CollectError::Unavailable(format!("filesystem at {}", disk_mount.display()))
            })?;
        let disk_total = disk.total_space();
        let disk_used = disk_total.saturating_sub(disk.available_space());

        let hostname = System::host_name()
            .ok_or_else(|| CollectError::Unavailable("hostname".to_string()))?;

        Ok(SystemSnapshot {
            cpu_usage,
            cpu_cores,
            memory_used,
            memory_total,
            memory_percent: percent(memory_used, memory_total),
            disk_used,
            disk_total,
            disk_percent: percent(disk_used, disk_total),
            uptime: System::uptime(),
            hostname,
            os: std::env::consts::OS.to_string(),
            platform: System::distribution_id(),
        })
    }
}

impl Default for HostStats {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SystemStatsSource for HostStats {
    async fn snapshot(&self) -> Result<SystemSnapshot, CollectError> {
        let system = Arc::clone(&self.system);
        let disk_mount = self.disk_mount.clone();

        // sysinfo reads procfs synchronously
        tokio::task::spawn_blocking(move || {
            let mut system = system
                .lock()
                .map_err(|_| CollectError::Unavailable("system probe".to_string()))?;
            Self::collect(&mut system, &disk_mount)
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camel_case_keys() {
        let snapshot = SystemSnapshot {
            cpu_usage: 12.5,
            cpu_cores: 8,
            memory_used: 4,
            memory_total: 16,
            memory_percent: 25.0,
            disk_used: 1,
            disk_total: 2,
            disk_percent: 50.0,
            uptime: 3600,
            hostname: "nas".to_string(),
            os: "linux".to_string(),
            platform: "debian".to_string(),
        };

        let value = serde_json::to_value(&snapshot).unwrap();
        let mut keys: Vec<&str> = value.as_object().unwrap().keys().map(|k| k.as_str()).collect();
        keys.sort_unstable();

        assert_eq!(
            keys,
            vec![
                "cpuCores",
                "cpuUsage",
                "diskPercent",
                "diskTotal",
                "diskUsed",
                "hostname",
                "memoryPercent",
                "memoryTotal",
                "memoryUsed",
                "os",
                "platform",
                "uptime",
            ]
        );
    }

    #[tokio::test]
    async fn test_host_snapshot() {
        // Hosts without a root mount (some sandboxes) report Unavailable
        match HostStats::new().snapshot().await {
            Ok(snapshot) => {
                assert!(snapshot.memory_total > 0);
                assert!(snapshot.memory_used <= snapshot.memory_total);
                assert!(snapshot.disk_used <= snapshot.disk_total);
                assert!((0.0..=100.0).contains(&snapshot.memory_percent));
                assert_eq!(snapshot.os, std::env::consts::OS);
            }
            Err(e) => assert!(matches!(e, CollectError::Unavailable(_))),
        }
    }
}
