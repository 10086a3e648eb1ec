/// Timer-driven telemetry producers
///
/// Two independent loops poll their metric source and hand the result to the
/// hub. Each loop only holds a `Broadcaster`, never the registry. A cycle is
/// skipped without touching the source while no client is connected.

use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use super::envelope::{ContainerStatsPayload, Envelope};
use super::registry::{Broadcaster, HubError};
use crate::core::{CollectError, ContainerStats, ContainerStatsSource, SystemSnapshot, SystemStatsSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProducerSettings {
    pub system_interval: Duration,
    pub container_interval: Duration,
    /// Bound on one source call, or on a whole container cycle
    pub source_timeout: Duration,
}

/// Result of a single poll cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// No clients connected, source not called
    Idle,
    /// Envelope handed to the hub
    Sent,
    /// Source answered but produced nothing worth sending
    Empty,
    /// Source failed or timed out
    Failed,
    /// The hub is gone; the loop should end
    Stopped,
}

pub struct SystemStatsProducer {
    source: Arc<dyn SystemStatsSource>,
    broadcaster: Broadcaster,
    period: Duration,
    timeout: Duration,
}

impl SystemStatsProducer {
    pub fn new(
        source: Arc<dyn SystemStatsSource>,
        broadcaster: Broadcaster,
        settings: &ProducerSettings,
    ) -> Self {
        Self {
            source,
            broadcaster,
            period: settings.system_interval,
            timeout: settings.source_timeout,
        }
    }

    pub async fn tick(&self) -> TickOutcome {
        if self.broadcaster.active_count() == 0 {
            return TickOutcome::Idle;
        }

        let snapshot = match collect_system_snapshot(self.source.as_ref(), self.timeout).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Error getting system stats: {}", e);
                return TickOutcome::Failed;
            }
        };

        publish(&self.broadcaster, Envelope::Stats(snapshot)).await
    }

    pub async fn run(self) {
        let mut ticker = ticker(self.period);
        loop {
            ticker.tick().await;
            if self.tick().await == TickOutcome::Stopped {
                break;
            }
        }
        debug!("System stats producer stopped");
    }
}

pub struct ContainerStatsProducer {
    source: Arc<dyn ContainerStatsSource>,
    broadcaster: Broadcaster,
    period: Duration,
    timeout: Duration,
}

impl ContainerStatsProducer {
    pub fn new(
        source: Arc<dyn ContainerStatsSource>,
        broadcaster: Broadcaster,
        settings: &ProducerSettings,
    ) -> Self {
        Self {
            source,
            broadcaster,
            period: settings.container_interval,
            timeout: settings.source_timeout,
        }
    }

    pub async fn tick(&self) -> TickOutcome {
        if self.broadcaster.active_count() == 0 {
            return TickOutcome::Idle;
        }

        let stats = match collect_container_stats(self.source.as_ref(), self.timeout).await {
            Ok(stats) => stats,
            Err(e) => {
                warn!("Error listing containers: {}", e);
                return TickOutcome::Failed;
            }
        };

        if stats.is_empty() {
            return TickOutcome::Empty;
        }

        let payload = ContainerStatsPayload {
            containers: stats,
            timestamp: chrono::Utc::now().timestamp(),
        };

        publish(&self.broadcaster, Envelope::ContainerStats(payload)).await
    }

    pub async fn run(self) {
        let mut ticker = ticker(self.period);
        loop {
            ticker.tick().await;
            if self.tick().await == TickOutcome::Stopped {
                break;
            }
        }
        debug!("Container stats producer stopped");
    }
}

/// Read one system snapshot, abandoning the call after `timeout`
pub async fn collect_system_snapshot(
    source: &dyn SystemStatsSource,
    timeout: Duration,
) -> Result<SystemSnapshot, CollectError> {
    time::timeout(timeout, source.snapshot())
        .await
        .map_err(|_| CollectError::Timeout(timeout))?
}

/// One container collection cycle bounded by `timeout`.
///
/// Fails only when the listing fails. Containers whose stats cannot be read
/// in time are left out of the result.
pub async fn collect_container_stats(
    source: &dyn ContainerStatsSource,
    timeout: Duration,
) -> Result<BTreeMap<String, ContainerStats>, CollectError> {
    let deadline = Instant::now() + timeout;

    let containers = time::timeout_at(deadline, source.list_running())
        .await
        .map_err(|_| CollectError::Timeout(timeout))??;

    let fetches = containers.iter().map(|container| async move {
        let result = time::timeout_at(deadline, source.container_stats(&container.id))
            .await
            .map_err(|_| CollectError::Timeout(timeout))
            .and_then(|stats| stats);
        (container, result)
    });

    let mut stats = BTreeMap::new();
    for (container, result) in join_all(fetches).await {
        match result {
            Ok(entry) => {
                stats.insert(container.id.clone(), entry);
            }
            Err(e) => {
                warn!(container = %container.id, name = %container.name, "Error getting container stats: {}", e);
            }
        }
    }

    Ok(stats)
}

/// Start both producers. Without a container source only system stats flow.
pub fn spawn_producers(
    broadcaster: &Broadcaster,
    system: Arc<dyn SystemStatsSource>,
    containers: Option<Arc<dyn ContainerStatsSource>>,
    settings: &ProducerSettings,
) -> Vec<JoinHandle<()>> {
    let mut handles = vec![tokio::spawn(
        SystemStatsProducer::new(system, broadcaster.clone(), settings).run(),
    )];

    if let Some(source) = containers {
        handles.push(tokio::spawn(
            ContainerStatsProducer::new(source, broadcaster.clone(), settings).run(),
        ));
    }

    handles
}

fn ticker(period: Duration) -> time::Interval {
    // First tick one period from now, late ticks are dropped rather than bursted
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

async fn publish(broadcaster: &Broadcaster, envelope: Envelope) -> TickOutcome {
    match broadcaster.broadcast(&envelope).await {
        Ok(()) => TickOutcome::Sent,
        Err(HubError::Stopped) => TickOutcome::Stopped,
        Err(e) => {
            warn!("{}", e);
            TickOutcome::Failed
        }
    }
}
