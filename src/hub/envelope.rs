/// Broadcast message format
///
/// Every frame sent to a dashboard client is one `Envelope` serialized as
/// `{"type": "...", "payload": ...}`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::{ContainerStats, SystemSnapshot};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Envelope {
    Stats(SystemSnapshot),
    ContainerStats(ContainerStatsPayload),
}

/// Stats of all containers that answered during one poll cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerStatsPayload {
    pub containers: BTreeMap<String, ContainerStats>,
    /// Unix seconds at which the cycle finished
    pub timestamp: i64,
}

impl Envelope {
    /// Wire discriminant of this envelope
    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Stats(_) => "stats",
            Envelope::ContainerStats(_) => "container_stats",
        }
    }
}
