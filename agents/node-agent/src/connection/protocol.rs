//! Registration Protocol
//!
//! Defines the document the agent posts to the manager on every
//! registration cycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::runtime::adapter::ContainerRecord;

/// Registration payload, built fresh for every cycle and never stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationDocument {
    pub time: DateTime<Utc>,
    pub id: String,
    pub name: String,
    /// `host:port` of the local runtime
    pub address: String,
    pub containers: Vec<ContainerRecord>,
    pub labels: BTreeMap<String, String>,
    pub system: SystemSnapshot,
}

impl RegistrationDocument {
    /// Serialize the document to JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Point-in-time host metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemSnapshot {
    /// CPU load in percent, 0..=100
    pub cpu_load: f64,
    pub memory: MemoryUsage,
    /// Usage per mount point
    pub disks: BTreeMap<String, DiskUsage>,
    /// Counters per network interface
    pub net: BTreeMap<String, NetUsage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MemoryUsage {
    pub total: f64,
    pub available: f64,
    pub used: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DiskUsage {
    pub total: f64,
    pub used: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetUsage {
    pub bytes_in: f64,
    pub bytes_out: f64,
}

/// Zeroed snapshot sent when metrics cannot be sampled.
impl Default for SystemSnapshot {
    fn default() -> Self {
        let disks = ["/", "/home"]
            .into_iter()
            .map(|mount| (mount.to_string(), DiskUsage::default()))
            .collect();

        Self {
            cpu_load: 0.0,
            memory: MemoryUsage::default(),
            disks,
            net: BTreeMap::new(),
        }
    }
}

/// Parse `key=value` label strings into a mapping.
///
/// The split happens at the first `=`; an entry without one maps to an empty value.
pub fn parse_labels<S: AsRef<str>>(labels: &[S]) -> BTreeMap<String, String> {
    labels
        .iter()
        .map(|label| {
            let label = label.as_ref();
            match label.split_once('=') {
                Some((key, value)) => (key.to_string(), value.to_string()),
                None => (label.to_string(), String::new()),
            }
        })
        .collect()
}
