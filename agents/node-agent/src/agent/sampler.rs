//! System Sampler
//!
//! Collects host CPU, memory, disk and network figures for the
//! registration document.

use std::collections::BTreeMap;
use sysinfo::{Disks, Networks, System};

use crate::connection::protocol::{DiskUsage, MemoryUsage, NetUsage, SystemSnapshot};
use crate::error::{AgentError, Result};

const LOOPBACK: &str = "lo";

/// Source of host metrics.
///
/// Failure means "no metrics this cycle"; callers substitute
/// [`SystemSnapshot::default`].
pub trait SystemSampler: Send {
    fn sample(&mut self) -> Result<SystemSnapshot>;
}

/// Samples the host through the sysinfo crate
pub struct SysinfoSampler {
    system: System,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        // cpu usage is a delta between refreshes, take the baseline now
        system.refresh_cpu_usage();
        Self { system }
    }

    fn disks() -> BTreeMap<String, DiskUsage> {
        Disks::new_with_refreshed_list()
            .list()
            .iter()
            .map(|disk| {
                let total = disk.total_space();
                let used = total.saturating_sub(disk.available_space());
                (
                    disk.mount_point().to_string_lossy().to_string(),
                    DiskUsage {
                        total: total as f64,
                        used: used as f64,
                    },
                )
            })
            .collect()
    }

    fn net() -> BTreeMap<String, NetUsage> {
        Networks::new_with_refreshed_list()
            .list()
            .iter()
            .filter(|(name, _)| name.as_str() != LOOPBACK)
            .map(|(name, data)| {
                (
                    name.clone(),
                    NetUsage {
                        bytes_in: data.total_received() as f64,
                        bytes_out: data.total_transmitted() as f64,
                    },
                )
            })
            .collect()
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemSampler for SysinfoSampler {
    fn sample(&mut self) -> Result<SystemSnapshot> {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            return Err(AgentError::Sampling(format!(
                "sysinfo does not support {}",
                std::env::consts::OS
            )));
        }

        self.system.refresh_cpu_usage();
        self.system.refresh_memory();

        Ok(SystemSnapshot {
            cpu_load: f64::from(self.system.global_cpu_usage()).clamp(0.0, 100.0),
            memory: MemoryUsage {
                total: self.system.total_memory() as f64,
                available: self.system.available_memory() as f64,
                used: self.system.used_memory() as f64,
            },
            disks: Self::disks(),
            net: Self::net(),
        })
    }
}

/// Sampler for hosts where metrics are disabled; always fails
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableSampler;

impl SystemSampler for UnavailableSampler {
    fn sample(&mut self) -> Result<SystemSnapshot> {
        Err(AgentError::Sampling("metrics collection is disabled".to_string()))
    }
}
