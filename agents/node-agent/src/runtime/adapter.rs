//! Runtime Adapter Trait
//!
//! Defines the read-only view of the local container runtime that the
//! registration engine consumes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::connection::protocol::parse_labels;
use crate::error::Result;

/// Identity of the local container host
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RuntimeInfo {
    pub id: String,
    /// Also used as the node identifier towards the manager
    pub name: String,
    /// Raw `key=value` labels as reported by the daemon
    pub labels: Vec<String>,
}

impl RuntimeInfo {
    /// Daemon labels as a mapping.
    pub fn label_map(&self) -> BTreeMap<String, String> {
        parse_labels(&self.labels)
    }
}

/// Minimal projection of a container, as published to the manager
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub id: String,
    pub name: String,
    pub image: String,
    pub labels: BTreeMap<String, String>,
}

/// Container name from the runtime's name list.
///
/// Names look like `/nodename/containername` or `/containername`; only the
/// trailing segment of the first entry is kept.
pub fn container_name<S: AsRef<str>>(names: &[S]) -> String {
    names
        .first()
        .and_then(|name| name.as_ref().rsplit('/').next())
        .unwrap_or_default()
        .to_string()
}

/// Runtime adapter trait - what the agent needs to know about the local runtime
#[async_trait]
pub trait RuntimeAdapter: Send {
    /// `host:port` the runtime is reached at
    fn address(&self) -> &str;

    /// Daemon identity
    async fn info(&mut self) -> Result<RuntimeInfo>;

    /// All containers, running or not
    async fn containers(&mut self) -> Result<Vec<ContainerRecord>>;
}
