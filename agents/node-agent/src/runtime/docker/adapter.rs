//! Docker Adapter
//!
//! Implementation of RuntimeAdapter for a Docker daemon reached over TCP
//! using the bollard library.

use async_trait::async_trait;
use bollard::container::ListContainersOptions;
use bollard::service::{ContainerSummary, SystemInfo};
use bollard::Docker;
use std::time::Duration;
use tracing::{debug, error};

use crate::error::{AgentError, RequestInfo, Result};
use crate::runtime::adapter::{container_name, ContainerRecord, RuntimeAdapter, RuntimeInfo};
use crate::runtime::cache::CachedValue;

pub const INFO_PATH: &str = "/info";
pub const CONTAINERS_PATH: &str = "/containers/json?all=true";

/// How long daemon info and the container list are served from cache
pub const CACHE_TTL: Duration = Duration::from_secs(600);

/// Per-request deadline, connect included
const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Docker runtime client
///
/// Holds one keep-alive connection to the daemon, opened on first use and
/// dropped after any transport failure.
pub struct DockerClient {
    address: String,
    client: Option<Docker>,
    info: CachedValue<RuntimeInfo>,
    containers: CachedValue<Vec<ContainerRecord>>,
    id: Option<String>,
}

impl DockerClient {
    /// Create a client for the daemon at `host:port`
    pub fn new(address: &str) -> Self {
        Self::with_cache_ttl(address, CACHE_TTL)
    }

    pub fn with_cache_ttl(address: &str, ttl: Duration) -> Self {
        Self {
            address: address.to_string(),
            client: None,
            info: CachedValue::new(ttl),
            containers: CachedValue::new(ttl),
            id: None,
        }
    }

    /// Whether a connection is currently held open
    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    /// Daemon ID with colon separators removed, computed once per process
    pub async fn id(&mut self) -> Result<String> {
        if let Some(id) = &self.id {
            return Ok(id.clone());
        }
        let id = self.info().await?.id.replace(':', "");
        self.id = Some(id.clone());
        Ok(id)
    }

    fn connection(&mut self, request: &RequestInfo) -> Result<Docker> {
        if let Some(client) = &self.client {
            return Ok(client.clone());
        }

        debug!(docker = %self.address, "Opening docker connection");
        let client = Docker::connect_with_http(
            &format!("tcp://{}", self.address),
            REQUEST_TIMEOUT_SECS,
            bollard::API_DEFAULT_VERSION,
        )
        .map_err(|e| AgentError::docker(e, request.clone()))?;
        self.client = Some(client.clone());
        Ok(client)
    }

    fn disconnect_on_transport_error(&mut self, err: &AgentError) {
        if err.transport_kind().is_some() {
            self.client = None;
        }
    }
}

/// Log a failed daemon call and map it onto the agent taxonomy.
fn docker_failure(err: bollard::errors::Error, request: RequestInfo) -> AgentError {
    let err = AgentError::docker(err, request);
    match &err {
        AgentError::Transport { .. } => error!(error = %err, "Can not connect to docker"),
        AgentError::Decode { .. } => error!(error = %err, "Can not read docker response"),
        _ => {}
    }
    err
}

impl From<SystemInfo> for RuntimeInfo {
    fn from(info: SystemInfo) -> Self {
        Self {
            id: info.id.unwrap_or_default(),
            name: info.name.unwrap_or_default(),
            labels: info.labels.unwrap_or_default(),
        }
    }
}

impl From<ContainerSummary> for ContainerRecord {
    fn from(container: ContainerSummary) -> Self {
        Self {
            id: container.id.unwrap_or_default(),
            name: container_name(&container.names.unwrap_or_default()),
            image: container.image.unwrap_or_default(),
            labels: container.labels.unwrap_or_default().into_iter().collect(),
        }
    }
}

#[async_trait]
impl RuntimeAdapter for DockerClient {
    fn address(&self) -> &str {
        &self.address
    }

    async fn info(&mut self) -> Result<RuntimeInfo> {
        let request = RequestInfo::get(&self.address, INFO_PATH);
        let client = self.connection(&request)?;

        let loaded = self
            .info
            .get(move || async move {
                let info = client
                    .info()
                    .await
                    .map_err(|e| docker_failure(e, request))?;
                Ok::<_, AgentError>(RuntimeInfo::from(info))
            })
            .await
            .cloned();

        if let Err(err) = &loaded {
            self.disconnect_on_transport_error(err);
        }
        loaded
    }

    async fn containers(&mut self) -> Result<Vec<ContainerRecord>> {
        let request = RequestInfo::get(&self.address, CONTAINERS_PATH);
        let client = self.connection(&request)?;

        let loaded = self
            .containers
            .get(move || async move {
                let options = ListContainersOptions::<String> {
                    all: true,
                    ..Default::default()
                };
                let containers = client
                    .list_containers(Some(options))
                    .await
                    .map_err(|e| docker_failure(e, request))?;
                Ok::<_, AgentError>(containers.into_iter().map(ContainerRecord::from).collect())
            })
            .await
            .cloned();

        if let Err(err) = &loaded {
            self.disconnect_on_transport_error(err);
        }
        loaded
    }
}
