//! Registrar
//!
//! Publishes this node to the manager as a leased registration. Every cycle
//! rebuilds the registration document from the runtime and the host, then
//! posts it over a keep-alive connection with a small bounded retry for
//! connections the manager resets.

use chrono::Utc;
use reqwest::header::CONTENT_TYPE;
use reqwest::Url;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::agent::sampler::SystemSampler;
use crate::connection::protocol::{RegistrationDocument, SystemSnapshot};
use crate::error::{AgentError, RequestInfo, Result};
use crate::runtime::adapter::RuntimeAdapter;

/// Header carrying the node secret
pub const AUTH_HEADER: &str = "X-Auth-Node";

/// Sends per cycle, counting the first
pub const MAX_ATTEMPTS: u32 = 3;

/// Registration lease, as a multiple of the update interval
const TTL_FACTOR: u32 = 2;

/// Manager request timeout, as a multiple of the update interval
const REQUEST_TIMEOUT_FACTOR: u32 = 20;

/// Result of one registration cycle
#[derive(Debug)]
pub enum CycleOutcome {
    Registered { attempts: u32 },
    /// `attempts` is 0 when the document could not be built
    Failed { attempts: u32, error: AgentError },
}

impl CycleOutcome {
    pub fn is_registered(&self) -> bool {
        matches!(self, CycleOutcome::Registered { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            CycleOutcome::Registered { attempts } | CycleOutcome::Failed { attempts, .. } => {
                *attempts
            }
        }
    }
}

/// Registration engine
///
/// Owns its manager connection exclusively; `update` takes `&mut self`, so
/// there is never more than one registration in flight.
pub struct Registrar<R: RuntimeAdapter, S: SystemSampler> {
    master: String,
    runtime: R,
    sampler: S,
    interval: Duration,
    secret: Option<String>,
    http: Option<reqwest::Client>,
}

impl<R: RuntimeAdapter, S: SystemSampler> Registrar<R, S> {
    /// Create a registrar posting to the manager at `host:port` every `interval`
    pub fn new(
        master: &str,
        runtime: R,
        sampler: S,
        interval: Duration,
        secret: Option<String>,
    ) -> Self {
        Self {
            master: master.to_string(),
            runtime,
            sampler,
            interval,
            secret,
            http: None,
        }
    }

    /// Lease the manager is asked to hold the registration for
    pub fn ttl(&self) -> Duration {
        self.interval.saturating_mul(TTL_FACTOR)
    }

    pub fn request_timeout(&self) -> Duration {
        self.interval.saturating_mul(REQUEST_TIMEOUT_FACTOR)
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn runtime_mut(&mut self) -> &mut R {
        &mut self.runtime
    }

    /// Registration target for the node `id`: `/discovery/nodes/{id}?ttl={secs}`
    pub fn registration_url(&self, id: &str) -> Result<Url> {
        let invalid = || AgentError::Config(format!("invalid manager address: {}", self.master));

        let mut url = Url::parse(&format!("http://{}/", self.master)).map_err(|_| invalid())?;
        url.path_segments_mut()
            .map_err(|_| invalid())?
            .clear()
            .extend(["discovery", "nodes", id]);
        url.query_pairs_mut()
            .append_pair("ttl", &self.ttl().as_secs().to_string());
        Ok(url)
    }

    /// Gather runtime and host state into a fresh registration document
    pub async fn build_document(&mut self) -> Result<RegistrationDocument> {
        let info = self.runtime.info().await?;
        if info.name.is_empty() {
            return Err(AgentError::Config(format!(
                "docker at {} reports an empty node name",
                self.runtime.address()
            )));
        }
        let id = info.name.clone();
        let containers = self.runtime.containers().await?;

        Ok(RegistrationDocument {
            time: Utc::now(),
            id: id.clone(),
            name: id,
            address: self.runtime.address().to_string(),
            containers,
            labels: info.label_map(),
            system: self.sample_system(),
        })
    }

    fn sample_system(&mut self) -> SystemSnapshot {
        match self.sampler.sample() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "System status will be empty");
                SystemSnapshot::default()
            }
        }
    }

    /// Run one registration cycle.
    ///
    /// Never fails: every error is logged here and reported in the outcome.
    pub async fn update(&mut self) -> CycleOutcome {
        let outcome = match self.prepare().await {
            Ok((url, body)) => self.deliver(&url, &body).await,
            Err(error) => CycleOutcome::Failed { attempts: 0, error },
        };

        match &outcome {
            CycleOutcome::Registered { attempts } => {
                debug!(attempts, "Update registration success");
            }
            CycleOutcome::Failed {
                attempts,
                error: error @ AgentError::Unauthorized { .. },
            } => {
                error!(attempts, "Manager rejected node authorization, check the configured secret: {error}");
            }
            CycleOutcome::Failed { attempts, error } => {
                error!(attempts, "Cannot update registration due to {error}");
            }
        }

        outcome
    }

    async fn prepare(&mut self) -> Result<(Url, String)> {
        let document = self.build_document().await?;
        let url = self.registration_url(&document.id)?;
        let body = document.to_json()?;
        debug!(url = %url, payload = %body, "Do registration");
        Ok((url, body))
    }

    /// Post `body`, retrying immediately while the manager resets the connection.
    async fn deliver(&mut self, url: &Url, body: &str) -> CycleOutcome {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.do_register(url, body).await {
                Ok(()) => return CycleOutcome::Registered { attempts },
                Err(error) if error.is_reset() && attempts < MAX_ATTEMPTS => {
                    warn!(attempt = attempts, error = %error, "Manager reset the connection, retrying");
                }
                Err(error) => return CycleOutcome::Failed { attempts, error },
            }
        }
    }

    async fn do_register(&mut self, url: &Url, body: &str) -> Result<()> {
        let request = self.manager_request(url);
        let result = self.post(url, body, &request).await;
        if result.is_err() {
            // the next attempt starts on a fresh connection
            self.http = None;
        }
        result
    }

    async fn post(&mut self, url: &Url, body: &str, request: &RequestInfo) -> Result<()> {
        let http = self.connection(request)?;

        let mut builder = http
            .post(url.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_string());
        if let Some(secret) = &self.secret {
            builder = builder.header(AUTH_HEADER, secret);
        }

        let response = builder
            .send()
            .await
            .map_err(|source| AgentError::transport(source, request.clone()))?;
        let status = response.status();
        let response_body = response
            .text()
            .await
            .map_err(|source| AgentError::transport(source, request.clone()))?;

        if status.is_success() {
            return Ok(());
        }
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(AgentError::Unauthorized {
                request: request.clone(),
                body: response_body,
            });
        }
        Err(AgentError::Protocol {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or_default().to_string(),
            request: request.clone(),
            body: response_body,
        })
    }

    fn manager_request(&self, url: &Url) -> RequestInfo {
        let path = match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        };
        RequestInfo::post(&self.master, &path)
    }

    fn connection(&mut self, request: &RequestInfo) -> Result<reqwest::Client> {
        if let Some(http) = &self.http {
            return Ok(http.clone());
        }

        debug!(master = %self.master, "Opening manager connection");
        let http = reqwest::Client::builder()
            .timeout(self.request_timeout())
            .pool_max_idle_per_host(1)
            .no_proxy()
            .build()
            .map_err(|source| AgentError::transport(source, request.clone()))?;
        self.http = Some(http.clone());
        Ok(http)
    }

    /// Register every interval until `shutdown` resolves
    pub async fn run<F: Future<Output = ()>>(&mut self, shutdown: F) {
        tokio::pin!(shutdown);
        info!(
            master = %self.master,
            interval_secs = self.interval.as_secs(),
            ttl_secs = self.ttl().as_secs(),
            "Starting registration loop"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, stopping registration loop");
                    return;
                }
                _ = self.cycle() => {}
            }
        }
    }

    async fn cycle(&mut self) {
        self.update().await;
        tokio::time::sleep(self.interval).await;
    }
}
