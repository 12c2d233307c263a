//! Node Agent Library
//!
//! This crate provides the core functionality for the node agent: it reads
//! the local docker daemon's identity and containers and keeps a leased
//! registration of this node alive on the cluster manager.

pub mod agent;
pub mod cli;
pub mod connection;
pub mod error;
pub mod runtime;

// Re-exports for convenience
pub use agent::sampler::{SysinfoSampler, SystemSampler, UnavailableSampler};
pub use cli::config::{Config, DaemonConfig};
pub use connection::protocol::{RegistrationDocument, SystemSnapshot};
pub use connection::registrar::{CycleOutcome, Registrar};
pub use error::{AgentError, TransportKind};
pub use runtime::adapter::{ContainerRecord, RuntimeAdapter, RuntimeInfo};
pub use runtime::cache::CachedValue;
pub use runtime::docker::DockerClient;
