//! Runtime module
//!
//! Read-only access to the local container runtime: the RuntimeAdapter
//! trait, the Docker client behind it, and the cache both rely on.

pub mod adapter;
pub mod cache;
pub mod docker;
