//! Docker Runtime Module
//!
//! Provides the Docker implementation of the RuntimeAdapter trait.

pub mod adapter;

pub use adapter::DockerClient;
