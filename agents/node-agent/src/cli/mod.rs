//! CLI support module
//!
//! Configuration resolution and service installation for the agent binary.

pub mod config;
pub mod install;
