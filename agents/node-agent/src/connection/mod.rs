//! Connection module
//!
//! This module handles all communication with the cluster manager: the
//! registration document and the engine that delivers it.

pub mod protocol;
pub mod registrar;
