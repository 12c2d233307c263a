//! Agent module
//!
//! Host-side collaborators of the registration engine.

pub mod sampler;
