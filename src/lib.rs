//! Fog of war exploration game library
//!
//! Re-exports modules for use by binaries and tools.

pub mod auth;
pub mod config;
pub mod fog;
pub mod game;
pub mod geo;
pub mod revealed;
pub mod sampler;
pub mod scheduler;
pub mod scoring;
pub mod snapshot;
pub mod sync;
