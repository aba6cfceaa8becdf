//! berth-core — shared types and configuration for the Berth control plane.
//!
//! Berth places virtual-machine workloads onto a four-level physical
//! hierarchy (zone ⊃ pod ⊃ cluster ⊃ host) while honoring dedication
//! grants: exclusive-use reservations of a resource subtree for a domain
//! or a single account. This crate holds the domain types shared by every
//! other crate in the workspace plus the `berth.toml` engine configuration.

pub mod config;
pub mod types;

pub use config::{EngineConfig, PlacementConfig};
pub use types::*;
