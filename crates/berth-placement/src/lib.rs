//! berth-placement — the placement pipeline.
//!
//! One placement call flows through three stages, all mutating a single
//! per-request [`berth_core::AvoidSet`] so later stages see earlier
//! exclusions:
//!
//! 1. **affinity chain** — registered [`affinity::AffinityProcessor`]s run
//!    in order; the explicit-dedication processor narrows the request to
//!    the owner's granted resources.
//! 2. **default protection** — a user VM that did not ask for dedication is
//!    kept off every dedicated resource (and off dedicated zones entirely).
//! 3. **strategy chain** — [`strategy::PlacementStrategy`]s run in the
//!    configured order; the first that can handle the request and yields a
//!    destination wins.
//!
//! Capacity ranking comes from outside through
//! [`strategy::CapacityProvider`]; this crate only filters and re-ranks.

pub mod affinity;
pub mod error;
pub mod orchestrator;
pub mod strategy;

pub use affinity::{AffinityProcessor, ExplicitDedicationProcessor};
pub use error::{PlacementError, PlacementResult};
pub use orchestrator::PlacementOrchestrator;
pub use strategy::{
    CapacityProvider, DedicationAwareStrategy, FirstFitStrategy, PlacementStrategy,
    StoreOrderCapacity,
};
