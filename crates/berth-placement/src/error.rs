//! Placement error types.

use thiserror::Error;

use berth_dedication::DedicationError;
use berth_state::StateError;

/// Result type alias for placement operations.
pub type PlacementResult<T> = Result<T, PlacementError>;

/// Errors that can occur while planning a placement.
///
/// `InsufficientCapacity` is the expected, recoverable outcome of an
/// over-constrained request; the caller may retry against another zone.
/// The rest indicate operator mistakes or invalid input.
#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("invalid placement target: {0}")]
    InvalidTarget(String),

    #[error("insufficient capacity: {0}")]
    InsufficientCapacity(String),

    /// A zone-wide dedication rejects workloads that did not request
    /// dedication, no matter who owns the zone.
    #[error("dedicated zone rejects non-dedicated workload: {0}")]
    DedicatedZoneRejectsNonDedicated(String),

    /// The VM asked for explicit dedication in a zone dedicated to a
    /// foreign owner.
    #[error("zone not usable for explicit dedication: {0}")]
    ExplicitDedicationConflict(String),

    #[error("unknown placement strategy in configuration: {0}")]
    UnknownStrategy(String),

    #[error("dedication error: {0}")]
    Dedication(#[from] DedicationError),

    #[error("state store error: {0}")]
    State(#[from] StateError),
}
