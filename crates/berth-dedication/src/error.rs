//! Error types for dedication operations.

use thiserror::Error;

use berth_state::StateError;

/// Result type alias for dedication operations.
pub type DedicationResult<T> = Result<T, DedicationError>;

/// Errors that can occur while creating, releasing, or resolving
/// dedications. All are terminal; nothing here is retried internally.
#[derive(Debug, Error)]
pub enum DedicationError {
    /// Resource, domain, or account does not exist, or the account does not
    /// belong to the given domain.
    #[error("invalid dedication target: {0}")]
    InvalidTarget(String),

    #[error("already dedicated: {0}")]
    AlreadyDedicated(String),

    #[error("not dedicated: {0}")]
    NotDedicated(String),

    /// An ancestor resource is dedicated to an owner the requested owner is
    /// not a descendant of.
    #[error("conflict with ancestor dedication: {0}")]
    ConflictWithAncestor(String),

    /// A descendant resource is dedicated to an owner outside the requested
    /// owner's subtree.
    #[error("conflict with descendant dedication: {0}")]
    ConflictWithDescendant(String),

    #[error("state store error: {0}")]
    State(#[from] StateError),
}
