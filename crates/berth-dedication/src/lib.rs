//! berth-dedication — exclusive-use grants over the physical hierarchy.
//!
//! Two halves:
//!
//! - **`registry`** — creates and releases dedication records while holding
//!   the single-owner-per-resource invariant across all four hierarchy
//!   levels (upward and downward conflict walks, atomic with the write).
//! - **`resolver`** — turns the record set into a per-request avoid set:
//!   the exact pods, clusters, and hosts an owner may not use in a zone.
//!
//! Both operate on `berth_state::StateStore`; the registry through a write
//! transaction, the resolver through one consistent read snapshot.

pub mod error;
pub mod registry;
pub mod resolver;

pub use error::{DedicationError, DedicationResult};
pub use registry::{DedicationFilter, DedicationRegistry};
pub use resolver::{ConstraintResolver, grants_owner};
