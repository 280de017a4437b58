//! strata-core
//!
//! Pure domain types for the Strata reconciler: resource ids, the per-kind
//! parameter schema, desired and recorded resource state, validation, and the
//! dependency graph builder. No I/O; this is the shared vocabulary of the
//! other crates.

pub mod error;
pub mod graph;
pub mod id;
pub mod models;
pub mod validate;

pub use crate::error::CoreError;
pub use crate::graph::{build_graph, DependencyGraph};
pub use crate::id::{ProviderHandle, ResourceId};
pub use crate::models::drift::FieldDrift;
pub use crate::models::parameters::Parameters;
pub use crate::models::replica::{ReplicaStatus, ScalingPhase};
pub use crate::models::resource::{DesiredState, ResourceKind, ResourceSpec};
pub use crate::models::state::{ResourceState, ResourceStatus};
