//! strata-provisioner
//!
//! Reconciliation engine for declared infrastructure and workloads, driven
//! through per-kind provider adapters.
//!
//! Public API (see [`Reconciler`]):
//! - `plan()`: diff desired specs against recorded state, no provider calls
//! - `apply()`: execute a plan in dependency order, flushing state after
//!   each operation and halting on the first failure
//! - `plan_destroy()` / `destroy()`: teardown in reverse dependency order
//! - `detect_drift()`: compare live state with last-applied state
//! - `tick()`: one level-triggered replica scaling pass
//! - `spawn_loops()`: run drift detection and scaling periodically

pub mod adapter;
pub mod config;
pub mod context;
pub mod drift;
pub mod engine;
pub mod error;
pub mod plan;
pub mod reconciler;
pub mod sandbox;
pub mod scaling;

pub use crate::adapter::{AdapterRegistry, BoxFuture, ProviderAdapter};
pub use crate::config::{EngineSettings, StateSettings, StrataConfig};
pub use crate::context::{CredentialSource, ProviderContext};
pub use crate::drift::{DriftDetector, DriftReport};
pub use crate::engine::{Engine, ExecutionReport, OperationOutcome, OperationResult};
pub use crate::error::{AdapterError, ConfigError, ReconcileError};
pub use crate::plan::{Cause, DependentPolicy, DestroyTarget, Operation, Plan, PlanEntry};
pub use crate::reconciler::Reconciler;
pub use crate::sandbox::{CallKind, SandboxAdapter, SandboxCloud};
pub use crate::scaling::{DesiredReplicas, ScalingController, TickAction, TickOutcome};
