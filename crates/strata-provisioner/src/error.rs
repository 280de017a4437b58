use std::time::Duration;

use strata_core::{CoreError, ResourceId, ResourceKind};
use strata_storage::StorageError;
use thiserror::Error;

use crate::engine::ExecutionReport;
use crate::plan::Operation;

/// Failure of a single provider adapter call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    /// The provider has no such resource. Success for a delete, an error
    /// everywhere else.
    #[error("resource not found at provider")]
    NotFound,

    #[error("{0}")]
    Failed(String),

    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),

    #[error("{operation} is not supported for {kind} resources")]
    Unsupported {
        kind: ResourceKind,
        operation: &'static str,
    },
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Plan-time rejection of the desired state. Nothing was applied.
    #[error("invalid desired state: {0}")]
    Invalid(#[from] CoreError),

    #[error("no provider adapter registered for {0} resources")]
    AdapterMissing(ResourceKind),

    #[error("{id} is recorded as a {recorded} but desired as a {desired}; destroy it first")]
    KindChanged {
        id: ResourceId,
        recorded: ResourceKind,
        desired: ResourceKind,
    },

    #[error("cannot destroy {target}: dependents still present: {}", join_ids(.dependents))]
    DependentsStillApplied {
        target: ResourceId,
        dependents: Vec<ResourceId>,
    },

    #[error("teardown plan contains a {operation} for {id}")]
    NotATeardownPlan { id: ResourceId, operation: Operation },

    /// An adapter call failed; the rest of the plan was abandoned.
    #[error("{operation} of {resource} failed: {error}")]
    Halted {
        resource: ResourceId,
        operation: Operation,
        error: AdapterError,
        report: Box<ExecutionReport>,
    },

    #[error("plan execution cancelled after {} operations", .report.completed())]
    Cancelled { report: Box<ExecutionReport> },

    /// The operation went through at the provider but the state snapshot
    /// could not be flushed; execution stops so nothing runs unrecorded.
    #[error("state persistence failed: {source}")]
    Persistence {
        #[source]
        source: StorageError,
        report: Box<ExecutionReport>,
    },

    #[error("state error: {0}")]
    Storage(#[from] StorageError),
}

impl ReconcileError {
    /// Partial execution result, for errors raised while a plan was running.
    pub fn report(&self) -> Option<&ExecutionReport> {
        match self {
            Self::Halted { report, .. }
            | Self::Cancelled { report }
            | Self::Persistence { report, .. } => Some(report),
            _ => None,
        }
    }
}

/// Configuration file problems.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no config directory found")]
    NoConfigDir,

    #[error("failed to read config at {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("config_version {found} is newer than this build supports ({supported})")]
    TooNew { found: u32, supported: u32 },

    #[error("config is not a JSON object")]
    NotAnObject,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn join_ids(ids: &[ResourceId]) -> String {
    ids.iter()
        .map(ResourceId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
