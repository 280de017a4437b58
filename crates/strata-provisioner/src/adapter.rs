use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use strata_core::{Parameters, ProviderHandle, ResourceId, ResourceKind};

use crate::context::ProviderContext;
use crate::error::{AdapterError, ReconcileError};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Boundary to one real infrastructure or orchestrator API, one impl per
/// resource kind.
///
/// Methods return boxed futures for dyn compatibility. Every call receives
/// the explicit [`ProviderContext`]; implementations hold clients, never
/// ambient region or credential state.
pub trait ProviderAdapter: Send + Sync {
    /// The resource kind this adapter manages.
    fn kind(&self) -> ResourceKind;

    /// Create the resource, or converge an existing one to `parameters`.
    /// Returns the provider's handle for it.
    fn create_or_update<'a>(
        &'a self,
        ctx: &'a ProviderContext,
        id: &'a ResourceId,
        parameters: &'a Parameters,
    ) -> BoxFuture<'a, Result<ProviderHandle, AdapterError>>;

    /// Current live parameters. `AdapterError::NotFound` if it is gone.
    fn read<'a>(
        &'a self,
        ctx: &'a ProviderContext,
        handle: &'a ProviderHandle,
    ) -> BoxFuture<'a, Result<Parameters, AdapterError>>;

    /// Tear the resource down. `AdapterError::NotFound` if already gone.
    fn delete<'a>(
        &'a self,
        ctx: &'a ProviderContext,
        handle: &'a ProviderHandle,
    ) -> BoxFuture<'a, Result<(), AdapterError>>;

    /// Change the replica count by `delta`. Workload adapters only.
    fn scale<'a>(
        &'a self,
        _ctx: &'a ProviderContext,
        _handle: &'a ProviderHandle,
        _delta: i64,
    ) -> BoxFuture<'a, Result<(), AdapterError>> {
        let kind = self.kind();
        Box::pin(async move {
            Err(AdapterError::Unsupported {
                kind,
                operation: "scale",
            })
        })
    }
}

/// Adapters by kind.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: BTreeMap<ResourceKind, Arc<dyn ProviderAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own kind, replacing any previous one.
    pub fn register(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.insert(adapter);
        self
    }

    pub fn insert(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.kind(), adapter);
    }

    pub fn get(&self, kind: ResourceKind) -> Result<&Arc<dyn ProviderAdapter>, ReconcileError> {
        self.adapters
            .get(&kind)
            .ok_or(ReconcileError::AdapterMissing(kind))
    }

    pub fn kinds(&self) -> impl Iterator<Item = ResourceKind> + '_ {
        self.adapters.keys().copied()
    }

    /// Fail with the first kind that has no adapter.
    pub fn ensure_covers(
        &self,
        kinds: impl IntoIterator<Item = ResourceKind>,
    ) -> Result<(), ReconcileError> {
        for kind in kinds {
            self.get(kind)?;
        }
        Ok(())
    }
}

/// Run one adapter call under the per-call timeout. Expiry is reported as
/// [`AdapterError::Timeout`] and is handled exactly like any other failure.
pub async fn with_timeout<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, AdapterError>>,
) -> Result<T, AdapterError> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(AdapterError::Timeout(limit)),
    }
}
