//! In-memory cloud and orchestrator implementing the adapter contract for
//! every resource kind.
//!
//! Every call is journaled before faults are applied, so a failed or hung
//! call still shows up. Out-of-band helpers change the simulated world
//! behind the reconciler's back to produce drift and replica skew.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use strata_core::{Parameters, ProviderHandle, ResourceId, ResourceKind};

use crate::adapter::{AdapterRegistry, BoxFuture, ProviderAdapter};
use crate::context::ProviderContext;
use crate::error::AdapterError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CallKind {
    CreateOrUpdate,
    Read,
    Delete,
    Scale,
}

impl CallKind {
    /// Calls that change the world.
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Self::Read)
    }
}

impl fmt::Display for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::CreateOrUpdate => "create_or_update",
            Self::Read => "read",
            Self::Delete => "delete",
            Self::Scale => "scale",
        })
    }
}

/// One journaled adapter call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub kind: ResourceKind,
    pub op: CallKind,
    /// `None` for handles the sandbox never issued.
    pub id: Option<ResourceId>,
    pub handle: Option<ProviderHandle>,
    pub delta: Option<i64>,
}

#[derive(Debug, Clone)]
enum Fault {
    Fail { message: String, remaining: Option<u32> },
    Hang,
}

#[derive(Debug)]
struct Entry {
    kind: ResourceKind,
    parameters: Parameters,
}

#[derive(Debug, Default)]
struct World {
    resources: BTreeMap<ResourceId, Entry>,
    /// Every handle ever issued, so calls on deleted resources can still be
    /// attributed.
    issued: BTreeMap<ProviderHandle, ResourceId>,
    journal: Vec<Call>,
    faults: BTreeMap<(ResourceId, CallKind), Fault>,
}

impl World {
    /// Consume one use of the fault armed for `(id, op)`, if any.
    fn trip(&mut self, id: &ResourceId, op: CallKind) -> Option<Fault> {
        let key = (id.clone(), op);
        let fault = self.faults.get_mut(&key)?;
        let tripped = fault.clone();
        if let Fault::Fail {
            remaining: Some(n), ..
        } = fault
        {
            *n -= 1;
            if *n == 0 {
                self.faults.remove(&key);
            }
        }
        Some(tripped)
    }
}

/// Shared simulated provider. Cheap to clone; all clones see one world.
#[derive(Debug, Clone, Default)]
pub struct SandboxCloud {
    world: Arc<Mutex<World>>,
}

impl SandboxCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with a sandbox adapter for every kind.
    pub fn registry(&self) -> AdapterRegistry {
        ResourceKind::ALL
            .iter()
            .fold(AdapterRegistry::new(), |registry, kind| {
                registry.register(Arc::new(self.adapter(*kind)))
            })
    }

    pub fn adapter(&self, kind: ResourceKind) -> SandboxAdapter {
        SandboxAdapter {
            kind,
            cloud: self.clone(),
        }
    }

    pub fn handle_for(kind: ResourceKind, id: &ResourceId) -> ProviderHandle {
        ProviderHandle::new(format!("sbx-{kind}-{id}"))
    }

    // Fault injection

    /// Fail the next `op` call for `id`.
    pub fn fail_next(&self, id: &ResourceId, op: CallKind, message: impl Into<String>) {
        self.arm(id, op, Fault::Fail {
            message: message.into(),
            remaining: Some(1),
        });
    }

    pub fn fail_always(&self, id: &ResourceId, op: CallKind, message: impl Into<String>) {
        self.arm(id, op, Fault::Fail {
            message: message.into(),
            remaining: None,
        });
    }

    /// Make every `op` call for `id` hang forever.
    pub fn hang(&self, id: &ResourceId, op: CallKind) {
        self.arm(id, op, Fault::Hang);
    }

    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    // Out-of-band changes

    /// Edit a resource's live parameters directly. Returns `false` if the
    /// sandbox has no such resource.
    pub fn tamper(&self, id: &ResourceId, edit: impl FnOnce(&mut Parameters)) -> bool {
        match self.lock().resources.get_mut(id) {
            Some(entry) => {
                edit(&mut entry.parameters);
                true
            }
            None => false,
        }
    }

    /// Override the replica count the orchestrator reports for a workload.
    pub fn set_observed_replicas(&self, id: &ResourceId, replicas: u32) -> bool {
        self.tamper(id, |parameters| {
            if let Parameters::Workload(w) = parameters {
                w.replicas = replicas;
            }
        })
    }

    pub fn remove_out_of_band(&self, id: &ResourceId) -> bool {
        self.lock().resources.remove(id).is_some()
    }

    /// Seed a resource the reconciler never created.
    pub fn insert_out_of_band(&self, id: ResourceId, parameters: Parameters) -> ProviderHandle {
        let kind = parameters.kind();
        let handle = Self::handle_for(kind, &id);
        let mut world = self.lock();
        world.issued.insert(handle.clone(), id.clone());
        world.resources.insert(id, Entry { kind, parameters });
        handle
    }

    // Inspection

    pub fn parameters(&self, id: &ResourceId) -> Option<Parameters> {
        self.lock().resources.get(id).map(|e| e.parameters.clone())
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.lock().resources.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().resources.is_empty()
    }

    pub fn journal(&self) -> Vec<Call> {
        self.lock().journal.clone()
    }

    pub fn calls(&self, op: CallKind) -> Vec<Call> {
        self.lock()
            .journal
            .iter()
            .filter(|c| c.op == op)
            .cloned()
            .collect()
    }

    pub fn mutating_calls(&self) -> Vec<Call> {
        self.lock()
            .journal
            .iter()
            .filter(|c| c.op.is_mutating())
            .cloned()
            .collect()
    }

    /// Ids of journaled calls of `op`, in call order.
    pub fn call_ids(&self, op: CallKind) -> Vec<ResourceId> {
        self.calls(op).into_iter().filter_map(|c| c.id).collect()
    }

    pub fn clear_journal(&self) {
        self.lock().journal.clear();
    }

    fn arm(&self, id: &ResourceId, op: CallKind, fault: Fault) {
        self.lock().faults.insert((id.clone(), op), fault);
    }

    fn lock(&self) -> MutexGuard<'_, World> {
        self.world.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Journal the call, then apply any armed fault. The world lock is
    /// released before any await.
    async fn enter(&self, call: Call) -> Result<(), AdapterError> {
        let fault = {
            let mut world = self.lock();
            let fault = call.id.as_ref().and_then(|id| world.trip(id, call.op));
            world.journal.push(call);
            fault
        };
        match fault {
            Some(Fault::Fail { message, .. }) => Err(AdapterError::Failed(message)),
            Some(Fault::Hang) => std::future::pending().await,
            None => {
                // Every real provider call suspends at least once.
                tokio::task::yield_now().await;
                Ok(())
            }
        }
    }

    fn resolve(&self, handle: &ProviderHandle) -> Option<ResourceId> {
        self.lock().issued.get(handle).cloned()
    }

    async fn create_or_update(
        &self,
        kind: ResourceKind,
        id: &ResourceId,
        parameters: &Parameters,
    ) -> Result<ProviderHandle, AdapterError> {
        self.enter(Call {
            kind,
            op: CallKind::CreateOrUpdate,
            id: Some(id.clone()),
            handle: None,
            delta: None,
        })
        .await?;

        if parameters.kind() != kind {
            return Err(AdapterError::Failed(format!(
                "{kind} adapter received {} parameters",
                parameters.kind()
            )));
        }

        let handle = Self::handle_for(kind, id);
        let mut world = self.lock();
        world.issued.insert(handle.clone(), id.clone());
        world.resources.insert(
            id.clone(),
            Entry {
                kind,
                parameters: parameters.clone(),
            },
        );
        Ok(handle)
    }

    async fn read(
        &self,
        kind: ResourceKind,
        handle: &ProviderHandle,
    ) -> Result<Parameters, AdapterError> {
        let id = self.resolve(handle);
        self.enter(Call {
            kind,
            op: CallKind::Read,
            id: id.clone(),
            handle: Some(handle.clone()),
            delta: None,
        })
        .await?;

        let id = id.ok_or(AdapterError::NotFound)?;
        let world = self.lock();
        match world.resources.get(&id) {
            Some(entry) if entry.kind == kind => Ok(entry.parameters.clone()),
            _ => Err(AdapterError::NotFound),
        }
    }

    async fn delete(&self, kind: ResourceKind, handle: &ProviderHandle) -> Result<(), AdapterError> {
        let id = self.resolve(handle);
        self.enter(Call {
            kind,
            op: CallKind::Delete,
            id: id.clone(),
            handle: Some(handle.clone()),
            delta: None,
        })
        .await?;

        let id = id.ok_or(AdapterError::NotFound)?;
        match self.lock().resources.remove(&id) {
            Some(_) => Ok(()),
            None => Err(AdapterError::NotFound),
        }
    }

    async fn scale(
        &self,
        kind: ResourceKind,
        handle: &ProviderHandle,
        delta: i64,
    ) -> Result<(), AdapterError> {
        let id = self.resolve(handle);
        self.enter(Call {
            kind,
            op: CallKind::Scale,
            id: id.clone(),
            handle: Some(handle.clone()),
            delta: Some(delta),
        })
        .await?;

        let id = id.ok_or(AdapterError::NotFound)?;
        let mut world = self.lock();
        let Some(Entry {
            parameters: Parameters::Workload(workload),
            ..
        }) = world.resources.get_mut(&id)
        else {
            return Err(AdapterError::NotFound);
        };
        let scaled = i64::from(workload.replicas) + delta;
        workload.replicas = u32::try_from(scaled)
            .map_err(|_| AdapterError::Failed(format!("cannot scale to {scaled} replicas")))?;
        Ok(())
    }
}

/// The sandbox seen through one kind's adapter.
#[derive(Debug, Clone)]
pub struct SandboxAdapter {
    kind: ResourceKind,
    cloud: SandboxCloud,
}

impl ProviderAdapter for SandboxAdapter {
    fn kind(&self) -> ResourceKind {
        self.kind
    }

    fn create_or_update<'a>(
        &'a self,
        _ctx: &'a ProviderContext,
        id: &'a ResourceId,
        parameters: &'a Parameters,
    ) -> BoxFuture<'a, Result<ProviderHandle, AdapterError>> {
        Box::pin(self.cloud.create_or_update(self.kind, id, parameters))
    }

    fn read<'a>(
        &'a self,
        _ctx: &'a ProviderContext,
        handle: &'a ProviderHandle,
    ) -> BoxFuture<'a, Result<Parameters, AdapterError>> {
        Box::pin(self.cloud.read(self.kind, handle))
    }

    fn delete<'a>(
        &'a self,
        _ctx: &'a ProviderContext,
        handle: &'a ProviderHandle,
    ) -> BoxFuture<'a, Result<(), AdapterError>> {
        Box::pin(self.cloud.delete(self.kind, handle))
    }

    fn scale<'a>(
        &'a self,
        _ctx: &'a ProviderContext,
        handle: &'a ProviderHandle,
        delta: i64,
    ) -> BoxFuture<'a, Result<(), AdapterError>> {
        if self.kind != ResourceKind::Workload {
            let kind = self.kind;
            return Box::pin(async move {
                Err(AdapterError::Unsupported {
                    kind,
                    operation: "scale",
                })
            });
        }
        Box::pin(self.cloud.scale(self.kind, handle, delta))
    }
}
