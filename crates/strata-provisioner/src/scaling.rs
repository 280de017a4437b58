use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use serde_json::json;
use strata_audit::{AuditAction, AuditEvent, EventSink, Outcome};
use strata_core::{
    Parameters, ProviderHandle, ReplicaStatus, ResourceId, ResourceKind, ResourceStatus,
    ScalingPhase,
};
use strata_storage::StateStore;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::adapter::{with_timeout, AdapterRegistry};
use crate::context::ProviderContext;

/// Desired replica counts per workload. A target is set only once the
/// workload's create or update has been applied.
#[derive(Debug, Default)]
pub struct DesiredReplicas {
    targets: RwLock<BTreeMap<ResourceId, u32>>,
}

impl DesiredReplicas {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, id: ResourceId, replicas: u32) {
        self.targets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, replicas);
    }

    pub fn remove(&self, id: &ResourceId) -> Option<u32> {
        self.targets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    pub fn get(&self, id: &ResourceId) -> Option<u32> {
        self.targets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .copied()
    }

    pub fn all(&self) -> BTreeMap<ResourceId, u32> {
        self.targets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TickAction {
    /// Observed already matches desired.
    Converged,
    Scaled { delta: i64 },
    ScaleFailed { delta: i64, error: String },
    ReadFailed { error: String },
    /// A previous tick for this workload is still in flight.
    Busy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TickOutcome {
    pub status: ReplicaStatus,
    pub action: TickAction,
}

#[derive(Debug, Clone, Copy)]
struct Tracked {
    phase: ScalingPhase,
    in_flight: bool,
    observed: Option<u32>,
}

impl Tracked {
    fn idle() -> Self {
        Self {
            phase: ScalingPhase::Idle,
            in_flight: false,
            observed: None,
        }
    }
}

type TrackedMap = Mutex<BTreeMap<ResourceId, Tracked>>;

/// Clears the in-flight mark and returns the workload to `Idle` however
/// the tick ends.
struct Flight<'a> {
    tracked: &'a TrackedMap,
    id: ResourceId,
}

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        let mut tracked = self.tracked.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(t) = tracked.get_mut(&self.id) {
            t.in_flight = false;
            t.phase = ScalingPhase::Idle;
        }
    }
}

/// Level-triggered replica convergence for workloads.
///
/// Every tick re-reads the observed count and issues a single relative
/// `scale` call for the difference. Nothing is retried within a tick; an
/// error simply leaves the difference in place for the next one.
pub struct ScalingController {
    registry: AdapterRegistry,
    store: Arc<StateStore>,
    context: ProviderContext,
    call_timeout: Duration,
    sink: Arc<dyn EventSink>,
    targets: Arc<DesiredReplicas>,
    tracked: TrackedMap,
}

impl ScalingController {
    pub fn new(
        registry: AdapterRegistry,
        store: Arc<StateStore>,
        context: ProviderContext,
        call_timeout: Duration,
        sink: Arc<dyn EventSink>,
        targets: Arc<DesiredReplicas>,
    ) -> Self {
        Self {
            registry,
            store,
            context,
            call_timeout,
            sink,
            targets,
            tracked: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn targets(&self) -> &Arc<DesiredReplicas> {
        &self.targets
    }

    /// Drop the target and tracking for a workload that no longer exists.
    pub fn forget(&self, id: &ResourceId) {
        self.targets.remove(id);
        self.tracked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }

    /// Workloads with scaling history (phase, last observed count).
    pub fn tracked_ids(&self) -> Vec<ResourceId> {
        self.tracked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// One pass over every workload that has a target and exists at the
    /// provider. Workloads are handled concurrently.
    pub async fn tick(&self) -> Vec<TickOutcome> {
        let work: Vec<_> = self
            .targets
            .all()
            .into_iter()
            .filter_map(|(id, desired)| {
                let record = self.store.get(&id)?;
                let settled = matches!(
                    record.status,
                    ResourceStatus::Applied | ResourceStatus::Degraded
                );
                if record.kind != ResourceKind::Workload || !settled {
                    return None;
                }
                let handle = record.provider_handle?;
                Some(self.tick_one(id, desired, handle))
            })
            .collect();

        join_all(work).await
    }

    /// Desired, last observed, and phase for every workload with a target.
    pub fn replica_status(&self) -> Vec<ReplicaStatus> {
        let tracked = self.tracked.lock().unwrap_or_else(PoisonError::into_inner);
        self.targets
            .all()
            .into_iter()
            .map(|(id, desired)| {
                let t = tracked.get(&id).copied().unwrap_or_else(Tracked::idle);
                ReplicaStatus {
                    id,
                    desired_replicas: desired,
                    observed_replicas: t.observed,
                    phase: t.phase,
                }
            })
            .collect()
    }

    pub async fn run(&self, every: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval = ?every, "scaling controller started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let outcomes = self.tick().await;
                    let scaled = outcomes
                        .iter()
                        .filter(|o| matches!(o.action, TickAction::Scaled { .. }))
                        .count();
                    tracing::debug!(workloads = outcomes.len(), scaled, "scaling tick complete");
                }
            }
        }
        tracing::info!("scaling controller stopped");
    }

    async fn tick_one(&self, id: ResourceId, desired: u32, handle: ProviderHandle) -> TickOutcome {
        let Some(_flight) = self.begin(&id) else {
            return self.outcome(&id, desired, TickAction::Busy);
        };

        let adapter = match self.registry.get(ResourceKind::Workload) {
            Ok(adapter) => adapter,
            Err(e) => {
                let error = e.to_string();
                return self.outcome(&id, desired, TickAction::ReadFailed { error });
            }
        };

        let observed = match with_timeout(self.call_timeout, adapter.read(&self.context, &handle)).await {
            Ok(Parameters::Workload(live)) => live.replicas,
            Ok(other) => {
                let error = format!("provider returned {} parameters for a workload", other.kind());
                return self.outcome(&id, desired, TickAction::ReadFailed { error });
            }
            Err(e) => {
                tracing::warn!(id = %id, error = %e, "failed to read replica count");
                let error = e.to_string();
                return self.outcome(&id, desired, TickAction::ReadFailed { error });
            }
        };

        let delta = i64::from(desired) - i64::from(observed);
        self.observe(&id, observed, delta != 0);
        if delta == 0 {
            return self.outcome(&id, desired, TickAction::Converged);
        }

        tracing::info!(id = %id, desired, observed, delta, "scaling workload");
        let action = match with_timeout(
            self.call_timeout,
            adapter.scale(&self.context, &handle, delta),
        )
        .await
        {
            Ok(()) => {
                self.emit(&id, Outcome::Succeeded, json!({"delta": delta, "desired": desired, "observed": observed}));
                TickAction::Scaled { delta }
            }
            Err(e) => {
                tracing::warn!(id = %id, delta, error = %e, "scale call failed");
                let error = e.to_string();
                self.emit(&id, Outcome::Failed, json!({"delta": delta, "error": error}));
                TickAction::ScaleFailed { delta, error }
            }
        };

        // The flight guard returns the phase to Idle on drop.
        TickOutcome {
            status: ReplicaStatus {
                id: id.clone(),
                desired_replicas: desired,
                observed_replicas: Some(observed),
                phase: ScalingPhase::Idle,
            },
            action,
        }
    }

    fn begin(&self, id: &ResourceId) -> Option<Flight<'_>> {
        let mut tracked = self.tracked.lock().unwrap_or_else(PoisonError::into_inner);
        let t = tracked.entry(id.clone()).or_insert_with(Tracked::idle);
        if t.in_flight {
            return None;
        }
        t.in_flight = true;
        Some(Flight {
            tracked: &self.tracked,
            id: id.clone(),
        })
    }

    fn observe(&self, id: &ResourceId, observed: u32, scaling: bool) {
        let mut tracked = self.tracked.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(t) = tracked.get_mut(id) {
            t.observed = Some(observed);
            if scaling {
                t.phase = ScalingPhase::Scaling;
            }
        }
    }

    fn outcome(&self, id: &ResourceId, desired: u32, action: TickAction) -> TickOutcome {
        let tracked = self.tracked.lock().unwrap_or_else(PoisonError::into_inner);
        let t = tracked.get(id).copied().unwrap_or_else(Tracked::idle);
        TickOutcome {
            status: ReplicaStatus {
                id: id.clone(),
                desired_replicas: desired,
                observed_replicas: t.observed,
                phase: t.phase,
            },
            action,
        }
    }

    fn emit(&self, id: &ResourceId, outcome: Outcome, details: serde_json::Value) {
        self.sink.emit(
            &AuditEvent::for_resource(AuditAction::Scale, id, ResourceKind::Workload, outcome)
                .with_details(details),
        );
    }
}
