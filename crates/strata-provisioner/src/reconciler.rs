use std::sync::Arc;
use std::time::Duration;

use strata_audit::{EventSink, TracingSink};
use strata_core::{Parameters, ReplicaStatus, ResourceId, ResourceSpec, ResourceState};
use strata_storage::StateStore;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::adapter::AdapterRegistry;
use crate::config::EngineSettings;
use crate::context::ProviderContext;
use crate::drift::{DriftDetector, DriftReport};
use crate::engine::{Engine, ExecutionReport, OperationResult};
use crate::error::ReconcileError;
use crate::plan::{self, DependentPolicy, DestroyTarget, Operation, Plan};
use crate::scaling::{DesiredReplicas, ScalingController, TickOutcome};

/// Single entry point over the engine, drift detector and scaling
/// controller, all sharing one state store and adapter registry.
pub struct Reconciler {
    registry: AdapterRegistry,
    store: Arc<StateStore>,
    engine: Engine,
    drift: Arc<DriftDetector>,
    scaling: Arc<ScalingController>,
    dependent_policy: DependentPolicy,
    /// One plan executes at a time; later callers queue here.
    plan_lock: Mutex<()>,
}

impl Reconciler {
    pub fn new(
        registry: AdapterRegistry,
        store: Arc<StateStore>,
        context: ProviderContext,
        settings: &EngineSettings,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let timeout = settings.call_timeout();
        let targets = Arc::new(DesiredReplicas::new());
        Self {
            engine: Engine::new(
                registry.clone(),
                store.clone(),
                context.clone(),
                timeout,
                sink.clone(),
            ),
            drift: Arc::new(DriftDetector::new(
                registry.clone(),
                store.clone(),
                context.clone(),
                timeout,
                sink.clone(),
            )),
            scaling: Arc::new(ScalingController::new(
                registry.clone(),
                store.clone(),
                context,
                timeout,
                sink,
                targets,
            )),
            registry,
            store,
            dependent_policy: settings.dependent_policy,
            plan_lock: Mutex::new(()),
        }
    }

    /// Reconciler that reports through `tracing`.
    pub fn with_tracing(
        registry: AdapterRegistry,
        store: Arc<StateStore>,
        context: ProviderContext,
        settings: &EngineSettings,
    ) -> Self {
        Self::new(registry, store, context, settings, Arc::new(TracingSink))
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// Diff `specs` against recorded state. No provider calls and no
    /// change to replica targets; those follow applied entries only.
    pub fn plan(&self, specs: &[ResourceSpec]) -> Result<Plan, ReconcileError> {
        let plan = plan::plan_apply(specs, &self.store)?;
        self.registry.ensure_covers(plan.changes().map(|e| e.kind))?;
        tracing::info!(
            creates = plan.count(Operation::Create),
            updates = plan.count(Operation::Update),
            deletes = plan.count(Operation::Delete),
            unchanged = plan.count(Operation::NoOp),
            "plan ready"
        );
        Ok(plan)
    }

    pub async fn apply(&self, plan: &Plan) -> Result<ExecutionReport, ReconcileError> {
        self.apply_with_cancel(plan, &CancellationToken::new()).await
    }

    pub async fn apply_with_cancel(
        &self,
        plan: &Plan,
        cancel: &CancellationToken,
    ) -> Result<ExecutionReport, ReconcileError> {
        let _running = self.plan_lock.lock().await;
        let result = self.engine.apply(plan, cancel).await;
        self.settle_targets(plan, &result);
        result
    }

    /// Plan and apply in one step.
    pub async fn reconcile(
        &self,
        specs: &[ResourceSpec],
        cancel: &CancellationToken,
    ) -> Result<ExecutionReport, ReconcileError> {
        let plan = self.plan(specs)?;
        self.apply_with_cancel(&plan, cancel).await
    }

    /// Teardown plan using the configured [`DependentPolicy`].
    pub fn plan_destroy(&self, target: &DestroyTarget) -> Result<Plan, ReconcileError> {
        self.plan_destroy_with(target, self.dependent_policy)
    }

    pub fn plan_destroy_with(
        &self,
        target: &DestroyTarget,
        policy: DependentPolicy,
    ) -> Result<Plan, ReconcileError> {
        let plan = plan::plan_destroy(&self.store, target, policy)?;
        self.registry.ensure_covers(plan.changes().map(|e| e.kind))?;
        tracing::info!(deletes = plan.len(), policy = ?policy, "teardown plan ready");
        Ok(plan)
    }

    pub async fn destroy(
        &self,
        plan: &Plan,
        cancel: &CancellationToken,
    ) -> Result<ExecutionReport, ReconcileError> {
        let _running = self.plan_lock.lock().await;
        let result = self.engine.destroy(plan, cancel).await;
        self.settle_targets(plan, &result);
        result
    }

    /// Point the scaling controller at what was actually applied: workloads
    /// that converged take their replica count from the plan, deleted ones
    /// are forgotten. Entries that failed or never ran leave targets alone.
    fn settle_targets(&self, plan: &Plan, result: &Result<ExecutionReport, ReconcileError>) {
        let report = match result {
            Ok(report) => report,
            Err(e) => match e.report() {
                Some(report) => report,
                None => return,
            },
        };
        for outcome in &report.outcomes {
            match (outcome.operation, &outcome.result) {
                (Operation::Delete, OperationResult::Succeeded | OperationResult::AlreadyGone) => {
                    self.scaling.forget(&outcome.id);
                }
                (
                    Operation::Create | Operation::Update | Operation::NoOp,
                    OperationResult::Succeeded | OperationResult::Unchanged,
                ) => {
                    let replicas = plan
                        .entry(&outcome.id)
                        .and_then(|e| e.desired.as_ref())
                        .and_then(Parameters::replicas);
                    if let Some(replicas) = replicas {
                        self.scaling.targets().set(outcome.id.clone(), replicas);
                    }
                }
                _ => {}
            }
        }
    }

    pub fn scaling(&self) -> &ScalingController {
        &self.scaling
    }

    pub fn get_state(&self, id: &ResourceId) -> Option<ResourceState> {
        self.store.get(id)
    }

    pub fn list_state(&self) -> Vec<ResourceState> {
        self.store.list_all()
    }

    pub fn replica_status(&self) -> Vec<ReplicaStatus> {
        self.scaling.replica_status()
    }

    /// One scaling pass.
    pub async fn tick(&self) -> Vec<TickOutcome> {
        self.scaling.tick().await
    }

    /// One drift detection pass.
    pub async fn detect_drift(&self) -> Result<DriftReport, ReconcileError> {
        self.drift.detect_once().await
    }

    /// Start the drift and scaling loops as background tasks. Both stop
    /// when `shutdown` is cancelled.
    pub fn spawn_loops(
        &self,
        drift_every: Duration,
        scale_every: Duration,
        shutdown: &CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        let drift = self.drift.clone();
        let drift_shutdown = shutdown.clone();
        let scaling = self.scaling.clone();
        let scaling_shutdown = shutdown.clone();
        vec![
            tokio::spawn(async move { drift.run(drift_every, drift_shutdown).await }),
            tokio::spawn(async move { scaling.run(scale_every, scaling_shutdown).await }),
        ]
    }
}
