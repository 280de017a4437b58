mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{chain, harness, harness_with, id, ids, layered_app, network};
use strata_audit::{AuditAction, MemorySink, Outcome};
use strata_core::models::parameters::ClusterParameters;
use strata_core::{CoreError, Parameters, ProviderHandle, ResourceId, ResourceKind, ResourceSpec, ResourceStatus};
use strata_provisioner::{
    AdapterError, BoxFuture, CallKind, Cause, EngineSettings, Operation, OperationResult,
    ProviderAdapter, ProviderContext, ReconcileError, Reconciler, SandboxAdapter, SandboxCloud,
};
use strata_storage::{StatePersistence, StateStore};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn layered_app_is_created_in_dependency_order() {
    let h = harness();
    let plan = h.reconciler.plan(&layered_app()).unwrap();
    assert_eq!(plan.count(Operation::Create), 5);

    let report = h.reconciler.apply(&plan).await.unwrap();
    assert_eq!(report.succeeded().len(), 5);
    assert_eq!(
        h.cloud.call_ids(CallKind::CreateOrUpdate),
        ids(&["net1", "clu1", "db1", "app1", "svc1"])
    );

    for state in h.reconciler.list_state() {
        assert_eq!(state.status, ResourceStatus::Applied, "{}", state.id);
        assert!(state.provider_handle.is_some());
        assert!(state.last_applied.is_some());
    }
    let app = h.reconciler.get_state(&id("app1")).unwrap();
    assert_eq!(app.depends_on.into_iter().collect::<Vec<_>>(), ids(&["clu1", "db1"]));
}

#[tokio::test]
async fn second_apply_of_same_state_makes_no_calls() {
    let h = harness();
    let specs = layered_app();
    let plan = h.reconciler.plan(&specs).unwrap();
    h.reconciler.apply(&plan).await.unwrap();
    h.cloud.clear_journal();

    let plan = h.reconciler.plan(&specs).unwrap();
    assert!(!plan.has_changes());
    assert!(plan.entries().iter().all(|e| e.cause == Cause::InSync));

    let report = h.reconciler.apply(&plan).await.unwrap();
    assert!(report
        .outcomes
        .iter()
        .all(|o| o.result == OperationResult::Unchanged));
    assert!(h.cloud.journal().is_empty());
}

#[tokio::test]
async fn failure_freezes_everything_after_it() {
    let h = harness();
    h.cloud
        .fail_next(&id("b"), CallKind::CreateOrUpdate, "quota exceeded");

    let plan = h.reconciler.plan(&chain()).unwrap();
    let err = h.reconciler.apply(&plan).await.unwrap_err();

    let (resource, operation, error, report) = match err {
        ReconcileError::Halted {
            resource,
            operation,
            error,
            report,
        } => (resource, operation, error, report),
        other => panic!("expected Halted, got {other:?}"),
    };
    assert_eq!(resource, id("b"));
    assert_eq!(operation, Operation::Create);
    assert_eq!(error, AdapterError::Failed("quota exceeded".into()));
    assert_eq!(report.succeeded(), vec![&id("a")]);
    assert_eq!(report.failed().unwrap().id, id("b"));
    assert_eq!(report.skipped(), vec![&id("c")]);

    assert_eq!(h.cloud.call_ids(CallKind::CreateOrUpdate), ids(&["a", "b"]));
    assert_eq!(
        h.reconciler.get_state(&id("a")).unwrap().status,
        ResourceStatus::Applied
    );
    let b = h.reconciler.get_state(&id("b")).unwrap();
    assert_eq!(b.status, ResourceStatus::Failed);
    assert!(b.provider_handle.is_none());
    assert!(h.reconciler.get_state(&id("c")).is_none());

    let failed = h
        .sink
        .events()
        .into_iter()
        .filter(|e| e.outcome == Outcome::Failed)
        .count();
    assert_eq!(failed, 1);
}

#[tokio::test]
async fn replan_after_failure_retries_from_the_failed_resource() {
    let h = harness();
    h.cloud
        .fail_next(&id("b"), CallKind::CreateOrUpdate, "quota exceeded");
    let plan = h.reconciler.plan(&chain()).unwrap();
    h.reconciler.apply(&plan).await.unwrap_err();
    h.cloud.clear_journal();

    let plan = h.reconciler.plan(&chain()).unwrap();
    let ops: Vec<_> = plan
        .entries()
        .iter()
        .map(|e| (e.id.to_string(), e.operation, e.cause))
        .collect();
    assert_eq!(
        ops,
        vec![
            ("a".to_string(), Operation::NoOp, Cause::InSync),
            ("b".to_string(), Operation::Create, Cause::RetryFailed),
            ("c".to_string(), Operation::Create, Cause::FirstProvision),
        ]
    );

    h.reconciler.apply(&plan).await.unwrap();
    assert_eq!(h.cloud.call_ids(CallKind::CreateOrUpdate), ids(&["b", "c"]));
}

#[tokio::test(start_paused = true)]
async fn timeout_is_handled_like_a_failure() {
    let h = harness_with(EngineSettings {
        call_timeout_secs: 5,
        ..EngineSettings::default()
    });
    h.cloud.hang(&id("b"), CallKind::CreateOrUpdate);

    let plan = h.reconciler.plan(&chain()).unwrap();
    let err = h.reconciler.apply(&plan).await.unwrap_err();

    match &err {
        ReconcileError::Halted { resource, error, .. } => {
            assert_eq!(resource, &id("b"));
            assert_eq!(error, &AdapterError::Timeout(Duration::from_secs(5)));
        }
        other => panic!("expected Halted, got {other:?}"),
    }
    assert_eq!(err.report().unwrap().skipped(), vec![&id("c")]);
    assert_eq!(
        h.reconciler.get_state(&id("b")).unwrap().status,
        ResourceStatus::Failed
    );
}

#[tokio::test]
async fn cyclic_desired_state_is_rejected_before_any_call() {
    let h = harness();
    let specs = vec![
        network("a", "10.1.0.0/16").depends_on([id("b")]),
        network("b", "10.2.0.0/16").depends_on([id("a")]),
    ];

    let err = h.reconciler.plan(&specs).unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::Invalid(CoreError::CycleDetected { .. })
    ));
    assert!(h.cloud.journal().is_empty());
    assert!(h.reconciler.list_state().is_empty());
}

#[tokio::test]
async fn changed_parameters_produce_a_single_update() {
    let h = harness();
    let mut specs = layered_app();
    let plan = h.reconciler.plan(&specs).unwrap();
    h.reconciler.apply(&plan).await.unwrap();
    h.cloud.clear_journal();

    for spec in &mut specs {
        if let Parameters::Workload(w) = &mut spec.parameters {
            w.image = "registry.local/app:1.1".into();
        }
    }
    let plan = h.reconciler.plan(&specs).unwrap();
    let changes: Vec<_> = plan.changes().collect();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].id, id("app1"));
    assert_eq!(changes[0].operation, Operation::Update);
    assert_eq!(changes[0].cause, Cause::ParametersChanged);
    assert_eq!(changes[0].drift.len(), 1);
    assert_eq!(changes[0].drift[0].field, "image");

    h.reconciler.apply(&plan).await.unwrap();
    assert_eq!(h.cloud.call_ids(CallKind::CreateOrUpdate), ids(&["app1"]));
    let live = h.cloud.parameters(&id("app1")).unwrap();
    assert!(matches!(live, Parameters::Workload(w) if w.image == "registry.local/app:1.1"));
}

#[tokio::test]
async fn resources_dropped_from_desired_state_are_deleted_last_in_reverse_order() {
    let h = harness();
    let plan = h.reconciler.plan(&chain()).unwrap();
    h.reconciler.apply(&plan).await.unwrap();
    h.cloud.clear_journal();

    let plan = h.reconciler.plan(&chain()[..1]).unwrap();
    let ops: Vec<_> = plan
        .entries()
        .iter()
        .map(|e| (e.id.to_string(), e.operation))
        .collect();
    assert_eq!(
        ops,
        vec![
            ("a".to_string(), Operation::NoOp),
            ("c".to_string(), Operation::Delete),
            ("b".to_string(), Operation::Delete),
        ]
    );

    h.reconciler.apply(&plan).await.unwrap();
    assert_eq!(h.cloud.call_ids(CallKind::Delete), ids(&["c", "b"]));
    assert_eq!(h.reconciler.list_state().len(), 1);
    assert!(!h.cloud.contains(&id("b")));
}

#[tokio::test]
async fn kind_change_for_a_recorded_id_is_rejected() {
    let h = harness();
    let plan = h.reconciler.plan(&chain()[..1]).unwrap();
    h.reconciler.apply(&plan).await.unwrap();

    let cluster = ResourceSpec::new(
        id("a"),
        Parameters::Cluster(ClusterParameters {
            version: "1.30".into(),
            node_count: 1,
            network: None,
        }),
    );
    let err = h.reconciler.plan(&[cluster]).unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::KindChanged {
            recorded: ResourceKind::Network,
            desired: ResourceKind::Cluster,
            ..
        }
    ));
}

#[tokio::test]
async fn missing_adapter_is_a_plan_time_error() {
    let cloud = SandboxCloud::new();
    let registry = strata_provisioner::AdapterRegistry::new()
        .register(Arc::new(cloud.adapter(ResourceKind::Network)));
    let reconciler = Reconciler::with_tracing(
        registry,
        Arc::new(StateStore::in_memory()),
        ProviderContext::new("eu-west-1"),
        &EngineSettings::default(),
    );

    let err = reconciler.plan(&layered_app()).unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::AdapterMissing(ResourceKind::Cluster)
    ));
    assert!(cloud.journal().is_empty());
}

#[tokio::test]
async fn apply_emits_one_event_per_operation_and_a_summary() {
    let h = harness();
    let plan = h.reconciler.plan(&layered_app()).unwrap();
    h.reconciler.apply(&plan).await.unwrap();

    let events = h.sink.events();
    let creates = events
        .iter()
        .filter(|e| e.action == AuditAction::Create && e.outcome == Outcome::Succeeded)
        .count();
    assert_eq!(creates, 5);
    let summary = events
        .iter()
        .find(|e| e.action == AuditAction::Plan)
        .unwrap();
    assert_eq!(summary.details.as_ref().unwrap()["creates"], 5);
}

#[tokio::test]
async fn state_is_flushed_after_each_operation() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let cloud = SandboxCloud::new();
    let reconciler = Reconciler::new(
        cloud.registry(),
        Arc::new(StateStore::new(StatePersistence::local(&path))),
        ProviderContext::new("eu-west-1"),
        &EngineSettings::default(),
        Arc::new(MemorySink::new()),
    );
    cloud.fail_next(&id("c"), CallKind::CreateOrUpdate, "boom");

    let plan = reconciler.plan(&chain()).unwrap();
    reconciler.apply(&plan).await.unwrap_err();

    let reopened = StateStore::open(StatePersistence::local(&path)).await.unwrap();
    let statuses: Vec<_> = reopened
        .list_all()
        .into_iter()
        .map(|s| (s.id.to_string(), s.status))
        .collect();
    assert_eq!(
        statuses,
        vec![
            ("a".to_string(), ResourceStatus::Applied),
            ("b".to_string(), ResourceStatus::Applied),
            ("c".to_string(), ResourceStatus::Failed),
        ]
    );
}

/// Network adapter that cancels a token when asked to create `trigger`.
struct CancelOnCreate {
    inner: SandboxAdapter,
    trigger: ResourceId,
    token: CancellationToken,
}

impl ProviderAdapter for CancelOnCreate {
    fn kind(&self) -> ResourceKind {
        self.inner.kind()
    }

    fn create_or_update<'a>(
        &'a self,
        ctx: &'a ProviderContext,
        id: &'a ResourceId,
        parameters: &'a Parameters,
    ) -> BoxFuture<'a, Result<ProviderHandle, AdapterError>> {
        if id == &self.trigger {
            self.token.cancel();
        }
        self.inner.create_or_update(ctx, id, parameters)
    }

    fn read<'a>(
        &'a self,
        ctx: &'a ProviderContext,
        handle: &'a ProviderHandle,
    ) -> BoxFuture<'a, Result<Parameters, AdapterError>> {
        self.inner.read(ctx, handle)
    }

    fn delete<'a>(
        &'a self,
        ctx: &'a ProviderContext,
        handle: &'a ProviderHandle,
    ) -> BoxFuture<'a, Result<(), AdapterError>> {
        self.inner.delete(ctx, handle)
    }
}

#[tokio::test]
async fn cancellation_lets_the_current_operation_finish_then_stops() {
    let cloud = SandboxCloud::new();
    let token = CancellationToken::new();
    let registry = cloud.registry().register(Arc::new(CancelOnCreate {
        inner: cloud.adapter(ResourceKind::Network),
        trigger: id("b"),
        token: token.clone(),
    }));
    let reconciler = Reconciler::with_tracing(
        registry,
        Arc::new(StateStore::in_memory()),
        ProviderContext::new("eu-west-1"),
        &EngineSettings::default(),
    );

    let plan = reconciler.plan(&chain()).unwrap();
    let err = reconciler.apply_with_cancel(&plan, &token).await.unwrap_err();

    let report = match err {
        ReconcileError::Cancelled { report } => report,
        other => panic!("expected Cancelled, got {other:?}"),
    };
    assert_eq!(report.completed(), 2);
    assert_eq!(report.skipped(), vec![&id("c")]);
    assert_eq!(cloud.call_ids(CallKind::CreateOrUpdate), ids(&["a", "b"]));
    assert_eq!(
        reconciler.get_state(&id("b")).unwrap().status,
        ResourceStatus::Applied
    );
    assert!(reconciler.get_state(&id("c")).is_none());
}

#[tokio::test]
async fn cancelled_before_start_runs_nothing() {
    let h = harness();
    let token = CancellationToken::new();
    token.cancel();

    let plan = h.reconciler.plan(&chain()).unwrap();
    let err = h
        .reconciler
        .apply_with_cancel(&plan, &token)
        .await
        .unwrap_err();

    assert_eq!(err.report().unwrap().completed(), 0);
    assert_eq!(err.report().unwrap().skipped().len(), 3);
    assert!(h.cloud.journal().is_empty());
    assert!(h.reconciler.list_state().is_empty());
}
