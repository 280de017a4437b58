mod common;

use common::{chain, harness, id, network};
use strata_core::{Parameters, ResourceStatus};
use strata_provisioner::{CallKind, Cause, Operation};

fn widen_cidr(parameters: &mut Parameters) {
    if let Parameters::Network(n) = parameters {
        n.cidr_block = "10.9.0.0/16".into();
    }
}

#[tokio::test]
async fn tampered_resource_is_flagged_without_corrective_calls() {
    let h = harness();
    let plan = h.reconciler.plan(&chain()).unwrap();
    h.reconciler.apply(&plan).await.unwrap();
    h.cloud.clear_journal();
    assert!(h.cloud.tamper(&id("b"), widen_cidr));

    let report = h.reconciler.detect_drift().await.unwrap();
    assert_eq!(report.checked, 3);
    assert_eq!(report.drifted, vec![id("b")]);
    assert!(report.missing.is_empty());

    let b = h.reconciler.get_state(&id("b")).unwrap();
    assert_eq!(b.status, ResourceStatus::Degraded);
    assert_eq!(b.live, h.cloud.parameters(&id("b")));

    let events = h.sink.drift_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].resource_id, id("b"));
    assert_eq!(events[0].field_names(), vec!["cidr_block"]);
    assert_eq!(events[0].fields[0].expected, "10.2.0.0/16");
    assert_eq!(events[0].fields[0].actual, "10.9.0.0/16");

    assert!(h.cloud.mutating_calls().is_empty());
    assert_eq!(h.cloud.calls(CallKind::Read).len(), 3);
}

#[tokio::test]
async fn degraded_resource_is_reported_once() {
    let h = harness();
    let plan = h.reconciler.plan(&chain()).unwrap();
    h.reconciler.apply(&plan).await.unwrap();
    h.cloud.tamper(&id("a"), widen_cidr);

    h.reconciler.detect_drift().await.unwrap();
    let second = h.reconciler.detect_drift().await.unwrap();

    assert!(second.is_clean());
    assert_eq!(second.checked, 2);
    assert_eq!(h.sink.drift_events().len(), 1);
}

#[tokio::test]
async fn in_sync_pass_records_live_state_only() {
    let h = harness();
    let plan = h.reconciler.plan(&chain()).unwrap();
    h.reconciler.apply(&plan).await.unwrap();

    let report = h.reconciler.detect_drift().await.unwrap();
    assert!(report.is_clean());
    for state in h.reconciler.list_state() {
        assert_eq!(state.status, ResourceStatus::Applied);
        assert_eq!(state.live, state.last_applied);
    }
    assert!(h.sink.drift_events().is_empty());
}

#[tokio::test]
async fn resource_deleted_out_of_band_is_reported_missing() {
    let h = harness();
    let plan = h.reconciler.plan(&[network("net1", "10.0.0.0/16")]).unwrap();
    h.reconciler.apply(&plan).await.unwrap();
    h.cloud.remove_out_of_band(&id("net1"));

    let report = h.reconciler.detect_drift().await.unwrap();
    assert_eq!(report.missing, vec![id("net1")]);

    let state = h.reconciler.get_state(&id("net1")).unwrap();
    assert_eq!(state.status, ResourceStatus::Degraded);
    assert!(state.live.is_none());
    let events = h.sink.drift_events();
    assert_eq!(events.len(), 1);
    assert!(events[0].missing);
}

#[tokio::test]
async fn read_errors_leave_the_record_alone() {
    let h = harness();
    let plan = h.reconciler.plan(&[network("net1", "10.0.0.0/16")]).unwrap();
    h.reconciler.apply(&plan).await.unwrap();
    h.cloud.fail_next(&id("net1"), CallKind::Read, "throttled");

    let report = h.reconciler.detect_drift().await.unwrap();
    assert_eq!(report.unreadable, vec![id("net1")]);
    assert_eq!(report.checked, 0);

    let state = h.reconciler.get_state(&id("net1")).unwrap();
    assert_eq!(state.status, ResourceStatus::Applied);
    assert!(state.live.is_none());
    assert!(h.sink.drift_events().is_empty());
}

#[tokio::test]
async fn next_apply_converges_drifted_resource() {
    let h = harness();
    let specs = chain();
    let plan = h.reconciler.plan(&specs).unwrap();
    h.reconciler.apply(&plan).await.unwrap();
    h.cloud.tamper(&id("b"), widen_cidr);
    h.reconciler.detect_drift().await.unwrap();
    h.cloud.clear_journal();

    let plan = h.reconciler.plan(&specs).unwrap();
    let entry = plan.entry(&id("b")).unwrap();
    assert_eq!(entry.operation, Operation::Update);
    assert_eq!(entry.cause, Cause::DriftCorrection);
    assert_eq!(entry.drift[0].field, "cidr_block");
    assert_eq!(plan.changes().count(), 1);

    h.reconciler.apply(&plan).await.unwrap();
    assert_eq!(h.cloud.calls(CallKind::CreateOrUpdate).len(), 1);
    assert_eq!(
        h.reconciler.get_state(&id("b")).unwrap().status,
        ResourceStatus::Applied
    );
    assert_eq!(
        h.cloud.parameters(&id("b")),
        Some(specs[1].parameters.clone())
    );
}
