use std::collections::BTreeSet;

use strata_core::models::parameters::NetworkParameters;
use strata_core::{
    Parameters, ProviderHandle, ResourceId, ResourceKind, ResourceState, ResourceStatus,
};
use strata_storage::{StatePersistence, StateStore, StorageError};

fn id(s: &str) -> ResourceId {
    ResourceId::new(s).unwrap()
}

fn applied_network(name: &str) -> ResourceState {
    let mut state = ResourceState::pending(id(name), ResourceKind::Network, BTreeSet::new());
    state.status = ResourceStatus::Applied;
    state.last_applied = Some(Parameters::Network(NetworkParameters {
        cidr_block: "10.1.0.0/16".into(),
        region: Some("eu-west-1".into()),
    }));
    state.provider_handle = Some(ProviderHandle::new(format!("vpc-{name}")));
    state
}

#[test]
fn get_put_delete_and_list() {
    let store = StateStore::in_memory();
    assert!(store.get(&id("net1")).is_none());

    store.put(applied_network("net2"));
    store.put(applied_network("net1"));
    assert_eq!(store.len(), 2);
    assert_eq!(store.get(&id("net1")).unwrap().status, ResourceStatus::Applied);

    let ids: Vec<String> = store.list_all().into_iter().map(|s| s.id.to_string()).collect();
    assert_eq!(ids, vec!["net1", "net2"]);

    assert!(store.delete(&id("net1")).is_some());
    assert!(store.delete(&id("net1")).is_none());
    assert_eq!(store.len(), 1);
}

#[test]
fn update_is_scoped_to_one_record() {
    let store = StateStore::in_memory();
    store.put(applied_network("net1"));
    store.put(applied_network("net2"));

    let previous = store.update(&id("net1"), |s| {
        let before = s.status;
        s.status = ResourceStatus::Degraded;
        before
    });
    assert_eq!(previous, Some(ResourceStatus::Applied));
    assert_eq!(store.get(&id("net1")).unwrap().status, ResourceStatus::Degraded);
    assert_eq!(store.get(&id("net2")).unwrap().status, ResourceStatus::Applied);

    assert_eq!(store.update(&id("missing"), |_| ()), None);
}

#[tokio::test]
async fn local_persistence_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state").join("strata.json");

    let store = StateStore::new(StatePersistence::local(&path));
    store.put(applied_network("net1"));
    store.persist().await.unwrap();
    assert!(path.exists());
    assert!(!path.with_extension("json.tmp").exists());

    let reopened = StateStore::open(StatePersistence::local(&path)).await.unwrap();
    assert_eq!(reopened.get(&id("net1")), store.get(&id("net1")));
}

#[tokio::test]
async fn missing_state_file_opens_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::open(StatePersistence::local(dir.path().join("none.json")))
        .await
        .unwrap();
    assert!(store.is_empty());
}

#[tokio::test]
async fn newer_format_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("strata.json");
    std::fs::write(&path, r#"{"format_version": 99, "resources": {}}"#).unwrap();

    let err = StateStore::open(StatePersistence::local(&path)).await.err().unwrap();
    assert!(matches!(err, StorageError::UnsupportedFormat { found: 99, .. }));
}

#[tokio::test]
async fn in_memory_persist_is_a_no_op() {
    let store = StateStore::in_memory();
    store.put(applied_network("net1"));
    store.persist().await.unwrap();
    assert_eq!(store.snapshot().resources.len(), 1);
}
