use serde_json::json;
use strata_core::models::parameters::{NetworkParameters, WorkloadParameters};
use strata_core::{DesiredState, Parameters, ProviderHandle, ResourceId, ResourceKind};

fn workload(replicas: u32, image: &str) -> Parameters {
    Parameters::Workload(WorkloadParameters {
        image: image.into(),
        replicas,
        container_port: 8080,
        cluster: None,
        database: None,
        env: Default::default(),
    })
}

#[test]
fn resource_ids_are_validated() {
    assert!(ResourceId::new("app-1_x").is_ok());
    assert!(ResourceId::new("").is_err());
    assert!(ResourceId::new("1app").is_err());
    assert!(ResourceId::new("App").is_err());
    assert!(ResourceId::new("app.1").is_err());
    assert!(ResourceId::new("a".repeat(64)).is_err());
}

#[test]
fn document_parses_with_kind_tags() {
    let doc = json!({
        "resources": [
            {"id": "net1", "parameters": {"kind": "network", "cidr_block": "10.0.0.0/16"}},
            {"id": "app1", "depends_on": ["net1"], "parameters": {
                "kind": "workload", "image": "registry.local/app:2", "replicas": 3,
                "container_port": 8080, "env": {"LOG_LEVEL": "debug"}
            }}
        ]
    });
    let desired = DesiredState::from_json(&doc.to_string()).unwrap();
    assert_eq!(desired.resources.len(), 2);
    assert_eq!(desired.resources[0].kind(), ResourceKind::Network);
    assert_eq!(desired.resources[1].kind(), ResourceKind::Workload);
    assert_eq!(desired.resources[1].parameters.replicas(), Some(3));
}

#[test]
fn document_with_bad_id_fails_to_parse() {
    let doc = r#"{"resources": [{"id": "Net 1", "parameters": {"kind": "network", "cidr_block": "10.0.0.0/16"}}]}"#;
    assert!(DesiredState::from_json(doc).is_err());
}

#[test]
fn cidr_blocks_are_checked() {
    let net = |cidr: &str| {
        Parameters::Network(NetworkParameters {
            cidr_block: cidr.into(),
            region: None,
        })
    };
    assert!(net("10.0.0.0/16").check().is_ok());
    assert!(net("10.0.0.0").check().is_err());
    assert!(net("10.0.0.1/16").check().is_err());
    assert!(net("10.0.0.0/30").check().is_err());
    assert!(net("300.0.0.0/16").check().is_err());
}

#[test]
fn workload_checks_image_and_port() {
    assert!(workload(2, "app:1").check().is_ok());
    assert!(workload(2, "").check().is_err());
    assert!(workload(2, "app :1").check().is_err());
    let Parameters::Workload(mut p) = workload(0, "app:1") else {
        unreachable!()
    };
    p.container_port = 0;
    assert!(Parameters::Workload(p).check().is_err());
}

#[test]
fn diff_reports_only_changed_fields() {
    let drift = workload(4, "app:1").diff(&workload(2, "app:1"));
    assert_eq!(drift.len(), 1);
    assert_eq!(drift[0].field, "replicas");
    assert_eq!(drift[0].expected, json!(4));
    assert_eq!(drift[0].actual, json!(2));

    assert!(workload(2, "app:1").diff(&workload(2, "app:1")).is_empty());
}

#[test]
fn diff_across_kinds_reports_kind() {
    let net = Parameters::Network(NetworkParameters {
        cidr_block: "10.0.0.0/16".into(),
        region: None,
    });
    let drift = net.diff(&workload(1, "app:1"));
    assert_eq!(drift.len(), 1);
    assert_eq!(drift[0].field, "kind");
}

#[test]
fn provider_handles_can_key_an_ordered_map() {
    let mut issued = std::collections::BTreeMap::new();
    issued.insert(ProviderHandle::new("sbx-workload-app1"), "app1");
    issued.insert(ProviderHandle::new("sbx-network-net1"), "net1");

    let keys: Vec<_> = issued.keys().map(ProviderHandle::as_str).collect();
    assert_eq!(keys, vec!["sbx-network-net1", "sbx-workload-app1"]);
    assert_eq!(issued.get(&ProviderHandle::new("sbx-workload-app1")), Some(&"app1"));
}
