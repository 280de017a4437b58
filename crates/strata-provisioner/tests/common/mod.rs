#![allow(dead_code)]

use std::sync::Arc;

use strata_audit::MemorySink;
use strata_core::models::parameters::{
    ClusterParameters, DatabaseEngine, DatabaseParameters, Exposure, NetworkParameters,
    ServiceExposureParameters, WorkloadParameters,
};
use strata_core::{Parameters, ResourceId, ResourceSpec};
use strata_provisioner::{EngineSettings, ProviderContext, Reconciler, SandboxCloud};
use strata_storage::StateStore;

pub fn id(s: &str) -> ResourceId {
    ResourceId::new(s).unwrap()
}

pub fn ids(list: &[&str]) -> Vec<ResourceId> {
    list.iter().map(|s| id(s)).collect()
}

pub fn network(name: &str, cidr: &str) -> ResourceSpec {
    ResourceSpec::new(
        id(name),
        Parameters::Network(NetworkParameters {
            cidr_block: cidr.into(),
            region: None,
        }),
    )
}

pub fn cluster(name: &str, network: &str) -> ResourceSpec {
    ResourceSpec::new(
        id(name),
        Parameters::Cluster(ClusterParameters {
            version: "1.30".into(),
            node_count: 3,
            network: Some(id(network)),
        }),
    )
}

pub fn database(name: &str, network: &str) -> ResourceSpec {
    ResourceSpec::new(
        id(name),
        Parameters::Database(DatabaseParameters {
            engine: DatabaseEngine::Postgres,
            engine_version: "16.2".into(),
            instance_class: "db.t3.micro".into(),
            storage_gb: 20,
            network: Some(id(network)),
        }),
    )
}

pub fn workload(name: &str, cluster: Option<&str>, replicas: u32) -> ResourceSpec {
    ResourceSpec::new(
        id(name),
        Parameters::Workload(WorkloadParameters {
            image: "registry.local/app:1.0".into(),
            replicas,
            container_port: 8080,
            cluster: cluster.map(id),
            database: None,
            env: Default::default(),
        }),
    )
}

pub fn service(name: &str, workload: &str) -> ResourceSpec {
    ResourceSpec::new(
        id(name),
        Parameters::ServiceExposure(ServiceExposureParameters {
            workload: Some(id(workload)),
            port: 80,
            target_port: 8080,
            exposure: Exposure::LoadBalancer,
        }),
    )
}

/// net1 <- {clu1, db1} <- app1 <- svc1
pub fn layered_app() -> Vec<ResourceSpec> {
    let mut app = workload("app1", Some("clu1"), 2);
    if let Parameters::Workload(w) = &mut app.parameters {
        w.database = Some(id("db1"));
    }
    vec![
        service("svc1", "app1"),
        app,
        database("db1", "net1"),
        cluster("clu1", "net1"),
        network("net1", "10.0.0.0/16"),
    ]
}

/// A -> B -> C as three networks chained by explicit dependencies.
pub fn chain() -> Vec<ResourceSpec> {
    vec![
        network("a", "10.1.0.0/16"),
        network("b", "10.2.0.0/16").depends_on([id("a")]),
        network("c", "10.3.0.0/16").depends_on([id("b")]),
    ]
}

pub struct Harness {
    pub cloud: SandboxCloud,
    pub sink: Arc<MemorySink>,
    pub reconciler: Reconciler,
}

pub fn harness() -> Harness {
    harness_with(EngineSettings::default())
}

pub fn harness_with(settings: EngineSettings) -> Harness {
    let cloud = SandboxCloud::new();
    let sink = Arc::new(MemorySink::new());
    let reconciler = Reconciler::new(
        cloud.registry(),
        Arc::new(StateStore::in_memory()),
        ProviderContext::new("eu-west-1"),
        &settings,
        sink.clone(),
    );
    Harness {
        cloud,
        sink,
        reconciler,
    }
}
