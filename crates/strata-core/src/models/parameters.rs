use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::id::ResourceId;
use crate::models::drift::FieldDrift;
use crate::models::resource::ResourceKind;

/// Kind-specific desired parameters. The serde tag doubles as the resource
/// kind in a desired-state document:
///
/// ```json
/// {"kind": "workload", "image": "registry.local/app:1.4", "replicas": 2,
///  "container_port": 8080, "cluster": "clu1"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Parameters {
    Network(NetworkParameters),
    Cluster(ClusterParameters),
    Database(DatabaseParameters),
    Workload(WorkloadParameters),
    ServiceExposure(ServiceExposureParameters),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkParameters {
    pub cidr_block: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterParameters {
    pub version: String,
    pub node_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<ResourceId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseEngine {
    Postgres,
    Mysql,
    Mariadb,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseParameters {
    pub engine: DatabaseEngine,
    pub engine_version: String,
    pub instance_class: String,
    pub storage_gb: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<ResourceId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadParameters {
    /// Container image reference, e.g. "registry.local/frontend:1.4"
    pub image: String,
    pub replicas: u32,
    pub container_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<ResourceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<ResourceId>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Exposure {
    ClusterIp,
    NodePort,
    LoadBalancer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceExposureParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workload: Option<ResourceId>,
    pub port: u16,
    pub target_port: u16,
    pub exposure: Exposure,
}

/// A reference from one resource's parameters to another resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterReference<'a> {
    pub field: &'static str,
    pub expected: ResourceKind,
    pub target: &'a ResourceId,
}

pub const DATABASE_STORAGE_GB: std::ops::RangeInclusive<u32> = 20..=65536;
pub const NETWORK_PREFIX_LEN: std::ops::RangeInclusive<u8> = 8..=28;

impl Parameters {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Network(_) => ResourceKind::Network,
            Self::Cluster(_) => ResourceKind::Cluster,
            Self::Database(_) => ResourceKind::Database,
            Self::Workload(_) => ResourceKind::Workload,
            Self::ServiceExposure(_) => ResourceKind::ServiceExposure,
        }
    }

    /// Other resources named inside these parameters. Each one is an implicit
    /// dependency edge.
    pub fn references(&self) -> Vec<ParameterReference<'_>> {
        let candidates = match self {
            Self::Network(_) => vec![],
            Self::Cluster(p) => vec![("network", ResourceKind::Network, &p.network)],
            Self::Database(p) => vec![("network", ResourceKind::Network, &p.network)],
            Self::Workload(p) => vec![
                ("cluster", ResourceKind::Cluster, &p.cluster),
                ("database", ResourceKind::Database, &p.database),
            ],
            Self::ServiceExposure(p) => vec![("workload", ResourceKind::Workload, &p.workload)],
        };

        candidates
            .into_iter()
            .filter_map(|(field, expected, target)| {
                target.as_ref().map(|target| ParameterReference {
                    field,
                    expected,
                    target,
                })
            })
            .collect()
    }

    pub fn referenced_ids(&self) -> BTreeSet<ResourceId> {
        self.references()
            .into_iter()
            .map(|r| r.target.clone())
            .collect()
    }

    /// Replica count for workloads; `None` for every other kind.
    pub fn replicas(&self) -> Option<u32> {
        match self {
            Self::Workload(p) => Some(p.replicas),
            _ => None,
        }
    }

    /// Check value-level constraints. Returns a human-readable reason on
    /// failure; the caller attaches the resource id.
    pub fn check(&self) -> Result<(), String> {
        match self {
            Self::Network(p) => check_cidr(&p.cidr_block),
            Self::Cluster(p) => {
                if p.version.trim().is_empty() {
                    return Err("cluster version must not be empty".into());
                }
                if p.node_count == 0 {
                    return Err("node_count must be at least 1".into());
                }
                Ok(())
            }
            Self::Database(p) => {
                if p.engine_version.trim().is_empty() {
                    return Err("engine_version must not be empty".into());
                }
                if p.instance_class.trim().is_empty() {
                    return Err("instance_class must not be empty".into());
                }
                if !DATABASE_STORAGE_GB.contains(&p.storage_gb) {
                    return Err(format!(
                        "storage_gb {} outside {}..={}",
                        p.storage_gb,
                        DATABASE_STORAGE_GB.start(),
                        DATABASE_STORAGE_GB.end()
                    ));
                }
                Ok(())
            }
            Self::Workload(p) => {
                if p.image.is_empty() || p.image.chars().any(char::is_whitespace) {
                    return Err(format!("invalid image reference {:?}", p.image));
                }
                if p.container_port == 0 {
                    return Err("container_port must be non-zero".into());
                }
                if let Some(key) = p.env.keys().find(|k| k.is_empty() || k.contains('=')) {
                    return Err(format!("invalid env var name {key:?}"));
                }
                Ok(())
            }
            Self::ServiceExposure(p) => {
                if p.port == 0 || p.target_port == 0 {
                    return Err("port and target_port must be non-zero".into());
                }
                Ok(())
            }
        }
    }

    /// Field-by-field comparison against another parameter set.
    ///
    /// `self` is the expected side. A kind mismatch is reported as a single
    /// `kind` drift rather than a field listing.
    pub fn diff(&self, actual: &Parameters) -> Vec<FieldDrift> {
        if self.kind() != actual.kind() {
            return vec![FieldDrift {
                field: "kind".into(),
                expected: Value::String(self.kind().to_string()),
                actual: Value::String(actual.kind().to_string()),
            }];
        }

        let expected = self.field_map();
        let actual = actual.field_map();
        let fields: BTreeSet<&String> = expected.keys().chain(actual.keys()).collect();

        fields
            .into_iter()
            .filter(|f| f.as_str() != "kind")
            .filter_map(|field| {
                let e = expected.get(field).cloned().unwrap_or(Value::Null);
                let a = actual.get(field).cloned().unwrap_or(Value::Null);
                (e != a).then(|| FieldDrift {
                    field: field.clone(),
                    expected: e,
                    actual: a,
                })
            })
            .collect()
    }

    fn field_map(&self) -> serde_json::Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        }
    }
}

fn check_cidr(cidr: &str) -> Result<(), String> {
    let (addr, prefix) = cidr
        .split_once('/')
        .ok_or_else(|| format!("cidr_block {cidr:?} is missing a prefix length"))?;
    let addr: Ipv4Addr = addr
        .parse()
        .map_err(|_| format!("cidr_block {cidr:?} has an invalid address"))?;
    let prefix: u8 = prefix
        .parse()
        .map_err(|_| format!("cidr_block {cidr:?} has an invalid prefix length"))?;

    if !NETWORK_PREFIX_LEN.contains(&prefix) {
        return Err(format!(
            "cidr_block prefix /{prefix} outside /{}../{}",
            NETWORK_PREFIX_LEN.start(),
            NETWORK_PREFIX_LEN.end()
        ));
    }

    let mask = u32::MAX << (32 - u32::from(prefix));
    if u32::from(addr) & !mask != 0 {
        return Err(format!("cidr_block {cidr:?} has host bits set"));
    }
    Ok(())
}
