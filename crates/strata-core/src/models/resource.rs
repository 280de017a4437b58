use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::id::ResourceId;
use crate::models::parameters::Parameters;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Network,
    Cluster,
    Database,
    Workload,
    ServiceExposure,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 5] = [
        Self::Network,
        Self::Cluster,
        Self::Database,
        Self::Workload,
        Self::ServiceExposure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Cluster => "cluster",
            Self::Database => "database",
            Self::Workload => "workload",
            Self::ServiceExposure => "service_exposure",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One desired-state unit. Supplied fresh on every reconciliation request and
/// never stored as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub id: ResourceId,
    pub parameters: Parameters,
    /// Explicit ordering edges on top of the ones implied by `parameters`.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub depends_on: BTreeSet<ResourceId>,
}

impl ResourceSpec {
    pub fn new(id: ResourceId, parameters: Parameters) -> Self {
        Self {
            id,
            parameters,
            depends_on: BTreeSet::new(),
        }
    }

    pub fn depends_on(mut self, ids: impl IntoIterator<Item = ResourceId>) -> Self {
        self.depends_on.extend(ids);
        self
    }

    pub fn kind(&self) -> ResourceKind {
        self.parameters.kind()
    }

    /// `depends_on` plus every id named in the parameters.
    pub fn effective_dependencies(&self) -> BTreeSet<ResourceId> {
        let mut deps = self.depends_on.clone();
        deps.extend(self.parameters.referenced_ids());
        deps
    }
}

/// A desired-state document after syntax parsing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredState {
    pub resources: Vec<ResourceSpec>,
}

impl DesiredState {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
