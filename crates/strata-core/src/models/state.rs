use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::id::{ProviderHandle, ResourceId};
use crate::models::parameters::Parameters;
use crate::models::resource::ResourceKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    Absent,
    Pending,
    Applied,
    Degraded,
    Failed,
}

/// Recorded and observed state for one resource id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    pub id: ResourceId,
    pub kind: ResourceKind,
    pub status: ResourceStatus,
    /// Snapshot of the parameters at the last successful apply.
    pub last_applied: Option<Parameters>,
    /// Most recent read from the provider adapter.
    pub live: Option<Parameters>,
    pub provider_handle: Option<ProviderHandle>,
    /// Effective dependencies at the last apply. Orders teardown of
    /// resources that have left the desired set.
    #[serde(default)]
    pub depends_on: BTreeSet<ResourceId>,
    pub updated_at: jiff::Timestamp,
}

impl ResourceState {
    /// Fresh record for a resource whose first operation is starting.
    pub fn pending(id: ResourceId, kind: ResourceKind, depends_on: BTreeSet<ResourceId>) -> Self {
        Self {
            id,
            kind,
            status: ResourceStatus::Pending,
            last_applied: None,
            live: None,
            provider_handle: None,
            depends_on,
            updated_at: jiff::Timestamp::now(),
        }
    }

    pub fn is_applied(&self) -> bool {
        self.status == ResourceStatus::Applied
    }

    /// Anything the provider may still be holding on to.
    pub fn exists_remotely(&self) -> bool {
        self.provider_handle.is_some()
    }

    pub fn touch(&mut self) {
        self.updated_at = jiff::Timestamp::now();
    }
}
