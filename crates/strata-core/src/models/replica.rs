use serde::{Deserialize, Serialize};

use crate::id::ResourceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingPhase {
    Idle,
    Scaling,
}

/// Desired vs observed replica count for one workload, as seen by the most
/// recent scaling tick. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaStatus {
    pub id: ResourceId,
    pub desired_replicas: u32,
    pub observed_replicas: Option<u32>,
    pub phase: ScalingPhase,
}

impl ReplicaStatus {
    /// Signed correction needed to reach the desired count, if observed.
    pub fn delta(&self) -> Option<i64> {
        self.observed_replicas
            .map(|observed| i64::from(self.desired_replicas) - i64::from(observed))
    }

    pub fn converged(&self) -> bool {
        self.delta() == Some(0)
    }
}
