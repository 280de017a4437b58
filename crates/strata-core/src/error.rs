use thiserror::Error;

use crate::id::ResourceId;
use crate::models::resource::ResourceKind;

/// Plan-time failures. Any of these rejects the whole request before a
/// provider is contacted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("invalid resource id {id:?}: {reason}")]
    InvalidId { id: String, reason: String },

    #[error("duplicate resource id: {0}")]
    DuplicateId(ResourceId),

    #[error("invalid parameters for {id}: {reason}")]
    InvalidParameters { id: ResourceId, reason: String },

    #[error("{id}.{field} references {target}, which is a {actual} (expected {expected})")]
    InvalidReference {
        id: ResourceId,
        field: &'static str,
        target: ResourceId,
        expected: ResourceKind,
        actual: ResourceKind,
    },

    #[error("{id} depends on {missing}, which is not declared")]
    DanglingDependency { id: ResourceId, missing: ResourceId },

    #[error("dependency cycle detected: {}", format_cycle(.members))]
    CycleDetected { members: Vec<ResourceId> },
}

fn format_cycle(members: &[ResourceId]) -> String {
    let mut out = members
        .iter()
        .map(ResourceId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ");
    if let Some(first) = members.first() {
        out.push_str(" -> ");
        out.push_str(first.as_str());
    }
    out
}
