use std::collections::BTreeMap;

use crate::error::CoreError;
use crate::id::ResourceId;
use crate::models::resource::{ResourceKind, ResourceSpec};

/// Reject malformed desired state before any graph work or provider call.
///
/// Checks, in order: duplicate ids, per-kind parameter constraints, and that
/// every parameter reference to a declared resource points at the right kind.
/// References to undeclared ids are left to the graph builder, which reports
/// them as dangling dependencies.
pub fn validate(specs: &[ResourceSpec]) -> Result<(), CoreError> {
    let mut kinds: BTreeMap<&ResourceId, ResourceKind> = BTreeMap::new();
    for spec in specs {
        if kinds.insert(&spec.id, spec.kind()).is_some() {
            return Err(CoreError::DuplicateId(spec.id.clone()));
        }
    }

    for spec in specs {
        spec.parameters
            .check()
            .map_err(|reason| CoreError::InvalidParameters {
                id: spec.id.clone(),
                reason,
            })?;

        for reference in spec.parameters.references() {
            let Some(&actual) = kinds.get(reference.target) else {
                continue;
            };
            if actual != reference.expected {
                return Err(CoreError::InvalidReference {
                    id: spec.id.clone(),
                    field: reference.field,
                    target: reference.target.clone(),
                    expected: reference.expected,
                    actual,
                });
            }
        }
    }

    Ok(())
}
