use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use strata_core::{
    build_graph, CoreError, DependencyGraph, FieldDrift, Parameters, ResourceId, ResourceKind,
    ResourceSpec, ResourceState, ResourceStatus,
};
use strata_storage::StateStore;

use crate::error::ReconcileError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Delete,
    NoOp,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::NoOp => "no-op",
        })
    }
}

/// Why a plan entry has the operation it has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cause {
    /// Never provisioned.
    FirstProvision,
    /// Desired parameters differ from the last applied ones.
    ParametersChanged,
    /// Drift detector flagged the live resource; apply re-asserts it.
    DriftCorrection,
    /// The previous operation on this resource failed or never finished.
    RetryFailed,
    InSync,
    /// Recorded in state but no longer desired.
    Orphaned,
    /// Explicit teardown request.
    Teardown,
}

/// What to do about dependents when only part of the recorded state is
/// being torn down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependentPolicy {
    /// Refuse while a dependent outside the target still exists remotely.
    #[default]
    Reject,
    /// Pull every dependent into the teardown.
    Cascade,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestroyTarget {
    All,
    Only(BTreeSet<ResourceId>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanEntry {
    pub id: ResourceId,
    pub kind: ResourceKind,
    pub operation: Operation,
    pub cause: Cause,
    /// Parameters to converge to. Set for every entry built from a
    /// desired spec, `None` for deletes.
    pub desired: Option<Parameters>,
    pub depends_on: BTreeSet<ResourceId>,
    /// Field-level reason for an update; empty otherwise.
    pub drift: Vec<FieldDrift>,
}

/// Ordered, immutable set of operations, one per resource.
///
/// Creates and updates come first in dependency order, deletes last in
/// reverse dependency order.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    entries: Vec<PlanEntry>,
    created_at: jiff::Timestamp,
}

impl Plan {
    fn new(entries: Vec<PlanEntry>) -> Self {
        Self {
            entries,
            created_at: jiff::Timestamp::now(),
        }
    }

    pub fn entries(&self) -> &[PlanEntry] {
        &self.entries
    }

    pub fn entry(&self, id: &ResourceId) -> Option<&PlanEntry> {
        self.entries.iter().find(|e| &e.id == id)
    }

    pub fn created_at(&self) -> jiff::Timestamp {
        self.created_at
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_changes(&self) -> bool {
        self.changes().next().is_some()
    }

    /// Entries that will call a provider.
    pub fn changes(&self) -> impl Iterator<Item = &PlanEntry> {
        self.entries
            .iter()
            .filter(|e| e.operation != Operation::NoOp)
    }

    pub fn count(&self, operation: Operation) -> usize {
        self.entries
            .iter()
            .filter(|e| e.operation == operation)
            .count()
    }

    pub fn ids(&self) -> Vec<&ResourceId> {
        self.entries.iter().map(|e| &e.id).collect()
    }
}

/// Diff desired specs against recorded state.
///
/// Pure with respect to providers: only the state store is consulted, so an
/// unchanged desired state over an all-`Applied` store yields an all-`NoOp`
/// plan and no provider traffic at all.
pub fn plan_apply(specs: &[ResourceSpec], store: &StateStore) -> Result<Plan, ReconcileError> {
    let graph = build_graph(specs)?;
    let by_id: BTreeMap<&ResourceId, &ResourceSpec> = specs.iter().map(|s| (&s.id, s)).collect();
    let mut entries = Vec::with_capacity(specs.len());

    for id in graph.order() {
        let Some(spec) = by_id.get(id) else {
            continue;
        };
        let recorded = store.get(id);
        if let Some(recorded) = &recorded {
            if recorded.kind != spec.kind() {
                return Err(ReconcileError::KindChanged {
                    id: id.clone(),
                    recorded: recorded.kind,
                    desired: spec.kind(),
                });
            }
        }
        entries.push(desired_entry(spec, recorded.as_ref()));
    }

    let orphans: Vec<ResourceState> = store
        .list_all()
        .into_iter()
        .filter(|s| !graph.contains(&s.id))
        .collect();
    let orphan_graph = state_graph(&orphans)?;
    let kinds: BTreeMap<&ResourceId, ResourceKind> =
        orphans.iter().map(|s| (&s.id, s.kind)).collect();
    for id in orphan_graph.reverse_order() {
        let kind = kinds[&id];
        entries.push(delete_entry(id, kind, Cause::Orphaned));
    }

    Ok(Plan::new(entries))
}

/// Teardown plan over recorded state, dependents before dependencies.
///
/// Ids in an `Only` target that have no record are skipped: they are
/// already gone as far as the engine knows.
pub fn plan_destroy(
    store: &StateStore,
    target: &DestroyTarget,
    policy: DependentPolicy,
) -> Result<Plan, ReconcileError> {
    let recorded = store.list_all();
    let graph = state_graph(&recorded)?;
    let by_id: BTreeMap<&ResourceId, &ResourceState> =
        recorded.iter().map(|s| (&s.id, s)).collect();

    let selected: BTreeSet<ResourceId> = match target {
        DestroyTarget::All => by_id.keys().map(|id| (*id).clone()).collect(),
        DestroyTarget::Only(ids) => {
            let mut selected: BTreeSet<ResourceId> = ids
                .iter()
                .filter(|id| graph.contains(id))
                .cloned()
                .collect();

            for id in selected.clone() {
                let outside: BTreeSet<ResourceId> = graph
                    .transitive_dependents(&id)
                    .into_iter()
                    .filter(|d| !selected.contains(d))
                    .collect();
                match policy {
                    DependentPolicy::Reject => {
                        let live: Vec<ResourceId> = outside
                            .into_iter()
                            .filter(|d| by_id.get(d).is_some_and(|s| s.exists_remotely()))
                            .collect();
                        if !live.is_empty() {
                            return Err(ReconcileError::DependentsStillApplied {
                                target: id,
                                dependents: live,
                            });
                        }
                    }
                    DependentPolicy::Cascade => {
                        if !outside.is_empty() {
                            tracing::info!(
                                target = %id,
                                dependents = outside.len(),
                                "cascading teardown to dependents"
                            );
                        }
                        selected.extend(outside);
                    }
                }
            }
            selected
        }
    };

    let entries = graph
        .reverse_order()
        .into_iter()
        .filter(|id| selected.contains(id))
        .map(|id| {
            let kind = by_id[&id].kind;
            delete_entry(id, kind, Cause::Teardown)
        })
        .collect();

    Ok(Plan::new(entries))
}

/// Dependency graph of recorded state. Edges to ids without a record are
/// dropped: whatever they pointed at has already been removed.
pub fn state_graph(records: &[ResourceState]) -> Result<DependencyGraph, CoreError> {
    let present: BTreeSet<&ResourceId> = records.iter().map(|s| &s.id).collect();
    DependencyGraph::from_edges(records.iter().map(|s| {
        let deps = s
            .depends_on
            .iter()
            .filter(|d| present.contains(d))
            .cloned()
            .collect();
        (s.id.clone(), deps)
    }))
}

fn desired_entry(spec: &ResourceSpec, recorded: Option<&ResourceState>) -> PlanEntry {
    let desired = &spec.parameters;
    let (operation, cause, drift) = match recorded {
        None => (Operation::Create, Cause::FirstProvision, vec![]),
        Some(state) if !state.exists_remotely() => {
            let cause = if state.status == ResourceStatus::Failed {
                Cause::RetryFailed
            } else {
                Cause::FirstProvision
            };
            (Operation::Create, cause, vec![])
        }
        Some(state) => match state.status {
            ResourceStatus::Degraded => {
                let observed = state.live.as_ref().or(state.last_applied.as_ref());
                let drift = observed.map(|o| desired.diff(o)).unwrap_or_default();
                (Operation::Update, Cause::DriftCorrection, drift)
            }
            ResourceStatus::Failed | ResourceStatus::Pending => {
                let drift = state
                    .last_applied
                    .as_ref()
                    .map(|la| desired.diff(la))
                    .unwrap_or_default();
                (Operation::Update, Cause::RetryFailed, drift)
            }
            ResourceStatus::Applied | ResourceStatus::Absent => match &state.last_applied {
                Some(last) if last == desired => (Operation::NoOp, Cause::InSync, vec![]),
                Some(last) => (Operation::Update, Cause::ParametersChanged, desired.diff(last)),
                None => (Operation::Update, Cause::ParametersChanged, vec![]),
            },
        },
    };

    PlanEntry {
        id: spec.id.clone(),
        kind: spec.kind(),
        operation,
        cause,
        desired: Some(desired.clone()),
        depends_on: spec.effective_dependencies(),
        drift,
    }
}

fn delete_entry(id: ResourceId, kind: ResourceKind, cause: Cause) -> PlanEntry {
    PlanEntry {
        id,
        kind,
        operation: Operation::Delete,
        cause,
        desired: None,
        depends_on: BTreeSet::new(),
        drift: vec![],
    }
}
