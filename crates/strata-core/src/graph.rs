use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::error::CoreError;
use crate::id::ResourceId;
use crate::models::resource::ResourceSpec;
use crate::validate::validate;

/// Validated, acyclic dependency graph with a deterministic execution order.
///
/// Order is Kahn's algorithm with the ready set kept sorted, so whenever
/// several resources are unblocked at once they come out by ascending id.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    order: Vec<ResourceId>,
    dependencies: BTreeMap<ResourceId, BTreeSet<ResourceId>>,
    dependents: BTreeMap<ResourceId, BTreeSet<ResourceId>>,
}

/// Validate a desired-state set and build its graph.
///
/// Edges are `depends_on` plus the references found in each resource's
/// parameters, so the graph has to be rebuilt whenever the desired state
/// changes.
pub fn build_graph(specs: &[ResourceSpec]) -> Result<DependencyGraph, CoreError> {
    validate(specs)?;
    DependencyGraph::from_edges(
        specs
            .iter()
            .map(|spec| (spec.id.clone(), spec.effective_dependencies())),
    )
}

impl DependencyGraph {
    /// Build from raw `(node, dependencies)` pairs. Also used to order
    /// recorded state for teardown, where no parameters are available.
    pub fn from_edges<I>(edges: I) -> Result<Self, CoreError>
    where
        I: IntoIterator<Item = (ResourceId, BTreeSet<ResourceId>)>,
    {
        let mut dependencies: BTreeMap<ResourceId, BTreeSet<ResourceId>> = BTreeMap::new();
        for (id, deps) in edges {
            if dependencies.contains_key(&id) {
                return Err(CoreError::DuplicateId(id));
            }
            dependencies.insert(id, deps);
        }

        let mut dependents: BTreeMap<ResourceId, BTreeSet<ResourceId>> = dependencies
            .keys()
            .map(|id| (id.clone(), BTreeSet::new()))
            .collect();

        for (id, deps) in &dependencies {
            for dep in deps {
                if dep == id {
                    return Err(CoreError::CycleDetected {
                        members: vec![id.clone()],
                    });
                }
                let Some(set) = dependents.get_mut(dep) else {
                    return Err(CoreError::DanglingDependency {
                        id: id.clone(),
                        missing: dep.clone(),
                    });
                };
                set.insert(id.clone());
            }
        }

        let mut remaining: BTreeMap<&ResourceId, usize> = dependencies
            .iter()
            .map(|(id, deps)| (id, deps.len()))
            .collect();
        let mut ready: BTreeSet<&ResourceId> = remaining
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(dependencies.len());

        while let Some(id) = ready.pop_first() {
            remaining.remove(id);
            order.push(id.clone());
            for dependent in &dependents[id] {
                if let Some(n) = remaining.get_mut(dependent) {
                    *n -= 1;
                    if *n == 0 {
                        ready.insert(dependent);
                    }
                }
            }
        }

        if !remaining.is_empty() {
            let unresolved: BTreeSet<&ResourceId> = remaining.keys().copied().collect();
            return Err(CoreError::CycleDetected {
                members: find_cycle(&dependencies, &unresolved),
            });
        }

        Ok(Self {
            order,
            dependencies,
            dependents,
        })
    }

    /// Dependencies before dependents.
    pub fn order(&self) -> &[ResourceId] {
        &self.order
    }

    /// Dependents before dependencies. Teardown order.
    pub fn reverse_order(&self) -> Vec<ResourceId> {
        self.order.iter().rev().cloned().collect()
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.dependencies.contains_key(id)
    }

    pub fn dependencies(&self, id: &ResourceId) -> Option<&BTreeSet<ResourceId>> {
        self.dependencies.get(id)
    }

    /// Direct dependents only.
    pub fn dependents(&self, id: &ResourceId) -> Option<&BTreeSet<ResourceId>> {
        self.dependents.get(id)
    }

    /// Everything that depends on `id`, directly or not. Excludes `id`.
    pub fn transitive_dependents(&self, id: &ResourceId) -> BTreeSet<ResourceId> {
        let mut found = BTreeSet::new();
        let mut queue: VecDeque<&ResourceId> = VecDeque::from([id]);
        while let Some(next) = queue.pop_front() {
            for dependent in self.dependents.get(next).into_iter().flatten() {
                if found.insert(dependent.clone()) {
                    queue.push_back(dependent);
                }
            }
        }
        found
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Walk dependency edges inside the unresolved set until a node repeats.
///
/// Every node left over by Kahn's algorithm still has an unresolved
/// dependency, so the walk cannot dead-end. The cycle is rotated to start at
/// its smallest id to keep error messages stable.
fn find_cycle(
    dependencies: &BTreeMap<ResourceId, BTreeSet<ResourceId>>,
    unresolved: &BTreeSet<&ResourceId>,
) -> Vec<ResourceId> {
    let Some(&start) = unresolved.first() else {
        return vec![];
    };

    let mut path: Vec<&ResourceId> = Vec::new();
    let mut position: BTreeMap<&ResourceId, usize> = BTreeMap::new();
    let mut current = start;

    loop {
        if let Some(&at) = position.get(current) {
            let mut cycle: Vec<ResourceId> = path[at..].iter().map(|id| (*id).clone()).collect();
            if let Some(min_at) = cycle
                .iter()
                .enumerate()
                .min_by(|a, b| a.1.cmp(b.1))
                .map(|(i, _)| i)
            {
                cycle.rotate_left(min_at);
            }
            return cycle;
        }
        position.insert(current, path.len());
        path.push(current);

        let next = dependencies
            .get(current)
            .and_then(|deps| deps.iter().find(|d| unresolved.contains(d)));
        match next {
            Some(next) => current = next,
            None => return path.into_iter().cloned().collect(),
        }
    }
}
