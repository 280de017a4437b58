use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use strata_audit::{AuditAction, AuditEvent, EventSink, Outcome};
use strata_core::{ResourceId, ResourceKind, ResourceState, ResourceStatus};
use strata_storage::StateStore;
use tokio_util::sync::CancellationToken;

use crate::adapter::{with_timeout, AdapterRegistry};
use crate::context::ProviderContext;
use crate::error::{AdapterError, ReconcileError};
use crate::plan::{Operation, Plan, PlanEntry};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", content = "message", rename_all = "snake_case")]
pub enum OperationResult {
    Succeeded,
    /// Delete of a resource the provider no longer had.
    AlreadyGone,
    /// NoOp entry; no provider call.
    Unchanged,
    Failed(String),
    /// Never attempted: an earlier entry failed or the run was cancelled.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationOutcome {
    pub id: ResourceId,
    pub kind: ResourceKind,
    pub operation: Operation,
    pub result: OperationResult,
}

/// Per-entry result of executing a plan, in plan order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionReport {
    pub outcomes: Vec<OperationOutcome>,
}

impl ExecutionReport {
    pub fn outcome(&self, id: &ResourceId) -> Option<&OperationOutcome> {
        self.outcomes.iter().find(|o| &o.id == id)
    }

    /// Ids whose operation went through (including tolerated NotFound).
    pub fn succeeded(&self) -> Vec<&ResourceId> {
        self.outcomes
            .iter()
            .filter(|o| {
                matches!(
                    o.result,
                    OperationResult::Succeeded | OperationResult::AlreadyGone
                )
            })
            .map(|o| &o.id)
            .collect()
    }

    pub fn failed(&self) -> Option<&OperationOutcome> {
        self.outcomes
            .iter()
            .find(|o| matches!(o.result, OperationResult::Failed(_)))
    }

    pub fn skipped(&self) -> Vec<&ResourceId> {
        self.outcomes
            .iter()
            .filter(|o| o.result == OperationResult::Skipped)
            .map(|o| &o.id)
            .collect()
    }

    /// Entries that ran to an outcome, successful or not.
    pub fn completed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.result != OperationResult::Skipped)
            .count()
    }

    fn push(&mut self, entry: &PlanEntry, result: OperationResult) {
        self.outcomes.push(OperationOutcome {
            id: entry.id.clone(),
            kind: entry.kind,
            operation: entry.operation,
            result,
        });
    }

    fn skip_rest(&mut self, rest: &[PlanEntry]) {
        for entry in rest {
            self.push(entry, OperationResult::Skipped);
        }
    }
}

/// Executes plans against the provider adapters and records the outcome of
/// every operation in the state store.
pub struct Engine {
    registry: AdapterRegistry,
    store: Arc<StateStore>,
    context: ProviderContext,
    call_timeout: Duration,
    sink: Arc<dyn EventSink>,
}

impl Engine {
    pub fn new(
        registry: AdapterRegistry,
        store: Arc<StateStore>,
        context: ProviderContext,
        call_timeout: Duration,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            registry,
            store,
            context,
            call_timeout,
            sink,
        }
    }

    /// Execute a plan in order.
    ///
    /// The first failed provider call marks its resource `Failed` and stops
    /// the run; everything after it is reported as skipped and left exactly
    /// as it was. Cancellation is honoured between operations only. State is
    /// flushed after every completed operation.
    pub async fn apply(
        &self,
        plan: &Plan,
        cancel: &CancellationToken,
    ) -> Result<ExecutionReport, ReconcileError> {
        self.registry
            .ensure_covers(plan.changes().map(|e| e.kind))?;

        let entries = plan.entries();
        let mut report = ExecutionReport {
            outcomes: Vec::with_capacity(entries.len()),
        };

        for (index, entry) in entries.iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::warn!(
                    completed = report.completed(),
                    remaining = entries.len() - index,
                    "plan execution cancelled"
                );
                report.skip_rest(&entries[index..]);
                return Err(ReconcileError::Cancelled {
                    report: Box::new(report),
                });
            }

            let result = match entry.operation {
                Operation::NoOp => {
                    report.push(entry, OperationResult::Unchanged);
                    continue;
                }
                Operation::Create | Operation::Update => self.converge(entry).await,
                Operation::Delete => self.remove(entry).await,
            };

            match result {
                Ok(result) => {
                    self.emit(entry, &result);
                    report.push(entry, result);
                }
                Err(error) => {
                    let result = OperationResult::Failed(error.to_string());
                    self.emit(entry, &result);
                    report.push(entry, result);
                    report.skip_rest(&entries[index + 1..]);
                    if let Err(e) = self.store.persist().await {
                        tracing::warn!(error = %e, "failed to flush state after failed operation");
                    }
                    tracing::error!(
                        id = %entry.id,
                        operation = %entry.operation,
                        error = %error,
                        "operation failed, halting plan"
                    );
                    return Err(ReconcileError::Halted {
                        resource: entry.id.clone(),
                        operation: entry.operation,
                        error,
                        report: Box::new(report),
                    });
                }
            }

            if let Err(source) = self.store.persist().await {
                report.skip_rest(&entries[index + 1..]);
                return Err(ReconcileError::Persistence {
                    source,
                    report: Box::new(report),
                });
            }
        }

        self.sink.emit(
            &AuditEvent::new(AuditAction::Plan, Outcome::Succeeded).with_details(json!({
                "creates": plan.count(Operation::Create),
                "updates": plan.count(Operation::Update),
                "deletes": plan.count(Operation::Delete),
                "unchanged": plan.count(Operation::NoOp),
            })),
        );
        Ok(report)
    }

    /// Execute a teardown plan. Same halt and cancel rules as [`apply`],
    /// but every entry must be a delete.
    ///
    /// [`apply`]: Engine::apply
    pub async fn destroy(
        &self,
        plan: &Plan,
        cancel: &CancellationToken,
    ) -> Result<ExecutionReport, ReconcileError> {
        if let Some(entry) = plan
            .entries()
            .iter()
            .find(|e| e.operation != Operation::Delete)
        {
            return Err(ReconcileError::NotATeardownPlan {
                id: entry.id.clone(),
                operation: entry.operation,
            });
        }
        self.apply(plan, cancel).await
    }

    async fn converge(&self, entry: &PlanEntry) -> Result<OperationResult, AdapterError> {
        let Some(desired) = &entry.desired else {
            return Err(AdapterError::Failed(format!(
                "plan entry for {} carries no desired parameters",
                entry.id
            )));
        };
        let adapter = self
            .registry
            .get(entry.kind)
            .map_err(|e| AdapterError::Failed(e.to_string()))?;

        let marked = self
            .store
            .update(&entry.id, |s| s.status = ResourceStatus::Pending);
        if marked.is_none() {
            self.store.put(ResourceState::pending(
                entry.id.clone(),
                entry.kind,
                entry.depends_on.clone(),
            ));
        }

        tracing::info!(id = %entry.id, kind = %entry.kind, operation = %entry.operation, "converging resource");
        let call = adapter.create_or_update(&self.context, &entry.id, desired);
        match with_timeout(self.call_timeout, call).await {
            Ok(handle) => {
                self.store.update(&entry.id, |s| {
                    s.status = ResourceStatus::Applied;
                    s.last_applied = Some(desired.clone());
                    s.provider_handle = Some(handle);
                    s.depends_on = entry.depends_on.clone();
                });
                Ok(OperationResult::Succeeded)
            }
            Err(error) => {
                self.store
                    .update(&entry.id, |s| s.status = ResourceStatus::Failed);
                Err(error)
            }
        }
    }

    async fn remove(&self, entry: &PlanEntry) -> Result<OperationResult, AdapterError> {
        let Some(recorded) = self.store.get(&entry.id) else {
            return Ok(OperationResult::AlreadyGone);
        };
        let Some(handle) = recorded.provider_handle else {
            // Never made it to the provider; only the record needs to go.
            self.store.delete(&entry.id);
            return Ok(OperationResult::AlreadyGone);
        };
        let adapter = self
            .registry
            .get(recorded.kind)
            .map_err(|e| AdapterError::Failed(e.to_string()))?;

        tracing::info!(id = %entry.id, kind = %recorded.kind, "deleting resource");
        match with_timeout(self.call_timeout, adapter.delete(&self.context, &handle)).await {
            Ok(()) => {
                self.store.delete(&entry.id);
                Ok(OperationResult::Succeeded)
            }
            Err(AdapterError::NotFound) => {
                tracing::info!(id = %entry.id, "resource already gone at provider");
                self.store.delete(&entry.id);
                Ok(OperationResult::AlreadyGone)
            }
            Err(error) => {
                self.store
                    .update(&entry.id, |s| s.status = ResourceStatus::Failed);
                Err(error)
            }
        }
    }

    fn emit(&self, entry: &PlanEntry, result: &OperationResult) {
        let action = match entry.operation {
            Operation::Create => AuditAction::Create,
            Operation::Update => AuditAction::Update,
            Operation::Delete => AuditAction::Delete,
            Operation::NoOp => return,
        };
        let (outcome, details) = match result {
            OperationResult::Succeeded => (Outcome::Succeeded, json!({"cause": entry.cause})),
            OperationResult::AlreadyGone => (Outcome::AlreadyGone, json!({"cause": entry.cause})),
            OperationResult::Failed(message) => (
                Outcome::Failed,
                json!({"cause": entry.cause, "error": message}),
            ),
            OperationResult::Unchanged | OperationResult::Skipped => return,
        };
        self.sink.emit(
            &AuditEvent::for_resource(action, &entry.id, entry.kind, outcome).with_details(details),
        );
    }
}
