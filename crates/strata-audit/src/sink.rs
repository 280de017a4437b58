use std::sync::{Mutex, PoisonError};

use tracing::{info, warn};

use crate::events::{AuditEvent, DriftEvent, Outcome};

/// Destination for structured events. Implementations must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &AuditEvent);

    fn emit_drift(&self, event: &DriftEvent) {
        self.emit(&event.to_audit());
    }
}

/// Writes events as `tracing` records with `audit.*` fields, so they land
/// wherever the subscriber ships logs (JSON lines in the agent).
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &AuditEvent) {
        let resource_id = event
            .resource_id
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();
        let kind = event.kind.map(|k| k.as_str()).unwrap_or_default();
        let details = event
            .details
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();

        if event.outcome == Outcome::Failed {
            warn!(
                audit.event_id = %event.event_id,
                audit.action = event.action.as_str(),
                audit.resource_id = %resource_id,
                audit.kind = kind,
                audit.outcome = event.outcome.as_str(),
                audit.details = %details,
                "audit event"
            );
        } else {
            info!(
                audit.event_id = %event.event_id,
                audit.action = event.action.as_str(),
                audit.resource_id = %resource_id,
                audit.kind = kind,
                audit.outcome = event.outcome.as_str(),
                audit.details = %details,
                "audit event"
            );
        }
    }

    fn emit_drift(&self, event: &DriftEvent) {
        let fields = serde_json::to_string(&event.fields).unwrap_or_default();
        warn!(
            audit.event_id = %event.event_id,
            audit.action = "drift",
            audit.resource_id = %event.resource_id,
            audit.kind = event.kind.as_str(),
            drift.missing = event.missing,
            drift.fields = %fields,
            "drift detected"
        );
    }
}

/// Keeps every event in memory, for tests and for callers that want to
/// inspect what a reconciliation did.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<AuditEvent>>,
    drift: Mutex<Vec<DriftEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn drift_events(&self) -> Vec<DriftEvent> {
        self.drift
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.drift
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: &AuditEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }

    fn emit_drift(&self, event: &DriftEvent) {
        self.drift
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}
