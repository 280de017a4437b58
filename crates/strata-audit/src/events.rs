use serde::{Deserialize, Serialize};
use serde_json::json;
use strata_core::{FieldDrift, ResourceId, ResourceKind};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Plan,
    Create,
    Update,
    Delete,
    Scale,
    Drift,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Scale => "scale",
            Self::Drift => "drift",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    /// Delete of something the provider no longer had.
    AlreadyGone,
    Failed,
    Skipped,
    Detected,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::AlreadyGone => "already_gone",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Detected => "detected",
        }
    }
}

/// One structured event: what happened to which resource, and how it went.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub timestamp: jiff::Timestamp,
    pub action: AuditAction,
    /// `None` for plan-wide events.
    pub resource_id: Option<ResourceId>,
    pub kind: Option<ResourceKind>,
    pub outcome: Outcome,
    pub details: Option<serde_json::Value>,
}

impl AuditEvent {
    pub fn new(action: AuditAction, outcome: Outcome) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: jiff::Timestamp::now(),
            action,
            resource_id: None,
            kind: None,
            outcome,
            details: None,
        }
    }

    pub fn for_resource(
        action: AuditAction,
        id: &ResourceId,
        kind: ResourceKind,
        outcome: Outcome,
    ) -> Self {
        Self {
            resource_id: Some(id.clone()),
            kind: Some(kind),
            ..Self::new(action, outcome)
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Live state of an applied resource no longer matches what was applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftEvent {
    pub event_id: Uuid,
    pub detected_at: jiff::Timestamp,
    pub resource_id: ResourceId,
    pub kind: ResourceKind,
    /// Field-level differences, last-applied as `expected`, live as `actual`.
    pub fields: Vec<FieldDrift>,
    /// The provider reported the resource gone altogether.
    pub missing: bool,
}

impl DriftEvent {
    pub fn changed(resource_id: ResourceId, kind: ResourceKind, fields: Vec<FieldDrift>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            detected_at: jiff::Timestamp::now(),
            resource_id,
            kind,
            fields,
            missing: false,
        }
    }

    pub fn missing(resource_id: ResourceId, kind: ResourceKind) -> Self {
        Self {
            missing: true,
            ..Self::changed(resource_id, kind, Vec::new())
        }
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.field.as_str()).collect()
    }

    /// Flatten into the generic event shape for sinks that only know one.
    pub fn to_audit(&self) -> AuditEvent {
        AuditEvent {
            event_id: self.event_id,
            timestamp: self.detected_at,
            ..AuditEvent::for_resource(
                AuditAction::Drift,
                &self.resource_id,
                self.kind,
                Outcome::Detected,
            )
        }
        .with_details(json!({
            "missing": self.missing,
            "fields": self.fields,
        }))
    }
}
