use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Structured before/after for a single parameter that no longer matches.
///
/// Produced when diffing desired against last-applied parameters (plan
/// annotations) and last-applied against live parameters (drift events).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDrift {
    /// Parameter name, e.g. "replicas" or "cidr_block"
    pub field: String,
    /// What we want (or last applied)
    pub expected: Value,
    /// What we have
    pub actual: Value,
}
