//! strata-audit
//!
//! Structured events at the observability boundary: per-operation results,
//! plan summaries, scale actions and drift reports. Transport is up to the
//! [`EventSink`]; the default sink writes them through `tracing`.

pub mod events;
pub mod sink;

pub use crate::events::{AuditAction, AuditEvent, DriftEvent, Outcome};
pub use crate::sink::{EventSink, MemorySink, TracingSink};
