//! strata-storage
//!
//! The State Store: last-applied and live-observed state per resource id,
//! held in memory and flushed to local disk (plus an optional S3 mirror)
//! after every change the engine makes.

pub mod client;
pub mod error;
pub mod objects;
pub mod persistence;
pub mod store;

pub use crate::error::StorageError;
pub use crate::persistence::{S3Mirror, StatePersistence, StateSnapshot};
pub use crate::store::StateStore;
