//! Shared record model, storage contract, protocol types, and errors for `medrec-tde` crates.

pub mod error;
pub mod protocol;
pub mod record;
pub mod storage;

pub use error::TdeError;
pub use record::{Record, SqlValue};
pub use storage::{Params, StorageError, StorageExecutor};
