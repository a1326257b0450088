// Application layer - ledger use cases and orchestration.
// Callers (the CLI, or any other front end) only talk to `LedgerService`.

pub mod error;
pub mod service;

pub use crate::storage::EntryFilter;
pub use error::*;
pub use service::*;
