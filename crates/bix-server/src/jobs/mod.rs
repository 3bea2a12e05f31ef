//! Job lifecycle management
//!
//! - [`registry`]: in-process directory of import and export jobs
//! - [`idempotency`]: client key to job id ledger for import retries
//! - [`runner`]: spawns pipeline work onto detached tasks
//! - [`sweeper`]: periodic pruning of jobs, ledger entries, and old files

pub mod idempotency;
pub mod registry;
pub mod runner;
pub mod sweeper;

pub use idempotency::IdempotencyLedger;
pub use registry::{JobRegistry, RegistryStats};
pub use runner::JobRunner;
