//! Migration artifact storage for pg-relay.
//!
//! The exporter and importer never talk to each other directly; the
//! artifacts kept here are the only thing they share. That makes the
//! snapshot directory the durable record of a migration and lets the
//! steps run at different times or on different machines.
//!
//! # Storage Backends
//!
//! - `FilesystemStore` - one pretty-printed JSON file per artifact
//! - `MemoryStore` - in-process map, for tests and dry runs
//!
//! # Artifacts
//!
//! | Name | Contents |
//! |------|----------|
//! | `<table>.json` | [`TableSnapshot`](relay_core::TableSnapshot) |
//! | `<table>.schema.json` | [`TableSchema`](relay_core::TableSchema) |
//! | `migration-plan.json` | [`MigrationPlan`](relay_core::MigrationPlan) |
//! | `export-summary.json` | [`ExportSummary`] |
//! | `import-errors.json` | list of [`ErrorLogEntry`] |
//! | `<step>-report.json` | step reports |

mod filesystem;
mod memory;
pub mod store;
mod summary;


pub use filesystem::FilesystemStore;
pub use memory::MemoryStore;
pub use store::{SnapshotStore, StoreError};
pub use summary::{ErrorLogEntry, ExportSummary, TableExportSummary};
