//! Core types for the pg-relay migration engine.
//!
//! This crate provides the vocabulary shared by every migration step:
//!
//! - [`Row`] and [`TableSnapshot`] - opaque column-to-value records and
//!   the per-table artifact written by the exporter
//! - [`TableSchema`] - introspected structure of a single table
//! - [`MigrationPlan`] - the dependency-ordered list of tables that every
//!   step walks
//! - [`ImportOutcome`] - the per-table result produced by the importer
//! - [`DatabaseError`] - error classification shared by all database
//!   backends
//!
//! # Architecture
//!
//! ```text
//! relay-core (this crate)
//!    │
//!    ├─── snapshot-store   (persists snapshots, schemas, plans, reports)
//!    ├─── postgresql-ddl   (renders SQL from TableSchema)
//!    └─── pg-relay         (steps, PostgreSQL backend, CLI)
//! ```

pub mod error;
pub mod outcome;
pub mod plan;
pub mod row;
pub mod schema;

pub use error::DatabaseError;
pub use outcome::{
    ConflictPolicy, ImportOutcome, InsertOutcome, RowError, RunStatus, TableImportStatus,
};
pub use plan::{MigrationPlan, PlanError};
pub use row::{value_to_text, Row, TableSnapshot};
pub use schema::{ColumnDefinition, ForeignKey, IdentityKind, IndexDefinition, TableSchema};
