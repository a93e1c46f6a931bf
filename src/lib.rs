//! pg-relay library
//!
//! Moves relational data between two PostgreSQL environments through
//! durable, human-inspectable snapshots.
//!
//! # Steps
//!
//! Each step runs on its own and opens only the connections it needs:
//!
//! - [`introspect`] - read table structure from the catalog and build the
//!   dependency-ordered [`MigrationPlan`](relay_core::MigrationPlan)
//! - [`export`] - write one snapshot artifact per table plus a summary
//! - [`import`] - replay snapshots into the target in plan order,
//!   recording row failures instead of aborting
//! - [`verify`] - compare per-table row counts between source and target
//! - [`consolidate`] - merge duplicate analytics targets whose names differ
//!   only by a decorating suffix
//!
//! [`pipeline::run_all`] chains introspect, export, import and verify.
//!
//! # CLI Usage
//!
//! ```bash
//! # Snapshot production and replay into a local database
//! pg-relay run-all \
//!   --source-host prod-db.internal --source-database app --source-user readonly --source-ssl \
//!   --target-host localhost --target-database app_dev --target-user postgres
//!
//! # Re-run only the import, failing on duplicate keys
//! pg-relay import --conflict-policy fail --target-host localhost ...
//! ```

use clap::Parser;
use std::path::PathBuf;

pub mod config;
pub mod connect;
pub mod consolidate;
pub mod database;
pub mod export;
pub mod import;
pub mod introspect;
pub mod pipeline;
pub mod postgresql;
pub mod testing;
pub mod verify;

pub use database::{AnalyticsStore, RelationalStore};

/// Source database connection options
#[derive(Parser, Clone, Default)]
pub struct SourceOpts {
    /// Source PostgreSQL host
    #[arg(long, env = "SOURCE_DB_HOST")]
    pub source_host: Option<String>,

    /// Source PostgreSQL port (default: 5432)
    #[arg(long, env = "SOURCE_DB_PORT")]
    pub source_port: Option<u16>,

    /// Source database name
    #[arg(long, env = "SOURCE_DB_NAME")]
    pub source_database: Option<String>,

    /// Source database user
    #[arg(long, env = "SOURCE_DB_USER")]
    pub source_user: Option<String>,

    /// Source database password
    #[arg(long, env = "SOURCE_DB_PASSWORD", hide_env_values = true)]
    pub source_password: Option<String>,

    /// Require TLS for the source connection
    #[arg(
        long,
        env = "SOURCE_DB_SSL",
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    pub source_ssl: Option<bool>,

    /// Give up connecting to the source after this long (e.g. "30s", "2m")
    #[arg(long, value_name = "DURATION")]
    pub source_connect_timeout: Option<String>,
}

/// Target database connection options
#[derive(Parser, Clone, Default)]
pub struct TargetOpts {
    /// Target PostgreSQL host
    #[arg(long, env = "TARGET_DB_HOST")]
    pub target_host: Option<String>,

    /// Target PostgreSQL port (default: 5432)
    #[arg(long, env = "TARGET_DB_PORT")]
    pub target_port: Option<u16>,

    /// Target database name
    #[arg(long, env = "TARGET_DB_NAME")]
    pub target_database: Option<String>,

    /// Target database user
    #[arg(long, env = "TARGET_DB_USER")]
    pub target_user: Option<String>,

    /// Target database password
    #[arg(long, env = "TARGET_DB_PASSWORD", hide_env_values = true)]
    pub target_password: Option<String>,

    /// Require TLS for the target connection
    #[arg(
        long,
        env = "TARGET_DB_SSL",
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    pub target_ssl: Option<bool>,

    /// Give up connecting to the target after this long (e.g. "30s", "2m")
    #[arg(long, value_name = "DURATION")]
    pub target_connect_timeout: Option<String>,
}

/// Options selecting what to migrate and where artifacts live
#[derive(Parser, Clone, Debug, Default)]
pub struct PlanOpts {
    /// TOML configuration file
    #[arg(long, value_name = "PATH", env = "PG_RELAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding snapshot artifacts (default: ./migration-data)
    #[arg(long, value_name = "DIR")]
    pub snapshot_dir: Option<PathBuf>,

    /// Database schema (namespace) containing the tables (default: public)
    #[arg(long)]
    pub schema: Option<String>,

    /// Comma-separated tables to migrate; parents are ordered before children
    #[arg(long, value_delimiter = ',')]
    pub tables: Vec<String>,
}
