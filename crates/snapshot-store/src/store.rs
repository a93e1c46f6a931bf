//! Artifact storage trait and typed accessors.

use async_trait::async_trait;
use relay_core::plan::validate_table_name;
use relay_core::{MigrationPlan, PlanError, TableSchema, TableSnapshot};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::summary::{ErrorLogEntry, ExportSummary};

pub const PLAN_ARTIFACT: &str = "migration-plan.json";
pub const EXPORT_SUMMARY_ARTIFACT: &str = "export-summary.json";
pub const ERROR_LOG_ARTIFACT: &str = "import-errors.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access artifact {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("artifact {name} is not valid JSON: {source}")]
    Format {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    InvalidName(#[from] PlanError),
}

pub fn snapshot_artifact(table: &str) -> Result<String, StoreError> {
    validate_table_name(table)?;
    Ok(format!("{table}.json"))
}

pub fn schema_artifact(table: &str) -> Result<String, StoreError> {
    validate_table_name(table)?;
    Ok(format!("{table}.schema.json"))
}

/// Storage backend for migration artifacts.
///
/// Backends only move named blobs; the provided methods add the typed
/// layer on top. A missing artifact reads as `None`.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Store an artifact, replacing any previous version atomically.
    async fn put_artifact(&self, name: &str, contents: Vec<u8>) -> Result<(), StoreError>;

    async fn get_artifact(&self, name: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Human-readable location, used in logs and summaries.
    fn location(&self) -> String;

    async fn write_snapshot(&self, snapshot: &TableSnapshot) -> Result<(), StoreError> {
        let name = snapshot_artifact(&snapshot.table_name)?;
        self.put_artifact(&name, encode(&name, snapshot)?).await
    }

    async fn read_snapshot(&self, table: &str) -> Result<Option<TableSnapshot>, StoreError> {
        let name = snapshot_artifact(table)?;
        decode(&name, self.get_artifact(&name).await?)
    }

    async fn write_schema(&self, schema: &TableSchema) -> Result<(), StoreError> {
        let name = schema_artifact(&schema.name)?;
        self.put_artifact(&name, encode(&name, schema)?).await
    }

    async fn read_schema(&self, table: &str) -> Result<Option<TableSchema>, StoreError> {
        let name = schema_artifact(table)?;
        decode(&name, self.get_artifact(&name).await?)
    }

    async fn write_plan(&self, plan: &MigrationPlan) -> Result<(), StoreError> {
        self.put_artifact(PLAN_ARTIFACT, encode(PLAN_ARTIFACT, plan)?)
            .await
    }

    async fn read_plan(&self) -> Result<Option<MigrationPlan>, StoreError> {
        decode(PLAN_ARTIFACT, self.get_artifact(PLAN_ARTIFACT).await?)
    }

    async fn write_summary(&self, summary: &ExportSummary) -> Result<(), StoreError> {
        self.put_artifact(
            EXPORT_SUMMARY_ARTIFACT,
            encode(EXPORT_SUMMARY_ARTIFACT, summary)?,
        )
        .await
    }

    async fn read_summary(&self) -> Result<Option<ExportSummary>, StoreError> {
        decode(
            EXPORT_SUMMARY_ARTIFACT,
            self.get_artifact(EXPORT_SUMMARY_ARTIFACT).await?,
        )
    }

    async fn write_error_log(&self, entries: &[ErrorLogEntry]) -> Result<(), StoreError> {
        self.put_artifact(ERROR_LOG_ARTIFACT, encode(ERROR_LOG_ARTIFACT, &entries)?)
            .await
    }

    async fn read_error_log(&self) -> Result<Vec<ErrorLogEntry>, StoreError> {
        let entries: Option<Vec<ErrorLogEntry>> =
            decode(ERROR_LOG_ARTIFACT, self.get_artifact(ERROR_LOG_ARTIFACT).await?)?;
        Ok(entries.unwrap_or_default())
    }

    /// Store a step report as `<step>-report.json`.
    async fn write_report<T>(&self, step: &str, report: &T) -> Result<(), StoreError>
    where
        T: Serialize + Sync,
        Self: Sized,
    {
        let name = format!("{step}-report.json");
        let contents = encode(&name, report)?;
        self.put_artifact(&name, contents).await
    }
}

fn encode<T: Serialize + ?Sized>(name: &str, value: &T) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec_pretty(value).map_err(|source| StoreError::Format {
        name: name.to_string(),
        source,
    })
}

fn decode<T: DeserializeOwned>(
    name: &str,
    contents: Option<Vec<u8>>,
) -> Result<Option<T>, StoreError> {
    match contents {
        Some(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StoreError::Format {
                name: name.to_string(),
                source,
            }),
        None => Ok(None),
    }
}
