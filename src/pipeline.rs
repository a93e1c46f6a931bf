//! Composed run: introspect, export, import, verify.
//!
//! Each step opens the connections it needs through a [`Connector`] and
//! releases them before the next step starts, on success and on failure.

use anyhow::Result;
use async_trait::async_trait;
use relay_core::RunStatus;
use serde::Serialize;
use snapshot_store::{ExportSummary, SnapshotStore};
use tracing::info;

use crate::connect::{connect, ConnectionProfile};
use crate::database::{AnalyticsStore, RelationalStore};
use crate::export::{export_snapshots, export_status};
use crate::import::{import_snapshots, ImportOptions, ImportReport};
use crate::introspect::{introspect, save_introspection, TableFailure};
use crate::postgresql::PostgresDatabase;
use crate::verify::{verify_counts, VerificationReport};

/// Opens and releases sessions for the steps.
#[async_trait]
pub trait Connector: Send + Sync {
    type Database: RelationalStore + AnalyticsStore + Send + Sync + 'static;

    async fn connect_source(&self) -> Result<Self::Database>;

    async fn connect_target(&self) -> Result<Self::Database>;

    async fn release(&self, database: Self::Database) {
        drop(database);
    }
}

/// Connects to PostgreSQL using resolved profiles.
pub struct PgConnector {
    pub source: Option<ConnectionProfile>,
    pub target: Option<ConnectionProfile>,
    pub schema: String,
}

impl PgConnector {
    async fn open(
        &self,
        profile: Option<&ConnectionProfile>,
        role: &str,
    ) -> Result<PostgresDatabase> {
        let profile =
            profile.ok_or_else(|| anyhow::anyhow!("No {role} connection configured"))?;
        Ok(connect(profile, &self.schema).await?)
    }
}

#[async_trait]
impl Connector for PgConnector {
    type Database = PostgresDatabase;

    async fn connect_source(&self) -> Result<PostgresDatabase> {
        self.open(self.source.as_ref(), "source").await
    }

    async fn connect_target(&self) -> Result<PostgresDatabase> {
        self.open(self.target.as_ref(), "target").await
    }

    async fn release(&self, database: PostgresDatabase) {
        database.close().await;
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunAllReport {
    pub plan: Vec<String>,
    pub introspection_failures: Vec<TableFailure>,
    pub export: ExportSummary,
    pub import: ImportReport,
    pub verification: VerificationReport,
    pub status: RunStatus,
}

/// Introspect and export from the source, import into the target, verify.
pub async fn run_all<C, A>(
    connector: &C,
    store: &A,
    requested: &[String],
    options: &ImportOptions,
) -> Result<RunAllReport>
where
    C: Connector,
    A: SnapshotStore,
{
    let source = connector.connect_source().await?;
    let exported = async {
        let introspection = introspect(&source, requested).await?;
        save_introspection(store, &introspection).await?;
        let summary = export_snapshots(&source, store, &introspection.plan).await?;
        Ok::<_, anyhow::Error>((introspection, summary))
    }
    .await;
    connector.release(source).await;
    let (introspection, export) = exported?;
    let plan = &introspection.plan;

    let target = connector.connect_target().await?;
    let import = import_snapshots(&target, store, plan, options).await;
    connector.release(target).await;
    let import = import?;

    let source = connector.connect_source().await?;
    let verification = match connector.connect_target().await {
        Ok(target) => {
            let verification = verify_counts(&source, &target, plan).await;
            connector.release(target).await;
            verification
        }
        Err(e) => Err(e),
    };
    connector.release(source).await;
    let verification = verification?;
    store.write_report("verify", &verification).await?;

    let status = RunStatus::from_warnings(!introspection.failures.is_empty())
        .combine(export_status(&export))
        .combine(import.status)
        .combine(verification.status);
    info!("Run {status}");

    let report = RunAllReport {
        plan: plan.tables().to_vec(),
        introspection_failures: introspection.failures.clone(),
        export,
        import,
        verification,
        status,
    };
    store.write_report("run", &report).await?;
    Ok(report)
}
