//! Command-line interface for pg-relay
//!
//! # Usage Examples
//!
//! ## Step by step
//! ```bash
//! # Read table structure and the dependency order from production
//! pg-relay introspect --source-host prod-db --source-database app --source-user readonly
//!
//! # Snapshot every table into ./migration-data
//! pg-relay export --source-host prod-db --source-database app --source-user readonly
//!
//! # Replay into a local database, skipping rows that already exist
//! pg-relay import --target-host localhost --target-database app_dev --target-user postgres
//!
//! # Compare row counts
//! pg-relay verify --source-host prod-db ... --target-host localhost ...
//! ```
//!
//! ## Consolidation
//! ```bash
//! # Show which "Brand - 10OFF" style duplicates would be merged
//! pg-relay consolidate --target-type brand --dry-run --target-host localhost ...
//! ```
//!
//! ## Everything at once
//! ```bash
//! pg-relay run-all --config relay.toml
//! ```
//!
//! Exit codes: 0 on success, 2 on success with warnings (row errors,
//! failed tables, count mismatches, flagged groups), 1 on failure.

use anyhow::Context;
use clap::{Parser, Subcommand};
use pg_relay::config::Settings;
use pg_relay::consolidate::{consolidate, ConsolidationOptions, SuffixSeparator};
use pg_relay::export::{export_snapshots, export_status};
use pg_relay::import::{import_snapshots, ImportOptions};
use pg_relay::introspect::{introspect, load_plan, save_introspection, tables_to_export};
use pg_relay::pipeline::{run_all, Connector, PgConnector};
use pg_relay::verify::verify_counts;
use pg_relay::{PlanOpts, SourceOpts, TargetOpts};
use relay_core::{ConflictPolicy, RunStatus};
use snapshot_store::{FilesystemStore, SnapshotStore};
use tracing::info;

#[derive(Parser)]
#[command(name = "pg-relay")]
#[command(about = "Move PostgreSQL data between environments through inspectable snapshots")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read table structure from the source and save the migration plan
    Introspect {
        #[command(flatten)]
        plan: PlanOpts,

        #[command(flatten)]
        source: SourceOpts,
    },

    /// Snapshot every planned table from the source
    Export {
        #[command(flatten)]
        plan: PlanOpts,

        #[command(flatten)]
        source: SourceOpts,
    },

    /// Replay snapshots into the target in dependency order
    Import {
        #[command(flatten)]
        plan: PlanOpts,

        #[command(flatten)]
        target: TargetOpts,

        #[command(flatten)]
        import: ImportArgs,
    },

    /// Compare per-table row counts between source and target
    Verify {
        #[command(flatten)]
        plan: PlanOpts,

        #[command(flatten)]
        source: SourceOpts,

        #[command(flatten)]
        target: TargetOpts,
    },

    /// Merge analytics targets whose names differ only by a suffix
    Consolidate {
        #[command(flatten)]
        plan: PlanOpts,

        #[command(flatten)]
        target: TargetOpts,

        #[command(flatten)]
        consolidation: ConsolidateArgs,
    },

    /// Introspect, export, import and verify in one go
    RunAll {
        #[command(flatten)]
        plan: PlanOpts,

        #[command(flatten)]
        source: SourceOpts,

        #[command(flatten)]
        target: TargetOpts,

        #[command(flatten)]
        import: ImportArgs,

        /// Run consolidation on the target after verification
        #[arg(long)]
        consolidate: bool,

        #[command(flatten)]
        consolidation: ConsolidateArgs,
    },
}

#[derive(Parser, Clone, Debug)]
struct ImportArgs {
    /// What to do when a row's primary key already exists: skip or fail
    #[arg(long, value_name = "POLICY")]
    conflict_policy: Option<ConflictPolicy>,

    /// Import tables even when the target already holds as many rows as the snapshot
    #[arg(long)]
    no_resume: bool,

    /// Do not create tables missing on the target
    #[arg(long)]
    no_create_tables: bool,
}

impl ImportArgs {
    fn options(&self, settings: &Settings) -> ImportOptions {
        ImportOptions {
            conflict_policy: self.conflict_policy.unwrap_or(settings.conflict_policy),
            skip_populated_tables: !self.no_resume,
            create_missing_tables: !self.no_create_tables,
        }
    }
}

#[derive(Parser, Clone, Debug)]
struct ConsolidateArgs {
    /// Analytics target type to consolidate (e.g. "brand")
    #[arg(long)]
    target_type: Option<String>,

    /// Separator that starts a decorating suffix (default: " - ")
    #[arg(long)]
    separator: Option<String>,

    /// Report planned merges without changing anything
    #[arg(long)]
    dry_run: bool,
}

impl ConsolidateArgs {
    fn options(
        &self,
        settings: &Settings,
    ) -> anyhow::Result<(ConsolidationOptions, SuffixSeparator)> {
        let target_type = self
            .target_type
            .clone()
            .or_else(|| settings.consolidation.target_type.clone())
            .context("No target type given; pass --target-type or set consolidation.target_type")?;
        let separator = self
            .separator
            .clone()
            .unwrap_or_else(|| settings.separator().to_string());
        let options = ConsolidationOptions {
            target_type,
            tables: settings.consolidation.tables.clone(),
            dry_run: self.dry_run,
        };
        Ok((options, SuffixSeparator::new(separator)))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    match run().await {
        Ok(status) => {
            let code = status.exit_code();
            if code != 0 {
                std::process::exit(code);
            }
        }
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    }
    Ok(())
}

async fn run() -> anyhow::Result<RunStatus> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Introspect { plan, source } => {
            let settings = Settings::load(&plan)?;
            let store = FilesystemStore::new(&settings.snapshot_dir);
            let connector = connector(&settings, Some(&source), None)?;
            let database = connector.connect_source().await?;
            let result = async {
                let report = introspect(&database, &settings.tables).await?;
                save_introspection(&store, &report).await?;
                Ok::<_, anyhow::Error>(report)
            }
            .await;
            connector.release(database).await;
            let report = result?;

            println!("Migration plan ({} tables):", report.plan.len());
            for (position, table) in report.plan.tables().iter().enumerate() {
                println!("  {:>3}. {table}", position + 1);
            }
            for failure in &report.failures {
                println!("  skipped {}: {}", failure.table, failure.error);
            }
            Ok(RunStatus::from_warnings(!report.failures.is_empty()))
        }
        Commands::Export { plan, source } => {
            let settings = Settings::load(&plan)?;
            let store = FilesystemStore::new(&settings.snapshot_dir);
            let tables = tables_to_export(&store, &settings.tables).await?;
            let connector = connector(&settings, Some(&source), None)?;
            let database = connector.connect_source().await?;
            let result = async {
                let report = introspect(&database, &tables).await?;
                save_introspection(&store, &report).await?;
                let summary = export_snapshots(&database, &store, &report.plan).await?;
                Ok::<_, anyhow::Error>((report, summary))
            }
            .await;
            connector.release(database).await;
            let (report, summary) = result?;

            println!(
                "Exported {} records from {} tables to {}",
                summary.total_records,
                summary.per_table.len(),
                store.location()
            );
            for failed in summary.failed_tables() {
                println!(
                    "  failed {}: {}",
                    failed.table,
                    failed.error.as_deref().unwrap_or_default()
                );
            }
            Ok(RunStatus::from_warnings(!report.failures.is_empty())
                .combine(export_status(&summary)))
        }
        Commands::Import {
            plan,
            target,
            import,
        } => {
            let settings = Settings::load(&plan)?;
            let store = FilesystemStore::new(&settings.snapshot_dir);
            let migration_plan = load_plan(&store, &settings.tables).await?;
            let options = import.options(&settings);
            let connector = connector(&settings, None, Some(&target))?;
            let database = connector.connect_target().await?;
            let result = import_snapshots(&database, &store, &migration_plan, &options).await;
            connector.release(database).await;
            let report = result?;

            println!(
                "Import {}: {} inserted, {} skipped, {} failed",
                report.status, report.rows_inserted, report.rows_skipped, report.rows_failed
            );
            for outcome in &report.tables {
                if outcome.has_warnings() {
                    println!("  {}: {:?}", outcome.table_name, outcome.status);
                }
            }
            if !report.partially_imported.is_empty() {
                println!(
                    "Partially imported (see import-errors.json): {}",
                    report.partially_imported.join(", ")
                );
            }
            Ok(report.status)
        }
        Commands::Verify {
            plan,
            source,
            target,
        } => {
            let settings = Settings::load(&plan)?;
            let store = FilesystemStore::new(&settings.snapshot_dir);
            let migration_plan = load_plan(&store, &settings.tables).await?;
            let connector = connector(&settings, Some(&source), Some(&target))?;
            let source_db = connector.connect_source().await?;
            let result = match connector.connect_target().await {
                Ok(target_db) => {
                    let result = verify_counts(&source_db, &target_db, &migration_plan).await;
                    connector.release(target_db).await;
                    result
                }
                Err(e) => Err(e),
            };
            connector.release(source_db).await;
            let report = result?;
            store.write_report("verify", &report).await?;

            for table in &report.tables {
                println!(
                    "  {:<30} source={:<10} target={:<10} {}",
                    table.table,
                    count_text(table.source_count),
                    count_text(table.target_count),
                    if table.matches { "ok" } else { "MISMATCH" }
                );
            }
            Ok(report.status)
        }
        Commands::Consolidate {
            plan,
            target,
            consolidation,
        } => {
            let settings = Settings::load(&plan)?;
            let store = FilesystemStore::new(&settings.snapshot_dir);
            let (options, identity) = consolidation.options(&settings)?;
            let connector = connector(&settings, None, Some(&target))?;
            run_consolidation(&connector, &store, &identity, &options).await
        }
        Commands::RunAll {
            plan,
            source,
            target,
            import,
            consolidate,
            consolidation,
        } => {
            let settings = Settings::load(&plan)?;
            let store = FilesystemStore::new(&settings.snapshot_dir);
            let options = import.options(&settings);
            let consolidation = if consolidate {
                Some(consolidation.options(&settings)?)
            } else {
                None
            };
            let connector = connector(&settings, Some(&source), Some(&target))?;

            let tables = tables_to_export(&store, &settings.tables).await?;
            let report = run_all(&connector, &store, &tables, &options).await?;
            println!(
                "Exported {} records; imported {} ({} skipped, {} failed); counts {}",
                report.export.total_records,
                report.import.rows_inserted,
                report.import.rows_skipped,
                report.import.rows_failed,
                if report.verification.all_match {
                    "match"
                } else {
                    "differ"
                }
            );

            let mut status = report.status;
            if let Some((options, identity)) = consolidation {
                status = status
                    .combine(run_consolidation(&connector, &store, &identity, &options).await?);
            }
            info!("Finished: {status}");
            Ok(status)
        }
    }
}

fn connector(
    settings: &Settings,
    source: Option<&SourceOpts>,
    target: Option<&TargetOpts>,
) -> anyhow::Result<PgConnector> {
    Ok(PgConnector {
        source: source.map(|opts| settings.source_profile(opts)).transpose()?,
        target: target.map(|opts| settings.target_profile(opts)).transpose()?,
        schema: settings.schema.clone(),
    })
}

async fn run_consolidation(
    connector: &PgConnector,
    store: &FilesystemStore,
    identity: &SuffixSeparator,
    options: &ConsolidationOptions,
) -> anyhow::Result<RunStatus> {
    let database = connector.connect_target().await?;
    let result = consolidate(&database, identity, options).await;
    connector.release(database).await;
    let report = result?;
    store.write_report("consolidation", &report).await?;

    for merge in &report.merged {
        println!(
            "  merged {} -> {} ({} clicks moved, {} total)",
            merge.removed_ids.join(", "),
            merge.canonical_id,
            merge.clicks_repointed,
            merge.clicks_total
        );
    }
    for merge in &report.planned {
        println!(
            "  would merge {} -> {} ('{}')",
            merge.duplicate_ids.join(", "),
            merge.canonical_id,
            merge.logical_name
        );
    }
    for group in &report.flagged {
        println!("  flagged '{}': {}", group.logical_name, group.reason);
    }
    Ok(report.status)
}

fn count_text(count: Option<u64>) -> String {
    count.map_or_else(|| "-".to_string(), |c| c.to_string())
}
