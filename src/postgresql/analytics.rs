//! PostgreSQL implementation of [`AnalyticsStore`].

use async_trait::async_trait;
use postgresql_ddl::{quote_ident, PostgreSQLDdl};
use relay_core::DatabaseError;
use tokio_postgres::Transaction;
use tracing::{debug, info, warn};

use super::error::classify;
use super::PostgresDatabase;
use crate::database::{
    AnalyticsStore, AnalyticsTarget, AppliedMerge, ConsolidationTables, GroupMerge,
    RelationalStore,
};

/// Statements for one consolidation run. Ids are compared in text form so
/// integer and UUID keys work the same way.
struct MergeStatements {
    count_group: String,
    count_one: String,
    repoint: String,
    delete: String,
}

impl MergeStatements {
    fn new(ddl: &PostgreSQLDdl, tables: &ConsolidationTables) -> Self {
        let targets = ddl.table_name(&tables.targets_table);
        let events = ddl.table_name(&tables.events_table);
        let id = quote_ident(&tables.id_column);
        let fk = quote_ident(&tables.event_target_column);

        Self {
            count_group: format!("SELECT COUNT(*) FROM {events} WHERE {fk}::text = ANY($1)"),
            count_one: format!("SELECT COUNT(*) FROM {events} WHERE {fk}::text = $1"),
            repoint: format!(
                "UPDATE {events} SET {fk} = (SELECT {id} FROM {targets} WHERE {id}::text = $1) \
                 WHERE {fk} = (SELECT {id} FROM {targets} WHERE {id}::text = $2)"
            ),
            delete: format!("DELETE FROM {targets} WHERE {id}::text = $1"),
        }
    }
}

#[async_trait]
impl AnalyticsStore for PostgresDatabase {
    async fn load_targets(
        &self,
        tables: &ConsolidationTables,
        target_type: &str,
    ) -> Result<Vec<AnalyticsTarget>, DatabaseError> {
        let id = quote_ident(&tables.id_column);
        let kind = quote_ident(&tables.type_column);
        let name = quote_ident(&tables.name_column);
        let referenced = quote_ident(&tables.referenced_entity_column);
        let sql = format!(
            "SELECT {id}::text, {kind}::text, {name}::text, {referenced}::text FROM {} \
             WHERE {kind}::text = $1 AND {name} IS NOT NULL ORDER BY {id}",
            self.ddl.table_name(&tables.targets_table)
        );
        debug!("Loading analytics targets: {sql}");

        let client = self.client.lock().await;
        let rows = client
            .query(sql.as_str(), &[&target_type])
            .await
            .map_err(|e| classify(e, self.label(), &tables.targets_table))?;

        Ok(rows
            .iter()
            .map(|row| AnalyticsTarget {
                id: row.get(0),
                target_type: row.get(1),
                target_name: row.get(2),
                referenced_entity_id: row.get(3),
            })
            .collect())
    }

    async fn apply_merges(
        &self,
        tables: &ConsolidationTables,
        merges: &[GroupMerge],
    ) -> Result<Vec<AppliedMerge>, DatabaseError> {
        let statements = MergeStatements::new(&self.ddl, tables);
        let mut client = self.client.lock().await;
        let transaction = client
            .transaction()
            .await
            .map_err(|e| classify(e, self.label(), &tables.targets_table))?;

        match merge_all(&transaction, &statements, tables, merges, self.label()).await {
            Ok(applied) => {
                transaction
                    .commit()
                    .await
                    .map_err(|e| classify(e, self.label(), &tables.targets_table))?;
                info!(groups = applied.len(), "Committed consolidation");
                Ok(applied)
            }
            Err(e) => {
                if let Err(rollback_error) = transaction.rollback().await {
                    warn!("Rollback after failed consolidation also failed: {rollback_error}");
                }
                Err(e)
            }
        }
    }
}

async fn merge_all(
    transaction: &Transaction<'_>,
    statements: &MergeStatements,
    tables: &ConsolidationTables,
    merges: &[GroupMerge],
    label: &str,
) -> Result<Vec<AppliedMerge>, DatabaseError> {
    let events_error = |e: tokio_postgres::Error| classify(e, label, &tables.events_table);
    let targets_error = |e: tokio_postgres::Error| classify(e, label, &tables.targets_table);
    let mut applied = Vec::with_capacity(merges.len());

    for merge in merges {
        let mut group_ids = vec![merge.canonical_id.clone()];
        group_ids.extend(merge.duplicate_ids.iter().cloned());

        let before: i64 = transaction
            .query_one(statements.count_group.as_str(), &[&group_ids])
            .await
            .map_err(events_error)?
            .get(0);

        let mut clicks_repointed = 0;
        for duplicate in &merge.duplicate_ids {
            clicks_repointed += transaction
                .execute(statements.repoint.as_str(), &[&merge.canonical_id, duplicate])
                .await
                .map_err(events_error)?;
            let deleted = transaction
                .execute(statements.delete.as_str(), &[duplicate])
                .await
                .map_err(targets_error)?;
            if deleted != 1 {
                return Err(DatabaseError::Consistency {
                    message: format!(
                        "expected to delete target {duplicate} of group '{}', deleted {deleted}",
                        merge.logical_name
                    ),
                });
            }
        }

        let after: i64 = transaction
            .query_one(statements.count_one.as_str(), &[&merge.canonical_id])
            .await
            .map_err(events_error)?
            .get(0);
        if before != after {
            return Err(DatabaseError::Consistency {
                message: format!(
                    "group '{}' had {before} clicks before merging and {after} after",
                    merge.logical_name
                ),
            });
        }

        debug!(
            group = %merge.logical_name,
            canonical = %merge.canonical_id,
            clicks_repointed,
            "Merged duplicate targets"
        );
        applied.push(AppliedMerge {
            logical_name: merge.logical_name.clone(),
            canonical_id: merge.canonical_id.clone(),
            removed_ids: merge.duplicate_ids.clone(),
            clicks_repointed,
            clicks_total: u64::try_from(after).unwrap_or_default(),
        });
    }
    Ok(applied)
}
