//! PostgreSQL implementation of [`RelationalStore`].

use async_trait::async_trait;
use postgresql_ddl::PostgreSQLDdl;
use relay_core::{ConflictPolicy, DatabaseError, InsertOutcome, Row, TableSchema};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_postgres::{Client, Statement};
use tracing::{debug, info, warn};

use super::error::{classify, classify_row};
use super::introspect;
use crate::database::RelationalStore;

/// One PostgreSQL session plus per-session caches.
///
/// Dropping the handle closes the session.
pub struct PostgresDatabase {
    label: String,
    pub(super) client: Mutex<Client>,
    driver: JoinHandle<()>,
    pub(super) ddl: PostgreSQLDdl,
    schemas: Mutex<HashMap<String, TableSchema>>,
    statements: Mutex<HashMap<String, Statement>>,
}

impl PostgresDatabase {
    pub fn new(
        label: impl Into<String>,
        schema: &str,
        client: Client,
        driver: JoinHandle<()>,
    ) -> Self {
        Self {
            label: label.into(),
            client: Mutex::new(client),
            driver,
            ddl: PostgreSQLDdl::new(schema),
            schemas: Mutex::new(HashMap::new()),
            statements: Mutex::new(HashMap::new()),
        }
    }

    /// Close the session and wait for the connection task to finish.
    pub async fn close(self) {
        let PostgresDatabase {
            label,
            client,
            driver,
            ..
        } = self;
        drop(client);
        if let Err(e) = driver.await {
            warn!(database = %label, "PostgreSQL connection task ended abnormally: {e}");
        }
        debug!(database = %label, "Closed PostgreSQL session");
    }

    /// Schema of `table`, described once per session.
    async fn cached_schema(&self, table: &str) -> Result<TableSchema, DatabaseError> {
        if let Some(cached) = self.schemas.lock().await.get(table) {
            return Ok(cached.clone());
        }
        let schema = self.describe_table(table).await?;
        self.schemas
            .lock()
            .await
            .insert(table.to_string(), schema.clone());
        Ok(schema)
    }

    async fn prepare_cached(
        &self,
        client: &Client,
        sql: &str,
        table: &str,
    ) -> Result<Statement, DatabaseError> {
        let mut statements = self.statements.lock().await;
        if let Some(statement) = statements.get(sql) {
            return Ok(statement.clone());
        }
        debug!(table, "Preparing: {sql}");
        let statement = client
            .prepare(sql)
            .await
            .map_err(|e| classify_row(e, &self.label, table))?;
        statements.insert(sql.to_string(), statement.clone());
        Ok(statement)
    }
}

#[async_trait]
impl RelationalStore for PostgresDatabase {
    fn label(&self) -> &str {
        &self.label
    }

    async fn list_tables(&self) -> Result<Vec<String>, DatabaseError> {
        let client = self.client.lock().await;
        introspect::list_tables(&client, &self.label, self.ddl.schema()).await
    }

    async fn describe_table(&self, table: &str) -> Result<TableSchema, DatabaseError> {
        let client = self.client.lock().await;
        introspect::describe_table(&client, &self.label, self.ddl.schema(), table).await
    }

    async fn table_exists(&self, table: &str) -> Result<bool, DatabaseError> {
        let client = self.client.lock().await;
        introspect::table_exists(&client, &self.label, self.ddl.schema(), table).await
    }

    async fn fetch_rows(&self, table: &str) -> Result<Vec<Row>, DatabaseError> {
        let schema = self.cached_schema(table).await?;
        let sql = self.ddl.to_select_rows(table, &schema.primary_key);
        debug!(table, "Full export query: {sql}");

        let client = self.client.lock().await;
        let rows = client
            .query(sql.as_str(), &[])
            .await
            .map_err(|e| classify(e, &self.label, table))?;

        rows.iter()
            .map(|row| {
                let value: Value = row.try_get(0).map_err(|e| classify(e, &self.label, table))?;
                match value {
                    Value::Object(map) => Ok(map),
                    other => Err(DatabaseError::Query {
                        table: table.to_string(),
                        message: format!("expected a JSON object per row, got {other}"),
                    }),
                }
            })
            .collect()
    }

    async fn count_rows(&self, table: &str) -> Result<u64, DatabaseError> {
        let sql = self.ddl.to_count(table);
        let client = self.client.lock().await;
        let row = client
            .query_one(sql.as_str(), &[])
            .await
            .map_err(|e| classify(e, &self.label, table))?;
        let count: i64 = row.get(0);
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn create_table(&self, schema: &TableSchema) -> Result<(), DatabaseError> {
        let client = self.client.lock().await;
        for statement in self.ddl.to_create_statements(schema) {
            debug!(table = %schema.name, "Executing DDL: {statement}");
            client
                .batch_execute(&statement)
                .await
                .map_err(|e| classify(e, &self.label, &schema.name))?;
        }
        drop(client);

        self.schemas.lock().await.remove(&schema.name);
        info!(database = %self.label, table = %schema.name, "Created table");
        Ok(())
    }

    async fn insert_row(
        &self,
        table: &str,
        row: &Row,
        policy: ConflictPolicy,
    ) -> Result<InsertOutcome, DatabaseError> {
        if row.is_empty() {
            return Err(DatabaseError::row("row has no columns"));
        }
        let schema = self.cached_schema(table).await?;
        let columns = schema.writable_columns(row.keys());
        if columns.is_empty() {
            return Err(DatabaseError::row("row has only generated columns"));
        }
        let sql = self.ddl.to_insert(&schema, &columns, policy);

        let client = self.client.lock().await;
        let statement = self.prepare_cached(&client, &sql, table).await?;
        let values = Value::Object(row.clone());

        match client.execute(&statement, &[&values]).await {
            Ok(0) => Ok(InsertOutcome::Conflict),
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(e) => Err(classify_row(e, &self.label, table)),
        }
    }

    async fn sync_sequences(&self, table: &str) -> Result<(), DatabaseError> {
        let schema = self.describe_table(table).await?;
        let qualified = self.ddl.table_name(table);

        let client = self.client.lock().await;
        for column in schema.columns.iter().filter(|c| c.is_sequence_backed()) {
            let sql = self.ddl.to_sync_sequence(table, &column.name);
            client
                .query(sql.as_str(), &[&qualified, &column.name])
                .await
                .map_err(|e| classify(e, &self.label, table))?;
            debug!(table, column = %column.name, "Synchronized sequence");
        }
        Ok(())
    }
}
