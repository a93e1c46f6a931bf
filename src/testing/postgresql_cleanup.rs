//! PostgreSQL test setup and cleanup utilities

use anyhow::Result;
use postgresql_ddl::quote_ident;
use tokio_postgres::{Client, NoTls};

use super::test_helpers::TestConfig;

/// Open a plain client for seeding or inspecting a test database.
pub async fn connect_client(config: &TestConfig, database: &str) -> Result<Client> {
    let mut pg = config.source_profile().to_pg_config();
    pg.dbname(database);
    let (client, connection) = pg.connect(NoTls).await?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!("PostgreSQL test connection error: {e}");
        }
    });
    Ok(client)
}

/// Drop and recreate the test schema.
///
/// Call at both the beginning and end of a test to leave no state behind.
pub async fn reset_schema(client: &Client, schema: &str) -> Result<()> {
    let schema = quote_ident(schema);
    client
        .batch_execute(&format!(
            "DROP SCHEMA IF EXISTS {schema} CASCADE; CREATE SCHEMA {schema};"
        ))
        .await?;
    Ok(())
}

pub async fn drop_schema(client: &Client, schema: &str) -> Result<()> {
    client
        .batch_execute(&format!(
            "DROP SCHEMA IF EXISTS {} CASCADE",
            quote_ident(schema)
        ))
        .await?;
    Ok(())
}
