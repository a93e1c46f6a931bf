//! Catalog queries describing tables in one schema.

use relay_core::{
    ColumnDefinition, DatabaseError, ForeignKey, IdentityKind, IndexDefinition, TableSchema,
};
use tokio_postgres::Client;

use super::error::classify;

const LIST_TABLES: &str = "
    SELECT c.relname
    FROM pg_catalog.pg_class c
    JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
    WHERE n.nspname = $1 AND c.relkind IN ('r', 'p') AND NOT c.relispartition
    ORDER BY c.relname";

const TABLE_EXISTS: &str = "
    SELECT EXISTS (
        SELECT 1
        FROM pg_catalog.pg_class c
        JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
        WHERE n.nspname = $1 AND c.relname = $2 AND c.relkind IN ('r', 'p')
    )";

const COLUMNS: &str = "
    SELECT a.attname,
           pg_catalog.format_type(a.atttypid, a.atttypmod),
           a.attnotnull,
           pg_catalog.pg_get_expr(d.adbin, d.adrelid),
           a.attidentity::text,
           a.attgenerated::text
    FROM pg_catalog.pg_attribute a
    JOIN pg_catalog.pg_class c ON c.oid = a.attrelid
    JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
    LEFT JOIN pg_catalog.pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum
    WHERE n.nspname = $1 AND c.relname = $2 AND a.attnum > 0 AND NOT a.attisdropped
    ORDER BY a.attnum";

const PRIMARY_KEY: &str = "
    SELECT a.attname
    FROM pg_catalog.pg_index i
    JOIN pg_catalog.pg_class c ON c.oid = i.indrelid
    JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
    JOIN pg_catalog.pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey)
    WHERE n.nspname = $1 AND c.relname = $2 AND i.indisprimary
    ORDER BY array_position(i.indkey::int2[], a.attnum)";

const FOREIGN_KEYS: &str = "
    SELECT con.conname, a.attname, rc.relname, ra.attname
    FROM pg_catalog.pg_constraint con
    JOIN pg_catalog.pg_class c ON c.oid = con.conrelid
    JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
    JOIN pg_catalog.pg_class rc ON rc.oid = con.confrelid
    CROSS JOIN LATERAL unnest(con.conkey, con.confkey) WITH ORDINALITY AS k(attnum, ref_attnum, ord)
    JOIN pg_catalog.pg_attribute a ON a.attrelid = con.conrelid AND a.attnum = k.attnum
    JOIN pg_catalog.pg_attribute ra ON ra.attrelid = con.confrelid AND ra.attnum = k.ref_attnum
    WHERE con.contype = 'f' AND n.nspname = $1 AND c.relname = $2
    ORDER BY con.conname, k.ord";

const INDEXES: &str = "
    SELECT ic.relname, i.indisunique, a.attname
    FROM pg_catalog.pg_index i
    JOIN pg_catalog.pg_class c ON c.oid = i.indrelid
    JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
    JOIN pg_catalog.pg_class ic ON ic.oid = i.indexrelid
    CROSS JOIN LATERAL unnest(i.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord)
    JOIN pg_catalog.pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = k.attnum
    WHERE n.nspname = $1 AND c.relname = $2 AND NOT i.indisprimary
    ORDER BY ic.relname, k.ord";

pub(crate) async fn list_tables(
    client: &Client,
    database: &str,
    schema: &str,
) -> Result<Vec<String>, DatabaseError> {
    let rows = client
        .query(LIST_TABLES, &[&schema])
        .await
        .map_err(|e| classify(e, database, "pg_class"))?;
    Ok(rows.iter().map(|row| row.get(0)).collect())
}

pub(crate) async fn table_exists(
    client: &Client,
    database: &str,
    schema: &str,
    table: &str,
) -> Result<bool, DatabaseError> {
    let row = client
        .query_one(TABLE_EXISTS, &[&schema, &table])
        .await
        .map_err(|e| classify(e, database, table))?;
    Ok(row.get(0))
}

pub(crate) async fn describe_table(
    client: &Client,
    database: &str,
    schema: &str,
    table: &str,
) -> Result<TableSchema, DatabaseError> {
    let lookup_error = |e: tokio_postgres::Error| match classify(e, database, table) {
        DatabaseError::Query { table, message } => DatabaseError::SchemaLookup { table, message },
        other => other,
    };

    let column_rows = client
        .query(COLUMNS, &[&schema, &table])
        .await
        .map_err(lookup_error)?;
    if column_rows.is_empty() {
        return Err(DatabaseError::TableNotFound {
            table: table.to_string(),
        });
    }
    let columns = column_rows
        .iter()
        .map(|row| {
            // pg_attrdef holds the generation expression of a generated column.
            let expression: Option<String> = row.get(3);
            let identity: String = row.get(4);
            let generated: String = row.get(5);
            let (default, generated) = if generated == "s" {
                (None, expression)
            } else {
                (expression, None)
            };
            ColumnDefinition {
                name: row.get(0),
                data_type: row.get(1),
                nullable: !row.get::<_, bool>(2),
                default,
                identity: IdentityKind::from_catalog(&identity),
                generated,
            }
        })
        .collect();

    let primary_key = client
        .query(PRIMARY_KEY, &[&schema, &table])
        .await
        .map_err(lookup_error)?
        .iter()
        .map(|row| row.get(0))
        .collect();

    let mut foreign_keys: Vec<ForeignKey> = Vec::new();
    for row in client
        .query(FOREIGN_KEYS, &[&schema, &table])
        .await
        .map_err(lookup_error)?
    {
        let name: String = row.get(0);
        let column: String = row.get(1);
        let referenced_table: String = row.get(2);
        let referenced_column: String = row.get(3);
        match foreign_keys.last_mut() {
            Some(fk) if fk.name == name => {
                fk.columns.push(column);
                fk.referenced_columns.push(referenced_column);
            }
            _ => foreign_keys.push(ForeignKey {
                name,
                columns: vec![column],
                referenced_table,
                referenced_columns: vec![referenced_column],
            }),
        }
    }

    let mut indexes: Vec<IndexDefinition> = Vec::new();
    for row in client
        .query(INDEXES, &[&schema, &table])
        .await
        .map_err(lookup_error)?
    {
        let name: String = row.get(0);
        let unique: bool = row.get(1);
        let column: String = row.get(2);
        match indexes.last_mut() {
            Some(index) if index.name == name => index.columns.push(column),
            _ => indexes.push(IndexDefinition {
                name,
                columns: vec![column],
                unique,
            }),
        }
    }

    Ok(TableSchema {
        name: table.to_string(),
        columns,
        primary_key,
        foreign_keys,
        indexes,
    })
}
