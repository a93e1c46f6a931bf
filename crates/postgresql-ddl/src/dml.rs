//! Row-level statements.

use relay_core::{ConflictPolicy, IdentityKind, TableSchema};

use crate::{quote_ident, quoted_list, PostgreSQLDdl};

/// Table alias in the export query. Always used as `relay_row.*` or
/// `relay_row."column"`, so a column of the same name cannot shadow it.
const ROW_ALIAS: &str = "relay_row";

impl PostgreSQLDdl {
    /// Generate an INSERT that reads its values from a JSON object in `$1`.
    ///
    /// `json_populate_record` lets the server coerce each JSON value to the
    /// declared column type, so no per-type binding is needed on our side.
    /// `columns` must already exclude generated columns. Explicit values for
    /// `GENERATED ALWAYS` identity columns are kept with `OVERRIDING SYSTEM
    /// VALUE`. Under [`ConflictPolicy::SkipOnConflict`] a duplicate primary
    /// key turns into an insert of zero rows.
    pub fn to_insert(&self, table: &TableSchema, columns: &[String], policy: ConflictPolicy) -> String {
        let table_name = self.table_name(&table.name);
        let column_list = quoted_list(columns);
        let overriding = columns.iter().any(|name| {
            table
                .column(name)
                .is_some_and(|c| c.identity == Some(IdentityKind::Always))
        });
        let overriding_clause = if overriding { " OVERRIDING SYSTEM VALUE" } else { "" };
        let conflict_clause = match policy {
            ConflictPolicy::FailOnConflict => String::new(),
            ConflictPolicy::SkipOnConflict if table.primary_key.is_empty() => {
                " ON CONFLICT DO NOTHING".to_string()
            }
            ConflictPolicy::SkipOnConflict => {
                format!(" ON CONFLICT ({}) DO NOTHING", quoted_list(&table.primary_key))
            }
        };
        format!(
            "INSERT INTO {table_name} ({column_list}){overriding_clause} SELECT {column_list} \
             FROM json_populate_record(NULL::{table_name}, $1::json){conflict_clause}"
        )
    }

    /// Generate a SELECT returning every row as one JSONB value.
    ///
    /// Rows come back ordered by primary key so repeated exports of
    /// unchanged data produce identical artifacts.
    pub fn to_select_rows(&self, table: &str, primary_key: &[String]) -> String {
        let mut sql = format!(
            "SELECT to_jsonb({ROW_ALIAS}.*) FROM {} AS {ROW_ALIAS}",
            self.table_name(table)
        );
        if !primary_key.is_empty() {
            let order: Vec<String> = primary_key
                .iter()
                .map(|c| format!("{ROW_ALIAS}.{}", quote_ident(c)))
                .collect();
            sql.push_str(&format!(" ORDER BY {}", order.join(", ")));
        }
        sql
    }

    pub fn to_count(&self, table: &str) -> String {
        format!("SELECT COUNT(*) FROM {}", self.table_name(table))
    }

    /// Generate a statement moving a column's sequence past the current maximum.
    ///
    /// Takes the qualified table name as `$1` and the raw column name as `$2`
    /// for `pg_get_serial_sequence`. An empty table resets the sequence to 1.
    pub fn to_sync_sequence(&self, table: &str, column: &str) -> String {
        let column = quote_ident(column);
        format!(
            "SELECT setval(pg_get_serial_sequence($1, $2), COALESCE(MAX({column}), 1), \
             MAX({column}) IS NOT NULL) FROM {}",
            self.table_name(table)
        )
    }
}
