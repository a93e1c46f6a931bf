//! PostgreSQL statement generation for pg-relay.
//!
//! Everything the PostgreSQL backend sends that depends on a table name
//! or column list is rendered here, so identifier quoting lives in one
//! place:
//!
//! - [`PostgreSQLDdl::to_create_table`] recreates an introspected table
//! - [`PostgreSQLDdl::to_insert`] writes one row passed as a JSON parameter
//! - [`PostgreSQLDdl::to_select_rows`] reads every row as JSON

mod ddl;
mod dml;

pub use ddl::PostgreSQLDdl;

/// Quote an identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Schema-qualified, quoted table name.
pub fn qualified_name(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

fn quoted_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident("odd\"name"), "\"odd\"\"name\"");
        assert_eq!(qualified_name("public", "Users"), "\"public\".\"Users\"");
    }
}
