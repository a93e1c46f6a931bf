//! PostgreSQL DDL generation from introspected schemas.

use relay_core::{ColumnDefinition, IndexDefinition, TableSchema};

use crate::{qualified_name, quote_ident, quoted_list};

/// PostgreSQL statement generator bound to one namespace.
#[derive(Debug, Clone)]
pub struct PostgreSQLDdl {
    schema: String,
}

/// Column type and default to declare on a recreated table.
///
/// Sequence-backed integer columns become `SERIAL`-style types, because
/// the original default names a sequence the target does not have.
/// Identity and generated columns keep their declared type and get their
/// own clause instead of a default.
fn column_type(column: &ColumnDefinition) -> (String, Option<String>) {
    if column.identity.is_some() || column.is_generated() {
        return (column.data_type.clone(), None);
    }
    if column.is_sequence_backed() {
        let serial = match column.data_type.as_str() {
            "smallint" => Some("SMALLSERIAL"),
            "integer" => Some("SERIAL"),
            "bigint" => Some("BIGSERIAL"),
            _ => None,
        };
        return match serial {
            Some(serial) => (serial.to_string(), None),
            None => (column.data_type.clone(), None),
        };
    }
    (column.data_type.clone(), column.default.clone())
}

/// One column line of a CREATE TABLE statement.
fn column_definition(column: &ColumnDefinition) -> String {
    let (data_type, default) = column_type(column);
    let null_clause = if column.nullable { "NULL" } else { "NOT NULL" };
    let mut line = format!("  {} {} {}", quote_ident(&column.name), data_type, null_clause);
    if let Some(default) = default {
        line.push_str(&format!(" DEFAULT {default}"));
    }
    if let Some(identity) = column.identity {
        line.push_str(&format!(" {}", identity.as_sql()));
    }
    if let Some(expression) = &column.generated {
        line.push_str(&format!(" GENERATED ALWAYS AS ({expression}) STORED"));
    }
    line
}

impl PostgreSQLDdl {
    pub fn new(schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
        }
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn table_name(&self, table: &str) -> String {
        qualified_name(&self.schema, table)
    }

    /// Generate a CREATE TABLE statement with primary and foreign keys.
    pub fn to_create_table(&self, table: &TableSchema) -> String {
        let mut definitions: Vec<String> = table.columns.iter().map(column_definition).collect();

        if !table.primary_key.is_empty() {
            definitions.push(format!("  PRIMARY KEY ({})", quoted_list(&table.primary_key)));
        }

        for fk in &table.foreign_keys {
            definitions.push(format!(
                "  CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
                quote_ident(&fk.name),
                quoted_list(&fk.columns),
                self.table_name(&fk.referenced_table),
                quoted_list(&fk.referenced_columns)
            ));
        }

        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n{}\n);",
            self.table_name(&table.name),
            definitions.join(",\n")
        )
    }

    pub fn to_create_index(&self, table: &str, index: &IndexDefinition) -> String {
        let unique = if index.unique { "UNIQUE " } else { "" };
        format!(
            "CREATE {}INDEX IF NOT EXISTS {} ON {} ({});",
            unique,
            quote_ident(&index.name),
            self.table_name(table),
            quoted_list(&index.columns)
        )
    }

    /// All statements needed to recreate a table, in execution order.
    pub fn to_create_statements(&self, table: &TableSchema) -> Vec<String> {
        let mut statements = vec![self.to_create_table(table)];
        statements.extend(
            table
                .indexes
                .iter()
                .map(|index| self.to_create_index(&table.name, index)),
        );
        statements
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::IdentityKind;

    fn posts_schema() -> TableSchema {
        TableSchema::new(
            "posts",
            vec![
                ColumnDefinition::new("id", "integer", false)
                    .with_default("nextval('posts_id_seq'::regclass)"),
                ColumnDefinition::new("user_id", "bigint", false),
                ColumnDefinition::new("title", "character varying(200)", false),
                ColumnDefinition::new("published", "boolean", false).with_default("false"),
                ColumnDefinition::new("body", "text", true),
            ],
        )
        .with_primary_key(&["id"])
        .with_foreign_key("user_id", "users", "id")
        .with_index("posts_title_idx", &["title"], false)
    }

    #[test]
    fn test_create_table_maps_sequences_and_keeps_defaults() {
        let ddl = PostgreSQLDdl::new("public");
        let sql = ddl.to_create_table(&posts_schema());

        assert_eq!(
            sql,
            "CREATE TABLE IF NOT EXISTS \"public\".\"posts\" (\n\
             \x20 \"id\" SERIAL NOT NULL,\n\
             \x20 \"user_id\" bigint NOT NULL,\n\
             \x20 \"title\" character varying(200) NOT NULL,\n\
             \x20 \"published\" boolean NOT NULL DEFAULT false,\n\
             \x20 \"body\" text NULL,\n\
             \x20 PRIMARY KEY (\"id\"),\n\
             \x20 CONSTRAINT \"posts_user_id_fkey\" FOREIGN KEY (\"user_id\") REFERENCES \"public\".\"users\" (\"id\")\n\
             );"
        );
    }

    #[test]
    fn test_sequence_on_non_integer_column_drops_default() {
        let column = ColumnDefinition::new("code", "numeric(12,0)", false)
            .with_default("nextval('codes_seq'::regclass)");
        assert_eq!(column_type(&column), ("numeric(12,0)".to_string(), None));
    }

    #[test]
    fn test_identity_and_generated_columns_are_recreated() {
        let ddl = PostgreSQLDdl::new("public");
        let schema = TableSchema::new(
            "order_lines",
            vec![
                ColumnDefinition::new("id", "bigint", false).with_identity(IdentityKind::Always),
                ColumnDefinition::new("line_no", "integer", false)
                    .with_identity(IdentityKind::ByDefault),
                ColumnDefinition::new("price", "numeric(10,2)", false),
                ColumnDefinition::new("total", "numeric", true).with_generated("(price * 2::numeric)"),
            ],
        )
        .with_primary_key(&["id"]);

        assert_eq!(
            ddl.to_create_table(&schema),
            "CREATE TABLE IF NOT EXISTS \"public\".\"order_lines\" (\n\
             \x20 \"id\" bigint NOT NULL GENERATED ALWAYS AS IDENTITY,\n\
             \x20 \"line_no\" integer NOT NULL GENERATED BY DEFAULT AS IDENTITY,\n\
             \x20 \"price\" numeric(10,2) NOT NULL,\n\
             \x20 \"total\" numeric NULL GENERATED ALWAYS AS ((price * 2::numeric)) STORED,\n\
             \x20 PRIMARY KEY (\"id\")\n\
             );"
        );
    }

    #[test]
    fn test_create_statements_include_indexes() {
        let ddl = PostgreSQLDdl::new("app");
        let schema = posts_schema().with_index("posts_slug_key", &["user_id", "title"], true);
        let statements = ddl.to_create_statements(&schema);

        assert_eq!(statements.len(), 3);
        assert_eq!(
            statements[1],
            "CREATE INDEX IF NOT EXISTS \"posts_title_idx\" ON \"app\".\"posts\" (\"title\");"
        );
        assert_eq!(
            statements[2],
            "CREATE UNIQUE INDEX IF NOT EXISTS \"posts_slug_key\" ON \"app\".\"posts\" (\"user_id\", \"title\");"
        );
    }
}
