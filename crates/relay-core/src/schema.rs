//! Introspected table structure.
//!
//! The introspector fills these types from the database catalog. They are
//! used to build the dependency order of a migration and to recreate a
//! table on a target that does not have it yet.

use serde::{Deserialize, Serialize};

/// One column as declared in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDefinition {
    pub name: String,
    /// Declared type as rendered by the catalog, e.g. `character varying(255)`.
    pub data_type: String,
    pub nullable: bool,
    /// Default expression, e.g. `nextval('users_id_seq'::regclass)`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<IdentityKind>,
    /// Expression of a `GENERATED ALWAYS AS (...) STORED` column.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated: Option<String>,
}

/// How an identity column accepts explicit values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IdentityKind {
    /// `GENERATED ALWAYS AS IDENTITY`: explicit values need `OVERRIDING SYSTEM VALUE`.
    Always,
    /// `GENERATED BY DEFAULT AS IDENTITY`
    ByDefault,
}

impl IdentityKind {
    /// Parse the catalog's `attidentity` flag.
    pub fn from_catalog(flag: &str) -> Option<Self> {
        match flag {
            "a" => Some(Self::Always),
            "d" => Some(Self::ByDefault),
            _ => None,
        }
    }

    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Always => "GENERATED ALWAYS AS IDENTITY",
            Self::ByDefault => "GENERATED BY DEFAULT AS IDENTITY",
        }
    }
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable,
            default: None,
            identity: None,
            generated: None,
        }
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_identity(mut self, kind: IdentityKind) -> Self {
        self.identity = Some(kind);
        self
    }

    pub fn with_generated(mut self, expression: impl Into<String>) -> Self {
        self.generated = Some(expression.into());
        self
    }

    /// True when the column is filled from a sequence, either through a
    /// `nextval` default or as an identity column.
    pub fn is_sequence_backed(&self) -> bool {
        self.identity.is_some()
            || self
                .default
                .as_deref()
                .map(|d| d.starts_with("nextval("))
                .unwrap_or(false)
    }

    /// Generated columns are computed by the server and never written.
    pub fn is_generated(&self) -> bool {
        self.generated.is_some()
    }
}

/// A foreign key from this table's columns to another table's columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignKey {
    pub name: String,
    pub columns: Vec<String>,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDefinition {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

/// Structure of a single table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnDefinition>,
    #[serde(default)]
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
    #[serde(default)]
    pub indexes: Vec<IndexDefinition>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDefinition>) -> Self {
        Self {
            name: name.into(),
            columns,
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub fn with_primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Add a single-column foreign key named `<table>_<column>_fkey`.
    pub fn with_foreign_key(
        mut self,
        column: &str,
        referenced_table: &str,
        referenced_column: &str,
    ) -> Self {
        self.foreign_keys.push(ForeignKey {
            name: format!("{}_{}_fkey", self.name, column),
            columns: vec![column.to_string()],
            referenced_table: referenced_table.to_string(),
            referenced_columns: vec![referenced_column.to_string()],
        });
        self
    }

    pub fn with_index(mut self, name: &str, columns: &[&str], unique: bool) -> Self {
        self.indexes.push(IndexDefinition {
            name: name.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique,
        });
        self
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// `columns` without the generated ones. Unknown names are kept so the
    /// database can reject them.
    pub fn writable_columns<'a>(
        &self,
        columns: impl IntoIterator<Item = &'a String>,
    ) -> Vec<String> {
        columns
            .into_iter()
            .filter(|name| !self.column(name).is_some_and(ColumnDefinition::is_generated))
            .cloned()
            .collect()
    }

    /// Tables this table references, excluding itself, without duplicates.
    pub fn parent_tables(&self) -> Vec<&str> {
        let mut parents: Vec<&str> = Vec::new();
        for fk in &self.foreign_keys {
            let parent = fk.referenced_table.as_str();
            if parent != self.name && !parents.contains(&parent) {
                parents.push(parent);
            }
        }
        parents
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_tables_skips_self_reference_and_duplicates() {
        let schema = TableSchema::new(
            "comments",
            vec![
                ColumnDefinition::new("id", "integer", false),
                ColumnDefinition::new("post_id", "integer", false),
                ColumnDefinition::new("parent_id", "integer", true),
                ColumnDefinition::new("edited_by", "integer", true),
                ColumnDefinition::new("author_id", "integer", false),
            ],
        )
        .with_foreign_key("post_id", "posts", "id")
        .with_foreign_key("parent_id", "comments", "id")
        .with_foreign_key("edited_by", "users", "id")
        .with_foreign_key("author_id", "users", "id");

        assert_eq!(schema.parent_tables(), vec!["posts", "users"]);
    }

    #[test]
    fn test_sequence_backed_column() {
        let id = ColumnDefinition::new("id", "integer", false)
            .with_default("nextval('users_id_seq'::regclass)");
        let created = ColumnDefinition::new("created_at", "timestamp with time zone", false)
            .with_default("now()");

        assert!(id.is_sequence_backed());
        assert!(!created.is_sequence_backed());
    }

    #[test]
    fn test_identity_columns_are_sequence_backed() {
        let id = ColumnDefinition::new("id", "bigint", false)
            .with_identity(IdentityKind::from_catalog("a").unwrap());
        assert_eq!(id.identity, Some(IdentityKind::Always));
        assert!(id.is_sequence_backed());
        assert_eq!(IdentityKind::from_catalog(""), None);
    }

    #[test]
    fn test_writable_columns_skip_generated() {
        let schema = TableSchema::new(
            "order_lines",
            vec![
                ColumnDefinition::new("id", "integer", false),
                ColumnDefinition::new("price", "numeric", false),
                ColumnDefinition::new("total", "numeric", true).with_generated("(price * 2)"),
            ],
        );
        let columns: Vec<String> = ["id", "total", "price", "legacy"]
            .iter()
            .map(|c| c.to_string())
            .collect();
        assert_eq!(schema.writable_columns(&columns), vec!["id", "price", "legacy"]);
    }

    #[test]
    fn test_schema_without_new_fields_still_loads() {
        let column: ColumnDefinition = serde_json::from_str(
            r#"{"name": "total", "dataType": "numeric", "nullable": true}"#,
        )
        .unwrap();
        assert_eq!(column.identity, None);
        assert!(!column.is_generated());

        let generated = ColumnDefinition::new("total", "numeric", true).with_generated("(price * qty)");
        let json = serde_json::to_value(&generated).unwrap();
        assert_eq!(json["generated"], "(price * qty)");
        assert!(json.get("identity").is_none());
    }
}
