//! Migration plan: the dependency-ordered list of tables.
//!
//! Parents always come before the tables that reference them, so the
//! importer can insert rows without deferring constraint checks. The same
//! plan drives the exporter, the importer and the verifier.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use thiserror::Error;
use tracing::warn;

use crate::schema::TableSchema;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("foreign keys form a cycle between tables: {}", tables.join(", "))]
    Cycle { tables: Vec<String> },

    #[error("table '{child}' is ordered before '{parent}', which it references")]
    OutOfOrder { child: String, parent: String },

    #[error("table '{0}' appears more than once in the plan")]
    Duplicate(String),

    #[error("table '{0}' is not part of the plan")]
    UnknownTable(String),

    #[error("'{0}' is not a usable table name")]
    InvalidTableName(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationPlan {
    pub created_at: DateTime<Utc>,
    tables: Vec<String>,
}

impl MigrationPlan {
    /// Order `tables` so that every table follows the tables it references.
    ///
    /// Independent tables keep their relative order from `tables`.
    /// References to tables outside the list, and self-references, do not
    /// constrain the order.
    pub fn derive(tables: &[String], schemas: &[TableSchema]) -> Result<Self, PlanError> {
        check_names(tables)?;

        let position: HashMap<&str, usize> = tables
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();
        let schemas: HashMap<&str, &TableSchema> =
            schemas.iter().map(|s| (s.name.as_str(), s)).collect();

        let mut in_degree = vec![0usize; tables.len()];
        let mut children: Vec<Vec<usize>> = vec![Vec::new(); tables.len()];

        for (child, name) in tables.iter().enumerate() {
            let Some(schema) = schemas.get(name.as_str()) else {
                continue;
            };
            for parent in schema.parent_tables() {
                match position.get(parent) {
                    Some(&p) => {
                        children[p].push(child);
                        in_degree[child] += 1;
                    }
                    None => warn!(
                        table = %name,
                        parent,
                        "Referenced table is not part of the migration, ignoring it for ordering"
                    ),
                }
            }
        }

        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, degree)| **degree == 0)
            .map(|(i, _)| Reverse(i))
            .collect();
        let mut ordered = Vec::with_capacity(tables.len());

        while let Some(Reverse(next)) = ready.pop() {
            ordered.push(tables[next].clone());
            for &child in &children[next] {
                in_degree[child] -= 1;
                if in_degree[child] == 0 {
                    ready.push(Reverse(child));
                }
            }
        }

        if ordered.len() < tables.len() {
            let tables = tables
                .iter()
                .zip(&in_degree)
                .filter(|(_, degree)| **degree > 0)
                .map(|(name, _)| name.clone())
                .collect();
            return Err(PlanError::Cycle { tables });
        }

        Ok(Self {
            created_at: Utc::now(),
            tables: ordered,
        })
    }

    /// Check that no table precedes a table it references.
    pub fn validate(&self, schemas: &[TableSchema]) -> Result<(), PlanError> {
        let position: HashMap<&str, usize> = self
            .tables
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();

        for schema in schemas {
            let Some(&child) = position.get(schema.name.as_str()) else {
                continue;
            };
            for parent in schema.parent_tables() {
                if let Some(&p) = position.get(parent) {
                    if p > child {
                        return Err(PlanError::OutOfOrder {
                            child: schema.name.clone(),
                            parent: parent.to_string(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Restrict the plan to `names`, keeping the plan's order.
    pub fn subset(&self, names: &[String]) -> Result<Self, PlanError> {
        if let Some(unknown) = names.iter().find(|n| !self.tables.contains(n)) {
            return Err(PlanError::UnknownTable(unknown.clone()));
        }
        let wanted: HashSet<&str> = names.iter().map(String::as_str).collect();
        Ok(Self {
            created_at: self.created_at,
            tables: self
                .tables
                .iter()
                .filter(|t| wanted.contains(t.as_str()))
                .cloned()
                .collect(),
        })
    }

    pub fn tables(&self) -> &[String] {
        &self.tables
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Reject names that cannot double as artifact file names.
pub fn validate_table_name(name: &str) -> Result<(), PlanError> {
    let unusable = name.is_empty()
        || name.starts_with('.')
        || name.contains(['/', '\\', '\0']);
    if unusable {
        return Err(PlanError::InvalidTableName(name.to_string()));
    }
    Ok(())
}

fn check_names(tables: &[String]) -> Result<(), PlanError> {
    let mut seen = HashSet::new();
    for name in tables {
        validate_table_name(name)?;
        if !seen.insert(name.as_str()) {
            return Err(PlanError::Duplicate(name.clone()));
        }
    }
    Ok(())
}
