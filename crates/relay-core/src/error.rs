//! Error classification shared by all database backends.
//!
//! Every failure a backend reports falls into one of these classes, and
//! the class decides how far it propagates:
//!
//! - connection errors abort the whole run
//! - schema errors abort work on one table
//! - row errors are recorded against one row and the run continues

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DatabaseError {
    /// The session to the database is gone or could not be opened.
    #[error("connection to {database} database failed: {message}")]
    Connection { database: String, message: String },

    #[error("table '{table}' does not exist")]
    TableNotFound { table: String },

    /// The catalog could not describe a table.
    #[error("schema lookup for table '{table}' failed: {message}")]
    SchemaLookup { table: String, message: String },

    /// The database rejected a single row.
    #[error("{message}")]
    Row {
        message: String,
        /// Rejected because of a primary-key or unique conflict.
        conflict: bool,
    },

    /// A post-condition did not hold, e.g. records were lost during a merge.
    #[error("consistency check failed: {message}")]
    Consistency { message: String },

    /// Any other statement failure.
    #[error("query on table '{table}' failed: {message}")]
    Query { table: String, message: String },
}

impl DatabaseError {
    pub fn connection(database: impl Into<String>, message: impl ToString) -> Self {
        Self::Connection {
            database: database.into(),
            message: message.to_string(),
        }
    }

    pub fn row(message: impl Into<String>) -> Self {
        Self::Row {
            message: message.into(),
            conflict: false,
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Row {
            message: message.into(),
            conflict: true,
        }
    }

    /// Fatal errors end the run; everything else is scoped to a table or row.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Row { conflict: true, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_connection_errors_are_fatal() {
        assert!(DatabaseError::connection("target", "broken pipe").is_fatal());
        assert!(!DatabaseError::row("null value in column \"email\"").is_fatal());
        assert!(!DatabaseError::TableNotFound {
            table: "users".to_string()
        }
        .is_fatal());
    }

    #[test]
    fn test_conflict_flag() {
        assert!(DatabaseError::conflict("duplicate key").is_conflict());
        assert!(!DatabaseError::row("check violation").is_conflict());
    }

    #[test]
    fn test_display_names_table() {
        let err = DatabaseError::SchemaLookup {
            table: "orders".to_string(),
            message: "permission denied".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "schema lookup for table 'orders' failed: permission denied"
        );
    }
}
