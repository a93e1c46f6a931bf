//! Mapping driver errors onto [`DatabaseError`] classes.

use relay_core::DatabaseError;
use std::error::Error as _;
use tokio_postgres::error::SqlState;

/// What the failing statement was doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Statement {
    /// Catalog lookups, reads and DDL.
    Read,
    /// A single-row insert.
    Row,
}

/// Classify an error from a catalog or read statement.
pub(crate) fn classify(err: tokio_postgres::Error, database: &str, table: &str) -> DatabaseError {
    match err.as_db_error() {
        Some(db_error) => classify_code(
            db_error.code(),
            describe(db_error),
            Statement::Read,
            database,
            table,
        ),
        None => classify_client_side(err, database, table),
    }
}

/// Classify an error from a single-row insert.
///
/// Anything the server rejects about the row itself (constraints, bad
/// values, unknown columns) becomes a row error.
pub(crate) fn classify_row(err: tokio_postgres::Error, database: &str, table: &str) -> DatabaseError {
    match err.as_db_error() {
        Some(db_error) => classify_code(
            db_error.code(),
            describe(db_error),
            Statement::Row,
            database,
            table,
        ),
        None => classify_client_side(err, database, table),
    }
}

fn classify_code(
    code: &SqlState,
    message: String,
    statement: Statement,
    database: &str,
    table: &str,
) -> DatabaseError {
    if is_connection_class(code) {
        return DatabaseError::connection(database, message);
    }
    if *code == SqlState::UNDEFINED_TABLE {
        return DatabaseError::TableNotFound {
            table: table.to_string(),
        };
    }
    match statement {
        Statement::Row if *code == SqlState::UNIQUE_VIOLATION => DatabaseError::conflict(message),
        Statement::Row => DatabaseError::row(message),
        Statement::Read => DatabaseError::Query {
            table: table.to_string(),
            message,
        },
    }
}

fn classify_client_side(err: tokio_postgres::Error, database: &str, table: &str) -> DatabaseError {
    let lost_session = err.is_closed()
        || err
            .source()
            .map(|source| source.is::<std::io::Error>())
            .unwrap_or(false);
    if lost_session {
        DatabaseError::connection(database, err)
    } else {
        DatabaseError::Query {
            table: table.to_string(),
            message: err.to_string(),
        }
    }
}

/// SQLSTATE classes 08 (connection exception) and 57 (operator intervention).
fn is_connection_class(code: &SqlState) -> bool {
    let code = code.code();
    code.starts_with("08") || code.starts_with("57")
}

fn describe(db_error: &tokio_postgres::error::DbError) -> String {
    match db_error.detail() {
        Some(detail) => format!("{} ({})", db_error.message(), detail),
        None => db_error.message().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row_error(code: SqlState) -> DatabaseError {
        classify_code(&code, "rejected".to_string(), Statement::Row, "target", "users")
    }

    fn read_error(code: SqlState) -> DatabaseError {
        classify_code(&code, "rejected".to_string(), Statement::Read, "source", "users")
    }

    #[test]
    fn test_connection_classes() {
        assert!(is_connection_class(&SqlState::ADMIN_SHUTDOWN));
        assert!(is_connection_class(&SqlState::CONNECTION_FAILURE));
        assert!(!is_connection_class(&SqlState::NOT_NULL_VIOLATION));
        assert!(!is_connection_class(&SqlState::UNDEFINED_TABLE));
    }

    #[test]
    fn test_unique_violation_on_insert_is_a_conflict() {
        let err = row_error(SqlState::UNIQUE_VIOLATION);
        assert!(err.is_conflict());
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_constraint_and_value_errors_on_insert_are_row_errors() {
        for code in [
            SqlState::NOT_NULL_VIOLATION,
            SqlState::FOREIGN_KEY_VIOLATION,
            SqlState::CHECK_VIOLATION,
            SqlState::INVALID_TEXT_REPRESENTATION,
            SqlState::UNDEFINED_COLUMN,
        ] {
            let err = row_error(code.clone());
            assert!(
                matches!(err, DatabaseError::Row { conflict: false, .. }),
                "{} classified as {err:?}",
                code.code()
            );
        }
    }

    #[test]
    fn test_undefined_table_is_table_not_found() {
        for err in [row_error(SqlState::UNDEFINED_TABLE), read_error(SqlState::UNDEFINED_TABLE)] {
            assert!(matches!(err, DatabaseError::TableNotFound { ref table } if table == "users"));
        }
    }

    #[test]
    fn test_lost_connection_is_fatal_for_every_statement() {
        assert!(row_error(SqlState::ADMIN_SHUTDOWN).is_fatal());
        assert!(read_error(SqlState::CONNECTION_EXCEPTION).is_fatal());
    }

    #[test]
    fn test_other_read_errors_are_query_errors() {
        let err = read_error(SqlState::INSUFFICIENT_PRIVILEGE);
        assert!(matches!(err, DatabaseError::Query { ref table, .. } if table == "users"));
        assert!(!err.is_fatal());

        // A unique violation outside an insert is not a row conflict.
        assert!(!read_error(SqlState::UNIQUE_VIOLATION).is_conflict());
    }
}
