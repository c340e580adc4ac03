//! Classification of DDL failures that can be skipped during replay.

use std::error::Error;

use sqlx::mysql::MySqlDatabaseError;

use crate::database::MemoryDbError;
use crate::error::LoaderError;

/// A schema change replayed verbatim on the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DdlStatement {
    /// Schema selected with `USE` before running the statement.
    pub schema: Option<String>,
    pub sql: String,
}

/// Decides whether a failed DDL statement can be skipped.
pub trait DdlErrorClassifier: Send + Sync + 'static {
    /// Returns `true` when the failure means the DDL was already applied or no longer matters.
    fn is_ignorable(&self, error: &LoaderError) -> bool;
}

/// Classifier for MySQL-compatible destinations.
///
/// Ignores the server errors reporting that a database, table, column or index already exists
/// or is already gone.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDdlErrorClassifier;

impl DdlErrorClassifier for MySqlDdlErrorClassifier {
    fn is_ignorable(&self, error: &LoaderError) -> bool {
        mysql_error_code(error).is_some_and(is_ignorable_mysql_error_code)
    }
}

/// MySQL error numbers of DDL failures that can be skipped.
const IGNORABLE_DDL_ERROR_CODES: &[u16] = &[
    1007, // ER_DB_CREATE_EXISTS
    1008, // ER_DB_DROP_EXISTS
    1049, // ER_BAD_DB_ERROR
    1050, // ER_TABLE_EXISTS_ERROR
    1051, // ER_BAD_TABLE_ERROR
    1054, // ER_BAD_FIELD_ERROR
    1060, // ER_DUP_FIELDNAME
    1061, // ER_DUP_KEYNAME
    1091, // ER_CANT_DROP_FIELD_OR_KEY
    1146, // ER_NO_SUCH_TABLE
    1176, // ER_KEY_DOES_NOT_EXITS
];

pub fn is_ignorable_mysql_error_code(code: u16) -> bool {
    IGNORABLE_DDL_ERROR_CODES.contains(&code)
}

/// Returns the first MySQL error number found in the source chain of `error`.
pub fn mysql_error_code(error: &LoaderError) -> Option<u16> {
    let mut current: Option<&(dyn Error + 'static)> = Some(error);

    while let Some(error) = current {
        if let Some(sqlx::Error::Database(db_err)) = error.downcast_ref::<sqlx::Error>() {
            if let Some(mysql_err) = db_err.try_downcast_ref::<MySqlDatabaseError>() {
                return Some(mysql_err.number());
            }
        }

        if let Some(code) = error
            .downcast_ref::<MemoryDbError>()
            .and_then(MemoryDbError::mysql_error_code)
        {
            return Some(code);
        }

        current = error.source();
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::loader_error;

    fn server_error(code: u16) -> LoaderError {
        let source = MemoryDbError::Server {
            code,
            message: "failed".to_string(),
        };
        let inner = loader_error!(ErrorKind::DestinationQueryFailed, "Statement failed", source: source);
        loader_error!(ErrorKind::DestinationQueryFailed, "Statement execution failed", source: inner)
    }

    #[test]
    fn recognizes_already_applied_ddl_codes() {
        for code in [1007, 1050, 1060, 1061, 1091, 1146] {
            assert!(is_ignorable_mysql_error_code(code), "{code}");
        }
        for code in [1062, 1064, 1213] {
            assert!(!is_ignorable_mysql_error_code(code), "{code}");
        }
    }

    #[test]
    fn finds_codes_through_wrapped_errors() {
        assert_eq!(mysql_error_code(&server_error(1050)), Some(1050));
        assert!(MySqlDdlErrorClassifier.is_ignorable(&server_error(1050)));
        assert!(!MySqlDdlErrorClassifier.is_ignorable(&server_error(1064)));
    }

    #[test]
    fn errors_without_code_are_not_ignorable() {
        let err = loader_error!(ErrorKind::DestinationConnectionFailed, "Connection lost");
        assert_eq!(mysql_error_code(&err), None);
        assert!(!MySqlDdlErrorClassifier.is_ignorable(&err));
    }
}
