//! Translation of server-reported failures into [`pqlink_core::Error`].

use pqlink_core::{
    DatabaseError, DatabaseErrorKind, Error, OperationalError, ProgrammingError,
};

use crate::link::ServerError;

/// Classify a server error by its SQLSTATE class.
pub fn error_from_server(error: &ServerError) -> Error {
    let code = error.code.clone();
    let kind = match code.as_deref().and_then(|c| c.get(..2)) {
        // Connection exception, insufficient resources, operator
        // intervention, system error, configuration file error
        Some("08" | "53" | "57" | "58" | "F0") => {
            return Error::Operational(OperationalError {
                message: error.message.clone(),
                sqlstate: code,
                source: None,
            });
        }
        // Syntax error or access rule violation, invalid SQL statement
        // name, invalid catalog/schema name, invalid cursor name
        Some("42" | "26" | "34" | "3D" | "3F") => {
            return Error::Programming(ProgrammingError {
                message: error.message.clone(),
                sqlstate: code,
            });
        }
        Some("23") => DatabaseErrorKind::Integrity,
        Some("22") => DatabaseErrorKind::Data,
        Some("40") => DatabaseErrorKind::TransactionRollback,
        Some("XX") => DatabaseErrorKind::Internal,
        Some("0A") => DatabaseErrorKind::NotSupported,
        _ => DatabaseErrorKind::Other,
    };

    Error::Database(DatabaseError {
        kind,
        sqlstate: code,
        message: error.message.clone(),
        detail: error.detail.clone(),
        hint: error.hint.clone(),
    })
}

/// Escalate a critical notice into the error of the command it arrived with.
pub fn error_from_notice(text: &str) -> Error {
    Error::Database(DatabaseError {
        kind: DatabaseErrorKind::Other,
        sqlstate: None,
        message: text.trim_end().to_string(),
        detail: None,
        hint: None,
    })
}
