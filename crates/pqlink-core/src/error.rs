//! Error types for pqlink operations.
//!
//! The taxonomy follows the DB-API layering: misuse of closed handles is an
//! [`InterfaceError`], link failures are [`OperationalError`]s, caller-side
//! precondition violations are [`ProgrammingError`]s and everything the
//! server reports about a statement lands in [`DatabaseError`]. Two kinds are
//! specific to value adaptation and are always raised before any I/O:
//! [`AdaptationError`] and [`EncodingError`].

use std::fmt;

/// The primary error type for all pqlink operations.
#[derive(Debug)]
pub enum Error {
    /// A closed connection or cursor was used
    Interface(InterfaceError),
    /// Connection/link failures, failed setup or encoding-change statements
    Operational(OperationalError),
    /// Caller-side misuse or SQL the server rejected as malformed
    Programming(ProgrammingError),
    /// No adapter is registered for a value, or the value cannot be rendered
    Adaptation(AdaptationError),
    /// Text could not be re-encoded to the client encoding
    Encoding(EncodingError),
    /// Errors reported by the server while executing a statement
    Database(DatabaseError),
}

#[derive(Debug)]
pub struct InterfaceError {
    pub message: String,
}

#[derive(Debug)]
pub struct OperationalError {
    pub message: String,
    pub sqlstate: Option<String>,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug)]
pub struct ProgrammingError {
    pub message: String,
    pub sqlstate: Option<String>,
}

#[derive(Debug)]
pub struct AdaptationError {
    /// Type name of the value that failed to adapt (see `Value::type_name`)
    pub value_type: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub struct EncodingError {
    /// The client encoding the text was being rendered for
    pub encoding: String,
    pub message: String,
}

#[derive(Debug)]
pub struct DatabaseError {
    pub kind: DatabaseErrorKind,
    pub sqlstate: Option<String>,
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseErrorKind {
    /// Constraint violation (class 23)
    Integrity,
    /// Invalid data for the target type (class 22)
    Data,
    /// Serialization failure or deadlock (class 40)
    TransactionRollback,
    /// Internal server error (class XX)
    Internal,
    /// Feature not supported (class 0A)
    NotSupported,
    /// Anything else, including failures only reported through notices
    Other,
}

impl Error {
    /// Shorthand for an [`InterfaceError`].
    pub fn interface(message: impl Into<String>) -> Self {
        Error::Interface(InterfaceError {
            message: message.into(),
        })
    }

    /// Shorthand for an [`OperationalError`] without SQLSTATE.
    pub fn operational(message: impl Into<String>) -> Self {
        Error::Operational(OperationalError {
            message: message.into(),
            sqlstate: None,
            source: None,
        })
    }

    /// Shorthand for a [`ProgrammingError`] raised on the client side.
    pub fn programming(message: impl Into<String>) -> Self {
        Error::Programming(ProgrammingError {
            message: message.into(),
            sqlstate: None,
        })
    }

    /// Shorthand for an [`AdaptationError`].
    pub fn adaptation(value_type: &'static str, message: impl Into<String>) -> Self {
        Error::Adaptation(AdaptationError {
            value_type,
            message: message.into(),
        })
    }

    /// Shorthand for an [`EncodingError`].
    pub fn encoding(encoding: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Encoding(EncodingError {
            encoding: encoding.into(),
            message: message.into(),
        })
    }

    /// Get SQLSTATE if available (e.g., "23505" for unique violation)
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Operational(e) => e.sqlstate.as_deref(),
            Error::Programming(e) => e.sqlstate.as_deref(),
            Error::Database(e) => e.sqlstate.as_deref(),
            _ => None,
        }
    }

    /// Is this an error that means the connection itself is unusable?
    pub fn is_connection_error(&self) -> bool {
        match self {
            Error::Interface(_) => true,
            Error::Operational(e) => e
                .sqlstate
                .as_deref()
                .is_none_or(|code| code.starts_with("08")),
            _ => false,
        }
    }

    /// Was this error raised before anything was sent to the server?
    pub fn is_client_side(&self) -> bool {
        match self {
            Error::Adaptation(_) | Error::Encoding(_) | Error::Interface(_) => true,
            Error::Programming(e) => e.sqlstate.is_none(),
            _ => false,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Interface(e) => write!(f, "Interface error: {}", e.message),
            Error::Operational(e) => write!(f, "Operational error: {}", e),
            Error::Programming(e) => write!(f, "Programming error: {}", e),
            Error::Adaptation(e) => write!(f, "Adaptation error: {}", e),
            Error::Encoding(e) => write!(f, "Encoding error: {}", e),
            Error::Database(e) => write!(f, "Database error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Operational(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for InterfaceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for OperationalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(sqlstate) = &self.sqlstate {
            write!(f, "{} (SQLSTATE {})", self.message, sqlstate)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl fmt::Display for ProgrammingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(sqlstate) = &self.sqlstate {
            write!(f, "{} (SQLSTATE {})", self.message, sqlstate)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl fmt::Display for AdaptationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "can't adapt {} value: {}", self.value_type, self.message)
    }
}

impl fmt::Display for EncodingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (client encoding '{}')", self.message, self.encoding)
    }
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sqlstate {
            Some(sqlstate) => write!(f, "{} (SQLSTATE {})", self.message, sqlstate)?,
            None => write!(f, "{}", self.message)?,
        }
        if let Some(detail) = &self.detail {
            write!(f, "\nDETAIL: {}", detail)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\nHINT: {}", hint)?;
        }
        Ok(())
    }
}

impl std::error::Error for InterfaceError {}
impl std::error::Error for ProgrammingError {}
impl std::error::Error for AdaptationError {}
impl std::error::Error for EncodingError {}
impl std::error::Error for DatabaseError {}

impl From<InterfaceError> for Error {
    fn from(err: InterfaceError) -> Self {
        Error::Interface(err)
    }
}

impl From<OperationalError> for Error {
    fn from(err: OperationalError) -> Self {
        Error::Operational(err)
    }
}

impl From<ProgrammingError> for Error {
    fn from(err: ProgrammingError) -> Self {
        Error::Programming(err)
    }
}

impl From<AdaptationError> for Error {
    fn from(err: AdaptationError) -> Self {
        Error::Adaptation(err)
    }
}

impl From<EncodingError> for Error {
    fn from(err: EncodingError) -> Self {
        Error::Encoding(err)
    }
}

impl From<DatabaseError> for Error {
    fn from(err: DatabaseError) -> Self {
        Error::Database(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Operational(OperationalError {
            message: err.to_string(),
            sqlstate: None,
            source: Some(Box::new(err)),
        })
    }
}

/// Result type alias for pqlink operations.
pub type Result<T> = std::result::Result<T, Error>;
