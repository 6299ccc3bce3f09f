//! Core types for pqlink.
//!
//! This crate provides the vocabulary shared by the connection core and the
//! adaptation layer:
//!
//! - [`Value`] and [`ValueKind`] for type-erased application values
//! - [`Error`] with the DB-API error taxonomy and the adaptation-specific kinds
//! - DB-API module constants

pub mod error;
pub mod value;

pub use error::{
    AdaptationError, DatabaseError, DatabaseErrorKind, EncodingError, Error, InterfaceError,
    OperationalError, ProgrammingError, Result,
};
pub use value::{Value, ValueKind};

/// DB-API level implemented by the connection layer.
pub const APILEVEL: &str = "2.0";

/// Threads may share the module and connections, but not cursors.
pub const THREADSAFETY: u8 = 2;

/// Parameter placeholder style understood by `mogrify`.
pub const PARAMSTYLE: &str = "pyformat";
