//! pqlink - a thread-safe PostgreSQL connection core with injection-safe
//! value adaptation.
//!
//! pqlink provides:
//!
//! - One lock-serialized connection per [`PgConnection`], with transaction,
//!   isolation level and client encoding tracking
//! - Cursors that are orphaned, not destroyed, when their connection closes
//! - Notice collection that escalates errors reported as notices
//! - A process-wide [`AdapterRegistry`] turning [`Value`]s into SQL literals,
//!   extensible at runtime with [`register_adapter`]
//!
//! The network transport is pluggable through the [`Connector`] and [`Link`]
//! traits; [`MemoryServer`] is an in-process implementation.
//!
//! # Quick Start
//!
//! ```
//! use pqlink::prelude::*;
//!
//! let server = MemoryServer::new();
//! let conn = pqlink::connect(&server, "dbname=shop").unwrap();
//!
//! let cursor = conn.cursor().unwrap();
//! cursor
//!     .execute(
//!         "INSERT INTO items (name, price) VALUES (%(name)s, %(price)s)",
//!         [("name", Value::from("O'Hara")), ("price", Value::Double(9.5))],
//!     )
//!     .unwrap();
//! conn.commit().unwrap();
//!
//! assert_eq!(pqlink::adapt(&Value::Bool(true)).unwrap(), b"'t'");
//! ```

use std::sync::Arc;

pub use pqlink_core::{
    APILEVEL, AdaptationError, DatabaseError, DatabaseErrorKind, EncodingError, Error,
    InterfaceError, OperationalError, PARAMSTYLE, ProgrammingError, Result, THREADSAFETY, Value,
    ValueKind,
};
pub use pqlink_postgres::{
    Adapt, AdaptedValue, AdapterRegistry, Capability, Category, ClientEncoding, Connector, Cursor,
    ExecStatus, ISOLATION_LEVEL_AUTOCOMMIT, ISOLATION_LEVEL_READ_COMMITTED,
    ISOLATION_LEVEL_REPEATABLE_READ, ISOLATION_LEVEL_SERIALIZABLE, Link, LinkResult, LinkStatus,
    MemoryServer, NoticeSink, Notification, Params, PgConfig, PgConnection, ServerError, SslMode,
    TransactionStatus, global_registry, mogrify,
};

/// Render `value` as SQL text with the process-wide registry.
///
/// Without a connection the text is rendered for a `UTF8` client encoding.
pub fn adapt(value: &Value) -> Result<Vec<u8>> {
    global_registry().adapt(value)
}

/// Register an adapter in the process-wide registry.
///
/// Affects every connection without a registry of its own, including ones
/// already open.
pub fn register_adapter<F>(category: impl Into<Category>, constructor: F)
where
    F: Fn(&Value, &AdapterRegistry) -> Result<AdaptedValue> + Send + Sync + 'static,
{
    global_registry().register(category, constructor);
}

/// Connect through `connector` using a libpq-style DSN.
pub fn connect<C: Connector + ?Sized>(connector: &C, dsn: &str) -> Result<Arc<PgConnection>> {
    PgConnection::connect(connector, dsn)
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::{
        AdaptedValue, AdapterRegistry, Capability, Category, Connector, Cursor, Error,
        ISOLATION_LEVEL_AUTOCOMMIT, ISOLATION_LEVEL_READ_COMMITTED,
        ISOLATION_LEVEL_REPEATABLE_READ, ISOLATION_LEVEL_SERIALIZABLE, MemoryServer, Params,
        PgConfig, PgConnection, Result, Value, ValueKind,
    };
}
