//! PostgreSQL connection core for pqlink.
//!
//! `pqlink-postgres` manages one server connection per [`PgConnection`] and
//! renders application values into injection-safe SQL text. The network
//! transport is not implemented here: connections drive a [`Link`] obtained
//! from a [`Connector`], so any client library able to open a session,
//! execute a statement and report its status can sit underneath.
//!
//! # Role In The Architecture
//!
//! - Connection lifecycle: connect, close, commit, rollback, isolation level
//!   and client encoding changes, all serialized by one lock per connection
//! - Cursor handles that are orphaned, not destroyed, when their connection
//!   closes
//! - Notice collection, including errors the server only reports as notices
//! - Value adaptation through an extensible [`AdapterRegistry`]
//! - `pyformat` query rendering with [`mogrify`]
//!
//! [`MemoryServer`] is an in-process link used by the tests and doc examples.
//!
//! # Example
//!
//! ```
//! use pqlink_postgres::{MemoryServer, PgConnection, Value};
//!
//! let server = MemoryServer::new();
//! let conn = PgConnection::connect(&server, "host=localhost dbname=shop").unwrap();
//! let cursor = conn.cursor().unwrap();
//!
//! let sql = cursor
//!     .mogrify("SELECT * FROM items WHERE name = %s", [Value::from("it's")])
//!     .unwrap();
//! assert_eq!(sql, b"SELECT * FROM items WHERE name = 'it''s'");
//!
//! cursor.execute("DELETE FROM items WHERE id = %s", [Value::Int(7)]).unwrap();
//! conn.commit().unwrap();
//! conn.close();
//! ```

pub mod adapt;
pub mod config;
pub mod connection;
pub mod cursor;
pub mod encoding;
pub mod error;
pub mod link;
pub mod mogrify;
pub mod notice;
pub mod transaction;

pub use adapt::{Adapt, AdaptedValue, AdapterRegistry, Capability, Category, global_registry};
pub use config::{PgConfig, SslMode};
pub use connection::PgConnection;
pub use cursor::Cursor;
pub use encoding::ClientEncoding;
pub use error::error_from_server;
pub use link::{
    Connector, ExecStatus, Link, LinkResult, LinkStatus, MemoryServer, Notification, ServerError,
};
pub use mogrify::{Params, mogrify};
pub use notice::NoticeSink;
pub use transaction::{
    ISOLATION_LEVEL_AUTOCOMMIT, ISOLATION_LEVEL_READ_COMMITTED, ISOLATION_LEVEL_REPEATABLE_READ,
    ISOLATION_LEVEL_SERIALIZABLE, TransactionState, TransactionStatus,
};

pub use pqlink_core::{APILEVEL, Error, PARAMSTYLE, Result, THREADSAFETY, Value, ValueKind};
