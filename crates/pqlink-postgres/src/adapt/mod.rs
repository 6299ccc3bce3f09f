//! Value adaptation: rendering application values as SQL literals.
//!
//! An [`AdaptedValue`] pairs a [`Value`] with the strategy used to render
//! it. Rendering is all-or-nothing and repeatable: [`AdaptedValue::getquoted`]
//! either returns the complete literal or an error, and returns the same
//! bytes every time until [`AdaptedValue::prepare`] binds the adapter to a
//! different connection.
//!
//! Adapters are obtained from an [`AdapterRegistry`], which refuses values it
//! has no adapter for instead of falling back to plain string conversion.
//!
//! # Example
//!
//! ```
//! use pqlink_core::Value;
//! use pqlink_postgres::adapt::AdapterRegistry;
//!
//! let registry = AdapterRegistry::with_defaults();
//! let adapted = registry.resolve(&Value::from("O'Reilly")).unwrap();
//! assert_eq!(&*adapted.getquoted().unwrap(), b"'O''Reilly'");
//! ```

mod array;
mod binary;
mod boolean;
mod literal;
mod qstring;
mod registry;

use std::borrow::Cow;
use std::fmt;

use pqlink_core::{Result, Value};

use crate::connection::PgConnection;

pub use array::ArrayLiteral;
pub use binary::{Binary, ByteaFormat, HEX_BYTEA_SERVER_VERSION, decode_bytea_literal};
pub use boolean::Boolean;
pub use literal::Literal;
pub use qstring::{MAX_TIME_MICROS, QuotedString};
pub use registry::{AdapterFn, AdapterRegistry, Capability, Category, global_registry};

/// A user-defined adapter.
///
/// Implementations must render a complete, self-delimited SQL expression;
/// the text is inserted into queries verbatim.
pub trait Adapt: Send + Sync + fmt::Debug {
    /// Render the SQL literal.
    fn getquoted(&self) -> Result<Vec<u8>>;

    /// Bind to the connection the query will run on.
    fn prepare(&mut self, _conn: &PgConnection) -> Result<()> {
        Ok(())
    }
}

/// A value bound to the strategy that renders it as SQL.
#[derive(Debug)]
pub enum AdaptedValue {
    /// Text and text-like values as a quoted string literal
    QuotedString(QuotedString),
    /// `'t'` / `'f'`
    Boolean(Boolean),
    /// Byte strings as a `bytea` literal
    Binary(Binary),
    /// Numbers and keywords rendered without quotes
    Literal(Literal),
    /// `ARRAY[...]` of adapted elements
    Array(ArrayLiteral),
    /// Adapter registered by the application
    Custom(Box<dyn Adapt>),
}

impl AdaptedValue {
    /// Render the SQL literal for the wrapped value.
    pub fn getquoted(&self) -> Result<Cow<'_, [u8]>> {
        match self {
            AdaptedValue::QuotedString(adapter) => adapter.getquoted().map(Cow::Borrowed),
            AdaptedValue::Boolean(adapter) => Ok(Cow::Borrowed(adapter.getquoted())),
            AdaptedValue::Binary(adapter) => Ok(Cow::Borrowed(adapter.getquoted())),
            AdaptedValue::Literal(adapter) => adapter.getquoted().map(Cow::Borrowed),
            AdaptedValue::Array(adapter) => adapter.getquoted().map(Cow::Borrowed),
            AdaptedValue::Custom(adapter) => adapter.getquoted().map(Cow::Owned),
        }
    }

    /// Bind the adapter to `conn`, e.g. to pick up its client encoding.
    ///
    /// May be called any number of times; adapters without connection
    /// dependent rendering ignore it.
    pub fn prepare(&mut self, conn: &PgConnection) -> Result<()> {
        match self {
            AdaptedValue::QuotedString(adapter) => adapter.prepare(conn),
            AdaptedValue::Boolean(adapter) => adapter.prepare(conn),
            AdaptedValue::Binary(adapter) => adapter.prepare(conn),
            AdaptedValue::Literal(_) => {}
            AdaptedValue::Array(adapter) => return adapter.prepare(conn),
            AdaptedValue::Custom(adapter) => return adapter.prepare(conn),
        }
        Ok(())
    }

    /// The wrapped application value, when the adapter keeps one.
    pub fn wrapped(&self) -> Option<&Value> {
        match self {
            AdaptedValue::QuotedString(adapter) => Some(adapter.wrapped()),
            AdaptedValue::Boolean(adapter) => Some(adapter.wrapped()),
            AdaptedValue::Binary(adapter) => Some(adapter.wrapped()),
            AdaptedValue::Literal(adapter) => Some(adapter.wrapped()),
            AdaptedValue::Array(adapter) => Some(adapter.wrapped()),
            AdaptedValue::Custom(_) => None,
        }
    }

    /// Render to an owned string, for diagnostics and tests.
    ///
    /// Non-UTF-8 client encodings are rendered lossily.
    pub fn to_sql_lossy(&self) -> Result<String> {
        Ok(String::from_utf8_lossy(&self.getquoted()?).into_owned())
    }
}
