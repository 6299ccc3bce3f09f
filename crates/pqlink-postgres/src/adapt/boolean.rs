//! Boolean literals.

use pqlink_core::Value;

use crate::connection::PgConnection;

/// Renders the truth of the wrapped value as `'t'` or `'f'`.
///
/// Truth is decided by [`Value::is_truthy`], so any value can be rendered
/// as a boolean: zero, empty and NULL values are false.
#[derive(Debug, Clone, PartialEq)]
pub struct Boolean {
    wrapped: Value,
}

impl Boolean {
    pub fn new(value: Value) -> Self {
        Self { wrapped: value }
    }

    pub fn wrapped(&self) -> &Value {
        &self.wrapped
    }

    pub fn getquoted(&self) -> &'static [u8] {
        if self.wrapped.is_truthy() {
            b"'t'"
        } else {
            b"'f'"
        }
    }

    /// Does nothing: boolean literals are the same for every connection.
    pub fn prepare(&self, _conn: &PgConnection) {}
}
