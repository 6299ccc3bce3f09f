//! Array constructors.

use std::sync::OnceLock;

use pqlink_core::{Error, Result, Value};

use super::{AdaptedValue, AdapterRegistry};
use crate::connection::PgConnection;

/// Renders [`Value::Array`] as `ARRAY[e1,e2,...]`.
///
/// Every element is adapted through the registry that built the array, so
/// element rendering follows the same rules as top-level values. An empty
/// array has no element type to infer and is rendered as `'{}'`.
#[derive(Debug)]
pub struct ArrayLiteral {
    wrapped: Value,
    items: Vec<AdaptedValue>,
    buffer: OnceLock<Vec<u8>>,
}

impl ArrayLiteral {
    /// Adapt every element of `value` through `registry`.
    pub fn new(value: Value, registry: &AdapterRegistry) -> Result<Self> {
        let Value::Array(elements) = &value else {
            return Err(Error::adaptation(value.type_name(), "not an array"));
        };
        let items = elements
            .iter()
            .map(|element| registry.resolve(element))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            wrapped: value,
            items,
            buffer: OnceLock::new(),
        })
    }

    pub fn wrapped(&self) -> &Value {
        &self.wrapped
    }

    /// The adapted elements.
    pub fn items(&self) -> &[AdaptedValue] {
        &self.items
    }

    pub fn getquoted(&self) -> Result<&[u8]> {
        if let Some(buffer) = self.buffer.get() {
            return Ok(buffer);
        }
        let rendered = self.render()?;
        Ok(self.buffer.get_or_init(|| rendered))
    }

    /// Prepare every element for `conn`.
    pub fn prepare(&mut self, conn: &PgConnection) -> Result<()> {
        for item in &mut self.items {
            item.prepare(conn)?;
        }
        self.buffer = OnceLock::new();
        Ok(())
    }

    fn render(&self) -> Result<Vec<u8>> {
        if self.items.is_empty() {
            return Ok(b"'{}'".to_vec());
        }
        let mut out = b"ARRAY[".to_vec();
        for (i, item) in self.items.iter().enumerate() {
            if i > 0 {
                out.push(b',');
            }
            out.extend_from_slice(&item.getquoted()?);
        }
        out.push(b']');
        Ok(out)
    }
}
