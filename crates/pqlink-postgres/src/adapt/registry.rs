//! Mapping from value categories to adapter constructors.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock, PoisonError, RwLock};

use pqlink_core::{Error, Result, Value, ValueKind};

use super::{AdaptedValue, ArrayLiteral, Binary, Boolean, Literal, QuotedString};
use crate::connection::PgConnection;

/// Constructor producing an adapter for a value.
///
/// The registry is passed along so container adapters can adapt their
/// elements through it. Constructors must not have side effects.
pub type AdapterFn = dyn Fn(&Value, &AdapterRegistry) -> Result<AdaptedValue> + Send + Sync;

/// A family of value kinds sharing a capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Two-valued
    Boolean,
    /// Exact integers of any width
    Integer,
    /// Floating point and decimal numbers
    Real,
    /// Character strings
    Text,
    /// Raw byte strings, including UUIDs
    Buffer,
    /// Dates, times and timestamps
    Temporal,
}

impl Capability {
    /// Whether values of `kind` have this capability.
    pub const fn matches(self, kind: ValueKind) -> bool {
        match self {
            Capability::Boolean => matches!(kind, ValueKind::Bool),
            Capability::Integer => matches!(
                kind,
                ValueKind::TinyInt | ValueKind::SmallInt | ValueKind::Int | ValueKind::BigInt
            ),
            Capability::Real => {
                matches!(kind, ValueKind::Float | ValueKind::Double | ValueKind::Decimal)
            }
            Capability::Text => matches!(kind, ValueKind::Text),
            Capability::Buffer => matches!(kind, ValueKind::Bytes | ValueKind::Uuid),
            Capability::Temporal => matches!(
                kind,
                ValueKind::Date | ValueKind::Time | ValueKind::Timestamp | ValueKind::TimestampTz
            ),
        }
    }
}

/// What a registration applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Exactly one value kind
    Exact(ValueKind),
    /// Every kind with the capability, when no exact entry exists
    Capability(Capability),
}

impl From<ValueKind> for Category {
    fn from(kind: ValueKind) -> Self {
        Category::Exact(kind)
    }
}

impl From<Capability> for Category {
    fn from(capability: Capability) -> Self {
        Category::Capability(capability)
    }
}

#[derive(Default)]
struct Entries {
    exact: HashMap<ValueKind, Arc<AdapterFn>>,
    /// Fallbacks, in registration order
    capabilities: Vec<(Capability, Arc<AdapterFn>)>,
}

/// Registry of adapters.
///
/// Lookup is total: a value whose kind has no exact entry and matches no
/// capability entry is refused with an adaptation error, never converted to
/// text some other way. Exact entries win over capabilities; among
/// capabilities the first registered match wins.
///
/// Registration takes a write lock, lookups a read lock, so a lookup never
/// observes a half-applied registration. Constructors run after the lock is
/// released.
pub struct AdapterRegistry {
    entries: RwLock<Entries>,
}

impl fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut exact: Vec<_> = entries.exact.keys().copied().collect();
        exact.sort();
        let capabilities: Vec<_> = entries.capabilities.iter().map(|(c, _)| *c).collect();
        f.debug_struct("AdapterRegistry")
            .field("exact", &exact)
            .field("capabilities", &capabilities)
            .finish()
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl AdapterRegistry {
    /// A registry without any adapter.
    pub fn empty() -> Self {
        Self {
            entries: RwLock::new(Entries::default()),
        }
    }

    /// A registry with adapters for every [`ValueKind`].
    pub fn with_defaults() -> Self {
        let registry = Self::empty();
        for kind in [
            ValueKind::Null,
            ValueKind::Default,
            ValueKind::TinyInt,
            ValueKind::SmallInt,
            ValueKind::Int,
            ValueKind::BigInt,
            ValueKind::Float,
            ValueKind::Double,
            ValueKind::Decimal,
        ] {
            registry.register(kind, |value, _| {
                Literal::new(value.clone()).map(AdaptedValue::Literal)
            });
        }
        for kind in [
            ValueKind::Text,
            ValueKind::Date,
            ValueKind::Time,
            ValueKind::Timestamp,
            ValueKind::TimestampTz,
            ValueKind::Uuid,
            ValueKind::Json,
        ] {
            registry.register(kind, |value, _| {
                QuotedString::new(value.clone()).map(AdaptedValue::QuotedString)
            });
        }
        registry.register(ValueKind::Bool, |value, _| {
            Ok(AdaptedValue::Boolean(Boolean::new(value.clone())))
        });
        registry.register(ValueKind::Bytes, |value, _| {
            Binary::new(value.clone()).map(AdaptedValue::Binary)
        });
        registry.register(ValueKind::Array, |value, registry| {
            ArrayLiteral::new(value.clone(), registry).map(AdaptedValue::Array)
        });
        registry
    }

    /// Register `constructor` for `category`.
    ///
    /// Registering a category again replaces its constructor; a replaced
    /// capability keeps its original position in the fallback order.
    pub fn register<F>(&self, category: impl Into<Category>, constructor: F)
    where
        F: Fn(&Value, &AdapterRegistry) -> Result<AdaptedValue> + Send + Sync + 'static,
    {
        let category = category.into();
        let constructor: Arc<AdapterFn> = Arc::new(constructor);
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        match category {
            Category::Exact(kind) => {
                entries.exact.insert(kind, constructor);
            }
            Category::Capability(capability) => {
                if let Some(slot) = entries
                    .capabilities
                    .iter_mut()
                    .find(|(existing, _)| *existing == capability)
                {
                    slot.1 = constructor;
                } else {
                    entries.capabilities.push((capability, constructor));
                }
            }
        }
        tracing::debug!(?category, "adapter registered");
    }

    /// Whether a value of `kind` would be resolved.
    pub fn is_registered(&self, kind: ValueKind) -> bool {
        self.lookup(kind).is_some()
    }

    /// Build the adapter for `value`.
    pub fn resolve(&self, value: &Value) -> Result<AdaptedValue> {
        let Some(constructor) = self.lookup(value.kind()) else {
            return Err(Error::adaptation(
                value.type_name(),
                "no adapter registered for this kind",
            ));
        };
        constructor(value, self)
    }

    /// Resolve, prepare against `conn` and render `value`.
    pub fn adapt_for(&self, value: &Value, conn: &PgConnection) -> Result<Vec<u8>> {
        let mut adapted = self.resolve(value)?;
        adapted.prepare(conn)?;
        Ok(adapted.getquoted()?.into_owned())
    }

    /// Resolve and render `value` without connection context.
    pub fn adapt(&self, value: &Value) -> Result<Vec<u8>> {
        let adapted = self.resolve(value)?;
        Ok(adapted.getquoted()?.into_owned())
    }

    fn lookup(&self, kind: ValueKind) -> Option<Arc<AdapterFn>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(constructor) = entries.exact.get(&kind) {
            return Some(Arc::clone(constructor));
        }
        entries
            .capabilities
            .iter()
            .find(|(capability, _)| capability.matches(kind))
            .map(|(_, constructor)| Arc::clone(constructor))
    }
}

static GLOBAL: LazyLock<AdapterRegistry> = LazyLock::new(|| {
    tracing::debug!("initializing process-wide adapter registry");
    AdapterRegistry::with_defaults()
});

/// The process-wide registry, populated with the default adapters on first use.
pub fn global_registry() -> &'static AdapterRegistry {
    &GLOBAL
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(registry: &AdapterRegistry, value: &Value) -> String {
        String::from_utf8(registry.adapt(value).unwrap()).unwrap()
    }

    #[test]
    fn defaults_cover_every_kind() {
        let registry = AdapterRegistry::with_defaults();
        for kind in ValueKind::ALL {
            assert!(registry.is_registered(kind), "{kind:?} not registered");
        }
    }

    #[test]
    fn empty_registry_refuses() {
        let registry = AdapterRegistry::empty();
        let err = registry.resolve(&Value::from("x")).unwrap_err();
        match err {
            Error::Adaptation(e) => assert_eq!(e.value_type, "TEXT"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn exact_wins_over_capability() {
        let registry = AdapterRegistry::empty();
        registry.register(Capability::Integer, |_, _| {
            Ok(AdaptedValue::Literal(Literal::new(Value::Int(0))?))
        });
        registry.register(ValueKind::Int, |value, _| {
            Literal::new(value.clone()).map(AdaptedValue::Literal)
        });

        assert_eq!(rendered(&registry, &Value::Int(7)), "7");
        assert_eq!(rendered(&registry, &Value::BigInt(7)), "0");
        assert!(!registry.is_registered(ValueKind::Text));
    }

    #[test]
    fn first_registered_capability_wins() {
        let registry = AdapterRegistry::empty();
        registry.register(Capability::Buffer, |_, _| {
            Ok(AdaptedValue::Literal(Literal::new(Value::Int(1))?))
        });
        registry.register(Capability::Integer, |_, _| {
            Ok(AdaptedValue::Literal(Literal::new(Value::Int(2))?))
        });
        registry.register(Capability::Buffer, |_, _| {
            Ok(AdaptedValue::Literal(Literal::new(Value::Int(3))?))
        });

        // replaced in place
        assert_eq!(rendered(&registry, &Value::Bytes(vec![1])), "3");
        assert_eq!(rendered(&registry, &Value::Uuid([0; 16])), "3");
        assert_eq!(rendered(&registry, &Value::SmallInt(5)), "2");
    }

    #[test]
    fn boolean_capability_fallback() {
        let registry = AdapterRegistry::empty();
        registry.register(Capability::Boolean, |value, _| {
            Ok(AdaptedValue::Boolean(Boolean::new(value.clone())))
        });
        assert_eq!(rendered(&registry, &Value::Bool(false)), "'f'");
        assert!(registry.resolve(&Value::Int(1)).is_err());
    }

    #[test]
    fn re_registration_overwrites() {
        let registry = AdapterRegistry::with_defaults();
        registry.register(ValueKind::Bool, |value, _| {
            let text = if value.is_truthy() { "TRUE" } else { "FALSE" };
            Ok(AdaptedValue::Custom(Box::new(Keyword(text))))
        });
        assert_eq!(rendered(&registry, &Value::Bool(true)), "TRUE");
    }

    #[derive(Debug)]
    struct Keyword(&'static str);

    impl crate::adapt::Adapt for Keyword {
        fn getquoted(&self) -> Result<Vec<u8>> {
            Ok(self.0.as_bytes().to_vec())
        }
    }

    #[test]
    fn resolution_is_deterministic() {
        let registry = AdapterRegistry::with_defaults();
        let values = [
            Value::from("it's"),
            Value::Bytes(vec![0, 39, 92, 255]),
            Value::Double(f64::NAN),
            Value::from(vec![1_i32, 2]),
            Value::Bool(true),
        ];
        for value in &values {
            assert_eq!(registry.adapt(value).unwrap(), registry.adapt(value).unwrap());
        }
    }

    #[test]
    fn global_registry_has_defaults() {
        assert!(global_registry().is_registered(ValueKind::Json));
        assert_eq!(rendered(global_registry(), &Value::Int(1)), "1");
    }

    #[test]
    fn concurrent_lookups_and_registrations() {
        let registry = Arc::new(AdapterRegistry::with_defaults());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        if i == 0 {
                            registry.register(ValueKind::Text, |value, _| {
                                QuotedString::new(value.clone()).map(AdaptedValue::QuotedString)
                            });
                        } else {
                            let out = registry.adapt(&Value::from("x")).unwrap();
                            assert_eq!(out, b"'x'");
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
