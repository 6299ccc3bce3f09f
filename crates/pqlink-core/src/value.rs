//! Dynamic application values awaiting SQL adaptation.

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A dynamically-typed application value.
///
/// This is the type-erased input of the adaptation layer: every value that
/// has to reach the server as SQL text is first wrapped in a `Value`, and the
/// adapter registry dispatches on its [`ValueKind`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// NULL value
    Null,

    /// Boolean value
    Bool(bool),

    /// 8-bit signed integer
    TinyInt(i8),

    /// 16-bit signed integer
    SmallInt(i16),

    /// 32-bit signed integer
    Int(i32),

    /// 64-bit signed integer
    BigInt(i64),

    /// 32-bit floating point
    Float(f32),

    /// 64-bit floating point
    Double(f64),

    /// Arbitrary precision decimal (stored as string)
    Decimal(String),

    /// Text string
    Text(String),

    /// Binary data
    Bytes(Vec<u8>),

    /// Date (days since 1970-01-01)
    Date(i32),

    /// Time (microseconds since midnight)
    Time(i64),

    /// Timestamp (microseconds since 1970-01-01 00:00:00)
    Timestamp(i64),

    /// Timestamp with timezone (microseconds since epoch, UTC)
    TimestampTz(i64),

    /// UUID (as 16 bytes)
    Uuid([u8; 16]),

    /// JSON value
    Json(serde_json::Value),

    /// Array of values
    Array(Vec<Value>),

    /// SQL DEFAULT keyword
    Default,
}

/// The exact runtime type of a [`Value`].
///
/// One tag per `Value` variant; this is the key of exact-type lookups in the
/// adapter registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ValueKind {
    Null,
    Bool,
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    Float,
    Double,
    Decimal,
    Text,
    Bytes,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Uuid,
    Json,
    Array,
    Default,
}

impl ValueKind {
    /// Every kind, in declaration order.
    pub const ALL: [ValueKind; 19] = [
        ValueKind::Null,
        ValueKind::Bool,
        ValueKind::TinyInt,
        ValueKind::SmallInt,
        ValueKind::Int,
        ValueKind::BigInt,
        ValueKind::Float,
        ValueKind::Double,
        ValueKind::Decimal,
        ValueKind::Text,
        ValueKind::Bytes,
        ValueKind::Date,
        ValueKind::Time,
        ValueKind::Timestamp,
        ValueKind::TimestampTz,
        ValueKind::Uuid,
        ValueKind::Json,
        ValueKind::Array,
        ValueKind::Default,
    ];

    /// SQL-ish name of the kind, as used in error messages.
    pub const fn name(self) -> &'static str {
        match self {
            ValueKind::Null => "NULL",
            ValueKind::Bool => "BOOLEAN",
            ValueKind::TinyInt => "TINYINT",
            ValueKind::SmallInt => "SMALLINT",
            ValueKind::Int => "INTEGER",
            ValueKind::BigInt => "BIGINT",
            ValueKind::Float => "REAL",
            ValueKind::Double => "DOUBLE",
            ValueKind::Decimal => "DECIMAL",
            ValueKind::Text => "TEXT",
            ValueKind::Bytes => "BLOB",
            ValueKind::Date => "DATE",
            ValueKind::Time => "TIME",
            ValueKind::Timestamp => "TIMESTAMP",
            ValueKind::TimestampTz => "TIMESTAMPTZ",
            ValueKind::Uuid => "UUID",
            ValueKind::Json => "JSON",
            ValueKind::Array => "ARRAY",
            ValueKind::Default => "DEFAULT",
        }
    }
}

impl Value {
    /// Get the exact kind of this value.
    pub const fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::TinyInt(_) => ValueKind::TinyInt,
            Value::SmallInt(_) => ValueKind::SmallInt,
            Value::Int(_) => ValueKind::Int,
            Value::BigInt(_) => ValueKind::BigInt,
            Value::Float(_) => ValueKind::Float,
            Value::Double(_) => ValueKind::Double,
            Value::Decimal(_) => ValueKind::Decimal,
            Value::Text(_) => ValueKind::Text,
            Value::Bytes(_) => ValueKind::Bytes,
            Value::Date(_) => ValueKind::Date,
            Value::Time(_) => ValueKind::Time,
            Value::Timestamp(_) => ValueKind::Timestamp,
            Value::TimestampTz(_) => ValueKind::TimestampTz,
            Value::Uuid(_) => ValueKind::Uuid,
            Value::Json(_) => ValueKind::Json,
            Value::Array(_) => ValueKind::Array,
            Value::Default => ValueKind::Default,
        }
    }

    /// Get the type name of this value.
    pub const fn type_name(&self) -> &'static str {
        self.kind().name()
    }

    /// Standard truth test.
    ///
    /// NULL, zero, empty text/bytes/arrays, JSON `null`/`false`/`0`/empty
    /// containers are false; everything else is true. Temporal values and
    /// UUIDs are always true.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(v) => *v,
            Value::TinyInt(v) => *v != 0,
            Value::SmallInt(v) => *v != 0,
            Value::Int(v) => *v != 0,
            Value::BigInt(v) => *v != 0,
            Value::Float(v) => *v != 0.0,
            Value::Double(v) => *v != 0.0,
            Value::Decimal(s) => s.parse::<f64>().is_ok_and(|v| v != 0.0),
            Value::Text(s) => !s.is_empty(),
            Value::Bytes(b) => !b.is_empty(),
            Value::Array(items) => !items.is_empty(),
            Value::Json(json) => match json {
                serde_json::Value::Null => false,
                serde_json::Value::Bool(b) => *b,
                serde_json::Value::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
                serde_json::Value::String(s) => !s.is_empty(),
                serde_json::Value::Array(a) => !a.is_empty(),
                serde_json::Value::Object(o) => !o.is_empty(),
            },
            Value::Date(_)
            | Value::Time(_)
            | Value::Timestamp(_)
            | Value::TimestampTz(_)
            | Value::Uuid(_)
            | Value::Default => true,
        }
    }

    /// Try to get this value as a byte slice.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            Value::Uuid(b) => Some(b),
            _ => None,
        }
    }
}

macro_rules! impl_from_scalar {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v.into())
                }
            }
        )*
    };
}

macro_rules! impl_from_vec {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<Vec<$ty>> for Value {
                fn from(items: Vec<$ty>) -> Self {
                    Value::Array(items.into_iter().map(Value::from).collect())
                }
            }
        )*
    };
}

impl_from_scalar! {
    bool => Bool,
    i8 => TinyInt,
    i16 => SmallInt,
    i32 => Int,
    i64 => BigInt,
    u8 => SmallInt,
    u16 => Int,
    u32 => BigInt,
    f32 => Float,
    f64 => Double,
    String => Text,
    &str => Text,
    Vec<u8> => Bytes,
    &[u8] => Bytes,
    [u8; 16] => Uuid,
    serde_json::Value => Json,
    Vec<Value> => Array,
}

impl_from_vec!(String, i32, i64, f64, bool);

/// `BIGINT` is signed: values above `i64::MAX` are refused, not clamped.
impl TryFrom<u64> for Value {
    type Error = Error;

    fn try_from(v: u64) -> Result<Self, Self::Error> {
        i64::try_from(v).map(Value::BigInt).map_err(|_| {
            Error::adaptation("BIGINT", format!("{v} exceeds the BIGINT range"))
        })
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}
