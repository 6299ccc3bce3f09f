//! Unquoted literals: numbers and the NULL/DEFAULT keywords.

use std::sync::OnceLock;

use pqlink_core::{Error, Result, Value, ValueKind};
use regex::Regex;

const DECIMAL_PATTERN: &str = r"^[+-]?(?:[0-9]+(?:\.[0-9]*)?|\.[0-9]+)(?:[eE][+-]?[0-9]+)?$";

/// Numeric syntax accepted for [`Value::Decimal`], compiled once.
fn decimal_regex() -> Option<&'static Regex> {
    static REGEX: OnceLock<Option<Regex>> = OnceLock::new();
    REGEX
        .get_or_init(|| match Regex::new(DECIMAL_PATTERN) {
            Ok(regex) => Some(regex),
            Err(e) => {
                tracing::warn!(error = %e, "invalid decimal pattern, rejecting all decimals");
                None
            }
        })
        .as_ref()
}

/// Renders values whose SQL form needs no quoting.
///
/// Negative numbers get a leading space so that a minus sign following
/// another minus in the query can never form a `--` comment.
#[derive(Debug)]
pub struct Literal {
    wrapped: Value,
    buffer: OnceLock<Vec<u8>>,
}

impl Literal {
    pub fn new(value: Value) -> Result<Self> {
        match value.kind() {
            ValueKind::Null
            | ValueKind::Default
            | ValueKind::TinyInt
            | ValueKind::SmallInt
            | ValueKind::Int
            | ValueKind::BigInt
            | ValueKind::Float
            | ValueKind::Double
            | ValueKind::Decimal => Ok(Self {
                wrapped: value,
                buffer: OnceLock::new(),
            }),
            _ => Err(Error::adaptation(
                value.type_name(),
                "not representable as an unquoted literal",
            )),
        }
    }

    pub fn wrapped(&self) -> &Value {
        &self.wrapped
    }

    pub fn getquoted(&self) -> Result<&[u8]> {
        if let Some(buffer) = self.buffer.get() {
            return Ok(buffer);
        }
        let rendered = self.render()?.into_bytes();
        Ok(self.buffer.get_or_init(|| rendered))
    }

    fn render(&self) -> Result<String> {
        let text = match &self.wrapped {
            Value::Null => return Ok("NULL".to_string()),
            Value::Default => return Ok("DEFAULT".to_string()),
            Value::TinyInt(v) => v.to_string(),
            Value::SmallInt(v) => v.to_string(),
            Value::Int(v) => v.to_string(),
            Value::BigInt(v) => v.to_string(),
            Value::Float(v) => return Ok(float_literal(f64::from(*v))),
            Value::Double(v) => return Ok(float_literal(*v)),
            Value::Decimal(s) => decimal_literal(s)?,
            other => {
                return Err(Error::adaptation(
                    other.type_name(),
                    "not representable as an unquoted literal",
                ));
            }
        };
        Ok(spaced(text))
    }
}

fn spaced(text: String) -> String {
    if text.starts_with('-') {
        format!(" {text}")
    } else {
        text
    }
}

fn float_literal(v: f64) -> String {
    if v.is_nan() {
        "'NaN'::float".to_string()
    } else if v.is_infinite() {
        if v > 0.0 {
            "'Infinity'::float".to_string()
        } else {
            "'-Infinity'::float".to_string()
        }
    } else {
        spaced(format!("{v:?}"))
    }
}

fn decimal_literal(s: &str) -> Result<String> {
    let trimmed = s.trim();
    match trimmed.to_ascii_lowercase().as_str() {
        "nan" => return Ok("'NaN'::numeric".to_string()),
        "infinity" | "+infinity" | "inf" => return Ok("'Infinity'::numeric".to_string()),
        "-infinity" | "-inf" => return Ok("'-Infinity'::numeric".to_string()),
        _ => {}
    }
    if decimal_regex().is_some_and(|re| re.is_match(trimmed)) {
        Ok(trimmed.to_string())
    } else {
        Err(Error::adaptation(
            "DECIMAL",
            format!("invalid numeric literal: {s:?}"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn literal(value: Value) -> String {
        let adapter = Literal::new(value).unwrap();
        String::from_utf8(adapter.getquoted().unwrap().to_vec()).unwrap()
    }

    #[test]
    fn keywords() {
        assert_eq!(literal(Value::Null), "NULL");
        assert_eq!(literal(Value::Default), "DEFAULT");
    }

    #[test]
    fn integers() {
        assert_eq!(literal(Value::Int(42)), "42");
        assert_eq!(literal(Value::TinyInt(-8)), " -8");
        assert_eq!(literal(Value::BigInt(i64::MIN)), " -9223372036854775808");
    }

    #[test]
    fn floats() {
        assert_eq!(literal(Value::Double(1.5)), "1.5");
        assert_eq!(literal(Value::Double(1.0)), "1.0");
        assert_eq!(literal(Value::Double(-0.25)), " -0.25");
        assert_eq!(literal(Value::Double(1e300)), "1e300");
        assert_eq!(literal(Value::Double(f64::NAN)), "'NaN'::float");
        assert_eq!(literal(Value::Float(f32::INFINITY)), "'Infinity'::float");
        assert_eq!(literal(Value::Double(f64::NEG_INFINITY)), "'-Infinity'::float");
    }

    #[test]
    fn decimals_are_validated() {
        assert_eq!(literal(Value::Decimal("123.4500".into())), "123.4500");
        assert_eq!(literal(Value::Decimal("-1e-3".into())), " -1e-3");
        assert_eq!(literal(Value::Decimal(".5".into())), ".5");
        assert_eq!(literal(Value::Decimal("NaN".into())), "'NaN'::numeric");

        let adapter = Literal::new(Value::Decimal("1; DROP TABLE t".into())).unwrap();
        assert!(matches!(adapter.getquoted(), Err(Error::Adaptation(_))));
    }

    #[test]
    fn minus_minus_cannot_form_a_comment() {
        let rendered = format!("SELECT 1-{}", literal(Value::Int(-1)));
        assert_eq!(rendered, "SELECT 1- -1");
        assert!(!rendered.contains("--"));
    }

    #[test]
    fn other_kinds_are_refused() {
        assert!(Literal::new(Value::from("1")).is_err());
        assert!(Literal::new(Value::Bool(true)).is_err());
    }
}
