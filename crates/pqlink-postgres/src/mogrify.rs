//! Query rendering with `pyformat` placeholders.
//!
//! `%s` takes the next positional parameter, `%(name)s` a named one and
//! `%%` is a literal percent sign. Every parameter is adapted and rendered
//! before anything is returned, so a value that cannot be adapted fails the
//! whole query and nothing reaches the server.
//!
//! A query rendered with [`Params::None`] is taken verbatim: placeholders are
//! not interpreted and `%%` is not collapsed.

use std::collections::HashMap;

use pqlink_core::{Error, Result, Value};

use crate::adapt::AdapterRegistry;
use crate::connection::PgConnection;
use crate::encoding::ClientEncoding;

/// Query parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Params {
    /// No parameters; the query is used as written
    #[default]
    None,
    /// Parameters for `%s` placeholders, in order
    Positional(Vec<Value>),
    /// Parameters for `%(name)s` placeholders
    Named(HashMap<String, Value>),
}

impl Params {
    pub fn is_none(&self) -> bool {
        matches!(self, Params::None)
    }
}

impl From<()> for Params {
    fn from((): ()) -> Self {
        Params::None
    }
}

impl From<Vec<Value>> for Params {
    fn from(values: Vec<Value>) -> Self {
        Params::Positional(values)
    }
}

impl<const N: usize> From<[Value; N]> for Params {
    fn from(values: [Value; N]) -> Self {
        Params::Positional(values.into())
    }
}

impl From<HashMap<String, Value>> for Params {
    fn from(values: HashMap<String, Value>) -> Self {
        Params::Named(values)
    }
}

impl<const N: usize> From<[(&str, Value); N]> for Params {
    fn from(values: [(&str, Value); N]) -> Self {
        Params::Named(
            values
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
        )
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Segment<'q> {
    Text(String),
    Positional,
    Named(&'q str),
}

/// Split a query into literal text and placeholders.
fn parse(query: &str) -> Result<Vec<Segment<'_>>> {
    let mut segments = Vec::new();
    let mut text = String::new();
    let mut rest = query;

    while let Some(pos) = rest.find('%') {
        text.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        match after.chars().next() {
            Some('%') => {
                text.push('%');
                rest = &after[1..];
            }
            Some('s') => {
                segments.push(Segment::Text(std::mem::take(&mut text)));
                segments.push(Segment::Positional);
                rest = &after[1..];
            }
            Some('(') => {
                let close = after
                    .find(')')
                    .ok_or_else(|| Error::programming("incomplete placeholder: '%(' without ')'"))?;
                let name = &after[1..close];
                if !after[close + 1..].starts_with('s') {
                    return Err(Error::programming(format!(
                        "format not supported for placeholder '%({name})': only '%({name})s' is accepted"
                    )));
                }
                segments.push(Segment::Text(std::mem::take(&mut text)));
                segments.push(Segment::Named(name));
                rest = &after[close + 2..];
            }
            Some(other) => {
                return Err(Error::programming(format!(
                    "unsupported format character '{other}' after '%'"
                )));
            }
            None => {
                return Err(Error::programming("incomplete placeholder: '%' at end of query"));
            }
        }
    }
    text.push_str(rest);
    segments.push(Segment::Text(text));
    Ok(segments)
}

/// Render `query` with `params` for `conn`.
///
/// Adapters come from `registry`, are prepared against `conn` when one is
/// given, and the query text is re-encoded to the connection's client
/// encoding (`UTF8` without a connection).
pub fn mogrify(
    query: &str,
    params: &Params,
    registry: &AdapterRegistry,
    conn: Option<&PgConnection>,
) -> Result<Vec<u8>> {
    let encoding = conn.map_or(ClientEncoding::UTF8, PgConnection::client_encoding);

    if params.is_none() {
        return Ok(encoding.encode(query)?.into_owned());
    }

    let segments = parse(query)?;
    let adapt = |value: &Value| -> Result<Vec<u8>> {
        match conn {
            Some(conn) => registry.adapt_for(value, conn),
            None => registry.adapt(value),
        }
    };

    let positional = segments
        .iter()
        .filter(|s| matches!(s, Segment::Positional))
        .count();
    let named = segments
        .iter()
        .filter(|s| matches!(s, Segment::Named(_)))
        .count();
    if positional > 0 && named > 0 {
        return Err(Error::programming(
            "can't mix positional and named placeholders",
        ));
    }

    let mut out = Vec::with_capacity(query.len() + 16);
    match params {
        Params::None => {}
        Params::Positional(values) => {
            if named > 0 {
                return Err(Error::programming(
                    "named placeholders require named parameters",
                ));
            }
            if values.len() > positional {
                return Err(Error::programming(
                    "not all arguments converted during query rendering",
                ));
            }
            if values.len() < positional {
                return Err(Error::programming(format!(
                    "not enough arguments for query: {positional} placeholders, {} parameters",
                    values.len()
                )));
            }
            let rendered = values.iter().map(adapt).collect::<Result<Vec<_>>>()?;
            let mut rendered = rendered.into_iter();
            for segment in &segments {
                match segment {
                    Segment::Text(text) => out.extend_from_slice(&encoding.encode(text)?),
                    Segment::Positional => out.extend(rendered.next().unwrap_or_default()),
                    Segment::Named(_) => {}
                }
            }
        }
        Params::Named(values) => {
            if positional > 0 {
                return Err(Error::programming(
                    "positional placeholders require positional parameters",
                ));
            }
            let mut rendered: HashMap<&str, Vec<u8>> = HashMap::new();
            for segment in &segments {
                if let Segment::Named(name) = segment {
                    if rendered.contains_key(name) {
                        continue;
                    }
                    let value = values.get(*name).ok_or_else(|| {
                        Error::programming(format!("missing named parameter '{name}'"))
                    })?;
                    rendered.insert(*name, adapt(value)?);
                }
            }
            for segment in &segments {
                match segment {
                    Segment::Text(text) => out.extend_from_slice(&encoding.encode(text)?),
                    Segment::Named(name) => {
                        if let Some(bytes) = rendered.get(name) {
                            out.extend_from_slice(bytes);
                        }
                    }
                    Segment::Positional => {}
                }
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(query: &str, params: impl Into<Params>) -> Result<String> {
        let registry = AdapterRegistry::with_defaults();
        let bytes = mogrify(query, &params.into(), &registry, None)?;
        Ok(String::from_utf8(bytes).unwrap())
    }

    #[test]
    fn positional_parameters() {
        assert_eq!(
            render(
                "SELECT * FROM users WHERE name = %s AND age > %s",
                [Value::from("O'Reilly"), Value::Int(30)]
            )
            .unwrap(),
            "SELECT * FROM users WHERE name = 'O''Reilly' AND age > 30"
        );
    }

    #[test]
    fn named_parameters_can_repeat() {
        assert_eq!(
            render(
                "SELECT %(a)s, %(b)s, %(a)s",
                [("a", Value::Bool(true)), ("b", Value::Null)]
            )
            .unwrap(),
            "SELECT 't', NULL, 't'"
        );
    }

    #[test]
    fn percent_escapes() {
        assert_eq!(
            render("SELECT 'a%%' LIKE %s", [Value::from("a%")]).unwrap(),
            "SELECT 'a%' LIKE 'a%'"
        );
        assert_eq!(render("SELECT 'a%%'", ()).unwrap(), "SELECT 'a%%'");
    }

    #[test]
    fn injection_attempt_stays_inside_literal() {
        let rendered = render(
            "SELECT * FROM t WHERE name = %s",
            [Value::from("x'; DROP TABLE t; --")],
        )
        .unwrap();
        assert_eq!(rendered, "SELECT * FROM t WHERE name = 'x''; DROP TABLE t; --'");
    }

    #[test]
    fn argument_count_mismatch() {
        let too_many = render("SELECT %s", [Value::Int(1), Value::Int(2)]).unwrap_err();
        assert!(matches!(too_many, Error::Programming(_)));
        let too_few = render("SELECT %s, %s", [Value::Int(1)]).unwrap_err();
        assert!(matches!(too_few, Error::Programming(_)));
    }

    #[test]
    fn malformed_placeholders() {
        for query in ["SELECT %d", "SELECT %", "SELECT %(name", "SELECT %(name)d"] {
            let err = render(query, [Value::Int(1)]).unwrap_err();
            assert!(matches!(err, Error::Programming(_)), "{query}");
        }
    }

    #[test]
    fn mixed_and_mismatched_styles() {
        let mixed = render("SELECT %s, %(a)s", [Value::Int(1)]).unwrap_err();
        assert!(matches!(mixed, Error::Programming(_)));

        let missing = render("SELECT %(a)s", [("b", Value::Int(1))]).unwrap_err();
        assert!(missing.to_string().contains("missing named parameter 'a'"));

        let wrong_kind = render("SELECT %(a)s", [Value::Int(1)]).unwrap_err();
        assert!(matches!(wrong_kind, Error::Programming(_)));
    }

    #[test]
    fn unadaptable_value_fails_before_rendering() {
        let registry = AdapterRegistry::empty();
        let err = mogrify(
            "SELECT %s",
            &Params::from([Value::Int(1)]),
            &registry,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Adaptation(_)));
    }

    #[test]
    fn parse_segments() {
        assert_eq!(
            parse("a %s b %(x)s %%").unwrap(),
            vec![
                Segment::Text("a ".to_string()),
                Segment::Positional,
                Segment::Text(" b ".to_string()),
                Segment::Named("x"),
                Segment::Text(" %".to_string()),
            ]
        );
    }
}
