//! `bytea` literals.
//!
//! Two wire formats exist: the historical escape format, where bytes
//! outside printable ASCII are written as `\ooo` octal triplets, and the hex
//! format (`\x` followed by two hex digits per byte) understood by servers
//! from 9.0 on. Either is wrapped in an escape string literal, so every
//! backslash meant for the `bytea` parser is doubled:
//!
//! ```text
//! b"a\0'"  ->  E'a\\000'''::bytea      (escape)
//! b"a\0'"  ->  E'\\x610027'::bytea     (hex)
//! ```

use std::sync::OnceLock;

use pqlink_core::{Error, Result, Value};

use crate::connection::PgConnection;

/// First server version accepting hex `bytea` input.
pub const HEX_BYTEA_SERVER_VERSION: i32 = 90_000;

/// Output format of a [`Binary`] adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteaFormat {
    /// Octal escapes; understood by every server
    #[default]
    Escape,
    /// `\x` hex; servers 9.0 and later
    Hex,
}

impl ByteaFormat {
    /// The format to use with a server of the given version.
    pub const fn for_server_version(version: i32) -> Self {
        if version >= HEX_BYTEA_SERVER_VERSION {
            ByteaFormat::Hex
        } else {
            ByteaFormat::Escape
        }
    }
}

/// Renders a byte string as `E'...'::bytea`.
#[derive(Debug)]
pub struct Binary {
    wrapped: Value,
    format: ByteaFormat,
    buffer: OnceLock<Vec<u8>>,
}

impl Binary {
    /// Wrap [`Value::Bytes`] or [`Value::Uuid`] raw bytes.
    pub fn new(value: Value) -> Result<Self> {
        if value.as_bytes().is_none() {
            return Err(Error::adaptation(value.type_name(), "not a byte string"));
        }
        Ok(Self {
            wrapped: value,
            format: ByteaFormat::default(),
            buffer: OnceLock::new(),
        })
    }

    /// Render in `format` regardless of the connection.
    pub fn with_format(mut self, format: ByteaFormat) -> Self {
        self.set_format(format);
        self
    }

    pub fn wrapped(&self) -> &Value {
        &self.wrapped
    }

    pub fn format(&self) -> ByteaFormat {
        self.format
    }

    pub fn getquoted(&self) -> &[u8] {
        self.buffer.get_or_init(|| {
            let bytes = self.wrapped.as_bytes().unwrap_or_default();
            match self.format {
                ByteaFormat::Escape => escape_bytea(bytes),
                ByteaFormat::Hex => hex_bytea(bytes),
            }
        })
    }

    /// Use the hex format if the connected server understands it.
    pub fn prepare(&mut self, conn: &PgConnection) {
        self.set_format(ByteaFormat::for_server_version(conn.server_version()));
    }

    fn set_format(&mut self, format: ByteaFormat) {
        if self.format != format {
            self.format = format;
            self.buffer = OnceLock::new();
        }
    }
}

fn escape_bytea(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() * 2 + 12);
    out.extend_from_slice(b"E'");
    for &b in bytes {
        match b {
            b'\'' => out.extend_from_slice(b"''"),
            b'\\' => out.extend_from_slice(br"\\\\"),
            0x20..=0x7e => out.push(b),
            _ => {
                out.extend_from_slice(br"\\");
                out.push(b'0' + (b >> 6));
                out.push(b'0' + ((b >> 3) & 7));
                out.push(b'0' + (b & 7));
            }
        }
    }
    out.extend_from_slice(b"'::bytea");
    out
}

fn hex_bytea(bytes: &[u8]) -> Vec<u8> {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = Vec::with_capacity(bytes.len() * 2 + 14);
    out.extend_from_slice(br"E'\\x");
    for &b in bytes {
        out.push(HEX[usize::from(b >> 4)]);
        out.push(HEX[usize::from(b & 0x0f)]);
    }
    out.extend_from_slice(b"'::bytea");
    out
}

fn malformed(message: impl Into<String>) -> Error {
    Error::adaptation("BLOB", message)
}

/// Decode a literal produced by [`Binary`] back to the original bytes.
///
/// Accepts both formats, with or without the `E` prefix and the trailing
/// `::bytea` cast.
pub fn decode_bytea_literal(literal: &[u8]) -> Result<Vec<u8>> {
    let literal = literal.strip_suffix(b"::bytea").unwrap_or(literal);
    let literal = literal.strip_prefix(b"E").unwrap_or(literal);
    let body = literal
        .strip_prefix(b"'")
        .and_then(|rest| rest.strip_suffix(b"'"))
        .ok_or_else(|| malformed("bytea literal is not quoted"))?;

    // String literal level: '' and \\ collapse
    let mut text = Vec::with_capacity(body.len());
    let mut i = 0;
    while i < body.len() {
        match (body[i], body.get(i + 1)) {
            (b'\'', Some(b'\'')) | (b'\\', Some(b'\\')) => {
                text.push(body[i]);
                i += 2;
            }
            (b'\'' | b'\\', _) => {
                return Err(malformed(format!("unexpected escape at offset {i}")));
            }
            (b, _) => {
                text.push(b);
                i += 1;
            }
        }
    }

    // bytea level
    if let Some(hex) = text.strip_prefix(br"\x") {
        if hex.len() % 2 != 0 {
            return Err(malformed("odd number of hex digits"));
        }
        return hex
            .chunks_exact(2)
            .map(|pair| {
                let digits =
                    std::str::from_utf8(pair).map_err(|_| malformed("invalid hex digit"))?;
                u8::from_str_radix(digits, 16).map_err(|_| malformed("invalid hex digit"))
            })
            .collect();
    }

    let mut out = Vec::with_capacity(text.len());
    let mut i = 0;
    while i < text.len() {
        if text[i] != b'\\' {
            out.push(text[i]);
            i += 1;
            continue;
        }
        match text.get(i + 1..i + 4) {
            Some([b'\\', ..]) => {
                out.push(b'\\');
                i += 2;
            }
            Some(&[a, b, c])
                if (b'0'..=b'3').contains(&a)
                    && (b'0'..=b'7').contains(&b)
                    && (b'0'..=b'7').contains(&c) =>
            {
                out.push(((a - b'0') << 6) | ((b - b'0') << 3) | (c - b'0'));
                i += 4;
            }
            _ if text.get(i + 1) == Some(&b'\\') => {
                out.push(b'\\');
                i += 2;
            }
            _ => return Err(malformed(format!("invalid escape at offset {i}"))),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(bytes: &[u8], format: ByteaFormat) -> Vec<u8> {
        Binary::new(Value::Bytes(bytes.to_vec()))
            .unwrap()
            .with_format(format)
            .getquoted()
            .to_vec()
    }

    #[test]
    fn escape_format() {
        assert_eq!(rendered(b"abc", ByteaFormat::Escape), b"E'abc'::bytea");
        assert_eq!(
            rendered(b"a\0'", ByteaFormat::Escape),
            br"E'a\\000'''::bytea".to_vec()
        );
        assert_eq!(
            rendered(b"\\\xff\n", ByteaFormat::Escape),
            br"E'\\\\\\377\\012'::bytea".to_vec()
        );
        assert_eq!(rendered(b"", ByteaFormat::Escape), b"E''::bytea");
    }

    #[test]
    fn hex_format() {
        assert_eq!(
            rendered(b"a\0'", ByteaFormat::Hex),
            br"E'\\x610027'::bytea".to_vec()
        );
        assert_eq!(rendered(b"", ByteaFormat::Hex), br"E'\\x'::bytea".to_vec());
    }

    #[test]
    fn format_by_server_version() {
        assert_eq!(ByteaFormat::for_server_version(80_404), ByteaFormat::Escape);
        assert_eq!(ByteaFormat::for_server_version(90_000), ByteaFormat::Hex);
        assert_eq!(ByteaFormat::for_server_version(160_002), ByteaFormat::Hex);
    }

    #[test]
    fn round_trip_every_byte() {
        let all: Vec<u8> = (0..=255).collect();
        for format in [ByteaFormat::Escape, ByteaFormat::Hex] {
            let literal = rendered(&all, format);
            assert_eq!(decode_bytea_literal(&literal).unwrap(), all);
        }
    }

    #[test]
    fn round_trip_quotes_and_backslashes() {
        let tricky = b"\\'\\\\''\0\0\\000".to_vec();
        for format in [ByteaFormat::Escape, ByteaFormat::Hex] {
            let literal = rendered(&tricky, format);
            assert_eq!(decode_bytea_literal(&literal).unwrap(), tricky);
        }
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode_bytea_literal(b"abc").is_err());
        assert!(decode_bytea_literal(br"E'\\x6'::bytea").is_err());
        assert!(decode_bytea_literal(br"E'\\9'::bytea").is_err());
        assert!(decode_bytea_literal(b"E'it's'::bytea").is_err());
    }

    #[test]
    fn uuid_bytes_are_accepted() {
        let binary = Binary::new(Value::Uuid([7; 16])).unwrap();
        assert_eq!(decode_bytea_literal(binary.getquoted()).unwrap(), vec![7; 16]);
        assert!(Binary::new(Value::from("text")).is_err());
    }
}
