//! Quoted string literals.

use std::borrow::Cow;
use std::sync::OnceLock;

use pqlink_core::{Error, Result, Value, ValueKind};

use crate::connection::PgConnection;
use crate::encoding::ClientEncoding;

/// Largest `time` value the server accepts, `24:00:00`, in microseconds.
pub const MAX_TIME_MICROS: i64 = 86_400_000_000;

/// Renders text-like values as `'...'` literals.
///
/// Embedded quotes are doubled. Text containing backslashes is rendered as
/// an escape string (`E'...'`) with every backslash doubled, so the result
/// means the same whatever `standard_conforming_strings` is set to. The
/// escaped text is then re-encoded to the client encoding.
///
/// Besides [`Value::Text`], dates, times, timestamps, UUIDs and JSON are
/// rendered through this adapter in their ISO text form followed by a cast.
#[derive(Debug)]
pub struct QuotedString {
    wrapped: Value,
    encoding: ClientEncoding,
    buffer: OnceLock<Vec<u8>>,
}

impl QuotedString {
    /// Wrap a text-like value, initially for a `UTF8` connection.
    ///
    /// A [`Value::Time`] outside `00:00:00..=24:00:00` is refused here.
    pub fn new(value: Value) -> Result<Self> {
        if let Value::Time(micros) = value {
            if !(0..=MAX_TIME_MICROS).contains(&micros) {
                return Err(Error::adaptation(
                    value.type_name(),
                    format!("{micros} microseconds is not a time of day"),
                ));
            }
        }
        match value.kind() {
            ValueKind::Text
            | ValueKind::Date
            | ValueKind::Time
            | ValueKind::Timestamp
            | ValueKind::TimestampTz
            | ValueKind::Uuid
            | ValueKind::Json => Ok(Self {
                wrapped: value,
                encoding: ClientEncoding::UTF8,
                buffer: OnceLock::new(),
            }),
            _ => Err(Error::adaptation(
                value.type_name(),
                "not representable as a quoted string",
            )),
        }
    }

    /// Render for `encoding` instead of the connection's encoding.
    pub fn with_encoding(mut self, encoding: ClientEncoding) -> Self {
        self.set_encoding(encoding);
        self
    }

    pub fn wrapped(&self) -> &Value {
        &self.wrapped
    }

    pub fn encoding(&self) -> &ClientEncoding {
        &self.encoding
    }

    /// Type cast appended to the literal, if any.
    pub fn cast(&self) -> Option<&'static str> {
        match self.wrapped {
            Value::Date(_) => Some("date"),
            Value::Time(_) => Some("time"),
            Value::Timestamp(_) => Some("timestamp"),
            Value::TimestampTz(_) => Some("timestamptz"),
            Value::Uuid(_) => Some("uuid"),
            Value::Json(_) => Some("json"),
            _ => None,
        }
    }

    /// The rendered literal, computed on first use.
    pub fn getquoted(&self) -> Result<&[u8]> {
        if let Some(buffer) = self.buffer.get() {
            return Ok(buffer);
        }
        let rendered = self.render()?;
        Ok(self.buffer.get_or_init(|| rendered))
    }

    /// Pick up the connection's client encoding.
    pub fn prepare(&mut self, conn: &PgConnection) {
        self.set_encoding(conn.client_encoding());
    }

    fn set_encoding(&mut self, encoding: ClientEncoding) {
        if self.encoding != encoding {
            self.encoding = encoding;
            self.buffer = OnceLock::new();
        }
    }

    fn text(&self) -> Result<Cow<'_, str>> {
        Ok(match &self.wrapped {
            Value::Text(s) => Cow::Borrowed(s.as_str()),
            Value::Date(days) => Cow::Owned(date_string(*days)),
            Value::Time(micros) => Cow::Owned(time_string(*micros)),
            Value::Timestamp(micros) => Cow::Owned(timestamp_string(*micros)),
            Value::TimestampTz(micros) => Cow::Owned(format!("{}+00", timestamp_string(*micros))),
            Value::Uuid(bytes) => Cow::Owned(uuid_string(bytes)),
            Value::Json(json) => Cow::Owned(
                serde_json::to_string(json)
                    .map_err(|e| Error::adaptation("JSON", e.to_string()))?,
            ),
            other => {
                return Err(Error::adaptation(
                    other.type_name(),
                    "not representable as a quoted string",
                ));
            }
        })
    }

    fn render(&self) -> Result<Vec<u8>> {
        let text = self.text()?;
        if text.contains('\0') {
            return Err(Error::adaptation(
                self.wrapped.type_name(),
                "string literals cannot contain NUL (0x00) characters",
            ));
        }

        let (escaped, backslashes) = escape_text(&text);
        let body = self.encoding.encode(&escaped)?;

        let cast = self.cast();
        let mut out = Vec::with_capacity(body.len() + 3 + cast.map_or(0, |c| c.len() + 2));
        if backslashes {
            out.push(b'E');
        }
        out.push(b'\'');
        out.extend_from_slice(&body);
        out.push(b'\'');
        if let Some(cast) = cast {
            out.extend_from_slice(b"::");
            out.extend_from_slice(cast.as_bytes());
        }
        Ok(out)
    }
}

/// Double quotes and backslashes; reports whether a backslash was seen.
fn escape_text(text: &str) -> (Cow<'_, str>, bool) {
    if !text.contains(['\'', '\\']) {
        return (Cow::Borrowed(text), false);
    }
    let mut escaped = String::with_capacity(text.len() + 8);
    let mut backslashes = false;
    for c in text.chars() {
        match c {
            '\'' => escaped.push_str("''"),
            '\\' => {
                escaped.push_str("\\\\");
                backslashes = true;
            }
            c => escaped.push(c),
        }
    }
    (Cow::Owned(escaped), backslashes)
}

/// Days since 1970-01-01 to `YYYY-MM-DD`.
pub(crate) fn date_string(days: i32) -> String {
    // Julian day number to Gregorian calendar date
    let jd = 2_440_588 + i64::from(days);

    let l = jd + 68_569;
    let n = 4 * l / 146_097;
    let l = l - (146_097 * n + 3) / 4;
    let i = 4000 * (l + 1) / 1_461_001;
    let l = l - 1461 * i / 4 + 31;
    let j = 80 * l / 2447;
    let d = l - 2447 * j / 80;
    let l = j / 11;
    let m = j + 2 - 12 * l;
    let y = 100 * (n - 49) + i + l;

    format!("{y:04}-{m:02}-{d:02}")
}

/// Microseconds since midnight to `HH:MM:SS[.ffffff]`.
pub(crate) fn time_string(micros: i64) -> String {
    let total_secs = micros.div_euclid(1_000_000);
    let frac_micros = micros.rem_euclid(1_000_000);
    let hours = total_secs / 3600;
    let mins = (total_secs % 3600) / 60;
    let secs = total_secs % 60;

    if frac_micros == 0 {
        format!("{hours:02}:{mins:02}:{secs:02}")
    } else {
        format!("{hours:02}:{mins:02}:{secs:02}.{frac_micros:06}")
    }
}

/// Microseconds since the epoch to `YYYY-MM-DD HH:MM:SS[.ffffff]`.
pub(crate) fn timestamp_string(micros: i64) -> String {
    const DAY: i64 = 86_400 * 1_000_000;
    let days = micros.div_euclid(DAY);
    let day_micros = micros.rem_euclid(DAY);

    let days = i32::try_from(days).unwrap_or(if days < 0 { i32::MIN } else { i32::MAX });
    format!("{} {}", date_string(days), time_string(day_micros))
}

fn uuid_string(bytes: &[u8; 16]) -> String {
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}
