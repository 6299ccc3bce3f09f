//! PostgreSQL client encodings.
//!
//! Maps the encoding names the server reports (and the aliases it accepts)
//! to codecs able to re-encode Rust strings. Names are compared after
//! normalization: ASCII upper case with `-`, `_` and spaces removed, so
//! `utf-8`, `UTF8` and `Utf_8` are the same encoding.
//!
//! Every server encoding is known by name, but a few have no codec here.
//! A connection using one of them still works; only text outside ASCII
//! fails to render.

use std::borrow::Cow;
use std::fmt;

use encoding_rs::Encoding;
use pqlink_core::{Error, Result};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Codec {
    /// 7-bit only
    Ascii,
    /// ISO-8859-1: code points up to U+00FF map to the byte of equal value
    Latin1,
    /// ISO-8859-9: Latin-1 with six Turkish letters in place of Icelandic ones
    Latin5,
    Table(&'static Encoding),
    /// An EUC double-byte set encoded through a superset codec; only
    /// ASCII and pairs of bytes in 0xA1..=0xFE are accepted
    Euc(&'static Encoding),
    /// Known to the server, no codec available
    Unsupported,
}

/// Turkish letters ISO-8859-9 stores where ISO-8859-1 has `Ðİ Þð ýþ`.
const LATIN5_SWAPS: [(char, u8); 6] = [
    ('\u{011E}', 0xD0),
    ('\u{0130}', 0xDD),
    ('\u{015E}', 0xDE),
    ('\u{011F}', 0xF0),
    ('\u{0131}', 0xFD),
    ('\u{015F}', 0xFE),
];

fn latin1_byte(c: char) -> Option<u8> {
    u8::try_from(c).ok()
}

fn latin5_byte(c: char) -> Option<u8> {
    if let Some(&(_, byte)) = LATIN5_SWAPS.iter().find(|(letter, _)| *letter == c) {
        return Some(byte);
    }
    let byte = u8::try_from(c).ok()?;
    (!LATIN5_SWAPS.iter().any(|&(_, swapped)| swapped == byte)).then_some(byte)
}

const fn is_euc_byte(byte: u8) -> bool {
    matches!(byte, 0xA1..=0xFE)
}

/// A client encoding with its canonical server name.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientEncoding {
    name: Cow<'static, str>,
    codec: Codec,
}

impl fmt::Debug for ClientEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let codec = match self.codec {
            Codec::Ascii => "ascii",
            Codec::Latin1 => "iso-8859-1",
            Codec::Latin5 => "iso-8859-9",
            Codec::Table(encoding) | Codec::Euc(encoding) => encoding.name(),
            Codec::Unsupported => "none",
        };
        f.debug_struct("ClientEncoding")
            .field("name", &self.name)
            .field("codec", &codec)
            .finish()
    }
}

impl fmt::Display for ClientEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// (normalized name or alias, canonical server name, codec)
static ENCODINGS: &[(&str, &str, Codec)] = &[
    ("SQLASCII", "SQL_ASCII", Codec::Ascii),
    ("UTF8", "UTF8", Codec::Table(encoding_rs::UTF_8)),
    ("UNICODE", "UTF8", Codec::Table(encoding_rs::UTF_8)),
    ("LATIN1", "LATIN1", Codec::Latin1),
    ("ISO88591", "LATIN1", Codec::Latin1),
    ("LATIN2", "LATIN2", Codec::Table(encoding_rs::ISO_8859_2)),
    ("ISO88592", "LATIN2", Codec::Table(encoding_rs::ISO_8859_2)),
    ("LATIN3", "LATIN3", Codec::Table(encoding_rs::ISO_8859_3)),
    ("ISO88593", "LATIN3", Codec::Table(encoding_rs::ISO_8859_3)),
    ("LATIN4", "LATIN4", Codec::Table(encoding_rs::ISO_8859_4)),
    ("ISO88594", "LATIN4", Codec::Table(encoding_rs::ISO_8859_4)),
    ("LATIN5", "LATIN5", Codec::Latin5),
    ("ISO88599", "LATIN5", Codec::Latin5),
    ("LATIN6", "LATIN6", Codec::Table(encoding_rs::ISO_8859_10)),
    ("ISO885910", "LATIN6", Codec::Table(encoding_rs::ISO_8859_10)),
    ("LATIN7", "LATIN7", Codec::Table(encoding_rs::ISO_8859_13)),
    ("ISO885913", "LATIN7", Codec::Table(encoding_rs::ISO_8859_13)),
    ("LATIN8", "LATIN8", Codec::Table(encoding_rs::ISO_8859_14)),
    ("ISO885914", "LATIN8", Codec::Table(encoding_rs::ISO_8859_14)),
    ("LATIN9", "LATIN9", Codec::Table(encoding_rs::ISO_8859_15)),
    ("ISO885915", "LATIN9", Codec::Table(encoding_rs::ISO_8859_15)),
    ("LATIN10", "LATIN10", Codec::Table(encoding_rs::ISO_8859_16)),
    ("ISO885916", "LATIN10", Codec::Table(encoding_rs::ISO_8859_16)),
    ("ISO88595", "ISO_8859_5", Codec::Table(encoding_rs::ISO_8859_5)),
    ("ISO88596", "ISO_8859_6", Codec::Table(encoding_rs::ISO_8859_6)),
    ("ISO88597", "ISO_8859_7", Codec::Table(encoding_rs::ISO_8859_7)),
    ("ISO88598", "ISO_8859_8", Codec::Table(encoding_rs::ISO_8859_8)),
    ("WIN866", "WIN866", Codec::Table(encoding_rs::IBM866)),
    ("ALT", "WIN866", Codec::Table(encoding_rs::IBM866)),
    ("WIN874", "WIN874", Codec::Table(encoding_rs::WINDOWS_874)),
    ("WIN1250", "WIN1250", Codec::Table(encoding_rs::WINDOWS_1250)),
    ("WIN1251", "WIN1251", Codec::Table(encoding_rs::WINDOWS_1251)),
    ("WIN", "WIN1251", Codec::Table(encoding_rs::WINDOWS_1251)),
    ("WIN1252", "WIN1252", Codec::Table(encoding_rs::WINDOWS_1252)),
    ("WIN1253", "WIN1253", Codec::Table(encoding_rs::WINDOWS_1253)),
    ("WIN1254", "WIN1254", Codec::Table(encoding_rs::WINDOWS_1254)),
    ("WIN1255", "WIN1255", Codec::Table(encoding_rs::WINDOWS_1255)),
    ("WIN1256", "WIN1256", Codec::Table(encoding_rs::WINDOWS_1256)),
    ("WIN1257", "WIN1257", Codec::Table(encoding_rs::WINDOWS_1257)),
    ("WIN1258", "WIN1258", Codec::Table(encoding_rs::WINDOWS_1258)),
    ("TCVN", "WIN1258", Codec::Table(encoding_rs::WINDOWS_1258)),
    ("ABC", "WIN1258", Codec::Table(encoding_rs::WINDOWS_1258)),
    ("KOI8R", "KOI8R", Codec::Table(encoding_rs::KOI8_R)),
    ("KOI8", "KOI8R", Codec::Table(encoding_rs::KOI8_R)),
    ("KOI8U", "KOI8U", Codec::Table(encoding_rs::KOI8_U)),
    ("EUCJP", "EUC_JP", Codec::Table(encoding_rs::EUC_JP)),
    ("SJIS", "SJIS", Codec::Table(encoding_rs::SHIFT_JIS)),
    ("SHIFTJIS", "SJIS", Codec::Table(encoding_rs::SHIFT_JIS)),
    ("MSKANJI", "SJIS", Codec::Table(encoding_rs::SHIFT_JIS)),
    ("WIN932", "SJIS", Codec::Table(encoding_rs::SHIFT_JIS)),
    // encoding_rs EUC-KR is windows-949, a superset of both
    ("EUCKR", "EUC_KR", Codec::Euc(encoding_rs::EUC_KR)),
    ("UHC", "UHC", Codec::Table(encoding_rs::EUC_KR)),
    ("WIN949", "UHC", Codec::Table(encoding_rs::EUC_KR)),
    ("EUCCN", "EUC_CN", Codec::Euc(encoding_rs::GBK)),
    ("GBK", "GBK", Codec::Table(encoding_rs::GBK)),
    ("WIN936", "GBK", Codec::Table(encoding_rs::GBK)),
    ("GB18030", "GB18030", Codec::Table(encoding_rs::GB18030)),
    ("BIG5", "BIG5", Codec::Table(encoding_rs::BIG5)),
    ("WIN950", "BIG5", Codec::Table(encoding_rs::BIG5)),
    ("EUCTW", "EUC_TW", Codec::Unsupported),
    ("EUCJIS2004", "EUC_JIS_2004", Codec::Unsupported),
    ("SHIFTJIS2004", "SHIFT_JIS_2004", Codec::Unsupported),
    ("JOHAB", "JOHAB", Codec::Unsupported),
    ("MULEINTERNAL", "MULE_INTERNAL", Codec::Unsupported),
];

/// Normalize an encoding name for lookup.
pub fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '-' | '_' | ' '))
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

impl ClientEncoding {
    /// The encoding every new connection starts with until told otherwise.
    pub const UTF8: ClientEncoding = ClientEncoding {
        name: Cow::Borrowed("UTF8"),
        codec: Codec::Table(encoding_rs::UTF_8),
    };

    /// Look up an encoding by server name or alias.
    pub fn lookup(name: &str) -> Result<Self> {
        let key = normalize_name(name);
        ENCODINGS
            .iter()
            .find(|(alias, _, _)| *alias == key)
            .map(|&(_, name, codec)| ClientEncoding {
                name: Cow::Borrowed(name),
                codec,
            })
            .ok_or_else(|| Error::encoding(name, "unknown client encoding"))
    }

    /// The encoding a server reported.
    ///
    /// Never fails: a name missing from the table is kept as reported,
    /// without a codec.
    pub fn from_server(name: &str) -> Self {
        Self::lookup(name).unwrap_or_else(|_| ClientEncoding {
            name: Cow::Owned(name.to_string()),
            codec: Codec::Unsupported,
        })
    }

    /// Canonical server name, e.g. `UTF8` or `LATIN1`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_utf8(&self) -> bool {
        self.codec == Codec::Table(encoding_rs::UTF_8)
    }

    /// Whether text beyond ASCII can be re-encoded for this encoding.
    pub fn has_codec(&self) -> bool {
        self.codec != Codec::Unsupported
    }

    /// Re-encode `text` for the server.
    ///
    /// Fails if any character has no representation in this encoding;
    /// nothing is substituted.
    pub fn encode<'a>(&self, text: &'a str) -> Result<Cow<'a, [u8]>> {
        match self.codec {
            Codec::Ascii | Codec::Unsupported => match text.chars().find(|c| !c.is_ascii()) {
                None => Ok(Cow::Borrowed(text.as_bytes())),
                Some(c) => Err(self.unmappable(c)),
            },
            Codec::Latin1 => self.encode_bytewise(text, latin1_byte),
            Codec::Latin5 => self.encode_bytewise(text, latin5_byte),
            Codec::Table(encoding) => {
                let (bytes, _, had_unmappable) = encoding.encode(text);
                if had_unmappable {
                    let c = text
                        .chars()
                        .find(|c| encoding.encode(c.encode_utf8(&mut [0; 4])).2)
                        .unwrap_or(char::REPLACEMENT_CHARACTER);
                    return Err(self.unmappable(c));
                }
                Ok(bytes)
            }
            Codec::Euc(encoding) => {
                let mut out = Vec::with_capacity(text.len());
                let mut buf = [0; 4];
                for c in text.chars() {
                    let (bytes, _, had_unmappable) = encoding.encode(c.encode_utf8(&mut buf));
                    match (&*bytes, had_unmappable) {
                        ([byte], false) if byte.is_ascii() => out.push(*byte),
                        ([lead, trail], false) if is_euc_byte(*lead) && is_euc_byte(*trail) => {
                            out.extend_from_slice(&[*lead, *trail]);
                        }
                        _ => return Err(self.unmappable(c)),
                    }
                }
                Ok(Cow::Owned(out))
            }
        }
    }

    fn encode_bytewise<'a>(
        &self,
        text: &'a str,
        to_byte: fn(char) -> Option<u8>,
    ) -> Result<Cow<'a, [u8]>> {
        if text.is_ascii() {
            return Ok(Cow::Borrowed(text.as_bytes()));
        }
        text.chars()
            .map(|c| to_byte(c).ok_or_else(|| self.unmappable(c)))
            .collect::<Result<Vec<u8>>>()
            .map(Cow::Owned)
    }

    fn unmappable(&self, c: char) -> Error {
        let message = if self.has_codec() {
            format!(
                "character U+{:04X} has no equivalent in {}",
                u32::from(c),
                self.name
            )
        } else {
            format!(
                "character U+{:04X} cannot be sent: no codec for {}, only ASCII text",
                u32::from(c),
                self.name
            )
        };
        Error::encoding(&*self.name, message)
    }
}
