//! Value Codec
//!
//! Converts application values into the bytes sent in GATT writes, and
//! native value buffers into owned bytes.

use crate::domain::error::{CentralError, Result};
use encoding_rs::Encoding;
use serde_json::Value as JsonValue;

/// Label used when none is given and the configured default is unknown
pub const DEFAULT_ENCODING: &str = "iso-8859-1";

/// A value the caller wants written to a characteristic
#[derive(Debug, Clone, PartialEq)]
pub enum WriteValue {
    Bytes(Vec<u8>),
    Text(String),
    /// Loosely-typed input: arrays of 0..=255 are bytes, strings are text
    Json(JsonValue),
}

impl WriteValue {
    /// True for values that count as "nothing to write"
    pub fn is_empty(&self) -> bool {
        match self {
            WriteValue::Text(text) => text.is_empty(),
            WriteValue::Json(JsonValue::Null) => true,
            WriteValue::Json(JsonValue::String(text)) => text.is_empty(),
            _ => false,
        }
    }
}

impl From<Vec<u8>> for WriteValue {
    fn from(bytes: Vec<u8>) -> Self {
        WriteValue::Bytes(bytes)
    }
}

impl From<&[u8]> for WriteValue {
    fn from(bytes: &[u8]) -> Self {
        WriteValue::Bytes(bytes.to_vec())
    }
}

impl From<String> for WriteValue {
    fn from(text: String) -> Self {
        WriteValue::Text(text)
    }
}

impl From<&str> for WriteValue {
    fn from(text: &str) -> Self {
        WriteValue::Text(text.to_string())
    }
}

impl From<JsonValue> for WriteValue {
    fn from(value: JsonValue) -> Self {
        WriteValue::Json(value)
    }
}

#[derive(Debug, Clone, Copy)]
enum TextCodec {
    Latin1,
    Utf16Be,
    Utf16Le,
    Table(&'static Encoding),
}

/// Encoding label to codec strategy. Unknown labels fall back to Latin-1.
static CODECS: &[(&str, TextCodec)] = &[
    ("utf-8", TextCodec::Table(&encoding_rs::UTF_8_INIT)),
    ("utf8", TextCodec::Table(&encoding_rs::UTF_8_INIT)),
    ("iso-8859-1", TextCodec::Latin1),
    ("latin1", TextCodec::Latin1),
    ("iso-8859-2", TextCodec::Table(&encoding_rs::ISO_8859_2_INIT)),
    ("latin2", TextCodec::Table(&encoding_rs::ISO_8859_2_INIT)),
    ("shift-jis", TextCodec::Table(&encoding_rs::SHIFT_JIS_INIT)),
    ("iso-2022-jp", TextCodec::Table(&encoding_rs::ISO_2022_JP_INIT)),
    ("euc-jp", TextCodec::Table(&encoding_rs::EUC_JP_INIT)),
    ("windows-1250", TextCodec::Table(&encoding_rs::WINDOWS_1250_INIT)),
    ("windows-1251", TextCodec::Table(&encoding_rs::WINDOWS_1251_INIT)),
    ("windows-1252", TextCodec::Table(&encoding_rs::WINDOWS_1252_INIT)),
    ("windows-1253", TextCodec::Table(&encoding_rs::WINDOWS_1253_INIT)),
    ("windows-1254", TextCodec::Table(&encoding_rs::WINDOWS_1254_INIT)),
    ("utf-16be", TextCodec::Utf16Be),
    ("utf-16le", TextCodec::Utf16Le),
];

fn codec_for(label: &str) -> TextCodec {
    let label = label.trim().to_ascii_lowercase();
    CODECS
        .iter()
        .find(|(name, _)| *name == label)
        .map(|(_, codec)| *codec)
        .unwrap_or(TextCodec::Latin1)
}

/// Whether `label` names a supported encoding (no fallback applied)
pub fn is_supported(label: &str) -> bool {
    let label = label.trim().to_ascii_lowercase();
    CODECS.iter().any(|(name, _)| *name == label)
}

fn encode_text(text: &str, label: &str) -> Result<Vec<u8>> {
    match codec_for(label) {
        TextCodec::Latin1 => text
            .chars()
            .map(|c| {
                u8::try_from(u32::from(c)).map_err(|_| {
                    CentralError::EncodingError(format!("{:?} is not representable in Latin-1", c))
                })
            })
            .collect(),
        TextCodec::Utf16Be => Ok(text.encode_utf16().flat_map(u16::to_be_bytes).collect()),
        TextCodec::Utf16Le => Ok(text.encode_utf16().flat_map(u16::to_le_bytes).collect()),
        TextCodec::Table(encoding) => {
            let (bytes, _, had_errors) = encoding.encode(text);
            if had_errors {
                return Err(CentralError::EncodingError(format!(
                    "text is not representable in {}",
                    encoding.name()
                )));
            }
            Ok(bytes.into_owned())
        }
    }
}

fn json_to_bytes(items: &[JsonValue]) -> Result<Vec<u8>> {
    items
        .iter()
        .map(|item| {
            item.as_u64()
                .and_then(|n| u8::try_from(n).ok())
                .ok_or_else(|| CentralError::EncodingError(format!("{} is not a byte", item)))
        })
        .collect()
}

/// Encode a value for the wire. `encoding` defaults to Latin-1.
pub fn encode(value: &WriteValue, encoding: Option<&str>) -> Result<Vec<u8>> {
    let label = encoding.unwrap_or(DEFAULT_ENCODING);
    match value {
        WriteValue::Bytes(bytes) => Ok(bytes.clone()),
        WriteValue::Text(text) => encode_text(text, label),
        WriteValue::Json(JsonValue::String(text)) => encode_text(text, label),
        WriteValue::Json(JsonValue::Array(items)) => json_to_bytes(items),
        WriteValue::Json(other) => Err(CentralError::EncodingError(format!(
            "unsupported value shape: {}",
            other
        ))),
    }
}

/// Copy a native value buffer into an owned one
pub fn decode(native: &[u8]) -> Vec<u8> {
    native.to_vec()
}
