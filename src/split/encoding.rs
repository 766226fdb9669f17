// SPDX-License-Identifier: Apache-2.0

//! Text decoding applied to every record before it is emitted.

use serde::Deserialize;

use crate::error::{Error, Result};

/// Label that disables decoding: record bytes are emitted as read.
pub const NOP_ENCODING: &str = "nop";

/// Encoding used when none is configured.
pub const DEFAULT_ENCODING: &str = "utf-8";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EncodingConfig {
    /// WHATWG encoding label (e.g. `utf-8`, `utf-16le`, `latin1`) or `nop`
    #[serde(default = "default_encoding")]
    pub encoding: String,
}

fn default_encoding() -> String {
    DEFAULT_ENCODING.to_string()
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            encoding: default_encoding(),
        }
    }
}

impl EncodingConfig {
    pub fn build(&self) -> Result<Encoding> {
        let label = self.encoding.trim();
        if label.eq_ignore_ascii_case(NOP_ENCODING) {
            return Ok(Encoding::Nop);
        }
        if label.is_empty() {
            return Ok(Encoding::Text(encoding_rs::UTF_8));
        }
        encoding_rs::Encoding::for_label(label.as_bytes())
            .map(Encoding::Text)
            .ok_or_else(|| Error::Encoding(format!("unsupported encoding '{}'", self.encoding)))
    }
}

/// A resolved text encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// No decoding
    Nop,
    Text(&'static encoding_rs::Encoding),
}

impl Encoding {
    /// Decode `bytes` into UTF-8. Malformed sequences are replaced with U+FFFD.
    /// Returns whether replacements were made alongside the decoded bytes.
    pub fn decode(&self, bytes: &[u8]) -> (Vec<u8>, bool) {
        match self {
            Encoding::Nop => (bytes.to_vec(), false),
            Encoding::Text(enc) => {
                let (text, had_errors) = enc.decode_without_bom_handling(bytes);
                (text.into_owned().into_bytes(), had_errors)
            }
        }
    }

    /// The newline sequence as it appears in the encoded stream.
    pub fn newline(&self) -> &'static [u8] {
        match self.code_unit_order() {
            Some(Endian::Little) => b"\n\x00",
            Some(Endian::Big) => b"\x00\n",
            None => b"\n",
        }
    }

    /// The carriage return as it appears in the encoded stream.
    pub fn carriage_return(&self) -> &'static [u8] {
        match self.code_unit_order() {
            Some(Endian::Little) => b"\r\x00",
            Some(Endian::Big) => b"\x00\r",
            None => b"\r",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Encoding::Nop => NOP_ENCODING,
            Encoding::Text(enc) => enc.name(),
        }
    }

    fn code_unit_order(&self) -> Option<Endian> {
        match self {
            Encoding::Text(enc) if *enc == encoding_rs::UTF_16LE => Some(Endian::Little),
            Encoding::Text(enc) if *enc == encoding_rs::UTF_16BE => Some(Endian::Big),
            _ => None,
        }
    }
}

enum Endian {
    Little,
    Big,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(label: &str) -> Result<Encoding> {
        EncodingConfig {
            encoding: label.to_string(),
        }
        .build()
    }

    #[test]
    fn test_known_labels() {
        assert_eq!(build("nop").unwrap(), Encoding::Nop);
        assert_eq!(build("UTF-8").unwrap().name(), "UTF-8");
        assert_eq!(build("utf8").unwrap().name(), "UTF-8");
        assert_eq!(build("utf-16le").unwrap().name(), "UTF-16LE");
        assert_eq!(build("").unwrap().name(), "UTF-8");
    }

    #[test]
    fn test_unknown_label() {
        let err = build("klingon").unwrap_err();
        assert!(matches!(err, Error::Encoding(_)));
    }

    #[test]
    fn test_decode_utf16le() {
        let enc = build("utf-16le").unwrap();
        let (text, had_errors) = enc.decode(b"h\x00i\x00");
        assert_eq!(text, b"hi");
        assert!(!had_errors);
        assert_eq!(enc.newline(), b"\n\x00");
    }

    #[test]
    fn test_decode_replaces_invalid_utf8() {
        let enc = build("utf-8").unwrap();
        let (text, had_errors) = enc.decode(b"ok\xff");
        assert!(had_errors);
        assert_eq!(String::from_utf8(text).unwrap(), "ok\u{FFFD}");
    }

    #[test]
    fn test_nop_keeps_bytes() {
        let (raw, _) = Encoding::Nop.decode(b"\xff\xfe");
        assert_eq!(raw, b"\xff\xfe");
    }
}
