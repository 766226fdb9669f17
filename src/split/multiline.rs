// SPDX-License-Identifier: Apache-2.0

//! Record boundary detection: newline-delimited and regex-delimited records.

use regex::bytes::{Regex, RegexBuilder};
use serde::Deserialize;
use std::sync::Arc;

use super::SplitFunc;
use super::encoding::Encoding;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MultilineConfig {
    /// A new record starts wherever this pattern matches
    #[serde(default)]
    pub line_start_pattern: Option<String>,
    /// A record ends wherever this pattern matches
    #[serde(default)]
    pub line_end_pattern: Option<String>,
}

impl MultilineConfig {
    /// Build the split function for this configuration. Without a pattern,
    /// records are newline-delimited in the given encoding.
    pub fn build(&self, encoding: Encoding) -> Result<SplitFunc> {
        match (&self.line_start_pattern, &self.line_end_pattern) {
            (Some(_), Some(_)) => Err(Error::Config(
                "only one of line_start_pattern or line_end_pattern can be set".to_string(),
            )),
            (Some(p), None) => Ok(line_start_split_func(compile(p, "line_start_pattern")?)),
            (None, Some(p)) => Ok(line_end_split_func(compile(p, "line_end_pattern")?)),
            (None, None) => Ok(newline_split_func(encoding)),
        }
    }
}

fn compile(pattern: &str, name: &str) -> Result<Regex> {
    if pattern.is_empty() {
        return Err(Error::Config(format!("{} must not be empty", name)));
    }
    // `^` and `$` anchor at line boundaries, not only at the buffer edges
    RegexBuilder::new(pattern)
        .multi_line(true)
        .build()
        .map_err(|e| Error::Regex(format!("compile {}: {}", name, e)))
}

/// Split on the encoding's newline, trimming a trailing carriage return.
/// A trailing line without newline is never returned, even at EOF.
pub fn newline_split_func(encoding: Encoding) -> SplitFunc {
    let newline = encoding.newline();
    let carriage_return = encoding.carriage_return();

    Arc::new(move |data: &[u8], _at_eof: bool| {
        match find_aligned(data, newline) {
            Some(i) => {
                let line = &data[..i];
                let line = line.strip_suffix(carriage_return).unwrap_or(line);
                Ok((i + newline.len(), Some(line.to_vec())))
            }
            None => Ok((0, None)),
        }
    })
}

/// Position of `needle` in `data`, only considering offsets aligned to the
/// needle's width (UTF-16 code units must not be split).
fn find_aligned(data: &[u8], needle: &[u8]) -> Option<usize> {
    let width = needle.len();
    (0..data.len().saturating_sub(width - 1))
        .step_by(width)
        .find(|&i| &data[i..i + width] == needle)
}

fn trim_whitespace(data: &[u8]) -> &[u8] {
    let is_ws = |b: &u8| matches!(b, b'\r' | b'\n' | b'\t' | b' ');
    let start = data.iter().position(|b| !is_ws(b)).unwrap_or(data.len());
    let end = data.iter().rposition(|b| !is_ws(b)).map_or(start, |i| i + 1);
    &data[start..end]
}

fn line_start_split_func(re: Regex) -> SplitFunc {
    Arc::new(move |data: &[u8], _at_eof: bool| {
        let first = match re.find(data) {
            Some(m) => m,
            None => return Ok((0, None)),
        };

        if first.start() != 0 {
            // Content ahead of the first match is a record of its own so it
            // is not lost; pure whitespace is skipped
            let token = trim_whitespace(&data[..first.start()]);
            let token = (!token.is_empty()).then(|| token.to_vec());
            return Ok((first.start(), token));
        }

        if first.end() == data.len() {
            return Ok((0, None));
        }

        // The record runs until the next match; an empty match must not be
        // found again at the same position
        let search_from = first.end().max(first.start() + 1);
        match re.find_at(data, search_from) {
            Some(second) => {
                let token = trim_whitespace(&data[..second.start()]);
                Ok((second.start(), Some(token.to_vec())))
            }
            None => Ok((0, None)),
        }
    })
}

fn line_end_split_func(re: Regex) -> SplitFunc {
    Arc::new(move |data: &[u8], at_eof: bool| {
        // An empty match at the very start would end an empty record
        let Some(m) = re.find_iter(data).find(|m| m.end() > 0) else {
            return Ok((0, None));
        };

        // The match might continue into data not read yet
        if m.end() == data.len() && !at_eof {
            return Ok((0, None));
        }

        let token = trim_whitespace(&data[..m.end()]);
        Ok((m.end(), Some(token.to_vec())))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::split::encoding::EncodingConfig;

    fn utf8() -> Encoding {
        EncodingConfig::default().build().unwrap()
    }

    fn split_all(f: &SplitFunc, mut data: &[u8], at_eof: bool) -> Vec<String> {
        let mut out = vec![];
        loop {
            let (advance, token) = f(data, at_eof).unwrap();
            if let Some(t) = token {
                out.push(String::from_utf8(t).unwrap());
            }
            if advance == 0 {
                break;
            }
            data = &data[advance..];
        }
        out
    }

    #[test]
    fn test_newline_split() {
        let f = MultilineConfig::default().build(utf8()).unwrap();
        assert_eq!(
            split_all(&f, b"line1\nline2\r\npartial", true),
            vec!["line1", "line2"]
        );
    }

    #[test]
    fn test_newline_split_keeps_empty_lines() {
        let f = newline_split_func(utf8());
        assert_eq!(split_all(&f, b"a\n\nb\n", false), vec!["a", "", "b"]);
    }

    #[test]
    fn test_newline_split_utf16le() {
        let enc = EncodingConfig {
            encoding: "utf-16le".to_string(),
        }
        .build()
        .unwrap();
        let f = newline_split_func(enc);
        // "\u{0a00}" must not be mistaken for a newline at an odd offset
        let data = b"a\x00\n\x00\x00\x0a\n\x00";
        let (advance, token) = f(data, false).unwrap();
        assert_eq!(advance, 4);
        assert_eq!(token.unwrap(), b"a\x00");
        let (advance, token) = f(&data[4..], false).unwrap();
        assert_eq!(advance, 4);
        assert_eq!(token.unwrap(), b"\x00\x0a");
    }

    #[test]
    fn test_line_start_pattern() {
        let config = MultilineConfig {
            line_start_pattern: Some(r"\d{4}-".to_string()),
            ..Default::default()
        };
        let f = config.build(utf8()).unwrap();
        let data = b"preamble\n2024-01 first\n  continued\n2024-02 second\n";
        assert_eq!(
            split_all(&f, data, false),
            vec!["preamble", "2024-01 first\n  continued"]
        );
    }

    #[test]
    fn test_line_start_anchored_pattern() {
        let config = MultilineConfig {
            line_start_pattern: Some(r"^\d{4}-".to_string()),
            ..Default::default()
        };
        let f = config.build(utf8()).unwrap();
        let data = b"2024-01 first\n  continued\n2024-02 second\n2024-03 third\n";
        assert_eq!(
            split_all(&f, data, false),
            vec!["2024-01 first\n  continued", "2024-02 second"]
        );
    }

    #[test]
    fn test_line_end_pattern() {
        let config = MultilineConfig {
            line_end_pattern: Some(r"END\n".to_string()),
            ..Default::default()
        };
        let f = config.build(utf8()).unwrap();
        assert_eq!(
            split_all(&f, b"a\nb END\nc END\ntail", false),
            vec!["a\nb END", "c END"]
        );
    }

    #[test]
    fn test_line_end_pattern_empty_match_at_start() {
        let config = MultilineConfig {
            line_end_pattern: Some("$".to_string()),
            ..Default::default()
        };
        let f = config.build(utf8()).unwrap();
        assert_eq!(
            split_all(&f, b"one\ntwo\nthree", false),
            vec!["one", "two"]
        );
    }

    #[test]
    fn test_invalid_patterns() {
        let both = MultilineConfig {
            line_start_pattern: Some("a".to_string()),
            line_end_pattern: Some("b".to_string()),
        };
        assert!(matches!(both.build(utf8()), Err(Error::Config(_))));

        let bad = MultilineConfig {
            line_start_pattern: Some("(".to_string()),
            ..Default::default()
        };
        assert!(matches!(bad.build(utf8()), Err(Error::Regex(_))));

        let empty = MultilineConfig {
            line_end_pattern: Some(String::new()),
            ..Default::default()
        };
        assert!(matches!(empty.build(utf8()), Err(Error::Config(_))));
    }
}
