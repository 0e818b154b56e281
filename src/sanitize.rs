//! Field normalization applied once, at ingestion.
//!
//! Every value that reaches the snapshot writer has passed through
//! [`Sanitizer::clean`], so the writer never escapes or quotes anything.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{Delimiter, Record};

/// C0 controls, DEL and C1 controls.
static CONTROL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\x00-\x1F\x7F-\x{9F}]").expect("static regex"));

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));

/// Quote character replaced in values, and what it becomes.
const QUOTE: char = '"';
const QUOTE_LOOKALIKE: char = '\'';

#[derive(Debug, Clone, Copy)]
pub struct Sanitizer {
    delimiter: Delimiter,
}

impl Sanitizer {
    pub fn new(delimiter: Delimiter) -> Self {
        Self { delimiter }
    }

    /// Normalize a single value. Idempotent.
    pub fn clean(&self, raw: &str) -> String {
        let spaced = raw.replace(['\n', '\r', '\t'], " ");
        let stripped = CONTROL.replace_all(&spaced, "");
        let collapsed = WHITESPACE_RUN.replace_all(&stripped, " ");
        collapsed
            .trim()
            .replace(self.delimiter.as_char(), &self.delimiter.lookalike().to_string())
            .replace(QUOTE, &QUOTE_LOOKALIKE.to_string())
    }

    /// Sanitize the key and every field value of a raw record.
    pub fn sanitize(&self, raw: Record) -> Record {
        Record {
            key: self.clean(&raw.key),
            fields: raw
                .fields
                .into_iter()
                .map(|(name, value)| {
                    let value = self.clean(&value);
                    (name, value)
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_flattens_lines_and_tabs() {
        let s = Sanitizer::new(Delimiter::Comma);
        assert_eq!(s.clean("  line1\n\nline2\r\n\tend  "), "line1 line2 end");
    }

    #[test]
    fn test_clean_strips_control_characters() {
        let s = Sanitizer::new(Delimiter::Comma);
        assert_eq!(s.clean("a\u{0000}b\u{0007}c\u{007F}d\u{0085}e"), "abcde");
    }

    #[test]
    fn test_clean_replaces_delimiter_and_quote() {
        let s = Sanitizer::new(Delimiter::Pipe);
        let out = s.clean("line1\ntab\tvalue|with|delimiter \"quoted\"");
        assert!(!out.contains('|'));
        assert!(!out.contains('"'));
        assert!(!out.contains('\n'));
        assert_eq!(out, "line1 tab value¦with¦delimiter 'quoted'");
    }

    #[test]
    fn test_clean_is_idempotent() {
        for delimiter in [Delimiter::Comma, Delimiter::Pipe, Delimiter::Semicolon, Delimiter::Tab] {
            let s = Sanitizer::new(delimiter);
            for raw in [
                "",
                "   ",
                "a,b;c|d\te",
                "\"quoted\", she said;\r\n\u{0001}next",
                "unicode\u{00A0}space  and\u{2003}em",
            ] {
                let once = s.clean(raw);
                assert_eq!(s.clean(&once), once, "delimiter {delimiter:?}, input {raw:?}");
                assert!(!once.contains(delimiter.as_char()));
                assert!(!once.contains('"'));
            }
        }
    }

    #[test]
    fn test_sanitize_covers_key_and_fields() {
        let s = Sanitizer::new(Delimiter::Comma);
        let raw = Record::new(" https://x/a\n").with_field("Title", "Hello,\tworld");
        let clean = s.sanitize(raw);
        assert_eq!(clean.key, "https://x/a");
        assert_eq!(clean.get("Title"), Some("Hello\u{201A} world"));
        assert_eq!(s.sanitize(clean.clone()), clean);
    }
}
