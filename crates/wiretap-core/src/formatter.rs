//! Body formatters
//!
//! A formatter claims bodies by media type and rewrites them for display.
//! Formatters are tried in order and the first match wins.

use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};
use serde_json::Value;

use crate::error::{BoxError, Error};

/// Rewrites a body for display
pub trait Formatter: Send + Sync {
    /// Whether this formatter handles `media_type` (e.g. `application/json`)
    fn matches(&self, media_type: &str) -> bool;

    /// Write the formatted form of `src` into `dst`.
    ///
    /// On error the body is printed verbatim after a diagnostic.
    fn format(&self, dst: &mut Vec<u8>, src: &[u8]) -> Result<(), BoxError>;
}

/// Re-indents JSON documents with four spaces.
///
/// Key order and number literals are kept as received (serde_json's
/// `preserve_order` and `arbitrary_precision` features).
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonFormatter;

const INDENT: &[u8] = b"    ";

impl Formatter for JsonFormatter {
    fn matches(&self, media_type: &str) -> bool {
        media_type == "application/json"
    }

    fn format(&self, dst: &mut Vec<u8>, src: &[u8]) -> Result<(), BoxError> {
        let value: Value =
            serde_json::from_slice(src).map_err(|e| Error::Format(e.to_string()))?;

        let mut ser = Serializer::with_formatter(dst, PrettyFormatter::with_indent(INDENT));
        value.serialize(&mut ser).map_err(Error::Json)?;
        Ok(())
    }
}

/// Media type of a `Content-Type` value, without parameters
pub fn media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pretty(src: &str) -> String {
        let mut dst = Vec::new();
        JsonFormatter.format(&mut dst, src.as_bytes()).unwrap();
        String::from_utf8(dst).unwrap()
    }

    #[test]
    fn test_json_indent() {
        assert_eq!(
            pretty(r#"{"result":"Hello, world!","number":3.14}"#),
            "{\n    \"result\": \"Hello, world!\",\n    \"number\": 3.14\n}"
        );
    }

    #[test]
    fn test_json_nested_and_empty() {
        assert_eq!(
            pretty(r#" {"a": [1, {"b": null}], "c": {}, "d": [] } "#),
            "{\n    \"a\": [\n        1,\n        {\n            \"b\": null\n        }\n    ],\n    \"c\": {},\n    \"d\": []\n}"
        );
    }

    #[test]
    fn test_json_strings_kept() {
        assert_eq!(
            pretty(r#"{"k": "a, b: {c} \"q\" [x]"}"#),
            "{\n    \"k\": \"a, b: {c} \\\"q\\\" [x]\"\n}"
        );
    }

    #[test]
    fn test_json_keeps_number_literals() {
        assert_eq!(pretty("[1.50, 2e10]"), "[\n    1.50,\n    2e10\n]");
    }

    #[test]
    fn test_json_invalid() {
        let mut dst = Vec::new();
        let err = JsonFormatter.format(&mut dst, br#"{"bad": }"#).unwrap_err();
        assert_eq!(err.to_string(), "expected value at line 1 column 9");
        assert!(dst.is_empty());
    }

    #[test]
    fn test_matches() {
        assert!(JsonFormatter.matches("application/json"));
        assert!(!JsonFormatter.matches("text/plain"));
    }

    #[test]
    fn test_media_type() {
        assert_eq!(media_type("application/json; charset=utf-8"), "application/json");
        assert_eq!(media_type("Text/Plain"), "text/plain");
        assert_eq!(media_type(""), "");
    }
}
