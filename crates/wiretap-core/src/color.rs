//! Terminal text attributes
//!
//! Minimal SGR (Select Graphic Rendition) support for the transcript.
//! See <https://en.wikipedia.org/wiki/ANSI_escape_code>.

use std::fmt::Display;

const ESCAPE: &str = "\x1b";

/// A single SGR code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Attribute {
    Reset = 0,
    Bold = 1,
    FgRed = 31,
    FgYellow = 33,
    FgBlue = 34,
}

/// Wrap `text` with the given attributes, resetting afterwards.
///
/// Empty text stays empty so that optional fields don't leave stray
/// escape sequences behind.
pub fn paint(attrs: &[Attribute], text: impl Display) -> String {
    let text = text.to_string();
    if text.is_empty() || attrs.is_empty() {
        return text;
    }

    let sequence = attrs
        .iter()
        .map(|a| (*a as u8).to_string())
        .collect::<Vec<_>>()
        .join(";");

    format!(
        "{ESCAPE}[{sequence}m{text}{ESCAPE}[{}m",
        Attribute::Reset as u8
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paint() {
        assert_eq!(
            paint(&[Attribute::FgBlue, Attribute::Bold], "GET"),
            "\x1b[34;1mGET\x1b[0m"
        );
        assert_eq!(paint(&[Attribute::FgRed], 404), "\x1b[31m404\x1b[0m");
    }

    #[test]
    fn test_paint_passthrough() {
        assert_eq!(paint(&[], "plain"), "plain");
        assert_eq!(paint(&[Attribute::FgRed], ""), "");
    }
}
