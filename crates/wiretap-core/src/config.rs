//! Logger configuration
//!
//! Plain data describing which sections of a cycle are printed and how.
//! Callables (filters, custom formatters) are attached through
//! [`crate::logger::Builder`] since they cannot be deserialized.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

/// Bytes read from a body of unknown length when no ceiling is configured
pub const DEFAULT_UNKNOWN_BODY_LIMIT: u64 = 4096;

/// How a printer hands its output to the sink
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Flusher {
    /// Write immediately. Concurrent cycles may mingle.
    #[default]
    NoBuffer,
    /// Buffer each section (headers, body) and write it once ready.
    /// Reduces mingling but gives no ordering guarantee.
    OnReady,
    /// Buffer the whole cycle and write it once, at the end.
    OnEnd,
}

/// Built-in body formatters that can be enabled from a config file
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FormatterKind {
    /// Pretty-print `application/json` bodies
    Json,
}

/// Logger configuration
///
/// The zero value prints only the `* Request to` line of each cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Do not print the request URL (and remote address on servers)
    pub skip_request_info: bool,

    /// Print when the request began and how long it took
    pub time: bool,

    /// Print TLS connection details and certificates
    pub tls: bool,

    /// Print request headers
    pub request_header: bool,

    /// Print request bodies
    pub request_body: bool,

    /// Print response headers
    pub response_header: bool,

    /// Print response bodies
    pub response_body: bool,

    /// Print credential-bearing headers verbatim
    pub skip_sanitize: bool,

    /// Emit ANSI colour sequences
    pub colors: bool,

    /// Largest request body printed, in bytes (0 = no ceiling)
    pub max_request_body: u64,

    /// Largest response body printed, in bytes (0 = no ceiling)
    pub max_response_body: u64,

    /// Header names never printed (case-insensitive)
    pub skip_headers: Vec<String>,

    /// Initial flush strategy
    pub flusher: Flusher,

    /// Built-in formatters, tried in order before custom ones
    pub formatters: Vec<FormatterKind>,
}

impl Config {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration printing every section of a cycle
    pub fn verbose() -> Self {
        Self::default().with_all_sections()
    }

    /// Turn on every section (timing, TLS, headers and bodies), keeping the
    /// other settings
    pub fn with_all_sections(mut self) -> Self {
        self.time = true;
        self.tls = true;
        self.request_header = true;
        self.request_body = true;
        self.response_header = true;
        self.response_body = true;
        self
    }

    /// Parse a JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a JSON configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json(&contents)
    }

    /// Builder method for the flush strategy
    pub fn with_flusher(mut self, flusher: Flusher) -> Self {
        self.flusher = flusher;
        self
    }

    /// Ceiling applied when reading a request body of unknown length
    pub(crate) fn unknown_request_limit(&self) -> u64 {
        unknown_limit(self.max_request_body)
    }

    /// Ceiling applied when reading a response body of unknown length
    pub(crate) fn unknown_response_limit(&self) -> u64 {
        unknown_limit(self.max_response_body)
    }
}

fn unknown_limit(max: u64) -> u64 {
    if max == 0 {
        DEFAULT_UNKNOWN_BODY_LIMIT
    } else {
        max
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_is_minimal() {
        let config = Config::default();
        assert!(!config.request_header);
        assert!(!config.skip_sanitize);
        assert!(!config.skip_request_info);
        assert_eq!(config.flusher, Flusher::NoBuffer);
        assert_eq!(config.max_response_body, 0);
    }

    #[test]
    fn test_unknown_limits() {
        let mut config = Config::default();
        assert_eq!(config.unknown_request_limit(), 4096);
        config.max_response_body = 10;
        assert_eq!(config.unknown_response_limit(), 10);
    }

    #[test]
    fn test_from_json_partial() {
        let config = Config::from_json(
            r#"{"request_header": true, "flusher": "on_end", "formatters": ["json"], "skip_headers": ["X-Trace"]}"#,
        )
        .unwrap();
        assert!(config.request_header);
        assert!(!config.response_header);
        assert_eq!(config.flusher, Flusher::OnEnd);
        assert_eq!(config.formatters, vec![FormatterKind::Json]);
        assert_eq!(config.skip_headers, vec!["X-Trace".to_string()]);
    }

    #[test]
    fn test_from_json_invalid() {
        let err = Config::from_json(r#"{"flusher": "sometimes"}"#).unwrap_err();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"time": true, "max_request_body": 512}}"#).unwrap();

        let config = Config::load(file.path()).unwrap();
        assert!(config.time);
        assert_eq!(config.max_request_body, 512);

        let err = Config::load("/nonexistent/wiretap.json").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_all_sections_keep_other_settings() {
        let config = Config {
            colors: true,
            max_response_body: 64,
            ..Config::default()
        }
        .with_all_sections();

        assert!(config.time && config.tls && config.request_body && config.response_header);
        assert!(config.colors);
        assert_eq!(config.max_response_body, 64);
        assert_eq!(Config::verbose(), Config::default().with_all_sections());
    }

    #[test]
    fn test_round_trip_serialization() {
        let config = Config::verbose().with_flusher(Flusher::OnReady);
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("on_ready"));
        assert_eq!(Config::from_json(&json).unwrap(), config);
    }
}
