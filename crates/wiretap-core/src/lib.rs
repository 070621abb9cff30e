//! Wiretap Core Library
//!
//! Human-readable transcripts of HTTP traffic, for debugging clients and
//! servers. A [`Logger`] prints request lines, headers, bodies, TLS details
//! and timing for each request/response cycle, without changing what the
//! client or the handler sees.
//!
//! # Modules
//!
//! - [`logger`] - Session coordinator: configuration, sink, filters
//! - [`client`] - Outbound adapter ([`RoundTripper`])
//! - [`server`] - Inbound adapter (`Logger::serve`, tower layer)
//! - [`body`] - Bounded, non-destructive body capture
//! - [`sandbox`] - Panic containment around user callables
//! - [`formatter`] - Body formatters
//! - [`header`] - Header sanitization and ordering
//! - [`tls`] - TLS connection and certificate details
//! - [`color`] - Terminal text attributes
//! - [`config`] - Configuration
//! - [`error`] - Error types
//!
//! # Example
//!
//! ```no_run
//! use wiretap_core::{Config, Logger, ReqwestTransport, RoundTripper};
//!
//! # async fn run() -> Result<(), wiretap_core::BoxError> {
//! let logger = Logger::new(Config::verbose());
//! let client = logger.round_tripper(ReqwestTransport::default());
//!
//! let req = hyper::Request::get("https://example.com/")
//!     .body(wiretap_core::Body::empty())?;
//! let _resp = client.round_trip(req).await?;
//! # Ok(())
//! # }
//! ```

pub mod body;
pub mod client;
pub mod color;
pub mod config;
pub mod error;
pub mod formatter;
pub mod header;
pub mod logger;
mod printer;
pub mod sandbox;
pub mod server;
pub mod tls;

// Re-export commonly used types
pub use body::Body;
pub use client::{LoggingRoundTripper, ReqwestTransport, RoundTripper};
pub use config::{Config, Flusher, FormatterKind};
pub use error::{BoxError, Error, Result};
pub use formatter::{Formatter, JsonFormatter};
pub use logger::{is_hidden, with_hide, Builder, Hide, Logger, RemoteAddr};
pub use sandbox::{BodyFilter, Filter, SkipBody};
pub use server::{LoggerLayer, LoggingService};
pub use tls::{CertificateInfo, ClientTlsConfig, TlsInfo};
