//! Session coordinator
//!
//! [`Logger`] is a cheap handle shared by every adapter and printer. It
//! holds the immutable configuration plus a lock-guarded block of mutable
//! state: the output sink, the filters, the flush strategy and the skipped
//! header names. The same lock serializes writes to the sink.

use hyper::{HeaderMap, Request, Response};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::body::Body;
use crate::config::{Config, Flusher, FormatterKind};
use crate::error::BoxError;
use crate::formatter::{Formatter, JsonFormatter};
use crate::printer::Printer;
use crate::sandbox::{BodyFilter, Filter};

/// Request extension: do not log this request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Hide;

/// Mark a request so that no adapter logs it. It is still sent or handled.
pub fn with_hide<B>(req: &mut Request<B>) {
    req.extensions_mut().insert(Hide);
}

/// Whether a request carries the [`Hide`] marker
pub fn is_hidden<B>(req: &Request<B>) -> bool {
    req.extensions().get::<Hide>().is_some()
}

/// Request extension: address of the client, set by servers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteAddr(pub SocketAddr);

/// HTTP transcript logger
#[derive(Clone)]
pub struct Logger {
    inner: Arc<Inner>,
}

struct Inner {
    config: Config,
    formatters: Vec<Arc<dyn Formatter>>,
    state: Mutex<State>,
}

struct State {
    // stdout when unset
    writer: Option<Box<dyn Write + Send>>,
    filter: Option<Filter>,
    body_filter: Option<BodyFilter>,
    flusher: Flusher,
    skip_headers: Arc<HashSet<String>>,
}

/// Per-cycle view of the mutable state
pub(crate) struct Snapshot {
    pub flusher: Flusher,
    pub filter: Option<Filter>,
    pub body_filter: Option<BodyFilter>,
    pub skip_headers: Arc<HashSet<String>>,
}

impl Logger {
    /// Logger writing to stdout with the built-in formatters named in
    /// `config`
    pub fn new(config: Config) -> Self {
        Builder::new().config(config).build()
    }

    pub fn builder() -> Builder {
        Builder::new()
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub(crate) fn formatters(&self) -> &[Arc<dyn Formatter>] {
        &self.inner.formatters
    }

    /// Replace the sink
    pub fn set_output(&self, w: impl Write + Send + 'static) {
        self.inner.state.lock().writer = Some(Box::new(w));
    }

    /// Skip requests for which `filter` returns `Ok(true)`
    pub fn set_filter<F>(&self, filter: F)
    where
        F: Fn(&Request<Body>) -> Result<bool, BoxError> + Send + Sync + 'static,
    {
        self.inner.state.lock().filter = Some(Arc::new(filter));
    }

    pub fn clear_filter(&self) {
        self.inner.state.lock().filter = None;
    }

    /// Skip bodies for which `filter` returns `Ok(true)`
    pub fn set_body_filter<F>(&self, filter: F)
    where
        F: Fn(&HeaderMap) -> Result<bool, BoxError> + Send + Sync + 'static,
    {
        self.inner.state.lock().body_filter = Some(Arc::new(filter));
    }

    pub fn clear_body_filter(&self) {
        self.inner.state.lock().body_filter = None;
    }

    /// Change the flush strategy. Cycles already running keep theirs.
    pub fn set_flusher(&self, flusher: Flusher) {
        self.inner.state.lock().flusher = flusher;
    }

    /// Replace the header names that are never printed
    pub fn set_skip_headers<I, S>(&self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names = lowercase_set(names);
        self.inner.state.lock().skip_headers = Arc::new(names);
    }

    pub(crate) fn snapshot(&self) -> Snapshot {
        let state = self.inner.state.lock();
        Snapshot {
            flusher: state.flusher,
            filter: state.filter.clone(),
            body_filter: state.body_filter.clone(),
            skip_headers: Arc::clone(&state.skip_headers),
        }
    }

    /// Write to the sink. The lock is held for this write only.
    pub(crate) fn write(&self, text: &str) {
        let mut state = self.inner.state.lock();
        let result = match state.writer.as_mut() {
            Some(w) => w.write_all(text.as_bytes()).and_then(|_| w.flush()),
            None => {
                let mut out = io::stdout().lock();
                out.write_all(text.as_bytes()).and_then(|_| out.flush())
            }
        };

        if let Err(e) = result {
            tracing::warn!(error = %e, "failed to write transcript");
        }
    }

    /// Print a request outside of any adapter.
    ///
    /// The [`Hide`] marker is ignored here; the filter still applies.
    /// Timing and TLS details are not printed. Returns the request with a
    /// body equivalent to the original.
    pub async fn print_request(&self, req: Option<Request<Body>>) -> Option<Request<Body>> {
        let mut printer = Printer::unbuffered(self);
        let Some(req) = req else {
            printer.print_null_request();
            return None;
        };

        if printer.check_filter(&req) {
            return Some(req);
        }
        Some(printer.print_request(req).await)
    }

    /// Print a response outside of any adapter
    pub async fn print_response(&self, resp: Option<Response<Body>>) -> Option<Response<Body>> {
        let mut printer = Printer::unbuffered(self);
        let Some(resp) = resp else {
            printer.print_null_response();
            return None;
        };
        Some(printer.print_response(resp, None).await)
    }
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger")
            .field("config", &self.inner.config)
            .field("formatters", &self.inner.formatters.len())
            .finish_non_exhaustive()
    }
}

fn lowercase_set<I, S>(names: I) -> HashSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names
        .into_iter()
        .map(|n| n.as_ref().trim().to_ascii_lowercase())
        .collect()
}

/// Assembles a [`Logger`]
#[derive(Default)]
pub struct Builder {
    config: Config,
    formatters: Vec<Arc<dyn Formatter>>,
    filter: Option<Filter>,
    body_filter: Option<BodyFilter>,
    output: Option<Box<dyn Write + Send>>,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Add a formatter, tried after the built-in ones
    pub fn formatter(mut self, formatter: impl Formatter + 'static) -> Self {
        self.formatters.push(Arc::new(formatter));
        self
    }

    /// Skip requests for which `filter` returns `Ok(true)`
    pub fn filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Request<Body>) -> Result<bool, BoxError> + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Skip bodies for which `filter` returns `Ok(true)`
    pub fn body_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&HeaderMap) -> Result<bool, BoxError> + Send + Sync + 'static,
    {
        self.body_filter = Some(Arc::new(filter));
        self
    }

    pub fn output(mut self, w: impl Write + Send + 'static) -> Self {
        self.output = Some(Box::new(w));
        self
    }

    pub fn build(self) -> Logger {
        let mut formatters: Vec<Arc<dyn Formatter>> = self
            .config
            .formatters
            .iter()
            .map(|kind| match kind {
                FormatterKind::Json => Arc::new(JsonFormatter) as Arc<dyn Formatter>,
            })
            .collect();
        formatters.extend(self.formatters);

        let state = State {
            writer: self.output,
            filter: self.filter,
            body_filter: self.body_filter,
            flusher: self.config.flusher,
            skip_headers: Arc::new(lowercase_set(&self.config.skip_headers)),
        };

        Logger {
            inner: Arc::new(Inner {
                config: self.config,
                formatters,
                state: Mutex::new(state),
            }),
        }
    }
}
