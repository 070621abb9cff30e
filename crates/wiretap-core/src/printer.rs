//! Transcript printer
//!
//! One [`Printer`] renders one request/response cycle. It owns the cycle's
//! buffer and the flush strategy captured when it was created, and goes
//! through the [`Logger`] for every write to the shared sink.

use bytes::Bytes;
use hyper::header::{CONTENT_TYPE, HOST};
use hyper::{HeaderMap, Method, Request, Response, StatusCode, Version};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use crate::body::{self, capture, declared_length, Body, Outcome};
use crate::color::{paint, Attribute};
use crate::config::{Config, Flusher};
use crate::formatter::media_type;
use crate::header::{self, HeaderList, DEFAULT_SANITIZERS};
use crate::logger::{Logger, RemoteAddr};
use crate::sandbox::{self, BodyFilter, Filter, FilterDecision, MatchResult};
use crate::tls::{split_host, CertificateInfo, ClientTlsConfig, TlsInfo, CERTIFICATE_DATE_FORMAT};

const BLUE: &[Attribute] = &[Attribute::FgBlue];
const BLUE_BOLD: &[Attribute] = &[Attribute::FgBlue, Attribute::Bold];
const RED: &[Attribute] = &[Attribute::FgRed];
const YELLOW: &[Attribute] = &[Attribute::FgYellow];

#[derive(Debug, Clone, Copy)]
enum Direction {
    Request,
    Response,
}

impl Direction {
    fn name(self) -> &'static str {
        match self {
            Direction::Request => "request",
            Direction::Response => "response",
        }
    }
}

/// Renders one cycle
pub(crate) struct Printer {
    logger: Logger,
    flusher: Flusher,
    filter: Option<Filter>,
    body_filter: Option<BodyFilter>,
    skip_headers: Arc<HashSet<String>>,
    buf: String,
}

impl Printer {
    /// Printer for a cycle, snapshotting the logger's mutable state
    pub(crate) fn new(logger: &Logger) -> Self {
        let snapshot = logger.snapshot();
        Self {
            logger: logger.clone(),
            flusher: snapshot.flusher,
            filter: snapshot.filter,
            body_filter: snapshot.body_filter,
            skip_headers: snapshot.skip_headers,
            buf: String::new(),
        }
    }

    /// Printer writing straight to the sink, for the direct print calls
    pub(crate) fn unbuffered(logger: &Logger) -> Self {
        let mut printer = Self::new(logger);
        printer.flusher = Flusher::NoBuffer;
        printer
    }

    fn config(&self) -> &Config {
        self.logger.config()
    }

    fn print(&mut self, s: impl AsRef<str>) {
        match self.flusher {
            Flusher::NoBuffer => self.logger.write(s.as_ref()),
            Flusher::OnReady | Flusher::OnEnd => self.buf.push_str(s.as_ref()),
        }
    }

    fn maybe_on_ready(&mut self) {
        if self.flusher == Flusher::OnReady {
            self.flush();
        }
    }

    /// Hand the buffered text to the sink
    pub(crate) fn flush(&mut self) {
        if self.buf.is_empty() {
            return;
        }
        let text = std::mem::take(&mut self.buf);
        self.logger.write(&text);
    }

    fn paint(&self, attrs: &[Attribute], text: impl std::fmt::Display) -> String {
        if self.config().colors {
            paint(attrs, text)
        } else {
            text.to_string()
        }
    }

    /// Whether the request is filtered out. Filter faults never filter.
    pub(crate) fn check_filter(&mut self, req: &Request<Body>) -> bool {
        let Some(filter) = self.filter.clone() else {
            return false;
        };

        match sandbox::run_filter(&filter, req) {
            FilterDecision::Log => false,
            FilterDecision::Suppress => {
                tracing::debug!(uri = %req.uri(), "request filtered out");
                true
            }
            FilterDecision::LogWithError(err) => {
                let target = self.paint(BLUE, format!("{} {}", req.method(), req.uri()));
                let err = self.paint(RED, err);
                self.print(format!("* cannot filter request: {target}: {err}\n"));
                false
            }
        }
    }

    pub(crate) fn print_null_request(&mut self) {
        let line = self.paint(RED, "error: null request");
        self.print(format!("> {line}\n"));
    }

    pub(crate) fn print_null_response(&mut self) {
        let line = self.paint(RED, "error: null response");
        self.print(format!("< {line}\n"));
        self.maybe_on_ready();
    }

    pub(crate) fn print_request_info<B>(&mut self, req: &Request<B>) {
        let to = request_url(req);
        let to = self.paint(BLUE, to);
        self.print(format!("* Request to {to}\n"));

        if let Some(RemoteAddr(addr)) = req.extensions().get::<RemoteAddr>() {
            let from = self.paint(BLUE, addr);
            self.print(format!("* Request from {from}\n"));
        }
    }

    pub(crate) fn print_time_request(&mut self) -> Instant {
        let start = Instant::now();
        self.print(format!("* Request at {}\n", chrono::Local::now()));
        start
    }

    pub(crate) fn print_time_took(&mut self, start: Instant) {
        self.print(format!("* Request took {:?}\n", start.elapsed()));
    }

    pub(crate) fn print_insecure_warning(&mut self) {
        let warning = self.paint(
            RED,
            "connection is susceptible to man-in-the-middle attacks.",
        );
        self.print(format!("* Skipping TLS verification: {warning}\n"));
    }

    /// Transport error of an outbound cycle
    pub(crate) fn print_error(&mut self, err: impl std::fmt::Display) {
        let err = self.paint(RED, err);
        self.print(format!("* {err}\n"));
    }

    /// Request header block and body, as enabled. Returns the request with
    /// a body yielding exactly what the original would have.
    pub(crate) async fn print_request(&mut self, req: Request<Body>) -> Request<Body> {
        if self.config().request_header {
            self.print_request_header(&req);
            self.maybe_on_ready();
        }

        if !self.config().request_body {
            return req;
        }

        let (parts, body) = req.into_parts();
        let body = self.print_body(Direction::Request, &parts.headers, body).await;
        self.maybe_on_ready();
        Request::from_parts(parts, body)
    }

    fn print_request_header<B>(&mut self, req: &Request<B>) {
        let target = req
            .uri()
            .path_and_query()
            .map_or("/", |pq| pq.as_str())
            .to_string();
        let line = format!(
            "> {} {} {}\n",
            self.paint(BLUE_BOLD, req.method()),
            self.paint(YELLOW, target),
            self.paint(BLUE, proto(req.version())),
        );
        self.print(line);

        let host = req
            .headers()
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| req.uri().authority().map(|a| a.to_string()));

        if let Some(host) = host {
            let line = format!(
                "> {}{} {}\n",
                self.paint(BLUE_BOLD, "Host"),
                self.paint(RED, ":"),
                self.paint(YELLOW, host),
            );
            self.print(line);
        }

        let mut headers = header::collect(req.headers(), &self.skip_headers);
        headers.remove("Host");
        self.print_headers('>', headers);
        self.print("\n");
    }

    /// Response header block and body, as enabled. `method` is the method
    /// of the request the response answers, if known.
    pub(crate) async fn print_response(
        &mut self,
        resp: Response<Body>,
        method: Option<&Method>,
    ) -> Response<Body> {
        if self.config().response_header {
            let list = header::collect(resp.headers(), &self.skip_headers);
            self.print_response_header(resp.version(), resp.status(), list);
            self.maybe_on_ready();
        }

        if !self.config().response_body || method == Some(&Method::HEAD) {
            return resp;
        }

        let (parts, body) = resp.into_parts();
        let body = self.print_body(Direction::Response, &parts.headers, body).await;
        self.maybe_on_ready();
        Response::from_parts(parts, body)
    }

    fn print_response_header(&mut self, version: Version, status: StatusCode, headers: HeaderList) {
        let line = format!(
            "< {} {}\n",
            self.paint(BLUE_BOLD, proto(version)),
            self.paint(RED, status_text(status)),
        );
        self.print(line);
        self.print_headers('<', headers);
        self.print("\n");
    }

    fn print_headers(&mut self, prefix: char, headers: HeaderList) {
        let headers = if self.config().skip_sanitize {
            headers
        } else {
            header::sanitize(DEFAULT_SANITIZERS, &headers)
        };

        for (name, values) in &headers {
            for value in values {
                let line = format!(
                    "{prefix} {}{} {}\n",
                    self.paint(BLUE_BOLD, name),
                    self.paint(RED, ":"),
                    self.paint(YELLOW, value),
                );
                self.print(line);
            }
        }
    }

    /// Whether the body filter skips this body. Faults keep the body.
    fn body_filtered(&mut self, direction: Direction, headers: &HeaderMap) -> bool {
        let Some(filter) = self.body_filter.clone() else {
            return false;
        };

        let verdict = sandbox::run_body_filter(&filter, headers);

        if let Some(panic) = verdict.panic {
            self.print(format!("* panic while filtering body: {panic}\n"));
        }

        if let Some(err) = verdict.error {
            let msg = self.paint(
                RED,
                format!("error on {} body filter: {err}", direction.name()),
            );
            self.print(format!("* {msg}\n"));
        }

        verdict.skip
    }

    fn print_too_long(&mut self, len: u64, max: u64) {
        self.print(format!(
            "* body is too long ({len} bytes) to print, skipping (longer than {max} bytes)\n"
        ));
    }

    async fn print_body(&mut self, direction: Direction, headers: &HeaderMap, body: Body) -> Body {
        let declared = declared_length(headers, &body);
        if body::is_empty(&body) || declared == Some(0) {
            return body;
        }

        if self.body_filtered(direction, headers) {
            return body;
        }

        let (max, unknown_limit) = match direction {
            Direction::Request => (
                self.config().max_request_body,
                self.config().unknown_request_limit(),
            ),
            Direction::Response => (
                self.config().max_response_body,
                self.config().unknown_response_limit(),
            ),
        };

        if let Some(len) = declared {
            if max > 0 && len > max {
                self.print_too_long(len, max);
                return body;
            }
        }

        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        if declared.is_some() {
            let captured = capture(body, (max > 0).then_some(max)).await;
            match &captured.outcome {
                Outcome::Complete => self.print_body_bytes(&content_type, &captured.bytes),
                Outcome::Truncated => self.print(format!(
                    "* body is too long, skipping (contains more than {} bytes)\n",
                    captured.bytes.len()
                )),
                Outcome::Failed(err) => {
                    let err = self.paint(RED, err);
                    self.print(format!("* cannot read body: {err}\n"));
                }
            }
            return captured.body;
        }

        let captured = capture(body, Some(unknown_limit)).await;
        match &captured.outcome {
            Outcome::Complete if captured.bytes.is_empty() => {}
            Outcome::Complete => self.print_body_bytes(&content_type, &captured.bytes),
            Outcome::Truncated => self.print(format!(
                "* body is too long, skipping (contains more than {} bytes)\n",
                captured.bytes.len()
            )),
            Outcome::Failed(err) => self.print(format!(
                "* cannot read body: {err} ({} bytes read)\n",
                captured.bytes.len()
            )),
        }
        captured.body
    }

    /// Print a body through the first matching formatter
    fn print_body_bytes(&mut self, content_type: &str, raw: &Bytes) {
        let media_type = media_type(content_type);
        let logger = self.logger.clone();
        let mut formatted = None;

        for formatter in logger.formatters() {
            match sandbox::run_match(formatter.as_ref(), &media_type) {
                MatchResult::NotMatched => continue,
                MatchResult::Panicked(panic) => {
                    self.print(format!("* panic while testing body format: {panic}\n"));
                    continue;
                }
                MatchResult::Matched => {}
            }

            match sandbox::run_format(formatter.as_ref(), raw) {
                Ok(out) => {
                    formatted = Some(out);
                    break;
                }
                Err(err) => {
                    let err = self.paint(RED, err);
                    self.print(format!(
                        "* body cannot be formatted: {err}\n{}\n",
                        String::from_utf8_lossy(raw)
                    ));
                    return;
                }
            }
        }

        let text = match &formatted {
            Some(out) => String::from_utf8_lossy(out),
            None => String::from_utf8_lossy(raw),
        };
        self.print(format!("{text}\n"));
    }

    /// Response section of an inbound cycle, from what the handler sent
    pub(crate) fn print_server_response(
        &mut self,
        version: Version,
        status: StatusCode,
        headers: &HeaderMap,
        size: u64,
        recorded: &Bytes,
    ) {
        if self.config().response_header {
            let list = header::collect(headers, &self.skip_headers);
            self.print_response_header(version, status, list);
        }

        if !self.config().response_body || size == 0 {
            return;
        }

        if self.body_filtered(Direction::Response, headers) {
            return;
        }

        let max = self.config().max_response_body;
        if max > 0 && size > max {
            self.print_too_long(size, max);
            return;
        }

        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        self.print_body_bytes(&content_type, recorded);
    }

    /// Negotiated connection state. `skip_verify_chains` is set on servers,
    /// where an unverified chain is the normal case.
    pub(crate) fn print_tls_info(&mut self, tls: &TlsInfo, skip_verify_chains: bool) {
        let protocol = tls.protocol_name();
        let cipher = tls.cipher_name();

        if protocol.is_some() || cipher.is_some() {
            let mut line = format!(
                "* TLS connection using {} / {}",
                self.paint(BLUE, protocol.unwrap_or_else(|| "unknown".to_string())),
                self.paint(BLUE, cipher.unwrap_or_else(|| "unknown".to_string())),
            );
            if !skip_verify_chains && !tls.verified {
                line.push_str(" (insecure=true)");
            }
            line.push('\n');
            self.print(line);
        }

        if let Some(alpn) = tls.negotiated_protocol.as_deref().filter(|p| !p.is_empty()) {
            let alpn = self.paint(BLUE, alpn);
            self.print(format!("* ALPN: {alpn} accepted\n"));
        }
    }

    pub(crate) fn print_outgoing_client_tls(&mut self, config: &ClientTlsConfig) {
        let Some(first) = config.certificates.first() else {
            return;
        };

        self.print("* Client certificate:\n");
        match first {
            Some(cert) => self.print_certificate("", cert),
            None => self.print("** unparsed certificate found, skipping\n"),
        }
    }

    pub(crate) fn print_incoming_client_tls(&mut self, tls: &TlsInfo) {
        if tls.peer_certificates.is_empty() {
            return;
        }

        self.print("* Client certificate:\n");
        match tls.find_peer_certificate("") {
            Some(cert) => self.print_certificate("", cert),
            None => self.print_no_valid_certificate(),
        }
    }

    pub(crate) fn print_tls_server(&mut self, host: &str, tls: &TlsInfo) {
        let hostname = split_host(host);

        self.print("* Server certificate:\n");
        match tls.find_peer_certificate(hostname) {
            Some(cert) => self.print_certificate(hostname, cert),
            None => self.print_no_valid_certificate(),
        }
    }

    fn print_no_valid_certificate(&mut self) {
        let line = self.paint(RED, "** No valid certificate was found");
        self.print(format!("{line}\n"));
    }

    fn print_certificate(&mut self, hostname: &str, cert: &CertificateInfo) {
        let block = format!(
            "*  subject: {}\n*  start date: {}\n*  expire date: {}\n*  issuer: {}\n",
            self.paint(BLUE, &cert.subject),
            self.paint(BLUE, cert.not_before.format(CERTIFICATE_DATE_FORMAT)),
            self.paint(BLUE, cert.not_after.format(CERTIFICATE_DATE_FORMAT)),
            self.paint(BLUE, &cert.issuer),
        );
        self.print(block);

        if hostname.is_empty() {
            return;
        }

        match cert.verify_hostname(hostname) {
            Ok(()) => self.print("*  TLS certificate verify ok.\n"),
            Err(err) => {
                let err = self.paint(RED, err);
                self.print(format!("*  {err}\n"));
            }
        }
    }
}

impl Drop for Printer {
    fn drop(&mut self) {
        self.flush();
    }
}

/// URL a request is addressed to. Server requests carry only the path, so
/// scheme and host are rebuilt.
fn request_url<B>(req: &Request<B>) -> String {
    let uri = req.uri();
    if uri.authority().is_some() {
        return uri.to_string();
    }

    let host = req
        .headers()
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let scheme = if req.extensions().get::<TlsInfo>().is_some() {
        "https"
    } else {
        "http"
    };
    format!("{scheme}://{host}{uri}")
}

fn proto(version: Version) -> String {
    format!("{version:?}")
}

fn status_text(status: StatusCode) -> String {
    match status.canonical_reason() {
        Some(reason) => format!("{} {reason}", status.as_u16()),
        None => status.as_u16().to_string(),
    }
}
