//! Shared helpers for the end-to-end transcript tests

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use chrono::DateTime;
use hyper::{Request, Response};
use parking_lot::Mutex;
use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use wiretap_core::{Body, BoxError, CertificateInfo, ClientTlsConfig, RoundTripper};

/// In-memory sink
#[derive(Clone, Default)]
pub struct Sink(Arc<Mutex<Vec<u8>>>);

impl Sink {
    pub fn text(&self) -> String {
        String::from_utf8(self.0.lock().clone()).expect("transcript is UTF-8")
    }
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Sink keeping every write call apart
#[derive(Clone, Default)]
pub struct Writes(Arc<Mutex<Vec<String>>>);

impl Writes {
    pub fn all(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

impl Write for Writes {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .push(String::from_utf8_lossy(buf).into_owned());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

type Handler = dyn Fn(Request<Bytes>) -> Response<Body> + Send + Sync;

/// Transport answering from a closure. It reads the whole request body
/// first, like a real client would.
pub struct Stub {
    handler: Box<Handler>,
    tls: Option<ClientTlsConfig>,
    calls: AtomicUsize,
    received: Mutex<Vec<Bytes>>,
    /// Yield to the scheduler before answering
    pub yields: usize,
}

impl Stub {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(Request<Bytes>) -> Response<Body> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            tls: None,
            calls: AtomicUsize::new(0),
            received: Mutex::new(Vec::new()),
            yields: 0,
        }
    }

    pub fn with_tls(mut self, tls: ClientTlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Request bodies as the transport saw them
    pub fn received(&self) -> Vec<Bytes> {
        self.received.lock().clone()
    }
}

#[async_trait]
impl RoundTripper for Stub {
    async fn round_trip(&self, req: Request<Body>) -> Result<Response<Body>, BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (parts, body) = req.into_parts();
        let body = body.to_bytes().await?;
        self.received.lock().push(body.clone());

        for _ in 0..self.yields {
            tokio::task::yield_now().await;
        }

        Ok((self.handler)(Request::from_parts(parts, body)))
    }

    fn tls_client_config(&self) -> Option<&ClientTlsConfig> {
        self.tls.as_ref()
    }
}

/// A 200 response with the given content type and body
pub fn ok(content_type: &str, body: impl Into<Body>) -> Response<Body> {
    Response::builder()
        .header("content-type", content_type)
        .body(body.into())
        .expect("valid response")
}

/// Certificate details without a real certificate behind them
pub fn certificate(subject: &str, issuer: &str, dns: &[&str]) -> CertificateInfo {
    CertificateInfo {
        subject: subject.to_string(),
        issuer: issuer.to_string(),
        not_before: DateTime::from_timestamp(0, 0).expect("valid timestamp"),
        not_after: DateTime::from_timestamp(4_102_444_800, 0).expect("valid timestamp"),
        dns_names: dns.iter().map(|s| s.to_string()).collect(),
        ip_addresses: Vec::new(),
    }
}

pub const CERT_DATES: &str =
    "*  start date: Thu Jan  1 00:00:00 UTC 1970\n*  expire date: Fri Jan  1 00:00:00 UTC 2100\n";
