//! Outbound adapter
//!
//! [`RoundTripper`] is the "send a request, get a response" seam. Wrapping a
//! transport in [`LoggingRoundTripper`] (or calling [`Logger::round_trip`])
//! prints the cycle while leaving the response, its body bytes and any
//! transport error exactly as the wrapped transport produced them.

use async_trait::async_trait;
use hyper::header::HOST;
use hyper::{Request, Response, Version};

use crate::body::Body;
use crate::error::{BoxError, Error};
use crate::logger::{is_hidden, Logger};
use crate::printer::Printer;
use crate::tls::{CertificateInfo, ClientTlsConfig, TlsInfo};

/// Sends one request and returns its response
#[async_trait]
pub trait RoundTripper: Send + Sync {
    async fn round_trip(&self, req: Request<Body>) -> Result<Response<Body>, BoxError>;

    /// Client TLS settings, if the transport has any
    fn tls_client_config(&self) -> Option<&ClientTlsConfig> {
        None
    }
}

/// A transport whose cycles are printed by a [`Logger`]
pub struct LoggingRoundTripper<T> {
    logger: Logger,
    inner: T,
}

impl<T: RoundTripper> LoggingRoundTripper<T> {
    pub fn new(logger: Logger, inner: T) -> Self {
        Self { logger, inner }
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

#[async_trait]
impl<T: RoundTripper> RoundTripper for LoggingRoundTripper<T> {
    async fn round_trip(&self, req: Request<Body>) -> Result<Response<Body>, BoxError> {
        self.logger.round_trip(&self.inner, req).await
    }

    fn tls_client_config(&self) -> Option<&ClientTlsConfig> {
        self.inner.tls_client_config()
    }
}

impl Logger {
    /// Wrap a transport
    pub fn round_tripper<T: RoundTripper>(&self, transport: T) -> LoggingRoundTripper<T> {
        LoggingRoundTripper::new(self.clone(), transport)
    }

    /// Send `req` through `transport`, printing the cycle
    pub async fn round_trip<T>(
        &self,
        transport: &T,
        req: Request<Body>,
    ) -> Result<Response<Body>, BoxError>
    where
        T: RoundTripper + ?Sized,
    {
        let mut printer = Printer::new(self);

        if is_hidden(&req) || printer.check_filter(&req) {
            let result = transport.round_trip(req).await;
            printer.flush();
            return result;
        }

        let config = self.config();

        if !config.skip_request_info {
            printer.print_request_info(&req);
        }

        let start = config.time.then(|| printer.print_time_request());

        let tls_config = transport.tls_client_config();
        if tls_config.is_some_and(|c| c.insecure_skip_verify) {
            printer.print_insecure_warning();
        }

        if config.tls {
            if let Some(tls_config) = tls_config {
                printer.print_outgoing_client_tls(tls_config);
            }
        }

        let host = req
            .headers()
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| req.uri().authority().map(|a| a.to_string()))
            .unwrap_or_default();
        let method = req.method().clone();

        let req = printer.print_request(req).await;

        let result = match transport.round_trip(req).await {
            Ok(resp) => {
                if config.tls {
                    if let Some(tls) = resp.extensions().get::<TlsInfo>().cloned() {
                        printer.print_tls_info(&tls, false);
                        printer.print_tls_server(&host, &tls);
                    }
                }
                Ok(printer.print_response(resp, Some(&method)).await)
            }
            Err(err) => {
                printer.print_error(&err);
                Err(err)
            }
        };

        if let Some(start) = start {
            printer.print_time_took(start);
        }
        printer.flush();
        result
    }
}

/// [`RoundTripper`] backed by a `reqwest` client.
///
/// Build the client with `tls_info(true)` to get server certificate details
/// in the transcript.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    tls: Option<ClientTlsConfig>,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client, tls: None }
    }

    /// Describe the client's TLS settings. They are printed, not applied:
    /// configure the `reqwest` client to match.
    pub fn with_tls_config(mut self, tls: ClientTlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    fn tls_info(&self, info: &reqwest::tls::TlsInfo, version: Version) -> TlsInfo {
        let peer_certificates = info
            .peer_certificate()
            .and_then(|der| match CertificateInfo::from_der(der) {
                Ok(cert) => Some(cert),
                Err(e) => {
                    tracing::debug!(error = %e, "cannot parse peer certificate");
                    None
                }
            })
            .into_iter()
            .collect();

        TlsInfo {
            negotiated_protocol: (version == Version::HTTP_2).then(|| "h2".to_string()),
            peer_certificates,
            verified: !self.tls.as_ref().is_some_and(|t| t.insecure_skip_verify),
            ..TlsInfo::default()
        }
    }
}

#[async_trait]
impl RoundTripper for ReqwestTransport {
    async fn round_trip(&self, req: Request<Body>) -> Result<Response<Body>, BoxError> {
        let (parts, body) = req.into_parts();
        let body = body.to_bytes().await?;

        let resp = self
            .client
            .request(parts.method, parts.uri.to_string())
            .version(parts.version)
            .headers(parts.headers)
            .body(body)
            .send()
            .await
            .map_err(Error::Transport)?;

        let tls = resp
            .extensions()
            .get::<reqwest::tls::TlsInfo>()
            .map(|info| self.tls_info(info, resp.version()));

        let mut resp = Response::from(resp).map(Body::new);
        if let Some(tls) = tls {
            resp.extensions_mut().insert(tls);
        }
        Ok(resp)
    }

    fn tls_client_config(&self) -> Option<&ClientTlsConfig> {
        self.tls.as_ref()
    }
}
