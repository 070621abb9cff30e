//! One-shot logged request
//!
//! Sends a single request through [`ReqwestTransport`] wrapped by the
//! logger, so the transcript shows both sides of the exchange.

use hyper::Request;
use std::path::PathBuf;
use tracing::info;
use wiretap_core::{
    Body, BoxError, CertificateInfo, ClientTlsConfig, Logger, ReqwestTransport, RoundTripper,
};

/// What `wiretap get` was asked to send
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub method: String,
    pub headers: Vec<String>,
    pub data: Option<String>,
    pub insecure: bool,
    pub cert: Option<PathBuf>,
}

/// Build the reqwest transport, describing its TLS settings for the
/// transcript
fn transport(request: &FetchRequest) -> Result<ReqwestTransport, BoxError> {
    let mut builder = reqwest::Client::builder().tls_info(true);
    let mut tls = ClientTlsConfig::default();

    if request.insecure {
        builder = builder.danger_accept_invalid_certs(true);
        tls.insecure_skip_verify = true;
    }

    if let Some(path) = &request.cert {
        let pem = std::fs::read(path)
            .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
        builder = builder.identity(reqwest::Identity::from_pem(&pem)?);
        tls.certificates.push(CertificateInfo::from_pem(&pem).ok());
    }

    Ok(ReqwestTransport::new(builder.build()?).with_tls_config(tls))
}

/// Parse a `Name: value` header argument
fn parse_header(raw: &str) -> Result<(&str, &str), BoxError> {
    match raw.split_once(':') {
        Some((name, value)) if !name.trim().is_empty() => Ok((name.trim(), value.trim())),
        _ => Err(format!("invalid header {raw:?}, expected \"Name: value\"").into()),
    }
}

fn build_request(request: &FetchRequest) -> Result<Request<Body>, BoxError> {
    let mut builder = Request::builder()
        .method(request.method.to_ascii_uppercase().as_str())
        .uri(request.url.as_str());

    for raw in &request.headers {
        let (name, value) = parse_header(raw)?;
        builder = builder.header(name, value);
    }

    let body = match &request.data {
        Some(data) => Body::from(data.clone()),
        None => Body::empty(),
    };
    Ok(builder.body(body)?)
}

pub async fn run(logger: &Logger, request: FetchRequest) -> Result<(), BoxError> {
    let client = logger.round_tripper(transport(&request)?);
    let req = build_request(&request)?;

    let resp = client.round_trip(req).await?;
    let status = resp.status();
    let body = resp.into_body().to_bytes().await?;

    info!(%status, bytes = body.len(), "request finished");
    Ok(())
}
