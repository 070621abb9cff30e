//! Inbound adapter
//!
//! [`Logger::serve`] wraps a request handler. The response section of the
//! transcript is written from what the handler actually sends: the response
//! body is wrapped in a recording body that passes every frame through
//! untouched and prints the section once the body ends (or is dropped).
//!
//! [`LoggerLayer`] exposes the same thing as a `tower` middleware.

use bytes::{Bytes, BytesMut};
use hyper::body::{Body as HttpBody, Frame, SizeHint};
use hyper::{HeaderMap, Request, Response, StatusCode, Version};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;
use tower::{Layer, Service};

use crate::body::Body;
use crate::error::BoxError;
use crate::logger::{is_hidden, Logger};
use crate::printer::Printer;
use crate::tls::TlsInfo;

impl Logger {
    /// Handle `req` with `next`, printing the cycle
    pub async fn serve<B, F, Fut, ResB, E>(&self, req: Request<B>, next: F) -> Result<Response<Body>, E>
    where
        B: HttpBody<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
        F: FnOnce(Request<Body>) -> Fut,
        Fut: Future<Output = Result<Response<ResB>, E>>,
        ResB: HttpBody<Data = Bytes> + Send + 'static,
        ResB::Error: Into<BoxError>,
    {
        let req = req.map(Body::new);
        let mut printer = Printer::new(self);

        if is_hidden(&req) || printer.check_filter(&req) {
            drop(printer);
            return next(req).await.map(|resp| resp.map(Body::new));
        }

        let config = self.config();

        if !config.skip_request_info {
            printer.print_request_info(&req);
        }

        let start = config.time.then(|| printer.print_time_request());

        if config.tls {
            if let Some(tls) = req.extensions().get::<TlsInfo>().cloned() {
                printer.print_tls_info(&tls, true);
                printer.print_incoming_client_tls(&tls);
            }
        }

        let req = printer.print_request(req).await;
        let version = req.version();

        match next(req).await {
            Ok(resp) => {
                let (parts, body) = resp.into_parts();
                let limit = match config.max_response_body {
                    0 => None,
                    max => Some(usize::try_from(max).unwrap_or(usize::MAX)),
                };
                let recording = Recording {
                    printer,
                    start,
                    version,
                    status: parts.status,
                    headers: parts.headers.clone(),
                    buf: BytesMut::new(),
                    size: 0,
                    limit,
                };
                let body = RecordingBody {
                    inner: Body::new(body),
                    recording: Some(recording),
                };
                Ok(Response::from_parts(parts, Body::new(body)))
            }
            Err(err) => {
                tracing::debug!("handler failed, no response to print");
                if let Some(start) = start {
                    printer.print_time_took(start);
                }
                Err(err)
            }
        }
    }
}

struct Recording {
    printer: Printer,
    start: Option<Instant>,
    version: Version,
    status: StatusCode,
    headers: HeaderMap,
    buf: BytesMut,
    size: u64,
    limit: Option<usize>,
}

impl Recording {
    fn record(&mut self, data: &Bytes) {
        self.size += data.len() as u64;
        let room = self
            .limit
            .map_or(data.len(), |l| l.saturating_sub(self.buf.len()));
        let n = room.min(data.len());
        self.buf.extend_from_slice(&data[..n]);
    }

    fn finish(mut self) {
        let recorded = self.buf.split().freeze();
        self.printer
            .print_server_response(self.version, self.status, &self.headers, self.size, &recorded);
        if let Some(start) = self.start {
            self.printer.print_time_took(start);
        }
        self.printer.flush();
    }
}

/// Response body that records what passes through it
struct RecordingBody {
    inner: Body,
    recording: Option<Recording>,
}

impl RecordingBody {
    fn finish(&mut self) {
        if let Some(recording) = self.recording.take() {
            recording.finish();
        }
    }
}

impl HttpBody for RecordingBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, BoxError>>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_frame(cx);

        match &polled {
            Poll::Ready(Some(Ok(frame))) => {
                if let (Some(data), Some(recording)) = (frame.data_ref(), this.recording.as_mut()) {
                    recording.record(data);
                }
                if this.inner.is_end_stream() {
                    this.finish();
                }
            }
            Poll::Ready(None) => this.finish(),
            Poll::Ready(Some(Err(_))) | Poll::Pending => {}
        }

        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for RecordingBody {
    fn drop(&mut self) {
        self.finish();
    }
}

/// `tower` layer logging every request of the wrapped service
#[derive(Debug, Clone)]
pub struct LoggerLayer {
    logger: Logger,
}

impl LoggerLayer {
    pub fn new(logger: Logger) -> Self {
        Self { logger }
    }
}

impl<S> Layer<S> for LoggerLayer {
    type Service = LoggingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LoggingService {
            logger: self.logger.clone(),
            inner,
        }
    }
}

/// Service produced by [`LoggerLayer`]
#[derive(Debug, Clone)]
pub struct LoggingService<S> {
    logger: Logger,
    inner: S,
}

impl<S, ReqB, ResB> Service<Request<ReqB>> for LoggingService<S>
where
    S: Service<Request<Body>, Response = Response<ResB>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    ReqB: HttpBody<Data = Bytes> + Send + 'static,
    ReqB::Error: Into<BoxError>,
    ResB: HttpBody<Data = Bytes> + Send + 'static,
    ResB::Error: Into<BoxError>,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response<Body>, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqB>) -> Self::Future {
        // the clone may not be ready; keep the one that was polled
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let logger = self.logger.clone();

        Box::pin(async move { logger.serve(req, |req| inner.call(req)).await })
    }
}
