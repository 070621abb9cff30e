//! Body capture
//!
//! Reads a printable snapshot of a body while keeping the full body available
//! to its real consumer. At most the configured ceiling is buffered; whatever
//! lies beyond it stays in the original stream and is chained behind the
//! captured prefix by [`Replay`].

use bytes::{Bytes, BytesMut};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::{Body as HttpBody, Frame, SizeHint};
use hyper::header::{HeaderMap, CONTENT_LENGTH};
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::error::BoxError;

/// Type-erased body flowing through the logger
pub struct Body(UnsyncBoxBody<Bytes, BoxError>);

impl Body {
    /// Wrap any body with `Bytes` data
    pub fn new<B>(body: B) -> Self
    where
        B: HttpBody<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        Self(body.map_err(Into::into).boxed_unsync())
    }

    /// An empty body
    pub fn empty() -> Self {
        Self::new(Empty::<Bytes>::new())
    }

    /// Collect the whole body into memory
    pub async fn to_bytes(self) -> Result<Bytes, BoxError> {
        Ok(self.collect().await?.to_bytes())
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Body").finish_non_exhaustive()
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Self::new(Full::new(bytes))
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Bytes::from(bytes).into()
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Bytes::from(s).into()
    }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Self {
        Bytes::from_static(s.as_bytes()).into()
    }
}

impl HttpBody for Body {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, BoxError>>> {
        Pin::new(&mut self.0).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.0.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.0.size_hint()
    }
}

/// Declared body length: the exact size hint, else `Content-Length`.
///
/// `None` means the length is unknown (streamed or chunked).
pub fn declared_length(headers: &HeaderMap, body: &Body) -> Option<u64> {
    if let Some(exact) = body.size_hint().exact() {
        return Some(exact);
    }

    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Whether a body is known to carry no bytes
pub fn is_empty(body: &Body) -> bool {
    body.is_end_stream() || body.size_hint().exact() == Some(0)
}

/// How a capture pass ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The whole body was read
    Complete,
    /// The ceiling was reached before the end of the body
    Truncated,
    /// Reading failed; the message describes the error
    Failed(String),
}

/// Result of a capture pass
#[derive(Debug)]
pub struct Captured {
    /// Bytes read for display, never more than the ceiling
    pub bytes: Bytes,
    pub outcome: Outcome,
    /// Replacement yielding exactly what the original would have yielded
    pub body: Body,
}

/// Read `body` for display.
///
/// With a `limit`, at most `limit` bytes are buffered; a frame crossing the
/// limit is split and its tail kept for the replacement body. A body filling
/// the limit exactly is polled once more to see whether it has ended; that
/// frame is kept for the replacement body too. Without a limit the body is
/// drained.
pub async fn capture(mut body: Body, limit: Option<u64>) -> Captured {
    let limit = limit.map(|l| usize::try_from(l).unwrap_or(usize::MAX));
    let mut buf = BytesMut::new();
    let mut pending = None;
    let mut error = None;

    let outcome = loop {
        if let Some(limit) = limit {
            if buf.len() >= limit {
                if body.is_end_stream() {
                    break Outcome::Complete;
                }
                // a stream can end right at the limit without saying so
                match body.frame().await {
                    None => break Outcome::Complete,
                    Some(Ok(frame)) => {
                        if frame.data_ref().is_some_and(Bytes::is_empty) {
                            continue;
                        }
                        let trailers = frame.is_trailers();
                        pending = Some(frame);
                        if trailers {
                            break Outcome::Complete;
                        }
                        break Outcome::Truncated;
                    }
                    Some(Err(e)) => {
                        let message = e.to_string();
                        error = Some(e);
                        break Outcome::Failed(message);
                    }
                }
            }
        }

        match body.frame().await {
            None => break Outcome::Complete,
            Some(Ok(frame)) => match frame.into_data() {
                Ok(data) => {
                    let room = limit.map_or(data.len(), |l| l - buf.len());
                    if data.len() > room {
                        buf.extend_from_slice(&data[..room]);
                        pending = Some(Frame::data(data.slice(room..)));
                        break Outcome::Truncated;
                    }
                    buf.extend_from_slice(&data);
                }
                Err(trailers) => {
                    pending = Some(trailers);
                    break Outcome::Complete;
                }
            },
            Some(Err(e)) => {
                let message = e.to_string();
                error = Some(e);
                break Outcome::Failed(message);
            }
        }
    };

    tracing::debug!(bytes = buf.len(), ?outcome, "captured body");

    let bytes = buf.freeze();
    // A drained original is dropped here; only what is left to read is kept.
    let rest = match outcome {
        Outcome::Complete if pending.is_none() => None,
        _ => Some(body),
    };

    let replay = Replay {
        prefix: Some(bytes.clone()),
        pending,
        error,
        rest,
    };

    Captured {
        bytes,
        outcome,
        body: Body::new(replay),
    }
}

/// Captured prefix followed by the unread remainder of the original body
pub struct Replay {
    prefix: Option<Bytes>,
    pending: Option<Frame<Bytes>>,
    error: Option<BoxError>,
    rest: Option<Body>,
}

impl Replay {
    fn buffered_len(&self) -> u64 {
        let prefix = self.prefix.as_ref().map_or(0, Bytes::len);
        let pending = self
            .pending
            .as_ref()
            .and_then(Frame::data_ref)
            .map_or(0, Bytes::len);
        (prefix + pending) as u64
    }
}

impl HttpBody for Replay {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, BoxError>>> {
        let this = self.get_mut();

        if let Some(prefix) = this.prefix.take() {
            if !prefix.is_empty() {
                return Poll::Ready(Some(Ok(Frame::data(prefix))));
            }
        }

        if let Some(frame) = this.pending.take() {
            return Poll::Ready(Some(Ok(frame)));
        }

        if let Some(err) = this.error.take() {
            this.rest = None;
            return Poll::Ready(Some(Err(err)));
        }

        match this.rest.as_mut() {
            Some(rest) => Pin::new(rest).poll_frame(cx),
            None => Poll::Ready(None),
        }
    }

    fn is_end_stream(&self) -> bool {
        self.prefix.as_ref().map_or(true, Bytes::is_empty)
            && self.pending.is_none()
            && self.error.is_none()
            && self.rest.as_ref().map_or(true, Body::is_end_stream)
    }

    fn size_hint(&self) -> SizeHint {
        let buffered = self.buffered_len();
        match (&self.rest, &self.error) {
            (_, Some(_)) => {
                let mut hint = SizeHint::new();
                hint.set_lower(buffered);
                hint
            }
            (None, None) => SizeHint::with_exact(buffered),
            (Some(rest), None) => {
                let rest = rest.size_hint();
                let mut hint = SizeHint::new();
                hint.set_lower(rest.lower() + buffered);
                if let Some(upper) = rest.upper() {
                    hint.set_upper(upper + buffered);
                }
                hint
            }
        }
    }
}
