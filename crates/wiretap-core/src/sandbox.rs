//! Extension sandbox
//!
//! Every call into user code (filter, body filter, formatter match and
//! format) goes through its own `catch_unwind` so that a panic degrades the
//! transcript instead of taking down the HTTP exchange. Each call site is
//! isolated: a panicking matcher must not stop the next formatter from
//! being tried.

use hyper::{HeaderMap, Request};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::body::Body;
use crate::error::BoxError;
use crate::formatter::Formatter;

/// Decides whether a request is skipped. `Ok(true)` skips it.
///
/// Returning an error logs the request anyway, with the error noted.
pub type Filter = Arc<dyn Fn(&Request<Body>) -> Result<bool, BoxError> + Send + Sync>;

/// Decides from the headers whether a body is skipped. `Ok(true)` skips it.
///
/// Other errors are printed and the body is kept; return [`SkipBody`] to
/// print the error and skip the body.
pub type BodyFilter = Arc<dyn Fn(&HeaderMap) -> Result<bool, BoxError> + Send + Sync>;

/// Body filter error that still skips the body
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct SkipBody(pub String);

/// Outcome of running a request filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterDecision {
    /// Print the cycle
    Log,
    /// Print nothing for this cycle
    Suppress,
    /// The filter failed; print the cycle and the error
    LogWithError(String),
}

/// Outcome of running a body filter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BodyFilterVerdict {
    pub skip: bool,
    /// Error returned by the filter
    pub error: Option<String>,
    /// Panic raised by the filter
    pub panic: Option<String>,
}

/// Outcome of a formatter's match call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchResult {
    Matched,
    NotMatched,
    Panicked(String),
}

/// Run `f`, turning a panic into its message
pub fn contain<T>(f: impl FnOnce() -> T) -> Result<T, String> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| panic_message(payload.as_ref()))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run a request filter. Failures never suppress the request.
pub fn run_filter(filter: &Filter, req: &Request<Body>) -> FilterDecision {
    match contain(|| filter(req)) {
        Ok(Ok(true)) => FilterDecision::Suppress,
        Ok(Ok(false)) => FilterDecision::Log,
        Ok(Err(e)) => FilterDecision::LogWithError(e.to_string()),
        Err(panic) => {
            tracing::warn!(%panic, "request filter panicked");
            FilterDecision::LogWithError(format!("panic: {panic}"))
        }
    }
}

/// Run a body filter. A panic keeps the body.
pub fn run_body_filter(filter: &BodyFilter, headers: &HeaderMap) -> BodyFilterVerdict {
    match contain(|| filter(headers)) {
        Ok(Ok(skip)) => BodyFilterVerdict {
            skip,
            ..Default::default()
        },
        Ok(Err(e)) => BodyFilterVerdict {
            skip: e.is::<SkipBody>(),
            error: Some(e.to_string()),
            panic: None,
        },
        Err(panic) => {
            tracing::warn!(%panic, "body filter panicked");
            BodyFilterVerdict {
                skip: false,
                error: None,
                panic: Some(panic),
            }
        }
    }
}

/// Ask a formatter whether it handles `media_type`
pub fn run_match(formatter: &dyn Formatter, media_type: &str) -> MatchResult {
    match contain(|| formatter.matches(media_type)) {
        Ok(true) => MatchResult::Matched,
        Ok(false) => MatchResult::NotMatched,
        Err(panic) => {
            tracing::warn!(%panic, "formatter match panicked");
            MatchResult::Panicked(panic)
        }
    }
}

/// Format `src` with `formatter`. The error message is ready to print.
pub fn run_format(formatter: &dyn Formatter, src: &[u8]) -> Result<Vec<u8>, String> {
    let mut dst = Vec::new();
    match contain(|| formatter.format(&mut dst, src)) {
        Ok(Ok(())) => Ok(dst),
        Ok(Err(e)) => Err(e.to_string()),
        Err(panic) => {
            tracing::warn!(%panic, "formatter panicked");
            Err(format!("panic: {panic}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct PanickingMatcher;

    impl Formatter for PanickingMatcher {
        fn matches(&self, _media_type: &str) -> bool {
            panic!("evil matcher")
        }

        fn format(&self, _dst: &mut Vec<u8>, _src: &[u8]) -> Result<(), BoxError> {
            Ok(())
        }
    }

    struct PanickingFormatter;

    impl Formatter for PanickingFormatter {
        fn matches(&self, _media_type: &str) -> bool {
            true
        }

        fn format(&self, _dst: &mut Vec<u8>, _src: &[u8]) -> Result<(), BoxError> {
            panic!("evil formatter")
        }
    }

    fn filter<F>(f: F) -> Filter
    where
        F: Fn(&Request<Body>) -> Result<bool, BoxError> + Send + Sync + 'static,
    {
        Arc::new(f)
    }

    fn body_filter<F>(f: F) -> BodyFilter
    where
        F: Fn(&HeaderMap) -> Result<bool, BoxError> + Send + Sync + 'static,
    {
        Arc::new(f)
    }

    fn request() -> Request<Body> {
        Request::builder()
            .uri("http://example.com/")
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn test_contain_messages() {
        assert_eq!(contain(|| 7), Ok(7));
        assert_eq!(contain(|| -> () { panic!("static") }), Err("static".to_string()));
        let n = 3;
        assert_eq!(
            contain(|| -> () { panic!("formatted {n}") }),
            Err("formatted 3".to_string())
        );
    }

    #[test]
    fn test_filter_decisions() {
        let skip = filter(|_| Ok(true));
        let keep = filter(|_| Ok(false));
        let fails = filter(|_| Err("incomplete implementation".into()));
        let panics = filter(|_| panic!("evil panic"));

        let req = request();
        assert_eq!(run_filter(&skip, &req), FilterDecision::Suppress);
        assert_eq!(run_filter(&keep, &req), FilterDecision::Log);
        assert_eq!(
            run_filter(&fails, &req),
            FilterDecision::LogWithError("incomplete implementation".to_string())
        );
        assert_eq!(
            run_filter(&panics, &req),
            FilterDecision::LogWithError("panic: evil panic".to_string())
        );
    }

    #[test]
    fn test_body_filter_verdicts() {
        let headers = HeaderMap::new();

        let noted = body_filter(|_| Err("noted".into()));
        let verdict = run_body_filter(&noted, &headers);
        assert!(!verdict.skip);
        assert_eq!(verdict.error.as_deref(), Some("noted"));

        let skip_with_error = body_filter(|_| Err(SkipBody("binary".to_string()).into()));
        let verdict = run_body_filter(&skip_with_error, &headers);
        assert!(verdict.skip);
        assert_eq!(verdict.error.as_deref(), Some("binary"));

        let panics = body_filter(|_| panic!("evil panic"));
        let verdict = run_body_filter(&panics, &headers);
        assert!(!verdict.skip);
        assert_eq!(verdict.panic.as_deref(), Some("evil panic"));

        let skip = body_filter(|_| Ok(true));
        assert!(run_body_filter(&skip, &headers).skip);
    }

    #[test]
    fn test_formatter_isolation() {
        assert_eq!(
            run_match(&PanickingMatcher, "application/json"),
            MatchResult::Panicked("evil matcher".to_string())
        );
        assert_eq!(
            run_format(&PanickingFormatter, b"{}"),
            Err("panic: evil formatter".to_string())
        );
        assert_eq!(
            run_format(&crate::formatter::JsonFormatter, b"[1]").unwrap(),
            b"[\n    1\n]".to_vec()
        );
    }
}
