//! Normalized outcome of a call, whichever transport produced it.

use std::sync::Arc;
use std::time::Duration;

use super::{RequestSpec, StatusCode};
use crate::error::AttemptError;

/// The normalized response handed back to callers.
///
/// One is produced per attempt. The response finally returned by the proxy
/// may have been served from cache, or rewritten by the stale-data fallback.
///
/// # Examples
///
/// ```
/// use outpost::http::{RequestSpec, Response, StatusCode};
///
/// let request = RequestSpec::builder().address("http://a/b").build().unwrap();
/// let response = Response::new(request, StatusCode::OK, r#"{"Code":0}"#);
/// assert!(response.is_success());
/// assert!(!response.from_cache());
/// ```
#[derive(Debug, Clone)]
pub struct Response {
    request: Arc<RequestSpec>,
    status: StatusCode,
    body: String,
    elapsed: Duration,
    error: Option<AttemptError>,
    from_cache: bool,
    stale: bool,
}

impl Response {
    /// A response carrying a status and body. A status other than `200 OK`
    /// is recorded as [`AttemptError::Status`].
    pub fn new(request: impl Into<Arc<RequestSpec>>, status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            request: request.into(),
            status,
            body: body.into(),
            elapsed: Duration::ZERO,
            error: (!status.is_ok()).then_some(AttemptError::Status(status)),
            from_cache: false,
            stale: false,
        }
    }

    /// A response for an attempt that never produced a status.
    pub fn failed(request: impl Into<Arc<RequestSpec>>, error: impl Into<AttemptError>) -> Self {
        let error = error.into();
        let status = match &error {
            AttemptError::Status(status) => *status,
            _ => StatusCode::from_u16(0),
        };
        Self {
            request: request.into(),
            status,
            body: String::new(),
            elapsed: Duration::ZERO,
            error: Some(error),
            from_cache: false,
            stale: false,
        }
    }

    /// A fresh cache hit: `200 OK`, no transport involved.
    pub fn cached(request: impl Into<Arc<RequestSpec>>, body: impl Into<String>) -> Self {
        let mut response = Self::new(request, StatusCode::OK, body);
        response.from_cache = true;
        response
    }

    /// The request this response answers.
    pub fn request(&self) -> &RequestSpec {
        &self.request
    }

    /// `0` when the attempt failed before any status was received.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn into_body(self) -> String {
        self.body
    }

    /// Time spent across the whole retry loop.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn error(&self) -> Option<&AttemptError> {
        self.error.as_ref()
    }

    /// `true` if the body came from the cache store, fresh or stale.
    pub fn from_cache(&self) -> bool {
        self.from_cache
    }

    /// `true` if the body is a stale snapshot substituted for a failed call.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// No error recorded and the status is `200 OK`.
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.status.is_ok()
    }

    pub(crate) fn set_error(&mut self, error: AttemptError) {
        self.error = Some(error);
    }

    pub(crate) fn set_elapsed(&mut self, elapsed: Duration) {
        self.elapsed = elapsed;
    }

    /// Rewrites a failed response into a success carrying `snapshot`.
    pub(crate) fn recover_from_stale(&mut self, snapshot: String) {
        self.status = StatusCode::OK;
        self.body = snapshot;
        self.error = None;
        self.from_cache = true;
        self.stale = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;

    fn request() -> RequestSpec {
        RequestSpec::builder().address("http://a/b").build().unwrap()
    }

    #[test]
    fn non_ok_status_is_recorded_as_error() {
        let r = Response::new(request(), StatusCode::BAD_GATEWAY, "upstream down");
        assert!(!r.is_success());
        assert_eq!(r.error(), Some(&AttemptError::Status(StatusCode::BAD_GATEWAY)));
    }

    #[test]
    fn failed_response_has_no_status() {
        let r = Response::failed(request(), TransportError::InvalidRequest("bad".into()));
        assert_eq!(r.status().as_u16(), 0);
        assert!(r.body().is_empty());
        assert!(!r.is_success());
    }

    #[test]
    fn stale_recovery_clears_error_and_marks_origin() {
        let mut r = Response::failed(request(), TransportError::InvalidRequest("bad".into()));
        r.recover_from_stale("{\"cached\":true}".into());
        assert!(r.is_success());
        assert!(r.from_cache());
        assert!(r.is_stale());
        assert_eq!(r.body(), "{\"cached\":true}");
    }
}
