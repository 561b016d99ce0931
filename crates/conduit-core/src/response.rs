//! The buffered response a request builds up.

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue, StatusCode};
use http_body_util::Full;

/// HTTP response type produced by the framework.
pub type Response = http::Response<Full<Bytes>>;

/// Status, headers and body accumulated by middleware and handlers.
///
/// Nothing reaches the transport until the chain has finished, so a failure
/// at any point can still replace whatever was written with an error response.
#[derive(Debug, Clone)]
pub struct ResponseState {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    written: bool,
}

impl Default for ResponseState {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            written: false,
        }
    }
}

impl ResponseState {
    /// Current status.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Sets the status without marking the response written.
    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    /// Response headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Mutable response headers.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Body written so far.
    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Writes a complete body, replacing any earlier one.
    pub fn write(&mut self, status: StatusCode, content_type: &'static str, body: Bytes) {
        self.status = status;
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        self.body = body;
        self.written = true;
    }

    /// True once a body has been written.
    #[must_use]
    pub fn is_written(&self) -> bool {
        self.written
    }

    /// Discards status, headers and body.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Converts into an `http::Response`.
    #[must_use]
    pub fn into_response(self) -> Response {
        let mut response = http::Response::new(Full::new(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_marks_written() {
        let mut state = ResponseState::default();
        assert!(!state.is_written());
        state.set_status(StatusCode::ACCEPTED);
        assert!(!state.is_written());

        state.write(StatusCode::CREATED, "text/plain", Bytes::from_static(b"ok"));
        assert!(state.is_written());
        assert_eq!(state.status(), StatusCode::CREATED);
    }

    #[test]
    fn test_reset() {
        let mut state = ResponseState::default();
        state
            .headers_mut()
            .insert("x-partial", HeaderValue::from_static("1"));
        state.write(StatusCode::OK, "text/plain", Bytes::from_static(b"half"));

        state.reset();
        assert!(!state.is_written());
        assert!(state.headers().is_empty());
        assert!(state.body().is_empty());
    }

    #[test]
    fn test_into_response() {
        let mut state = ResponseState::default();
        state.write(StatusCode::OK, "application/json", Bytes::from_static(b"{}"));
        let response = state.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
    }
}
