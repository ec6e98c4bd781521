//! HTTP protocol definitions for the blob endpoints
//!
//! Header names and values shared by the handlers, and the mapping from store errors
//! to responses.

use std::convert::Infallible;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, Method};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;

use crate::store::StoreError;

/// Content type recorded when an upload does not declare one
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Whether the response was served from memory (`HIT`) or durable storage (`MISS`)
pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

/// Methods accepted on every blob path, in `Allow` header order
pub const ALLOWED_METHODS: [Method; 6] = [
    Method::GET,
    Method::HEAD,
    Method::POST,
    Method::PUT,
    Method::DELETE,
    Method::OPTIONS,
];

/// Value of the `Allow` header
pub fn allow_header_value() -> String {
    ALLOWED_METHODS
        .iter()
        .map(Method::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Content type declared by an upload, or the default
pub fn upload_content_type(headers: &HeaderMap) -> &str {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_CONTENT_TYPE)
}

/// Body for HEAD responses
///
/// Empty but of unknown size, so no `Content-Length: 0` is derived for it. The length
/// of a blob still being uploaded is not known either, so none is sent.
pub fn headers_only_body() -> Body {
    Body::from_stream(futures::stream::empty::<Result<Bytes, Infallible>>())
}

impl IntoResponse for StoreError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match self {
            StoreError::NotFound(_) => status.into_response(),
            other => (status, other.to_string()).into_response(),
        }
    }
}
