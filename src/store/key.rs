//! Cache keys derived from request targets
//!
//! `scheme://host/path` when the target carries a scheme, otherwise `host/path`.
//! Origin-form targets (`/a/b`) have no host, so their key is the path alone.
//! The path is percent-decoded; the query string is ignored. Requests that differ
//! only by scheme map to different keys.

use std::fmt;

use axum::http::Uri;

/// Canonical identity of a blob in the cache and in durable storage
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Key(String);

impl Key {
    /// Derive the key for a request target
    pub fn from_uri(uri: &Uri) -> Self {
        let host = uri.authority().map(|authority| match authority.port() {
            Some(port) => format!("{}:{}", authority.host(), port),
            None => authority.host().to_string(),
        });
        Self::from_parts(uri.scheme_str(), host.as_deref(), uri.path())
    }

    /// Build a key from its components; `path` may be percent-encoded
    pub fn from_parts(scheme: Option<&str>, host: Option<&str>, path: &str) -> Self {
        let path = urlencoding::decode(path)
            .map(|decoded| decoded.into_owned())
            .unwrap_or_else(|_| path.to_string());
        let host = host.unwrap_or_default();

        match scheme {
            Some(scheme) => Key(format!("{}://{}{}", scheme, host, path)),
            None => Key(format!("{}{}", host, path)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Key {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Key {
    fn from(path: &str) -> Self {
        Self::from_parts(None, None, path)
    }
}
