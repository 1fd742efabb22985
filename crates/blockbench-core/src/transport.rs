use serde::de::DeserializeOwned;
use thiserror::Error;

/// A request that produced no HTTP response at all (refused, reset, timed out).
#[derive(Debug, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }

    /// Short printable excerpt of the body for error messages.
    pub fn body_excerpt(&self) -> String {
        let text = String::from_utf8_lossy(&self.body);
        let text = text.trim();
        match text.char_indices().nth(200) {
            Some((idx, _)) => format!("{}…", &text[..idx]),
            None => text.to_string(),
        }
    }
}

/// The HTTP seam shared by node control and block retrieval. Every call in
/// the node API is a POST carrying zero or more `arg` query parameters.
///
/// Implementations must be shareable across threads: concurrent fetches issue
/// all requests of a batch through one transport (and its connection pool).
pub trait Transport: Send + Sync {
    /// Returns any response the server produced, success or not; `Err` only
    /// when none arrived.
    fn post(&self, url: &str, args: &[&str]) -> Result<HttpResponse, TransportError>;
}

/// Joins an API base and a method path with exactly one slash.
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
