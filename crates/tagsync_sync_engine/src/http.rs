//! HTTP client abstraction.
//!
//! The actual HTTP library is supplied by the host through [`HttpClient`];
//! the engine only needs a status code and a body back.

use tagsync_sync_protocol::{Url, STATUS_OK};

/// Status and body of an HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// A `200` response carrying `body`.
    pub fn ok(body: Vec<u8>) -> Self {
        Self {
            status: STATUS_OK,
            body,
        }
    }

    /// An empty response with the given status.
    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: Vec::new(),
        }
    }

    /// Returns true for a `200` status.
    pub fn is_success(&self) -> bool {
        self.status == STATUS_OK
    }
}

/// Blocking HTTP client used by the sync worker.
///
/// Errors are reserved for requests that produced no response at all
/// (connection refused, timeouts); HTTP error statuses are returned as
/// responses.
pub trait HttpClient: Send + Sync {
    /// Sends a GET request.
    fn get(&self, url: &Url) -> Result<HttpResponse, String>;

    /// Sends a POST request with a raw body.
    fn post(&self, url: &Url, body: &[u8]) -> Result<HttpResponse, String>;
}
