use async_trait::async_trait;
use axum::body::Body as AxumBody;
use hyper::{Request, Response};
use thiserror::Error;

/// Custom error type for HTTP transport operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpClientError {
    /// Error when the connection to the target fails
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Error when the outbound request is malformed
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Result type alias for HTTP transport operations
pub type HttpClientResult<T> = Result<T, HttpClientError>;

/// HttpClient defines the port (interface) for sending proxied requests to
/// target servers.
///
/// Implementations relay the response verbatim: a non-2xx status from the
/// target is a successful `send_request`, not an error. Errors are reserved
/// for transport-level failures (connect, send, receive).
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    /// Send an HTTP request to a target server and return its response.
    async fn send_request(&self, req: Request<AxumBody>) -> HttpClientResult<Response<AxumBody>>;
}
