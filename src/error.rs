use thiserror::Error;

use crate::ports::http_client::HttpClientError;

/// Error type for proxy configuration and execution.
///
/// `Configuration` is raised synchronously while definitions are being built
/// and never at request time. The remaining variants describe request-time
/// failures; the engine converts them into a response at the outermost
/// per-request boundary (a configured failure hook, or the default `502`).
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProxyError {
    /// Invalid builder usage (missing endpoint, duplicate forward kind,
    /// routeless misuse).
    #[error("invalid proxy configuration: {0}")]
    Configuration(String),

    /// The inbound request kind does not match the forward kind selected.
    #[error("{0}")]
    ProtocolMismatch(&'static str),

    /// The resolved endpoint does not carry the scheme required by the
    /// forward kind.
    #[error("only forwarded addresses starting with {expected} are supported, got '{endpoint}'")]
    InvalidTargetScheme {
        /// The endpoint string the resolver produced.
        endpoint: String,
        /// The scheme family the forward kind requires.
        expected: &'static str,
    },

    /// The endpoint resolver itself failed.
    #[error("endpoint resolution failed: {0}")]
    Endpoint(String),

    /// Error while connecting to, sending to, or receiving from the target.
    /// Non-2xx status codes are relayed verbatim and are never an error.
    #[error(transparent)]
    Upstream(#[from] HttpClientError),

    /// The outbound WebSocket handshake failed.
    #[error("websocket connect failed: {0}")]
    Connect(String),

    /// The caller disconnected; never surfaced as a user-visible failure.
    #[error("operation cancelled by client disconnect")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_error_names_offending_endpoint() {
        let err = ProxyError::InvalidTargetScheme {
            endpoint: "ftp://example.com".to_string(),
            expected: "'http://' or 'https://'",
        };
        let text = err.to_string();
        assert!(text.contains("ftp://example.com"));
        assert!(text.contains("http://"));
    }

    #[test]
    fn upstream_error_is_transparent() {
        let err = ProxyError::from(HttpClientError::ConnectionError("refused".to_string()));
        assert_eq!(err.to_string(), "Connection error: refused");
    }
}
