/// HTTP client port for outbound proxied requests
pub mod http_client;
/// Named transport registry backing per-forward transport selection
pub mod transport;
