pub mod http_client;

/// Re-export commonly used types from adapters
pub use http_client::HttpClientAdapter;
