//! Relay Engine - an embeddable HTTP and WebSocket request-forwarding engine.
//!
//! The crate turns an inbound request your framework has already routed into
//! a proxied operation against a target you choose per request. It does not
//! ship a router or a server; it plugs into an `axum` handler and takes over
//! from there.
//!
//! # Features
//! - HTTP forwarding with streamed bodies, header relay rules and
//!   `X-Forwarded-*` / `Forwarded` synthesis
//! - WebSocket forwarding with duplex frame pumping, close-handshake
//!   propagation and subprotocol negotiation
//! - Pluggable endpoint resolution (static, closure, round robin, random)
//! - Per-forward hooks: filter, intercept, before-send, after-receive,
//!   before-connect, data-intercept and failure handling
//! - Named outbound transports behind a single registry
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use axum::{Router, body::Body, http::Request, routing::any};
//! use relay_engine::{
//!     HttpClientAdapter, HttpForward, ProxyContext, ProxyDefinition, TransportRegistry,
//!     execute_proxy,
//! };
//!
//! # fn main() -> eyre::Result<()> {
//! let transports = Arc::new(TransportRegistry::new(Arc::new(HttpClientAdapter::new()?)));
//! let definition = Arc::new(
//!     ProxyDefinition::builder()
//!         .route("/api/{*tail}")
//!         .http(HttpForward::to("http://localhost:5000/api"))
//!         .build()?,
//! );
//!
//! let app: Router = Router::new().route(
//!     "/api/{*tail}",
//!     any(move |req: Request<Body>| {
//!         let definition = definition.clone();
//!         let transports = transports.clone();
//!         async move {
//!             let mut ctx = ProxyContext::from_request(req, transports).await;
//!             execute_proxy(&mut ctx, &definition).await
//!         }
//!     }),
//! );
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters** (implementations)
//! while keeping the forwarding logic inside `core` and `engine`. End users
//! should prefer the re-exports documented below instead of reaching into
//! internal modules directly.
//!
//! # Error Handling
//! Resolver APIs return `eyre::Result<T>`; everything request-facing folds
//! into the `ProxyError` taxonomy and is answered at the per-request
//! boundary, so a failed operation is a `502` (or whatever the failure hook
//! writes), never a panic.

pub mod adapters;
pub mod core;
pub mod engine;
pub mod error;
pub mod ports;

pub use crate::{
    adapters::HttpClientAdapter,
    core::{
        context::{ProxyContext, RouteArgs},
        definition::{HttpForward, ProxyDefinition, ProxyDefinitionBuilder, WsForward},
        options::{
            Direction, FrameKind, HttpOptions, HttpOptionsBuilder, WsConnectOptions, WsOptions,
            WsOptionsBuilder,
        },
        resolver::{
            AsyncEndpointFn, EndpointFn, EndpointResolver, PathAppendResolver, RandomRobin,
            RoundRobin, StaticEndpoint,
        },
    },
    engine::{execute_http, execute_proxy, execute_ws},
    error::ProxyError,
    ports::{http_client::HttpClient, transport::TransportRegistry},
};

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::body::Body as AxumBody;
    use hyper::{Request, Response};

    use crate::ports::{
        http_client::{HttpClient, HttpClientError, HttpClientResult},
        transport::TransportRegistry,
    };

    /// Transport that refuses every send; unit tests use it where no real
    /// network hop is wanted.
    pub(crate) struct NullTransport;

    #[async_trait]
    impl HttpClient for NullTransport {
        async fn send_request(
            &self,
            _req: Request<AxumBody>,
        ) -> HttpClientResult<Response<AxumBody>> {
            Err(HttpClientError::ConnectionError(
                "null transport refuses all requests".to_string(),
            ))
        }
    }

    pub(crate) fn null_registry() -> Arc<TransportRegistry> {
        Arc::new(TransportRegistry::new(Arc::new(NullTransport)))
    }
}
