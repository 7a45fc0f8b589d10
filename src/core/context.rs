use std::{collections::HashMap, net::SocketAddr, sync::Arc};

use axum::{
    body::Body as AxumBody,
    extract::{FromRequestParts, ws::WebSocketUpgrade},
};
use http::{HeaderMap, Method, Request, Uri, header, request::Parts};
use sync_wrapper::SyncWrapper;
use tokio_util::sync::CancellationToken;

use crate::ports::transport::TransportRegistry;

/// Path parameters captured by the host router, keyed by template name.
pub type RouteArgs = HashMap<String, String>;

/// Per-request view handed to resolvers, hooks and the forwarding engines.
///
/// Built once per inbound request; the WebSocket upgrade offer (if any) is
/// extracted up front so `is_websocket` is a cheap flag check afterwards.
/// The body and the upgrade handle are consumed by the engine that forwards
/// the request, everything else stays readable for the whole operation.
///
/// The body sits behind a `SyncWrapper` so the context can be shared by
/// reference across task boundaries (resolver and hook futures must be
/// `Send`); nothing reads the body through a shared reference anyway.
pub struct ProxyContext {
    parts: Parts,
    body: Option<SyncWrapper<AxumBody>>,
    upgrade: Option<WebSocketUpgrade>,
    scheme: String,
    remote_addr: Option<SocketAddr>,
    local_addr: Option<SocketAddr>,
    route_args: RouteArgs,
    cancel: CancellationToken,
    transports: Arc<TransportRegistry>,
}

impl ProxyContext {
    /// Build a context from an inbound request.
    ///
    /// Upgrade extraction only succeeds for genuine upgrade offers (GET with
    /// the full WebSocket header set and a live connection); anything else
    /// leaves the context in plain HTTP mode.
    pub async fn from_request(req: Request<AxumBody>, transports: Arc<TransportRegistry>) -> Self {
        let (mut parts, body) = req.into_parts();
        let upgrade = WebSocketUpgrade::from_request_parts(&mut parts, &())
            .await
            .ok();
        Self {
            parts,
            body: Some(SyncWrapper::new(body)),
            upgrade,
            scheme: "http".to_string(),
            remote_addr: None,
            local_addr: None,
            route_args: RouteArgs::new(),
            cancel: CancellationToken::new(),
            transports,
        }
    }

    /// Record the scheme the request arrived on (`http` or `https`).
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    /// Record the peer address of the caller.
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// Record the local address the request was accepted on.
    pub fn with_local_addr(mut self, addr: SocketAddr) -> Self {
        self.local_addr = Some(addr);
        self
    }

    /// Attach path parameters captured by the host router.
    pub fn with_route_args(mut self, args: RouteArgs) -> Self {
        self.route_args = args;
        self
    }

    /// Tie the operation to a caller-disconnect token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn method(&self) -> &Method {
        &self.parts.method
    }

    pub fn uri(&self) -> &Uri {
        &self.parts.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.parts.headers
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Host the caller addressed, from the `Host` header or the request URI.
    pub fn host(&self) -> Option<&str> {
        self.parts
            .headers
            .get(header::HOST)
            .and_then(|value| value.to_str().ok())
            .or_else(|| self.parts.uri.authority().map(|a| a.as_str()))
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Whether the inbound request is a WebSocket upgrade offer.
    pub fn is_websocket(&self) -> bool {
        self.upgrade.is_some()
    }

    pub fn route_args(&self) -> &RouteArgs {
        &self.route_args
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn transports(&self) -> &TransportRegistry {
        &self.transports
    }

    /// Take the request body for forwarding. Empty after the first call.
    pub(crate) fn take_body(&mut self) -> AxumBody {
        self.body
            .take()
            .map(SyncWrapper::into_inner)
            .unwrap_or_else(AxumBody::empty)
    }

    /// Take the upgrade handle for completion. `None` after the first call.
    pub(crate) fn take_upgrade(&mut self) -> Option<WebSocketUpgrade> {
        self.upgrade.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::null_registry;

    #[test]
    fn context_is_shareable_across_tasks() {
        // Resolver and hook futures hold `&ProxyContext` and must be `Send`,
        // which requires the context itself to be `Sync`.
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ProxyContext>();
    }

    #[tokio::test]
    async fn host_prefers_header_over_uri_authority() {
        let req = Request::builder()
            .uri("http://uri-host.example/path")
            .header(header::HOST, "header-host.example")
            .body(AxumBody::empty())
            .unwrap();
        let ctx = ProxyContext::from_request(req, null_registry()).await;
        assert_eq!(ctx.host(), Some("header-host.example"));
    }

    #[tokio::test]
    async fn host_falls_back_to_uri_authority() {
        let req = Request::builder()
            .uri("http://uri-host.example:8080/path")
            .body(AxumBody::empty())
            .unwrap();
        let ctx = ProxyContext::from_request(req, null_registry()).await;
        assert_eq!(ctx.host(), Some("uri-host.example:8080"));
    }

    #[tokio::test]
    async fn plain_request_is_not_websocket() {
        let req = Request::builder()
            .uri("/path")
            .body(AxumBody::empty())
            .unwrap();
        let ctx = ProxyContext::from_request(req, null_registry()).await;
        assert!(!ctx.is_websocket());
    }

    #[tokio::test]
    async fn websocket_headers_without_live_connection_stay_http() {
        // Without a real upgradable connection behind the request the offer
        // cannot be completed, so the context must treat it as plain HTTP.
        let req = Request::builder()
            .uri("/ws")
            .header(header::CONNECTION, "upgrade")
            .header(header::UPGRADE, "websocket")
            .header(header::SEC_WEBSOCKET_VERSION, "13")
            .header(header::SEC_WEBSOCKET_KEY, "dGhlIHNhbXBsZSBub25jZQ==")
            .body(AxumBody::empty())
            .unwrap();
        let ctx = ProxyContext::from_request(req, null_registry()).await;
        assert!(!ctx.is_websocket());
    }

    #[tokio::test]
    async fn body_is_taken_once() {
        let req = Request::builder()
            .uri("/path")
            .body(AxumBody::from("payload"))
            .unwrap();
        let mut ctx = ProxyContext::from_request(req, null_registry()).await;
        let first = http_body_util::BodyExt::collect(ctx.take_body())
            .await
            .unwrap()
            .to_bytes();
        let second = http_body_util::BodyExt::collect(ctx.take_body())
            .await
            .unwrap()
            .to_bytes();
        assert_eq!(&first[..], b"payload");
        assert!(second.is_empty());
    }
}
