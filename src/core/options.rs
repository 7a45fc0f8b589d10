use std::sync::Arc;

use axum::body::Body as AxumBody;
use futures_util::future::BoxFuture;
use http::{HeaderMap, Request, Response};

use crate::{core::context::ProxyContext, error::ProxyError};

/// Which way a WebSocket frame is travelling through the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// From the caller towards the target.
    Upstream,
    /// From the target back to the caller.
    Downstream,
}

/// Payload kind of an intercepted WebSocket data frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Text,
    Binary,
}

/// Mutable view of the outbound WebSocket handshake, offered to the
/// `before_connect` hook before the upstream connection is attempted.
#[derive(Debug, Clone)]
pub struct WsConnectOptions {
    /// Target URI the handshake will be sent to.
    pub uri: String,
    /// Subprotocols offered to the target.
    pub protocols: Vec<String>,
    /// Extra headers carried on the handshake request.
    pub headers: HeaderMap,
}

/// Synchronous request veto. `false` rejects the request before any
/// forwarding work happens.
pub type FilterHook = Arc<dyn Fn(&ProxyContext) -> bool + Send + Sync>;

/// Short-circuit hook. Returning `Some(response)` completes the operation
/// locally and nothing is forwarded.
pub type InterceptHook = Arc<
    dyn for<'a> Fn(&'a mut ProxyContext) -> BoxFuture<'a, Option<Response<AxumBody>>>
        + Send
        + Sync,
>;

/// Runs after the outbound request is fully composed, immediately before it
/// is sent.
pub type BeforeSendHook = Arc<
    dyn for<'a> Fn(&'a ProxyContext, &'a mut Request<AxumBody>) -> BoxFuture<'a, ()>
        + Send
        + Sync,
>;

/// Runs after the target response arrives, before it is relayed back.
pub type AfterReceiveHook = Arc<
    dyn for<'a> Fn(&'a ProxyContext, &'a mut Response<AxumBody>) -> BoxFuture<'a, ()>
        + Send
        + Sync,
>;

/// Converts an operation failure into the response sent to the caller,
/// replacing the default `502`.
pub type FailureHook = Arc<
    dyn for<'a> Fn(&'a ProxyContext, &'a ProxyError) -> BoxFuture<'a, Response<AxumBody>>
        + Send
        + Sync,
>;

/// Runs before the outbound WebSocket handshake; may rewrite the handshake.
pub type BeforeConnectHook = Arc<
    dyn for<'a> Fn(&'a ProxyContext, &'a mut WsConnectOptions) -> BoxFuture<'a, ()>
        + Send
        + Sync,
>;

/// Observes and may rewrite each relayed WebSocket data frame in place.
/// Control frames are never offered to this hook.
pub type DataInterceptHook = Arc<
    dyn for<'a> Fn(&'a mut Vec<u8>, Direction, FrameKind) -> BoxFuture<'a, ()> + Send + Sync,
>;

/// Behavior knobs for an HTTP forward.
#[derive(Clone)]
pub struct HttpOptions {
    pub(crate) add_forwarded_headers: bool,
    pub(crate) transport_name: Option<String>,
    pub(crate) filter: Option<FilterHook>,
    pub(crate) intercept: Option<InterceptHook>,
    pub(crate) before_send: Option<BeforeSendHook>,
    pub(crate) after_receive: Option<AfterReceiveHook>,
    pub(crate) handle_failure: Option<FailureHook>,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            add_forwarded_headers: true,
            transport_name: None,
            filter: None,
            intercept: None,
            before_send: None,
            after_receive: None,
            handle_failure: None,
        }
    }
}

impl HttpOptions {
    pub fn builder() -> HttpOptionsBuilder {
        HttpOptionsBuilder::default()
    }
}

/// Fluent builder for [`HttpOptions`]. Cheap to clone; a clone is an
/// independent builder, so a common prefix can fan out into variants.
#[derive(Clone, Default)]
pub struct HttpOptionsBuilder {
    inner: HttpOptions,
}

impl HttpOptionsBuilder {
    /// Toggle generation of `X-Forwarded-*` and `Forwarded` headers
    /// (enabled by default).
    pub fn add_forwarded_headers(mut self, enabled: bool) -> Self {
        self.inner.add_forwarded_headers = enabled;
        self
    }

    /// Send through a named transport from the registry instead of the
    /// default one.
    pub fn transport(mut self, name: impl Into<String>) -> Self {
        self.inner.transport_name = Some(name.into());
        self
    }

    pub fn filter<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ProxyContext) -> bool + Send + Sync + 'static,
    {
        self.inner.filter = Some(Arc::new(hook));
        self
    }

    pub fn intercept<F>(mut self, hook: F) -> Self
    where
        F: for<'a> Fn(&'a mut ProxyContext) -> BoxFuture<'a, Option<Response<AxumBody>>>
            + Send
            + Sync
            + 'static,
    {
        self.inner.intercept = Some(Arc::new(hook));
        self
    }

    pub fn before_send<F>(mut self, hook: F) -> Self
    where
        F: for<'a> Fn(&'a ProxyContext, &'a mut Request<AxumBody>) -> BoxFuture<'a, ()>
            + Send
            + Sync
            + 'static,
    {
        self.inner.before_send = Some(Arc::new(hook));
        self
    }

    pub fn after_receive<F>(mut self, hook: F) -> Self
    where
        F: for<'a> Fn(&'a ProxyContext, &'a mut Response<AxumBody>) -> BoxFuture<'a, ()>
            + Send
            + Sync
            + 'static,
    {
        self.inner.after_receive = Some(Arc::new(hook));
        self
    }

    pub fn handle_failure<F>(mut self, hook: F) -> Self
    where
        F: for<'a> Fn(&'a ProxyContext, &'a ProxyError) -> BoxFuture<'a, Response<AxumBody>>
            + Send
            + Sync
            + 'static,
    {
        self.inner.handle_failure = Some(Arc::new(hook));
        self
    }

    pub fn build(self) -> HttpOptions {
        self.inner
    }
}

/// Behavior knobs for a WebSocket forward.
#[derive(Clone)]
pub struct WsOptions {
    pub(crate) buffer_size: usize,
    pub(crate) intercept: Option<InterceptHook>,
    pub(crate) before_connect: Option<BeforeConnectHook>,
    pub(crate) data_intercept: Option<DataInterceptHook>,
    pub(crate) handle_failure: Option<FailureHook>,
}

impl Default for WsOptions {
    fn default() -> Self {
        Self {
            buffer_size: 4096,
            intercept: None,
            before_connect: None,
            data_intercept: None,
            handle_failure: None,
        }
    }
}

impl WsOptions {
    pub fn builder() -> WsOptionsBuilder {
        WsOptionsBuilder::default()
    }
}

/// Fluent builder for [`WsOptions`].
#[derive(Clone, Default)]
pub struct WsOptionsBuilder {
    inner: WsOptions,
}

impl WsOptionsBuilder {
    /// Frame buffer size in bytes for both directions (default 4 KiB).
    pub fn buffer_size(mut self, bytes: usize) -> Self {
        self.inner.buffer_size = bytes;
        self
    }

    pub fn intercept<F>(mut self, hook: F) -> Self
    where
        F: for<'a> Fn(&'a mut ProxyContext) -> BoxFuture<'a, Option<Response<AxumBody>>>
            + Send
            + Sync
            + 'static,
    {
        self.inner.intercept = Some(Arc::new(hook));
        self
    }

    pub fn before_connect<F>(mut self, hook: F) -> Self
    where
        F: for<'a> Fn(&'a ProxyContext, &'a mut WsConnectOptions) -> BoxFuture<'a, ()>
            + Send
            + Sync
            + 'static,
    {
        self.inner.before_connect = Some(Arc::new(hook));
        self
    }

    pub fn data_intercept<F>(mut self, hook: F) -> Self
    where
        F: for<'a> Fn(&'a mut Vec<u8>, Direction, FrameKind) -> BoxFuture<'a, ()>
            + Send
            + Sync
            + 'static,
    {
        self.inner.data_intercept = Some(Arc::new(hook));
        self
    }

    pub fn handle_failure<F>(mut self, hook: F) -> Self
    where
        F: for<'a> Fn(&'a ProxyContext, &'a ProxyError) -> BoxFuture<'a, Response<AxumBody>>
            + Send
            + Sync
            + 'static,
    {
        self.inner.handle_failure = Some(Arc::new(hook));
        self
    }

    pub fn build(self) -> WsOptions {
        self.inner
    }
}
