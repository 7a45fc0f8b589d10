use std::{fmt, sync::Arc};

use crate::{
    core::{
        context::{ProxyContext, RouteArgs},
        options::{HttpOptions, WsOptions},
        resolver::{EndpointFn, EndpointResolver, PathAppendResolver, StaticEndpoint},
    },
    error::ProxyError,
};

/// HTTP half of a proxy definition: a resolver plus HTTP options.
#[derive(Clone)]
pub struct HttpForward {
    pub(crate) resolver: Arc<dyn EndpointResolver>,
    pub(crate) options: HttpOptions,
}

impl HttpForward {
    /// Forward to whatever the given resolver produces.
    pub fn new(resolver: Arc<dyn EndpointResolver>) -> Self {
        Self {
            resolver,
            options: HttpOptions::default(),
        }
    }

    /// Forward to a fixed endpoint.
    pub fn to(endpoint: impl Into<String>) -> Self {
        Self::new(Arc::new(StaticEndpoint::new(endpoint)))
    }

    /// Forward to an endpoint computed per request from the context and the
    /// captured route parameters.
    pub fn resolve_with<F>(func: F) -> Self
    where
        F: Fn(&ProxyContext, &RouteArgs) -> String + Send + Sync + 'static,
    {
        Self::new(Arc::new(EndpointFn::new(func)))
    }

    pub fn with_options(mut self, options: HttpOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &HttpOptions {
        &self.options
    }
}

/// WebSocket half of a proxy definition: a resolver plus WS options.
#[derive(Clone)]
pub struct WsForward {
    pub(crate) resolver: Arc<dyn EndpointResolver>,
    pub(crate) options: WsOptions,
}

impl WsForward {
    pub fn new(resolver: Arc<dyn EndpointResolver>) -> Self {
        Self {
            resolver,
            options: WsOptions::default(),
        }
    }

    pub fn to(endpoint: impl Into<String>) -> Self {
        Self::new(Arc::new(StaticEndpoint::new(endpoint)))
    }

    pub fn resolve_with<F>(func: F) -> Self
    where
        F: Fn(&ProxyContext, &RouteArgs) -> String + Send + Sync + 'static,
    {
        Self::new(Arc::new(EndpointFn::new(func)))
    }

    pub fn with_options(mut self, options: WsOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &WsOptions {
        &self.options
    }
}

// Resolvers and hooks are opaque function values, so these impls only name
// the configured shape.
impl fmt::Debug for HttpForward {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpForward").finish_non_exhaustive()
    }
}

impl fmt::Debug for WsForward {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsForward").finish_non_exhaustive()
    }
}

/// Immutable description of one route's forwarding behavior.
///
/// Carries an HTTP forward, a WebSocket forward, or both; the dispatcher
/// picks the half matching the inbound request kind. Cloning shares the
/// resolvers and hooks, which are read-only for the process lifetime.
#[derive(Clone)]
pub struct ProxyDefinition {
    route: Option<String>,
    http: Option<HttpForward>,
    ws: Option<WsForward>,
}

impl fmt::Debug for ProxyDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyDefinition")
            .field("route", &self.route)
            .field("http", &self.http)
            .field("ws", &self.ws)
            .finish()
    }
}

impl ProxyDefinition {
    pub fn builder() -> ProxyDefinitionBuilder {
        ProxyDefinitionBuilder::default()
    }

    /// Builder for a definition bound to a whole listener instead of a path
    /// pattern. Its resolvers are wrapped so the inbound path and query are
    /// appended to whatever endpoint they produce.
    pub fn routeless() -> ProxyDefinitionBuilder {
        ProxyDefinitionBuilder {
            routeless: true,
            ..ProxyDefinitionBuilder::default()
        }
    }

    /// The route template this definition was registered under, if any.
    pub fn route(&self) -> Option<&str> {
        self.route.as_deref()
    }

    pub fn http(&self) -> Option<&HttpForward> {
        self.http.as_ref()
    }

    pub fn ws(&self) -> Option<&WsForward> {
        self.ws.as_ref()
    }
}

/// Accumulates a route's forwarding configuration and validates it before
/// producing an immutable [`ProxyDefinition`].
///
/// Misuse (duplicate forward kind, route on a routeless builder, building
/// with no forward at all) surfaces as `ProxyError::Configuration` from
/// [`build`](Self::build); the first violation wins. Cloning a builder
/// yields a structurally independent copy, so a partially configured
/// builder can fan out into several definitions.
#[derive(Clone, Default)]
pub struct ProxyDefinitionBuilder {
    route: Option<String>,
    routeless: bool,
    http: Option<HttpForward>,
    ws: Option<WsForward>,
    error: Option<String>,
}

impl ProxyDefinitionBuilder {
    /// Set the route template this definition will be registered under.
    pub fn route(mut self, template: impl Into<String>) -> Self {
        if self.routeless {
            self.record_error("a route cannot be set on a routeless proxy definition");
        } else {
            self.route = Some(template.into());
        }
        self
    }

    /// Configure the HTTP forward. At most one per definition.
    pub fn http(mut self, forward: HttpForward) -> Self {
        if self.http.is_some() {
            self.record_error("an HTTP forward has already been set on this definition");
        } else {
            self.http = Some(forward);
        }
        self
    }

    /// Configure the WebSocket forward. At most one per definition.
    pub fn ws(mut self, forward: WsForward) -> Self {
        if self.ws.is_some() {
            self.record_error("a WebSocket forward has already been set on this definition");
        } else {
            self.ws = Some(forward);
        }
        self
    }

    fn record_error(&mut self, message: &str) {
        if self.error.is_none() {
            self.error = Some(message.to_string());
        }
    }

    /// Validate and produce the definition.
    pub fn build(self) -> Result<ProxyDefinition, ProxyError> {
        if let Some(message) = self.error {
            return Err(ProxyError::Configuration(message));
        }
        if self.http.is_none() && self.ws.is_none() {
            return Err(ProxyError::Configuration(
                "at least one endpoint must be defined, with `http` or `ws`".to_string(),
            ));
        }

        let (http, ws) = if self.routeless {
            (
                self.http.map(|mut forward| {
                    forward.resolver = Arc::new(PathAppendResolver::new(forward.resolver));
                    forward
                }),
                self.ws.map(|mut forward| {
                    forward.resolver = Arc::new(PathAppendResolver::new(forward.resolver));
                    forward
                }),
            )
        } else {
            (self.http, self.ws)
        };

        Ok(ProxyDefinition {
            route: self.route,
            http,
            ws,
        })
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body as AxumBody;
    use http::Request;

    use super::*;
    use crate::testing::null_registry;

    #[test]
    fn build_without_any_forward_is_rejected() {
        let err = ProxyDefinition::builder().build().unwrap_err();
        assert!(matches!(err, ProxyError::Configuration(_)));
        assert!(err.to_string().contains("at least one endpoint"));
    }

    #[test]
    fn duplicate_http_forward_is_rejected() {
        let err = ProxyDefinition::builder()
            .http(HttpForward::to("http://localhost:5001"))
            .http(HttpForward::to("http://localhost:5002"))
            .build()
            .unwrap_err();
        assert!(matches!(err, ProxyError::Configuration(_)));
        assert!(err.to_string().contains("already been set"));
    }

    #[test]
    fn route_on_routeless_builder_is_rejected() {
        let err = ProxyDefinition::routeless()
            .route("/api/{tail}")
            .ws(WsForward::to("ws://localhost:5001"))
            .build()
            .unwrap_err();
        assert!(matches!(err, ProxyError::Configuration(_)));
        assert!(err.to_string().contains("routeless"));
    }

    #[test]
    fn debug_output_names_route_and_forwards() {
        let definition = ProxyDefinition::builder()
            .route("/api/{tail}")
            .http(HttpForward::to("http://localhost:5001"))
            .build()
            .unwrap();
        let rendered = format!("{definition:?}");
        assert!(rendered.contains("/api/{tail}"), "{rendered}");
        assert!(rendered.contains("HttpForward"), "{rendered}");
    }

    #[test]
    fn cloned_builder_is_independent() {
        let base = ProxyDefinition::builder().http(HttpForward::to("http://localhost:5001"));
        let with_ws = base
            .clone()
            .ws(WsForward::to("ws://localhost:5001"))
            .build()
            .unwrap();
        let plain = base.build().unwrap();

        assert!(with_ws.ws().is_some());
        assert!(plain.ws().is_none());
    }

    #[tokio::test]
    async fn routeless_definition_appends_inbound_path() {
        let definition = ProxyDefinition::routeless()
            .http(HttpForward::to("http://localhost:5001/"))
            .build()
            .unwrap();

        let req = Request::builder()
            .uri("/a/b?q=1")
            .body(AxumBody::empty())
            .unwrap();
        let ctx = ProxyContext::from_request(req, null_registry()).await;
        let resolved = definition
            .http()
            .unwrap()
            .resolver
            .resolve(&ctx, &RouteArgs::new())
            .await
            .unwrap();
        assert_eq!(resolved, "http://localhost:5001/a/b?q=1");
    }
}
