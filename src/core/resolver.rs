use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use eyre::{Result, eyre};
use futures_util::future::BoxFuture;
use rand::Rng;

use crate::core::context::{ProxyContext, RouteArgs};

/// EndpointResolver computes the target address for one proxied operation.
///
/// Resolution runs once per request, after interception and before the
/// outbound connection. A resolver failure aborts the operation through the
/// normal failure path; it never panics the host.
#[async_trait]
pub trait EndpointResolver: Send + Sync + 'static {
    /// Produce the target endpoint for this request.
    async fn resolve(&self, ctx: &ProxyContext, args: &RouteArgs) -> Result<String>;
}

/// Resolver that always yields the same endpoint.
pub struct StaticEndpoint {
    endpoint: String,
}

impl StaticEndpoint {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl EndpointResolver for StaticEndpoint {
    async fn resolve(&self, _ctx: &ProxyContext, _args: &RouteArgs) -> Result<String> {
        Ok(self.endpoint.clone())
    }
}

/// Adapter turning a plain closure into a resolver.
pub struct EndpointFn<F> {
    func: F,
}

impl<F> EndpointFn<F>
where
    F: Fn(&ProxyContext, &RouteArgs) -> String + Send + Sync + 'static,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F> EndpointResolver for EndpointFn<F>
where
    F: Fn(&ProxyContext, &RouteArgs) -> String + Send + Sync + 'static,
{
    async fn resolve(&self, ctx: &ProxyContext, args: &RouteArgs) -> Result<String> {
        Ok((self.func)(ctx, args))
    }
}

/// Adapter turning an async, fallible closure into a resolver.
pub struct AsyncEndpointFn<F> {
    func: F,
}

impl<F> AsyncEndpointFn<F>
where
    F: for<'a> Fn(&'a ProxyContext, &'a RouteArgs) -> BoxFuture<'a, Result<String>>
        + Send
        + Sync
        + 'static,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F> EndpointResolver for AsyncEndpointFn<F>
where
    F: for<'a> Fn(&'a ProxyContext, &'a RouteArgs) -> BoxFuture<'a, Result<String>>
        + Send
        + Sync
        + 'static,
{
    async fn resolve(&self, ctx: &ProxyContext, args: &RouteArgs) -> Result<String> {
        (self.func)(ctx, args).await
    }
}

/// Deterministic rotation over a fixed endpoint list.
///
/// The k-th resolution (starting at zero) yields entry `k % len`, regardless
/// of concurrency. The shared counter only needs to produce distinct values,
/// so relaxed ordering is enough.
pub struct RoundRobin {
    endpoints: Vec<String>,
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn over(endpoints: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            endpoints: endpoints.into_iter().map(Into::into).collect(),
            counter: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl EndpointResolver for RoundRobin {
    async fn resolve(&self, _ctx: &ProxyContext, _args: &RouteArgs) -> Result<String> {
        if self.endpoints.is_empty() {
            return Err(eyre!("round robin resolver has no endpoints"));
        }
        let k = self.counter.fetch_add(1, Ordering::Relaxed);
        Ok(self.endpoints[k % self.endpoints.len()].clone())
    }
}

/// Uniform random pick over a fixed endpoint list.
pub struct RandomRobin {
    endpoints: Vec<String>,
}

impl RandomRobin {
    pub fn over(endpoints: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            endpoints: endpoints.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl EndpointResolver for RandomRobin {
    async fn resolve(&self, _ctx: &ProxyContext, _args: &RouteArgs) -> Result<String> {
        if self.endpoints.is_empty() {
            return Err(eyre!("random robin resolver has no endpoints"));
        }
        let k = rand::rng().random_range(0..self.endpoints.len());
        Ok(self.endpoints[k].clone())
    }
}

/// Wraps another resolver and appends the inbound path and query to its
/// result, after stripping any trailing slashes from the base.
///
/// Routeless definitions use this so a base endpoint like
/// `http://host:port/` forwards `/a/b?q=1` to `http://host:port/a/b?q=1`.
pub struct PathAppendResolver {
    inner: Arc<dyn EndpointResolver>,
}

impl PathAppendResolver {
    pub fn new(inner: Arc<dyn EndpointResolver>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl EndpointResolver for PathAppendResolver {
    async fn resolve(&self, ctx: &ProxyContext, args: &RouteArgs) -> Result<String> {
        let base = self.inner.resolve(ctx, args).await?;
        let base = base.trim_end_matches('/');
        let path_and_query = ctx
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        Ok(format!("{base}{path_and_query}"))
    }
}
