use std::net::IpAddr;

use axum::body::Body as AxumBody;
use http::{HeaderMap, HeaderName, HeaderValue, Method, Request, Response, Uri, Version, header};

use crate::{
    core::{context::ProxyContext, definition::HttpForward},
    engine::dispatch::{empty_response, failure_response, resolve_endpoint},
    error::ProxyError,
};

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");

/// Forward one HTTP request according to the given forward and write the
/// outcome as a response.
///
/// Failures never escape: they are converted through the forward's failure
/// hook, or the default `502`, at this boundary.
pub async fn execute_http(ctx: &mut ProxyContext, forward: &HttpForward) -> Response<AxumBody> {
    match try_execute_http(ctx, forward).await {
        Ok(response) => response,
        Err(ProxyError::Cancelled) => {
            tracing::debug!("HTTP proxy operation abandoned, caller disconnected");
            empty_response()
        }
        Err(err) => failure_response(ctx, forward.options.handle_failure.as_ref(), &err).await,
    }
}

async fn try_execute_http(
    ctx: &mut ProxyContext,
    forward: &HttpForward,
) -> Result<Response<AxumBody>, ProxyError> {
    if ctx.is_websocket() {
        return Err(ProxyError::ProtocolMismatch(
            "The WebSocket request cannot be proxied because the underlying proxy definition \
             does not have a definition of that type.",
        ));
    }

    if let Some(filter) = &forward.options.filter
        && !filter(ctx)
    {
        tracing::debug!(uri = %ctx.uri(), "Request vetoed by proxy filter");
        return Ok(empty_response());
    }

    if let Some(intercept) = &forward.options.intercept
        && let Some(response) = intercept(ctx).await
    {
        tracing::debug!(uri = %ctx.uri(), "Request completed by intercept hook");
        return Ok(response);
    }

    let endpoint = resolve_endpoint(ctx, &forward.resolver).await?;
    if !endpoint.to_ascii_lowercase().starts_with("http") {
        return Err(ProxyError::InvalidTargetScheme {
            endpoint,
            expected: "'http://' or 'https://'",
        });
    }

    let mut outbound = build_outbound_request(ctx, &endpoint, forward)?;
    if let Some(hook) = &forward.options.before_send {
        hook(ctx, &mut outbound).await;
    }

    let transport = ctx.transports().get(forward.options.transport_name.as_deref());
    let mut response = tokio::select! {
        biased;
        _ = ctx.cancellation().cancelled() => return Err(ProxyError::Cancelled),
        result = transport.send_request(outbound) => result?,
    };

    if let Some(hook) = &forward.options.after_receive {
        hook(ctx, &mut response).await;
    }

    // Guarantee holds even for custom transports that relay it.
    response.headers_mut().remove(header::TRANSFER_ENCODING);

    Ok(response)
}

/// Compose the outbound request: target URI, relayed headers, streamed body.
fn build_outbound_request(
    ctx: &mut ProxyContext,
    endpoint: &str,
    forward: &HttpForward,
) -> Result<Request<AxumBody>, ProxyError> {
    let uri: Uri = endpoint.parse().map_err(|e| {
        ProxyError::Endpoint(format!("resolved endpoint '{endpoint}' is not a valid URI: {e}"))
    })?;

    let method = ctx.method().clone();
    let bodyless = method == Method::GET
        || method == Method::HEAD
        || method == Method::DELETE
        || method == Method::TRACE;
    let body = if bodyless {
        AxumBody::empty()
    } else {
        ctx.take_body()
    };

    let mut outbound = Request::builder()
        .method(method)
        .uri(uri.clone())
        .version(Version::HTTP_11)
        .body(body)
        .map_err(|e| ProxyError::Endpoint(format!("cannot address endpoint '{endpoint}': {e}")))?;

    let headers = outbound.headers_mut();
    for (name, value) in ctx.headers() {
        if name == header::HOST || name == header::TRANSFER_ENCODING {
            continue;
        }
        // A request without a body must not claim content metadata.
        if bodyless && (name == header::CONTENT_TYPE || name == header::CONTENT_LENGTH) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    if let Some(authority) = uri.authority()
        && let Ok(value) = HeaderValue::from_str(authority.as_str())
    {
        headers.insert(header::HOST, value);
    }

    if forward.options.add_forwarded_headers {
        add_forwarded_headers(ctx, headers);
    }

    Ok(outbound)
}

/// Synthesize `X-Forwarded-For` / `-Proto` / `-Host` and the RFC 7239
/// `Forwarded` header describing the inbound hop.
///
/// Values are appended, never replaced: in a chained-proxy setup the
/// prior hops' entries relay alongside this one.
fn add_forwarded_headers(ctx: &ProxyContext, headers: &mut HeaderMap) {
    let proto = ctx.scheme().to_string();
    let host = ctx.host().unwrap_or_default().to_string();

    if let Some(remote) = ctx.remote_addr()
        && let Ok(value) = HeaderValue::from_str(&remote.ip().to_string())
    {
        headers.append(X_FORWARDED_FOR, value);
    }
    if let Ok(value) = HeaderValue::from_str(&proto) {
        headers.append(X_FORWARDED_PROTO, value);
    }
    if let Ok(value) = HeaderValue::from_str(&host) {
        headers.append(X_FORWARDED_HOST, value);
    }

    let mut forwarded = format!("proto={proto};host={host};");
    if let Some(local) = ctx.local_addr() {
        forwarded.push_str(&format!("by={};", forwarded_node(local.ip())));
    }
    if let Some(remote) = ctx.remote_addr() {
        forwarded.push_str(&format!("for={};", forwarded_node(remote.ip())));
    }
    if let Ok(value) = HeaderValue::from_str(&forwarded) {
        headers.append(header::FORWARDED, value);
    }
}

/// RFC 7239 node identifier; IPv6 addresses are bracketed and quoted.
fn forwarded_node(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(ip) => ip.to_string(),
        IpAddr::V6(ip) => format!("\"[{ip}]\""),
    }
}
