use std::sync::Arc;

use axum::body::Body as AxumBody;
use http::{Response, StatusCode};

use crate::{
    core::{
        context::ProxyContext, definition::ProxyDefinition, options::FailureHook,
        resolver::EndpointResolver,
    },
    engine::{http::execute_http, ws::execute_ws},
    error::ProxyError,
};

/// Execute one proxied operation: pick the forward matching the inbound
/// request kind and run it.
///
/// A request whose kind has no forward on the definition is answered with a
/// `502` explaining the mismatch; nothing is forwarded.
pub async fn execute_proxy(ctx: &mut ProxyContext, proxy: &ProxyDefinition) -> Response<AxumBody> {
    let is_websocket = ctx.is_websocket();
    tracing::debug!(
        method = %ctx.method(),
        uri = %ctx.uri(),
        websocket = is_websocket,
        "Handling proxied request"
    );

    match (is_websocket, proxy.ws(), proxy.http()) {
        (true, Some(forward), _) => execute_ws(ctx, forward).await,
        (false, _, Some(forward)) => execute_http(ctx, forward).await,
        _ => {
            let kind = if is_websocket { "WebSocket" } else { "HTTP(S)" };
            tracing::warn!(
                uri = %ctx.uri(),
                kind,
                "Proxy definition has no forward for this request kind"
            );
            text_response(
                StatusCode::BAD_GATEWAY,
                format!(
                    "Request could not be proxied.\n\nThe {kind} request cannot be proxied \
                     because the underlying proxy definition does not have a definition of that \
                     type."
                ),
            )
        }
    }
}

/// Resolve the target endpoint, folding resolver failures into the proxy
/// error taxonomy.
pub(crate) async fn resolve_endpoint(
    ctx: &ProxyContext,
    resolver: &Arc<dyn EndpointResolver>,
) -> Result<String, ProxyError> {
    resolver
        .resolve(ctx, ctx.route_args())
        .await
        .map_err(|err| ProxyError::Endpoint(format!("{err:#}")))
}

/// Convert an operation failure into the caller-facing response, through the
/// configured hook or the default `502`.
///
/// The default body carries the error text verbatim; hosts that must not
/// leak internals supply their own failure hook.
pub(crate) async fn failure_response(
    ctx: &ProxyContext,
    hook: Option<&FailureHook>,
    err: &ProxyError,
) -> Response<AxumBody> {
    tracing::error!(error = %err, uri = %ctx.uri(), "Proxy operation failed");
    match hook {
        Some(hook) => hook(ctx, err).await,
        None => text_response(
            StatusCode::BAD_GATEWAY,
            format!("Request could not be proxied.\n\n{err}"),
        ),
    }
}

pub(crate) fn text_response(status: StatusCode, body: String) -> Response<AxumBody> {
    let mut response = Response::new(AxumBody::from(body));
    *response.status_mut() = status;
    response
}

pub(crate) fn empty_response() -> Response<AxumBody> {
    Response::new(AxumBody::empty())
}
