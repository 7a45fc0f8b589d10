use axum::{
    body::Body as AxumBody,
    extract::ws::{
        CloseFrame as ClientCloseFrame, Message as ClientMessage, WebSocket, close_code,
    },
};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use http::{HeaderMap, HeaderName, HeaderValue, Response, header};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async_with_config,
    tungstenite::{
        Utf8Bytes,
        client::IntoClientRequest,
        protocol::{CloseFrame, WebSocketConfig, frame::coding::CloseCode},
    },
};
use tokio_tungstenite::tungstenite::Message as UpstreamMessage;
use tokio_util::sync::CancellationToken;

use crate::{
    core::{
        context::ProxyContext,
        definition::WsForward,
        options::{DataInterceptHook, Direction, FrameKind, WsConnectOptions},
    },
    engine::dispatch::{empty_response, failure_response, resolve_endpoint},
    error::ProxyError,
};

type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A close frame reason must fit in a single control frame alongside the
/// two-byte close code.
const CLOSE_REASON_MAX: usize = 123;

/// Forward one WebSocket upgrade offer: connect to the target first, then
/// accept the inbound upgrade and pump frames both ways until either side
/// closes.
///
/// Connecting before accepting means a dead target turns into a plain HTTP
/// failure response, never a half-open accepted socket.
pub async fn execute_ws(ctx: &mut ProxyContext, forward: &WsForward) -> Response<AxumBody> {
    match try_execute_ws(ctx, forward).await {
        Ok(response) => response,
        Err(ProxyError::Cancelled) => {
            tracing::debug!("WebSocket proxy operation abandoned, caller disconnected");
            empty_response()
        }
        Err(err) => failure_response(ctx, forward.options.handle_failure.as_ref(), &err).await,
    }
}

async fn try_execute_ws(
    ctx: &mut ProxyContext,
    forward: &WsForward,
) -> Result<Response<AxumBody>, ProxyError> {
    if !ctx.is_websocket() {
        return Err(ProxyError::ProtocolMismatch(
            "The HTTP(S) request cannot be proxied because the underlying proxy definition \
             does not have a definition of that type.",
        ));
    }

    if let Some(intercept) = &forward.options.intercept
        && let Some(response) = intercept(ctx).await
    {
        tracing::debug!(uri = %ctx.uri(), "Upgrade completed by intercept hook");
        return Ok(response);
    }

    let endpoint = resolve_endpoint(ctx, &forward.resolver).await?;
    if !endpoint.to_ascii_lowercase().starts_with("ws") {
        return Err(ProxyError::InvalidTargetScheme {
            endpoint,
            expected: "'ws://' or 'wss://'",
        });
    }

    let mut connect = build_connect_options(ctx, endpoint);
    if let Some(hook) = &forward.options.before_connect {
        hook(ctx, &mut connect).await;
    }

    let (upstream, negotiated) =
        connect_upstream(&connect, forward.options.buffer_size, ctx.cancellation()).await?;

    let upgrade = ctx.take_upgrade().ok_or(ProxyError::ProtocolMismatch(
        "The WebSocket upgrade offer has already been consumed.",
    ))?;
    let mut upgrade = upgrade.write_buffer_size(forward.options.buffer_size);
    if let Some(protocol) = &negotiated {
        upgrade = upgrade.protocols([protocol.clone()]);
    }

    let hook = forward.options.data_intercept.clone();
    let cancel = ctx.cancellation().clone();
    let mut response = upgrade.on_upgrade(move |client| run_pumps(client, upstream, hook, cancel));

    // The caller must see the subprotocol the target agreed to even when it
    // was injected by the before_connect hook rather than offered inbound.
    if let Some(protocol) = negotiated
        && !response.headers().contains_key(header::SEC_WEBSOCKET_PROTOCOL)
        && let Ok(value) = HeaderValue::from_str(&protocol)
    {
        response
            .headers_mut()
            .insert(header::SEC_WEBSOCKET_PROTOCOL, value);
    }

    Ok(response)
}

/// Seed the outbound handshake from the inbound one: subprotocol offers are
/// carried over, hop-by-hop and handshake-mechanics headers are not.
fn build_connect_options(ctx: &ProxyContext, uri: String) -> WsConnectOptions {
    let mut headers = HeaderMap::new();
    for (name, value) in ctx.headers() {
        if is_handshake_header(name) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    let protocols = ctx
        .headers()
        .get_all(header::SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|protocol| protocol.trim().to_string())
        .filter(|protocol| !protocol.is_empty())
        .collect();

    WsConnectOptions {
        uri,
        protocols,
        headers,
    }
}

fn is_handshake_header(name: &HeaderName) -> bool {
    name == header::CONNECTION
        || name == header::HOST
        || name == header::UPGRADE
        || name.as_str().starts_with("sec-websocket-")
}

async fn connect_upstream(
    connect: &WsConnectOptions,
    buffer_size: usize,
    cancel: &CancellationToken,
) -> Result<(UpstreamSocket, Option<String>), ProxyError> {
    let mut request = connect
        .uri
        .as_str()
        .into_client_request()
        .map_err(|e| ProxyError::Connect(e.to_string()))?;
    for (name, value) in connect.headers.iter() {
        request.headers_mut().append(name.clone(), value.clone());
    }
    if !connect.protocols.is_empty() {
        let offer = connect.protocols.join(", ");
        if let Ok(value) = HeaderValue::from_str(&offer) {
            request
                .headers_mut()
                .insert(header::SEC_WEBSOCKET_PROTOCOL, value);
        }
    }

    let config = WebSocketConfig::default()
        .read_buffer_size(buffer_size)
        .write_buffer_size(buffer_size);

    let (socket, response) = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(ProxyError::Cancelled),
        result = connect_async_with_config(request, Some(config), false) => {
            result.map_err(|e| ProxyError::Connect(e.to_string()))?
        }
    };

    let negotiated = response
        .headers()
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string);

    Ok((socket, negotiated))
}

/// Run both pumps to completion. Each pump owns one direction; they
/// terminate symmetrically because whichever side ends first makes its pump
/// close the opposite sink, which ends the other pump's source.
async fn run_pumps(
    client: WebSocket,
    upstream: UpstreamSocket,
    hook: Option<DataInterceptHook>,
    cancel: CancellationToken,
) {
    let (client_sink, client_source) = client.split();
    let (upstream_sink, upstream_source) = upstream.split();
    tokio::join!(
        pump_downstream(upstream_source, client_sink, hook.clone(), cancel.clone()),
        pump_upstream(client_source, upstream_sink, hook, cancel),
    );
    tracing::debug!("WebSocket pumps finished");
}

/// Caller-to-target direction.
async fn pump_upstream(
    mut source: SplitStream<WebSocket>,
    mut dest: SplitSink<UpstreamSocket, UpstreamMessage>,
    hook: Option<DataInterceptHook>,
    cancel: CancellationToken,
) {
    loop {
        let inbound = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let _ = dest
                    .send(UpstreamMessage::Close(Some(CloseFrame {
                        code: CloseCode::Away,
                        reason: Utf8Bytes::default(),
                    })))
                    .await;
                return;
            }
            message = source.next() => message,
        };

        let message = match inbound {
            Some(Ok(message)) => message,
            Some(Err(err)) => {
                let reason = truncate_close_reason(format!("WebSocket failure.\n\n{err}"));
                let _ = dest
                    .send(UpstreamMessage::Close(Some(CloseFrame {
                        code: CloseCode::Away,
                        reason: reason.into(),
                    })))
                    .await;
                return;
            }
            // Stream end without a close frame counts as a receive failure.
            None => {
                let _ = dest
                    .send(UpstreamMessage::Close(Some(CloseFrame {
                        code: CloseCode::Away,
                        reason: Utf8Bytes::default(),
                    })))
                    .await;
                return;
            }
        };

        let outbound = match message {
            ClientMessage::Text(text) => {
                if let Some(hook) = hook.as_ref() {
                    let mut data = text.as_str().as_bytes().to_vec();
                    hook(&mut data, Direction::Upstream, FrameKind::Text).await;
                    match String::from_utf8(data) {
                        Ok(rewritten) => UpstreamMessage::Text(rewritten.into()),
                        // A text frame cannot carry invalid UTF-8; the relay
                        // has nothing valid left to forward.
                        Err(_) => {
                            let reason = truncate_close_reason(
                                "WebSocket failure.\n\ntext frame rewritten to invalid UTF-8"
                                    .to_string(),
                            );
                            let _ = dest
                                .send(UpstreamMessage::Close(Some(CloseFrame {
                                    code: CloseCode::Away,
                                    reason: reason.into(),
                                })))
                                .await;
                            return;
                        }
                    }
                } else {
                    UpstreamMessage::Text(text.as_str().into())
                }
            }
            ClientMessage::Binary(bytes) => {
                if let Some(hook) = hook.as_ref() {
                    let mut data = bytes.to_vec();
                    hook(&mut data, Direction::Upstream, FrameKind::Binary).await;
                    UpstreamMessage::Binary(data.into())
                } else {
                    UpstreamMessage::Binary(bytes)
                }
            }
            ClientMessage::Ping(payload) => UpstreamMessage::Ping(payload),
            ClientMessage::Pong(payload) => UpstreamMessage::Pong(payload),
            ClientMessage::Close(frame) => {
                let frame = frame.map(|f| CloseFrame {
                    code: f.code.into(),
                    reason: f.reason.as_str().into(),
                });
                let _ = dest.send(UpstreamMessage::Close(frame)).await;
                return;
            }
        };

        if dest.send(outbound).await.is_err() {
            return;
        }
    }
}

/// Target-to-caller direction.
async fn pump_downstream(
    mut source: SplitStream<UpstreamSocket>,
    mut dest: SplitSink<WebSocket, ClientMessage>,
    hook: Option<DataInterceptHook>,
    cancel: CancellationToken,
) {
    loop {
        let inbound = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let _ = dest
                    .send(ClientMessage::Close(Some(ClientCloseFrame {
                        code: close_code::AWAY,
                        reason: Default::default(),
                    })))
                    .await;
                return;
            }
            message = source.next() => message,
        };

        let message = match inbound {
            Some(Ok(message)) => message,
            Some(Err(err)) => {
                // The target vanished; tell the caller it has gone away, with
                // as much of the cause as fits in a close frame.
                let reason = truncate_close_reason(format!("WebSocket failure.\n\n{err}"));
                let _ = dest
                    .send(ClientMessage::Close(Some(ClientCloseFrame {
                        code: close_code::AWAY,
                        reason: reason.into(),
                    })))
                    .await;
                return;
            }
            // Stream end without a close frame counts as a receive failure.
            None => {
                let _ = dest
                    .send(ClientMessage::Close(Some(ClientCloseFrame {
                        code: close_code::AWAY,
                        reason: Default::default(),
                    })))
                    .await;
                return;
            }
        };

        let outbound = match message {
            UpstreamMessage::Text(text) => {
                if let Some(hook) = hook.as_ref() {
                    let mut data = text.as_str().as_bytes().to_vec();
                    hook(&mut data, Direction::Downstream, FrameKind::Text).await;
                    match String::from_utf8(data) {
                        Ok(rewritten) => ClientMessage::Text(rewritten.into()),
                        Err(_) => {
                            let reason = truncate_close_reason(
                                "WebSocket failure.\n\ntext frame rewritten to invalid UTF-8"
                                    .to_string(),
                            );
                            let _ = dest
                                .send(ClientMessage::Close(Some(ClientCloseFrame {
                                    code: close_code::AWAY,
                                    reason: reason.into(),
                                })))
                                .await;
                            return;
                        }
                    }
                } else {
                    ClientMessage::Text(text.as_str().into())
                }
            }
            UpstreamMessage::Binary(bytes) => {
                if let Some(hook) = hook.as_ref() {
                    let mut data = bytes.to_vec();
                    hook(&mut data, Direction::Downstream, FrameKind::Binary).await;
                    ClientMessage::Binary(data.into())
                } else {
                    ClientMessage::Binary(bytes)
                }
            }
            UpstreamMessage::Ping(payload) => ClientMessage::Ping(payload),
            UpstreamMessage::Pong(payload) => ClientMessage::Pong(payload),
            UpstreamMessage::Close(frame) => {
                let frame = frame.map(|f| ClientCloseFrame {
                    code: f.code.into(),
                    reason: f.reason.as_str().into(),
                });
                let _ = dest.send(ClientMessage::Close(frame)).await;
                return;
            }
            // Raw frames are never yielded by a configured stream read.
            UpstreamMessage::Frame(_) => continue,
        };

        if dest.send(outbound).await.is_err() {
            return;
        }
    }
}

/// Cut a close reason down to what a control frame can carry, on a char
/// boundary.
fn truncate_close_reason(reason: String) -> String {
    if reason.len() <= CLOSE_REASON_MAX {
        return reason;
    }
    let mut end = CLOSE_REASON_MAX;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    reason[..end].to_string()
}
