// End-to-end HTTP forwarding through real listeners on loopback.
use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    extract::ConnectInfo,
    http::{HeaderName, Request, Response, StatusCode, header},
};
use http_body_util::BodyExt;
use relay_engine::{
    HttpClient, HttpClientAdapter, HttpForward, HttpOptions, ProxyContext, ProxyDefinition,
    RoundRobin, TransportRegistry, execute_proxy,
};

fn init_tracing() {
    static ONCE: std::sync::Once = std::sync::Once::new();
    ONCE.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

async fn spawn(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    addr
}

/// Upstream that echoes the request line and body, and reflects interesting
/// request headers back as `echo-*` response headers.
async fn echo(req: Request<Body>) -> Response<Body> {
    let (parts, body) = req.into_parts();
    let bytes = body.collect().await.unwrap().to_bytes();
    let line = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_default();
    let mut response = Response::new(Body::from(format!(
        "({} {})[{}]",
        parts.method,
        line,
        String::from_utf8_lossy(&bytes)
    )));
    for (name, value) in parts.headers.iter() {
        let name = name.as_str();
        if name.starts_with("x-forwarded-") || name == "forwarded" || name == "x-relay-tag" {
            let echoed = HeaderName::from_bytes(format!("echo-{name}").as_bytes()).unwrap();
            response.headers_mut().insert(echoed, value.clone());
        }
    }
    response
}

async fn spawn_echo() -> SocketAddr {
    spawn(Router::new().fallback(echo)).await
}

fn proxy_app(definition: ProxyDefinition, transports: Arc<TransportRegistry>) -> Router {
    let definition = Arc::new(definition);
    Router::new().fallback(
        move |ConnectInfo(remote): ConnectInfo<SocketAddr>, req: Request<Body>| {
            let definition = definition.clone();
            let transports = transports.clone();
            async move {
                let mut ctx = ProxyContext::from_request(req, transports)
                    .await
                    .with_remote_addr(remote);
                execute_proxy(&mut ctx, &definition).await
            }
        },
    )
}

fn default_transports() -> Arc<TransportRegistry> {
    Arc::new(TransportRegistry::new(Arc::new(
        HttpClientAdapter::new().unwrap(),
    )))
}

async fn spawn_proxy(definition: ProxyDefinition) -> SocketAddr {
    spawn(proxy_app(definition, default_transports())).await
}

async fn send(req: Request<Body>) -> (StatusCode, http::HeaderMap, String) {
    let client = HttpClientAdapter::new().unwrap();
    let response = client.send_request(req).await.unwrap();
    let (parts, body) = response.into_parts();
    let bytes = body.collect().await.unwrap().to_bytes();
    (
        parts.status,
        parts.headers,
        String::from_utf8_lossy(&bytes).to_string(),
    )
}

fn path_following_forward(upstream: SocketAddr) -> HttpForward {
    HttpForward::resolve_with(move |ctx, _args| {
        format!(
            "http://{upstream}{}",
            ctx.uri().path_and_query().map(|pq| pq.as_str()).unwrap_or("/")
        )
    })
}

#[tokio::test(flavor = "multi_thread")]
async fn get_is_relayed_with_status_and_body() {
    init_tracing();
    let upstream = spawn_echo().await;
    let proxy = spawn_proxy(
        ProxyDefinition::builder()
            .http(path_following_forward(upstream))
            .build()
            .unwrap(),
    )
    .await;

    let req = Request::builder()
        .uri(format!("http://{proxy}/hello"))
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "(GET /hello)[]");
}

#[tokio::test(flavor = "multi_thread")]
async fn post_body_streams_through() {
    init_tracing();
    let upstream = spawn_echo().await;
    let proxy = spawn_proxy(
        ProxyDefinition::builder()
            .http(path_following_forward(upstream))
            .build()
            .unwrap(),
    )
    .await;

    let req = Request::builder()
        .method("POST")
        .uri(format!("http://{proxy}/data"))
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from("payload"))
        .unwrap();
    let (status, _, body) = send(req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "(POST /data)[payload]");
}

#[tokio::test(flavor = "multi_thread")]
async fn forwarded_headers_reach_the_target() {
    init_tracing();
    let upstream = spawn_echo().await;
    let proxy = spawn_proxy(
        ProxyDefinition::builder()
            .http(path_following_forward(upstream))
            .build()
            .unwrap(),
    )
    .await;

    let req = Request::builder()
        .uri(format!("http://{proxy}/hop"))
        .body(Body::empty())
        .unwrap();
    let (status, headers, _) = send(req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["echo-x-forwarded-for"], "127.0.0.1");
    assert_eq!(headers["echo-x-forwarded-proto"], "http");
    assert_eq!(headers["echo-x-forwarded-host"], proxy.to_string().as_str());
    let forwarded = headers["echo-forwarded"].to_str().unwrap();
    assert!(forwarded.starts_with(&format!("proto=http;host={proxy};")), "{forwarded}");
    assert!(forwarded.ends_with("for=127.0.0.1;"), "{forwarded}");
}

#[tokio::test(flavor = "multi_thread")]
async fn forwarded_headers_can_be_disabled() {
    init_tracing();
    let upstream = spawn_echo().await;
    let options = HttpOptions::builder().add_forwarded_headers(false).build();
    let proxy = spawn_proxy(
        ProxyDefinition::builder()
            .http(path_following_forward(upstream).with_options(options))
            .build()
            .unwrap(),
    )
    .await;

    let req = Request::builder()
        .uri(format!("http://{proxy}/hop"))
        .body(Body::empty())
        .unwrap();
    let (status, headers, _) = send(req).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!headers.contains_key("echo-x-forwarded-for"));
    assert!(!headers.contains_key("echo-forwarded"));
}

#[tokio::test(flavor = "multi_thread")]
async fn routeless_definition_appends_path_and_query() {
    init_tracing();
    let upstream = spawn_echo().await;
    let proxy = spawn_proxy(
        ProxyDefinition::routeless()
            .http(HttpForward::to(format!("http://{upstream}/")))
            .build()
            .unwrap(),
    )
    .await;

    let req = Request::builder()
        .uri(format!("http://{proxy}/a/b?q=1"))
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "(GET /a/b?q=1)[]");
}

#[tokio::test(flavor = "multi_thread")]
async fn error_statuses_are_relayed_verbatim() {
    init_tracing();
    let upstream = spawn(Router::new().fallback(|| async {
        let mut response = Response::new(Body::from("teapot"));
        *response.status_mut() = StatusCode::IM_A_TEAPOT;
        response
    }))
    .await;
    let proxy = spawn_proxy(
        ProxyDefinition::builder()
            .http(path_following_forward(upstream))
            .build()
            .unwrap(),
    )
    .await;

    let req = Request::builder()
        .uri(format!("http://{proxy}/broken"))
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(req).await;
    assert_eq!(status, StatusCode::IM_A_TEAPOT);
    assert_eq!(body, "teapot");
}

#[tokio::test(flavor = "multi_thread")]
async fn before_send_and_after_receive_hooks_run() {
    init_tracing();
    let upstream = spawn_echo().await;
    let options = HttpOptions::builder()
        .before_send(|_ctx, req| {
            Box::pin(async move {
                req.headers_mut()
                    .insert("x-relay-tag", "tagged".parse().unwrap());
            })
        })
        .after_receive(|_ctx, response| {
            Box::pin(async move {
                response
                    .headers_mut()
                    .insert("x-post-receive", "1".parse().unwrap());
            })
        })
        .build();
    let proxy = spawn_proxy(
        ProxyDefinition::builder()
            .http(path_following_forward(upstream).with_options(options))
            .build()
            .unwrap(),
    )
    .await;

    let req = Request::builder()
        .uri(format!("http://{proxy}/hooked"))
        .body(Body::empty())
        .unwrap();
    let (status, headers, _) = send(req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["echo-x-relay-tag"], "tagged");
    assert_eq!(headers["x-post-receive"], "1");
}

#[tokio::test(flavor = "multi_thread")]
async fn named_transport_is_used_when_selected() {
    init_tracing();

    struct TaggingTransport {
        inner: HttpClientAdapter,
    }

    #[async_trait]
    impl HttpClient for TaggingTransport {
        async fn send_request(
            &self,
            mut req: Request<Body>,
        ) -> Result<Response<Body>, relay_engine::ports::http_client::HttpClientError> {
            req.headers_mut()
                .insert("x-relay-tag", "via-named".parse().unwrap());
            self.inner.send_request(req).await
        }
    }

    let upstream = spawn_echo().await;
    let transports = Arc::new(
        TransportRegistry::new(Arc::new(HttpClientAdapter::new().unwrap())).with_transport(
            "tagging",
            Arc::new(TaggingTransport {
                inner: HttpClientAdapter::new().unwrap(),
            }),
        ),
    );
    let options = HttpOptions::builder().transport("tagging").build();
    let definition = ProxyDefinition::builder()
        .http(path_following_forward(upstream).with_options(options))
        .build()
        .unwrap();
    let proxy = spawn(proxy_app(definition, transports)).await;

    let req = Request::builder()
        .uri(format!("http://{proxy}/via"))
        .body(Body::empty())
        .unwrap();
    let (status, headers, _) = send(req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["echo-x-relay-tag"], "via-named");
}

#[tokio::test(flavor = "multi_thread")]
async fn round_robin_rotates_across_targets() {
    init_tracing();
    let first = spawn(Router::new().fallback(|| async { "one" })).await;
    let second = spawn(Router::new().fallback(|| async { "two" })).await;

    let resolver = Arc::new(RoundRobin::over([
        format!("http://{first}/"),
        format!("http://{second}/"),
    ]));
    let proxy = spawn_proxy(
        ProxyDefinition::builder()
            .http(HttpForward::new(resolver))
            .build()
            .unwrap(),
    )
    .await;

    let mut seen = Vec::new();
    for _ in 0..4 {
        let req = Request::builder()
            .uri(format!("http://{proxy}/"))
            .body(Body::empty())
            .unwrap();
        let (_, _, body) = send(req).await;
        seen.push(body);
    }
    assert_eq!(seen, ["one", "two", "one", "two"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn chunked_transfer_encoding_is_not_relayed() {
    init_tracing();
    // Upstream streams its body so hyper frames it chunked on the wire.
    let upstream = spawn(Router::new().fallback(|| async {
        let chunks: Vec<Result<&'static [u8], std::io::Error>> =
            vec![Ok(b"chu"), Ok(b"nked")];
        Response::new(Body::from_stream(futures_util::stream::iter(chunks)))
    }))
    .await;

    // The caller-facing hop re-frames the body, so the check has to happen
    // on the proxy's own response before it is serialized again.
    let saw_transfer_encoding = Arc::new(AtomicBool::new(false));
    let flag = saw_transfer_encoding.clone();
    let transports = default_transports();
    let definition = Arc::new(
        ProxyDefinition::builder()
            .http(path_following_forward(upstream))
            .build()
            .unwrap(),
    );
    let proxy = spawn(Router::new().fallback(move |req: Request<Body>| {
        let definition = definition.clone();
        let transports = transports.clone();
        let flag = flag.clone();
        async move {
            let mut ctx = ProxyContext::from_request(req, transports).await;
            let response = execute_proxy(&mut ctx, &definition).await;
            if response.headers().contains_key(header::TRANSFER_ENCODING) {
                flag.store(true, Ordering::SeqCst);
            }
            response
        }
    }))
    .await;

    let req = Request::builder()
        .uri(format!("http://{proxy}/stream"))
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "chunked");
    assert!(!saw_transfer_encoding.load(Ordering::SeqCst));
}
