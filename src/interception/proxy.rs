// src/interception/proxy.rs
//! Local HTTP proxy front-end
//!
//! Browsers (or anything else) pointed at this proxy have every request fed
//! through the engine. The proxy waits for the record's outcome and answers
//! the way a page would experience it:
//!
//! | outcome                 | answer                   |
//! |-------------------------|--------------------------|
//! | completed               | upstream response        |
//! | blocked by filter       | 403                      |
//! | dropped                 | 502                      |
//! | failed: timeout         | 504                      |
//! | failed: other           | 502                      |
//!
//! The owning tab is taken from the `x-netpanel-tab` request header, which
//! is stripped before the request is recorded. Plain HTTP only; `CONNECT`
//! tunnels are refused.

use crate::engine::{Engine, LoadOutcome};
use crate::record::{FailureReason, HeaderList, HttpResponse, Origin, OutboundRequest};
use crate::utils::config::ProxyConfig;
use crate::utils::errors::{EngineError, Result};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{HeaderName, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Request header carrying the tab id
pub const TAB_HEADER: &str = "x-netpanel-tab";

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub struct ProxyServer {
    config: ProxyConfig,
    engine: Arc<Engine>,
}

impl ProxyServer {
    pub fn new(config: ProxyConfig, engine: Arc<Engine>) -> Self {
        Self { config, engine }
    }

    /// Bind the configured listen address
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        TcpListener::bind(&addr)
            .await
            .map_err(|e| EngineError::InterceptionFailed(format!("Failed to bind proxy {}: {}", addr, e)))
    }

    /// Bind and serve until `shutdown` fires
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener, shutdown).await
    }

    /// Accept connections on `listener` until `shutdown` fires
    pub async fn serve(self: Arc<Self>, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let local: SocketAddr = listener
            .local_addr()
            .map_err(|e| EngineError::InterceptionFailed(format!("Proxy address error: {}", e)))?;
        info!("Proxy listening on {}", local);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Proxy on {} shutting down", local);
                    return Ok(());
                }

                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let proxy = Arc::clone(&self);

                        tokio::spawn(async move {
                            debug!("Accepted connection from {}", addr);

                            let io = TokioIo::new(stream);
                            let service = service_fn(move |req| {
                                let proxy = Arc::clone(&proxy);
                                async move { Ok::<_, Infallible>(proxy.respond(req).await) }
                            });

                            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                                debug!("Connection from {} ended: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                }
            }
        }
    }

    async fn respond(&self, req: Request<Incoming>) -> Response<Full<Bytes>> {
        if req.method() == Method::CONNECT {
            return error_response(
                StatusCode::METHOD_NOT_ALLOWED,
                "CONNECT tunnels are not supported",
            );
        }

        match self.handle_request(req).await {
            Ok(response) => response,
            Err(EngineError::InvalidEdit(message)) => {
                warn!("Rejected proxied request: {}", message);
                error_response(StatusCode::BAD_REQUEST, &message)
            }
            Err(e) => {
                error!("Proxied request failed: {}", e);
                error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
            }
        }
    }

    async fn handle_request(&self, req: Request<Incoming>) -> Result<Response<Full<Bytes>>> {
        let (parts, body) = req.into_parts();
        let url = absolute_url(&parts.uri, &parts.headers)?;

        let tab = parts
            .headers
            .get(TAB_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(0);
        let mut origin = Origin::tab(tab);
        if let Some(dest) = parts
            .headers
            .get("sec-fetch-dest")
            .and_then(|v| v.to_str().ok())
        {
            origin = origin.with_resource(dest);
        }

        let mut headers = HeaderList::from(&parts.headers);
        headers.remove(TAB_HEADER);
        for name in HOP_BY_HOP {
            headers.remove(name);
        }

        let body = body
            .collect()
            .await
            .map_err(|e| EngineError::InterceptionFailed(format!("Body read error: {}", e)))?
            .to_bytes();

        let request = OutboundRequest {
            method: parts.method.as_str().to_string(),
            url,
            headers,
            body: (!body.is_empty()).then_some(body),
        };
        request.validate()?;

        debug!("Proxying {} {} for tab {}", request.method, request.url, tab);

        let outcome = self.engine.load(origin, request).await?;
        Ok(outcome_response(outcome))
    }
}

/// Proxies receive absolute-form URIs; origin-form needs the Host header
fn absolute_url(uri: &hyper::Uri, headers: &hyper::HeaderMap) -> Result<String> {
    if uri.scheme().is_some() && uri.authority().is_some() {
        return Ok(uri.to_string());
    }

    let host = headers
        .get(hyper::header::HOST)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| EngineError::InvalidEdit("request has no host".to_string()))?;
    let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");

    Ok(format!("http://{}{}", host, path))
}

fn outcome_response(outcome: LoadOutcome) -> Response<Full<Bytes>> {
    match outcome {
        LoadOutcome::Loaded(response) => upstream_response(response),
        LoadOutcome::Blocked => error_response(StatusCode::FORBIDDEN, "Blocked by domain filter"),
        LoadOutcome::Dropped(reason) => {
            error_response(StatusCode::BAD_GATEWAY, &format!("Request dropped: {:?}", reason))
        }
        LoadOutcome::Failed(FailureReason::Timeout) => {
            error_response(StatusCode::GATEWAY_TIMEOUT, "Upstream timed out")
        }
        LoadOutcome::Failed(reason) => {
            error_response(StatusCode::BAD_GATEWAY, &format!("Request failed: {}", reason))
        }
    }
}

fn upstream_response(upstream: HttpResponse) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(upstream.body));
    *response.status_mut() =
        StatusCode::from_u16(upstream.status).unwrap_or(StatusCode::BAD_GATEWAY);

    let headers = response.headers_mut();
    for (name, value) in upstream.headers.iter() {
        if HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h))
            || name.eq_ignore_ascii_case("content-length")
        {
            continue;
        }
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => debug!("Skipping unrepresentable response header {}", name),
        }
    }

    response
}

fn error_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(message.to_string())));
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interception::{Blocklist, DomainFilter, InterceptMode};
    use crate::network::{Script, ScriptedNetwork};
    use crate::record::RequestState;
    use crate::utils::config::EngineConfig;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    async fn start(network: ScriptedNetwork) -> (Arc<Engine>, SocketAddr, CancellationToken) {
        let engine = Arc::new(Engine::new(EngineConfig::default(), Arc::new(network)).unwrap());
        let proxy = Arc::new(ProxyServer::new(
            ProxyConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
            },
            Arc::clone(&engine),
        ));
        let listener = proxy.bind().await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        tokio::spawn(proxy.serve(listener, shutdown.clone()));
        (engine, addr, shutdown)
    }

    async fn send_raw(addr: SocketAddr, request: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        String::from_utf8_lossy(&response).into_owned()
    }

    fn get(url: &str, extra: &str) -> String {
        format!(
            "GET {} HTTP/1.1\r\nHost: example.test\r\n{}Connection: close\r\n\r\n",
            url, extra
        )
    }

    #[tokio::test]
    async fn test_proxies_response() {
        let network = ScriptedNetwork::with_fallback(Script::Respond(
            HttpResponse::new(201)
                .with_header("X-Upstream", "yes")
                .with_body("created"),
        ));
        let (engine, addr, shutdown) = start(network).await;

        let response = send_raw(addr, &get("http://example.test/a", "x-netpanel-tab: 9\r\n")).await;

        assert!(response.starts_with("HTTP/1.1 201"));
        assert!(response.to_ascii_lowercase().contains("x-upstream: yes"));
        assert!(response.ends_with("created"));

        let records = engine.snapshot();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].origin.tab, 9);
        assert_eq!(records[0].url(), "http://example.test/a");
        assert!(!records[0].headers().contains(TAB_HEADER));
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_origin_form_uses_host_header() {
        let (engine, addr, shutdown) = start(ScriptedNetwork::new()).await;

        let response = send_raw(addr, &get("/index.html", "")).await;

        assert!(response.starts_with("HTTP/1.1 200"));
        assert_eq!(engine.snapshot()[0].url(), "http://example.test/index.html");
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_blocked_gets_403() {
        let (engine, addr, shutdown) = start(ScriptedNetwork::new()).await;
        let filter: Arc<dyn DomainFilter> = Arc::new(Blocklist::from_domains(["example.test"]));
        engine.set_filter(Some(filter));
        engine.set_blocking(true);

        let response = send_raw(addr, &get("http://example.test/ad.js", "")).await;

        assert!(response.starts_with("HTTP/1.1 403"));
        assert_eq!(engine.snapshot()[0].state, RequestState::Dropped);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_dropped_held_request_gets_502() {
        let (engine, addr, shutdown) = start(ScriptedNetwork::new()).await;
        engine.set_mode(InterceptMode::All);

        let client = tokio::spawn(async move { send_raw(addr, &get("http://example.test/", "")).await });

        let mut held = None;
        for _ in 0..200 {
            if let Some(record) = engine.snapshot().into_iter().find(|r| r.state == RequestState::Held) {
                held = Some(record.id);
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        engine.drop_request(held.unwrap()).unwrap();

        let response = client.await.unwrap();
        assert!(response.starts_with("HTTP/1.1 502"));
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_network_failure_gets_502() {
        let network = ScriptedNetwork::with_fallback(Script::Fail("refused".to_string()));
        let (_engine, addr, shutdown) = start(network).await;

        let response = send_raw(addr, &get("http://example.test/", "")).await;
        assert!(response.starts_with("HTTP/1.1 502"));
        shutdown.cancel();
    }

    #[test]
    fn test_absolute_url() {
        let uri: hyper::Uri = "http://a.test/x?y=1".parse().unwrap();
        assert_eq!(
            absolute_url(&uri, &hyper::HeaderMap::new()).unwrap(),
            "http://a.test/x?y=1"
        );

        let uri: hyper::Uri = "/x".parse().unwrap();
        assert!(absolute_url(&uri, &hyper::HeaderMap::new()).is_err());
    }
}
