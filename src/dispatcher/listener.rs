//! TCP accept loop, HTTP routing, and WebSocket upgrade (§4.F).
//!
//! Delegates HTTP/1.1 framing to `hyper`'s per-connection driver and
//! WebSocket framing to `tokio-tungstenite`, per §4.F.1 — this module only
//! does routing and node state-machine plumbing, never wire parsing.

use std::cell::RefCell;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use http::{Request, Response, StatusCode};
use hyper::body::HttpBody;
use hyper::upgrade::Upgraded;
use hyper::{Body, server::conn::Http};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::{Message, Role};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, trace, warn};

use crate::dispatcher::routing::RoutingTable;
use crate::message::Upstream;
use crate::method::Method;
use crate::node::http::Reply as HttpReply;
use crate::node::ws_echo::WsCmd as EchoCmd;
use crate::node::{NodeHandle, WsEchoNode, WsPubNode};
use crate::scheme;
use crate::status;

/// Methods the dispatcher routes to an HTTP node (§4.F, §6: "All
/// GET/POST/PUT/HEAD/OPTIONS requests are routed by path"), matching the
/// original's five registered callbacks. Any other method (DELETE, CONNECT,
/// TRACE, PATCH, ...) never reaches a node.
fn is_routable_method(method: &http::Method) -> bool {
    matches!(
        *method,
        http::Method::GET | http::Method::POST | http::Method::PUT | http::Method::HEAD | http::Method::OPTIONS
    )
}

/// Runs the accept loop until `shutdown` reports `true`. Each accepted
/// connection is driven on its own `spawn_local` task, so one slow or
/// long-lived connection never blocks another.
pub async fn run<U: Upstream + 'static>(
    listener: TcpListener,
    routes: Rc<RefCell<RoutingTable>>,
    upstream: Rc<U>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, remote)) => {
                        debug!(%remote, "accepted connection");
                        let routes = routes.clone();
                        let upstream = upstream.clone();
                        tokio::task::spawn_local(async move {
                            serve_connection(stream, remote, routes, upstream).await;
                        });
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

async fn serve_connection<U: Upstream + 'static>(
    stream: TcpStream,
    remote: SocketAddr,
    routes: Rc<RefCell<RoutingTable>>,
    upstream: Rc<U>,
) {
    let service = RouteService { routes, upstream };
    let conn = Http::new()
        .http1_only(true)
        .with_executor(LocalExec)
        .serve_connection(stream, service)
        .with_upgrades();
    if let Err(e) = conn.await {
        trace!(remote = %remote, error = %e, "connection ended");
    }
}

#[derive(Clone, Copy)]
struct LocalExec;

impl<F> hyper::rt::Executor<F> for LocalExec
where
    F: Future + 'static,
{
    fn execute(&self, fut: F) {
        tokio::task::spawn_local(async move {
            let _ = fut.await;
        });
    }
}

struct RouteService<U> {
    routes: Rc<RefCell<RoutingTable>>,
    upstream: Rc<U>,
}

impl<U> Clone for RouteService<U> {
    fn clone(&self) -> Self {
        RouteService {
            routes: self.routes.clone(),
            upstream: self.upstream.clone(),
        }
    }
}

impl<U: Upstream + 'static> hyper::service::Service<Request<Body>> for RouteService<U> {
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response<Body>, Infallible>>>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let routes = self.routes.clone();
        let upstream = self.upstream.clone();
        Box::pin(async move { Ok(route(routes, upstream, req).await) })
    }
}

async fn route<U: Upstream + 'static>(
    routes: Rc<RefCell<RoutingTable>>,
    upstream: Rc<U>,
    req: Request<Body>,
) -> Response<Body> {
    let path = req.uri().path().to_string();
    let handle = routes.borrow().get(&path);
    let handle = match handle {
        Some(h) => h,
        None => return not_found(),
    };

    let wants_upgrade = is_websocket_upgrade(&req);
    if !wants_upgrade && !is_routable_method(req.method()) {
        debug!(method = %req.method(), %path, "method not routed to a node");
        return method_not_allowed();
    }

    match (handle.kind().is_ws(), wants_upgrade) {
        (true, false) => bad_request("WebSocket node"),
        (false, true) => bad_request("HTTP node"),
        (false, false) => serve_http(handle, upstream, req).await,
        (true, true) => upgrade(handle, upstream, req),
    }
}

fn is_websocket_upgrade(req: &Request<Body>) -> bool {
    req.headers()
        .get(http::header::UPGRADE)
        .map(|v| v.as_bytes().eq_ignore_ascii_case(b"websocket"))
        .unwrap_or(false)
}

fn not_found() -> Response<Body> {
    trace!(status = 404, reason = status::reason_phrase(404), "responding");
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .body(Body::from("Requested url not found"))
        .expect("static response is always well-formed")
}

fn bad_request(body: &'static str) -> Response<Body> {
    trace!(status = 400, reason = status::reason_phrase(400), %body, "responding");
    Response::builder()
        .status(StatusCode::BAD_REQUEST)
        .body(Body::from(body))
        .expect("static response is always well-formed")
}

fn method_not_allowed() -> Response<Body> {
    trace!(status = 405, reason = status::reason_phrase(405), "responding");
    Response::builder()
        .status(StatusCode::METHOD_NOT_ALLOWED)
        .header(http::header::ALLOW, "GET, POST, PUT, HEAD, OPTIONS")
        .body(Body::from("Method not allowed"))
        .expect("static response is always well-formed")
}

async fn serve_http<U: Upstream + 'static>(
    handle: NodeHandle,
    upstream: Rc<U>,
    req: Request<Body>,
) -> Response<Body> {
    let node = match handle {
        NodeHandle::Http(n) => n,
        _ => unreachable!("route() only sends non-upgrade requests to HTTP nodes"),
    };
    let method = Method::try_from(req.method()).unwrap_or(Method::Undefined);
    let path = req.uri().path().to_string();
    let headers: Vec<scheme::Header> = req
        .headers()
        .iter()
        .map(|(name, value)| scheme::Header {
            name: name.as_str().to_string(),
            value: String::from_utf8_lossy(value.as_bytes()).into_owned(),
        })
        .collect();
    let (addr, reply_rx) = node.open_session(upstream.as_ref(), method, &path, &headers);

    let mut body = req.into_body();
    let body_node = node.clone();
    let body_upstream = upstream.clone();
    tokio::task::spawn_local(async move {
        loop {
            match body.data().await {
                Some(Ok(chunk)) => {
                    if !body_node.data(body_upstream.as_ref(), addr, chunk) {
                        // Session already completed (reply posted or
                        // disconnected) while the body was still streaming.
                        break;
                    }
                }
                Some(Err(e)) => {
                    warn!(error = %e, "http request body aborted");
                    body_node.aborted(body_upstream.as_ref(), addr);
                    break;
                }
                None => break,
            }
        }
    });

    match reply_rx.await {
        Ok(HttpReply::Data(bytes)) => {
            trace!(status = 200, reason = status::reason_phrase(200), %path, "responding");
            Response::builder()
                .status(StatusCode::OK)
                .header(http::header::CONTENT_TYPE, "application/octet-stream")
                .body(Body::from(bytes))
                .expect("status and header are always well-formed")
        }
        // Upstream posted Disconnect, or dropped the session without a
        // reply. HTTP/1.1 has no "respond with nothing" short of severing
        // the TCP connection, which hyper's Service abstraction does not
        // expose; `Connection: close` is the closest honest approximation
        // to "closes the connection" in §4.C.
        Ok(HttpReply::Disconnect) | Err(_) => {
            trace!(status = 503, reason = status::reason_phrase(503), %path, "responding");
            Response::builder()
                .status(StatusCode::SERVICE_UNAVAILABLE)
                .header(http::header::CONNECTION, "close")
                .body(Body::empty())
                .expect("status and header are always well-formed")
        }
    }
}

fn upgrade<U: Upstream + 'static>(handle: NodeHandle, upstream: Rc<U>, req: Request<Body>) -> Response<Body> {
    let key = match req.headers().get("sec-websocket-key") {
        Some(k) => k.clone(),
        None => return bad_request("WebSocket node"),
    };
    let accept = derive_accept_key(key.as_bytes());

    let response = Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(http::header::CONNECTION, "Upgrade")
        .header(http::header::UPGRADE, "websocket")
        .header("Sec-WebSocket-Accept", accept)
        .body(Body::empty())
        .expect("websocket handshake response is always well-formed");

    tokio::task::spawn_local(async move {
        match hyper::upgrade::on(req).await {
            Ok(upgraded) => drive_websocket(handle, upstream, upgraded).await,
            Err(e) => warn!(error = %e, "websocket upgrade failed"),
        }
    });

    response
}

async fn drive_websocket<U: Upstream + 'static>(handle: NodeHandle, upstream: Rc<U>, upgraded: Upgraded) {
    let ws = WebSocketStream::from_raw_socket(upgraded, Role::Server, None).await;
    debug!("websocket upgrade complete");
    match handle {
        NodeHandle::WsEcho(node) => drive_echo(node, upstream, ws).await,
        NodeHandle::WsPub(node) => drive_pub(node, upstream, ws).await,
        NodeHandle::Http(_) => unreachable!("route() only upgrades WS nodes"),
    }
    debug!("websocket connection task ended");
}

async fn drive_echo<U: Upstream + 'static>(
    node: Rc<WsEchoNode>,
    upstream: Rc<U>,
    ws: WebSocketStream<Upgraded>,
) {
    let (mut sink, mut stream) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<EchoCmd>();
    let addr = node.connect(upstream.as_ref(), tx);

    loop {
        tokio::select! {
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        node.data(upstream.as_ref(), addr, Bytes::from(text.into_bytes()));
                    }
                    Some(Ok(Message::Binary(bin))) => {
                        node.data(upstream.as_ref(), addr, Bytes::from(bin));
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "websocket read error");
                        break;
                    }
                }
            }
            cmd = rx.recv() => {
                match cmd {
                    Some(EchoCmd::Send(bytes)) => {
                        let text = String::from_utf8_lossy(&bytes).into_owned();
                        if sink.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Some(EchoCmd::Close) | None => break,
                }
            }
        }
    }
    let _ = sink.close().await;
    node.closed(upstream.as_ref(), addr);
}

async fn drive_pub<U: Upstream + 'static>(node: Rc<WsPubNode>, upstream: Rc<U>, ws: WebSocketStream<Upgraded>) {
    let (mut sink, mut stream) = ws.split();
    let (addr, sub) = node.connect(upstream.as_ref());

    if drain(&node, &sub, &mut sink).await.is_err() {
        node.closed(upstream.as_ref(), addr);
        return;
    }

    loop {
        tokio::select! {
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(error = %e, "websocket read error");
                        break;
                    }
                    // Subscribers do not inject data (§4.E).
                    Some(Ok(_)) => {}
                }
            }
            _ = sub.notified() => {
                if sub.is_closing() {
                    break;
                }
                if drain(&node, &sub, &mut sink).await.is_err() {
                    break;
                }
            }
        }
    }
    let _ = sink.close().await;
    node.closed(upstream.as_ref(), addr);
}

async fn drain(
    node: &WsPubNode,
    sub: &crate::node::ws_pub::Subscriber,
    sink: &mut futures_util::stream::SplitSink<WebSocketStream<Upgraded>, Message>,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    while let Some(payload) = node.next_payload(sub) {
        let text = String::from_utf8_lossy(&payload).into_owned();
        sink.send(Message::Text(text)).await?;
    }
    Ok(())
}
