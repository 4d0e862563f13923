//! Tokio/hyper implementation of [`ProxyEngine`].
//!
//! Each listener owns a `TcpListener` and, once committed, an accept loop
//! task. Every accepted connection is served by hyper's auto (HTTP/1 and
//! HTTP/2) connection builder in its own task, tracked in a per-listener
//! `JoinSet` so the engine can drain it: on release the accept loop stops,
//! each connection is told to shut down gracefully, and whatever is still
//! open at the deadline is aborted or detached per the [`DrainPolicy`].
//!
//! All listeners share one [`ProxyState`]: the upstream HTTP client and
//! the current [`RouteTable`], replaced whole on commit.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ConnectInfo;
use axum::Router;
use hyper::body::Incoming;
use hyper::Request;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tokio_rustls::TlsAcceptor;
use tower::Service;
use tower_http::trace::TraceLayer;

use super::{tls, DrainPolicy, DrainReport, OnTimeout, ProxyEngine};
use crate::config::{ListenerKey, ListenerSpec, Scheme};
use crate::error::ProxyHostError;
use crate::proxy;
use crate::proxy::routing::RouteTable;

pub type HttpsConnector =
    hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>;
pub type HttpClient = Client<HttpsConnector, http_body_util::Full<bytes::Bytes>>;

/// State shared by every listener of one engine.
pub struct ProxyState {
    pub routes: RwLock<Arc<RouteTable>>,
    pub http_client: HttpClient,
}

/// Per-listener handler state.
pub struct ListenerContext {
    pub proxy: Arc<ProxyState>,
    pub scheme: Scheme,
}

#[must_use]
pub fn build_http_client() -> HttpClient {
    // When multiple rustls crypto providers are compiled in, rustls cannot
    // auto-detect which one to use. Explicitly install `ring`.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let https = hyper_rustls::HttpsConnectorBuilder::new()
        .with_webpki_roots()
        .https_or_http()
        .enable_http1()
        .build();
    Client::builder(TokioExecutor::new())
        .pool_idle_timeout(Duration::from_secs(30))
        .build(https)
}

pub fn build_router(ctx: Arc<ListenerContext>) -> Router {
    Router::new()
        .fallback(proxy::forward_handler)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

struct PendingListener {
    spec: ListenerSpec,
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
}

struct ServingListener {
    shutdown: watch::Sender<bool>,
    accept_loop: JoinHandle<JoinSet<()>>,
}

#[derive(Default)]
struct Listeners {
    pending: BTreeMap<ListenerKey, PendingListener>,
    serving: BTreeMap<ListenerKey, ServingListener>,
}

pub struct HttpEngine {
    proxy: Arc<ProxyState>,
    listeners: Mutex<Listeners>,
}

impl Default for HttpEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpEngine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            proxy: Arc::new(ProxyState {
                routes: RwLock::new(Arc::new(RouteTable::empty())),
                http_client: build_http_client(),
            }),
            listeners: Mutex::new(Listeners::default()),
        }
    }
}

#[async_trait]
impl ProxyEngine for HttpEngine {
    async fn bind(&self, spec: &ListenerSpec) -> Result<SocketAddr, ProxyHostError> {
        let addr = spec.socket_addr();

        let tls = match (spec.scheme, &spec.tls) {
            (Scheme::Https, Some(material)) => Some(tls::load_acceptor(addr, material)?),
            (Scheme::Https, None) => {
                return Err(ProxyHostError::Tls {
                    addr,
                    message: "https listener has no TLS material".into(),
                })
            }
            (Scheme::Http, _) => None,
        };

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ProxyHostError::Bind { addr, source })?;
        let local = listener.local_addr().unwrap_or(addr);

        tracing::debug!(addr = %local, scheme = spec.scheme.as_str(), "listener bound");
        self.listeners.lock().await.pending.insert(
            spec.key,
            PendingListener {
                spec: spec.clone(),
                listener,
                tls,
            },
        );
        Ok(local)
    }

    async fn commit(&self, routes: Arc<RouteTable>) {
        let route_count = routes.routes.len();
        *self.proxy.routes.write().await = routes;

        let mut listeners = self.listeners.lock().await;
        let pending = std::mem::take(&mut listeners.pending);
        for (key, p) in pending {
            let ctx = Arc::new(ListenerContext {
                proxy: Arc::clone(&self.proxy),
                scheme: p.spec.scheme,
            });
            let (shutdown, rx) = watch::channel(false);
            let accept_loop = tokio::spawn(accept_loop(p.listener, p.tls, build_router(ctx), rx));
            tracing::info!(addr = %key, scheme = p.spec.scheme.as_str(), "listener serving");
            listeners.serving.insert(
                key,
                ServingListener {
                    shutdown,
                    accept_loop,
                },
            );
        }
        tracing::debug!(routes = route_count, "route table committed");
    }

    async fn release(&self, keys: &[ListenerKey], policy: DrainPolicy) -> DrainReport {
        let mut report = DrainReport::default();
        let mut draining = Vec::new();
        {
            let mut listeners = self.listeners.lock().await;
            for key in keys {
                if listeners.pending.remove(key).is_some() {
                    report.listeners += 1;
                }
                if let Some(serving) = listeners.serving.remove(key) {
                    report.listeners += 1;
                    let _ = serving.shutdown.send(true);
                    draining.push((*key, serving));
                }
            }
        }

        // One deadline for the whole release, not one per listener.
        let deadline = tokio::time::Instant::now() + policy.grace;
        for (key, serving) in draining {
            report.absorb(drain(key, serving, deadline, policy.on_timeout).await);
            tracing::info!(addr = %key, "listener released");
        }
        report
    }

    async fn listeners(&self) -> Vec<ListenerKey> {
        let listeners = self.listeners.lock().await;
        listeners
            .pending
            .keys()
            .chain(listeners.serving.keys())
            .copied()
            .collect()
    }
}

/// Wait for one listener's connections until `deadline`, then apply
/// `on_timeout` to the rest.
async fn drain(
    key: ListenerKey,
    serving: ServingListener,
    deadline: tokio::time::Instant,
    on_timeout: OnTimeout,
) -> DrainReport {
    let mut report = DrainReport::default();
    let mut connections = match serving.accept_loop.await {
        Ok(set) => set,
        Err(e) => {
            tracing::warn!(addr = %key, error = %e, "accept loop ended abnormally");
            return report;
        }
    };
    loop {
        match tokio::time::timeout_at(deadline, connections.join_next()).await {
            Ok(Some(_)) => report.drained += 1,
            Ok(None) => break,
            Err(_) => {
                let remaining = connections.len();
                match on_timeout {
                    OnTimeout::ForceClose => {
                        connections.abort_all();
                        while connections.join_next().await.is_some() {}
                        report.forced += remaining;
                    }
                    OnTimeout::Detach => {
                        connections.detach_all();
                        report.detached += remaining;
                    }
                }
                tracing::warn!(
                    addr = %key,
                    connections = remaining,
                    action = ?on_timeout,
                    "drain grace expired"
                );
                break;
            }
        }
    }
    report
}

/// Resolves once the shutdown flag is raised or its sender is gone. The
/// borrowed value is dropped before returning so callers stay `Send`.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Accept until told to stop, then hand back the live connections.
async fn accept_loop(
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    router: Router,
    mut shutdown: watch::Receiver<bool>,
) -> JoinSet<()> {
    let per_connection = shutdown.clone();
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            () = stopped(&mut shutdown) => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    connections.spawn(serve_connection(
                        stream,
                        peer,
                        tls.clone(),
                        router.clone(),
                        per_connection.clone(),
                    ));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
    connections
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    tls: Option<TlsAcceptor>,
    router: Router,
    mut shutdown: watch::Receiver<bool>,
) {
    let Some(acceptor) = tls else {
        drive(TokioIo::new(stream), peer, router, shutdown).await;
        return;
    };
    let handshake = tokio::select! {
        result = acceptor.accept(stream) => result,
        () = stopped(&mut shutdown) => return,
    };
    match handshake {
        Ok(stream) => drive(TokioIo::new(stream), peer, router, shutdown).await,
        Err(e) => tracing::debug!(peer = %peer, error = %e, "TLS handshake failed"),
    }
}

async fn drive<I>(io: I, peer: SocketAddr, router: Router, mut shutdown: watch::Receiver<bool>)
where
    I: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
{
    let service = hyper::service::service_fn(move |mut req: Request<Incoming>| {
        req.extensions_mut().insert(ConnectInfo(peer));
        router.clone().call(req)
    });

    let builder = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new());
    let conn = builder.serve_connection(io, service);
    tokio::pin!(conn);

    let mut draining = false;
    loop {
        tokio::select! {
            result = conn.as_mut() => {
                if let Err(e) = result {
                    tracing::debug!(peer = %peer, error = %e, "connection closed with error");
                }
                break;
            }
            () = stopped(&mut shutdown), if !draining => {
                draining = true;
                conn.as_mut().graceful_shutdown();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    fn loopback_spec() -> ListenerSpec {
        ListenerSpec {
            key: ListenerKey {
                addr: "127.0.0.1".parse().unwrap(),
                port: 0,
            },
            scheme: Scheme::Http,
            tls: None,
        }
    }

    #[tokio::test]
    async fn release_drains_idle_keep_alive_connection() {
        let engine = HttpEngine::new();
        let spec = loopback_spec();
        let local = engine.bind(&spec).await.unwrap();
        engine.commit(Arc::new(RouteTable::empty())).await;

        let mut stream = TcpStream::connect(local).await.unwrap();
        stream
            .write_all(b"GET /nothing HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        let mut buf = [0u8; 512];
        let n = stream.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).starts_with("HTTP/1.1 404"));

        let report = engine
            .release(&[spec.key], DrainPolicy::force_close(Duration::from_secs(2)))
            .await;
        assert_eq!(report.listeners, 1);
        assert_eq!(report.drained, 1);
        assert!(!report.timed_out());
        assert!(engine.listeners().await.is_empty());
    }

    #[tokio::test]
    async fn release_of_uncommitted_listener_frees_it() {
        let engine = HttpEngine::new();
        let spec = loopback_spec();
        let local = engine.bind(&spec).await.unwrap();
        assert_eq!(engine.listeners().await, vec![spec.key]);

        let report = engine
            .release(&[spec.key], DrainPolicy::detach(Duration::ZERO))
            .await;
        assert_eq!(report.listeners, 1);
        assert_eq!(report.drained, 0);
        assert!(std::net::TcpListener::bind(local).is_ok());
    }
}
