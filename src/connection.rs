//! One accepted connection, from handshake to close.
//!
//! Each connection runs as its own task. It serves HTTP/1.1 or HTTP/2 through
//! hyper-util's `auto` builder and asks hyper for a graceful close when either
//! the server starts shutting down or the connection sits idle too long.
//! Graceful means in-flight requests finish first.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use http::Extensions;
use http_body_util::Full;
use hyper::body::{Body, Frame, Incoming, SizeHint};
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::{ConnContextHook, ConnState, ConnStateHook, ServerConfig};
use crate::error::Error;
use crate::request::{BodyDeadline, RemoteAddr};
use crate::response::HttpResponse;
use crate::router::Router;

/// hyper refuses HTTP/1 read buffers smaller than this.
const MIN_HTTP1_BUF: usize = 8192;

/// Per-connection settings derived once from the [`ServerConfig`].
pub(crate) struct ConnSettings {
    builder: ConnBuilder<TokioExecutor>,
    header_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    idle_timeout: Option<Duration>,
    conn_state: Option<ConnStateHook>,
    conn_context: Option<ConnContextHook>,
}

impl ConnSettings {
    pub(crate) fn new(config: &ServerConfig) -> Self {
        let header_timeout = config.effective_header_timeout();
        let max_header_bytes = config.effective_max_header_bytes();

        let mut builder = ConnBuilder::new(TokioExecutor::new());
        {
            let mut http1 = builder.http1();
            http1
                .timer(TokioTimer::new())
                .max_buf_size(max_header_bytes.max(MIN_HTTP1_BUF));
            if let Some(timeout) = header_timeout {
                http1.header_read_timeout(timeout);
            }
        }
        builder
            .http2()
            .timer(TokioTimer::new())
            .max_header_list_size(u32::try_from(max_header_bytes).unwrap_or(u32::MAX));

        Self {
            builder,
            header_timeout,
            read_timeout: config.effective_read_timeout(),
            write_timeout: config.effective_write_timeout(),
            idle_timeout: config.effective_idle_timeout(),
            conn_state: config.conn_state.clone(),
            conn_context: config.conn_context.clone(),
        }
    }

    /// Bound on a TLS handshake, which counts as reading the request head.
    pub(crate) fn handshake_timeout(&self) -> Option<Duration> {
        self.header_timeout
    }

    pub(crate) fn conn_state(&self) -> Option<&ConnStateHook> {
        self.conn_state.as_ref()
    }

    fn conn_extensions(&self, peer: SocketAddr) -> Extensions {
        let mut extensions = Extensions::new();
        if let Some(hook) = &self.conn_context {
            hook(peer, &mut extensions);
        }
        extensions
    }
}

// ── Open-connection accounting ────────────────────────────────────────────────

/// Counts one open connection for as long as it lives.
///
/// Created by the accept loop before the connection task is spawned, so the
/// count never lags behind an accepted socket.
pub(crate) struct ConnGuard {
    open: Arc<watch::Sender<usize>>,
    peer: SocketAddr,
    hook: Option<ConnStateHook>,
}

impl ConnGuard {
    pub(crate) fn new(
        open: Arc<watch::Sender<usize>>,
        peer: SocketAddr,
        hook: Option<ConnStateHook>,
    ) -> Self {
        open.send_modify(|n| *n += 1);
        if let Some(hook) = &hook {
            hook(peer, ConnState::New);
        }
        Self { open, peer, hook }
    }
}

impl Drop for ConnGuard {
    fn drop(&mut self) {
        if let Some(hook) = &self.hook {
            hook(self.peer, ConnState::Closed);
        }
        self.open.send_modify(|n| *n = n.saturating_sub(1));
    }
}

// ── Request activity ──────────────────────────────────────────────────────────

/// Tracks requests in flight on one connection and when it last went idle.
struct Activity {
    peer: SocketAddr,
    in_flight: AtomicUsize,
    idle_since: Mutex<Instant>,
    hook: Option<ConnStateHook>,
}

impl Activity {
    fn new(peer: SocketAddr, hook: Option<ConnStateHook>) -> Self {
        Self {
            peer,
            in_flight: AtomicUsize::new(0),
            idle_since: Mutex::new(Instant::now()),
            hook,
        }
    }

    fn begin(self: &Arc<Self>) -> InFlight {
        if self.in_flight.fetch_add(1, Ordering::AcqRel) == 0 {
            self.report(ConnState::Active);
        }
        InFlight(Arc::clone(self))
    }

    fn end(&self) {
        *self.idle_since.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
        if self.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.report(ConnState::Idle);
        }
    }

    /// When the connection should be closed for idleness, if nothing happens
    /// before then.
    fn idle_deadline(&self, limit: Duration) -> Instant {
        if self.in_flight.load(Ordering::Acquire) > 0 {
            return Instant::now() + limit;
        }
        *self.idle_since.lock().unwrap_or_else(PoisonError::into_inner) + limit
    }

    fn is_idle_past(&self, limit: Duration) -> bool {
        self.in_flight.load(Ordering::Acquire) == 0
            && self.idle_since.lock().unwrap_or_else(PoisonError::into_inner).elapsed() >= limit
    }

    fn report(&self, state: ConnState) {
        if let Some(hook) = &self.hook {
            hook(self.peer, state);
        }
    }
}

/// Marks a request as in flight until dropped, including when hyper drops
/// the request future early.
struct InFlight(Arc<Activity>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.end();
    }
}

/// Response body that keeps its request in flight until hyper has written
/// the last frame and dropped it.
struct TrackedBody {
    inner: Full<Bytes>,
    _in_flight: InFlight,
}

impl Body for TrackedBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, Infallible>>> {
        Pin::new(&mut self.inner).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

// ── Serving ───────────────────────────────────────────────────────────────────

/// Serves every request on `io` until the client leaves, an idle timeout
/// fires, or `shutdown` flips to `true`.
pub(crate) async fn serve<I>(
    io: I,
    peer: SocketAddr,
    router: Arc<Router>,
    settings: Arc<ConnSettings>,
    mut shutdown: watch::Receiver<bool>,
) where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let activity = Arc::new(Activity::new(peer, settings.conn_state.clone()));
    let extensions = Arc::new(settings.conn_extensions(peer));

    let svc = {
        let activity = Arc::clone(&activity);
        let settings = Arc::clone(&settings);
        // Called once per request on the connection, not once per connection.
        service_fn(move |mut req: hyper::Request<Incoming>| {
            let router = Arc::clone(&router);
            let settings = Arc::clone(&settings);
            req.extensions_mut().extend(Extensions::clone(&extensions));
            let in_flight = activity.begin();
            async move {
                let response = handle(router, &settings, req, peer).await?;
                Ok::<_, Error>(response.map(|inner| TrackedBody { inner, _in_flight: in_flight }))
            }
        })
    };

    let conn = settings
        .builder
        .serve_connection_with_upgrades(TokioIo::new(io), svc);
    tokio::pin!(conn);

    let mut closing = false;
    loop {
        if !closing && *shutdown.borrow_and_update() {
            debug!(%peer, "server shutting down, closing connection gracefully");
            conn.as_mut().graceful_shutdown();
            closing = true;
        }

        let idle_deadline = settings
            .idle_timeout
            .map(|limit| activity.idle_deadline(limit))
            .unwrap_or_else(Instant::now);

        tokio::select! {
            res = conn.as_mut() => {
                if let Err(e) = res {
                    debug!(%peer, "connection error: {e}");
                }
                break;
            }

            changed = shutdown.changed(), if !closing => {
                if changed.is_err() {
                    // The server is gone; nothing will ever signal again.
                    conn.as_mut().graceful_shutdown();
                    closing = true;
                }
            }

            () = tokio::time::sleep_until(idle_deadline), if !closing && settings.idle_timeout.is_some() => {
                if settings.idle_timeout.is_some_and(|limit| activity.is_idle_past(limit)) {
                    debug!(%peer, "closing idle connection");
                    conn.as_mut().graceful_shutdown();
                    closing = true;
                }
            }
        }
    }
}

/// Attaches connection facts to the request and runs it through the router,
/// bounded by the write timeout.
async fn handle(
    router: Arc<Router>,
    settings: &ConnSettings,
    mut req: hyper::Request<Incoming>,
    peer: SocketAddr,
) -> Result<HttpResponse, Error> {
    req.extensions_mut().insert(RemoteAddr(peer));
    if let Some(limit) = settings.read_timeout {
        req.extensions_mut().insert(BodyDeadline(Instant::now() + limit));
    }

    match settings.write_timeout {
        Some(limit) => {
            let method = req.method().clone();
            let path = req.uri().path().to_owned();
            tokio::time::timeout(limit, router.dispatch(req))
                .await
                .map_err(|_| {
                    warn!(
                        %peer,
                        %method,
                        %path,
                        timeout_ms = limit.as_millis() as u64,
                        "write timeout, aborting connection"
                    );
                    Error::WriteTimeout
                })
        }
        None => Ok(router.dispatch(req).await),
    }
}
