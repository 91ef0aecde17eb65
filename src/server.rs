//! HTTP server lifecycle and graceful shutdown.
//!
//! A [`Server`] is single-use and moves through four states:
//!
//! ```text
//! Created ──run──▶ Running ──shutdown──▶ ShuttingDown ──drained──▶ Stopped
//!    └──────────────────────shutdown──────────────────────────────────┘
//! ```
//!
//! On [`shutdown`](Server::shutdown) the server:
//! 1. Stops accepting. [`run`](Server::run) returns `Ok(())` once the
//!    listener is closed.
//! 2. Asks every open connection to close once its in-flight requests finish.
//!    Idle keep-alive connections close right away.
//! 3. Waits for the open-connection count to reach zero, or for the deadline.
//!
//! A missed deadline is reported to the caller but never aborts a request:
//! the remaining connections keep running to completion in the background.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::connection::{self, ConnGuard, ConnSettings};
use crate::error::Error;
use crate::router::Router;
use crate::tls;

/// Back-off after a failed `accept`, so a full file-descriptor table does not
/// turn the accept loop into a busy loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Where a [`Server`] is in its lifecycle.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum State {
    Created,
    Running,
    ShuttingDown,
    Stopped,
}

#[derive(Clone, Copy, Debug)]
enum Listening {
    Pending,
    Bound(SocketAddr),
    Closed,
}

struct Shared {
    state: Mutex<State>,
    shutdown: watch::Sender<bool>,
    open: Arc<watch::Sender<usize>>,
    listening: watch::Sender<Listening>,
}

/// The HTTP server.
///
/// Clones are handles to the same server, which is how one task calls
/// [`run`](Server::run) while another calls [`shutdown`](Server::shutdown).
///
/// # Example
///
/// ```rust,no_run
/// use std::time::Duration;
/// use mvc::{Router, Server, ServerConfig};
///
/// # async fn demo(router: Router) -> Result<(), mvc::Error> {
/// let server = Server::new(ServerConfig::new(":8080"), router);
///
/// let handle = server.clone();
/// tokio::spawn(async move {
///     let _ = mvc::shutdown_signal().await;
///     if let Err(e) = handle.shutdown_timeout(Duration::from_secs(30)).await {
///         eprintln!("forced shutdown: {e}");
///     }
/// });
///
/// server.run().await
/// # }
/// ```
#[derive(Clone)]
pub struct Server {
    config: ServerConfig,
    router: Arc<Router>,
    shared: Arc<Shared>,
}

impl Server {
    /// Creates a server in the [`State::Created`] state. Nothing is bound
    /// until [`run`](Server::run).
    ///
    /// The router is frozen from here on.
    pub fn new(config: ServerConfig, router: Router) -> Self {
        Self {
            config,
            router: Arc::new(router),
            shared: Arc::new(Shared {
                state: Mutex::new(State::Created),
                shutdown: watch::Sender::new(false),
                open: Arc::new(watch::Sender::new(0)),
                listening: watch::Sender::new(Listening::Pending),
            }),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn state(&self) -> State {
        *self.lock_state()
    }

    /// Number of accepted connections that have not closed yet.
    pub fn open_connections(&self) -> usize {
        *self.shared.open.borrow()
    }

    /// Waits until [`run`](Server::run) has bound its listener and returns
    /// the bound address, which is how callers learn the port chosen for
    /// `":0"`. Returns `None` if the server stopped without binding.
    ///
    /// Never resolves for a server nobody runs or shuts down.
    pub async fn listening(&self) -> Option<SocketAddr> {
        let mut rx = self.shared.listening.subscribe();
        let result = rx.wait_for(|l| !matches!(l, Listening::Pending)).await;
        match result.as_deref() {
            Ok(Listening::Bound(addr)) => Some(*addr),
            _ => None,
        }
    }

    /// Binds the configured address and serves connections until
    /// [`shutdown`](Server::shutdown) is called.
    ///
    /// Returns `Ok(())` after a requested shutdown has closed the listener.
    /// In-flight connections may still be draining at that point.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyRunning`] if `run` is active on another handle.
    /// - [`Error::ServerClosed`] if the server was already shut down.
    /// - [`Error::Io`] or [`Error::Tls`] if the listener or TLS material
    ///   could not be set up. The server is then [`State::Stopped`].
    pub async fn run(&self) -> Result<(), Error> {
        {
            let mut state = self.lock_state();
            match *state {
                State::Created => *state = State::Running,
                State::Running => return Err(Error::AlreadyRunning),
                State::ShuttingDown | State::Stopped => return Err(Error::ServerClosed),
            }
        }

        let result = self.accept_loop().await;
        self.shared.listening.send_replace(Listening::Closed);

        if let Err(e) = &result {
            error!("server failed: {e}");
            *self.lock_state() = State::Stopped;
        }
        result
    }

    /// Stops the server and waits for open connections to finish, up to
    /// `deadline`.
    ///
    /// Safe to call more than once, from any handle. Calling it on a server
    /// that never ran moves it straight to [`State::Stopped`].
    ///
    /// # Errors
    ///
    /// [`Error::DeadlineExceeded`] if connections are still open at
    /// `deadline`. They are left to finish on their own.
    pub async fn shutdown(&self, deadline: Instant) -> Result<(), Error> {
        {
            let mut state = self.lock_state();
            match *state {
                State::Created => {
                    *state = State::Stopped;
                    self.shared.shutdown.send_replace(true);
                    self.shared.listening.send_replace(Listening::Closed);
                    return Ok(());
                }
                State::Stopped => return Ok(()),
                State::Running => *state = State::ShuttingDown,
                State::ShuttingDown => {}
            }
        }

        info!(open_connections = self.open_connections(), "shutting down");
        self.shared.shutdown.send_replace(true);

        match tokio::time::timeout_at(deadline, self.drained()).await {
            Ok(()) => {
                let mut state = self.lock_state();
                if *state == State::ShuttingDown {
                    *state = State::Stopped;
                }
                info!("server stopped");
                Ok(())
            }
            Err(_) => {
                let open_connections = self.open_connections();
                warn!(open_connections, "shutdown deadline exceeded");
                Err(Error::DeadlineExceeded { open_connections })
            }
        }
    }

    /// [`shutdown`](Server::shutdown) with a deadline `timeout` from now.
    pub async fn shutdown_timeout(&self, timeout: Duration) -> Result<(), Error> {
        self.shutdown(Instant::now() + timeout).await
    }

    async fn accept_loop(&self) -> Result<(), Error> {
        let acceptor = self.config.tls.as_ref().map(tls::build_acceptor).transpose()?;

        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        let local_addr = listener.local_addr()?;
        self.shared.listening.send_replace(Listening::Bound(local_addr));
        info!(addr = %local_addr, tls = acceptor.is_some(), "mvc listening");

        let settings = Arc::new(ConnSettings::new(&self.config));
        let mut shutdown = self.shared.shutdown.subscribe();

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            tokio::select! {
                // Checked first so a shutdown stops accepting even when more
                // connections are queued.
                biased;

                _ = shutdown.changed() => {}

                res = listener.accept() => {
                    let (stream, peer) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                            continue;
                        }
                    };
                    self.spawn_connection(stream, peer, acceptor.clone(), &settings);
                }
            }
        }

        info!(
            open_connections = self.open_connections(),
            "listener closed, draining connections"
        );
        Ok(())
    }

    fn spawn_connection(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        acceptor: Option<TlsAcceptor>,
        settings: &Arc<ConnSettings>,
    ) {
        // Counted before the task exists so a concurrent shutdown waits for it.
        let guard = ConnGuard::new(
            Arc::clone(&self.shared.open),
            peer,
            settings.conn_state().cloned(),
        );
        let router = Arc::clone(&self.router);
        let settings = Arc::clone(settings);
        let shutdown = self.shared.shutdown.subscribe();

        tokio::spawn(async move {
            let _guard = guard;
            let Some(acceptor) = acceptor else {
                connection::serve(stream, peer, router, settings, shutdown).await;
                return;
            };

            let handshake = acceptor.accept(stream);
            let stream = match settings.handshake_timeout() {
                Some(limit) => match tokio::time::timeout(limit, handshake).await {
                    Ok(res) => res,
                    Err(_) => {
                        debug!(%peer, "TLS handshake timed out");
                        return;
                    }
                },
                None => handshake.await,
            };

            match stream {
                Ok(stream) => connection::serve(stream, peer, router, settings, shutdown).await,
                Err(e) => debug!(%peer, "TLS handshake failed: {e}"),
            }
        });
    }

    /// Resolves once the listener is closed and every connection is gone.
    async fn drained(&self) {
        let mut listening = self.shared.listening.subscribe();
        let _ = listening
            .wait_for(|l| matches!(l, Listening::Closed))
            .await
            .map(|_| ());

        let mut open = self.shared.open.subscribe();
        let _ = open.wait_for(|n| *n == 0).await.map(|_| ());
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first shutdown signal the process receives.
///
/// On Unix this listens for both **SIGTERM** (sent by container orchestrators)
/// and **SIGINT** (Ctrl-C). Elsewhere only Ctrl-C is available.
pub async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res,
            _ = sigterm.recv() => Ok(()),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> Server {
        Server::new(ServerConfig::new("127.0.0.1:0"), Router::new())
    }

    #[tokio::test]
    async fn shutdown_before_run_stops_the_server() {
        let server = server();
        assert_eq!(server.state(), State::Created);

        server.shutdown_timeout(Duration::from_millis(10)).await.unwrap();
        assert_eq!(server.state(), State::Stopped);
        assert_eq!(server.listening().await, None);
        assert!(server.run().await.unwrap_err().is_server_closed());
    }

    #[tokio::test]
    async fn run_reports_bind_failures() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap().to_string();

        let server = Server::new(ServerConfig::new(addr), Router::new());
        assert!(matches!(server.run().await, Err(Error::Io(_))));
        assert_eq!(server.state(), State::Stopped);
        assert_eq!(server.listening().await, None);
    }

    #[tokio::test]
    async fn run_then_shutdown_returns_ok() {
        let server = server();
        let running = tokio::spawn({
            let server = server.clone();
            async move { server.run().await }
        });

        let addr = server.listening().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(server.state(), State::Running);
        assert!(matches!(server.run().await, Err(Error::AlreadyRunning)));

        server.shutdown_timeout(Duration::from_secs(1)).await.unwrap();
        running.await.unwrap().unwrap();
        assert_eq!(server.state(), State::Stopped);
        assert_eq!(server.open_connections(), 0);

        // Idempotent.
        server.shutdown_timeout(Duration::from_secs(1)).await.unwrap();
    }
}
