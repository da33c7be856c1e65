//! The server entry point: [`ServerBuilder`] assembles a frozen route
//! table, middleware chain, and tunables into a [`Server`]; [`Server::launch`]
//! runs the accept loop under one of the three scheduling models in spec §5.

use crate::{
    errors::BuildError,
    http::types::Method,
    limits::{ConnLimits, ReqLimits, ServerLimits},
    middleware::Middleware,
    router::{ErrorHandler, Handler, Router, WsHandler},
    server::{
        connection::{self, ConnectionContext},
        tls,
    },
};
use crossbeam::queue::SegQueue;
use nix::{
    sys::signal::{self, SigHandler, Signal},
    unistd::{fork, ForkResult},
};
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;

/// Default bucket count for the router's literal-route hash table. Chosen
/// generously relative to typical route-table sizes so collisions stay
/// rare without the application needing to tune it.
const DEFAULT_BUCKET_COUNT: usize = 256;

/// The connection-scheduling model, selected once and fixed for the
/// server's lifetime (spec §5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scheduling {
    /// `tokio::spawn` one task per accepted connection. The default, and
    /// the async-native equivalent of thread-per-connection.
    #[default]
    Threads,
    /// Forks a child process per accepted connection; the child runs a
    /// single-connection Tokio runtime and exits when the connection ends.
    /// `SIGCHLD` is set to `SIG_IGN` so the kernel reaps children without
    /// the accept loop blocking on `waitpid` — unlike the source's
    /// `cwist_accept_socket`, which forks and waits inline and so
    /// serializes every connection through one process (see REDESIGN
    /// FLAGS).
    Fork,
    /// A fixed pool of [`ServerLimits::event_loop_workers`] tasks drains a
    /// shared queue of accepted connections; a small, bounded number of
    /// tasks multiplexes an unbounded number of connections, the
    /// application-level analogue of epoll/kqueue as a readiness
    /// multiplexer.
    EventLoop,
}

/// Configuration for the TLS-wrapped accept path (spec §4.7, §6).
struct TlsConfig {
    cert_path: PathBuf,
    key_path: PathBuf,
}

/// Assembles a [`Server`]: route table, middleware chain, TLS, scheduling
/// model, and tunables, per spec §6's configuration surface.
///
/// ```no_run
/// use cwist::{Server, StatusCode, Handled, Request, Response};
/// use async_trait::async_trait;
///
/// struct Hello;
///
/// #[async_trait]
/// impl cwist::Handler for Hello {
///     async fn call(&self, _req: &Request, resp: &mut Response) -> Handled {
///         resp.status(StatusCode::Ok).body("hello")
///     }
/// }
///
/// # #[tokio::main]
/// # async fn main() {
/// let listener = cwist::server::bind("127.0.0.1:8080".parse().unwrap(), 128).unwrap();
///
/// Server::builder()
///     .listener(listener)
///     .route(cwist::Method::Get, "/", Hello)
///     .build()
///     .unwrap()
///     .launch()
///     .await;
/// # }
/// ```
pub struct ServerBuilder {
    listener: Option<TcpListener>,
    tls: Option<TlsConfig>,
    scheduling: Scheduling,
    router: Router,
    middlewares: Vec<Arc<dyn Middleware>>,
    server_limits: ServerLimits,
    conn_limits: ConnLimits,
    req_limits: ReqLimits,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self {
            listener: None,
            tls: None,
            scheduling: Scheduling::default(),
            router: Router::new(DEFAULT_BUCKET_COUNT),
            middlewares: Vec::new(),
            server_limits: ServerLimits::default(),
            conn_limits: ConnLimits::default(),
            req_limits: ReqLimits::default(),
        }
    }
}

impl ServerBuilder {
    /// Sets the listening socket the server accepts connections on.
    /// **Required** — [`build`](Self::build) panics without it, the way a
    /// missing handler does in the teacher crate's own builder.
    ///
    /// Use [`crate::server::bind`] (spec §4.1) to construct one, or any
    /// other already-bound `tokio::net::TcpListener`.
    #[inline]
    pub fn listener(mut self, listener: TcpListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Enables TLS, loading the certificate chain and private key from PEM
    /// files at [`build`](Self::build) time (spec §4.7, §6).
    #[inline]
    pub fn tls(mut self, cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        self.tls = Some(TlsConfig {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
        });
        self
    }

    /// Selects the connection-scheduling model (default: [`Scheduling::Threads`]).
    #[inline]
    pub fn scheduling(mut self, scheduling: Scheduling) -> Self {
        self.scheduling = scheduling;
        self
    }

    /// Registers an HTTP route. Re-registering the same `(method, pattern)`
    /// replaces the earlier handler (router idempotence, spec §4.4).
    #[inline]
    pub fn route<H: Handler>(mut self, method: Method, pattern: &str, handler: H) -> Self {
        self.router.register_http(method, pattern, Arc::new(handler));
        self
    }

    /// Registers a WebSocket route. Always matched against `GET`, since
    /// RFC 6455 upgrades ride one.
    #[inline]
    pub fn ws_route<H: WsHandler>(mut self, pattern: &str, handler: H) -> Self {
        self.router.register_ws(pattern, Arc::new(handler));
        self
    }

    /// Registers a `(url_prefix, fs_root)` static file mapping (spec §4.4, §6).
    #[inline]
    pub fn static_route(mut self, url_prefix: &str, fs_root: impl Into<PathBuf>) -> Self {
        self.router.register_static(url_prefix, fs_root);
        self
    }

    /// Appends a middleware to the chain. Order is significant: the first
    /// middleware appended runs outermost (spec §4.5).
    #[inline]
    pub fn middleware<M: Middleware>(mut self, middleware: M) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    /// Installs the error handler invoked when routing finds no match,
    /// in place of the framework's default JSON 404.
    #[inline]
    pub fn error_handler<E: ErrorHandler>(mut self, handler: E) -> Self {
        self.router.set_error_handler(Arc::new(handler));
        self
    }

    /// Overrides server-level tunables (currently just the
    /// [`Scheduling::EventLoop`] worker-pool size).
    #[inline]
    pub fn server_limits(mut self, limits: ServerLimits) -> Self {
        self.server_limits = limits;
        self
    }

    /// Overrides connection-level I/O timeouts and per-connection request
    /// ceiling.
    #[inline]
    pub fn connection_limits(mut self, limits: ConnLimits) -> Self {
        self.conn_limits = limits;
        self
    }

    /// Overrides request parsing limits (read buffer ceiling, header
    /// count, max body size).
    #[inline]
    pub fn request_limits(mut self, limits: ReqLimits) -> Self {
        self.req_limits = limits;
        self
    }

    /// Finalizes the builder into a [`Server`] ready to [`launch`](Server::launch).
    ///
    /// # Panics
    ///
    /// Panics if [`listener`](Self::listener) was never called — a missing
    /// required builder field is a programmer error, not a runtime
    /// condition, matching the teacher crate's own builder.
    #[track_caller]
    pub fn build(self) -> Result<Server, BuildError> {
        let listener = self
            .listener
            .expect("The `listener` method must be called to create");

        let tls_acceptor = match self.tls {
            Some(cfg) => Some(tls::build_acceptor(&cfg.cert_path, &cfg.key_path)?),
            None => None,
        };

        let ctx = ConnectionContext {
            router: Arc::new(self.router),
            middlewares: Arc::new(self.middlewares),
            conn_limits: Arc::new(self.conn_limits),
            req_limits: Arc::new(self.req_limits),
        };

        Ok(Server {
            listener,
            tls_acceptor,
            scheduling: self.scheduling,
            server_limits: self.server_limits,
            ctx,
        })
    }
}

/// A fully configured server, ready to accept connections.
pub struct Server {
    listener: TcpListener,
    tls_acceptor: Option<TlsAcceptor>,
    scheduling: Scheduling,
    server_limits: ServerLimits,
    ctx: ConnectionContext,
}

impl Server {
    /// Starts building a [`Server`].
    #[inline]
    pub fn builder() -> ServerBuilder {
        ServerBuilder::default()
    }

    /// Accepts connections until a shutdown signal (`Ctrl-C` or `SIGTERM`)
    /// arrives, dispatching each according to the configured
    /// [`Scheduling`] model. In-flight connections are given their
    /// configured I/O timeout to drain — `launch` does not kill them, it
    /// simply stops accepting new ones and returns once the listener is
    /// dropped.
    pub async fn launch(self) {
        let Server {
            listener,
            tls_acceptor,
            scheduling,
            server_limits,
            ctx,
        } = self;

        match scheduling {
            Scheduling::Threads => run_threads(listener, tls_acceptor, ctx).await,
            Scheduling::Fork => run_fork(listener, tls_acceptor, ctx).await,
            Scheduling::EventLoop => {
                run_event_loop(listener, tls_acceptor, ctx, server_limits.event_loop_workers).await
            }
        }
    }
}

/// Resolves on `Ctrl-C` or, on Unix, `SIGTERM` — whichever arrives first.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install the Ctrl-C signal handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install the SIGTERM signal handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Runs one accepted connection to completion: the optional TLS handshake
/// (failures close the socket silently, per spec §4.7) followed by the
/// HTTP connection loop.
async fn handle_accepted(
    stream: TcpStream,
    client_addr: SocketAddr,
    server_addr: SocketAddr,
    tls_acceptor: Option<TlsAcceptor>,
    ctx: ConnectionContext,
) {
    match tls_acceptor {
        Some(acceptor) => {
            if let Ok(tls_stream) = acceptor.accept(stream).await {
                connection::serve(tls_stream, client_addr, server_addr, ctx).await;
            }
        }
        None => connection::serve(stream, client_addr, server_addr, ctx).await,
    }
}

async fn run_threads(listener: TcpListener, tls_acceptor: Option<TlsAcceptor>, ctx: ConnectionContext) {
    loop {
        tokio::select! {
            biased;

            () = shutdown_signal() => return,
            accepted = listener.accept() => {
                let Ok((stream, client_addr)) = accepted else { continue };
                let Ok(server_addr) = stream.local_addr() else { continue };

                let tls_acceptor = tls_acceptor.clone();
                let ctx = ctx.clone();
                tokio::spawn(handle_accepted(stream, client_addr, server_addr, tls_acceptor, ctx));
            }
        }
    }
}

/// Forks a child process per connection. `SIGCHLD` is ignored up front so
/// the kernel reaps exited children without the accept loop ever calling
/// `waitpid` — this is what keeps the accept loop non-blocking, unlike the
/// source's `cwist_accept_socket`.
async fn run_fork(listener: TcpListener, tls_acceptor: Option<TlsAcceptor>, ctx: ConnectionContext) {
    // SAFETY: installing a signal disposition before any connection is
    // forked; no other thread is touching signal state at this point.
    unsafe {
        let _ = signal::signal(Signal::SIGCHLD, SigHandler::SigIgn);
    }

    loop {
        tokio::select! {
            biased;

            () = shutdown_signal() => return,
            accepted = listener.accept() => {
                let Ok((stream, client_addr)) = accepted else { continue };
                let Ok(server_addr) = stream.local_addr() else { continue };

                let tls_acceptor = tls_acceptor.clone();
                let ctx = ctx.clone();

                // SAFETY: the child immediately builds a fresh single-threaded
                // runtime and never touches the parent's; it does not return
                // from this function, it exits the process once `handle_accepted`
                // completes.
                match unsafe { fork() } {
                    Ok(ForkResult::Parent { .. }) => drop(stream),
                    Ok(ForkResult::Child) => {
                        let runtime = tokio::runtime::Builder::new_current_thread()
                            .enable_all()
                            .build()
                            .expect("failed to build the per-connection runtime");
                        runtime.block_on(handle_accepted(stream, client_addr, server_addr, tls_acceptor, ctx));
                        std::process::exit(0);
                    }
                    Err(_) => drop(stream),
                }
            }
        }
    }
}

/// A fixed pool of worker tasks draining a shared lock-free queue of
/// accepted connections — the application-level analogue of epoll/kqueue
/// as a readiness multiplexer (spec §5).
async fn run_event_loop(
    listener: TcpListener,
    tls_acceptor: Option<TlsAcceptor>,
    ctx: ConnectionContext,
    workers: usize,
) {
    let queue: Arc<SegQueue<(TcpStream, SocketAddr, SocketAddr)>> = Arc::new(SegQueue::new());

    for _ in 0..workers.max(1) {
        let queue = queue.clone();
        let tls_acceptor = tls_acceptor.clone();
        let ctx = ctx.clone();

        tokio::spawn(async move {
            loop {
                match queue.pop() {
                    Some((stream, client_addr, server_addr)) => {
                        handle_accepted(stream, client_addr, server_addr, tls_acceptor.clone(), ctx.clone()).await;
                    }
                    None => tokio::task::yield_now().await,
                }
            }
        });
    }

    loop {
        tokio::select! {
            biased;

            () = shutdown_signal() => return,
            accepted = listener.accept() => {
                let Ok((stream, client_addr)) = accepted else { continue };
                let Ok(server_addr) = stream.local_addr() else { continue };
                queue.push((stream, client_addr, server_addr));
            }
        }
    }
}
