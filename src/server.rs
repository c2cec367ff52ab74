//! Server role: per accepted transport, run the opening handshake, start the
//! engine and hand the connection to the route's handler.
//!
//! ```rust,no_run
//! use wsengine::server::{Route, Server, handler_fn};
//! use wsengine::ServerConfig;
//!
//! # async fn run() -> wsengine::Result<()> {
//! let echo = Route::new(handler_fn(|conn, _path| async move {
//!     while let Some(msg) = conn.recv().await? {
//!         conn.send(msg).await?;
//!     }
//!     Ok::<(), wsengine::Error>(())
//! }));
//! Server::new(echo, ServerConfig::default()).listen("127.0.0.1:9001").await
//! # }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, ToSocketAddrs};
use tracing::{debug, error, warn};

use crate::codec::read_http_head;
use crate::config::ServerConfig;
use crate::connection::{Connection, ConnectionInfo, Role};
use crate::error::{Error, Result};
use crate::message::{CloseCode, CloseFrame};
use crate::protocol::handshake::{
    HandshakeRequest, HandshakeResponse, select_subprotocol, split_host_port, validate_origin,
};

/// Error type handlers may return.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Future returned by a [`Handler`].
pub type HandlerFuture = Pin<Box<dyn Future<Output = std::result::Result<(), BoxError>> + Send>>;

/// Per-connection application logic, called with the connection and the
/// request path (including any query string).
///
/// Returning does not close the connection by itself; the server closes it
/// with 1000 afterwards, or with 1011 if the handler failed or panicked.
pub type Handler = Arc<dyn Fn(Arc<Connection>, String) -> HandlerFuture + Send + Sync>;

/// Wrap an async closure as a [`Handler`].
pub fn handler_fn<F, Fut, E>(f: F) -> Handler
where
    F: Fn(Arc<Connection>, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<(), E>> + Send + 'static,
    E: Into<BoxError> + 'static,
{
    Arc::new(move |conn, path| {
        let fut = f(conn, path);
        Box::pin(async move { fut.await.map_err(Into::into) })
    })
}

/// What a path resolves to: a handler and the subprotocols it speaks.
#[derive(Clone)]
pub struct Route {
    pub handler: Handler,
    /// Supported subprotocols in server preference order, tried before the
    /// server-wide list.
    pub subprotocols: Vec<String>,
}

impl Route {
    #[must_use]
    pub fn new(handler: Handler) -> Self {
        Self {
            handler,
            subprotocols: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_subprotocol(mut self, protocol: impl Into<String>) -> Self {
        self.subprotocols.push(protocol.into());
        self
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("subprotocols", &self.subprotocols)
            .finish_non_exhaustive()
    }
}

/// Resolves a request path to a [`Route`]. `None` answers `404 Not Found`.
pub trait Router: Send + Sync + 'static {
    fn route(&self, path: &str) -> Option<Route>;
}

/// A single route serves every path.
impl Router for Route {
    fn route(&self, _path: &str) -> Option<Route> {
        Some(self.clone())
    }
}

/// Exact-match routing on the path without its query string.
#[derive(Clone, Default, Debug)]
pub struct PathRouter {
    routes: HashMap<String, Route>,
    fallback: Option<Route>,
}

impl PathRouter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_route(mut self, path: impl Into<String>, route: Route) -> Self {
        self.routes.insert(path.into(), route);
        self
    }

    /// Route used when no path matches.
    #[must_use]
    pub fn with_fallback(mut self, route: Route) -> Self {
        self.fallback = Some(route);
        self
    }
}

impl Router for PathRouter {
    fn route(&self, path: &str) -> Option<Route> {
        let path = path.split_once('?').map_or(path, |(path, _)| path);
        self.routes
            .get(path)
            .or(self.fallback.as_ref())
            .cloned()
    }
}

struct Accepted {
    route: Route,
    info: ConnectionInfo,
    leftover: BytesMut,
}

/// A failed handshake and the status to answer with, if any.
type Rejection = (Option<u16>, Error);

fn bad_request(err: Error) -> Rejection {
    (Some(400), err)
}

/// WebSocket server.
///
/// Cheap to clone; clones share the router and configuration.
#[derive(Clone)]
pub struct Server {
    router: Arc<dyn Router>,
    config: Arc<ServerConfig>,
}

impl Server {
    pub fn new(router: impl Router, config: ServerConfig) -> Self {
        Self {
            router: Arc::new(router),
            config: Arc::new(config),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind `addr` and serve until accepting fails.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if binding or accepting fails.
    pub async fn listen(self, addr: impl ToSocketAddrs) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    /// Accept connections from `listener`, serving each on its own task.
    ///
    /// With a TLS configuration every stream is wrapped before the opening
    /// handshake.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if accepting fails.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        #[cfg(feature = "tls-rustls")]
        let acceptor = self.config.tls.clone().map(crate::tls::TlsAcceptor::new);

        loop {
            let (stream, peer) = listener.accept().await?;
            if let Err(e) = stream.set_nodelay(true) {
                debug!(%peer, error = %e, "could not disable Nagle's algorithm");
            }
            debug!(%peer, "accepted");
            let server = self.clone();

            #[cfg(feature = "tls-rustls")]
            if let Some(acceptor) = acceptor.clone() {
                tokio::spawn(async move {
                    let timeout = server.config.connection.timeouts.handshake;
                    let stream = match tokio::time::timeout(timeout, acceptor.accept(stream)).await {
                        Ok(Ok(stream)) => stream,
                        Ok(Err(e)) => {
                            warn!(%peer, error = %e, "TLS handshake failed");
                            return;
                        }
                        Err(_) => {
                            warn!(%peer, "TLS handshake timed out");
                            return;
                        }
                    };
                    let _ = server.serve_connection(stream, true).await;
                });
                continue;
            }

            tokio::spawn(async move {
                let _ = server.serve_connection(stream, false).await;
            });
        }
    }

    /// Serve one accepted transport from the opening handshake to the end
    /// of the connection.
    ///
    /// Returns the connection's final close status. A failed handshake is
    /// answered with `400`, `403` or `404`, the transport is closed, and
    /// the handler never runs.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidHandshake` for a malformed request, an unknown path,
    ///   or a transport failure during the handshake
    /// - `Error::OriginNotAllowed` when the origin check fails; this is the
    ///   one handshake failure kept apart from `InvalidHandshake`, and
    ///   [`Error::is_handshake_failure`] covers both
    /// - `Error::Timeout` if the handshake takes too long
    pub async fn serve_connection<S>(&self, mut stream: S, secure: bool) -> Result<CloseFrame>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let timeout = self.config.connection.timeouts.handshake;
        let accepted = match tokio::time::timeout(timeout, self.handshake(&mut stream, secure)).await {
            Ok(accepted) => accepted,
            Err(elapsed) => Err((None, elapsed.into())),
        };

        let Accepted {
            route,
            info,
            leftover,
        } = match accepted {
            Ok(accepted) => accepted,
            Err((status, e)) => {
                warn!(status, error = %e, "opening handshake failed");
                if let Some(status) = status {
                    let response = HandshakeResponse::reject(status, reason_phrase(status));
                    let _ = stream.write_all(&response.to_bytes()).await;
                }
                let _ = stream.shutdown().await;
                return Err(match e {
                    Error::Timeout(_) => e,
                    e => e.into_handshake_error(),
                });
            }
        };

        let conn = Arc::new(Connection::from_handshake(
            stream,
            Role::Server,
            self.config.connection.clone(),
            info,
            &leftover,
        ));
        let path = conn.path().to_string();

        let handler = tokio::spawn((route.handler)(conn.clone(), path.clone()));
        let code = match handler.await {
            Ok(Ok(())) => CloseCode::Normal,
            Ok(Err(e)) => {
                error!(%path, error = %e, "connection handler failed");
                CloseCode::InternalError
            }
            Err(e) => {
                error!(%path, error = %e, "connection handler panicked");
                CloseCode::InternalError
            }
        };
        conn.close(code, "").await?;
        Ok(conn.wait_closed().await)
    }

    async fn handshake<S>(
        &self,
        stream: &mut S,
        secure: bool,
    ) -> std::result::Result<Accepted, Rejection>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut buf = BytesMut::with_capacity(1024);
        let head = read_http_head(stream, &self.config.connection.limits, &mut buf)
            .await
            .map_err(bad_request)?;
        let request = HandshakeRequest::parse(&head).map_err(bad_request)?;
        let key = request.validate().map_err(bad_request)?.to_string();

        let route = self.router.route(&request.path).ok_or_else(|| {
            (
                Some(404),
                Error::InvalidHandshake(format!("no route for {}", request.path)),
            )
        })?;

        validate_origin(request.origin(), self.config.origins.as_deref())
            .map_err(|e| (Some(403), e))?;

        let supported: Vec<String> = route
            .subprotocols
            .iter()
            .chain(&self.config.subprotocols)
            .cloned()
            .collect();
        let subprotocol = select_subprotocol(&request.subprotocols(), &supported);

        let authority = request.host().unwrap_or_default();
        let (host, port) = split_host_port(authority, secure).map_err(bad_request)?;

        let response = HandshakeResponse::accept(&key, subprotocol.as_deref()).map_err(bad_request)?;
        let written = async {
            stream.write_all(&response.to_bytes()).await?;
            stream.flush().await
        };
        written.await.map_err(|e| (None, Error::from(e)))?;

        debug!(
            path = %request.path,
            subprotocol = subprotocol.as_deref().unwrap_or(""),
            "opening handshake complete"
        );
        Ok(Accepted {
            route,
            info: ConnectionInfo {
                host,
                port,
                secure,
                path: request.path,
                subprotocol,
            },
            leftover: buf,
        })
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        403 => "Forbidden",
        404 => "Not Found",
        _ => "Bad Request",
    }
}
