//! Client role: open a transport, run the opening handshake, start the engine.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::codec::read_http_head;
use crate::config::ClientConfig;
use crate::connection::{Connection, ConnectionInfo, Role};
use crate::error::{Error, Result};
use crate::protocol::handshake::{HandshakeRequest, HandshakeResponse, WsUri, generate_key};

/// Connect to a `ws://` or `wss://` URI.
///
/// Opens a TCP connection, wraps it in TLS for `wss://`, and runs the opening
/// handshake. Everything up to the `101` response is bounded by
/// [`Timeouts::handshake`](crate::Timeouts::handshake).
///
/// # Errors
///
/// - `Error::InvalidUri` for a malformed URI
/// - `Error::Io` if the TCP connection fails
/// - `Error::Tls` if TLS setup fails, or for `wss://` without the
///   `tls-rustls` feature
/// - `Error::InvalidHandshake` if the server's response is not a valid upgrade
/// - `Error::Timeout` if the handshake takes too long
///
/// # Example
///
/// ```rust,no_run
/// use wsengine::{ClientConfig, Message, connect};
///
/// # async fn run() -> wsengine::Result<()> {
/// let config = ClientConfig::new().with_subprotocol("chat");
/// let conn = connect("ws://127.0.0.1:9001/", config).await?;
/// conn.send(Message::text("hi")).await?;
/// # Ok(())
/// # }
/// ```
pub async fn connect(uri: &str, config: ClientConfig) -> Result<Connection> {
    let target = WsUri::parse(uri)?;
    let timeout = config.connection.timeouts.handshake;

    tokio::time::timeout(timeout, async {
        let stream = TcpStream::connect((target.host.as_str(), target.port)).await?;
        stream.set_nodelay(true)?;
        debug!(host = %target.host, port = target.port, secure = target.secure, "transport connected");

        if target.secure {
            connect_tls(stream, &target, config).await
        } else {
            handshake(stream, &target, config).await
        }
    })
    .await?
}

#[cfg(feature = "tls-rustls")]
async fn connect_tls(stream: TcpStream, target: &WsUri, config: ClientConfig) -> Result<Connection> {
    use crate::tls::{TlsConnector, default_client_config};

    let tls = match &config.tls {
        Some(tls) => tls.clone(),
        None => default_client_config()?,
    };
    let stream = TlsConnector::new(tls).connect(&target.host, stream).await?;
    handshake(stream, target, config).await
}

#[cfg(not(feature = "tls-rustls"))]
async fn connect_tls(_stream: TcpStream, _target: &WsUri, _config: ClientConfig) -> Result<Connection> {
    Err(Error::Tls("wss:// requires the tls-rustls feature".into()))
}

/// Run the client handshake over a transport the caller already opened.
///
/// `uri` supplies the request target and the `Host` header; its scheme sets
/// the connection's `secure` attribute but no TLS is added here.
///
/// # Errors
///
/// Same as [`connect`], minus transport setup failures.
pub async fn connect_with_stream<S>(stream: S, uri: &str, config: ClientConfig) -> Result<Connection>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let target = WsUri::parse(uri)?;
    let timeout = config.connection.timeouts.handshake;
    tokio::time::timeout(timeout, handshake(stream, &target, config)).await?
}

async fn handshake<S>(mut stream: S, target: &WsUri, config: ClientConfig) -> Result<Connection>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let exchanged = async {
        let key = generate_key()?;
        let request = HandshakeRequest::client(
            &target.resource,
            &target.host_header(),
            &key,
            &config.subprotocols,
            config.origin.as_deref(),
            &config.extra_headers,
        )?;
        stream.write_all(&request.to_bytes()).await?;
        stream.flush().await?;

        let mut buf = BytesMut::with_capacity(1024);
        let head = read_http_head(&mut stream, &config.connection.limits, &mut buf).await?;
        let response = HandshakeResponse::parse(&head)?;
        let subprotocol = response.verify(&key, &config.subprotocols)?;
        Ok::<_, Error>((subprotocol, buf))
    }
    .await;

    let (subprotocol, leftover) = match exchanged {
        Ok(done) => done,
        Err(e) => {
            let e = e.into_handshake_error();
            warn!(host = %target.host, path = %target.resource, error = %e, "opening handshake failed");
            return Err(e);
        }
    };

    debug!(
        host = %target.host,
        path = %target.resource,
        subprotocol = subprotocol.as_deref().unwrap_or(""),
        "opening handshake complete"
    );
    let info = ConnectionInfo {
        host: target.host.clone(),
        port: target.port,
        secure: target.secure,
        path: target.resource.clone(),
        subprotocol,
    };
    Ok(Connection::from_handshake(
        stream,
        Role::Client,
        config.connection,
        info,
        &leftover,
    ))
}
