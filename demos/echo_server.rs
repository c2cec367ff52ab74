//! WebSocket echo server.
//!
//! Run with: `RUST_LOG=debug cargo run --example echo_server`
//! Then connect with: `cargo run --example client`

use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;
use wsengine::{Config, Message, PathRouter, Route, ServerConfig, Server, handler_fn};

const ADDR: &str = "127.0.0.1:9001";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let echo = Route::new(handler_fn(|conn, path| async move {
        info!(%path, peer_host = conn.host(), "client connected");
        while let Some(msg) = conn.recv().await? {
            match &msg {
                Message::Text(text) => info!(%text, "echoing text"),
                Message::Binary(data) => info!(len = data.len(), "echoing binary"),
            }
            conn.send(msg).await?;
        }
        info!(%path, code = ?conn.close_code(), "client left");
        Ok::<_, wsengine::Error>(())
    }));

    let router = PathRouter::new()
        .with_route("/chat", echo.clone().with_subprotocol("chat"))
        .with_fallback(echo);

    let connection = Config::default()
        .with_ping_interval(Duration::from_secs(20))
        .with_ping_timeout(Duration::from_secs(20));
    let config = ServerConfig::new().with_connection(connection);

    info!("listening on ws://{ADDR}");
    Server::new(router, config).listen(ADDR).await?;
    Ok(())
}
