//! WebSocket client sending a few messages to the echo server.
//!
//! Run with: `cargo run --example client -- ws://127.0.0.1:9001/chat`

use tracing::info;
use tracing_subscriber::EnvFilter;
use wsengine::{ClientConfig, CloseCode, Message, connect};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let uri = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ws://127.0.0.1:9001/chat".to_string());
    let config = ClientConfig::new().with_subprotocol("chat");

    let conn = connect(&uri, config).await?;
    info!(%uri, subprotocol = ?conn.subprotocol(), "connected");

    for text in ["Hello", "WebSocket", "World"] {
        conn.send(Message::text(text)).await?;
        if let Some(reply) = conn.recv().await? {
            info!(?reply, "received");
        }
    }

    conn.send(Message::binary(vec![1u8, 2, 3, 4])).await?;
    if let Some(reply) = conn.recv().await? {
        info!(?reply, "received");
    }

    let started = std::time::Instant::now();
    conn.ping(None).await?.await?;
    info!(rtt = ?started.elapsed(), "pong");

    conn.close(CloseCode::Normal, "bye").await?;
    info!(close = ?conn.close_frame(), "closed");
    Ok(())
}
