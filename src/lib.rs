//! # wsengine
//!
//! An RFC 6455 WebSocket protocol engine for tokio: frame codec, opening
//! handshake, and a connection engine that runs the message exchange,
//! pings, and the closing handshake for both clients and servers.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use wsengine::{ClientConfig, CloseCode, Message, connect};
//!
//! # async fn run() -> wsengine::Result<()> {
//! let conn = connect("ws://127.0.0.1:9001/", ClientConfig::new()).await?;
//! conn.send(Message::text("hello")).await?;
//! if let Some(reply) = conn.recv().await? {
//!     println!("{reply:?}");
//! }
//! conn.close(CloseCode::Normal, "bye").await?;
//! # Ok(())
//! # }
//! ```
//!
//! Servers map request paths to handlers, see [`server`].
//!
//! ## Features
//!
//! - `tls-rustls`: `wss://` for clients and TLS termination in [`Server`].

pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod message;
pub mod protocol;
pub mod server;

#[cfg(feature = "tls-rustls")]
pub mod tls;

pub use client::{connect, connect_with_stream};
pub use config::{ClientConfig, Config, Limits, ServerConfig, Timeouts};
pub use connection::{Connection, ConnectionInfo, ConnectionState, Pong, Role};
pub use error::{Error, Result};
pub use message::{CloseCode, CloseFrame, Message};
pub use protocol::{HandshakeRequest, HandshakeResponse, OpCode, WS_GUID, compute_accept_key};
pub use server::{BoxError, Handler, PathRouter, Route, Router, Server, handler_fn};
