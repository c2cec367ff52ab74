//! The connection engine.
//!
//! A [`Connection`] takes over a transport once the opening handshake is
//! done. It owns a reader task and a writer task, answers PING and CLOSE
//! itself, and hands complete data messages to [`Connection::recv`].
//!
//! ```rust,no_run
//! use wsengine::{CloseCode, Config, Connection, Message, Role};
//!
//! # async fn run(stream: tokio::net::TcpStream) -> wsengine::Result<()> {
//! // The handshake already happened on `stream`.
//! let conn = Connection::new(stream, Role::Client, Config::default());
//! conn.send(Message::text("Hello")).await?;
//! while let Some(msg) = conn.recv().await? {
//!     println!("{msg:?}");
//! }
//! println!("closed with {}", conn.wait_closed().await);
//! # Ok(())
//! # }
//! ```

mod role;
mod state;

#[allow(clippy::module_inception)]
mod connection;

pub use connection::{Connection, ConnectionInfo, Pong};
pub use role::Role;
pub use state::ConnectionState;
