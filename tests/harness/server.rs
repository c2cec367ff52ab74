//! Echo server on an ephemeral loopback port.

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use wsengine::{Route, Router, Server, ServerConfig, handler_fn};

pub struct TestServer {
    task: JoinHandle<wsengine::Result<()>>,
}

/// Echo every message back until the peer closes.
pub fn echo_route() -> Route {
    Route::new(handler_fn(|conn, _path| async move {
        while let Some(msg) = conn.recv().await? {
            conn.send(msg).await?;
        }
        Ok::<_, wsengine::Error>(())
    }))
}

impl TestServer {
    pub async fn spawn() -> (Self, SocketAddr) {
        Self::spawn_with(echo_route(), ServerConfig::new()).await
    }

    pub async fn spawn_with(router: impl Router, config: ServerConfig) -> (Self, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(Server::new(router, config).serve(listener));
        (Self { task }, addr)
    }

    pub async fn shutdown(self) {
        self.task.abort();
        let _ = self.task.await;
    }
}
