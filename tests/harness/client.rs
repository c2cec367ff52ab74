//! Thin client wrapper tagging each connection with an id.

use std::net::SocketAddr;

use wsengine::{ClientConfig, CloseCode, Connection, Message, connect};

pub struct TestClient {
    pub id: usize,
    pub conn: Connection,
}

impl TestClient {
    pub async fn connect_with_id(addr: SocketAddr, id: usize) -> wsengine::Result<Self> {
        Self::connect_with_config(addr, id, ClientConfig::new()).await
    }

    pub async fn connect_with_config(
        addr: SocketAddr,
        id: usize,
        config: ClientConfig,
    ) -> wsengine::Result<Self> {
        let conn = connect(&format!("ws://{addr}/client/{id}"), config).await?;
        Ok(Self { id, conn })
    }

    pub async fn send_text(&self, text: &str) -> wsengine::Result<()> {
        self.conn.send(Message::text(text)).await
    }

    pub async fn recv_text(&self) -> wsengine::Result<Option<String>> {
        Ok(self.conn.recv().await?.and_then(Message::into_text))
    }

    pub async fn close(&self) -> wsengine::Result<()> {
        self.conn.close(CloseCode::Normal, "").await
    }
}
