//! Many clients against one server, and many tasks sharing one connection.

mod harness;

use std::collections::HashSet;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use harness::{Metrics, TestClient, TestServer};
use tokio::sync::Barrier;
use tokio::task::JoinSet;
use wsengine::{CloseCode, Error, Message};

/// Connect `clients` clients at once and run `session` on each.
///
/// All connects are released by one barrier so they race the accept loop.
async fn fan_out<F, Fut, T>(addr: SocketAddr, clients: usize, session: F) -> Vec<T>
where
    F: Fn(TestClient) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let barrier = Arc::new(Barrier::new(clients));
    let session = Arc::new(session);
    let mut set = JoinSet::new();

    for id in 0..clients {
        let barrier = barrier.clone();
        let session = session.clone();
        set.spawn(async move {
            barrier.wait().await;
            let client = TestClient::connect_with_id(addr, id).await.unwrap();
            session(client).await
        });
    }

    let mut results = Vec::with_capacity(clients);
    while let Some(result) = set.join_next().await {
        results.push(result.unwrap());
    }
    results
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_clients_one_after_another() {
    let (server, addr) = TestServer::spawn().await;

    for id in 0..10 {
        let client = TestClient::connect_with_id(addr, id).await.unwrap();
        let greeting = format!("client {} says hi", client.id);
        client.send_text(&greeting).await.unwrap();
        assert_eq!(client.recv_text().await.unwrap(), Some(greeting));
        client.close().await.unwrap();
        assert_eq!(client.conn.close_code(), Some(CloseCode::Normal));
    }

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_simultaneous_connects_each_get_own_echo() {
    let (server, addr) = TestServer::spawn().await;

    let echoed = fan_out(addr, 50, |client| async move {
        let tag = format!("id={}", client.id);
        client.send_text(&tag).await.unwrap();
        let reply = client.recv_text().await.unwrap();
        client.close().await.unwrap();
        reply == Some(tag)
    })
    .await;

    assert_eq!(echoed.len(), 50);
    assert!(echoed.into_iter().all(|ok| ok));

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pipelined_messages_keep_order() {
    const CLIENTS: usize = 20;
    const BURST: usize = 50;

    let (server, addr) = TestServer::spawn().await;
    let metrics = Metrics::new();

    let counters = metrics.clone();
    fan_out(addr, CLIENTS, move |client| {
        let metrics = counters.clone();
        async move {
            metrics.record_connection();

            // Everything goes out before anything is read back.
            for seq in 0..BURST {
                client.send_text(&format!("{}/{seq}", client.id)).await.unwrap();
                metrics.record_message_sent();
            }
            for seq in 0..BURST {
                let echo = client.recv_text().await.unwrap().unwrap();
                assert_eq!(echo, format!("{}/{seq}", client.id));
                metrics.record_message_received();
            }

            client.close().await.unwrap();
            metrics.record_disconnect();
        }
    })
    .await;

    assert_eq!(metrics.connections(), CLIENTS);
    assert_eq!(metrics.disconnects(), CLIENTS);
    assert_eq!(metrics.messages_sent(), CLIENTS * BURST);
    assert_eq!(metrics.messages_received(), CLIENTS * BURST);

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_tasks_sharing_a_connection_never_interleave() {
    const TASKS: usize = 8;
    const EACH: usize = 25;

    let (server, addr) = TestServer::spawn().await;
    let client = Arc::new(TestClient::connect_with_id(addr, 0).await.unwrap());

    let mut set = JoinSet::new();
    for task in 0..TASKS {
        let client = client.clone();
        set.spawn(async move {
            for seq in 0..EACH {
                client.send_text(&format!("{task}:{seq}")).await.unwrap();
            }
        });
    }
    while let Some(result) = set.join_next().await {
        result.unwrap();
    }

    // Any merge of the tasks is fine as long as each task's own order holds.
    let mut expected = vec![0usize; TASKS];
    let mut seen = HashSet::new();
    for _ in 0..TASKS * EACH {
        let text = client.recv_text().await.unwrap().unwrap();
        let (task, seq) = text.split_once(':').unwrap();
        let task: usize = task.parse().unwrap();
        assert_eq!(seq.parse::<usize>().unwrap(), expected[task]);
        expected[task] += 1;
        assert!(seen.insert(text));
    }
    assert!(expected.iter().all(|&n| n == EACH));

    client.close().await.unwrap();
    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_second_receiver_is_refused() {
    let (server, addr) = TestServer::spawn().await;
    let client = Arc::new(TestClient::connect_with_id(addr, 0).await.unwrap());

    let first = {
        let client = client.clone();
        tokio::spawn(async move { client.conn.recv().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(matches!(client.conn.recv().await, Err(Error::ConcurrentRecv)));

    client.send_text("wake").await.unwrap();
    assert_eq!(first.await.unwrap().unwrap(), Some(Message::text("wake")));

    client.close().await.unwrap();
    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_every_close_is_clean_under_load() {
    let (server, addr) = TestServer::spawn().await;

    let outcomes = fan_out(addr, 50, |client| async move {
        client.send_text("bye soon").await.unwrap();
        client.recv_text().await.unwrap();
        client.close().await.unwrap();
        client.conn.wait_closed().await
    })
    .await;

    assert!(outcomes.iter().all(|frame| frame.code == CloseCode::Normal));

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_outstanding_pings_all_answered() {
    let (server, addr) = TestServer::spawn().await;

    fan_out(addr, 30, |client| async move {
        let mut pending = Vec::new();
        for n in 0..5u8 {
            pending.push(client.conn.ping(Some(vec![n])).await.unwrap());
        }
        for pong in pending {
            pong.await.unwrap();
        }
        client.close().await.unwrap();
    })
    .await;

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "opens 500 sockets"]
async fn test_five_hundred_simultaneous_clients() {
    let (server, addr) = TestServer::spawn().await;

    let echoed = fan_out(addr, 500, |client| async move {
        client.send_text("hello").await.is_ok()
            && client.recv_text().await.is_ok()
            && client.close().await.is_ok()
    })
    .await;

    let ok = echoed.iter().filter(|&&ok| ok).count();
    assert!(ok >= 475, "only {ok} of 500 clients completed");

    server.shutdown().await;
}
