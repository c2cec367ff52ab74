//! Atomic counters shared between client tasks.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Clone, Default)]
pub struct Metrics {
    inner: Arc<Counters>,
}

#[derive(Default)]
struct Counters {
    connections: AtomicUsize,
    disconnects: AtomicUsize,
    sent: AtomicUsize,
    received: AtomicUsize,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_connection(&self) {
        self.inner.connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disconnect(&self) {
        self.inner.disconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_message_sent(&self) {
        self.inner.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_message_received(&self) {
        self.inner.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connections(&self) -> usize {
        self.inner.connections.load(Ordering::Relaxed)
    }

    pub fn disconnects(&self) -> usize {
        self.inner.disconnects.load(Ordering::Relaxed)
    }

    pub fn messages_sent(&self) -> usize {
        self.inner.sent.load(Ordering::Relaxed)
    }

    pub fn messages_received(&self) -> usize {
        self.inner.received.load(Ordering::Relaxed)
    }
}
