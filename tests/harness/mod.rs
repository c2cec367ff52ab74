//! Shared fixtures for the loopback integration tests.

#![allow(dead_code)]

mod client;
mod metrics;
mod server;

pub use client::TestClient;
pub use metrics::Metrics;
pub use server::{TestServer, echo_route};
