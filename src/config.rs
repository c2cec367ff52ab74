//! Configuration and limits for WebSocket connections.
//!
//! Everything is passed explicitly at construction; there are no
//! process-wide defaults to mutate.

use std::time::Duration;

#[cfg(feature = "tls-rustls")]
use std::sync::Arc;

use crate::error::{Error, Result};

const KIB: usize = 1024;
const MIB: usize = 1024 * KIB;

/// Resource bounds enforced on every frame, message and handshake.
///
/// Anything over a bound fails the connection (1009 for frames and
/// messages) or the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Largest single frame payload. Default 16 MiB.
    pub max_frame_size: usize,
    /// Largest reassembled message. Default 64 MiB.
    pub max_message_size: usize,
    /// Most frames one message may be split into. Default 128.
    pub max_fragment_count: usize,
    /// Largest HTTP head, terminator included. Default 8 KiB.
    pub max_handshake_size: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self::new(16 * MIB, 64 * MIB, 128, 8 * KIB)
    }
}

impl Limits {
    #[must_use]
    pub const fn new(
        max_frame_size: usize,
        max_message_size: usize,
        max_fragment_count: usize,
        max_handshake_size: usize,
    ) -> Self {
        Self {
            max_frame_size,
            max_message_size,
            max_fragment_count,
            max_handshake_size,
        }
    }

    /// Tight bounds for memory-constrained peers: 64 KiB frames, 256 KiB
    /// messages, 16 fragments, 4 KiB handshakes.
    #[must_use]
    pub const fn embedded() -> Self {
        Self::new(64 * KIB, 256 * KIB, 16, 4 * KIB)
    }

    /// No size bounds on frames or messages. Only for trusted peers.
    #[must_use]
    pub const fn unrestricted() -> Self {
        Self::new(usize::MAX, usize::MAX, 1024, 64 * KIB)
    }

    /// # Errors
    ///
    /// `Error::MessageTooLarge` when `size` is over `max_message_size`.
    pub fn check_message_size(&self, size: usize) -> Result<()> {
        if size <= self.max_message_size {
            return Ok(());
        }
        Err(Error::MessageTooLarge {
            size,
            max: self.max_message_size,
        })
    }

    /// # Errors
    ///
    /// `Error::FrameTooLarge` when `size` is over `max_frame_size`.
    pub fn check_frame_size(&self, size: usize) -> Result<()> {
        if size <= self.max_frame_size {
            return Ok(());
        }
        Err(Error::FrameTooLarge {
            size,
            max: self.max_frame_size,
        })
    }

    /// # Errors
    ///
    /// `Error::TooManyFragments` when `count` is over `max_fragment_count`.
    pub fn check_fragment_count(&self, count: usize) -> Result<()> {
        if count <= self.max_fragment_count {
            return Ok(());
        }
        Err(Error::TooManyFragments {
            count,
            max: self.max_fragment_count,
        })
    }

    /// # Errors
    ///
    /// `Error::HandshakeTooLarge` when `size` is over `max_handshake_size`.
    pub fn check_handshake_size(&self, size: usize) -> Result<()> {
        if size <= self.max_handshake_size {
            return Ok(());
        }
        Err(Error::HandshakeTooLarge {
            size,
            max: self.max_handshake_size,
        })
    }
}

/// Bounds on the two handshakes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeouts {
    /// Maximum time to complete the opening handshake.
    ///
    /// Default: 10 seconds
    pub handshake: Duration,

    /// Maximum time `close()` waits for the peer's CLOSE frame before
    /// forcing the transport shut.
    ///
    /// Default: 10 seconds
    pub close: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            handshake: Duration::from_secs(10),
            close: Duration::from_secs(10),
        }
    }
}

impl Timeouts {
    #[must_use]
    pub const fn new(handshake: Duration, close: Duration) -> Self {
        Self { handshake, close }
    }
}

/// Per-connection engine configuration, shared by both roles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Resource limits.
    pub limits: Limits,

    /// Handshake and closing-handshake bounds.
    pub timeouts: Timeouts,

    /// Interval between keepalive pings. `None` disables keepalive.
    ///
    /// Default: None
    pub ping_interval: Option<Duration>,

    /// How long a keepalive ping may stay unanswered before the connection
    /// is considered dead. Ignored when `ping_interval` is `None`.
    ///
    /// Default: 20 seconds
    pub ping_timeout: Option<Duration>,

    /// Initial capacity of the decode buffer, and the read granularity.
    pub read_buffer_size: usize,

    /// Initial capacity of the encode buffer.
    pub write_buffer_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            timeouts: Timeouts::default(),
            ping_interval: None,
            ping_timeout: Some(Duration::from_secs(20)),
            read_buffer_size: 8 * KIB,
            write_buffer_size: 8 * KIB,
        }
    }
}

impl Config {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    #[must_use]
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Set the closing-handshake timeout.
    #[must_use]
    pub const fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.close = timeout;
        self
    }

    /// Enable keepalive pings every `interval`.
    #[must_use]
    pub const fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = Some(interval);
        self
    }

    /// Set how long a keepalive ping may go unanswered.
    #[must_use]
    pub const fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub const fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    #[must_use]
    pub const fn with_write_buffer_size(mut self, size: usize) -> Self {
        self.write_buffer_size = size;
        self
    }
}

/// Client role configuration.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// Engine configuration for the resulting connection.
    pub connection: Config,

    /// Subprotocols offered, in preference order.
    pub subprotocols: Vec<String>,

    /// `Origin` header, sent verbatim when set.
    pub origin: Option<String>,

    /// Additional request headers, sent in order after the required ones.
    pub extra_headers: Vec<(String, String)>,

    /// TLS client configuration for `wss://`. When `None`, the webpki
    /// root store is used.
    #[cfg(feature = "tls-rustls")]
    pub tls: Option<Arc<rustls::ClientConfig>>,
}

impl ClientConfig {
    /// Create a client configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the engine configuration.
    #[must_use]
    pub fn with_connection(mut self, connection: Config) -> Self {
        self.connection = connection;
        self
    }

    /// Offer a subprotocol. Earlier calls take precedence.
    #[must_use]
    pub fn with_subprotocol(mut self, protocol: impl Into<String>) -> Self {
        self.subprotocols.push(protocol.into());
        self
    }

    /// Send this `Origin` header.
    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Append an extra request header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.push((name.into(), value.into()));
        self
    }

    /// Use this TLS configuration for `wss://` targets.
    #[cfg(feature = "tls-rustls")]
    #[must_use]
    pub fn with_tls(mut self, tls: Arc<rustls::ClientConfig>) -> Self {
        self.tls = Some(tls);
        self
    }
}

/// Server role configuration.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    /// Engine configuration for accepted connections.
    pub connection: Config,

    /// Allowed origins for CSWSH protection.
    ///
    /// `None` or an empty list disables the check. An empty string inside
    /// the list admits requests without an `Origin` header.
    pub origins: Option<Vec<String>>,

    /// Subprotocols supported by every route, in server preference order.
    /// Routes may add their own.
    pub subprotocols: Vec<String>,

    /// TLS server configuration. When set, `Server::serve` wraps every
    /// accepted stream.
    #[cfg(feature = "tls-rustls")]
    pub tls: Option<Arc<rustls::ServerConfig>>,
}

impl ServerConfig {
    /// Create a server configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the engine configuration.
    #[must_use]
    pub fn with_connection(mut self, connection: Config) -> Self {
        self.connection = connection;
        self
    }

    /// Restrict accepted origins.
    #[must_use]
    pub fn with_origins<I, S>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.origins = Some(origins.into_iter().map(Into::into).collect());
        self
    }

    /// Support a subprotocol on every route.
    #[must_use]
    pub fn with_subprotocol(mut self, protocol: impl Into<String>) -> Self {
        self.subprotocols.push(protocol.into());
        self
    }

    /// Terminate TLS on accepted streams.
    #[cfg(feature = "tls-rustls")]
    #[must_use]
    pub fn with_tls(mut self, tls: Arc<rustls::ServerConfig>) -> Self {
        self.tls = Some(tls);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_presets() {
        let default = Limits::default();
        assert_eq!(default.max_frame_size, 16 * MIB);
        assert_eq!(default.max_handshake_size, 8 * KIB);

        let embedded = Limits::embedded();
        assert!(embedded.max_message_size < default.max_message_size);
        assert_eq!(embedded.max_fragment_count, 16);

        assert_eq!(Limits::unrestricted().max_frame_size, usize::MAX);
    }

    #[test]
    fn test_limit_checks_are_inclusive() {
        let limits = Limits::new(10, 20, 3, 40);
        assert!(limits.check_frame_size(10).is_ok());
        assert_eq!(
            limits.check_frame_size(11),
            Err(Error::FrameTooLarge { size: 11, max: 10 })
        );
        assert!(limits.check_message_size(20).is_ok());
        assert!(matches!(
            limits.check_message_size(21),
            Err(Error::MessageTooLarge { size: 21, max: 20 })
        ));
        assert!(limits.check_fragment_count(3).is_ok());
        assert!(limits.check_fragment_count(4).is_err());
        assert!(limits.check_handshake_size(40).is_ok());
        assert!(limits.check_handshake_size(41).is_err());
    }

    #[test]
    fn test_timeouts_default() {
        let timeouts = Timeouts::default();
        assert_eq!(timeouts.handshake, Duration::from_secs(10));
        assert_eq!(timeouts.close, Duration::from_secs(10));
    }

    #[test]
    fn test_config_builder() {
        let config = Config::new()
            .with_limits(Limits::embedded())
            .with_close_timeout(Duration::from_millis(250))
            .with_ping_interval(Duration::from_secs(5))
            .with_ping_timeout(Duration::from_secs(2));

        assert_eq!(config.limits.max_frame_size, 64 * 1024);
        assert_eq!(config.timeouts.close, Duration::from_millis(250));
        assert_eq!(config.ping_interval, Some(Duration::from_secs(5)));
        assert_eq!(config.ping_timeout, Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_keepalive_disabled_by_default() {
        let config = Config::default();
        assert!(config.ping_interval.is_none());
    }

    #[test]
    fn test_client_config_builder() {
        let config = ClientConfig::new()
            .with_subprotocol("chat")
            .with_subprotocol("superchat")
            .with_origin("http://localhost")
            .with_header("X-Trace", "abc");

        assert_eq!(config.subprotocols, vec!["chat", "superchat"]);
        assert_eq!(config.origin.as_deref(), Some("http://localhost"));
        assert_eq!(
            config.extra_headers,
            vec![("X-Trace".to_string(), "abc".to_string())]
        );
    }

    #[test]
    fn test_server_config_builder() {
        let config = ServerConfig::new()
            .with_origins(["http://localhost", ""])
            .with_subprotocol("chat");

        assert_eq!(
            config.origins,
            Some(vec!["http://localhost".to_string(), String::new()])
        );
        assert_eq!(config.subprotocols, vec!["chat"]);
    }
}
