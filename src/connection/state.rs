//! Connection lifecycle: `Connecting -> Open -> Closing -> Closed`.

/// Connection state.
///
/// `Closed` is terminal. Abrupt transport loss may jump from `Open`
/// straight to `Closed`; every orderly shutdown passes through `Closing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Opening handshake in progress.
    #[default]
    Connecting,
    /// Handshake complete; data flows both ways.
    Open,
    /// A CLOSE frame was sent or received; no new data may be sent.
    Closing,
    /// Transport shut down. The close code is final.
    Closed,
}

impl ConnectionState {
    /// Returns `true` for `Connecting`, `Open`, or `Closing` states.
    #[must_use]
    #[inline]
    pub const fn is_active(&self) -> bool {
        !matches!(self, ConnectionState::Closed)
    }

    /// Only `Open` accepts `send`, `ping` and a locally initiated close.
    #[must_use]
    #[inline]
    pub const fn can_send(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }

    /// Whether moving to `next` follows the lifecycle.
    #[must_use]
    pub const fn can_transition_to(&self, next: ConnectionState) -> bool {
        matches!(
            (self, next),
            (ConnectionState::Connecting, ConnectionState::Open)
                | (ConnectionState::Connecting, ConnectionState::Closed)
                | (ConnectionState::Open, ConnectionState::Closing)
                | (ConnectionState::Open, ConnectionState::Closed)
                | (ConnectionState::Closing, ConnectionState::Closed)
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Open => "OPEN",
            ConnectionState::Closing => "CLOSING",
            ConnectionState::Closed => "CLOSED",
        })
    }
}
