//! The crate-wide error type.
//!
//! Every variant is `Clone` so one failure can be reported to the reader,
//! every pending sender and the close outcome at once; I/O and timer errors
//! are kept as their rendered text.

use thiserror::Error;

use crate::message::{CloseCode, CloseFrame};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    // Frame-level violations. All of these fail the connection with 1002
    // unless noted.
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Invalid opcode: {0:#x}")]
    InvalidOpcode(u8),

    #[error("Reserved opcode: {0:#x}")]
    ReservedOpcode(u8),

    #[error("Reserved bits set without negotiated extension")]
    ReservedBitsSet,

    #[error("Control frames cannot be fragmented")]
    FragmentedControlFrame,

    #[error("Control frame payload too large: {0} bytes (max: 125)")]
    ControlFrameTooLarge(usize),

    #[error("Client frame must be masked")]
    UnmaskedClientFrame,

    #[error("Server frame must not be masked")]
    MaskedServerFrame,

    #[error("Invalid close code: {0}")]
    InvalidCloseCode(u16),

    #[error("Invalid close payload: {0}")]
    InvalidClosePayload(String),

    /// Fails the connection with 1007.
    #[error("Invalid UTF-8 in text frame")]
    InvalidUtf8,

    /// The buffer ends before the frame does.
    #[error("Incomplete frame: need {needed} more bytes")]
    IncompleteFrame { needed: usize },

    // Resource limits, all closed with 1009.
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Too many fragments: {count} (max: {max})")]
    TooManyFragments { count: usize, max: usize },

    /// A 64-bit length with its top bit set, or one `usize` cannot hold.
    #[error("Payload length {size} exceeds platform maximum {max}")]
    PayloadTooLargeForPlatform { size: u64, max: u64 },

    // Opening handshake.
    #[error("Invalid handshake: {0}")]
    InvalidHandshake(String),

    #[error("Handshake too large: {size} bytes (max: {max})")]
    HandshakeTooLarge { size: usize, max: usize },

    /// The one handshake failure not reported as `InvalidHandshake`, so
    /// servers can tell a refused origin apart. `origin` is `(none)` when
    /// the request had no `Origin` header.
    #[error("Origin not allowed: {origin}")]
    OriginNotAllowed { origin: String },

    /// A header value containing CR, LF or NUL.
    #[error("Invalid value for header {header}: {reason}")]
    InvalidHeaderValue { header: String, reason: String },

    #[error("Invalid URI: {0}")]
    InvalidUri(String),

    // Connection lifecycle.
    /// The connection is not open. Carries the final close status once known.
    #[error("Connection closed: {0:?}")]
    ConnectionClosed(Option<CloseFrame>),

    /// Only one `recv()` may wait at a time.
    #[error("Another recv() is already waiting for the next message")]
    ConcurrentRecv,

    /// A ping with this payload is already waiting for its pong.
    #[error("Already waiting for a pong with the same data")]
    DuplicatePing,

    #[error("Timed out: {0}")]
    Timeout(String),

    // Transport.
    #[error("I/O error: {0}")]
    Io(String),

    #[error("TLS error: {0}")]
    Tls(String),
}

impl Error {
    /// The status sent when this error fails an open connection.
    #[must_use]
    pub const fn close_code(&self) -> CloseCode {
        match self {
            Self::InvalidUtf8 => CloseCode::InvalidPayload,
            Self::FrameTooLarge { .. }
            | Self::MessageTooLarge { .. }
            | Self::TooManyFragments { .. }
            | Self::PayloadTooLargeForPlatform { .. } => CloseCode::MessageTooBig,
            Self::InvalidFrame(_)
            | Self::ProtocolViolation(_)
            | Self::InvalidCloseCode(_)
            | Self::InvalidClosePayload(_)
            | Self::ReservedOpcode(_)
            | Self::FragmentedControlFrame
            | Self::ControlFrameTooLarge(_)
            | Self::UnmaskedClientFrame
            | Self::MaskedServerFrame
            | Self::ReservedBitsSet
            | Self::InvalidOpcode(_) => CloseCode::ProtocolError,
            Self::ConnectionClosed(_) | Self::Io(_) | Self::IncompleteFrame { .. } => {
                CloseCode::Abnormal
            }
            _ => CloseCode::InternalError,
        }
    }

    /// The transport went away; nothing can be sent to the peer any more.
    #[must_use]
    pub const fn is_connection_loss(&self) -> bool {
        matches!(
            self,
            Self::ConnectionClosed(_) | Self::Io(_) | Self::IncompleteFrame { .. }
        )
    }

    /// Whether the opening handshake failed, refused origins included.
    #[must_use]
    pub const fn is_handshake_failure(&self) -> bool {
        matches!(self, Self::InvalidHandshake(_) | Self::OriginNotAllowed { .. })
    }

    /// Rewrap a failure seen during the opening handshake as
    /// `InvalidHandshake`. `OriginNotAllowed` passes through unchanged.
    #[must_use]
    pub fn into_handshake_error(self) -> Self {
        match self {
            Self::InvalidHandshake(_) | Self::OriginNotAllowed { .. } => self,
            other => Self::InvalidHandshake(other.to_string()),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(_: std::str::Utf8Error) -> Self {
        Self::InvalidUtf8
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        Self::Timeout(err.to_string())
    }
}
