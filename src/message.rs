//! Application messages and the close status model.

use std::fmt;

use crate::connection::Role;

/// Status code carried by a CLOSE frame (RFC 6455 Section 7.4).
///
/// `NoStatus`, `Abnormal` and `TlsHandshake` are local-only: they describe
/// how a connection ended but never appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum CloseCode {
    /// 1000
    #[default]
    Normal,
    /// 1001, e.g. server shutdown or page navigation.
    GoingAway,
    /// 1002
    ProtocolError,
    /// 1003, a data type the endpoint cannot accept.
    UnsupportedData,
    /// 1005, the peer's CLOSE carried no status.
    NoStatus,
    /// 1006, the transport ended without a closing handshake.
    Abnormal,
    /// 1007, e.g. a TEXT message that is not UTF-8.
    InvalidPayload,
    /// 1008
    PolicyViolation,
    /// 1009
    MessageTooBig,
    /// 1010, the client needed an extension the server did not negotiate.
    MandatoryExtension,
    /// 1011
    InternalError,
    /// 1015
    TlsHandshake,
    /// Any other code: registered (1012-1014), application (3000-4999), or
    /// invalid.
    Other(u16),
}

impl CloseCode {
    #[must_use]
    pub const fn from_u16(code: u16) -> Self {
        match code {
            1000 => Self::Normal,
            1001 => Self::GoingAway,
            1002 => Self::ProtocolError,
            1003 => Self::UnsupportedData,
            1005 => Self::NoStatus,
            1006 => Self::Abnormal,
            1007 => Self::InvalidPayload,
            1008 => Self::PolicyViolation,
            1009 => Self::MessageTooBig,
            1010 => Self::MandatoryExtension,
            1011 => Self::InternalError,
            1015 => Self::TlsHandshake,
            other => Self::Other(other),
        }
    }

    #[must_use]
    pub const fn as_u16(&self) -> u16 {
        match *self {
            Self::Normal => 1000,
            Self::GoingAway => 1001,
            Self::ProtocolError => 1002,
            Self::UnsupportedData => 1003,
            Self::NoStatus => 1005,
            Self::Abnormal => 1006,
            Self::InvalidPayload => 1007,
            Self::PolicyViolation => 1008,
            Self::MessageTooBig => 1009,
            Self::MandatoryExtension => 1010,
            Self::InternalError => 1011,
            Self::TlsHandshake => 1015,
            Self::Other(code) => code,
        }
    }

    /// Whether the code may appear in a CLOSE frame at all.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        matches!(self.as_u16(), 1000..=1003 | 1007..=1014 | 3000..=4999)
    }

    /// Whether an endpoint acting as `role` may send this code.
    /// 1010 is reserved to clients.
    #[must_use]
    pub const fn is_sendable_by(&self, role: Role) -> bool {
        match role {
            Role::Client => self.is_valid(),
            Role::Server => self.is_valid() && !matches!(self, Self::MandatoryExtension),
        }
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        Self::from_u16(code)
    }
}

/// A status code and its reason, as sent, received, or recorded locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    pub code: CloseCode,
    /// At most 123 bytes of UTF-8 when sent.
    pub reason: String,
}

impl CloseFrame {
    #[must_use]
    pub fn new(code: CloseCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Recorded when the peer's CLOSE frame had an empty payload.
    #[must_use]
    pub fn no_status() -> Self {
        Self::new(CloseCode::NoStatus, "")
    }

    /// The local-only status recorded when no CLOSE frame was exchanged.
    #[must_use]
    pub fn abnormal() -> Self {
        Self::new(CloseCode::Abnormal, "")
    }
}

impl fmt::Display for CloseFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{} ({})", self.code, self.reason)
        }
    }
}

/// A complete data message.
///
/// Control frames never surface here: the connection answers PING and CLOSE
/// on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Binary(Vec<u8>),
}

impl Message {
    #[must_use]
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    #[must_use]
    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Self::Binary(data.into())
    }

    #[must_use]
    pub const fn is_text(&self) -> bool {
        matches!(self, Self::Text(_))
    }

    #[must_use]
    pub const fn is_binary(&self) -> bool {
        matches!(self, Self::Binary(_))
    }

    /// Payload bytes as they travel on the wire.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        match self {
            Self::Text(s) => s.as_bytes(),
            Self::Binary(data) => data,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Binary(_) => None,
        }
    }

    #[must_use]
    pub fn into_text(self) -> Option<String> {
        match self {
            Self::Text(s) => Some(s),
            Self::Binary(_) => None,
        }
    }

    #[must_use]
    pub fn into_binary(self) -> Option<Vec<u8>> {
        match self {
            Self::Binary(data) => Some(data),
            Self::Text(_) => None,
        }
    }
}

impl From<String> for Message {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for Message {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<Vec<u8>> for Message {
    fn from(data: Vec<u8>) -> Self {
        Self::Binary(data)
    }
}
