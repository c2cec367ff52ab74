//! Frame opcodes (RFC 6455 Section 5.2).

use std::fmt;

use crate::error::{Error, Result};

/// The four-bit frame type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl OpCode {
    /// # Errors
    ///
    /// `Error::ReservedOpcode` for the unassigned nibbles (0x3-0x7, 0xB-0xF);
    /// `Error::InvalidOpcode` for anything wider than four bits.
    pub fn from_u8(byte: u8) -> Result<Self> {
        Ok(match byte {
            0x0 => Self::Continuation,
            0x1 => Self::Text,
            0x2 => Self::Binary,
            0x8 => Self::Close,
            0x9 => Self::Ping,
            0xA => Self::Pong,
            0x3..=0x7 | 0xB..=0xF => return Err(Error::ReservedOpcode(byte)),
            _ => return Err(Error::InvalidOpcode(byte)),
        })
    }

    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Control frames have the high bit of the nibble set.
    #[inline]
    #[must_use]
    pub const fn is_control(self) -> bool {
        self.as_u8() & 0x8 != 0
    }

    #[inline]
    #[must_use]
    pub const fn is_data(self) -> bool {
        !self.is_control()
    }
}

impl TryFrom<u8> for OpCode {
    type Error = Error;

    fn try_from(byte: u8) -> Result<Self> {
        Self::from_u8(byte)
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Continuation => "CONTINUATION",
            Self::Text => "TEXT",
            Self::Binary => "BINARY",
            Self::Close => "CLOSE",
            Self::Ping => "PING",
            Self::Pong => "PONG",
        };
        f.write_str(name)
    }
}
