//! WebSocket frame parsing and serialization (RFC 6455 Section 5).
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |                     Masking key (if MASK set)                 |
//! +---------------------------------------------------------------+
//! |                          Payload data                         |
//! +---------------------------------------------------------------+
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::message::{CloseCode, CloseFrame, Message};
use crate::protocol::OpCode;
use crate::protocol::mask::apply_mask_fast;

/// Maximum payload size for control frames.
pub const MAX_CONTROL_FRAME_PAYLOAD: usize = 125;

/// Longest possible header: 2 fixed bytes, 8 length bytes, 4 key bytes.
pub const MAX_HEADER_SIZE: usize = 14;

/// Decoded frame header, available before the payload has arrived.
///
/// Readers validate the header (masking direction, reserved bits, size
/// limits) before committing memory to the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Final fragment flag.
    pub fin: bool,
    /// RSV1-RSV3 as the low three bits (RSV1 = 0b100).
    pub rsv: u8,
    pub opcode: OpCode,
    /// Masking key, present when the MASK bit is set.
    pub mask: Option<[u8; 4]>,
    /// Declared payload length.
    pub payload_len: usize,
    /// Bytes occupied by the header itself, key included.
    pub header_len: usize,
}

impl FrameHeader {
    /// Parse a header from the front of `buf`.
    ///
    /// # Errors
    ///
    /// - `Error::IncompleteFrame` when `buf` ends inside the header
    /// - `Error::ReservedOpcode` for opcodes without a meaning
    /// - `Error::InvalidFrame` when the 64-bit length has its top bit set
    /// - `Error::PayloadTooLargeForPlatform` when the length does not fit `usize`
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < 2 {
            return Err(Error::IncompleteFrame {
                needed: 2 - buf.len(),
            });
        }

        let byte0 = buf[0];
        let byte1 = buf[1];

        let fin = byte0 & 0x80 != 0;
        let rsv = (byte0 >> 4) & 0x07;
        let opcode = OpCode::from_u8(byte0 & 0x0F)?;
        let masked = byte1 & 0x80 != 0;

        let (payload_len, len_end) = match byte1 & 0x7F {
            126 => {
                if buf.len() < 4 {
                    return Err(Error::IncompleteFrame {
                        needed: 4 - buf.len(),
                    });
                }
                (usize::from(u16::from_be_bytes([buf[2], buf[3]])), 4)
            }
            127 => {
                if buf.len() < 10 {
                    return Err(Error::IncompleteFrame {
                        needed: 10 - buf.len(),
                    });
                }
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&buf[2..10]);
                let len = u64::from_be_bytes(raw);
                if len & (1 << 63) != 0 {
                    return Err(Error::InvalidFrame(
                        "most significant bit of 64-bit payload length is set".into(),
                    ));
                }
                let len = usize::try_from(len).map_err(|_| Error::PayloadTooLargeForPlatform {
                    size: len,
                    max: usize::MAX as u64,
                })?;
                (len, 10)
            }
            short => (usize::from(short), 2),
        };

        let header_len = if masked { len_end + 4 } else { len_end };
        if buf.len() < header_len {
            return Err(Error::IncompleteFrame {
                needed: header_len - buf.len(),
            });
        }

        let mask = masked.then(|| [buf[len_end], buf[len_end + 1], buf[len_end + 2], buf[len_end + 3]]);

        Ok(Self {
            fin,
            rsv,
            opcode,
            mask,
            payload_len,
            header_len,
        })
    }

    /// Whether the MASK bit was set.
    #[inline]
    #[must_use]
    pub const fn is_masked(&self) -> bool {
        self.mask.is_some()
    }

    /// Control-frame constraints that can be checked from the header alone.
    ///
    /// # Errors
    ///
    /// - `Error::ReservedBitsSet` if any RSV bit is set
    /// - `Error::FragmentedControlFrame` for a control frame with FIN clear
    /// - `Error::ControlFrameTooLarge` for a control payload over 125 bytes
    pub fn validate(&self) -> Result<()> {
        if self.rsv != 0 {
            return Err(Error::ReservedBitsSet);
        }
        check_control(self.fin, self.opcode, self.payload_len)
    }
}

fn check_control(fin: bool, opcode: OpCode, payload_len: usize) -> Result<()> {
    if opcode.is_control() {
        if !fin {
            return Err(Error::FragmentedControlFrame);
        }
        if payload_len > MAX_CONTROL_FRAME_PAYLOAD {
            return Err(Error::ControlFrameTooLarge(payload_len));
        }
    }
    Ok(())
}

/// A single WebSocket frame with an unmasked payload.
///
/// Masking only exists on the wire: [`Frame::encode`] applies it and
/// [`Frame::parse`] removes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment flag. True if this is the last fragment of a message.
    pub fin: bool,
    /// Frame opcode defining the interpretation of payload data.
    pub opcode: OpCode,
    payload: Bytes,
}

impl Frame {
    #[must_use]
    pub fn new(fin: bool, opcode: OpCode, payload: impl Into<Bytes>) -> Self {
        Self {
            fin,
            opcode,
            payload: payload.into(),
        }
    }

    /// Create a final text frame.
    #[must_use]
    pub fn text(data: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Text, data)
    }

    /// Create a final binary frame.
    #[must_use]
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Binary, data)
    }

    /// Create a ping frame.
    #[must_use]
    pub fn ping(data: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Ping, data)
    }

    /// Create a pong frame.
    #[must_use]
    pub fn pong(data: impl Into<Bytes>) -> Self {
        Self::new(true, OpCode::Pong, data)
    }

    /// Create a close frame. `None` produces an empty payload.
    #[must_use]
    pub fn close(close: Option<&CloseFrame>) -> Self {
        let payload = match close {
            Some(close) => {
                let mut data = BytesMut::with_capacity(2 + close.reason.len());
                data.put_u16(close.code.as_u16());
                data.put_slice(close.reason.as_bytes());
                data.freeze()
            }
            None => Bytes::new(),
        };
        Self::new(true, OpCode::Close, payload)
    }

    /// Payload bytes, already unmasked.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Take ownership of the payload.
    #[must_use]
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Decode the status code and reason carried by a CLOSE frame.
    ///
    /// Returns `Ok(None)` for an empty payload.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidClosePayload` for a 1-byte payload or a non-UTF-8 reason
    /// - `Error::InvalidCloseCode` for a code that may not appear on the wire
    pub fn close_frame(&self) -> Result<Option<CloseFrame>> {
        parse_close_payload(&self.payload)
    }

    /// Parse one frame from the front of `buf`.
    ///
    /// Returns the frame and the number of bytes consumed. The payload is
    /// unmasked when a key is present. Masking direction is not checked here;
    /// that depends on the connection's role (see `FrameValidator`).
    ///
    /// # Errors
    ///
    /// - `Error::IncompleteFrame` if not enough data is available
    /// - any header error from [`FrameHeader::parse`]
    /// - any control-frame error from [`FrameHeader::validate`]
    pub fn parse(buf: &[u8]) -> Result<(Self, usize)> {
        let header = FrameHeader::parse(buf)?;
        header.validate()?;

        let total = header.header_len.checked_add(header.payload_len).ok_or(
            Error::PayloadTooLargeForPlatform {
                size: header.payload_len as u64,
                max: usize::MAX as u64,
            },
        )?;
        if buf.len() < total {
            return Err(Error::IncompleteFrame {
                needed: total - buf.len(),
            });
        }

        let mut payload = BytesMut::from(&buf[header.header_len..total]);
        if let Some(mask) = header.mask {
            apply_mask_fast(&mut payload, mask);
        }

        Ok((Self::from_parts(&header, payload.freeze()), total))
    }

    /// Assemble a frame from an already validated header and an unmasked payload.
    #[must_use]
    pub fn from_parts(header: &FrameHeader, payload: Bytes) -> Self {
        Self {
            fin: header.fin,
            opcode: header.opcode,
            payload,
        }
    }

    /// Check the control-frame invariants on an outgoing frame.
    ///
    /// # Errors
    ///
    /// - `Error::FragmentedControlFrame` if a control frame has FIN=0
    /// - `Error::ControlFrameTooLarge` if a control frame payload exceeds 125 bytes
    pub fn validate(&self) -> Result<()> {
        check_control(self.fin, self.opcode, self.payload.len())
    }

    /// Serialize the frame, masking the payload with `mask` when given.
    #[must_use]
    pub fn encode(&self, mask: Option<[u8; 4]>) -> Bytes {
        let mut dst = BytesMut::with_capacity(self.wire_size(mask.is_some()));
        self.encode_into(&mut dst, mask);
        dst.freeze()
    }

    /// Append the serialized frame to `dst`.
    pub fn encode_into(&self, dst: &mut BytesMut, mask: Option<[u8; 4]>) {
        let payload_len = self.payload.len();
        dst.reserve(self.wire_size(mask.is_some()));

        let mut byte0 = self.opcode.as_u8();
        if self.fin {
            byte0 |= 0x80;
        }
        dst.put_u8(byte0);

        let mask_bit = if mask.is_some() { 0x80 } else { 0x00 };
        if payload_len <= 125 {
            dst.put_u8(mask_bit | payload_len as u8);
        } else if let Ok(len) = u16::try_from(payload_len) {
            dst.put_u8(mask_bit | 126);
            dst.put_u16(len);
        } else {
            dst.put_u8(mask_bit | 127);
            dst.put_u64(payload_len as u64);
        }

        match mask {
            Some(key) => {
                dst.put_slice(&key);
                let start = dst.len();
                dst.put_slice(&self.payload);
                apply_mask_fast(&mut dst[start..], key);
            }
            None => dst.put_slice(&self.payload),
        }
    }

    /// Calculate the size needed to write this frame.
    #[must_use]
    pub fn wire_size(&self, masked: bool) -> usize {
        let payload_len = self.payload.len();
        let extended_len_size = if payload_len <= 125 {
            0
        } else if payload_len <= 65535 {
            2
        } else {
            8
        };
        let mask_size = if masked { 4 } else { 0 };
        2 + extended_len_size + mask_size + payload_len
    }
}

impl From<Message> for Frame {
    fn from(msg: Message) -> Self {
        match msg {
            Message::Text(text) => Frame::text(text),
            Message::Binary(data) => Frame::binary(data),
        }
    }
}

/// Decode a CLOSE payload into its status code and reason.
///
/// # Errors
///
/// See [`Frame::close_frame`].
pub fn parse_close_payload(payload: &[u8]) -> Result<Option<CloseFrame>> {
    match payload {
        [] => Ok(None),
        [_] => Err(Error::InvalidClosePayload(
            "close payload must be empty or at least 2 bytes".into(),
        )),
        [hi, lo, reason @ ..] => {
            let code = CloseCode::from_u16(u16::from_be_bytes([*hi, *lo]));
            if !code.is_valid() {
                return Err(Error::InvalidCloseCode(code.as_u16()));
            }
            let reason = std::str::from_utf8(reason).map_err(|_| {
                Error::InvalidClosePayload("close reason is not valid UTF-8".into())
            })?;
            Ok(Some(CloseFrame::new(code, reason)))
        }
    }
}
