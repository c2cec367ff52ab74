//! Reassembly of fragmented data messages (RFC 6455 Section 5.4).

use bytes::BytesMut;

use crate::config::Limits;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::protocol::utf8::Utf8Validator;
use crate::protocol::{Frame, OpCode};

/// Collects TEXT/BINARY frames and their CONTINUATION frames into messages.
///
/// Control frames may arrive between fragments; the caller handles them
/// separately and the assembler ignores them. TEXT payloads are validated
/// incrementally so that invalid UTF-8 fails the message at the fragment
/// that introduced it.
#[derive(Debug)]
pub struct MessageAssembler {
    buffer: BytesMut,
    fragment_count: usize,
    opcode: Option<OpCode>,
    utf8: Utf8Validator,
    limits: Limits,
}

impl MessageAssembler {
    #[must_use]
    pub fn new(limits: Limits) -> Self {
        Self {
            buffer: BytesMut::new(),
            fragment_count: 0,
            opcode: None,
            utf8: Utf8Validator::new(),
            limits,
        }
    }

    /// Add a frame to the message being assembled.
    ///
    /// Returns `Some(message)` once a frame with FIN set completes it.
    ///
    /// # Errors
    ///
    /// - `Error::ProtocolViolation` for a CONTINUATION with nothing to continue,
    ///   or a new TEXT/BINARY frame while a message is still open
    /// - `Error::TooManyFragments` / `Error::MessageTooLarge` when limits are exceeded
    /// - `Error::InvalidUtf8` for a TEXT message that is not valid UTF-8
    pub fn push(&mut self, frame: Frame) -> Result<Option<Message>> {
        if frame.opcode.is_control() {
            return Ok(None);
        }

        let opcode = match (frame.opcode, self.opcode) {
            (OpCode::Continuation, Some(open)) => open,
            (OpCode::Continuation, None) => {
                return Err(Error::ProtocolViolation(
                    "continuation frame without a message in progress".into(),
                ));
            }
            (_, Some(_)) => {
                return Err(Error::ProtocolViolation(
                    "new data frame while a fragmented message is in progress".into(),
                ));
            }
            (started, None) => {
                self.opcode = Some(started);
                started
            }
        };

        self.limits.check_fragment_count(self.fragment_count + 1)?;
        let new_size = self.buffer.len() + frame.payload().len();
        self.limits.check_message_size(new_size)?;

        if opcode == OpCode::Text {
            self.utf8.validate(frame.payload(), frame.fin)?;
        }

        self.buffer.extend_from_slice(frame.payload());
        self.fragment_count += 1;

        if !frame.fin {
            return Ok(None);
        }

        let payload = self.buffer.split().to_vec();
        self.reset();
        let message = match opcode {
            OpCode::Text => Message::Text(String::from_utf8(payload).map_err(|_| Error::InvalidUtf8)?),
            _ => Message::Binary(payload),
        };
        Ok(Some(message))
    }

    /// Whether a fragmented message is waiting for more frames.
    #[must_use]
    pub fn is_assembling(&self) -> bool {
        self.opcode.is_some()
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.fragment_count = 0;
        self.opcode = None;
        self.utf8.reset();
    }
}
