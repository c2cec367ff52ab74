//! Per-connection checks on incoming frame headers.
//!
//! Runs before the payload is read so that an oversized or misdirected
//! frame fails the connection without buffering its body.

use crate::config::Limits;
use crate::connection::Role;
use crate::error::{Error, Result};
use crate::protocol::frame::FrameHeader;

/// Header checks that depend on which side of the connection we are.
#[derive(Debug, Clone)]
pub struct FrameValidator {
    role: Role,
    limits: Limits,
}

impl FrameValidator {
    /// `role` is the receiving endpoint's role.
    #[must_use]
    pub fn new(role: Role, limits: Limits) -> Self {
        Self { role, limits }
    }

    /// Checks masking direction, then the role-independent header rules
    /// (RSV bits, control frame shape), then `max_frame_size`. The first
    /// failure wins.
    ///
    /// # Errors
    ///
    /// `UnmaskedClientFrame` or `MaskedServerFrame` for the wrong masking
    /// direction, any error from [`FrameHeader::validate`], or
    /// `FrameTooLarge`.
    pub fn validate_incoming(&self, header: &FrameHeader) -> Result<()> {
        match (self.role.expects_masked(), header.is_masked()) {
            (true, false) => return Err(Error::UnmaskedClientFrame),
            (false, true) => return Err(Error::MaskedServerFrame),
            _ => {}
        }
        header.validate()?;
        self.limits.check_frame_size(header.payload_len)
    }
}
