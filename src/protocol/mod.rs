//! WebSocket protocol core implementation (RFC 6455).
//!
//! Everything here is synchronous and transport-agnostic: frame layout,
//! masking, reassembly and the opening handshake messages. The async
//! plumbing lives in [`crate::codec`] and [`crate::connection`].

pub mod assembler;
pub mod frame;
pub mod handshake;
pub mod mask;
pub mod opcode;
pub mod utf8;
pub mod validation;

pub use assembler::MessageAssembler;
pub use frame::{Frame, FrameHeader, parse_close_payload};
pub use handshake::{
    HandshakeRequest, HandshakeResponse, Headers, WS_GUID, WsUri, compute_accept_key,
    generate_key, select_subprotocol, validate_origin,
};
pub use mask::{apply_mask, apply_mask_fast, generate_mask};
pub use opcode::OpCode;
pub use utf8::{Utf8Validator, validate_utf8};
pub use validation::FrameValidator;
