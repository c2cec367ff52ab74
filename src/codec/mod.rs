//! Frame-level encoding/decoding over tokio byte streams.
//!
//! The connection splits its transport and hands one half to each side of
//! the codec, so reads and writes never contend for the same lock.

mod framed;

pub use framed::{FrameReader, FrameWriter, read_http_head};
