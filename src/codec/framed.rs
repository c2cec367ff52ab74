use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::config::{Config, Limits};
use crate::connection::Role;
use crate::error::{Error, Result};
use crate::protocol::frame::FrameHeader;
use crate::protocol::mask::{apply_mask_fast, generate_mask};
use crate::protocol::validation::FrameValidator;
use crate::protocol::Frame;

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Read half of the frame codec.
///
/// Decodes exactly one frame per call, validating the header against the
/// connection's role and limits before the payload is buffered.
pub struct FrameReader<R> {
    io: R,
    buf: BytesMut,
    validator: FrameValidator,
    read_size: usize,
}

impl<R> FrameReader<R> {
    #[must_use]
    pub fn new(io: R, role: Role, config: &Config) -> Self {
        Self {
            io,
            buf: BytesMut::with_capacity(config.read_buffer_size),
            validator: FrameValidator::new(role, config.limits.clone()),
            read_size: config.read_buffer_size.max(64),
        }
    }

    /// Seed the buffer with bytes that were read past the handshake head.
    #[must_use]
    pub fn with_buffered(mut self, leftover: &[u8]) -> Self {
        self.buf.extend_from_slice(leftover);
        self
    }

    /// Bytes received but not yet decoded.
    #[must_use]
    pub fn buffered(&self) -> &[u8] {
        &self.buf
    }

    #[must_use]
    pub fn into_inner(self) -> R {
        self.io
    }
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Read the next frame, waiting for as many bytes as it needs.
    ///
    /// # Errors
    ///
    /// - `Error::ConnectionClosed(None)` when the stream ends between frames
    /// - `Error::IncompleteFrame` when the stream ends inside a frame
    /// - `Error::Io` on transport failure
    /// - any protocol error from header parsing or validation
    pub async fn read_frame(&mut self) -> Result<Frame> {
        loop {
            let needed = match FrameHeader::parse(&self.buf) {
                Ok(header) => {
                    self.validator.validate_incoming(&header)?;
                    let total = header.header_len.checked_add(header.payload_len).ok_or(
                        Error::PayloadTooLargeForPlatform {
                            size: header.payload_len as u64,
                            max: usize::MAX as u64,
                        },
                    )?;
                    if self.buf.len() >= total {
                        let mut raw = self.buf.split_to(total);
                        raw.advance(header.header_len);
                        if let Some(mask) = header.mask {
                            apply_mask_fast(&mut raw, mask);
                        }
                        let frame = Frame::from_parts(&header, raw.freeze());
                        trace!(opcode = %frame.opcode, fin = frame.fin, len = frame.payload().len(), "frame received");
                        return Ok(frame);
                    }
                    total - self.buf.len()
                }
                Err(Error::IncompleteFrame { needed }) => needed,
                Err(e) => return Err(e),
            };

            // Grow by whole read chunks; a large payload fills in over several reads.
            self.buf.reserve(self.read_size);
            let n = self.io.read_buf(&mut self.buf).await?;
            if n == 0 {
                return Err(if self.buf.is_empty() {
                    Error::ConnectionClosed(None)
                } else {
                    Error::IncompleteFrame { needed }
                });
            }
        }
    }
}

/// Write half of the frame codec.
///
/// Client writers mask every frame with a fresh key; server writers never mask.
pub struct FrameWriter<W> {
    io: W,
    buf: BytesMut,
    role: Role,
}

impl<W> FrameWriter<W> {
    #[must_use]
    pub fn new(io: W, role: Role, config: &Config) -> Self {
        Self {
            io,
            buf: BytesMut::with_capacity(config.write_buffer_size),
            role,
        }
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn into_inner(self) -> W {
        self.io
    }
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Encode and flush one frame.
    ///
    /// # Errors
    ///
    /// Returns a control-frame error if `frame` breaks the control-frame
    /// invariants, or `Error::Io` if the transport fails.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        frame.validate()?;
        let mask = if self.role.must_mask() {
            Some(generate_mask()?)
        } else {
            None
        };

        self.buf.clear();
        frame.encode_into(&mut self.buf, mask);
        self.io.write_all(&self.buf).await?;
        self.io.flush().await?;
        trace!(opcode = %frame.opcode, len = frame.payload().len(), "frame sent");
        Ok(())
    }

    /// Shut down the write direction of the transport.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the transport refuses to close.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.io.shutdown().await?;
        Ok(())
    }
}

/// Read an HTTP head up to and including the blank line.
///
/// Bytes that arrive after the head stay in `buf` for the frame reader.
///
/// # Errors
///
/// - `Error::HandshakeTooLarge` when no terminator appears within `limits.max_handshake_size`
/// - `Error::InvalidHandshake` when the stream ends first
/// - `Error::Io` on transport failure
pub async fn read_http_head<R: AsyncRead + Unpin>(
    io: &mut R,
    limits: &Limits,
    buf: &mut BytesMut,
) -> Result<BytesMut> {
    let mut searched: usize = 0;
    loop {
        let from = searched.saturating_sub(HEAD_TERMINATOR.len() - 1);
        if let Some(pos) = buf[from..]
            .windows(HEAD_TERMINATOR.len())
            .position(|w| w == HEAD_TERMINATOR)
        {
            let end = from + pos + HEAD_TERMINATOR.len();
            limits.check_handshake_size(end)?;
            return Ok(buf.split_to(end));
        }
        searched = buf.len();
        limits.check_handshake_size(searched)?;

        buf.reserve(1024);
        if io.read_buf(buf).await? == 0 {
            return Err(Error::InvalidHandshake(
                "connection closed before the handshake completed".into(),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    use crate::protocol::OpCode;

    /// Serves `read_data` in slices of at most `chunk` bytes and records writes.
    struct MockStream {
        read_data: Cursor<Vec<u8>>,
        chunk: usize,
        write_data: Vec<u8>,
        fail_shutdown: bool,
    }

    impl MockStream {
        fn new(data: Vec<u8>) -> Self {
            Self {
                read_data: Cursor::new(data),
                chunk: usize::MAX,
                write_data: Vec::new(),
                fail_shutdown: false,
            }
        }

        fn chunked(data: Vec<u8>, chunk: usize) -> Self {
            Self {
                chunk,
                ..Self::new(data)
            }
        }
    }

    impl AsyncRead for MockStream {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            let pos = self.read_data.position() as usize;
            let data = self.read_data.get_ref();
            if pos >= data.len() {
                return Poll::Ready(Ok(()));
            }
            let remaining = &data[pos..];
            let to_copy = remaining.len().min(buf.remaining()).min(self.chunk);
            buf.put_slice(&remaining[..to_copy]);
            self.read_data.set_position((pos + to_copy) as u64);
            Poll::Ready(Ok(()))
        }
    }

    impl AsyncWrite for MockStream {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            self.write_data.extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            if self.fail_shutdown {
                Poll::Ready(Err(std::io::Error::other("shutdown refused")))
            } else {
                Poll::Ready(Ok(()))
            }
        }
    }

    fn client_reader(data: Vec<u8>) -> FrameReader<MockStream> {
        FrameReader::new(MockStream::new(data), Role::Client, &Config::default())
    }

    #[tokio::test]
    async fn test_read_frames_in_sequence() {
        let mut data = Frame::text("one").encode(None).to_vec();
        data.extend_from_slice(&Frame::binary(vec![2u8; 300]).encode(None));
        let mut reader = client_reader(data);

        assert_eq!(reader.read_frame().await.unwrap(), Frame::text("one"));
        let second = reader.read_frame().await.unwrap();
        assert_eq!(second.opcode, OpCode::Binary);
        assert_eq!(second.payload().len(), 300);
        assert!(matches!(
            reader.read_frame().await,
            Err(Error::ConnectionClosed(None))
        ));
    }

    #[tokio::test]
    async fn test_read_frame_byte_by_byte() {
        let wire = Frame::text("split across reads").encode(Some([9, 8, 7, 6]));
        let stream = MockStream::chunked(wire.to_vec(), 1);
        let mut reader = FrameReader::new(stream, Role::Server, &Config::default());

        let frame = reader.read_frame().await.unwrap();
        assert_eq!(frame.payload(), b"split across reads");
    }

    #[tokio::test]
    async fn test_truncated_frame_is_connection_loss() {
        let wire = Frame::text("Hello").encode(None);
        let mut reader = client_reader(wire[..4].to_vec());

        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(err, Error::IncompleteFrame { .. }));
        assert!(err.is_connection_loss());
    }

    #[tokio::test]
    async fn test_wrong_masking_direction_rejected() {
        // A client must not accept masked frames.
        let wire = Frame::text("x").encode(Some([1, 2, 3, 4]));
        let mut reader = client_reader(wire.to_vec());
        assert!(matches!(
            reader.read_frame().await,
            Err(Error::MaskedServerFrame)
        ));

        // A server must not accept unmasked frames.
        let wire = Frame::text("x").encode(None);
        let mut reader = FrameReader::new(MockStream::new(wire.to_vec()), Role::Server, &Config::default());
        assert!(matches!(
            reader.read_frame().await,
            Err(Error::UnmaskedClientFrame)
        ));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected_before_payload() {
        let config = Config::new().with_limits(Limits::new(16, 64, 4, 1024));
        // Header only: the 1000-byte payload never arrives.
        let header = vec![0x82, 0x7e, 0x03, 0xe8];
        let mut reader = FrameReader::new(MockStream::new(header), Role::Client, &config);

        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(err, Error::FrameTooLarge { size: 1000, max: 16 }));
        assert_eq!(err.close_code(), crate::CloseCode::MessageTooBig);
    }

    #[tokio::test]
    async fn test_buffered_leftover_is_decoded_first() {
        let leftover = Frame::text("early").encode(None);
        let later = Frame::text("late").encode(None);
        let mut reader = client_reader(later.to_vec()).with_buffered(&leftover);

        assert_eq!(reader.read_frame().await.unwrap().payload(), b"early");
        assert_eq!(reader.read_frame().await.unwrap().payload(), b"late");
    }

    #[tokio::test]
    async fn test_client_writer_masks_each_frame() {
        let mut writer = FrameWriter::new(MockStream::new(vec![]), Role::Client, &Config::default());
        writer.write_frame(&Frame::text("Hi")).await.unwrap();

        let written = writer.into_inner().write_data;
        assert_eq!(written[0], 0x81);
        assert_eq!(written[1], 0x82);
        assert_eq!(written.len(), 8);

        let (frame, _) = Frame::parse(&written).unwrap();
        assert_eq!(frame.payload(), b"Hi");
    }

    #[tokio::test]
    async fn test_server_writer_never_masks() {
        let mut writer = FrameWriter::new(MockStream::new(vec![]), Role::Server, &Config::default());
        writer.write_frame(&Frame::text("Hi")).await.unwrap();
        assert_eq!(writer.into_inner().write_data, vec![0x81, 0x02, b'H', b'i']);
    }

    #[tokio::test]
    async fn test_writer_refuses_invalid_control_frame() {
        let mut writer = FrameWriter::new(MockStream::new(vec![]), Role::Server, &Config::default());
        let err = writer.write_frame(&Frame::ping(vec![0u8; 200])).await.unwrap_err();
        assert!(matches!(err, Error::ControlFrameTooLarge(200)));
        assert!(writer.into_inner().write_data.is_empty());
    }

    #[tokio::test]
    async fn test_writer_shutdown_failure_surfaces() {
        let mut stream = MockStream::new(vec![]);
        stream.fail_shutdown = true;
        let mut writer = FrameWriter::new(stream, Role::Server, &Config::default());
        assert!(matches!(writer.shutdown().await, Err(Error::Io(_))));
    }

    #[tokio::test]
    async fn test_read_http_head_keeps_leftover() {
        let mut data = b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\n\r\n".to_vec();
        data.extend_from_slice(&[0x81, 0x00]);
        let mut stream = MockStream::chunked(data, 5);
        let mut buf = BytesMut::new();

        let head = read_http_head(&mut stream, &Limits::default(), &mut buf).await.unwrap();
        assert!(head.ends_with(b"\r\n\r\n"));
        assert!(head.starts_with(b"HTTP/1.1 101"));
        assert_eq!(&buf[..], &[0x81, 0x00]);
    }

    #[tokio::test]
    async fn test_read_http_head_too_large() {
        let data = vec![b'a'; 10_000];
        let mut stream = MockStream::new(data);
        let mut buf = BytesMut::new();
        let err = read_http_head(&mut stream, &Limits::default(), &mut buf).await.unwrap_err();
        assert!(matches!(err, Error::HandshakeTooLarge { .. }));
    }

    #[tokio::test]
    async fn test_read_http_head_eof() {
        let mut stream = MockStream::new(b"GET / HTTP/1.1\r\n".to_vec());
        let mut buf = BytesMut::new();
        let err = read_http_head(&mut stream, &Limits::default(), &mut buf).await.unwrap_err();
        assert!(matches!(err, Error::InvalidHandshake(_)));
    }
}
