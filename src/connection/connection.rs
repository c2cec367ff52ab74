use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Notify, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, trace, warn};

use crate::codec::{FrameReader, FrameWriter};
use crate::config::Config;
use crate::connection::{ConnectionState, Role};
use crate::error::{Error, Result};
use crate::message::{CloseCode, CloseFrame, Message};
use crate::protocol::frame::MAX_CONTROL_FRAME_PAYLOAD;
use crate::protocol::{Frame, MessageAssembler, OpCode};

/// Attributes captured during the opening handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Host named by the target URI (client) or the `Host` header (server).
    pub host: String,
    pub port: u16,
    /// Whether the transport is TLS.
    pub secure: bool,
    /// Request path including any query string.
    pub path: String,
    /// Negotiated subprotocol.
    pub subprotocol: Option<String>,
}

type Ack = oneshot::Sender<Result<()>>;

enum WriteCommand {
    Frame { frame: Frame, ack: Ack },
    Shutdown { ack: Ack },
}

#[derive(Debug, Default)]
struct CloseProgress {
    sent: bool,
    /// First CLOSE read from the peer.
    received: Option<CloseFrame>,
}

/// How the reader loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    /// CLOSE frames went both ways.
    Clean,
    /// Transport ended, failed, or was aborted without a closing handshake.
    Lost,
    /// The engine failed the connection with this code.
    Failed(CloseCode),
}

struct Shared {
    role: Role,
    config: Config,
    commands: mpsc::UnboundedSender<WriteCommand>,
    state: watch::Sender<ConnectionState>,
    progress: Mutex<CloseProgress>,
    closed: OnceLock<CloseFrame>,
    pings: Mutex<VecDeque<(Bytes, oneshot::Sender<()>)>>,
    abort: Notify,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn transition(&self, next: ConnectionState) {
        let role = self.role;
        self.state.send_if_modified(|current| {
            if !current.can_transition_to(next) {
                return false;
            }
            debug!(%role, from = %current, to = %next, "state change");
            *current = next;
            true
        });
    }

    fn closed_error(&self) -> Error {
        Error::ConnectionClosed(self.closed.get().cloned())
    }

    fn enqueue(&self, frame: Frame) -> Result<oneshot::Receiver<Result<()>>> {
        let (ack, written) = oneshot::channel();
        self.commands
            .send(WriteCommand::Frame { frame, ack })
            .map_err(|_| self.closed_error())?;
        Ok(written)
    }

    async fn written(&self, written: oneshot::Receiver<Result<()>>) -> Result<()> {
        written.await.map_err(|_| self.closed_error())?
    }

    /// Queue a data frame. The state check and the enqueue happen under the
    /// close lock so no frame can follow our CLOSE onto the wire.
    fn enqueue_data(&self, frame: Frame) -> Result<oneshot::Receiver<Result<()>>> {
        let _progress = self.progress.lock();
        if !self.state().can_send() {
            return Err(self.closed_error());
        }
        self.enqueue(frame)
    }

    fn enqueue_ping(
        &self,
        payload: Bytes,
    ) -> Result<(oneshot::Receiver<()>, oneshot::Receiver<Result<()>>)> {
        let _progress = self.progress.lock();
        if !self.state().can_send() {
            return Err(self.closed_error());
        }
        let mut pings = self.pings.lock();
        if pings.iter().any(|(data, _)| *data == payload) {
            return Err(Error::DuplicatePing);
        }
        let written = self.enqueue(Frame::ping(payload.clone()))?;
        let (tx, pong) = oneshot::channel();
        pings.push_back((payload, tx));
        Ok((pong, written))
    }

    /// `None` once our CLOSE is queued; nothing may follow it.
    fn enqueue_pong(&self, payload: Bytes) -> Result<Option<oneshot::Receiver<Result<()>>>> {
        let progress = self.progress.lock();
        if progress.sent {
            return Ok(None);
        }
        self.enqueue(Frame::pong(payload)).map(Some)
    }

    /// Queue our CLOSE unless one already went out or the connection is gone.
    fn enqueue_close(&self, close: CloseFrame) -> Option<oneshot::Receiver<Result<()>>> {
        let mut progress = self.progress.lock();
        if progress.sent || !self.state().is_active() {
            return None;
        }
        progress.sent = true;
        let frame = Frame::close(Some(&close));
        self.transition(ConnectionState::Closing);
        self.enqueue(frame).ok()
    }

    /// A PONG acknowledges the matching ping and every ping sent before it.
    fn acknowledge_pong(&self, payload: &[u8]) {
        let mut pings = self.pings.lock();
        match pings.iter().position(|(data, _)| data.as_ref() == payload) {
            Some(index) => {
                for (_, waiter) in pings.drain(..=index) {
                    let _ = waiter.send(());
                }
            }
            None => trace!(role = %self.role, "unsolicited pong"),
        }
    }

    async fn shutdown_writer(&self, writer: JoinHandle<()>) -> Result<()> {
        let (ack, done) = oneshot::channel();
        if self.commands.send(WriteCommand::Shutdown { ack }).is_err() {
            return Err(Error::Io("writer task stopped".into()));
        }
        match tokio::time::timeout(self.config.timeouts.close, done).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::Io("writer task stopped".into())),
            Err(elapsed) => {
                writer.abort();
                Err(elapsed.into())
            }
        }
    }

    fn finish(&self, close: CloseFrame) {
        debug!(role = %self.role, code = %close.code, reason = %close.reason, "connection closed");
        let _ = self.closed.set(close);
        // Dropping the senders fails every outstanding pong waiter.
        self.pings.lock().clear();
        self.transition(ConnectionState::Closed);
    }
}

/// A WebSocket connection after a successful opening handshake.
///
/// `Connection` owns two background tasks: a reader that decodes frames,
/// answers PING and CLOSE frames and queues complete messages, and a writer
/// that serializes every outgoing frame so bytes from concurrent calls
/// never interleave. A third task sends keepalive pings when
/// [`Config::ping_interval`] is set.
///
/// All methods take `&self`; share the connection through an [`Arc`] to send
/// from several tasks. At most one [`recv`](Self::recv) may be pending at a
/// time.
///
/// Dropping the last handle of a connection that is still open aborts it.
///
/// ## Example
///
/// ```rust,no_run
/// use wsengine::{ClientConfig, CloseCode, Message, connect};
///
/// # async fn run() -> wsengine::Result<()> {
/// let conn = connect("ws://127.0.0.1:9001/chat", ClientConfig::default()).await?;
/// conn.send(Message::text("Hello")).await?;
/// while let Some(msg) = conn.recv().await? {
///     println!("Received: {msg:?}");
/// }
/// conn.close(CloseCode::Normal, "").await?;
/// # Ok(())
/// # }
/// ```
pub struct Connection {
    shared: Arc<Shared>,
    messages: tokio::sync::Mutex<mpsc::UnboundedReceiver<Message>>,
    info: ConnectionInfo,
}

impl Connection {
    /// Start the engine over a stream whose handshake already completed.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new<T>(io: T, role: Role, config: Config) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::from_handshake(io, role, config, ConnectionInfo::default(), &[])
    }

    /// Start the engine with the handshake's results.
    ///
    /// `leftover` holds bytes read past the end of the HTTP head; they are
    /// decoded before anything else from `io`.
    pub fn from_handshake<T>(
        io: T,
        role: Role,
        config: Config,
        info: ConnectionInfo,
        leftover: &[u8],
    ) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(io);
        let frames = FrameReader::new(read_half, role, &config).with_buffered(leftover);
        let writer = FrameWriter::new(write_half, role, &config);

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (messages, message_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Open);
        let assembler = MessageAssembler::new(config.limits.clone());
        let keepalive_every = config.ping_interval;
        let ping_timeout = config.ping_timeout;

        let shared = Arc::new(Shared {
            role,
            config,
            commands,
            state,
            progress: Mutex::new(CloseProgress::default()),
            closed: OnceLock::new(),
            pings: Mutex::new(VecDeque::new()),
            abort: Notify::new(),
        });

        debug!(%role, host = %info.host, path = %info.path, "connection open");
        let writer = tokio::spawn(run_writer(writer, command_rx));
        let keepalive = keepalive_every
            .map(|every| tokio::spawn(keepalive(shared.clone(), every, ping_timeout)));
        let reader = Reader {
            shared: shared.clone(),
            frames,
            assembler,
            messages,
        };
        tokio::spawn(reader.run(writer, keepalive));

        Self {
            shared,
            messages: tokio::sync::Mutex::new(message_rx),
            info,
        }
    }

    /// Send a text or binary message as a single frame.
    ///
    /// # Errors
    ///
    /// - `Error::ConnectionClosed` unless the connection is open
    /// - `Error::MessageTooLarge` if the payload exceeds `limits.max_message_size`
    /// - `Error::Io` if the transport fails
    pub async fn send(&self, message: impl Into<Message>) -> Result<()> {
        let message = message.into();
        self.shared
            .config
            .limits
            .check_message_size(message.payload().len())?;
        let written = self.shared.enqueue_data(Frame::from(message))?;
        self.shared.written(written).await
    }

    /// Receive the next message.
    ///
    /// Returns `Ok(None)` once the connection is closed and every message
    /// that arrived before the close has been received.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConcurrentRecv` if another `recv()` is already waiting.
    pub async fn recv(&self) -> Result<Option<Message>> {
        let mut messages = self
            .messages
            .try_lock()
            .map_err(|_| Error::ConcurrentRecv)?;
        Ok(messages.recv().await)
    }

    /// Send a PING and return a future that resolves on the matching PONG.
    ///
    /// With `None`, four random bytes are used as the payload.
    ///
    /// # Errors
    ///
    /// - `Error::ConnectionClosed` unless the connection is open
    /// - `Error::ControlFrameTooLarge` for a payload over 125 bytes
    /// - `Error::DuplicatePing` if a ping with this payload is still waiting
    pub async fn ping(&self, data: Option<Vec<u8>>) -> Result<Pong> {
        let (pong, written) = match data {
            Some(data) => {
                if data.len() > MAX_CONTROL_FRAME_PAYLOAD {
                    return Err(Error::ControlFrameTooLarge(data.len()));
                }
                self.shared.enqueue_ping(Bytes::from(data))?
            }
            None => loop {
                match self.shared.enqueue_ping(random_ping_payload()?) {
                    Err(Error::DuplicatePing) => continue,
                    other => break other?,
                }
            },
        };
        self.shared.written(written).await?;
        Ok(Pong { rx: pong })
    }

    /// Perform the closing handshake.
    ///
    /// Sends CLOSE if the connection is open, then waits for the peer's CLOSE
    /// and the transport shutdown. If that takes longer than
    /// [`Timeouts::close`](crate::Timeouts::close) the transport is dropped and
    /// the close code becomes 1006. Calling it again, or after the peer
    /// closed, only waits.
    ///
    /// The final code is the one the peer sent back. If our CLOSE cannot be
    /// written, CLOSE(1002) goes out in its place.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidCloseCode` for a code that may not be sent
    /// - `Error::ControlFrameTooLarge` if the reason does not fit in a control frame
    pub async fn close(&self, code: CloseCode, reason: &str) -> Result<()> {
        if !code.is_sendable_by(self.shared.role) {
            return Err(Error::InvalidCloseCode(code.as_u16()));
        }
        if reason.len() + 2 > MAX_CONTROL_FRAME_PAYLOAD {
            return Err(Error::ControlFrameTooLarge(reason.len() + 2));
        }

        let written = self.shared.enqueue_close(CloseFrame::new(code, reason));
        if written.is_some() {
            debug!(role = %self.shared.role, %code, "closing");
        }
        let closing = async {
            if let Some(written) = written {
                if let Err(e) = self.shared.written(written).await {
                    debug!(error = %e, "close frame not written");
                }
            }
            self.wait_closed().await
        };

        let timeout = self.shared.config.timeouts.close;
        if tokio::time::timeout(timeout, closing).await.is_err() {
            warn!(role = %self.shared.role, ?timeout, "closing handshake timed out");
            self.shared.abort.notify_one();
            self.wait_closed().await;
        }
        Ok(())
    }

    /// Wait until the connection is closed and return its final status.
    pub async fn wait_closed(&self) -> CloseFrame {
        let mut state = self.shared.state.subscribe();
        // The sender lives in `shared`, so this only returns once closed.
        let _ = state.wait_for(|s| *s == ConnectionState::Closed).await;
        self.close_frame().unwrap_or_else(CloseFrame::abnormal)
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.shared.role
    }

    /// Final close status. `None` until the connection is closed.
    #[must_use]
    pub fn close_frame(&self) -> Option<CloseFrame> {
        self.shared.closed.get().cloned()
    }

    #[must_use]
    pub fn close_code(&self) -> Option<CloseCode> {
        self.shared.closed.get().map(|close| close.code)
    }

    #[must_use]
    pub fn close_reason(&self) -> Option<&str> {
        self.shared.closed.get().map(|close| close.reason.as_str())
    }

    #[must_use]
    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.info.host
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.info.port
    }

    #[must_use]
    pub fn secure(&self) -> bool {
        self.info.secure
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.info.path
    }

    #[must_use]
    pub fn subprotocol(&self) -> Option<&str> {
        self.info.subprotocol.as_deref()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("role", &self.shared.role)
            .field("state", &self.state())
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.shared.state().is_active() {
            self.shared.abort.notify_one();
        }
    }
}

/// Resolves when the peer answers the matching PING.
///
/// Fails with `Error::ConnectionClosed` if the connection closes first.
#[derive(Debug)]
#[must_use = "a pong waiter does nothing unless awaited"]
pub struct Pong {
    rx: oneshot::Receiver<()>,
}

impl Future for Pong {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.map_err(|_| Error::ConnectionClosed(None)))
    }
}

fn random_ping_payload() -> Result<Bytes> {
    let mut data = [0u8; 4];
    getrandom::getrandom(&mut data).map_err(|e| Error::Io(e.to_string()))?;
    Ok(Bytes::copy_from_slice(&data))
}

async fn run_writer<W: AsyncWrite + Unpin>(
    mut writer: FrameWriter<W>,
    mut commands: mpsc::UnboundedReceiver<WriteCommand>,
) {
    while let Some(command) = commands.recv().await {
        match command {
            WriteCommand::Frame { frame, ack } => {
                let mut result = writer.write_frame(&frame).await;
                if frame.opcode == OpCode::Close {
                    if let Err(e) = &result {
                        warn!(error = %e, "close frame not written, failing with protocol error");
                        let fallback = CloseFrame::new(CloseCode::ProtocolError, "");
                        result = writer.write_frame(&Frame::close(Some(&fallback))).await;
                    }
                }
                let _ = ack.send(result);
            }
            WriteCommand::Shutdown { ack } => {
                let _ = ack.send(writer.shutdown().await);
                return;
            }
        }
    }
}

async fn keepalive(shared: Arc<Shared>, every: Duration, timeout: Option<Duration>) {
    let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let payload = match random_ping_payload() {
            Ok(payload) => payload,
            Err(_) => return,
        };
        let (pong, written) = match shared.enqueue_ping(payload) {
            Ok(pending) => pending,
            Err(Error::DuplicatePing) => continue,
            Err(_) => return,
        };
        if shared.written(written).await.is_err() {
            return;
        }
        trace!(role = %shared.role, "keepalive ping sent");

        let Some(limit) = timeout else { continue };
        match tokio::time::timeout(limit, pong).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => return,
            Err(_) => {
                warn!(role = %shared.role, timeout = ?limit, "keepalive ping timed out");
                shared.abort.notify_one();
                return;
            }
        }
    }
}

struct Reader<R> {
    shared: Arc<Shared>,
    frames: FrameReader<R>,
    assembler: MessageAssembler,
    messages: mpsc::UnboundedSender<Message>,
}

impl<R: AsyncRead + Unpin> Reader<R> {
    async fn run(mut self, writer: JoinHandle<()>, keepalive: Option<JoinHandle<()>>) {
        let outcome = self.read_loop().await;
        if let Some(keepalive) = keepalive {
            keepalive.abort();
        }
        if outcome == Outcome::Clean && self.shared.role == Role::Client {
            self.await_server_close().await;
        }

        let shared = self.shared.clone();
        let shutdown = shared.shutdown_writer(writer).await;
        let close = match (outcome, shutdown) {
            (Outcome::Clean, Ok(())) => shared
                .progress
                .lock()
                .received
                .clone()
                .unwrap_or_else(CloseFrame::no_status),
            (Outcome::Clean, Err(e)) => {
                warn!(role = %shared.role, error = %e, "transport shutdown failed after closing handshake");
                CloseFrame::new(CloseCode::ProtocolError, "")
            }
            (Outcome::Lost, _) => CloseFrame::abnormal(),
            (Outcome::Failed(code), _) => CloseFrame::new(code, ""),
        };
        shared.finish(close);
    }

    async fn read_loop(&mut self) -> Outcome {
        let role = self.shared.role;
        loop {
            let frame = tokio::select! {
                biased;
                () = self.shared.abort.notified() => {
                    debug!(%role, "connection aborted");
                    return Outcome::Lost;
                }
                frame = self.frames.read_frame() => frame,
            };
            let handled = match frame {
                Ok(frame) => self.handle_frame(frame).await,
                Err(e) => Err(e),
            };
            match handled {
                Ok(None) => {}
                Ok(Some(outcome)) => return outcome,
                Err(e) if e.is_connection_loss() => {
                    debug!(%role, error = %e, "transport lost");
                    return Outcome::Lost;
                }
                Err(e) => {
                    let code = e.close_code();
                    warn!(%role, error = %e, %code, "failing connection");
                    return self.fail(code).await;
                }
            }
        }
    }

    async fn handle_frame(&mut self, frame: Frame) -> Result<Option<Outcome>> {
        match frame.opcode {
            OpCode::Ping => {
                let Some(written) = self.shared.enqueue_pong(frame.into_payload())? else {
                    return Ok(None);
                };
                match self.shared.written(written).await {
                    Ok(()) => Ok(None),
                    Err(e) if e.is_connection_loss() => Err(e),
                    Err(e) => {
                        error!(role = %self.shared.role, error = %e, "failed to answer ping");
                        Ok(Some(self.fail(CloseCode::InternalError).await))
                    }
                }
            }
            OpCode::Pong => {
                self.shared.acknowledge_pong(frame.payload());
                Ok(None)
            }
            OpCode::Close => self.handle_close(&frame).await.map(Some),
            _ => {
                if let Some(message) = self.assembler.push(frame)? {
                    // The application may have dropped its receiver.
                    let _ = self.messages.send(message);
                }
                Ok(None)
            }
        }
    }

    async fn handle_close(&mut self, frame: &Frame) -> Result<Outcome> {
        let role = self.shared.role;
        let received = frame.close_frame()?.unwrap_or_else(CloseFrame::no_status);
        debug!(%role, code = %received.code, reason = %received.reason, "close frame received");

        let echo = if received.code.is_sendable_by(role) {
            received.clone()
        } else {
            CloseFrame::new(CloseCode::Normal, "")
        };
        self.shared.progress.lock().received.get_or_insert(received);

        let Some(written) = self.shared.enqueue_close(echo) else {
            return Ok(Outcome::Clean);
        };
        match self.shared.written(written).await {
            Ok(()) => Ok(Outcome::Clean),
            Err(e) if e.is_connection_loss() => {
                debug!(%role, error = %e, "close echo not written");
                Ok(Outcome::Lost)
            }
            Err(e) => {
                error!(%role, error = %e, "failed to echo close frame");
                Ok(Outcome::Failed(CloseCode::InternalError))
            }
        }
    }

    /// Send CLOSE(code) if none went out yet, without waiting for the echo.
    async fn fail(&mut self, code: CloseCode) -> Outcome {
        if let Some(written) = self.shared.enqueue_close(CloseFrame::new(code, "")) {
            let timeout = self.shared.config.timeouts.close;
            let _ = tokio::time::timeout(timeout, self.shared.written(written)).await;
        }
        Outcome::Failed(code)
    }

    /// After the closing handshake the server closes the TCP connection first.
    async fn await_server_close(&mut self) {
        let timeout = self.shared.config.timeouts.close;
        let drained = tokio::time::timeout(timeout, async {
            while self.frames.read_frame().await.is_ok() {}
        })
        .await;
        if drained.is_err() {
            debug!(?timeout, "server did not close the transport in time");
        }
    }
}
