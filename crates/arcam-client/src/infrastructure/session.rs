//! One live connection to a receiver.
//!
//! # Architecture (for beginners)
//!
//! A [`Session`] is a cheap, cloneable *handle*.  The socket itself is owned
//! by a single background task, the session actor, which also owns the
//! [`StreamReassembler`] and the [`PendingTable`].  Handles talk to the actor
//! over an `mpsc` channel; every request carries a `oneshot` channel for its
//! answer.  Because only the actor touches the socket and the table, no locks
//! are needed and frames can never interleave on the wire.
//!
//! ```text
//!  Session::send ──Command::Send──▶ ┌──────────────┐ ──frame──▶ receiver
//!  Session::send ──Command::Send──▶ │ session actor│
//!  CancelOnDrop  ──Command::Cancel▶ │ (owns socket,│ ◀──bytes── receiver
//!                                   │ table, queue)│
//!  subscribe()   ◀─SessionEvent──── └──────────────┘
//! ```
//!
//! The actor loop waits on five things at once: a new command, bytes from the
//! socket, the next write slot (writes are spaced by `request_spacing`), the
//! earliest pending deadline, and the heartbeat timer.
//!
//! # Lifecycle
//!
//! `Open → Closing → Closed`, observable through [`Session::state`].  On EOF,
//! a read/write error (including a write the receiver does not accept within
//! `request_timeout`), an unrecoverable framing error, a heartbeat timeout or
//! [`Session::close`], every pending request fails and every later request
//! fails immediately with [`ClientError::ConnectionClosed`].

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use arcam_core::protocol::reassembler::DEFAULT_MAX_BUFFER;
use arcam_core::{
    encode_request, CommandCode, ProtocolError, RequestKey, RequestPacket, ResponsePacket,
    StreamReassembler, Zone,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, trace, warn};

use crate::error::ClientError;
use crate::infrastructure::pending::{DuplicatePolicy, PendingTable, RequestId, ResponseResult};

/// The keep-alive request: "is zone 1 powered?".
const HEARTBEAT_KEY: RequestKey = RequestKey::new(Zone::MAIN, CommandCode::POWER);

const READ_CHUNK: usize = 1024;

// ── Public types ──────────────────────────────────────────────────────────────

/// Runtime settings of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Time allowed between writing a request and receiving its response.
    pub request_timeout: Duration,
    /// Minimum gap between two frames on the wire.
    pub request_spacing: Duration,
    /// Write-idle interval after which a keep-alive query is sent.  The
    /// session closes if nothing is read for twice this long.
    pub heartbeat_interval: Option<Duration>,
    pub duplicate_policy: DuplicatePolicy,
    /// Bound on undecodable bytes held by the reassembler.
    pub max_buffer: usize,
    /// Capacity of the [`SessionEvent`] broadcast channel.
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(3),
            request_spacing: Duration::from_millis(200),
            heartbeat_interval: Some(Duration::from_secs(5)),
            duplicate_policy: DuplicatePolicy::Reject,
            max_buffer: DEFAULT_MAX_BUFFER,
            event_capacity: 64,
        }
    }
}

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Closing,
    Closed,
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// [`Session::close`] was called or every handle was dropped.
    Requested,
    /// The receiver closed the connection.
    Eof,
    /// Reading or writing the socket failed.
    Io(String),
    /// The inbound stream could not be resynchronised.
    ProtocolFatal(ProtocolError),
    /// Nothing was read for two heartbeat intervals.
    HeartbeatTimeout,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Requested => f.write_str("closed by owner"),
            CloseReason::Eof => f.write_str("connection closed by receiver"),
            CloseReason::Io(e) => write!(f, "I/O error: {e}"),
            CloseReason::ProtocolFatal(e) => write!(f, "protocol error: {e}"),
            CloseReason::HeartbeatTimeout => f.write_str("receiver stopped answering"),
        }
    }
}

/// Broadcast to every [`Session::subscribe`]r.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A response that no pending request was waiting for; normally a state
    /// change pushed by the receiver.
    Unsolicited(ResponsePacket),
    /// The session has closed.  Always the last event.
    Closed(CloseReason),
}

// ── Handle ────────────────────────────────────────────────────────────────────

struct Registration {
    id: RequestId,
    waiter: oneshot::Receiver<ResponseResult>,
}

enum Command {
    Send {
        packet: RequestPacket,
        reply: oneshot::Sender<Result<Registration, ClientError>>,
    },
    SendOnly {
        packet: RequestPacket,
        reply: oneshot::Sender<Result<(), ClientError>>,
    },
    Cancel {
        key: RequestKey,
        id: RequestId,
    },
    Close,
}

/// Handle to a running session.  Clone it freely; the session closes when
/// [`Session::close`] is called or the last handle is dropped.
#[derive(Clone)]
pub struct Session {
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<SessionEvent>,
    state: watch::Receiver<SessionState>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").field("state", &self.state()).finish()
    }
}

impl Session {
    /// Connects to `addr` over TCP and starts a session on the stream.
    ///
    /// # Errors
    ///
    /// [`ClientError::Io`] if the connection cannot be established within
    /// `config.request_timeout`.
    pub async fn connect(addr: &str, config: SessionConfig) -> Result<Session, ClientError> {
        let stream = tokio::time::timeout(config.request_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ClientError::Io(format!("timed out connecting to {addr}")))??;
        stream.set_nodelay(true)?;
        info!(%addr, "connected to receiver");
        Ok(Session::spawn(stream, config))
    }

    /// Starts a session on an already connected duplex stream.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn<S>(stream: S, config: SessionConfig) -> Session
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, _) = broadcast::channel(config.event_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(SessionState::Open);
        let (reader, writer) = tokio::io::split(stream);
        let now = Instant::now();

        let actor = SessionActor {
            reader,
            writer,
            reassembler: StreamReassembler::with_max_buffer(config.max_buffer),
            table: PendingTable::new(config.duplicate_policy),
            outbox: VecDeque::new(),
            next_write_at: now,
            last_activity: now,
            last_read: now,
            heartbeat_reply_by: None,
            commands: commands_rx,
            events: events_tx.clone(),
            state: state_tx,
            config,
        };
        tokio::spawn(actor.run());

        Session {
            commands: commands_tx,
            events: events_tx,
            state: state_rx,
        }
    }

    /// Sends `packet` and waits for the response with the same zone and
    /// command.
    ///
    /// Dropping the returned future withdraws the request from the pending
    /// table.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Encode`] for payloads over 255 bytes.
    /// - [`ClientError::DuplicateInFlight`] when the key is busy and the
    ///   session uses [`DuplicatePolicy::Reject`].
    /// - [`ClientError::Timeout`] when no response arrives in time.
    /// - [`ClientError::ConnectionClosed`] / [`ClientError::ProtocolFatal`]
    ///   when the session ends first.
    pub async fn send(&self, packet: RequestPacket) -> Result<ResponsePacket, ClientError> {
        let key = packet.key();
        let (reply, registered) = oneshot::channel();
        self.commands
            .send(Command::Send { packet, reply })
            .map_err(|_| ClientError::ConnectionClosed)?;
        let Registration { id, waiter } =
            registered.await.map_err(|_| ClientError::ConnectionClosed)??;

        let guard = CancelOnDrop {
            commands: &self.commands,
            key,
            id,
            armed: true,
        };
        let result = waiter.await.map_err(|_| ClientError::ConnectionClosed)?;
        guard.disarm();
        result
    }

    /// Queues `packet` for writing without waiting for (or expecting) a
    /// response.  Returns once the frame is queued.
    pub async fn send_only(&self, packet: RequestPacket) -> Result<(), ClientError> {
        let (reply, queued) = oneshot::channel();
        self.commands
            .send(Command::SendOnly { packet, reply })
            .map_err(|_| ClientError::ConnectionClosed)?;
        queued.await.map_err(|_| ClientError::ConnectionClosed)?
    }

    /// Receives unsolicited updates and the final close notification.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    /// Closes the session and waits until it is fully closed.
    pub async fn close(&self) {
        let _ = self.commands.send(Command::Close);
        self.closed().await;
    }

    /// Waits until the session reaches [`SessionState::Closed`].
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        let _ = state.wait_for(|s| *s == SessionState::Closed).await;
    }
}

/// Tells the actor to forget a registration whose caller stopped waiting.
struct CancelOnDrop<'a> {
    commands: &'a mpsc::UnboundedSender<Command>,
    key: RequestKey,
    id: RequestId,
    armed: bool,
}

impl CancelOnDrop<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CancelOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            let _ = self.commands.send(Command::Cancel {
                key: self.key,
                id: self.id,
            });
        }
    }
}

// ── Actor ─────────────────────────────────────────────────────────────────────

struct Outgoing {
    frame: Vec<u8>,
    key: RequestKey,
    id: Option<RequestId>,
}

struct SessionActor<S> {
    reader: ReadHalf<S>,
    writer: WriteHalf<S>,
    reassembler: StreamReassembler<ResponsePacket>,
    table: PendingTable,
    outbox: VecDeque<Outgoing>,
    next_write_at: Instant,
    /// Last time a frame was queued; drives the heartbeat.
    last_activity: Instant,
    last_read: Instant,
    /// Set while a heartbeat reply is expected.
    heartbeat_reply_by: Option<Instant>,
    commands: mpsc::UnboundedReceiver<Command>,
    events: broadcast::Sender<SessionEvent>,
    state: watch::Sender<SessionState>,
    config: SessionConfig,
}

impl<S> SessionActor<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn run(mut self) {
        debug!(config = ?self.config, "session started");
        let mut buf = vec![0u8; READ_CHUNK];

        let reason = loop {
            let write_at = (!self.outbox.is_empty()).then_some(self.next_write_at);
            let expiry = self.table.next_deadline();
            let heartbeat_at = self.next_heartbeat();

            tokio::select! {
                biased;

                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => {
                        if let Some(reason) = self.handle_command(cmd) {
                            break reason;
                        }
                    }
                    None => break CloseReason::Requested,
                },

                read = self.reader.read(&mut buf) => match read {
                    Ok(0) => break CloseReason::Eof,
                    Ok(n) => {
                        if let Err(reason) = self.handle_bytes(&buf[..n]) {
                            break reason;
                        }
                    }
                    Err(e) => break CloseReason::Io(e.to_string()),
                },

                () = sleep_until_some(write_at) => {
                    if let Err(e) = self.write_next().await {
                        break CloseReason::Io(e.to_string());
                    }
                }

                () = sleep_until_some(expiry) => {
                    let expired = self.table.expire_due(Instant::now());
                    if expired > 0 {
                        debug!(expired, "pending requests timed out");
                        self.drop_dead_frames();
                    }
                }

                () = sleep_until_some(heartbeat_at) => {
                    if let Some(reason) = self.heartbeat_tick() {
                        break reason;
                    }
                }
            }
        };

        self.shutdown(reason).await;
    }

    fn handle_command(&mut self, cmd: Command) -> Option<CloseReason> {
        match cmd {
            Command::Send { packet, reply } => {
                let key = packet.key();
                let frame = match encode_request(&packet) {
                    Ok(frame) => frame,
                    Err(e) => {
                        let _ = reply.send(Err(ClientError::Encode(e)));
                        return None;
                    }
                };
                let deadline = Instant::now() + self.config.request_timeout;
                match self.table.register(key, deadline) {
                    Ok((id, waiter)) => {
                        self.enqueue(Outgoing {
                            frame,
                            key,
                            id: Some(id),
                        });
                        if reply.send(Ok(Registration { id, waiter })).is_err() {
                            // Caller left before learning its id.
                            self.forget(key, id);
                        }
                    }
                    Err(e) => {
                        debug!(%key, "rejecting request: {e}");
                        let _ = reply.send(Err(e));
                    }
                }
            }
            Command::SendOnly { packet, reply } => {
                let result = encode_request(&packet)
                    .map(|frame| {
                        self.enqueue(Outgoing {
                            frame,
                            key: packet.key(),
                            id: None,
                        })
                    })
                    .map_err(ClientError::Encode);
                let _ = reply.send(result);
            }
            Command::Cancel { key, id } => self.forget(key, id),
            Command::Close => return Some(CloseReason::Requested),
        }
        None
    }

    fn enqueue(&mut self, outgoing: Outgoing) {
        trace!(key = %outgoing.key, queued = self.outbox.len(), "queueing frame");
        self.outbox.push_back(outgoing);
        self.last_activity = Instant::now();
    }

    /// Drops registration `id` and its frame if not yet written.
    fn forget(&mut self, key: RequestKey, id: RequestId) {
        self.table.cancel(key, id);
        self.outbox.retain(|o| o.id != Some(id));
    }

    /// Removes queued frames whose registration expired or was abandoned.
    fn drop_dead_frames(&mut self) {
        let table = &self.table;
        let before = self.outbox.len();
        self.outbox
            .retain(|o| o.id.map_or(true, |id| table.is_live(o.key, id)));
        let dropped = before - self.outbox.len();
        if dropped > 0 {
            debug!(dropped, "discarded unwritten frames nobody waits for");
        }
    }

    /// Writes the next frame that still has a waiting caller.
    ///
    /// A peer that stops reading fails the write after `request_timeout`.
    async fn write_next(&mut self) -> std::io::Result<()> {
        let outgoing = loop {
            match self.outbox.pop_front() {
                Some(o) if o.id.map_or(true, |id| self.table.is_live(o.key, id)) => break o,
                Some(o) => trace!(key = %o.key, "skipping frame of abandoned request"),
                None => return Ok(()),
            }
        };

        let writer = &mut self.writer;
        let write = async {
            writer.write_all(&outgoing.frame).await?;
            writer.flush().await
        };
        match tokio::time::timeout(self.config.request_timeout, write).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("receiver did not accept a frame within {:?}", self.config.request_timeout),
                ))
            }
        }

        let now = Instant::now();
        self.next_write_at = now + self.config.request_spacing;
        if let Some(id) = outgoing.id {
            // The timeout runs from the moment the device could see the request.
            self.table.rearm(outgoing.key, id, now + self.config.request_timeout);
        }
        debug!(key = %outgoing.key, bytes = outgoing.frame.len(), "wrote frame");
        Ok(())
    }

    fn handle_bytes(&mut self, bytes: &[u8]) -> Result<(), CloseReason> {
        self.last_read = Instant::now();
        let frames: Vec<_> = self.reassembler.feed(bytes).collect();
        for frame in frames {
            match frame {
                Ok(packet) => self.route(packet),
                Err(e) => return Err(CloseReason::ProtocolFatal(e)),
            }
        }
        Ok(())
    }

    fn route(&mut self, packet: ResponsePacket) {
        let key = packet.key();
        // A heartbeat reply is only recognised within one interval of sending.
        let heartbeat_reply = key == HEARTBEAT_KEY
            && self
                .heartbeat_reply_by
                .take()
                .is_some_and(|by| Instant::now() <= by);

        let Some(unsolicited) = self.table.resolve(packet) else {
            return;
        };
        if heartbeat_reply {
            trace!("heartbeat answered");
            return;
        }
        debug!(%key, answer = %unsolicited.answer, "unsolicited update");
        // No subscribers is fine.
        let _ = self.events.send(SessionEvent::Unsolicited(unsolicited));
    }

    fn next_heartbeat(&self) -> Option<Instant> {
        let interval = self.config.heartbeat_interval?;
        Some((self.last_activity + interval).min(self.last_read + 2 * interval))
    }

    fn heartbeat_tick(&mut self) -> Option<CloseReason> {
        let interval = self.config.heartbeat_interval?;
        let now = Instant::now();

        if now >= self.last_read + 2 * interval {
            warn!(silent_for = ?now.duration_since(self.last_read), "no data from receiver");
            return Some(CloseReason::HeartbeatTimeout);
        }
        if now >= self.last_activity + interval {
            match encode_request(&RequestPacket::query(HEARTBEAT_KEY.zone, HEARTBEAT_KEY.command)) {
                Ok(frame) => {
                    trace!("sending heartbeat");
                    self.heartbeat_reply_by = Some(now + interval);
                    self.enqueue(Outgoing {
                        frame,
                        key: HEARTBEAT_KEY,
                        id: None,
                    });
                }
                Err(e) => warn!("could not encode heartbeat: {e}"),
            }
        }
        None
    }

    async fn shutdown(mut self, reason: CloseReason) {
        self.state.send_replace(SessionState::Closing);

        let error = match &reason {
            CloseReason::ProtocolFatal(e) => ClientError::ProtocolFatal(e.clone()),
            _ => ClientError::ConnectionClosed,
        };
        let failed = self.table.fail_all(&error);
        let unsent = self.outbox.len();
        self.outbox.clear();

        // Refuse everything that raced with the close.
        self.commands.close();
        while let Ok(cmd) = self.commands.try_recv() {
            match cmd {
                Command::Send { reply, .. } => {
                    let _ = reply.send(Err(ClientError::ConnectionClosed));
                }
                Command::SendOnly { reply, .. } => {
                    let _ = reply.send(Err(ClientError::ConnectionClosed));
                }
                Command::Cancel { .. } | Command::Close => {}
            }
        }

        match tokio::time::timeout(self.config.request_timeout, self.writer.shutdown()).await {
            Ok(Err(e)) => trace!("socket shutdown: {e}"),
            Err(_) => trace!("socket shutdown timed out"),
            Ok(Ok(())) => {}
        }

        self.state.send_replace(SessionState::Closed);
        info!(%reason, failed, unsent, discarded = self.reassembler.discarded_bytes(), "session closed");
        let _ = self.events.send(SessionEvent::Closed(reason));
    }
}

async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
