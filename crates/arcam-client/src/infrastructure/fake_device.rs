//! An in-process stand-in for a receiver, speaking the device side of the
//! protocol over TCP.
//!
//! Requests are answered by handlers registered per `(zone, command)` or per
//! `(zone, command, data)`; the exact-data handler wins when both exist.
//! Requests without a handler are answered with
//! [`AnswerCode::CommandNotRecognised`].  [`FakeDevice::push`] sends an
//! unsolicited status update to every connected client.
//!
//! Used by the integration tests and by `arcam server`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use arcam_core::{
    encode_response, AnswerCode, CommandCode, RequestKey, RequestPacket, ResponsePacket,
    StreamReassembler, Zone, QUERY,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::application::dispatch::{VOLUME_DOWN, VOLUME_UP};

/// What a handler wants sent back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// A status update for the request's zone and command carrying this data.
    Data(Vec<u8>),
    /// Arbitrary packets, in order.
    Packets(Vec<ResponsePacket>),
    /// A refusal with this answer code and no data.
    Refuse(AnswerCode),
    /// Nothing at all.
    Silent,
}

type Handler = Arc<dyn Fn(&RequestPacket) -> Reply + Send + Sync>;

type HandlerKey = (RequestKey, Option<Vec<u8>>);

/// Mutable state behind the standard handlers, one per zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneState {
    pub power: u8,
    pub volume: u8,
    pub mute: u8,
    pub source: u8,
}

impl Default for ZoneState {
    fn default() -> Self {
        Self {
            power: 1,
            volume: 10,
            mute: 1,
            source: 0x05,
        }
    }
}

/// The emulated receiver.  Cheap to clone; clones share handlers and
/// connected clients.
#[derive(Clone)]
pub struct FakeDevice {
    handlers: Arc<Mutex<HashMap<HandlerKey, Handler>>>,
    pushes: broadcast::Sender<ResponsePacket>,
}

impl Default for FakeDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeDevice {
    /// A device with no handlers; it refuses every command.
    pub fn new() -> Self {
        let (pushes, _) = broadcast::channel(64);
        Self {
            handlers: Arc::new(Mutex::new(HashMap::new())),
            pushes,
        }
    }

    /// A device that answers power, volume, mute and source for zones 1 and
    /// 2, the software version, and echoes IR commands.
    pub fn with_standard_handlers() -> Self {
        let device = Self::new();
        for zone in [Zone::MAIN, Zone::ZONE_2] {
            let state = Arc::new(Mutex::new(ZoneState::default()));
            device.register_zone_state(zone, state);
        }
        device.register(Zone::MAIN, CommandCode::SOFTWARE_VERSION, Some(vec![QUERY]), |_| {
            Reply::Data(vec![QUERY, 2, 4])
        });
        device.register(Zone::MAIN, CommandCode::SIMULATE_RC5_IR_COMMAND, None, |req| {
            Reply::Data(req.data.clone())
        });
        device
    }

    /// Registers `handler` for `(zone, command)` or, with `data`, only for
    /// requests carrying exactly that data.  Replaces an earlier handler for
    /// the same key.
    pub fn register<F>(&self, zone: Zone, command: CommandCode, data: Option<Vec<u8>>, handler: F)
    where
        F: Fn(&RequestPacket) -> Reply + Send + Sync + 'static,
    {
        let key = (RequestKey::new(zone, command), data);
        self.lock_handlers().insert(key, Arc::new(handler));
    }

    /// Sends `packet` to every connected client.  Returns how many received it.
    pub fn push(&self, packet: ResponsePacket) -> usize {
        self.pushes.send(packet).unwrap_or(0)
    }

    /// The packets this device answers `request` with.
    pub fn respond(&self, request: &RequestPacket) -> Vec<ResponsePacket> {
        let handler = {
            let handlers = self.lock_handlers();
            handlers
                .get(&(request.key(), Some(request.data.clone())))
                .or_else(|| handlers.get(&(request.key(), None)))
                .cloned()
        };

        let reply = match handler {
            Some(handler) => handler(request),
            None => Reply::Refuse(AnswerCode::CommandNotRecognised),
        };

        match reply {
            Reply::Data(data) => vec![ResponsePacket::status_update(request.zone, request.command, data)],
            Reply::Packets(packets) => packets,
            Reply::Refuse(answer) => vec![ResponsePacket::new(request.zone, request.command, answer, vec![])],
            Reply::Silent => Vec::new(),
        }
    }

    /// Starts accepting connections on `addr` (use port 0 for any free port).
    pub async fn bind(self, addr: &str) -> std::io::Result<RunningDevice> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (stop_tx, stop_rx) = watch::channel(false);
        info!(%local_addr, "fake receiver listening");

        let task = tokio::spawn(accept_loop(self, listener, stop_rx));
        Ok(RunningDevice {
            local_addr,
            stop: stop_tx,
            task,
        })
    }

    fn register_zone_state(&self, zone: Zone, state: Arc<Mutex<ZoneState>>) {
        let query = Some(vec![QUERY]);

        let s = Arc::clone(&state);
        self.register(zone, CommandCode::POWER, query.clone(), move |_| {
            Reply::Data(vec![lock(&s).power])
        });
        let s = Arc::clone(&state);
        self.register(zone, CommandCode::MUTE, query.clone(), move |_| Reply::Data(vec![lock(&s).mute]));
        let s = Arc::clone(&state);
        self.register(zone, CommandCode::VOLUME, None, move |req| {
            let mut zone = lock(&s);
            match req.data.as_slice() {
                [QUERY] => {}
                [VOLUME_UP] => zone.volume = zone.volume.saturating_add(1).min(99),
                [VOLUME_DOWN] => zone.volume = zone.volume.saturating_sub(1),
                [level] if *level <= 99 => zone.volume = *level,
                _ => return Reply::Refuse(AnswerCode::ParameterNotRecognised),
            }
            Reply::Data(vec![zone.volume])
        });
        let s = Arc::clone(&state);
        self.register(zone, CommandCode::CURRENT_SOURCE, None, move |req| {
            let mut zone = lock(&s);
            match req.data.as_slice() {
                [QUERY] => {}
                [code] => zone.source = *code,
                _ => return Reply::Refuse(AnswerCode::InvalidDataLength),
            }
            Reply::Data(vec![zone.source])
        });
    }

    fn lock_handlers(&self) -> std::sync::MutexGuard<'_, HashMap<HandlerKey, Handler>> {
        lock(&self.handlers)
    }
}

/// A bound [`FakeDevice`].  Dropping it does not stop the listener; call
/// [`RunningDevice::stop`].
pub struct RunningDevice {
    local_addr: SocketAddr,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RunningDevice {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting and drops every connected client.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            warn!("fake receiver task ended abnormally: {e}");
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ── Connection handling ───────────────────────────────────────────────────────

async fn accept_loop(device: FakeDevice, listener: TcpListener, mut stop: watch::Receiver<bool>) {
    let mut clients = Vec::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "client connected");
                    clients.push(tokio::spawn(serve_client(device.clone(), stream, peer, stop.clone())));
                }
                Err(e) => warn!("accept failed: {e}"),
            },
            _ = stop.changed() => break,
        }
    }
    for client in clients {
        let _ = client.await;
    }
    info!("fake receiver stopped");
}

async fn serve_client(device: FakeDevice, stream: TcpStream, peer: SocketAddr, mut stop: watch::Receiver<bool>) {
    let (mut reader, mut writer) = stream.into_split();
    let mut pushes = device.pushes.subscribe();
    let mut reassembler = StreamReassembler::<RequestPacket>::new();
    let mut buf = [0u8; 512];

    loop {
        let outgoing = tokio::select! {
            read = reader.read(&mut buf) => match read {
                Ok(0) => break,
                Ok(n) => {
                    let mut outgoing = Vec::new();
                    for frame in reassembler.feed(&buf[..n]) {
                        match frame {
                            Ok(request) => {
                                let responses = device.respond(&request);
                                debug!(%peer, key = %request.key(), responses = responses.len(), "request");
                                outgoing.extend(responses);
                            }
                            Err(e) => warn!(%peer, "dropping client stream: {e}"),
                        }
                    }
                    outgoing
                }
                Err(e) => {
                    debug!(%peer, "read failed: {e}");
                    break;
                }
            },
            pushed = pushes.recv() => match pushed {
                Ok(packet) => vec![packet],
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(%peer, skipped = n, "client lagging behind pushes");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = stop.changed() => break,
        };

        for packet in outgoing {
            let bytes = match encode_response(&packet) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(%peer, "handler produced an unencodable packet: {e}");
                    continue;
                }
            };
            if let Err(e) = writer.write_all(&bytes).await {
                debug!(%peer, "write failed: {e}");
                return;
            }
        }
    }
    debug!(%peer, "client disconnected");
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_command_is_not_recognised() {
        let device = FakeDevice::new();
        let request = RequestPacket::query(Zone::MAIN, CommandCode::VOLUME);

        let responses = device.respond(&request);

        assert_eq!(
            responses,
            vec![ResponsePacket::new(Zone::MAIN, CommandCode::VOLUME, AnswerCode::CommandNotRecognised, vec![])]
        );
    }

    #[test]
    fn test_exact_data_handler_wins_over_command_handler() {
        // Arrange
        let device = FakeDevice::new();
        device.register(Zone::MAIN, CommandCode::VOLUME, None, |_| Reply::Data(vec![1]));
        device.register(Zone::MAIN, CommandCode::VOLUME, Some(vec![QUERY]), |_| Reply::Data(vec![2]));

        // Act
        let query = device.respond(&RequestPacket::query(Zone::MAIN, CommandCode::VOLUME));
        let set = device.respond(&RequestPacket::new(Zone::MAIN, CommandCode::VOLUME, vec![30]));

        // Assert
        assert_eq!(query[0].data, vec![2]);
        assert_eq!(set[0].data, vec![1]);
    }

    #[test]
    fn test_standard_volume_handler_tracks_state_per_zone() {
        let device = FakeDevice::with_standard_handlers();

        device.respond(&RequestPacket::new(Zone::ZONE_2, CommandCode::VOLUME, vec![42]));
        let zone1 = device.respond(&RequestPacket::query(Zone::MAIN, CommandCode::VOLUME));
        let zone2 = device.respond(&RequestPacket::new(Zone::ZONE_2, CommandCode::VOLUME, vec![VOLUME_UP]));

        assert_eq!(zone1[0].data, vec![10]);
        assert_eq!(zone2[0].data, vec![43]);
    }

    #[test]
    fn test_out_of_range_volume_is_refused() {
        let device = FakeDevice::with_standard_handlers();

        let responses = device.respond(&RequestPacket::new(Zone::MAIN, CommandCode::VOLUME, vec![120]));

        assert_eq!(responses[0].answer, AnswerCode::ParameterNotRecognised);
    }

    #[test]
    fn test_silent_handler_sends_nothing() {
        let device = FakeDevice::new();
        device.register(Zone::MAIN, CommandCode::MENU, None, |_| Reply::Silent);

        assert!(device.respond(&RequestPacket::query(Zone::MAIN, CommandCode::MENU)).is_empty());
    }

    #[test]
    fn test_push_without_clients_reaches_nobody() {
        let device = FakeDevice::new();
        let update = ResponsePacket::status_update(Zone::MAIN, CommandCode::VOLUME, vec![5]);
        assert_eq!(device.push(update), 0);
    }
}
