//! Dispatcher: the typed front door for talking to a receiver.
//!
//! Turns "set zone 2 volume to 30" into a request packet, sends it through a
//! [`CommandTransport`], and turns the response back into a value or a typed
//! [`ClientError`].  Timing concerns (spacing, timeouts, keep-alive) live in
//! the session below this layer; the dispatcher only adds the checks that
//! depend on *which* command is sent.
//!
//! # Architecture
//!
//! The dispatcher depends only on the [`CommandTransport`] trait.  The
//! production implementation is [`Session`]; unit tests use the
//! `mockall`-generated `MockCommandTransport`.

use arcam_core::{
    AnswerCode, CommandCode, RequestKey, RequestPacket, ResponsePacket, SourceCode, Zone, QUERY,
};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::ClientError;
use crate::infrastructure::session::Session;

/// Payload for "volume up one step".
pub const VOLUME_UP: u8 = 0xF1;
/// Payload for "volume down one step".
pub const VOLUME_DOWN: u8 = 0xF2;

/// Sends request packets and returns the correlated response.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandTransport: Send + Sync {
    /// Sends `packet` and waits for the response with the same key.
    async fn request(&self, packet: RequestPacket) -> Result<ResponsePacket, ClientError>;

    /// Sends `packet` without waiting for a response.
    async fn send_only(&self, packet: RequestPacket) -> Result<(), ClientError>;
}

#[async_trait]
impl CommandTransport for Session {
    async fn request(&self, packet: RequestPacket) -> Result<ResponsePacket, ClientError> {
        self.send(packet).await
    }

    async fn send_only(&self, packet: RequestPacket) -> Result<(), ClientError> {
        Session::send_only(self, packet).await
    }
}

/// Behaviour knobs of the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Total attempts for a request that times out.  `1` disables retries.
    pub retry_attempts: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { retry_attempts: 2 }
    }
}

/// Typed command API over a [`CommandTransport`].
pub struct Dispatcher<T> {
    transport: T,
    config: DispatchConfig,
}

impl<T: CommandTransport> Dispatcher<T> {
    pub fn new(transport: T, config: DispatchConfig) -> Self {
        Self { transport, config }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Sends `command` with `data` to `zone` and returns the response payload.
    ///
    /// Send-only commands return an empty payload as soon as the frame is
    /// queued.  Timeouts are retried up to `retry_attempts` attempts in total.
    ///
    /// # Errors
    ///
    /// - [`ClientError::UnsupportedZone`] before anything is sent, if the
    ///   command only exists in zone 1.
    /// - [`ClientError::Rejected`] for a negative answer code.
    /// - [`ClientError::UnknownStatusCode`] for an undocumented answer code.
    /// - Any transport error.
    pub async fn request(
        &self,
        zone: Zone,
        command: CommandCode,
        data: impl Into<Vec<u8>>,
    ) -> Result<Vec<u8>, ClientError> {
        let packet = RequestPacket::new(zone, command, data);
        check_zone(&packet)?;

        if command.flags().send_only() {
            self.transport.send_only(packet).await?;
            return Ok(Vec::new());
        }

        let response = self.request_with_retry(packet).await?;
        interpret(response)
    }

    /// Sends `packet` as-is and returns the raw response, answer code
    /// included.  No zone check, no retry.
    pub async fn raw(&self, packet: RequestPacket) -> Result<ResponsePacket, ClientError> {
        self.transport.request(packet).await
    }

    async fn request_with_retry(&self, packet: RequestPacket) -> Result<ResponsePacket, ClientError> {
        let attempts = self.config.retry_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.transport.request(packet.clone()).await {
                Err(e) if e.is_retryable() && attempt < attempts => {
                    warn!(key = %packet.key(), attempt, "retrying after: {e}");
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    // ── Typed helpers ─────────────────────────────────────────────────────────

    /// Current volume (0–99 on most models).
    pub async fn volume(&self, zone: Zone) -> Result<u8, ClientError> {
        self.query_byte(zone, CommandCode::VOLUME).await
    }

    /// Sets the volume and returns the level the receiver reports back.
    pub async fn set_volume(&self, zone: Zone, level: u8) -> Result<u8, ClientError> {
        let data = self.request(zone, CommandCode::VOLUME, [level]).await?;
        first_byte(zone, CommandCode::VOLUME, data)
    }

    pub async fn volume_up(&self, zone: Zone) -> Result<u8, ClientError> {
        let data = self.request(zone, CommandCode::VOLUME, [VOLUME_UP]).await?;
        first_byte(zone, CommandCode::VOLUME, data)
    }

    pub async fn volume_down(&self, zone: Zone) -> Result<u8, ClientError> {
        let data = self.request(zone, CommandCode::VOLUME, [VOLUME_DOWN]).await?;
        first_byte(zone, CommandCode::VOLUME, data)
    }

    /// `true` when the zone is muted.  The receiver reports `0` for muted.
    pub async fn mute(&self, zone: Zone) -> Result<bool, ClientError> {
        Ok(self.query_byte(zone, CommandCode::MUTE).await? == 0)
    }

    /// `true` when the zone is powered on.
    pub async fn power(&self, zone: Zone) -> Result<bool, ClientError> {
        Ok(self.query_byte(zone, CommandCode::POWER).await? == 1)
    }

    /// The selected input as its raw byte code.
    pub async fn source_code(&self, zone: Zone) -> Result<u8, ClientError> {
        self.query_byte(zone, CommandCode::CURRENT_SOURCE).await
    }

    /// The selected input.
    pub async fn source(&self, zone: Zone) -> Result<SourceCode, ClientError> {
        let code = self.source_code(zone).await?;
        SourceCode::from_byte(code).ok_or_else(|| ClientError::UnexpectedPayload {
            key: RequestKey::new(zone, CommandCode::CURRENT_SOURCE),
            data: vec![code],
        })
    }

    /// Selects an input by raw byte code.
    pub async fn set_source_code(&self, zone: Zone, code: u8) -> Result<(), ClientError> {
        self.request(zone, CommandCode::CURRENT_SOURCE, [code]).await?;
        debug!(%zone, code, "source selected");
        Ok(())
    }

    /// Selects an input.
    pub async fn set_source(&self, zone: Zone, source: SourceCode) -> Result<(), ClientError> {
        self.set_source_code(zone, source.to_byte()).await
    }

    /// Software version bytes as reported by the receiver.
    pub async fn software_version(&self) -> Result<Vec<u8>, ClientError> {
        self.request(Zone::MAIN, CommandCode::SOFTWARE_VERSION, [QUERY]).await
    }

    /// Simulates a press on the infrared remote (RC5 `system`, `command`).
    pub async fn simulate_rc5(&self, zone: Zone, system: u8, command: u8) -> Result<(), ClientError> {
        self.request(zone, CommandCode::SIMULATE_RC5_IR_COMMAND, [system, command])
            .await
            .map(drop)
    }

    async fn query_byte(&self, zone: Zone, command: CommandCode) -> Result<u8, ClientError> {
        let data = self.request(zone, command, [QUERY]).await?;
        first_byte(zone, command, data)
    }
}

fn check_zone(packet: &RequestPacket) -> Result<(), ClientError> {
    if packet.zone != Zone::MAIN && !packet.command.flags().zone_support() {
        return Err(ClientError::UnsupportedZone { key: packet.key() });
    }
    Ok(())
}

/// Maps the answer code to a payload or an error.
fn interpret(response: ResponsePacket) -> Result<Vec<u8>, ClientError> {
    match response.answer {
        AnswerCode::StatusUpdate => Ok(response.data),
        AnswerCode::Unknown(code) => Err(ClientError::UnknownStatusCode { code, response }),
        answer => Err(ClientError::Rejected { answer, response }),
    }
}

fn first_byte(zone: Zone, command: CommandCode, data: Vec<u8>) -> Result<u8, ClientError> {
    match data.first() {
        Some(&b) => Ok(b),
        None => Err(ClientError::UnexpectedPayload {
            key: RequestKey::new(zone, command),
            data,
        }),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
