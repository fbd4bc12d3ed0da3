//! Output formatting for the `arcam` binary.

use std::fmt;

use arcam_core::{ResponsePacket, SourceCode};
use serde::Serialize;

/// A zone's state as printed by `arcam state`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateReport {
    pub zone: u8,
    pub power: bool,
    pub volume: u8,
    pub muted: bool,
    pub source: Option<SourceCode>,
}

impl fmt::Display for StateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "zone:   {}", self.zone)?;
        writeln!(f, "power:  {}", if self.power { "on" } else { "standby" })?;
        writeln!(f, "volume: {}", self.volume)?;
        writeln!(f, "mute:   {}", if self.muted { "on" } else { "off" })?;
        match self.source {
            Some(source) => write!(f, "source: {source}"),
            None => write!(f, "source: unknown"),
        }
    }
}

/// `0D 01 F0` style.
pub fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02X}")).collect::<Vec<_>>().join(" ")
}

/// One line per unsolicited update, for `state --monitor`.
pub fn describe_update(packet: &ResponsePacket) -> String {
    let name = packet.command.name().unwrap_or("?");
    format!(
        "{} {} (0x{:02X}) answer 0x{:02X}: [{}]",
        packet.zone,
        name,
        packet.command.0,
        packet.answer.as_u8(),
        hex(&packet.data)
    )
}
