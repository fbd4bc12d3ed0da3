//! Vendor code tables: command codes, answer codes and input sources.
//!
//! Command codes are modelled as a newtype over `u8` rather than a closed
//! enum because receivers regularly answer with codes that a given firmware
//! documents but this table does not list.  Unknown codes must still flow
//! through the codec so that they can be correlated and reported.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ── Command flags ─────────────────────────────────────────────────────────────

/// Per-command behaviour flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandFlags(pub u8);

impl CommandFlags {
    /// The command may be addressed to zones other than zone 1.
    pub const ZONE_SUPPORT: u8 = 1 << 0;
    /// The device never answers this command.
    pub const SEND_ONLY: u8 = 1 << 1;

    pub const fn contains(self, flag: u8) -> bool {
        self.0 & flag == flag
    }

    pub const fn zone_support(self) -> bool {
        self.contains(Self::ZONE_SUPPORT)
    }

    pub const fn send_only(self) -> bool {
        self.contains(Self::SEND_ONLY)
    }
}

// ── Command codes ─────────────────────────────────────────────────────────────

/// Identifies the operation a frame refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandCode(pub u8);

macro_rules! command_codes {
    ($( $name:ident = $value:literal, $flags:expr; )*) => {
        impl CommandCode {
            $( pub const $name: CommandCode = CommandCode($value); )*

            /// Symbolic name, when the code is in the table.
            pub fn name(self) -> Option<&'static str> {
                match self.0 {
                    $( $value => Some(stringify!($name)), )*
                    _ => None,
                }
            }

            /// Behaviour flags; unknown codes get no flags.
            pub fn flags(self) -> CommandFlags {
                match self.0 {
                    $( $value => CommandFlags($flags), )*
                    _ => CommandFlags::default(),
                }
            }

            /// Looks a code up by its symbolic name (case-insensitive).
            pub fn from_name(name: &str) -> Option<CommandCode> {
                $(
                    if name.eq_ignore_ascii_case(stringify!($name)) {
                        return Some(CommandCode::$name);
                    }
                )*
                None
            }
        }
    };
}

const ZONE: u8 = CommandFlags::ZONE_SUPPORT;
const NONE: u8 = 0;

command_codes! {
    // System
    POWER = 0x00, ZONE;
    DISPLAY_BRIGHTNESS = 0x01, NONE;
    HEADPHONES = 0x02, NONE;
    FM_GENRE = 0x03, ZONE;
    SOFTWARE_VERSION = 0x04, NONE;
    RESTORE_FACTORY_DEFAULT = 0x05, NONE;
    SAVE_RESTORE_COPY_OF_SETTINGS = 0x06, NONE;
    SIMULATE_RC5_IR_COMMAND = 0x08, ZONE | CommandFlags::SEND_ONLY;
    DISPLAY_INFORMATION_TYPE = 0x09, ZONE;
    CURRENT_SOURCE = 0x1D, ZONE;
    HEADPHONES_OVERRIDE = 0x1F, ZONE;
    // Input
    VIDEO_SELECTION = 0x0A, NONE;
    SELECT_ANALOG_DIGITAL = 0x0B, NONE;
    VIDEO_INPUT_TYPE = 0x0C, NONE;
    // Output
    VOLUME = 0x0D, ZONE;
    MUTE = 0x0E, ZONE;
    DIRECT_MODE_STATUS = 0x0F, NONE;
    DECODE_MODE_STATUS_2CH = 0x10, NONE;
    DECODE_MODE_STATUS_MCH = 0x11, NONE;
    RDS_INFORMATION = 0x12, ZONE;
    VIDEO_OUTPUT_RESOLUTION = 0x13, NONE;
    // Menu and tuner
    MENU = 0x14, NONE;
    TUNER_PRESET = 0x15, ZONE;
    TUNE = 0x16, ZONE;
    DAB_STATION = 0x18, ZONE;
    DAB_PROGRAM_TYPE_CATEGORY = 0x19, ZONE;
    DLS_PDT_INFO = 0x1A, ZONE;
    PRESET_DETAIL = 0x1B, ZONE;
    NETWORK_PLAYBACK_STATUS = 0x1C, NONE;
    // 2.0 commands
    INPUT_NAME = 0x20, NONE;
    FM_SCAN = 0x23, NONE;
    DAB_SCAN = 0x24, NONE;
    HEARTBEAT = 0x25, NONE;
    REBOOT = 0x26, NONE;
    // Setup
    TREBLE_EQUALIZATION = 0x35, ZONE;
    BASS_EQUALIZATION = 0x36, ZONE;
    ROOM_EQUALIZATION = 0x37, ZONE;
    DOLBY_VOLUME = 0x38, ZONE;
    DOLBY_LEVELER = 0x39, ZONE;
    DOLBY_VOLUME_CALIBRATION_OFFSET = 0x3A, ZONE;
    BALANCE = 0x3B, ZONE;
    SUBWOOFER_TRIM = 0x3F, ZONE;
    LIPSYNC_DELAY = 0x40, ZONE;
    COMPRESSION = 0x41, ZONE;
    INCOMING_VIDEO_PARAMETERS = 0x42, NONE;
    INCOMING_AUDIO_FORMAT = 0x43, NONE;
    INCOMING_AUDIO_SAMPLE_RATE = 0x44, NONE;
    NOW_PLAYING_INFO = 0x64, ZONE;
}

impl From<u8> for CommandCode {
    fn from(value: u8) -> Self {
        CommandCode(value)
    }
}

impl From<CommandCode> for u8 {
    fn from(code: CommandCode) -> Self {
        code.0
    }
}

impl fmt::Display for CommandCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name} (0x{:02X})", self.0),
            None => write!(f, "0x{:02X}", self.0),
        }
    }
}

// ── Answer codes ──────────────────────────────────────────────────────────────

/// Result code carried by every response frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnswerCode {
    /// `0x00`: the command succeeded, or the device is pushing a state change.
    StatusUpdate,
    /// `0x82`
    ZoneInvalid,
    /// `0x83`
    CommandNotRecognised,
    /// `0x84`
    ParameterNotRecognised,
    /// `0x85`
    CommandInvalidAtThisTime,
    /// `0x86`
    InvalidDataLength,
    /// Any other byte.  Kept so that the rest of the packet is not lost.
    Unknown(u8),
}

impl AnswerCode {
    pub const fn as_u8(self) -> u8 {
        match self {
            AnswerCode::StatusUpdate => 0x00,
            AnswerCode::ZoneInvalid => 0x82,
            AnswerCode::CommandNotRecognised => 0x83,
            AnswerCode::ParameterNotRecognised => 0x84,
            AnswerCode::CommandInvalidAtThisTime => 0x85,
            AnswerCode::InvalidDataLength => 0x86,
            AnswerCode::Unknown(code) => code,
        }
    }

    pub const fn is_ok(self) -> bool {
        matches!(self, AnswerCode::StatusUpdate)
    }

    pub const fn is_recognised(self) -> bool {
        !matches!(self, AnswerCode::Unknown(_))
    }
}

impl From<u8> for AnswerCode {
    fn from(value: u8) -> Self {
        match value {
            0x00 => AnswerCode::StatusUpdate,
            0x82 => AnswerCode::ZoneInvalid,
            0x83 => AnswerCode::CommandNotRecognised,
            0x84 => AnswerCode::ParameterNotRecognised,
            0x85 => AnswerCode::CommandInvalidAtThisTime,
            0x86 => AnswerCode::InvalidDataLength,
            other => AnswerCode::Unknown(other),
        }
    }
}

impl fmt::Display for AnswerCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            AnswerCode::StatusUpdate => "ok",
            AnswerCode::ZoneInvalid => "zone invalid",
            AnswerCode::CommandNotRecognised => "command not recognised",
            AnswerCode::ParameterNotRecognised => "parameter not recognised",
            AnswerCode::CommandInvalidAtThisTime => "command invalid at this time",
            AnswerCode::InvalidDataLength => "invalid data length",
            AnswerCode::Unknown(code) => return write!(f, "unknown answer code 0x{code:02X}"),
        };
        f.write_str(text)
    }
}

// ── Input sources ─────────────────────────────────────────────────────────────

/// Input sources as numbered by the standard AVR source table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceCode {
    FollowZone1,
    Cd,
    Bd,
    Av,
    Sat,
    Pvr,
    Vcr,
    Aux,
    Display,
    Fm,
    Dab,
    Net,
    Usb,
    Stb,
    Game,
    Phono,
    ArcErc,
}

const SOURCE_TABLE: &[(SourceCode, u8, &str)] = &[
    (SourceCode::FollowZone1, 0x00, "FOLLOW_ZONE_1"),
    (SourceCode::Cd, 0x01, "CD"),
    (SourceCode::Bd, 0x02, "BD"),
    (SourceCode::Av, 0x03, "AV"),
    (SourceCode::Sat, 0x04, "SAT"),
    (SourceCode::Pvr, 0x05, "PVR"),
    (SourceCode::Vcr, 0x06, "VCR"),
    (SourceCode::Aux, 0x08, "AUX"),
    (SourceCode::Display, 0x09, "DISPLAY"),
    (SourceCode::Fm, 0x0B, "FM"),
    (SourceCode::Dab, 0x0C, "DAB"),
    (SourceCode::Net, 0x0E, "NET"),
    (SourceCode::Usb, 0x0F, "USB"),
    (SourceCode::Stb, 0x10, "STB"),
    (SourceCode::Game, 0x11, "GAME"),
    (SourceCode::Phono, 0x12, "PHONO"),
    (SourceCode::ArcErc, 0x13, "ARC_ERC"),
];

impl SourceCode {
    pub fn to_byte(self) -> u8 {
        SOURCE_TABLE
            .iter()
            .find(|(source, _, _)| *source == self)
            .map(|(_, byte, _)| *byte)
            .unwrap_or_default()
    }

    pub fn from_byte(byte: u8) -> Option<SourceCode> {
        SOURCE_TABLE
            .iter()
            .find(|(_, b, _)| *b == byte)
            .map(|(source, _, _)| *source)
    }

    pub fn name(self) -> &'static str {
        SOURCE_TABLE
            .iter()
            .find(|(source, _, _)| *source == self)
            .map(|(_, _, name)| *name)
            .unwrap_or("UNKNOWN")
    }

    pub fn all() -> impl Iterator<Item = SourceCode> {
        SOURCE_TABLE.iter().map(|(source, _, _)| *source)
    }
}

impl fmt::Display for SourceCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SourceCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SOURCE_TABLE
            .iter()
            .find(|(_, _, name)| name.eq_ignore_ascii_case(s))
            .map(|(source, _, _)| *source)
            .ok_or_else(|| format!("unknown source: {s}"))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_supports_zones_and_expects_answer() {
        let flags = CommandCode::VOLUME.flags();
        assert!(flags.zone_support());
        assert!(!flags.send_only());
    }

    #[test]
    fn test_rc5_simulation_is_send_only() {
        assert!(CommandCode::SIMULATE_RC5_IR_COMMAND.flags().send_only());
    }

    #[test]
    fn test_software_version_is_zone_one_only() {
        assert!(!CommandCode::SOFTWARE_VERSION.flags().zone_support());
    }

    #[test]
    fn test_unknown_command_has_no_name_or_flags() {
        let code = CommandCode(0xEE);
        assert_eq!(code.name(), None);
        assert_eq!(code.flags(), CommandFlags::default());
        assert_eq!(code.to_string(), "0xEE");
    }

    #[test]
    fn test_command_from_name_is_case_insensitive() {
        assert_eq!(CommandCode::from_name("volume"), Some(CommandCode::VOLUME));
        assert_eq!(CommandCode::from_name("no_such_thing"), None);
    }

    #[test]
    fn test_answer_code_byte_mapping_is_reversible() {
        for byte in [0x00, 0x82, 0x83, 0x84, 0x85, 0x86, 0x01, 0xFF] {
            assert_eq!(AnswerCode::from(byte).as_u8(), byte);
        }
    }

    #[test]
    fn test_answer_code_unknown_is_not_recognised() {
        assert!(!AnswerCode::from(0x7F).is_recognised());
        assert!(AnswerCode::from(0x83).is_recognised());
        assert!(AnswerCode::from(0x00).is_ok());
    }

    #[test]
    fn test_source_table_lookup_both_ways() {
        assert_eq!(SourceCode::Pvr.to_byte(), 0x05);
        assert_eq!(SourceCode::from_byte(0x0B), Some(SourceCode::Fm));
        assert_eq!(SourceCode::from_byte(0x07), None);
    }

    #[test]
    fn test_source_parse_accepts_table_names() {
        assert_eq!("arc_erc".parse::<SourceCode>(), Ok(SourceCode::ArcErc));
        assert!("TAPE".parse::<SourceCode>().is_err());
    }

    #[test]
    fn test_every_source_has_a_unique_byte() {
        let mut bytes: Vec<u8> = SourceCode::all().map(SourceCode::to_byte).collect();
        let total = bytes.len();
        bytes.sort_unstable();
        bytes.dedup();
        assert_eq!(bytes.len(), total);
    }
}
