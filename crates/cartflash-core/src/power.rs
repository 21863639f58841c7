//! Power rail and cartridge bus mode

use crate::codec::{Command, Reply};
use crate::error::{Error, Result};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// Cartridge power rail, mutually exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerState {
    /// Rail disabled
    #[default]
    Off,
    /// 3.3V (GBA)
    V3_3,
    /// 5V (GB/GBC)
    V5,
}

impl PowerState {
    /// Command that switches to this state
    pub fn command(self) -> Command {
        Command::PowerSet {
            enable: self != PowerState::Off,
            select_5v: self == PowerState::V5,
        }
    }

    /// Interpret a `PowerRead` reply
    pub fn from_reply(reply: Reply) -> Result<Self> {
        match reply {
            Reply::Power { enabled: false, .. } => Ok(PowerState::Off),
            Reply::Power { is_5v: true, .. } => Ok(PowerState::V5),
            Reply::Power { .. } => Ok(PowerState::V3_3),
            other => Err(Error::ProtocolDecode(format!(
                "expected power reply, got {:?}",
                other
            ))),
        }
    }

    /// Rail voltage in millivolts
    pub fn millivolts(self) -> u32 {
        match self {
            PowerState::Off => 0,
            PowerState::V3_3 => 3300,
            PowerState::V5 => 5000,
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerState::Off => write!(f, "off"),
            PowerState::V3_3 => write!(f, "3.3V"),
            PowerState::V5 => write!(f, "5V"),
        }
    }
}

impl FromStr for PowerState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "off" | "0" => Ok(PowerState::Off),
            "3.3" | "3.3v" | "3v3" => Ok(PowerState::V3_3),
            "5" | "5v" => Ok(PowerState::V5),
            _ => Err(Error::InvalidArgument(format!("unknown power state '{}'", s))),
        }
    }
}

/// Bus mode of the inserted cartridge
///
/// Profiles name it as a string (`"AGB"`, `"DMG"`), parsed with [`FromStr`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum CartMode {
    /// Game Boy Advance: 16-bit ROM words, latched address, 3.3V
    #[default]
    Agb,
    /// Game Boy / Game Boy Color: byte bus with mapper banking, 5V
    Dmg,
}

impl CartMode {
    /// Rail the cartridge bus needs in this mode
    pub fn required_power(self) -> PowerState {
        match self {
            CartMode::Agb => PowerState::V3_3,
            CartMode::Dmg => PowerState::V5,
        }
    }

    /// Width of one ROM bus word in bytes
    pub fn word_bytes(self) -> u32 {
        match self {
            CartMode::Agb => 2,
            CartMode::Dmg => 1,
        }
    }
}

impl fmt::Display for CartMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CartMode::Agb => write!(f, "AGB"),
            CartMode::Dmg => write!(f, "DMG"),
        }
    }
}

impl FromStr for CartMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "agb" | "gba" => Ok(CartMode::Agb),
            "dmg" | "gb" | "gbc" | "cgb" => Ok(CartMode::Dmg),
            _ => Err(Error::InvalidArgument(format!("unknown cartridge mode '{}'", s))),
        }
    }
}

impl TryFrom<String> for CartMode {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}
