//! Flash cartridge profiles
//!
//! A profile describes one flash-chip family as the cartridge wires it:
//! the command sequences for unlock, identification, erase, programming and
//! reset, plus voltage, size and sector layout. Profiles are loaded from
//! JSON or RON files with the same shape:
//!
//! ```json
//! {
//!   "type": "AGB",
//!   "names": ["AMD 29LV320 (32 MiB)"],
//!   "flash_ids": [[1, 0, "0xF9", "0x22"]],
//!   "voltage": 3.3,
//!   "flash_size": "0x2000000",
//!   "sector_size": [["0x10000", 512]],
//!   "commands": {
//!     "reset": [["0", "0xF0"]],
//!     "sector_erase": {
//!       "sequence": [["0x555", "0xAA"], ["0x2AA", "0x55"], ["0x555", "0x80"],
//!                    ["0x555", "0xAA"], ["0x2AA", "0x55"], ["SA", "0x30"]],
//!       "wait_for": {"addr": "SA", "mask": "0xFFFF", "value": "0xFFFF"},
//!       "timeout_s": 5
//!     },
//!     "single_write": {
//!       "sequence": [["0x555", "0xAA"], ["0x2AA", "0x55"], ["0x555", "0xA0"], ["PA", "PD"]]
//!     }
//!   }
//! }
//! ```
//!
//! Addresses are bus-word addresses: halfwords on GBA, bytes on GB. Numbers
//! may be integers or `"0x..."` strings. A step is `[addr, data]`,
//! `[addr, data, repeat]` or `["DELAY", microseconds]`.

use crate::engine::WritePin;
use crate::error::{Error, Result};
use crate::power::{CartMode, PowerState};
use serde::Deserialize;

// ============================================================================
// Operands and steps
// ============================================================================

/// Raw JSON/RON scalar
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawValue {
    Int(u64),
    Str(String),
}

/// Parse a number that can be hex (0x...) or decimal
fn parse_number(s: &str) -> std::result::Result<u32, String> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("invalid hex '{}': {}", s, e))
    } else {
        s.parse().map_err(|e| format!("invalid number '{}': {}", s, e))
    }
}

impl TryFrom<RawValue> for u32 {
    type Error = String;

    fn try_from(raw: RawValue) -> std::result::Result<Self, String> {
        match raw {
            RawValue::Int(n) => u32::try_from(n).map_err(|_| format!("{} out of range", n)),
            RawValue::Str(s) => parse_number(&s),
        }
    }
}

/// Number accepted as integer or hex string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawValue")]
struct Num(u32);

impl TryFrom<RawValue> for Num {
    type Error = String;

    fn try_from(raw: RawValue) -> std::result::Result<Self, String> {
        u32::try_from(raw).map(Num)
    }
}

/// Address or data operand of a command step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawValue")]
pub enum Operand {
    /// Literal value
    Value(u32),
    /// Current sector base plus an offset (`SA`, `SA+1`, `SA+2`)
    SectorAddr(u32),
    /// Address of the word being programmed (`PA`)
    ProgramAddr,
    /// Word being programmed (`PD`)
    ProgramData,
    /// Buffer word count minus one (`BS`)
    BufferSize,
}

impl TryFrom<RawValue> for Operand {
    type Error = String;

    fn try_from(raw: RawValue) -> std::result::Result<Self, String> {
        let s = match raw {
            RawValue::Int(_) => return u32::try_from(raw).map(Operand::Value),
            RawValue::Str(s) => s,
        };
        match s.trim().to_ascii_uppercase().as_str() {
            "SA" => Ok(Operand::SectorAddr(0)),
            "SA+1" => Ok(Operand::SectorAddr(1)),
            "SA+2" => Ok(Operand::SectorAddr(2)),
            "PA" => Ok(Operand::ProgramAddr),
            "PD" => Ok(Operand::ProgramData),
            "BS" => Ok(Operand::BufferSize),
            _ => parse_number(&s).map(Operand::Value),
        }
    }
}

/// Values placeholders resolve to at encode time
#[derive(Debug, Clone, Copy, Default)]
pub struct Resolve {
    /// Current sector base, bus-word address
    pub sector: Option<u32>,
    /// Word address and value being programmed
    pub program: Option<(u32, u16)>,
    /// Buffer word count minus one
    pub buffer_size: Option<u32>,
}

impl Operand {
    /// Placeholder name if this operand needs context
    pub fn placeholder(&self) -> Option<&'static str> {
        match self {
            Operand::Value(_) => None,
            Operand::SectorAddr(_) => Some("SA"),
            Operand::ProgramAddr => Some("PA"),
            Operand::ProgramData => Some("PD"),
            Operand::BufferSize => Some("BS"),
        }
    }

    /// Resolve against the current context
    pub fn resolve(&self, ctx: &Resolve) -> Result<u32> {
        let missing = |name: &str| Error::Profile(format!("{} used outside its context", name));
        match *self {
            Operand::Value(v) => Ok(v),
            Operand::SectorAddr(offset) => ctx.sector.map(|sa| sa + offset).ok_or_else(|| missing("SA")),
            Operand::ProgramAddr => ctx.program.map(|(pa, _)| pa).ok_or_else(|| missing("PA")),
            Operand::ProgramData => ctx.program.map(|(_, pd)| pd as u32).ok_or_else(|| missing("PD")),
            Operand::BufferSize => ctx.buffer_size.ok_or_else(|| missing("BS")),
        }
    }
}

/// One entry of a command sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "Vec<RawValue>")]
pub enum Step {
    /// Bus write, repeated `repeat` times
    Write {
        /// Target address
        addr: Operand,
        /// Value written
        data: Operand,
        /// Number of times the write is issued
        repeat: u32,
    },
    /// Device-side settle delay in microseconds
    Delay(u32),
}

impl Step {
    /// Single write of two operands
    pub const fn write(addr: Operand, data: Operand) -> Self {
        Step::Write { addr, data, repeat: 1 }
    }

    /// Whether this is the `[PA, PD]` data step
    pub fn is_program_data(&self) -> bool {
        matches!(
            self,
            Step::Write {
                addr: Operand::ProgramAddr,
                data: Operand::ProgramData,
                ..
            }
        )
    }

    fn operands(&self) -> Vec<Operand> {
        match *self {
            Step::Write { addr, data, .. } => vec![addr, data],
            Step::Delay(_) => Vec::new(),
        }
    }
}

impl TryFrom<Vec<RawValue>> for Step {
    type Error = String;

    fn try_from(raw: Vec<RawValue>) -> std::result::Result<Self, String> {
        if let [RawValue::Str(tag), us] = raw.as_slice() {
            if tag.eq_ignore_ascii_case("DELAY") {
                return u32::try_from(us.clone()).map(Step::Delay);
            }
        }
        let mut it = raw.into_iter();
        match (it.next(), it.next(), it.next(), it.next()) {
            (Some(addr), Some(data), repeat, None) => {
                let repeat = match repeat {
                    Some(r) => u32::try_from(r)?,
                    None => 1,
                };
                if repeat == 0 {
                    return Err("repeat count must be at least 1".into());
                }
                Ok(Step::Write {
                    addr: Operand::try_from(addr)?,
                    data: Operand::try_from(data)?,
                    repeat,
                })
            }
            _ => Err("step must be [addr, data], [addr, data, repeat] or [\"DELAY\", us]".into()),
        }
    }
}

/// Masked readback predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct WaitFor {
    /// Address polled
    pub addr: Operand,
    /// Mask applied to both sides
    pub mask: Operand,
    /// Expected value
    pub value: Operand,
}

impl WaitFor {
    fn operands(&self) -> Vec<Operand> {
        vec![self.addr, self.mask, self.value]
    }
}

// ============================================================================
// Profile file format (intermediate)
// ============================================================================

fn default_timeout_s() -> u32 {
    60
}

fn default_poll_interval_ms() -> u32 {
    1000
}

fn default_max_polls() -> u32 {
    1000
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProfileDef {
    #[serde(rename = "type")]
    cart_type: CartMode,
    names: Vec<String>,
    #[serde(default)]
    flash_ids: Vec<Vec<Num>>,
    #[serde(default)]
    flash_id_mask: Option<Vec<Num>>,
    voltage: f64,
    flash_size: Num,
    #[serde(default)]
    sector_size: Vec<Vec<Num>>,
    #[serde(default)]
    write_pin: WritePin,
    #[serde(default)]
    buffer_size: Option<Num>,
    commands: CommandsDef,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct CommandsDef {
    #[serde(default)]
    reset: Vec<Step>,
    #[serde(default)]
    read_identifier: Vec<Step>,
    #[serde(default)]
    unlock: Vec<Step>,
    #[serde(default)]
    chip_erase: Option<EraseOp>,
    #[serde(default)]
    sector_erase: Option<EraseOp>,
    #[serde(default)]
    single_write: Option<WriteOp>,
    #[serde(default)]
    buffer_write: Option<WriteOp>,
}

// ============================================================================
// Validated profile
// ============================================================================

/// Erase command with its completion predicate
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EraseOp {
    /// Command steps
    pub sequence: Vec<Step>,
    /// Predicate polled until the erase completes
    #[serde(default)]
    pub wait_for: Option<WaitFor>,
    /// Time allowed for completion
    #[serde(default = "default_timeout_s")]
    pub timeout_s: u32,
    /// Interval between polls
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u32,
}

impl EraseOp {
    /// Number of polls before giving up: `ceil(timeout / interval)`, at least one
    pub fn poll_attempts(&self) -> u32 {
        let interval = self.poll_interval_ms.max(1) as u64;
        let timeout = self.timeout_s as u64 * 1000;
        timeout.div_ceil(interval).clamp(1, u32::MAX as u64) as u32
    }
}

/// Program command with its optional completion predicate
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WriteOp {
    /// Command steps; contains one `[PA, PD]` step
    pub sequence: Vec<Step>,
    /// Predicate polled after each write
    #[serde(default)]
    pub wait_for: Option<WaitFor>,
    /// Polls before reporting a program timeout
    #[serde(default = "default_max_polls")]
    pub max_polls: u32,
}

/// One run of equally sized sectors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorRegion {
    /// Sector size in bytes
    pub size: u32,
    /// Number of sectors
    pub count: u32,
}

/// Command set and geometry of one flash cartridge family
#[derive(Debug, Clone, PartialEq)]
pub struct FlashCartProfile {
    /// Bus the cartridge uses
    pub cart_type: CartMode,
    /// Cartridge names this profile covers
    pub names: Vec<String>,
    /// Known identifier byte sequences
    pub flash_ids: Vec<Vec<u8>>,
    /// Mask applied to identifier bytes before comparison
    pub flash_id_mask: Option<Vec<u8>>,
    /// Operating voltage
    pub voltage: PowerState,
    /// Flash size in bytes
    pub flash_size: u32,
    /// Sector layout, in address order
    pub sector_regions: Vec<SectorRegion>,
    /// GB write-enable pin
    pub write_pin: WritePin,
    /// Write buffer size in bytes
    pub buffer_size: Option<u32>,
    /// Return to read-array mode
    pub reset: Vec<Step>,
    /// Enter identifier mode
    pub read_identifier: Vec<Step>,
    /// Cartridge unlock performed before anything else
    pub unlock: Vec<Step>,
    /// Whole-chip erase
    pub chip_erase: Option<EraseOp>,
    /// Per-sector erase; `SA` is the sector base
    pub sector_erase: Option<EraseOp>,
    /// Per-word programming
    pub single_write: Option<WriteOp>,
    /// Buffered programming template
    pub buffer_write: Option<WriteOp>,
}

impl FlashCartProfile {
    /// Parse a profile from JSON
    pub fn from_json(content: &str) -> Result<Self> {
        let def: ProfileDef = serde_json::from_str(content).map_err(|e| Error::Profile(e.to_string()))?;
        Self::try_from(def)
    }

    /// Parse a profile from RON
    pub fn from_ron(content: &str) -> Result<Self> {
        let def: ProfileDef = ron::Options::default()
            .with_default_extension(ron::extensions::Extensions::IMPLICIT_SOME)
            .from_str(content)
            .map_err(|e| Error::Profile(e.to_string()))?;
        Self::try_from(def)
    }

    /// Primary display name
    pub fn name(&self) -> &str {
        self.names.first().map(String::as_str).unwrap_or("unnamed")
    }

    /// Sector base addresses and sizes in bytes, in address order
    pub fn sectors(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.sector_regions
            .iter()
            .flat_map(|r| std::iter::repeat(r.size).take(r.count as usize))
            .scan(0u32, |base, size| {
                let start = *base;
                *base += size;
                Some((start, size))
            })
    }

    /// Whether `id` matches one of the known identifiers after masking
    pub fn matches_id(&self, id: &[u8]) -> bool {
        let masked = |bytes: &[u8]| -> Vec<u8> {
            bytes
                .iter()
                .enumerate()
                .map(|(i, b)| {
                    let m = self
                        .flash_id_mask
                        .as_ref()
                        .and_then(|m| m.get(i).copied())
                        .unwrap_or(0xFF);
                    b & m
                })
                .collect()
        };
        let got = masked(id);
        self.flash_ids
            .iter()
            .any(|known| known.len() <= got.len() && masked(known) == got[..known.len()])
    }
}

fn to_u8(n: Num, what: &str) -> Result<u8> {
    u8::try_from(n.0).map_err(|_| Error::Profile(format!("{} byte 0x{:X} out of range", what, n.0)))
}

fn check_operands(
    what: &str,
    operands: impl IntoIterator<Item = Operand>,
    allowed: &[&str],
) -> Result<()> {
    for op in operands {
        if let Some(name) = op.placeholder() {
            if !allowed.contains(&name) {
                return Err(Error::Profile(format!("{} may not use {}", what, name)));
            }
        }
    }
    Ok(())
}

fn check_steps(what: &str, steps: &[Step], wait_for: Option<&WaitFor>, allowed: &[&str]) -> Result<()> {
    check_operands(what, steps.iter().flat_map(Step::operands), allowed)?;
    if let Some(wait) = wait_for {
        check_operands(what, wait.operands(), allowed)?;
    }
    Ok(())
}

impl TryFrom<ProfileDef> for FlashCartProfile {
    type Error = Error;

    fn try_from(def: ProfileDef) -> Result<Self> {
        if def.names.is_empty() {
            return Err(Error::Profile("profile has no names".into()));
        }
        let name = def.names[0].clone();
        let ctx = |msg: String| Error::Profile(format!("{}: {}", name, msg));

        let voltage = if (def.voltage - 3.3).abs() < 0.05 {
            PowerState::V3_3
        } else if (def.voltage - 5.0).abs() < 0.05 {
            PowerState::V5
        } else {
            return Err(ctx(format!("unsupported voltage {}", def.voltage)));
        };

        let flash_ids = def
            .flash_ids
            .into_iter()
            .map(|id| id.into_iter().map(|b| to_u8(b, "flash id")).collect())
            .collect::<Result<Vec<Vec<u8>>>>()?;
        let flash_id_mask = def
            .flash_id_mask
            .map(|m| m.into_iter().map(|b| to_u8(b, "flash id mask")).collect())
            .transpose()?;

        let flash_size = def.flash_size.0;
        if flash_size == 0 {
            return Err(ctx("flash_size must be non-zero".into()));
        }
        let sector_regions = def
            .sector_size
            .into_iter()
            .map(|pair| match pair.as_slice() {
                [size, count] => Ok(SectorRegion {
                    size: size.0,
                    count: count.0,
                }),
                _ => Err(ctx("sector_size entries are [size, count]".into())),
            })
            .collect::<Result<Vec<SectorRegion>>>()?;
        let covered: u64 = sector_regions.iter().map(|r| r.size as u64 * r.count as u64).sum();
        if !sector_regions.is_empty() && covered != flash_size as u64 {
            return Err(ctx(format!(
                "sector layout covers 0x{:X} bytes, flash is 0x{:X}",
                covered, flash_size
            )));
        }

        let cmds = def.commands;
        check_steps("reset", &cmds.reset, None, &[])?;
        check_steps("read_identifier", &cmds.read_identifier, None, &[])?;
        check_steps("unlock", &cmds.unlock, None, &[])?;
        if let Some(op) = &cmds.chip_erase {
            check_steps("chip_erase", &op.sequence, op.wait_for.as_ref(), &[])?;
        }
        if let Some(op) = &cmds.sector_erase {
            check_steps("sector_erase", &op.sequence, op.wait_for.as_ref(), &["SA"])?;
            if sector_regions.is_empty() {
                return Err(ctx("sector_erase needs a sector_size layout".into()));
            }
        }
        for (what, op, allowed) in [
            ("single_write", &cmds.single_write, &["PA", "PD"][..]),
            ("buffer_write", &cmds.buffer_write, &["SA", "PA", "PD", "BS"][..]),
        ] {
            if let Some(op) = op {
                check_steps(what, &op.sequence, op.wait_for.as_ref(), allowed)?;
                if op.sequence.iter().filter(|s| s.is_program_data()).count() != 1 {
                    return Err(ctx(format!("{} needs exactly one [\"PA\", \"PD\"] step", what)));
                }
            }
        }
        if cmds.single_write.is_none() && cmds.buffer_write.is_none() {
            return Err(ctx("profile has neither single_write nor buffer_write".into()));
        }

        Ok(Self {
            cart_type: def.cart_type,
            names: def.names,
            flash_ids,
            flash_id_mask,
            voltage,
            flash_size,
            sector_regions,
            write_pin: def.write_pin,
            buffer_size: def.buffer_size.map(|n| n.0),
            reset: cmds.reset,
            read_identifier: cmds.read_identifier,
            unlock: cmds.unlock,
            chip_erase: cmds.chip_erase,
            sector_erase: cmds.sector_erase,
            single_write: cmds.single_write,
            buffer_write: cmds.buffer_write,
        })
    }
}
