//! Reply decoding
//!
//! The device fills each command's output slots during the duplex exchange.
//! Data words come back bit-reversed: base 16-bit reads are reversed as a
//! whole halfword, while the flip variant reverses each byte in place.
//! Byte reads are reversed with the 256-entry table. Power, bus and variable
//! replies are plain MSB-first fields.

use super::bits::{get_bits, put_bits};
use super::command::BusState;
use super::registry::Opcode;
use super::reverse::{reverse16, reverse8};
use crate::error::{Error, Result};

/// Bit order used for GBA ROM halfword transfers
///
/// The two variants are distinct opcodes; callers pick one per call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WordEncoding {
    /// Whole-halfword reversal
    #[default]
    Base,
    /// Per-byte reversal, byte-swapped writes
    Flip,
}

impl WordEncoding {
    /// Read opcode for this encoding
    pub fn read_opcode(self) -> Opcode {
        match self {
            WordEncoding::Base => Opcode::GbaRomRead,
            WordEncoding::Flip => Opcode::GbaRomReadFlip,
        }
    }
}

/// Decoded contents of a command's output slots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// `PowerRead` result
    Power {
        /// Rail enabled
        enabled: bool,
        /// 5V selected
        is_5v: bool,
    },
    /// `CartRead` result
    Bus(BusState),
    /// 16-bit ROM word
    Word(u16),
    /// 8-bit bus or RAM byte
    Byte(u8),
    /// Variable value
    Var(u32),
}

impl Reply {
    /// Extract a ROM word
    pub fn word(self) -> Result<u16> {
        match self {
            Reply::Word(w) => Ok(w),
            other => Err(unexpected("word", other)),
        }
    }

    /// Extract a byte
    pub fn byte(self) -> Result<u8> {
        match self {
            Reply::Byte(b) => Ok(b),
            other => Err(unexpected("byte", other)),
        }
    }

    /// Extract a variable value
    pub fn var(self) -> Result<u32> {
        match self {
            Reply::Var(v) => Ok(v),
            other => Err(unexpected("variable", other)),
        }
    }
}

fn unexpected(what: &str, got: Reply) -> Error {
    Error::ProtocolDecode(format!("expected {} reply, got {:?}", what, got))
}

/// Decode the raw output slot value of `opcode`
pub fn decode_reply(opcode: Opcode, raw: u32) -> Result<Reply> {
    let reply = match opcode {
        Opcode::PowerRead => Reply::Power {
            enabled: raw & 0b10 != 0,
            is_5v: raw & 0b01 != 0,
        },
        Opcode::CartRead => Reply::Bus(BusState::unpack(raw)),
        Opcode::GbaRomRead => Reply::Word(reverse16(raw as u16)),
        Opcode::GbaRomReadFlip => {
            let [hi, lo] = (raw as u16).to_be_bytes();
            Reply::Word(u16::from_be_bytes([reverse8(hi), reverse8(lo)]))
        }
        Opcode::GbaRamRead | Opcode::GbRead | Opcode::GbRamRead => Reply::Byte(reverse8(raw as u8)),
        Opcode::VarGet => Reply::Var(raw),
        other => {
            return Err(Error::ProtocolDecode(format!(
                "{} has no output slots",
                other.name()
            )))
        }
    };
    Ok(reply)
}

/// Produce the raw output slot value for `reply`; used by device emulation
pub fn encode_reply(opcode: Opcode, reply: Reply) -> Result<u32> {
    let raw = match (opcode, reply) {
        (Opcode::PowerRead, Reply::Power { enabled, is_5v }) => (enabled as u32) << 1 | is_5v as u32,
        (Opcode::CartRead, Reply::Bus(state)) => state.pack(),
        (Opcode::GbaRomRead, Reply::Word(w)) => reverse16(w) as u32,
        (Opcode::GbaRomReadFlip, Reply::Word(w)) => {
            let [hi, lo] = w.to_be_bytes();
            u16::from_be_bytes([reverse8(hi), reverse8(lo)]) as u32
        }
        (Opcode::GbaRamRead | Opcode::GbRead | Opcode::GbRamRead, Reply::Byte(b)) => reverse8(b) as u32,
        (Opcode::VarGet, Reply::Var(v)) => v & 0xFF_FFFF,
        (op, reply) => {
            return Err(Error::ProtocolDecode(format!(
                "{:?} is not a reply to {}",
                reply,
                op.name()
            )))
        }
    };
    Ok(raw)
}

/// Write `raw` into the output slots of the command starting at bit `cmd_start`
///
/// Fails if the command's slots extend past the end of `buf`.
pub fn put_reply(buf: &mut [u8], cmd_start: usize, opcode: Opcode, raw: u32) -> Result<()> {
    let spec = opcode.spec();
    let pos = cmd_start + spec.out_offset() as usize;
    let end = pos + spec.out_bits as usize;
    if end > buf.len() * 8 {
        return Err(Error::ProtocolDecode(format!(
            "{} reply slots end at bit {}, buffer holds {}",
            spec.name,
            end,
            buf.len() * 8
        )));
    }
    put_bits(buf, pos, raw, spec.out_bits);
    Ok(())
}

/// Decode `count` back-to-back cycles of `opcode` starting at bit 0 of `buf`
///
/// Fails if `buf` holds fewer than `(per-cycle length + 1) * count` bits.
pub fn decode_cycles(opcode: Opcode, buf: &[u8], count: usize) -> Result<Vec<Reply>> {
    let spec = opcode.spec();
    if spec.out_bits == 0 {
        return Err(Error::ProtocolDecode(format!(
            "{} has no output slots",
            spec.name
        )));
    }
    let stride = (spec.padded_bits() + 1) as usize;
    let needed = stride * count;
    if buf.len() * 8 < needed {
        return Err(Error::ProtocolDecode(format!(
            "{} x{} needs {} bits, reply holds {}",
            spec.name,
            count,
            needed,
            buf.len() * 8
        )));
    }
    (0..count)
        .map(|i| {
            let raw = get_bits(buf, i * stride + spec.out_offset() as usize, spec.out_bits);
            decode_reply(opcode, raw)
        })
        .collect()
}
