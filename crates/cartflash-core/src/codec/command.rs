//! Command records and their bit layouts

use super::bits::{BitReader, BitWriter};
use super::registry::{Opcode, Variable, OPCODE_BITS, VAR_KEY_BITS, VAR_VALUE_BITS};
use crate::error::{Error, Result};
use bitflags::bitflags;

bitflags! {
    /// Single-bit cartridge bus lines
    ///
    /// A set flag means the line is driven high. CS1, CS2, RD and WR are
    /// active low, so [`BusLines::IDLE`] has them set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BusLines: u8 {
        /// Request flag, set while a transfer is being framed
        const REQ = 1 << 0;
        /// ROM chip select
        const CS1 = 1 << 1;
        /// RAM chip select
        const CS2 = 1 << 2;
        /// Read strobe
        const RD  = 1 << 3;
        /// Write strobe
        const WR  = 1 << 4;
        /// Bus clock
        const PHI = 1 << 5;

        /// All selects and strobes deasserted
        const IDLE = Self::CS1.bits() | Self::CS2.bits() | Self::RD.bits() | Self::WR.bits();
    }
}

/// Snapshot of the 30-bit cartridge bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusState {
    /// Control line levels
    pub lines: BusLines,
    /// Address bits 16..24
    pub high8: u8,
    /// Address bits 0..16 (multiplexed with data on GBA)
    pub low16: u16,
}

impl BusState {
    /// Width of the packed bus state
    pub const BITS: u32 = 30;

    /// Bus with every line idle and the given 24-bit word address
    pub fn idle(word_addr: u32) -> Self {
        Self {
            lines: BusLines::IDLE,
            high8: (word_addr >> 16) as u8,
            low16: word_addr as u16,
        }
    }

    /// Return a copy with `line` driven low
    pub fn asserting(mut self, line: BusLines) -> Self {
        self.lines.remove(line);
        self
    }

    /// Combined 24-bit address
    pub fn word_addr(&self) -> u32 {
        (self.high8 as u32) << 16 | self.low16 as u32
    }

    /// Pack as `req, cs2, high8, swap_bytes(low16), cs1, rd, wr, phi`, MSB first
    pub fn pack(&self) -> u32 {
        let bit = |line: BusLines| self.lines.contains(line) as u32;
        bit(BusLines::REQ) << 29
            | bit(BusLines::CS2) << 28
            | (self.high8 as u32) << 20
            | (self.low16.swap_bytes() as u32) << 4
            | bit(BusLines::CS1) << 3
            | bit(BusLines::RD) << 2
            | bit(BusLines::WR) << 1
            | bit(BusLines::PHI)
    }

    /// Inverse of [`BusState::pack`]; bits above 30 are ignored
    pub fn unpack(raw: u32) -> Self {
        let mut lines = BusLines::empty();
        let mut set = |line: BusLines, shift: u32| {
            if raw >> shift & 1 != 0 {
                lines.insert(line);
            }
        };
        set(BusLines::REQ, 29);
        set(BusLines::CS2, 28);
        set(BusLines::CS1, 3);
        set(BusLines::RD, 2);
        set(BusLines::WR, 1);
        set(BusLines::PHI, 0);
        Self {
            lines,
            high8: (raw >> 20) as u8,
            low16: ((raw >> 4) as u16).swap_bytes(),
        }
    }
}

/// One device command with its input fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Switch the power rail; `select_5v` is ignored when disabled
    PowerSet {
        /// Rail enabled
        enable: bool,
        /// 5V selected instead of 3.3V
        select_5v: bool,
    },
    /// Read the rail state
    PowerRead,
    /// Drive the whole bus
    CartWrite(BusState),
    /// Sample the whole bus
    CartRead,
    /// GBA ROM read, base bit order
    GbaRomRead,
    /// GBA ROM read, flipped bit order
    GbaRomReadFlip,
    /// GBA ROM write of one halfword
    GbaRomWrite(u16),
    /// GBA ROM write of one halfword, bytes swapped on the wire
    GbaRomWriteFlip(u16),
    /// Re-latch at `high8` with the low half at zero
    GbaAddrAdvance(u8),
    /// GBA SRAM read
    GbaRamRead(u16),
    /// GBA SRAM write
    GbaRamWrite {
        /// SRAM address
        addr: u16,
        /// Byte to store
        data: u8,
    },
    /// GB bus read
    GbRead(u16),
    /// GB bus write on WR
    GbWrite {
        /// Bus address
        addr: u16,
        /// Byte to drive
        data: u8,
    },
    /// GB bus write on AUDIO
    GbWriteAudio {
        /// Bus address
        addr: u16,
        /// Byte to drive
        data: u8,
    },
    /// GB cartridge RAM read
    GbRamRead(u16),
    /// GB cartridge RAM write
    GbRamWrite {
        /// Bus address
        addr: u16,
        /// Byte to store
        data: u8,
    },
    /// Device-side delay in microseconds
    Delay(u16),
    /// Read a variable
    VarGet(Variable),
    /// Write a variable (low 24 bits)
    VarSet(Variable, u32),
}

impl Command {
    /// Opcode of this command
    pub fn opcode(&self) -> Opcode {
        match self {
            Command::PowerSet { .. } => Opcode::PowerSet,
            Command::PowerRead => Opcode::PowerRead,
            Command::CartWrite(_) => Opcode::CartWrite,
            Command::CartRead => Opcode::CartRead,
            Command::GbaRomRead => Opcode::GbaRomRead,
            Command::GbaRomReadFlip => Opcode::GbaRomReadFlip,
            Command::GbaRomWrite(_) => Opcode::GbaRomWrite,
            Command::GbaRomWriteFlip(_) => Opcode::GbaRomWriteFlip,
            Command::GbaAddrAdvance(_) => Opcode::GbaAddrAdvance,
            Command::GbaRamRead(_) => Opcode::GbaRamRead,
            Command::GbaRamWrite { .. } => Opcode::GbaRamWrite,
            Command::GbRead(_) => Opcode::GbRead,
            Command::GbWrite { .. } => Opcode::GbWrite,
            Command::GbWriteAudio { .. } => Opcode::GbWriteAudio,
            Command::GbRamRead(_) => Opcode::GbRamRead,
            Command::GbRamWrite { .. } => Opcode::GbRamWrite,
            Command::Delay(_) => Opcode::Delay,
            Command::VarGet(_) => Opcode::VarGet,
            Command::VarSet(..) => Opcode::VarSet,
        }
    }

    /// Append this command, its empty output slots, padding and separator
    pub fn encode(&self, out: &mut BitWriter) {
        let spec = self.opcode().spec();
        let start = out.len_bits();
        out.push(spec.code as u32, OPCODE_BITS);
        match *self {
            Command::PowerSet { enable, select_5v } => {
                out.push_bit(enable);
                out.push_bit(select_5v);
            }
            Command::CartWrite(state) => out.push(state.pack(), BusState::BITS),
            Command::GbaRomWrite(data) => out.push(data as u32, 16),
            Command::GbaRomWriteFlip(data) => out.push(data.swap_bytes() as u32, 16),
            Command::GbaAddrAdvance(high8) => out.push(high8 as u32, 8),
            Command::GbaRamRead(addr) | Command::GbRead(addr) | Command::GbRamRead(addr) => {
                out.push(addr as u32, 16)
            }
            Command::GbaRamWrite { addr, data }
            | Command::GbWrite { addr, data }
            | Command::GbWriteAudio { addr, data }
            | Command::GbRamWrite { addr, data } => {
                out.push(addr as u32, 16);
                out.push(data as u32, 8);
            }
            Command::Delay(us) => out.push(us as u32, 16),
            Command::VarGet(var) => out.push(var.spec().key as u32, VAR_KEY_BITS),
            Command::VarSet(var, value) => {
                out.push(var.spec().key as u32, VAR_KEY_BITS);
                out.push(value & 0xFF_FFFF, VAR_VALUE_BITS);
            }
            Command::PowerRead
            | Command::CartRead
            | Command::GbaRomRead
            | Command::GbaRomReadFlip => {}
        }
        out.push_zeros(spec.out_bits + spec.pad_bits());
        out.push_bit(false);
        debug_assert_eq!(out.len_bits() - start, spec.encoded_len() * 8);
    }

    /// Encode this command on its own
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = BitWriter::with_capacity(self.opcode().spec().encoded_len());
        self.encode(&mut out);
        out.into_bytes()
    }

    /// Decode the next command, leaving the reader after its separator
    ///
    /// Returns `Ok(None)` at the idle opcode or when fewer than a full
    /// opcode's worth of bits remain.
    pub fn decode(reader: &mut BitReader<'_>) -> Result<Option<Command>> {
        if reader.remaining() < OPCODE_BITS as usize {
            return Ok(None);
        }
        let code = reader.read(OPCODE_BITS)? as u8;
        if code == 0 {
            return Ok(None);
        }
        let opcode = Opcode::from_code(code)
            .ok_or_else(|| Error::ProtocolDecode(format!("unknown opcode 0x{:02X}", code)))?;
        let spec = opcode.spec();
        let cmd = match opcode {
            Opcode::PowerSet => Command::PowerSet {
                enable: reader.read_bit()?,
                select_5v: reader.read_bit()?,
            },
            Opcode::PowerRead => Command::PowerRead,
            Opcode::CartWrite => Command::CartWrite(BusState::unpack(reader.read(BusState::BITS)?)),
            Opcode::CartRead => Command::CartRead,
            Opcode::GbaRomRead => Command::GbaRomRead,
            Opcode::GbaRomReadFlip => Command::GbaRomReadFlip,
            Opcode::GbaRomWrite => Command::GbaRomWrite(reader.read(16)? as u16),
            Opcode::GbaRomWriteFlip => Command::GbaRomWriteFlip((reader.read(16)? as u16).swap_bytes()),
            Opcode::GbaAddrAdvance => Command::GbaAddrAdvance(reader.read(8)? as u8),
            Opcode::GbaRamRead => Command::GbaRamRead(reader.read(16)? as u16),
            Opcode::GbRead => Command::GbRead(reader.read(16)? as u16),
            Opcode::GbRamRead => Command::GbRamRead(reader.read(16)? as u16),
            Opcode::GbaRamWrite | Opcode::GbWrite | Opcode::GbWriteAudio | Opcode::GbRamWrite => {
                let addr = reader.read(16)? as u16;
                let data = reader.read(8)? as u8;
                match opcode {
                    Opcode::GbaRamWrite => Command::GbaRamWrite { addr, data },
                    Opcode::GbWrite => Command::GbWrite { addr, data },
                    Opcode::GbWriteAudio => Command::GbWriteAudio { addr, data },
                    _ => Command::GbRamWrite { addr, data },
                }
            }
            Opcode::Delay => Command::Delay(reader.read(16)? as u16),
            Opcode::VarGet => Command::VarGet(read_var(reader)?),
            Opcode::VarSet => {
                let var = read_var(reader)?;
                Command::VarSet(var, reader.read(VAR_VALUE_BITS)?)
            }
        };
        reader.skip(spec.out_bits + spec.pad_bits() + 1)?;
        Ok(Some(cmd))
    }
}

fn read_var(reader: &mut BitReader<'_>) -> Result<Variable> {
    let key = reader.read(VAR_KEY_BITS)? as u8;
    Variable::from_key(key)
        .ok_or_else(|| Error::ProtocolDecode(format!("unknown variable key 0x{:02X}", key)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(cmd: Command) {
        let bytes = cmd.to_bytes();
        assert_eq!(bytes.len(), cmd.opcode().spec().encoded_len());
        let mut reader = BitReader::new(&bytes);
        assert_eq!(Command::decode(&mut reader).unwrap(), Some(cmd));
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_cart_write_layout() {
        let state = BusState {
            lines: BusLines::REQ | BusLines::CS1,
            high8: 0xA5,
            low16: 0x1234,
        };
        // req=1 cs2=0 high=A5 low=3412 cs1=1 rd=0 wr=0 phi=0
        assert_eq!(state.pack(), 1 << 29 | 0xA5 << 20 | 0x3412 << 4 | 1 << 3);
        assert_eq!(BusState::unpack(state.pack()), state);

        let bytes = Command::CartWrite(state).to_bytes();
        let mut reader = BitReader::new(&bytes);
        assert_eq!(reader.read(5).unwrap(), 0x03);
        assert_eq!(reader.read(30).unwrap(), state.pack());
        assert_eq!(reader.read(5).unwrap(), 0, "pad and separator");
    }

    #[test]
    fn test_flip_write_swaps_bytes() {
        let base = Command::GbaRomWrite(0x12AB).to_bytes();
        let flip = Command::GbaRomWriteFlip(0x12AB).to_bytes();
        assert_eq!(BitReader::new(&base).read(21).unwrap() & 0xFFFF, 0x12AB);
        assert_eq!(BitReader::new(&flip).read(21).unwrap() & 0xFFFF, 0xAB12);
    }

    #[test]
    fn test_round_trip_all_opcodes() {
        let fixed = [
            Command::PowerRead,
            Command::CartRead,
            Command::GbaRomRead,
            Command::GbaRomReadFlip,
        ];
        for cmd in fixed {
            round_trip(cmd);
        }
        for enable in [false, true] {
            for select_5v in [false, true] {
                round_trip(Command::PowerSet { enable, select_5v });
            }
        }
        for var in Variable::ALL {
            round_trip(Command::VarGet(var));
            round_trip(Command::VarSet(var, 0xABCDEF));
        }
        // deterministic sweep over field ranges
        let mut x: u32 = 0x1234_5678;
        for _ in 0..512 {
            x ^= x << 13;
            x ^= x >> 17;
            x ^= x << 5;
            let addr = x as u16;
            let data = (x >> 16) as u8;
            let state = BusState {
                lines: BusLines::from_bits_truncate((x >> 24) as u8),
                high8: (x >> 8) as u8,
                low16: addr,
            };
            round_trip(Command::CartWrite(state));
            round_trip(Command::GbaRomWrite(addr));
            round_trip(Command::GbaRomWriteFlip(addr));
            round_trip(Command::GbaAddrAdvance(data));
            round_trip(Command::GbaRamRead(addr));
            round_trip(Command::GbaRamWrite { addr, data });
            round_trip(Command::GbRead(addr));
            round_trip(Command::GbWrite { addr, data });
            round_trip(Command::GbWriteAudio { addr, data });
            round_trip(Command::GbRamRead(addr));
            round_trip(Command::GbRamWrite { addr, data });
            round_trip(Command::Delay(addr));
        }
    }

    #[test]
    fn test_decode_batch_stops_at_idle() {
        let mut w = BitWriter::new();
        Command::GbRead(0x0100).encode(&mut w);
        Command::Delay(10).encode(&mut w);
        let mut bytes = w.into_bytes();
        bytes.extend_from_slice(&[0, 0]);
        let mut reader = BitReader::new(&bytes);
        assert_eq!(Command::decode(&mut reader).unwrap(), Some(Command::GbRead(0x0100)));
        assert_eq!(Command::decode(&mut reader).unwrap(), Some(Command::Delay(10)));
        assert_eq!(Command::decode(&mut reader).unwrap(), None);
    }

    #[test]
    fn test_decode_rejects_unknown() {
        // opcode 0x1F
        let bytes = [0xF8, 0, 0, 0];
        assert!(matches!(
            Command::decode(&mut BitReader::new(&bytes)),
            Err(Error::ProtocolDecode(_))
        ));
        // truncated cart write
        let bytes = Command::CartWrite(BusState::idle(0)).to_bytes();
        assert!(Command::decode(&mut BitReader::new(&bytes[..3])).is_err());
    }
}
