//! Command and variable registry
//!
//! Maps every firmware command to its opcode and field widths, and every
//! firmware variable to its key and value width. Both tables are keyed by
//! enums so adding an entry without a specification fails to compile.

/// Width of the opcode field in bits
pub const OPCODE_BITS: u32 = 5;

/// Width of a variable key in bits
pub const VAR_KEY_BITS: u32 = 6;

/// Width of a variable value on the wire in bits
pub const VAR_VALUE_BITS: u32 = 24;

/// Firmware command opcodes
///
/// Opcode 0 is the idle line level and terminates a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Switch the cartridge power rail
    PowerSet = 0x01,
    /// Read back the power rail state
    PowerRead = 0x02,
    /// Drive all 30 cartridge bus lines
    CartWrite = 0x03,
    /// Sample all 30 cartridge bus lines
    CartRead = 0x04,
    /// GBA ROM read cycle at the latched address
    GbaRomRead = 0x05,
    /// GBA ROM read cycle, data returned with each byte reversed in place
    GbaRomReadFlip = 0x06,
    /// GBA ROM write cycle at the latched address
    GbaRomWrite = 0x07,
    /// GBA ROM write cycle with the data bytes swapped on the wire
    GbaRomWriteFlip = 0x08,
    /// Re-latch the GBA address at a new high byte with low half zero
    GbaAddrAdvance = 0x09,
    /// GBA SRAM byte read
    GbaRamRead = 0x0A,
    /// GBA SRAM byte write
    GbaRamWrite = 0x0B,
    /// GB bus byte read
    GbRead = 0x0C,
    /// GB bus byte write strobing WR
    GbWrite = 0x0D,
    /// GB bus byte write strobing the AUDIO pin
    GbWriteAudio = 0x0E,
    /// GB cartridge RAM byte read
    GbRamRead = 0x0F,
    /// GB cartridge RAM byte write
    GbRamWrite = 0x10,
    /// Device-side settle delay in microseconds
    Delay = 0x11,
    /// Read a firmware variable
    VarGet = 0x12,
    /// Write a firmware variable
    VarSet = 0x13,
}

/// Encoding specification for one opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpec {
    /// Command name as used in logs and on the command line
    pub name: &'static str,
    /// Opcode value
    pub code: u8,
    /// Input payload width in bits
    pub in_bits: u32,
    /// Output slot width in bits
    pub out_bits: u32,
}

impl CommandSpec {
    const fn new(name: &'static str, code: Opcode, in_bits: u32, out_bits: u32) -> Self {
        Self {
            name,
            code: code as u8,
            in_bits,
            out_bits,
        }
    }

    /// Opcode plus payload plus output slots, without padding
    pub const fn cycle_bits(&self) -> u32 {
        OPCODE_BITS + self.in_bits + self.out_bits
    }

    /// Zero bits inserted before the separator to reach a byte boundary
    pub const fn pad_bits(&self) -> u32 {
        (8 - (self.cycle_bits() + 1) % 8) % 8
    }

    /// Per-cycle length on the wire, excluding the separator bit
    pub const fn padded_bits(&self) -> u32 {
        self.cycle_bits() + self.pad_bits()
    }

    /// Encoded length including the separator bit, in bytes
    pub const fn encoded_len(&self) -> usize {
        ((self.padded_bits() + 1) / 8) as usize
    }

    /// Bit offset of the output slots from the start of the command
    pub const fn out_offset(&self) -> u32 {
        OPCODE_BITS + self.in_bits
    }
}

impl Opcode {
    /// Every opcode in code order
    pub const ALL: [Opcode; 19] = [
        Opcode::PowerSet,
        Opcode::PowerRead,
        Opcode::CartWrite,
        Opcode::CartRead,
        Opcode::GbaRomRead,
        Opcode::GbaRomReadFlip,
        Opcode::GbaRomWrite,
        Opcode::GbaRomWriteFlip,
        Opcode::GbaAddrAdvance,
        Opcode::GbaRamRead,
        Opcode::GbaRamWrite,
        Opcode::GbRead,
        Opcode::GbWrite,
        Opcode::GbWriteAudio,
        Opcode::GbRamRead,
        Opcode::GbRamWrite,
        Opcode::Delay,
        Opcode::VarGet,
        Opcode::VarSet,
    ];

    /// Encoding specification for this opcode
    pub const fn spec(self) -> CommandSpec {
        use Opcode::*;
        match self {
            PowerSet => CommandSpec::new("power_set", self, 2, 0),
            PowerRead => CommandSpec::new("power_read", self, 0, 2),
            CartWrite => CommandSpec::new("cart_write", self, 30, 0),
            CartRead => CommandSpec::new("cart_read", self, 0, 30),
            GbaRomRead => CommandSpec::new("gba_rom_read", self, 0, 16),
            GbaRomReadFlip => CommandSpec::new("gba_rom_read_flip", self, 0, 16),
            GbaRomWrite => CommandSpec::new("gba_rom_write", self, 16, 0),
            GbaRomWriteFlip => CommandSpec::new("gba_rom_write_flip", self, 16, 0),
            GbaAddrAdvance => CommandSpec::new("gba_addr_advance", self, 8, 0),
            GbaRamRead => CommandSpec::new("gba_ram_read", self, 16, 8),
            GbaRamWrite => CommandSpec::new("gba_ram_write", self, 24, 0),
            GbRead => CommandSpec::new("gb_read", self, 16, 8),
            GbWrite => CommandSpec::new("gb_write", self, 24, 0),
            GbWriteAudio => CommandSpec::new("gb_write_audio", self, 24, 0),
            GbRamRead => CommandSpec::new("gb_ram_read", self, 16, 8),
            GbRamWrite => CommandSpec::new("gb_ram_write", self, 24, 0),
            Delay => CommandSpec::new("delay", self, 16, 0),
            VarGet => CommandSpec::new("var_get", self, VAR_KEY_BITS, VAR_VALUE_BITS),
            VarSet => CommandSpec::new("var_set", self, VAR_KEY_BITS + VAR_VALUE_BITS, 0),
        }
    }

    /// Opcode value
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Command name
    pub const fn name(self) -> &'static str {
        self.spec().name
    }

    /// Look up an opcode by value
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| op.code() == code)
    }

    /// Look up an opcode by name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|op| op.name().eq_ignore_ascii_case(name))
    }
}

/// Firmware variables reachable through `VarGet`/`VarSet`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Variable {
    /// Firmware version, major in the high byte
    FirmwareVersion = 0x01,
    /// Hardware revision identifier
    DeviceKind = 0x02,
    /// Bus settle time between strobes in nanoseconds
    BusSettleNs = 0x03,
    /// Idle level of the AUDIO pin
    AudioIdle = 0x04,
}

/// Specification for one firmware variable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarSpec {
    /// Variable name
    pub name: &'static str,
    /// Key sent in the `VarGet`/`VarSet` payload
    pub key: u8,
    /// Number of significant value bits
    pub bits: u32,
    /// Whether the host may write it
    pub writable: bool,
}

impl Variable {
    /// Every variable in key order
    pub const ALL: [Variable; 4] = [
        Variable::FirmwareVersion,
        Variable::DeviceKind,
        Variable::BusSettleNs,
        Variable::AudioIdle,
    ];

    /// Specification for this variable
    pub const fn spec(self) -> VarSpec {
        let (name, bits, writable) = match self {
            Variable::FirmwareVersion => ("firmware_version", 16, false),
            Variable::DeviceKind => ("device_kind", 8, false),
            Variable::BusSettleNs => ("bus_settle_ns", 16, true),
            Variable::AudioIdle => ("audio_idle", 1, true),
        };
        VarSpec {
            name,
            key: self as u8,
            bits,
            writable,
        }
    }

    /// Look up a variable by key
    pub fn from_key(key: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|v| v.spec().key == key)
    }

    /// Look up a variable by name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|v| v.spec().name.eq_ignore_ascii_case(name))
    }
}
