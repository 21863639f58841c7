//! cartflash-emu - In-memory flasher and cartridge emulator
//!
//! [`EmuCart`] decodes command batches exactly as the flasher firmware does
//! and answers them from an emulated GBA cartridge (multiplexed ROM bus with
//! auto-incrementing latch, SRAM) and an emulated GB cartridge (MBC5 ROM and
//! RAM banking). Either ROM can be a plain mask ROM or an AMD flash chip.
//! Every bus access the ROM chips see is recorded for inspection.

#![warn(missing_docs)]

mod flash;

pub use flash::{AmdFlash, AmdFlashConfig, CartMemory, MaskRom};

use cartflash_core::codec::{encode_reply, put_reply, BitReader, BusLines, BusState, Command, Reply, Variable};
use cartflash_core::engine::WritePin;
use cartflash_core::error::Result;
use cartflash_core::transport::{check_transfer_len, DEFAULT_MAX_TRANSFER};
use cartflash_core::{CartMode, PowerState, Transport};

/// Firmware version reported by the emulator
pub const EMU_FIRMWARE_VERSION: u16 = 0x0100;

/// Device kind reported by the emulator
pub const EMU_DEVICE_KIND: u8 = 0xE0;

const GB_ROM_BANK: u32 = 0x4000;
const GB_RAM_BANK: usize = 0x2000;

/// Configuration for the emulated device
pub struct EmuConfig {
    /// GBA ROM chip
    pub agb_rom: Box<dyn CartMemory>,
    /// GBA SRAM size in bytes
    pub agb_sram_size: usize,
    /// GB ROM chip, addressed linearly through MBC5 banking
    pub dmg_rom: Box<dyn CartMemory>,
    /// GB cartridge RAM size in bytes
    pub dmg_ram_size: usize,
    /// Pin the GB flash chip's write enable is wired to
    pub dmg_write_pin: WritePin,
    /// Largest batch accepted
    pub max_transfer: usize,
    /// Rail at power-up
    pub initial_power: PowerState,
}

impl Default for EmuConfig {
    fn default() -> Self {
        Self {
            agb_rom: Box::new(AmdFlash::new(AmdFlashConfig::agb(4 * 1024 * 1024))),
            agb_sram_size: 0x8000,
            dmg_rom: Box::new(AmdFlash::new(AmdFlashConfig::dmg(1024 * 1024))),
            dmg_ram_size: 0x8000,
            dmg_write_pin: WritePin::Wr,
            max_transfer: DEFAULT_MAX_TRANSFER,
            initial_power: PowerState::Off,
        }
    }
}

impl EmuConfig {
    /// Use `rom` as a GBA mask ROM image
    pub fn with_agb_rom_image(mut self, rom: &[u8]) -> Self {
        self.agb_rom = Box::new(MaskRom::new(words_le(rom)));
        self
    }

    /// Use `rom` as a GB mask ROM image
    pub fn with_dmg_rom_image(mut self, rom: &[u8]) -> Self {
        self.dmg_rom = Box::new(MaskRom::new(rom.iter().map(|&b| b as u16).collect()));
        self
    }
}

/// Little-endian halfwords of `bytes`; an odd trailing byte is padded with 0xFF
fn words_le(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks(2)
        .map(|c| u16::from_le_bytes([c[0], c.get(1).copied().unwrap_or(0xFF)]))
        .collect()
}

/// Bus access seen by a ROM chip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusEvent {
    /// Write strobe at a chip address
    Write {
        /// Cartridge the write went to
        mode: CartMode,
        /// Chip address in bus words
        addr: u32,
        /// Value on the data lines
        data: u16,
    },
    /// Read strobe at a chip address
    Read {
        /// Cartridge the read went to
        mode: CartMode,
        /// Chip address in bus words
        addr: u32,
    },
}

#[derive(Debug, Clone, Copy)]
struct AgbLatch {
    high8: u8,
    counter: u16,
    selected: bool,
}

/// Emulated flasher with a GBA and a GB cartridge slot
pub struct EmuCart {
    config: EmuConfig,
    power: PowerState,
    bus: BusState,
    latch: AgbLatch,
    agb_sram: Vec<u8>,
    dmg_ram: Vec<u8>,
    rom_bank: u16,
    ram_bank: u8,
    ram_enabled: bool,
    bus_settle_ns: u32,
    audio_idle: u32,
    events: Vec<BusEvent>,
    batches: usize,
    advances: usize,
    device_delay_us: u64,
    host_sleep_us: u64,
}

impl Default for EmuCart {
    fn default() -> Self {
        Self::new(EmuConfig::default())
    }
}

impl EmuCart {
    /// Create an emulator with the given configuration
    pub fn new(config: EmuConfig) -> Self {
        let agb_sram = vec![0xFF; config.agb_sram_size];
        let dmg_ram = vec![0xFF; config.dmg_ram_size];
        let power = config.initial_power;
        Self {
            config,
            power,
            bus: BusState::idle(0),
            latch: AgbLatch {
                high8: 0,
                counter: 0,
                selected: false,
            },
            agb_sram,
            dmg_ram,
            rom_bank: 1,
            ram_bank: 0,
            ram_enabled: false,
            bus_settle_ns: 0,
            audio_idle: 0,
            events: Vec::new(),
            batches: 0,
            advances: 0,
            device_delay_us: 0,
            host_sleep_us: 0,
        }
    }

    /// Current power rail
    pub fn power(&self) -> PowerState {
        self.power
    }

    /// GBA ROM chip contents in halfwords
    pub fn agb_rom(&self) -> &[u16] {
        self.config.agb_rom.words()
    }

    /// GBA ROM chip contents as little-endian bytes
    pub fn agb_rom_bytes(&self) -> Vec<u8> {
        self.agb_rom().iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    /// GB ROM chip contents
    pub fn dmg_rom_bytes(&self) -> Vec<u8> {
        self.config.dmg_rom.words().iter().map(|&w| w as u8).collect()
    }

    /// GBA SRAM contents
    pub fn agb_sram(&self) -> &[u8] {
        &self.agb_sram
    }

    /// Mutable GBA SRAM contents
    pub fn agb_sram_mut(&mut self) -> &mut [u8] {
        &mut self.agb_sram
    }

    /// GB cartridge RAM contents
    pub fn dmg_ram(&self) -> &[u8] {
        &self.dmg_ram
    }

    /// Whether GB cartridge RAM is currently enabled
    pub fn dmg_ram_enabled(&self) -> bool {
        self.ram_enabled
    }

    /// Bus accesses recorded so far
    pub fn events(&self) -> &[BusEvent] {
        &self.events
    }

    /// Recorded writes as `(addr, data)` pairs
    pub fn writes(&self) -> Vec<(u32, u16)> {
        self.events
            .iter()
            .filter_map(|e| match *e {
                BusEvent::Write { addr, data, .. } => Some((addr, data)),
                BusEvent::Read { .. } => None,
            })
            .collect()
    }

    /// Number of recorded reads
    pub fn read_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, BusEvent::Read { .. }))
            .count()
    }

    /// Forget recorded bus events
    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    /// Batches received through either transport call
    pub fn batch_count(&self) -> usize {
        self.batches
    }

    /// High-byte advance commands received
    pub fn advance_count(&self) -> usize {
        self.advances
    }

    /// Total of device-side delay commands in microseconds
    pub fn device_delay_us(&self) -> u64 {
        self.device_delay_us
    }

    /// Total host sleep requested through the transport
    pub fn host_sleep_us(&self) -> u64 {
        self.host_sleep_us
    }

    fn agb_addr(&self) -> u32 {
        (self.latch.high8 as u32) << 16 | self.latch.counter as u32
    }

    fn agb_step(&mut self) {
        // the cartridge counter wraps inside its 64K-word page
        self.latch.counter = self.latch.counter.wrapping_add(1);
    }

    fn agb_read(&mut self) -> u16 {
        let addr = self.agb_addr();
        self.agb_step();
        if !self.latch.selected {
            log::warn!("emulated GBA read at 0x{:06X} without CS1", addr);
        }
        self.events.push(BusEvent::Read {
            mode: CartMode::Agb,
            addr,
        });
        // open bus reads back the address lines
        self.config.agb_rom.read(addr).unwrap_or(addr as u16)
    }

    fn agb_write(&mut self, data: u16) {
        let addr = self.agb_addr();
        self.agb_step();
        self.events.push(BusEvent::Write {
            mode: CartMode::Agb,
            addr,
            data,
        });
        self.config.agb_rom.write(addr, data);
    }

    fn dmg_linear(&self, addr: u16) -> u32 {
        if (addr as u32) < GB_ROM_BANK {
            addr as u32
        } else {
            self.rom_bank as u32 * GB_ROM_BANK + (addr as u32 - GB_ROM_BANK)
        }
    }

    fn dmg_ram_index(&self, addr: u16) -> Option<usize> {
        if !(0xA000..0xC000).contains(&addr) || !self.ram_enabled {
            return None;
        }
        let index = self.ram_bank as usize * GB_RAM_BANK + (addr as usize - 0xA000);
        (index < self.dmg_ram.len()).then_some(index)
    }

    fn dmg_read(&mut self, addr: u16) -> u8 {
        if addr < 0x8000 {
            let linear = self.dmg_linear(addr);
            self.events.push(BusEvent::Read {
                mode: CartMode::Dmg,
                addr: linear,
            });
            return self.config.dmg_rom.read(linear).map_or(0xFF, |w| w as u8);
        }
        self.dmg_ram_index(addr).map_or(0xFF, |i| self.dmg_ram[i])
    }

    fn dmg_chip_write(&mut self, addr: u16, data: u8) {
        let linear = self.dmg_linear(addr);
        self.events.push(BusEvent::Write {
            mode: CartMode::Dmg,
            addr: linear,
            data: data as u16,
        });
        self.config.dmg_rom.write(linear, data as u16);
    }

    /// WR strobe on the GB bus
    fn dmg_write(&mut self, addr: u16, data: u8) {
        match addr {
            0x0000..=0x1FFF => self.ram_enabled = data & 0x0F == 0x0A,
            0x2000..=0x2FFF => self.rom_bank = (self.rom_bank & 0x100) | data as u16,
            0x3000..=0x3FFF => self.rom_bank = (self.rom_bank & 0xFF) | ((data & 1) as u16) << 8,
            0x4000..=0x5FFF => self.ram_bank = data & 0x0F,
            0xA000..=0xBFFF => {
                if let Some(i) = self.dmg_ram_index(addr) {
                    self.dmg_ram[i] = data;
                }
                return;
            }
            _ => {}
        }
        // bank registers are decoded by the mapper only
        let mapper_only = (0x2000..0x4000).contains(&addr);
        if addr < 0x8000 && !mapper_only && self.config.dmg_write_pin == WritePin::Wr {
            self.dmg_chip_write(addr, data);
        }
    }

    /// Execute one command, returning its reply if it has one
    fn execute(&mut self, cmd: &Command) -> Option<Reply> {
        log::trace!("emu: {:?}", cmd);
        match *cmd {
            Command::PowerSet { enable, select_5v } => {
                self.power = match (enable, select_5v) {
                    (false, _) => PowerState::Off,
                    (true, false) => PowerState::V3_3,
                    (true, true) => PowerState::V5,
                };
                log::debug!("emulated power rail set to {}", self.power);
                None
            }
            Command::PowerRead => Some(Reply::Power {
                enabled: self.power != PowerState::Off,
                is_5v: self.power == PowerState::V5,
            }),
            Command::CartWrite(state) => {
                self.bus = state;
                let selected = !state.lines.contains(BusLines::CS1);
                if selected && !self.latch.selected {
                    self.latch.high8 = state.high8;
                    self.latch.counter = state.low16;
                }
                self.latch.selected = selected;
                None
            }
            Command::CartRead => Some(Reply::Bus(self.bus)),
            Command::GbaRomRead | Command::GbaRomReadFlip => Some(Reply::Word(self.agb_read())),
            Command::GbaRomWrite(data) | Command::GbaRomWriteFlip(data) => {
                self.agb_write(data);
                None
            }
            Command::GbaAddrAdvance(high8) => {
                self.latch.high8 = high8;
                self.latch.counter = 0;
                self.advances += 1;
                None
            }
            Command::GbaRamRead(addr) => Some(Reply::Byte(
                self.agb_sram.get(addr as usize).copied().unwrap_or(0xFF),
            )),
            Command::GbaRamWrite { addr, data } => {
                if let Some(cell) = self.agb_sram.get_mut(addr as usize) {
                    *cell = data;
                }
                None
            }
            Command::GbRead(addr) => Some(Reply::Byte(self.dmg_read(addr))),
            Command::GbWrite { addr, data } => {
                self.dmg_write(addr, data);
                None
            }
            Command::GbWriteAudio { addr, data } => {
                if self.config.dmg_write_pin == WritePin::Audio && addr < 0x8000 {
                    self.dmg_chip_write(addr, data);
                }
                None
            }
            Command::GbRamRead(addr) => Some(Reply::Byte(
                self.dmg_ram_index(addr).map_or(0xFF, |i| self.dmg_ram[i]),
            )),
            Command::GbRamWrite { addr, data } => {
                if let Some(i) = self.dmg_ram_index(addr) {
                    self.dmg_ram[i] = data;
                }
                None
            }
            Command::Delay(us) => {
                self.device_delay_us += us as u64;
                None
            }
            Command::VarGet(var) => Some(Reply::Var(match var {
                Variable::FirmwareVersion => EMU_FIRMWARE_VERSION as u32,
                Variable::DeviceKind => EMU_DEVICE_KIND as u32,
                Variable::BusSettleNs => self.bus_settle_ns,
                Variable::AudioIdle => self.audio_idle,
            })),
            Command::VarSet(var, value) => {
                match var {
                    Variable::BusSettleNs => self.bus_settle_ns = value,
                    Variable::AudioIdle => self.audio_idle = value,
                    other => log::warn!("emu: ignoring write to read-only {}", other.spec().name),
                }
                None
            }
        }
    }

    /// Run a batch, writing replies into `reply` when given
    fn run_batch(&mut self, data: &[u8], mut reply: Option<&mut [u8]>) -> Result<()> {
        check_transfer_len(data.len(), self.config.max_transfer)?;
        self.batches += 1;
        let mut reader = BitReader::new(data);
        loop {
            let start = reader.position();
            let Some(cmd) = Command::decode(&mut reader)? else {
                break;
            };
            if let Some(r) = self.execute(&cmd) {
                if let Some(buf) = reply.as_deref_mut() {
                    let raw = encode_reply(cmd.opcode(), r)?;
                    put_reply(buf, start, cmd.opcode(), raw)?;
                }
            }
        }
        Ok(())
    }
}

impl Transport for EmuCart {
    fn max_transfer_len(&self) -> usize {
        self.config.max_transfer
    }

    fn write_only(&mut self, data: &[u8]) -> Result<()> {
        self.run_batch(data, None)
    }

    fn write_then_read(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let mut reply = data.to_vec();
        self.run_batch(data, Some(&mut reply))?;
        Ok(reply)
    }

    fn delay_us(&mut self, us: u32) {
        // simulated time only
        self.host_sleep_us += us as u64;
    }
}

#[cfg(test)]
mod scenarios;
