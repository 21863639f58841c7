//! Random-access cartridge bus
//!
//! [`CartBus`] issues single bus-word reads and writes at explicit addresses
//! in either bus mode. Addresses are in bus-word units: halfwords on GBA,
//! bytes on GB. GB addresses at or above 0x4000 are reached by switching
//! the MBC5 ROM bank register, which is how flash cartridges expose their
//! full chip.

use super::banking::{Mapper, ROM_BANK_SIZE};
use crate::address::AddressWindow;
use crate::codec::Command;
use crate::device::DeviceHandle;
use crate::error::{Error, Result};
use crate::pipeline::Pipeline;
use crate::power::CartMode;
use crate::transport::Transport;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// Pin strobed for GB flash writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum WritePin {
    /// Regular WR line
    #[default]
    Wr,
    /// AUDIO (VIN) line, used by some flash cartridges as write enable
    Audio,
}

impl fmt::Display for WritePin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WritePin::Wr => write!(f, "WR"),
            WritePin::Audio => write!(f, "AUDIO"),
        }
    }
}

impl FromStr for WritePin {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "WR" => Ok(WritePin::Wr),
            "AUDIO" | "VIN" => Ok(WritePin::Audio),
            _ => Err(Error::InvalidArgument(format!("unknown write pin '{}'", s))),
        }
    }
}

impl TryFrom<String> for WritePin {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

/// Largest GB bus address reachable through MBC5 banking, exclusive
const GB_FLASH_LIMIT: u32 = 512 * ROM_BANK_SIZE;

/// Bus accessor borrowing a device's pipeline and address window
pub struct CartBus<'a, T: Transport> {
    pipe: &'a mut Pipeline<T>,
    window: &'a mut AddressWindow,
    mode: CartMode,
    write_pin: WritePin,
    rom_bank: Option<u16>,
}

impl<'a, T: Transport> CartBus<'a, T> {
    /// Borrow `dev` for bus access in its current mode
    pub fn new(dev: &'a mut DeviceHandle<T>, write_pin: WritePin) -> Self {
        let mode = dev.mode();
        let (pipe, window) = dev.parts();
        Self {
            pipe,
            window,
            mode,
            write_pin,
            rom_bank: None,
        }
    }

    /// Bus mode in use
    pub fn mode(&self) -> CartMode {
        self.mode
    }

    /// Queue a write of `value` at bus-word address `addr`
    pub fn write(&mut self, addr: u32, value: u16) -> Result<()> {
        match self.mode {
            CartMode::Agb => {
                self.window.set_address(self.pipe, addr)?;
                self.pipe.write(&Command::GbaRomWrite(value))?;
                self.window.advance(self.pipe)
            }
            CartMode::Dmg => {
                let data = u8::try_from(value).map_err(|_| {
                    Error::InvalidArgument(format!("0x{:X} does not fit the GB data bus", value))
                })?;
                let addr = self.map_gb(addr)?;
                let cmd = match self.write_pin {
                    WritePin::Wr => Command::GbWrite { addr, data },
                    WritePin::Audio => Command::GbWriteAudio { addr, data },
                };
                self.pipe.write(&cmd)?;
                Ok(())
            }
        }
    }

    /// Read one bus word at `addr`, flushing the pipeline
    pub fn read(&mut self, addr: u32) -> Result<u16> {
        match self.mode {
            CartMode::Agb => {
                self.window.set_address(self.pipe, addr)?;
                self.pipe.write(&Command::GbaRomRead)?;
                self.window.advance(self.pipe)?;
                self.window.release(self.pipe)?;
                self.pipe.flush()?;
                self.pipe.next_reply()?.word()
            }
            CartMode::Dmg => {
                let addr = self.map_gb(addr)?;
                self.pipe.write(&Command::GbRead(addr))?.flush()?;
                Ok(self.pipe.next_reply()?.byte()? as u16)
            }
        }
    }

    /// Read `count` consecutive bus words starting at `addr`
    pub fn read_words(&mut self, addr: u32, count: usize) -> Result<Vec<u16>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        match self.mode {
            CartMode::Agb => {
                self.window.set_address(self.pipe, addr)?;
                for _ in 0..count {
                    self.pipe.write(&Command::GbaRomRead)?;
                    self.window.advance(self.pipe)?;
                }
                self.window.release(self.pipe)?;
                self.pipe.flush()?;
                self.pipe.take_exact(count)?.into_iter().map(|r| r.word()).collect()
            }
            CartMode::Dmg => {
                for offset in 0..count as u32 {
                    let bus_addr = self.map_gb(addr + offset)?;
                    self.pipe.write(&Command::GbRead(bus_addr))?;
                }
                self.pipe.flush()?;
                self.pipe
                    .take_exact(count)?
                    .into_iter()
                    .map(|r| r.byte().map(u16::from))
                    .collect()
            }
        }
    }

    /// Queue a device-side settle delay
    pub fn delay(&mut self, us: u32) -> Result<()> {
        let mut remaining = us;
        while remaining > 0 {
            let step = remaining.min(u16::MAX as u32);
            self.pipe.write(&Command::Delay(step as u16))?;
            remaining -= step;
        }
        Ok(())
    }

    /// Flush and block the host for `us` microseconds
    pub fn sleep_us(&mut self, us: u32) -> Result<()> {
        self.pipe.sleep_us(us)
    }

    /// Send everything queued so far
    pub fn flush(&mut self) -> Result<()> {
        self.pipe.flush()?;
        Ok(())
    }

    /// Release the address window if latched and flush
    pub fn finish(&mut self) -> Result<()> {
        if self.window.is_latched() {
            self.window.release(self.pipe)?;
        }
        self.flush()
    }

    /// Maximum transfer size of the underlying pipeline
    pub fn max_transfer_len(&self) -> usize {
        self.pipe.max_transfer_len()
    }

    /// Translate a linear GB address to a bus address, switching banks as needed
    fn map_gb(&mut self, addr: u32) -> Result<u16> {
        if addr < ROM_BANK_SIZE {
            return Ok(addr as u16);
        }
        if addr >= GB_FLASH_LIMIT {
            return Err(Error::AddressOutOfBounds {
                addr,
                len: 1,
                limit: GB_FLASH_LIMIT,
            });
        }
        let bank = (addr / ROM_BANK_SIZE) as u16;
        if self.rom_bank != Some(bank) {
            for (reg, value) in Mapper::Mbc5.rom_bank_writes(bank) {
                self.pipe.write(&Command::GbWrite {
                    addr: reg,
                    data: value,
                })?;
            }
            self.rom_bank = Some(bank);
        }
        Ok((ROM_BANK_SIZE + addr % ROM_BANK_SIZE) as u16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{BusLines, BusState, Reply};
    use crate::device::tests::mock_device;
    use crate::power::PowerState;

    #[test]
    fn test_agb_write_latches_then_writes() {
        let mut dev = mock_device(PowerState::V3_3);
        let mut bus = CartBus::new(&mut dev, WritePin::Wr);
        bus.write(0x555, 0xAA).unwrap();
        bus.finish().unwrap();
        let cmds = dev.transport().commands();
        let tail = &cmds[cmds.len() - 4..];
        assert_eq!(
            tail,
            &[
                Command::CartWrite(BusState::idle(0x555)),
                Command::CartWrite(BusState::idle(0x555).asserting(BusLines::CS1)),
                Command::GbaRomWrite(0xAA),
                Command::CartWrite(BusState::idle(0x556)),
            ]
        );
    }

    #[test]
    fn test_gb_banked_write_uses_pin() {
        let mut dev = mock_device(PowerState::V5);
        let mut bus = CartBus::new(&mut dev, WritePin::Audio);
        bus.write(0xAAA, 0xAA).unwrap();
        bus.write(0x8001, 0x12).unwrap();
        bus.write(0x8002, 0x34).unwrap();
        bus.finish().unwrap();
        let cmds = dev.transport().commands();
        let tail = &cmds[cmds.len() - 5..];
        assert_eq!(
            tail,
            &[
                Command::GbWriteAudio { addr: 0xAAA, data: 0xAA },
                Command::GbWrite { addr: 0x2000, data: 2 },
                Command::GbWrite { addr: 0x3000, data: 0 },
                Command::GbWriteAudio { addr: 0x4001, data: 0x12 },
                Command::GbWriteAudio { addr: 0x4002, data: 0x34 },
            ]
        );
    }

    #[test]
    fn test_gb_rejects_wide_data() {
        let mut dev = mock_device(PowerState::V5);
        let mut bus = CartBus::new(&mut dev, WritePin::Wr);
        assert!(matches!(bus.write(0, 0x100), Err(Error::InvalidArgument(_))));
        assert!(bus.write(GB_FLASH_LIMIT, 0).is_err());
    }

    #[test]
    fn test_read_returns_reply() {
        let mut dev = mock_device(PowerState::V3_3);
        dev.transport_mut().responder = Box::new(|cmd| match cmd {
            Command::GbaRomRead => Some(Reply::Word(0x1234)),
            _ => None,
        });
        let mut bus = CartBus::new(&mut dev, WritePin::Wr);
        assert_eq!(bus.read(0x10).unwrap(), 0x1234);
    }

    #[test]
    fn test_read_words_gb_crosses_bank() {
        let mut dev = mock_device(PowerState::V5);
        dev.transport_mut().responder = Box::new(|cmd| match *cmd {
            Command::GbRead(addr) => Some(Reply::Byte(addr as u8)),
            _ => None,
        });
        let mut bus = CartBus::new(&mut dev, WritePin::Wr);
        let words = bus.read_words(0x3FFF, 2).unwrap();
        assert_eq!(words, vec![0xFF, 0x00]);
        let cmds = dev.transport().commands();
        assert!(cmds.contains(&Command::GbWrite { addr: 0x2000, data: 1 }));
        assert_eq!(cmds.last(), Some(&Command::GbRead(0x4000)));
    }
}
