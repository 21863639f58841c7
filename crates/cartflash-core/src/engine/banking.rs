//! GB mapper banking parameters
//!
//! Header parsing lives outside this crate; callers hand over the mapper
//! and bank counts they derived from it.

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// Size of one switchable GB ROM bank
pub const ROM_BANK_SIZE: u32 = 0x4000;

/// Size of one switchable GB RAM bank
pub const RAM_BANK_SIZE: u32 = 0x2000;

/// Start of the GB cartridge RAM window
pub const RAM_WINDOW: u16 = 0xA000;

/// GB cartridge mapper (MBC)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mapper {
    /// 32 KiB ROM only
    None,
    /// MBC1
    Mbc1,
    /// MBC3
    Mbc3,
    /// MBC5
    #[default]
    Mbc5,
}

impl Mapper {
    /// Most ROM banks the mapper can address
    pub fn max_rom_banks(self) -> u16 {
        match self {
            Mapper::None => 2,
            Mapper::Mbc1 => 128,
            Mapper::Mbc3 => 128,
            Mapper::Mbc5 => 512,
        }
    }

    /// Register writes mapping ROM `bank` into 0x4000-0x7FFF
    pub fn rom_bank_writes(self, bank: u16) -> Vec<(u16, u8)> {
        match self {
            Mapper::None => Vec::new(),
            Mapper::Mbc1 => vec![
                (0x6000, 0x00),
                (0x2000, (bank & 0x1F) as u8),
                (0x4000, ((bank >> 5) & 0x03) as u8),
            ],
            Mapper::Mbc3 => vec![(0x2000, (bank & 0x7F) as u8)],
            Mapper::Mbc5 => vec![(0x2000, bank as u8), (0x3000, ((bank >> 8) & 0x01) as u8)],
        }
    }

    /// Register writes mapping RAM `bank` into 0xA000-0xBFFF
    pub fn ram_bank_writes(self, bank: u8) -> Vec<(u16, u8)> {
        match self {
            Mapper::None => Vec::new(),
            Mapper::Mbc1 => vec![(0x6000, 0x01), (0x4000, bank & 0x03)],
            Mapper::Mbc3 => vec![(0x4000, bank & 0x03)],
            Mapper::Mbc5 => vec![(0x4000, bank & 0x0F)],
        }
    }

    /// Register write enabling or disabling cartridge RAM
    pub fn ram_enable_write(self, enable: bool) -> (u16, u8) {
        (0x0000, if enable { 0x0A } else { 0x00 })
    }
}

impl fmt::Display for Mapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Mapper::None => "none",
            Mapper::Mbc1 => "mbc1",
            Mapper::Mbc3 => "mbc3",
            Mapper::Mbc5 => "mbc5",
        };
        f.write_str(name)
    }
}

impl FromStr for Mapper {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "rom" => Ok(Mapper::None),
            "mbc1" => Ok(Mapper::Mbc1),
            "mbc3" => Ok(Mapper::Mbc3),
            "mbc5" => Ok(Mapper::Mbc5),
            _ => Err(Error::InvalidArgument(format!("unknown mapper '{}'", s))),
        }
    }
}

/// Banking layout of a GB cartridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BankingParams {
    /// Mapper chip
    pub mapper: Mapper,
    /// Number of 16 KiB ROM banks
    pub rom_banks: u16,
    /// Number of 8 KiB RAM banks
    pub ram_banks: u8,
}

impl Default for BankingParams {
    fn default() -> Self {
        Self {
            mapper: Mapper::Mbc5,
            rom_banks: 2,
            ram_banks: 1,
        }
    }
}

impl BankingParams {
    /// Total ROM size in bytes
    pub fn rom_size(&self) -> usize {
        self.rom_banks as usize * ROM_BANK_SIZE as usize
    }

    /// Total RAM size in bytes
    pub fn ram_size(&self) -> usize {
        self.ram_banks as usize * RAM_BANK_SIZE as usize
    }

    /// Check the bank counts against the mapper
    pub fn validate(&self) -> Result<()> {
        if self.rom_banks == 0 || self.rom_banks > self.mapper.max_rom_banks() {
            return Err(Error::InvalidArgument(format!(
                "{} ROM banks not addressable by {}",
                self.rom_banks, self.mapper
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mbc5_bank_writes() {
        assert_eq!(Mapper::Mbc5.rom_bank_writes(0x1A5), vec![(0x2000, 0xA5), (0x3000, 0x01)]);
        assert_eq!(Mapper::Mbc5.ram_bank_writes(3), vec![(0x4000, 3)]);
        assert!(Mapper::None.rom_bank_writes(1).is_empty());
    }

    #[test]
    fn test_validate() {
        let mut params = BankingParams {
            mapper: Mapper::None,
            rom_banks: 2,
            ram_banks: 0,
        };
        assert!(params.validate().is_ok());
        params.rom_banks = 4;
        assert!(params.validate().is_err());
        params.mapper = "MBC1".parse().unwrap();
        assert!(params.validate().is_ok());
        assert_eq!(params.rom_size(), 0x10000);
    }
}
