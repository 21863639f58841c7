//! Save RAM transfers
//!
//! GBA SRAM is a flat byte array behind CS2. GB cartridge RAM sits in the
//! 0xA000-0xBFFF window, is enabled through the mapper and banked in 8 KiB
//! steps.

use super::banking::{BankingParams, RAM_BANK_SIZE, RAM_WINDOW};
use super::progress::{CancelToken, Progress};
use super::{cycles_per_chunk, for_each_chunk};
use crate::codec::Command;
use crate::device::DeviceHandle;
use crate::error::{Error, Result};
use crate::pipeline::Pipeline;
use crate::power::CartMode;
use crate::transport::Transport;

/// Size of the GBA SRAM address space in bytes
pub const AGB_SRAM_SIZE: u32 = 0x1_0000;

/// Direction of a RAM transfer
enum Transfer<'a> {
    Read(&'a mut Vec<u8>),
    Write(&'a [u8]),
}

/// Read `size` bytes of save RAM starting at `addr`
pub fn read_ram<T: Transport>(
    dev: &mut DeviceHandle<T>,
    addr: u32,
    size: usize,
    progress: &mut dyn Progress,
    cancel: &CancelToken,
) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(size);
    transfer(dev, addr, size, Transfer::Read(&mut out), progress, cancel)?;
    Ok(out)
}

/// Write `data` to save RAM starting at `addr`
pub fn write_ram<T: Transport>(
    dev: &mut DeviceHandle<T>,
    addr: u32,
    data: &[u8],
    progress: &mut dyn Progress,
    cancel: &CancelToken,
) -> Result<()> {
    transfer(dev, addr, data.len(), Transfer::Write(data), progress, cancel)
}

fn transfer<T: Transport>(
    dev: &mut DeviceHandle<T>,
    addr: u32,
    size: usize,
    mut dir: Transfer<'_>,
    progress: &mut dyn Progress,
    cancel: &CancelToken,
) -> Result<()> {
    let mode = dev.mode();
    dev.require_power(mode.required_power())?;
    let banking = dev.banking();
    let limit = match mode {
        CartMode::Agb => AGB_SRAM_SIZE,
        CartMode::Dmg => banking.ram_size() as u32,
    };
    if addr as u64 + size as u64 > limit as u64 {
        return Err(Error::AddressOutOfBounds { addr, len: size, limit });
    }
    match &dir {
        Transfer::Read(_) => progress.reading(size),
        Transfer::Write(_) => progress.writing(size),
    }
    if size == 0 {
        return Ok(());
    }

    let pipe = dev.pipe_mut();
    // every RAM command is 4 bytes on the wire
    let chunk = cycles_per_chunk(pipe.max_transfer_len(), Command::GbRamRead(0).opcode().spec().encoded_len())?;
    log::debug!(
        "{} 0x{:X} bytes of {} save RAM at 0x{:04X}",
        if matches!(dir, Transfer::Read(_)) { "Reading" } else { "Writing" },
        size,
        mode,
        addr
    );

    if mode == CartMode::Dmg {
        let (reg, value) = banking.mapper.ram_enable_write(true);
        pipe.write(&Command::GbWrite { addr: reg, data: value })?;
    }

    let mut current_bank = None;
    let result = for_each_chunk(size, chunk, cancel, |range, _| {
        for offset in range.clone() {
            let linear = addr + offset as u32;
            let bus_addr = match mode {
                CartMode::Agb => linear as u16,
                CartMode::Dmg => gb_ram_addr(pipe, &banking, linear, &mut current_bank)?,
            };
            let cmd = match (&dir, mode) {
                (Transfer::Read(_), CartMode::Agb) => Command::GbaRamRead(bus_addr),
                (Transfer::Read(_), CartMode::Dmg) => Command::GbRamRead(bus_addr),
                (Transfer::Write(data), CartMode::Agb) => Command::GbaRamWrite {
                    addr: bus_addr,
                    data: data[offset],
                },
                (Transfer::Write(data), CartMode::Dmg) => Command::GbRamWrite {
                    addr: bus_addr,
                    data: data[offset],
                },
            };
            pipe.write(&cmd)?;
        }
        pipe.flush()?;
        match &mut dir {
            Transfer::Read(out) => {
                for reply in pipe.take_exact(range.len())? {
                    out.push(reply.byte()?);
                }
                progress.read_progress(range.end);
            }
            Transfer::Write(_) => progress.write_progress(range.end),
        }
        Ok(())
    });

    if mode == CartMode::Dmg {
        // Always lock RAM again, even after a failure.
        let (reg, value) = banking.mapper.ram_enable_write(false);
        let locked = pipe
            .write(&Command::GbWrite { addr: reg, data: value })
            .and_then(|p| p.flush())
            .map(|_| ());
        result?;
        return locked;
    }
    result
}

/// Select the RAM bank holding `linear` and return its bus address
fn gb_ram_addr<T: Transport>(
    pipe: &mut Pipeline<T>,
    banking: &BankingParams,
    linear: u32,
    current_bank: &mut Option<u8>,
) -> Result<u16> {
    let bank = (linear / RAM_BANK_SIZE) as u8;
    if *current_bank != Some(bank) {
        for (reg, value) in banking.mapper.ram_bank_writes(bank) {
            pipe.write(&Command::GbWrite { addr: reg, data: value })?;
        }
        *current_bank = Some(bank);
    }
    Ok(RAM_WINDOW + (linear % RAM_BANK_SIZE) as u16)
}
