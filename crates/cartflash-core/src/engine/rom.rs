//! ROM transfers

use super::banking::ROM_BANK_SIZE;
use super::bus::{CartBus, WritePin};
use super::progress::{CancelToken, Progress};
use super::{cycles_per_chunk, for_each_chunk};
use crate::codec::{Command, WordEncoding};
use crate::device::DeviceHandle;
use crate::error::{Error, Result};
use crate::power::CartMode;
use crate::transport::Transport;

/// Size of the GBA ROM address space in bytes
pub const AGB_ROM_SIZE: u32 = 0x200_0000;

fn check_agb_range(addr: u32, len: usize) -> Result<()> {
    if addr % 2 != 0 || len % 2 != 0 {
        return Err(Error::InvalidAlignment { addr, len, align: 2 });
    }
    if addr as u64 + len as u64 > AGB_ROM_SIZE as u64 {
        return Err(Error::AddressOutOfBounds {
            addr,
            len,
            limit: AGB_ROM_SIZE,
        });
    }
    Ok(())
}

/// Read `size` bytes of GBA ROM starting at byte address `addr`
///
/// Latches the start address once and then relies on the cartridge's
/// auto-increment, walking the high byte at every 128 KiB page.
pub fn read_block<T: Transport>(
    dev: &mut DeviceHandle<T>,
    addr: u32,
    size: usize,
    encoding: WordEncoding,
    progress: &mut dyn Progress,
    cancel: &CancelToken,
) -> Result<Vec<u8>> {
    dev.require_power(CartMode::Agb.required_power())?;
    check_agb_range(addr, size)?;
    let mut out = Vec::with_capacity(size);
    if size == 0 {
        return Ok(out);
    }

    let read = match encoding {
        WordEncoding::Base => Command::GbaRomRead,
        WordEncoding::Flip => Command::GbaRomReadFlip,
    };
    let (pipe, window) = dev.parts();
    let chunk = cycles_per_chunk(pipe.max_transfer_len(), read.opcode().spec().encoded_len())?;
    log::debug!(
        "Reading 0x{:X} bytes of ROM at 0x{:06X} ({:?}, {} words per chunk)",
        size,
        addr,
        encoding,
        chunk
    );

    progress.reading(size);
    window.set_address(pipe, addr / 2)?;
    let result = for_each_chunk(size / 2, chunk, cancel, |range, last| {
        for _ in range.clone() {
            pipe.write(&read)?;
            window.advance(pipe)?;
        }
        if last {
            window.release(pipe)?;
        }
        pipe.flush()?;
        for reply in pipe.take_exact(range.len())? {
            out.extend_from_slice(&reply.word()?.to_le_bytes());
        }
        progress.read_progress(range.end * 2);
        Ok(())
    });
    if result.is_err() && window.is_latched() {
        // Best effort; the original error is what the caller needs.
        let _ = window.release(pipe).and_then(|_| pipe.flush().map(|_| ()));
    }
    result?;
    Ok(out)
}

/// Write `data` to GBA ROM space starting at byte address `addr`
///
/// One write cycle per halfword at the auto-incremented address, for
/// ROM-space devices that accept plain bus writes. Flash chips need command
/// sequences and go through [`crate::flash`] instead.
pub fn write_block_sequential<T: Transport>(
    dev: &mut DeviceHandle<T>,
    addr: u32,
    data: &[u8],
    encoding: WordEncoding,
    progress: &mut dyn Progress,
    cancel: &CancelToken,
) -> Result<()> {
    dev.require_power(CartMode::Agb.required_power())?;
    check_agb_range(addr, data.len())?;
    if data.is_empty() {
        return Ok(());
    }

    let (pipe, window) = dev.parts();
    let chunk = cycles_per_chunk(
        pipe.max_transfer_len(),
        Command::GbaRomWrite(0).opcode().spec().encoded_len(),
    )?;
    log::debug!("Writing 0x{:X} bytes of ROM at 0x{:06X}", data.len(), addr);

    progress.writing(data.len());
    window.set_address(pipe, addr / 2)?;
    let result = for_each_chunk(data.len() / 2, chunk, cancel, |range, last| {
        for i in range.clone() {
            let word = u16::from_le_bytes([data[i * 2], data[i * 2 + 1]]);
            let cmd = match encoding {
                WordEncoding::Base => Command::GbaRomWrite(word),
                WordEncoding::Flip => Command::GbaRomWriteFlip(word),
            };
            pipe.write(&cmd)?;
            window.advance(pipe)?;
        }
        if last {
            window.release(pipe)?;
        }
        pipe.flush()?;
        progress.write_progress(range.end * 2);
        Ok(())
    });
    if result.is_err() && window.is_latched() {
        let _ = window.release(pipe).and_then(|_| pipe.flush().map(|_| ()));
    }
    result
}

/// Write each `(address, value)` pair at its own bus-word address
///
/// GBA addresses are halfword addresses with 16-bit values; GB addresses
/// are linear byte addresses (banked above 0x4000) with 8-bit values.
pub fn write_block_with_explicit_address<T: Transport>(
    dev: &mut DeviceHandle<T>,
    pairs: &[(u32, u16)],
    progress: &mut dyn Progress,
    cancel: &CancelToken,
) -> Result<()> {
    let mode = dev.mode();
    dev.require_power(mode.required_power())?;
    if pairs.is_empty() {
        return Ok(());
    }

    let mut bus = CartBus::new(dev, WritePin::Wr);
    // latch + write on GBA, worst-case bank switch + write on GB
    let per_pair = match mode {
        CartMode::Agb => 2 * 5 + 3,
        CartMode::Dmg => 3 * 4,
    };
    let chunk = cycles_per_chunk(bus.max_transfer_len(), per_pair)?;
    let word_bytes = mode.word_bytes() as usize;

    progress.writing(pairs.len() * word_bytes);
    let result = for_each_chunk(pairs.len(), chunk, cancel, |range, _| {
        for &(addr, value) in &pairs[range.clone()] {
            bus.write(addr, value)?;
        }
        bus.finish()?;
        progress.write_progress(range.end * word_bytes);
        Ok(())
    });
    if result.is_err() {
        let _ = bus.finish();
    }
    result
}

/// Read the whole ROM of the inserted cartridge
///
/// GBA cartridges are read linearly from address 0 for `size` bytes. GB
/// cartridges are read bank by bank using the handle's banking parameters;
/// `size` must not exceed the banked ROM size.
pub fn read_rom<T: Transport>(
    dev: &mut DeviceHandle<T>,
    size: usize,
    progress: &mut dyn Progress,
    cancel: &CancelToken,
) -> Result<Vec<u8>> {
    match dev.mode() {
        CartMode::Agb => read_block(dev, 0, size, WordEncoding::Base, progress, cancel),
        CartMode::Dmg => read_rom_gb(dev, size, progress, cancel),
    }
}

/// Read the single bus word at bus-word address `addr` in the handle's mode
///
/// Used for one-off status polls. GB addresses above the first bank are
/// reached through MBC5 banking.
pub fn read_word<T: Transport>(dev: &mut DeviceHandle<T>, addr: u32) -> Result<u16> {
    dev.require_power(dev.mode().required_power())?;
    let mut bus = CartBus::new(dev, WritePin::Wr);
    let word = bus.read(addr)?;
    log::trace!("Read 0x{:04X} at 0x{:06X}", word, addr);
    Ok(word)
}

fn read_rom_gb<T: Transport>(
    dev: &mut DeviceHandle<T>,
    size: usize,
    progress: &mut dyn Progress,
    cancel: &CancelToken,
) -> Result<Vec<u8>> {
    dev.require_power(CartMode::Dmg.required_power())?;
    let banking = dev.banking();
    banking.validate()?;
    if size > banking.rom_size() {
        return Err(Error::AddressOutOfBounds {
            addr: 0,
            len: size,
            limit: banking.rom_size() as u32,
        });
    }

    let mut out = Vec::with_capacity(size);
    let pipe = dev.pipe_mut();
    let chunk = cycles_per_chunk(
        pipe.max_transfer_len(),
        Command::GbRead(0).opcode().spec().encoded_len(),
    )?;
    log::debug!(
        "Reading 0x{:X} bytes of GB ROM ({}, {} banks)",
        size,
        banking.mapper,
        banking.rom_banks
    );

    progress.reading(size);
    let mut current_bank = None;
    for_each_chunk(size, chunk, cancel, |range, _| {
        for offset in range.clone() {
            let bank = (offset as u32 / ROM_BANK_SIZE) as u16;
            let bus_addr = if bank == 0 {
                offset as u16
            } else {
                if current_bank != Some(bank) {
                    log::trace!("Switching to ROM bank {}", bank);
                    for (reg, value) in banking.mapper.rom_bank_writes(bank) {
                        pipe.write(&Command::GbWrite { addr: reg, data: value })?;
                    }
                    current_bank = Some(bank);
                }
                (ROM_BANK_SIZE + offset as u32 % ROM_BANK_SIZE) as u16
            };
            pipe.write(&Command::GbRead(bus_addr))?;
        }
        pipe.flush()?;
        for reply in pipe.take_exact(range.len())? {
            out.push(reply.byte()?);
        }
        progress.read_progress(range.end);
        Ok(())
    })?;
    Ok(out)
}
