//! ROM, save RAM and power commands

use super::progress::IndicatifProgress;
use crate::cli::CartArgs;
use cartflash_core::engine::{
    read_ram, read_rom, write_ram, BankingParams, CancelToken, RAM_BANK_SIZE, ROM_BANK_SIZE,
};
use cartflash_core::{CartMode, DeviceHandle, PowerState, Progress};
use cartflash_device::{open_device, BoxedTransport};
use std::error::Error;
use std::path::Path;

/// Open the programmer, power the cartridge and run `op`, always powering down
fn with_cart<R>(
    cart: &CartArgs,
    banking: BankingParams,
    op: impl FnOnce(&mut DeviceHandle<BoxedTransport>) -> cartflash_core::Result<R>,
) -> Result<R, Box<dyn Error>> {
    let mut dev = open_device(&cart.programmer)?;
    dev.set_mode(cart.mode);
    dev.set_banking(banking);
    let result = dev
        .set_power(cart.mode.required_power())
        .and_then(|()| op(&mut dev));
    let shutdown = dev.shutdown();
    let value = result?;
    shutdown?;
    Ok(value)
}

fn banks(size: usize, bank_size: u32) -> usize {
    size.div_ceil(bank_size as usize).max(1)
}

/// Dump `size` bytes of ROM to `output`
pub fn run_read_rom(
    cart: &CartArgs,
    size: usize,
    output: &Path,
    cancel: &CancelToken,
) -> Result<(), Box<dyn Error>> {
    let banking = BankingParams {
        mapper: cart.mapper,
        rom_banks: u16::try_from(banks(size, ROM_BANK_SIZE))
            .map_err(|_| format!("ROM size {} too large", size))?,
        ..BankingParams::default()
    };
    if cart.mode == CartMode::Dmg {
        banking.validate()?;
    }

    let mut progress = IndicatifProgress::new();
    let data = with_cart(cart, banking, |dev| {
        read_rom(dev, size, &mut progress, cancel)
    })?;
    progress.complete();

    std::fs::write(output, &data)?;
    println!("Wrote {} bytes to {:?}", data.len(), output);
    Ok(())
}

fn ram_banking(cart: &CartArgs, size: usize) -> Result<BankingParams, Box<dyn Error>> {
    Ok(BankingParams {
        mapper: cart.mapper,
        ram_banks: u8::try_from(banks(size, RAM_BANK_SIZE))
            .map_err(|_| format!("RAM size {} too large", size))?,
        ..BankingParams::default()
    })
}

/// Dump `size` bytes of save RAM to `output`
pub fn run_read_ram(
    cart: &CartArgs,
    size: usize,
    output: &Path,
    cancel: &CancelToken,
) -> Result<(), Box<dyn Error>> {
    let banking = ram_banking(cart, size)?;
    let mut progress = IndicatifProgress::new();
    let data = with_cart(cart, banking, |dev| {
        read_ram(dev, 0, size, &mut progress, cancel)
    })?;
    progress.complete();

    std::fs::write(output, &data)?;
    println!("Wrote {} bytes to {:?}", data.len(), output);
    Ok(())
}

/// Write the contents of `input` to save RAM at `addr`
pub fn run_write_ram(
    cart: &CartArgs,
    input: &Path,
    addr: u32,
    cancel: &CancelToken,
) -> Result<(), Box<dyn Error>> {
    let data = std::fs::read(input)?;
    println!("Read {} bytes from {:?}", data.len(), input);

    let banking = ram_banking(cart, addr as usize + data.len())?;
    let mut progress = IndicatifProgress::new();
    with_cart(cart, banking, |dev| {
        write_ram(dev, addr, &data, &mut progress, cancel)
    })?;
    progress.complete();

    println!("Restored {} bytes of save RAM", data.len());
    Ok(())
}

/// Show the power rail, or switch it to `state`
///
/// Switching leaves the rail on after the programmer is closed.
pub fn run_power(programmer: &str, state: Option<PowerState>) -> Result<(), Box<dyn Error>> {
    let mut dev = open_device(programmer)?;
    match state {
        Some(state) => {
            dev.set_power(state)?;
            println!("Power: {}", dev.refresh_power()?);
        }
        None => {
            println!("Power: {}", dev.refresh_power()?);
        }
    }
    Ok(())
}

#[cfg(all(test, feature = "emu"))]
mod tests {
    use super::*;
    use cartflash_core::{Error as CoreError, Mapper};

    fn emu_cart() -> CartArgs {
        CartArgs {
            programmer: "emu".to_string(),
            mode: CartMode::Agb,
            mapper: Mapper::Mbc5,
        }
    }

    #[test]
    fn test_cancelled_dump_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("save.bin");
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = run_read_ram(&emu_cart(), 0x100, &output, &cancel).unwrap_err();
        assert!(matches!(err.downcast_ref::<CoreError>(), Some(CoreError::Cancelled)));
        assert!(!output.exists());

        run_read_ram(&emu_cart(), 0x100, &output, &CancelToken::new()).unwrap();
        assert_eq!(std::fs::read(&output).unwrap().len(), 0x100);
    }
}
