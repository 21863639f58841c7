//! Device handle
//!
//! A [`DeviceHandle`] is the single owner of one connected flasher: its
//! pipeline (and through it the transport), the latched address window, and
//! the cached power and bus mode. Engine and flash operations take it by
//! `&mut`, which serializes access to the device.

use crate::address::AddressWindow;
use crate::codec::{Command, Variable};
use crate::engine::BankingParams;
use crate::error::{Error, Result};
use crate::pipeline::Pipeline;
use crate::power::{CartMode, PowerState};
use crate::transport::Transport;

/// Time the rail needs to settle after switching, in microseconds
const POWER_SETTLE_US: u32 = 100_000;

/// A connected flasher
pub struct DeviceHandle<T: Transport> {
    pipe: Pipeline<T>,
    window: AddressWindow,
    power: PowerState,
    mode: CartMode,
    banking: BankingParams,
    firmware_version: u16,
    device_kind: u8,
}

impl<T: Transport> DeviceHandle<T> {
    /// Connect over `transport`, reading the firmware identity and rail state
    pub fn connect(transport: T) -> Result<Self> {
        let mut pipe = Pipeline::new(transport);
        pipe.write(&Command::VarGet(Variable::FirmwareVersion))?
            .write(&Command::VarGet(Variable::DeviceKind))?
            .write(&Command::PowerRead)?
            .flush()?;
        let firmware_version = pipe.next_reply()?.var()? as u16;
        let device_kind = pipe.next_reply()?.var()? as u8;
        let power = PowerState::from_reply(pipe.next_reply()?)?;

        log::info!(
            "Connected to flasher: firmware {}.{}, device kind 0x{:02X}, power {}",
            firmware_version >> 8,
            firmware_version & 0xFF,
            device_kind,
            power
        );

        let mode = if power == PowerState::V5 {
            CartMode::Dmg
        } else {
            CartMode::Agb
        };
        Ok(Self {
            pipe,
            window: AddressWindow::new(),
            power,
            mode,
            banking: BankingParams::default(),
            firmware_version,
            device_kind,
        })
    }

    /// Firmware version reported at connect
    pub fn firmware_version(&self) -> u16 {
        self.firmware_version
    }

    /// Hardware revision reported at connect
    pub fn device_kind(&self) -> u8 {
        self.device_kind
    }

    /// Cached power rail state
    pub fn power(&self) -> PowerState {
        self.power
    }

    /// Switch the power rail and confirm it by reading it back
    pub fn set_power(&mut self, state: PowerState) -> Result<()> {
        log::debug!("Switching power {} -> {}", self.power, state);
        self.pipe.write(&state.command())?;
        self.pipe.sleep_us(POWER_SETTLE_US)?;
        let actual = self.refresh_power()?;
        if actual != state {
            return Err(Error::InvalidPowerState {
                expected: state,
                actual,
            });
        }
        Ok(())
    }

    /// Re-read the rail state from the device
    pub fn refresh_power(&mut self) -> Result<PowerState> {
        self.pipe.write(&Command::PowerRead)?.flush()?;
        self.power = PowerState::from_reply(self.pipe.next_reply()?)?;
        Ok(self.power)
    }

    /// Fail with `InvalidPowerState` unless the cached rail is `expected`
    pub fn require_power(&self, expected: PowerState) -> Result<()> {
        if self.power != expected {
            return Err(Error::InvalidPowerState {
                expected,
                actual: self.power,
            });
        }
        Ok(())
    }

    /// Current cartridge bus mode
    pub fn mode(&self) -> CartMode {
        self.mode
    }

    /// Select the cartridge bus mode
    pub fn set_mode(&mut self, mode: CartMode) {
        self.mode = mode;
    }

    /// Banking parameters used for GB ROM and RAM transfers
    pub fn banking(&self) -> BankingParams {
        self.banking
    }

    /// Set the banking parameters, usually derived from the cartridge header
    pub fn set_banking(&mut self, banking: BankingParams) {
        self.banking = banking;
    }

    /// Read a firmware variable
    pub fn get_var(&mut self, var: Variable) -> Result<u32> {
        self.pipe.write(&Command::VarGet(var))?.flush()?;
        let value = self.pipe.next_reply()?.var()?;
        Ok(value & mask(var.spec().bits))
    }

    /// Write a firmware variable
    pub fn set_var(&mut self, var: Variable, value: u32) -> Result<()> {
        let spec = var.spec();
        if !spec.writable {
            return Err(Error::InvalidArgument(format!("{} is read-only", spec.name)));
        }
        if value & !mask(spec.bits) != 0 {
            return Err(Error::InvalidArgument(format!(
                "{} does not fit in {} bits of {}",
                value, spec.bits, spec.name
            )));
        }
        self.pipe.write(&Command::VarSet(var, value))?.flush()?;
        Ok(())
    }

    /// Split borrow of the pipeline and address window
    pub fn parts(&mut self) -> (&mut Pipeline<T>, &mut AddressWindow) {
        (&mut self.pipe, &mut self.window)
    }

    /// Mutably borrow the pipeline
    pub fn pipe_mut(&mut self) -> &mut Pipeline<T> {
        &mut self.pipe
    }

    /// Borrow the transport
    pub fn transport(&self) -> &T {
        self.pipe.transport()
    }

    /// Mutably borrow the transport
    pub fn transport_mut(&mut self) -> &mut T {
        self.pipe.transport_mut()
    }

    /// Flush pending commands, power down the cartridge and return the transport
    pub fn shutdown(mut self) -> Result<T> {
        self.pipe.flush()?;
        if self.power != PowerState::Off {
            log::debug!("Powering down cartridge");
            self.pipe.send_now(&PowerState::Off.command())?;
        }
        Ok(self.pipe.into_inner())
    }
}

fn mask(bits: u32) -> u32 {
    if bits >= 32 {
        u32::MAX
    } else {
        (1 << bits) - 1
    }
}
