//! GBA address window state machine
//!
//! The GBA cartridge latches a 24-bit halfword address when CS1 falls and
//! then auto-increments the low 16 bits on every read or write strobe. The
//! cartridge's counter wraps within the 64Ki-word page, so software must walk
//! the high byte forward itself. [`AddressWindow`] mirrors the cartridge's
//! counter and emits exactly one `GbaAddrAdvance` each time 65536 cycles have
//! completed since the last boundary.

use crate::codec::{BusLines, BusState, Command};
use crate::error::{Error, Result};
use crate::pipeline::Pipeline;
use crate::transport::Transport;

/// Number of halfword cycles in one latched page
pub const PAGE_CYCLES: u32 = 0x1_0000;

/// Largest GBA halfword address (32 MiB of ROM)
pub const MAX_WORD_ADDR: u32 = 0xFF_FFFF;

/// The latched address window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AddressState {
    /// Low half, advanced by bus cycles
    pub low16: u16,
    /// High byte, changed only by explicit commands
    pub high8: u8,
}

impl AddressState {
    /// Split a halfword address
    pub fn from_word(word_addr: u32) -> Self {
        Self {
            low16: word_addr as u16,
            high8: (word_addr >> 16) as u8,
        }
    }

    /// Combined halfword address
    pub fn word_addr(&self) -> u32 {
        (self.high8 as u32) << 16 | self.low16 as u32
    }
}

/// Tracks the cartridge's latched address and keeps it in step with the host
#[derive(Debug, Clone, Default)]
pub struct AddressWindow {
    state: AddressState,
    /// Cycles since the last page boundary, 0..=PAGE_CYCLES
    counter: u32,
    latched: bool,
    advances: u64,
}

impl AddressWindow {
    /// Create an unlatched window
    pub fn new() -> Self {
        Self::default()
    }

    /// Current address window
    pub fn state(&self) -> AddressState {
        self.state
    }

    /// Whether CS1 is currently held low
    pub fn is_latched(&self) -> bool {
        self.latched
    }

    /// Number of high-byte advances emitted so far
    pub fn advances(&self) -> u64 {
        self.advances
    }

    /// Latch a new halfword address
    ///
    /// Emits the address with every line idle and REQ clear, then the same
    /// address with CS1 low to open the access window.
    pub fn set_address<T: Transport>(&mut self, pipe: &mut Pipeline<T>, word_addr: u32) -> Result<()> {
        if word_addr > MAX_WORD_ADDR {
            return Err(Error::AddressOutOfBounds {
                addr: word_addr.saturating_mul(2),
                len: 0,
                limit: (MAX_WORD_ADDR + 1) * 2,
            });
        }
        let bus = BusState::idle(word_addr);
        pipe.write(&Command::CartWrite(bus))?;
        pipe.write(&Command::CartWrite(bus.asserting(BusLines::CS1)))?;

        self.state = AddressState::from_word(word_addr);
        self.counter = self.state.low16 as u32;
        self.latched = true;
        Ok(())
    }

    /// Account for one emitted read or write cycle
    ///
    /// Must be called after every `GbaRomRead*`/`GbaRomWrite*` command.
    pub fn advance<T: Transport>(&mut self, pipe: &mut Pipeline<T>) -> Result<()> {
        self.counter += 1;
        if self.counter < PAGE_CYCLES {
            self.state.low16 = self.counter as u16;
            return Ok(());
        }

        self.counter = 0;
        self.state.low16 = 0;
        if self.state.high8 == u8::MAX {
            // End of the address space; nothing left to walk to.
            return Ok(());
        }
        self.state.high8 += 1;
        self.advances += 1;
        log::trace!("address window advanced to page 0x{:02X}", self.state.high8);
        pipe.write(&Command::GbaAddrAdvance(self.state.high8))?;
        Ok(())
    }

    /// Raise CS1, closing the access window
    pub fn release<T: Transport>(&mut self, pipe: &mut Pipeline<T>) -> Result<()> {
        pipe.write(&Command::CartWrite(BusState::idle(self.state.word_addr())))?;
        self.latched = false;
        Ok(())
    }
}
