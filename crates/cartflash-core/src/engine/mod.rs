//! ROM/RAM transfer engine
//!
//! Drives sequential and random-access transfers over the whole cartridge
//! address space. Transfers are split into chunks sized to fit one
//! transport call, progress is reported after every chunk, and the cancel
//! token is checked at every chunk boundary.
//!
//! Every operation checks the power rail before touching the bus: GBA
//! operations need 3.3V and GB operations need 5V.

mod banking;
mod bus;
mod progress;
mod ram;
mod rom;

pub use banking::{BankingParams, Mapper, RAM_BANK_SIZE, RAM_WINDOW, ROM_BANK_SIZE};
pub use bus::{CartBus, WritePin};
pub use progress::{CancelToken, NoProgress, Progress};
pub use ram::{read_ram, write_ram, AGB_SRAM_SIZE};
pub use rom::{
    read_block, read_rom, read_word, write_block_sequential, write_block_with_explicit_address,
    AGB_ROM_SIZE,
};

use crate::error::{Error, Result};
use std::ops::Range;

/// Bytes kept free in each chunk for address, bank and release commands
const CHUNK_HEADROOM: usize = 32;

/// Number of cycles of `cycle_len` bytes that fit one transfer
pub(crate) fn cycles_per_chunk(max_len: usize, cycle_len: usize) -> Result<usize> {
    let cycles = max_len.saturating_sub(CHUNK_HEADROOM) / cycle_len;
    if cycles == 0 {
        return Err(Error::TransferTooLarge {
            len: cycle_len + CHUNK_HEADROOM,
            max: max_len,
        });
    }
    Ok(cycles)
}

/// Run `f` over consecutive chunks of `0..total`, checking `cancel` before each
///
/// The flag passed to `f` is true for the final chunk, including a short
/// remainder.
pub(crate) fn for_each_chunk(
    total: usize,
    chunk: usize,
    cancel: &CancelToken,
    mut f: impl FnMut(Range<usize>, bool) -> Result<()>,
) -> Result<()> {
    let mut start = 0;
    loop {
        cancel.check()?;
        let end = (start + chunk).min(total);
        let last = end == total;
        f(start..end, last)?;
        if last {
            return Ok(());
        }
        start = end;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycles_per_chunk() {
        assert_eq!(cycles_per_chunk(4096, 3).unwrap(), 1354);
        assert!(cycles_per_chunk(16, 3).is_err());
    }

    #[test]
    fn test_for_each_chunk_remainder() {
        let mut seen = Vec::new();
        for_each_chunk(10, 4, &CancelToken::new(), |r, last| {
            seen.push((r, last));
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec![(0..4, false), (4..8, false), (8..10, true)]);
    }

    #[test]
    fn test_for_each_chunk_exact_multiple() {
        let mut count = 0;
        for_each_chunk(8, 4, &CancelToken::new(), |r, last| {
            count += 1;
            assert_eq!(last, r.end == 8);
            Ok(())
        })
        .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_for_each_chunk_cancel() {
        let cancel = CancelToken::new();
        let mut count = 0;
        let result = for_each_chunk(100, 10, &cancel, |_, _| {
            count += 1;
            if count == 3 {
                cancel.cancel();
            }
            Ok(())
        });
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(count, 3);
    }
}
