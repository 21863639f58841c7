//! Transport abstraction
//!
//! A transport is a synchronous duplex byte channel to the flasher. Every
//! byte shifted out clocks one byte back in, so `write_then_read` returns
//! exactly as many bytes as it sent. Backends are selected once at connect
//! time and used through this trait, usually as `Box<dyn Transport + Send>`.

use crate::error::{Error, Result};

/// Default maximum single-transfer size in bytes
pub const DEFAULT_MAX_TRANSFER: usize = 4096;

/// Duplex byte channel to the device
pub trait Transport {
    /// Maximum number of bytes accepted by a single call
    fn max_transfer_len(&self) -> usize {
        DEFAULT_MAX_TRANSFER
    }

    /// Send bytes without collecting the shifted-in reply
    fn write_only(&mut self, data: &[u8]) -> Result<()>;

    /// Send bytes and return the same number of shifted-in bytes
    fn write_then_read(&mut self, data: &[u8]) -> Result<Vec<u8>>;

    /// Block the host for the specified number of microseconds
    fn delay_us(&mut self, us: u32);
}

// Blanket impl for boxed transports to allow trait objects
impl Transport for Box<dyn Transport + Send> {
    fn max_transfer_len(&self) -> usize {
        (**self).max_transfer_len()
    }

    fn write_only(&mut self, data: &[u8]) -> Result<()> {
        (**self).write_only(data)
    }

    fn write_then_read(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        (**self).write_then_read(data)
    }

    fn delay_us(&mut self, us: u32) {
        (**self).delay_us(us)
    }
}

/// Reject a transfer longer than `max` bytes
///
/// Backends call this before touching the wire so oversized requests never
/// get truncated.
pub fn check_transfer_len(len: usize, max: usize) -> Result<()> {
    if len > max {
        return Err(Error::TransferTooLarge { len, max });
    }
    Ok(())
}

/// Fail unless a duplex reply has the same length as the request
pub fn check_reply_len(sent: usize, received: usize) -> Result<()> {
    if sent != received {
        return Err(Error::Transport(format!(
            "short duplex reply: sent {} bytes, received {}",
            sent, received
        )));
    }
    Ok(())
}
