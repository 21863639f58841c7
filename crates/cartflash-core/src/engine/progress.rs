//! Progress reporting and cooperative cancellation

use crate::error::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Progress callback for long-running operations
///
/// Called synchronously from the worker after each chunk, sector or
/// phase. All byte counts are cumulative within the phase.
pub trait Progress {
    /// Called when starting a read (ROM/RAM dump or verify)
    fn reading(&mut self, total_bytes: usize);

    /// Called to update read progress
    fn read_progress(&mut self, bytes_read: usize);

    /// Called when starting erase operations
    fn erasing(&mut self, sectors: usize);

    /// Called after each chip or sector erase completes
    fn erase_progress(&mut self, sectors_erased: usize);

    /// Called when starting write operations
    fn writing(&mut self, total_bytes: usize);

    /// Called to update write progress
    fn write_progress(&mut self, bytes_written: usize);

    /// Called once the whole operation has finished
    fn complete(&mut self) {}
}

/// A no-op progress reporter
pub struct NoProgress;

impl Progress for NoProgress {
    fn reading(&mut self, _total_bytes: usize) {}
    fn read_progress(&mut self, _bytes_read: usize) {}
    fn erasing(&mut self, _sectors: usize) {}
    fn erase_progress(&mut self, _sectors_erased: usize) {}
    fn writing(&mut self, _total_bytes: usize) {}
    fn write_progress(&mut self, _bytes_written: usize) {}
}

/// Shared cancellation flag
///
/// Clones share the same flag. Operations check it between chunks and
/// sectors, never in the middle of a command sequence.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Create a token that is not cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Fail with [`Error::Cancelled`] if cancellation was requested
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_flag() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(token.check().is_ok());
        other.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(Error::Cancelled)));
    }
}
