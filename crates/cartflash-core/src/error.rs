//! Error types for cartflash-core

use crate::power::PowerState;
use thiserror::Error;

/// Core error type
///
/// Codec and transport failures bubble up unchanged through the engine and
/// the flash state machine. Identifier mismatches are not errors; they are
/// logged and reported in the flash outcome.
#[derive(Debug, Error)]
pub enum Error {
    /// Device unreachable, closed, or the backend reported a failure
    #[error("transport error: {0}")]
    Transport(String),

    /// A single transfer exceeded the transport's maximum size
    #[error("transfer of {len} bytes exceeds the transport limit of {max} bytes")]
    TransferTooLarge {
        /// Requested length in bytes
        len: usize,
        /// Maximum length accepted by the transport
        max: usize,
    },

    /// Malformed or undersized reply bit-stream
    #[error("protocol decode error: {0}")]
    ProtocolDecode(String),

    /// The power rail does not match what the operation requires
    #[error("invalid power state: operation requires {expected}, device is at {actual}")]
    InvalidPowerState {
        /// Rail the operation needs
        expected: PowerState,
        /// Rail the device is currently on
        actual: PowerState,
    },

    /// The erase wait-for predicate never matched
    #[error("erase timed out after {attempts} polls, check the selected cartridge type")]
    EraseTimeout {
        /// Number of polls performed
        attempts: u32,
    },

    /// A program wait-for predicate never matched
    #[error("program timed out at address 0x{addr:06X}")]
    ProgramTimeout {
        /// Bus address of the word being programmed
        addr: u32,
    },

    /// The profile's command template is not a recognized flash method
    #[error("unsupported flash method: {0}")]
    UnsupportedFlashMethod(String),

    /// Address or length not aligned to the bus word width
    #[error("address 0x{addr:X} or length {len} is not aligned to {align} bytes")]
    InvalidAlignment {
        /// Start address in bytes
        addr: u32,
        /// Length in bytes
        len: usize,
        /// Required alignment in bytes
        align: u32,
    },

    /// Range extends past the addressable space
    #[error("range 0x{addr:X}+0x{len:X} exceeds the 0x{limit:X} byte address space")]
    AddressOutOfBounds {
        /// Start address in bytes
        addr: u32,
        /// Length in bytes
        len: usize,
        /// Size of the address space in bytes
        limit: u32,
    },

    /// Readback after programming did not match the image
    #[error("verify failed at 0x{addr:06X}: expected 0x{expected:02X}, read 0x{found:02X}")]
    VerifyFailed {
        /// Byte offset of the first mismatch
        addr: u32,
        /// Byte from the image
        expected: u8,
        /// Byte read from the cartridge
        found: u8,
    },

    /// Flash profile could not be loaded or is inconsistent
    #[error("profile error: {0}")]
    Profile(String),

    /// Caller supplied an argument the device cannot represent
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation was cancelled through its cancel token
    #[error("operation cancelled")]
    Cancelled,
}

/// Result type alias using the core Error type
pub type Result<T> = std::result::Result<T, Error>;
