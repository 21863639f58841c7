//! Error types for the framed serial link

use thiserror::Error;

/// Errors raised by the serial and TCP backends
#[derive(Debug, Error)]
pub enum SerialError {
    /// Failed to open or connect to the link
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The device never answered the sync frame
    #[error("Link synchronization failed")]
    SyncFailed,

    /// NAK response received
    #[error("NAK received for frame 0x{0:02X}")]
    Nak(u8),

    /// Invalid response received
    #[error("Invalid response 0x{response:02X} for frame 0x{command:02X}")]
    InvalidResponse {
        /// Frame type that was sent
        command: u8,
        /// Byte received instead of ACK
        response: u8,
    },

    /// Payload does not fit the 16-bit frame length
    #[error("Frame of {0} bytes exceeds the link limit")]
    FrameTooLarge(usize),

    /// I/O error during communication
    #[error("I/O error: {0}")]
    IoError(String),

    /// Serial port error
    #[error("Serial port error: {0}")]
    SerialError(#[from] serialport::Error),
}

/// Result type for serial link operations
pub type Result<T> = std::result::Result<T, SerialError>;

impl From<std::io::Error> for SerialError {
    fn from(e: std::io::Error) -> Self {
        SerialError::IoError(e.to_string())
    }
}

impl From<SerialError> for cartflash_core::Error {
    fn from(e: SerialError) -> Self {
        cartflash_core::Error::Transport(e.to_string())
    }
}
