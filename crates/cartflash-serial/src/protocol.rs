//! Frame layout of the serial link
//!
//! The host sends one frame per request and the device answers with `ACK`
//! followed by the frame's reply payload, or a lone `NAK`.
//!
//! | Frame | Request                    | Reply                     |
//! |-------|----------------------------|---------------------------|
//! | `X`   | `len_lo len_hi payload`    | `ACK` + `len` bytes       |
//! | `W`   | `len_lo len_hi payload`    | `ACK`                     |
//! | `S`   | none                       | `ACK`                     |
//! | `M`   | none                       | `ACK` + max length (u16 LE) |

/// Duplex exchange
pub const FRAME_DUPLEX: u8 = b'X';
/// Write without collecting the reply bits
pub const FRAME_WRITE: u8 = b'W';
/// Sync probe
pub const FRAME_SYNC: u8 = b'S';
/// Query the largest payload the device accepts
pub const FRAME_MAX_LEN: u8 = b'M';

/// Positive acknowledgement
pub const ACK: u8 = 0x06;
/// Negative acknowledgement
pub const NAK: u8 = 0x15;

/// Largest payload a frame header can describe
pub const MAX_FRAME_PAYLOAD: usize = u16::MAX as usize;

/// Default serial baud rate
pub const DEFAULT_BAUD: u32 = 115200;

/// Header for a payload-carrying frame
pub fn frame_header(frame: u8, len: usize) -> Option<[u8; 3]> {
    let len = u16::try_from(len).ok()?.to_le_bytes();
    Some([frame, len[0], len[1]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_header() {
        assert_eq!(frame_header(FRAME_DUPLEX, 0x1234), Some([b'X', 0x34, 0x12]));
        assert_eq!(frame_header(FRAME_WRITE, 0), Some([b'W', 0, 0]));
        assert_eq!(frame_header(FRAME_DUPLEX, MAX_FRAME_PAYLOAD + 1), None);
    }
}
