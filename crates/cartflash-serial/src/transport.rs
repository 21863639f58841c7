//! Framed link transports
//!
//! [`FramedTransport`] speaks the frame protocol over any byte stream that
//! implements [`Link`]. Serial ports and TCP sockets are the two links used
//! in practice.

use crate::error::{Result, SerialError};
use crate::protocol::*;
use cartflash_core::transport::{check_reply_len, check_transfer_len};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

/// Timeout used for regular frames
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Byte stream carrying frames
pub trait Link: Read + Write {
    /// Set the timeout applied to subsequent reads
    fn set_read_timeout(&mut self, timeout: Duration) -> Result<()>;
}

impl Link for Box<dyn SerialPort> {
    fn set_read_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.set_timeout(timeout)?;
        Ok(())
    }
}

impl Link for TcpStream {
    fn set_read_timeout(&mut self, timeout: Duration) -> Result<()> {
        TcpStream::set_read_timeout(self, Some(timeout))?;
        Ok(())
    }
}

/// Host side of the frame protocol
pub struct FramedTransport<L: Link> {
    link: L,
    max_len: usize,
}

/// Framed transport over a serial port
pub type SerialTransport = FramedTransport<Box<dyn SerialPort>>;

/// Framed transport over a TCP socket
pub type TcpTransport = FramedTransport<TcpStream>;

impl SerialTransport {
    /// Open a serial port with the specified baud rate
    ///
    /// Uses 115200 baud when `baud` is `None`.
    pub fn open(device: &str, baud: Option<u32>) -> Result<Self> {
        let baud_rate = baud.unwrap_or(DEFAULT_BAUD);

        let port = serialport::new(device, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(DEFAULT_TIMEOUT)
            .open()?;

        log::info!("Opened serial port {} at {} baud", device, baud_rate);

        FramedTransport::new(port)
    }
}

impl TcpTransport {
    /// Connect to a frame server at the specified host and port
    pub fn connect(host: &str, port: u16) -> Result<Self> {
        let addr = format!("{}:{}", host, port);
        log::info!("Connecting to frame server at {}", addr);

        let stream = TcpStream::connect(&addr)
            .map_err(|e| SerialError::ConnectionFailed(e.to_string()))?;

        stream.set_nodelay(true).map_err(|e| {
            SerialError::ConnectionFailed(format!("Failed to set TCP_NODELAY: {}", e))
        })?;
        stream
            .set_write_timeout(Some(DEFAULT_TIMEOUT))
            .map_err(|e| {
                SerialError::ConnectionFailed(format!("Failed to set write timeout: {}", e))
            })?;

        log::info!("Connected to frame server at {}", addr);

        FramedTransport::new(stream)
    }
}

impl<L: Link> FramedTransport<L> {
    /// Synchronize with the device and learn its transfer limit
    pub fn new(link: L) -> Result<Self> {
        let mut transport = Self {
            link,
            max_len: MAX_FRAME_PAYLOAD,
        };
        transport.synchronize()?;
        transport.max_len = transport.query_max_len()?;
        log::debug!("serial: device accepts {} byte frames", transport.max_len);
        Ok(transport)
    }

    /// Give back the underlying link
    pub fn into_inner(self) -> L {
        self.link
    }

    /// Bring the device's frame parser to a known state
    fn synchronize(&mut self) -> Result<()> {
        // Drain anything left over from an earlier session
        self.link.set_read_timeout(Duration::from_millis(10))?;
        let mut buf = [0u8; 512];
        for _ in 0..1024 {
            match self.link.read(&mut buf) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => break,
                Err(e) => return Err(e.into()),
            }
        }

        self.link.set_read_timeout(Duration::from_millis(500))?;
        let mut synced = false;
        for attempt in 0..8 {
            self.link.write_all(&[FRAME_SYNC])?;
            self.link.flush()?;
            let mut c = [0u8];
            match self.link.read_exact(&mut c) {
                Ok(()) if c[0] == ACK => {
                    synced = true;
                    break;
                }
                Ok(()) => log::debug!("serial: sync attempt {} got 0x{:02X}", attempt, c[0]),
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                    log::debug!("serial: sync attempt {} timed out", attempt)
                }
                Err(e) => return Err(e.into()),
            }
        }
        self.link.set_read_timeout(DEFAULT_TIMEOUT)?;

        if synced {
            Ok(())
        } else {
            Err(SerialError::SyncFailed)
        }
    }

    fn query_max_len(&mut self) -> Result<usize> {
        self.link.write_all(&[FRAME_MAX_LEN])?;
        self.link.flush()?;
        self.expect_ack(FRAME_MAX_LEN)?;
        let mut len = [0u8; 2];
        self.link.read_exact(&mut len)?;
        match u16::from_le_bytes(len) {
            0 => Err(SerialError::InvalidResponse {
                command: FRAME_MAX_LEN,
                response: 0,
            }),
            n => Ok(n as usize),
        }
    }

    fn expect_ack(&mut self, frame: u8) -> Result<()> {
        let mut c = [0u8];
        self.link.read_exact(&mut c)?;
        match c[0] {
            ACK => Ok(()),
            NAK => Err(SerialError::Nak(frame)),
            response => Err(SerialError::InvalidResponse {
                command: frame,
                response,
            }),
        }
    }

    /// Send one payload frame and collect `reply_len` bytes after the ACK
    fn exchange(&mut self, frame: u8, payload: &[u8], reply_len: usize) -> Result<Vec<u8>> {
        let header =
            frame_header(frame, payload.len()).ok_or(SerialError::FrameTooLarge(payload.len()))?;
        log::trace!("serial: frame 0x{:02X} with {} bytes", frame, payload.len());
        self.link.write_all(&header)?;
        self.link.write_all(payload)?;
        self.link.flush()?;
        self.expect_ack(frame)?;
        let mut reply = vec![0u8; reply_len];
        self.link.read_exact(&mut reply)?;
        Ok(reply)
    }
}

impl<L: Link> cartflash_core::Transport for FramedTransport<L> {
    fn max_transfer_len(&self) -> usize {
        self.max_len
    }

    fn write_only(&mut self, data: &[u8]) -> cartflash_core::Result<()> {
        check_transfer_len(data.len(), self.max_len)?;
        self.exchange(FRAME_WRITE, data, 0)?;
        Ok(())
    }

    fn write_then_read(&mut self, data: &[u8]) -> cartflash_core::Result<Vec<u8>> {
        check_transfer_len(data.len(), self.max_len)?;
        let reply = self.exchange(FRAME_DUPLEX, data, data.len())?;
        check_reply_len(data.len(), reply.len())?;
        Ok(reply)
    }

    fn delay_us(&mut self, us: u32) {
        std::thread::sleep(Duration::from_micros(us as u64));
    }
}
