//! cartflash-serial - Framed serial and TCP transport
//!
//! Flashers built around a USB-UART microcontroller cannot shift SPI
//! bytes straight from the host. They accept the command bit-stream in
//! frames instead, clock it out on the cartridge side and send the
//! shifted-in bytes back. See [`protocol`] for the frame layout.
//!
//! # Supported Links
//!
//! - Serial port: `/dev/ttyUSB0`, `/dev/ttyACM0`, `COM1`, etc.
//! - TCP socket: `host:port`, typically a [`FrameServer`] in front of the
//!   emulator
//!
//! # Example
//!
//! ```no_run
//! use cartflash_core::DeviceHandle;
//! use cartflash_serial::SerialTransport;
//!
//! let transport = SerialTransport::open("/dev/ttyACM0", Some(1_000_000))?;
//! let dev = DeviceHandle::connect(transport)?;
//! println!("firmware 0x{:04X}", dev.firmware_version());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod error;
pub mod protocol;
pub mod server;
pub mod transport;

pub use error::{Result, SerialError};
pub use server::FrameServer;
pub use transport::{FramedTransport, Link, SerialTransport, TcpTransport};

/// Connection options for the serial backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerialConnection {
    /// Serial port connection
    Serial {
        /// Device path (e.g., "/dev/ttyUSB0" or "COM1")
        device: String,
        /// Baud rate (None for the default)
        baud: Option<u32>,
    },
    /// TCP socket connection
    Tcp {
        /// Hostname or IP address
        host: String,
        /// Port number
        port: u16,
    },
}

impl SerialConnection {
    /// Parse a connection string
    ///
    /// Formats:
    /// - `dev=/dev/ttyUSB0` - Serial with default baud
    /// - `dev=/dev/ttyUSB0:115200` - Serial with specified baud
    /// - `ip=host:port` - TCP connection
    pub fn parse(s: &str) -> std::result::Result<Self, String> {
        if let Some(dev) = s.strip_prefix("dev=") {
            match dev.rsplit_once(':') {
                Some((device, baud_str)) if !device.is_empty() => {
                    let baud = baud_str
                        .parse()
                        .map_err(|_| format!("Invalid baud rate: {}", baud_str))?;
                    Ok(SerialConnection::Serial {
                        device: device.to_string(),
                        baud: Some(baud),
                    })
                }
                _ => Ok(SerialConnection::Serial {
                    device: dev.to_string(),
                    baud: None,
                }),
            }
        } else if let Some(ip) = s.strip_prefix("ip=") {
            let (host, port_str) = ip
                .rsplit_once(':')
                .ok_or_else(|| "Missing port in ip= parameter".to_string())?;
            let port = port_str
                .parse()
                .map_err(|_| format!("Invalid port: {}", port_str))?;
            Ok(SerialConnection::Tcp {
                host: host.to_string(),
                port,
            })
        } else {
            Err(format!(
                "Invalid serial connection string: {}. Use dev=... or ip=...",
                s
            ))
        }
    }
}

/// Open a serial or TCP link and return it as a boxed transport
pub fn open_serial(
    options: &str,
) -> std::result::Result<Box<dyn cartflash_core::Transport + Send>, Box<dyn std::error::Error>> {
    match SerialConnection::parse(options)? {
        SerialConnection::Serial { device, baud } => {
            Ok(Box::new(SerialTransport::open(&device, baud)?))
        }
        SerialConnection::Tcp { host, port } => Ok(Box::new(TcpTransport::connect(&host, port)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_serial() {
        assert_eq!(
            SerialConnection::parse("dev=/dev/ttyACM0").unwrap(),
            SerialConnection::Serial {
                device: "/dev/ttyACM0".into(),
                baud: None
            }
        );
        assert_eq!(
            SerialConnection::parse("dev=COM3:1000000").unwrap(),
            SerialConnection::Serial {
                device: "COM3".into(),
                baud: Some(1_000_000)
            }
        );
        assert!(SerialConnection::parse("dev=/dev/ttyACM0:fast").is_err());
    }

    #[test]
    fn test_parse_tcp() {
        assert_eq!(
            SerialConnection::parse("ip=localhost:7800").unwrap(),
            SerialConnection::Tcp {
                host: "localhost".into(),
                port: 7800
            }
        );
        assert!(SerialConnection::parse("ip=localhost").is_err());
        assert!(SerialConnection::parse("usb=1").is_err());
    }
}
