//! cartflash-ch347 - CH347 USB-SPI bridge transport
//!
//! Flashers whose microcontroller listens on SPI are driven through a WCH
//! CH347 bridge. Each pipeline batch becomes one chip-select frame made of
//! full-duplex `SPI_OUT_IN` packets of up to 507 payload bytes.
//!
//! # Device Variants
//!
//! - **CH347T** (PID: 0x55DB): USB to UART+SPI+I2C
//! - **CH347F** (PID: 0x55DE): USB to UART+SPI+I2C+JTAG
//!
//! # Example
//!
//! ```no_run
//! use cartflash_ch347::{BridgeConfig, Ch347};
//! use cartflash_core::DeviceHandle;
//!
//! let bridge = Ch347::open_nth_with_config(0, BridgeConfig::default().with_speed_khz(15_000))?;
//! let dev = DeviceHandle::connect(bridge)?;
//! println!("firmware 0x{:04X}", dev.firmware_version());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod device;
mod error;
mod protocol;

pub use device::{parse_options, Ch347, Ch347DeviceInfo};
pub use error::{Ch347Error, Result};
pub use protocol::{BridgeConfig, Ch347Variant, ChipSelect};
