//! cartflash-core - Protocol core for game cartridge flashers
//!
//! This crate turns high-level cartridge operations (read ROM, write save
//! RAM, program a flash cartridge, switch the power rail) into the packed
//! bit-streams understood by the flasher's microcontroller, and decodes the
//! bit-streams it shifts back.
//!
//! The layers, leaf first:
//!
//! - [`codec`] - command registry, bit packing and reply decoding
//! - [`transport`] - duplex byte channel to the device
//! - [`pipeline`] - write-combining batches bounded by the transport
//! - [`address`] - latched GBA address window and bank advances
//! - [`device`] - the owning [`DeviceHandle`]
//! - [`engine`] - ROM/RAM block transfers with progress and cancellation
//! - [`flash`] - flash cartridge profiles and the programming state machine
//!
//! # Example
//!
//! ```ignore
//! use cartflash_core::{engine, CancelToken, DeviceHandle, NoProgress, WordEncoding};
//!
//! fn dump<T: cartflash_core::Transport>(transport: T) -> cartflash_core::Result<Vec<u8>> {
//!     let mut dev = DeviceHandle::connect(transport)?;
//!     dev.set_power(cartflash_core::PowerState::V3_3)?;
//!     engine::read_block(&mut dev, 0, 0x8000, WordEncoding::Base, &mut NoProgress, &CancelToken::new())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod address;
pub mod codec;
pub mod device;
pub mod engine;
pub mod error;
pub mod flash;
pub mod pipeline;
pub mod power;
pub mod transport;

pub use codec::{BusLines, BusState, Command, Opcode, Reply, Variable, WordEncoding};
pub use device::DeviceHandle;
pub use engine::{BankingParams, CancelToken, Mapper, NoProgress, Progress};
pub use error::{Error, Result};
pub use flash::{flash_program, FlashCartProfile, FlashOptions, FlashOutcome, ProfileDatabase};
pub use power::{CartMode, PowerState};
pub use transport::Transport;
