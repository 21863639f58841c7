//! BitCommand codec
//!
//! Every device command is a 5-bit opcode followed by its input fields,
//! placeholder slots for the bits the device shifts back, and zero padding.
//! A single `0` separator bit closes each command so that every encoded
//! command, and every batch of them, is byte-aligned:
//!
//! ```text
//! | opcode (5) | in fields | out slots | pad | 0 |
//! ```
//!
//! Fields are written MSB first. Data words travel bit-reversed on the
//! return path, which [`reply`] undoes with lookup tables from [`reverse`].

pub mod bits;
pub mod command;
pub mod registry;
pub mod reply;
pub mod reverse;

pub use bits::{BitReader, BitWriter};
pub use command::{BusLines, BusState, Command};
pub use registry::{CommandSpec, Opcode, VarSpec, Variable};
pub use reply::{decode_cycles, decode_reply, encode_reply, put_reply, Reply, WordEncoding};
pub use reverse::{reverse16, reverse8};
