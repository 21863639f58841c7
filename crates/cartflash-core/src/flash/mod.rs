//! Flash cartridge programming
//!
//! Profiles describe each flash chip family's command sequences; the
//! state machine in [`program`] replays them over the cartridge bus.

mod database;
mod method;
mod profile;
mod program;

pub use database::{ProfileDatabase, ProfileFormat};
pub use method::{BufferedMethod, ProgramMethod};
pub use profile::{EraseOp, FlashCartProfile, Operand, Resolve, SectorRegion, Step, WaitFor, WriteOp};
pub use program::{flash_program, EraseMode, FlashOptions, FlashOutcome, FlashReport, FlashState};
