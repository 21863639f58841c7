//! Programmer registry
//!
//! The CLI never names a backend type. It hands a programmer string such as
//! `ch347:spispeed=15000` or `serial:dev=/dev/ttyACM0` to [`open_device`]
//! and gets back a connected [`DeviceHandle`] over a boxed transport.
//!
//! ```text
//! CLI ──► cartflash-device ──► cartflash-core
//!               │
//!    ┌──────────┼───────────┐
//!    ▼          ▼           ▼
//!  ch347     serial        emu
//! ```

mod registry;

pub use registry::{
    available_programmers, open_device, open_transport, parse_programmer_params,
    programmer_names_short, BoxedTransport, ProgrammerInfo, ProgrammerParams,
};
