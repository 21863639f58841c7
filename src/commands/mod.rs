//! CLI command implementations

pub mod cart;
pub mod flash;
mod list;
mod progress;
pub mod serve;

pub use list::list_programmers;
