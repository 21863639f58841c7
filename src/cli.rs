//! CLI argument parsing

use cartflash_core::flash::EraseMode;
use cartflash_core::{CartMode, Mapper, PowerState};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Parse a string as a hex or decimal u32
fn parse_hex_u32(s: &str) -> Result<u32, String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex value: {}", e))
    } else {
        s.parse::<u32>().map_err(|e| format!("Invalid number: {}", e))
    }
}

/// Parse a size with an optional K/M suffix (binary units)
fn parse_size(s: &str) -> Result<usize, String> {
    let (digits, scale) = match s.chars().last().map(|c| c.to_ascii_uppercase()) {
        Some('K') => (&s[..s.len() - 1], 1024),
        Some('M') => (&s[..s.len() - 1], 1024 * 1024),
        _ => (s, 1),
    };
    let value = parse_hex_u32(digits)? as usize;
    value
        .checked_mul(scale)
        .ok_or_else(|| format!("Size too large: {}", s))
}

/// Generate dynamic help text for the programmer argument
fn programmer_help() -> String {
    format!(
        "Programmer to use [available: {}]",
        cartflash_device::programmer_names_short()
    )
}

#[derive(Parser)]
#[command(name = "cartflash")]
#[command(author, version, about = "Game cartridge flasher", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to the flash profile directory (contains .json/.ron files)
    /// Defaults to looking in ./profiles/ and /usr/share/cartflash/profiles/
    #[arg(long, global = true)]
    pub profile_db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Cartridge selection shared across commands
#[derive(Args, Debug, Clone)]
pub struct CartArgs {
    /// Programmer to use
    #[arg(short, long, help = programmer_help())]
    pub programmer: String,

    /// Cartridge type (agb or dmg)
    #[arg(short, long, default_value = "agb")]
    pub mode: CartMode,

    /// GB mapper (none, mbc1, mbc3, mbc5)
    #[arg(long, default_value = "mbc5")]
    pub mapper: Mapper,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Dump cartridge ROM to a file
    ReadRom {
        #[command(flatten)]
        cart: CartArgs,

        /// Number of bytes to read (e.g. 0x800000, 8M)
        #[arg(short, long, value_parser = parse_size)]
        size: usize,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Dump save RAM to a file
    ReadRam {
        #[command(flatten)]
        cart: CartArgs,

        /// Number of bytes to read (e.g. 0x8000, 32K)
        #[arg(short, long, value_parser = parse_size)]
        size: usize,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Restore save RAM from a file
    WriteRam {
        #[command(flatten)]
        cart: CartArgs,

        /// Input file path
        #[arg(short, long)]
        input: PathBuf,

        /// Start address within save RAM
        #[arg(long, value_parser = parse_hex_u32, default_value = "0")]
        addr: u32,
    },

    /// Program a flash cartridge
    Flash {
        /// Programmer to use
        #[arg(short, long, help = programmer_help())]
        programmer: String,

        /// Flash profile name (see list-profiles)
        #[arg(long)]
        profile: String,

        /// Image to program
        #[arg(short, long)]
        input: PathBuf,

        /// Erase strategy (auto, chip, sector, skip)
        #[arg(long, default_value = "auto")]
        erase: EraseMode,

        /// Program word by word even if the profile allows buffered writes
        #[arg(long)]
        single: bool,

        /// Skip the readback after programming
        #[arg(long)]
        no_verify: bool,
    },

    /// Show or switch the cartridge power rail
    Power {
        /// Programmer to use
        #[arg(short, long, help = programmer_help())]
        programmer: String,

        /// New rail (off, 3.3, 5); omit to show the current one
        state: Option<PowerState>,
    },

    /// List loaded flash profiles
    ListProfiles {
        /// Only show profiles for this cartridge type
        #[arg(short, long)]
        mode: Option<CartMode>,
    },

    /// List supported programmers
    ListProgrammers,

    /// Expose a programmer over TCP using the serial frame protocol
    Serve {
        /// Programmer to serve
        #[arg(short, long, help = programmer_help())]
        programmer: String,

        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:7800")]
        listen: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("0x8000"), Ok(0x8000));
        assert_eq!(parse_size("32K"), Ok(0x8000));
        assert_eq!(parse_size("8m"), Ok(8 * 1024 * 1024));
        assert!(parse_size("lots").is_err());
    }

    #[test]
    fn test_parse_flash_args() {
        let cli = Cli::try_parse_from([
            "cartflash", "flash", "-p", "emu", "--profile", "AMD", "-i", "game.gba", "--erase",
            "sector",
        ])
        .unwrap();
        match cli.command {
            Commands::Flash { erase, single, no_verify, .. } => {
                assert_eq!(erase, EraseMode::Sector);
                assert!(!single && !no_verify);
            }
            _ => panic!("expected flash"),
        }
    }
}
