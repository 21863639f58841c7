//! cartflash - Game cartridge flasher
//!
//! Reads and writes Game Boy and Game Boy Advance cartridge ROM and save
//! RAM, and programs flash cartridges from JSON/RON command profiles.
//!
//! All protocol work happens in `cartflash-core`; programmers are opened by
//! name through `cartflash-device`, so every command works the same over
//! the CH347 bridge, a serial link or the built-in emulator.

mod cli;
mod commands;

use cartflash_core::engine::CancelToken;
use cartflash_core::flash::{FlashOptions, ProfileDatabase};
use clap::Parser;
use cli::{Cli, Commands};
use std::path::{Path, PathBuf};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    let cancel = install_cancel_handler();

    match cli.command {
        Commands::ReadRom { cart, size, output } => {
            commands::cart::run_read_rom(&cart, size, &output, &cancel)
        }
        Commands::ReadRam { cart, size, output } => {
            commands::cart::run_read_ram(&cart, size, &output, &cancel)
        }
        Commands::WriteRam { cart, input, addr } => {
            commands::cart::run_write_ram(&cart, &input, addr, &cancel)
        }
        Commands::Flash {
            programmer,
            profile,
            input,
            erase,
            single,
            no_verify,
        } => {
            let db = load_profile_database(cli.profile_db.as_deref())?;
            let options = FlashOptions {
                erase,
                verify: !no_verify,
                prefer_buffered: !single,
            };
            commands::flash::run_flash(&db, &programmer, &profile, &input, options, &cancel)
        }
        Commands::Power { programmer, state } => commands::cart::run_power(&programmer, state),
        Commands::ListProfiles { mode } => {
            let db = load_profile_database(cli.profile_db.as_deref())?;
            commands::flash::list_profiles(&db, mode);
            Ok(())
        }
        Commands::ListProgrammers => {
            commands::list_programmers();
            Ok(())
        }
        Commands::Serve { programmer, listen } => {
            commands::serve::run_serve(&programmer, &listen)
        }
    }
}

/// Cancel running transfers on the first Ctrl-C, exit on the second
///
/// Cancellation takes effect at the next chunk or sector boundary, after
/// which the cartridge is reset and powered down.
fn install_cancel_handler() -> CancelToken {
    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    let installed = ctrlc::set_handler(move || {
        if handler_token.is_cancelled() {
            std::process::exit(130);
        }
        log::warn!("Interrupted, stopping at the next chunk (Ctrl-C again to force exit)");
        handler_token.cancel();
    });
    if let Err(e) = installed {
        log::warn!("Could not install Ctrl-C handler: {}", e);
    }
    cancel
}

/// Load flash profiles from the specified path or default locations
fn load_profile_database(
    path: Option<&Path>,
) -> Result<ProfileDatabase, Box<dyn std::error::Error>> {
    let mut db = ProfileDatabase::new();

    if let Some(path) = path {
        if path.is_dir() {
            db.load_dir(path)?;
        } else if path.is_file() {
            db.load_file(path)?;
        } else {
            return Err(format!("Profile path not found: {}", path.display()).into());
        }
    } else {
        let default_paths = [
            PathBuf::from("profiles"),
            PathBuf::from("/usr/share/cartflash/profiles"),
            PathBuf::from("/usr/local/share/cartflash/profiles"),
        ];

        let mut loaded = false;
        for dir in &default_paths {
            if dir.is_dir() {
                match db.load_dir(dir) {
                    Ok(count) => {
                        log::debug!("Loaded {} profiles from {}", count, dir.display());
                        loaded = true;
                    }
                    Err(e) => {
                        log::warn!("Failed to load profiles from {}: {}", dir.display(), e);
                    }
                }
            }
        }

        if !loaded {
            log::warn!("No flash profiles found in default locations");
        }
    }

    log::info!("Loaded {} flash profiles", db.len());
    Ok(db)
}
