//! Flash programming and profile listing

use super::progress::IndicatifProgress;
use cartflash_core::engine::CancelToken;
use cartflash_core::flash::{flash_program, FlashCartProfile, FlashOptions, FlashOutcome, ProfileDatabase};
use cartflash_core::CartMode;
use cartflash_device::open_device;
use std::error::Error;
use std::path::Path;

/// Pick the profile named `name`: an exact match wins, otherwise the
/// partial match must be unique
pub fn select_profile<'a>(
    db: &'a ProfileDatabase,
    name: &str,
) -> Result<&'a FlashCartProfile, Box<dyn Error>> {
    if let Some(profile) = db.find_exact(name) {
        return Ok(profile);
    }
    match db.find_by_name(name).as_slice() {
        [] => Err(format!("No flash profile matches '{}' (see list-profiles)", name).into()),
        [profile] => Ok(*profile),
        several => {
            let names: Vec<&str> = several.iter().map(|p| p.name()).collect();
            Err(format!("'{}' is ambiguous: {}", name, names.join(", ")).into())
        }
    }
}

/// Program `input` into the cartridge described by `profile_name`
pub fn run_flash(
    db: &ProfileDatabase,
    programmer: &str,
    profile_name: &str,
    input: &Path,
    options: FlashOptions,
    cancel: &CancelToken,
) -> Result<(), Box<dyn Error>> {
    let profile = select_profile(db, profile_name)?;
    let data = std::fs::read(input)?;
    println!("Read {} bytes from {:?}", data.len(), input);
    println!(
        "Profile: {} ({}, {}, {} KiB)",
        profile.name(),
        profile.cart_type,
        profile.voltage,
        profile.flash_size / 1024
    );

    let mut dev = open_device(programmer)?;
    dev.set_mode(profile.cart_type);
    let mut progress = IndicatifProgress::new();
    let result = dev.set_power(profile.voltage).and_then(|()| {
        flash_program(&mut dev, profile, &data, &options, &mut progress, cancel)
    });
    drop(progress);
    let shutdown = dev.shutdown();
    let outcome = result?;
    shutdown?;

    let report = outcome.report();
    if let Some(id) = &report.identifier {
        let hex: Vec<String> = id.iter().map(|b| format!("{:02X}", b)).collect();
        let note = match report.identifier_matched {
            Some(false) => " (not a known ID for this profile)",
            _ => "",
        };
        println!("Flash ID:        {}{}", hex.join(" "), note);
    }
    if report.chip_erased {
        println!("Erase:           chip");
    } else if report.sectors_erased > 0 {
        println!("Erase:           {} sector(s)", report.sectors_erased);
    }
    if let Some(method) = &report.method {
        println!("Method:          {}", method);
    }
    println!("Written:         {} bytes", report.bytes_written);
    if report.verified {
        println!("Verify:          OK");
    }

    match outcome {
        FlashOutcome::Completed(_) => Ok(()),
        FlashOutcome::Aborted(_) => Err("Flash operation aborted".into()),
    }
}

/// Print the loaded profiles, optionally only those for `mode`
pub fn list_profiles(db: &ProfileDatabase, mode: Option<CartMode>) {
    println!("Flash profiles:");
    println!();
    println!("{:<4} {:<40} {:>8} {:>6}  Methods", "Type", "Name", "Size", "Volt");
    println!("{}", "-".repeat(76));

    for profile in db.iter().filter(|p| mode.map_or(true, |m| p.cart_type == m)) {
        let mut methods = Vec::new();
        if profile.chip_erase.is_some() {
            methods.push("chip-erase");
        }
        if profile.sector_erase.is_some() {
            methods.push("sector-erase");
        }
        if profile.single_write.is_some() {
            methods.push("single");
        }
        if profile.buffer_write.is_some() {
            methods.push("buffered");
        }
        println!(
            "{:<4} {:<40} {:>8} {:>6}  {}",
            profile.cart_type,
            profile.name(),
            format_size(profile.flash_size),
            profile.voltage.to_string(),
            methods.join(",")
        );
    }
}

fn format_size(bytes: u32) -> String {
    if bytes >= 1024 * 1024 {
        format!("{} MiB", bytes / (1024 * 1024))
    } else if bytes >= 1024 {
        format!("{} KiB", bytes / 1024)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cartflash_core::flash::ProfileFormat;

    fn profile(name: &str) -> String {
        format!(
            r#"{{
                "type": "AGB",
                "names": ["{}"],
                "voltage": 3.3,
                "flash_size": "0x8000",
                "commands": {{
                    "reset": [[0, "0xF0"]],
                    "single_write": {{"sequence": [["0x555", "0xA0"], ["PA", "PD"]]}}
                }}
            }}"#,
            name
        )
    }

    #[test]
    fn test_select_profile() {
        let mut db = ProfileDatabase::new();
        db.load_str(&profile("AMD 32K"), ProfileFormat::Json).unwrap();
        db.load_str(&profile("AMD 32K Buffered"), ProfileFormat::Json).unwrap();

        assert_eq!(select_profile(&db, "amd 32k").unwrap().name(), "AMD 32K");
        assert_eq!(select_profile(&db, "buff").unwrap().name(), "AMD 32K Buffered");
        assert!(select_profile(&db, "AMD").is_err());
        assert!(select_profile(&db, "Intel").is_err());
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0x400000), "4 MiB");
        assert_eq!(format_size(0x8000), "32 KiB");
        assert_eq!(format_size(512), "512 B");
    }
}
