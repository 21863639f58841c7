//! Programmer registry and initialization

use cartflash_core::{DeviceHandle, Transport};
use std::collections::HashMap;

/// Transport chosen at connect time
pub type BoxedTransport = Box<dyn Transport + Send>;

/// Parsed programmer parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgrammerParams {
    /// Programmer name
    pub name: String,
    /// Key-value parameters
    pub params: HashMap<String, String>,
}

impl ProgrammerParams {
    /// Parameters as borrowed pairs, sorted by key
    pub fn options(&self) -> Vec<(&str, &str)> {
        let mut options: Vec<_> = self
            .params
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        options.sort_unstable();
        options
    }
}

/// Parse a programmer string into name and parameters
///
/// Format: "name" or "name:key1=value1,key2=value2". Values may contain
/// colons, so `serial:dev=/dev/ttyACM0:115200` keeps the baud rate in `dev`.
pub fn parse_programmer_params(s: &str) -> Result<ProgrammerParams, Box<dyn std::error::Error>> {
    let (name, opts_str) = s.split_once(':').unwrap_or((s, ""));
    if name.is_empty() {
        return Err("Empty programmer name".into());
    }

    let mut params = HashMap::new();
    if !opts_str.is_empty() {
        for opt in opts_str.split(',') {
            if let Some((key, value)) = opt.split_once('=') {
                params.insert(key.to_string(), value.to_string());
            } else {
                return Err(
                    format!("Invalid parameter format: '{}' (expected key=value)", opt).into(),
                );
            }
        }
    }

    Ok(ProgrammerParams {
        name: name.to_string(),
        params,
    })
}

/// Open the transport named by `programmer` without talking to the flasher
pub fn open_transport(programmer: &str) -> Result<BoxedTransport, Box<dyn std::error::Error>> {
    let params = parse_programmer_params(programmer)?;

    match params.name.as_str() {
        #[cfg(feature = "emu")]
        "emu" | "dummy" => open_emu(&params),

        #[cfg(feature = "ch347")]
        "ch347" | "ch347_spi" => open_ch347(&params),

        #[cfg(feature = "serial")]
        "serial" | "uart" => open_serial(&params),

        _ => Err(format!(
            "Unknown programmer: {} (available: {})",
            params.name,
            programmer_names_short()
        )
        .into()),
    }
}

/// Open `programmer` and connect to the flasher behind it
pub fn open_device(
    programmer: &str,
) -> Result<DeviceHandle<BoxedTransport>, Box<dyn std::error::Error>> {
    let transport = open_transport(programmer)?;
    let dev = DeviceHandle::connect(transport)?;
    log::info!(
        "Connected: firmware 0x{:04X}, device kind 0x{:02X}",
        dev.firmware_version(),
        dev.device_kind()
    );
    Ok(dev)
}

#[cfg(feature = "emu")]
fn open_emu(params: &ProgrammerParams) -> Result<BoxedTransport, Box<dyn std::error::Error>> {
    use cartflash_core::engine::WritePin;
    use cartflash_emu::{EmuCart, EmuConfig};

    log::info!("Opening emulated flasher...");
    let mut config = EmuConfig::default();
    for (key, value) in params.options() {
        match key {
            "rom" => {
                let image = std::fs::read(value)
                    .map_err(|e| format!("Failed to read ROM image {}: {}", value, e))?;
                log::debug!("emu: GBA ROM image {} ({} bytes)", value, image.len());
                config = config.with_agb_rom_image(&image);
            }
            "gbrom" => {
                let image = std::fs::read(value)
                    .map_err(|e| format!("Failed to read ROM image {}: {}", value, e))?;
                log::debug!("emu: GB ROM image {} ({} bytes)", value, image.len());
                config = config.with_dmg_rom_image(&image);
            }
            "pin" => config.dmg_write_pin = value.parse::<WritePin>()?,
            "maxlen" => {
                config.max_transfer = value
                    .parse()
                    .map_err(|_| format!("Invalid maxlen value: {}", value))?;
            }
            _ => log::warn!("Unknown emu option: {}={}", key, value),
        }
    }
    Ok(Box::new(EmuCart::new(config)))
}

#[cfg(feature = "ch347")]
fn open_ch347(params: &ProgrammerParams) -> Result<BoxedTransport, Box<dyn std::error::Error>> {
    use cartflash_ch347::{parse_options, Ch347};

    log::info!("Opening CH347 programmer...");
    let (config, index) =
        parse_options(&params.options()).map_err(|e| format!("Invalid CH347 parameters: {}", e))?;
    let bridge = Ch347::open_nth_with_config(index, config).map_err(|e| {
        format!(
            "Failed to open CH347: {}\nMake sure the device is connected and you have permissions.",
            e
        )
    })?;
    Ok(Box::new(bridge))
}

#[cfg(feature = "serial")]
fn open_serial(params: &ProgrammerParams) -> Result<BoxedTransport, Box<dyn std::error::Error>> {
    log::info!("Opening serial programmer...");
    let conn_str = params
        .options()
        .into_iter()
        .filter(|(k, _)| *k == "dev" || *k == "ip")
        .map(|(k, v)| format!("{}={}", k, v))
        .next()
        .ok_or(
            "serial requires connection parameters.\n\
             Usage: serial:dev=/dev/ttyACM0[:baud] or serial:ip=host:port",
        )?;

    cartflash_serial::open_serial(&conn_str)
        .map_err(|e| format!("Failed to open {}: {}", conn_str, e).into())
}

/// Information about a programmer
#[derive(Debug, Clone, Copy)]
pub struct ProgrammerInfo {
    /// Primary name (used for matching)
    pub name: &'static str,
    /// Alternative names
    pub aliases: &'static [&'static str],
    /// Short description
    pub description: &'static str,
}

/// Programmers compiled into this build
#[allow(unused_mut, clippy::vec_init_then_push)]
pub fn available_programmers() -> Vec<ProgrammerInfo> {
    let mut programmers = Vec::new();

    #[cfg(feature = "emu")]
    programmers.push(ProgrammerInfo {
        name: "emu",
        aliases: &["dummy"],
        description: "In-memory flasher with emulated cartridges (rom=<file>,gbrom=<file>,pin=<WR|AUDIO>)",
    });

    #[cfg(feature = "ch347")]
    programmers.push(ProgrammerInfo {
        name: "ch347",
        aliases: &["ch347_spi"],
        description: "CH347 USB-SPI bridge (VID:1a86 PID:55db/55de) (spispeed=<kHz>,cs=<0|1>)",
    });

    #[cfg(feature = "serial")]
    programmers.push(ProgrammerInfo {
        name: "serial",
        aliases: &["uart"],
        description: "Framed serial/network link (dev=<port>[:baud] or ip=<host:port>)",
    });

    programmers
}

/// Short list of programmer names for CLI help
pub fn programmer_names_short() -> String {
    let programmers = available_programmers();
    if programmers.is_empty() {
        return "none (recompile with features)".to_string();
    }
    let names: Vec<&str> = programmers.iter().map(|p| p.name).collect();
    names.join(", ")
}
