//! CH347 device implementation

use std::time::Duration;

use cartflash_core::transport::{check_reply_len, check_transfer_len, DEFAULT_MAX_TRANSFER};
use cartflash_core::Transport;
use nusb::transfer::{Buffer, Bulk, In, Out};
use nusb::{Endpoint, MaybeFuture};

use crate::error::{Ch347Error, Result};
use crate::protocol::*;

/// CH347 USB-SPI bridge driving the flasher's command port
pub struct Ch347 {
    out_ep: Endpoint<Bulk, Out>,
    in_ep: Endpoint<Bulk, In>,
    config: BridgeConfig,
    variant: Ch347Variant,
}

fn is_ch347(d: &nusb::DeviceInfo) -> bool {
    d.vendor_id() == CH347_USB_VENDOR && Ch347Variant::from_product_id(d.product_id()).is_some()
}

impl Ch347 {
    /// Open the first CH347 with the default configuration
    pub fn open() -> Result<Self> {
        Self::open_nth_with_config(0, BridgeConfig::default())
    }

    /// Open the nth CH347 (0-indexed) with `config`
    pub fn open_nth_with_config(index: usize, config: BridgeConfig) -> Result<Self> {
        let devices: Vec<_> = nusb::list_devices()
            .wait()
            .map_err(|e| Ch347Error::OpenFailed(e.to_string()))?
            .filter(is_ch347)
            .collect();

        let device_info = devices.get(index).ok_or(Ch347Error::DeviceNotFound)?;
        let variant = Ch347Variant::from_product_id(device_info.product_id())
            .ok_or(Ch347Error::DeviceNotFound)?;

        log::info!(
            "Opening {} device at bus {} address {}",
            variant.name(),
            device_info.busnum(),
            device_info.device_address()
        );

        let device = device_info
            .open()
            .wait()
            .map_err(|e| Ch347Error::OpenFailed(e.to_string()))?;

        // CH347T exposes SPI on interface 2, CH347F on 4: take the vendor class one
        let config_desc = device
            .active_configuration()
            .map_err(|e| Ch347Error::OpenFailed(format!("Failed to get config: {}", e)))?;
        let iface_num = config_desc
            .interface_alt_settings()
            .find(|iface| iface.class() == 0xFF)
            .map(|iface| iface.interface_number())
            .ok_or_else(|| {
                Ch347Error::OpenFailed("Could not find vendor-specific interface".to_string())
            })?;
        log::debug!("Using interface {}", iface_num);

        let interface = device
            .claim_interface(iface_num)
            .wait()
            .map_err(|e| Ch347Error::ClaimFailed(e.to_string()))?;
        let out_ep = interface
            .endpoint::<Bulk, Out>(WRITE_EP)
            .map_err(|e| Ch347Error::ClaimFailed(e.to_string()))?;
        let in_ep = interface
            .endpoint::<Bulk, In>(READ_EP)
            .map_err(|e| Ch347Error::ClaimFailed(e.to_string()))?;

        let mut ch347 = Self {
            out_ep,
            in_ep,
            config,
            variant,
        };
        ch347.configure()?;
        Ok(ch347)
    }

    /// List connected CH347 bridges
    pub fn list_devices() -> Result<Vec<Ch347DeviceInfo>> {
        let devices = nusb::list_devices()
            .wait()
            .map_err(|e| Ch347Error::OpenFailed(e.to_string()))?
            .filter(is_ch347)
            .filter_map(|d| {
                Some(Ch347DeviceInfo {
                    bus: d.busnum(),
                    address: d.device_address(),
                    variant: Ch347Variant::from_product_id(d.product_id())?,
                })
            })
            .collect();
        Ok(devices)
    }

    /// Active SPI configuration
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Detected variant
    pub fn variant(&self) -> Ch347Variant {
        self.variant
    }

    fn configure(&mut self) -> Result<()> {
        self.usb_write(&self.config.config_packet())?;
        // the bridge echoes the configuration back
        let mut response = [0u8; 29];
        self.usb_read(&mut response)?;

        log::info!(
            "CH347 configured: speed={}kHz, cs={:?}",
            self.config.speed_khz(),
            self.config.cs
        );
        Ok(())
    }

    fn cs_control(&mut self, assert: bool) -> Result<()> {
        self.usb_write(&cs_packet(self.config.cs, assert))
    }

    /// Shift `data` out and collect the bytes shifted in, chip select held
    fn duplex(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let mut reply = Vec::with_capacity(data.len());
        let mut packet = vec![0u8; CH347_PACKET_SIZE];
        for chunk in data.chunks(CH347_MAX_DATA_LEN) {
            self.usb_write(&data_packet(CMD_SPI_OUT_IN, chunk))?;
            let want = reply.len() + chunk.len();
            while reply.len() < want {
                let received = self.usb_read(&mut packet)?;
                let payload = packet_payload(CMD_SPI_OUT_IN, &packet[..received]).ok_or_else(|| {
                    Ch347Error::InvalidResponse(format!("malformed {} byte reply", received))
                })?;
                if payload.is_empty() {
                    return Err(Ch347Error::InvalidResponse("empty reply".to_string()));
                }
                let take = payload.len().min(want - reply.len());
                reply.extend_from_slice(&payload[..take]);
            }
        }
        Ok(reply)
    }

    /// Shift `data` out, discarding the reply, chip select held
    fn write_out(&mut self, data: &[u8]) -> Result<()> {
        let mut ack = [0u8; 4];
        for chunk in data.chunks(CH347_MAX_DATA_LEN) {
            self.usb_write(&data_packet(CMD_SPI_OUT, chunk))?;
            self.usb_read(&mut ack)?;
        }
        Ok(())
    }

    /// Run `f` inside one chip select frame, releasing CS even on failure
    fn framed<R>(&mut self, f: impl FnOnce(&mut Self) -> Result<R>) -> Result<R> {
        self.cs_control(true)?;
        let result = f(self);
        let released = self.cs_control(false);
        let value = result?;
        released?;
        Ok(value)
    }

    fn usb_write(&mut self, data: &[u8]) -> Result<()> {
        let mut buf = Buffer::new(data.len());
        buf.extend_from_slice(data);

        self.out_ep
            .transfer_blocking(buf, Duration::from_millis(USB_TIMEOUT_MS))
            .into_result()
            .map_err(|e| Ch347Error::TransferFailed(e.to_string()))?;

        log::trace!("USB write {} bytes", data.len());
        Ok(())
    }

    fn usb_read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        let max_packet_size = self.in_ep.max_packet_size();
        // request length must be a multiple of the max packet size
        let request_len = buffer.len().div_ceil(max_packet_size) * max_packet_size;
        let mut in_buf = Buffer::new(request_len);
        in_buf.set_requested_len(request_len);

        let data = self
            .in_ep
            .transfer_blocking(in_buf, Duration::from_millis(USB_TIMEOUT_MS))
            .into_result()
            .map_err(|e| Ch347Error::TransferFailed(e.to_string()))?;

        let received = data.len().min(buffer.len());
        buffer[..received].copy_from_slice(&data[..received]);

        log::trace!("USB read {} bytes", received);
        Ok(received)
    }
}

impl Transport for Ch347 {
    fn max_transfer_len(&self) -> usize {
        DEFAULT_MAX_TRANSFER
    }

    fn write_only(&mut self, data: &[u8]) -> cartflash_core::Result<()> {
        check_transfer_len(data.len(), DEFAULT_MAX_TRANSFER)?;
        self.framed(|dev| dev.write_out(data))?;
        Ok(())
    }

    fn write_then_read(&mut self, data: &[u8]) -> cartflash_core::Result<Vec<u8>> {
        check_transfer_len(data.len(), DEFAULT_MAX_TRANSFER)?;
        let reply = self.framed(|dev| dev.duplex(data))?;
        check_reply_len(data.len(), reply.len())?;
        Ok(reply)
    }

    fn delay_us(&mut self, us: u32) {
        // no delay command on the CH347
        if us > 0 {
            std::thread::sleep(Duration::from_micros(us as u64));
        }
    }
}

/// Information about a connected CH347 device
#[derive(Debug, Clone)]
pub struct Ch347DeviceInfo {
    /// USB bus number
    pub bus: u8,
    /// USB device address
    pub address: u8,
    /// Device variant
    pub variant: Ch347Variant,
}

impl std::fmt::Display for Ch347DeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} at bus {} address {}",
            self.variant.name(),
            self.bus,
            self.address
        )
    }
}

/// Parse programmer options for the CH347
///
/// Supported options:
/// - `spispeed=<khz>`: SPI clock in kHz (default: 7500)
/// - `cs=<0|1>`: chip select line (default: 0)
///
/// Returns the configuration and the device index (`index=<n>`).
pub fn parse_options(options: &[(&str, &str)]) -> Result<(BridgeConfig, usize)> {
    let mut config = BridgeConfig::default();
    let mut index = 0;

    for (key, value) in options {
        match *key {
            "spispeed" => {
                let khz: u32 = value.parse().map_err(|_| {
                    Ch347Error::ConfigError(format!("Invalid spispeed value: {}", value))
                })?;
                config = config.with_speed_khz(khz);
                log::debug!(
                    "Setting SPI speed to {}kHz (actual: {}kHz)",
                    khz,
                    config.speed_khz()
                );
            }
            "cs" => {
                config.cs = match *value {
                    "0" => ChipSelect::CS0,
                    "1" => ChipSelect::CS1,
                    _ => {
                        return Err(Ch347Error::ConfigError(format!(
                            "Invalid cs: {} (must be 0 or 1)",
                            value
                        )))
                    }
                };
            }
            "index" => {
                index = value.parse().map_err(|_| {
                    Ch347Error::ConfigError(format!("Invalid index value: {}", value))
                })?;
            }
            _ => {
                log::warn!("Unknown CH347 option: {}={}", key, value);
            }
        }
    }

    Ok((config, index))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_options() {
        let (config, index) = parse_options(&[("spispeed", "30000"), ("cs", "1")]).unwrap();
        assert_eq!(config.speed_khz(), 30_000);
        assert_eq!(config.cs, ChipSelect::CS1);
        assert_eq!(index, 0);

        let (_, index) = parse_options(&[("index", "2"), ("bogus", "x")]).unwrap();
        assert_eq!(index, 2);

        assert!(parse_options(&[("cs", "2")]).is_err());
        assert!(parse_options(&[("spispeed", "fast")]).is_err());
    }
}
