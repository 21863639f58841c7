//! CH347 packet layout
//!
//! Every USB packet starts with a command byte and a little-endian payload
//! length. The flasher's command stream is clocked through `SPI_OUT_IN`
//! packets while chip select stays asserted, so a batch longer than one
//! packet still reaches the microcontroller as a single frame.

// USB device identifiers
/// WCH vendor ID
pub const CH347_USB_VENDOR: u16 = 0x1A86;
/// CH347T product ID
pub const CH347T_USB_PRODUCT: u16 = 0x55DB;
/// CH347F product ID
pub const CH347F_USB_PRODUCT: u16 = 0x55DE;

/// Bulk OUT endpoint
pub const WRITE_EP: u8 = 0x06;
/// Bulk IN endpoint
pub const READ_EP: u8 = 0x86;

/// USB transfer timeout in milliseconds
pub const USB_TIMEOUT_MS: u64 = 5000;

/// Largest packet the vendor driver sends
pub const CH347_PACKET_SIZE: usize = 510;
/// Payload bytes per packet after the 3-byte header
pub const CH347_MAX_DATA_LEN: usize = CH347_PACKET_SIZE - 3;

/// Set SPI configuration
pub const CMD_SPI_SET_CFG: u8 = 0xC0;
/// Chip select control
pub const CMD_SPI_CS_CTRL: u8 = 0xC1;
/// Full-duplex transfer
pub const CMD_SPI_OUT_IN: u8 = 0xC2;
/// Write-only transfer
pub const CMD_SPI_OUT: u8 = 0xC4;

const CS_ASSERT: u8 = 0x00;
const CS_DEASSERT: u8 = 0x40;
const CS_CHANGE: u8 = 0x80;

/// Bridge clock before the divider
const BASE_KHZ: u32 = 120_000;

/// Bridge variant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ch347Variant {
    /// USB to UART+SPI+I2C
    Ch347T,
    /// USB to UART+SPI+I2C+JTAG
    Ch347F,
}

impl Ch347Variant {
    /// Detect the variant from a USB product ID
    pub fn from_product_id(pid: u16) -> Option<Self> {
        match pid {
            CH347T_USB_PRODUCT => Some(Ch347Variant::Ch347T),
            CH347F_USB_PRODUCT => Some(Ch347Variant::Ch347F),
            _ => None,
        }
    }

    /// Marketing name
    pub fn name(self) -> &'static str {
        match self {
            Ch347Variant::Ch347T => "CH347T",
            Ch347Variant::Ch347F => "CH347F",
        }
    }
}

/// Chip select line wired to the flasher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChipSelect {
    /// CS0
    #[default]
    CS0,
    /// CS1
    CS1,
}

/// SPI settings applied when the bridge is opened
///
/// The flasher samples in SPI mode 0, MSB first. Only the clock and the
/// chip select line are configurable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Clock divider exponent: the SPI clock is 120 MHz / 2^(divider + 1)
    pub divider: u8,
    /// Chip select line
    pub cs: ChipSelect,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        // 7.5 MHz
        Self {
            divider: 3,
            cs: ChipSelect::CS0,
        }
    }
}

impl BridgeConfig {
    /// Fastest clock not above `khz`, clamped to 468.75 kHz
    pub fn with_speed_khz(mut self, khz: u32) -> Self {
        self.divider = (0u8..=7)
            .find(|&div| Self::khz_for(div) <= khz)
            .unwrap_or(7);
        self
    }

    /// Use chip select `cs`
    pub fn with_cs(mut self, cs: ChipSelect) -> Self {
        self.cs = cs;
        self
    }

    /// SPI clock in kHz
    pub fn speed_khz(&self) -> u32 {
        Self::khz_for(self.divider)
    }

    fn khz_for(divider: u8) -> u32 {
        BASE_KHZ >> (divider as u32 + 1)
    }

    /// Configuration packet for `CMD_SPI_SET_CFG`
    pub fn config_packet(&self) -> [u8; 29] {
        let mut buf = [0u8; 29];
        buf[0] = CMD_SPI_SET_CFG;
        buf[1] = 26;
        // fixed values the vendor driver always sends
        buf[5] = 4;
        buf[6] = 1;
        buf[14] = 2;
        buf[19] = 7;
        // mode 0: CPOL (offset 9) and CPHA (offset 11) stay clear
        buf[15] = (self.divider & 0x7) << 3;
        // offset 17 bit 7 clear: MSB first; offset 24 clear: CS active low
        buf
    }
}

/// Chip select packet asserting or releasing the configured line
pub fn cs_packet(cs: ChipSelect, assert: bool) -> [u8; 13] {
    let ctrl = CS_CHANGE | if assert { CS_ASSERT } else { CS_DEASSERT };
    let mut cmd = [0u8; 13];
    cmd[0] = CMD_SPI_CS_CTRL;
    cmd[1] = 10;
    match cs {
        ChipSelect::CS0 => cmd[3] = ctrl,
        ChipSelect::CS1 => cmd[8] = ctrl,
    }
    cmd
}

/// Packet carrying `chunk` with command `cmd`
///
/// `chunk` must not exceed [`CH347_MAX_DATA_LEN`].
pub fn data_packet(cmd: u8, chunk: &[u8]) -> Vec<u8> {
    let len = (chunk.len() as u16).to_le_bytes();
    let mut packet = Vec::with_capacity(chunk.len() + 3);
    packet.extend_from_slice(&[cmd, len[0], len[1]]);
    packet.extend_from_slice(chunk);
    packet
}

/// Payload of a packet returned by the bridge, checked against `cmd`
pub fn packet_payload(cmd: u8, packet: &[u8]) -> Option<&[u8]> {
    let (header, rest) = packet.split_first_chunk::<3>()?;
    if header[0] != cmd {
        return None;
    }
    let len = u16::from_le_bytes([header[1], header[2]]) as usize;
    rest.get(..len)
}
