//! ROM and flash chip models
//!
//! Both models are word arrays addressed in bus words. GBA chips use the
//! full 16-bit word; GB chips only the low byte.

/// Memory behind a cartridge ROM chip select
pub trait CartMemory: Send {
    /// Read the word at `addr`, or `None` past the end of the chip
    fn read(&mut self, addr: u32) -> Option<u16>;

    /// Bus write seen by the chip
    fn write(&mut self, addr: u32, value: u16);

    /// Chip contents
    fn words(&self) -> &[u16];

    /// Whether the chip is in the middle of an embedded operation
    fn is_busy(&self) -> bool {
        false
    }
}

/// Mask ROM: reads return contents, writes are ignored
pub struct MaskRom {
    words: Vec<u16>,
}

impl MaskRom {
    /// ROM with the given contents
    pub fn new(words: Vec<u16>) -> Self {
        Self { words }
    }
}

impl CartMemory for MaskRom {
    fn read(&mut self, addr: u32) -> Option<u16> {
        self.words.get(addr as usize).copied()
    }

    fn write(&mut self, addr: u32, value: u16) {
        log::trace!("write 0x{:04X} to mask ROM at 0x{:06X} ignored", value, addr);
    }

    fn words(&self) -> &[u16] {
        &self.words
    }
}

/// Configuration of an AMD-compatible flash chip
#[derive(Debug, Clone)]
pub struct AmdFlashConfig {
    /// Size in bus words
    pub size_words: usize,
    /// Sector size in bus words
    pub sector_words: usize,
    /// First and second unlock addresses
    pub unlock: (u32, u32),
    /// Autoselect word 0
    pub manufacturer: u16,
    /// Autoselect word 1
    pub device: u16,
    /// Mask of the data lines the chip drives
    pub data_mask: u16,
    /// Largest write-to-buffer load in words
    pub buffer_words: usize,
    /// Reads answered with busy status after each erase
    pub busy_polls: u32,
    /// Erase never completes
    pub stuck_busy: bool,
}

impl AmdFlashConfig {
    /// 16-bit GBA chip with 0x555/0x2AA unlock
    pub fn agb(size_bytes: usize) -> Self {
        Self {
            size_words: size_bytes / 2,
            sector_words: 0x8000,
            unlock: (0x555, 0x2AA),
            manufacturer: 0x0001,
            device: 0x227E,
            data_mask: 0xFFFF,
            buffer_words: 32,
            busy_polls: 3,
            stuck_busy: false,
        }
    }

    /// 8-bit GB chip with 0xAAA/0x555 unlock
    pub fn dmg(size_bytes: usize) -> Self {
        Self {
            size_words: size_bytes,
            sector_words: 0x10000,
            unlock: (0xAAA, 0x555),
            manufacturer: 0x01,
            device: 0xA4,
            data_mask: 0x00FF,
            buffer_words: 32,
            busy_polls: 3,
            stuck_busy: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum AmdState {
    Read,
    Unlock1,
    Unlock2,
    Autoselect,
    Program,
    EraseSetup,
    EraseUnlock1,
    EraseUnlock2,
    BufferCount { sector: u32 },
    BufferLoad { sector: u32, remaining: usize, words: Vec<(u32, u16)> },
    BufferConfirm { sector: u32, words: Vec<(u32, u16)> },
    Busy { remaining: u32 },
}

/// AMD command-set flash chip
pub struct AmdFlash {
    config: AmdFlashConfig,
    words: Vec<u16>,
    state: AmdState,
    toggle: bool,
    erases: u32,
}

impl AmdFlash {
    /// Erased chip
    pub fn new(config: AmdFlashConfig) -> Self {
        let words = vec![0xFFFF & config.data_mask; config.size_words];
        Self {
            config,
            words,
            state: AmdState::Read,
            toggle: false,
            erases: 0,
        }
    }

    /// Chip pre-filled with `contents`
    pub fn with_contents(config: AmdFlashConfig, contents: &[u16]) -> Self {
        let mut chip = Self::new(config);
        let len = contents.len().min(chip.words.len());
        chip.words[..len].copy_from_slice(&contents[..len]);
        chip
    }

    /// Number of erase operations started
    pub fn erase_count(&self) -> u32 {
        self.erases
    }

    fn sector_of(&self, addr: u32) -> std::ops::Range<usize> {
        let start = addr as usize / self.config.sector_words * self.config.sector_words;
        start..(start + self.config.sector_words).min(self.words.len())
    }

    fn start_erase(&mut self, range: std::ops::Range<usize>) {
        let erased = 0xFFFF & self.config.data_mask;
        log::debug!("emulated flash erasing words 0x{:X}..0x{:X}", range.start, range.end);
        if let Some(cells) = self.words.get_mut(range) {
            cells.fill(erased);
        }
        self.erases += 1;
        self.state = AmdState::Busy {
            remaining: self.config.busy_polls,
        };
    }

    fn program(&mut self, addr: u32, value: u16) {
        if let Some(cell) = self.words.get_mut(addr as usize) {
            // programming only clears bits
            *cell &= value & self.config.data_mask;
        }
    }
}

impl CartMemory for AmdFlash {
    fn read(&mut self, addr: u32) -> Option<u16> {
        match self.state {
            AmdState::Autoselect => Some(match addr & 0xFF {
                0 => self.config.manufacturer,
                1 => self.config.device,
                _ => 0,
            }),
            AmdState::Busy { remaining } => {
                // DQ7 inverted, DQ6 toggling
                self.toggle = !self.toggle;
                let status = if self.toggle { 0x0040 } else { 0x0000 };
                if !self.config.stuck_busy {
                    if remaining <= 1 {
                        self.state = AmdState::Read;
                    } else {
                        self.state = AmdState::Busy {
                            remaining: remaining - 1,
                        };
                    }
                }
                Some(status & self.config.data_mask)
            }
            _ => self.words.get(addr as usize).copied(),
        }
    }

    fn write(&mut self, addr: u32, value: u16) {
        let (u1, u2) = self.config.unlock;
        let data = value & self.config.data_mask;
        let state = std::mem::replace(&mut self.state, AmdState::Read);
        self.state = match state {
            AmdState::Busy { .. } => state,
            AmdState::Program => {
                self.program(addr, data);
                AmdState::Read
            }
            AmdState::BufferCount { sector } => {
                let count = data as usize + 1;
                if count > self.config.buffer_words {
                    log::warn!("emulated flash: buffer count {} too large", count);
                    AmdState::Read
                } else {
                    AmdState::BufferLoad {
                        sector,
                        remaining: count,
                        words: Vec::with_capacity(count),
                    }
                }
            }
            AmdState::BufferLoad {
                sector,
                remaining,
                mut words,
            } => {
                words.push((addr, data));
                if remaining > 1 {
                    AmdState::BufferLoad {
                        sector,
                        remaining: remaining - 1,
                        words,
                    }
                } else {
                    AmdState::BufferConfirm { sector, words }
                }
            }
            AmdState::BufferConfirm { sector, words } => {
                if data == 0x29 && self.sector_of(addr) == self.sector_of(sector) {
                    for (a, d) in words {
                        self.program(a, d);
                    }
                } else {
                    log::warn!("emulated flash: write-to-buffer aborted");
                }
                AmdState::Read
            }
            _ if data == 0xF0 => AmdState::Read,
            AmdState::Read | AmdState::Autoselect if addr == u1 && data == 0xAA => AmdState::Unlock1,
            AmdState::Read | AmdState::Autoselect => state,
            AmdState::Unlock1 if addr == u2 && data == 0x55 => AmdState::Unlock2,
            AmdState::Unlock2 if addr == u1 && data == 0x90 => AmdState::Autoselect,
            AmdState::Unlock2 if addr == u1 && data == 0xA0 => AmdState::Program,
            AmdState::Unlock2 if addr == u1 && data == 0x80 => AmdState::EraseSetup,
            AmdState::Unlock2 if data == 0x25 => AmdState::BufferCount { sector: addr },
            AmdState::EraseSetup if addr == u1 && data == 0xAA => AmdState::EraseUnlock1,
            AmdState::EraseUnlock1 if addr == u2 && data == 0x55 => AmdState::EraseUnlock2,
            AmdState::EraseUnlock2 if addr == u1 && data == 0x10 => {
                self.start_erase(0..self.words.len());
                return;
            }
            AmdState::EraseUnlock2 if data == 0x30 => {
                let range = self.sector_of(addr);
                self.start_erase(range);
                return;
            }
            other => {
                log::trace!("emulated flash: 0x{:X} at 0x{:X} resets {:?}", data, addr, other);
                AmdState::Read
            }
        };
    }

    fn words(&self) -> &[u16] {
        &self.words
    }

    fn is_busy(&self) -> bool {
        matches!(self.state, AmdState::Busy { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unlock(chip: &mut AmdFlash, cmd: u16) {
        chip.write(0x555, 0xAA);
        chip.write(0x2AA, 0x55);
        chip.write(0x555, cmd);
    }

    #[test]
    fn test_program_clears_bits_only() {
        let mut chip = AmdFlash::new(AmdFlashConfig::agb(0x1000));
        unlock(&mut chip, 0xA0);
        chip.write(0x10, 0x1234);
        assert_eq!(chip.read(0x10), Some(0x1234));
        unlock(&mut chip, 0xA0);
        chip.write(0x10, 0xFF00);
        assert_eq!(chip.read(0x10), Some(0x1200));
        // without the unlock prefix nothing happens
        chip.write(0x11, 0x0000);
        assert_eq!(chip.read(0x11), Some(0xFFFF));
    }

    #[test]
    fn test_autoselect_and_reset() {
        let mut chip = AmdFlash::new(AmdFlashConfig::agb(0x1000));
        unlock(&mut chip, 0x90);
        assert_eq!(chip.read(0), Some(0x0001));
        assert_eq!(chip.read(1), Some(0x227E));
        chip.write(0, 0xF0);
        assert_eq!(chip.read(0), Some(0xFFFF));
    }

    #[test]
    fn test_chip_erase_busy_then_done() {
        let mut chip = AmdFlash::with_contents(AmdFlashConfig::agb(0x1000), &[0; 4]);
        unlock(&mut chip, 0x80);
        unlock(&mut chip, 0x10);
        assert!(chip.is_busy());
        let polls: Vec<_> = (0..4).map(|_| chip.read(0)).collect();
        assert_eq!(polls, vec![Some(0x40), Some(0), Some(0x40), Some(0xFFFF)]);
        assert_eq!(chip.erase_count(), 1);
    }

    #[test]
    fn test_stuck_erase_never_finishes() {
        let mut config = AmdFlashConfig::agb(0x1000);
        config.stuck_busy = true;
        let mut chip = AmdFlash::new(config);
        unlock(&mut chip, 0x80);
        unlock(&mut chip, 0x10);
        for _ in 0..100 {
            assert_ne!(chip.read(0), Some(0xFFFF));
        }
        chip.write(0, 0xF0);
        assert!(chip.is_busy());
    }

    #[test]
    fn test_write_to_buffer() {
        let mut config = AmdFlashConfig::dmg(0x20000);
        config.sector_words = 0x1000;
        let mut chip = AmdFlash::new(config);
        chip.write(0xAAA, 0xAA);
        chip.write(0x555, 0x55);
        chip.write(0x1000, 0x25);
        chip.write(0x1000, 1);
        chip.write(0x1000, 0x12);
        chip.write(0x1001, 0x34);
        chip.write(0x1000, 0x29);
        assert_eq!(&chip.words()[0x1000..0x1003], &[0x12, 0x34, 0xFF]);
    }
}
