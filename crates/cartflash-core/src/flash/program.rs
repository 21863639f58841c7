//! Flash programming state machine
//!
//! [`flash_program`] walks a cartridge through
//! `Idle -> Unlocking -> Detecting -> Erasing/WaitErase -> Programming ->
//! Verifying -> Resetting -> Idle`. Detecting is skipped when the profile has
//! no identifier sequence, erasing when the plan says so, verifying when not
//! requested. Resetting always runs, including after errors and
//! cancellation, so the chip is left in read-array mode.

use super::method::ProgramMethod;
use super::profile::{EraseOp, FlashCartProfile, Resolve, Step, WaitFor, WriteOp};
use crate::device::DeviceHandle;
use crate::engine::{cycles_per_chunk, for_each_chunk, CancelToken, CartBus, Progress};
use crate::error::{Error, Result};
use crate::power::CartMode;
use crate::transport::Transport;
use std::fmt;
use std::str::FromStr;

/// Phase of a flash operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashState {
    /// Nothing in progress
    Idle,
    /// Replaying the cartridge unlock sequence
    Unlocking,
    /// Reading the chip identifier
    Detecting,
    /// Issuing an erase command
    Erasing,
    /// Polling for erase completion
    WaitErase,
    /// Writing the image
    Programming(ProgramMethod),
    /// Reading back and comparing
    Verifying,
    /// Returning the chip to read-array mode
    Resetting,
}

/// Erase strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EraseMode {
    /// Sector erase for partial images, chip erase otherwise
    #[default]
    Auto,
    /// Whole-chip erase
    Chip,
    /// Erase only the sectors the image covers
    Sector,
    /// Do not erase
    Skip,
}

impl fmt::Display for EraseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EraseMode::Auto => "auto",
            EraseMode::Chip => "chip",
            EraseMode::Sector => "sector",
            EraseMode::Skip => "skip",
        };
        f.write_str(s)
    }
}

impl FromStr for EraseMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(EraseMode::Auto),
            "chip" => Ok(EraseMode::Chip),
            "sector" => Ok(EraseMode::Sector),
            "skip" | "none" => Ok(EraseMode::Skip),
            _ => Err(Error::InvalidArgument(format!("unknown erase mode '{}'", s))),
        }
    }
}

/// Options for [`flash_program`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashOptions {
    /// Erase strategy
    pub erase: EraseMode,
    /// Read back and compare after programming
    pub verify: bool,
    /// Use the buffered template when the profile has one
    pub prefer_buffered: bool,
}

impl Default for FlashOptions {
    fn default() -> Self {
        Self {
            erase: EraseMode::Auto,
            verify: true,
            prefer_buffered: true,
        }
    }
}

/// What a flash operation did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlashReport {
    /// Identifier bytes read in the Detecting phase
    pub identifier: Option<Vec<u8>>,
    /// Whether the identifier matched the profile, if it lists any
    pub identifier_matched: Option<bool>,
    /// Whether a chip erase was issued
    pub chip_erased: bool,
    /// Sectors erased
    pub sectors_erased: usize,
    /// Programming method used
    pub method: Option<ProgramMethod>,
    /// Image bytes written
    pub bytes_written: usize,
    /// Whether the readback matched
    pub verified: bool,
}

/// Result of a flash operation that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlashOutcome {
    /// Every phase ran
    Completed(FlashReport),
    /// Cancelled at a chunk or sector boundary; the chip was reset
    Aborted(FlashReport),
}

impl FlashOutcome {
    /// Report of the phases that ran
    pub fn report(&self) -> &FlashReport {
        match self {
            FlashOutcome::Completed(r) | FlashOutcome::Aborted(r) => r,
        }
    }

    /// Whether every phase ran
    pub fn is_completed(&self) -> bool {
        matches!(self, FlashOutcome::Completed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ErasePlan {
    Skip,
    Chip,
    Sectors(Vec<(u32, u32)>),
}

fn plan_erase(profile: &FlashCartProfile, mode: EraseMode, len: usize) -> Result<ErasePlan> {
    let sectors = || {
        ErasePlan::Sectors(
            profile
                .sectors()
                .take_while(|&(base, _)| (base as usize) < len)
                .collect(),
        )
    };
    let missing = |what: &str| {
        Error::UnsupportedFlashMethod(format!("'{}' has no {} command", profile.name(), what))
    };
    match mode {
        EraseMode::Skip => Ok(ErasePlan::Skip),
        EraseMode::Chip => profile.chip_erase.as_ref().map(|_| ErasePlan::Chip).ok_or_else(|| missing("chip_erase")),
        EraseMode::Sector => profile.sector_erase.as_ref().map(|_| sectors()).ok_or_else(|| missing("sector_erase")),
        EraseMode::Auto => {
            let partial = (len as u64) < profile.flash_size as u64;
            match (&profile.sector_erase, &profile.chip_erase) {
                (Some(_), _) if partial => Ok(sectors()),
                (_, Some(_)) => Ok(ErasePlan::Chip),
                (Some(_), None) => Ok(sectors()),
                (None, None) => {
                    log::warn!("'{}' has no erase command, writing without erasing", profile.name());
                    Ok(ErasePlan::Skip)
                }
            }
        }
    }
}

/// Program `data` into the flash cartridge described by `profile`
///
/// The image is written from address 0. Power, size, alignment, the erase
/// plan and the programming method are all checked before any bus activity.
/// Cancellation yields [`FlashOutcome::Aborted`]; any other failure is
/// returned as an error after the chip has been reset.
pub fn flash_program<T: Transport>(
    dev: &mut DeviceHandle<T>,
    profile: &FlashCartProfile,
    data: &[u8],
    options: &FlashOptions,
    progress: &mut dyn Progress,
    cancel: &CancelToken,
) -> Result<FlashOutcome> {
    dev.require_power(profile.voltage)?;
    if data.is_empty() {
        return Err(Error::InvalidArgument("flash image is empty".into()));
    }
    if data.len() as u64 > profile.flash_size as u64 {
        return Err(Error::AddressOutOfBounds {
            addr: 0,
            len: data.len(),
            limit: profile.flash_size,
        });
    }
    let word_bytes = profile.cart_type.word_bytes();
    if data.len() % word_bytes as usize != 0 {
        return Err(Error::InvalidAlignment {
            addr: 0,
            len: data.len(),
            align: word_bytes,
        });
    }
    let (method, write_op) = ProgramMethod::select(profile, options.prefer_buffered)?;
    let plan = plan_erase(profile, options.erase, data.len())?;
    dev.set_mode(profile.cart_type);

    log::info!(
        "Flashing {} bytes to '{}' ({}, erase: {})",
        data.len(),
        profile.name(),
        method,
        options.erase
    );

    let mut flasher = Flasher {
        dev,
        profile,
        data,
        state: FlashState::Idle,
        report: FlashReport::default(),
    };
    let result = flasher.run(method, write_op, &plan, options.verify, progress, cancel);

    flasher.enter(FlashState::Resetting);
    let reset = flasher.reset();
    flasher.enter(FlashState::Idle);
    let report = flasher.report;

    match result {
        Ok(()) => {
            reset?;
            progress.complete();
            log::info!("Flashing complete");
            Ok(FlashOutcome::Completed(report))
        }
        Err(Error::Cancelled) => {
            if let Err(e) = reset {
                log::warn!("Reset after cancellation failed: {}", e);
            }
            log::warn!("Flashing cancelled after {} bytes", report.bytes_written);
            Ok(FlashOutcome::Aborted(report))
        }
        Err(e) => {
            if let Err(reset_err) = reset {
                log::warn!("Reset after failure failed: {}", reset_err);
            }
            Err(e)
        }
    }
}

struct Flasher<'a, T: Transport> {
    dev: &'a mut DeviceHandle<T>,
    profile: &'a FlashCartProfile,
    data: &'a [u8],
    state: FlashState,
    report: FlashReport,
}

impl<'a, T: Transport> Flasher<'a, T> {
    fn enter(&mut self, next: FlashState) {
        log::debug!("Flash state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn bus(&mut self) -> CartBus<'_, T> {
        CartBus::new(self.dev, self.profile.write_pin)
    }

    fn word_bytes(&self) -> usize {
        self.profile.cart_type.word_bytes() as usize
    }

    /// Bus word `i` of the image
    fn word(&self, i: usize) -> u16 {
        match self.profile.cart_type {
            CartMode::Agb => u16::from_le_bytes([self.data[i * 2], self.data[i * 2 + 1]]),
            CartMode::Dmg => self.data[i] as u16,
        }
    }

    fn run(
        &mut self,
        method: ProgramMethod,
        write_op: &WriteOp,
        plan: &ErasePlan,
        verify: bool,
        progress: &mut dyn Progress,
        cancel: &CancelToken,
    ) -> Result<()> {
        self.enter(FlashState::Unlocking);
        let profile = self.profile;
        let mut bus = self.bus();
        replay(&mut bus, &profile.unlock, &Resolve::default())?;
        bus.finish()?;

        if !self.profile.read_identifier.is_empty() {
            self.enter(FlashState::Detecting);
            self.detect()?;
        }

        self.erase(plan, progress, cancel)?;

        self.enter(FlashState::Programming(method));
        self.report.method = Some(method);
        match method {
            ProgramMethod::Single => self.program_single(write_op, progress, cancel)?,
            ProgramMethod::Buffered { buffer_size, .. } => {
                self.program_buffered(write_op, buffer_size, progress, cancel)?
            }
        }

        if verify {
            self.enter(FlashState::Verifying);
            self.verify(progress, cancel)?;
        }
        Ok(())
    }

    fn detect(&mut self) -> Result<()> {
        let profile = self.profile;
        let id_len = profile.flash_ids.iter().map(Vec::len).max().unwrap_or(4);
        let word_bytes = self.word_bytes();
        let mut bus = self.bus();
        replay(&mut bus, &profile.read_identifier, &Resolve::default())?;
        bus.finish()?;
        let words = bus.read_words(0, id_len.div_ceil(word_bytes))?;
        replay(&mut bus, &profile.reset, &Resolve::default())?;
        bus.finish()?;

        let mut id: Vec<u8> = match profile.cart_type {
            CartMode::Agb => words.iter().flat_map(|w| w.to_le_bytes()).collect(),
            CartMode::Dmg => words.iter().map(|&w| w as u8).collect(),
        };
        id.truncate(id_len);
        log::info!("Flash ID: {:02X?}", id);

        let matched = (!profile.flash_ids.is_empty()).then(|| profile.matches_id(&id));
        if matched == Some(false) {
            log::warn!(
                "Flash ID {:02X?} does not match '{}', continuing anyway",
                id,
                profile.name()
            );
        }
        self.report.identifier = Some(id);
        self.report.identifier_matched = matched;
        Ok(())
    }

    fn erase(&mut self, plan: &ErasePlan, progress: &mut dyn Progress, cancel: &CancelToken) -> Result<()> {
        let profile = self.profile;
        match plan {
            ErasePlan::Skip => {
                log::debug!("Skipping erase");
                Ok(())
            }
            ErasePlan::Chip => {
                let op = profile
                    .chip_erase
                    .as_ref()
                    .ok_or_else(|| Error::UnsupportedFlashMethod("no chip_erase command".into()))?;
                progress.erasing(1);
                cancel.check()?;
                self.erase_once(op, &Resolve::default())?;
                self.report.chip_erased = true;
                progress.erase_progress(1);
                Ok(())
            }
            ErasePlan::Sectors(sectors) => {
                let op = profile
                    .sector_erase
                    .as_ref()
                    .ok_or_else(|| Error::UnsupportedFlashMethod("no sector_erase command".into()))?;
                let word_bytes = self.word_bytes() as u32;
                progress.erasing(sectors.len());
                for (i, &(base, size)) in sectors.iter().enumerate() {
                    cancel.check()?;
                    log::debug!("Erasing sector 0x{:06X} (0x{:X} bytes)", base, size);
                    let ctx = Resolve {
                        sector: Some(base / word_bytes),
                        ..Resolve::default()
                    };
                    self.erase_once(op, &ctx)?;
                    self.report.sectors_erased = i + 1;
                    progress.erase_progress(i + 1);
                }
                Ok(())
            }
        }
    }

    fn erase_once(&mut self, op: &EraseOp, ctx: &Resolve) -> Result<()> {
        self.enter(FlashState::Erasing);
        let mut bus = self.bus();
        replay(&mut bus, &op.sequence, ctx)?;
        bus.finish()?;

        let Some(wait) = &op.wait_for else {
            return Ok(());
        };
        self.enter(FlashState::WaitErase);
        let attempts = op.poll_attempts();
        let interval_us = op.poll_interval_ms.saturating_mul(1000);
        let mut bus = self.bus();
        match poll(&mut bus, wait, ctx, attempts, interval_us)? {
            Some(n) => {
                log::debug!("Erase finished after {} polls", n);
                Ok(())
            }
            None => Err(Error::EraseTimeout { attempts }),
        }
    }

    fn program_single(&mut self, op: &WriteOp, progress: &mut dyn Progress, cancel: &CancelToken) -> Result<()> {
        let word_bytes = self.word_bytes();
        let words = self.data.len() / word_bytes;
        let per_command = match self.profile.cart_type {
            CartMode::Agb => 13,
            CartMode::Dmg => 12,
        };
        let writes: usize = op
            .sequence
            .iter()
            .map(|s| match s {
                Step::Write { repeat, .. } => *repeat as usize,
                Step::Delay(_) => 1,
            })
            .sum();
        let image: Vec<u16> = (0..words).map(|i| self.word(i)).collect();
        let report = &mut self.report;
        let mut bus = CartBus::new(self.dev, self.profile.write_pin);
        let chunk = cycles_per_chunk(bus.max_transfer_len(), writes.max(1) * per_command)?;

        progress.writing(self.data.len());
        for_each_chunk(words, chunk, cancel, |range, _| {
            for i in range.clone() {
                let ctx = Resolve {
                    program: Some((i as u32, image[i])),
                    ..Resolve::default()
                };
                replay(&mut bus, &op.sequence, &ctx)?;
                if let Some(wait) = &op.wait_for {
                    bus.finish()?;
                    if poll(&mut bus, wait, &ctx, op.max_polls, 0)?.is_none() {
                        return Err(Error::ProgramTimeout { addr: i as u32 });
                    }
                }
            }
            bus.finish()?;
            report.bytes_written = range.end * word_bytes;
            progress.write_progress(report.bytes_written);
            Ok(())
        })
    }

    fn program_buffered(
        &mut self,
        op: &WriteOp,
        buffer_size: u32,
        progress: &mut dyn Progress,
        cancel: &CancelToken,
    ) -> Result<()> {
        let word_bytes = self.word_bytes();
        let words = self.data.len() / word_bytes;
        let buffer_words = buffer_size as usize / word_bytes;
        let image: Vec<u16> = (0..words).map(|i| self.word(i)).collect();
        let report = &mut self.report;
        let mut bus = CartBus::new(self.dev, self.profile.write_pin);

        progress.writing(self.data.len());
        for_each_chunk(words, buffer_words, cancel, |range, _| {
            let last = range.end - 1;
            let ctx = Resolve {
                sector: Some(range.start as u32),
                program: Some((last as u32, image[last])),
                buffer_size: Some((range.len() - 1) as u32),
            };
            for step in &op.sequence {
                if step.is_program_data() {
                    for i in range.clone() {
                        bus.write(i as u32, image[i])?;
                    }
                } else {
                    replay(&mut bus, std::slice::from_ref(step), &ctx)?;
                }
            }
            bus.finish()?;
            if let Some(wait) = &op.wait_for {
                if poll(&mut bus, wait, &ctx, op.max_polls, 0)?.is_none() {
                    return Err(Error::ProgramTimeout { addr: range.start as u32 });
                }
            }
            report.bytes_written = range.end * word_bytes;
            progress.write_progress(report.bytes_written);
            Ok(())
        })
    }

    fn verify(&mut self, progress: &mut dyn Progress, cancel: &CancelToken) -> Result<()> {
        let word_bytes = self.word_bytes();
        let words = self.data.len() / word_bytes;
        let data = self.data;
        let mode = self.profile.cart_type;
        let mut bus = self.bus();
        let chunk = cycles_per_chunk(bus.max_transfer_len(), 4)?;

        progress.reading(data.len());
        for_each_chunk(words, chunk, cancel, |range, _| {
            let read = bus.read_words(range.start as u32, range.len())?;
            for (k, word) in read.into_iter().enumerate() {
                let i = range.start + k;
                let found = match mode {
                    CartMode::Agb => word.to_le_bytes().to_vec(),
                    CartMode::Dmg => vec![word as u8],
                };
                let expected = &data[i * word_bytes..(i + 1) * word_bytes];
                if let Some(pos) = (0..word_bytes).find(|&b| found[b] != expected[b]) {
                    return Err(Error::VerifyFailed {
                        addr: (i * word_bytes + pos) as u32,
                        expected: expected[pos],
                        found: found[pos],
                    });
                }
            }
            progress.read_progress(range.end * word_bytes);
            Ok(())
        })?;
        self.report.verified = true;
        log::info!("Verified {} bytes", data.len());
        Ok(())
    }

    fn reset(&mut self) -> Result<()> {
        let profile = self.profile;
        let mut bus = self.bus();
        replay(&mut bus, &profile.reset, &Resolve::default())?;
        bus.finish()
    }
}

/// Replay command steps on the bus
fn replay<T: Transport>(bus: &mut CartBus<'_, T>, steps: &[Step], ctx: &Resolve) -> Result<()> {
    for step in steps {
        match *step {
            Step::Delay(us) => bus.delay(us)?,
            Step::Write { addr, data, repeat } => {
                let addr = addr.resolve(ctx)?;
                let value = data.resolve(ctx)?;
                let value = u16::try_from(value)
                    .map_err(|_| Error::Profile(format!("data 0x{:X} is wider than the bus", value)))?;
                for _ in 0..repeat {
                    bus.write(addr, value)?;
                }
            }
        }
    }
    Ok(())
}

/// Poll `wait` up to `attempts` times, returning the attempt that matched
fn poll<T: Transport>(
    bus: &mut CartBus<'_, T>,
    wait: &WaitFor,
    ctx: &Resolve,
    attempts: u32,
    interval_us: u32,
) -> Result<Option<u32>> {
    let addr = wait.addr.resolve(ctx)?;
    let mask = wait.mask.resolve(ctx)?;
    let value = wait.value.resolve(ctx)?;
    for attempt in 1..=attempts {
        let read = bus.read(addr)? as u32;
        if read & mask == value & mask {
            return Ok(Some(attempt));
        }
        log::trace!("poll {}/{}: read 0x{:04X} at 0x{:06X}", attempt, attempts, read, addr);
        if attempt < attempts && interval_us > 0 {
            bus.sleep_us(interval_us)?;
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Command, Reply};
    use crate::device::tests::mock_device;
    use crate::engine::NoProgress;
    use crate::power::PowerState;

    fn profile(erase: &str, write: &str) -> FlashCartProfile {
        profile_with("", erase, write)
    }

    fn profile_with(top: &str, erase: &str, write: &str) -> FlashCartProfile {
        FlashCartProfile::from_json(&format!(
            r#"{{
                "type": "AGB",
                "names": ["mock"],
                "flash_ids": [[1, 0, "0x7E", "0x22"]],
                "voltage": 3.3,
                "flash_size": "0x8000",
                "sector_size": [["0x4000", 2]],
                {}
                "commands": {{
                    "reset": [[0, "0xF0"]],
                    {}
                    {}
                }}
            }}"#,
            top, erase, write
        ))
        .unwrap()
    }

    const CHIP_ERASE: &str = r#""chip_erase": {
        "sequence": [["0x555", "0xAA"], ["0x2AA", "0x55"], ["0x555", "0x80"],
                     ["0x555", "0xAA"], ["0x2AA", "0x55"], ["0x555", "0x10"]],
        "wait_for": {"addr": 0, "mask": "0xFFFF", "value": "0xFFFF"},
        "timeout_s": 1,
        "poll_interval_ms": 100
    },"#;

    const SINGLE: &str = r#""single_write": {
        "sequence": [["0x555", "0xAA"], ["0x2AA", "0x55"], ["0x555", "0xA0"], ["PA", "PD"]]
    }"#;

    fn erased_device() -> DeviceHandle<crate::transport::mock::RecordingTransport> {
        let mut dev = mock_device(PowerState::V3_3);
        dev.transport_mut().responder = Box::new(|cmd| match cmd {
            Command::GbaRomRead => Some(Reply::Word(0xFFFF)),
            _ => None,
        });
        dev
    }

    fn rom_writes(dev: &DeviceHandle<crate::transport::mock::RecordingTransport>) -> Vec<u16> {
        dev.transport()
            .commands()
            .into_iter()
            .filter_map(|c| match c {
                Command::GbaRomWrite(v) => Some(v),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_erase_plan_auto() {
        let p = profile(CHIP_ERASE, SINGLE);
        assert_eq!(plan_erase(&p, EraseMode::Auto, 0x100).unwrap(), ErasePlan::Chip);
        assert_eq!(plan_erase(&p, EraseMode::Skip, 0x100).unwrap(), ErasePlan::Skip);
        assert!(matches!(
            plan_erase(&p, EraseMode::Sector, 0x100),
            Err(Error::UnsupportedFlashMethod(_))
        ));

        let sector = r#""sector_erase": {
            "sequence": [["SA", "0x30"]],
            "wait_for": {"addr": "SA", "mask": "0xFFFF", "value": "0xFFFF"}
        },"#;
        let p = profile(sector, SINGLE);
        assert_eq!(
            plan_erase(&p, EraseMode::Auto, 0x4001).unwrap(),
            ErasePlan::Sectors(vec![(0, 0x4000), (0x4000, 0x4000)])
        );
        assert_eq!(
            plan_erase(&p, EraseMode::Auto, 0x100).unwrap(),
            ErasePlan::Sectors(vec![(0, 0x4000)])
        );
        assert!(plan_erase(&p, EraseMode::Chip, 0x100).is_err());
    }

    #[test]
    fn test_single_write_sequence_per_word() {
        let mut dev = erased_device();
        let p = profile(CHIP_ERASE, SINGLE);
        let options = FlashOptions {
            verify: false,
            ..FlashOptions::default()
        };
        let outcome = flash_program(
            &mut dev,
            &p,
            &[0x34, 0x12, 0x78, 0x56],
            &options,
            &mut NoProgress,
            &CancelToken::new(),
        )
        .unwrap();
        assert!(outcome.is_completed());
        let report = outcome.report();
        assert!(report.chip_erased);
        assert_eq!(report.bytes_written, 4);
        assert_eq!(report.identifier, None);

        let writes = rom_writes(&dev);
        // chip erase, two programmed words, reset
        assert_eq!(
            writes,
            vec![
                0xAA, 0x55, 0x80, 0xAA, 0x55, 0x10, //
                0xAA, 0x55, 0xA0, 0x1234, //
                0xAA, 0x55, 0xA0, 0x5678, //
                0xF0,
            ]
        );
    }

    #[test]
    fn test_erase_timeout_polls_then_resets() {
        let mut dev = mock_device(PowerState::V3_3);
        dev.transport_mut().responder = Box::new(|cmd| match cmd {
            Command::GbaRomRead => Some(Reply::Word(0x0000)),
            _ => None,
        });
        let p = profile(CHIP_ERASE, SINGLE);
        let result = flash_program(
            &mut dev,
            &p,
            &[0; 16],
            &FlashOptions::default(),
            &mut NoProgress,
            &CancelToken::new(),
        );
        assert!(matches!(result, Err(Error::EraseTimeout { attempts: 10 })));
        let cmds = dev.transport().commands();
        let polls = cmds.iter().filter(|c| matches!(c, Command::GbaRomRead)).count();
        assert_eq!(polls, 10);
        assert_eq!(rom_writes(&dev).last(), Some(&0xF0));
    }

    #[test]
    fn test_unmatched_buffered_template_fails_before_bus() {
        let mut dev = erased_device();
        let buffered = r#""single_write": {"sequence": [["PA", "PD"]]},
            "buffer_write": {
                "sequence": [["0x555", "0xAA"], ["SA", "0x25"], ["SA", "BS"], ["PA", "PD"], ["SA", "0x29"]]
            }"#;
        let p = profile_with(r#""buffer_size": 64,"#, "", buffered);
        let before = dev.transport().batches.len();
        let result = flash_program(
            &mut dev,
            &p,
            &[0; 4],
            &FlashOptions::default(),
            &mut NoProgress,
            &CancelToken::new(),
        );
        assert!(matches!(result, Err(Error::UnsupportedFlashMethod(_))));
        assert_eq!(dev.transport().batches.len(), before);
    }

    #[test]
    fn test_buffered_amd_emission() {
        let mut dev = erased_device();
        let buffered = r#""buffer_write": {
                "sequence": [["0x555", "0xAA"], ["0x2AA", "0x55"], ["SA", "0x25"], ["SA", "BS"],
                             ["PA", "PD"], ["SA", "0x29"]]
            }"#;
        let p = profile_with(r#""buffer_size": 4,"#, "", buffered);
        let options = FlashOptions {
            erase: EraseMode::Skip,
            verify: false,
            prefer_buffered: true,
        };
        let outcome = flash_program(
            &mut dev,
            &p,
            &[1, 0, 2, 0, 3, 0],
            &options,
            &mut NoProgress,
            &CancelToken::new(),
        )
        .unwrap();
        assert!(matches!(
            outcome.report().method,
            Some(ProgramMethod::Buffered { buffer_size: 4, .. })
        ));
        assert_eq!(
            rom_writes(&dev),
            vec![
                0xAA, 0x55, 0x25, 1, 1, 2, 0x29, // words 0-1, BS = 1
                0xAA, 0x55, 0x25, 0, 3, 0x29, // word 2, BS = 0
                0xF0,
            ]
        );
    }

    #[test]
    fn test_wrong_power_rejected_before_bus() {
        let mut dev = mock_device(PowerState::V5);
        let p = profile(CHIP_ERASE, SINGLE);
        let before = dev.transport().batches.len();
        let result = flash_program(
            &mut dev,
            &p,
            &[0; 4],
            &FlashOptions::default(),
            &mut NoProgress,
            &CancelToken::new(),
        );
        assert!(matches!(result, Err(Error::InvalidPowerState { .. })));
        assert_eq!(dev.transport().batches.len(), before);
    }

    #[test]
    fn test_verify_mismatch_reports_offset() {
        let mut dev = mock_device(PowerState::V3_3);
        dev.transport_mut().responder = Box::new(|cmd| match cmd {
            Command::GbaRomRead => Some(Reply::Word(0xFFFF)),
            _ => None,
        });
        let p = profile("", SINGLE);
        let options = FlashOptions {
            erase: EraseMode::Skip,
            ..FlashOptions::default()
        };
        let result = flash_program(
            &mut dev,
            &p,
            &[0xFF, 0xFF, 0xFF, 0x12],
            &options,
            &mut NoProgress,
            &CancelToken::new(),
        );
        match result {
            Err(Error::VerifyFailed { addr, expected, found }) => {
                assert_eq!((addr, expected, found), (3, 0x12, 0xFF));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
