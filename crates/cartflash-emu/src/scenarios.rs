//! End-to-end scenarios against the emulated device

use super::*;
use cartflash_core::engine::{read_block, read_ram, read_rom, write_ram, BankingParams, CancelToken, Mapper, NoProgress, Progress};
use cartflash_core::flash::{
    flash_program, EraseMode, FlashCartProfile, FlashOptions, FlashOutcome, ProfileDatabase, ProgramMethod,
};
use cartflash_core::{DeviceHandle, Error, WordEncoding};

fn device(config: EmuConfig) -> DeviceHandle<EmuCart> {
    DeviceHandle::connect(EmuCart::new(config)).unwrap()
}

fn agb_flash_config(chip: AmdFlashConfig) -> EmuConfig {
    EmuConfig {
        agb_rom: Box::new(AmdFlash::new(chip)),
        ..EmuConfig::default()
    }
}

/// Image whose halfword at word address `i` is `i ^ 0xA5A5`
fn agb_image(bytes: usize) -> Vec<u8> {
    (0..bytes / 2)
        .flat_map(|i| ((i as u16) ^ 0xA5A5).to_le_bytes())
        .collect()
}

const AGB_PROFILE: &str = r#"{
    "type": "AGB",
    "names": ["Emulated AMD 4 MiB"],
    "flash_ids": [[1, 0, "0x7E", "0x22"]],
    "voltage": 3.3,
    "flash_size": "0x400000",
    "sector_size": [["0x10000", 64]],
    "buffer_size": 64,
    "commands": {
        "reset": [[0, "0xF0"]],
        "unlock": [["0x555", "0xAA"], ["0x2AA", "0x55"], ["0x555", "0xF0"]],
        "read_identifier": [["0x555", "0xAA"], ["0x2AA", "0x55"], ["0x555", "0x90"]],
        "chip_erase": {
            "sequence": [["0x555", "0xAA"], ["0x2AA", "0x55"], ["0x555", "0x80"],
                         ["0x555", "0xAA"], ["0x2AA", "0x55"], ["0x555", "0x10"]],
            "wait_for": {"addr": 0, "mask": "0xFFFF", "value": "0xFFFF"},
            "timeout_s": 1,
            "poll_interval_ms": 100
        },
        "single_write": {
            "sequence": [["0x555", "0xAA"], ["0x2AA", "0x55"], ["0x555", "0xA0"], ["PA", "PD"]]
        }
    }
}"#;

const AGB_BUFFER_WRITE: &str = r#""buffer_write": {
    "sequence": [["0x555", "0xAA"], ["0x2AA", "0x55"], ["SA", "0x25"], ["SA", "BS"],
                 ["PA", "PD"], ["SA", "0x29"]],
    "wait_for": {"addr": "PA", "mask": "0xFFFF", "value": "PD"}
},
"single_write""#;

const DMG_PROFILE: &str = r#"(
    type: "DMG",
    names: ["Emulated DMG AUDIO flash"],
    flash_ids: [[1, "0xA4"]],
    voltage: 5,
    flash_size: "0x20000",
    sector_size: [["0x10000", 2]],
    write_pin: "AUDIO",
    commands: (
        reset: [[0, "0xF0"]],
        read_identifier: [["0xAAA", "0xAA"], ["0x555", "0x55"], ["0xAAA", "0x90"]],
        sector_erase: (
            sequence: [["0xAAA", "0xAA"], ["0x555", "0x55"], ["0xAAA", "0x80"],
                       ["0xAAA", "0xAA"], ["0x555", "0x55"], ["SA", "0x30"]],
            wait_for: (addr: "SA", mask: "0xFF", value: "0xFF"),
            timeout_s: 2,
            poll_interval_ms: 10,
        ),
        single_write: (
            sequence: [["0xAAA", "0xAA"], ["0x555", "0x55"], ["0xAAA", "0xA0"], ["PA", "PD"]],
            wait_for: (addr: "PA", mask: "0xFF", value: "PD"),
        ),
    ),
)"#;

struct CancelAt<'a> {
    cancel: &'a CancelToken,
    at: usize,
}

impl Progress for CancelAt<'_> {
    fn reading(&mut self, _: usize) {}
    fn read_progress(&mut self, _: usize) {}
    fn erasing(&mut self, _: usize) {}
    fn erase_progress(&mut self, _: usize) {}
    fn writing(&mut self, _: usize) {}
    fn write_progress(&mut self, done: usize) {
        if done >= self.at {
            self.cancel.cancel();
        }
    }
}

#[test]
fn test_read_across_page_boundary() {
    let image: Vec<u8> = (0..0x40000u32).map(|i| (i * 7 + (i >> 8)) as u8).collect();
    let mut dev = device(EmuConfig::default().with_agb_rom_image(&image));
    dev.set_power(PowerState::V3_3).unwrap();

    let cancel = CancelToken::new();
    let data = read_block(&mut dev, 0x1FFF0, 0x20, WordEncoding::Base, &mut NoProgress, &cancel).unwrap();
    assert_eq!(data, &image[0x1FFF0..0x20010]);
    assert_eq!(dev.transport().advance_count(), 1);

    let data = read_block(&mut dev, 0x1FFF0, 0x20, WordEncoding::Flip, &mut NoProgress, &cancel).unwrap();
    assert_eq!(data, &image[0x1FFF0..0x20010]);
}

#[test]
fn test_sequential_read_from_zero_crosses_one_page() {
    let image: Vec<u8> = (0..0x40000u32).map(|i| (i * 13 ^ (i >> 10)) as u8).collect();
    let mut dev = device(EmuConfig::default().with_agb_rom_image(&image));
    dev.set_power(PowerState::V3_3).unwrap();

    // 65536 word cycles fill the first page, the next two land on page 1
    let data = read_block(&mut dev, 0, 0x20004, WordEncoding::Base, &mut NoProgress, &CancelToken::new()).unwrap();
    assert_eq!(data, &image[..0x20004]);
    assert_eq!(dev.transport().advance_count(), 1);
}

#[test]
fn test_full_dump_matches_image() {
    let image: Vec<u8> = (0..0x40000u32).map(|i| (i ^ (i >> 9)) as u8).collect();
    let mut dev = device(EmuConfig::default().with_agb_rom_image(&image));
    dev.set_power(PowerState::V3_3).unwrap();
    let data = read_rom(&mut dev, image.len(), &mut NoProgress, &CancelToken::new()).unwrap();
    assert_eq!(data, image);
}

#[test]
fn test_open_bus_past_rom_end() {
    let mut dev = device(EmuConfig::default().with_agb_rom_image(&[0x11, 0x22]));
    dev.set_power(PowerState::V3_3).unwrap();
    let data = read_block(&mut dev, 0x200, 4, WordEncoding::Base, &mut NoProgress, &CancelToken::new()).unwrap();
    // address lines read back: words 0x100 and 0x101
    assert_eq!(data, vec![0x00, 0x01, 0x01, 0x01]);
}

#[test]
fn test_gb_rom_dump_with_banking() {
    let image: Vec<u8> = (0..0x10000u32).map(|i| (i >> 8 ^ i) as u8).collect();
    let mut dev = device(EmuConfig::default().with_dmg_rom_image(&image));
    dev.set_power(PowerState::V5).unwrap();
    dev.set_mode(CartMode::Dmg);
    dev.set_banking(BankingParams {
        mapper: Mapper::Mbc5,
        rom_banks: 4,
        ram_banks: 1,
    });
    let data = read_rom(&mut dev, image.len(), &mut NoProgress, &CancelToken::new()).unwrap();
    assert_eq!(data, image);
}

#[test]
fn test_save_ram_round_trip() {
    let mut dev = device(EmuConfig::default());
    dev.set_power(PowerState::V3_3).unwrap();
    let cancel = CancelToken::new();
    let save: Vec<u8> = (0..0x200u32).map(|i| (i * 3) as u8).collect();
    write_ram(&mut dev, 0x100, &save, &mut NoProgress, &cancel).unwrap();
    assert_eq!(&dev.transport().agb_sram()[0x100..0x300], &save[..]);
    assert_eq!(read_ram(&mut dev, 0x100, save.len(), &mut NoProgress, &cancel).unwrap(), save);

    dev.set_power(PowerState::V5).unwrap();
    dev.set_mode(CartMode::Dmg);
    dev.set_banking(BankingParams {
        mapper: Mapper::Mbc5,
        rom_banks: 2,
        ram_banks: 4,
    });
    write_ram(&mut dev, 0x1F00, &save, &mut NoProgress, &cancel).unwrap();
    assert!(!dev.transport().dmg_ram_enabled());
    assert_eq!(&dev.transport().dmg_ram()[0x1F00..0x2100], &save[..]);
    assert_eq!(read_ram(&mut dev, 0x1F00, save.len(), &mut NoProgress, &cancel).unwrap(), save);
}

#[test]
fn test_power_and_variables() {
    let mut dev = device(EmuConfig::default());
    assert_eq!(dev.firmware_version(), EMU_FIRMWARE_VERSION);
    assert_eq!(dev.device_kind(), EMU_DEVICE_KIND);
    dev.set_power(PowerState::V5).unwrap();
    assert_eq!(dev.transport().power(), PowerState::V5);
    dev.set_var(Variable::BusSettleNs, 250).unwrap();
    assert_eq!(dev.get_var(Variable::BusSettleNs).unwrap(), 250);
    let emu = dev.shutdown().unwrap();
    assert_eq!(emu.power(), PowerState::Off);
}

#[test]
fn test_flash_32k_single_write() {
    let mut dev = device(agb_flash_config(AmdFlashConfig::agb(4 * 1024 * 1024)));
    dev.set_power(PowerState::V3_3).unwrap();
    let profile = FlashCartProfile::from_json(AGB_PROFILE).unwrap();
    let image = agb_image(0x8000);

    let outcome = flash_program(
        &mut dev,
        &profile,
        &image,
        &FlashOptions::default(),
        &mut NoProgress,
        &CancelToken::new(),
    )
    .unwrap();
    let report = match outcome {
        FlashOutcome::Completed(report) => report,
        FlashOutcome::Aborted(_) => panic!("flash aborted"),
    };
    assert_eq!(report.identifier, Some(vec![0x01, 0x00, 0x7E, 0x22]));
    assert_eq!(report.identifier_matched, Some(true));
    assert!(report.chip_erased);
    assert_eq!(report.method, Some(ProgramMethod::Single));
    assert!(report.verified);

    let emu = dev.transport();
    assert_eq!(&emu.agb_rom_bytes()[..image.len()], &image[..]);
    assert!(emu.agb_rom()[image.len() / 2..].iter().all(|&w| w == 0xFFFF));

    let unlock = [(0x555, 0xAA), (0x2AA, 0x55)];
    let mut expected: Vec<(u32, u16)> = vec![(0x555, 0xAA), (0x2AA, 0x55), (0x555, 0xF0)];
    expected.extend(unlock);
    expected.extend([(0x555, 0x90), (0, 0xF0)]);
    expected.extend(unlock);
    expected.push((0x555, 0x80));
    expected.extend(unlock);
    expected.push((0x555, 0x10));
    for i in 0..image.len() as u32 / 2 {
        expected.extend(unlock);
        expected.extend([(0x555, 0xA0), (i, (i as u16) ^ 0xA5A5)]);
    }
    expected.push((0, 0xF0));
    assert_eq!(expected.len(), 13 + 16384 * 4 + 1);
    assert_eq!(emu.writes(), expected);
}

#[test]
fn test_flash_buffered() {
    let mut dev = device(agb_flash_config(AmdFlashConfig::agb(4 * 1024 * 1024)));
    dev.set_power(PowerState::V3_3).unwrap();
    let profile = FlashCartProfile::from_json(&AGB_PROFILE.replace("\"single_write\"", AGB_BUFFER_WRITE)).unwrap();
    let image = agb_image(0x1000);

    let outcome = flash_program(
        &mut dev,
        &profile,
        &image,
        &FlashOptions::default(),
        &mut NoProgress,
        &CancelToken::new(),
    )
    .unwrap();
    assert!(outcome.is_completed());
    assert!(matches!(
        outcome.report().method,
        Some(ProgramMethod::Buffered { buffer_size: 64, .. })
    ));
    let emu = dev.transport();
    assert_eq!(&emu.agb_rom_bytes()[..image.len()], &image[..]);
    // one confirm per 32-word buffer
    let confirms = emu.writes().iter().filter(|&&(_, d)| d == 0x29).count();
    assert!(confirms >= 0x1000 / 64);
}

#[test]
fn test_erase_timeout_then_reset() {
    let mut chip = AmdFlashConfig::agb(1024 * 1024);
    chip.stuck_busy = true;
    let mut dev = device(agb_flash_config(chip));
    dev.set_power(PowerState::V3_3).unwrap();
    let profile = FlashCartProfile::from_json(AGB_PROFILE).unwrap();

    let result = flash_program(
        &mut dev,
        &profile,
        &agb_image(0x8000),
        &FlashOptions::default(),
        &mut NoProgress,
        &CancelToken::new(),
    );
    let err = result.unwrap_err();
    assert!(matches!(err, Error::EraseTimeout { attempts: 10 }));
    assert!(err.to_string().contains("check the selected cartridge type"));

    let emu = dev.transport();
    // two identifier words, then exactly the configured polls
    assert_eq!(emu.read_count(), 2 + 10);
    assert_eq!(emu.host_sleep_us(), 9 * 100_000 + 100_000);
    assert_eq!(emu.writes().last(), Some(&(0, 0xF0)));
}

#[test]
fn test_cancel_mid_program_aborts_and_resets() {
    let mut dev = device(agb_flash_config(AmdFlashConfig::agb(4 * 1024 * 1024)));
    dev.set_power(PowerState::V3_3).unwrap();
    let profile = FlashCartProfile::from_json(AGB_PROFILE).unwrap();
    let image = agb_image(0x8000);
    let cancel = CancelToken::new();
    let mut progress = CancelAt {
        cancel: &cancel,
        at: 5000,
    };

    let outcome = flash_program(
        &mut dev,
        &profile,
        &image,
        &FlashOptions::default(),
        &mut progress,
        &cancel,
    )
    .unwrap();
    let report = match outcome {
        FlashOutcome::Aborted(report) => report,
        FlashOutcome::Completed(_) => panic!("flash was not cancelled"),
    };
    assert!(report.bytes_written >= 5000 && report.bytes_written < 0x8000);
    assert!(!report.verified);

    let emu = dev.transport();
    let written = report.bytes_written;
    assert_eq!(&emu.agb_rom_bytes()[..written], &image[..written]);
    assert!(emu.agb_rom()[written / 2..0x4000].iter().all(|&w| w == 0xFFFF));
    assert_eq!(emu.writes().last(), Some(&(0, 0xF0)));
}

#[test]
fn test_identifier_mismatch_is_not_fatal() {
    let mut chip = AmdFlashConfig::agb(1024 * 1024);
    chip.manufacturer = 0x00C2;
    let mut dev = device(agb_flash_config(chip));
    dev.set_power(PowerState::V3_3).unwrap();
    let profile = FlashCartProfile::from_json(AGB_PROFILE).unwrap();
    let options = FlashOptions {
        erase: EraseMode::Chip,
        verify: true,
        prefer_buffered: false,
    };
    let outcome = flash_program(
        &mut dev,
        &profile,
        &agb_image(0x100),
        &options,
        &mut NoProgress,
        &CancelToken::new(),
    )
    .unwrap();
    assert!(outcome.is_completed());
    assert_eq!(outcome.report().identifier_matched, Some(false));
}

#[test]
fn test_flash_gb_audio_pin_sectors() {
    let mut chip = AmdFlashConfig::dmg(0x20000);
    chip.sector_words = 0x10000;
    let config = EmuConfig {
        dmg_rom: Box::new(AmdFlash::new(chip)),
        dmg_write_pin: WritePin::Audio,
        ..EmuConfig::default()
    };
    let mut dev = device(config);
    dev.set_power(PowerState::V5).unwrap();

    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("dmg.ron"), DMG_PROFILE).unwrap();
    let mut db = ProfileDatabase::new();
    db.load_dir(dir.path()).unwrap();
    let profile = db.find_by_id(CartMode::Dmg, &[0x01, 0xA4])[0].clone();

    let image: Vec<u8> = (0..0x10100u32).map(|i| (i * 13 >> 3) as u8).collect();
    let outcome = flash_program(
        &mut dev,
        &profile,
        &image,
        &FlashOptions::default(),
        &mut NoProgress,
        &CancelToken::new(),
    )
    .unwrap();
    assert!(outcome.is_completed());
    let report = outcome.report();
    assert_eq!(report.sectors_erased, 2);
    assert!(!report.chip_erased);
    assert!(report.verified);
    assert_eq!(&dev.transport().dmg_rom_bytes()[..image.len()], &image[..]);
}

#[test]
fn test_batches_respect_transfer_limit() {
    let config = EmuConfig {
        max_transfer: 256,
        ..EmuConfig::default().with_agb_rom_image(&[0u8; 0x1000])
    };
    let mut dev = device(config);
    dev.set_power(PowerState::V3_3).unwrap();
    // every batch the pipeline sends is checked against the limit by the emulator
    let data = read_block(&mut dev, 0, 0x1000, WordEncoding::Base, &mut NoProgress, &CancelToken::new()).unwrap();
    assert_eq!(data.len(), 0x1000);
    assert!(dev.transport().batch_count() > 0x1000 / 256);
}
