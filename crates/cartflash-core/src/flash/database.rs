//! Profile database for runtime loading and lookup

use std::fs;
use std::path::Path;

use super::profile::FlashCartProfile;
use crate::error::{Error, Result};
use crate::power::CartMode;

/// Profile file format, chosen by extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileFormat {
    /// `.json`
    Json,
    /// `.ron`
    Ron,
}

impl ProfileFormat {
    /// Format for `path`, if it has a known extension
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "json" => Some(ProfileFormat::Json),
            "ron" => Some(ProfileFormat::Ron),
            _ => None,
        }
    }
}

/// Collection of flash cartridge profiles
#[derive(Debug, Clone, Default)]
pub struct ProfileDatabase {
    profiles: Vec<FlashCartProfile>,
}

impl ProfileDatabase {
    /// Create an empty database
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one profile from a string and add it
    pub fn load_str(&mut self, content: &str, format: ProfileFormat) -> Result<&FlashCartProfile> {
        let profile = match format {
            ProfileFormat::Json => FlashCartProfile::from_json(content)?,
            ProfileFormat::Ron => FlashCartProfile::from_ron(content)?,
        };
        log::debug!("Loaded profile '{}'", profile.name());
        self.profiles.push(profile);
        Ok(&self.profiles[self.profiles.len() - 1])
    }

    /// Load a profile file
    pub fn load_file(&mut self, path: &Path) -> Result<&FlashCartProfile> {
        let format = ProfileFormat::from_path(path).ok_or_else(|| {
            Error::Profile(format!("{}: expected a .json or .ron file", path.display()))
        })?;
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Profile(format!("{}: {}", path.display(), e)))?;
        self.load_str(&content, format)
            .map_err(|e| Error::Profile(format!("{}: {}", path.display(), e)))
    }

    /// Load every `.json` and `.ron` file in `dir`, returning the count
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize> {
        let io = |e: std::io::Error| Error::Profile(format!("{}: {}", dir.display(), e));
        let mut paths = Vec::new();
        for entry in fs::read_dir(dir).map_err(io)? {
            let path = entry.map_err(io)?.path();
            if path.is_file() && ProfileFormat::from_path(&path).is_some() {
                paths.push(path);
            }
        }
        // stable listing order
        paths.sort();
        for path in &paths {
            self.load_file(path)?;
        }
        Ok(paths.len())
    }

    /// All profiles in load order
    pub fn profiles(&self) -> &[FlashCartProfile] {
        &self.profiles
    }

    /// Number of profiles
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    /// Check if the database is empty
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Find profiles by name (case-insensitive partial match)
    pub fn find_by_name(&self, name: &str) -> Vec<&FlashCartProfile> {
        let needle = name.to_lowercase();
        self.profiles
            .iter()
            .filter(|p| p.names.iter().any(|n| n.to_lowercase().contains(&needle)))
            .collect()
    }

    /// Find the profile with exactly this name (case-insensitive)
    pub fn find_exact(&self, name: &str) -> Option<&FlashCartProfile> {
        self.profiles
            .iter()
            .find(|p| p.names.iter().any(|n| n.eq_ignore_ascii_case(name)))
    }

    /// Find profiles of `mode` whose identifier matches `id`
    pub fn find_by_id(&self, mode: CartMode, id: &[u8]) -> Vec<&FlashCartProfile> {
        self.profiles
            .iter()
            .filter(|p| p.cart_type == mode && p.matches_id(id))
            .collect()
    }

    /// Iterate over all profiles
    pub fn iter(&self) -> impl Iterator<Item = &FlashCartProfile> {
        self.profiles.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JSON: &str = r#"{
        "type": "AGB",
        "names": ["MSP55LV128 (16 MiB)", "MSP55LV128M"],
        "flash_ids": [[2, 0, "0x7D", "0x22"]],
        "voltage": 3.3,
        "flash_size": "0x1000000",
        "commands": {
            "reset": [[0, "0xF0"]],
            "chip_erase": {
                "sequence": [["0x555", "0xAA"], ["0x2AA", "0x55"], ["0x555", "0x80"],
                             ["0x555", "0xAA"], ["0x2AA", "0x55"], ["0x555", "0x10"]],
                "wait_for": {"addr": 0, "mask": "0xFFFF", "value": "0xFFFF"},
                "timeout_s": 200
            },
            "single_write": {
                "sequence": [["0x555", "0xAA"], ["0x2AA", "0x55"], ["0x555", "0xA0"], ["PA", "PD"]]
            }
        }
    }"#;

    const RON: &str = r#"(
        type: "DMG",
        names: ["Generic 29LV AUDIO"],
        flash_ids: [[1, "0x23"]],
        voltage: 5,
        flash_size: "0x200000",
        write_pin: "AUDIO",
        commands: (
            reset: [[0, "0xF0"]],
            single_write: (
                sequence: [["0xAAA", "0xAA"], ["0x555", "0x55"], ["0xAAA", "0xA0"], ["PA", "PD"]],
            ),
        ),
    )"#;

    #[test]
    fn test_load_dir_mixed_formats() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("msp.json"), JSON).unwrap();
        fs::write(dir.path().join("generic.ron"), RON).unwrap();
        fs::write(dir.path().join("README.txt"), "not a profile").unwrap();

        let mut db = ProfileDatabase::new();
        assert_eq!(db.load_dir(dir.path()).unwrap(), 2);
        assert_eq!(db.len(), 2);
        // sorted by file name
        assert_eq!(db.profiles()[0].name(), "Generic 29LV AUDIO");

        assert_eq!(db.find_by_name("msp55").len(), 1);
        assert!(db.find_exact("msp55lv128m").is_some());
        assert!(db.find_exact("msp55").is_none());
        assert_eq!(db.find_by_id(CartMode::Agb, &[2, 0, 0x7D, 0x22]).len(), 1);
        assert!(db.find_by_id(CartMode::Dmg, &[2, 0, 0x7D, 0x22]).is_empty());
        assert_eq!(db.find_by_id(CartMode::Dmg, &[1, 0x23]).len(), 1);
    }

    #[test]
    fn test_load_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ \"type\": \"AGB\" }").unwrap();
        let err = ProfileDatabase::new().load_file(&path).unwrap_err();
        assert!(err.to_string().contains("broken.json"));

        let err = ProfileDatabase::new()
            .load_file(&dir.path().join("profile.toml"))
            .unwrap_err();
        assert!(matches!(err, Error::Profile(_)));
    }
}
