//! Programming method selection
//!
//! Buffered programming is only attempted for command templates that match
//! a known chip family exactly. Anything else is rejected before the bus is
//! touched.

use super::profile::{FlashCartProfile, Operand, Step, WriteOp};
use crate::error::{Error, Result};
use std::fmt;

use Operand::{BufferSize as BS, ProgramAddr as PA, ProgramData as PD, Value as V};

const SA: Operand = Operand::SectorAddr(0);

/// Unlock address pairs used by AMD-style chips and their byte-mode wiring
const UNLOCK_PAIRS: [(u32, u32); 3] = [(0x555, 0x2AA), (0xAAA, 0x555), (0x5555, 0x2AAA)];

/// Recognized buffered write command sets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferedMethod {
    /// AMD/Spansion write-to-buffer (0x25 ... 0x29)
    Amd,
    /// Interleaved pair of AMD chips with D0/D1 swapped (0xA9/0x56, 0x26 ... 0x2A)
    Interleaved,
    /// Intel/Sharp write-to-buffer (0xE8 ... 0xD0)
    Intel,
}

impl BufferedMethod {
    /// Classify a buffer_write template
    pub fn classify(sequence: &[Step]) -> Option<Self> {
        let w = Step::write;
        for (u1, u2) in UNLOCK_PAIRS {
            let amd = [
                w(V(u1), V(0xAA)),
                w(V(u2), V(0x55)),
                w(SA, V(0x25)),
                w(SA, BS),
                w(PA, PD),
                w(SA, V(0x29)),
            ];
            if sequence == amd {
                return Some(BufferedMethod::Amd);
            }
        }
        let interleaved = [
            w(V(0xAAA), V(0xA9)),
            w(V(0x555), V(0x56)),
            w(SA, V(0x26)),
            w(SA, BS),
            w(PA, PD),
            w(SA, V(0x2A)),
        ];
        if sequence == interleaved {
            return Some(BufferedMethod::Interleaved);
        }
        let intel = [
            w(SA, V(0xE8)),
            w(SA, BS),
            w(PA, PD),
            w(SA, V(0xD0)),
            w(SA, V(0xFF)),
        ];
        if sequence == intel {
            return Some(BufferedMethod::Intel);
        }
        None
    }

    /// Fixed buffer size in bytes, if the family mandates one
    pub fn fixed_buffer_size(self) -> Option<u32> {
        match self {
            BufferedMethod::Amd => None,
            BufferedMethod::Interleaved => Some(256),
            BufferedMethod::Intel => Some(32),
        }
    }
}

impl fmt::Display for BufferedMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferedMethod::Amd => write!(f, "AMD buffered"),
            BufferedMethod::Interleaved => write!(f, "interleaved buffered"),
            BufferedMethod::Intel => write!(f, "Intel buffered"),
        }
    }
}

/// How words are programmed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramMethod {
    /// One command sequence per word
    Single,
    /// One command sequence per buffer
    Buffered {
        /// Matched template
        method: BufferedMethod,
        /// Buffer size in bytes
        buffer_size: u32,
    },
}

impl fmt::Display for ProgramMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgramMethod::Single => write!(f, "single-word"),
            ProgramMethod::Buffered { method, buffer_size } => {
                write!(f, "{} ({} bytes)", method, buffer_size)
            }
        }
    }
}

impl ProgramMethod {
    /// Pick the programming method for `profile`
    ///
    /// Buffered programming is used when the profile has a buffer_write
    /// template and either `prefer_buffered` is set or there is no
    /// single_write. Returns the matching command set with the method.
    pub fn select(profile: &FlashCartProfile, prefer_buffered: bool) -> Result<(Self, &WriteOp)> {
        let buffered = profile
            .buffer_write
            .as_ref()
            .filter(|_| prefer_buffered || profile.single_write.is_none());
        if let Some(op) = buffered {
            let method = BufferedMethod::classify(&op.sequence).ok_or_else(|| {
                Error::UnsupportedFlashMethod(format!(
                    "buffer_write template of '{}' matches no known chip family",
                    profile.name()
                ))
            })?;
            let buffer_size = match (method.fixed_buffer_size(), profile.buffer_size) {
                (Some(fixed), Some(declared)) if fixed != declared => {
                    return Err(Error::UnsupportedFlashMethod(format!(
                        "{} requires a {} byte buffer, profile declares {}",
                        method, fixed, declared
                    )))
                }
                (Some(fixed), _) => fixed,
                (None, Some(declared)) => declared,
                (None, None) => {
                    return Err(Error::UnsupportedFlashMethod(format!(
                        "{} needs buffer_size",
                        method
                    )))
                }
            };
            if buffer_size == 0 || buffer_size % profile.cart_type.word_bytes() != 0 {
                return Err(Error::UnsupportedFlashMethod(format!(
                    "buffer_size {} is not a whole number of bus words",
                    buffer_size
                )));
            }
            return Ok((ProgramMethod::Buffered { method, buffer_size }, op));
        }
        match &profile.single_write {
            Some(op) => Ok((ProgramMethod::Single, op)),
            None => Err(Error::UnsupportedFlashMethod(format!(
                "'{}' has no usable write command",
                profile.name()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn w(addr: Operand, data: Operand) -> Step {
        Step::write(addr, data)
    }

    #[test]
    fn test_classify_templates() {
        let amd = [
            w(V(0xAAA), V(0xAA)),
            w(V(0x555), V(0x55)),
            w(SA, V(0x25)),
            w(SA, BS),
            w(PA, PD),
            w(SA, V(0x29)),
        ];
        assert_eq!(BufferedMethod::classify(&amd), Some(BufferedMethod::Amd));

        let intel = [
            w(SA, V(0xE8)),
            w(SA, BS),
            w(PA, PD),
            w(SA, V(0xD0)),
            w(SA, V(0xFF)),
        ];
        assert_eq!(BufferedMethod::classify(&intel), Some(BufferedMethod::Intel));

        let interleaved = [
            w(V(0xAAA), V(0xA9)),
            w(V(0x555), V(0x56)),
            w(SA, V(0x26)),
            w(SA, BS),
            w(PA, PD),
            w(SA, V(0x2A)),
        ];
        assert_eq!(
            BufferedMethod::classify(&interleaved),
            Some(BufferedMethod::Interleaved)
        );
    }

    #[test]
    fn test_near_miss_is_rejected() {
        // AMD template with the wrong confirm byte
        let almost = [
            w(V(0x555), V(0xAA)),
            w(V(0x2AA), V(0x55)),
            w(SA, V(0x25)),
            w(SA, BS),
            w(PA, PD),
            w(SA, V(0x30)),
        ];
        assert_eq!(BufferedMethod::classify(&almost), None);
        // mixed unlock pairs
        let mixed = [
            w(V(0x555), V(0xAA)),
            w(V(0x555), V(0x55)),
            w(SA, V(0x25)),
            w(SA, BS),
            w(PA, PD),
            w(SA, V(0x29)),
        ];
        assert_eq!(BufferedMethod::classify(&mixed), None);
        assert_eq!(BufferedMethod::classify(&[]), None);
    }

    fn profile(buffer_write: &str, extra: &str) -> FlashCartProfile {
        FlashCartProfile::from_json(&format!(
            r#"{{
                "type": "AGB",
                "names": ["buffered"],
                "voltage": 3.3,
                "flash_size": "0x10000",
                {}
                "commands": {{
                    "single_write": {{ "sequence": [["0x555", "0xA0"], ["PA", "PD"]] }},
                    "buffer_write": {{ "sequence": {} }}
                }}
            }}"#,
            extra, buffer_write
        ))
        .unwrap()
    }

    #[test]
    fn test_select_method() {
        let amd = r#"[["0x555", "0xAA"], ["0x2AA", "0x55"], ["SA", "0x25"], ["SA", "BS"], ["PA", "PD"], ["SA", "0x29"]]"#;
        let p = profile(amd, r#""buffer_size": 64,"#);
        let (method, _) = ProgramMethod::select(&p, true).unwrap();
        assert_eq!(
            method,
            ProgramMethod::Buffered {
                method: BufferedMethod::Amd,
                buffer_size: 64
            }
        );
        assert_eq!(ProgramMethod::select(&p, false).unwrap().0, ProgramMethod::Single);

        // AMD without a declared buffer size
        let p = profile(amd, "");
        assert!(matches!(
            ProgramMethod::select(&p, true),
            Err(Error::UnsupportedFlashMethod(_))
        ));

        let odd = r#"[["0x555", "0xAA"], ["SA", "0x25"], ["SA", "BS"], ["PA", "PD"], ["SA", "0x29"]]"#;
        let p = profile(odd, r#""buffer_size": 64,"#);
        assert!(matches!(
            ProgramMethod::select(&p, true),
            Err(Error::UnsupportedFlashMethod(_))
        ));
    }

    #[test]
    fn test_intel_buffer_size_fixed() {
        let intel = r#"[["SA", "0xE8"], ["SA", "BS"], ["PA", "PD"], ["SA", "0xD0"], ["SA", "0xFF"]]"#;
        let p = profile(intel, "");
        assert_eq!(
            ProgramMethod::select(&p, true).unwrap().0,
            ProgramMethod::Buffered {
                method: BufferedMethod::Intel,
                buffer_size: 32
            }
        );
        let p = profile(intel, r#""buffer_size": 64,"#);
        assert!(ProgramMethod::select(&p, true).is_err());
    }
}
