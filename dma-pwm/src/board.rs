//! Board identification and peripheral base addresses.
//!
//! Parses the `Revision` line of `/proc/cpuinfo` and matches it against the
//! table of known revision strings to pick a coarse SoC family, which in turn
//! selects the peripheral physical base address used for every `mmap` in the
//! crate. The revision table is recovered verbatim from the original
//! `get_pi_version.c`.

use std::fs;
use std::path::Path;

use crate::error::{PwmError, PwmResult};

/// Coarse SoC family, closed over the four peripheral base addresses the rest
/// of the crate needs. No extensibility beyond this is required.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardFamily {
    /// Pi Zero (v0 in the original numbering).
    Zero,
    /// Classic BCM2835 boards (Model A/B and derivatives, v1).
    Bcm2835,
    /// BCM2836/2837 Pi 2 (v2).
    Bcm2836_7Pi2,
    /// BCM2837 Pi 3 (v3).
    Bcm2837Pi3,
    /// BCM2711 Pi 4 (v4).
    Bcm2711,
}

impl BoardFamily {
    /// Legacy integer version number (0..=4) used by the original library.
    pub fn legacy_version(self) -> u8 {
        match self {
            BoardFamily::Zero => 0,
            BoardFamily::Bcm2835 => 1,
            BoardFamily::Bcm2836_7Pi2 => 2,
            BoardFamily::Bcm2837Pi3 => 3,
            BoardFamily::Bcm2711 => 4,
        }
    }

    /// Human-readable SoC name, for logging and `Debug` output only.
    pub fn soc_name(self) -> &'static str {
        match self {
            BoardFamily::Zero | BoardFamily::Bcm2835 => "BCM2835",
            BoardFamily::Bcm2836_7Pi2 | BoardFamily::Bcm2837Pi3 => "BCM2836/7",
            BoardFamily::Bcm2711 => "BCM2711",
        }
    }

    /// Physical peripheral base address for this family.
    pub fn peripheral_base(self) -> u64 {
        match self {
            BoardFamily::Zero | BoardFamily::Bcm2835 => 0x2000_0000,
            BoardFamily::Bcm2836_7Pi2 | BoardFamily::Bcm2837Pi3 => 0x3F00_0000,
            BoardFamily::Bcm2711 => 0xFE00_0000,
        }
    }
}

/// DMA/GPU bus alias of every peripheral, regardless of family.
pub const BUS_BASE: u64 = 0x7E00_0000;

/// Fixed peripheral offsets from the family's physical base.
pub mod offset {
    pub const GPIO: u64 = 0x0020_0000;
    pub const DMA: u64 = 0x0000_7000;
    pub const PWM: u64 = 0x0020_C000;
    pub const CLOCK_MANAGER: u64 = 0x0010_1000;
}

/// One page, the length every peripheral window is mapped with.
pub const PAGE_SIZE: usize = 4096;

struct RevisionEntry {
    revision: &'static str,
    family: BoardFamily,
}

/// Revision table recovered verbatim from the original implementation's
/// `get_pi_version.c`.
const REVISION_TABLE: &[RevisionEntry] = &[
    RevisionEntry { revision: "0002", family: BoardFamily::Bcm2835 },
    RevisionEntry { revision: "0003", family: BoardFamily::Bcm2835 },
    RevisionEntry { revision: "0004", family: BoardFamily::Bcm2835 },
    RevisionEntry { revision: "0005", family: BoardFamily::Bcm2835 },
    RevisionEntry { revision: "0006", family: BoardFamily::Bcm2835 },
    RevisionEntry { revision: "0007", family: BoardFamily::Bcm2835 },
    RevisionEntry { revision: "0008", family: BoardFamily::Bcm2835 },
    RevisionEntry { revision: "0009", family: BoardFamily::Bcm2835 },
    RevisionEntry { revision: "000d", family: BoardFamily::Bcm2835 },
    RevisionEntry { revision: "000e", family: BoardFamily::Bcm2835 },
    RevisionEntry { revision: "000f", family: BoardFamily::Bcm2835 },
    RevisionEntry { revision: "0010", family: BoardFamily::Bcm2835 },
    RevisionEntry { revision: "0013", family: BoardFamily::Bcm2835 },
    RevisionEntry { revision: "900032", family: BoardFamily::Bcm2835 },
    RevisionEntry { revision: "0012", family: BoardFamily::Bcm2835 },
    RevisionEntry { revision: "0015", family: BoardFamily::Bcm2835 },
    RevisionEntry { revision: "a01041", family: BoardFamily::Bcm2836_7Pi2 },
    RevisionEntry { revision: "a21041", family: BoardFamily::Bcm2836_7Pi2 },
    RevisionEntry { revision: "a22042", family: BoardFamily::Bcm2836_7Pi2 },
    RevisionEntry { revision: "900092", family: BoardFamily::Zero },
    RevisionEntry { revision: "900093", family: BoardFamily::Zero },
    RevisionEntry { revision: "9000c1", family: BoardFamily::Zero },
    RevisionEntry { revision: "a02082", family: BoardFamily::Bcm2837Pi3 },
    RevisionEntry { revision: "a22082", family: BoardFamily::Bcm2837Pi3 },
    RevisionEntry { revision: "a020d3", family: BoardFamily::Bcm2837Pi3 },
    RevisionEntry { revision: "a03111", family: BoardFamily::Bcm2711 },
    RevisionEntry { revision: "b03111", family: BoardFamily::Bcm2711 },
    RevisionEntry { revision: "c03111", family: BoardFamily::Bcm2711 },
];

/// Match a `/proc/cpuinfo` revision string against [`REVISION_TABLE`].
///
/// Matching is substring-based, lower-cased on both sides, mirroring the
/// original `strstr` lookup but tolerant of the mixed-case hex some firmware
/// revisions emit.
fn family_from_revision(revision: &str) -> PwmResult<BoardFamily> {
    let needle = revision.trim().to_ascii_lowercase();
    REVISION_TABLE
        .iter()
        .find(|entry| needle.contains(entry.revision))
        .map(|entry| entry.family)
        .ok_or(PwmError::NoPiVersion)
}

/// Read the `Revision` line out of `/proc/cpuinfo` and resolve its board family.
///
/// Fails with [`PwmError::NoPiVersion`] if the file has no `Revision` line or
/// the revision string matches nothing in [`REVISION_TABLE`]. The original C
/// loop could fall through with `version` left uninitialized; that can't
/// happen here since the lookup is `Result`-typed.
pub fn detect_board_family() -> PwmResult<BoardFamily> {
    detect_board_family_from(Path::new("/proc/cpuinfo"))
}

fn detect_board_family_from(path: &Path) -> PwmResult<BoardFamily> {
    let contents = fs::read_to_string(path).map_err(|_| PwmError::NoPiVersion)?;
    let revision_line = contents
        .lines()
        .find(|line| line.contains("Revision"))
        .ok_or(PwmError::NoPiVersion)?;
    let revision = revision_line
        .split_once(": ")
        .map(|(_, rest)| rest)
        .ok_or(PwmError::NoPiVersion)?;
    family_from_revision(revision)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write as _;

    #[test]
    fn matches_pi3_revision() {
        assert_eq!(family_from_revision("a02082"), Ok(BoardFamily::Bcm2837Pi3));
    }

    #[test]
    fn matches_pi4_revision() {
        assert_eq!(family_from_revision("c03111"), Ok(BoardFamily::Bcm2711));
    }

    #[test]
    fn matches_mixed_case_revision() {
        assert_eq!(family_from_revision("C03111"), Ok(BoardFamily::Bcm2711));
    }

    #[test]
    fn unknown_revision_is_no_pi_version() {
        assert_eq!(family_from_revision("ffffff"), Err(PwmError::NoPiVersion));
    }

    #[test]
    fn peripheral_bases_match_known_families() {
        assert_eq!(BoardFamily::Bcm2835.peripheral_base(), 0x2000_0000);
        assert_eq!(BoardFamily::Bcm2836_7Pi2.peripheral_base(), 0x3F00_0000);
        assert_eq!(BoardFamily::Bcm2837Pi3.peripheral_base(), 0x3F00_0000);
        assert_eq!(BoardFamily::Bcm2711.peripheral_base(), 0xFE00_0000);
    }

    #[test]
    fn parses_full_cpuinfo_line() {
        let file = tempfile_with_contents(
            "processor\t: 0\nmodel name\t: ARMv7\nRevision\t: a020d3\n",
        );
        let family = detect_board_family_from(file.path()).unwrap();
        assert_eq!(family, BoardFamily::Bcm2837Pi3);
    }

    fn tempfile_with_contents(contents: &str) -> NamedTempFile {
        let file = NamedTempFile::new();
        (&file.0).write_all(contents.as_bytes()).unwrap();
        file
    }

    /// Minimal stand-in for a temp file so this module has no dev-dependency
    /// beyond the standard library.
    struct NamedTempFile(fs::File, std::path::PathBuf);

    impl NamedTempFile {
        fn new() -> Self {
            let path = std::env::temp_dir().join(format!(
                "dma-pwm-test-cpuinfo-{}-{:?}",
                std::process::id(),
                std::thread::current().id()
            ));
            let file = fs::File::create(&path).unwrap();
            Self(file, path)
        }

        fn path(&self) -> &Path {
            &self.1
        }
    }

    impl Drop for NamedTempFile {
        fn drop(&mut self) {
            let _ = fs::remove_file(&self.1);
        }
    }
}
