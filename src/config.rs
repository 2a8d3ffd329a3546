// Job configuration.
//
// Every tunable of a delta job lives in `DeltaConfig`. The CLI fills it from
// flags; library users construct it directly or start from `Default`.

use std::ffi::OsString;

/// Name of the SWUpdate descriptor that must be the first archive member.
pub const DEFAULT_CONTROL_MEMBER: &str = "sw-description";

/// zstd level used for the delta when zstd is available.
pub const DEFAULT_ZSTD_LEVEL: u32 = 3;

/// gzip level used when falling back from zstd.
pub const DEFAULT_GZIP_LEVEL: u32 = 6;

/// On-disk CPIO header variant used when rebuilding an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArchiveFormat {
    /// SVR4 with per-member byte-sum checksum (`070702`). SWUpdate's format.
    #[default]
    Crc,
    /// SVR4 without checksum (`070701`).
    Newc,
}

impl ArchiveFormat {
    /// Name understood by `cpio -H`.
    pub fn cpio_name(self) -> &'static str {
        match self {
            Self::Crc => "crc",
            Self::Newc => "newc",
        }
    }
}

/// Which implementation performs archive listing, extraction and rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArchiveBackend {
    /// GNU `cpio` invoked as an external process.
    #[default]
    External,
    /// The in-process CPIO codec in `archive::newc`.
    Native,
}

/// Programs invoked by the external adapters (names resolved on `PATH`, or paths).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    pub cpio: OsString,
    pub bsdiff: OsString,
    pub zstd: OsString,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            cpio: "cpio".into(),
            bsdiff: "bsdiff".into(),
            zstd: "zstd".into(),
        }
    }
}

/// Configuration for one delta job.
#[derive(Debug, Clone)]
pub struct DeltaConfig {
    /// Member that must come first in a rebuilt archive.
    pub control_member: String,
    /// Move a misplaced control member to position 0. When off, a misplaced
    /// control member is only reported.
    pub enforce_control_first: bool,
    pub archive_backend: ArchiveBackend,
    pub archive_format: ArchiveFormat,
    pub tools: ToolPaths,
    pub zstd_level: u32,
    pub gzip_level: u32,
}

impl Default for DeltaConfig {
    fn default() -> Self {
        Self {
            control_member: DEFAULT_CONTROL_MEMBER.to_string(),
            enforce_control_first: true,
            archive_backend: ArchiveBackend::External,
            archive_format: ArchiveFormat::Crc,
            tools: ToolPaths::default(),
            zstd_level: DEFAULT_ZSTD_LEVEL,
            gzip_level: DEFAULT_GZIP_LEVEL,
        }
    }
}
