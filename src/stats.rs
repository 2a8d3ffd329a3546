// Delta statistics and the persisted plain-text report.

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::Path;

const MIB: f64 = 1024.0 * 1024.0;

/// Sizes of the (source, effective target, delta) triple actually used.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Statistics {
    pub source_size: u64,
    pub target_size: u64,
    pub diff_size: u64,
    /// `100 * diff_size / target_size`, or 0 for an empty target.
    pub compression_ratio: f64,
    /// `target_size - diff_size`; negative when the delta is larger.
    pub space_saved: i64,
}

impl Statistics {
    pub fn from_sizes(source_size: u64, target_size: u64, diff_size: u64) -> Self {
        let compression_ratio = if target_size > 0 {
            diff_size as f64 / target_size as f64 * 100.0
        } else {
            0.0
        };
        Self {
            source_size,
            target_size,
            diff_size,
            compression_ratio,
            space_saved: target_size as i64 - diff_size as i64,
        }
    }

    /// Measure the three files on disk.
    pub fn measure(source: &Path, target: &Path, diff: &Path) -> io::Result<Self> {
        Ok(Self::from_sizes(
            fs::metadata(source)?.len(),
            fs::metadata(target)?.len(),
            fs::metadata(diff)?.len(),
        ))
    }

    /// Render the fixed five-metric report.
    pub fn render_report(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Delta Generation Statistics");
        let _ = writeln!(out, "===========================");
        let _ = writeln!(out);
        let _ = writeln!(out, "Source size: {}", bytes_and_mib(self.source_size));
        let _ = writeln!(out, "Target size: {}", bytes_and_mib(self.target_size));
        let _ = writeln!(out, "Delta size:  {}", bytes_and_mib(self.diff_size));
        let _ = writeln!(out, "Compression: {:.2}% of target", self.compression_ratio);
        let _ = writeln!(
            out,
            "Space saved: {} bytes",
            group_thousands(self.space_saved.into())
        );
        out
    }

    /// Write the report to `path`, replacing any previous report.
    pub fn write_report(&self, path: &Path) -> io::Result<()> {
        fs::write(path, self.render_report())
    }
}

/// `1,234,567 bytes (1.18 MB)`
pub fn bytes_and_mib(size: u64) -> String {
    format!(
        "{} bytes ({:.2} MB)",
        group_thousands(size.into()),
        size as f64 / MIB
    )
}

/// Format an integer with `,` between groups of three digits.
pub fn group_thousands(value: i128) -> String {
    let digits = value.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if value < 0 {
        out.push('-');
    }
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

// ---------------------------------------------------------------------------
// Digests
// ---------------------------------------------------------------------------

/// Streaming SHA-256 of a file.
#[cfg(feature = "file-io")]
pub fn sha256_file(path: &Path) -> io::Result<[u8; 32]> {
    use sha2::{Digest, Sha256};
    use std::io::Read;

    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().into())
}

/// Lowercase hex rendering of a digest.
pub fn hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}
