// Delta compression.
//
// Provides a `Compressor` trait with three implementations:
//   - `Zstd`:     external zstd binary (preferred: fast, high ratio)
//   - `Gzip`:     in-process gzip via flate2 (always available)
//   - `Fallback`: uses the first compressor if it is available, else the
//                 second; callers see a single compressor either way
//
// The codec actually used is logged but is not part of the output contract.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;

use flate2::{Compression, GzBuilder};
use thiserror::Error;

use crate::context::JobContext;
use crate::tool::{self, Tool, ToolError};

const BUF_SIZE: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum CompressError {
    #[error("compression with {codec} failed: {source}")]
    Tool {
        codec: String,
        #[source]
        source: ToolError,
    },

    #[error("compression with {codec} failed: {source}")]
    Io {
        codec: String,
        #[source]
        source: io::Error,
    },
}

/// Compresses a file into another file.
pub trait Compressor {
    /// Codec name for logs.
    fn name(&self) -> String;

    /// Whether this compressor can run in the current environment.
    fn is_available(&self) -> bool {
        true
    }

    fn compress(&self, ctx: &JobContext, input: &Path, output: &Path) -> Result<(), CompressError>;
}

// ---------------------------------------------------------------------------
// zstd (external)
// ---------------------------------------------------------------------------

/// `zstd -q -f -<level> <input> -o <output>`
#[derive(Debug, Clone)]
pub struct Zstd {
    tool: Tool,
    level: u32,
}

impl Zstd {
    pub fn new(tool: Tool, level: u32) -> Self {
        Self { tool, level }
    }
}

impl Compressor for Zstd {
    fn name(&self) -> String {
        format!("zstd (level {})", self.level)
    }

    fn is_available(&self) -> bool {
        self.tool.is_available()
    }

    fn compress(&self, ctx: &JobContext, input: &Path, output: &Path) -> Result<(), CompressError> {
        let wrap = |source| CompressError::Tool {
            codec: self.name(),
            source,
        };
        let mut cmd = self.tool.command().map_err(wrap)?;
        cmd.args(["-q", "-f"])
            .arg(format!("-{}", self.level))
            .arg(input)
            .arg("-o")
            .arg(output);
        tool::run(ctx, "Compress with zstd", &mut cmd).map_err(wrap)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// gzip (in-process)
// ---------------------------------------------------------------------------

/// Gzip via flate2. The header carries no file name and a zero mtime, so
/// output depends only on input bytes and level.
#[derive(Debug, Clone, Copy)]
pub struct Gzip {
    level: u32,
}

impl Gzip {
    /// Create a gzip compressor with the given level (0-9).
    pub fn new(level: u32) -> Self {
        Self {
            level: level.min(9),
        }
    }
}

impl Default for Gzip {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_GZIP_LEVEL)
    }
}

impl Compressor for Gzip {
    fn name(&self) -> String {
        format!("gzip (level {})", self.level)
    }

    fn compress(&self, ctx: &JobContext, input: &Path, output: &Path) -> Result<(), CompressError> {
        ctx.log().info(format!(
            "Compressing {} with {}",
            input.display(),
            self.name()
        ));
        let wrap = |source| CompressError::Io {
            codec: self.name(),
            source,
        };

        let mut reader = BufReader::with_capacity(BUF_SIZE, File::open(input).map_err(wrap)?);
        let writer = BufWriter::with_capacity(BUF_SIZE, File::create(output).map_err(wrap)?);
        let mut encoder = GzBuilder::new()
            .mtime(0)
            .write(writer, Compression::new(self.level));
        io::copy(&mut reader, &mut encoder).map_err(wrap)?;
        encoder.finish().map_err(wrap)?.flush().map_err(wrap)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fallback
// ---------------------------------------------------------------------------

/// Prefers one compressor and transparently falls back to another when the
/// preferred one is unavailable. A preferred compressor that is available
/// but fails is an error; there is no retry with the fallback.
pub struct Fallback {
    preferred: Box<dyn Compressor>,
    fallback: Box<dyn Compressor>,
}

impl Fallback {
    pub fn new(preferred: Box<dyn Compressor>, fallback: Box<dyn Compressor>) -> Self {
        Self {
            preferred,
            fallback,
        }
    }

    /// zstd at `zstd_level`, else gzip at `gzip_level`.
    pub fn zstd_or_gzip(zstd: Tool, zstd_level: u32, gzip_level: u32) -> Self {
        Self::new(
            Box::new(Zstd::new(zstd, zstd_level)),
            Box::new(Gzip::new(gzip_level)),
        )
    }

    /// The compressor that `compress` would use right now.
    pub fn select(&self) -> &dyn Compressor {
        if self.preferred.is_available() {
            self.preferred.as_ref()
        } else {
            self.fallback.as_ref()
        }
    }
}

impl Compressor for Fallback {
    fn name(&self) -> String {
        self.select().name()
    }

    fn is_available(&self) -> bool {
        self.preferred.is_available() || self.fallback.is_available()
    }

    fn compress(&self, ctx: &JobContext, input: &Path, output: &Path) -> Result<(), CompressError> {
        if !self.preferred.is_available() {
            ctx.log().warn(format!(
                "{} not available, using {}",
                self.preferred.name(),
                self.fallback.name()
            ));
            return self.fallback.compress(ctx, input, output);
        }
        ctx.log().info(format!(
            "Compressing {} with {}",
            input.display(),
            self.preferred.name()
        ));
        self.preferred.compress(ctx, input, output)
    }
}
