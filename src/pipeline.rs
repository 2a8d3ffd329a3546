// Delta job controller.
//
// One job turns a (source, target) archive pair into a compressed delta:
//
//   Start -> SizeProbe -> Recompress | SkipRecompress -> Diff -> Compress
//         -> Statistics -> Done
//
// with `Failed` reachable from Diff and Compress. A failed recompression is
// a recoverable degradation: the job diffs against the original target.
// Statistics are best-effort. Jobs are one-shot; a failed job is rerun from
// the start by the caller.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::archive::cpio_tool::CpioTool;
use crate::archive::newc::NativeCpio;
use crate::archive::{ArchiveBuilder, Extractor, Lister, OrderPolicy};
use crate::compress::{CompressError, Compressor, Fallback};
use crate::config::{ArchiveBackend, DeltaConfig};
use crate::context::JobContext;
use crate::diff::{BinaryDiffer, Bsdiff, DiffError};
use crate::repack::{RepackReport, Repackager};
use crate::stats::{self, Statistics};
use crate::tool::Tool;

/// File name of the uncompressed patch inside the working directory.
const RAW_DIFF_NAME: &str = "swu.diff";

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

/// Pipeline states, in the order a successful job visits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    SizeProbe,
    Recompress,
    SkipRecompress,
    Diff,
    Compress,
    Statistics,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Start => "start",
            Self::SizeProbe => "size probe",
            Self::Recompress => "recompress",
            Self::SkipRecompress => "skip recompress",
            Self::Diff => "diff",
            Self::Compress => "compress",
            Self::Statistics => "statistics",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum JobError {
    #[error("cannot prepare job directories: {0}")]
    Setup(#[source] io::Error),

    #[error(transparent)]
    Diff(#[from] DiffError),

    #[error(transparent)]
    Compress(#[from] CompressError),
}

impl JobError {
    /// The stage at which the job entered `Failed`.
    pub fn stage(&self) -> Stage {
        match self {
            Self::Setup(_) => Stage::Start,
            Self::Diff(_) => Stage::Diff,
            Self::Compress(_) => Stage::Compress,
        }
    }
}

// ---------------------------------------------------------------------------
// Paths, toolchain and report
// ---------------------------------------------------------------------------

/// The files and directories a job reads and writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPaths {
    pub source: PathBuf,
    pub target: PathBuf,
    pub output_diff: PathBuf,
    pub log_dir: PathBuf,
    pub work_dir: PathBuf,
    /// When set, the target is rebuilt here before diffing.
    pub recompressed_output: Option<PathBuf>,
}

/// The capability backends a job runs with.
pub struct Toolchain {
    pub lister: Box<dyn Lister>,
    pub extractor: Box<dyn Extractor>,
    pub builder: Box<dyn ArchiveBuilder>,
    pub differ: Box<dyn BinaryDiffer>,
    pub compressor: Box<dyn Compressor>,
}

impl Toolchain {
    /// Backends selected by `config`: cpio or the native codec for archives,
    /// bsdiff for diffing, zstd with gzip fallback for compression.
    pub fn from_config(config: &DeltaConfig) -> Self {
        let (lister, extractor, builder): (
            Box<dyn Lister>,
            Box<dyn Extractor>,
            Box<dyn ArchiveBuilder>,
        ) = match config.archive_backend {
            ArchiveBackend::External => {
                let cpio = CpioTool::new(Tool::new(&config.tools.cpio), config.archive_format);
                (
                    Box::new(cpio.clone()),
                    Box::new(cpio.clone()),
                    Box::new(cpio),
                )
            }
            ArchiveBackend::Native => {
                let native = NativeCpio::new(config.archive_format);
                (Box::new(native), Box::new(native), Box::new(native))
            }
        };

        Self {
            lister,
            extractor,
            builder,
            differ: Box::new(Bsdiff::new(Tool::new(&config.tools.bsdiff))),
            compressor: Box::new(Fallback::zstd_or_gzip(
                Tool::new(&config.tools.zstd),
                config.zstd_level,
                config.gzip_level,
            )),
        }
    }
}

/// What a finished job did.
#[derive(Debug, Clone)]
pub struct JobReport {
    /// Stages visited, ending in `Done`.
    pub stages: Vec<Stage>,
    /// The archive the delta was computed against.
    pub effective_target: PathBuf,
    /// Present when recompression ran and succeeded.
    pub repack: Option<RepackReport>,
    /// `None` when the statistics could not be measured.
    pub statistics: Option<Statistics>,
    pub target_sha256: Option<[u8; 32]>,
    pub delta_sha256: Option<[u8; 32]>,
    pub codec: String,
}

// ---------------------------------------------------------------------------
// DeltaJob
// ---------------------------------------------------------------------------

/// A single delta generation job with its own context and working tree.
pub struct DeltaJob {
    paths: JobPaths,
    config: DeltaConfig,
    toolchain: Toolchain,
    ctx: JobContext,
}

impl DeltaJob {
    /// Create a job using the backends `config` selects.
    pub fn new(paths: JobPaths, config: DeltaConfig) -> Result<Self, JobError> {
        let toolchain = Toolchain::from_config(&config);
        Self::with_toolchain(paths, config, toolchain)
    }

    /// Create a job with explicit backends.
    ///
    /// Creates the log and working directories and opens the job log.
    pub fn with_toolchain(
        paths: JobPaths,
        config: DeltaConfig,
        toolchain: Toolchain,
    ) -> Result<Self, JobError> {
        let ctx = JobContext::create(&paths.log_dir, &paths.work_dir).map_err(JobError::Setup)?;
        Ok(Self {
            paths,
            config,
            toolchain,
            ctx,
        })
    }

    pub fn context(&self) -> &JobContext {
        &self.ctx
    }

    pub fn paths(&self) -> &JobPaths {
        &self.paths
    }

    /// Run every stage to completion.
    pub fn run(&self) -> Result<JobReport, JobError> {
        let mut stages = vec![Stage::Start];
        let result = self.run_stages(&mut stages);
        if let Err(e) = &result {
            self.ctx
                .log()
                .error(format!("delta generation failed at {}: {e}", e.stage()));
        }
        result
    }

    fn run_stages(&self, stages: &mut Vec<Stage>) -> Result<JobReport, JobError> {
        let log = self.ctx.log();
        let paths = &self.paths;

        log.section("Starting archive-to-archive delta generation");
        log.info(format!("Source: {}", paths.source.display()));
        log.info(format!("Target: {}", paths.target.display()));
        log.info(format!("Output delta: {}", paths.output_diff.display()));
        if let Some(recompressed) = &paths.recompressed_output {
            log.info(format!("Output recompressed: {}", recompressed.display()));
        }

        stages.push(Stage::SizeProbe);
        self.probe_sizes();

        let (effective_target, repack) = match &paths.recompressed_output {
            Some(recompressed) => {
                stages.push(Stage::Recompress);
                self.recompress(recompressed)
            }
            None => {
                stages.push(Stage::SkipRecompress);
                log.info("No recompression requested, using original target");
                (paths.target.clone(), None)
            }
        };

        stages.push(Stage::Diff);
        log.info("Creating binary diff between archives...");
        let raw_diff = self.ctx.work_dir().join(RAW_DIFF_NAME);
        // Outputs left by an earlier run must not survive a failed diff.
        self.ctx.discard_partial(&raw_diff);
        self.ctx.discard_partial(&paths.output_diff);
        if let Err(e) = self
            .toolchain
            .differ
            .diff(&self.ctx, &paths.source, &effective_target, &raw_diff)
        {
            self.ctx.discard_partial(&raw_diff);
            return Err(e.into());
        }

        stages.push(Stage::Compress);
        log.info("Compressing diff file...");
        let codec = self.toolchain.compressor.name();
        if let Err(e) = self
            .toolchain
            .compressor
            .compress(&self.ctx, &raw_diff, &paths.output_diff)
        {
            log.error(format!("{e}"));
            self.ctx.discard_partial(&paths.output_diff);
            return Err(e.into());
        }

        stages.push(Stage::Statistics);
        let statistics = self.statistics(&effective_target);
        let (target_sha256, delta_sha256) = self.digests(&effective_target);

        stages.push(Stage::Done);
        log.section("Delta generation completed successfully");
        log.info(format!("Delta file: {}", paths.output_diff.display()));
        if repack.is_some() {
            log.info(format!("Recompressed target: {}", effective_target.display()));
        }

        Ok(JobReport {
            stages: stages.clone(),
            effective_target,
            repack,
            statistics,
            target_sha256,
            delta_sha256,
            codec,
        })
    }

    fn probe_sizes(&self) {
        let log = self.ctx.log();
        for (label, path) in [("Source", &self.paths.source), ("Target", &self.paths.target)] {
            match fs::metadata(path) {
                Ok(meta) => log.info(format!(
                    "{label} archive size: {}",
                    stats::bytes_and_mib(meta.len())
                )),
                Err(e) => log.warn(format!(
                    "cannot stat {label} archive {}: {e}",
                    path.display()
                )),
            }
        }
    }

    /// Rebuild the target; on any failure fall back to the original target.
    fn recompress(&self, recompressed: &Path) -> (PathBuf, Option<RepackReport>) {
        let log = self.ctx.log();
        log.info("Recompressing target archive for a deterministic delta...");

        let repackager = Repackager::new(
            self.toolchain.lister.as_ref(),
            self.toolchain.extractor.as_ref(),
            self.toolchain.builder.as_ref(),
            OrderPolicy::new(
                self.config.control_member.clone(),
                self.config.enforce_control_first,
            ),
        );

        match repackager.repackage(&self.ctx, &self.paths.target, recompressed) {
            Ok(report) => {
                log.info("Using recompressed target for delta generation");
                (recompressed.to_path_buf(), Some(report))
            }
            Err(e) => {
                log.warn(format!(
                    "recompression failed ({e}), using original target"
                ));
                self.ctx.discard_partial(recompressed);
                (self.paths.target.clone(), None)
            }
        }
    }

    fn statistics(&self, effective_target: &Path) -> Option<Statistics> {
        let log = self.ctx.log();
        log.info("Generating statistics...");
        let stats = match Statistics::measure(
            &self.paths.source,
            effective_target,
            &self.paths.output_diff,
        ) {
            Ok(stats) => stats,
            Err(e) => {
                log.warn(format!("cannot measure statistics: {e}"));
                return None;
            }
        };

        let path = self.ctx.stats_path();
        match stats.write_report(&path) {
            Ok(()) => log.info(format!("Statistics written to {}", path.display())),
            Err(e) => log.warn(format!(
                "cannot write statistics to {}: {e}",
                path.display()
            )),
        }
        log.info(format!(
            "Delta is {:.2}% of target, {} bytes saved",
            stats.compression_ratio,
            stats::group_thousands(stats.space_saved.into())
        ));
        Some(stats)
    }

    #[cfg(feature = "file-io")]
    fn digests(&self, effective_target: &Path) -> (Option<[u8; 32]>, Option<[u8; 32]>) {
        let digest = |label: &str, path: &Path| match stats::sha256_file(path) {
            Ok(digest) => {
                self.ctx
                    .log()
                    .info(format!("{label} SHA256: {}", stats::hex(&digest)));
                Some(digest)
            }
            Err(e) => {
                self.ctx.log().warn(format!(
                    "cannot hash {}: {e}",
                    path.display()
                ));
                None
            }
        };
        (
            digest("Target", effective_target),
            digest("Delta", &self.paths.output_diff),
        )
    }

    #[cfg(not(feature = "file-io"))]
    fn digests(&self, _effective_target: &Path) -> (Option<[u8; 32]>, Option<[u8; 32]>) {
        (None, None)
    }
}
