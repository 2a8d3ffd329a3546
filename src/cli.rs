// Command-line front-end for delta generation.
//
// Thin layer over `pipeline::DeltaJob`: parses the positional job paths and
// tuning flags, installs the console logger and maps the job outcome to an
// exit status (0 on success, 1 on any failure or usage error).

use std::ffi::OsString;
use std::path::PathBuf;
use std::process;

use clap::{ArgAction, Parser, ValueEnum, ValueHint};

use crate::config::{
    ArchiveBackend, ArchiveFormat, DEFAULT_CONTROL_MEMBER, DEFAULT_GZIP_LEVEL, DEFAULT_ZSTD_LEVEL,
    DeltaConfig, ToolPaths,
};
use crate::pipeline::{DeltaJob, JobPaths, JobReport};
use crate::stats;

// ---------------------------------------------------------------------------
// Clap CLI definition
// ---------------------------------------------------------------------------

/// Generate a compressed binary delta between two SWUpdate packages.
#[derive(Parser, Debug)]
#[command(
    name = "swu-delta",
    version,
    about = "Deterministic delta generation between SWUpdate (CPIO) packages"
)]
struct Cli {
    /// Currently installed (old) package.
    #[arg(value_hint = ValueHint::FilePath)]
    source: PathBuf,

    /// New package to be reached by applying the delta.
    #[arg(value_hint = ValueHint::FilePath)]
    target: PathBuf,

    /// Where to write the compressed delta.
    #[arg(value_hint = ValueHint::FilePath)]
    output_diff: PathBuf,

    /// Directory receiving the job log and statistics report.
    #[arg(value_hint = ValueHint::DirPath)]
    log_dir: PathBuf,

    /// Private working directory for intermediate files.
    #[arg(value_hint = ValueHint::DirPath)]
    work_dir: PathBuf,

    /// Rebuild the target here (control member first) and diff against it.
    #[arg(value_hint = ValueHint::FilePath)]
    recompressed_output: Option<PathBuf>,

    /// Archive member that must come first in a rebuilt package.
    #[arg(long, value_name = "NAME", default_value = DEFAULT_CONTROL_MEMBER)]
    control_member: String,

    /// Keep the listed member order even if the control member is misplaced.
    #[arg(long)]
    keep_raw_order: bool,

    /// Implementation used to list, extract and rebuild packages.
    #[arg(long, value_enum, default_value_t = BackendArg::Cpio)]
    archive_backend: BackendArg,

    /// CPIO header format of the rebuilt package.
    #[arg(long, value_enum, default_value_t = FormatArg::Crc)]
    format: FormatArg,

    /// cpio program (name on PATH or path).
    #[arg(long, value_name = "PROGRAM", default_value = "cpio")]
    cpio: OsString,

    /// bsdiff program (name on PATH or path).
    #[arg(long, value_name = "PROGRAM", default_value = "bsdiff")]
    bsdiff: OsString,

    /// zstd program (name on PATH or path); gzip is used when it is missing.
    #[arg(long, value_name = "PROGRAM", default_value = "zstd")]
    zstd: OsString,

    /// zstd compression level (1-19).
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=19), default_value_t = DEFAULT_ZSTD_LEVEL)]
    zstd_level: u32,

    /// gzip fallback compression level (0-9).
    #[arg(long, value_parser = clap::value_parser!(u32).range(0..=9), default_value_t = DEFAULT_GZIP_LEVEL)]
    gzip_level: u32,

    /// Quiet mode (only warnings and errors on the console).
    #[arg(short = 'q', long, conflicts_with = "verbose")]
    quiet: bool,

    /// Verbose mode (use twice for trace output).
    #[arg(short = 'v', long, action = ArgAction::Count)]
    verbose: u8,

    /// Output stats as JSON to stderr.
    #[arg(long = "json")]
    json_output: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackendArg {
    /// GNU cpio.
    Cpio,
    /// Built-in CPIO codec.
    Native,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FormatArg {
    Crc,
    Newc,
}

// ---------------------------------------------------------------------------
// Option resolution
// ---------------------------------------------------------------------------

fn build_config(cli: &Cli) -> DeltaConfig {
    DeltaConfig {
        control_member: cli.control_member.clone(),
        enforce_control_first: !cli.keep_raw_order,
        archive_backend: match cli.archive_backend {
            BackendArg::Cpio => ArchiveBackend::External,
            BackendArg::Native => ArchiveBackend::Native,
        },
        archive_format: match cli.format {
            FormatArg::Crc => ArchiveFormat::Crc,
            FormatArg::Newc => ArchiveFormat::Newc,
        },
        tools: ToolPaths {
            cpio: cli.cpio.clone(),
            bsdiff: cli.bsdiff.clone(),
            zstd: cli.zstd.clone(),
        },
        zstd_level: cli.zstd_level,
        gzip_level: cli.gzip_level,
    }
}

fn build_paths(cli: &Cli) -> JobPaths {
    JobPaths {
        source: cli.source.clone(),
        target: cli.target.clone(),
        output_diff: cli.output_diff.clone(),
        log_dir: cli.log_dir.clone(),
        work_dir: cli.work_dir.clone(),
        recompressed_output: cli.recompressed_output.clone(),
    }
}

fn log_filter(cli: &Cli) -> &'static str {
    if cli.quiet {
        return "warn";
    }
    match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

fn report_json(report: &JobReport) -> serde_json::Value {
    let digest = |d: &Option<[u8; 32]>| d.as_ref().map(|d| stats::hex(d));
    let stats = report.statistics.as_ref();
    serde_json::json!({
        "effective_target": report.effective_target.display().to_string(),
        "recompressed": report.repack.is_some(),
        "members": report.repack.as_ref().map(|r| r.members.len()),
        "codec": report.codec,
        "source_size": stats.map(|s| s.source_size),
        "target_size": stats.map(|s| s.target_size),
        "diff_size": stats.map(|s| s.diff_size),
        "compression_ratio": stats.map(|s| s.compression_ratio),
        "space_saved": stats.map(|s| s.space_saved),
        "target_sha256": digest(&report.target_sha256),
        "delta_sha256": digest(&report.delta_sha256),
    })
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Main CLI entry point. Parses arguments via clap and runs one delta job.
pub fn run() -> ! {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Help and version go to stdout and are not failures.
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            process::exit(code);
        }
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_filter(&cli)))
        .format_timestamp(None)
        .format_target(false)
        .init();

    let job = match DeltaJob::new(build_paths(&cli), build_config(&cli)) {
        Ok(job) => job,
        Err(e) => {
            eprintln!("swu-delta: {e}");
            process::exit(1);
        }
    };

    match job.run() {
        Ok(report) => {
            if cli.json_output {
                eprintln!("{:#}", report_json(&report));
            }
            process::exit(0);
        }
        Err(e) => {
            eprintln!("swu-delta: {e}");
            eprintln!(
                "swu-delta: see {} for details",
                job.context().log().path().display()
            );
            process::exit(1);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
