// Per-job context: log sink and owned working tree.
//
// A `JobContext` is created once per delta job and passed by reference to
// every component. It owns the append-only job log and the private working
// directory (`source/`, `target/` and per-operation scratch directories).
// Nothing here is process-global, so two jobs with distinct directories
// never observe each other.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// File name of the per-job event log, created under the log directory.
pub const LOG_FILE_NAME: &str = "delta-generation.log";

/// File name of the statistics report, created under the log directory.
pub const STATS_FILE_NAME: &str = "statistics.txt";

// ---------------------------------------------------------------------------
// JobLog
// ---------------------------------------------------------------------------

/// Append-only event log, one line per event.
///
/// Every line is mirrored to the `log` facade at the same level so the
/// console (when a logger is installed) and the file carry the same trail.
/// A failed write to the file is reported once through the facade and
/// otherwise ignored: losing a log line never fails a job.
#[derive(Debug)]
pub struct JobLog {
    path: PathBuf,
    file: File,
}

impl JobLog {
    /// Open (or create) the log file at `path` in append mode.
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        self.record(log::Level::Debug, message.as_ref());
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.record(log::Level::Info, message.as_ref());
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.record(log::Level::Warn, message.as_ref());
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.record(log::Level::Error, message.as_ref());
    }

    /// Log a visually separated section heading.
    pub fn section(&self, title: impl AsRef<str>) {
        let rule = "=".repeat(60);
        self.info(&rule);
        self.info(title);
        self.info(&rule);
    }

    fn record(&self, level: log::Level, message: &str) {
        log::log!(level, "{message}");
        // `&File` implements `Write`, so no interior mutability is needed.
        let line = format!("{:<5} {message}\n", level.as_str());
        if let Err(e) = (&self.file).write_all(line.as_bytes()) {
            log::warn!("cannot append to {}: {e}", self.path.display());
        }
    }
}

// ---------------------------------------------------------------------------
// JobContext
// ---------------------------------------------------------------------------

/// Everything a pipeline component needs besides its inputs.
#[derive(Debug)]
pub struct JobContext {
    log: JobLog,
    log_dir: PathBuf,
    work_dir: PathBuf,
    source_dir: PathBuf,
    target_dir: PathBuf,
}

impl JobContext {
    /// Create the log and working directories and open the job log.
    ///
    /// Creates `log_dir`, `work_dir`, `work_dir/source` and `work_dir/target`
    /// if they do not exist yet.
    pub fn create(log_dir: &Path, work_dir: &Path) -> io::Result<Self> {
        fs::create_dir_all(log_dir)?;
        fs::create_dir_all(work_dir)?;

        let source_dir = work_dir.join("source");
        let target_dir = work_dir.join("target");
        fs::create_dir_all(&source_dir)?;
        fs::create_dir_all(&target_dir)?;

        let log = JobLog::open(log_dir.join(LOG_FILE_NAME))?;

        Ok(Self {
            log,
            log_dir: log_dir.to_path_buf(),
            work_dir: work_dir.to_path_buf(),
            source_dir,
            target_dir,
        })
    }

    pub fn log(&self) -> &JobLog {
        &self.log
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    pub fn target_dir(&self) -> &Path {
        &self.target_dir
    }

    pub fn stats_path(&self) -> PathBuf {
        self.log_dir.join(STATS_FILE_NAME)
    }

    /// Create a fresh, empty scratch directory for one operation.
    ///
    /// A leftover directory of the same name (from an earlier failed run)
    /// is removed first so stale members can never leak into a rebuild.
    pub fn fresh_scratch_dir(&self, label: &str) -> io::Result<PathBuf> {
        let dir = self.work_dir.join(label);
        if dir.exists() {
            self.log.warn(format!(
                "Removing stale scratch directory {}",
                dir.display()
            ));
            fs::remove_dir_all(&dir)?;
        }
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Remove a partially written output file after a failed step.
    pub fn discard_partial(&self, path: &Path) {
        match fs::remove_file(path) {
            Ok(()) => self
                .log
                .info(format!("Removed partial output {}", path.display())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => self.log.warn(format!(
                "cannot remove partial output {}: {e}",
                path.display()
            )),
        }
    }

    /// Best-effort recursive removal; failures are logged, never returned.
    pub fn remove_best_effort(&self, dir: &Path) {
        match fs::remove_dir_all(dir) {
            Ok(()) => self.log.debug(format!("Removed {}", dir.display())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => self
                .log
                .warn(format!("Failed to remove {}: {e}", dir.display())),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
