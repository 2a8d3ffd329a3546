// External tool invocation.
//
// Every byte-level operation that is delegated to another program goes
// through this module: PATH lookup before invocation (so a missing tool is
// reported as missing, not as a failed run), captured stdout/stderr, and a
// feeding strategy for tools that read a large stdin while writing output.

use std::ffi::{OsStr, OsString};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Output, Stdio};
use std::thread;

use thiserror::Error;

use crate::context::JobContext;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ToolError {
    /// The program could not be resolved on `PATH` (or the given path is not executable).
    #[error("{program} not found in PATH")]
    NotFound { program: String },

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} failed ({}): {stderr}", describe_status(*.code))]
    Failed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("I/O error while running {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },
}

fn describe_status(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tool
// ---------------------------------------------------------------------------

/// A program name (looked up on `PATH`) or an explicit path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tool {
    program: OsString,
}

impl Tool {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &OsStr {
        &self.program
    }

    /// Display name used in logs and errors.
    pub fn name(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }

    /// Resolve the program to an executable path, if it exists.
    pub fn locate(&self) -> Option<PathBuf> {
        locate(&self.program)
    }

    pub fn is_available(&self) -> bool {
        self.locate().is_some()
    }

    /// Build a `Command` for the resolved executable.
    pub fn command(&self) -> Result<Command, ToolError> {
        let path = self.locate().ok_or_else(|| ToolError::NotFound {
            program: self.name(),
        })?;
        Ok(Command::new(path))
    }
}

/// Resolve `program` the way a shell would.
///
/// A value with more than one path component is taken as a path and only
/// checked; a bare name is searched in every `PATH` entry.
pub fn locate(program: &OsStr) -> Option<PathBuf> {
    let path = Path::new(program);
    if path.components().count() > 1 {
        return is_executable(path).then(|| path.to_path_buf());
    }

    let search = std::env::var_os("PATH")?;
    std::env::split_paths(&search).find_map(|dir| {
        let candidate = dir.join(program);
        if is_executable(&candidate) {
            return Some(candidate);
        }
        let suffix = std::env::consts::EXE_SUFFIX;
        if suffix.is_empty() {
            return None;
        }
        let mut with_suffix = candidate.into_os_string();
        with_suffix.push(suffix);
        let with_suffix = PathBuf::from(with_suffix);
        is_executable(&with_suffix).then_some(with_suffix)
    })
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

// ---------------------------------------------------------------------------
// Invocation
// ---------------------------------------------------------------------------

/// Run `cmd` to completion, capturing stdout and stderr.
///
/// Stdin is whatever the caller configured (closed by default). Logs the
/// description and command line; on a non-zero exit logs the code and
/// stderr and returns `ToolError::Failed`.
pub fn run(ctx: &JobContext, description: &str, cmd: &mut Command) -> Result<Output, ToolError> {
    let program = program_of(cmd);
    log_invocation(ctx, description, cmd);

    let output = cmd
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|source| ToolError::Spawn {
            program: program.clone(),
            source,
        })?;

    check_status(ctx, &program, output.status, &output.stderr)?;
    if !output.stdout.is_empty() {
        ctx.log()
            .debug(format!("Output: {}", String::from_utf8_lossy(&output.stdout).trim_end()));
    }
    Ok(output)
}

/// Run `cmd` with `input` written to its stdin and stdout sent to `stdout`.
///
/// The input is written from a separate thread while this thread drains
/// the child's output pipes, so neither side can block the other once a
/// pipe buffer fills. Use `Stdio::piped()` for `stdout` to capture it in
/// the returned `Output`, or a `File` to stream it to disk.
pub fn run_with_input(
    ctx: &JobContext,
    description: &str,
    cmd: &mut Command,
    input: &[u8],
    stdout: Stdio,
) -> Result<Output, ToolError> {
    let program = program_of(cmd);
    log_invocation(ctx, description, cmd);

    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(stdout)
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| ToolError::Spawn {
            program: program.clone(),
            source,
        })?;

    let stdin = child.stdin.take();
    let (written, output) = thread::scope(|scope| {
        let writer = scope.spawn(move || -> io::Result<()> {
            if let Some(mut stdin) = stdin {
                stdin.write_all(input)?;
                stdin.flush()?;
                // Dropping stdin closes the pipe and signals end of input.
            }
            Ok(())
        });
        let output = child.wait_with_output();
        let written = writer
            .join()
            .unwrap_or_else(|_| Err(io::Error::other("stdin writer thread panicked")));
        (written, output)
    });

    let output = output.map_err(|source| ToolError::Io {
        program: program.clone(),
        source,
    })?;

    // A tool that exits early closes its stdin; its exit status is the
    // more useful diagnosis than the resulting broken pipe.
    check_status(ctx, &program, output.status, &output.stderr)?;
    written.map_err(|source| {
        ctx.log()
            .error(format!("writing input to {program} failed: {source}"));
        ToolError::Io {
            program: program.clone(),
            source,
        }
    })?;

    Ok(output)
}

fn program_of(cmd: &Command) -> String {
    Path::new(cmd.get_program())
        .file_name()
        .unwrap_or(cmd.get_program())
        .to_string_lossy()
        .into_owned()
}

fn log_invocation(ctx: &JobContext, description: &str, cmd: &Command) {
    let mut line = cmd.get_program().to_string_lossy().into_owned();
    for arg in cmd.get_args() {
        line.push(' ');
        line.push_str(&arg.to_string_lossy());
    }
    ctx.log().info(format!("Running: {description}"));
    ctx.log().info(format!("Command: {line}"));
}

fn check_status(
    ctx: &JobContext,
    program: &str,
    status: ExitStatus,
    stderr: &[u8],
) -> Result<(), ToolError> {
    if status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(stderr).trim_end().to_string();
    ctx.log().error(format!(
        "{program} failed with {}",
        describe_status(status.code())
    ));
    ctx.log().error(format!("STDERR: {stderr}"));
    Err(ToolError::Failed {
        program: program.to_string(),
        code: status.code(),
        stderr,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
