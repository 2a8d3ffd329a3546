// GNU cpio as an external archive backend.
//
//   list:    cpio -it < archive
//   extract: cpio -idm --no-absolute-filenames < archive   (cwd = dest)
//   build:   names on stdin | cpio -o -H <fmt> --reproducible --owner=0:0 > output
//
// The build step receives the member enumeration directly on stdin; nothing
// is scanned from the directory, so member order comes only from the list.

use std::fs::File;
use std::path::Path;
use std::process::Stdio;

use super::{ArchiveBuilder, ArchiveError, Extractor, Lister};
use crate::config::ArchiveFormat;
use crate::context::JobContext;
use crate::tool::{self, Tool};

/// Archive backend that shells out to `cpio`.
#[derive(Debug, Clone)]
pub struct CpioTool {
    tool: Tool,
    format: ArchiveFormat,
}

impl CpioTool {
    pub fn new(tool: Tool, format: ArchiveFormat) -> Self {
        Self { tool, format }
    }

    pub fn tool(&self) -> &Tool {
        &self.tool
    }
}

impl Lister for CpioTool {
    fn list(&self, ctx: &JobContext, archive: &Path) -> Result<Vec<String>, ArchiveError> {
        let input = File::open(archive)?;
        let mut cmd = self.tool.command()?;
        cmd.arg("-it").stdin(Stdio::from(input));

        let output = tool::run(ctx, "List archive members", &mut cmd)?;
        Ok(parse_listing(&String::from_utf8_lossy(&output.stdout)))
    }
}

impl Extractor for CpioTool {
    fn extract(&self, ctx: &JobContext, archive: &Path, dest: &Path) -> Result<(), ArchiveError> {
        let input = File::open(archive)?;
        let mut cmd = self.tool.command()?;
        cmd.args(["-idm", "--no-absolute-filenames"])
            .current_dir(dest)
            .stdin(Stdio::from(input));

        tool::run(ctx, "Extract archive", &mut cmd)?;
        Ok(())
    }
}

impl ArchiveBuilder for CpioTool {
    fn build(
        &self,
        ctx: &JobContext,
        root: &Path,
        members: &[String],
        output: &Path,
    ) -> Result<(), ArchiveError> {
        let input = enumerate_members(members)?;
        let mut cmd = self.tool.command()?;
        cmd.args(["-o", "-H", self.format.cpio_name()])
            .args(["--reproducible", "--owner=0:0"])
            .current_dir(root);

        let out = File::create(output)?;
        tool::run_with_input(
            ctx,
            "Build archive from ordered member list",
            &mut cmd,
            &input,
            Stdio::from(out),
        )?;
        Ok(())
    }
}

/// One name per line, as printed by `cpio -t`.
fn parse_listing(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Encode the member list as cpio expects it on stdin: one name per line.
fn enumerate_members(members: &[String]) -> Result<Vec<u8>, ArchiveError> {
    let mut input = Vec::with_capacity(members.iter().map(|m| m.len() + 1).sum());
    for name in members {
        if name.contains('\n') {
            return Err(ArchiveError::UnrepresentableName(name.clone()));
        }
        input.extend_from_slice(name.as_bytes());
        input.push(b'\n');
    }
    Ok(input)
}
