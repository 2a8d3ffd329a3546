// Binary diff capability.
//
// The delta itself is produced by an external minimal-size patch tool
// (bsdiff). Availability is checked before invocation so that a missing
// tool is distinguishable from a failed diff.

use std::path::Path;

use thiserror::Error;

use crate::context::JobContext;
use crate::tool::{self, Tool, ToolError};

#[derive(Debug, Error)]
pub enum DiffError {
    #[error("binary diff tool {program} not found in PATH")]
    ToolMissing { program: String },

    #[error("binary diff failed: {0}")]
    Tool(#[source] ToolError),
}

/// Produces a patch that turns `source` into `target`.
pub trait BinaryDiffer {
    fn name(&self) -> String;

    fn diff(
        &self,
        ctx: &JobContext,
        source: &Path,
        target: &Path,
        patch: &Path,
    ) -> Result<(), DiffError>;
}

/// `bsdiff <source> <target> <patch>`
#[derive(Debug, Clone)]
pub struct Bsdiff {
    tool: Tool,
}

impl Bsdiff {
    pub fn new(tool: Tool) -> Self {
        Self { tool }
    }
}

impl Default for Bsdiff {
    fn default() -> Self {
        Self::new(Tool::new("bsdiff"))
    }
}

impl BinaryDiffer for Bsdiff {
    fn name(&self) -> String {
        self.tool.name()
    }

    fn diff(
        &self,
        ctx: &JobContext,
        source: &Path,
        target: &Path,
        patch: &Path,
    ) -> Result<(), DiffError> {
        ctx.log().info(format!(
            "Creating bsdiff: {} -> {}",
            display_name(source),
            display_name(target)
        ));

        let mut cmd = match self.tool.command() {
            Ok(cmd) => cmd,
            Err(ToolError::NotFound { program }) => {
                ctx.log().error(format!("{program} not found in PATH"));
                return Err(DiffError::ToolMissing { program });
            }
            Err(e) => return Err(DiffError::Tool(e)),
        };
        cmd.arg(source).arg(target).arg(patch);

        tool::run(ctx, "Binary diff with bsdiff", &mut cmd).map_err(DiffError::Tool)?;
        Ok(())
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .unwrap_or(path.as_os_str())
        .to_string_lossy()
        .into_owned()
}
