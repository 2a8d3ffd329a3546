// Archive capabilities.
//
// The repackager only needs three operations on an update archive: list
// member names in stored order, extract every member to a directory, and
// build a new archive from an explicit ordered member list. Each is a narrow
// trait so the ordering logic stays independent of the backend:
//   - `cpio_tool`: GNU cpio as an external process
//   - `newc`:      in-process SVR4 CPIO codec

pub mod cpio_tool;
pub mod newc;
pub mod order;

use std::io;
use std::path::Path;

use thiserror::Error;

use crate::context::JobContext;
use crate::tool::ToolError;

pub use order::{ControlPlacement, NormalizedOrder, OrderPolicy};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed archive: {0}")]
    Malformed(String),

    #[error("checksum mismatch for member {name}: expected {expected:#010X}, got {actual:#010X}")]
    ChecksumMismatch {
        name: String,
        expected: u32,
        actual: u32,
    },

    #[error("refusing unsafe member path: {0}")]
    UnsafePath(String),

    #[error("member name contains a newline: {0:?}")]
    UnrepresentableName(String),

    #[error("archive listing produced no member order")]
    NoMemberOrder,

    #[error("no listed member exists on disk")]
    NoMembers,
}

// ---------------------------------------------------------------------------
// Capability traits
// ---------------------------------------------------------------------------

/// Reads member names in stored order without extracting content.
pub trait Lister {
    fn list(&self, ctx: &JobContext, archive: &Path) -> Result<Vec<String>, ArchiveError>;
}

/// Extracts every member below a directory, preserving relative paths.
pub trait Extractor {
    fn extract(&self, ctx: &JobContext, archive: &Path, dest: &Path) -> Result<(), ArchiveError>;
}

/// Builds an archive from `members` (relative to `root`) in exactly the
/// given order, with reproducible per-member metadata.
pub trait ArchiveBuilder {
    fn build(
        &self,
        ctx: &JobContext,
        root: &Path,
        members: &[String],
        output: &Path,
    ) -> Result<(), ArchiveError>;
}

// ---------------------------------------------------------------------------
// Verified member list
// ---------------------------------------------------------------------------

/// Result of checking an order list against an extraction directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifiedMembers {
    /// Members present as regular files, in list order.
    pub present: Vec<String>,
    /// Members that were listed but are not regular files on disk.
    pub skipped: Vec<String>,
}

/// Keep only members that exist as regular files below `root`.
///
/// Order is preserved. Directory entries and missing members are reported
/// in `skipped`; callers decide whether an empty `present` list is fatal.
pub fn verify_members(root: &Path, order: &[String]) -> VerifiedMembers {
    let mut verified = VerifiedMembers::default();
    for name in order {
        if root.join(name).is_file() {
            verified.present.push(name.clone());
        } else {
            verified.skipped.push(name.clone());
        }
    }
    verified
}
