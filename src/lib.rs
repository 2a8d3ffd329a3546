//! swu-delta: deterministic deltas between SWUpdate (CPIO) update packages.
//!
//! The crate provides:
//! - An order-preserving archive repackager (`repack`) over pluggable
//!   archive backends (`archive`): GNU `cpio` or an in-process CPIO codec
//! - Binary diffing (`diff`) and delta compression (`compress`)
//! - A job controller tying the stages together (`pipeline`)
//! - Size statistics and digests (`stats`)
//! - An optional CLI (`cli` feature)
//!
//! # Quick Start
//!
//! ```no_run
//! use swu_delta::config::DeltaConfig;
//! use swu_delta::pipeline::{DeltaJob, JobPaths};
//!
//! let paths = JobPaths {
//!     source: "v1.swu".into(),
//!     target: "v2.swu".into(),
//!     output_diff: "v1-to-v2.delta".into(),
//!     log_dir: "logs".into(),
//!     work_dir: "work".into(),
//!     recompressed_output: Some("v2-repacked.swu".into()),
//! };
//! let job = DeltaJob::new(paths, DeltaConfig::default()).unwrap();
//! let report = job.run().unwrap();
//! println!("delta computed against {}", report.effective_target.display());
//! ```

pub mod archive;
pub mod compress;
pub mod config;
pub mod context;
pub mod diff;
pub mod pipeline;
pub mod repack;
pub mod stats;
pub mod tool;

#[cfg(feature = "cli")]
pub mod cli;
