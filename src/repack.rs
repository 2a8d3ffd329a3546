// Order-preserving repackager.
//
// Rebuilds an update archive from its own extraction so the byte layout is
// normalized before diffing. The member order is taken from a listing of
// the original archive, never from directory iteration, and handed to the
// builder as an explicit list.
//
//   list original -> control-member check -> extract -> verify on disk
//     -> build from ordered list -> report sizes -> remove scratch
//
// Scratch policy: removed on success, preserved on failure for inspection.

use std::fs;
use std::path::Path;

use crate::archive::{
    self, ArchiveBuilder, ArchiveError, ControlPlacement, Extractor, Lister, OrderPolicy,
};
use crate::context::JobContext;
use crate::stats::group_thousands;

/// Number of member names echoed to the log before summarizing.
const LOGGED_MEMBERS: usize = 10;

/// Outcome of a successful repackaging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepackReport {
    /// Members written to the rebuilt archive, in order.
    pub members: Vec<String>,
    /// Listed members that were not present on disk.
    pub skipped: Vec<String>,
    /// Whether the control-member correction changed the listed order.
    pub corrected_order: bool,
    pub original_size: u64,
    pub repacked_size: u64,
}

impl RepackReport {
    pub fn size_delta(&self) -> i64 {
        self.repacked_size as i64 - self.original_size as i64
    }
}

/// Rebuilds archives through the three archive capabilities.
pub struct Repackager<'a> {
    lister: &'a dyn Lister,
    extractor: &'a dyn Extractor,
    builder: &'a dyn ArchiveBuilder,
    policy: OrderPolicy,
}

impl<'a> Repackager<'a> {
    pub fn new(
        lister: &'a dyn Lister,
        extractor: &'a dyn Extractor,
        builder: &'a dyn ArchiveBuilder,
        policy: OrderPolicy,
    ) -> Self {
        Self {
            lister,
            extractor,
            builder,
            policy,
        }
    }

    /// Rebuild `original` into `output`, preserving its member order.
    pub fn repackage(
        &self,
        ctx: &JobContext,
        original: &Path,
        output: &Path,
    ) -> Result<RepackReport, ArchiveError> {
        let log = ctx.log();
        log.section(format!("Recompressing archive: {}", original.display()));
        log.info(format!("Output: {}", output.display()));

        // The original may be cleaned up by later steps; capture its size now.
        let original_size = fs::metadata(original).map(|m| m.len()).unwrap_or_else(|e| {
            log.warn(format!("cannot stat {}: {e}", original.display()));
            0
        });

        let raw_order = self.list_original(ctx, original);

        let scratch = ctx.fresh_scratch_dir(&scratch_label(original))?;
        log.info(format!(
            "Extracting {} to {}",
            original.display(),
            scratch.display()
        ));
        if let Err(e) = self.extractor.extract(ctx, original, &scratch) {
            log.error(format!("failed to extract {}: {e}", original.display()));
            log.info(format!("Scratch directory kept at {}", scratch.display()));
            return Err(e);
        }

        let result = self.rebuild(ctx, raw_order, &scratch, output);
        match &result {
            Ok(_) => ctx.remove_best_effort(&scratch),
            Err(_) => log.info(format!("Scratch directory kept at {}", scratch.display())),
        }
        let (members, skipped, corrected_order) = result?;

        let repacked_size = fs::metadata(output)?.len();
        let report = RepackReport {
            members,
            skipped,
            corrected_order,
            original_size,
            repacked_size,
        };
        log.info(format!(
            "Original size: {} bytes",
            group_thousands(original_size.into())
        ));
        log.info(format!(
            "Recompressed size: {} bytes",
            group_thousands(repacked_size.into())
        ));
        if original_size > 0 {
            log.info(format!(
                "Size difference: {} bytes",
                signed(report.size_delta())
            ));
        }
        log.info("Recompression completed successfully");
        Ok(report)
    }

    /// List the original archive; a failed listing is a warning here.
    fn list_original(&self, ctx: &JobContext, original: &Path) -> Vec<String> {
        match self.lister.list(ctx, original) {
            Ok(names) => {
                log_members(ctx, "Original member order", &names);
                names
            }
            Err(e) => {
                ctx.log().warn(format!(
                    "failed to list members of {}: {e}",
                    original.display()
                ));
                Vec::new()
            }
        }
    }

    fn rebuild(
        &self,
        ctx: &JobContext,
        raw_order: Vec<String>,
        scratch: &Path,
        output: &Path,
    ) -> Result<(Vec<String>, Vec<String>, bool), ArchiveError> {
        let log = ctx.log();
        if raw_order.is_empty() {
            log.error(
                "no member order available; refusing to rebuild from directory order",
            );
            return Err(ArchiveError::NoMemberOrder);
        }

        let control = &self.policy.control_member;
        let order = self.policy.normalize(raw_order);
        match order.placement {
            ControlPlacement::First => {}
            ControlPlacement::Moved { from } => {
                log.warn(format!(
                    "{control} was member {} instead of first; moved to the front",
                    from + 1
                ));
            }
            ControlPlacement::Misplaced { at } => {
                log.warn(format!(
                    "{control} is member {} instead of first; order kept as listed",
                    at + 1
                ));
            }
            ControlPlacement::Missing => {
                log.warn(format!(
                    "{control} is missing from the archive; this may not be a valid update package"
                ));
            }
        }
        let corrected = order.corrected();

        let verified = archive::verify_members(scratch, &order.names);
        for name in &verified.skipped {
            log.warn(format!(
                "member {name} from listing not found on disk, skipping"
            ));
        }
        if verified.present.is_empty() {
            log.error("no members to recompress");
            return Err(ArchiveError::NoMembers);
        }

        log_members(ctx, "Recompressing with original member order", &verified.present);
        if let Err(e) = self.builder.build(ctx, scratch, &verified.present, output) {
            log.error(format!("archive construction failed: {e}"));
            return Err(e);
        }

        Ok((verified.present, verified.skipped, corrected))
    }
}

fn scratch_label(original: &Path) -> String {
    let stem = original
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "archive".to_string());
    format!("recompress_{stem}")
}

fn log_members(ctx: &JobContext, heading: &str, names: &[String]) {
    let log = ctx.log();
    log.info(format!("{heading} ({} files):", names.len()));
    for (i, name) in names.iter().take(LOGGED_MEMBERS).enumerate() {
        log.info(format!("  {}. {name}", i + 1));
    }
    if names.len() > LOGGED_MEMBERS {
        log.info(format!("  ... and {} more files", names.len() - LOGGED_MEMBERS));
    }
}

fn signed(value: i64) -> String {
    let grouped = group_thousands(value.into());
    if value > 0 { format!("+{grouped}") } else { grouped }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::newc::{self, CpioWriter, NativeCpio};
    use crate::config::ArchiveFormat;
    use std::path::PathBuf;
    use tempfile::{TempDir, tempdir};

    struct Fixture {
        dir: TempDir,
        ctx: JobContext,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempdir().unwrap();
            let ctx =
                JobContext::create(&dir.path().join("logs"), &dir.path().join("work")).unwrap();
            Self { dir, ctx }
        }

        fn archive(&self, name: &str, members: &[(&str, &[u8])]) -> PathBuf {
            let mut writer = CpioWriter::new(Vec::new(), ArchiveFormat::Crc);
            for (member, data) in members {
                writer.append_data(member, 0o644, data).unwrap();
            }
            let path = self.dir.path().join(name);
            fs::write(&path, writer.finish().unwrap()).unwrap();
            path
        }

        fn path(&self, name: &str) -> PathBuf {
            self.dir.path().join(name)
        }

        fn log_text(&self) -> String {
            fs::read_to_string(self.ctx.log().path()).unwrap()
        }
    }

    fn policy() -> OrderPolicy {
        OrderPolicy::new("sw-description", true)
    }

    fn repackage_native(
        fx: &Fixture,
        original: &Path,
        output: &Path,
    ) -> Result<RepackReport, ArchiveError> {
        let native = NativeCpio::new(ArchiveFormat::Crc);
        Repackager::new(&native, &native, &native, policy()).repackage(&fx.ctx, original, output)
    }

    fn listed(path: &Path) -> Vec<String> {
        newc::list_names(fs::File::open(path).unwrap()).unwrap()
    }

    /// Lister that always fails, standing in for an unreadable listing.
    struct BrokenLister;

    impl Lister for BrokenLister {
        fn list(&self, _ctx: &JobContext, _archive: &Path) -> Result<Vec<String>, ArchiveError> {
            Err(ArchiveError::Malformed("listing unavailable".into()))
        }
    }

    #[test]
    fn preserves_member_order() {
        let fx = Fixture::new();
        let original = fx.archive(
            "target.swu",
            &[("sw-description", b"desc"), ("zz.img", b"z"), ("aa.img", b"a"), ("mm.sh", b"m")],
        );
        let output = fx.path("out.swu");

        let report = repackage_native(&fx, &original, &output).unwrap();
        assert_eq!(report.members, ["sw-description", "zz.img", "aa.img", "mm.sh"]);
        assert_eq!(listed(&output), report.members);
        assert!(!report.corrected_order);
    }

    #[test]
    fn moves_control_member_to_front() {
        let fx = Fixture::new();
        let original = fx.archive(
            "target.swu",
            &[("rootfs.img", b"rootfs"), ("sw-description", b"desc")],
        );
        let output = fx.path("out.swu");

        let report = repackage_native(&fx, &original, &output).unwrap();
        assert!(report.corrected_order);
        assert_eq!(listed(&output), ["sw-description", "rootfs.img"]);
        assert!(fx.log_text().contains("moved to the front"));
    }

    #[test]
    fn rebuild_is_deterministic() {
        let fx = Fixture::new();
        let original = fx.archive(
            "target.swu",
            &[("sw-description", b"desc"), ("rootfs.img", &[0xA5; 10_000])],
        );
        let first = fx.path("first.swu");
        let second = fx.path("second.swu");

        repackage_native(&fx, &original, &first).unwrap();
        repackage_native(&fx, &original, &second).unwrap();
        assert_eq!(fs::read(&first).unwrap(), fs::read(&second).unwrap());
    }

    #[test]
    fn scratch_removed_on_success() {
        let fx = Fixture::new();
        let original = fx.archive("target.swu", &[("sw-description", b"desc")]);
        repackage_native(&fx, &original, &fx.path("out.swu")).unwrap();
        assert!(!fx.ctx.work_dir().join("recompress_target").exists());
    }

    #[test]
    fn missing_control_member_still_rebuilds() {
        let fx = Fixture::new();
        let original = fx.archive("target.swu", &[("b.img", b"b"), ("a.img", b"a")]);
        let output = fx.path("out.swu");

        let report = repackage_native(&fx, &original, &output).unwrap();
        assert_eq!(listed(&output), ["b.img", "a.img"]);
        assert!(!report.corrected_order);
        assert!(fx.log_text().contains("sw-description is missing"));
    }

    #[test]
    fn listed_members_missing_on_disk_are_skipped() {
        let fx = Fixture::new();
        let original = fx.archive(
            "target.swu",
            &[("sw-description", b"desc"), ("rootfs.img", b"img")],
        );

        // Lister that reports one member more than the archive holds.
        struct Padded;
        impl Lister for Padded {
            fn list(&self, _: &JobContext, archive: &Path) -> Result<Vec<String>, ArchiveError> {
                let mut names = newc::list_names(fs::File::open(archive)?)?;
                names.insert(1, "ghost.bin".to_string());
                Ok(names)
            }
        }

        let native = NativeCpio::new(ArchiveFormat::Crc);
        let output = fx.path("out.swu");
        let report = Repackager::new(&Padded, &native, &native, policy())
            .repackage(&fx.ctx, &original, &output)
            .unwrap();
        assert_eq!(report.skipped, ["ghost.bin"]);
        assert_eq!(listed(&output), ["sw-description", "rootfs.img"]);
        assert!(fx.log_text().contains("ghost.bin from listing not found on disk"));
    }

    #[test]
    fn empty_verified_list_fails_and_keeps_scratch() {
        let fx = Fixture::new();
        let original = fx.archive("target.swu", &[("sw-description", b"desc")]);

        struct Phantom;
        impl Lister for Phantom {
            fn list(&self, _: &JobContext, _: &Path) -> Result<Vec<String>, ArchiveError> {
                Ok(vec!["not-there".to_string()])
            }
        }

        let native = NativeCpio::new(ArchiveFormat::Crc);
        let err = Repackager::new(&Phantom, &native, &native, policy())
            .repackage(&fx.ctx, &original, &fx.path("out.swu"))
            .unwrap_err();
        assert!(matches!(err, ArchiveError::NoMembers));
        assert!(fx.ctx.work_dir().join("recompress_target").is_dir());
    }

    #[test]
    fn failed_listing_fails_after_extraction() {
        let fx = Fixture::new();
        let original = fx.archive("target.swu", &[("sw-description", b"desc")]);
        let native = NativeCpio::new(ArchiveFormat::Crc);

        let err = Repackager::new(&BrokenLister, &native, &native, policy())
            .repackage(&fx.ctx, &original, &fx.path("out.swu"))
            .unwrap_err();
        assert!(matches!(err, ArchiveError::NoMemberOrder));
        let log = fx.log_text();
        assert!(log.contains("WARN  failed to list members"));
        assert!(log.contains("ERROR no member order available"));
        assert!(!log.contains("WARNING"));
        assert!(log.contains("Extracting"));
    }

    #[test]
    fn extraction_failure_is_fatal() {
        let fx = Fixture::new();
        let bogus = fx.path("bogus.swu");
        fs::write(&bogus, b"this is not a cpio archive at all").unwrap();

        let err = repackage_native(&fx, &bogus, &fx.path("out.swu")).unwrap_err();
        assert!(matches!(err, ArchiveError::Malformed(_)));
    }
}
