use std::fs;

use proptest::prelude::*;
use swu_delta::archive::newc::{self, CpioWriter, NativeCpio};
use swu_delta::archive::{ControlPlacement, OrderPolicy};
use swu_delta::config::ArchiveFormat;
use swu_delta::context::JobContext;
use swu_delta::repack::Repackager;
use tempfile::tempdir;

const CONTROL: &str = "sw-description";

/// Distinct member names in arbitrary order, none equal to the control member.
fn member_names(max: usize) -> impl Strategy<Value = Vec<String>> {
    proptest::collection::btree_set("[a-z]{1,8}(\\.[a-z]{1,3})?", 0..max)
        .prop_map(|set| set.into_iter().collect::<Vec<_>>())
        .prop_shuffle()
}

/// Member names with the control member inserted at a random position.
fn names_with_control(max: usize) -> impl Strategy<Value = Vec<String>> {
    member_names(max).prop_flat_map(|names| {
        let len = names.len();
        (Just(names), 0..=len).prop_map(|(mut names, at)| {
            names.insert(at, CONTROL.to_string());
            names
        })
    })
}

fn archive_bytes(names: &[String], format: ArchiveFormat) -> Vec<u8> {
    let mut writer = CpioWriter::new(Vec::new(), format);
    for name in names {
        writer
            .append_data(name, 0o644, format!("contents of {name}").as_bytes())
            .unwrap();
    }
    writer.finish().unwrap()
}

proptest! {
    #[test]
    fn prop_enforced_order_puts_control_first(raw in names_with_control(16)) {
        let normalized = OrderPolicy::new(CONTROL, true).normalize(raw.clone());
        prop_assert_eq!(normalized.names[0].as_str(), CONTROL);

        // Every other member keeps its relative order.
        let rest: Vec<&String> = raw.iter().filter(|n| *n != CONTROL).collect();
        let normalized_rest: Vec<&String> = normalized.names[1..].iter().collect();
        prop_assert_eq!(rest, normalized_rest);
        prop_assert_eq!(normalized.names.len(), raw.len());
    }

    #[test]
    fn prop_normalize_is_identity_without_control_member(raw in member_names(16)) {
        let normalized = OrderPolicy::new(CONTROL, true).normalize(raw.clone());
        prop_assert_eq!(normalized.placement, ControlPlacement::Missing);
        prop_assert_eq!(normalized.names, raw);
    }

    #[test]
    fn prop_disabled_enforcement_never_reorders(raw in names_with_control(16)) {
        let normalized = OrderPolicy::new(CONTROL, false).normalize(raw.clone());
        prop_assert!(!normalized.corrected());
        prop_assert_eq!(normalized.names, raw);
    }

    #[test]
    fn prop_normalize_is_idempotent(raw in names_with_control(16)) {
        let policy = OrderPolicy::new(CONTROL, true);
        let once = policy.normalize(raw);
        let twice = policy.normalize(once.names.clone());
        prop_assert_eq!(twice.placement, ControlPlacement::First);
        prop_assert_eq!(twice.names, once.names);
    }

    #[test]
    fn prop_written_order_is_listed_order(
        names in member_names(24),
        crc in any::<bool>()
    ) {
        let format = if crc { ArchiveFormat::Crc } else { ArchiveFormat::Newc };
        let bytes = archive_bytes(&names, format);
        prop_assert_eq!(bytes.len() % 512, 0);
        prop_assert_eq!(newc::list_names(&bytes[..]).unwrap(), names);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_repackaged_archive_keeps_listed_order(raw in names_with_control(12)) {
        let dir = tempdir().unwrap();
        let ctx = JobContext::create(&dir.path().join("logs"), &dir.path().join("work")).unwrap();
        let original = dir.path().join("original.swu");
        let output = dir.path().join("rebuilt.swu");
        fs::write(&original, archive_bytes(&raw, ArchiveFormat::Crc)).unwrap();

        let native = NativeCpio::new(ArchiveFormat::Crc);
        let report = Repackager::new(&native, &native, &native, OrderPolicy::new(CONTROL, true))
            .repackage(&ctx, &original, &output)
            .unwrap();

        let expected = OrderPolicy::new(CONTROL, true).normalize(raw).names;
        let rebuilt = newc::list_names(fs::File::open(&output).unwrap()).unwrap();
        prop_assert_eq!(&rebuilt, &expected);
        prop_assert_eq!(report.members, expected);
    }
}
