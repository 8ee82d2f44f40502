//! Chain discovery and maintenance tests
//!
//! Drives the chain builder synchronously (no threads) and verifies:
//! 1. Links are appended as next-link names are discovered
//! 2. A blank next link truncates the chain, idempotently
//! 3. Existing links are never replaced
//! 4. Failed registrations leave a gap without aborting the update
//! 5. Snapshot publication follows the configured policy and never reverts to empty
//! 6. Dropped links give back their cache entries and registry slots

use chainsnap_core::cache::{MemoryCache, SnapshotCache};
use chainsnap_core::chain::{SnapshotPolicy, UpdateOutcome};
use chainsnap_core::codec::FieldMap;
use chainsnap_core::core::{DecodeErrorKind, UpdateError};
use chainsnap_core::testing::{long_page, page, ChainFixture};
use proptest::prelude::*;

// ============================================================================
// DISCOVERY
// ============================================================================

#[test]
fn test_three_page_chain() {
    let mut fx = ChainFixture::new(&["FOO"]);

    let report = fx.update("FOO", &page(Some("FOO.1"), &["A", "B"])).unwrap();
    assert_eq!(
        report.outcome,
        UpdateOutcome::Extended {
            next: "FOO.1".to_string()
        }
    );
    assert_eq!(report.values, 2);

    fx.update("FOO.1", &page(Some("FOO.2"), &["C"])).unwrap();
    let report = fx.update("FOO.2", &page(None, &["D"])).unwrap();
    assert_eq!(report.outcome, UpdateOutcome::Completed { removed: 0 });

    assert_eq!(fx.names("FOO"), vec!["FOO", "FOO.1", "FOO.2"]);
    assert_eq!(fx.metrics.feed().links_discovered_total.get(), 2);
}

#[test]
fn test_long_encoding_discovers_links() {
    let mut fx = ChainFixture::new(&["BAR"]);
    fx.update("BAR", &long_page(Some("BAR.1"), &["X"])).unwrap();
    fx.update("BAR.1", &long_page(None, &["Y"])).unwrap();
    assert_eq!(fx.names("BAR"), vec!["BAR", "BAR.1"]);
}

#[test]
fn test_payload_kept_in_encounter_order() {
    let mut fx = ChainFixture::new(&["FOO"]);
    let mut fields = FieldMap::new();
    fields.push_blank(238);
    fields.push_str(242, "C");
    fields.push_str(240, "A");
    fields.push_str(800, "B");

    let report = fx.update("FOO", &fields).unwrap();
    assert_eq!(report.values, 3);
    let root = fx.store.get("FOO").unwrap().root().unwrap();
    let snapshot = root.snapshot().unwrap();
    assert_eq!(snapshot.entries(), ["C", "A", "B"].map(String::from));
}

#[test]
fn test_short_and_long_ids_do_not_overwrite() {
    let mut fx = ChainFixture::new(&["FOO"]);
    let mut fields = FieldMap::new();
    fields.push_str(800, "L0");
    fields.push_str(240, "S0");
    fields.push_str(813, "L13");
    fields.push_str(253, "S13");
    fields.push_blank(815);

    fx.update("FOO", &fields).unwrap();
    let root = fx.store.get("FOO").unwrap().root().unwrap();
    assert_eq!(
        root.snapshot().unwrap().entries(),
        ["L0", "S0", "L13", "S13"].map(String::from)
    );
}

#[test]
fn test_next_link_owned_by_another_root_is_not_added() {
    let mut fx = ChainFixture::new(&["FOO", "BAR"]);

    let report = fx.update("FOO", &page(Some("BAR"), &["A"])).unwrap();
    assert_eq!(report.outcome, UpdateOutcome::Unchanged);
    assert_eq!(fx.names("FOO"), vec!["FOO"]);
    assert_eq!(fx.metrics.feed().registration_failures_total.get(), 1);

    // BAR still updates its own chain
    fx.update("BAR", &page(None, &["B"])).unwrap();
    let bar = fx.store.get("BAR").unwrap().root().unwrap();
    assert_eq!(bar.snapshot().unwrap().entries(), ["B".to_string()]);
    let foo = fx.store.get("FOO").unwrap().root().unwrap();
    assert_eq!(foo.snapshot().unwrap().entries(), ["A".to_string()]);
}

#[test]
fn test_self_referencing_next_link_is_not_added() {
    let mut fx = ChainFixture::new(&["FOO"]);
    build_chain(&mut fx, "FOO", 2);

    let report = fx.update("FOO.1", &page(Some("FOO"), &["loop"])).unwrap();
    assert_eq!(report.outcome, UpdateOutcome::Unchanged);
    assert_eq!(fx.names("FOO"), vec!["FOO", "FOO.1"]);

    let report = fx.update("FOO", &page(Some("FOO.1"), &["A"])).unwrap();
    assert_eq!(report.outcome, UpdateOutcome::Unchanged);
    let root = fx.store.get("FOO").unwrap().root().unwrap();
    assert_eq!(root.snapshot().unwrap().entries(), ["A".to_string()]);
}

#[test]
fn test_existing_link_is_not_replaced() {
    let mut fx = ChainFixture::new(&["FOO"]);
    fx.update("FOO", &page(Some("FOO.1"), &[])).unwrap();

    let report = fx.update("FOO", &page(Some("FOO.OTHER"), &[])).unwrap();
    assert_eq!(report.outcome, UpdateOutcome::Unchanged);
    assert_eq!(fx.names("FOO"), vec!["FOO", "FOO.1"]);
    assert!(fx.injector.stream_for("FOO.OTHER").is_none());
}

#[test]
fn test_registration_failure_leaves_gap() {
    let mut fx = ChainFixture::new(&["FOO"]);
    fx.injector.reject("FOO.1");

    let report = fx.update("FOO", &page(Some("FOO.1"), &["A"])).unwrap();
    assert_eq!(report.outcome, UpdateOutcome::Unchanged);
    assert!(report.published);
    assert_eq!(fx.names("FOO"), vec!["FOO"]);

    // The next update of the predecessor tries again
    fx.update("FOO", &page(Some("FOO.1"), &["A"])).unwrap();
    assert_eq!(fx.metrics.feed().registration_failures_total.get(), 2);
}

#[test]
fn test_unknown_instrument_has_no_chain() {
    let fx = ChainFixture::new(&["FOO"]);
    assert!(fx.store.get("BAR").is_none());
    assert_eq!(fx.store.len(), 1);
}

// ============================================================================
// TRUNCATION
// ============================================================================

fn build_chain(fx: &mut ChainFixture, root: &str, len: usize) {
    let name = |i: usize| {
        if i == 0 {
            root.to_string()
        } else {
            format!("{}.{}", root, i)
        }
    };
    for i in 0..len {
        let next = (i + 1 < len).then(|| name(i + 1));
        fx.update(&name(i), &page(next.as_deref(), &["v"])).unwrap();
    }
}

#[test]
fn test_blank_next_link_truncates() {
    let mut fx = ChainFixture::new(&["FOO"]);
    build_chain(&mut fx, "FOO", 4);
    assert_eq!(fx.names("FOO").len(), 4);

    let report = fx.update("FOO.1", &page(None, &["v"])).unwrap();
    assert_eq!(report.outcome, UpdateOutcome::Completed { removed: 2 });
    assert_eq!(fx.names("FOO"), vec!["FOO", "FOO.1"]);
    assert_eq!(fx.metrics.feed().truncations_total.get(), 1);

    let again = fx.update("FOO.1", &page(None, &["v"])).unwrap();
    assert_eq!(again.outcome, UpdateOutcome::Completed { removed: 0 });
    assert_eq!(fx.metrics.feed().truncations_total.get(), 1);
}

#[test]
fn test_update_for_dropped_link_is_detached() {
    let mut fx = ChainFixture::new(&["FOO"]);
    build_chain(&mut fx, "FOO", 3);
    fx.update("FOO", &page(None, &[])).unwrap();

    let report = fx.update("FOO.2", &page(None, &["late"])).unwrap();
    assert_eq!(report.outcome, UpdateOutcome::Detached);
    assert!(!report.published);
    assert_eq!(fx.names("FOO"), vec!["FOO"]);
    assert_eq!(fx.metrics.feed().detached_updates_total.get(), 1);
}

#[test]
fn test_truncation_prunes_stream_registry() {
    let mut fx = ChainFixture::new(&["FOO"]);
    build_chain(&mut fx, "FOO", 4);
    assert_eq!(fx.builder.registered(), 4);

    fx.update("FOO", &page(None, &["v"])).unwrap();
    assert_eq!(fx.builder.registered(), 1);
}

#[test]
fn test_truncation_releases_cache_entries() {
    let mut fx =
        ChainFixture::with_policy(&["FOO"], SnapshotPolicy::Continuous, MemoryCache::with_capacity(3));
    for _ in 0..6 {
        fx.update("FOO", &page(Some("FOO.1"), &["A"])).unwrap();
        fx.update("FOO.1", &page(None, &["B"])).unwrap();
        assert_eq!(fx.cache.len(), 2);

        let report = fx.update("FOO", &page(None, &["A"])).unwrap();
        assert_eq!(report.outcome, UpdateOutcome::Completed { removed: 1 });
        assert_eq!(fx.cache.len(), 1);
    }
    assert_eq!(fx.names("FOO"), vec!["FOO"]);
    assert_eq!(fx.builder.registered(), 1);
}

#[test]
fn test_rediscovery_after_truncation() {
    let mut fx = ChainFixture::new(&["FOO"]);
    build_chain(&mut fx, "FOO", 2);
    fx.update("FOO", &page(None, &[])).unwrap();
    assert_eq!(fx.names("FOO"), vec!["FOO"]);

    fx.update("FOO", &page(Some("FOO.1"), &[])).unwrap();
    assert_eq!(fx.names("FOO"), vec!["FOO", "FOO.1"]);
    let report = fx.update("FOO.1", &page(None, &["back"])).unwrap();
    assert!(report.published);
}

// ============================================================================
// FAILURES
// ============================================================================

#[test]
fn test_absent_next_link_aborts_update() {
    let mut fx = ChainFixture::new(&["FOO"]);
    let mut fields = FieldMap::new();
    fields.push_str(240, "A");

    let err = fx.update("FOO", &fields).unwrap_err();
    match err {
        UpdateError::Decode(e) => assert_eq!(e.kind, DecodeErrorKind::MissingField),
        other => panic!("unexpected error {:?}", other),
    }

    let root = fx.store.get("FOO").unwrap().root().unwrap();
    assert!(!root.has_snapshot());
    assert!(!root.has_live_entry());
}

#[test]
fn test_cache_failure_is_fatal_for_the_update() {
    let mut fx =
        ChainFixture::with_policy(&["FOO"], SnapshotPolicy::Continuous, MemoryCache::with_capacity(1));
    fx.update("FOO", &page(Some("FOO.1"), &["A"])).unwrap();

    let err = fx.update("FOO.1", &page(None, &["B"])).unwrap_err();
    assert!(matches!(err, UpdateError::Cache(_)));
    assert_eq!(err.code(), "cache_error");

    // The structural change happened before the cache step
    let link = fx.store.get("FOO").unwrap().link(1).unwrap();
    assert!(!link.has_snapshot());
}

// ============================================================================
// PUBLICATION
// ============================================================================

#[test]
fn test_continuous_publication_replaces_snapshot() {
    let mut fx = ChainFixture::new(&["FOO"]);
    fx.update("FOO", &page(Some("FOO.1"), &["A"])).unwrap();
    fx.update("FOO.1", &page(None, &["B", "C"])).unwrap();

    let chain = fx.store.get("FOO").unwrap().clone();
    let first = chain.link(1).unwrap().snapshot().unwrap();
    assert_eq!(first.entries(), ["B".to_string(), "C".to_string()]);
    assert_eq!(first.item_name, "FOO");
    assert_eq!(first.part_number, 1);
    assert!(first.complete);

    fx.update("FOO.1", &page(None, &["D"])).unwrap();
    let second = chain.link(1).unwrap().snapshot().unwrap();
    assert_eq!(second.entries(), ["D".to_string()]);
    // Earlier handles are unaffected by later writes
    assert_eq!(first.entries().len(), 2);
}

#[test]
fn test_at_trigger_policy_defers_publication() {
    let mut fx =
        ChainFixture::with_policy(&["FOO"], SnapshotPolicy::AtTrigger, MemoryCache::new());
    let report = fx.update("FOO", &page(None, &["A"])).unwrap();
    assert!(!report.published);

    let root = fx.store.get("FOO").unwrap().root().unwrap();
    assert!(root.has_live_entry());
    assert!(!root.has_snapshot());
}

#[test]
fn test_snapshot_never_reverts_to_empty() {
    let mut fx = ChainFixture::new(&["FOO"]);
    fx.update("FOO", &page(None, &["A"])).unwrap();
    let root = fx.store.get("FOO").unwrap().root().unwrap();
    assert!(root.has_snapshot());

    let _ = fx.update("FOO", &FieldMap::new());
    fx.update("FOO", &page(None, &[])).unwrap();
    assert!(root.has_snapshot());
}

// ============================================================================
// PROPERTIES
// ============================================================================

#[test]
fn prop_chain_length_matches_discovery() {
    proptest!(|(len in 1usize..12)| {
        let mut fx = ChainFixture::new(&["SYM"]);
        build_chain(&mut fx, "SYM", len);
        prop_assert_eq!(fx.names("SYM").len(), len);
        prop_assert_eq!(fx.metrics.feed().links_discovered_total.get() as usize, len - 1);
    });
}

#[test]
fn prop_truncation_is_idempotent() {
    proptest!(|(len in 2usize..10, cut in 0usize..10, repeats in 1usize..4)| {
        let cut = cut % len;
        let mut fx = ChainFixture::new(&["SYM"]);
        build_chain(&mut fx, "SYM", len);

        let item = if cut == 0 { "SYM".to_string() } else { format!("SYM.{}", cut) };
        for _ in 0..repeats {
            fx.update(&item, &page(None, &[])).unwrap();
            prop_assert_eq!(fx.names("SYM").len(), cut + 1);
        }
    });
}
