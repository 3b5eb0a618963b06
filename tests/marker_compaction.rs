use std::sync::Arc;

use poolledger::{
    Aggregator, CapacityConfig, CompactionError, Compactor, IngestMode, LedgerTables,
    MarkerStatus, MemoryGateway, PersistenceGateway, Provenance, RowKind, SecondaryKey,
    SeverityPolicy, ShareOutcome, ShareRecord, ShareUpdate, ShutdownSignal, Subject, Timestamp,
};

struct Fixture {
    aggregator: Aggregator,
    compactor: Compactor,
    gateway: MemoryGateway,
    shutdown: ShutdownSignal,
}

fn fixture() -> Fixture {
    let tables = Arc::new(LedgerTables::new(&CapacityConfig::default()));
    let shutdown = ShutdownSignal::new();
    Fixture {
        aggregator: Aggregator::new(tables.clone(), Arc::new(SeverityPolicy::new())),
        compactor: Compactor::new(tables, shutdown.clone()),
        gateway: MemoryGateway::new(),
        shutdown,
    }
}

fn provenance() -> Provenance {
    Provenance::new("tester", "compaction_test", "127.0.0.1", Timestamp::from_secs(50_000))
}

fn share_update(work_id: u64, user_id: i64, diff: f64, address: &str) -> ShareUpdate {
    let record = ShareRecord {
        work_id,
        user_id,
        worker: format!("worker{user_id}"),
        outcome: ShareOutcome::Accepted,
        diff,
        created: Timestamp::from_secs(work_id),
        address: Some(address.to_string()),
        agent: None,
    };
    ShareUpdate::from_share(&record, &["address".to_string()])
}

/// U1 and U2 mine in ranges 1000 and 1500; range 1000 is aged first.
fn populate(fx: &Fixture) {
    for update in [
        share_update(1_000, 1, 4.0, "a"),
        share_update(1_000, 2, 6.0, "b"),
        share_update(1_500, 1, 1.0, "a"),
    ] {
        fx.aggregator.update(&update, IngestMode::Live).unwrap();
    }
    fx.aggregator.age_range(1_000, &fx.gateway, &provenance()).unwrap();
}

#[test]
fn compaction_replaces_accumulators_with_rollups() {
    let fx = fixture();
    populate(&fx);
    fx.compactor
        .mark_ready(1, 1_000, 2_000, "block 100", &fx.gateway, &provenance())
        .unwrap();

    let report = fx.compactor.compact(1, &fx.gateway, &provenance()).unwrap();
    assert_eq!(report.subject_rollups, 2);
    assert_eq!(report.secondary_rollups, 2);
    assert_eq!(report.accumulators_removed, 3 + 3 + 2);

    let rollups = fx.compactor.rollups(1);
    assert_eq!(rollups.len(), 2);
    let (subject, u1) = &rollups[0];
    assert_eq!(subject, &Subject::new(1, "worker1"));
    assert_eq!(u1.totals.accepted.diff, 5.0);
    assert_eq!(u1.sources, 2);
    assert_eq!(fx.aggregator.primary_count(1_000, 2_000), 0);
    assert_eq!(fx.aggregator.secondary_count(1_000, 2_000), 0);
    assert!(fx.aggregator.pool(1_000).is_none());

    let pool = fx.compactor.pool_rollup(1).unwrap();
    assert_eq!(pool.totals.accepted.diff, 11.0);
    assert_eq!(pool.totals.accepted.count, 3);

    let marker = fx.compactor.marker(1).unwrap();
    assert_eq!(marker.status, MarkerStatus::Processed);
    assert_eq!(fx.gateway.row_count(RowKind::Accumulator), 0);
    assert_eq!(fx.gateway.row_count(RowKind::Rollup), 2);
    assert_eq!(fx.gateway.row_count(RowKind::PoolRollup), 1);
    let stored = fx.gateway.current(RowKind::Marker, "1").unwrap().unwrap();
    assert_eq!(stored.row["status"], "PROCESSED");
}

#[test]
fn compacting_a_processed_marker_changes_nothing() {
    let fx = fixture();
    populate(&fx);
    fx.compactor
        .mark_ready(1, 1_000, 2_000, "block 100", &fx.gateway, &provenance())
        .unwrap();
    fx.compactor.compact(1, &fx.gateway, &provenance()).unwrap();
    let commits = fx.gateway.commit_count();
    let rollups = fx.compactor.rollups(1);

    let err = fx.compactor.compact(1, &fx.gateway, &provenance()).unwrap_err();
    assert!(matches!(err, CompactionError::AlreadyProcessed { marker_id: 1 }));
    assert!(!err.is_fatal());
    assert_eq!(fx.gateway.commit_count(), commits);
    assert_eq!(fx.compactor.rollups(1), rollups);
}

#[test]
fn failed_commit_leaves_marker_ready_and_accumulators_in_place() {
    let fx = fixture();
    populate(&fx);
    fx.compactor
        .mark_ready(1, 1_000, 2_000, "block 100", &fx.gateway, &provenance())
        .unwrap();

    fx.gateway.refuse_next_commits(1);
    let err = fx.compactor.compact(1, &fx.gateway, &provenance()).unwrap_err();
    assert!(matches!(err, CompactionError::Persist(_)));
    assert_eq!(fx.compactor.marker(1).unwrap().status, MarkerStatus::Ready);
    assert_eq!(fx.aggregator.primary_count(1_000, 2_000), 3);
    assert!(fx.compactor.rollups(1).is_empty());

    fx.compactor.compact(1, &fx.gateway, &provenance()).unwrap();
    assert_eq!(fx.compactor.marker(1).unwrap().status, MarkerStatus::Processed);
}

#[test]
fn shutdown_cancels_compaction_before_commit() {
    let fx = fixture();
    populate(&fx);
    fx.compactor
        .mark_ready(1, 1_000, 2_000, "block 100", &fx.gateway, &provenance())
        .unwrap();
    let commits = fx.gateway.commit_count();

    fx.shutdown.trigger();
    let err = fx.compactor.compact(1, &fx.gateway, &provenance()).unwrap_err();
    assert!(matches!(err, CompactionError::Cancelled { marker_id: 1 }));
    assert_eq!(fx.gateway.commit_count(), commits);
    assert_eq!(fx.aggregator.primary_count(1_000, 2_000), 3);
}

#[test]
fn marker_ranges_must_be_valid_and_disjoint() {
    let fx = fixture();
    let prov = provenance();
    assert!(matches!(
        fx.compactor.mark_ready(1, 10, 10, "empty", &fx.gateway, &prov),
        Err(CompactionError::InvalidRange { start: 10, end: 10 })
    ));
    fx.compactor
        .mark_ready(1, 10, 20, "first", &fx.gateway, &prov)
        .unwrap();
    assert!(matches!(
        fx.compactor.mark_ready(1, 30, 40, "dup id", &fx.gateway, &prov),
        Err(CompactionError::MarkerExists(1))
    ));
    assert!(matches!(
        fx.compactor.mark_ready(2, 15, 25, "overlap", &fx.gateway, &prov),
        Err(CompactionError::Overlaps {
            marker_id: 2,
            other: 1
        })
    ));
    fx.compactor
        .mark_ready(2, 20, 30, "adjacent", &fx.gateway, &prov)
        .unwrap();
    assert!(matches!(
        fx.compactor.compact(9, &fx.gateway, &prov),
        Err(CompactionError::NotFound(9))
    ));
}

#[test]
fn reprocess_returns_marker_to_ready_and_drops_rollups() {
    let fx = fixture();
    populate(&fx);
    fx.compactor
        .mark_ready(1, 1_000, 2_000, "block 100", &fx.gateway, &provenance())
        .unwrap();
    assert!(matches!(
        fx.compactor.reprocess(1, &fx.gateway, &provenance()),
        Err(CompactionError::NotProcessed { marker_id: 1 })
    ));
    fx.compactor.compact(1, &fx.gateway, &provenance()).unwrap();

    let removed = fx.compactor.reprocess(1, &fx.gateway, &provenance()).unwrap();
    assert_eq!(removed, 2 + 2 + 1);
    assert_eq!(fx.compactor.marker(1).unwrap().status, MarkerStatus::Ready);
    assert!(fx.compactor.rollups(1).is_empty());
    assert!(fx.compactor.pool_rollup(1).is_none());
    assert_eq!(fx.gateway.row_count(RowKind::Rollup), 0);
    assert_eq!(fx.gateway.history(RowKind::Rollup, "1/1/worker1").unwrap().len(), 1);
    assert_eq!(fx.gateway.row_count(RowKind::Accumulator), 2);
    assert_eq!(fx.gateway.row_count(RowKind::SecondaryAccumulator), 2);
    assert_eq!(fx.gateway.row_count(RowKind::PoolAccumulator), 1);
}

#[test]
fn recompacting_after_reprocess_reproduces_the_totals() {
    let fx = fixture();
    populate(&fx);
    fx.compactor
        .mark_ready(1, 1_000, 2_000, "block 100", &fx.gateway, &provenance())
        .unwrap();
    fx.compactor.compact(1, &fx.gateway, &provenance()).unwrap();
    let totals_before: Vec<_> = fx
        .compactor
        .rollups(1)
        .into_iter()
        .map(|(subject, rollup)| (subject, rollup.totals.accepted.count, rollup.totals.accepted.diff))
        .collect();

    fx.compactor.reprocess(1, &fx.gateway, &provenance()).unwrap();
    assert_eq!(fx.aggregator.primary_count(1_000, 2_000), 2);
    assert_eq!(fx.aggregator.secondary_count(1_000, 2_000), 2);
    let pool = fx.aggregator.pool(1_000).unwrap();
    assert_eq!(pool.accepted.diff, 11.0);
    assert!(!pool.is_new());

    let replay = share_update(1_000, 1, 4.0, "a");
    assert!(fx.aggregator.update(&replay, IngestMode::Reload).is_err());

    let report = fx.compactor.compact(1, &fx.gateway, &provenance()).unwrap();
    assert_eq!(report.subject_rollups, 2);
    assert_eq!(report.secondary_rollups, 2);
    assert_eq!(report.accumulators_removed, 2 + 2 + 1);
    let totals_after: Vec<_> = fx
        .compactor
        .rollups(1)
        .into_iter()
        .map(|(subject, rollup)| (subject, rollup.totals.accepted.count, rollup.totals.accepted.diff))
        .collect();
    assert_eq!(totals_after, totals_before);
    let pool = fx.compactor.pool_rollup(1).unwrap();
    assert_eq!(pool.totals.accepted.diff, 11.0);
    assert_eq!(pool.totals.accepted.count, 3);
    let address_a = &fx.compactor.secondary_rollups(1)[0];
    assert_eq!(address_a.0, SecondaryKey::new("address", "a"));
    assert_eq!(address_a.1.totals.accepted.diff, 5.0);
    assert_eq!(fx.gateway.row_count(RowKind::Accumulator), 0);
    assert_eq!(fx.gateway.row_count(RowKind::PoolAccumulator), 0);
}

#[test]
fn secondary_rebuild_replaces_only_secondary_rollups() {
    let fx = fixture();
    populate(&fx);
    fx.compactor
        .mark_ready(1, 1_000, 2_000, "block 100", &fx.gateway, &provenance())
        .unwrap();
    fx.compactor.compact(1, &fx.gateway, &provenance()).unwrap();
    let primary_before = fx.compactor.rollups(1);

    let replay = vec![
        share_update(1_000, 1, 4.0, "c"),
        share_update(1_000, 2, 6.0, "c"),
        share_update(1_500, 1, 1.0, "d"),
        share_update(3_000, 1, 99.0, "c"),
    ];
    let rebuild = fx
        .compactor
        .rebuild_secondary(1, replay, &fx.gateway, &provenance())
        .unwrap();
    assert_eq!(rebuild.replaced, 2);
    assert_eq!(rebuild.rebuilt, 2);

    let secondary = fx.compactor.secondary_rollups(1);
    let keys: Vec<_> = secondary.iter().map(|(key, _)| key.clone()).collect();
    assert_eq!(
        keys,
        vec![SecondaryKey::new("address", "c"), SecondaryKey::new("address", "d")]
    );
    assert_eq!(secondary[0].1.totals.accepted.diff, 10.0);
    assert_eq!(fx.compactor.rollups(1), primary_before);
    assert_eq!(fx.gateway.row_count(RowKind::SecondaryRollup), 2);
}
