use std::sync::Arc;

use poolledger::{
    ManualClock, Origin, SeqClass, SeqFamily, SeqMeta, SequenceConfig, SequenceError,
    SequenceTracker, SeverityPolicy, Timestamp, WindowSpec, SEQ_START_IGNORE,
};

fn compact_config() -> SequenceConfig {
    SequenceConfig {
        large: WindowSpec {
            size: 16_384,
            transient_limit_s: 16,
        },
        medium: WindowSpec {
            size: 8_192,
            transient_limit_s: 32,
        },
        small: WindowSpec {
            size: 8_192,
            transient_limit_s: 64,
        },
        ..SequenceConfig::default()
    }
}

fn tracker_with_clock() -> (SequenceTracker, ManualClock) {
    let clock = ManualClock::new(Timestamp::from_secs(1_700_000_000));
    let tracker = SequenceTracker::new(
        compact_config(),
        Arc::new(clock.clone()),
        Arc::new(SeverityPolicy::new()),
    )
    .unwrap();
    (tracker, clock)
}

fn admit(tracker: &mut SequenceTracker, family: SeqFamily, seq: u64) -> SeqClass {
    tracker
        .admit(family, seq, Timestamp::from_secs(seq), Origin::Socket)
        .unwrap()
        .class
}

#[test]
fn gap_is_recovered_when_the_missing_sequence_arrives() {
    let (mut tracker, _) = tracker_with_clock();
    for seq in 1..=100 {
        assert_eq!(admit(&mut tracker, SeqFamily::Shares, seq), SeqClass::Ok);
    }
    assert_eq!(tracker.counters(SeqFamily::Shares).ok, 100);

    let check = tracker
        .admit(SeqFamily::Shares, 102, Timestamp::from_secs(102), Origin::Socket)
        .unwrap();
    assert_eq!(check.class, SeqClass::Ok);
    assert_eq!(check.gap, 1);
    let counters = tracker.counters(SeqFamily::Shares);
    assert_eq!(counters.ok, 101);
    assert_eq!(counters.missing, 1);
    assert!(tracker.window(SeqFamily::Shares).unwrap().is_missing(101));

    assert_eq!(admit(&mut tracker, SeqFamily::Shares, 101), SeqClass::Recovered);
    let counters = tracker.counters(SeqFamily::Shares);
    assert_eq!(counters.recovered, 1);
    assert_eq!(counters.missing, 0);
    assert_eq!(counters.ok, 102);
}

#[test]
fn repeated_sequence_inside_window_is_duplicate() {
    let (mut tracker, _) = tracker_with_clock();
    admit(&mut tracker, SeqFamily::Block, 7);
    admit(&mut tracker, SeqFamily::Block, 8);
    assert_eq!(admit(&mut tracker, SeqFamily::Block, 7), SeqClass::Duplicate);
    let counters = tracker.counters(SeqFamily::Block);
    assert_eq!(counters.duplicate, 1);
    assert_eq!(counters.ok, 2);
}

#[test]
fn jump_past_high_limit_is_rejected_without_moving_the_window() {
    let (mut tracker, _) = tracker_with_clock();
    admit(&mut tracker, SeqFamily::Shares, 1);
    let high_limit = tracker.window(SeqFamily::Shares).unwrap().high_limit();
    assert_eq!(high_limit, 64);

    assert_eq!(
        admit(&mut tracker, SeqFamily::Shares, 1 + high_limit + 1),
        SeqClass::High
    );
    let window = tracker.window(SeqFamily::Shares).unwrap();
    assert_eq!(window.maxseq(), 1);
    assert_eq!(window.counters().high, 1);

    let check = tracker
        .admit(
            SeqFamily::Shares,
            1 + high_limit,
            Timestamp::from_secs(2),
            Origin::Socket,
        )
        .unwrap();
    assert_eq!(check.class, SeqClass::Ok);
    assert_eq!(check.gap, high_limit - 1);
}

#[test]
fn new_limits_reach_open_windows() {
    let (mut tracker, _) = tracker_with_clock();
    admit(&mut tracker, SeqFamily::Shares, 1);
    assert_eq!(admit(&mut tracker, SeqFamily::Shares, 201), SeqClass::High);

    tracker
        .set_config(SequenceConfig {
            high_shift: 4,
            ..compact_config()
        })
        .unwrap();
    assert_eq!(tracker.config().high_shift, 4);
    assert_eq!(tracker.window(SeqFamily::Shares).unwrap().high_limit(), 1_024);

    let check = tracker
        .admit(SeqFamily::Shares, 201, Timestamp::from_secs(201), Origin::Socket)
        .unwrap();
    assert_eq!(check.class, SeqClass::Ok);
    assert_eq!(check.gap, 199);
    let counters = tracker.counters(SeqFamily::Shares);
    assert_eq!(counters.high, 1);
    assert_eq!(counters.missing, 199);
}

#[test]
fn bad_replacement_config_leaves_the_tracker_unchanged() {
    let (mut tracker, _) = tracker_with_clock();
    admit(&mut tracker, SeqFamily::Shares, 1);
    let mut bad = compact_config();
    bad.large.size = 1_000;
    assert!(matches!(
        tracker.set_config(bad),
        Err(SequenceError::InvalidWindowSize { size: 1_000, .. })
    ));
    assert_eq!(tracker.config().high_shift, compact_config().high_shift);
    assert_eq!(tracker.window(SeqFamily::Shares).unwrap().high_limit(), 64);
}

#[test]
fn sliding_past_a_missing_slot_declares_it_lost_once() {
    let (mut tracker, _) = tracker_with_clock();
    admit(&mut tracker, SeqFamily::Shares, 1);
    for seq in 3..=16_385 {
        admit(&mut tracker, SeqFamily::Shares, seq);
    }
    assert_eq!(tracker.counters(SeqFamily::Shares).missing, 1);

    let check = tracker
        .admit(SeqFamily::Shares, 16_386, Timestamp::from_secs(9), Origin::Socket)
        .unwrap();
    assert_eq!(check.lost, 1);
    let window = tracker.window(SeqFamily::Shares).unwrap();
    assert_eq!(window.seqbase(), 3);
    assert!(window.seqbase() <= window.minseq());
    assert!(window.minseq() <= window.maxseq());
    let counters = window.counters();
    assert_eq!(counters.lost, 1);
    assert_eq!(counters.missing, 0);

    // The evicted slot is gone for good on the live feed.
    assert_eq!(admit(&mut tracker, SeqFamily::Shares, 2), SeqClass::Stale);
    let counters = tracker.counters(SeqFamily::Shares);
    assert_eq!(counters.stale, 1);
    assert_eq!(counters.lost, 1);
}

#[test]
fn arrival_below_base_inside_window_extends_it_downward() {
    let (mut tracker, _) = tracker_with_clock();
    admit(&mut tracker, SeqFamily::Heartbeat, 100);
    let check = tracker
        .admit(SeqFamily::Heartbeat, 95, Timestamp::from_secs(95), Origin::Socket)
        .unwrap();
    assert_eq!(check.class, SeqClass::Ok);
    assert_eq!(check.gap, 4);
    let window = tracker.window(SeqFamily::Heartbeat).unwrap();
    assert_eq!(window.seqbase(), 95);
    assert_eq!(window.minseq(), 95);
    assert_eq!(window.counters().missing, 4);

    assert_eq!(admit(&mut tracker, SeqFamily::Heartbeat, 97), SeqClass::Recovered);
    assert_eq!(tracker.counters(SeqFamily::Heartbeat).missing, 3);
}

#[test]
fn records_origin_and_logical_time_of_each_arrival() {
    let (mut tracker, _) = tracker_with_clock();
    tracker
        .admit(SeqFamily::WorkInfo, 10, Timestamp::from_secs(55), Origin::EarlySocket)
        .unwrap();
    let arrival = tracker.window(SeqFamily::WorkInfo).unwrap().arrival(10).unwrap();
    assert_eq!(arrival.origin_code, Origin::EarlySocket.code());
    assert_eq!(arrival.logical_time, Timestamp::from_secs(55));
    assert!(tracker.window(SeqFamily::WorkInfo).unwrap().arrival(11).is_none());
}

#[test]
fn outstanding_gaps_turn_transient_once_after_the_limit() {
    let (mut tracker, clock) = tracker_with_clock();
    admit(&mut tracker, SeqFamily::Shares, 1);
    admit(&mut tracker, SeqFamily::Shares, 3);
    assert_eq!(tracker.sweep_transient(), 0);

    clock.advance_secs(17);
    assert_eq!(tracker.sweep_transient(), 1);
    assert_eq!(tracker.sweep_transient(), 0);
    let counters = tracker.counters(SeqFamily::Shares);
    assert_eq!(counters.transient, 1);
    assert_eq!(counters.missing, 1);
}

#[test]
fn transient_sweep_is_suspended_during_reload() {
    let (mut tracker, clock) = tracker_with_clock();
    tracker.begin_reload();
    tracker
        .admit(SeqFamily::Shares, 1, Timestamp::from_secs(1), Origin::Reload)
        .unwrap();
    tracker
        .admit(SeqFamily::Shares, 3, Timestamp::from_secs(3), Origin::Reload)
        .unwrap();
    clock.advance_secs(600);
    assert_eq!(tracker.sweep_transient(), 0);
    tracker.finish_reload();
    assert_eq!(tracker.sweep_transient(), 1);
}

#[test]
fn meta_block_checks_shared_and_family_counters() {
    let (mut tracker, _) = tracker_with_clock();
    let first = SeqMeta {
        seqall: 1,
        seqcmd: 1,
        seqstt: 1_700_000_000,
        seqpid: 4242,
    };
    let check = tracker
        .admit_meta(&first, SeqFamily::Shares, Timestamp::from_secs(1), Origin::Socket)
        .unwrap()
        .unwrap();
    assert_eq!(check.all.class, SeqClass::Ok);
    assert!(!check.discards());

    // A fresh shared number with a repeated family number is still a duplicate.
    let repeat = SeqMeta { seqall: 2, ..first };
    let check = tracker
        .admit_meta(&repeat, SeqFamily::Shares, Timestamp::from_secs(2), Origin::Socket)
        .unwrap()
        .unwrap();
    assert_eq!(check.all.class, SeqClass::Ok);
    assert_eq!(check.family.class, SeqClass::Duplicate);
    assert!(check.discards());
    assert_eq!(tracker.counters(SeqFamily::All).ok, 2);
}

#[test]
fn ignore_sentinel_skips_checking() {
    let (mut tracker, _) = tracker_with_clock();
    let meta = SeqMeta {
        seqall: 5,
        seqcmd: 5,
        seqstt: SEQ_START_IGNORE,
        seqpid: 1,
    };
    let check = tracker
        .admit_meta(&meta, SeqFamily::Auth, Timestamp::from_secs(1), Origin::Socket)
        .unwrap();
    assert!(check.is_none());
    assert_eq!(tracker.set_count(), 0);
}

#[test]
fn producer_restart_opens_a_new_sequence_set() {
    let (mut tracker, _) = tracker_with_clock();
    let run_one = SeqMeta {
        seqall: 900,
        seqcmd: 900,
        seqstt: 100,
        seqpid: 1,
    };
    let run_two = SeqMeta {
        seqall: 0,
        seqcmd: 0,
        seqstt: 200,
        seqpid: 2,
    };
    tracker
        .admit_meta(&run_one, SeqFamily::Block, Timestamp::from_secs(1), Origin::Socket)
        .unwrap();
    let check = tracker
        .admit_meta(&run_two, SeqFamily::Block, Timestamp::from_secs(2), Origin::Socket)
        .unwrap()
        .unwrap();
    assert_eq!(check.family.class, SeqClass::Ok);
    assert_eq!(tracker.set_count(), 2);

    let report = tracker.report();
    assert_eq!(report.sets.len(), 2);
    assert_eq!(report.sets[1].seqstt, 200);
    assert_eq!(report.totals.ok, 4);
}

#[test]
fn window_size_must_be_a_large_enough_power_of_two() {
    let clock = Arc::new(ManualClock::new(Timestamp::ZERO));
    let severity = Arc::new(SeverityPolicy::new());

    let mut config = compact_config();
    config.small.size = 10_000;
    let err = SequenceTracker::new(config, clock.clone(), severity.clone())
        .err()
        .expect("size rejected");
    assert_eq!(
        err,
        SequenceError::InvalidWindowSize {
            size: 10_000,
            min_size: 8_192
        }
    );

    let mut config = compact_config();
    config.medium.size = 4_096;
    assert!(SequenceTracker::new(config, clock, severity).is_err());
}
