use std::sync::Arc;

use poolledger::{
    ManualClock, Origin, SeqClass, SeqFamily, SequenceConfig, SequenceTracker, SeverityPolicy,
    Timestamp, WindowSpec,
};

fn tracker() -> SequenceTracker {
    let config = SequenceConfig {
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
    };
    SequenceTracker::new(
        config,
        Arc::new(ManualClock::new(Timestamp::from_secs(1_000))),
        Arc::new(SeverityPolicy::new()),
    )
    .unwrap()
}

fn admit(tracker: &mut SequenceTracker, seq: u64, origin: Origin) -> SeqClass {
    tracker
        .admit(SeqFamily::Shares, seq, Timestamp::from_secs(seq), origin)
        .unwrap()
        .class
}

/// Reload of 1 and 3..=16386: seq 2 slides out of the window while missing.
fn reload_losing_seq_two(tracker: &mut SequenceTracker) {
    tracker.begin_reload();
    admit(tracker, 1, Origin::Reload);
    for seq in 3..=16_386 {
        admit(tracker, seq, Origin::Reload);
    }
    tracker.finish_reload();
}

#[test]
fn sequence_lost_during_reload_is_recovered_from_the_live_feed() {
    let mut tracker = tracker();
    reload_losing_seq_two(&mut tracker);
    let window = tracker.window(SeqFamily::Shares).unwrap();
    assert_eq!(window.counters().lost, 1);
    assert_eq!(window.reload_lost().collect::<Vec<_>>(), vec![2]);
    let ok_before = window.counters().ok;

    assert_eq!(admit(&mut tracker, 2, Origin::Socket), SeqClass::Recovered);
    let counters = tracker.counters(SeqFamily::Shares);
    assert_eq!(counters.lost, 0);
    assert_eq!(counters.recovered, 1);
    assert_eq!(counters.ok, ok_before + 1);

    // Recovery is one-shot.
    assert_eq!(admit(&mut tracker, 2, Origin::Socket), SeqClass::ReloadOverlap);
}

#[test]
fn stale_live_arrival_not_in_lost_list_is_an_expected_duplicate() {
    let mut tracker = tracker();
    reload_losing_seq_two(&mut tracker);

    let class = admit(&mut tracker, 1, Origin::Socket);
    assert_eq!(class, SeqClass::ReloadOverlap);
    assert!(class.discards());
    let counters = tracker.counters(SeqFamily::Shares);
    assert_eq!(counters.duplicate, 1);
    assert_eq!(counters.stale, 0);
}

#[test]
fn live_arrival_below_everything_reloaded_is_stale() {
    let mut tracker = tracker();
    tracker.begin_reload();
    admit(&mut tracker, 10, Origin::Reload);
    for seq in 12..=16_396 {
        admit(&mut tracker, seq, Origin::Reload);
    }
    tracker.finish_reload();

    assert_eq!(admit(&mut tracker, 3, Origin::Socket), SeqClass::Stale);
    let counters = tracker.counters(SeqFamily::Shares);
    assert_eq!(counters.stale, 1);
    assert_eq!(counters.duplicate, 0);

    assert_eq!(admit(&mut tracker, 10, Origin::Socket), SeqClass::ReloadOverlap);
    assert_eq!(admit(&mut tracker, 11, Origin::Socket), SeqClass::Recovered);
}

#[test]
fn live_arrival_inside_reload_window_is_a_plain_duplicate() {
    let mut tracker = tracker();
    reload_losing_seq_two(&mut tracker);
    assert_eq!(admit(&mut tracker, 16_000, Origin::EarlySocket), SeqClass::Duplicate);
}

#[test]
fn lost_list_is_dropped_once_live_passes_the_reload_point() {
    let mut tracker = tracker();
    reload_losing_seq_two(&mut tracker);

    assert_eq!(admit(&mut tracker, 16_387, Origin::Socket), SeqClass::Ok);
    let window = tracker.window(SeqFamily::Shares).unwrap();
    assert_eq!(window.reload_lost().count(), 0);

    assert_eq!(admit(&mut tracker, 2, Origin::Socket), SeqClass::Stale);
    let counters = tracker.counters(SeqFamily::Shares);
    assert_eq!(counters.lost, 1);
    assert_eq!(counters.stale, 1);
}

#[test]
fn losses_outside_a_reload_pass_are_not_collected() {
    let mut tracker = tracker();
    admit(&mut tracker, 1, Origin::Socket);
    for seq in 3..=16_386 {
        admit(&mut tracker, seq, Origin::Socket);
    }
    let window = tracker.window(SeqFamily::Shares).unwrap();
    assert_eq!(window.counters().lost, 1);
    assert_eq!(window.reload_lost().count(), 0);
}

#[test]
fn replayed_events_never_recover_from_the_lost_list() {
    let mut tracker = tracker();
    reload_losing_seq_two(&mut tracker);
    assert_eq!(admit(&mut tracker, 2, Origin::Reload), SeqClass::Stale);
    assert_eq!(
        tracker
            .window(SeqFamily::Shares)
            .unwrap()
            .reload_lost()
            .collect::<Vec<_>>(),
        vec![2]
    );
}
