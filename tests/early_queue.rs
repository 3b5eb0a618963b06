use std::cell::Cell;

use poolledger::{DrainOutcome, EarlyQueue, EarlyState, Timestamp};

const AGE_LIMIT_S: u64 = 60;

fn queue() -> EarlyQueue<&'static str> {
    EarlyQueue::new("shares", AGE_LIMIT_S)
}

fn at(secs: u64) -> Timestamp {
    Timestamp::from_secs(secs)
}

fn never_known(_: u64) -> bool {
    false
}

fn applies(_: &&'static str) -> Result<(), String> {
    Ok(())
}

fn fails(_: &&'static str) -> Result<(), String> {
    Err("aggregator busy".to_string())
}

#[test]
fn parked_items_stay_sorted_by_work_id() {
    let mut queue = queue();
    queue.park(30, at(1), "c");
    queue.park(10, at(2), "a");
    queue.park(20, at(3), "b1");
    queue.park(20, at(4), "b2");
    let order: Vec<_> = queue.iter().map(|item| item.payload).collect();
    assert_eq!(order, vec!["a", "b1", "b2", "c"]);
    assert_eq!(queue.counters().parked, 4);
}

#[test]
fn resolving_the_template_applies_one_item() {
    let mut queue = queue();
    queue.park(5, at(100), "x");
    queue.park(5, at(101), "y");
    let applied = Cell::new(0);
    let outcome = queue.drain_one(
        5,
        at(102),
        never_known,
        |_: &&'static str| -> Result<(), String> {
            applied.set(applied.get() + 1);
            Ok(())
        },
    );
    assert_eq!(outcome, DrainOutcome::Applied { work_id: 5 });
    assert_eq!(applied.get(), 1);
    assert_eq!(queue.len(), 1);
}

#[test]
fn item_waiting_on_a_later_template_is_left_in_front() {
    let mut queue = queue();
    queue.park(50, at(100), "later");
    let outcome = queue.drain_one(40, at(500), never_known, applies);
    assert_eq!(outcome, DrainOutcome::NotYet { work_id: 50 });
    let front = queue.iter().next().unwrap();
    assert_eq!(front.state, EarlyState::Pending { redo: 0 });
    assert_eq!(queue.counters().flagged, 0);
}

#[test]
fn unresolved_young_item_rotates_to_the_back() {
    let mut queue = queue();
    queue.park(3, at(100), "orphan");
    queue.park(4, at(100), "next");
    let outcome = queue.drain_one(4, at(110), never_known, applies);
    assert_eq!(outcome, DrainOutcome::Retried { work_id: 3, redo: 1 });
    let order: Vec<_> = queue.iter().map(|item| item.payload).collect();
    assert_eq!(order, vec!["next", "orphan"]);
}

#[test]
fn old_item_is_flagged_before_it_is_discarded() {
    let mut queue = queue();
    queue.park(7, at(100), "old");

    let first = queue.drain_one(8, at(100 + AGE_LIMIT_S + 1), never_known, applies);
    assert_eq!(first, DrainOutcome::Flagged { work_id: 7 });
    assert_eq!(queue.len(), 1);
    assert!(matches!(
        queue.iter().next().unwrap().state,
        EarlyState::StaleFlagged { .. }
    ));

    let second = queue.drain_one(9, at(100 + AGE_LIMIT_S + 2), never_known, applies);
    assert_eq!(second, DrainOutcome::Discarded { work_id: 7 });
    assert!(queue.is_empty());

    let counters = queue.counters();
    assert_eq!(counters.flagged, 1);
    assert_eq!(counters.discarded, 1);
}

#[test]
fn discarded_item_leaves_no_state_behind() {
    let mut queue = queue();
    queue.park(7, at(100), "old");
    queue.park(7, at(500), "young");

    queue.drain_one(7, at(170), never_known, fails);
    assert_eq!(
        queue.drain_one(7, at(171), never_known, fails),
        DrainOutcome::Retried { work_id: 7, redo: 1 }
    );
    let states: Vec<_> = queue.iter().map(|item| (item.payload, item.state)).collect();
    assert_eq!(
        states,
        vec![
            ("old", EarlyState::StaleFlagged { redo: 1 }),
            ("young", EarlyState::Pending { redo: 1 }),
        ]
    );

    assert_eq!(
        queue.drain_one(7, at(172), never_known, fails),
        DrainOutcome::Discarded { work_id: 7 }
    );
    let remaining: Vec<_> = queue.iter().map(|item| item.payload).collect();
    assert_eq!(remaining, vec!["young"]);
    assert_eq!(queue.counters().discarded, 1);
}

#[test]
fn flagged_item_is_still_applied_if_its_template_turns_up() {
    let mut queue = queue();
    queue.park(7, at(100), "late");
    queue.drain_one(8, at(200), never_known, applies);
    let outcome = queue.drain_one(8, at(201), |work_id| work_id == 7, applies);
    assert_eq!(outcome, DrainOutcome::Applied { work_id: 7 });
    assert_eq!(queue.counters().discarded, 0);
}

#[test]
fn apply_failures_go_through_the_same_age_limit() {
    let mut queue = queue();
    queue.park(2, at(100), "stuck");

    let retried = queue.drain_one(2, at(110), never_known, fails);
    assert_eq!(retried, DrainOutcome::Retried { work_id: 2, redo: 1 });
    let flagged = queue.drain_one(2, at(200), never_known, fails);
    assert_eq!(flagged, DrainOutcome::Flagged { work_id: 2 });
    let discarded = queue.drain_one(2, at(201), never_known, fails);
    assert_eq!(discarded, DrainOutcome::Discarded { work_id: 2 });
}

#[test]
fn age_limit_can_be_changed_at_runtime() {
    let mut queue = queue();
    queue.park(1, at(100), "item");
    queue.set_age_limit(5);
    let outcome = queue.drain_one(2, at(110), never_known, applies);
    assert_eq!(outcome, DrainOutcome::Flagged { work_id: 1 });
}

#[test]
fn empty_queue_reports_empty() {
    let mut queue = queue();
    assert_eq!(queue.drain_one(1, at(1), never_known, applies), DrainOutcome::Empty);
}
