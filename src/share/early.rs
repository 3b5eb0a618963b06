use crate::clock::{secs_to_micros, Timestamp};
use std::collections::VecDeque;
use std::fmt;
use tracing::{debug, info};

/// Retry state of a parked item. A StaleFlagged item that is still too old
/// on its next pass leaves the queue for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EarlyState {
    Pending { redo: u32 },
    StaleFlagged { redo: u32 },
}

impl EarlyState {
    pub fn redo_count(&self) -> u32 {
        match self {
            EarlyState::Pending { redo } | EarlyState::StaleFlagged { redo } => *redo,
        }
    }
}

/// An event parked until its work template is known.
#[derive(Debug, Clone)]
pub struct EarlyItem<T> {
    pub work_id: u64,
    pub logical_time: Timestamp,
    pub state: EarlyState,
    pub payload: T,
}

/// What one `drain_one` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    Empty,
    /// Oldest item waits on a later template; put back untouched.
    NotYet { work_id: u64 },
    Applied { work_id: u64 },
    Retried { work_id: u64, redo: u32 },
    Flagged { work_id: u64 },
    Discarded { work_id: u64 },
}

/// Counters describing queue activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EarlyCounters {
    pub parked: u64,
    pub applied: u64,
    pub retried: u64,
    pub flagged: u64,
    pub discarded: u64,
}

/// Events whose work template has not been seen yet, lowest work id first.
pub struct EarlyQueue<T> {
    label: &'static str,
    items: VecDeque<EarlyItem<T>>,
    age_limit_us: u64,
    counters: EarlyCounters,
}

impl<T> EarlyQueue<T> {
    pub fn new(label: &'static str, age_limit_s: u64) -> Self {
        Self {
            label,
            items: VecDeque::new(),
            age_limit_us: secs_to_micros(age_limit_s),
            counters: EarlyCounters::default(),
        }
    }

    pub fn set_age_limit(&mut self, age_limit_s: u64) {
        self.age_limit_us = secs_to_micros(age_limit_s);
    }

    /// Parks `payload` behind every item with a work id no greater than its own.
    pub fn park(&mut self, work_id: u64, logical_time: Timestamp, payload: T) {
        let at = self.items.partition_point(|item| item.work_id <= work_id);
        self.items.insert(
            at,
            EarlyItem {
                work_id,
                logical_time,
                state: EarlyState::Pending { redo: 0 },
                payload,
            },
        );
        self.counters.parked += 1;
        debug!(queue = self.label, work_id, depth = self.items.len(), "parked early arrival");
    }

    /// Examines at most one parked item after `resolved_id` became known.
    ///
    /// `known` reports whether a work id now resolves; `apply` hands the
    /// payload to the aggregator and reports success.
    pub fn drain_one<K, A, E>(
        &mut self,
        resolved_id: u64,
        now: Timestamp,
        known: K,
        apply: A,
    ) -> DrainOutcome
    where
        K: Fn(u64) -> bool,
        A: FnOnce(&T) -> Result<(), E>,
        E: fmt::Display,
    {
        let Some(mut item) = self.items.pop_front() else {
            return DrainOutcome::Empty;
        };
        let work_id = item.work_id;
        if work_id > resolved_id {
            self.items.push_front(item);
            return DrainOutcome::NotYet { work_id };
        }

        if work_id == resolved_id || known(work_id) {
            match apply(&item.payload) {
                Ok(()) => {
                    self.counters.applied += 1;
                    return DrainOutcome::Applied { work_id };
                }
                Err(err) => {
                    debug!(queue = self.label, work_id, error = %err, "early apply failed");
                }
            }
        }

        let age = now.micros_since(item.logical_time);
        if age > self.age_limit_us {
            match item.state {
                EarlyState::StaleFlagged { redo } => {
                    self.counters.discarded += 1;
                    info!(
                        queue = self.label,
                        work_id,
                        redo,
                        age_s = age / 1_000_000,
                        "discarded early arrival, too old"
                    );
                    return DrainOutcome::Discarded { work_id };
                }
                EarlyState::Pending { redo } => {
                    item.state = EarlyState::StaleFlagged { redo: redo + 1 };
                    self.items.push_back(item);
                    self.counters.flagged += 1;
                    return DrainOutcome::Flagged { work_id };
                }
            }
        }

        let redo = item.state.redo_count() + 1;
        item.state = match item.state {
            EarlyState::StaleFlagged { .. } => EarlyState::StaleFlagged { redo },
            EarlyState::Pending { .. } => EarlyState::Pending { redo },
        };
        self.items.push_back(item);
        self.counters.retried += 1;
        DrainOutcome::Retried { work_id, redo }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn counters(&self) -> EarlyCounters {
        self.counters
    }

    /// Parked items in queue order.
    pub fn iter(&self) -> impl Iterator<Item = &EarlyItem<T>> + '_ {
        self.items.iter()
    }
}
