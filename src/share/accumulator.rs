use crate::clock::Timestamp;
use crate::event::ShareOutcome;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of an accumulator relative to the durable store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Completeness {
    /// Still receiving shares; exists only in memory.
    New,
    /// Its work template aged out; the row has been persisted.
    Complete,
    /// The persisted row was checked against the durable store.
    Confirmed,
}

impl fmt::Display for Completeness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Completeness::New => "NEW",
            Completeness::Complete => "COMPLETE",
            Completeness::Confirmed => "CONFIRMED",
        };
        f.write_str(tag)
    }
}

/// Sum of difficulty and count for one outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OutcomeTotals {
    pub diff: f64,
    pub count: u64,
}

impl OutcomeTotals {
    fn add(&mut self, diff: f64, count: u64) {
        self.diff += diff;
        self.count += count;
    }

    fn absorb(&mut self, other: &OutcomeTotals) {
        self.add(other.diff, other.count);
    }
}

/// Whether a fold arrived out of logical-time order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FoldNote {
    pub before_first: bool,
    pub before_last: bool,
}

impl FoldNote {
    pub fn out_of_order(&self) -> bool {
        self.before_first || self.before_last
    }
}

/// Running totals of share outcomes for one key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareAccumulator {
    pub accepted: OutcomeTotals,
    pub stale: OutcomeTotals,
    pub duplicate: OutcomeTotals,
    pub high_diff: OutcomeTotals,
    pub rejected: OutcomeTotals,
    pub errors: u64,
    pub first: Timestamp,
    pub last: Timestamp,
    pub first_accepted: Option<Timestamp>,
    pub last_accepted: Option<Timestamp>,
    pub last_accepted_diff: f64,
    pub completeness: Completeness,
}

impl ShareAccumulator {
    /// Empty accumulator whose first and last instants are `seed`.
    pub fn seeded(seed: Timestamp) -> Self {
        Self {
            accepted: OutcomeTotals::default(),
            stale: OutcomeTotals::default(),
            duplicate: OutcomeTotals::default(),
            high_diff: OutcomeTotals::default(),
            rejected: OutcomeTotals::default(),
            errors: 0,
            first: seed,
            last: seed,
            first_accepted: None,
            last_accepted: None,
            last_accepted_diff: 0.0,
            completeness: Completeness::New,
        }
    }

    pub fn totals(&self, outcome: ShareOutcome) -> &OutcomeTotals {
        match outcome {
            ShareOutcome::Accepted => &self.accepted,
            ShareOutcome::Stale => &self.stale,
            ShareOutcome::Duplicate => &self.duplicate,
            ShareOutcome::HighDiff => &self.high_diff,
            ShareOutcome::Rejected => &self.rejected,
        }
    }

    fn totals_mut(&mut self, outcome: ShareOutcome) -> &mut OutcomeTotals {
        match outcome {
            ShareOutcome::Accepted => &mut self.accepted,
            ShareOutcome::Stale => &mut self.stale,
            ShareOutcome::Duplicate => &mut self.duplicate,
            ShareOutcome::HighDiff => &mut self.high_diff,
            ShareOutcome::Rejected => &mut self.rejected,
        }
    }

    /// Folds one classified share.
    pub fn fold_share(&mut self, outcome: ShareOutcome, diff: f64, at: Timestamp) -> FoldNote {
        self.totals_mut(outcome).add(diff, 1);
        if outcome == ShareOutcome::Accepted {
            if self.first_accepted.map_or(true, |first| at < first) {
                self.first_accepted = Some(at);
            }
            if self.last_accepted.map_or(true, |last| at >= last) {
                self.last_accepted = Some(at);
                self.last_accepted_diff = diff;
            }
        }
        self.widen(at)
    }

    /// Folds one share error.
    pub fn fold_error(&mut self, at: Timestamp) -> FoldNote {
        self.errors += 1;
        self.widen(at)
    }

    fn widen(&mut self, at: Timestamp) -> FoldNote {
        let note = FoldNote {
            before_first: at < self.first,
            before_last: at < self.last,
        };
        self.first = self.first.min(at);
        self.last = self.last.max(at);
        note
    }

    /// Merges another accumulator into this one: buckets add, `first*`
    /// take the earliest and `last*` the latest.
    pub fn absorb(&mut self, other: &ShareAccumulator) {
        for outcome in ShareOutcome::all() {
            self.totals_mut(outcome).absorb(other.totals(outcome));
        }
        self.errors += other.errors;
        self.first = self.first.min(other.first);
        self.last = self.last.max(other.last);
        if let Some(theirs) = other.first_accepted {
            if self.first_accepted.map_or(true, |ours| theirs < ours) {
                self.first_accepted = Some(theirs);
            }
        }
        if let Some(theirs) = other.last_accepted {
            if self.last_accepted.map_or(true, |ours| theirs >= ours) {
                self.last_accepted = Some(theirs);
                self.last_accepted_diff = other.last_accepted_diff;
            }
        }
    }

    /// Shares of every outcome plus errors.
    pub fn event_count(&self) -> u64 {
        self.share_count() + self.errors
    }

    pub fn share_count(&self) -> u64 {
        ShareOutcome::all()
            .into_iter()
            .map(|outcome| self.totals(outcome).count)
            .sum()
    }

    pub fn total_diff(&self) -> f64 {
        ShareOutcome::all()
            .into_iter()
            .map(|outcome| self.totals(outcome).diff)
            .sum()
    }

    pub fn is_new(&self) -> bool {
        self.completeness == Completeness::New
    }
}
