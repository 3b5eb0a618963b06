//! Share accounting: accumulators, the aggregator that folds shares into
//! them, and the queue of shares that arrived before their work template.

pub mod accumulator;
pub mod aggregator;
pub mod early;

pub use accumulator::{Completeness, FoldNote, OutcomeTotals, ShareAccumulator};
pub use aggregator::{
    secondary_keys, AgeReport, AggregateError, Aggregator, IngestMode, ShareUpdate, UpdateKind,
    UpdateOutcome,
};
pub use early::{DrainOutcome, EarlyCounters, EarlyItem, EarlyQueue, EarlyState};
