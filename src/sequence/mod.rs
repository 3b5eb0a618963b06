//! Sequence tracking: per-family sliding windows that classify every
//! sequenced arrival and account for gaps across the reload/live boundary.

pub mod family;
pub mod tracker;
pub mod window;

pub use family::{Origin, SeqFamily, SeqMeta, WindowClass, MAX_SEQ_SETS, SEQ_START_IGNORE};
pub use tracker::{FamilyReport, MetaCheck, SeqSetReport, SequenceReport, SequenceTracker};
pub use window::{SeqCheck, SeqClass, SeqCounters, SequenceWindow, SlotArrival};

use thiserror::Error;

/// Errors raised while building or using sequence windows.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SequenceError {
    #[error("window size {size} must be a power of two no smaller than {min_size}")]
    InvalidWindowSize { size: u64, min_size: u64 },
    #[error("no window available for family {0}")]
    WindowUnavailable(SeqFamily),
}
