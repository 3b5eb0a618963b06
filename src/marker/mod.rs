//! Markers: closed work-id ranges whose accumulators are rolled up once.

pub mod compactor;

pub use compactor::{CompactionError, CompactionReport, Compactor, SecondaryRebuild};

use crate::clock::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MarkerStatus {
    Ready,
    Processed,
}

impl fmt::Display for MarkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarkerStatus::Ready => f.write_str("READY"),
            MarkerStatus::Processed => f.write_str("PROCESSED"),
        }
    }
}

/// Half-open work-id range `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    pub id: u64,
    pub start: u64,
    pub end: u64,
    pub status: MarkerStatus,
    pub description: String,
    pub marked_at: Timestamp,
}

impl Marker {
    pub fn contains(&self, range_id: u64) -> bool {
        self.start <= range_id && range_id < self.end
    }

    pub fn overlaps(&self, start: u64, end: u64) -> bool {
        self.start < end && start < self.end
    }

    pub fn is_processed(&self) -> bool {
        self.status == MarkerStatus::Processed
    }
}
