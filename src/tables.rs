//! Shared record tables, one reader/writer lock per record kind.
//!
//! Any operation holding more than one of these locks takes them in field
//! order: markers, primary, secondary, pool, rollups, secondary rollups,
//! pool rollups. Locks are released before the operation returns.

use crate::arena::Table;
use crate::config::CapacityConfig;
use crate::marker::Marker;
use crate::share::accumulator::ShareAccumulator;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Bound;

/// User and worker pair that shares are credited to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Subject {
    pub user_id: i64,
    pub worker: String,
}

impl Subject {
    /// Orders before every real subject.
    pub const FLOOR: Subject = Subject {
        user_id: i64::MIN,
        worker: String::new(),
    };

    pub fn new(user_id: i64, worker: impl Into<String>) -> Self {
        Self {
            user_id,
            worker: worker.into(),
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.user_id, self.worker)
    }
}

/// Secondary attribute a share is also accounted under, such as its source
/// address or client agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SecondaryKey {
    pub dimension: String,
    pub value: String,
}

impl SecondaryKey {
    pub const FLOOR: SecondaryKey = SecondaryKey {
        dimension: String::new(),
        value: String::new(),
    };

    pub fn new(dimension: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            dimension: dimension.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for SecondaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.dimension, self.value)
    }
}

/// Immutable marker-level sum of the accumulators it replaced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rollup {
    pub marker_id: u64,
    pub totals: ShareAccumulator,
    /// Number of accumulators merged into this rollup.
    pub sources: u64,
}

pub type PrimaryKey = (u64, Subject);
pub type SecondaryAccKey = (u64, SecondaryKey);

/// Key bounds covering every subject whose range id lies in `[start, end)`.
pub fn primary_span(start: u64, end: u64) -> (Bound<PrimaryKey>, Bound<PrimaryKey>) {
    (
        Bound::Included((start, Subject::FLOOR)),
        Bound::Excluded((end.max(start), Subject::FLOOR)),
    )
}

pub fn secondary_span(start: u64, end: u64) -> (Bound<SecondaryAccKey>, Bound<SecondaryAccKey>) {
    (
        Bound::Included((start, SecondaryKey::FLOOR)),
        Bound::Excluded((end.max(start), SecondaryKey::FLOOR)),
    )
}

/// Every record table of the ledger.
pub struct LedgerTables {
    pub markers: RwLock<Table<u64, Marker>>,
    pub primary: RwLock<Table<PrimaryKey, ShareAccumulator>>,
    pub secondary: RwLock<Table<SecondaryAccKey, ShareAccumulator>>,
    pub pool: RwLock<Table<u64, ShareAccumulator>>,
    pub rollups: RwLock<Table<PrimaryKey, Rollup>>,
    pub secondary_rollups: RwLock<Table<SecondaryAccKey, Rollup>>,
    pub pool_rollups: RwLock<Table<u64, Rollup>>,
}

impl LedgerTables {
    pub fn new(capacity: &CapacityConfig) -> Self {
        Self {
            markers: RwLock::new(Table::new(capacity.markers)),
            primary: RwLock::new(Table::new(capacity.accumulators)),
            secondary: RwLock::new(Table::new(capacity.secondary_accumulators)),
            pool: RwLock::new(Table::new(capacity.pool_accumulators)),
            rollups: RwLock::new(Table::new(capacity.rollups)),
            secondary_rollups: RwLock::new(Table::new(capacity.secondary_rollups)),
            pool_rollups: RwLock::new(Table::new(capacity.pool_rollups)),
        }
    }
}

/// Marker whose range covers `range_id`, if any.
pub fn sealing_marker(markers: &Table<u64, Marker>, range_id: u64) -> Option<u64> {
    markers
        .iter()
        .find(|(_, marker)| marker.contains(range_id))
        .map(|(id, _)| *id)
}

pub(crate) fn accumulator_key(range_id: u64, subject: &Subject) -> String {
    format!("{range_id}/{subject}")
}

pub(crate) fn secondary_row_key(range_id: u64, key: &SecondaryKey) -> String {
    format!("{range_id}/{key}")
}
