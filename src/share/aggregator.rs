use super::accumulator::{Completeness, FoldNote, ShareAccumulator};
use crate::arena::{ArenaError, Table};
use crate::clock::Timestamp;
use crate::event::{SecondaryAttributes, ShareErrorRecord, ShareOutcome, ShareRecord};
use crate::logging::SeverityPolicy;
use crate::store::{PersistError, PersistenceGateway, Provenance, RowKind, Transaction};
use crate::tables::{
    accumulator_key, primary_span, sealing_marker, secondary_row_key, secondary_span,
    LedgerTables, PrimaryKey, SecondaryAccKey, SecondaryKey, Subject,
};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Which pass an update comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestMode {
    Reload,
    Live,
}

/// What is being folded: a classified share or a share error.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UpdateKind {
    Share { outcome: ShareOutcome, diff: f64 },
    Error,
}

/// One fold request against the accumulator tables.
#[derive(Debug, Clone, PartialEq)]
pub struct ShareUpdate {
    pub kind: UpdateKind,
    pub subject: Subject,
    pub secondary: Vec<SecondaryKey>,
    pub range_id: u64,
    pub logical_time: Timestamp,
}

impl ShareUpdate {
    pub fn from_share(share: &ShareRecord, dimensions: &[String]) -> Self {
        Self {
            kind: UpdateKind::Share {
                outcome: share.outcome,
                diff: share.diff,
            },
            subject: Subject::new(share.user_id, share.worker.clone()),
            secondary: secondary_keys(share, dimensions),
            range_id: share.work_id,
            logical_time: share.created,
        }
    }

    pub fn from_error(error: &ShareErrorRecord, dimensions: &[String]) -> Self {
        Self {
            kind: UpdateKind::Error,
            subject: Subject::new(error.user_id, error.worker.clone()),
            secondary: secondary_keys(error, dimensions),
            range_id: error.work_id,
            logical_time: error.created,
        }
    }
}

/// Secondary keys for the configured dimensions the record carries.
pub fn secondary_keys<R: SecondaryAttributes>(record: &R, dimensions: &[String]) -> Vec<SecondaryKey> {
    let mut keys: Vec<SecondaryKey> = dimensions
        .iter()
        .filter_map(|dimension| {
            record
                .attribute(dimension)
                .map(|value| SecondaryKey::new(dimension.clone(), value))
        })
        .collect();
    keys.sort();
    keys.dedup();
    keys
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied,
    /// Reload replay of a range whose totals were already persisted.
    SkippedAged,
}

/// Counts of accumulators a persistence pass touched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AgeReport {
    pub primary: usize,
    pub secondary: usize,
    pub pool: usize,
}

impl AgeReport {
    pub fn total(&self) -> usize {
        self.primary + self.secondary + self.pool
    }
}

#[derive(Serialize)]
struct AccumulatorRow<'a, S: Serialize> {
    range_id: u64,
    subject: &'a S,
    totals: &'a ShareAccumulator,
}

/// Folds admitted shares and share errors into per-subject, per-secondary
/// and pool-wide accumulators.
pub struct Aggregator {
    tables: Arc<LedgerTables>,
    severity: Arc<SeverityPolicy>,
}

impl Aggregator {
    pub fn new(tables: Arc<LedgerTables>, severity: Arc<SeverityPolicy>) -> Self {
        Self { tables, severity }
    }

    /// Folds one update into the subject, secondary and pool accumulators of
    /// its range, all under one lock scope.
    pub fn update(
        &self,
        update: &ShareUpdate,
        mode: IngestMode,
    ) -> Result<UpdateOutcome, AggregateError> {
        let range_id = update.range_id;
        let markers = self.tables.markers.read();
        if let Some(marker_id) = sealing_marker(&*markers, range_id) {
            return Err(AggregateError::RangeSealed {
                range_id,
                marker_id,
            });
        }
        let mut primary = self.tables.primary.write();
        let mut secondary = self.tables.secondary.write();
        let mut pool = self.tables.pool.write();

        if pool.get(&range_id).is_some_and(|acc| !acc.is_new()) {
            return match mode {
                IngestMode::Reload => Ok(UpdateOutcome::SkippedAged),
                IngestMode::Live => Err(AggregateError::RangeAged { range_id }),
            };
        }

        let primary_key: PrimaryKey = (range_id, update.subject.clone());
        let secondary_keys: Vec<SecondaryAccKey> = update
            .secondary
            .iter()
            .map(|key| (range_id, key.clone()))
            .collect();
        ensure_room(&*primary, std::slice::from_ref(&primary_key))?;
        ensure_room(&*secondary, &secondary_keys)?;
        ensure_room(&*pool, &[range_id])?;

        let seed = update.logical_time;
        let note = fold(
            primary.get_or_insert_with(primary_key, || ShareAccumulator::seeded(seed))?,
            update,
        );
        for key in secondary_keys {
            fold(
                secondary.get_or_insert_with(key, || ShareAccumulator::seeded(seed))?,
                update,
            );
        }
        fold(
            pool.get_or_insert_with(range_id, || ShareAccumulator::seeded(seed))?,
            update,
        );
        drop(markers);

        if note.out_of_order() {
            self.severity.anomaly(
                "share_out_of_order",
                format_args!(
                    "{} range {range_id} share at {} precedes {} of folded history",
                    update.subject,
                    update.logical_time,
                    if note.before_first { "first" } else { "last" },
                ),
            );
        }
        Ok(UpdateOutcome::Applied)
    }

    /// Persists every NEW accumulator of `range_id` as COMPLETE. Nothing
    /// changes in memory unless the commit succeeds.
    pub fn age_range(
        &self,
        range_id: u64,
        gateway: &dyn PersistenceGateway,
        provenance: &Provenance,
    ) -> Result<AgeReport, AggregateError> {
        let mut primary = self.tables.primary.write();
        let mut secondary = self.tables.secondary.write();
        let mut pool = self.tables.pool.write();

        let primary_keys = new_keys(&*primary, primary_span(range_id, range_id.saturating_add(1)));
        let secondary_keys = new_keys(&*secondary, secondary_span(range_id, range_id.saturating_add(1)));
        let pool_new = pool.get(&range_id).is_some_and(ShareAccumulator::is_new);
        if primary_keys.is_empty() && secondary_keys.is_empty() && !pool_new {
            return Ok(AgeReport::default());
        }

        let mut txn = Transaction::new();
        for key in &primary_keys {
            if let Some(acc) = primary.get(key) {
                let row = accumulator_row(key.0, &key.1, acc, Completeness::Complete)?;
                txn.insert(RowKind::Accumulator, accumulator_key(key.0, &key.1), row, provenance);
            }
        }
        for key in &secondary_keys {
            if let Some(acc) = secondary.get(key) {
                let row = accumulator_row(key.0, &key.1, acc, Completeness::Complete)?;
                txn.insert(
                    RowKind::SecondaryAccumulator,
                    secondary_row_key(key.0, &key.1),
                    row,
                    provenance,
                );
            }
        }
        if pool_new {
            if let Some(acc) = pool.get(&range_id) {
                let row = accumulator_row(range_id, &"pool", acc, Completeness::Complete)?;
                txn.insert(RowKind::PoolAccumulator, range_id.to_string(), row, provenance);
            }
        }
        gateway.commit(txn)?;

        for key in &primary_keys {
            if let Some(acc) = primary.get_mut(key) {
                acc.completeness = Completeness::Complete;
            }
        }
        for key in &secondary_keys {
            if let Some(acc) = secondary.get_mut(key) {
                acc.completeness = Completeness::Complete;
            }
        }
        if let Some(acc) = pool.get_mut(&range_id) {
            acc.completeness = Completeness::Complete;
        }
        let report = AgeReport {
            primary: primary_keys.len(),
            secondary: secondary_keys.len(),
            pool: usize::from(pool_new),
        };
        info!(
            range_id,
            primary = report.primary,
            secondary = report.secondary,
            "range aged"
        );
        Ok(report)
    }

    /// Ages every range below `before` that still holds NEW accumulators,
    /// oldest first. Stops at the first failure.
    pub fn auto_age_older(
        &self,
        before: u64,
        gateway: &dyn PersistenceGateway,
        provenance: &Provenance,
    ) -> Result<Vec<u64>, AggregateError> {
        let pending: Vec<u64> = self
            .tables
            .pool
            .read()
            .range(..before)
            .filter(|(_, acc)| acc.is_new())
            .map(|(range_id, _)| *range_id)
            .collect();
        for range_id in &pending {
            self.age_range(*range_id, gateway, provenance)?;
        }
        if !pending.is_empty() {
            debug!(before, aged = pending.len(), "older ranges aged");
        }
        Ok(pending)
    }

    /// Promotes COMPLETE accumulators of `range_id` to CONFIRMED when the
    /// store's current row matches what is held in memory.
    pub fn confirm_range(
        &self,
        range_id: u64,
        gateway: &dyn PersistenceGateway,
    ) -> Result<AgeReport, AggregateError> {
        let mut primary = self.tables.primary.write();
        let mut secondary = self.tables.secondary.write();
        let mut pool = self.tables.pool.write();
        let mut report = AgeReport::default();

        for key in primary.keys_in(primary_span(range_id, range_id.saturating_add(1))) {
            let Some(acc) = primary.get_mut(&key) else {
                continue;
            };
            let expected = accumulator_row(key.0, &key.1, acc, Completeness::Complete)?;
            let row_key = accumulator_key(key.0, &key.1);
            if confirm(acc, gateway, RowKind::Accumulator, &row_key, expected)? {
                report.primary += 1;
            }
        }
        for key in secondary.keys_in(secondary_span(range_id, range_id.saturating_add(1))) {
            let Some(acc) = secondary.get_mut(&key) else {
                continue;
            };
            let expected = accumulator_row(key.0, &key.1, acc, Completeness::Complete)?;
            let row_key = secondary_row_key(key.0, &key.1);
            if confirm(acc, gateway, RowKind::SecondaryAccumulator, &row_key, expected)? {
                report.secondary += 1;
            }
        }
        if let Some(acc) = pool.get_mut(&range_id) {
            let expected = accumulator_row(range_id, &"pool", acc, Completeness::Complete)?;
            if confirm(
                acc,
                gateway,
                RowKind::PoolAccumulator,
                &range_id.to_string(),
                expected,
            )? {
                report.pool += 1;
            }
        }
        Ok(report)
    }

    pub fn primary(&self, range_id: u64, subject: &Subject) -> Option<ShareAccumulator> {
        self.tables
            .primary
            .read()
            .get(&(range_id, subject.clone()))
            .cloned()
    }

    pub fn secondary(&self, range_id: u64, key: &SecondaryKey) -> Option<ShareAccumulator> {
        self.tables
            .secondary
            .read()
            .get(&(range_id, key.clone()))
            .cloned()
    }

    pub fn pool(&self, range_id: u64) -> Option<ShareAccumulator> {
        self.tables.pool.read().get(&range_id).cloned()
    }

    /// Primary accumulators whose range id lies in `[start, end)`.
    pub fn primary_count(&self, start: u64, end: u64) -> usize {
        self.tables.primary.read().range(primary_span(start, end)).count()
    }

    /// Secondary accumulators whose range id lies in `[start, end)`.
    pub fn secondary_count(&self, start: u64, end: u64) -> usize {
        self.tables
            .secondary
            .read()
            .range(secondary_span(start, end))
            .count()
    }
}

fn fold(acc: &mut ShareAccumulator, update: &ShareUpdate) -> FoldNote {
    match update.kind {
        UpdateKind::Share { outcome, diff } => acc.fold_share(outcome, diff, update.logical_time),
        UpdateKind::Error => acc.fold_error(update.logical_time),
    }
}

fn ensure_room<K: Ord + Clone, T>(table: &Table<K, T>, keys: &[K]) -> Result<(), ArenaError> {
    let fresh = keys.iter().filter(|key| !table.contains_key(key)).count();
    if fresh > table.headroom() {
        return Err(ArenaError::Exhausted {
            capacity: table.len() + table.headroom(),
        });
    }
    Ok(())
}

fn new_keys<K, R>(table: &Table<K, ShareAccumulator>, span: R) -> Vec<K>
where
    K: Ord + Clone,
    R: std::ops::RangeBounds<K>,
{
    table
        .range(span)
        .filter(|(_, acc)| acc.is_new())
        .map(|(key, _)| key.clone())
        .collect()
}

pub(crate) fn accumulator_row<S: Serialize>(
    range_id: u64,
    subject: &S,
    acc: &ShareAccumulator,
    completeness: Completeness,
) -> Result<serde_json::Value, PersistError> {
    let mut totals = acc.clone();
    totals.completeness = completeness;
    Ok(serde_json::to_value(AccumulatorRow {
        range_id,
        subject,
        totals: &totals,
    })?)
}

fn confirm(
    acc: &mut ShareAccumulator,
    gateway: &dyn PersistenceGateway,
    kind: RowKind,
    key: &str,
    expected: serde_json::Value,
) -> Result<bool, AggregateError> {
    if acc.completeness != Completeness::Complete {
        return Ok(false);
    }
    let matches = gateway
        .current(kind, key)?
        .is_some_and(|stored| stored.row == expected);
    if matches {
        acc.completeness = Completeness::Confirmed;
    } else {
        debug!(%kind, key, "persisted row differs, left unconfirmed");
    }
    Ok(matches)
}

/// Errors surfaced by the aggregator.
#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("range {range_id} is sealed by marker {marker_id}")]
    RangeSealed { range_id: u64, marker_id: u64 },
    #[error("range {range_id} has already been aged")]
    RangeAged { range_id: u64 },
    #[error(transparent)]
    Arena(#[from] ArenaError),
    #[error(transparent)]
    Persist(#[from] PersistError),
}
