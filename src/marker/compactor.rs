use super::{Marker, MarkerStatus};
use crate::arena::ArenaError;
use crate::runtime::ShutdownSignal;
use crate::share::accumulator::{Completeness, ShareAccumulator};
use crate::share::aggregator::{accumulator_row, ShareUpdate, UpdateKind};
use crate::store::{PersistError, PersistenceGateway, Provenance, RowKind, Transaction};
use crate::tables::{
    accumulator_key, primary_span, secondary_row_key, secondary_span, LedgerTables, PrimaryKey,
    Rollup, SecondaryAccKey, SecondaryKey, Subject,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

/// Summary of one successful compaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompactionReport {
    pub marker_id: u64,
    pub subject_rollups: usize,
    pub secondary_rollups: usize,
    pub accumulators_removed: usize,
    pub rows_written: usize,
}

/// Summary of a secondary-only rebuild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecondaryRebuild {
    pub marker_id: u64,
    pub replaced: usize,
    pub rebuilt: usize,
}

#[derive(Serialize)]
struct RollupRow<'a, S: Serialize> {
    marker_id: u64,
    subject: &'a S,
    rollup: &'a Rollup,
}

#[derive(Default)]
struct Sources {
    primary: Vec<(PrimaryKey, ShareAccumulator)>,
    secondary: Vec<(SecondaryAccKey, ShareAccumulator)>,
    pool: Vec<(u64, ShareAccumulator)>,
}

impl Sources {
    fn len(&self) -> usize {
        self.primary.len() + self.secondary.len() + self.pool.len()
    }
}

/// Rolls closed marker ranges into immutable rollups and owns the marker
/// state transitions.
pub struct Compactor {
    tables: Arc<LedgerTables>,
    shutdown: ShutdownSignal,
    in_flight: Mutex<BTreeSet<u64>>,
}

struct Claim<'a> {
    in_flight: &'a Mutex<BTreeSet<u64>>,
    marker_id: u64,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.marker_id);
    }
}

impl Compactor {
    pub fn new(tables: Arc<LedgerTables>, shutdown: ShutdownSignal) -> Self {
        Self {
            tables,
            shutdown,
            in_flight: Mutex::new(BTreeSet::new()),
        }
    }

    fn claim(&self, marker_id: u64) -> Result<Claim<'_>, CompactionError> {
        if !self.in_flight.lock().insert(marker_id) {
            return Err(CompactionError::Busy { marker_id });
        }
        Ok(Claim {
            in_flight: &self.in_flight,
            marker_id,
        })
    }

    /// Declares `[start, end)` closed. The range must not overlap another
    /// marker; once ready, accumulators in it accept no further updates.
    pub fn mark_ready(
        &self,
        marker_id: u64,
        start: u64,
        end: u64,
        description: &str,
        gateway: &dyn PersistenceGateway,
        provenance: &Provenance,
    ) -> Result<Marker, CompactionError> {
        if start >= end {
            return Err(CompactionError::InvalidRange { start, end });
        }
        let mut markers = self.tables.markers.write();
        if markers.contains_key(&marker_id) {
            return Err(CompactionError::MarkerExists(marker_id));
        }
        if let Some((other, _)) = markers.iter().find(|(_, m)| m.overlaps(start, end)) {
            return Err(CompactionError::Overlaps {
                marker_id,
                other: *other,
            });
        }
        if markers.headroom() == 0 {
            return Err(CompactionError::Arena(ArenaError::Exhausted {
                capacity: markers.len(),
            }));
        }
        let marker = Marker {
            id: marker_id,
            start,
            end,
            status: MarkerStatus::Ready,
            description: description.to_string(),
            marked_at: provenance.at,
        };
        let mut txn = Transaction::new();
        txn.insert(
            RowKind::Marker,
            marker_id.to_string(),
            serde_json::to_value(&marker).map_err(PersistError::from)?,
            provenance,
        );
        gateway.commit(txn)?;
        markers.insert(marker_id, marker.clone())?;
        info!(marker_id, start, end, "marker ready");
        Ok(marker)
    }

    /// Rolls every accumulator inside a READY marker into per-subject,
    /// per-secondary-key and pool rollups, then flips it to PROCESSED.
    /// Calling it again on a PROCESSED marker fails without side effects.
    pub fn compact(
        &self,
        marker_id: u64,
        gateway: &dyn PersistenceGateway,
        provenance: &Provenance,
    ) -> Result<CompactionReport, CompactionError> {
        let _claim = self.claim(marker_id)?;
        let (marker, sources) = self.collect(marker_id)?;

        let (start, end) = (marker.start, marker.end);
        let mut subject_rollups: BTreeMap<Subject, Rollup> = BTreeMap::new();
        for ((_, subject), acc) in &sources.primary {
            merge_into(&mut subject_rollups, subject.clone(), marker_id, acc);
        }
        let mut secondary_rollups: BTreeMap<SecondaryKey, Rollup> = BTreeMap::new();
        for ((_, key), acc) in &sources.secondary {
            merge_into(&mut secondary_rollups, key.clone(), marker_id, acc);
        }
        let mut pool_rollup: Option<Rollup> = None;
        for rollup in subject_rollups.values() {
            merge_rollup(&mut pool_rollup, marker_id, rollup);
        }

        let mut txn = Transaction::new();
        for (subject, rollup) in &subject_rollups {
            txn.insert(
                RowKind::Rollup,
                accumulator_key(marker_id, subject),
                rollup_row(marker_id, subject, rollup)?,
                provenance,
            );
        }
        for (key, rollup) in &secondary_rollups {
            txn.insert(
                RowKind::SecondaryRollup,
                secondary_row_key(marker_id, key),
                rollup_row(marker_id, key, rollup)?,
                provenance,
            );
        }
        if let Some(rollup) = &pool_rollup {
            txn.insert(
                RowKind::PoolRollup,
                marker_id.to_string(),
                rollup_row(marker_id, &"pool", rollup)?,
                provenance,
            );
        }
        for ((range_id, subject), acc) in &sources.primary {
            if !acc.is_new() {
                txn.expire(RowKind::Accumulator, accumulator_key(*range_id, subject), provenance);
            }
        }
        for ((range_id, key), acc) in &sources.secondary {
            if !acc.is_new() {
                txn.expire(
                    RowKind::SecondaryAccumulator,
                    secondary_row_key(*range_id, key),
                    provenance,
                );
            }
        }
        for (range_id, acc) in &sources.pool {
            if !acc.is_new() {
                txn.expire(RowKind::PoolAccumulator, range_id.to_string(), provenance);
            }
        }
        let mut processed = marker.clone();
        processed.status = MarkerStatus::Processed;
        txn.replace(
            RowKind::Marker,
            marker_id.to_string(),
            serde_json::to_value(&processed).map_err(PersistError::from)?,
            provenance,
        );
        self.ensure_rollup_room(subject_rollups.len(), secondary_rollups.len())?;
        if self.shutdown.is_triggered() {
            txn.rollback();
            return Err(CompactionError::Cancelled { marker_id });
        }
        let rows_written = txn.len();
        if let Err(err) = gateway.commit(txn) {
            error!(marker_id, error = %err, "marker compaction commit failed");
            return Err(err.into());
        }

        let mut markers = self.tables.markers.write();
        let mut primary = self.tables.primary.write();
        let mut secondary = self.tables.secondary.write();
        let mut pool = self.tables.pool.write();
        let mut rollups = self.tables.rollups.write();
        let mut sec_rollups = self.tables.secondary_rollups.write();
        let mut pool_rollups = self.tables.pool_rollups.write();

        let mut removed = 0;
        for (key, _) in &sources.primary {
            removed += usize::from(primary.remove(key).is_some());
        }
        for (key, _) in &sources.secondary {
            removed += usize::from(secondary.remove(key).is_some());
        }
        for (range_id, _) in &sources.pool {
            removed += usize::from(pool.remove(range_id).is_some());
        }
        let expected = sources.len();
        let leftover = primary.range(primary_span(start, end)).count()
            + secondary.range(secondary_span(start, end)).count()
            + pool.range(start..end).count();
        if removed != expected || leftover != 0 {
            error!(
                marker_id,
                expected, removed, leftover, "compaction bookkeeping mismatch"
            );
            return Err(CompactionError::Inconsistent {
                marker_id,
                expected,
                removed,
            });
        }

        let subject_count = subject_rollups.len();
        let secondary_count = secondary_rollups.len();
        for (subject, rollup) in subject_rollups {
            rollups.insert((marker_id, subject), rollup).map_err(|err| {
                self.inconsistent_insert(marker_id, expected, removed, err)
            })?;
        }
        for (key, rollup) in secondary_rollups {
            sec_rollups.insert((marker_id, key), rollup).map_err(|err| {
                self.inconsistent_insert(marker_id, expected, removed, err)
            })?;
        }
        if let Some(rollup) = pool_rollup {
            pool_rollups.insert(marker_id, rollup).map_err(|err| {
                self.inconsistent_insert(marker_id, expected, removed, err)
            })?;
        }
        if let Some(entry) = markers.get_mut(&marker_id) {
            entry.status = MarkerStatus::Processed;
        }

        info!(
            marker_id,
            subjects = subject_count,
            secondary = secondary_count,
            removed,
            "marker compacted"
        );
        Ok(CompactionReport {
            marker_id,
            subject_rollups: subject_count,
            secondary_rollups: secondary_count,
            accumulators_removed: removed,
            rows_written,
        })
    }

    fn collect(&self, marker_id: u64) -> Result<(Marker, Sources), CompactionError> {
        let markers = self.tables.markers.read();
        let marker = markers
            .get(&marker_id)
            .cloned()
            .ok_or(CompactionError::NotFound(marker_id))?;
        if marker.is_processed() {
            return Err(CompactionError::AlreadyProcessed { marker_id });
        }
        let primary = self.tables.primary.read();
        let secondary = self.tables.secondary.read();
        let pool = self.tables.pool.read();
        let (start, end) = (marker.start, marker.end);

        let mut sources = Sources::default();
        for (key, acc) in primary.range(primary_span(start, end)) {
            self.poll(marker_id)?;
            sources.primary.push((key.clone(), acc.clone()));
        }
        for (key, acc) in secondary.range(secondary_span(start, end)) {
            self.poll(marker_id)?;
            sources.secondary.push((key.clone(), acc.clone()));
        }
        for (range_id, acc) in pool.range(start..end) {
            self.poll(marker_id)?;
            sources.pool.push((*range_id, acc.clone()));
        }
        Ok((marker, sources))
    }

    fn poll(&self, marker_id: u64) -> Result<(), CompactionError> {
        if self.shutdown.is_triggered() {
            warn!(marker_id, "compaction interrupted by shutdown");
            return Err(CompactionError::Cancelled { marker_id });
        }
        Ok(())
    }

    fn ensure_rollup_room(&self, subjects: usize, secondary: usize) -> Result<(), CompactionError> {
        let rollups = self.tables.rollups.read();
        let sec_rollups = self.tables.secondary_rollups.read();
        let pool_rollups = self.tables.pool_rollups.read();
        for (table_len, headroom, needed) in [
            (rollups.len(), rollups.headroom(), subjects),
            (sec_rollups.len(), sec_rollups.headroom(), secondary),
            (pool_rollups.len(), pool_rollups.headroom(), 1),
        ] {
            if needed > headroom {
                return Err(CompactionError::Arena(ArenaError::Exhausted {
                    capacity: table_len + headroom,
                }));
            }
        }
        Ok(())
    }

    fn inconsistent_insert(
        &self,
        marker_id: u64,
        expected: usize,
        removed: usize,
        err: ArenaError,
    ) -> CompactionError {
        error!(marker_id, error = %err, "rollup insert failed after commit");
        CompactionError::Inconsistent {
            marker_id,
            expected,
            removed,
        }
    }

    /// Returns a PROCESSED marker to READY. Its rollups are expired and put
    /// back as accumulators at the marker's first range id, in the same
    /// transaction, so the next compaction reproduces the same totals.
    /// Returns the number of rollups removed.
    pub fn reprocess(
        &self,
        marker_id: u64,
        gateway: &dyn PersistenceGateway,
        provenance: &Provenance,
    ) -> Result<usize, CompactionError> {
        let _claim = self.claim(marker_id)?;
        let mut markers = self.tables.markers.write();
        let mut primary = self.tables.primary.write();
        let mut secondary = self.tables.secondary.write();
        let mut pool = self.tables.pool.write();
        let mut rollups = self.tables.rollups.write();
        let mut sec_rollups = self.tables.secondary_rollups.write();
        let mut pool_rollups = self.tables.pool_rollups.write();

        let marker = markers
            .get(&marker_id)
            .cloned()
            .ok_or(CompactionError::NotFound(marker_id))?;
        if !marker.is_processed() {
            return Err(CompactionError::NotProcessed { marker_id });
        }
        let (start, end) = (marker.start, marker.end);
        if primary.range(primary_span(start, end)).next().is_some()
            || secondary.range(secondary_span(start, end)).next().is_some()
            || pool.range(start..end).next().is_some()
        {
            return Err(CompactionError::RangeOccupied { marker_id });
        }

        let span_end = marker_id.saturating_add(1);
        let subject_keys = rollups.keys_in(primary_span(marker_id, span_end));
        let secondary_keys = sec_rollups.keys_in(secondary_span(marker_id, span_end));
        let has_pool = pool_rollups.contains_key(&marker_id);
        for (table_len, headroom, needed) in [
            (primary.len(), primary.headroom(), subject_keys.len()),
            (secondary.len(), secondary.headroom(), secondary_keys.len()),
            (pool.len(), pool.headroom(), usize::from(has_pool)),
        ] {
            if needed > headroom {
                return Err(CompactionError::Arena(ArenaError::Exhausted {
                    capacity: table_len + headroom,
                }));
            }
        }

        let mut txn = Transaction::new();
        for key in &subject_keys {
            let (id, subject) = key;
            txn.expire(RowKind::Rollup, accumulator_key(*id, subject), provenance);
            if let Some(rollup) = rollups.get(key) {
                txn.insert(
                    RowKind::Accumulator,
                    accumulator_key(start, subject),
                    accumulator_row(start, subject, &rollup.totals, Completeness::Complete)?,
                    provenance,
                );
            }
        }
        for key in &secondary_keys {
            let (id, sec_key) = key;
            txn.expire(RowKind::SecondaryRollup, secondary_row_key(*id, sec_key), provenance);
            if let Some(rollup) = sec_rollups.get(key) {
                txn.insert(
                    RowKind::SecondaryAccumulator,
                    secondary_row_key(start, sec_key),
                    accumulator_row(start, sec_key, &rollup.totals, Completeness::Complete)?,
                    provenance,
                );
            }
        }
        if let Some(rollup) = pool_rollups.get(&marker_id) {
            txn.expire(RowKind::PoolRollup, marker_id.to_string(), provenance);
            txn.insert(
                RowKind::PoolAccumulator,
                start.to_string(),
                accumulator_row(start, &"pool", &rollup.totals, Completeness::Complete)?,
                provenance,
            );
        }
        let mut ready = marker;
        ready.status = MarkerStatus::Ready;
        txn.replace(
            RowKind::Marker,
            marker_id.to_string(),
            serde_json::to_value(&ready).map_err(PersistError::from)?,
            provenance,
        );
        gateway.commit(txn)?;

        let mut removed = 0;
        let mut reinstated = 0;
        for key in &subject_keys {
            if let Some(rollup) = rollups.remove(key) {
                removed += 1;
                primary
                    .insert((start, key.1.clone()), reinstated_totals(rollup))
                    .map_err(|err| self.inconsistent_insert(marker_id, removed, reinstated, err))?;
                reinstated += 1;
            }
        }
        for key in &secondary_keys {
            if let Some(rollup) = sec_rollups.remove(key) {
                removed += 1;
                secondary
                    .insert((start, key.1.clone()), reinstated_totals(rollup))
                    .map_err(|err| self.inconsistent_insert(marker_id, removed, reinstated, err))?;
                reinstated += 1;
            }
        }
        if let Some(rollup) = pool_rollups.remove(&marker_id) {
            removed += 1;
            pool.insert(start, reinstated_totals(rollup))
                .map_err(|err| self.inconsistent_insert(marker_id, removed, reinstated, err))?;
            reinstated += 1;
        }
        if let Some(entry) = markers.get_mut(&marker_id) {
            entry.status = MarkerStatus::Ready;
        }
        warn!(marker_id, removed, reinstated, "marker returned to ready");
        Ok(removed)
    }

    /// Re-derives a PROCESSED marker's secondary-key rollups from replayed
    /// updates and swaps them in. Primary rollups, the pool rollup and all
    /// accumulators are left alone.
    pub fn rebuild_secondary<I>(
        &self,
        marker_id: u64,
        updates: I,
        gateway: &dyn PersistenceGateway,
        provenance: &Provenance,
    ) -> Result<SecondaryRebuild, CompactionError>
    where
        I: IntoIterator<Item = ShareUpdate>,
    {
        let _claim = self.claim(marker_id)?;
        let marker = self
            .tables
            .markers
            .read()
            .get(&marker_id)
            .cloned()
            .ok_or(CompactionError::NotFound(marker_id))?;
        if !marker.is_processed() {
            return Err(CompactionError::NotProcessed { marker_id });
        }

        let mut rebuilt: BTreeMap<SecondaryKey, Rollup> = BTreeMap::new();
        for update in updates {
            self.poll(marker_id)?;
            if !marker.contains(update.range_id) {
                continue;
            }
            for key in &update.secondary {
                let rollup = rebuilt.entry(key.clone()).or_insert_with(|| Rollup {
                    marker_id,
                    totals: ShareAccumulator::seeded(update.logical_time),
                    sources: 0,
                });
                match update.kind {
                    UpdateKind::Share { outcome, diff } => {
                        rollup.totals.fold_share(outcome, diff, update.logical_time);
                    }
                    UpdateKind::Error => {
                        rollup.totals.fold_error(update.logical_time);
                    }
                }
                rollup.sources += 1;
            }
        }
        for rollup in rebuilt.values_mut() {
            rollup.totals.completeness = Completeness::Complete;
        }

        let _markers = self.tables.markers.read();
        let mut sec_rollups = self.tables.secondary_rollups.write();
        let previous = sec_rollups.keys_in(secondary_span(marker_id, marker_id.saturating_add(1)));
        if rebuilt.len() > sec_rollups.headroom() + previous.len() {
            return Err(CompactionError::Arena(ArenaError::Exhausted {
                capacity: sec_rollups.len() + sec_rollups.headroom(),
            }));
        }
        let mut txn = Transaction::new();
        for (id, key) in &previous {
            txn.expire(RowKind::SecondaryRollup, secondary_row_key(*id, key), provenance);
        }
        for (key, rollup) in &rebuilt {
            txn.insert(
                RowKind::SecondaryRollup,
                secondary_row_key(marker_id, key),
                rollup_row(marker_id, key, rollup)?,
                provenance,
            );
        }
        gateway.commit(txn)?;

        for key in &previous {
            sec_rollups.remove(key);
        }
        let rebuilt_count = rebuilt.len();
        for (key, rollup) in rebuilt {
            sec_rollups
                .insert((marker_id, key), rollup)
                .map_err(|err| self.inconsistent_insert(marker_id, rebuilt_count, 0, err))?;
        }
        info!(
            marker_id,
            replaced = previous.len(),
            rebuilt = rebuilt_count,
            "secondary rollups rebuilt"
        );
        Ok(SecondaryRebuild {
            marker_id,
            replaced: previous.len(),
            rebuilt: rebuilt_count,
        })
    }

    pub fn marker(&self, marker_id: u64) -> Option<Marker> {
        self.tables.markers.read().get(&marker_id).cloned()
    }

    /// Subject rollups of a marker, ordered by subject.
    pub fn rollups(&self, marker_id: u64) -> Vec<(Subject, Rollup)> {
        let _markers = self.tables.markers.read();
        self.tables
            .rollups
            .read()
            .range(primary_span(marker_id, marker_id.saturating_add(1)))
            .map(|((_, subject), rollup)| (subject.clone(), rollup.clone()))
            .collect()
    }

    pub fn secondary_rollups(&self, marker_id: u64) -> Vec<(SecondaryKey, Rollup)> {
        let _markers = self.tables.markers.read();
        self.tables
            .secondary_rollups
            .read()
            .range(secondary_span(marker_id, marker_id.saturating_add(1)))
            .map(|((_, key), rollup)| (key.clone(), rollup.clone()))
            .collect()
    }

    pub fn pool_rollup(&self, marker_id: u64) -> Option<Rollup> {
        let _markers = self.tables.markers.read();
        self.tables.pool_rollups.read().get(&marker_id).cloned()
    }
}

fn merge_into<K: Ord>(
    rollups: &mut BTreeMap<K, Rollup>,
    key: K,
    marker_id: u64,
    acc: &ShareAccumulator,
) {
    let rollup = rollups.entry(key).or_insert_with(|| Rollup {
        marker_id,
        totals: seed_from(acc),
        sources: 0,
    });
    rollup.totals.absorb(acc);
    rollup.sources += 1;
}

fn merge_rollup(pool: &mut Option<Rollup>, marker_id: u64, rollup: &Rollup) {
    let pool = pool.get_or_insert_with(|| Rollup {
        marker_id,
        totals: seed_from(&rollup.totals),
        sources: 0,
    });
    pool.totals.absorb(&rollup.totals);
    pool.sources += rollup.sources;
}

fn reinstated_totals(rollup: Rollup) -> ShareAccumulator {
    let mut totals = rollup.totals;
    totals.completeness = Completeness::Complete;
    totals
}

fn seed_from(acc: &ShareAccumulator) -> ShareAccumulator {
    let mut seed = ShareAccumulator::seeded(acc.first);
    seed.completeness = Completeness::Complete;
    seed
}

fn rollup_row<S: Serialize>(
    marker_id: u64,
    subject: &S,
    rollup: &Rollup,
) -> Result<serde_json::Value, PersistError> {
    Ok(serde_json::to_value(RollupRow {
        marker_id,
        subject,
        rollup,
    })?)
}

/// Errors surfaced by marker operations.
#[derive(Debug, Error)]
pub enum CompactionError {
    #[error("marker {0} not found")]
    NotFound(u64),
    #[error("marker {0} already exists")]
    MarkerExists(u64),
    #[error("marker range [{start}, {end}) is empty")]
    InvalidRange { start: u64, end: u64 },
    #[error("marker {marker_id} overlaps marker {other}")]
    Overlaps { marker_id: u64, other: u64 },
    #[error("marker {marker_id} already processed")]
    AlreadyProcessed { marker_id: u64 },
    #[error("marker {marker_id} is not processed")]
    NotProcessed { marker_id: u64 },
    #[error("marker {marker_id} range still holds accumulators")]
    RangeOccupied { marker_id: u64 },
    #[error("marker {marker_id} has an operation in flight")]
    Busy { marker_id: u64 },
    #[error("marker {marker_id} compaction cancelled by shutdown")]
    Cancelled { marker_id: u64 },
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error(transparent)]
    Arena(#[from] ArenaError),
    #[error("marker {marker_id} bookkeeping mismatch: expected {expected} removals, saw {removed}")]
    Inconsistent {
        marker_id: u64,
        expected: usize,
        removed: usize,
    },
}

impl CompactionError {
    /// Errors that must stop the process rather than be retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CompactionError::Inconsistent { .. })
    }
}

