//! The ledger: one instance of every accounting component wired along the
//! event data flow, plus the reload pass and the reload-to-live handover.
//!
//! Lock order, outermost first: config service, pending live queue, the
//! share early queue, the share-error early queue, the work-template index,
//! then the record tables in their own order. The sequence tracker lock is
//! never held across any of the others.

use crate::clock::{Clock, Timestamp};
use crate::config::{ConfigChange, ConfigError, ConfigService, ConfigTrigger, LedgerConfig, TriggerMatcher};
use crate::event::{EventEnvelope, EventPayload};
use crate::logging::SeverityPolicy;
use crate::marker::{CompactionError, CompactionReport, Compactor, Marker, SecondaryRebuild};
use crate::reload::ReloadError;
use crate::runtime::ShutdownSignal;
use crate::sequence::{Origin, SeqCounters, SeqFamily, SequenceError, SequenceReport, SequenceTracker};
use crate::share::{
    AgeReport, AggregateError, Aggregator, DrainOutcome, EarlyCounters, EarlyQueue, IngestMode,
    ShareAccumulator, ShareUpdate, UpdateOutcome,
};
use crate::store::{PersistError, PersistenceGateway, Provenance, RowKind, StoredRow};
use crate::tables::{LedgerTables, Rollup, SecondaryKey, Subject};
use crate::workinfo::WorkTemplates;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

type EarlyShares = Arc<Mutex<EarlyQueue<ShareUpdate>>>;

/// What happened to one ingested envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Live event held until the reload pass has finished.
    Deferred,
    /// Duplicate sequence number; the handler never saw it.
    Discarded,
    Applied,
    /// Work template unknown; waiting in an early queue.
    Parked,
    /// Reload replay of a range whose totals are already durable.
    Skipped,
    /// The target range is sealed or already aged.
    Rejected,
    /// Family handled by another service.
    Passed,
}

/// Per-disposition event counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispositionCounts {
    pub deferred: u64,
    pub discarded: u64,
    pub applied: u64,
    pub parked: u64,
    pub skipped: u64,
    pub rejected: u64,
    pub passed: u64,
    pub failed: u64,
}

impl DispositionCounts {
    pub fn record(&mut self, disposition: Disposition) {
        let slot = match disposition {
            Disposition::Deferred => &mut self.deferred,
            Disposition::Discarded => &mut self.discarded,
            Disposition::Applied => &mut self.applied,
            Disposition::Parked => &mut self.parked,
            Disposition::Skipped => &mut self.skipped,
            Disposition::Rejected => &mut self.rejected,
            Disposition::Passed => &mut self.passed,
        };
        *slot += 1;
    }

    pub fn total(&self) -> u64 {
        self.deferred
            + self.discarded
            + self.applied
            + self.parked
            + self.skipped
            + self.rejected
            + self.passed
            + self.failed
    }
}

/// Rows loaded from the store at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
    pub markers: usize,
    pub accumulators: usize,
    pub rollups: usize,
}

/// Outcome of one reload pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReplayReport {
    pub counts: DispositionCounts,
    /// Lines that could not be decoded.
    pub bad_lines: u64,
}

/// State at the moment the ledger went live.
#[derive(Debug, Clone, Serialize)]
pub struct HandoverReport {
    pub deferred_processed: DispositionCounts,
    pub early_shares: usize,
    pub early_errors: usize,
    pub sequence: SequenceReport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Phase {
    Starting = 0,
    Reloading = 1,
    Handover = 2,
    Live = 3,
}

impl Phase {
    fn from_u8(raw: u8) -> Phase {
        match raw {
            1 => Phase::Reloading,
            2 => Phase::Handover,
            3 => Phase::Live,
            _ => Phase::Starting,
        }
    }
}

#[derive(Deserialize)]
struct StoredAccumulator<S> {
    range_id: u64,
    subject: S,
    totals: ShareAccumulator,
}

#[derive(Deserialize)]
struct StoredRollup<S> {
    marker_id: u64,
    subject: S,
    rollup: Rollup,
}

/// Accounting core of the pool.
pub struct Ledger {
    config: Mutex<ConfigService>,
    tracker: Arc<Mutex<SequenceTracker>>,
    pending_live: Mutex<VecDeque<EventEnvelope>>,
    templates: RwLock<WorkTemplates>,
    early_shares: EarlyShares,
    early_errors: EarlyShares,
    tables: Arc<LedgerTables>,
    aggregator: Aggregator,
    compactor: Compactor,
    gateway: Arc<dyn PersistenceGateway>,
    clock: Arc<dyn Clock>,
    shutdown: ShutdownSignal,
    severity: Arc<SeverityPolicy>,
    phase: AtomicU8,
    stats: Mutex<DispositionCounts>,
}

impl Ledger {
    /// Builds every component from `config` and restores current rows from
    /// `gateway`. An invalid window size fails here.
    pub fn new(
        config: LedgerConfig,
        gateway: Arc<dyn PersistenceGateway>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, LedgerError> {
        let severity = Arc::new(SeverityPolicy::new());
        let shutdown = ShutdownSignal::new();
        let mut service = ConfigService::new(config)?;
        let current = service.current().clone();
        let tracker = Arc::new(Mutex::new(SequenceTracker::new(
            current.sequence.clone(),
            clock.clone(),
            severity.clone(),
        )?));
        let tables = Arc::new(LedgerTables::new(&current.capacity));
        let early_shares: EarlyShares =
            Arc::new(Mutex::new(EarlyQueue::new("shares", current.early.age_limit_s)));
        let early_errors: EarlyShares =
            Arc::new(Mutex::new(EarlyQueue::new("share_errors", current.early.age_limit_s)));

        let (shares, errors) = (early_shares.clone(), early_errors.clone());
        service.register_trigger(ConfigTrigger::new(
            "early_age_limit",
            TriggerMatcher::Prefix("early.".to_string()),
            move |config: &LedgerConfig| {
                shares.lock().set_age_limit(config.early.age_limit_s);
                errors.lock().set_age_limit(config.early.age_limit_s);
            },
        ));

        let sequence = tracker.clone();
        service.register_trigger(ConfigTrigger::new(
            "sequence_limits",
            TriggerMatcher::Prefix("sequence.".to_string()),
            move |config: &LedgerConfig| {
                if let Err(err) = sequence.lock().set_config(config.sequence.clone()) {
                    error!(error = %err, "sequence config rejected by tracker");
                }
            },
        ));
        service.pin("capacity.");
        service.pin("runtime.");

        let ledger = Self {
            config: Mutex::new(service),
            tracker,
            pending_live: Mutex::new(VecDeque::new()),
            templates: RwLock::new(WorkTemplates::new()),
            early_shares,
            early_errors,
            aggregator: Aggregator::new(tables.clone(), severity.clone()),
            compactor: Compactor::new(tables.clone(), shutdown.clone()),
            tables,
            gateway,
            clock,
            shutdown,
            severity,
            phase: AtomicU8::new(Phase::Starting as u8),
            stats: Mutex::new(DispositionCounts::default()),
        };
        let restored = ledger.restore()?;
        if restored != RestoreReport::default() {
            info!(
                markers = restored.markers,
                accumulators = restored.accumulators,
                rollups = restored.rollups,
                "restored current rows from store"
            );
        }
        Ok(ledger)
    }

    fn restore(&self) -> Result<RestoreReport, LedgerError> {
        let mut report = RestoreReport::default();
        let mut markers = self.tables.markers.write();
        let mut primary = self.tables.primary.write();
        let mut secondary = self.tables.secondary.write();
        let mut pool = self.tables.pool.write();
        let mut rollups = self.tables.rollups.write();
        let mut secondary_rollups = self.tables.secondary_rollups.write();
        let mut pool_rollups = self.tables.pool_rollups.write();

        for (key, row) in self.gateway.current_rows(RowKind::Marker)? {
            let marker: Marker = decode_row(RowKind::Marker, &key, row)?;
            markers.insert(marker.id, marker).map_err(AggregateError::from)?;
            report.markers += 1;
        }
        for (key, row) in self.gateway.current_rows(RowKind::Accumulator)? {
            let stored: StoredAccumulator<Subject> = decode_row(RowKind::Accumulator, &key, row)?;
            primary
                .insert((stored.range_id, stored.subject), stored.totals)
                .map_err(AggregateError::from)?;
            report.accumulators += 1;
        }
        for (key, row) in self.gateway.current_rows(RowKind::SecondaryAccumulator)? {
            let stored: StoredAccumulator<SecondaryKey> =
                decode_row(RowKind::SecondaryAccumulator, &key, row)?;
            secondary
                .insert((stored.range_id, stored.subject), stored.totals)
                .map_err(AggregateError::from)?;
            report.accumulators += 1;
        }
        for (key, row) in self.gateway.current_rows(RowKind::PoolAccumulator)? {
            let stored: StoredAccumulator<String> = decode_row(RowKind::PoolAccumulator, &key, row)?;
            pool.insert(stored.range_id, stored.totals)
                .map_err(AggregateError::from)?;
            report.accumulators += 1;
        }
        for (key, row) in self.gateway.current_rows(RowKind::Rollup)? {
            let stored: StoredRollup<Subject> = decode_row(RowKind::Rollup, &key, row)?;
            rollups
                .insert((stored.marker_id, stored.subject), stored.rollup)
                .map_err(AggregateError::from)?;
            report.rollups += 1;
        }
        for (key, row) in self.gateway.current_rows(RowKind::SecondaryRollup)? {
            let stored: StoredRollup<SecondaryKey> = decode_row(RowKind::SecondaryRollup, &key, row)?;
            secondary_rollups
                .insert((stored.marker_id, stored.subject), stored.rollup)
                .map_err(AggregateError::from)?;
            report.rollups += 1;
        }
        for (key, row) in self.gateway.current_rows(RowKind::PoolRollup)? {
            let stored: StoredRollup<String> = decode_row(RowKind::PoolRollup, &key, row)?;
            pool_rollups
                .insert(stored.marker_id, stored.rollup)
                .map_err(AggregateError::from)?;
            report.rollups += 1;
        }
        Ok(report)
    }

    fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    fn set_phase(&self, phase: Phase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    pub fn is_live(&self) -> bool {
        self.phase() == Phase::Live
    }

    /// Enters the reload pass. Live events arriving from now on are held
    /// until [`Ledger::finish_reload`].
    pub fn begin_reload(&self) {
        self.tracker.lock().begin_reload();
        self.set_phase(Phase::Reloading);
        info!("reload started");
    }

    /// Routes one envelope along the data flow.
    pub fn ingest(&self, mut envelope: EventEnvelope) -> Result<Disposition, LedgerError> {
        if envelope.origin.is_live() {
            let mut pending = self.pending_live.lock();
            if self.phase() != Phase::Live {
                envelope.origin = Origin::EarlySocket;
                pending.push_back(envelope);
                self.stats.lock().record(Disposition::Deferred);
                return Ok(Disposition::Deferred);
            }
        }
        let result = self.process(envelope);
        let mut stats = self.stats.lock();
        match &result {
            Ok(disposition) => stats.record(*disposition),
            Err(_) => stats.failed += 1,
        }
        result
    }

    /// Feeds a reload pass. Undecodable lines are logged and skipped; a read
    /// failure or shutdown ends the pass.
    pub fn replay<I>(&self, events: I) -> Result<ReplayReport, LedgerError>
    where
        I: IntoIterator<Item = Result<EventEnvelope, ReloadError>>,
    {
        let mut report = ReplayReport::default();
        for event in events {
            if self.shutdown.is_triggered() {
                warn!(processed = report.counts.total(), "reload interrupted by shutdown");
                return Err(LedgerError::Interrupted {
                    stage: "reload",
                    processed: report.counts.total(),
                });
            }
            let envelope = match event {
                Ok(envelope) => envelope,
                Err(err) if err.is_fatal() => return Err(err.into()),
                Err(err) => {
                    warn!(line = err.line(), error = %err, "skipping reload line");
                    report.bad_lines += 1;
                    continue;
                }
            };
            match self.ingest(envelope) {
                Ok(disposition) => report.counts.record(disposition),
                Err(err) => {
                    error!(error = %err, "reload event failed");
                    report.counts.failed += 1;
                }
            }
        }
        info!(
            events = report.counts.total(),
            applied = report.counts.applied,
            bad_lines = report.bad_lines,
            "reload pass complete"
        );
        Ok(report)
    }

    /// Freezes the reload boundary, drains the live events held during the
    /// reload in arrival order, then switches to live processing.
    pub fn finish_reload(&self) -> Result<HandoverReport, LedgerError> {
        self.tracker.lock().finish_reload();
        self.set_phase(Phase::Handover);
        let mut drained = DispositionCounts::default();
        loop {
            if self.shutdown.is_triggered() {
                return Err(LedgerError::Interrupted {
                    stage: "handover",
                    processed: drained.total(),
                });
            }
            let next = {
                let mut pending = self.pending_live.lock();
                match pending.pop_front() {
                    Some(envelope) => envelope,
                    None => {
                        self.set_phase(Phase::Live);
                        break;
                    }
                }
            };
            match self.process(next) {
                Ok(disposition) => {
                    drained.record(disposition);
                    self.stats.lock().record(disposition);
                }
                Err(err) => {
                    error!(error = %err, "deferred live event failed");
                    drained.failed += 1;
                    self.stats.lock().failed += 1;
                }
            }
        }
        self.severity.mark_steady();
        let report = HandoverReport {
            deferred_processed: drained,
            early_shares: self.early_shares.lock().len(),
            early_errors: self.early_errors.lock().len(),
            sequence: self.tracker.lock().report(),
        };
        info!(
            deferred = drained.total(),
            early_shares = report.early_shares,
            early_errors = report.early_errors,
            "ledger live"
        );
        Ok(report)
    }

    fn process(&self, envelope: EventEnvelope) -> Result<Disposition, LedgerError> {
        let mode = match envelope.origin {
            Origin::Reload => IngestMode::Reload,
            Origin::EarlySocket | Origin::Socket => IngestMode::Live,
        };
        if let Some(meta) = &envelope.seq {
            let check = self.tracker.lock().admit_meta(
                meta,
                envelope.family,
                envelope.logical_time,
                envelope.origin,
            )?;
            if check.is_some_and(|check| check.discards()) {
                return Ok(Disposition::Discarded);
            }
        }

        let logical_time = envelope.logical_time;
        match envelope.payload {
            EventPayload::WorkInfo(template) => {
                let work_id = template.work_id;
                let fresh = self.templates.write().insert(template);
                if !fresh {
                    debug!(work_id, "work template already known");
                }
                self.drain_early(work_id, logical_time, mode);
                Ok(Disposition::Applied)
            }
            EventPayload::AgeWorkInfo { work_id } => {
                let provenance = self.provenance("ageworkinfo", logical_time);
                let aged = self.aggregator.age_range(work_id, &*self.gateway, &provenance)?;
                let older = self
                    .aggregator
                    .auto_age_older(work_id, &*self.gateway, &provenance)?;
                debug!(work_id, aged = aged.total(), older = older.len(), "work template aged");
                Ok(Disposition::Applied)
            }
            EventPayload::Share(share) => {
                let update = ShareUpdate::from_share(&share, &self.dimensions());
                self.apply_or_park(update, &self.early_shares, logical_time, mode)
            }
            EventPayload::ShareError(share_error) => {
                let update = ShareUpdate::from_error(&share_error, &self.dimensions());
                self.apply_or_park(update, &self.early_errors, logical_time, mode)
            }
            EventPayload::Other { command } => {
                debug!(family = %envelope.family, command = %command, "passed through");
                Ok(Disposition::Passed)
            }
        }
    }

    fn apply_or_park(
        &self,
        update: ShareUpdate,
        queue: &EarlyShares,
        logical_time: Timestamp,
        mode: IngestMode,
    ) -> Result<Disposition, LedgerError> {
        let work_id = update.range_id;
        {
            let mut queue = queue.lock();
            if !self.templates.read().contains(work_id) {
                queue.park(work_id, logical_time, update);
                return Ok(Disposition::Parked);
            }
        }
        match self.aggregator.update(&update, mode) {
            Ok(UpdateOutcome::Applied) => {
                self.drain_early(work_id, logical_time, mode);
                Ok(Disposition::Applied)
            }
            Ok(UpdateOutcome::SkippedAged) => Ok(Disposition::Skipped),
            Err(err @ (AggregateError::RangeSealed { .. } | AggregateError::RangeAged { .. })) => {
                self.severity.anomaly(
                    "share_rejected",
                    format_args!("{} work {work_id}: {err}", update.subject),
                );
                Ok(Disposition::Rejected)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Offers one parked item from each early queue to the aggregator now
    /// that `resolved_id` is known.
    fn drain_early(&self, resolved_id: u64, now: Timestamp, mode: IngestMode) {
        for queue in [&self.early_shares, &self.early_errors] {
            let mut queue = queue.lock();
            let outcome = queue.drain_one(
                resolved_id,
                now,
                |work_id| self.templates.read().contains(work_id),
                |update| self.aggregator.update(update, mode).map(|_| ()),
            );
            match outcome {
                DrainOutcome::Flagged { work_id } => self.severity.anomaly(
                    "early_stale",
                    format_args!("early item for work {work_id} past age limit"),
                ),
                DrainOutcome::Discarded { work_id } => self.severity.anomaly(
                    "early_discarded",
                    format_args!("early item for work {work_id} discarded"),
                ),
                _ => {}
            }
        }
    }

    fn dimensions(&self) -> Vec<String> {
        self.config.lock().current().secondary_dimensions.clone()
    }

    fn provenance(&self, code: &str, at: Timestamp) -> Provenance {
        let config = self.config.lock();
        let provenance = &config.current().provenance;
        Provenance::new(provenance.actor.clone(), code, provenance.inet.clone(), at)
    }

    /// Promotes long-outstanding sequence gaps to transient.
    pub fn sweep_transient(&self) -> u64 {
        self.tracker.lock().sweep_transient()
    }

    /// Persists a range's NEW accumulators without waiting for its
    /// age event.
    pub fn age_range(&self, range_id: u64) -> Result<AgeReport, LedgerError> {
        let provenance = self.provenance("age_range", self.clock.now());
        Ok(self.aggregator.age_range(range_id, &*self.gateway, &provenance)?)
    }

    pub fn confirm_range(&self, range_id: u64) -> Result<AgeReport, LedgerError> {
        Ok(self.aggregator.confirm_range(range_id, &*self.gateway)?)
    }

    pub fn mark_ready(
        &self,
        marker_id: u64,
        start: u64,
        end: u64,
        description: &str,
    ) -> Result<Marker, LedgerError> {
        let provenance = self.provenance("mark_ready", self.clock.now());
        Ok(self
            .compactor
            .mark_ready(marker_id, start, end, description, &*self.gateway, &provenance)?)
    }

    /// Compacts a READY marker. A bookkeeping inconsistency raises the
    /// shutdown signal.
    pub fn compact(&self, marker_id: u64) -> Result<CompactionReport, LedgerError> {
        let provenance = self.provenance("compact", self.clock.now());
        match self.compactor.compact(marker_id, &*self.gateway, &provenance) {
            Ok(report) => Ok(report),
            Err(err) => {
                if err.is_fatal() {
                    error!(marker_id, error = %err, "fatal compaction failure, shutting down");
                    self.shutdown.trigger();
                }
                Err(err.into())
            }
        }
    }

    pub fn reprocess(&self, marker_id: u64) -> Result<usize, LedgerError> {
        let provenance = self.provenance("reprocess", self.clock.now());
        Ok(self
            .compactor
            .reprocess(marker_id, &*self.gateway, &provenance)?)
    }

    /// Rebuilds a PROCESSED marker's secondary rollups from replayed share
    /// and share-error envelopes; other payloads are ignored.
    pub fn rebuild_secondary<I>(&self, marker_id: u64, events: I) -> Result<SecondaryRebuild, LedgerError>
    where
        I: IntoIterator<Item = EventEnvelope>,
    {
        let dimensions = self.dimensions();
        let updates = events.into_iter().filter_map(|envelope| match &envelope.payload {
            EventPayload::Share(share) => Some(ShareUpdate::from_share(share, &dimensions)),
            EventPayload::ShareError(share_error) => {
                Some(ShareUpdate::from_error(share_error, &dimensions))
            }
            _ => None,
        });
        let provenance = self.provenance("rebuild_secondary", self.clock.now());
        Ok(self
            .compactor
            .rebuild_secondary(marker_id, updates, &*self.gateway, &provenance)?)
    }

    pub fn set_config(&self, key: &str, value: Value, actor: &str) -> Result<ConfigChange, LedgerError> {
        let now = self.clock.now();
        Ok(self.config.lock().set(key, value, actor, now)?)
    }

    pub fn rollback_config(&self, version: u64, actor: &str) -> Result<ConfigChange, LedgerError> {
        let now = self.clock.now();
        Ok(self.config.lock().rollback(version, actor, now)?)
    }

    pub fn config(&self) -> LedgerConfig {
        self.config.lock().current().clone()
    }

    pub fn config_version(&self) -> u64 {
        self.config.lock().version()
    }

    pub fn marker(&self, marker_id: u64) -> Option<Marker> {
        self.compactor.marker(marker_id)
    }

    pub fn marker_rollups(&self, marker_id: u64) -> Vec<(Subject, Rollup)> {
        self.compactor.rollups(marker_id)
    }

    pub fn secondary_rollups(&self, marker_id: u64) -> Vec<(SecondaryKey, Rollup)> {
        self.compactor.secondary_rollups(marker_id)
    }

    pub fn pool_rollup(&self, marker_id: u64) -> Option<Rollup> {
        self.compactor.pool_rollup(marker_id)
    }

    pub fn sequence_report(&self) -> SequenceReport {
        self.tracker.lock().report()
    }

    pub fn sequence_counters(&self, family: SeqFamily) -> SeqCounters {
        self.tracker.lock().counters(family)
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    /// Counters of the share and share-error early queues.
    pub fn early_counters(&self) -> (EarlyCounters, EarlyCounters) {
        (
            self.early_shares.lock().counters(),
            self.early_errors.lock().counters(),
        )
    }

    pub fn early_depth(&self) -> (usize, usize) {
        (self.early_shares.lock().len(), self.early_errors.lock().len())
    }

    pub fn known_template(&self, work_id: u64) -> bool {
        self.templates.read().contains(work_id)
    }

    pub fn stats(&self) -> DispositionCounts {
        *self.stats.lock()
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    pub fn shutdown(&self) {
        info!("ledger shutdown requested");
        self.shutdown.trigger();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_triggered()
    }
}

fn decode_row<T: DeserializeOwned>(kind: RowKind, key: &str, row: StoredRow) -> Result<T, LedgerError> {
    serde_json::from_value(row.row).map_err(|source| LedgerError::Restore {
        kind,
        key: key.to_string(),
        source,
    })
}

/// Errors surfaced by ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Sequence(#[from] SequenceError),
    #[error(transparent)]
    Aggregate(#[from] AggregateError),
    #[error(transparent)]
    Compaction(#[from] CompactionError),
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error(transparent)]
    Reload(#[from] ReloadError),
    #[error("stored {kind} row {key} is unreadable: {source}")]
    Restore {
        kind: RowKind,
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{stage} interrupted by shutdown after {processed} events")]
    Interrupted { stage: &'static str, processed: u64 },
}
