use super::family::{Origin, SeqFamily, SeqMeta, MAX_SEQ_SETS};
use super::window::{validate_size, SeqCheck, SeqClass, SeqCounters, SequenceWindow};
use super::SequenceError;
use crate::clock::{Clock, Timestamp};
use crate::config::SequenceConfig;
use crate::logging::SeverityPolicy;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info};

/// Outcome of checking a decoder sequence block against both the shared
/// counter and the family counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetaCheck {
    pub all: SeqCheck,
    pub family: SeqCheck,
}

impl MetaCheck {
    /// The family verdict decides whether the event is dropped.
    pub fn discards(&self) -> bool {
        self.family.class.discards()
    }
}

/// Windows for one producer run, identified by `(seqstt, seqpid)`.
struct SeqSet {
    seqstt: u64,
    seqpid: u64,
    first_seen: Timestamp,
    windows: Vec<Option<SequenceWindow>>,
}

impl SeqSet {
    fn new(seqstt: u64, seqpid: u64, first_seen: Timestamp) -> Self {
        Self {
            seqstt,
            seqpid,
            first_seen,
            windows: (0..SeqFamily::COUNT).map(|_| None).collect(),
        }
    }
}

/// Gap, duplicate and loss detection for every event family.
pub struct SequenceTracker {
    config: SequenceConfig,
    sets: VecDeque<SeqSet>,
    clock: Arc<dyn Clock>,
    severity: Arc<SeverityPolicy>,
    reloading: bool,
}

impl SequenceTracker {
    /// Validates every window class up front; a bad size aborts startup.
    pub fn new(
        config: SequenceConfig,
        clock: Arc<dyn Clock>,
        severity: Arc<SeverityPolicy>,
    ) -> Result<Self, SequenceError> {
        for spec in [&config.large, &config.medium, &config.small] {
            validate_size(spec.size, config.min_size())?;
        }
        Ok(Self {
            config,
            sets: VecDeque::new(),
            clock,
            severity,
            reloading: false,
        })
    }

    /// Classifies `seqnum` against the current set's window for `family`.
    pub fn admit(
        &mut self,
        family: SeqFamily,
        seqnum: u64,
        logical_time: Timestamp,
        origin: Origin,
    ) -> Result<SeqCheck, SequenceError> {
        let now = self.clock.now();
        if self.sets.is_empty() {
            self.sets.push_back(SeqSet::new(0, 0, now));
        }
        let set_idx = self.sets.len() - 1;
        self.admit_in(set_idx, family, seqnum, logical_time, origin, now)
    }

    /// Checks a decoder sequence block. Returns `None` when the block carries
    /// the ignore sentinel.
    pub fn admit_meta(
        &mut self,
        meta: &SeqMeta,
        family: SeqFamily,
        logical_time: Timestamp,
        origin: Origin,
    ) -> Result<Option<MetaCheck>, SequenceError> {
        if meta.is_ignored() {
            debug!(family = %family, seqcmd = meta.seqcmd, "sequence check skipped");
            return Ok(None);
        }
        let now = self.clock.now();
        let set_idx = self.select_set(meta.seqstt, meta.seqpid, now);
        let all = self.admit_in(set_idx, SeqFamily::All, meta.seqall, logical_time, origin, now)?;
        let family_check = if family == SeqFamily::All {
            all
        } else {
            self.admit_in(set_idx, family, meta.seqcmd, logical_time, origin, now)?
        };
        Ok(Some(MetaCheck {
            all,
            family: family_check,
        }))
    }

    fn select_set(&mut self, seqstt: u64, seqpid: u64, now: Timestamp) -> usize {
        if let Some(idx) = self
            .sets
            .iter()
            .position(|set| set.seqstt == seqstt && set.seqpid == seqpid)
        {
            return idx;
        }
        info!(seqstt, seqpid, "new sequence set");
        self.sets.push_back(SeqSet::new(seqstt, seqpid, now));
        while self.sets.len() > MAX_SEQ_SETS {
            if let Some(dropped) = self.sets.pop_front() {
                info!(
                    seqstt = dropped.seqstt,
                    seqpid = dropped.seqpid,
                    "sequence set retired"
                );
            }
        }
        self.sets.len() - 1
    }

    fn admit_in(
        &mut self,
        set_idx: usize,
        family: SeqFamily,
        seqnum: u64,
        logical_time: Timestamp,
        origin: Origin,
        now: Timestamp,
    ) -> Result<SeqCheck, SequenceError> {
        let reloading = self.reloading;
        let spec = self.config.spec_for(family.window_class()).clone();
        let slot = &mut self.sets[set_idx].windows[family.index()];
        if slot.is_none() {
            let mut window = SequenceWindow::new(family, &spec, &self.config)?;
            if reloading {
                window.begin_reload();
            }
            *slot = Some(window);
        }
        let Some(window) = slot.as_mut() else {
            return Err(SequenceError::WindowUnavailable(family));
        };
        let check = window.admit(seqnum, logical_time, origin, now);
        self.report_check(family, seqnum, origin, &check);
        Ok(check)
    }

    fn report_check(&self, family: SeqFamily, seqnum: u64, origin: Origin, check: &SeqCheck) {
        if check.gap > 0 {
            self.severity.anomaly(
                "seq_missing",
                format_args!("{family} {} missing before {seqnum}", check.gap),
            );
        }
        if check.lost > 0 {
            self.severity.anomaly(
                "seq_lost",
                format_args!("{family} {} lost sliding to {seqnum}", check.lost),
            );
        }
        match check.class {
            SeqClass::Stale | SeqClass::High => self.severity.anomaly(
                "seq_reject",
                format_args!(
                    "{family} {seqnum} {} from {}",
                    check.class.as_str(),
                    origin.tag()
                ),
            ),
            SeqClass::Recovered => {
                debug!(family = %family, seq = seqnum, origin = %origin.tag(), "sequence recovered")
            }
            SeqClass::Duplicate | SeqClass::ReloadOverlap => {
                debug!(family = %family, seq = seqnum, class = check.class.as_str(), "sequence discarded")
            }
            SeqClass::Ok => {}
        }
    }

    /// Starts collecting lost slots so the live feed can recover them later.
    pub fn begin_reload(&mut self) {
        self.reloading = true;
        for window in self.windows_mut() {
            window.begin_reload();
        }
    }

    /// Freezes each family's reload window as the live-feed boundary.
    pub fn finish_reload(&mut self) {
        self.reloading = false;
        for window in self.windows_mut() {
            window.finish_reload();
        }
    }

    pub fn is_reloading(&self) -> bool {
        self.reloading
    }

    /// Promotes long-outstanding gaps to transient; live mode only.
    pub fn sweep_transient(&mut self) -> u64 {
        if self.reloading {
            return 0;
        }
        let now = self.clock.now();
        let mut total = 0u64;
        let mut flagged_by_family = Vec::new();
        for window in self.windows_mut() {
            let flagged = window.sweep_transient(now);
            if let Some(first) = flagged.first() {
                flagged_by_family.push((window.family(), *first, flagged.len()));
                total += flagged.len() as u64;
            }
        }
        for (family, first, count) in flagged_by_family {
            self.severity.anomaly(
                "seq_transient",
                format_args!("{family} {count} gaps outstanding past limit from {first}"),
            );
        }
        total
    }

    /// Adopts a new sequence configuration. Open windows take the new
    /// limits at once; a changed window size applies to windows created
    /// afterwards.
    pub fn set_config(&mut self, config: SequenceConfig) -> Result<(), SequenceError> {
        for spec in [&config.large, &config.medium, &config.small] {
            validate_size(spec.size, config.min_size())?;
        }
        let mut retuned = 0;
        for window in self.windows_mut() {
            window.retune(config.spec_for(window.family().window_class()), &config);
            retuned += 1;
        }
        info!(
            retuned,
            high_min = config.high_min,
            high_shift = config.high_shift,
            "sequence config applied"
        );
        self.config = config;
        Ok(())
    }

    pub fn config(&self) -> &SequenceConfig {
        &self.config
    }

    /// Window for `family` in the most recent set.
    pub fn window(&self, family: SeqFamily) -> Option<&SequenceWindow> {
        self.sets.back()?.windows[family.index()].as_ref()
    }

    /// Counters for `family` in the most recent set.
    pub fn counters(&self, family: SeqFamily) -> SeqCounters {
        self.window(family)
            .map(SequenceWindow::counters)
            .unwrap_or_default()
    }

    pub fn set_count(&self) -> usize {
        self.sets.len()
    }

    pub fn report(&self) -> SequenceReport {
        let mut totals = SeqCounters::default();
        let sets = self
            .sets
            .iter()
            .map(|set| {
                let families = set
                    .windows
                    .iter()
                    .flatten()
                    .map(|window| {
                        let counters = window.counters();
                        totals.absorb(&counters);
                        FamilyReport {
                            family: window.family(),
                            size: window.size(),
                            seqbase: window.seqbase(),
                            minseq: window.minseq(),
                            maxseq: window.maxseq(),
                            counters,
                        }
                    })
                    .collect();
                SeqSetReport {
                    seqstt: set.seqstt,
                    seqpid: set.seqpid,
                    first_seen: set.first_seen,
                    families,
                }
            })
            .collect();
        SequenceReport { sets, totals }
    }

    fn windows_mut(&mut self) -> impl Iterator<Item = &mut SequenceWindow> + '_ {
        self.sets
            .iter_mut()
            .flat_map(|set| set.windows.iter_mut().flatten())
    }
}

/// Serializable snapshot of every window's counters.
#[derive(Debug, Clone, Serialize)]
pub struct SequenceReport {
    pub sets: Vec<SeqSetReport>,
    pub totals: SeqCounters,
}

#[derive(Debug, Clone, Serialize)]
pub struct SeqSetReport {
    pub seqstt: u64,
    pub seqpid: u64,
    pub first_seen: Timestamp,
    pub families: Vec<FamilyReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FamilyReport {
    pub family: SeqFamily,
    pub size: u64,
    pub seqbase: u64,
    pub minseq: u64,
    pub maxseq: u64,
    pub counters: SeqCounters,
}
