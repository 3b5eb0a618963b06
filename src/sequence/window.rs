use super::family::{Origin, SeqFamily};
use super::SequenceError;
use crate::clock::{secs_to_micros, Timestamp};
use crate::config::{SequenceConfig, WindowSpec};
use serde::Serialize;
use std::collections::BTreeSet;

/// How a single arrival was classified against its family window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SeqClass {
    Ok,
    Duplicate,
    Recovered,
    Stale,
    High,
    /// Live arrival already covered by the completed reload pass.
    ReloadOverlap,
}

impl SeqClass {
    /// Classes worth an operator's attention.
    pub fn is_anomaly(self) -> bool {
        matches!(self, SeqClass::Stale | SeqClass::High)
    }

    /// Whether the event behind this arrival must not reach its handler.
    pub fn discards(self) -> bool {
        matches!(self, SeqClass::Duplicate | SeqClass::ReloadOverlap)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SeqClass::Ok => "ok",
            SeqClass::Duplicate => "duplicate",
            SeqClass::Recovered => "recovered",
            SeqClass::Stale => "stale",
            SeqClass::High => "high",
            SeqClass::ReloadOverlap => "reload_overlap",
        }
    }
}

/// Result of admitting one sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeqCheck {
    pub class: SeqClass,
    /// Slots newly flagged missing by this arrival.
    pub gap: u64,
    /// Missing slots evicted (and so declared lost) by this arrival.
    pub lost: u64,
}

impl SeqCheck {
    fn of(class: SeqClass) -> Self {
        Self {
            class,
            gap: 0,
            lost: 0,
        }
    }
}

/// Window counters. `missing` is the number of gaps currently outstanding;
/// the rest only grow, except `lost` which gives back reload-recovered slots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeqCounters {
    pub ok: u64,
    pub missing: u64,
    pub transient: u64,
    pub lost: u64,
    pub stale: u64,
    pub high: u64,
    pub recovered: u64,
    pub duplicate: u64,
}

impl SeqCounters {
    pub fn absorb(&mut self, other: &SeqCounters) {
        self.ok += other.ok;
        self.missing += other.missing;
        self.transient += other.transient;
        self.lost += other.lost;
        self.stale += other.stale;
        self.high += other.high;
        self.recovered += other.recovered;
        self.duplicate += other.duplicate;
    }
}

/// What a window remembers about a received sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotArrival {
    pub origin_code: u8,
    pub arrived: Timestamp,
    pub logical_time: Timestamp,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum SlotState {
    #[default]
    Empty,
    Present,
    Missing,
}

#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    state: SlotState,
    transient: bool,
    origin: u8,
    /// Arrival time, or the time the slot was flagged missing.
    stamped: Timestamp,
    logical_time: Timestamp,
}

/// Sliding window over one family's recent sequence numbers.
#[derive(Debug)]
pub struct SequenceWindow {
    family: SeqFamily,
    size: u64,
    high_limit: u64,
    transient_limit_us: u64,
    slots: Vec<Slot>,
    started: bool,
    seqbase: u64,
    minseq: u64,
    maxseq: u64,
    /// Lowest sequence ever admitted; unlike `minseq` it does not follow the
    /// window up as it slides.
    lowest_seen: u64,
    counters: SeqCounters,
    outstanding: BTreeSet<u64>,
    collecting_lost: bool,
    reload_lost: BTreeSet<u64>,
    /// `maxseq` when the reload pass finished; cleared once live passes it.
    reload_max: Option<u64>,
}

impl SequenceWindow {
    /// Builds an empty window; a size that is not a power of two or is below
    /// the configured minimum is rejected.
    pub fn new(
        family: SeqFamily,
        spec: &WindowSpec,
        config: &SequenceConfig,
    ) -> Result<Self, SequenceError> {
        validate_size(spec.size, config.min_size())?;
        Ok(Self {
            family,
            size: spec.size,
            high_limit: config.high_limit(spec.size),
            transient_limit_us: secs_to_micros(spec.transient_limit_s),
            slots: vec![Slot::default(); spec.size as usize],
            started: false,
            seqbase: 0,
            minseq: 0,
            maxseq: 0,
            lowest_seen: 0,
            counters: SeqCounters::default(),
            outstanding: BTreeSet::new(),
            collecting_lost: false,
            reload_lost: BTreeSet::new(),
            reload_max: None,
        })
    }

    /// Takes the high-jump and transient limits from a new configuration.
    /// The slot ring keeps its size.
    pub fn retune(&mut self, spec: &WindowSpec, config: &SequenceConfig) {
        self.high_limit = config.high_limit(self.size).min(self.size - 1);
        self.transient_limit_us = secs_to_micros(spec.transient_limit_s);
    }

    /// Classifies `seq` and updates the window.
    pub fn admit(
        &mut self,
        seq: u64,
        logical_time: Timestamp,
        origin: Origin,
        now: Timestamp,
    ) -> SeqCheck {
        let check = self.classify(seq, logical_time, origin, now);
        if origin.is_live() {
            if let Some(reload_max) = self.reload_max {
                if self.maxseq > reload_max {
                    self.reload_max = None;
                    self.reload_lost.clear();
                }
            }
        }
        check
    }

    fn classify(
        &mut self,
        seq: u64,
        logical_time: Timestamp,
        origin: Origin,
        now: Timestamp,
    ) -> SeqCheck {
        if !self.started {
            self.started = true;
            self.seqbase = seq;
            self.minseq = seq;
            self.maxseq = seq;
            self.lowest_seen = seq;
            self.fill(seq, logical_time, origin, now);
            return SeqCheck::of(SeqClass::Ok);
        }

        if seq > self.maxseq {
            let jump = seq - self.maxseq;
            if jump > self.high_limit {
                self.counters.high += 1;
                return SeqCheck::of(SeqClass::High);
            }
            let mut lost = 0;
            for gap_seq in self.maxseq + 1..seq {
                lost += self.make_room(gap_seq);
                self.mark_missing(gap_seq, now);
            }
            lost += self.make_room(seq);
            self.fill(seq, logical_time, origin, now);
            self.maxseq = seq;
            return SeqCheck {
                class: SeqClass::Ok,
                gap: jump - 1,
                lost,
            };
        }

        if seq < self.seqbase {
            if self.maxseq - seq >= self.size {
                return self.stale_arrival(seq, origin);
            }
            for gap_seq in seq + 1..self.seqbase {
                self.mark_missing(gap_seq, now);
            }
            let gap = self.seqbase - seq - 1;
            self.fill(seq, logical_time, origin, now);
            self.seqbase = seq;
            self.minseq = seq;
            self.lowest_seen = self.lowest_seen.min(seq);
            return SeqCheck {
                class: SeqClass::Ok,
                gap,
                lost: 0,
            };
        }

        match self.slots[self.position(seq)].state {
            SlotState::Missing => {
                self.counters.missing -= 1;
                self.counters.recovered += 1;
                self.outstanding.remove(&seq);
                self.fill(seq, logical_time, origin, now);
                SeqCheck::of(SeqClass::Recovered)
            }
            SlotState::Present => {
                self.counters.duplicate += 1;
                SeqCheck::of(SeqClass::Duplicate)
            }
            SlotState::Empty => {
                self.fill(seq, logical_time, origin, now);
                SeqCheck::of(SeqClass::Ok)
            }
        }
    }

    fn stale_arrival(&mut self, seq: u64, origin: Origin) -> SeqCheck {
        if origin.is_live() && self.reload_max.is_some() && seq >= self.lowest_seen {
            if self.reload_lost.remove(&seq) {
                self.counters.lost = self.counters.lost.saturating_sub(1);
                self.counters.recovered += 1;
                self.counters.ok += 1;
                return SeqCheck::of(SeqClass::Recovered);
            }
            self.counters.duplicate += 1;
            return SeqCheck::of(SeqClass::ReloadOverlap);
        }
        self.counters.stale += 1;
        SeqCheck::of(SeqClass::Stale)
    }

    /// Slides the base until `seq` fits, returning how many slots were lost.
    fn make_room(&mut self, seq: u64) -> u64 {
        let mut lost = 0;
        while seq - self.seqbase >= self.size {
            let evicted = self.seqbase;
            let pos = self.position(evicted);
            if self.slots[pos].state == SlotState::Missing {
                self.counters.missing -= 1;
                self.counters.lost += 1;
                self.outstanding.remove(&evicted);
                if self.collecting_lost {
                    self.reload_lost.insert(evicted);
                }
                lost += 1;
            }
            self.slots[pos] = Slot::default();
            self.seqbase += 1;
        }
        self.minseq = self.minseq.max(self.seqbase);
        lost
    }

    fn mark_missing(&mut self, seq: u64, now: Timestamp) {
        let pos = self.position(seq);
        self.slots[pos] = Slot {
            state: SlotState::Missing,
            transient: false,
            origin: 0,
            stamped: now,
            logical_time: Timestamp::ZERO,
        };
        self.counters.missing += 1;
        self.outstanding.insert(seq);
    }

    fn fill(&mut self, seq: u64, logical_time: Timestamp, origin: Origin, now: Timestamp) {
        let pos = self.position(seq);
        self.slots[pos] = Slot {
            state: SlotState::Present,
            transient: false,
            origin: origin.code(),
            stamped: now,
            logical_time,
        };
        self.counters.ok += 1;
    }

    fn position(&self, seq: u64) -> usize {
        (seq & (self.size - 1)) as usize
    }

    /// Flags gaps outstanding longer than the transient limit, once each.
    pub fn sweep_transient(&mut self, now: Timestamp) -> Vec<u64> {
        let mut flagged = Vec::new();
        for &seq in &self.outstanding {
            let pos = (seq & (self.size - 1)) as usize;
            let slot = &mut self.slots[pos];
            if slot.transient || now.micros_since(slot.stamped) <= self.transient_limit_us {
                continue;
            }
            slot.transient = true;
            flagged.push(seq);
        }
        self.counters.transient += flagged.len() as u64;
        flagged
    }

    pub(crate) fn begin_reload(&mut self) {
        self.collecting_lost = true;
        self.reload_lost.clear();
        self.reload_max = None;
    }

    pub(crate) fn finish_reload(&mut self) {
        self.collecting_lost = false;
        if self.started {
            self.reload_max = Some(self.maxseq);
        } else {
            self.reload_lost.clear();
        }
    }

    pub fn family(&self) -> SeqFamily {
        self.family
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn high_limit(&self) -> u64 {
        self.high_limit
    }

    pub fn seqbase(&self) -> u64 {
        self.seqbase
    }

    pub fn minseq(&self) -> u64 {
        self.minseq
    }

    pub fn maxseq(&self) -> u64 {
        self.maxseq
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn counters(&self) -> SeqCounters {
        self.counters
    }

    /// Whether `seq` is inside the window and still flagged missing.
    pub fn is_missing(&self, seq: u64) -> bool {
        self.outstanding.contains(&seq)
    }

    /// Arrival details recorded for a present slot.
    pub fn arrival(&self, seq: u64) -> Option<SlotArrival> {
        if !self.started || seq < self.seqbase || seq > self.maxseq {
            return None;
        }
        let slot = &self.slots[self.position(seq)];
        (slot.state == SlotState::Present).then_some(SlotArrival {
            origin_code: slot.origin,
            arrived: slot.stamped,
            logical_time: slot.logical_time,
        })
    }

    /// Lost sequence numbers still eligible for recovery from the live feed.
    pub fn reload_lost(&self) -> impl Iterator<Item = u64> + '_ {
        self.reload_lost.iter().copied()
    }
}

pub(crate) fn validate_size(size: u64, min_size: u64) -> Result<(), SequenceError> {
    if !size.is_power_of_two() || size < min_size {
        return Err(SequenceError::InvalidWindowSize { size, min_size });
    }
    Ok(())
}
