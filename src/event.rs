use crate::clock::Timestamp;
use crate::sequence::{Origin, SeqFamily, SeqMeta};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification the pool frontend assigned to a share.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShareOutcome {
    Accepted,
    Stale,
    Duplicate,
    HighDiff,
    Rejected,
}

impl ShareOutcome {
    pub fn all() -> [ShareOutcome; 5] {
        [
            ShareOutcome::Accepted,
            ShareOutcome::Stale,
            ShareOutcome::Duplicate,
            ShareOutcome::HighDiff,
            ShareOutcome::Rejected,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ShareOutcome::Accepted => "accepted",
            ShareOutcome::Stale => "stale",
            ShareOutcome::Duplicate => "duplicate",
            ShareOutcome::HighDiff => "high_diff",
            ShareOutcome::Rejected => "rejected",
        }
    }
}

impl fmt::Display for ShareOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Work template announced by the pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkTemplate {
    pub work_id: u64,
    #[serde(default)]
    pub pool_instance: String,
    pub created: Timestamp,
}

/// One submitted share.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareRecord {
    pub work_id: u64,
    pub user_id: i64,
    pub worker: String,
    pub outcome: ShareOutcome,
    pub diff: f64,
    pub created: Timestamp,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub agent: Option<String>,
}

/// A share the frontend refused before classifying it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareErrorRecord {
    pub work_id: u64,
    pub user_id: i64,
    pub worker: String,
    pub error_code: i32,
    pub created: Timestamp,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub agent: Option<String>,
}

/// Read access to the secondary attributes shares and errors both carry.
pub trait SecondaryAttributes {
    fn attribute(&self, dimension: &str) -> Option<&str>;
}

impl SecondaryAttributes for ShareRecord {
    fn attribute(&self, dimension: &str) -> Option<&str> {
        match dimension {
            "address" => self.address.as_deref(),
            "agent" => self.agent.as_deref(),
            _ => None,
        }
    }
}

impl SecondaryAttributes for ShareErrorRecord {
    fn attribute(&self, dimension: &str) -> Option<&str> {
        match dimension {
            "address" => self.address.as_deref(),
            "agent" => self.agent.as_deref(),
            _ => None,
        }
    }
}

/// Decoded payloads the core acts on. Families handled by other services
/// (auth, heartbeats, stats) pass through as `Other`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    WorkInfo(WorkTemplate),
    AgeWorkInfo { work_id: u64 },
    Share(ShareRecord),
    ShareError(ShareErrorRecord),
    Other { command: String },
}

impl EventPayload {
    /// Work template a share or share error refers to.
    pub fn work_ref(&self) -> Option<u64> {
        match self {
            EventPayload::Share(share) => Some(share.work_id),
            EventPayload::ShareError(error) => Some(error.work_id),
            _ => None,
        }
    }
}

/// Decoded event as handed over by the line decoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub family: SeqFamily,
    #[serde(default)]
    pub seq: Option<SeqMeta>,
    pub origin: Origin,
    pub logical_time: Timestamp,
    pub payload: EventPayload,
}

impl EventEnvelope {
    pub fn new(
        family: SeqFamily,
        origin: Origin,
        logical_time: Timestamp,
        payload: EventPayload,
    ) -> Self {
        Self {
            family,
            seq: None,
            origin,
            logical_time,
            payload,
        }
    }

    pub fn with_seq(mut self, seq: SeqMeta) -> Self {
        self.seq = Some(seq);
        self
    }
}
