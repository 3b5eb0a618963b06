//! Persistence gateway.
//!
//! Rows are soft-versioned: an update expires the current version and
//! inserts a new one, so every key keeps its full history and the current
//! row is the one whose expiry is [`Timestamp::FAR_FUTURE`].

pub mod journal;
pub mod memory;

pub use journal::JournalGateway;
pub use memory::MemoryGateway;

use crate::clock::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tracing::debug;

/// Row families the ledger persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowKind {
    Accumulator,
    SecondaryAccumulator,
    PoolAccumulator,
    Marker,
    Rollup,
    SecondaryRollup,
    PoolRollup,
}

impl RowKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RowKind::Accumulator => "accumulator",
            RowKind::SecondaryAccumulator => "secondary_accumulator",
            RowKind::PoolAccumulator => "pool_accumulator",
            RowKind::Marker => "marker",
            RowKind::Rollup => "rollup",
            RowKind::SecondaryRollup => "secondary_rollup",
            RowKind::PoolRollup => "pool_rollup",
        }
    }
}

impl fmt::Display for RowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who wrote a row version, from which code path and address, and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub by: String,
    pub code: String,
    pub inet: String,
    pub at: Timestamp,
}

impl Provenance {
    pub fn new(
        by: impl Into<String>,
        code: impl Into<String>,
        inet: impl Into<String>,
        at: Timestamp,
    ) -> Self {
        Self {
            by: by.into(),
            code: code.into(),
            inet: inet.into(),
            at,
        }
    }
}

/// One row mutation inside a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RowWrite {
    Insert {
        kind: RowKind,
        key: String,
        row: Value,
        provenance: Provenance,
    },
    Expire {
        kind: RowKind,
        key: String,
        provenance: Provenance,
    },
}

/// One version of a persisted row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRow {
    pub row: Value,
    pub created: Provenance,
    pub expiry: Timestamp,
    pub expired_by: Option<Provenance>,
}

impl StoredRow {
    pub fn is_current(&self) -> bool {
        self.expiry.is_far_future()
    }
}

/// Writes staged for one atomic commit. Dropping or rolling back discards
/// them; nothing is visible until the gateway commits.
#[derive(Debug, Default)]
pub struct Transaction {
    writes: Vec<RowWrite>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kind: RowKind, key: impl Into<String>, row: Value, provenance: &Provenance) {
        self.writes.push(RowWrite::Insert {
            kind,
            key: key.into(),
            row,
            provenance: provenance.clone(),
        });
    }

    pub fn expire(&mut self, kind: RowKind, key: impl Into<String>, provenance: &Provenance) {
        self.writes.push(RowWrite::Expire {
            kind,
            key: key.into(),
            provenance: provenance.clone(),
        });
    }

    /// Expire-then-insert of a row that already has a current version.
    pub fn replace(&mut self, kind: RowKind, key: impl Into<String>, row: Value, provenance: &Provenance) {
        let key = key.into();
        self.expire(kind, key.clone(), provenance);
        self.insert(kind, key, row, provenance);
    }

    pub fn writes(&self) -> &[RowWrite] {
        &self.writes
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn rollback(self) {
        debug!(writes = self.writes.len(), "transaction rolled back");
    }

    fn into_writes(self) -> Vec<RowWrite> {
        self.writes
    }
}

/// Acknowledgement of a durable commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitReceipt {
    pub txn_id: u64,
    pub writes: usize,
}

/// Single transactional funnel to durable storage.
pub trait PersistenceGateway: Send + Sync {
    /// Applies every write atomically or none of them.
    fn commit(&self, txn: Transaction) -> Result<CommitReceipt, PersistError>;

    fn current(&self, kind: RowKind, key: &str) -> Result<Option<StoredRow>, PersistError>;

    /// Every version of `key`, oldest first.
    fn history(&self, kind: RowKind, key: &str) -> Result<Vec<StoredRow>, PersistError>;

    /// Current rows of one kind, ordered by key.
    fn current_rows(&self, kind: RowKind) -> Result<Vec<(String, StoredRow)>, PersistError>;
}

/// Runs `body` inside `outer` when the caller already holds a transaction
/// (the caller then owns commit and rollback), otherwise inside a fresh one
/// that is committed on success and rolled back on error.
pub fn with_transaction<T, E, F>(
    gateway: &dyn PersistenceGateway,
    outer: Option<&mut Transaction>,
    body: F,
) -> Result<T, E>
where
    F: FnOnce(&mut Transaction) -> Result<T, E>,
    E: From<PersistError>,
{
    if let Some(txn) = outer {
        return body(txn);
    }
    let mut txn = Transaction::new();
    match body(&mut txn) {
        Ok(value) => {
            gateway.commit(txn)?;
            Ok(value)
        }
        Err(err) => {
            txn.rollback();
            Err(err)
        }
    }
}

type RowAddress = (RowKind, String);

/// Per-key version history shared by the gateway implementations.
#[derive(Debug, Default)]
pub(crate) struct RowHistory {
    rows: BTreeMap<RowAddress, Vec<StoredRow>>,
}

impl RowHistory {
    /// Validates `writes` against the current history and returns the
    /// touched keys with their new histories, without applying anything.
    pub(crate) fn stage(
        &self,
        writes: &[RowWrite],
    ) -> Result<BTreeMap<RowAddress, Vec<StoredRow>>, PersistError> {
        let mut staged: BTreeMap<RowAddress, Vec<StoredRow>> = BTreeMap::new();
        for write in writes {
            match write {
                RowWrite::Insert {
                    kind,
                    key,
                    row,
                    provenance,
                } => {
                    let versions = self.staged_entry(&mut staged, *kind, key);
                    if versions.last().is_some_and(StoredRow::is_current) {
                        return Err(PersistError::RowExists {
                            kind: *kind,
                            key: key.clone(),
                        });
                    }
                    versions.push(StoredRow {
                        row: row.clone(),
                        created: provenance.clone(),
                        expiry: Timestamp::FAR_FUTURE,
                        expired_by: None,
                    });
                }
                RowWrite::Expire {
                    kind,
                    key,
                    provenance,
                } => {
                    let versions = self.staged_entry(&mut staged, *kind, key);
                    match versions.last_mut() {
                        Some(current) if current.is_current() => {
                            current.expiry = provenance.at;
                            current.expired_by = Some(provenance.clone());
                        }
                        _ => {
                            return Err(PersistError::NoCurrentRow {
                                kind: *kind,
                                key: key.clone(),
                            })
                        }
                    }
                }
            }
        }
        Ok(staged)
    }

    fn staged_entry<'a>(
        &self,
        staged: &'a mut BTreeMap<RowAddress, Vec<StoredRow>>,
        kind: RowKind,
        key: &str,
    ) -> &'a mut Vec<StoredRow> {
        let address = (kind, key.to_string());
        let existing = self.rows.get(&address);
        staged
            .entry(address)
            .or_insert_with(|| existing.cloned().unwrap_or_default())
    }

    pub(crate) fn apply(&mut self, staged: BTreeMap<RowAddress, Vec<StoredRow>>) {
        self.rows.extend(staged);
    }

    pub(crate) fn current(&self, kind: RowKind, key: &str) -> Option<StoredRow> {
        self.rows
            .get(&(kind, key.to_string()))
            .and_then(|versions| versions.last())
            .filter(|row| row.is_current())
            .cloned()
    }

    pub(crate) fn history(&self, kind: RowKind, key: &str) -> Vec<StoredRow> {
        self.rows
            .get(&(kind, key.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn current_rows(&self, kind: RowKind) -> Vec<(String, StoredRow)> {
        self.rows
            .iter()
            .filter(|((row_kind, _), _)| *row_kind == kind)
            .filter_map(|((_, key), versions)| {
                versions
                    .last()
                    .filter(|row| row.is_current())
                    .map(|row| (key.clone(), row.clone()))
            })
            .collect()
    }
}

/// Errors surfaced by persistence gateways.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("{kind} row {key} already has a current version")]
    RowExists { kind: RowKind, key: String },
    #[error("{kind} row {key} has no current version to expire")]
    NoCurrentRow { kind: RowKind, key: String },
    #[error("commit refused: {0}")]
    Refused(String),
    #[error("journal io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("row serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("journal line {line} is corrupt: {reason}")]
    Corrupt { line: usize, reason: String },
}
