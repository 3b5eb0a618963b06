use super::{CommitReceipt, PersistError, PersistenceGateway, RowHistory, RowKind, StoredRow, Transaction};
use parking_lot::Mutex;

#[derive(Debug, Default)]
struct MemoryState {
    history: RowHistory,
    commits: u64,
    refuse_next: u32,
}

/// In-process gateway keeping every row version in memory. Commits can be
/// made to fail on demand.
#[derive(Debug, Default)]
pub struct MemoryGateway {
    state: Mutex<MemoryState>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuses the next `count` commits without applying them.
    pub fn refuse_next_commits(&self, count: u32) {
        self.state.lock().refuse_next = count;
    }

    /// Commits applied so far.
    pub fn commit_count(&self) -> u64 {
        self.state.lock().commits
    }

    /// Number of current rows of `kind`.
    pub fn row_count(&self, kind: RowKind) -> usize {
        self.state.lock().history.current_rows(kind).len()
    }
}

impl PersistenceGateway for MemoryGateway {
    fn commit(&self, txn: Transaction) -> Result<CommitReceipt, PersistError> {
        let mut state = self.state.lock();
        if state.refuse_next > 0 {
            state.refuse_next -= 1;
            return Err(PersistError::Refused("injected commit failure".into()));
        }
        let writes = txn.into_writes();
        let staged = state.history.stage(&writes)?;
        state.history.apply(staged);
        state.commits += 1;
        Ok(CommitReceipt {
            txn_id: state.commits,
            writes: writes.len(),
        })
    }

    fn current(&self, kind: RowKind, key: &str) -> Result<Option<StoredRow>, PersistError> {
        Ok(self.state.lock().history.current(kind, key))
    }

    fn history(&self, kind: RowKind, key: &str) -> Result<Vec<StoredRow>, PersistError> {
        Ok(self.state.lock().history.history(kind, key))
    }

    fn current_rows(&self, kind: RowKind) -> Result<Vec<(String, StoredRow)>, PersistError> {
        Ok(self.state.lock().history.current_rows(kind))
    }
}
