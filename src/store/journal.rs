use super::{
    CommitReceipt, PersistError, PersistenceGateway, RowHistory, RowKind, RowWrite, StoredRow,
    Transaction,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// One committed transaction. On disk each line is the sha256 of the JSON
/// body, a tab, then the body itself.
#[derive(Debug, Serialize, Deserialize)]
struct JournalLine {
    txn: u64,
    writes: Vec<RowWrite>,
}

struct JournalState {
    file: File,
    history: RowHistory,
    last_txn: u64,
}

/// Gateway backed by an append-only file of checksummed transactions. The
/// current-row view is rebuilt from the journal on open.
pub struct JournalGateway {
    path: PathBuf,
    state: Mutex<JournalState>,
}

impl JournalGateway {
    /// Opens (or creates) the journal at `path`, verifying every line. A
    /// final line cut short by a crash is truncated away; damage anywhere
    /// else is reported as corruption.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let path = path.as_ref().to_path_buf();
        let mut history = RowHistory::default();
        let mut last_txn = 0;
        let mut torn_at = None;
        let mut unterminated = false;
        if path.exists() {
            let bytes = fs::read(&path)?;
            let mut offset = 0;
            let mut line_no = 0;
            while offset < bytes.len() {
                line_no += 1;
                let rest = &bytes[offset..];
                let (raw, next, terminated) = match rest.iter().position(|b| *b == b'\n') {
                    Some(pos) => (&rest[..pos], offset + pos + 1, true),
                    None => (rest, bytes.len(), false),
                };
                match replay_line(raw, &mut history) {
                    Ok(Some(txn)) => last_txn = txn,
                    Ok(None) => {}
                    Err(reason) if !terminated => {
                        warn!(
                            path = %path.display(),
                            line = line_no,
                            reason = %reason,
                            "truncating torn journal tail"
                        );
                        torn_at = Some(offset as u64);
                        break;
                    }
                    Err(reason) => {
                        return Err(PersistError::Corrupt {
                            line: line_no,
                            reason,
                        })
                    }
                }
                unterminated = !terminated;
                offset = next;
            }
            info!(path = %path.display(), last_txn, "journal replayed");
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        if let Some(len) = torn_at {
            file.set_len(len)?;
            file.sync_data()?;
        } else if unterminated {
            file.write_all(b"\n")?;
            file.sync_data()?;
        }
        Ok(Self {
            path,
            state: Mutex::new(JournalState {
                file,
                history,
                last_txn,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn last_txn(&self) -> u64 {
        self.state.lock().last_txn
    }
}

impl PersistenceGateway for JournalGateway {
    fn commit(&self, txn: Transaction) -> Result<CommitReceipt, PersistError> {
        let mut state = self.state.lock();
        let writes = txn.into_writes();
        let staged = state.history.stage(&writes)?;
        let txn_id = state.last_txn + 1;
        let entry = JournalLine {
            txn: txn_id,
            writes,
        };
        let body = serde_json::to_string(&entry)?;
        let line = format!("{}\t{}\n", checksum(&body), body);
        let len = state.file.metadata()?.len();
        if let Err(err) = append_line(&mut state.file, line.as_bytes()) {
            if let Err(trunc) = state.file.set_len(len) {
                error!(path = %self.path.display(), error = %trunc, "journal tail left torn");
            }
            return Err(err.into());
        }
        state.history.apply(staged);
        state.last_txn = txn_id;
        Ok(CommitReceipt {
            txn_id,
            writes: entry.writes.len(),
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

/// Verifies and applies one journal line. Blank lines yield `None`.
fn replay_line(raw: &[u8], history: &mut RowHistory) -> Result<Option<u64>, String> {
    let line = std::str::from_utf8(raw).map_err(|_| "not valid utf-8".to_string())?;
    if line.trim().is_empty() {
        return Ok(None);
    }
    let Some((digest, body)) = line.split_once('\t') else {
        return Err("missing checksum".into());
    };
    if checksum(body) != digest {
        return Err("checksum mismatch".into());
    }
    let entry: JournalLine = serde_json::from_str(body).map_err(|err| err.to_string())?;
    let staged = history.stage(&entry.writes).map_err(|err| err.to_string())?;
    history.apply(staged);
    Ok(Some(entry.txn))
}

fn append_line(file: &mut File, line: &[u8]) -> std::io::Result<()> {
    file.write_all(line)?;
    file.sync_data()
}

fn checksum(body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    to_hex(&hasher.finalize())
}

fn to_hex(bytes: &[u8]) -> String {
    let mut encoded = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        encoded.push_str(&format!("{:02x}", byte));
    }
    encoded
}
