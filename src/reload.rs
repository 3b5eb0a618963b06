//! Reload files: one JSON event envelope per line.

use crate::event::EventEnvelope;
use crate::sequence::Origin;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use thiserror::Error;

/// Iterates the envelopes of a reload file, stamping each with
/// [`Origin::Reload`]. Blank lines and lines starting with `#` are skipped.
pub struct ReloadReader<R> {
    lines: std::io::Lines<R>,
    line: usize,
}

impl ReloadReader<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ReloadError> {
        let file = File::open(path.as_ref()).map_err(|source| ReloadError::Io { line: 0, source })?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead> ReloadReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line: 0,
        }
    }

    /// Lines consumed so far, comments included.
    pub fn line(&self) -> usize {
        self.line
    }
}

impl<R: BufRead> Iterator for ReloadReader<R> {
    type Item = Result<EventEnvelope, ReloadError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let raw = match self.lines.next()? {
                Ok(raw) => raw,
                Err(source) => {
                    return Some(Err(ReloadError::Io {
                        line: self.line + 1,
                        source,
                    }))
                }
            };
            self.line += 1;
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let parsed = serde_json::from_str::<EventEnvelope>(trimmed)
                .map(|mut envelope| {
                    envelope.origin = Origin::Reload;
                    envelope
                })
                .map_err(|source| ReloadError::Decode {
                    line: self.line,
                    source,
                });
            return Some(parsed);
        }
    }
}

#[derive(Debug, Error)]
pub enum ReloadError {
    #[error("reload read failed at line {line}: {source}")]
    Io {
        line: usize,
        #[source]
        source: std::io::Error,
    },
    #[error("reload line {line} is not a valid event: {source}")]
    Decode {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

impl ReloadError {
    /// A bad line is skipped; a failed read ends the pass.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ReloadError::Io { .. })
    }

    pub fn line(&self) -> usize {
        match self {
            ReloadError::Io { line, .. } | ReloadError::Decode { line, .. } => *line,
        }
    }
}
