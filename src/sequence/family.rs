use serde::{Deserialize, Serialize};
use std::fmt;

/// `seqstt` value that disables sequence checking for hand-injected messages.
pub const SEQ_START_IGNORE: u64 = 42;
/// Sequence sets retained for reporting before the oldest is dropped.
pub const MAX_SEQ_SETS: usize = 16;

/// Independently sequenced event streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeqFamily {
    All,
    Block,
    Shares,
    WorkInfo,
    AgeWorkInfo,
    Auth,
    AddrAuth,
    Heartbeat,
    ShareErrors,
    WorkerStats,
    PoolStats,
}

impl SeqFamily {
    pub const COUNT: usize = 11;

    pub fn all() -> [SeqFamily; SeqFamily::COUNT] {
        [
            SeqFamily::All,
            SeqFamily::Block,
            SeqFamily::Shares,
            SeqFamily::WorkInfo,
            SeqFamily::AgeWorkInfo,
            SeqFamily::Auth,
            SeqFamily::AddrAuth,
            SeqFamily::Heartbeat,
            SeqFamily::ShareErrors,
            SeqFamily::WorkerStats,
            SeqFamily::PoolStats,
        ]
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            SeqFamily::All => "all",
            SeqFamily::Block => "block",
            SeqFamily::Shares => "shares",
            SeqFamily::WorkInfo => "workinfo",
            SeqFamily::AgeWorkInfo => "ageworkinfo",
            SeqFamily::Auth => "auth",
            SeqFamily::AddrAuth => "addrauth",
            SeqFamily::Heartbeat => "heartbeat",
            SeqFamily::ShareErrors => "shareerrors",
            SeqFamily::WorkerStats => "workerstats",
            SeqFamily::PoolStats => "poolstats",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        SeqFamily::all()
            .into_iter()
            .find(|family| family.name() == name)
    }

    /// Window size class used when the family's window is first created.
    pub fn window_class(self) -> WindowClass {
        match self {
            SeqFamily::All | SeqFamily::Shares => WindowClass::Large,
            SeqFamily::WorkerStats | SeqFamily::Auth | SeqFamily::AddrAuth => WindowClass::Medium,
            _ => WindowClass::Small,
        }
    }
}

impl fmt::Display for SeqFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Size classes for family windows; the busiest streams get the widest window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowClass {
    Large,
    Medium,
    Small,
}

/// Where an event entered the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Live socket event that arrived while the reload pass was still running.
    EarlySocket,
    /// Replayed from a reload file.
    Reload,
    /// Live socket event.
    Socket,
}

impl Origin {
    /// Three-bit code stored in window slots.
    pub fn code(self) -> u8 {
        match self {
            Origin::EarlySocket => 0b001,
            Origin::Reload => 0b010,
            Origin::Socket => 0b100,
        }
    }

    pub fn tag(self) -> char {
        match self {
            Origin::EarlySocket => 'E',
            Origin::Reload => 'R',
            Origin::Socket => 'S',
        }
    }

    pub fn is_live(self) -> bool {
        !matches!(self, Origin::Reload)
    }
}

/// Sequence block supplied by the decoder with every sequenced message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeqMeta {
    /// Counter shared by every family of one producer run.
    pub seqall: u64,
    /// Counter of the message's own family.
    pub seqcmd: u64,
    /// Producer start counter.
    pub seqstt: u64,
    /// Producer process instance id.
    pub seqpid: u64,
}

impl SeqMeta {
    pub fn is_ignored(&self) -> bool {
        self.seqstt == SEQ_START_IGNORE
    }
}
