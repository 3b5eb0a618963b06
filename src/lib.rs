//! Share accounting core of a mining-pool coordinator: per-family sequence
//! tracking, early-arrival reconciliation, share aggregation and marker
//! compaction over arena-backed record tables.

pub mod app;
pub mod arena;
pub mod clock;
pub mod config;
pub mod event;
pub mod ledger;
pub mod logging;
pub mod marker;
pub mod reload;
pub mod runtime;
pub mod sequence;
pub mod share;
pub mod store;
pub mod tables;
pub mod workinfo;

pub use arena::{Arena, ArenaError, ArenaKey, Table};
pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use config::{
    CapacityConfig, ConfigAuditEntry, ConfigChange, ConfigError, ConfigService, ConfigTelemetry,
    ConfigTrigger, EarlyConfig, LedgerConfig, ProvenanceConfig, RuntimeConfig, SequenceConfig,
    TriggerMatcher, WindowSpec,
};
pub use event::{
    EventEnvelope, EventPayload, SecondaryAttributes, ShareErrorRecord, ShareOutcome, ShareRecord,
    WorkTemplate,
};
pub use ledger::{
    Disposition, DispositionCounts, HandoverReport, Ledger, LedgerError, ReplayReport,
    RestoreReport,
};
pub use logging::{init_logging, LogFormat, LogLevel, SeverityPolicy};
pub use marker::{
    CompactionError, CompactionReport, Compactor, Marker, MarkerStatus, SecondaryRebuild,
};
pub use reload::{ReloadError, ReloadReader};
pub use runtime::{
    IngestCommand, LedgerWorkerPool, RoleMetrics, RoleSendError, RoleSender, ShutdownSignal,
    SummariserCommand, WorkerPoolMetrics, WorkerRole,
};
pub use sequence::{
    FamilyReport, MetaCheck, Origin, SeqCheck, SeqClass, SeqCounters, SeqFamily, SeqMeta,
    SeqSetReport, SequenceError, SequenceReport, SequenceTracker, SequenceWindow, SlotArrival,
    WindowClass, MAX_SEQ_SETS, SEQ_START_IGNORE,
};
pub use share::{
    secondary_keys, AgeReport, AggregateError, Aggregator, Completeness, DrainOutcome,
    EarlyCounters, EarlyItem, EarlyQueue, EarlyState, FoldNote, IngestMode, OutcomeTotals,
    ShareAccumulator, ShareUpdate, UpdateKind, UpdateOutcome,
};
pub use store::{
    with_transaction, CommitReceipt, JournalGateway, MemoryGateway, PersistError,
    PersistenceGateway, Provenance, RowKind, RowWrite, StoredRow, Transaction,
};
pub use tables::{LedgerTables, PrimaryKey, Rollup, SecondaryAccKey, SecondaryKey, Subject};
pub use workinfo::WorkTemplates;
