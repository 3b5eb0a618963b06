use crate::clock::Timestamp;
use crate::sequence::{SequenceError, WindowClass};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Size and transient limit of one family window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSpec {
    pub size: u64,
    pub transient_limit_s: u64,
}

/// Window classes plus the high-jump heuristic shared by every family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceConfig {
    pub large: WindowSpec,
    pub medium: WindowSpec,
    pub small: WindowSpec,
    /// Floor of the high-jump limit.
    pub high_min: u64,
    /// Window size is shifted right by this much to scale the high-jump limit.
    pub high_shift: u32,
}

impl SequenceConfig {
    /// Smallest legal window; the high-jump limit must stay below it.
    pub fn min_size(&self) -> u64 {
        self.high_min
            .checked_shl(self.high_shift)
            .unwrap_or(u64::MAX)
    }

    /// Largest forward jump accepted before an arrival is classed high.
    pub fn high_limit(&self, size: u64) -> u64 {
        self.high_min.max(size >> self.high_shift)
    }

    pub fn spec_for(&self, class: WindowClass) -> &WindowSpec {
        match class {
            WindowClass::Large => &self.large,
            WindowClass::Medium => &self.medium,
            WindowClass::Small => &self.small,
        }
    }
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            large: WindowSpec {
                size: 65_536 * 16,
                transient_limit_s: 16,
            },
            medium: WindowSpec {
                size: 65_536,
                transient_limit_s: 32,
            },
            small: WindowSpec {
                size: 16_384,
                transient_limit_s: 64,
            },
            high_min: 32,
            high_shift: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EarlyConfig {
    /// Age after which a parked share is flagged, then discarded.
    pub age_limit_s: u64,
}

impl Default for EarlyConfig {
    fn default() -> Self {
        Self { age_limit_s: 60 }
    }
}

/// Arena capacities per record kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapacityConfig {
    pub accumulators: usize,
    pub secondary_accumulators: usize,
    pub pool_accumulators: usize,
    pub markers: usize,
    pub rollups: usize,
    pub secondary_rollups: usize,
    pub pool_rollups: usize,
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            accumulators: 1 << 20,
            secondary_accumulators: 1 << 20,
            pool_accumulators: 1 << 16,
            markers: 1 << 14,
            rollups: 1 << 20,
            secondary_rollups: 1 << 20,
            pool_rollups: 1 << 14,
        }
    }
}

/// Worker pool settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub queue_capacity: usize,
    pub idle_poll_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 4096,
            idle_poll_ms: 100,
        }
    }
}

/// Provenance stamped on every row this process writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvenanceConfig {
    pub actor: String,
    pub inet: String,
}

impl Default for ProvenanceConfig {
    fn default() -> Self {
        Self {
            actor: "poolledger".to_string(),
            inet: "127.0.0.1".to_string(),
        }
    }
}

/// Every tunable of the ledger. Immutable once loaded; runtime changes go
/// through [`ConfigService::set`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub sequence: SequenceConfig,
    pub early: EarlyConfig,
    /// Share attributes that get their own accumulators alongside the worker.
    pub secondary_dimensions: Vec<String>,
    pub capacity: CapacityConfig,
    pub runtime: RuntimeConfig,
    pub provenance: ProvenanceConfig,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            sequence: SequenceConfig::default(),
            early: EarlyConfig::default(),
            secondary_dimensions: vec!["address".to_string(), "agent".to_string()],
            capacity: CapacityConfig::default(),
            runtime: RuntimeConfig::default(),
            provenance: ProvenanceConfig::default(),
        }
    }
}

impl LedgerConfig {
    /// Reads a JSON config file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            info!(path = %path.display(), "config file absent, using defaults");
            let config = Self::default();
            config.validate()?;
            return Ok(config);
        }
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let sequence = &self.sequence;
        if sequence.high_shift >= 64 {
            return Err(ConfigError::Invalid(format!(
                "high_shift {} out of range",
                sequence.high_shift
            )));
        }
        for spec in [&sequence.large, &sequence.medium, &sequence.small] {
            crate::sequence::window::validate_size(spec.size, sequence.min_size())?;
        }
        if self.runtime.queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue_capacity must be positive".into()));
        }
        if self.secondary_dimensions.iter().any(|dim| dim.is_empty()) {
            return Err(ConfigError::Invalid(
                "secondary dimension names must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Selects which config keys a trigger reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerMatcher {
    Exact(String),
    Prefix(String),
}

impl TriggerMatcher {
    pub fn matches(&self, key: &str) -> bool {
        match self {
            TriggerMatcher::Exact(name) => name == key,
            TriggerMatcher::Prefix(prefix) => key.starts_with(prefix.as_str()),
        }
    }
}

type TriggerHandler = Arc<dyn Fn(&LedgerConfig) + Send + Sync>;

/// Recomputation hook run after a matching key changes.
#[derive(Clone)]
pub struct ConfigTrigger {
    name: String,
    matcher: TriggerMatcher,
    handler: TriggerHandler,
}

impl ConfigTrigger {
    pub fn new<F>(name: impl Into<String>, matcher: TriggerMatcher, handler: F) -> Self
    where
        F: Fn(&LedgerConfig) + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            matcher,
            handler: Arc::new(handler),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for ConfigTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigTrigger")
            .field("name", &self.name)
            .field("matcher", &self.matcher)
            .finish()
    }
}

/// One audited configuration change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigAuditEntry {
    pub version: u64,
    pub key: String,
    pub value: Value,
    pub actor: String,
    pub at: Timestamp,
}

/// Result of a set or rollback.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigChange {
    pub version: u64,
    pub changed_keys: Vec<String>,
    pub triggers_fired: Vec<String>,
}

/// Counters describing config churn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigTelemetry {
    pub version: u64,
    pub changes_total: u64,
    pub validation_failures_total: u64,
}

/// Versioned holder of the active [`LedgerConfig`]. All changes pass
/// through `set` or `rollback`, which audit them and fire triggers.
#[derive(Debug)]
pub struct ConfigService {
    current_version: u64,
    current: LedgerConfig,
    snapshots: BTreeMap<u64, LedgerConfig>,
    audit: Vec<ConfigAuditEntry>,
    triggers: Vec<ConfigTrigger>,
    pinned: Vec<String>,
    telemetry: ConfigTelemetry,
}

impl ConfigService {
    pub fn new(initial: LedgerConfig) -> Result<Self, ConfigError> {
        initial.validate()?;
        let mut snapshots = BTreeMap::new();
        snapshots.insert(1, initial.clone());
        Ok(Self {
            current_version: 1,
            current: initial,
            snapshots,
            audit: Vec::new(),
            triggers: Vec::new(),
            pinned: Vec::new(),
            telemetry: ConfigTelemetry {
                version: 1,
                ..ConfigTelemetry::default()
            },
        })
    }

    /// Appends a trigger; earlier registrations win on overlapping matchers.
    pub fn register_trigger(&mut self, trigger: ConfigTrigger) {
        self.triggers.push(trigger);
    }

    /// Refuses changes to `prefix` (e.g. `capacity.`) after startup.
    pub fn pin(&mut self, prefix: impl Into<String>) {
        self.pinned.push(prefix.into());
    }

    fn pinned_key<'a>(&self, keys: impl IntoIterator<Item = &'a str>) -> Option<String> {
        keys.into_iter()
            .find(|key| {
                self.pinned.iter().any(|prefix| {
                    key.starts_with(prefix.as_str())
                        || prefix.strip_suffix('.') == Some(*key)
                })
            })
            .map(str::to_string)
    }

    pub fn version(&self) -> u64 {
        self.current_version
    }

    pub fn current(&self) -> &LedgerConfig {
        &self.current
    }

    pub fn audit_log(&self) -> &[ConfigAuditEntry] {
        &self.audit
    }

    pub fn telemetry(&self) -> &ConfigTelemetry {
        &self.telemetry
    }

    /// Sets the dotted `key` (e.g. `early.age_limit_s`) to `value`.
    pub fn set(
        &mut self,
        key: &str,
        value: Value,
        actor: &str,
        at: Timestamp,
    ) -> Result<ConfigChange, ConfigError> {
        if let Some(key) = self.pinned_key([key]) {
            self.telemetry.validation_failures_total += 1;
            return Err(ConfigError::Pinned(key));
        }
        let mut document = serde_json::to_value(&self.current).map_err(ConfigError::Parse)?;
        if let Err(err) = assign_path(&mut document, key, value.clone()) {
            self.telemetry.validation_failures_total += 1;
            return Err(err);
        }
        let next = match self.decode(document) {
            Ok(next) => next,
            Err(err) => {
                self.telemetry.validation_failures_total += 1;
                return Err(err);
            }
        };
        if next == self.current {
            return Ok(ConfigChange {
                version: self.current_version,
                changed_keys: Vec::new(),
                triggers_fired: Vec::new(),
            });
        }
        self.audit.push(ConfigAuditEntry {
            version: self.current_version + 1,
            key: key.to_string(),
            value,
            actor: actor.to_string(),
            at,
        });
        Ok(self.commit(next, vec![key.to_string()]))
    }

    /// Restores an earlier version as a new version.
    pub fn rollback(
        &mut self,
        to_version: u64,
        actor: &str,
        at: Timestamp,
    ) -> Result<ConfigChange, ConfigError> {
        if to_version == self.current_version {
            self.telemetry.validation_failures_total += 1;
            return Err(ConfigError::UnknownVersion(to_version));
        }
        let Some(snapshot) = self.snapshots.get(&to_version).cloned() else {
            self.telemetry.validation_failures_total += 1;
            return Err(ConfigError::UnknownVersion(to_version));
        };
        let before = serde_json::to_value(&self.current).map_err(ConfigError::Parse)?;
        let after = serde_json::to_value(&snapshot).map_err(ConfigError::Parse)?;
        let changed = diff_paths(&before, &after);
        if let Some(key) = self.pinned_key(changed.iter().map(String::as_str)) {
            self.telemetry.validation_failures_total += 1;
            return Err(ConfigError::Pinned(key));
        }
        self.audit.push(ConfigAuditEntry {
            version: self.current_version + 1,
            key: format!("rollback:{to_version}"),
            value: Value::from(to_version),
            actor: actor.to_string(),
            at,
        });
        Ok(self.commit(snapshot, changed))
    }

    fn decode(&self, document: Value) -> Result<LedgerConfig, ConfigError> {
        let next: LedgerConfig = serde_json::from_value(document)
            .map_err(|err| ConfigError::InvalidPatch(err.to_string()))?;
        next.validate()?;
        Ok(next)
    }

    fn commit(&mut self, next: LedgerConfig, mut changed_keys: Vec<String>) -> ConfigChange {
        self.current_version += 1;
        self.current = next.clone();
        self.snapshots.insert(self.current_version, next);
        self.telemetry.version = self.current_version;
        self.telemetry.changes_total += 1;
        changed_keys.sort();

        let mut triggers_fired: Vec<String> = Vec::new();
        for key in &changed_keys {
            let Some(trigger) = self.triggers.iter().find(|t| t.matcher.matches(key)) else {
                continue;
            };
            if triggers_fired.iter().any(|name| name == &trigger.name) {
                continue;
            }
            (trigger.handler)(&self.current);
            triggers_fired.push(trigger.name.clone());
        }
        info!(
            version = self.current_version,
            keys = ?changed_keys,
            triggers = ?triggers_fired,
            "config updated"
        );
        ConfigChange {
            version: self.current_version,
            changed_keys,
            triggers_fired,
        }
    }
}

fn assign_path(document: &mut Value, key: &str, value: Value) -> Result<(), ConfigError> {
    let mut cursor = document;
    let mut parts = key.split('.').peekable();
    while let Some(part) = parts.next() {
        let map: &mut Map<String, Value> = cursor
            .as_object_mut()
            .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
        let entry = map
            .get_mut(part)
            .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
        if parts.peek().is_none() {
            *entry = value;
            return Ok(());
        }
        cursor = entry;
    }
    Err(ConfigError::UnknownKey(key.to_string()))
}

fn diff_paths(before: &Value, after: &Value) -> Vec<String> {
    let mut changed = Vec::new();
    collect_diff(before, after, String::new(), &mut changed);
    changed
}

fn collect_diff(before: &Value, after: &Value, prefix: String, changed: &mut Vec<String>) {
    match (before, after) {
        (Value::Object(left), Value::Object(right)) => {
            let mut keys: Vec<&String> = left.keys().chain(right.keys()).collect();
            keys.sort();
            keys.dedup();
            for key in keys {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                let null = Value::Null;
                collect_diff(
                    left.get(key).unwrap_or(&null),
                    right.get(key).unwrap_or(&null),
                    path,
                    changed,
                );
            }
        }
        _ if before != after => changed.push(prefix),
        _ => {}
    }
}

/// Errors surfaced while loading or changing configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[source] serde_json::Error),
    #[error("invalid config patch: {0}")]
    InvalidPatch(String),
    #[error("unknown config key {0}")]
    UnknownKey(String),
    #[error("unknown config version {0}")]
    UnknownVersion(u64),
    #[error("config key {0} is fixed at startup")]
    Pinned(String),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error(transparent)]
    Sequence(#[from] SequenceError),
}
