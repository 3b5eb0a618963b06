use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Once;
use tracing::{debug, warn};
use tracing_subscriber::{fmt as subscriber_fmt, prelude::*, EnvFilter};

static INIT: Once = Once::new();

/// Output format for the process-wide subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl LogFormat {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pretty" => Some(LogFormat::Pretty),
            "json" => Some(LogFormat::Json),
            _ => None,
        }
    }
}

/// Installs the tracing subscriber. `RUST_LOG` overrides the `info` default;
/// repeated calls are no-ops.
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(subscriber_fmt::layer().json())
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(subscriber_fmt::layer())
                    .init();
            }
        }
    });
}

/// Severity at which a non-fatal anomaly is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Warn,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Warn => "WARN",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Picks anomaly severity from the ledger phase: quiet while startup and
/// reload churn is expected, loud once the live feed is in steady state.
#[derive(Debug, Default)]
pub struct SeverityPolicy {
    steady: AtomicBool,
}

impl SeverityPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_steady(&self) {
        self.steady.store(true, Ordering::Release);
    }

    pub fn is_steady(&self) -> bool {
        self.steady.load(Ordering::Acquire)
    }

    pub fn anomaly_level(&self) -> LogLevel {
        if self.is_steady() {
            LogLevel::Warn
        } else {
            LogLevel::Debug
        }
    }

    /// Emits an anomaly line tagged with `kind` at the current severity.
    pub fn anomaly(&self, kind: &'static str, detail: fmt::Arguments<'_>) {
        match self.anomaly_level() {
            LogLevel::Warn => warn!(anomaly = kind, "{}", detail),
            LogLevel::Debug => debug!(anomaly = kind, "{}", detail),
        }
    }
}
