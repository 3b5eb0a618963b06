use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

use crate::clock::SystemClock;
use crate::config::LedgerConfig;
use crate::ledger::Ledger;
use crate::logging::{init_logging, LogFormat};
use crate::reload::ReloadReader;
use crate::runtime::{IngestCommand, LedgerWorkerPool, RoleSendError};
use crate::sequence::Origin;
use crate::store::{JournalGateway, MemoryGateway, PersistenceGateway};

const USAGE: &str = "usage: poolledger [--config FILE] [--journal FILE] [--reload FILE]... \
[--live FILE] [--log-format pretty|json]";

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    journal: Option<PathBuf>,
    reload: Vec<PathBuf>,
    live: Option<PathBuf>,
    log_format: Option<LogFormat>,
}

fn parse_args(mut raw: impl Iterator<Item = String>) -> Result<Args> {
    let mut args = Args::default();
    while let Some(flag) = raw.next() {
        let mut value = |name: &str| {
            raw.next()
                .with_context(|| format!("{name} needs a value\n{USAGE}"))
        };
        match flag.as_str() {
            "--config" => args.config = Some(PathBuf::from(value("--config")?)),
            "--journal" => args.journal = Some(PathBuf::from(value("--journal")?)),
            "--reload" => args.reload.push(PathBuf::from(value("--reload")?)),
            "--live" => args.live = Some(PathBuf::from(value("--live")?)),
            "--log-format" => {
                let raw_format = value("--log-format")?;
                let format = LogFormat::parse(&raw_format)
                    .with_context(|| format!("unknown log format {raw_format}"))?;
                args.log_format = Some(format);
            }
            "-h" | "--help" => bail!("{USAGE}"),
            other => bail!("unexpected argument {other}\n{USAGE}"),
        }
    }
    Ok(args)
}

/// Application entrypoint: load configuration, restore the ledger, replay
/// reload files, go live and feed the live file through the worker pool.
pub fn run() -> Result<()> {
    let args = parse_args(std::env::args().skip(1))?;
    init_logging(args.log_format.unwrap_or(LogFormat::Pretty));

    let config = match &args.config {
        Some(path) => LedgerConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => LedgerConfig::default(),
    };
    let runtime = config.runtime.clone();
    let gateway: Arc<dyn PersistenceGateway> = match &args.journal {
        Some(path) => Arc::new(
            JournalGateway::open(path)
                .with_context(|| format!("opening journal {}", path.display()))?,
        ),
        None => {
            warn!("no journal configured, rows are kept in memory only");
            Arc::new(MemoryGateway::new())
        }
    };
    let ledger = Arc::new(
        Ledger::new(config, gateway, Arc::new(SystemClock)).context("building ledger")?,
    );

    ledger.begin_reload();
    for path in &args.reload {
        let reader = ReloadReader::open(path)
            .with_context(|| format!("opening reload file {}", path.display()))?;
        let report = ledger
            .replay(reader)
            .with_context(|| format!("replaying {}", path.display()))?;
        info!(
            file = %path.display(),
            events = report.counts.total(),
            bad_lines = report.bad_lines,
            "reload file done"
        );
    }
    let handover = ledger.finish_reload().context("reload handover")?;

    if let Some(path) = &args.live {
        let pool = LedgerWorkerPool::start(ledger.clone(), &runtime)
            .context("starting worker pool")?;
        let sender = pool.ingest();
        let reader = ReloadReader::open(path)
            .with_context(|| format!("opening live file {}", path.display()))?;
        for event in reader {
            let mut envelope = match event {
                Ok(envelope) => envelope,
                Err(err) if err.is_fatal() => {
                    return Err(err).with_context(|| format!("reading {}", path.display()))
                }
                Err(err) => {
                    warn!(line = err.line(), error = %err, "skipping live line");
                    continue;
                }
            };
            envelope.origin = Origin::Socket;
            let mut command = IngestCommand(envelope);
            loop {
                match sender.send(command) {
                    Ok(()) => break,
                    Err(RoleSendError::Full(returned)) => {
                        command = returned;
                        thread::sleep(Duration::from_millis(runtime.idle_poll_ms.max(1)));
                    }
                    Err(RoleSendError::Closed(_)) => bail!("ingest worker stopped"),
                }
            }
        }
        pool.shutdown();
        if ledger.is_shutting_down() {
            bail!("ledger shut down during live processing");
        }
    }

    let summary = serde_json::json!({
        "handover": handover,
        "stats": ledger.stats(),
        "sequence": ledger.sequence_report(),
    });
    println!(
        "{}",
        serde_json::to_string_pretty(&summary).context("rendering summary")?
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Result<Args> {
        parse_args(raw.iter().map(|s| s.to_string()))
    }

    #[test]
    fn parses_repeated_reload_files() {
        let parsed = args(&["--reload", "a.jsonl", "--reload", "b.jsonl", "--log-format", "json"])
            .expect("args");
        assert_eq!(parsed.reload.len(), 2);
        assert_eq!(parsed.log_format, Some(LogFormat::Json));
    }

    #[test]
    fn rejects_unknown_flags_and_missing_values() {
        assert!(args(&["--bogus"]).is_err());
        assert!(args(&["--journal"]).is_err());
        assert!(args(&["--log-format", "xml"]).is_err());
    }
}
