use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use poolledger::{
    EventEnvelope, EventPayload, IngestCommand, Ledger, LedgerConfig, LedgerWorkerPool,
    ManualClock, MarkerStatus, MemoryGateway, Origin, RoleSendError, RuntimeConfig, SeqFamily,
    ShareOutcome, ShareRecord, SummariserCommand, Timestamp, WorkTemplate, WorkerRole,
};

fn wait_for<F>(timeout: Duration, mut predicate: F)
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }
    panic!("condition not met within {:?}", timeout);
}

fn runtime() -> RuntimeConfig {
    RuntimeConfig {
        queue_capacity: 64,
        idle_poll_ms: 10,
    }
}

fn live_ledger() -> Arc<Ledger> {
    let ledger = Ledger::new(
        LedgerConfig::default(),
        Arc::new(MemoryGateway::new()),
        Arc::new(ManualClock::new(Timestamp::from_secs(1_000))),
    )
    .unwrap();
    ledger.begin_reload();
    ledger.finish_reload().unwrap();
    Arc::new(ledger)
}

fn workinfo(work_id: u64) -> IngestCommand {
    IngestCommand(EventEnvelope::new(
        SeqFamily::WorkInfo,
        Origin::Socket,
        Timestamp::from_secs(work_id),
        EventPayload::WorkInfo(WorkTemplate {
            work_id,
            pool_instance: String::new(),
            created: Timestamp::from_secs(work_id),
        }),
    ))
}

fn share(work_id: u64, user_id: i64, diff: f64) -> IngestCommand {
    IngestCommand(EventEnvelope::new(
        SeqFamily::Shares,
        Origin::Socket,
        Timestamp::from_secs(work_id + 1),
        EventPayload::Share(ShareRecord {
            work_id,
            user_id,
            worker: "rig".to_string(),
            outcome: ShareOutcome::Accepted,
            diff,
            created: Timestamp::from_secs(work_id + 1),
            address: None,
            agent: None,
        }),
    ))
}

#[test]
fn ingest_and_summariser_roles_drive_the_ledger() {
    let ledger = live_ledger();
    let pool = LedgerWorkerPool::start(ledger.clone(), &runtime()).unwrap();
    let ingest = pool.ingest();
    assert_eq!(ingest.role(), WorkerRole::Ingest);

    ingest.send(workinfo(500)).unwrap();
    ingest.send(share(500, 1, 2.0)).unwrap();
    ingest.send(share(500, 2, 3.0)).unwrap();
    wait_for(Duration::from_secs(2), || {
        pool.metrics().ingest().processed() == 3
    });
    assert_eq!(ledger.aggregator().pool(500).unwrap().total_diff(), 5.0);

    let summariser = pool.summariser();
    summariser.send(SummariserCommand::Age { range_id: 500 }).unwrap();
    summariser
        .send(SummariserCommand::MarkReady {
            marker_id: 1,
            start: 500,
            end: 600,
            description: "block 1".to_string(),
        })
        .unwrap();
    summariser
        .send(SummariserCommand::Compact { marker_id: 1 })
        .unwrap();
    wait_for(Duration::from_secs(2), || {
        pool.metrics().role(WorkerRole::Summariser).processed() == 3
    });
    assert_eq!(pool.metrics().summariser().failed(), 0);
    assert_eq!(ledger.marker(1).unwrap().status, MarkerStatus::Processed);
    assert_eq!(ledger.marker_rollups(1).len(), 2);

    pool.shutdown();
}

#[test]
fn failed_commands_are_counted_and_the_worker_keeps_going() {
    let ledger = live_ledger();
    let pool = LedgerWorkerPool::start(ledger.clone(), &runtime()).unwrap();
    let summariser = pool.summariser();
    summariser
        .send(SummariserCommand::Compact { marker_id: 99 })
        .unwrap();
    summariser.send(SummariserCommand::SweepTransient).unwrap();
    wait_for(Duration::from_secs(2), || {
        pool.metrics().summariser().processed() == 2
    });
    assert_eq!(pool.metrics().summariser().failed(), 1);
    pool.shutdown();
}

#[test]
fn senders_are_refused_after_shutdown() {
    let ledger = live_ledger();
    let pool = LedgerWorkerPool::start(ledger, &runtime()).unwrap();
    let ingest = pool.ingest();
    pool.shutdown();
    pool.shutdown();

    match ingest.send(workinfo(1)) {
        Err(RoleSendError::Closed(command)) => assert_eq!(command, workinfo(1)),
        other => panic!("unexpected send result: {:?}", other.map_err(|err| err.to_string())),
    }
    assert_eq!(ingest.depth(), 0);
}

#[test]
fn workers_exit_when_the_ledger_shuts_down() {
    let ledger = live_ledger();
    let pool = LedgerWorkerPool::start(ledger.clone(), &runtime()).unwrap();
    let summariser = pool.summariser();
    ledger.shutdown();
    wait_for(Duration::from_secs(2), || {
        matches!(
            summariser.send(SummariserCommand::SweepTransient),
            Err(RoleSendError::Closed(_))
        )
    });
}
