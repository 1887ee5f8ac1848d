//! Background task that owns the [`SyncEngine`]
//!
//! Every trigger (periodic tick, reachability coming back, explicit `tick` or
//! `sync_one` requests, and send completions) is handled inside one task, so
//! the in-flight set needs no locking. Sends run in a `JoinSet` and their
//! results are joined back into that same task.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::reachability::Reachability;
use crate::remote::{BlockSender, SendError};

use super::engine::{Dispatch, SyncEngine, TickReport};

const COMMAND_BUFFER: usize = 64;

type SendOutcome = (Uuid, std::result::Result<(), SendError>);

enum Command {
    Tick(oneshot::Sender<TickReport>),
    SyncOne(Uuid, oneshot::Sender<bool>),
}

/// Cloneable entry point for capture flows and hosts.
#[derive(Clone)]
pub struct SyncHandle {
    commands: mpsc::Sender<Command>,
}

impl SyncHandle {
    /// Run a tick now and report what it did.
    pub async fn tick(&self) -> Result<TickReport> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Tick(reply))
            .await
            .map_err(|_| Error::Stopped)?;
        rx.await.map_err(|_| Error::Stopped)
    }

    /// Try to send a just-captured record immediately.
    ///
    /// Returns true if a send was started. A false return is not an error:
    /// the record stays queued for a later tick.
    pub async fn sync_one(&self, id: Uuid) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::SyncOne(id, reply))
            .await
            .map_err(|_| Error::Stopped)?;
        rx.await.map_err(|_| Error::Stopped)
    }

    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }
}

/// Running sync task with explicit shutdown.
pub struct SyncOrchestrator {
    handle: SyncHandle,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SyncOrchestrator {
    /// Start the sync task on the current tokio runtime.
    ///
    /// The first periodic tick fires one `tick_interval` after start; call
    /// [`SyncHandle::tick`] to recover abandoned sends right away.
    pub fn spawn(
        engine: SyncEngine,
        sender: Arc<dyn BlockSender>,
        reachability: Reachability,
    ) -> Self {
        let (commands, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let cancel = CancellationToken::new();
        let tick_interval = engine.settings().tick_interval;

        let actor = Actor {
            engine,
            sender,
            online: reachability.subscribe(),
            reachability,
            commands: command_rx,
            sends: JoinSet::new(),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(actor.run(tick_interval));

        info!(
            tick_interval_secs = tick_interval.as_secs_f64(),
            "Sync orchestrator started"
        );

        Self {
            handle: SyncHandle { commands },
            cancel,
            task,
        }
    }

    pub fn handle(&self) -> SyncHandle {
        self.handle.clone()
    }

    /// Stop ticking and wait for the task to exit.
    ///
    /// Outstanding sends are detached: they are neither awaited nor aborted,
    /// and their records recover through the in-progress grace period.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "Sync task ended abnormally");
        }
    }
}

struct Actor {
    engine: SyncEngine,
    sender: Arc<dyn BlockSender>,
    reachability: Reachability,
    online: watch::Receiver<bool>,
    commands: mpsc::Receiver<Command>,
    sends: JoinSet<SendOutcome>,
    cancel: CancellationToken,
}

impl Actor {
    async fn run(mut self, tick_interval: Duration) {
        let mut ticker = time::interval_at(Instant::now() + tick_interval, tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut watching = true;

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    debug!("Sync task cancelled");
                    break;
                }

                Some(joined) = self.sends.join_next(), if !self.sends.is_empty() => {
                    self.on_send_finished(joined);
                    // Chained kick so the next candidate does not wait for the timer
                    self.run_tick();
                }

                command = self.commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => {
                        debug!("All sync handles dropped");
                        break;
                    }
                },

                changed = self.online.changed(), if watching => match changed {
                    Ok(()) => {
                        let online = *self.online.borrow_and_update();
                        if online {
                            debug!("Connectivity restored, ticking");
                            self.run_tick();
                        }
                    }
                    Err(_) => watching = false,
                },

                _ = ticker.tick() => {
                    self.run_tick();
                }
            }
        }

        let detached = self.sends.len();
        self.sends.detach_all();
        info!(detached, "Sync orchestrator stopped");
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Tick(reply) => {
                let report = self.run_tick();
                let _ = reply.send(report);
            }
            Command::SyncOne(id, reply) => {
                let online = self.reachability.is_reachable();
                let started = match self.engine.sync_one(&id, online, Utc::now()) {
                    Some(dispatch) => {
                        self.start_send(dispatch);
                        true
                    }
                    None => false,
                };
                let _ = reply.send(started);
            }
        }
    }

    fn run_tick(&mut self) -> TickReport {
        let online = self.reachability.is_reachable();
        let (report, dispatches) = self.engine.tick(online, Utc::now());
        for dispatch in dispatches {
            self.start_send(dispatch);
        }
        report
    }

    fn start_send(&mut self, dispatch: Dispatch) {
        let sender = Arc::clone(&self.sender);
        let Dispatch {
            record_id,
            attempt,
            request,
        } = dispatch;

        self.sends.spawn(async move {
            // Inner task so a panicking sender still reports back
            let send = tokio::spawn(async move { sender.append_block(&request).await });
            let result = match send.await {
                Ok(result) => result,
                Err(e) => Err(SendError::transport(format!("send task failed: {}", e))),
            };
            debug!(record_id = %record_id, attempt, ok = result.is_ok(), "Send finished");
            (record_id, result)
        });
    }

    fn on_send_finished(&mut self, joined: std::result::Result<SendOutcome, JoinError>) {
        match joined {
            Ok((record_id, result)) => self.engine.complete(record_id, result, Utc::now()),
            Err(e) => error!(error = %e, "Send task failed to join"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, QueueStore};
    use crate::profile::ProfileStore;
    use crate::remote::AppendRequest;
    use crate::sync::engine::{SyncSettings, TickOutcome};
    use crate::types::{CaptureRecord, Profile, SyncStatus};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::sync::Semaphore;

    /// Records calls; each send waits for a gate permit before returning.
    struct MockSender {
        calls: Mutex<Vec<AppendRequest>>,
        gate: Semaphore,
        results: Mutex<VecDeque<std::result::Result<(), SendError>>>,
    }

    impl MockSender {
        fn open() -> Self {
            Self::with_permits(Semaphore::MAX_PERMITS)
        }

        fn gated() -> Self {
            Self::with_permits(0)
        }

        fn with_permits(permits: usize) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                gate: Semaphore::new(permits),
                results: Mutex::new(VecDeque::new()),
            }
        }

        fn release(&self, sends: usize) {
            self.gate.add_permits(sends);
        }

        fn fail_next(&self, err: SendError) {
            self.results.lock().unwrap().push_back(Err(err));
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        fn sent_contents(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|r| r.content.clone())
                .collect()
        }
    }

    #[async_trait]
    impl BlockSender for MockSender {
        async fn append_block(
            &self,
            request: &AppendRequest,
        ) -> std::result::Result<(), SendError> {
            self.calls.lock().unwrap().push(request.clone());
            let permit = self
                .gate
                .acquire()
                .await
                .map_err(|_| SendError::transport("gate closed"))?;
            permit.forget();
            self.results.lock().unwrap().pop_front().unwrap_or(Ok(()))
        }
    }

    fn setup(max_concurrent_sends: usize) -> (Arc<Database>, SyncEngine) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.migrate().unwrap();

        let profiles = Arc::new(ProfileStore::new(db.clone(), "device-1"));
        let mut profile = Profile::new("device-1");
        profile.graph_name = Some("my-graph".to_string());
        profile.api_token = Some("secret".to_string());
        profiles.update(&profile).unwrap();

        let settings = SyncSettings {
            tick_interval: Duration::from_secs(3600),
            max_concurrent_sends,
            ..Default::default()
        };
        let engine = SyncEngine::new(db.clone(), profiles, settings);
        (db, engine)
    }

    fn insert(db: &Database, content: &str) -> CaptureRecord {
        let record = CaptureRecord::note(content);
        db.insert_capture(&record).unwrap();
        record
    }

    fn status_of(db: &Database, id: &Uuid) -> SyncStatus {
        db.get_capture(id).unwrap().unwrap().status
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        time::timeout(Duration::from_secs(5), async {
            while !condition() {
                time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not met in time");
    }

    #[tokio::test]
    async fn test_tick_sends_and_records_success() {
        let (db, engine) = setup(1);
        let sender = Arc::new(MockSender::open());
        let orchestrator = SyncOrchestrator::spawn(engine, sender.clone(), Reachability::new(true));
        let record = insert(&db, "hello");

        let report = orchestrator.handle().tick().await.unwrap();
        assert_eq!(report.outcome, TickOutcome::Ran);
        assert_eq!(report.dispatched, 1);

        wait_for(|| status_of(&db, &record.id) == SyncStatus::Success).await;
        assert_eq!(sender.sent_contents(), vec!["hello".to_string()]);

        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_concurrent_sync_one_sends_once() {
        let (db, engine) = setup(4);
        let sender = Arc::new(MockSender::gated());
        let orchestrator = SyncOrchestrator::spawn(engine, sender.clone(), Reachability::new(true));
        let record = insert(&db, "just captured");

        let first = orchestrator.handle();
        let second = orchestrator.handle();
        let (a, b) = tokio::join!(first.sync_one(record.id), second.sync_one(record.id));
        let started = [a.unwrap(), b.unwrap()];
        assert_eq!(started.iter().filter(|s| **s).count(), 1);

        wait_for(|| sender.call_count() == 1).await;
        let report = first.tick().await.unwrap();
        assert_eq!(report.dispatched, 0);
        time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sender.call_count(), 1);

        sender.release(1);
        wait_for(|| status_of(&db, &record.id) == SyncStatus::Success).await;
        assert_eq!(sender.call_count(), 1);

        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_completion_chains_next_send_in_order() {
        let (db, engine) = setup(1);
        let sender = Arc::new(MockSender::gated());
        let orchestrator = SyncOrchestrator::spawn(engine, sender.clone(), Reachability::new(true));
        let records = [insert(&db, "one"), insert(&db, "two"), insert(&db, "three")];

        let report = orchestrator.handle().tick().await.unwrap();
        assert_eq!(report.dispatched, 1);

        for expected in 1..=3 {
            wait_for(|| sender.call_count() == expected).await;
            time::sleep(Duration::from_millis(20)).await;
            assert_eq!(sender.call_count(), expected);
            sender.release(1);
        }

        wait_for(|| {
            records
                .iter()
                .all(|r| status_of(&db, &r.id) == SyncStatus::Success)
        })
        .await;
        assert_eq!(sender.sent_contents(), vec!["one", "two", "three"]);

        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_reachability_restored_triggers_tick() {
        let (db, engine) = setup(1);
        let sender = Arc::new(MockSender::open());
        let reachability = Reachability::new(false);
        let orchestrator = SyncOrchestrator::spawn(engine, sender.clone(), reachability.clone());
        let record = insert(&db, "offline capture");

        let report = orchestrator.handle().tick().await.unwrap();
        assert_eq!(report.outcome, TickOutcome::Offline);
        assert!(!orchestrator.handle().sync_one(record.id).await.unwrap());
        assert_eq!(sender.call_count(), 0);

        reachability.set_reachable(true);
        wait_for(|| status_of(&db, &record.id) == SyncStatus::Success).await;

        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_auth_failure_latches_through_orchestrator() {
        let (db, engine) = setup(1);
        let sender = Arc::new(MockSender::open());
        sender.fail_next(SendError::http(403, "HTTP 403 - forbidden"));
        let orchestrator = SyncOrchestrator::spawn(engine, sender.clone(), Reachability::new(true));
        let record = insert(&db, "rejected");

        orchestrator.handle().tick().await.unwrap();
        wait_for(|| db.get_capture(&record.id).unwrap().unwrap().hard_error).await;

        let report = orchestrator.handle().tick().await.unwrap();
        assert_eq!(report.dispatched, 0);
        assert_eq!(sender.call_count(), 1);

        let saved = db.get_capture(&record.id).unwrap().unwrap();
        assert_eq!(saved.status, SyncStatus::Pending);
        assert_eq!(saved.attempt_count, 1);

        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_soft_failure_keeps_record_pending() {
        let (db, engine) = setup(1);
        let sender = Arc::new(MockSender::open());
        sender.fail_next(SendError::http(503, "HTTP 503 - unavailable"));
        let orchestrator = SyncOrchestrator::spawn(engine, sender.clone(), Reachability::new(true));
        let record = insert(&db, "retry me");

        orchestrator.handle().tick().await.unwrap();
        wait_for(|| {
            db.get_capture(&record.id)
                .unwrap()
                .unwrap()
                .next_attempt_at
                .is_some()
        })
        .await;

        let saved = db.get_capture(&record.id).unwrap().unwrap();
        assert_eq!(saved.status, SyncStatus::Pending);
        assert!(!saved.hard_error);
        assert_eq!(saved.last_error.as_deref(), Some("HTTP 503 - unavailable"));

        // Still backing off
        let report = orchestrator.handle().tick().await.unwrap();
        assert_eq!(report.dispatched, 0);

        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_detaches_outstanding_send() {
        let (db, engine) = setup(1);
        let sender = Arc::new(MockSender::gated());
        let orchestrator = SyncOrchestrator::spawn(engine, sender.clone(), Reachability::new(true));
        let handle = orchestrator.handle();
        let record = insert(&db, "in the air");

        handle.tick().await.unwrap();
        wait_for(|| sender.call_count() == 1).await;

        time::timeout(Duration::from_secs(1), orchestrator.shutdown())
            .await
            .expect("shutdown must not wait for the send");

        assert!(matches!(handle.tick().await, Err(Error::Stopped)));
        assert!(!handle.is_running());

        let saved = db.get_capture(&record.id).unwrap().unwrap();
        assert_eq!(saved.status, SyncStatus::InProgress);
        assert_eq!(saved.attempt_count, 1);
    }

    #[tokio::test]
    async fn test_periodic_tick_sends_without_prompting() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.migrate().unwrap();
        let profiles = Arc::new(ProfileStore::new(db.clone(), "device-1"));
        let mut profile = Profile::new("device-1");
        profile.graph_name = Some("g".to_string());
        profile.api_token = Some("t".to_string());
        profiles.update(&profile).unwrap();
        let settings = SyncSettings {
            tick_interval: Duration::from_millis(20),
            ..Default::default()
        };
        let engine = SyncEngine::new(db.clone(), profiles, settings);

        let sender = Arc::new(MockSender::open());
        let orchestrator = SyncOrchestrator::spawn(engine, sender.clone(), Reachability::new(true));
        let record = insert(&db, "background");

        wait_for(|| status_of(&db, &record.id) == SyncStatus::Success).await;
        assert_eq!(db.captures_with_status(&[SyncStatus::Pending]).unwrap().len(), 0);

        orchestrator.shutdown().await;
    }
}
