// Job session controller: wires channel, polling, reconciler and subscribers
// together for one job identity
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use url::Url;
use uuid::Uuid;

use crate::channel::{ChannelManager, ChannelUpdate};
use crate::client::JobApi;
use crate::error::{ApiError, CommandError, SessionError};
use crate::models::{JobId, JobStatus, JobView, StatusSnapshot, SyncMessage};
use crate::sync::{Applied, SampleRef, StateReconciler};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub poll_interval: Duration,
    pub log_capacity: usize,
    pub sample_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            log_capacity: 5_000,
            sample_capacity: 200,
        }
    }
}

/// What subscribers are told. `ChannelHealth(false)` is the "connection
/// degraded" indicator and is deliberately separate from job status: during
/// an outage the view freezes rather than reverting.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    ViewChanged(JobView),
    LogLine(String),
    Sample(SampleRef),
    ChannelHealth(bool),
    Fatal(SessionError),
}

/// Everything the driver consumes, from either source. Channel and poll
/// messages interleave here in arrival order; cross-source ordering is the
/// reconciler's job (sequence numbers).
enum SessionMsg {
    Channel(ChannelUpdate),
    PolledSnapshot(StatusSnapshot),
    PolledLogs(String),
    JobGone,
    AuthFailure,
}

type Subscriber = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

struct SessionInner {
    reconciler: StateReconciler,
    subscribers: Vec<(u64, Subscriber)>,
    next_token: u64,
    poll_task: Option<JoinHandle<()>>,
    channel_healthy: bool,
    fatal: Option<SessionError>,
    /// Whether any server-asserted state was ever received; decides between
    /// `JobDeleted` and `UnknownJobState` when the job disappears.
    had_state: bool,
}

/// Shared handles cloned into the driver and poller tasks.
#[derive(Clone)]
struct SessionCtx {
    job_id: JobId,
    api: Arc<dyn JobApi>,
    config: SessionConfig,
    inner: Arc<Mutex<SessionInner>>,
    disposed: Arc<AtomicBool>,
    manager: Arc<ChannelManager>,
    tx: mpsc::UnboundedSender<SessionMsg>,
}

/// One live synchronization session for one job. Construct, `start()`,
/// subscribe, and `dispose()` when the user navigates away. Multiple
/// sessions run independently; they share nothing but the API client.
pub struct JobSession {
    ctx: SessionCtx,
    rx: Mutex<Option<mpsc::UnboundedReceiver<SessionMsg>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl JobSession {
    /// `channel_base` is the websocket origin (e.g. `ws://host:8188`); the
    /// per-job event stream lives at `/jobs/{id}/events` with a fresh client
    /// id per session.
    pub fn new(
        job_id: JobId,
        api: Arc<dyn JobApi>,
        channel_base: &Url,
        config: SessionConfig,
    ) -> Self {
        let channel_url = format!(
            "{}/jobs/{}/events?client_id={}",
            channel_base.as_str().trim_end_matches('/'),
            job_id,
            Uuid::new_v4()
        );
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = SessionInner {
            reconciler: StateReconciler::new(config.log_capacity, config.sample_capacity),
            subscribers: Vec::new(),
            next_token: 1,
            poll_task: None,
            channel_healthy: false,
            fatal: None,
            had_state: false,
        };
        Self {
            ctx: SessionCtx {
                job_id,
                api,
                config,
                inner: Arc::new(Mutex::new(inner)),
                disposed: Arc::new(AtomicBool::new(false)),
                manager: Arc::new(ChannelManager::new(channel_url)),
                tx,
            },
            rx: Mutex::new(Some(rx)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Fetches the initial snapshot, opens the push channel, and activates
    /// polling until the channel reports healthy. Second call is a no-op.
    pub async fn start(&self) {
        if self.ctx.disposed.load(Ordering::SeqCst) {
            return;
        }
        let Some(mut rx) = self.rx.lock().take() else {
            debug!("Session for job {} already started", self.ctx.job_id);
            return;
        };

        let ctx = self.ctx.clone();
        let driver = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                ctx.handle(msg);
            }
        });
        self.tasks.lock().push(driver);

        // Initial authoritative snapshot. Transport failures are not fatal
        // here; the poller retries on its next tick.
        match self.ctx.api.fetch_status(&self.ctx.job_id).await {
            Ok(snapshot) => {
                let _ = self.ctx.tx.send(SessionMsg::PolledSnapshot(snapshot));
            }
            Err(ApiError::Auth(status)) => {
                warn!("Initial fetch rejected with status {}", status);
                let _ = self.ctx.tx.send(SessionMsg::AuthFailure);
                return;
            }
            Err(ApiError::NotFound) => {
                if let Ok(dump) = self.ctx.api.fetch_logs(&self.ctx.job_id).await {
                    let _ = self.ctx.tx.send(SessionMsg::PolledLogs(dump));
                }
                let _ = self.ctx.tx.send(SessionMsg::JobGone);
                return;
            }
            Err(e) => warn!("Initial snapshot fetch failed, polling will retry: {}", e),
        }

        let (mgr_tx, mut mgr_rx) = mpsc::unbounded_channel();
        self.ctx.manager.start(mgr_tx);
        let tx = self.ctx.tx.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(update) = mgr_rx.recv().await {
                if tx.send(SessionMsg::Channel(update)).is_err() {
                    break;
                }
            }
        });
        self.tasks.lock().push(forwarder);

        // The channel is not open yet, so polling covers the gap.
        let mut inner = self.ctx.inner.lock();
        if !inner.reconciler.view().status.is_terminal() && inner.fatal.is_none() {
            self.ctx.start_polling_locked(&mut inner);
        }
    }

    pub fn subscribe(&self, callback: impl Fn(&SessionEvent) + Send + Sync + 'static) -> u64 {
        let mut inner = self.ctx.inner.lock();
        let token = inner.next_token;
        inner.next_token += 1;
        inner.subscribers.push((token, Arc::new(callback)));
        token
    }

    pub fn unsubscribe(&self, token: u64) {
        self.ctx
            .inner
            .lock()
            .subscribers
            .retain(|(t, _)| *t != token);
    }

    pub fn view(&self) -> JobView {
        self.ctx.inner.lock().reconciler.view().clone()
    }

    pub fn logs(&self) -> Vec<String> {
        self.ctx.inner.lock().reconciler.logs().snapshot()
    }

    pub fn samples(&self) -> Vec<SampleRef> {
        self.ctx.inner.lock().reconciler.samples().snapshot()
    }

    pub fn channel_healthy(&self) -> bool {
        self.ctx.inner.lock().channel_healthy
    }

    pub fn active_subscriptions(&self) -> usize {
        self.ctx.inner.lock().subscribers.len()
    }

    pub fn is_disposed(&self) -> bool {
        self.ctx.disposed.load(Ordering::SeqCst)
    }

    /// Asks the server to stop the job. Meaningful only while the job is
    /// pending or running. The local status is deliberately not touched:
    /// the stop becomes visible through the next server-confirmed status
    /// update, so client and server can never diverge if the stop is
    /// accepted but the job does not actually halt.
    pub async fn request_stop(&self) -> Result<(), CommandError> {
        if self.ctx.disposed.load(Ordering::SeqCst) {
            return Err(CommandError::Disposed);
        }
        let status = self.view().status;
        if !matches!(status, JobStatus::Pending | JobStatus::Running) {
            return Err(CommandError::InvalidState(status));
        }
        match self.ctx.api.stop_job(&self.ctx.job_id).await {
            Ok(()) => Ok(()),
            Err(e) => {
                if e.is_auth() {
                    let _ = self.ctx.tx.send(SessionMsg::AuthFailure);
                }
                Err(e.into())
            }
        }
    }

    /// Downloads the finished artifact. Meaningful only once the job is
    /// completed; the outcome is the caller's alone and never mutates the
    /// job view.
    pub async fn request_download(&self) -> Result<Vec<u8>, CommandError> {
        if self.ctx.disposed.load(Ordering::SeqCst) {
            return Err(CommandError::Disposed);
        }
        let status = self.view().status;
        if status != JobStatus::Completed {
            return Err(CommandError::InvalidState(status));
        }
        match self.ctx.api.download_artifact(&self.ctx.job_id).await {
            Ok(bytes) => Ok(bytes),
            Err(e) => {
                if e.is_auth() {
                    let _ = self.ctx.tx.send(SessionMsg::AuthFailure);
                }
                Err(e.into())
            }
        }
    }

    /// Tears the session down: channel, timers, subscriptions. Idempotent;
    /// any message still in flight afterwards is silently dropped.
    pub fn dispose(&self) {
        if self.ctx.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("Disposing session for job {}", self.ctx.job_id);
        self.ctx.manager.stop();
        {
            let mut inner = self.ctx.inner.lock();
            if let Some(handle) = inner.poll_task.take() {
                handle.abort();
            }
            inner.subscribers.clear();
        }
        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }
    }

    #[cfg(test)]
    fn poll_active(&self) -> bool {
        self.ctx.inner.lock().poll_task.is_some()
    }
}

impl Drop for JobSession {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl SessionCtx {
    /// Single entry point for all inbound messages; runs on the driver task
    /// so per-source arrival order is preserved.
    fn handle(&self, msg: SessionMsg) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }

        let mut events: Vec<SessionEvent> = Vec::new();
        let mut shutdown = false;
        let subscribers: Vec<Subscriber>;
        {
            let mut inner = self.inner.lock();
            if inner.fatal.is_some() {
                return;
            }

            match msg {
                SessionMsg::Channel(ChannelUpdate::Connected) => {
                    if !inner.channel_healthy {
                        inner.channel_healthy = true;
                        events.push(SessionEvent::ChannelHealth(true));
                    }
                    // Channel is authoritative again; drop the safety net.
                    stop_polling_locked(&mut inner);
                }
                SessionMsg::Channel(ChannelUpdate::Down) => {
                    if inner.channel_healthy {
                        inner.channel_healthy = false;
                        events.push(SessionEvent::ChannelHealth(false));
                    }
                    if !inner.reconciler.view().status.is_terminal() {
                        self.start_polling_locked(&mut inner);
                    }
                }
                SessionMsg::Channel(ChannelUpdate::Message(m)) => {
                    if let Some(sync) = SyncMessage::from_channel(m) {
                        apply_locked(&mut inner, sync, &mut events);
                    }
                }
                SessionMsg::PolledSnapshot(snapshot) => {
                    inner.had_state = true;
                    apply_locked(&mut inner, SyncMessage::Snapshot(snapshot), &mut events);
                }
                SessionMsg::PolledLogs(dump) => {
                    for line in inner.reconciler.apply_log_dump(&dump) {
                        events.push(SessionEvent::LogLine(line));
                    }
                }
                SessionMsg::JobGone => {
                    let error = if inner.had_state {
                        SessionError::JobDeleted
                    } else {
                        SessionError::UnknownJobState
                    };
                    warn!("Job {} disappeared server-side: {}", self.job_id, error);
                    if let Some(view) = inner.reconciler.force_terminal(JobStatus::Failed) {
                        events.push(SessionEvent::ViewChanged(view));
                    }
                    inner.fatal = Some(error);
                    events.push(SessionEvent::Fatal(error));
                    stop_polling_locked(&mut inner);
                    shutdown = true;
                }
                SessionMsg::AuthFailure => {
                    warn!("Job {}: authentication rejected, stopping sync", self.job_id);
                    inner.fatal = Some(SessionError::Auth);
                    events.push(SessionEvent::Fatal(SessionError::Auth));
                    stop_polling_locked(&mut inner);
                    shutdown = true;
                }
            }

            // Once the job is terminal there is nothing left to synchronize.
            if inner.reconciler.view().status.is_terminal() {
                stop_polling_locked(&mut inner);
                shutdown = true;
            }

            subscribers = inner
                .subscribers
                .iter()
                .map(|(_, cb)| cb.clone())
                .collect();
        }

        if shutdown {
            self.manager.stop();
        }
        for event in &events {
            for callback in &subscribers {
                callback(event);
            }
        }
    }

    fn start_polling_locked(&self, inner: &mut SessionInner) {
        if inner.poll_task.is_some() {
            return;
        }
        let ctx = self.clone();
        inner.poll_task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(ctx.config.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await; // interval fires immediately; the initial fetch covered that

            loop {
                ticker.tick().await;
                if ctx.disposed.load(Ordering::SeqCst) {
                    break;
                }
                match ctx.api.fetch_status(&ctx.job_id).await {
                    Ok(snapshot) => {
                        if ctx.tx.send(SessionMsg::PolledSnapshot(snapshot)).is_err() {
                            break;
                        }
                    }
                    Err(ApiError::Auth(_)) => {
                        let _ = ctx.tx.send(SessionMsg::AuthFailure);
                        break;
                    }
                    Err(ApiError::NotFound) => {
                        // Best-effort final log grab before declaring the job gone.
                        if let Ok(dump) = ctx.api.fetch_logs(&ctx.job_id).await {
                            let _ = ctx.tx.send(SessionMsg::PolledLogs(dump));
                        }
                        let _ = ctx.tx.send(SessionMsg::JobGone);
                        break;
                    }
                    Err(e) => debug!("Status poll failed, retrying next tick: {}", e),
                }

                // Channel log delivery is down while we poll, so catch up on
                // logs from the one-shot dump endpoint too.
                match ctx.api.fetch_logs(&ctx.job_id).await {
                    Ok(dump) => {
                        let _ = ctx.tx.send(SessionMsg::PolledLogs(dump));
                    }
                    Err(e) => debug!("Log poll failed: {}", e),
                }
            }
        }));
    }
}

fn stop_polling_locked(inner: &mut SessionInner) {
    if let Some(handle) = inner.poll_task.take() {
        handle.abort();
    }
}

fn apply_locked(inner: &mut SessionInner, msg: SyncMessage, events: &mut Vec<SessionEvent>) {
    match inner.reconciler.apply(msg) {
        Some(Applied::View(view)) => {
            inner.had_state = true;
            events.push(SessionEvent::ViewChanged(view));
        }
        Some(Applied::Log(line)) => events.push(SessionEvent::LogLine(line)),
        Some(Applied::Sample(sample)) => events.push(SessionEvent::Sample(sample)),
        None => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChannelMessage;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    fn snapshot(status: JobStatus, progress: u8, sequence: u64) -> StatusSnapshot {
        StatusSnapshot {
            status,
            progress,
            current_step: None,
            current_epoch: None,
            started_at: None,
            completed_at: None,
            config: None,
            sequence,
        }
    }

    /// JobApi double with scripted status responses.
    struct ScriptedApi {
        statuses: Mutex<VecDeque<Result<StatusSnapshot, ApiError>>>,
        logs: Mutex<String>,
        stop_calls: AtomicUsize,
    }

    impl ScriptedApi {
        fn new() -> Self {
            Self {
                statuses: Mutex::new(VecDeque::new()),
                logs: Mutex::new(String::new()),
                stop_calls: AtomicUsize::new(0),
            }
        }

        fn push_status(&self, result: Result<StatusSnapshot, ApiError>) {
            self.statuses.lock().push_back(result);
        }
    }

    #[async_trait]
    impl JobApi for ScriptedApi {
        async fn fetch_status(&self, _id: &JobId) -> Result<StatusSnapshot, ApiError> {
            self.statuses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(snapshot(JobStatus::Running, 0, 0)))
        }

        async fn fetch_logs(&self, _id: &JobId) -> Result<String, ApiError> {
            Ok(self.logs.lock().clone())
        }

        async fn stop_job(&self, _id: &JobId) -> Result<(), ApiError> {
            self.stop_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn download_artifact(&self, _id: &JobId) -> Result<Vec<u8>, ApiError> {
            Ok(vec![0xAB, 0xCD])
        }
    }

    fn session_with(api: Arc<ScriptedApi>) -> JobSession {
        JobSession::new(
            JobId::from("job-1"),
            api,
            &Url::parse("ws://127.0.0.1:9").unwrap(),
            SessionConfig::default(),
        )
    }

    fn collect_events(session: &JobSession) -> Arc<Mutex<Vec<SessionEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        session.subscribe(move |e| sink.lock().push(e.clone()));
        events
    }

    #[tokio::test]
    async fn test_snapshot_reaches_subscribers() {
        let api = Arc::new(ScriptedApi::new());
        let session = session_with(api);
        let events = collect_events(&session);

        session
            .ctx
            .handle(SessionMsg::PolledSnapshot(snapshot(JobStatus::Pending, 0, 1)));

        let events = events.lock();
        assert_eq!(events.len(), 1);
        match &events[0] {
            SessionEvent::ViewChanged(v) => assert_eq!(v.status, JobStatus::Pending),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dispose_is_idempotent_and_clears_subscriptions() {
        let api = Arc::new(ScriptedApi::new());
        let session = session_with(api);
        session.subscribe(|_| {});
        session.subscribe(|_| {});
        assert_eq!(session.active_subscriptions(), 2);

        session.dispose();
        session.dispose();

        assert!(session.is_disposed());
        assert_eq!(session.active_subscriptions(), 0);
        assert!(!session.poll_active());
    }

    #[tokio::test]
    async fn test_messages_after_dispose_are_dropped() {
        let api = Arc::new(ScriptedApi::new());
        let session = session_with(api);
        session
            .ctx
            .handle(SessionMsg::PolledSnapshot(snapshot(JobStatus::Running, 10, 1)));
        session.dispose();
        session
            .ctx
            .handle(SessionMsg::PolledSnapshot(snapshot(JobStatus::Running, 90, 2)));
        assert_eq!(session.view().progress_percent, 10);
    }

    #[tokio::test]
    async fn test_polling_activates_on_channel_down_and_stops_on_connect() {
        let api = Arc::new(ScriptedApi::new());
        let session = session_with(api);
        let events = collect_events(&session);
        session
            .ctx
            .handle(SessionMsg::PolledSnapshot(snapshot(JobStatus::Running, 5, 1)));

        session.ctx.handle(SessionMsg::Channel(ChannelUpdate::Connected));
        assert!(session.channel_healthy());
        assert!(!session.poll_active());

        session.ctx.handle(SessionMsg::Channel(ChannelUpdate::Down));
        assert!(!session.channel_healthy());
        assert!(session.poll_active());

        session.ctx.handle(SessionMsg::Channel(ChannelUpdate::Connected));
        assert!(!session.poll_active());

        let health: Vec<_> = events
            .lock()
            .iter()
            .filter_map(|e| match e {
                SessionEvent::ChannelHealth(h) => Some(*h),
                _ => None,
            })
            .collect();
        assert_eq!(health, vec![true, false, true]);
        session.dispose();
    }

    #[tokio::test]
    async fn test_terminal_snapshot_stops_polling() {
        let api = Arc::new(ScriptedApi::new());
        let session = session_with(api);
        session
            .ctx
            .handle(SessionMsg::PolledSnapshot(snapshot(JobStatus::Running, 50, 1)));
        session.ctx.handle(SessionMsg::Channel(ChannelUpdate::Down));
        assert!(session.poll_active());

        session
            .ctx
            .handle(SessionMsg::PolledSnapshot(snapshot(JobStatus::Completed, 100, 2)));
        assert!(!session.poll_active());
        assert_eq!(session.view().status, JobStatus::Completed);
        session.dispose();
    }

    #[tokio::test]
    async fn test_request_stop_waits_for_server_confirmation() {
        let api = Arc::new(ScriptedApi::new());
        let session = session_with(api.clone());
        session
            .ctx
            .handle(SessionMsg::PolledSnapshot(snapshot(JobStatus::Running, 40, 1)));

        session.request_stop().await.unwrap();
        assert_eq!(api.stop_calls.load(Ordering::SeqCst), 1);
        // Status is not mutated locally; the server-confirmed delta does it.
        assert_eq!(session.view().status, JobStatus::Running);

        session.ctx.handle(SessionMsg::Channel(ChannelUpdate::Message(
            ChannelMessage::Status {
                status: JobStatus::Stopped,
                completed_at: None,
                sequence: 2,
            },
        )));
        assert_eq!(session.view().status, JobStatus::Stopped);
        session.dispose();
    }

    #[tokio::test]
    async fn test_request_stop_invalid_once_terminal() {
        let api = Arc::new(ScriptedApi::new());
        let session = session_with(api);
        session
            .ctx
            .handle(SessionMsg::PolledSnapshot(snapshot(JobStatus::Completed, 100, 1)));

        match session.request_stop().await {
            Err(CommandError::InvalidState(JobStatus::Completed)) => {}
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
        session.dispose();
    }

    #[tokio::test]
    async fn test_request_download_requires_completed() {
        let api = Arc::new(ScriptedApi::new());
        let session = session_with(api);
        session
            .ctx
            .handle(SessionMsg::PolledSnapshot(snapshot(JobStatus::Running, 10, 1)));

        assert!(matches!(
            session.request_download().await,
            Err(CommandError::InvalidState(JobStatus::Running))
        ));

        session
            .ctx
            .handle(SessionMsg::PolledSnapshot(snapshot(JobStatus::Completed, 100, 2)));
        assert_eq!(session.request_download().await.unwrap(), vec![0xAB, 0xCD]);
        session.dispose();
    }

    #[tokio::test]
    async fn test_auth_failure_is_fatal_and_stops_sync() {
        let api = Arc::new(ScriptedApi::new());
        let session = session_with(api);
        let events = collect_events(&session);
        session
            .ctx
            .handle(SessionMsg::PolledSnapshot(snapshot(JobStatus::Running, 10, 1)));
        session.ctx.handle(SessionMsg::Channel(ChannelUpdate::Down));
        assert!(session.poll_active());

        session.ctx.handle(SessionMsg::AuthFailure);
        assert!(!session.poll_active());
        assert!(events
            .lock()
            .contains(&SessionEvent::Fatal(SessionError::Auth)));

        // Further messages are ignored once fatal.
        session
            .ctx
            .handle(SessionMsg::PolledSnapshot(snapshot(JobStatus::Running, 90, 2)));
        assert_eq!(session.view().progress_percent, 10);
        session.dispose();
    }

    #[tokio::test]
    async fn test_job_gone_infers_failure() {
        let api = Arc::new(ScriptedApi::new());
        let session = session_with(api);
        let events = collect_events(&session);
        session
            .ctx
            .handle(SessionMsg::PolledSnapshot(snapshot(JobStatus::Running, 60, 1)));

        session.ctx.handle(SessionMsg::JobGone);
        assert_eq!(session.view().status, JobStatus::Failed);
        assert!(session.view().completed_at.is_some());
        assert!(events
            .lock()
            .contains(&SessionEvent::Fatal(SessionError::JobDeleted)));
        session.dispose();
    }

    #[tokio::test]
    async fn test_job_gone_without_state_is_unknown() {
        let api = Arc::new(ScriptedApi::new());
        let session = session_with(api);
        let events = collect_events(&session);

        session.ctx.handle(SessionMsg::JobGone);
        assert!(events
            .lock()
            .contains(&SessionEvent::Fatal(SessionError::UnknownJobState)));
        session.dispose();
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let api = Arc::new(ScriptedApi::new());
        let session = session_with(api);
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let token = session.subscribe(move |e| sink.lock().push(e.clone()));

        session
            .ctx
            .handle(SessionMsg::PolledSnapshot(snapshot(JobStatus::Pending, 0, 1)));
        assert_eq!(events.lock().len(), 1);

        session.unsubscribe(token);
        session
            .ctx
            .handle(SessionMsg::PolledSnapshot(snapshot(JobStatus::Running, 5, 2)));
        assert_eq!(events.lock().len(), 1);
        session.dispose();
    }

    #[tokio::test]
    async fn test_channel_log_and_sample_events() {
        let api = Arc::new(ScriptedApi::new());
        let session = session_with(api);
        let events = collect_events(&session);
        session
            .ctx
            .handle(SessionMsg::PolledSnapshot(snapshot(JobStatus::Running, 10, 1)));

        session.ctx.handle(SessionMsg::Channel(ChannelUpdate::Message(
            ChannelMessage::Log {
                text: "step 100/1600".to_string(),
                sequence: 2,
            },
        )));
        session.ctx.handle(SessionMsg::Channel(ChannelUpdate::Message(
            ChannelMessage::Sample {
                reference: "samples/epoch_1.png".to_string(),
                sequence: 3,
            },
        )));

        assert_eq!(session.logs(), vec!["step 100/1600"]);
        assert_eq!(session.samples()[0].reference, "samples/epoch_1.png");

        let events = events.lock();
        assert!(events
            .iter()
            .any(|e| matches!(e, SessionEvent::LogLine(l) if l == "step 100/1600")));
        assert!(events.iter().any(
            |e| matches!(e, SessionEvent::Sample(s) if s.reference == "samples/epoch_1.png")
        ));
        drop(events);
        session.dispose();
    }

    #[tokio::test]
    async fn test_start_uses_initial_snapshot_and_polls() {
        let api = Arc::new(ScriptedApi::new());
        api.push_status(Ok(snapshot(JobStatus::Running, 25, 3)));
        let session = session_with(api);
        session.start().await;

        // Driver consumes the queued snapshot asynchronously.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(session.view().status, JobStatus::Running);
        assert_eq!(session.view().progress_percent, 25);
        // Channel has not connected, so polling is the active source.
        assert!(session.poll_active());
        session.dispose();
        assert!(!session.poll_active());
    }
}
