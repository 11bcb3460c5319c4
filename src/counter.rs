//! Debounced background sync for the optimistic counter.
//!
//! Clicks land in the [`Reconciler`] right away and wake a worker task. The
//! worker waits until clicks have been quiet for the debounce window, sends
//! the accumulated delta as one request, and folds the answer back in.
//! Failed batches are retried with exponential backoff. Shutting the handle
//! down (or dropping it) sends whatever is still pending before the worker
//! exits.

use crate::api::ApiClient;
use crate::config::CounterSettings;
use crate::errors::ClientError;
use crate::models::{CounterTotals, TodayProgress};
use crate::reconcile::{ClickOutcome, Direction, Reconciler};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// The three backend calls the counter page depends on.
pub trait CounterBackend: Send + Sync + 'static {
    fn today(&self) -> impl Future<Output = Result<TodayProgress, ClientError>> + Send;

    fn increment(&self, beads: u64)
    -> impl Future<Output = Result<CounterTotals, ClientError>> + Send;

    fn decrement(&self, beads: u64)
    -> impl Future<Output = Result<CounterTotals, ClientError>> + Send;
}

/// Counter endpoints of one logged-in user.
pub struct UserCounter {
    api: Arc<ApiClient>,
    user_id: String,
}

impl UserCounter {
    pub fn new(api: Arc<ApiClient>, user_id: impl Into<String>) -> Self {
        Self {
            api,
            user_id: user_id.into(),
        }
    }
}

impl CounterBackend for UserCounter {
    async fn today(&self) -> Result<TodayProgress, ClientError> {
        self.api.today_progress(&self.user_id).await
    }

    async fn increment(&self, beads: u64) -> Result<CounterTotals, ClientError> {
        self.api.increment_beads(&self.user_id, beads).await
    }

    async fn decrement(&self, beads: u64) -> Result<CounterTotals, ClientError> {
        self.api.decrement_beads(&self.user_id, beads).await
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub display: u64,
    pub confirmed: Option<u64>,
    pub pending: i64,
    pub in_flight: i64,
    pub syncing: bool,
    pub totals: Option<CounterTotals>,
    pub last_error: Option<String>,
    pub auth_required: bool,
}

#[derive(Default)]
struct Inner {
    counter: Reconciler,
    syncing: bool,
    last_error: Option<String>,
    auth_required: bool,
}

impl Inner {
    fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            display: self.counter.display(),
            confirmed: self.counter.confirmed(),
            pending: self.counter.pending(),
            in_flight: self.counter.in_flight().map_or(0, |batch| batch.delta),
            syncing: self.syncing,
            totals: self.counter.totals(),
            last_error: self.last_error.clone(),
            auth_required: self.auth_required,
        }
    }
}

struct Shared {
    inner: Mutex<Inner>,
    wake: Notify,
    flush: Notify,
    snapshots: watch::Sender<CounterSnapshot>,
}

impl Shared {
    fn publish(&self, inner: &Inner) {
        self.snapshots.send_replace(inner.snapshot());
    }
}

pub struct CounterSync {
    shared: Arc<Shared>,
    stop: watch::Sender<bool>,
    snapshots: watch::Receiver<CounterSnapshot>,
    worker: JoinHandle<Result<CounterSnapshot, ClientError>>,
}

impl CounterSync {
    /// Spawns the sync worker. The worker starts by loading today's total.
    pub fn start<B: CounterBackend>(backend: B, settings: CounterSettings) -> Self {
        let (snapshot_tx, snapshots) = watch::channel(CounterSnapshot::default());
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner::default()),
            wake: Notify::new(),
            flush: Notify::new(),
            snapshots: snapshot_tx,
        });
        let (stop, stop_rx) = watch::channel(false);

        let worker = Worker {
            backend,
            shared: Arc::clone(&shared),
            settings,
            stop: stop_rx,
        };
        let worker = tokio::spawn(worker.run());

        Self {
            shared,
            stop,
            snapshots,
            worker,
        }
    }

    pub async fn increment(&self) -> ClickOutcome {
        self.click(Direction::Increment).await
    }

    pub async fn decrement(&self) -> ClickOutcome {
        self.click(Direction::Decrement).await
    }

    async fn click(&self, direction: Direction) -> ClickOutcome {
        let outcome = {
            let mut inner = self.shared.inner.lock().await;
            let outcome = inner.counter.apply(direction);
            self.shared.publish(&inner);
            outcome
        };

        if outcome.accepted {
            self.shared.wake.notify_one();
        }
        if outcome.round_completed {
            info!(beads = outcome.display, "round completed");
        }
        outcome
    }

    /// Sends pending clicks without waiting out the debounce window.
    pub fn flush_now(&self) {
        self.shared.flush.notify_one();
        self.shared.wake.notify_one();
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CounterSnapshot> {
        self.snapshots.clone()
    }

    /// Flushes everything still pending and stops the worker.
    pub async fn shutdown(self) -> Result<CounterSnapshot, ClientError> {
        let _ = self.stop.send(true);
        match self.worker.await {
            Ok(result) => result,
            Err(err) => {
                warn!("counter worker failed: {err}");
                Err(ClientError::Closed)
            }
        }
    }
}

enum Wake {
    Click,
    Retry,
    Stop,
}

struct Worker<B> {
    backend: B,
    shared: Arc<Shared>,
    settings: CounterSettings,
    stop: watch::Receiver<bool>,
}

impl<B: CounterBackend> Worker<B> {
    async fn run(mut self) -> Result<CounterSnapshot, ClientError> {
        self.load_today().await;

        let mut attempt: u32 = 0;
        let mut retry_in: Option<Duration> = None;

        loop {
            let wake = tokio::select! {
                biased;
                _ = self.stop.changed() => Wake::Stop,
                _ = self.shared.wake.notified() => Wake::Click,
                _ = sleep(retry_in.unwrap_or_default()), if retry_in.is_some() => Wake::Retry,
            };

            match wake {
                Wake::Stop => break,
                Wake::Click => {
                    attempt = 0;
                    retry_in = None;
                    if self.shared.inner.lock().await.auth_required {
                        debug!("login required, holding clicks locally");
                        continue;
                    }
                    if !self.debounce().await {
                        break;
                    }
                }
                Wake::Retry => retry_in = None,
            }

            match self.sync_once().await {
                None | Some(Ok(())) => attempt = 0,
                Some(Err(err)) if err.is_retryable() && attempt < self.settings.max_retries => {
                    attempt += 1;
                    let delay = self.settings.backoff(attempt);
                    warn!(attempt, ?delay, "bead sync failed, retrying: {err}");
                    retry_in = Some(delay);
                }
                Some(Err(err)) => {
                    warn!("bead sync failed, waiting for next click: {err}");
                    attempt = 0;
                }
            }
        }

        self.drain().await
    }

    async fn load_today(&self) {
        let result = self.backend.today().await;
        let mut inner = self.shared.inner.lock().await;
        match result {
            Ok(today) => {
                if inner.counter.load(today.today_beads) {
                    debug!(beads = today.today_beads, "loaded today's count");
                }
            }
            Err(err) => {
                warn!("failed to load today's count: {err}");
                inner.auth_required = err == ClientError::Unauthorized;
                inner.last_error = Some(err.to_string());
            }
        }
        self.shared.publish(&inner);
    }

    /// Returns once clicks have been quiet for the debounce window, or early
    /// on an explicit flush. `false` means the worker was told to stop.
    async fn debounce(&mut self) -> bool {
        loop {
            tokio::select! {
                biased;
                _ = self.stop.changed() => return false,
                _ = self.shared.flush.notified() => return true,
                _ = self.shared.wake.notified() => continue,
                _ = sleep(self.settings.debounce) => return true,
            }
        }
    }

    /// Sends one batch if there is anything to send.
    async fn sync_once(&self) -> Option<Result<(), ClientError>> {
        let batch = {
            let mut inner = self.shared.inner.lock().await;
            let batch = inner.counter.take_batch()?;
            inner.syncing = true;
            self.shared.publish(&inner);
            batch
        };

        let (direction, count) = batch.request();
        debug!(batch = batch.id, delta = batch.delta, "syncing bead batch");
        let result = match direction {
            Direction::Increment => self.backend.increment(count).await,
            Direction::Decrement => self.backend.decrement(count).await,
        };

        let mut inner = self.shared.inner.lock().await;
        inner.syncing = false;
        let result = match result {
            Ok(totals) => {
                inner.counter.confirm(batch.id, totals);
                inner.last_error = None;
                inner.auth_required = false;
                Ok(())
            }
            Err(err) => {
                inner.counter.reject(batch.id);
                inner.auth_required = err == ClientError::Unauthorized;
                inner.last_error = Some(err.to_string());
                Err(err)
            }
        };
        self.shared.publish(&inner);
        Some(result)
    }

    async fn drain(&self) -> Result<CounterSnapshot, ClientError> {
        while let Some(result) = self.sync_once().await {
            result?;
        }
        let snapshot = self.shared.inner.lock().await.snapshot();
        info!(beads = snapshot.display, "counter flushed");
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use tokio::time::timeout;

    #[derive(Default)]
    struct FakeState {
        total: StdMutex<u64>,
        calls: StdMutex<Vec<(Direction, u64)>>,
        failures: StdMutex<VecDeque<ClientError>>,
        delay: Duration,
    }

    #[derive(Clone, Default)]
    struct FakeBackend(Arc<FakeState>);

    impl FakeBackend {
        fn with_total(total: u64) -> Self {
            Self::with_delay(total, Duration::ZERO)
        }

        fn with_delay(total: u64, delay: Duration) -> Self {
            Self(Arc::new(FakeState {
                total: StdMutex::new(total),
                delay,
                ..FakeState::default()
            }))
        }

        fn fail_next(&self, err: ClientError) {
            self.0.failures.lock().unwrap().push_back(err);
        }

        fn calls(&self) -> Vec<(Direction, u64)> {
            self.0.calls.lock().unwrap().clone()
        }

        async fn apply(&self, direction: Direction, beads: u64) -> Result<CounterTotals, ClientError> {
            if !self.0.delay.is_zero() {
                sleep(self.0.delay).await;
            }
            self.0.calls.lock().unwrap().push((direction, beads));
            let failure = self.0.failures.lock().unwrap().pop_front();
            if let Some(err) = failure {
                return Err(err);
            }

            let mut total = self.0.total.lock().unwrap();
            *total = match direction {
                Direction::Increment => *total + beads,
                Direction::Decrement => total.saturating_sub(beads),
            };
            Ok(CounterTotals {
                today_beads: *total,
                today_rounds: *total / 108,
                life_time_beads: *total,
                life_time_rounds: *total / 108,
            })
        }
    }

    impl CounterBackend for FakeBackend {
        async fn today(&self) -> Result<TodayProgress, ClientError> {
            let total = *self.0.total.lock().unwrap();
            Ok(TodayProgress {
                today_beads: total,
                today_rounds: total / 108,
            })
        }

        async fn increment(&self, beads: u64) -> Result<CounterTotals, ClientError> {
            self.apply(Direction::Increment, beads).await
        }

        async fn decrement(&self, beads: u64) -> Result<CounterTotals, ClientError> {
            self.apply(Direction::Decrement, beads).await
        }
    }

    fn settings() -> CounterSettings {
        CounterSettings {
            debounce: Duration::from_millis(500),
            retry_base: Duration::from_secs(1),
            retry_max: Duration::from_secs(8),
            max_retries: 3,
        }
    }

    async fn loaded(backend: &FakeBackend) -> CounterSync {
        loaded_with(backend, settings()).await
    }

    async fn loaded_with(backend: &FakeBackend, settings: CounterSettings) -> CounterSync {
        let sync = CounterSync::start(backend.clone(), settings);
        let mut rx = sync.subscribe();
        timeout(Duration::from_secs(5), rx.wait_for(|s| s.confirmed.is_some()))
            .await
            .expect("initial load timed out")
            .expect("worker gone");
        sync
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_clicks_go_out_as_one_batch() {
        let backend = FakeBackend::with_total(10);
        let sync = loaded(&backend).await;

        for _ in 0..3 {
            sync.increment().await;
            sleep(Duration::from_millis(100)).await;
        }
        assert!(backend.calls().is_empty());
        assert_eq!(sync.snapshot().display, 13);

        sleep(Duration::from_millis(600)).await;
        assert_eq!(backend.calls(), vec![(Direction::Increment, 3)]);

        let snapshot = sync.snapshot();
        assert_eq!(snapshot.confirmed, Some(13));
        assert_eq!(snapshot.display, 13);
        assert_eq!(snapshot.pending, 0);
        assert!(!snapshot.syncing);
    }

    #[tokio::test(start_paused = true)]
    async fn clicks_during_flight_follow_in_next_batch() {
        let backend = FakeBackend::with_delay(10, Duration::from_secs(1));
        let sync = loaded(&backend).await;

        sync.increment().await;
        sync.increment().await;
        sleep(Duration::from_millis(600)).await;
        assert!(sync.snapshot().syncing);

        let outcome = sync.increment().await;
        assert_eq!(outcome.display, 13);

        sleep(Duration::from_secs(5)).await;
        assert_eq!(
            backend.calls(),
            vec![(Direction::Increment, 2), (Direction::Increment, 1)]
        );
        assert_eq!(sync.snapshot().confirmed, Some(13));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_batch_is_retried_after_backoff() {
        let backend = FakeBackend::with_total(10);
        backend.fail_next(ClientError::Transport("connection reset".into()));
        let sync = loaded(&backend).await;

        sync.increment().await;
        sleep(Duration::from_millis(600)).await;

        let snapshot = sync.snapshot();
        assert_eq!(backend.calls().len(), 1);
        assert_eq!(snapshot.display, 11);
        assert_eq!(snapshot.pending, 1);
        assert_eq!(snapshot.confirmed, Some(10));
        assert!(snapshot.last_error.is_some());

        sleep(Duration::from_millis(1_100)).await;
        let snapshot = sync.snapshot();
        assert_eq!(backend.calls().len(), 2);
        assert_eq!(snapshot.confirmed, Some(11));
        assert_eq!(snapshot.pending, 0);
        assert!(snapshot.last_error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn retries_stop_after_max_attempts_until_next_click() {
        let backend = FakeBackend::with_total(10);
        for _ in 0..5 {
            backend.fail_next(ClientError::Transport("offline".into()));
        }
        let sync = loaded(&backend).await;

        // First send at 0.5s, retries after 1s, 2s and 4s.
        sync.increment().await;
        sleep(Duration::from_secs(10)).await;
        assert_eq!(backend.calls().len(), 1 + settings().max_retries as usize);

        sleep(Duration::from_secs(60)).await;
        assert_eq!(backend.calls().len(), 4);
        let snapshot = sync.snapshot();
        assert_eq!(snapshot.pending, 1);
        assert_eq!(snapshot.display, 11);

        sync.increment().await;
        sleep(Duration::from_millis(600)).await;
        assert_eq!(backend.calls().len(), 5);

        sleep(Duration::from_secs(1)).await;
        assert_eq!(backend.calls()[5], (Direction::Increment, 2));
        assert_eq!(sync.snapshot().confirmed, Some(12));
    }

    #[tokio::test(start_paused = true)]
    async fn click_during_backoff_restarts_debounce_and_attempts() {
        let backend = FakeBackend::with_total(10);
        backend.fail_next(ClientError::Transport("offline".into()));
        backend.fail_next(ClientError::Transport("offline".into()));
        let sync = loaded(&backend).await;

        // Fails at 0.5s; its retry would be due at 1.5s.
        sync.increment().await;
        sleep(Duration::from_millis(600)).await;
        assert_eq!(backend.calls().len(), 1);

        // Click at 0.6s: the retry is dropped and a fresh debounce ends at 1.1s.
        sync.increment().await;
        sleep(Duration::from_millis(400)).await;
        assert_eq!(backend.calls().len(), 1);

        sleep(Duration::from_millis(200)).await;
        assert_eq!(
            backend.calls(),
            vec![(Direction::Increment, 1), (Direction::Increment, 2)]
        );

        // Second failure is attempt 1 again, so the retry comes after 1s, not 2s.
        sleep(Duration::from_millis(800)).await;
        assert_eq!(backend.calls().len(), 2);
        sleep(Duration::from_millis(200)).await;
        assert_eq!(backend.calls().len(), 3);
        assert_eq!(sync.snapshot().confirmed, Some(12));
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_batch_waits_for_next_click() {
        let backend = FakeBackend::with_total(10);
        backend.fail_next(ClientError::Api {
            status: 400,
            message: "bad request".into(),
        });
        let sync = loaded(&backend).await;

        sync.increment().await;
        sleep(Duration::from_secs(10)).await;
        assert_eq!(backend.calls().len(), 1);
        assert_eq!(sync.snapshot().pending, 1);

        sync.increment().await;
        sleep(Duration::from_secs(1)).await;
        assert_eq!(
            backend.calls(),
            vec![(Direction::Increment, 1), (Direction::Increment, 2)]
        );
        assert_eq!(sync.snapshot().confirmed, Some(12));
    }

    #[tokio::test(start_paused = true)]
    async fn unauthorized_holds_clicks_and_flags_login() {
        let backend = FakeBackend::with_total(10);
        backend.fail_next(ClientError::Unauthorized);
        let sync = loaded(&backend).await;

        sync.increment().await;
        sleep(Duration::from_secs(1)).await;
        assert!(sync.snapshot().auth_required);

        sync.increment().await;
        sleep(Duration::from_secs(5)).await;
        assert_eq!(backend.calls().len(), 1);

        let snapshot = sync.snapshot();
        assert_eq!(snapshot.pending, 2);
        assert_eq!(snapshot.display, 12);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_flushes_without_waiting() {
        let backend = FakeBackend::with_total(10);
        let sync = loaded(&backend).await;

        sync.increment().await;
        sync.increment().await;
        let snapshot = sync.shutdown().await.expect("flush");

        assert_eq!(backend.calls(), vec![(Direction::Increment, 2)]);
        assert_eq!(snapshot.confirmed, Some(12));
        assert_eq!(snapshot.pending, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_reports_flush_failure() {
        let backend = FakeBackend::with_total(10);
        backend.fail_next(ClientError::Transport("offline".into()));
        let sync = loaded(&backend).await;

        sync.decrement().await;
        let err = sync.shutdown().await.unwrap_err();
        assert_eq!(err, ClientError::Transport("offline".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn flush_now_skips_debounce() {
        let backend = FakeBackend::with_total(4);
        let sync = loaded_with(
            &backend,
            CounterSettings {
                debounce: Duration::from_secs(60),
                ..settings()
            },
        )
        .await;

        sync.decrement().await;
        sync.flush_now();
        sleep(Duration::from_millis(50)).await;

        assert_eq!(backend.calls(), vec![(Direction::Decrement, 1)]);
        assert_eq!(sync.snapshot().confirmed, Some(3));
    }
}
