//! Main Coordinator task implementation

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::config::{CoordinatorConfig, DependencyKey, ManualTriggerMode, same_key};
use super::error::CoordinatorError;
use super::handle::{CoordinatorHandle, mark_disposed};
use super::messages::{CoordRequest, CoordinatorMetrics, FetchOutcome, TriggerKind};
use super::producer::Producer;
use super::state::FetchState;
use crate::settings::{AutoFetchSettings, SettingsStore};

/// The Coordinator keeps one [`FetchState`] fresh
///
/// It runs as its own tokio task and is the only writer of its state. Each
/// producer call runs in a separate task and reports back over a channel, so
/// the Coordinator never blocks on the producer.
pub struct Coordinator<T> {
    id: String,
    config: CoordinatorConfig,
    producer: Arc<dyn Producer<T>>,
    state: Arc<watch::Sender<FetchState<T>>>,
    rx: mpsc::UnboundedReceiver<CoordRequest>,
    outcome_tx: mpsc::UnboundedSender<FetchOutcome<T>>,
    outcome_rx: mpsc::UnboundedReceiver<FetchOutcome<T>>,
    settings_rx: watch::Receiver<AutoFetchSettings>,
    /// Last settings seen, for change detection only
    last_settings: AutoFetchSettings,
    settings_open: bool,
    enabled: bool,
    key: DependencyKey,
    in_flight: HashMap<u64, AbortHandle>,
    next_fetch_id: u64,
    next_tick: Option<Instant>,
    consecutive_failures: u32,
    metrics: CoordinatorMetrics,
}

impl<T> Coordinator<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Validate the config, start the Coordinator task and begin the first fetch
    ///
    /// The returned handle already reports `is_loading == true`. Must be
    /// called from within a tokio runtime.
    pub fn spawn<P>(
        producer: P,
        config: CoordinatorConfig,
        settings: &SettingsStore,
    ) -> Result<CoordinatorHandle<T>, CoordinatorError>
    where
        P: Producer<T> + 'static,
    {
        Self::spawn_shared(Arc::new(producer), config, settings)
    }

    /// Like [`Coordinator::spawn`] for a producer shared with other owners
    pub fn spawn_shared(
        producer: Arc<dyn Producer<T>>,
        config: CoordinatorConfig,
        settings: &SettingsStore,
    ) -> Result<CoordinatorHandle<T>, CoordinatorError> {
        config.validate()?;

        let id = Uuid::now_v7().to_string();
        debug!(%id, ?config, "Coordinator::spawn: called");

        let mut initial = FetchState::default();
        initial.begin();
        let (state_tx, _) = watch::channel(initial);
        let state = Arc::new(state_tx);

        let (tx, rx) = mpsc::unbounded_channel();
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let mut settings_rx = settings.subscribe();
        let last_settings = *settings_rx.borrow_and_update();

        let coordinator = Self {
            id: id.clone(),
            enabled: config.enabled,
            key: config.dependency_key.clone(),
            config,
            producer,
            state: Arc::clone(&state),
            rx,
            outcome_tx,
            outcome_rx,
            settings_rx,
            last_settings,
            settings_open: true,
            in_flight: HashMap::new(),
            next_fetch_id: 0,
            next_tick: None,
            consecutive_failures: 0,
            metrics: CoordinatorMetrics::default(),
        };

        tokio::spawn(coordinator.run());
        Ok(CoordinatorHandle::new(id, tx, state))
    }

    /// Run the Coordinator task until disposed or every handle is dropped
    async fn run(mut self) {
        info!(id = %self.id, enabled = self.enabled, "Coordinator started");

        self.start_fetch(TriggerKind::Initial);
        self.arm_timer();

        loop {
            let deadline = self.next_tick;
            let tick = sleep_until(deadline.unwrap_or_else(Instant::now));

            tokio::select! {
                biased;

                req = self.rx.recv() => match req {
                    Some(CoordRequest::Dispose) | None => break,
                    Some(req) => self.handle_request(req),
                },

                Some(outcome) = self.outcome_rx.recv() => {
                    self.settle(outcome);
                }

                changed = self.settings_rx.changed(), if self.settings_open => match changed {
                    Ok(()) => {
                        let settings = *self.settings_rx.borrow_and_update();
                        self.on_settings_changed(settings);
                    }
                    Err(_) => {
                        debug!(id = %self.id, "Settings store dropped, keeping last settings");
                        self.settings_open = false;
                    }
                },

                _ = tick, if deadline.is_some() => {
                    self.on_tick();
                }
            }
        }

        self.next_tick = None;
        mark_disposed(&self.state);
        info!(id = %self.id, in_flight = self.in_flight.len(), "Coordinator disposed");
    }

    fn handle_request(&mut self, req: CoordRequest) {
        match req {
            CoordRequest::Trigger => {
                debug!(id = %self.id, "Manual trigger");
                self.start_fetch(TriggerKind::Manual);
            }

            CoordRequest::SetEnabled { enabled } => {
                if enabled == self.enabled {
                    debug!(id = %self.id, enabled, "SetEnabled: unchanged");
                    return;
                }
                info!(id = %self.id, enabled, "Coordinator polling toggled");
                self.enabled = enabled;
                // Re-enabling restarts from a full interval, it does not fetch
                self.arm_timer();
            }

            CoordRequest::DependenciesChanged { key } => {
                if same_key(&key, &self.key) {
                    debug!(id = %self.id, "Dependency key unchanged");
                    return;
                }
                debug!(id = %self.id, old = ?self.key, new = ?key, "Dependency key changed");
                self.key = key;
                self.start_fetch(TriggerKind::Dependency);
                self.arm_timer();
            }

            CoordRequest::GetMetrics { reply_tx } => {
                let mut metrics = self.metrics.clone();
                metrics.in_flight = self.in_flight.len();
                let _ = reply_tx.send(metrics);
            }

            // Handled by the run loop
            CoordRequest::Dispose => {}
        }
    }

    fn on_settings_changed(&mut self, settings: AutoFetchSettings) {
        let previous = self.last_settings;
        self.last_settings = settings;

        let follows_global_interval = self.config.interval_ms.is_none();
        let interval_changed = follows_global_interval && previous.interval_ms != settings.interval_ms;

        if previous.global_enabled != settings.global_enabled || interval_changed {
            debug!(
                id = %self.id,
                global_enabled = settings.global_enabled,
                interval_ms = settings.interval_ms,
                "Global settings changed, re-arming timer"
            );
            self.arm_timer();
        }
    }

    fn on_tick(&mut self) {
        // Settings are re-read here rather than trusted from the last change
        if !self.is_polling() {
            debug!(id = %self.id, "Tick while paused, stopping timer");
            self.next_tick = None;
            return;
        }

        if self.in_flight.is_empty() {
            self.start_fetch(TriggerKind::Scheduled);
        } else {
            self.metrics.ticks_coalesced += 1;
            debug!(id = %self.id, in_flight = self.in_flight.len(), "Tick coalesced with in-flight fetch");
        }

        self.next_tick = Some(Instant::now() + self.delay());
    }

    fn start_fetch(&mut self, kind: TriggerKind) {
        if kind == TriggerKind::Manual
            && self.config.manual_trigger == ManualTriggerMode::CancelPrevious
            && !self.in_flight.is_empty()
        {
            for (fetch_id, handle) in self.in_flight.drain() {
                debug!(id = %self.id, fetch_id, "Aborting superseded fetch");
                handle.abort();
            }
        }

        let fetch_id = self.next_fetch_id;
        self.next_fetch_id += 1;

        let producer = Arc::clone(&self.producer);
        let key = self.key.clone();
        let timeout = self.config.timeout();
        let outcome_tx = self.outcome_tx.clone();

        let task = tokio::spawn(async move {
            let result = invoke(producer, key, timeout).await;
            let _ = outcome_tx.send(FetchOutcome { fetch_id, kind, result });
        });

        self.in_flight.insert(fetch_id, task.abort_handle());
        self.metrics.fetches_started += 1;
        debug!(id = %self.id, fetch_id, ?kind, in_flight = self.in_flight.len(), "Fetch started");

        self.publish(|state| state.begin());
    }

    fn settle(&mut self, outcome: FetchOutcome<T>) {
        let FetchOutcome { fetch_id, kind, result } = outcome;

        if self.in_flight.remove(&fetch_id).is_none() {
            self.metrics.results_discarded += 1;
            debug!(id = %self.id, fetch_id, "Discarding result of superseded fetch");
            return;
        }

        let was_backing_off = self.consecutive_failures > 0;
        let failed = match &result {
            Ok(_) => {
                self.consecutive_failures = 0;
                self.metrics.fetches_succeeded += 1;
                debug!(id = %self.id, fetch_id, ?kind, "Fetch succeeded");
                false
            }
            Err(e) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                self.metrics.fetches_failed += 1;
                warn!(
                    id = %self.id,
                    fetch_id,
                    ?kind,
                    consecutive_failures = self.consecutive_failures,
                    error = %e,
                    "Fetch failed"
                );
                true
            }
        };

        self.publish(|state| state.settle(result));

        // Only automatic fetches stretch or restore the schedule; manual and
        // dependency fetches leave the pending tick where it is
        let automatic = matches!(kind, TriggerKind::Initial | TriggerKind::Scheduled);
        if automatic && (failed || was_backing_off) && self.config.backoff.is_some() && self.next_tick.is_some() {
            self.arm_timer();
        }
    }

    /// Apply a state change unless the Coordinator has been disposed
    fn publish(&self, f: impl FnOnce(&mut FetchState<T>)) {
        self.state.send_if_modified(|state| {
            if state.is_disposed() {
                return false;
            }
            f(state);
            true
        });
    }

    /// Schedule the next tick a full delay from now, or stop the timer
    fn arm_timer(&mut self) {
        self.next_tick = if self.is_polling() {
            Some(Instant::now() + self.delay())
        } else {
            None
        };
        debug!(id = %self.id, armed = self.next_tick.is_some(), "Timer re-armed");
    }

    fn current_settings(&self) -> AutoFetchSettings {
        if self.settings_open {
            *self.settings_rx.borrow()
        } else {
            self.last_settings
        }
    }

    fn is_polling(&self) -> bool {
        self.enabled && self.current_settings().global_enabled
    }

    fn interval(&self) -> Duration {
        self.config
            .interval()
            .unwrap_or_else(|| self.current_settings().interval())
    }

    fn delay(&self) -> Duration {
        let interval = self.interval();
        match &self.config.backoff {
            Some(backoff) => backoff.delay(interval, self.consecutive_failures),
            None => interval,
        }
    }
}

/// Call the producer once, applying the timeout and catching panics
async fn invoke<T>(
    producer: Arc<dyn Producer<T>>,
    key: DependencyKey,
    timeout: Option<Duration>,
) -> Result<T, CoordinatorError> {
    let call = AssertUnwindSafe(async move { producer.produce(key).await }).catch_unwind();

    let outcome = match timeout {
        Some(limit) => match tokio::time::timeout(limit, call).await {
            Ok(outcome) => outcome,
            Err(_) => return Err(CoordinatorError::Timeout(limit)),
        },
        None => call.await,
    };

    match outcome {
        Ok(Ok(data)) => Ok(data),
        Ok(Err(e)) => Err(CoordinatorError::producer(e)),
        Err(panic) => {
            let msg = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(CoordinatorError::ProducerFailure(format!("producer panicked: {}", msg)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::producer::from_fn;
    use crate::coordinator::state::FetchPhase;
    use keystore::MemoryStore;
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn settings() -> SettingsStore {
        SettingsStore::open(Arc::new(MemoryStore::new()))
    }

    fn every(ms: u64) -> CoordinatorConfig {
        CoordinatorConfig {
            interval_ms: Some(ms),
            ..Default::default()
        }
    }

    async fn wait_ms(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    /// Producer counting its calls; each call takes `delay_ms`
    fn counting(calls: Arc<AtomicUsize>, delay_ms: u64) -> impl Producer<usize> {
        from_fn(move |_key| {
            let calls = Arc::clone(&calls);
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                Ok(n)
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_fetch_then_periodic_fetch() {
        let store = settings();
        let producer = from_fn(|_key| async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(json!({"count": 1}))
        });
        let handle = Coordinator::spawn(producer, every(5000), &store).unwrap();

        let state = handle.read();
        assert!(state.is_loading);
        assert_eq!(state.phase, FetchPhase::Fetching);

        wait_ms(20).await;
        let state = handle.read();
        assert_eq!(state.data, Some(json!({"count": 1})));
        assert!(!state.is_loading);
        assert!(state.error.is_none());

        // Second automatic fetch starts at t=5000 and takes 10ms
        wait_ms(4985).await;
        assert!(handle.read().is_loading);

        wait_ms(20).await;
        assert!(!handle.read().is_loading);
        assert_eq!(handle.metrics().await.unwrap().fetches_started, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_coalesce_while_fetching() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handle = Coordinator::spawn(counting(calls.clone(), 8000), every(5000), &settings()).unwrap();

        // t=5000 tick is coalesced with the 8s initial fetch
        wait_ms(9000).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // t=10000 tick starts the second fetch
        wait_ms(2000).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let metrics = handle.metrics().await.unwrap();
        assert_eq!(metrics.ticks_coalesced, 1);
        assert_eq!(metrics.in_flight, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_retains_stale_data() {
        let calls = Arc::new(AtomicUsize::new(0));
        let producer = {
            let calls = Arc::clone(&calls);
            from_fn(move |_key| {
                let calls = Arc::clone(&calls);
                async move {
                    match calls.fetch_add(1, Ordering::SeqCst) {
                        0 => Ok("spots: 12 free".to_string()),
                        _ => Err(eyre::eyre!("502 Bad Gateway")),
                    }
                }
            })
        };
        let handle = Coordinator::spawn(producer, every(1000), &settings()).unwrap();

        wait_ms(10).await;
        assert_eq!(handle.read().data.as_deref(), Some("spots: 12 free"));

        wait_ms(1000).await;
        let state = handle.read();
        assert_eq!(state.data.as_deref(), Some("spots: 12 free"));
        assert!(matches!(state.error, Some(CoordinatorError::ProducerFailure(ref m)) if m.contains("502")));
        assert!(!state.is_loading);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_suppresses_late_result() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handle = Coordinator::spawn(counting(calls.clone(), 100), every(1000), &settings()).unwrap();

        wait_ms(50).await;
        handle.dispose();
        let at_disposal = handle.read();
        assert!(at_disposal.is_loading);
        assert_eq!(at_disposal.phase, FetchPhase::Disposed);

        wait_ms(5000).await;
        let state = handle.read();
        assert!(state.data.is_none());
        assert!(state.is_loading);
        assert_eq!(state.phase, FetchPhase::Disposed);

        // The producer call itself was not aborted, and no tick fired afterwards
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(handle.is_disposed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reenable_restarts_full_interval() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handle = Coordinator::spawn(counting(calls.clone(), 0), every(5000), &settings()).unwrap();

        wait_ms(1000).await;
        handle.set_enabled(false);
        wait_ms(3000).await;
        handle.set_enabled(true); // t=4000, no immediate fetch
        wait_ms(1).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Not at t=5000 as originally scheduled
        wait_ms(4900).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // At t=9000
        wait_ms(200).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_instance_does_not_poll_but_triggers() {
        let calls = Arc::new(AtomicUsize::new(0));
        let config = CoordinatorConfig {
            interval_ms: Some(1000),
            enabled: false,
            ..Default::default()
        };
        let handle = Coordinator::spawn(counting(calls.clone(), 0), config, &settings()).unwrap();

        wait_ms(5500).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        handle.trigger();
        wait_ms(10).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(handle.read().data, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_trigger_does_not_move_timer() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handle = Coordinator::spawn(counting(calls.clone(), 0), every(5000), &settings()).unwrap();

        wait_ms(3000).await;
        handle.trigger();
        wait_ms(10).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // Scheduled tick still lands at t=5000
        wait_ms(2000).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_manual_trigger_does_not_move_timer_with_backoff() {
        let calls = Arc::new(AtomicUsize::new(0));
        let producer = {
            let calls = Arc::clone(&calls);
            from_fn(move |_key| {
                let calls = Arc::clone(&calls);
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if n == 2 { Err(eyre::eyre!("gateway timeout")) } else { Ok(n) }
                }
            })
        };
        let config = CoordinatorConfig {
            interval_ms: Some(5000),
            backoff: Some(crate::coordinator::config::BackoffConfig { max_interval_ms: 60_000 }),
            ..Default::default()
        };
        let handle = Coordinator::spawn(producer, config, &settings()).unwrap();

        wait_ms(3000).await;
        handle.trigger();
        wait_ms(10).await;
        assert!(handle.read().error.is_some());

        // The manual failure leaves the t=5000 tick in place
        wait_ms(2090).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(handle.read().data, Some(3));
        assert!(handle.read().error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_numerically_equal_key_does_not_fetch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let config = CoordinatorConfig {
            interval_ms: Some(60_000),
            dependency_key: vec![json!(2), json!("lot-a")],
            ..Default::default()
        };
        let handle = Coordinator::spawn(counting(calls.clone(), 0), config, &settings()).unwrap();

        wait_ms(10).await;
        handle
            .notify_dependencies_changed(vec![json!(2.0), json!("lot-a")])
            .unwrap();
        wait_ms(10).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        handle
            .notify_dependencies_changed(vec![json!(2.5), json!("lot-a")])
            .unwrap();
        wait_ms(10).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_manual_trigger_last_to_complete_wins() {
        let calls = Arc::new(AtomicUsize::new(0));
        let producer = {
            let calls = Arc::clone(&calls);
            from_fn(move |_key| {
                let calls = Arc::clone(&calls);
                async move {
                    let (delay, value) = match calls.fetch_add(1, Ordering::SeqCst) {
                        0 => (200, "slow"),
                        _ => (50, "fast"),
                    };
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    Ok(value)
                }
            })
        };
        let handle = Coordinator::spawn(producer, every(60_000), &settings()).unwrap();

        wait_ms(10).await;
        handle.trigger();

        wait_ms(100).await; // t=110: the manual call settled first
        assert_eq!(handle.read().data, Some("fast"));
        assert!(!handle.read().is_loading);

        wait_ms(200).await; // t=310: the initial call settled last
        assert_eq!(handle.read().data, Some("slow"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_previous_discards_superseded_fetch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let producer = {
            let calls = Arc::clone(&calls);
            from_fn(move |_key| {
                let calls = Arc::clone(&calls);
                async move {
                    let (delay, value) = match calls.fetch_add(1, Ordering::SeqCst) {
                        0 => (200, "stale"),
                        _ => (50, "fresh"),
                    };
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    Ok(value)
                }
            })
        };
        let config = CoordinatorConfig {
            interval_ms: Some(60_000),
            manual_trigger: ManualTriggerMode::CancelPrevious,
            ..Default::default()
        };
        let handle = Coordinator::spawn(producer, config, &settings()).unwrap();

        wait_ms(10).await;
        handle.trigger();
        wait_ms(500).await;

        assert_eq!(handle.read().data, Some("fresh"));
        let metrics = handle.metrics().await.unwrap();
        assert_eq!(metrics.fetches_succeeded, 1);
        assert_eq!(metrics.in_flight, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dependency_change_forces_fetch_and_last_wins() {
        let producer = from_fn(|key: DependencyKey| async move {
            let page = key.first().and_then(Value::as_u64).unwrap_or(0);
            // Page 1 is slow, page 2 is fast
            let delay = if page == 1 { 300 } else { 20 };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok(format!("page {}", page))
        });
        let config = CoordinatorConfig {
            interval_ms: Some(60_000),
            dependency_key: vec![json!(1)],
            ..Default::default()
        };
        let handle = Coordinator::spawn(producer, config, &settings()).unwrap();

        wait_ms(10).await;
        handle.notify_dependencies_changed(vec![json!(2)]).unwrap();

        wait_ms(50).await;
        assert_eq!(handle.read().data.as_deref(), Some("page 2"));

        wait_ms(300).await;
        assert_eq!(handle.read().data.as_deref(), Some("page 1"));
        assert_eq!(handle.metrics().await.unwrap().fetches_started, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_dependency_key_does_not_fetch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let config = CoordinatorConfig {
            interval_ms: Some(60_000),
            dependency_key: vec![json!("lot-a"), json!(3)],
            ..Default::default()
        };
        let handle = Coordinator::spawn(counting(calls.clone(), 0), config, &settings()).unwrap();

        wait_ms(10).await;
        handle
            .notify_dependencies_changed(vec![json!("lot-a"), json!(3)])
            .unwrap();
        wait_ms(10).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert!(handle.notify_dependencies_changed(vec![json!([1, 2])]).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dependency_change_restarts_timer() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handle = Coordinator::spawn(counting(calls.clone(), 0), every(5000), &settings()).unwrap();

        wait_ms(4000).await;
        handle.notify_dependencies_changed(vec![json!("B")]).unwrap();
        wait_ms(10).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // Old t=5000 tick is gone; next lands at t=9000
        wait_ms(4800).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        wait_ms(300).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_global_settings_reach_running_coordinator() {
        let store = settings();
        store.set_interval(2000).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let _handle = Coordinator::spawn(counting(calls.clone(), 0), CoordinatorConfig::default(), &store).unwrap();

        wait_ms(2100).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        store.set_global_enabled(false);
        wait_ms(10_000).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // Re-enabled at t=12100 with a 1s interval
        store.set_interval(1000).unwrap();
        store.set_global_enabled(true);
        wait_ms(1050).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_turns_hung_producer_into_error() {
        let producer = from_fn(|_key| async {
            futures::future::pending::<()>().await;
            Ok(0u8)
        });
        let config = CoordinatorConfig {
            interval_ms: Some(60_000),
            timeout_ms: Some(1000),
            ..Default::default()
        };
        let handle = Coordinator::spawn(producer, config, &settings()).unwrap();

        wait_ms(1100).await;
        let state = handle.read();
        assert!(!state.is_loading);
        assert_eq!(state.error, Some(CoordinatorError::Timeout(Duration::from_secs(1))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_producer_is_reported() {
        let producer = from_fn(|_key| async {
            if true {
                panic!("lot sensor offline");
            }
            Ok(0u8)
        });
        let handle = Coordinator::spawn(producer, every(60_000), &settings()).unwrap();

        wait_ms(10).await;
        let state = handle.read();
        assert!(!state.is_loading);
        assert!(matches!(state.error, Some(CoordinatorError::ProducerFailure(ref m)) if m.contains("lot sensor offline")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_stretches_schedule_and_resets() {
        let calls = Arc::new(AtomicUsize::new(0));
        let producer = {
            let calls = Arc::clone(&calls);
            from_fn(move |_key| {
                let calls = Arc::clone(&calls);
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if n <= 2 { Err(eyre::eyre!("down")) } else { Ok(n) }
                }
            })
        };
        let config = CoordinatorConfig {
            interval_ms: Some(1000),
            backoff: Some(crate::coordinator::config::BackoffConfig { max_interval_ms: 10_000 }),
            ..Default::default()
        };
        let handle = Coordinator::spawn(producer, config, &settings()).unwrap();

        // Initial failure at t=0 pushes the first tick to t=2000
        wait_ms(1500).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        wait_ms(600).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // Second failure at t=2000 pushes the next tick to t=6000
        wait_ms(3800).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        wait_ms(200).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(handle.read().data, Some(3));

        // Success resets: next tick one interval later at t=7000
        wait_ms(1000).await;
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_invalid_configuration_fails_fast() {
        let producer = from_fn(|_key| async { Ok(()) });
        let result = Coordinator::spawn(producer, every(0), &settings());
        assert!(matches!(result, Err(CoordinatorError::InvalidConfiguration(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handles_disposes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handle = Coordinator::spawn(counting(calls.clone(), 0), every(1000), &settings()).unwrap();
        let mut rx = handle.subscribe();
        drop(handle);

        wait_ms(10).await;
        assert!(rx.borrow_and_update().is_disposed());

        wait_ms(5000).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
