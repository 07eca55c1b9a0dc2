//! StuckEngine - the entry point hosts talk to.
//!
//! The engine owns the tracker store, the alert registry and the event bus.
//! Every public call takes the state lock, runs to completion, queues the
//! events it produced while still holding the lock, and delivers them after
//! releasing it. That gives callers the run-to-completion guarantee (two calls
//! for the same repository never interleave) without ever calling subscriber
//! code under the lock.
//!
//! Delivery drains one shared queue on whichever thread gets there first, so
//! subscribers see events in the order the state changed even when the
//! ticker and callers race. A call made from inside a subscriber queues its
//! events behind the one being delivered.
//!
//! A background ticker re-evaluates all trackers once per
//! [`TICK_INTERVAL`] to catch purely time-based conditions and to escalate
//! ongoing alerts.
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use stuck_core::{StuckConfig, StuckEngine};
//! use stuck_protocol::{RepoStateUpdate, TaskStatus};
//!
//! let engine = StuckEngine::new(StuckConfig::default());
//! engine.start();
//! engine.update_repo_state(
//!     RepoStateUpdate::new("repo-1", "api", TaskStatus::Running)
//!         .with_session("session-1")
//!         .with_output(),
//! );
//! let status = engine.get_status();
//! ```

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use stuck_protocol::{
    EventKind, RepoStateUpdate, StuckAlert, StuckEvent, StuckReason, StuckStatus,
};
use tracing::{debug, info, warn};

use crate::alerts::AlertRegistry;
use crate::clock::{Clock, SystemClock};
use crate::config::{StuckConfig, StuckConfigPatch};
use crate::detection::{classify, is_evaluable};
use crate::error::Result;
use crate::events::{EventBus, SubscriptionId};
use crate::tracker::{Tracker, TrackerSnapshot};

pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

pub struct StuckEngine {
    inner: Arc<EngineInner>,
    ticker: Mutex<Option<Ticker>>,
}

struct EngineInner {
    state: Mutex<EngineState>,
    events: EventBus,
    pending: Mutex<PendingEvents>,
    clock: Arc<dyn Clock>,
}

/// Events waiting for delivery, in state-change order.
#[derive(Default)]
struct PendingEvents {
    queue: VecDeque<StuckEvent>,
    draining: bool,
}

struct Ticker {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

impl StuckEngine {
    pub fn new(config: StuckConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Used for tests and replays that drive time themselves.
    pub fn with_clock(config: StuckConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                state: Mutex::new(EngineState::new(config)),
                events: EventBus::new(),
                pending: Mutex::new(PendingEvents::default()),
                clock,
            }),
            ticker: Mutex::new(None),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Producer API
    // ─────────────────────────────────────────────────────────────────────────────

    /// Ingests a status/output report from the orchestrator.
    pub fn update_repo_state(&self, update: RepoStateUpdate) {
        self.inner
            .mutate(|state, now, out| state.update_repo_state(update, now, out));
    }

    /// Raw activity that does not change status.
    pub fn record_output(&self, repository_id: &str) {
        self.inner
            .mutate(|state, now, out| state.record_output(repository_id, now, out));
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Consumer API
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn get_status(&self) -> StuckStatus {
        let now = self.inner.clock.now();
        self.inner.lock().alerts.status(now)
    }

    pub fn get_alert_for_repo(&self, repository_id: &str) -> Option<StuckAlert> {
        let now = self.inner.clock.now();
        let state = self.inner.lock();
        let mut alert = state.alerts.get(repository_id)?.clone();
        alert.stuck_duration_seconds = (now - alert.detected_at).num_seconds().max(0) as u64;
        Some(alert)
    }

    /// Returns whether an alert existed for the repository.
    pub fn acknowledge_alert(&self, repository_id: &str) -> bool {
        self.inner
            .mutate(|state, _, out| state.acknowledge(repository_id, out))
    }

    pub fn get_tracker(&self, repository_id: &str) -> Option<TrackerSnapshot> {
        self.inner
            .lock()
            .trackers
            .get(repository_id)
            .map(Tracker::snapshot)
    }

    pub fn tracked_repo_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.lock().trackers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Drops a repository's tracker, resolving its alert first.
    pub fn forget_repo(&self, repository_id: &str) -> bool {
        self.inner
            .mutate(|state, now, out| state.forget(repository_id, now, out))
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Subscriptions
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&StuckEvent) -> Result<()> + Send + Sync + 'static,
    {
        self.inner.events.subscribe(callback)
    }

    pub fn subscribe_kind<F>(&self, kind: EventKind, callback: F) -> SubscriptionId
    where
        F: Fn(&StuckEvent) -> Result<()> + Send + Sync + 'static,
    {
        self.inner.events.subscribe_kind(kind, callback)
    }

    pub fn subscribe_channel(&self) -> Receiver<StuckEvent> {
        self.inner.events.subscribe_channel()
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.events.unsubscribe(id)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Configuration
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn get_config(&self) -> StuckConfig {
        self.inner.lock().config.clone()
    }

    /// Merges `patch` into the running configuration. Callers validate first.
    pub fn update_config(&self, patch: StuckConfigPatch) {
        self.inner
            .mutate(|state, now, out| state.apply_config(&patch, now, out));
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Evaluation loop
    // ─────────────────────────────────────────────────────────────────────────────

    /// Runs one evaluation pass over every tracker.
    pub fn tick(&self) {
        self.inner.tick();
    }

    /// Starts the periodic evaluation loop. Idempotent.
    pub fn start(&self) {
        self.start_with_interval(TICK_INTERVAL);
    }

    pub fn start_with_interval(&self, interval: Duration) {
        let mut ticker = self.ticker_slot();
        if ticker.is_some() {
            return;
        }

        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let inner = Arc::clone(&self.inner);
        let spawned = thread::Builder::new()
            .name("stuck-detection".to_string())
            .spawn(move || run_ticker(inner, stop_rx, interval));

        match spawned {
            Ok(handle) => {
                info!(interval_ms = interval.as_millis() as u64, "Stuck detection loop started");
                *ticker = Some(Ticker { stop_tx, handle });
            }
            Err(err) => {
                warn!(error = %err, "Failed to spawn stuck detection loop");
            }
        }
    }

    /// Stops the loop. A tick already running finishes first. Idempotent.
    pub fn stop(&self) {
        let ticker = self.ticker_slot().take();
        let Some(ticker) = ticker else {
            return;
        };
        let _ = ticker.stop_tx.send(());
        // A subscriber on the loop thread may call stop(); joining would deadlock.
        if ticker.handle.thread().id() != thread::current().id() {
            let _ = ticker.handle.join();
        }
        info!("Stuck detection loop stopped");
    }

    pub fn is_running(&self) -> bool {
        self.ticker_slot().is_some()
    }

    fn ticker_slot(&self) -> MutexGuard<'_, Option<Ticker>> {
        self.ticker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for StuckEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_ticker(inner: Arc<EngineInner>, stop_rx: Receiver<()>, interval: Duration) {
    loop {
        match stop_rx.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => inner.tick(),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

impl EngineInner {
    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn pending(&self) -> MutexGuard<'_, PendingEvents> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Applies a state change under the lock, then delivers what it emitted.
    fn mutate<R>(&self, apply: impl FnOnce(&mut EngineState, DateTime<Utc>, &mut Outbox) -> R) -> R {
        let now = self.clock.now();
        let mut out = Outbox::default();
        let result = {
            let mut state = self.lock();
            let result = apply(&mut state, now, &mut out);
            out.finish(&state, now);
            // Queued under the state lock so queue order is state order.
            if !out.events.is_empty() {
                self.pending().queue.extend(out.events);
            }
            result
        };
        self.deliver_pending();
        result
    }

    /// Delivers queued events unless another thread (or an outer frame of
    /// this one) is already draining; that drainer picks ours up too.
    fn deliver_pending(&self) {
        {
            let mut pending = self.pending();
            if pending.draining || pending.queue.is_empty() {
                return;
            }
            pending.draining = true;
        }
        loop {
            let event = {
                let mut pending = self.pending();
                match pending.queue.pop_front() {
                    Some(event) => event,
                    None => {
                        pending.draining = false;
                        return;
                    }
                }
            };
            self.events.publish(&event);
        }
    }

    fn tick(&self) {
        self.mutate(|state, now, out| {
            state.evaluate_all(now, out);
            state.evict_idle(now);
            // Periodic snapshot so consumers see durations move.
            if !state.alerts.is_empty() {
                out.touch();
            }
        });
    }
}

/// Events produced by one public call, queued before the lock is released.
#[derive(Default)]
struct Outbox {
    events: Vec<StuckEvent>,
    status_dirty: bool,
}

impl Outbox {
    fn push(&mut self, event: StuckEvent) {
        self.events.push(event);
        self.status_dirty = true;
    }

    /// Requests an aggregate update without a lifecycle event.
    fn touch(&mut self) {
        self.status_dirty = true;
    }

    /// One aggregate update closes every batch that changed something.
    fn finish(&mut self, state: &EngineState, now: DateTime<Utc>) {
        if self.status_dirty {
            self.events.push(StuckEvent::StatusUpdated {
                status: state.alerts.status(now),
            });
        }
    }
}

struct EngineState {
    config: StuckConfig,
    trackers: HashMap<String, Tracker>,
    alerts: AlertRegistry,
}

impl EngineState {
    fn new(config: StuckConfig) -> Self {
        Self {
            config,
            trackers: HashMap::new(),
            alerts: AlertRegistry::new(),
        }
    }

    fn update_repo_state(&mut self, update: RepoStateUpdate, now: DateTime<Utc>, out: &mut Outbox) {
        if !self.config.enabled || self.config.is_excluded(&update.repository_id) {
            return;
        }

        let repository_id = update.repository_id.clone();
        let tracker = self
            .trackers
            .entry(repository_id.clone())
            .or_insert_with(|| {
                debug!(repository_id = %update.repository_id, "Tracking repository");
                Tracker::new(&update.repository_id, &update.repository_name, now)
            });

        tracker.repository_name = update.repository_name;
        let session_changed = tracker.session_id != update.session_id;
        tracker.session_id = update.session_id;
        tracker.task_id = update.task_id;
        let gate_changed = tracker.blocked_qa_gate != update.blocked_qa_gate;
        tracker.blocked_qa_gate = update.blocked_qa_gate;
        tracker.updated_at = now;
        if update.has_output {
            tracker.record_output(now);
        }

        let mut needs_evaluation = gate_changed || session_changed;
        if tracker.needs_transition(update.status) {
            let transition = tracker.apply_transition(update.status, now);
            debug!(
                repository_id = %repository_id,
                from = transition.from.map(|s| s.as_str()).unwrap_or("none"),
                to = transition.to.as_str(),
                consecutive_failures = transition.consecutive_failures,
                "Status transition"
            );
            if transition.entered_terminal() && tracker.is_stuck() {
                self.resolve(&repository_id, now, out);
            }
            needs_evaluation = true;
        } else if update.has_output && tracker.stuck_reason() == Some(StuckReason::NoOutput) {
            self.resolve(&repository_id, now, out);
        }

        if needs_evaluation {
            self.evaluate(&repository_id, now, out);
        }
    }

    fn record_output(&mut self, repository_id: &str, now: DateTime<Utc>, out: &mut Outbox) {
        if !self.config.enabled {
            return;
        }
        let Some(tracker) = self.trackers.get_mut(repository_id) else {
            return;
        };
        tracker.record_output(now);
        tracker.updated_at = now;
        if tracker.stuck_reason() == Some(StuckReason::NoOutput) {
            self.resolve(repository_id, now, out);
        }
    }

    fn acknowledge(&mut self, repository_id: &str, out: &mut Outbox) -> bool {
        let existed = self.alerts.acknowledge(repository_id);
        if existed {
            info!(repository_id = %repository_id, "Stuck alert acknowledged");
            out.touch();
        }
        existed
    }

    /// Re-classifies one tracker and reconciles its alert with the result.
    fn evaluate(&mut self, repository_id: &str, now: DateTime<Utc>, out: &mut Outbox) {
        let Some(tracker) = self.trackers.get_mut(repository_id) else {
            return;
        };
        if !is_evaluable(tracker) {
            // Without a session nothing can stay stuck.
            if let Some(alert) = self.alerts.resolve(tracker, now) {
                log_resolved(&alert);
                out.push(StuckEvent::Resolved { alert });
            }
            return;
        }

        let previous = tracker.stuck_reason();
        let next = classify(tracker, &self.config, now);
        match (previous, next) {
            (None, None) => {}
            (None, Some(reason)) => {
                let alert = self.alerts.create(tracker, reason, now);
                log_detected(&alert);
                out.push(StuckEvent::Detected { alert });
            }
            (Some(previous), Some(reason)) if previous == reason => {
                if let Some(escalation) = self.alerts.refresh(tracker, now) {
                    info!(
                        repository_id = %repository_id,
                        reason = reason.as_str(),
                        from = escalation.previous_severity.as_str(),
                        to = escalation.alert.severity.as_str(),
                        "Stuck alert escalated"
                    );
                    out.push(StuckEvent::Escalated {
                        alert: escalation.alert,
                        previous_severity: escalation.previous_severity,
                    });
                }
            }
            (Some(_), Some(reason)) => {
                // A reason change is a new stuck period: resolve, then detect.
                if let Some(alert) = self.alerts.resolve(tracker, now) {
                    log_resolved(&alert);
                    out.push(StuckEvent::Resolved { alert });
                }
                let alert = self.alerts.create(tracker, reason, now);
                log_detected(&alert);
                out.push(StuckEvent::Detected { alert });
            }
            (Some(_), None) => {
                if let Some(alert) = self.alerts.resolve(tracker, now) {
                    log_resolved(&alert);
                    out.push(StuckEvent::Resolved { alert });
                }
            }
        }
    }

    fn evaluate_all(&mut self, now: DateTime<Utc>, out: &mut Outbox) {
        if !self.config.enabled {
            return;
        }
        let ids: Vec<String> = self.trackers.keys().cloned().collect();
        for id in ids {
            self.evaluate(&id, now, out);
        }
    }

    fn resolve(&mut self, repository_id: &str, now: DateTime<Utc>, out: &mut Outbox) {
        let Some(tracker) = self.trackers.get_mut(repository_id) else {
            return;
        };
        if let Some(alert) = self.alerts.resolve(tracker, now) {
            log_resolved(&alert);
            out.push(StuckEvent::Resolved { alert });
        }
    }

    fn forget(&mut self, repository_id: &str, now: DateTime<Utc>, out: &mut Outbox) -> bool {
        self.resolve(repository_id, now, out);
        let removed = self.trackers.remove(repository_id).is_some();
        if removed {
            debug!(repository_id = %repository_id, "Stopped tracking repository");
        }
        removed
    }

    fn apply_config(&mut self, patch: &StuckConfigPatch, now: DateTime<Utc>, out: &mut Outbox) {
        let next = self.config.merged(patch);
        let was_enabled = self.config.enabled;
        self.config = next;
        info!(
            enabled = self.config.enabled,
            no_output_threshold_seconds = self.config.no_output_threshold_seconds,
            waiting_input_threshold_seconds = self.config.waiting_input_threshold_seconds,
            repeated_failure_count = self.config.repeated_failure_count,
            sensitivity = ?self.config.sensitivity_level,
            excluded = self.config.excluded_repo_ids.len(),
            "Stuck detection config updated"
        );

        if was_enabled && !self.config.enabled {
            let ids: Vec<String> = self.trackers.keys().cloned().collect();
            for id in ids {
                self.forget(&id, now, out);
            }
            return;
        }

        let excluded: Vec<String> = self
            .trackers
            .keys()
            .filter(|id| self.config.is_excluded(id))
            .cloned()
            .collect();
        for id in excluded {
            self.forget(&id, now, out);
        }
    }

    fn evict_idle(&mut self, now: DateTime<Utc>) {
        let Some(ttl) = self.config.tracker_ttl_seconds else {
            return;
        };
        let cutoff = now - ChronoDuration::seconds(ttl.min(i64::MAX as u64) as i64);
        let before = self.trackers.len();
        self.trackers
            .retain(|_, tracker| tracker.is_stuck() || tracker.updated_at > cutoff);
        let evicted = before - self.trackers.len();
        if evicted > 0 {
            debug!(evicted, ttl_seconds = ttl, "Evicted idle trackers");
        }
    }
}

fn log_detected(alert: &StuckAlert) {
    info!(
        repository_id = %alert.repository_id,
        reason = alert.reason.as_str(),
        severity = alert.severity.as_str(),
        "Stuck session detected"
    );
}

fn log_resolved(alert: &StuckAlert) {
    info!(
        repository_id = %alert.repository_id,
        reason = alert.reason.as_str(),
        stuck_duration_seconds = alert.stuck_duration_seconds,
        "Stuck session resolved"
    );
}
