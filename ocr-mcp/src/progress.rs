//! Progress tracking for a single recognition call.
//!
//! Backend calls are long and opaque, so besides explicit [`ProgressTracker::update`]
//! steps the tracker can run a heartbeat task that re-emits the latest state on a
//! fixed interval. That keeps a caller-side timeout from firing while the backend
//! produces no signal of its own.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::models::ProgressSnapshot;

/// `(percentage, stage, message)`. May be invoked from any thread.
pub type ProgressCallback = Arc<dyn Fn(f64, &str, &str) + Send + Sync>;

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_HEARTBEAT_STOP_WAIT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeartbeatSettings {
    pub interval: Duration,
    /// Upper bound `stop_heartbeat` waits for the task to exit.
    pub stop_wait: Duration,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_HEARTBEAT_INTERVAL,
            stop_wait: DEFAULT_HEARTBEAT_STOP_WAIT,
        }
    }
}

/// Wraps the last real message for heartbeat emission.
pub fn heartbeat_message(last_message: &str) -> String {
    if last_message.is_empty() {
        "Still processing...".to_string()
    } else {
        format!("Still processing: {last_message}")
    }
}

fn heartbeat_due(last_emit: Instant, now: Instant, interval: Duration) -> bool {
    now.saturating_duration_since(last_emit) >= interval
}

struct CurrentState {
    snapshot: Arc<ProgressSnapshot>,
    last_emit: Instant,
}

/// State read by the heartbeat task. The snapshot is always replaced whole.
struct Shared {
    current: Mutex<CurrentState>,
    callback: Option<ProgressCallback>,
}

impl Shared {
    fn emit(&self, percentage: f64, stage: &str, message: &str) {
        let Some(callback) = &self.callback else {
            return;
        };

        if catch_unwind(AssertUnwindSafe(|| callback(percentage, stage, message))).is_err() {
            warn!(stage = %stage, "Progress callback panicked, ignoring");
        }
    }

    fn replace(&self, snapshot: Arc<ProgressSnapshot>) {
        match self.current.lock() {
            Ok(mut current) => {
                current.snapshot = snapshot;
                current.last_emit = Instant::now();
            }
            Err(poisoned) => {
                let mut current = poisoned.into_inner();
                current.snapshot = snapshot;
                current.last_emit = Instant::now();
            }
        }
    }

    fn current(&self) -> Arc<ProgressSnapshot> {
        match self.current.lock() {
            Ok(current) => Arc::clone(&current.snapshot),
            Err(poisoned) => Arc::clone(&poisoned.into_inner().snapshot),
        }
    }

    /// One heartbeat check. Returns whether a heartbeat was emitted.
    fn heartbeat_tick(&self, interval: Duration) -> bool {
        let snapshot = {
            let mut current = match self.current.lock() {
                Ok(current) => current,
                Err(poisoned) => poisoned.into_inner(),
            };
            let now = Instant::now();
            if !heartbeat_due(current.last_emit, now, interval) {
                return false;
            }
            current.last_emit = now;
            Arc::clone(&current.snapshot)
        };

        let message = heartbeat_message(&snapshot.message);
        debug!(
            percentage = snapshot.percentage,
            stage = %snapshot.stage,
            "Heartbeat"
        );
        self.emit(snapshot.percentage, &snapshot.stage, &message);
        true
    }
}

struct Heartbeat {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

pub struct ProgressTracker {
    shared: Arc<Shared>,
    history: Vec<ProgressSnapshot>,
    settings: HeartbeatSettings,
    heartbeat: Option<Heartbeat>,
}

impl ProgressTracker {
    pub fn new(callback: Option<ProgressCallback>) -> Self {
        Self::with_settings(callback, HeartbeatSettings::default())
    }

    pub fn with_settings(callback: Option<ProgressCallback>, settings: HeartbeatSettings) -> Self {
        Self {
            shared: Arc::new(Shared {
                current: Mutex::new(CurrentState {
                    snapshot: Arc::new(ProgressSnapshot::new(0.0, "", "")),
                    last_emit: Instant::now(),
                }),
                callback,
            }),
            history: Vec::new(),
            settings,
            heartbeat: None,
        }
    }

    /// Record a progress step and notify the callback synchronously.
    pub fn update(&mut self, percentage: f64, stage: &str, message: &str) {
        let mut snapshot = ProgressSnapshot::new(percentage, stage, message);
        if let Some(last) = self.history.last() {
            if snapshot.timestamp < last.timestamp {
                snapshot.timestamp = last.timestamp;
            }
        }

        let percentage = snapshot.percentage;
        self.shared.replace(Arc::new(snapshot.clone()));
        self.history.push(snapshot);
        self.shared.emit(percentage, stage, message);
    }

    pub fn current(&self) -> ProgressSnapshot {
        self.shared.current().as_ref().clone()
    }

    pub fn history(&self) -> &[ProgressSnapshot] {
        &self.history
    }

    pub fn into_history(mut self) -> Vec<ProgressSnapshot> {
        std::mem::take(&mut self.history)
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.shared
            .replace(Arc::new(ProgressSnapshot::new(0.0, "", "")));
    }

    pub fn is_heartbeat_running(&self) -> bool {
        self.heartbeat
            .as_ref()
            .is_some_and(|hb| !hb.handle.is_finished())
    }

    /// Spawn the heartbeat task. A second call while one is running is a no-op.
    pub fn start_heartbeat(&mut self) {
        if self.is_heartbeat_running() {
            return;
        }

        let token = CancellationToken::new();
        let child = token.clone();
        let shared = Arc::clone(&self.shared);
        let interval = self.settings.interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = child.cancelled() => break,
                    _ = ticker.tick() => {
                        if child.is_cancelled() {
                            break;
                        }
                        shared.heartbeat_tick(interval);
                    }
                }
            }
        });

        self.heartbeat = Some(Heartbeat { token, handle });
    }

    /// Stop the heartbeat and wait (bounded) for the task to exit.
    pub async fn stop_heartbeat(&mut self) {
        let Some(mut heartbeat) = self.heartbeat.take() else {
            return;
        };

        heartbeat.token.cancel();
        if tokio::time::timeout(self.settings.stop_wait, &mut heartbeat.handle)
            .await
            .is_err()
        {
            warn!(
                wait_ms = self.settings.stop_wait.as_millis() as u64,
                "Heartbeat task did not exit in time, aborting"
            );
            heartbeat.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Calls = Arc<Mutex<Vec<(f64, String, String)>>>;

    fn recording_callback() -> (ProgressCallback, Calls) {
        let calls: Calls = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&calls);
        let callback: ProgressCallback = Arc::new(move |p, stage, message| {
            sink.lock()
                .unwrap()
                .push((p, stage.to_string(), message.to_string()));
        });
        (callback, calls)
    }

    #[test]
    fn test_update_records_history_and_current() {
        let mut tracker = ProgressTracker::new(None);

        tracker.update(25.0, "stage1", "Starting");
        tracker.update(50.0, "stage2", "Half way");
        tracker.update(75.0, "stage3", "Almost done");

        assert_eq!(tracker.history().len(), 3);
        assert_eq!(tracker.history()[0].percentage, 25.0);
        assert_eq!(tracker.history()[1].stage, "stage2");

        let current = tracker.current();
        assert_eq!(current.percentage, 75.0);
        assert_eq!(current.stage, "stage3");
        assert_eq!(current.message, "Almost done");
    }

    #[test]
    fn test_update_clamps_out_of_range_values() {
        let mut tracker = ProgressTracker::new(None);

        tracker.update(-10.0, "stage", "Negative");
        assert_eq!(tracker.current().percentage, 0.0);

        tracker.update(150.0, "stage", "Over 100");
        assert_eq!(tracker.current().percentage, 100.0);

        tracker.update(50.0, "stage", "Lower again");
        assert_eq!(tracker.current().percentage, 50.0);

        assert!(tracker
            .history()
            .iter()
            .all(|s| (0.0..=100.0).contains(&s.percentage)));
    }

    #[test]
    fn test_history_timestamps_are_non_decreasing() {
        let mut tracker = ProgressTracker::new(None);
        for i in 0..20 {
            tracker.update(i as f64 * 5.0, "stage", "step");
        }

        let history = tracker.history();
        assert!(history
            .windows(2)
            .all(|pair| pair[0].timestamp <= pair[1].timestamp));
    }

    #[test]
    fn test_update_invokes_callback() {
        let (callback, calls) = recording_callback();
        let mut tracker = ProgressTracker::new(Some(callback));

        tracker.update(30.0, "test_stage", "Test message");

        let calls = calls.lock().unwrap();
        assert_eq!(
            calls.as_slice(),
            &[(30.0, "test_stage".to_string(), "Test message".to_string())]
        );
    }

    #[test]
    fn test_callback_panic_is_swallowed() {
        let callback: ProgressCallback = Arc::new(|_, _, _| panic!("callback error"));
        let mut tracker = ProgressTracker::new(Some(callback));

        tracker.update(50.0, "stage", "Test");

        assert_eq!(tracker.history().len(), 1);
    }

    #[test]
    fn test_reset_clears_state() {
        let mut tracker = ProgressTracker::new(None);
        tracker.update(50.0, "stage1", "Message 1");
        tracker.update(75.0, "stage2", "Message 2");

        tracker.reset();

        assert!(tracker.history().is_empty());
        assert_eq!(tracker.current().percentage, 0.0);
        assert_eq!(tracker.current().stage, "");
    }

    #[test]
    fn test_heartbeat_message_wraps_last_message() {
        assert_eq!(
            heartbeat_message("Calling engine..."),
            "Still processing: Calling engine..."
        );
        assert_eq!(heartbeat_message(""), "Still processing...");
    }

    #[test]
    fn test_heartbeat_due_only_after_full_interval() {
        let interval = Duration::from_secs(5);
        let start = Instant::now();

        assert!(!heartbeat_due(start, start, interval));
        assert!(!heartbeat_due(start, start + Duration::from_millis(4999), interval));
        assert!(heartbeat_due(start, start + interval, interval));
        // A clock reading before the last emission is never due.
        assert!(!heartbeat_due(start + interval, start, interval));
    }

    #[tokio::test]
    async fn test_heartbeat_tick_skips_right_after_real_update() {
        let (callback, calls) = recording_callback();
        let mut tracker = ProgressTracker::new(Some(callback));
        tracker.update(20.0, "engine_call", "Calling engine...");

        let emitted = tracker.shared.heartbeat_tick(Duration::from_secs(5));

        assert!(!emitted);
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_start_then_stop_with_default_interval_emits_nothing() {
        let (callback, calls) = recording_callback();
        let mut tracker = ProgressTracker::new(Some(callback));

        let started = std::time::Instant::now();
        tracker.start_heartbeat();
        assert!(tracker.is_heartbeat_running());
        tracker.stop_heartbeat().await;

        assert!(started.elapsed() < DEFAULT_HEARTBEAT_STOP_WAIT + Duration::from_millis(200));
        assert!(!tracker.is_heartbeat_running());
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_heartbeat_reemits_current_state_without_touching_history() {
        let (callback, calls) = recording_callback();
        let mut tracker = ProgressTracker::with_settings(
            Some(callback),
            HeartbeatSettings {
                interval: Duration::from_millis(20),
                stop_wait: Duration::from_millis(500),
            },
        );

        tracker.update(20.0, "engine_call", "Calling engine...");
        tracker.start_heartbeat();
        tokio::time::sleep(Duration::from_millis(150)).await;
        tracker.stop_heartbeat().await;

        assert_eq!(tracker.history().len(), 1);

        let calls = calls.lock().unwrap();
        assert!(calls.len() >= 2, "expected at least one heartbeat, got {calls:?}");
        for (p, stage, message) in calls.iter().skip(1) {
            assert_eq!(*p, 20.0);
            assert_eq!(stage, "engine_call");
            assert_eq!(message, "Still processing: Calling engine...");
        }
    }

    #[tokio::test]
    async fn test_no_heartbeat_after_stop() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let callback: ProgressCallback = Arc::new(move |_, _, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let mut tracker = ProgressTracker::with_settings(
            Some(callback),
            HeartbeatSettings {
                interval: Duration::from_millis(10),
                stop_wait: Duration::from_millis(500),
            },
        );

        tracker.start_heartbeat();
        tokio::time::sleep(Duration::from_millis(50)).await;
        tracker.stop_heartbeat().await;

        let after_stop = count.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), after_stop);
    }

    #[tokio::test]
    async fn test_dropping_tracker_cancels_heartbeat() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let callback: ProgressCallback = Arc::new(move |_, _, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let mut tracker = ProgressTracker::with_settings(
            Some(callback),
            HeartbeatSettings {
                interval: Duration::from_millis(10),
                stop_wait: Duration::from_millis(500),
            },
        );

        tracker.start_heartbeat();
        drop(tracker);
        tokio::time::sleep(Duration::from_millis(30)).await;
        let settled = count.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(count.load(Ordering::SeqCst), settled);
    }
}
