use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::api::Collector;
use crate::model::{Interaction, TrackingEvent};
use crate::session::{SessionManager, SessionStats, now_ms};

pub const BATCH_SIZE: usize = 5;
pub const BATCH_INTERVAL: Duration = Duration::from_secs(5);
pub const MAX_RETRIES: u32 = 3;
pub const MAX_STORED_FAILURES: usize = 50;
/// A photo counts as viewed at most once per window.
pub const VIEW_DEDUP_WINDOW_MS: u64 = 60_000;

/// Result of attempting one batch: delivered count, events to re-queue, and
/// events that have exhausted their retry budget.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub sent: usize,
    pub retry: Vec<TrackingEvent>,
    pub exhausted: Vec<TrackingEvent>,
}

enum TrackerMsg {
    BatchSettled(BatchOutcome),
    ReplaySettled { still_failed: Vec<TrackingEvent> },
}

/// Sends every event of a batch independently, each on its own thread, so
/// one slow or failing send does not block the others. Failures increment
/// the retry counter; events over budget are handed back as exhausted.
pub fn send_batch(collector: &dyn Collector, batch: Vec<TrackingEvent>) -> BatchOutcome {
    let results: Vec<bool> = std::thread::scope(|scope| {
        let handles: Vec<_> = batch
            .iter()
            .map(|event| {
                scope.spawn(move || match collector.submit(event) {
                    Ok(()) => true,
                    Err(err) => {
                        tracing::debug!(?err, "tracking send failed");
                        false
                    }
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap_or(false)).collect()
    });

    let mut outcome = BatchOutcome::default();
    for (mut event, ok) in batch.into_iter().zip(results) {
        if ok {
            outcome.sent += 1;
            continue;
        }
        event.retries += 1;
        if event.retries >= MAX_RETRIES {
            outcome.exhausted.push(event);
        } else {
            outcome.retry.push(event);
        }
    }
    outcome
}

/// Replays durably stored events from an earlier session; returns the ones
/// that still fail.
pub fn replay_stored(collector: &dyn Collector, events: Vec<TrackingEvent>) -> Vec<TrackingEvent> {
    let results: Vec<bool> = std::thread::scope(|scope| {
        let handles: Vec<_> = events
            .iter()
            .map(|event| scope.spawn(move || collector.submit(event).is_ok()))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap_or(false)).collect()
    });
    events
        .into_iter()
        .zip(results)
        .filter_map(|(event, ok)| (!ok).then_some(event))
        .collect()
}

pub fn load_failed_events(path: &Path) -> Vec<TrackingEvent> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|json| serde_json::from_str(&json).ok())
        .unwrap_or_default()
}

fn save_failed_events(path: &Path, events: &[TrackingEvent]) {
    if events.is_empty() {
        let _ = std::fs::remove_file(path);
        return;
    }
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    match serde_json::to_string(events) {
        Ok(json) => {
            if let Err(err) = std::fs::write(path, json) {
                tracing::warn!(?err, "failed to persist failed tracking events");
            }
        }
        Err(err) => tracing::warn!(?err, "failed to serialize failed tracking events"),
    }
}

/// Appends exhausted events to the durable store, FIFO-trimmed to the cap.
pub fn append_failed_events(path: &Path, mut new_events: Vec<TrackingEvent>) {
    let mut events = load_failed_events(path);
    events.append(&mut new_events);
    if events.len() > MAX_STORED_FAILURES {
        let excess = events.len() - MAX_STORED_FAILURES;
        events.drain(..excess);
    }
    save_failed_events(path, &events);
}

fn load_view_times(path: &Path) -> HashMap<String, u64> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|json| serde_json::from_str(&json).ok())
        .unwrap_or_default()
}

fn save_view_times(path: &Path, times: &HashMap<String, u64>) {
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    if let Ok(json) = serde_json::to_string(times) {
        let _ = std::fs::write(path, json);
    }
}

/// Interaction telemetry queue.
///
/// Every public method absorbs its own errors: analytics must never disrupt
/// the UI. Immediate events (open/download/share) are sent fire-and-forget
/// on a background thread; view/search events are queued and flushed when
/// the queue reaches [`BATCH_SIZE`] or [`BATCH_INTERVAL`] elapses. A send
/// that fails [`MAX_RETRIES`] times moves to a durable store and is replayed
/// on a later session start.
pub struct Tracker {
    collector: Arc<dyn Collector>,
    session: SessionManager,
    queue: Vec<TrackingEvent>,
    is_processing: bool,
    last_flush: Instant,
    failed_path: PathBuf,
    view_times_path: PathBuf,
    view_times: HashMap<String, u64>,
    tx: mpsc::Sender<TrackerMsg>,
    rx: mpsc::Receiver<TrackerMsg>,
}

impl Tracker {
    pub fn new(collector: Arc<dyn Collector>, session: SessionManager) -> Self {
        let failed_path = session.store_dir().join("failed_events.json");
        let view_times_path = session.store_dir().join("view_times.json");
        let view_times = load_view_times(&view_times_path);
        let (tx, rx) = mpsc::channel();
        Self {
            collector,
            session,
            queue: Vec::new(),
            is_processing: false,
            last_flush: Instant::now(),
            failed_path,
            view_times_path,
            view_times,
            tx,
            rx,
        }
    }

    /// Starts the session for `code` and kicks off a replay of any events
    /// stranded by a previous session.
    pub fn initialize(&mut self, code: &str) -> String {
        let id = self.session.initialize(code);
        self.retry_failed_events();
        id
    }

    pub fn track(
        &mut self,
        kind: Interaction,
        photo_id: Option<String>,
        context: Option<serde_json::Map<String, Value>>,
    ) {
        if let Err(err) = self.try_track(kind, photo_id, context) {
            tracing::warn!(?err, "gallery tracking failed");
        }
    }

    fn try_track(
        &mut self,
        kind: Interaction,
        photo_id: Option<String>,
        context: Option<serde_json::Map<String, Value>>,
    ) -> anyhow::Result<()> {
        let session_id = self.session.session_id()?;
        let code = self
            .session
            .code()
            .ok_or_else(|| anyhow::anyhow!("no gallery code available"))?;

        let mut ctx = context.unwrap_or_default();
        ctx.entry("timestamp".to_string())
            .or_insert_with(|| Value::from(now_ms()));
        ctx.insert(
            "client".to_string(),
            Value::from(concat!("snapview/", env!("CARGO_PKG_VERSION"))),
        );

        let event = TrackingEvent {
            code,
            interaction_type: kind,
            session_id,
            photo_id,
            user_id: None,
            context: Some(ctx),
            timestamp: now_ms(),
            retries: 0,
        };

        if kind.is_immediate() {
            let collector = Arc::clone(&self.collector);
            std::thread::spawn(move || {
                if let Err(err) = collector.submit(&event) {
                    tracing::warn!(?err, "immediate tracking send failed");
                }
            });
        } else {
            self.enqueue(event);
        }
        Ok(())
    }

    fn enqueue(&mut self, event: TrackingEvent) {
        self.queue.push(event);
        if self.queue.len() >= BATCH_SIZE {
            self.flush();
        }
    }

    /// Dispatches one batch on a background thread. No-op while a flush is
    /// already in flight or the queue is empty.
    pub fn flush(&mut self) {
        if self.is_processing || self.queue.is_empty() {
            return;
        }
        let batch = self.take_batch();
        self.is_processing = true;
        self.last_flush = Instant::now();

        let collector = Arc::clone(&self.collector);
        let tx = self.tx.clone();
        std::thread::spawn(move || {
            let outcome = send_batch(&*collector, batch);
            let _ = tx.send(TrackerMsg::BatchSettled(outcome));
        });
    }

    /// Shutdown flush: sends everything still queued on the calling thread
    /// so the process cannot exit mid-send. Events that fail here go to the
    /// durable store and replay next session rather than retrying now.
    pub fn flush_blocking(&mut self) {
        let pending = std::mem::take(&mut self.queue);
        if pending.is_empty() {
            return;
        }
        let outcome = send_batch(&*self.collector, pending);
        let mut leftover = outcome.retry;
        leftover.extend(outcome.exhausted);
        if !leftover.is_empty() {
            append_failed_events(&self.failed_path, leftover);
        }
    }

    /// Per-frame pump: applies settled background work and runs the
    /// interval flush.
    pub fn tick(&mut self) {
        while let Ok(msg) = self.rx.try_recv() {
            match msg {
                TrackerMsg::BatchSettled(outcome) => self.apply_outcome(outcome),
                TrackerMsg::ReplaySettled { still_failed } => {
                    save_failed_events(&self.failed_path, &still_failed);
                }
            }
        }
        if !self.queue.is_empty()
            && !self.is_processing
            && self.last_flush.elapsed() >= BATCH_INTERVAL
        {
            self.flush();
        }
    }

    pub(crate) fn take_batch(&mut self) -> Vec<TrackingEvent> {
        let n = self.queue.len().min(BATCH_SIZE);
        self.queue.drain(..n).collect()
    }

    pub(crate) fn apply_outcome(&mut self, outcome: BatchOutcome) {
        self.is_processing = false;
        self.queue.extend(outcome.retry);
        if !outcome.exhausted.is_empty() {
            append_failed_events(&self.failed_path, outcome.exhausted);
        }
    }

    /// Replays the durable failed-event store in the background; events that
    /// succeed are purged, the rest stay stored for the next session.
    pub fn retry_failed_events(&mut self) {
        let events = load_failed_events(&self.failed_path);
        if events.is_empty() {
            return;
        }
        let collector = Arc::clone(&self.collector);
        let tx = self.tx.clone();
        std::thread::spawn(move || {
            let still_failed = replay_stored(&*collector, events);
            let _ = tx.send(TrackerMsg::ReplaySettled { still_failed });
        });
    }

    /// Dedup gate for photo-view events: true at most once per photo per
    /// [`VIEW_DEDUP_WINDOW_MS`].
    pub fn should_track_view(&mut self, photo_id: &str) -> bool {
        self.should_track_view_at(photo_id, now_ms())
    }

    fn should_track_view_at(&mut self, photo_id: &str, now: u64) -> bool {
        if let Some(last) = self.view_times.get(photo_id) {
            if now.saturating_sub(*last) < VIEW_DEDUP_WINDOW_MS {
                return false;
            }
        }
        self.view_times.insert(photo_id.to_string(), now);
        save_view_times(&self.view_times_path, &self.view_times);
        true
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    pub fn stats(&self) -> SessionStats {
        self.session.stats(self.queue.len())
    }

    pub fn failed_store_path(&self) -> &Path {
        &self.failed_path
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;
    use crate::session::SessionManager;

    struct MockCollector {
        failing: AtomicBool,
        submitted: Mutex<Vec<TrackingEvent>>,
        calls: AtomicUsize,
    }

    impl MockCollector {
        fn new(failing: bool) -> Self {
            Self {
                failing: AtomicBool::new(failing),
                submitted: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl Collector for MockCollector {
        fn submit(&self, event: &TrackingEvent) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                anyhow::bail!("collector unavailable");
            }
            self.submitted.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    fn temp_store_dir() -> PathBuf {
        std::env::temp_dir()
            .join("snapview-test")
            .join(format!("tracker-{}", fastrand::u64(..)))
    }

    fn event(id: u32) -> TrackingEvent {
        TrackingEvent {
            code: "ev42".to_string(),
            interaction_type: Interaction::PhotoView,
            session_id: "ev42-1-abcdef".to_string(),
            photo_id: Some(format!("p{id}")),
            user_id: None,
            context: None,
            timestamp: 1_700_000_000_000 + u64::from(id),
            retries: 0,
        }
    }

    #[test]
    fn send_batch_partitions_by_outcome() {
        let healthy = MockCollector::new(false);
        let outcome = send_batch(&healthy, vec![event(1), event(2)]);
        assert_eq!(outcome.sent, 2);
        assert!(outcome.retry.is_empty());
        assert!(outcome.exhausted.is_empty());

        let failing = MockCollector::new(true);
        let outcome = send_batch(&failing, vec![event(1)]);
        assert_eq!(outcome.sent, 0);
        assert_eq!(outcome.retry.len(), 1);
        assert_eq!(outcome.retry[0].retries, 1);
    }

    #[test]
    fn event_exhausts_after_max_retries() {
        let failing = MockCollector::new(true);
        let mut pending = vec![event(1)];
        let mut exhausted = Vec::new();
        for _ in 0..MAX_RETRIES {
            let outcome = send_batch(&failing, std::mem::take(&mut pending));
            pending = outcome.retry;
            exhausted.extend(outcome.exhausted);
        }
        assert!(pending.is_empty());
        assert_eq!(exhausted.len(), 1);
        assert_eq!(exhausted[0].retries, MAX_RETRIES);
    }

    #[test]
    fn thrice_failed_event_lands_in_durable_store_not_queue() {
        let dir = temp_store_dir();
        let session = SessionManager::with_path(dir.join("session.json"));
        let failing = Arc::new(MockCollector::new(true));
        let mut tracker = Tracker::new(failing.clone(), session);
        tracker.initialize("ev42");

        tracker.track(Interaction::PhotoView, Some("p1".to_string()), None);
        assert_eq!(tracker.queued_len(), 1);

        for _ in 0..MAX_RETRIES {
            let batch = tracker.take_batch();
            let outcome = send_batch(&*failing, batch);
            tracker.apply_outcome(outcome);
        }

        assert_eq!(tracker.queued_len(), 0);
        let stored = load_failed_events(tracker.failed_store_path());
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].retries, MAX_RETRIES);
    }

    #[test]
    fn replay_against_healthy_collector_empties_the_store() {
        let dir = temp_store_dir();
        let path = dir.join("failed_events.json");
        append_failed_events(&path, vec![event(1), event(2)]);
        assert_eq!(load_failed_events(&path).len(), 2);

        let healthy = MockCollector::new(false);
        let still_failed = replay_stored(&healthy, load_failed_events(&path));
        assert!(still_failed.is_empty());
        save_failed_events(&path, &still_failed);
        assert!(load_failed_events(&path).is_empty());
    }

    #[test]
    fn replay_keeps_events_that_still_fail() {
        let failing = MockCollector::new(true);
        let still_failed = replay_stored(&failing, vec![event(1), event(2)]);
        assert_eq!(still_failed.len(), 2);
    }

    #[test]
    fn durable_store_is_fifo_trimmed_to_cap() {
        let dir = temp_store_dir();
        let path = dir.join("failed_events.json");
        for i in 0..(MAX_STORED_FAILURES as u32 + 10) {
            append_failed_events(&path, vec![event(i)]);
        }
        let stored = load_failed_events(&path);
        assert_eq!(stored.len(), MAX_STORED_FAILURES);
        // Oldest entries were dropped first.
        assert_eq!(stored[0].photo_id.as_deref(), Some("p10"));
    }

    #[test]
    fn queue_flushes_early_at_batch_size() {
        let dir = temp_store_dir();
        let session = SessionManager::with_path(dir.join("session.json"));
        let collector = Arc::new(MockCollector::new(false));
        let mut tracker = Tracker::new(collector.clone(), session);
        tracker.initialize("ev42");

        for i in 0..BATCH_SIZE as u32 {
            tracker.track(Interaction::PhotoView, Some(format!("p{i}")), None);
        }
        // Reaching the batch size dispatched a flush; the queue is drained.
        assert_eq!(tracker.queued_len(), 0);
    }

    #[test]
    fn blocking_flush_delivers_the_queue_before_returning() {
        let dir = temp_store_dir();
        let session = SessionManager::with_path(dir.join("session.json"));
        let collector = Arc::new(MockCollector::new(false));
        let mut tracker = Tracker::new(collector.clone(), session);
        tracker.initialize("ev42");

        tracker.track(Interaction::PhotoView, Some("p1".to_string()), None);
        tracker.track(Interaction::PhotoView, Some("p2".to_string()), None);
        assert_eq!(tracker.queued_len(), 2);

        tracker.flush_blocking();
        // Everything went out on this thread; nothing is in flight.
        assert_eq!(tracker.queued_len(), 0);
        assert_eq!(collector.submitted.lock().unwrap().len(), 2);
    }

    #[test]
    fn blocking_flush_persists_undeliverable_events() {
        let dir = temp_store_dir();
        let session = SessionManager::with_path(dir.join("session.json"));
        let collector = Arc::new(MockCollector::new(true));
        let mut tracker = Tracker::new(collector, session);
        tracker.initialize("ev42");

        tracker.track(Interaction::PhotoView, Some("p1".to_string()), None);
        tracker.flush_blocking();

        assert_eq!(tracker.queued_len(), 0);
        let stored = load_failed_events(tracker.failed_store_path());
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].photo_id.as_deref(), Some("p1"));
    }

    #[test]
    fn view_dedup_suppresses_repeat_views_inside_window() {
        let dir = temp_store_dir();
        let session = SessionManager::with_path(dir.join("session.json"));
        let collector = Arc::new(MockCollector::new(false));
        let mut tracker = Tracker::new(collector, session);

        assert!(tracker.should_track_view_at("p1", 1_000_000));
        assert!(!tracker.should_track_view_at("p1", 1_000_000 + VIEW_DEDUP_WINDOW_MS - 1));
        assert!(tracker.should_track_view_at("p1", 1_000_000 + VIEW_DEDUP_WINDOW_MS));
        assert!(tracker.should_track_view_at("p2", 1_000_000));
    }

    #[test]
    fn tracking_before_initialization_is_swallowed() {
        let dir = temp_store_dir();
        let session = SessionManager::with_path(dir.join("session.json"));
        let collector = Arc::new(MockCollector::new(false));
        let mut tracker = Tracker::new(collector, session);

        // Must not panic or enqueue anything.
        tracker.track(Interaction::PhotoView, Some("p1".to_string()), None);
        assert_eq!(tracker.queued_len(), 0);
    }
}
