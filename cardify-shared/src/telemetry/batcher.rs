//! Bounded event buffer with size, interval and shutdown flushes

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::sink::EventSink;
use crate::models::analytics_event::AnalyticsEvent;

#[derive(Debug, Clone)]
pub struct BatcherConfig {
    /// Events per batch; reaching it triggers a flush (default 10)
    pub max_batch_size: usize,

    /// Time between periodic flushes (default 30s)
    pub flush_interval: Duration,

    /// Buffer bound; the oldest event is dropped beyond it (default 1000)
    pub max_queue_size: usize,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 10,
            flush_interval: Duration::from_secs(30),
            max_queue_size: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct BatcherStats {
    pub queued: usize,
    pub delivered: u64,
    pub dropped: u64,
    pub failed_batches: u64,
}

struct Inner {
    config: BatcherConfig,
    queue: Mutex<VecDeque<AnalyticsEvent>>,
    batch_ready: Notify,
    delivered: AtomicU64,
    dropped: AtomicU64,
    failed_batches: AtomicU64,
}

/// Cloneable handle to a shared event buffer
///
/// `track` never blocks on delivery. The background task started by
/// [`EventBatcher::spawn`] drains the buffer into a sink.
#[derive(Clone)]
pub struct EventBatcher {
    inner: Arc<Inner>,
}

impl EventBatcher {
    pub fn new(config: BatcherConfig) -> Self {
        let config = BatcherConfig {
            max_batch_size: config.max_batch_size.max(1),
            max_queue_size: config.max_queue_size.max(1),
            ..config
        };

        Self {
            inner: Arc::new(Inner {
                config,
                queue: Mutex::new(VecDeque::new()),
                batch_ready: Notify::new(),
                delivered: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                failed_batches: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &BatcherConfig {
        &self.inner.config
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<AnalyticsEvent>> {
        self.inner.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Buffers one event
    pub fn track(&self, event: AnalyticsEvent) {
        self.track_many(std::iter::once(event));
    }

    /// Buffers several events
    pub fn track_many(&self, events: impl IntoIterator<Item = AnalyticsEvent>) {
        let config = &self.inner.config;
        let mut dropped = 0u64;

        let len = {
            let mut queue = self.queue();
            for event in events {
                if queue.len() >= config.max_queue_size {
                    queue.pop_front();
                    dropped += 1;
                }
                queue.push_back(event);
            }
            queue.len()
        };

        if dropped > 0 {
            self.inner.dropped.fetch_add(dropped, Ordering::Relaxed);
            warn!(dropped, max_queue_size = config.max_queue_size, "Telemetry queue full, dropped oldest events");
        }

        if len >= config.max_batch_size {
            self.inner.batch_ready.notify_one();
        }
    }

    pub fn pending(&self) -> usize {
        self.queue().len()
    }

    pub fn stats(&self) -> BatcherStats {
        BatcherStats {
            queued: self.pending(),
            delivered: self.inner.delivered.load(Ordering::Relaxed),
            dropped: self.inner.dropped.load(Ordering::Relaxed),
            failed_batches: self.inner.failed_batches.load(Ordering::Relaxed),
        }
    }

    /// Takes the next batch; `full_only` leaves a partial batch queued
    fn take_batch(&self, full_only: bool) -> Option<Vec<AnalyticsEvent>> {
        let batch_size = self.inner.config.max_batch_size;
        let mut queue = self.queue();

        if queue.is_empty() || (full_only && queue.len() < batch_size) {
            return None;
        }

        let n = queue.len().min(batch_size);
        Some(queue.drain(..n).collect())
    }

    async fn deliver(&self, sink: &dyn EventSink, batch: Vec<AnalyticsEvent>) {
        let count = batch.len();

        match sink.send(&batch).await {
            Ok(()) => {
                self.inner.delivered.fetch_add(count as u64, Ordering::Relaxed);
                debug!(sink = sink.name(), count, "Flushed telemetry batch");
            }
            Err(e) => {
                self.inner.failed_batches.fetch_add(1, Ordering::Relaxed);
                warn!(sink = sink.name(), count, error = %e, "Telemetry flush failed, batch dropped");
            }
        }
    }

    /// Sends full batches only
    async fn flush_full(&self, sink: &dyn EventSink) {
        while let Some(batch) = self.take_batch(true) {
            self.deliver(sink, batch).await;
        }
    }

    /// Sends everything buffered, in batch-sized chunks
    pub async fn flush(&self, sink: &dyn EventSink) {
        while let Some(batch) = self.take_batch(false) {
            self.deliver(sink, batch).await;
        }
    }

    /// Drains the buffer until `cancel` fires, then flushes what's left
    pub async fn run(self, sink: Arc<dyn EventSink>, cancel: CancellationToken) {
        let period = self.inner.config.flush_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            sink = sink.name(),
            max_batch_size = self.inner.config.max_batch_size,
            flush_interval_secs = period.as_secs(),
            "Telemetry batcher started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.inner.batch_ready.notified() => self.flush_full(sink.as_ref()).await,
                _ = ticker.tick() => self.flush(sink.as_ref()).await,
            }
        }

        let remaining = self.pending();
        self.flush(sink.as_ref()).await;
        info!(flushed = remaining, "Telemetry batcher stopped");
    }

    pub fn spawn(&self, sink: Arc<dyn EventSink>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.clone().run(sink, cancel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::analytics_event::EventKind;
    use crate::telemetry::SinkError;
    use async_trait::async_trait;

    #[derive(Default)]
    struct RecordingSink {
        batches: Mutex<Vec<Vec<String>>>,
        fail: bool,
    }

    impl RecordingSink {
        fn batches(&self) -> Vec<Vec<String>> {
            self.batches.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn send(&self, events: &[AnalyticsEvent]) -> Result<(), SinkError> {
            if self.fail {
                return Err(SinkError::Server(500));
            }
            self.batches
                .lock()
                .unwrap()
                .push(events.iter().map(|e| e.name.clone()).collect());
            Ok(())
        }
    }

    fn event(i: usize) -> AnalyticsEvent {
        AnalyticsEvent::new(EventKind::Custom, format!("e{}", i))
    }

    fn config(max_batch_size: usize, max_queue_size: usize) -> BatcherConfig {
        BatcherConfig {
            max_batch_size,
            flush_interval: Duration::from_secs(30),
            max_queue_size,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_flushes_when_batch_is_full() {
        let batcher = EventBatcher::new(config(10, 1000));
        let sink = Arc::new(RecordingSink::default());
        let cancel = CancellationToken::new();
        let handle = batcher.spawn(sink.clone(), cancel.clone());

        batcher.track_many((0..12).map(event));
        tokio::time::sleep(Duration::from_millis(10)).await;

        let batches = sink.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 10);
        assert_eq!(batcher.pending(), 2);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_flushes_on_interval() {
        let batcher = EventBatcher::new(config(10, 1000));
        let sink = Arc::new(RecordingSink::default());
        let cancel = CancellationToken::new();
        let handle = batcher.spawn(sink.clone(), cancel.clone());

        batcher.track_many((0..3).map(event));
        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(sink.batches().is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(sink.batches(), vec![vec!["e0", "e1", "e2"]]);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_flushes_on_shutdown() {
        let batcher = EventBatcher::new(config(10, 1000));
        let sink = Arc::new(RecordingSink::default());
        let cancel = CancellationToken::new();
        let handle = batcher.spawn(sink.clone(), cancel.clone());

        batcher.track_many((0..13).map(event));
        cancel.cancel();
        handle.await.unwrap();

        let sizes: Vec<usize> = sink.batches().iter().map(Vec::len).collect();
        assert_eq!(sizes.iter().sum::<usize>(), 13);
        assert!(sizes.iter().all(|&n| n <= 10));
        assert_eq!(batcher.pending(), 0);
        assert_eq!(batcher.stats().delivered, 13);
    }

    #[test]
    fn test_queue_drops_oldest_when_full() {
        let batcher = EventBatcher::new(config(100, 5));
        batcher.track_many((0..8).map(event));

        let stats = batcher.stats();
        assert_eq!(stats.queued, 5);
        assert_eq!(stats.dropped, 3);

        let batch = batcher.take_batch(false).unwrap();
        assert_eq!(batch[0].name, "e3");
    }

    #[tokio::test]
    async fn test_failed_batch_is_dropped() {
        let batcher = EventBatcher::new(config(10, 1000));
        let sink = RecordingSink {
            fail: true,
            ..Default::default()
        };

        batcher.track_many((0..4).map(event));
        batcher.flush(&sink).await;

        let stats = batcher.stats();
        assert_eq!(stats.queued, 0);
        assert_eq!(stats.failed_batches, 1);
        assert_eq!(stats.delivered, 0);
    }
}
