//! Delayed-sample emulation.
//!
//! A fixed ring of timestamped samples that answers "what was the reading
//! roughly `delay` milliseconds ago", used to give simulated sensors a
//! realistic propagation delay.

use crate::clock::Clock;
use crate::messages::{InstanceId, PhysicalSample};
use crate::sink::SampleSink;
use std::sync::{Arc, Mutex};
use tracing::trace;

/// Minimum spacing between stored entries
pub const DEFAULT_STORE_INTERVAL_MS: u64 = 10;
/// Lookups further than this from any stored entry fall back to the fresh sample
pub const DEFAULT_ACCEPTANCE_MS: u64 = 1000;
/// Enough history for 500 ms of delay at the default storage interval
pub const DEFAULT_CAPACITY: usize = 50;

/// One ring slot. `time_ms` is when the slot was written and is never altered afterwards.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimestampedEntry<T> {
    pub data: T,
    pub time_ms: u64,
}

/// Fixed-capacity circular history with nearest-timestamp lookup.
///
/// Always logically full: slots start default-initialized (time 0) and are
/// overwritten in strict circular order. The acceptance threshold, not an
/// emptiness check, guards against serving meaningless entries.
#[derive(Debug, Clone)]
pub struct DelayLine<T> {
    entries: Box<[TimestampedEntry<T>]>,
    cursor: usize,
    last_store_ms: Option<u64>,
    store_interval_ms: u64,
    acceptance_ms: u64,
}

impl<T: Copy + Default> DelayLine<T> {
    pub fn new(capacity: usize, store_interval_ms: u64, acceptance_ms: u64) -> Self {
        Self {
            entries: vec![TimestampedEntry::default(); capacity.max(1)].into_boxed_slice(),
            cursor: 0,
            last_store_ms: None,
            store_interval_ms,
            acceptance_ms,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(capacity, DEFAULT_STORE_INTERVAL_MS, DEFAULT_ACCEPTANCE_MS)
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Slot the next accepted store will overwrite
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn entries(&self) -> &[TimestampedEntry<T>] {
        &self.entries
    }

    /// Store `sample` at the cursor and advance it.
    ///
    /// Calls arriving sooner than the storage interval after the previous
    /// accepted store are dropped. Returns whether the sample was stored.
    pub fn store(&mut self, sample: T, now_ms: u64) -> bool {
        if let Some(last) = self.last_store_ms {
            if now_ms.saturating_sub(last) < self.store_interval_ms {
                return false;
            }
        }
        self.last_store_ms = Some(now_ms);
        self.entries[self.cursor] = TimestampedEntry {
            data: sample,
            time_ms: now_ms,
        };
        self.cursor = (self.cursor + 1) % self.entries.len();
        true
    }

    /// Slot closest in time to `target_ms` and its distance. Ties keep the first slot scanned.
    pub fn nearest(&self, target_ms: i64) -> Option<(usize, u64)> {
        let mut best: Option<(usize, u64)> = None;
        // the ring wraps, so no ordering can be assumed: scan every slot
        for (index, entry) in self.entries.iter().enumerate() {
            let diff = (entry.time_ms as i64 - target_ms).unsigned_abs();
            if best.map_or(true, |(_, best_diff)| diff < best_diff) {
                best = Some((index, diff));
            }
        }
        best
    }

    /// Sample stored closest to `now - delay`, or `fallback` when nothing is
    /// within the acceptance threshold.
    pub fn retrieve(&self, now_ms: u64, delay_ms: u64, fallback: T) -> T {
        let target = now_ms as i64 - delay_ms as i64;
        match self.nearest(target) {
            Some((index, diff)) if diff < self.acceptance_ms => self.entries[index].data,
            _ => fallback,
        }
    }
}

/// What a `DelayedSink` keeps per slot. `None` marks a slot never written.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DelayedReading {
    pub vector: [f32; 3],
    pub timestamp_ms: u64,
}

/// Sink adaptor that re-emits each sample through a delay line.
///
/// Only the measurement travels through the line; the kind of the outgoing
/// sample is always that of the incoming one. Unwritten slots are never
/// served: the fresh sample goes out instead.
///
/// Deliveries can arrive from any polling worker, so the line sits behind a mutex.
pub struct DelayedSink {
    inner: Arc<dyn SampleSink>,
    line: Mutex<DelayLine<Option<DelayedReading>>>,
    delay_ms: u64,
    clock: Arc<dyn Clock>,
}

impl DelayedSink {
    pub fn new(
        inner: Arc<dyn SampleSink>,
        line: DelayLine<Option<DelayedReading>>,
        delay_ms: u64,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner,
            line: Mutex::new(line),
            delay_ms,
            clock,
        }
    }

    pub fn delay_ms(&self) -> u64 {
        self.delay_ms
    }
}

impl SampleSink for DelayedSink {
    fn deliver(&self, instance: InstanceId, sample: PhysicalSample) {
        let now = self.clock.now_ms();
        let fresh = DelayedReading {
            vector: sample.vector,
            timestamp_ms: sample.timestamp_ms,
        };
        let reading = {
            let mut line = self.line.lock().unwrap_or_else(|e| e.into_inner());
            line.store(Some(fresh), now);
            line.retrieve(now, self.delay_ms, Some(fresh)).unwrap_or(fresh)
        };
        let delayed = PhysicalSample::new(sample.kind, reading.vector, reading.timestamp_ms);
        trace!(
            "[delay] {} now={}ms served sample from t={}ms",
            instance,
            now,
            delayed.timestamp_ms
        );
        self.inner.deliver(instance, delayed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::messages::SampleKind;
    use crate::sink::testing::CollectingSink;

    fn filled_line() -> DelayLine<u64> {
        let mut line = DelayLine::new(50, 10, 1000);
        for t in (0..500).step_by(10) {
            assert!(line.store(t, t));
        }
        line
    }

    #[test]
    fn test_retrieve_nearest_to_target() {
        let line = filled_line();
        assert_eq!(line.retrieve(500, 50, 9999), 450);
        assert_eq!(line.retrieve(500, 0, 9999), 490);
        // 500 - 47 = 453, closest stored entry is 450
        assert_eq!(line.retrieve(500, 47, 9999), 450);
        // 500 - 44 = 456, closest stored entry is 460
        assert_eq!(line.retrieve(500, 44, 9999), 460);
    }

    #[test]
    fn test_store_rate_limited() {
        let mut line: DelayLine<u64> = DelayLine::new(4, 10, 1000);
        assert!(line.store(1, 100));
        assert!(!line.store(2, 105));
        assert!(!line.store(3, 109));
        assert!(line.store(4, 110));
        assert_eq!(line.cursor(), 2);
        assert_eq!(line.entries()[0].data, 1);
        assert_eq!(line.entries()[1].data, 4);
    }

    #[test]
    fn test_first_store_always_accepted() {
        let mut line: DelayLine<u64> = DelayLine::with_capacity(3);
        assert!(line.store(7, 0));
        assert_eq!(line.entries()[0], TimestampedEntry { data: 7, time_ms: 0 });
    }

    #[test]
    fn test_cursor_wraps_and_overwrites_oldest() {
        let mut line: DelayLine<u64> = DelayLine::new(3, 10, 1000);
        for t in [0u64, 10, 20, 30, 40] {
            line.store(t, t);
        }
        let times: Vec<u64> = line.entries().iter().map(|e| e.time_ms).collect();
        assert_eq!(times, vec![30, 40, 20]);
        assert_eq!(line.cursor(), 2);
        assert_eq!(line.capacity(), 3);
    }

    #[test]
    fn test_ties_resolve_to_first_slot_scanned() {
        let mut line: DelayLine<u64> = DelayLine::new(2, 10, 1000);
        line.store(0, 0);
        line.store(10, 10);
        line.store(20, 20);
        // slot 0 holds t=20, slot 1 holds t=10; target 15 is 5ms from both
        assert_eq!(line.nearest(15), Some((0, 5)));
        assert_eq!(line.retrieve(20, 5, 99), 20);
    }

    #[test]
    fn test_stale_request_falls_back() {
        let line = filled_line();
        // target 2500 is 2010ms past the newest entry
        assert_eq!(line.retrieve(3000, 500, 12345), 12345);
    }

    #[test]
    fn test_acceptance_threshold_is_strict() {
        let mut line: DelayLine<u64> = DelayLine::new(1, 10, 1000);
        line.store(5, 1000);
        assert_eq!(line.retrieve(1999, 0, 0), 5);
        assert_eq!(line.retrieve(2000, 0, 0), 0);
    }

    #[test]
    fn test_default_entries_are_candidates() {
        let line: DelayLine<u64> = DelayLine::new(4, 10, 1000);
        // nothing stored yet: slots at t=0 are within threshold early on
        assert_eq!(line.retrieve(300, 0, 77), 0);
        assert_eq!(line.retrieve(5000, 0, 77), 77);
    }

    #[test]
    fn test_delayed_sink_serves_history() {
        let clock = ManualClock::new(0);
        let collector = Arc::new(CollectingSink::default());
        let sink = DelayedSink::new(
            collector.clone(),
            DelayLine::with_capacity(DEFAULT_CAPACITY),
            30,
            clock.clone(),
        );

        for step in 0..10u64 {
            clock.set(step * 10);
            let value = step as f32;
            sink.deliver(
                InstanceId(2),
                PhysicalSample::new(SampleKind::Mag, [value, 0.0, 0.0], step * 10),
            );
        }

        let delivered = collector.samples();
        assert_eq!(delivered.len(), 10);
        assert!(delivered.iter().all(|(id, _)| *id == InstanceId(2)));
        // at t=90 with a 30ms delay the sample stored at t=60 comes back
        assert_eq!(delivered[9].1.vector[0], 6.0);
        assert_eq!(delivered[9].1.timestamp_ms, 60);
        assert_eq!(sink.delay_ms(), 30);
    }

    #[test]
    fn test_delayed_sink_keeps_kind_before_history_exists() {
        let clock = ManualClock::new(50);
        let collector = Arc::new(CollectingSink::default());
        let sink = DelayedSink::new(
            collector.clone(),
            DelayLine::with_capacity(61),
            600,
            clock.clone(),
        );

        // target 50 - 600 is closest to the unwritten t=0 slots
        sink.deliver(
            InstanceId(1),
            PhysicalSample::new(SampleKind::Accel, [0.0, 0.0, 9.8], 50),
        );
        clock.set(60);
        sink.deliver(
            InstanceId(1),
            PhysicalSample::new(SampleKind::Accel, [0.0, 0.0, 9.7], 60),
        );

        let delivered = collector.samples();
        assert_eq!(delivered.len(), 2);
        assert_eq!(
            delivered[0].1,
            PhysicalSample::new(SampleKind::Accel, [0.0, 0.0, 9.8], 50)
        );
        assert_eq!(
            delivered[1].1,
            PhysicalSample::new(SampleKind::Accel, [0.0, 0.0, 9.7], 60)
        );
    }
}
