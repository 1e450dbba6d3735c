use crate::health::{ErrorCounter, InstanceHealth};
use crate::messages::{Header, InstanceId, PhysicalSample, SampleMessage};
use crate::sink::SampleSink;
use std::collections::BTreeMap;
use std::sync::RwLock;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, trace};

/// Buffered messages per subscriber before the slowest one starts lagging
pub const DEFAULT_CHANNEL_CAPACITY: usize = 2000;

#[derive(Debug, Clone, Default)]
struct InstanceStats {
    sensor_id: String,
    seq: u64,
    messages_sent: u64,
    last_message_time_ms: u64,
    errors: ErrorCounter,
}

/// Fan-out sink: wraps samples in headed messages and broadcasts them
pub struct SampleHub {
    device_id: String,
    tx: broadcast::Sender<SampleMessage>,
    stats: RwLock<BTreeMap<InstanceId, InstanceStats>>,
}

impl SampleHub {
    pub fn new(device_id: impl Into<String>, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            device_id: device_id.into(),
            tx,
            stats: RwLock::new(BTreeMap::new()),
        }
    }

    /// Name an instance and attach its error counter for health reporting
    pub fn register_instance(&self, instance: InstanceId, sensor_id: &str, errors: ErrorCounter) {
        let mut stats = self.stats.write().unwrap_or_else(|e| e.into_inner());
        let entry = stats.entry(instance).or_default();
        entry.sensor_id = sensor_id.to_string();
        entry.errors = errors;
        info!("[hub] registered {} as {}", sensor_id, instance);
    }

    pub fn subscribe(&self) -> BroadcastStream<SampleMessage> {
        BroadcastStream::new(self.tx.subscribe())
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Health snapshot of every known instance, in instance order
    pub fn status(&self) -> Vec<InstanceHealth> {
        let stats = self.stats.read().unwrap_or_else(|e| e.into_inner());
        stats
            .values()
            .map(|s| InstanceHealth {
                sensor_id: s.sensor_id.clone(),
                is_active: s.messages_sent > 0,
                messages_sent: s.messages_sent,
                last_message_time_ms: s.last_message_time_ms,
                error_count: s.errors.get(),
            })
            .collect()
    }
}

impl SampleSink for SampleHub {
    fn deliver(&self, instance: InstanceId, sample: PhysicalSample) {
        let header = {
            let mut stats = self.stats.write().unwrap_or_else(|e| e.into_inner());
            let entry = stats.entry(instance).or_insert_with(|| InstanceStats {
                sensor_id: format!("instance{}", instance.0),
                ..Default::default()
            });
            entry.seq += 1;
            entry.messages_sent += 1;
            entry.last_message_time_ms = sample.timestamp_ms;
            Header::new(
                self.device_id.clone(),
                entry.sensor_id.clone(),
                entry.seq,
                sample.timestamp_ms,
            )
        };

        let message = SampleMessage::from_sample(header, instance, &sample);
        // no subscribers is fine
        if self.tx.send(message).is_err() {
            trace!("[hub] {} sample dropped, no subscribers", instance);
        }
    }
}
