use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Monotonically increasing count of failed consistency checks for one instance.
///
/// The owning driver is the only writer; clones handed out for telemetry only read.
#[derive(Debug, Clone, Default)]
pub struct ErrorCounter {
    count: Arc<AtomicU64>,
}

impl ErrorCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub(crate) fn increment(&self) -> u64 {
        self.count.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Point-in-time health of one sensor instance
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct InstanceHealth {
    pub sensor_id: String,
    pub is_active: bool,
    pub messages_sent: u64,
    pub last_message_time_ms: u64,
    pub error_count: u64,
}

impl InstanceHealth {
    /// Serialize to a single JSON line
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
