use serde::{Deserialize, Serialize};
use std::fmt;

/// Which physical quantity a sample measures
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SampleKind {
    /// Angular rate (rad/s)
    #[default]
    Gyro,
    /// Linear acceleration (m/s²)
    Accel,
    /// Magnetic field (μT)
    Mag,
}

impl SampleKind {
    pub fn unit(self) -> &'static str {
        match self {
            SampleKind::Gyro => "rad/s",
            SampleKind::Accel => "m/s^2",
            SampleKind::Mag => "uT",
        }
    }
}

/// Index of a sensor instance, assigned in registration order
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(pub u8);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A converted, board-frame sample. Moved from producer to sink, never shared mutably.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Default)]
pub struct PhysicalSample {
    pub kind: SampleKind,
    pub vector: [f32; 3],
    /// Monotonic milliseconds at which the sample was acquired
    pub timestamp_ms: u64,
}

impl PhysicalSample {
    pub fn new(kind: SampleKind, vector: [f32; 3], timestamp_ms: u64) -> Self {
        Self {
            kind,
            vector,
            timestamp_ms,
        }
    }
}

/// Header metadata common to all published sample messages
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Header {
    /// Unique device identifier
    pub device_id: String,
    /// Sensor instance identifier (e.g., "gyro0", "mag0")
    pub sensor_id: String,
    /// Sequence number for message ordering, per instance
    pub seq: u64,
    /// Monotonic acquisition timestamp in milliseconds
    pub t_mono_ms: u64,
    /// Message schema version for evolution
    pub schema_v: u16,
}

impl Header {
    pub fn new(device_id: String, sensor_id: String, seq: u64, t_mono_ms: u64) -> Self {
        Self {
            device_id,
            sensor_id,
            seq,
            t_mono_ms,
            schema_v: 1,
        }
    }
}

/// A published sample with its header
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SampleMessage {
    pub h: Header,
    pub instance: InstanceId,
    pub kind: SampleKind,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl SampleMessage {
    pub fn from_sample(h: Header, instance: InstanceId, sample: &PhysicalSample) -> Self {
        let [x, y, z] = sample.vector;
        Self {
            h,
            instance,
            kind: sample.kind,
            x,
            y,
            z,
        }
    }

    pub fn sensor_id(&self) -> &str {
        &self.h.sensor_id
    }

    /// Serialize to a single JSON line
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
