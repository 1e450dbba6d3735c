//! Simulated compass.
//!
//! Produces a body-frame magnetic field from the vehicle attitude and passes it
//! through a delay line so downstream estimators see realistic sensor lag.

use crate::clock::Clock;
use crate::config::{CompassEntry, SimulationConfig};
use crate::delay::{DelayLine, DEFAULT_ACCEPTANCE_MS};
use crate::health::ErrorCounter;
use crate::hub::SampleHub;
use crate::messages::{InstanceId, PhysicalSample, SampleKind};
use crate::sink::SampleSink;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, trace};

/// Minimum spacing between compass outputs (100 Hz)
pub const OUTPUT_INTERVAL_MS: u64 = 10;

/// Wrap an angle in degrees into [-180, 180]
pub fn wrap_180(deg: f32) -> f32 {
    let d = deg % 360.0;
    if d > 180.0 {
        d - 360.0
    } else if d < -180.0 {
        d + 360.0
    } else {
        d
    }
}

/// Vehicle attitude as ZYX Euler angles in degrees
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Attitude {
    pub roll_deg: f32,
    pub pitch_deg: f32,
    pub yaw_deg: f32,
}

impl Attitude {
    pub fn new(roll_deg: f32, pitch_deg: f32, yaw_deg: f32) -> Self {
        Self {
            roll_deg,
            pitch_deg,
            yaw_deg,
        }
    }

    pub fn level(yaw_deg: f32) -> Self {
        Self::new(0.0, 0.0, yaw_deg)
    }
}

/// Rotate an earth-frame vector into the body frame.
///
/// Applies the transpose of the body-to-earth rotation `Rz(yaw) Ry(pitch) Rx(roll)`.
pub fn earth_to_body(field: [f32; 3], attitude: Attitude) -> [f32; 3] {
    let (sr, cr) = attitude.roll_deg.to_radians().sin_cos();
    let (sp, cp) = attitude.pitch_deg.to_radians().sin_cos();
    let (sy, cy) = attitude.yaw_deg.to_radians().sin_cos();
    let [ex, ey, ez] = field;
    [
        cp * cy * ex + cp * sy * ey - sp * ez,
        (sr * sp * cy - cr * sy) * ex + (sr * sp * sy + cr * cy) * ey + sr * cp * ez,
        (cr * sp * cy + sr * sy) * ex + (cr * sp * sy - sr * cy) * ey + cr * cp * ez,
    ]
}

pub struct SimulatedCompass {
    id: String,
    instance: InstanceId,
    earth_field: [f32; 3],
    offsets: [f32; 3],
    noise: f32,
    yaw_error_deg: f32,
    delay_ms: u64,
    line: DelayLine<[f32; 3]>,
    rng: StdRng,
    last_output_ms: Option<u64>,
    sink: Arc<dyn SampleSink>,
}

impl SimulatedCompass {
    pub fn new(entry: &CompassEntry, instance: InstanceId, sink: Arc<dyn SampleSink>) -> Self {
        Self {
            id: entry.id.clone(),
            instance,
            earth_field: entry.earth_field,
            offsets: entry.offsets,
            noise: entry.noise,
            yaw_error_deg: entry.yaw_error_deg,
            delay_ms: entry.delay_ms,
            line: DelayLine::new(entry.buffer_len, entry.store_interval_ms, DEFAULT_ACCEPTANCE_MS),
            rng: StdRng::seed_from_u64(entry.seed),
            last_output_ms: None,
            sink,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn instance(&self) -> InstanceId {
        self.instance
    }

    /// Undelayed field for a vehicle attitude, with the configured yaw error and noise
    fn fresh_field(&mut self, attitude: Attitude) -> [f32; 3] {
        let attitude = Attitude {
            yaw_deg: wrap_180(attitude.yaw_deg + self.yaw_error_deg),
            ..attitude
        };
        let body = earth_to_body(self.earth_field, attitude);
        if self.noise == 0.0 {
            return body;
        }
        let noise = self.noise;
        body.map(|v| v + self.rng.gen_range(-1.0f32..=1.0) * noise)
    }

    /// Advance the simulation. Returns the reading delivered to the sink, if any.
    ///
    /// May be called at any rate; output is limited to one reading per
    /// [`OUTPUT_INTERVAL_MS`].
    pub fn update(&mut self, attitude: Attitude, now_ms: u64) -> Option<[f32; 3]> {
        let fresh = self.fresh_field(attitude);

        if let Some(last) = self.last_output_ms {
            if now_ms.saturating_sub(last) < OUTPUT_INTERVAL_MS {
                return None;
            }
        }
        self.last_output_ms = Some(now_ms);

        self.line.store(fresh, now_ms);
        let delayed = self.line.retrieve(now_ms, self.delay_ms, fresh);
        let reading = [
            delayed[0] - self.offsets[0],
            delayed[1] - self.offsets[1],
            delayed[2] - self.offsets[2],
        ];

        trace!(
            "[{}] t={}ms attitude={:?} field={:?}",
            self.id,
            now_ms,
            attitude,
            reading
        );
        self.sink.deliver(
            self.instance,
            PhysicalSample::new(SampleKind::Mag, reading, now_ms),
        );
        Some(reading)
    }
}

/// Start one stepping task per configured compass, numbering instances from `first_instance`
pub fn spawn_compasses(
    config: &SimulationConfig,
    hub: Arc<SampleHub>,
    clock: Arc<dyn Clock>,
    first_instance: u8,
) -> Vec<JoinHandle<()>> {
    let step = Duration::from_secs_f64(1.0 / config.step_hz.max(1) as f64);
    let mut handles = Vec::new();

    for (offset, entry) in config.compasses.iter().enumerate() {
        let instance = InstanceId(first_instance.saturating_add(offset as u8));
        hub.register_instance(instance, &entry.id, ErrorCounter::new());
        let mut compass = SimulatedCompass::new(entry, instance, hub.clone());
        let yaw_rate = entry.yaw_rate_dps;
        let (roll, pitch) = (entry.roll_deg, entry.pitch_deg);
        let clock = clock.clone();

        info!(
            "[sim] {} as {} at {} Hz, delay {} ms, field {:?} {}",
            entry.id,
            instance,
            config.step_hz,
            entry.delay_ms,
            entry.earth_field,
            SampleKind::Mag.unit()
        );
        handles.push(tokio::spawn(async move {
            let mut ticker = interval(step);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let now = clock.now_ms();
                let yaw = wrap_180(yaw_rate * now as f32 / 1000.0);
                compass.update(Attitude::new(roll, pitch, yaw), now);
            }
        }));
    }

    handles
}
