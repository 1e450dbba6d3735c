//! FIFO drain pipeline.
//!
//! Each poll reads the FIFO status byte, then drains everything it reports
//! in bounded burst reads. Samples reach the sink in device order.

use super::{Access, PollReport, SensorCore, SensorDriver, SkipReason};
use crate::bus::RegisterBus;
use crate::config::sensor_config::FifoSettings;
use crate::conversion::{RawSample, SAMPLE_SIZE};
use crate::errors::SensorResult;
use crate::health::ErrorCounter;
use crate::messages::{InstanceId, SampleKind};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

/// Most samples moved in one bus transaction
pub const MAX_FIFO_BATCH: usize = 8;

const STATS_INTERVAL_MS: u64 = 1000;

/// Samples queued according to a FIFO status byte. The empty flag wins over the count bits.
pub fn queued_samples(status: u8, settings: &FifoSettings) -> usize {
    if status & settings.empty_flag != 0 {
        0
    } else {
        (status & settings.count_mask) as usize
    }
}

/// Drain counters for one instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    pub polls: u64,
    pub samples: u64,
    /// Cycles cut short by a busy bus or a failed transaction
    pub skipped: u64,
    pub overruns: u64,
    pub last_status: u8,
}

impl DrainStats {
    fn record(&mut self, report: &PollReport, status: Option<u8>, overrun: bool) {
        self.polls += 1;
        self.samples += report.delivered as u64;
        if report.skipped.is_some() {
            self.skipped += 1;
        }
        if overrun {
            self.overruns += 1;
        }
        if let Some(status) = status {
            self.last_status = status;
        }
    }
}

pub struct FifoDrain {
    core: SensorCore,
    fifo: FifoSettings,
    scratch: [u8; MAX_FIFO_BATCH * SAMPLE_SIZE],
    window: DrainStats,
    totals: DrainStats,
    window_start_ms: Option<u64>,
}

impl FifoDrain {
    pub(crate) fn new(core: SensorCore, fifo: FifoSettings) -> Self {
        let fifo = FifoSettings {
            batch_limit: fifo.batch_limit.clamp(1, MAX_FIFO_BATCH),
            ..fifo
        };
        Self {
            core,
            fifo,
            scratch: [0; MAX_FIFO_BATCH * SAMPLE_SIZE],
            window: DrainStats::default(),
            totals: DrainStats::default(),
            window_start_ms: None,
        }
    }

    /// Counters since construction
    pub fn totals(&self) -> DrainStats {
        self.totals
    }

    /// Counters for the current one-second window
    pub fn window(&self) -> DrainStats {
        self.window
    }

    /// Read the status and drain what it reports. Returns the status byte when it was read.
    async fn drain(&mut self, bus: &Mutex<dyn RegisterBus>, report: &mut PollReport) -> Option<u8> {
        let mut status = [0u8; 1];
        match self.core.read(bus, self.fifo.status_register, &mut status).await {
            Ok(()) => {}
            Err(Access::Busy) => {
                report.skipped = Some(SkipReason::BusBusy);
                return None;
            }
            Err(Access::Failed(e)) => {
                trace!("[{}] status read failed: {}", self.core.id, e);
                report.skipped = Some(SkipReason::StatusReadFailed);
                return None;
            }
        }
        let status = status[0];
        let mut remaining = queued_samples(status, &self.fifo);
        let now = self.core.clock.now_ms();

        while remaining > 0 {
            let batch = remaining.min(self.fifo.batch_limit);
            let bytes = &mut self.scratch[..batch * SAMPLE_SIZE];
            match self.core.read(bus, self.core.data_register, bytes).await {
                Ok(()) => report.transactions += 1,
                Err(Access::Busy) => {
                    report.skipped = Some(SkipReason::BusBusy);
                    break;
                }
                Err(Access::Failed(e)) => {
                    report.transactions += 1;
                    trace!("[{}] data read failed, {} left: {}", self.core.id, remaining, e);
                    report.skipped = Some(SkipReason::DataReadFailed);
                    break;
                }
            }
            for raw in RawSample::decode_all(bytes, self.core.conversion.byte_order) {
                self.core.emit(raw, now);
                report.delivered += 1;
            }
            remaining -= batch;
        }

        Some(status)
    }

    fn update_stats(&mut self, report: &PollReport, status: Option<u8>) {
        let overrun = status.is_some_and(|s| s & self.fifo.overrun_flag != 0);
        if overrun {
            warn!("[{}] FIFO overrun, samples lost", self.core.id);
        }
        self.window.record(report, status, overrun);
        self.totals.record(report, status, overrun);

        let now = self.core.clock.now_ms();
        let start = *self.window_start_ms.get_or_insert(now);
        if now.saturating_sub(start) >= STATS_INTERVAL_MS {
            debug!(
                "[{}] {} polls, {} samples, {} skipped, {} overruns, status {:#04x}, {} errors",
                self.core.id,
                self.window.polls,
                self.window.samples,
                self.window.skipped,
                self.window.overruns,
                self.window.last_status,
                self.core.errors.get()
            );
            self.window = DrainStats::default();
            self.window_start_ms = Some(now);
        }
    }
}

#[async_trait]
impl SensorDriver for FifoDrain {
    async fn init(&mut self, bus: &mut dyn RegisterBus) -> SensorResult<()> {
        self.core.initialize(bus).await
    }

    async fn poll(&mut self, bus: &Mutex<dyn RegisterBus>) -> PollReport {
        let mut report = PollReport::default();
        let status = self.drain(bus, &mut report).await;
        report.check = self.core.run_check(bus).await;
        self.update_stats(&report, status);
        report
    }

    fn id(&self) -> &str {
        &self.core.id
    }

    fn bus(&self) -> &str {
        &self.core.bus_id
    }

    fn instance(&self) -> InstanceId {
        self.core.instance
    }

    fn kind(&self) -> SampleKind {
        self.core.kind
    }

    fn poll_interval(&self) -> Duration {
        self.core.poll_interval
    }

    fn error_counter(&self) -> ErrorCounter {
        self.core.errors.clone()
    }
}
