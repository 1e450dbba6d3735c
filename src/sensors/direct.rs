use super::{Access, PollReport, SensorCore, SensorDriver, SkipReason};
use crate::bus::RegisterBus;
use crate::config::sensor_config::ReadySettings;
use crate::conversion::{RawSample, SAMPLE_SIZE};
use crate::errors::SensorResult;
use crate::health::ErrorCounter;
use crate::messages::{InstanceId, SampleKind};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::trace;

/// Single-sample reads gated on a data-ready status bit, for devices without a FIFO
pub struct DirectRead {
    core: SensorCore,
    ready: ReadySettings,
}

impl DirectRead {
    pub(crate) fn new(core: SensorCore, ready: ReadySettings) -> Self {
        Self { core, ready }
    }

    async fn read_sample(&mut self, bus: &Mutex<dyn RegisterBus>, report: &mut PollReport) {
        let mut status = [0u8; 1];
        match self.core.read(bus, self.ready.status_register, &mut status).await {
            Ok(()) => {}
            Err(Access::Busy) => {
                report.skipped = Some(SkipReason::BusBusy);
                return;
            }
            Err(Access::Failed(e)) => {
                trace!("[{}] status read failed: {}", self.core.id, e);
                report.skipped = Some(SkipReason::StatusReadFailed);
                return;
            }
        }
        if status[0] & self.ready.ready_mask != self.ready.ready_mask {
            report.skipped = Some(SkipReason::NotReady);
            return;
        }

        let mut record = [0u8; SAMPLE_SIZE];
        match self.core.read(bus, self.core.data_register, &mut record).await {
            Ok(()) => report.transactions += 1,
            Err(Access::Busy) => {
                report.skipped = Some(SkipReason::BusBusy);
                return;
            }
            Err(Access::Failed(e)) => {
                report.transactions += 1;
                trace!("[{}] data read failed: {}", self.core.id, e);
                report.skipped = Some(SkipReason::DataReadFailed);
                return;
            }
        }

        let raw = RawSample::decode(&record, self.core.conversion.byte_order);
        self.core.emit(raw, self.core.clock.now_ms());
        report.delivered = 1;
    }
}

#[async_trait]
impl SensorDriver for DirectRead {
    async fn init(&mut self, bus: &mut dyn RegisterBus) -> SensorResult<()> {
        self.core.initialize(bus).await
    }

    async fn poll(&mut self, bus: &Mutex<dyn RegisterBus>) -> PollReport {
        let mut report = PollReport::default();
        self.read_sample(bus, &mut report).await;
        report.check = self.core.run_check(bus).await;
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
