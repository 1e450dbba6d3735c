use crate::bus::{with_timeout, RegisterBus, DEFAULT_TRANSACTION_TIMEOUT};
use crate::clock::Clock;
use crate::config::sensor_config::{IdentitySettings, RegisterWrite, SensorEntry, StartupSettings};
use crate::conversion::{Conversion, RawSample};
use crate::errors::{BusError, SensorError, SensorResult};
use crate::health::ErrorCounter;
use crate::messages::{InstanceId, PhysicalSample, SampleKind};
use crate::sink::SampleSink;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

pub mod check;
pub mod direct;
pub mod fifo;

pub use check::{CheckOutcome, RegisterChecker, MAX_CHECKED_REGISTERS};

/// Why a poll cycle ended before draining everything it saw
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another user held the bus
    BusBusy,
    StatusReadFailed,
    DataReadFailed,
    /// Data-ready bit not set
    NotReady,
}

/// What one poll cycle did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    pub delivered: usize,
    /// Data read transactions issued
    pub transactions: usize,
    pub skipped: Option<SkipReason>,
    pub check: Option<CheckOutcome>,
}

#[async_trait]
pub trait SensorDriver: Send + Sync {
    /// Probe and configure the device. The caller holds the bus for the whole sequence.
    async fn init(&mut self, bus: &mut dyn RegisterBus) -> SensorResult<()>;

    /// One acquisition cycle. Never blocks waiting for the bus and never fails:
    /// problems end the cycle early and are reported in the returned summary.
    async fn poll(&mut self, bus: &Mutex<dyn RegisterBus>) -> PollReport;

    fn id(&self) -> &str;
    fn bus(&self) -> &str;
    fn instance(&self) -> InstanceId;
    fn kind(&self) -> SampleKind;
    fn poll_interval(&self) -> Duration;
    fn error_counter(&self) -> ErrorCounter;
}

/// Outcome of a single non-blocking bus access
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Access {
    Busy,
    Failed(BusError),
}

/// Read `buf.len()` bytes if the bus is free right now.
///
/// The lock is held for this one transaction only and released on every exit path.
pub(crate) async fn read_now(
    bus: &Mutex<dyn RegisterBus>,
    address: u8,
    register: u8,
    buf: &mut [u8],
    timeout: Duration,
) -> Result<(), Access> {
    let mut guard = bus.try_lock().map_err(|_| Access::Busy)?;
    with_timeout(timeout, guard.read_registers(address, register, buf))
        .await
        .map_err(Access::Failed)
}

/// State shared by every register-based driver
pub(crate) struct SensorCore {
    pub id: String,
    pub bus_id: String,
    pub instance: InstanceId,
    pub kind: SampleKind,
    pub address: u8,
    pub data_register: u8,
    pub conversion: Conversion,
    pub poll_interval: Duration,
    pub timeout: Duration,
    pub identity: Option<IdentitySettings>,
    pub init_writes: Vec<RegisterWrite>,
    pub startup: Option<StartupSettings>,
    pub checker: RegisterChecker,
    pub errors: ErrorCounter,
    pub sink: Arc<dyn SampleSink>,
    pub clock: Arc<dyn Clock>,
}

impl SensorCore {
    pub fn from_entry(
        entry: &SensorEntry,
        instance: InstanceId,
        sink: Arc<dyn SampleSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let errors = ErrorCounter::new();
        Self {
            id: entry.id.clone(),
            bus_id: entry.bus.clone(),
            instance,
            kind: entry.kind,
            address: entry.address,
            data_register: entry.data_register,
            conversion: Conversion::new(entry.range, entry.negate, entry.rotation)
                .with_byte_order(entry.byte_order),
            poll_interval: entry.poll_interval(),
            timeout: DEFAULT_TRANSACTION_TIMEOUT,
            identity: entry.identity,
            init_writes: entry.init.clone(),
            startup: entry.startup,
            checker: RegisterChecker::new(&entry.id, entry.address, entry.check, errors.clone()),
            errors,
            sink,
            clock,
        }
    }

    pub async fn read(
        &self,
        bus: &Mutex<dyn RegisterBus>,
        register: u8,
        buf: &mut [u8],
    ) -> Result<(), Access> {
        read_now(bus, self.address, register, buf, self.timeout).await
    }

    /// Identity probe, then the configured register writes, repeated until
    /// the device reports data ready when a startup check is configured
    pub async fn initialize(&mut self, bus: &mut dyn RegisterBus) -> SensorResult<()> {
        self.verify_identity(bus).await?;
        match self.startup {
            Some(startup) => self.bring_up(bus, startup).await?,
            None => self.write_init_sequence(bus).await?,
        }

        info!(
            "[{}] initialized {:?} ({}) at {:#04x} on {} ({} checked registers)",
            self.id,
            self.kind,
            self.kind.unit(),
            self.address,
            self.bus_id,
            self.checker.registers().len()
        );
        Ok(())
    }

    async fn verify_identity(&self, bus: &mut dyn RegisterBus) -> SensorResult<()> {
        let Some(identity) = self.identity else {
            return Ok(());
        };
        let mut id = [0u8; 1];
        with_timeout(
            self.timeout,
            bus.read_registers(self.address, identity.register, &mut id),
        )
        .await
        .map_err(|e| SensorError::InitError {
            sensor: self.id.clone(),
            reason: format!("identity read failed: {}", e),
        })?;
        if id[0] != identity.expected {
            return Err(SensorError::WrongChipId {
                sensor: self.id.clone(),
                expected: identity.expected,
                actual: id[0],
            });
        }
        debug!("[{}] chip id {:#04x} ok", self.id, id[0]);
        Ok(())
    }

    async fn write_init_sequence(&mut self, bus: &mut dyn RegisterBus) -> SensorResult<()> {
        for write in &self.init_writes {
            with_timeout(
                self.timeout,
                bus.write_register(self.address, write.register, write.value),
            )
            .await
            .map_err(|e| SensorError::InitError {
                sensor: self.id.clone(),
                reason: format!("write {:#04x} <- {:#04x}: {}", write.register, write.value, e),
            })?;
            if write.checked && !self.checker.record(write.register, write.value) {
                return Err(SensorError::ConfigError {
                    sensor: self.id.clone(),
                    reason: format!("more than {} checked registers", MAX_CHECKED_REGISTERS),
                });
            }
            if write.settle_ms > 0 {
                tokio::time::sleep(Duration::from_millis(write.settle_ms)).await;
            }
        }
        Ok(())
    }

    async fn bring_up(
        &mut self,
        bus: &mut dyn RegisterBus,
        startup: StartupSettings,
    ) -> SensorResult<()> {
        let attempts = startup.attempts.max(1);
        for attempt in 1..=attempts {
            self.write_init_sequence(bus).await?;
            tokio::time::sleep(Duration::from_millis(startup.wait_ms)).await;

            let mut status = [0u8; 1];
            let read = with_timeout(
                self.timeout,
                bus.read_registers(self.address, startup.status_register, &mut status),
            )
            .await;
            match read {
                Ok(()) if status[0] & startup.ready_mask == startup.ready_mask => {
                    debug!("[{}] data ready after {} attempt(s)", self.id, attempt);
                    return Ok(());
                }
                Ok(()) => debug!(
                    "[{}] attempt {}/{}: status {:#04x}, not ready",
                    self.id, attempt, attempts, status[0]
                ),
                Err(e) => debug!(
                    "[{}] attempt {}/{}: status read failed: {}",
                    self.id, attempt, attempts, e
                ),
            }
        }
        Err(SensorError::InitError {
            sensor: self.id.clone(),
            reason: format!("no data ready after {} attempts", attempts),
        })
    }

    /// Convert a record and hand it to the sink
    pub fn emit(&self, raw: RawSample, timestamp_ms: u64) {
        let vector = self.conversion.apply(raw);
        self.sink
            .deliver(self.instance, PhysicalSample::new(self.kind, vector, timestamp_ms));
    }

    /// Count one poll and run the consistency check when it is due
    pub async fn run_check(&mut self, bus: &Mutex<dyn RegisterBus>) -> Option<CheckOutcome> {
        if !self.checker.tick() {
            return None;
        }
        self.checker.check_next(bus, self.timeout).await
    }
}

/// Build a driver for one configured sensor
pub fn create_sensor_driver(
    entry: &SensorEntry,
    instance: InstanceId,
    sink: Arc<dyn SampleSink>,
    clock: Arc<dyn Clock>,
) -> SensorResult<Box<dyn SensorDriver>> {
    let core = SensorCore::from_entry(entry, instance, sink, clock);
    match entry.driver.as_str() {
        "fifo" => {
            let settings = entry.fifo.ok_or_else(|| SensorError::ConfigError {
                sensor: entry.id.clone(),
                reason: "missing [sensor.fifo] table".to_string(),
            })?;
            Ok(Box::new(fifo::FifoDrain::new(core, settings)))
        }
        "direct" => {
            let settings = entry.ready.ok_or_else(|| SensorError::ConfigError {
                sensor: entry.id.clone(),
                reason: "missing [sensor.ready] table".to_string(),
            })?;
            Ok(Box::new(direct::DirectRead::new(core, settings)))
        }
        other => Err(SensorError::UnsupportedDriver {
            driver: other.to_string(),
        }),
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::bus::mock::{MockBus, Transaction};
    use crate::clock::ManualClock;
    use crate::sink::testing::CollectingSink;

    fn core(entry: &SensorEntry) -> SensorCore {
        SensorCore::from_entry(
            entry,
            InstanceId(0),
            Arc::new(CollectingSink::default()),
            ManualClock::new(0),
        )
    }

    #[tokio::test]
    async fn test_initialize_writes_and_records() {
        let entry = fifo_entry(8);
        let mut core = core(&entry);
        let mut bus = MockBus::new();

        core.initialize(&mut bus).await.unwrap();

        assert_eq!(bus.register(GYRO_ADDR, 0x20), Some(0xef));
        assert_eq!(bus.register(GYRO_ADDR, 0x23), Some(0xa0));
        assert_eq!(core.checker.registers(), &[(0x20, 0xef), (0x23, 0xa0)]);
    }

    #[tokio::test]
    async fn test_identity_mismatch_rejected() {
        let mut entry = fifo_entry(8);
        entry.identity = Some(IdentitySettings {
            register: 0x0f,
            expected: 0xd4,
        });
        let mut core = core(&entry);
        let mut bus = MockBus::new();
        bus.set_register(GYRO_ADDR, 0x0f, 0x49);

        let err = core.initialize(&mut bus).await.unwrap_err();
        assert!(matches!(
            err,
            SensorError::WrongChipId {
                expected: 0xd4,
                actual: 0x49,
                ..
            }
        ));
        // nothing written after a failed probe
        assert!(!bus
            .transactions()
            .iter()
            .any(|t| matches!(t, Transaction::Write { .. })));
    }

    #[tokio::test]
    async fn test_failed_init_write_reported() {
        let entry = fifo_entry(8);
        let mut core = core(&entry);
        let mut bus = MockBus::new();
        bus.fail_writes(GYRO_ADDR, 0x23, 1);

        let err = core.initialize(&mut bus).await.unwrap_err();
        assert!(matches!(err, SensorError::InitError { .. }));
    }

    fn startup(attempts: u32) -> StartupSettings {
        StartupSettings {
            status_register: 0x27,
            ready_mask: 0x08,
            attempts,
            wait_ms: 0,
        }
    }

    fn ctrl1_writes(bus: &MockBus) -> usize {
        bus.transactions()
            .iter()
            .filter(|t| matches!(t, Transaction::Write { register: 0x20, .. }))
            .count()
    }

    #[tokio::test]
    async fn test_init_repeated_until_data_ready() {
        let mut entry = fifo_entry(8);
        entry.startup = Some(startup(5));
        let mut core = core(&entry);
        let mut bus = MockBus::new();
        // first pass leaves the device idle
        bus.script_status(GYRO_ADDR, 0x27, 0x00);
        bus.set_register(GYRO_ADDR, 0x27, 0x0f);

        core.initialize(&mut bus).await.unwrap();

        assert_eq!(ctrl1_writes(&bus), 2);
        assert_eq!(core.checker.registers(), &[(0x20, 0xef), (0x23, 0xa0)]);
    }

    #[tokio::test]
    async fn test_init_gives_up_without_data_ready() {
        let mut entry = fifo_entry(8);
        entry.startup = Some(startup(3));
        let mut core = core(&entry);
        let mut bus = MockBus::new();
        bus.set_register(GYRO_ADDR, 0x27, 0x04);
        bus.fail_reads(GYRO_ADDR, 0x27, 1);

        let err = core.initialize(&mut bus).await.unwrap_err();

        assert!(matches!(err, SensorError::InitError { .. }));
        assert!(err.to_string().contains("3 attempts"));
        assert_eq!(ctrl1_writes(&bus), 3);
    }

    #[tokio::test]
    async fn test_read_now_reports_busy() {
        let bus: Arc<Mutex<dyn RegisterBus>> = Arc::new(Mutex::new(MockBus::new()));
        let _held = bus.lock().await;
        let mut buf = [0u8; 1];
        let result = read_now(&*bus, GYRO_ADDR, GYRO_STATUS, &mut buf, DEFAULT_TRANSACTION_TIMEOUT).await;
        assert_eq!(result, Err(Access::Busy));
    }

    #[test]
    fn test_factory_rejects_unknown_driver() {
        let mut entry = fifo_entry(8);
        entry.driver = "spi_magic".to_string();
        let result = create_sensor_driver(
            &entry,
            InstanceId(0),
            Arc::new(CollectingSink::default()),
            ManualClock::new(0),
        );
        assert!(matches!(result, Err(SensorError::UnsupportedDriver { .. })));
    }

    #[test]
    fn test_factory_builds_fifo_driver() {
        let entry = fifo_entry(8);
        let driver = create_sensor_driver(
            &entry,
            InstanceId(3),
            Arc::new(CollectingSink::default()),
            ManualClock::new(0),
        )
        .unwrap();
        assert_eq!(driver.id(), "gyro0");
        assert_eq!(driver.bus(), "i2c1");
        assert_eq!(driver.instance(), InstanceId(3));
        assert_eq!(driver.poll_interval(), Duration::from_micros(1250));
    }
}
