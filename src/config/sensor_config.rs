use super::{load_toml, BusConfig};
use crate::conversion::{AxisSigns, ByteOrder, FullScaleRange, Rotation};
use crate::errors::{ConfigError, ConfigResult};
use crate::messages::SampleKind;
use crate::sensors::fifo::MAX_FIFO_BATCH;
use crate::sensors::MAX_CHECKED_REGISTERS;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;

/// Root configuration struct expecting `[[sensor]]` TOML array format
#[derive(Debug, Deserialize)]
pub struct SensorConfig {
    #[serde(rename = "sensor")]
    pub sensors: Vec<SensorEntry>,
}

/// One sensor entry, matching each `[[sensor]]` section
#[derive(Debug, Deserialize, Clone)]
pub struct SensorEntry {
    pub id: String,
    pub driver: String,
    pub kind: SampleKind,
    pub bus: String,
    pub address: u8,
    pub range: FullScaleRange,
    #[serde(default)]
    pub rotation: Rotation,
    #[serde(default)]
    pub negate: AxisSigns,
    #[serde(default)]
    pub byte_order: ByteOrder,
    #[serde(default = "default_poll_interval_us")]
    pub poll_interval_us: u64,
    pub data_register: u8,
    pub fifo: Option<FifoSettings>,
    pub ready: Option<ReadySettings>,
    pub identity: Option<IdentitySettings>,
    #[serde(default)]
    pub check: CheckSettings,
    #[serde(default)]
    pub init: Vec<RegisterWrite>,
    pub startup: Option<StartupSettings>,
    /// Re-emit this instance's samples through a delay line
    pub delay_ms: Option<u64>,
}

/// FIFO status register layout
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct FifoSettings {
    pub status_register: u8,
    #[serde(default = "default_count_mask")]
    pub count_mask: u8,
    #[serde(default = "default_empty_flag")]
    pub empty_flag: u8,
    #[serde(default = "default_overrun_flag")]
    pub overrun_flag: u8,
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,
}

/// Data-ready status for devices without a FIFO
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct ReadySettings {
    pub status_register: u8,
    pub ready_mask: u8,
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct IdentitySettings {
    pub register: u8,
    pub expected: u8,
}

/// Bring-up confirmation: the init sequence is repeated until the
/// data-ready bits show the device producing samples
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct StartupSettings {
    pub status_register: u8,
    pub ready_mask: u8,
    #[serde(default = "default_startup_attempts")]
    pub attempts: u32,
    /// Wait after each init pass before looking at the status register
    #[serde(default = "default_startup_wait_ms")]
    pub wait_ms: u64,
}

/// Register consistency check cadence
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct CheckSettings {
    #[serde(default = "default_check_interval")]
    pub interval: u32,
    #[serde(default = "default_restore")]
    pub restore: bool,
}

impl Default for CheckSettings {
    fn default() -> Self {
        Self {
            interval: default_check_interval(),
            restore: default_restore(),
        }
    }
}

/// One step of the init sequence
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct RegisterWrite {
    pub register: u8,
    pub value: u8,
    /// Include this register in the periodic consistency check
    #[serde(default)]
    pub checked: bool,
    #[serde(default)]
    pub settle_ms: u64,
}

fn default_poll_interval_us() -> u64 {
    1250
}

fn default_count_mask() -> u8 {
    0x1f
}

fn default_empty_flag() -> u8 {
    0x20
}

fn default_overrun_flag() -> u8 {
    0x40
}

fn default_batch_limit() -> usize {
    MAX_FIFO_BATCH
}

fn default_startup_attempts() -> u32 {
    5
}

fn default_startup_wait_ms() -> u64 {
    10
}

fn default_check_interval() -> u32 {
    10
}

fn default_restore() -> bool {
    true
}

impl SensorEntry {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_micros(self.poll_interval_us)
    }

    fn invalid(&self, field: &str, reason: impl Into<String>) -> ConfigError {
        ConfigError::InvalidValue {
            field: format!("sensor.{}.{}", self.id, field),
            reason: reason.into(),
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.range.kind() != self.kind {
            return Err(self.invalid(
                "range",
                format!("{:?} is not a {:?} range", self.range, self.kind),
            ));
        }
        if self.poll_interval_us == 0 {
            return Err(self.invalid("poll_interval_us", "must be greater than zero"));
        }
        if self.check.interval == 0 {
            return Err(self.invalid("check.interval", "must be greater than zero"));
        }
        if let Some(startup) = self.startup {
            if startup.attempts == 0 {
                return Err(self.invalid("startup.attempts", "must be greater than zero"));
            }
            if startup.ready_mask == 0 {
                return Err(self.invalid("startup.ready_mask", "must select at least one bit"));
            }
        }
        let checked = self.init.iter().filter(|w| w.checked).count();
        if checked > MAX_CHECKED_REGISTERS {
            return Err(self.invalid(
                "init",
                format!(
                    "{} checked registers, at most {} supported",
                    checked, MAX_CHECKED_REGISTERS
                ),
            ));
        }
        match self.driver.as_str() {
            "fifo" => {
                let fifo = self
                    .fifo
                    .ok_or_else(|| self.invalid("fifo", "required by the fifo driver"))?;
                if fifo.batch_limit == 0 || fifo.batch_limit > MAX_FIFO_BATCH {
                    return Err(self.invalid(
                        "fifo.batch_limit",
                        format!("must be between 1 and {}", MAX_FIFO_BATCH),
                    ));
                }
            }
            "direct" => {
                self.ready
                    .ok_or_else(|| self.invalid("ready", "required by the direct driver"))?;
            }
            other => {
                return Err(self.invalid("driver", format!("unknown driver '{}'", other)));
            }
        }
        Ok(())
    }
}

impl SensorConfig {
    /// Check every entry and its bus references
    pub fn validate(&self, buses: &BusConfig) -> ConfigResult<()> {
        let mut seen = HashSet::new();
        for sensor in &self.sensors {
            if !seen.insert(sensor.id.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate sensor id '{}'",
                    sensor.id
                )));
            }
            if !buses.contains(&sensor.bus) {
                return Err(ConfigError::ValidationError(format!(
                    "sensor '{}' references undeclared bus '{}'",
                    sensor.id, sensor.bus
                )));
            }
            sensor.validate()?;
        }
        if self.sensors.len() > u8::MAX as usize {
            return Err(ConfigError::ValidationError(
                "too many sensor instances".to_string(),
            ));
        }
        Ok(())
    }
}

/// Loads config from TOML file
pub fn load_sensor_config(path: &str) -> ConfigResult<SensorConfig> {
    load_toml(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    const GYRO: &str = r#"
        [[sensor]]
        id = "gyro0"
        driver = "fifo"
        kind = "gyro"
        bus = "i2c1"
        address = 0x6b
        range = "2000dps"
        negate = [false, true, true]
        data_register = 0xa8

        [sensor.fifo]
        status_register = 0x2f

        [[sensor.init]]
        register = 0x20
        value = 0xef
        checked = true
        settle_ms = 1

        [[sensor.init]]
        register = 0x23
        value = 0xa0
        checked = true
    "#;

    fn buses() -> BusConfig {
        toml::from_str("[[bus]]\nid = \"i2c1\"\ntype = \"i2c\"\npath = \"/dev/i2c-1\"").unwrap()
    }

    #[test]
    fn test_parse_with_defaults() {
        let cfg: SensorConfig = toml::from_str(GYRO).unwrap();
        let gyro = &cfg.sensors[0];

        assert_eq!(gyro.address, 0x6b);
        assert_eq!(gyro.range, FullScaleRange::Dps2000);
        assert_eq!(gyro.rotation, Rotation::None);
        assert_eq!(gyro.negate, AxisSigns([false, true, true]));
        assert_eq!(gyro.byte_order, ByteOrder::Little);
        assert_eq!(gyro.poll_interval(), Duration::from_micros(1250));

        let fifo = gyro.fifo.unwrap();
        assert_eq!(fifo.count_mask, 0x1f);
        assert_eq!(fifo.empty_flag, 0x20);
        assert_eq!(fifo.overrun_flag, 0x40);
        assert_eq!(fifo.batch_limit, MAX_FIFO_BATCH);

        assert_eq!(gyro.check.interval, 10);
        assert!(gyro.check.restore);
        assert_eq!(gyro.init.len(), 2);
        assert_eq!(gyro.init[0].settle_ms, 1);
        assert!(gyro.delay_ms.is_none());
        assert!(gyro.startup.is_none());

        cfg.validate(&buses()).unwrap();
    }

    #[test]
    fn test_rejects_mismatched_range() {
        let text = GYRO.replace("\"2000dps\"", "\"16g\"");
        let cfg: SensorConfig = toml::from_str(&text).unwrap();
        let err = cfg.validate(&buses()).unwrap_err();
        assert!(err.to_string().contains("sensor.gyro0.range"));
    }

    #[test]
    fn test_rejects_oversized_batch() {
        let text = GYRO.replace("status_register = 0x2f", "status_register = 0x2f\nbatch_limit = 9");
        let cfg: SensorConfig = toml::from_str(&text).unwrap();
        assert!(cfg.validate(&buses()).is_err());
    }

    #[test]
    fn test_rejects_unknown_bus_and_duplicates() {
        let text = GYRO.replace("bus = \"i2c1\"", "bus = \"i2c7\"");
        let cfg: SensorConfig = toml::from_str(&text).unwrap();
        assert!(matches!(
            cfg.validate(&buses()),
            Err(ConfigError::ValidationError(_))
        ));

        let doubled = format!("{}{}", GYRO, GYRO);
        let cfg: SensorConfig = toml::from_str(&doubled).unwrap();
        let err = cfg.validate(&buses()).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_startup_defaults_and_zero_attempts() {
        let text = format!("{}\n[sensor.startup]\nstatus_register = 0x27\nready_mask = 0x08\n", GYRO);
        let cfg: SensorConfig = toml::from_str(&text).unwrap();
        let startup = cfg.sensors[0].startup.unwrap();
        assert_eq!(startup.attempts, 5);
        assert_eq!(startup.wait_ms, 10);
        cfg.validate(&buses()).unwrap();

        let text = text.replace("ready_mask = 0x08", "ready_mask = 0x08\nattempts = 0");
        let cfg: SensorConfig = toml::from_str(&text).unwrap();
        let err = cfg.validate(&buses()).unwrap_err();
        assert!(err.to_string().contains("startup.attempts"));
    }

    #[test]
    fn test_direct_driver_needs_ready_table() {
        let text = GYRO.replace("driver = \"fifo\"", "driver = \"direct\"");
        let cfg: SensorConfig = toml::from_str(&text).unwrap();
        assert!(cfg.validate(&buses()).is_err());
    }
}
