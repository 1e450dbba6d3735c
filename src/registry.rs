use crate::bus::i2c::I2CBus;
use crate::bus::{BusType, SharedBus};
use crate::clock::Clock;
use crate::config::{BusConfig, SensorConfig, SensorEntry};
use crate::delay::{DelayLine, DelayedSink, DEFAULT_CAPACITY, DEFAULT_STORE_INTERVAL_MS};
use crate::errors::{RegistryError, RegistryResult, SensorError};
use crate::hub::SampleHub;
use crate::messages::InstanceId;
use crate::sensors::{create_sensor_driver, SensorDriver};
use crate::sink::SampleSink;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// Open every configured bus
pub fn open_buses(bus_cfg: &BusConfig) -> RegistryResult<HashMap<String, SharedBus>> {
    let mut buses: HashMap<String, SharedBus> = HashMap::new();
    for entry in &bus_cfg.buses {
        match entry.bus_type()? {
            BusType::I2C => {
                let bus = I2CBus::new(&entry.path).map_err(|e| {
                    RegistryError::BusInitError(SensorError::InitError {
                        sensor: entry.id.clone(),
                        reason: format!("cannot open {}: {}", entry.path, e),
                    })
                })?;
                info!("[registry] opened bus {} at {}", entry.id, bus.path());
                buses.insert(entry.id.clone(), Arc::new(Mutex::new(bus)));
            }
        }
    }
    Ok(buses)
}

/// The sink a sensor's samples go to: the hub, optionally behind a delay line
fn sink_for(entry: &SensorEntry, hub: &Arc<SampleHub>, clock: &Arc<dyn Clock>) -> Arc<dyn SampleSink> {
    match entry.delay_ms {
        Some(delay_ms) if delay_ms > 0 => {
            // enough slots to reach back `delay_ms` at the storage interval
            let capacity = DEFAULT_CAPACITY.max((delay_ms / DEFAULT_STORE_INTERVAL_MS) as usize + 1);
            info!("[registry] {} delayed by {} ms ({} slots)", entry.id, delay_ms, capacity);
            Arc::new(DelayedSink::new(
                hub.clone(),
                DelayLine::with_capacity(capacity),
                delay_ms,
                clock.clone(),
            ))
        }
        _ => hub.clone(),
    }
}

/// Build and initialize a driver for every configured sensor.
///
/// Initialization waits for each bus as long as it takes.
pub async fn init_sensors(
    sensor_cfg: &SensorConfig,
    buses: &HashMap<String, SharedBus>,
    hub: Arc<SampleHub>,
    clock: Arc<dyn Clock>,
) -> RegistryResult<Vec<Box<dyn SensorDriver>>> {
    let mut sensors: Vec<Box<dyn SensorDriver>> = Vec::new();
    info!("[registry] initializing {} sensors...", sensor_cfg.sensors.len());

    for (index, entry) in sensor_cfg.sensors.iter().enumerate() {
        let instance = InstanceId(u8::try_from(index).map_err(|_| {
            RegistryError::DriverCreationError(SensorError::ConfigError {
                sensor: entry.id.clone(),
                reason: "too many sensor instances".to_string(),
            })
        })?);
        let sink = sink_for(entry, &hub, &clock);
        let mut sensor = create_sensor_driver(entry, instance, sink, clock.clone())
            .map_err(RegistryError::DriverCreationError)?;
        info!(
            "[registry] registering sensor: id={} driver={} bus={} instance={}",
            entry.id, entry.driver, entry.bus, instance
        );

        let bus = buses.get(&entry.bus).ok_or_else(|| {
            RegistryError::DriverCreationError(SensorError::BusNotFound {
                bus: entry.bus.clone(),
            })
        })?;
        {
            let mut guard = bus.lock().await;
            sensor
                .init(&mut *guard)
                .await
                .map_err(RegistryError::RegistrationError)?;
        }

        hub.register_instance(instance, &entry.id, sensor.error_counter());
        sensors.push(sensor);
    }

    Ok(sensors)
}

/// Validate configuration, open buses and bring up every sensor
pub async fn init_all(
    sensor_cfg: &SensorConfig,
    bus_cfg: &BusConfig,
    hub: Arc<SampleHub>,
    clock: Arc<dyn Clock>,
) -> RegistryResult<(Vec<Box<dyn SensorDriver>>, HashMap<String, SharedBus>)> {
    sensor_cfg.validate(bus_cfg)?;
    let buses = open_buses(bus_cfg)?;
    let sensors = init_sensors(sensor_cfg, &buses, hub, clock).await?;
    Ok((sensors, buses))
}
