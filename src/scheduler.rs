use crate::bus::SharedBus;
use crate::sensors::SensorDriver;
use std::collections::HashMap;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, trace};

/// Spawn one fixed-period polling worker per sensor.
///
/// Workers run until their handle is aborted. A late tick is not made up
/// with a burst of polls: the next poll drains whatever accumulated.
pub fn spawn_sensor_tasks(
    sensors: Vec<Box<dyn SensorDriver>>,
    buses: &HashMap<String, SharedBus>,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::with_capacity(sensors.len());

    for mut sensor in sensors.into_iter() {
        let Some(bus) = buses.get(sensor.bus()).cloned() else {
            error!(
                "[scheduler] {} references unknown bus {}, not polling",
                sensor.id(),
                sensor.bus()
            );
            continue;
        };
        let period = sensor.poll_interval();

        handles.push(tokio::spawn(async move {
            info!(
                "[{}] polling every {} us on {}",
                sensor.id(),
                period.as_micros(),
                sensor.bus()
            );
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let report = sensor.poll(&*bus).await;
                if let Some(reason) = report.skipped {
                    trace!("[{}] cycle cut short: {:?}", sensor.id(), reason);
                }
            }
        }));
    }

    handles
}
