// Public modules
pub mod bus;
pub mod clock;
pub mod config;
pub mod conversion;
pub mod delay;
pub mod errors;
pub mod health;
pub mod hub;
pub mod messages;
pub mod registry;
pub mod scheduler;
pub mod sensors;
pub mod sim;
pub mod sink;

// Re-export commonly used types
pub use config::{load_bus_config, load_sensor_config, load_simulation_config, SensorConfig};
pub use delay::{DelayLine, DelayedSink};
pub use errors::{SensorError, SensorResult};
pub use hub::SampleHub;
pub use registry::init_all;
pub use scheduler::spawn_sensor_tasks;
pub use sensors::SensorDriver;
pub use sink::SampleSink;

use clock::{Clock, MonotonicClock};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(10);

/// Initialize tracing with default configuration
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();
}

fn env_flag(name: &str) -> bool {
    matches!(
        std::env::var(name).as_deref(),
        Ok("1") | Ok("true") | Ok("yes")
    )
}

/// Bring up hardware sensors from `buses.toml` and `sensors.toml`
async fn start_hardware(
    config_path: &str,
    hub: Arc<SampleHub>,
    clock: Arc<dyn Clock>,
) -> Result<Vec<JoinHandle<()>>, Box<dyn std::error::Error>> {
    let bus_config = load_bus_config(&format!("{}/buses.toml", config_path))?;
    let sensor_config = load_sensor_config(&format!("{}/sensors.toml", config_path))?;
    info!(
        "[config] loaded {} bus(es), {} sensor(s)",
        bus_config.buses.len(),
        sensor_config.sensors.len()
    );

    let (sensors, buses) = init_all(&sensor_config, &bus_config, hub, clock).await?;
    info!("[registry] sensors and buses initialized");
    Ok(spawn_sensor_tasks(sensors, &buses))
}

/// Start the simulated compasses from `simulation.toml`
fn start_simulation(
    config_path: &str,
    hub: Arc<SampleHub>,
    clock: Arc<dyn Clock>,
) -> Result<Vec<JoinHandle<()>>, Box<dyn std::error::Error>> {
    let sim_config = load_simulation_config(&format!("{}/simulation.toml", config_path))?;
    sim_config.validate()?;
    info!("[config] simulating {} compass(es)", sim_config.compasses.len());
    Ok(sim::spawn_compasses(&sim_config, hub, clock, 0))
}

/// Print every published message as one JSON line on stdout
fn spawn_json_printer(hub: &SampleHub) -> JoinHandle<()> {
    let mut stream = hub.subscribe();
    tokio::spawn(async move {
        while let Some(item) = stream.next().await {
            match item {
                Ok(message) => match message.to_json() {
                    Ok(line) => println!("{}", line),
                    Err(e) => warn!("[output] failed to encode message: {}", e),
                },
                Err(e) => warn!("[output] subscriber lagging: {}", e),
            }
        }
    })
}

/// Periodic one-line health summary per instance
fn spawn_health_log(hub: Arc<SampleHub>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(HEALTH_LOG_INTERVAL);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            for health in hub.status() {
                match health.to_json() {
                    Ok(line) => info!("[health] {}", line),
                    Err(e) => warn!("[health] failed to encode {}: {}", health.sensor_id, e),
                }
            }
        }
    })
}

/// Run the sensor hub with the given configuration path until ctrl-c
pub async fn run_sensor_hub(config_path: &str) -> Result<(), Box<dyn std::error::Error>> {
    info!("[FifoSensorHub] starting up...");

    let device_id = std::env::var("DEVICE_ID").unwrap_or_else(|_| "fifo_sensorhub".to_string());
    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
    let hub = Arc::new(SampleHub::new(device_id, hub::DEFAULT_CHANNEL_CAPACITY));

    let mut handles = if env_flag("SIMULATE") {
        info!("[main] SIMULATE set, using simulated sensors");
        start_simulation(config_path, hub.clone(), clock)?
    } else {
        start_hardware(config_path, hub.clone(), clock).await?
    };
    info!("[main] {} sensor task(s) launched", handles.len());

    if env_flag("JSON_OUTPUT") {
        handles.push(spawn_json_printer(&hub));
    }
    handles.push(spawn_health_log(hub.clone()));

    tokio::signal::ctrl_c().await?;
    info!("[main] shutting down");
    for handle in &handles {
        handle.abort();
    }
    for handle in handles {
        let _ = handle.await;
    }

    Ok(())
}
