pub mod bus_config;
pub mod sensor_config;
pub mod simulation_config;

pub use bus_config::{load_bus_config, BusConfig, BusEntry};
pub use sensor_config::{load_sensor_config, SensorConfig, SensorEntry};
pub use simulation_config::{load_simulation_config, CompassEntry, SimulationConfig};

use crate::errors::{ConfigError, ConfigResult};
use serde::de::DeserializeOwned;
use std::fs;

/// Read and parse one TOML file
pub(crate) fn load_toml<T: DeserializeOwned>(path: &str) -> ConfigResult<T> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::LoadError {
        path: path.to_string(),
        source,
    })?;
    Ok(toml::from_str(&content)?)
}
