use super::load_toml;
use crate::delay::{DEFAULT_CAPACITY, DEFAULT_STORE_INTERVAL_MS};
use crate::errors::{ConfigError, ConfigResult};
use serde::Deserialize;

/// Root of `simulation.toml`
#[derive(Debug, Deserialize)]
pub struct SimulationConfig {
    /// Simulation step rate
    #[serde(default = "default_step_hz")]
    pub step_hz: u32,
    #[serde(rename = "compass", default)]
    pub compasses: Vec<CompassEntry>,
}

/// One simulated compass, matching each `[[compass]]` section
#[derive(Debug, Deserialize, Clone)]
pub struct CompassEntry {
    pub id: String,
    #[serde(default)]
    pub delay_ms: u64,
    #[serde(default = "default_buffer_len")]
    pub buffer_len: usize,
    #[serde(default = "default_store_interval_ms")]
    pub store_interval_ms: u64,
    /// Earth field in the local level frame (uT)
    #[serde(default = "default_earth_field")]
    pub earth_field: [f32; 3],
    /// Hard-iron offsets subtracted from the delayed reading (uT)
    #[serde(default)]
    pub offsets: [f32; 3],
    /// Uniform noise amplitude per axis (uT)
    #[serde(default)]
    pub noise: f32,
    #[serde(default)]
    pub yaw_error_deg: f32,
    /// Fixed bank and pitch of the synthetic vehicle
    #[serde(default)]
    pub roll_deg: f32,
    #[serde(default)]
    pub pitch_deg: f32,
    /// Synthetic vehicle yaw rate
    #[serde(default = "default_yaw_rate_dps")]
    pub yaw_rate_dps: f32,
    #[serde(default)]
    pub seed: u64,
}

fn default_step_hz() -> u32 {
    400
}

fn default_buffer_len() -> usize {
    DEFAULT_CAPACITY
}

fn default_store_interval_ms() -> u64 {
    DEFAULT_STORE_INTERVAL_MS
}

/// 40 uT field inclined 66 degrees below the horizon
fn default_earth_field() -> [f32; 3] {
    [16.27, 0.0, 36.54]
}

fn default_yaw_rate_dps() -> f32 {
    10.0
}

impl SimulationConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.step_hz == 0 {
            return Err(ConfigError::InvalidValue {
                field: "step_hz".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        for compass in &self.compasses {
            if compass.buffer_len == 0 {
                return Err(ConfigError::InvalidValue {
                    field: format!("compass.{}.buffer_len", compass.id),
                    reason: "must be greater than zero".to_string(),
                });
            }
            if compass.noise < 0.0 {
                return Err(ConfigError::InvalidValue {
                    field: format!("compass.{}.noise", compass.id),
                    reason: "must not be negative".to_string(),
                });
            }
        }
        Ok(())
    }
}

pub fn load_simulation_config(path: &str) -> ConfigResult<SimulationConfig> {
    load_toml(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_compass_defaults() {
        let cfg: SimulationConfig = toml::from_str(
            r#"
            [[compass]]
            id = "mag_sim0"
            delay_ms = 60
            offsets = [1.0, -2.0, 0.5]
            "#,
        )
        .unwrap();

        assert_eq!(cfg.step_hz, 400);
        let compass = &cfg.compasses[0];
        assert_eq!(compass.delay_ms, 60);
        assert_eq!(compass.buffer_len, 50);
        assert_eq!(compass.store_interval_ms, 10);
        assert_eq!(compass.offsets, [1.0, -2.0, 0.5]);
        assert_eq!(compass.noise, 0.0);
        assert_eq!(compass.roll_deg, 0.0);
        assert_eq!(compass.pitch_deg, 0.0);
        cfg.validate().unwrap();
    }

    #[test]
    fn test_rejects_zero_buffer() {
        let cfg: SimulationConfig =
            toml::from_str("[[compass]]\nid = \"m\"\nbuffer_len = 0").unwrap();
        assert!(cfg.validate().is_err());
    }
}
