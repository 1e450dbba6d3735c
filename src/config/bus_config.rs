use super::load_toml;
use crate::bus::BusType;
use crate::errors::{ConfigError, ConfigResult};
use serde::Deserialize;

/// Root structure for loading `[[bus]]` style TOML config
#[derive(Debug, Deserialize)]
pub struct BusConfig {
    #[serde(rename = "bus")]
    pub buses: Vec<BusEntry>,
}

/// One bus entry
#[derive(Debug, Deserialize, Clone)]
pub struct BusEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub r#type: String, // 'type' is a reserved word in Rust, use raw identifier
    pub path: String,
}

impl BusEntry {
    pub fn bus_type(&self) -> ConfigResult<BusType> {
        BusType::from_str(&self.r#type).ok_or_else(|| ConfigError::InvalidValue {
            field: format!("bus.{}.type", self.id),
            reason: format!("unknown bus type '{}'", self.r#type),
        })
    }
}

impl BusConfig {
    pub fn contains(&self, id: &str) -> bool {
        self.buses.iter().any(|b| b.id == id)
    }
}

/// Load bus config file
pub fn load_bus_config(path: &str) -> ConfigResult<BusConfig> {
    load_toml(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bus_config() {
        let cfg: BusConfig = toml::from_str(
            r#"
            [[bus]]
            id = "i2c1"
            type = "i2c"
            path = "/dev/i2c-1"

            [[bus]]
            id = "spi0"
            type = "spi"
            path = "/dev/spidev0.0"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.buses.len(), 2);
        assert!(cfg.contains("i2c1"));
        assert_eq!(cfg.buses[0].bus_type().unwrap(), BusType::I2C);
        assert!(cfg.buses[1].bus_type().is_err());
    }

    #[test]
    fn test_missing_file_is_load_error() {
        let err = load_bus_config("/nonexistent/buses.toml").unwrap_err();
        assert!(matches!(err, ConfigError::LoadError { .. }));
    }
}
