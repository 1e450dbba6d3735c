use thiserror::Error;

/// Failure of a single register transaction on a shared bus
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BusError {
    #[error("bus transfer failed: {0}")]
    Transfer(String),

    #[error("bus transaction timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },

    #[error("bus not supported on this platform: {0}")]
    Unsupported(String),
}

/// Sensor bring-up errors. Steady-state polling never returns these.
#[derive(Error, Debug)]
pub enum SensorError {
    #[error("Bus communication failed: {0}")]
    Bus(#[from] BusError),

    #[error("Sensor '{sensor}' initialization failed: {reason}")]
    InitError { sensor: String, reason: String },

    #[error("Invalid sensor configuration for '{sensor}': {reason}")]
    ConfigError { sensor: String, reason: String },

    #[error("Unsupported sensor driver: '{driver}'")]
    UnsupportedDriver { driver: String },

    #[error("Bus '{bus}' not found or unavailable")]
    BusNotFound { bus: String },

    #[error("Sensor '{sensor}' wrong chip ID: expected {expected:#04x}, got {actual:#04x}")]
    WrongChipId { sensor: String, expected: u8, actual: u8 },
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration from '{path}': {source}")]
    LoadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration format: {0}")]
    FormatError(#[from] toml::de::Error),

    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Registry and initialization errors
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Sensor registration failed: {0}")]
    RegistrationError(#[source] SensorError),

    #[error("Bus initialization failed: {0}")]
    BusInitError(#[source] SensorError),

    #[error("Failed to create sensor driver: {0}")]
    DriverCreationError(#[source] SensorError),

    #[error("Configuration rejected: {0}")]
    Config(#[from] ConfigError),
}

pub type SensorResult<T> = Result<T, SensorError>;
pub type ConfigResult<T> = Result<T, ConfigError>;
pub type RegistryResult<T> = Result<T, RegistryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrong_chip_id_message() {
        let err = SensorError::WrongChipId {
            sensor: "gyro0".to_string(),
            expected: 0xd4,
            actual: 0x00,
        };
        assert_eq!(
            err.to_string(),
            "Sensor 'gyro0' wrong chip ID: expected 0xd4, got 0x00"
        );
    }

    #[test]
    fn test_bus_error_converts_into_sensor_error() {
        let err: SensorError = BusError::Timeout { timeout_ms: 20 }.into();
        assert!(matches!(err, SensorError::Bus(BusError::Timeout { timeout_ms: 20 })));
        assert!(err.to_string().contains("20ms"));
    }
}
