use fifo_sensorhub::{init_tracing, run_sensor_hub};

/// Default configuration directory
const CONFIG_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/config");

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    // Get config path (default or override)
    let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| CONFIG_DIR.to_string());
    tracing::info!("[main] Configuration path: {}", config_path);

    run_sensor_hub(&config_path).await
}
