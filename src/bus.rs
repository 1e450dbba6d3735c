pub mod i2c;
#[cfg(test)]
pub(crate) mod mock;

use crate::errors::BusError;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Default upper bound for a single register transaction
pub const DEFAULT_TRANSACTION_TIMEOUT: Duration = Duration::from_millis(20);

/// Register-oriented access to devices on a serial bus.
///
/// Every call is one bus transaction. Implementations must not block
/// indefinitely; callers additionally bound each call with [`with_timeout`].
#[async_trait]
pub trait RegisterBus: Send {
    /// Burst-read `buf.len()` bytes starting at `register`
    async fn read_registers(
        &mut self,
        address: u8,
        register: u8,
        buf: &mut [u8],
    ) -> Result<(), BusError>;

    /// Write a single register
    async fn write_register(&mut self, address: u8, register: u8, value: u8)
        -> Result<(), BusError>;
}

/// A bus shared between polling workers. One transaction at a time.
pub type SharedBus = Arc<Mutex<dyn RegisterBus>>;

/// Bus type enum for different communication interfaces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusType {
    I2C,
}

impl BusType {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "i2c" => Some(BusType::I2C),
            _ => None,
        }
    }
}

/// Run one bus transaction, treating an elapsed deadline as a failed transaction
pub async fn with_timeout<F>(timeout: Duration, transaction: F) -> Result<(), BusError>
where
    F: Future<Output = Result<(), BusError>>,
{
    match tokio::time::timeout(timeout, transaction).await {
        Ok(result) => result,
        Err(_) => Err(BusError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}
