use super::RegisterBus;
use crate::errors::BusError;
use async_trait::async_trait;
#[cfg(target_os = "linux")]
use i2cdev::core::{I2CDevice, I2CMessage, I2CTransfer};
#[cfg(target_os = "linux")]
use i2cdev::linux::{LinuxI2CDevice, LinuxI2CMessage};
use std::sync::{Arc, Mutex};

/// Largest read served by a single SMBus block transfer
#[cfg(target_os = "linux")]
const SMBUS_BLOCK_MAX: usize = 32;

/// I2C bus implementation.
///
/// The i2cdev calls are blocking ioctls. Each one runs on the blocking pool
/// so a stuck transfer never stalls the runtime and the caller's
/// [`with_timeout`](super::with_timeout) still fires. A transfer abandoned by
/// a timeout finishes in the background while holding the device, so the
/// next transaction waits for it.
#[cfg(target_os = "linux")]
pub struct I2CBus {
    device: Arc<Mutex<LinuxI2CDevice>>,
    path: String,
}

#[cfg(not(target_os = "linux"))]
pub struct I2CBus {
    path: String,
}

#[cfg(target_os = "linux")]
impl I2CBus {
    pub fn new(path: &str) -> Result<Self, BusError> {
        let device =
            LinuxI2CDevice::new(path, 0).map_err(|e| BusError::Transfer(e.to_string()))?;
        Ok(Self {
            device: Arc::new(Mutex::new(device)),
            path: path.to_string(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    async fn run<T, F>(&self, op: F) -> Result<T, BusError>
    where
        T: Send + 'static,
        F: FnOnce(&mut LinuxI2CDevice) -> Result<T, BusError> + Send + 'static,
    {
        blocking_transfer(&self.device, op).await
    }
}

/// Run one blocking transfer against `device` on the blocking pool
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
async fn blocking_transfer<D, T, F>(device: &Arc<Mutex<D>>, op: F) -> Result<T, BusError>
where
    D: Send + 'static,
    T: Send + 'static,
    F: FnOnce(&mut D) -> Result<T, BusError> + Send + 'static,
{
    let device = device.clone();
    tokio::task::spawn_blocking(move || {
        let mut device = device.lock().unwrap_or_else(|e| e.into_inner());
        op(&mut *device)
    })
    .await
    .map_err(|e| BusError::Transfer(format!("transfer task failed: {}", e)))?
}

#[cfg(target_os = "linux")]
fn read_block(
    device: &mut LinuxI2CDevice,
    address: u8,
    register: u8,
    len: usize,
) -> Result<Vec<u8>, BusError> {
    device
        .set_slave_address(address as u16)
        .map_err(|e| BusError::Transfer(e.to_string()))?;

    if len == 1 {
        // Use SMBus read byte data for single byte reads
        let byte = device
            .smbus_read_byte_data(register)
            .map_err(|e| BusError::Transfer(e.to_string()))?;
        return Ok(vec![byte]);
    }

    if len <= SMBUS_BLOCK_MAX {
        let block = device
            .smbus_read_i2c_block_data(register, len as u8)
            .map_err(|e| BusError::Transfer(e.to_string()))?;
        if block.len() != len {
            return Err(BusError::ShortRead {
                expected: len,
                actual: block.len(),
            });
        }
        return Ok(block);
    }

    // FIFO bursts exceed the SMBus block limit; use a combined write/read
    let reg = [register];
    let mut data = vec![0u8; len];
    {
        let mut messages = [LinuxI2CMessage::write(&reg), LinuxI2CMessage::read(&mut data)];
        device
            .transfer(&mut messages)
            .map_err(|e| BusError::Transfer(e.to_string()))?;
    }
    Ok(data)
}

#[cfg(target_os = "linux")]
#[async_trait]
impl RegisterBus for I2CBus {
    async fn read_registers(
        &mut self,
        address: u8,
        register: u8,
        buf: &mut [u8],
    ) -> Result<(), BusError> {
        let len = buf.len();
        let data = self
            .run(move |device| read_block(device, address, register, len))
            .await?;
        buf.copy_from_slice(&data);
        Ok(())
    }

    async fn write_register(
        &mut self,
        address: u8,
        register: u8,
        value: u8,
    ) -> Result<(), BusError> {
        self.run(move |device| {
            device
                .set_slave_address(address as u16)
                .map_err(|e| BusError::Transfer(e.to_string()))?;
            device
                .smbus_write_byte_data(register, value)
                .map_err(|e| BusError::Transfer(e.to_string()))
        })
        .await
    }
}

#[cfg(not(target_os = "linux"))]
impl I2CBus {
    pub fn new(path: &str) -> Result<Self, BusError> {
        Err(BusError::Unsupported(format!(
            "I2C is only supported on Linux (requested {}). Use SIMULATE=1 instead.",
            path
        )))
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

#[cfg(not(target_os = "linux"))]
#[async_trait]
impl RegisterBus for I2CBus {
    async fn read_registers(
        &mut self,
        _address: u8,
        _register: u8,
        _buf: &mut [u8],
    ) -> Result<(), BusError> {
        Err(BusError::Unsupported("I2C is only supported on Linux".to_string()))
    }

    async fn write_register(
        &mut self,
        _address: u8,
        _register: u8,
        _value: u8,
    ) -> Result<(), BusError> {
        Err(BusError::Unsupported("I2C is only supported on Linux".to_string()))
    }
}
