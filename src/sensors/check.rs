use super::{read_now, Access};
use crate::bus::{with_timeout, RegisterBus};
use crate::config::sensor_config::CheckSettings;
use crate::health::ErrorCounter;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{trace, warn};

/// Upper bound on registers tracked by one checker
pub const MAX_CHECKED_REGISTERS: usize = 8;

/// Result of one consistency check cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    Passed { register: u8 },
    Mismatch { register: u8, expected: u8, actual: u8 },
    ReadFailed { register: u8 },
    /// Bus held elsewhere; the check stays due and runs on the next poll
    Deferred,
}

/// Periodically re-reads configured registers to detect corruption.
///
/// Registers are checked round-robin, one per check cycle. A mismatch or a
/// failed read increments the instance's error counter by exactly one.
#[derive(Debug)]
pub struct RegisterChecker {
    sensor: String,
    address: u8,
    registers: Vec<(u8, u8)>,
    next: usize,
    interval: u32,
    counter: u32,
    restore: bool,
    errors: ErrorCounter,
}

impl RegisterChecker {
    pub fn new(sensor: &str, address: u8, settings: CheckSettings, errors: ErrorCounter) -> Self {
        Self {
            sensor: sensor.to_string(),
            address,
            registers: Vec::with_capacity(MAX_CHECKED_REGISTERS),
            next: 0,
            interval: settings.interval.max(1),
            counter: 0,
            restore: settings.restore,
            errors,
        }
    }

    /// Remember the value written to `register`. Returns false once the table is full.
    pub fn record(&mut self, register: u8, value: u8) -> bool {
        if let Some(slot) = self.registers.iter_mut().find(|(r, _)| *r == register) {
            slot.1 = value;
            return true;
        }
        if self.registers.len() >= MAX_CHECKED_REGISTERS {
            return false;
        }
        self.registers.push((register, value));
        true
    }

    pub fn registers(&self) -> &[(u8, u8)] {
        &self.registers
    }

    /// Count one poll; true when a check is due on this poll
    pub fn tick(&mut self) -> bool {
        self.counter = self.counter.saturating_add(1);
        self.counter >= self.interval
    }

    /// Check the next register in turn.
    ///
    /// Returns `None` when nothing is registered.
    pub async fn check_next(
        &mut self,
        bus: &Mutex<dyn RegisterBus>,
        timeout: Duration,
    ) -> Option<CheckOutcome> {
        let (register, expected) = *self.registers.get(self.next)?;

        let mut buf = [0u8; 1];
        let outcome = match read_now(bus, self.address, register, &mut buf, timeout).await {
            Err(Access::Busy) => return Some(CheckOutcome::Deferred),
            Err(Access::Failed(e)) => {
                trace!("[{}] check read of {:#04x} failed: {}", self.sensor, register, e);
                CheckOutcome::ReadFailed { register }
            }
            Ok(()) if buf[0] == expected => CheckOutcome::Passed { register },
            Ok(()) => CheckOutcome::Mismatch {
                register,
                expected,
                actual: buf[0],
            },
        };

        self.counter = 0;
        self.next = (self.next + 1) % self.registers.len();

        match outcome {
            CheckOutcome::Passed { .. } => {}
            CheckOutcome::Mismatch { actual, .. } => {
                let count = self.errors.increment();
                warn!(
                    "[{}] register {:#04x} mismatch: expected {:#04x}, got {:#04x} (errors: {})",
                    self.sensor, register, expected, actual, count
                );
                if self.restore {
                    self.rewrite(bus, register, expected, timeout).await;
                }
            }
            _ => {
                let count = self.errors.increment();
                warn!(
                    "[{}] register {:#04x} check failed (errors: {})",
                    self.sensor, register, count
                );
            }
        }

        Some(outcome)
    }

    /// Best-effort restore of a corrupted register
    async fn rewrite(&self, bus: &Mutex<dyn RegisterBus>, register: u8, value: u8, timeout: Duration) {
        let Ok(mut guard) = bus.try_lock() else {
            return;
        };
        if let Err(e) = with_timeout(timeout, guard.write_register(self.address, register, value)).await {
            trace!("[{}] restore of {:#04x} failed: {}", self.sensor, register, e);
        }
    }
}
