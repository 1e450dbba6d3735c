//! Mock register bus for testing
//!
//! Records every transaction and simulates per-device FIFOs so drain
//! behaviour can be verified without hardware.

use super::RegisterBus;
use crate::errors::BusError;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};

/// Bus transaction type for logging
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transaction {
    Read { address: u8, register: u8, len: usize },
    Write { address: u8, register: u8, value: u8 },
}

#[derive(Debug, Default)]
struct MockFifo {
    status_register: u8,
    samples: VecDeque<[i16; 3]>,
}

/// In-memory register map with simulated sample FIFOs
#[derive(Debug, Default)]
pub struct MockBus {
    registers: HashMap<(u8, u8), u8>,
    /// Keyed by (address, data register)
    fifos: HashMap<(u8, u8), MockFifo>,
    /// Scripted status bytes, consumed before the computed FIFO status
    scripted: HashMap<(u8, u8), VecDeque<u8>>,
    /// Remaining forced failures per (address, register)
    read_failures: HashMap<(u8, u8), usize>,
    write_failures: HashMap<(u8, u8), usize>,
    transactions: Vec<Transaction>,
}

impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_register(&mut self, address: u8, register: u8, value: u8) {
        self.registers.insert((address, register), value);
    }

    pub fn register(&self, address: u8, register: u8) -> Option<u8> {
        self.registers.get(&(address, register)).copied()
    }

    /// Attach a FIFO whose fill level is reported through `status_register`
    pub fn attach_fifo(&mut self, address: u8, status_register: u8, data_register: u8) {
        self.fifos.insert(
            (address, data_register),
            MockFifo {
                status_register,
                samples: VecDeque::new(),
            },
        );
    }

    pub fn push_samples(&mut self, address: u8, data_register: u8, samples: &[[i16; 3]]) {
        if let Some(fifo) = self.fifos.get_mut(&(address, data_register)) {
            fifo.samples.extend(samples.iter().copied());
        }
    }

    pub fn queued(&self, address: u8, data_register: u8) -> usize {
        self.fifos
            .get(&(address, data_register))
            .map(|f| f.samples.len())
            .unwrap_or(0)
    }

    /// Return `status` from the next read of `register` instead of the computed value
    pub fn script_status(&mut self, address: u8, register: u8, status: u8) {
        self.scripted
            .entry((address, register))
            .or_default()
            .push_back(status);
    }

    pub fn fail_reads(&mut self, address: u8, register: u8, times: usize) {
        self.read_failures.insert((address, register), times);
    }

    pub fn fail_writes(&mut self, address: u8, register: u8, times: usize) {
        self.write_failures.insert((address, register), times);
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn clear_transactions(&mut self) {
        self.transactions.clear();
    }

    /// Reads of `register` on `address` recorded so far
    pub fn reads_of(&self, address: u8, register: u8) -> Vec<usize> {
        self.transactions
            .iter()
            .filter_map(|t| match t {
                Transaction::Read {
                    address: a,
                    register: r,
                    len,
                } if *a == address && *r == register => Some(*len),
                _ => None,
            })
            .collect()
    }

    fn take_failure(failures: &mut HashMap<(u8, u8), usize>, key: (u8, u8)) -> bool {
        match failures.get_mut(&key) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    fn fifo_status(&self, address: u8, register: u8) -> Option<u8> {
        self.fifos
            .iter()
            .find(|((a, _), fifo)| *a == address && fifo.status_register == register)
            .map(|(_, fifo)| {
                let count = fifo.samples.len().min(0x1f) as u8;
                if count == 0 {
                    0x20
                } else {
                    count
                }
            })
    }
}

#[async_trait]
impl RegisterBus for MockBus {
    async fn read_registers(
        &mut self,
        address: u8,
        register: u8,
        buf: &mut [u8],
    ) -> Result<(), BusError> {
        self.transactions.push(Transaction::Read {
            address,
            register,
            len: buf.len(),
        });

        if Self::take_failure(&mut self.read_failures, (address, register)) {
            return Err(BusError::Transfer("injected read failure".to_string()));
        }

        if let Some(status) = self
            .scripted
            .get_mut(&(address, register))
            .and_then(|q| q.pop_front())
        {
            buf.fill(0);
            buf[0] = status;
            return Ok(());
        }

        if let Some(fifo) = self.fifos.get_mut(&(address, register)) {
            for chunk in buf.chunks_mut(6) {
                let sample = fifo.samples.pop_front().unwrap_or([0; 3]);
                let mut bytes = [0u8; 6];
                for (axis, value) in sample.iter().enumerate() {
                    bytes[axis * 2..axis * 2 + 2].copy_from_slice(&value.to_le_bytes());
                }
                chunk.copy_from_slice(&bytes[..chunk.len()]);
            }
            return Ok(());
        }

        if let Some(status) = self.fifo_status(address, register) {
            buf.fill(0);
            buf[0] = status;
            return Ok(());
        }

        for (offset, byte) in buf.iter_mut().enumerate() {
            *byte = self
                .registers
                .get(&(address, register.wrapping_add(offset as u8)))
                .copied()
                .unwrap_or(0);
        }
        Ok(())
    }

    async fn write_register(
        &mut self,
        address: u8,
        register: u8,
        value: u8,
    ) -> Result<(), BusError> {
        self.transactions.push(Transaction::Write {
            address,
            register,
            value,
        });

        if Self::take_failure(&mut self.write_failures, (address, register)) {
            return Err(BusError::Transfer("injected write failure".to_string()));
        }

        self.registers.insert((address, register), value);
        Ok(())
    }
}
