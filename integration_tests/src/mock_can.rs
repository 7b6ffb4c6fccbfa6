//! A recording mock of the CAN driver interface

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Mutex;

use cancore_common::{CanError, CanMessage};
use cancore_node::can::{CanDriver, CanRxHandler};
use cancore_node::od::Context;

/// Configuration captured by a `tx_buffer_init` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxConfig {
    /// Configured CAN identifier
    pub can_id: u16,
    /// RTR flag
    pub rtr: bool,
    /// Configured frame length
    pub dlc: u8,
    /// Synchronous frame flag
    pub sync_frame: bool,
}

struct RxConfig {
    can_id: u16,
    mask: u16,
    object: &'static dyn Context,
    handler: CanRxHandler,
}

/// A mock CAN driver which records configuration and sent frames, and lets
/// tests inject received frames and fake driver error status
pub struct MockCan {
    tx_config: Mutex<HashMap<u16, TxConfig>>,
    rx_config: Mutex<HashMap<u16, RxConfig>>,
    sent: Mutex<Vec<(u16, [u8; 8])>>,
    tx_full: AtomicBool,
    error_status: AtomicU16,
}

impl MockCan {
    /// Create a new mock driver with no configured slots
    pub fn new() -> Self {
        Self {
            tx_config: Mutex::new(HashMap::new()),
            rx_config: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
            tx_full: AtomicBool::new(false),
            error_status: AtomicU16::new(0),
        }
    }

    /// Get the configuration last applied to a transmit slot
    pub fn tx_config(&self, slot: u16) -> Option<TxConfig> {
        self.tx_config.lock().unwrap().get(&slot).copied()
    }

    /// Drain and return all frames sent so far, as (slot, data) pairs
    pub fn take_sent(&self) -> Vec<(u16, [u8; 8])> {
        std::mem::take(&mut self.sent.lock().unwrap())
    }

    /// Simulate a full transmit queue
    pub fn set_tx_full(&self, full: bool) {
        self.tx_full.store(full, Ordering::Relaxed);
    }

    /// Set the error status word reported to the node
    pub fn set_error_status(&self, status: u16) {
        self.error_status.store(status, Ordering::Relaxed);
    }

    /// Deliver a frame to the matching receive filter, as the driver would
    /// from its receive interrupt
    pub fn inject(&self, msg: CanMessage) {
        let rx_config = self.rx_config.lock().unwrap();
        for slot in rx_config.values() {
            if (msg.id().raw() as u16) & slot.mask == slot.can_id & slot.mask {
                (slot.handler)(slot.object, &msg);
                return;
            }
        }
    }
}

impl Default for MockCan {
    fn default() -> Self {
        Self::new()
    }
}

impl CanDriver for MockCan {
    fn tx_buffer_init(
        &self,
        slot: u16,
        can_id: u16,
        rtr: bool,
        dlc: u8,
        sync_frame: bool,
    ) -> Result<(), CanError> {
        self.tx_config.lock().unwrap().insert(
            slot,
            TxConfig {
                can_id,
                rtr,
                dlc,
                sync_frame,
            },
        );
        Ok(())
    }

    fn tx_buffer_full(&self, _slot: u16) -> bool {
        self.tx_full.load(Ordering::Relaxed)
    }

    fn send(&self, slot: u16, data: &[u8; 8]) -> Result<(), CanError> {
        if self.tx_full.load(Ordering::Relaxed) {
            return Err(CanError::TxFull);
        }
        if !self.tx_config.lock().unwrap().contains_key(&slot) {
            return Err(CanError::InvalidSlot { slot });
        }
        self.sent.lock().unwrap().push((slot, *data));
        Ok(())
    }

    fn rx_buffer_init(
        &self,
        slot: u16,
        can_id: u16,
        mask: u16,
        _rtr: bool,
        object: &'static dyn Context,
        handler: CanRxHandler,
    ) -> Result<(), CanError> {
        self.rx_config.lock().unwrap().insert(
            slot,
            RxConfig {
                can_id,
                mask,
                object,
                handler,
            },
        );
        Ok(())
    }

    fn error_status(&self) -> u16 {
        self.error_status.load(Ordering::Relaxed)
    }
}
