//! Abstract interface to the CAN driver
//!
//! The node core does not talk to hardware; the application provides an
//! implementation of [`CanDriver`] wrapping its controller. Buffer slots are
//! driver-defined indices: a service is handed the slot numbers it may use
//! at init and configures them through this trait.

use cancore_common::{CanError, CanMessage};

use crate::od::Context;

/// Driver error status flags, as reported by [`CanDriver::error_status`]
pub mod error_flags {
    /// The transmit error counter passed the warning level (>95)
    pub const TX_WARNING: u16 = 0x0001;
    /// The controller is in error passive state for transmission
    pub const TX_PASSIVE: u16 = 0x0002;
    /// The controller is bus off
    pub const TX_BUS_OFF: u16 = 0x0004;
    /// A transmit queue overflowed
    pub const TX_OVERFLOW: u16 = 0x0008;
    /// A synchronous TPDO missed its transmission window
    pub const TX_PDO_LATE: u16 = 0x0080;
    /// The receive error counter passed the warning level (>95)
    pub const RX_WARNING: u16 = 0x0100;
    /// The controller is in error passive state for reception
    pub const RX_PASSIVE: u16 = 0x0200;
    /// A receive queue overflowed
    pub const RX_OVERFLOW: u16 = 0x0800;
}

/// Callback invoked by the driver for each frame matching a receive filter
///
/// `object` is the user object registered together with the filter. The
/// callback may run in interrupt context and must not block.
pub type CanRxHandler = fn(object: &'static dyn Context, msg: &CanMessage);

/// The CAN driver interface consumed by the node core
pub trait CanDriver: Sync + Send {
    /// Configure a transmit buffer slot
    ///
    /// Frames later passed to [`send`](Self::send) for this slot are
    /// transmitted with the framing configured here. Reconfiguring a slot is
    /// allowed and replaces the previous configuration.
    fn tx_buffer_init(
        &self,
        slot: u16,
        can_id: u16,
        rtr: bool,
        dlc: u8,
        sync_frame: bool,
    ) -> Result<(), CanError>;

    /// Returns true while the transmit slot cannot accept another frame
    fn tx_buffer_full(&self, slot: u16) -> bool;

    /// Queue a frame on a configured transmit slot. Non-blocking.
    fn send(&self, slot: u16, data: &[u8; 8]) -> Result<(), CanError>;

    /// Configure a receive filter slot
    ///
    /// `handler` is invoked with `object` for every received frame whose
    /// identifier matches `can_id` under `mask`.
    fn rx_buffer_init(
        &self,
        slot: u16,
        can_id: u16,
        mask: u16,
        rtr: bool,
        object: &'static dyn Context,
        handler: CanRxHandler,
    ) -> Result<(), CanError>;

    /// Current driver error status, a combination of [`error_flags`] bits
    fn error_status(&self) -> u16;
}
