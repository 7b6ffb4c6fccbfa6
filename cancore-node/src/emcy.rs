//! Emergency (EMCY) producer and consumer
//!
//! The emergency module tracks the error state of the node in a bitmap of
//! error status bits, and produces an 8-byte emergency frame whenever a
//! tracked condition appears or disappears. Pending frames are held in a
//! bounded FIFO and paced by the configurable inhibit time (object 0x1015).
//! The module owns the error register (object 0x1001), keeps the error
//! history readable through object 0x1003, and monitors the CAN driver's
//! error status for bus warning/passive/off transitions.
//!
//! # Usage
//!
//! The application owns a static [`Emcy`] object and initializes it once at
//! node start, handing it its OD entries and CAN buffer slots:
//!
//! ```ignore
//! static EMCY: Emcy = Emcy::new();
//!
//! EMCY.init(
//!     &EmcyObjects {
//!         error_register: od::find(&OD_TABLE, 0x1001).unwrap(),
//!         producer: Some(EmcyProducerObjects {
//!             cob_id_emcy: od::find(&OD_TABLE, 0x1014).unwrap(),
//!             tx_slot: 0,
//!             inhibit_time: od::find(&OD_TABLE, 0x1015),
//!         }),
//!         error_history: od::find(&OD_TABLE, 0x1003),
//!         status_bits: od::find(&OD_TABLE, 0x2100),
//!     },
//!     &CAN_DRIVER,
//!     Some(0),
//!     NodeId::new(1)?,
//! )?;
//! ```
//!
//! Errors are then reported from anywhere with
//! [`Emcy::error_report`] / [`Emcy::error_reset`], and
//! [`Emcy::process`] is called periodically (~1 ms) from the application
//! loop to emit pending frames.

use core::cell::RefCell;

use critical_section::Mutex;
use defmt_or_log::warn;
use snafu::Snafu;

use cancore_common::messages::{EMCY_BASE, SYNC_ID};
use cancore_common::{AtomicCell, CanMessage, NmtState, NodeId};

use crate::can::{error_flags, CanDriver};
use crate::od::{
    self, read_original, write_original, Context, OdEntry, OdError, OdStream, Transfer,
};

/// Number of tracked error status bits
///
/// Must be a multiple of 8, between 48 and 256. Bits up to 0x2F have
/// standard meanings (see [`status_bit`]); bits from
/// [`status_bit::MANUFACTURER_START`] up are free for the application.
pub const ERROR_STATUS_BITS: usize = 80;
/// Capacity of the emergency message FIFO, in messages (1..=254)
pub const EMCY_BUFFER_SIZE: usize = 16;

const STATUS_BYTES: usize = ERROR_STATUS_BITS / 8;
// One slot is sacrificed to distinguish full from empty
const FIFO_LEN: usize = EMCY_BUFFER_SIZE + 1;

const _: () = assert!(
    ERROR_STATUS_BITS >= 48 && ERROR_STATUS_BITS <= 256 && ERROR_STATUS_BITS % 8 == 0,
    "ERROR_STATUS_BITS out of range"
);
const _: () = assert!(
    EMCY_BUFFER_SIZE >= 1 && EMCY_BUFFER_SIZE <= 254,
    "EMCY_BUFFER_SIZE out of range"
);

/// Error status bit positions, used with [`Emcy::error_report`] and
/// [`Emcy::error_reset`]
pub mod status_bit {
    /// No error
    pub const NO_ERROR: u8 = 0x00;
    /// CAN bus warning limit reached
    pub const CAN_BUS_WARNING: u8 = 0x01;
    /// Wrong data length of a received CAN message
    pub const RX_MSG_WRONG_LENGTH: u8 = 0x02;
    /// Previous received CAN message wasn't processed yet
    pub const RX_MSG_OVERFLOW: u8 = 0x03;
    /// Wrong data length of a received PDO
    pub const RPDO_WRONG_LENGTH: u8 = 0x04;
    /// Previous received PDO wasn't processed yet
    pub const RPDO_OVERFLOW: u8 = 0x05;
    /// CAN receive bus is passive
    pub const CAN_RX_BUS_PASSIVE: u8 = 0x06;
    /// CAN transmit bus is passive
    pub const CAN_TX_BUS_PASSIVE: u8 = 0x07;
    /// Wrong NMT command received
    pub const NMT_WRONG_COMMAND: u8 = 0x08;
    /// TIME message timeout
    pub const TIME_TIMEOUT: u8 = 0x09;
    /// CAN transmit bus is off
    pub const CAN_TX_BUS_OFF: u8 = 0x12;
    /// CAN module receive buffer has overflowed
    pub const CAN_RXB_OVERFLOW: u8 = 0x13;
    /// CAN transmit buffer has overflowed
    pub const CAN_TX_OVERFLOW: u8 = 0x14;
    /// TPDO is outside the SYNC window
    pub const TPDO_OUTSIDE_WINDOW: u8 = 0x15;
    /// SYNC message timeout
    pub const SYNC_TIMEOUT: u8 = 0x18;
    /// Unexpected SYNC data length
    pub const SYNC_LENGTH: u8 = 0x19;
    /// Error with PDO mapping
    pub const PDO_WRONG_MAPPING: u8 = 0x1A;
    /// Heartbeat consumer timeout
    pub const HEARTBEAT_CONSUMER: u8 = 0x1B;
    /// Heartbeat consumer detected the remote node reset
    pub const HB_CONSUMER_REMOTE_RESET: u8 = 0x1C;
    /// Emergency FIFO buffer has overflowed
    pub const EMERGENCY_BUFFER_FULL: u8 = 0x20;
    /// The microcontroller has just started
    pub const MICROCONTROLLER_RESET: u8 = 0x21;
    /// An error bit outside the tracked range was reported
    pub const WRONG_ERROR_REPORT: u8 = 0x28;
    /// Timer task has overflowed
    pub const ISR_TIMER_OVERFLOW: u8 = 0x29;
    /// Unable to allocate memory
    pub const MEMORY_ALLOCATION_ERROR: u8 = 0x2A;
    /// Generic error
    pub const GENERIC_ERROR: u8 = 0x2B;
    /// Generic software error
    pub const GENERIC_SOFTWARE_ERROR: u8 = 0x2C;
    /// Object dictionary does not match the software
    pub const INCONSISTENT_OBJECT_DICT: u8 = 0x2D;
    /// Error in calculation of device parameters
    pub const CALCULATION_OF_PARAMETERS: u8 = 0x2E;
    /// Error with access to non-volatile device memory
    pub const NON_VOLATILE_MEMORY: u8 = 0x2F;
    /// First bit position free for manufacturer-specific conditions
    pub const MANUFACTURER_START: u8 = 0x30;
}

/// CiA 301 emergency error codes, carried in bytes 0-1 of the frame
pub mod emergency_code {
    /// Error reset or no error
    pub const NO_ERROR: u16 = 0x0000;
    /// Generic error
    pub const GENERIC: u16 = 0x1000;
    /// Current error
    pub const CURRENT: u16 = 0x2000;
    /// Voltage error
    pub const VOLTAGE: u16 = 0x3000;
    /// Temperature error
    pub const TEMPERATURE: u16 = 0x4000;
    /// Device hardware error
    pub const HARDWARE: u16 = 0x5000;
    /// Device software error
    pub const SOFTWARE_DEVICE: u16 = 0x6000;
    /// Internal software error
    pub const SOFTWARE_INTERNAL: u16 = 0x6040;
    /// Communication error
    pub const COMMUNICATION: u16 = 0x8100;
    /// CAN overrun, objects lost
    pub const CAN_OVERRUN: u16 = 0x8110;
    /// CAN error passive mode
    pub const CAN_PASSIVE: u16 = 0x8120;
    /// Heartbeat or life guard error
    pub const HEARTBEAT: u16 = 0x8130;
    /// Recovered from bus off
    pub const BUS_OFF_RECOVERED: u16 = 0x8140;
    /// CAN identifier collision
    pub const CAN_ID_COLLISION: u16 = 0x8150;
}

/// Bit masks of the error register (object 0x1001)
pub mod register_bit {
    /// Generic error
    pub const GENERIC: u8 = 0x01;
    /// Current error
    pub const CURRENT: u8 = 0x02;
    /// Voltage error
    pub const VOLTAGE: u8 = 0x04;
    /// Temperature error
    pub const TEMPERATURE: u8 = 0x08;
    /// Communication error
    pub const COMMUNICATION: u8 = 0x10;
    /// Device profile specific error
    pub const DEVICE_PROFILE: u8 = 0x20;
    /// Manufacturer specific error
    pub const MANUFACTURER: u8 = 0x80;
}

/// Callback invoked for each received emergency message
///
/// `ident` is the COB-ID of the received frame, or 0 for the node's own
/// produced emergencies. All multi-byte values are delivered in host order.
pub type EmcyRxCallback =
    fn(ident: u16, error_code: u16, error_register: u8, error_bit: u8, info_code: u32);

/// Errors returned from [`Emcy::init`]
#[derive(Debug, Clone, Copy, PartialEq, Snafu)]
pub enum EmcyInitError {
    /// An argument was invalid or was rejected by the CAN driver
    IllegalArgument,
    /// A required OD entry could not be resolved or holds an invalid value
    #[snafu(display("Invalid OD parameters on object 0x{index:04X}"))]
    OdParameters {
        /// Index of the offending OD entry
        index: u16,
    },
}

/// OD entries and buffer slots handed to [`Emcy::init`]
///
/// The `Option` fields select which parts of the module are active, taking
/// the place of the usual compile-time service configuration: a node can run
/// producer-only, history-only, or any combination.
#[allow(missing_debug_implementations)]
pub struct EmcyObjects {
    /// The error register entry (object 0x1001). The module borrows its
    /// backing byte and rewrites it on every process call.
    pub error_register: &'static OdEntry,
    /// Producer configuration, or `None` for a node which only tracks state
    pub producer: Option<EmcyProducerObjects>,
    /// The predefined error field entry (object 0x1003)
    pub error_history: Option<&'static OdEntry>,
    /// The manufacturer status bits entry, mirroring the error status bitmap
    pub status_bits: Option<&'static OdEntry>,
}

/// Producer part of [`EmcyObjects`]
#[allow(missing_debug_implementations)]
pub struct EmcyProducerObjects {
    /// The COB-ID EMCY entry (object 0x1014)
    pub cob_id_emcy: &'static OdEntry,
    /// Driver transmit buffer slot to use for emergency frames
    pub tx_slot: u16,
    /// The inhibit time entry (object 0x1015), units of 100 us
    pub inhibit_time: Option<&'static OdEntry>,
}

/// One queued emergency message: 4 message bytes (error code, error
/// register, error bit) plus the 4 info bytes, both in wire byte order
#[derive(Clone, Copy, Debug, Default)]
struct FifoEntry {
    msg: [u8; 4],
    info: [u8; 4],
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Overflow {
    None,
    /// A message was dropped; EMERGENCY_BUFFER_FULL is raised on the next
    /// dispatch
    Raised,
    /// EMERGENCY_BUFFER_FULL was reported and clears once the FIFO drains
    Clearing,
}

/// State guarded by the emergency lock
struct EmcyShared {
    error_status_bits: [u8; STATUS_BYTES],
    fifo: [FifoEntry; FIFO_LEN],
    /// Next slot to write; when advancing it would reach `pp_ptr` the FIFO
    /// is full
    wr_ptr: u8,
    /// Next slot to post-process and transmit
    pp_ptr: u8,
    /// Number of messages in the error history, bounded by the capacity
    count: u8,
    overflow: Overflow,
}

impl EmcyShared {
    const fn new() -> Self {
        Self {
            error_status_bits: [0; STATUS_BYTES],
            fifo: [FifoEntry {
                msg: [0; 4],
                info: [0; 4],
            }; FIFO_LEN],
            wr_ptr: 0,
            pp_ptr: 0,
            count: 0,
            overflow: Overflow::None,
        }
    }
}

/// Borrowed pointer to the error register byte in OD storage
#[derive(Clone, Copy)]
struct ErrRegPtr(*mut u8);

// Safety: points into static OD storage; only written inside critical
// sections
unsafe impl Send for ErrRegPtr {}

enum OverflowStep {
    Keep,
    Report,
    Clear,
}

/// The emergency module state
///
/// Create as a static with [`Emcy::new`], then call [`Emcy::init`] once at
/// node start. All methods take `&self`; the state is internally
/// synchronized and may be shared with interrupt context.
#[allow(missing_debug_implementations)]
pub struct Emcy {
    shared: Mutex<RefCell<EmcyShared>>,
    error_register: AtomicCell<Option<ErrRegPtr>>,
    can: AtomicCell<Option<&'static dyn CanDriver>>,
    tx_slot: AtomicCell<u16>,
    producer_configured: AtomicCell<bool>,
    producer_enabled: AtomicCell<bool>,
    /// CAN id from object 0x1014; the bare [`EMCY_BASE`] means "default
    /// form", i.e. 0x80 + node id on the wire
    producer_can_id: AtomicCell<u16>,
    node_id: AtomicCell<u8>,
    inhibit_time_us: AtomicCell<u32>,
    inhibit_timer_us: AtomicCell<u32>,
    can_error_status_old: AtomicCell<u16>,
    rx_callback: AtomicCell<Option<EmcyRxCallback>>,
    notify_cb: AtomicCell<Option<&'static (dyn Fn() + Sync)>>,
}

impl Emcy {
    /// Create a new emergency module in its cleared state
    pub const fn new() -> Self {
        Self {
            shared: Mutex::new(RefCell::new(EmcyShared::new())),
            error_register: AtomicCell::new(None),
            can: AtomicCell::new(None),
            tx_slot: AtomicCell::new(0),
            producer_configured: AtomicCell::new(false),
            producer_enabled: AtomicCell::new(false),
            producer_can_id: AtomicCell::new(0),
            node_id: AtomicCell::new(0),
            inhibit_time_us: AtomicCell::new(0),
            inhibit_timer_us: AtomicCell::new(0),
            can_error_status_old: AtomicCell::new(0),
            rx_callback: AtomicCell::new(None),
            notify_cb: AtomicCell::new(None),
        }
    }

    /// Initialize the module
    ///
    /// Clears all state, borrows the error register from object 0x1001,
    /// latches the producer configuration from object 0x1014, installs the
    /// OD extensions on the provided entries, and configures the CAN
    /// transmit buffer and (when `consumer_rx_slot` is provided) the
    /// receive filter for emergency COB-IDs.
    pub fn init(
        &'static self,
        objects: &EmcyObjects,
        can: &'static dyn CanDriver,
        consumer_rx_slot: Option<u16>,
        node_id: NodeId,
    ) -> Result<(), EmcyInitError> {
        // clear the object
        critical_section::with(|cs| {
            *self.shared.borrow_ref_mut(cs) = EmcyShared::new();
        });
        self.error_register.store(None);
        self.producer_configured.store(false);
        self.producer_enabled.store(false);
        self.producer_can_id.store(0);
        self.inhibit_time_us.store(0);
        self.inhibit_timer_us.store(0);
        self.can_error_status_old.store(0);
        self.rx_callback.store(None);
        self.notify_cb.store(None);
        self.can.store(Some(can));
        self.node_id.store(node_id.raw());

        // get and verify the error register from the object dictionary
        let err_reg_entry = objects.error_register;
        let (ptr, len) = od::get_ptr(err_reg_entry, 0).map_err(|_| EmcyInitError::OdParameters {
            index: err_reg_entry.index,
        })?;
        if len != 1 {
            return Err(EmcyInitError::OdParameters {
                index: err_reg_entry.index,
            });
        }
        self.error_register.store(Some(ErrRegPtr(ptr)));
        critical_section::with(|_| unsafe { ptr.write(0) });

        if let Some(producer) = &objects.producer {
            let cob_entry = producer.cob_id_emcy;
            let od_params = |_| EmcyInitError::OdParameters {
                index: cob_entry.index,
            };

            // get initial and verify the COB-ID EMCY value
            let cob_id: u32 = od::get_value(cob_entry, 0, true).map_err(od_params)?;
            if cob_id & 0x7FFF_F800 != 0 {
                return Err(EmcyInitError::OdParameters {
                    index: cob_entry.index,
                });
            }
            let producer_can_id = (cob_id & 0x7FF) as u16;
            self.producer_enabled
                .store(cob_id & 0x8000_0000 == 0 && producer_can_id != 0);
            self.producer_can_id.store(producer_can_id);
            self.tx_slot.store(producer.tx_slot);

            cob_entry
                .install_extension(self, Some(od_read_1014), Some(od_write_1014))
                .map_err(od_params)?;

            // if the default CAN id is stored, the node id goes on the wire
            let effective_can_id = if producer_can_id == EMCY_BASE {
                EMCY_BASE + node_id.raw() as u16
            } else {
                producer_can_id
            };
            can.tx_buffer_init(producer.tx_slot, effective_can_id, false, 8, false)
                .map_err(|_| EmcyInitError::IllegalArgument)?;

            if let Some(inhibit_entry) = producer.inhibit_time {
                if let Ok(inhibit_100us) = od::get_value::<u16>(inhibit_entry, 0, true) {
                    self.inhibit_time_us.store(inhibit_100us as u32 * 100);
                    inhibit_entry
                        .install_extension(self, Some(read_original), Some(od_write_1015))
                        .ok();
                }
            }
            // start with the inhibit period elapsed so the first emergency
            // goes out on the first process call
            self.inhibit_timer_us.store(self.inhibit_time_us.load());

            self.producer_configured.store(true);
        }

        if let Some(history_entry) = objects.error_history {
            history_entry
                .install_extension(self, Some(od_read_1003), Some(od_write_1003))
                .ok();
        }

        if let Some(status_entry) = objects.status_bits {
            status_entry
                .install_extension(self, Some(od_read_status_bits), Some(od_write_status_bits))
                .ok();
        }

        if let Some(rx_slot) = consumer_rx_slot {
            // accept all emergency COB-IDs; SYNC also passes the mask and is
            // dropped in the receive callback
            can.rx_buffer_init(rx_slot, EMCY_BASE, 0x780, false, self, emcy_receive)
                .map_err(|_| EmcyInitError::IllegalArgument)?;
        }

        Ok(())
    }

    /// Register a callback for received (and own) emergency messages
    pub fn set_rx_callback(&self, callback: Option<EmcyRxCallback>) {
        self.rx_callback.store(callback);
    }

    /// Set a callback to be called when an emergency is queued and a call to
    /// [`Emcy::process`] is required
    ///
    /// It must be static. Usually this will be a static fn, but in some
    /// circumstances it may be desirable to use Box::leak to pass a heap
    /// allocated closure instead.
    pub fn set_process_notify_callback(&self, callback: &'static (dyn Fn() + Sync)) {
        self.notify_cb.store(Some(callback));
    }

    /// Report that an error condition appeared
    ///
    /// `code` is the [`emergency_code`] transmitted in the emergency frame,
    /// `info` is manufacturer-specific diagnostic data for bytes 4-7.
    pub fn error_report(&self, error_bit: u8, code: u16, info: u32) {
        self.error(true, error_bit, code, info);
    }

    /// Report that an error condition was resolved
    ///
    /// The produced emergency carries the code
    /// [`emergency_code::NO_ERROR`].
    pub fn error_reset(&self, error_bit: u8, info: u32) {
        self.error(false, error_bit, emergency_code::NO_ERROR, info);
    }

    /// Returns true while the given error status bit is set
    pub fn is_error_set(&self, error_bit: u8) -> bool {
        let index = (error_bit >> 3) as usize;
        if index >= STATUS_BYTES {
            return false;
        }
        let mask = 1u8 << (error_bit & 0x7);
        critical_section::with(|cs| {
            self.shared.borrow_ref(cs).error_status_bits[index] & mask != 0
        })
    }

    /// Set or clear one error status bit
    ///
    /// Only a change of the bit produces an emergency message; reporting an
    /// already-set (or resetting an already-clear) condition has no effect.
    /// A bit outside the tracked range is redirected to
    /// [`status_bit::WRONG_ERROR_REPORT`] with the offending bit preserved
    /// in the info code.
    pub fn error(&self, set_error: bool, error_bit: u8, code: u16, info: u32) {
        let mut bit = error_bit;
        let mut code = code;
        let mut info = info;
        let mut index = (bit >> 3) as usize;
        let mut mask = 1u8 << (bit & 0x7);

        if index >= STATUS_BYTES {
            warn!("Emergency report with unsupported error bit {}", bit);
            bit = status_bit::WRONG_ERROR_REPORT;
            index = (bit >> 3) as usize;
            mask = 1u8 << (bit & 0x7);
            code = emergency_code::SOFTWARE_INTERNAL;
            info = error_bit as u32;
        }

        let mut queued = false;
        critical_section::with(|cs| {
            let mut shared = self.shared.borrow_ref_mut(cs);

            // return without further action unless the bit changes
            let bit_was_set = shared.error_status_bits[index] & mask != 0;
            if set_error {
                if bit_was_set {
                    return;
                }
                shared.error_status_bits[index] |= mask;
            } else {
                if !bit_was_set {
                    return;
                }
                shared.error_status_bits[index] &= !mask;
                code = emergency_code::NO_ERROR;
            }

            // the error register field is patched in at dispatch time
            let mut msg = [0u8; 4];
            msg[0..2].copy_from_slice(&code.to_le_bytes());
            msg[3] = bit;

            let wr = shared.wr_ptr as usize;
            let next = if wr + 1 >= FIFO_LEN { 0 } else { wr + 1 };
            if next == shared.pp_ptr as usize {
                shared.overflow = Overflow::Raised;
            } else {
                shared.fifo[wr] = FifoEntry {
                    msg,
                    info: info.to_le_bytes(),
                };
                shared.wr_ptr = next as u8;
                if (shared.count as usize) < EMCY_BUFFER_SIZE {
                    shared.count += 1;
                }
            }
            queued = true;
        });

        // optional signal to resume the task which handles process()
        if queued && self.producer_enabled.load() {
            if let Some(notify) = self.notify_cb.load() {
                notify();
            }
        }
    }

    /// Periodic processing step
    ///
    /// Detects CAN driver error state changes, recomputes the error
    /// register, and transmits at most one pending emergency frame, subject
    /// to inhibit pacing, transmit buffer availability and the NMT state.
    /// When a transmission is pending but inhibited, `timer_next_us` is
    /// lowered to the remaining inhibit time as a wake-up hint for the
    /// scheduler.
    pub fn process(
        &self,
        nmt_state: NmtState,
        time_difference_us: u32,
        timer_next_us: Option<&mut u32>,
    ) {
        let Some(can) = self.can.load() else {
            return;
        };

        // verify errors from the driver; the change-only policy in error()
        // yields the set/reset hysteresis
        let err_status = can.error_status();
        let err_status_old = self.can_error_status_old.load();
        if err_status != err_status_old {
            let changed = err_status ^ err_status_old;
            self.can_error_status_old.store(err_status);

            const BUS_WARNING: u16 = error_flags::TX_WARNING | error_flags::RX_WARNING;
            if changed & BUS_WARNING != 0 {
                self.error(
                    err_status & BUS_WARNING != 0,
                    status_bit::CAN_BUS_WARNING,
                    emergency_code::NO_ERROR,
                    0,
                );
            }
            if changed & error_flags::TX_PASSIVE != 0 {
                self.error(
                    err_status & error_flags::TX_PASSIVE != 0,
                    status_bit::CAN_TX_BUS_PASSIVE,
                    emergency_code::CAN_PASSIVE,
                    0,
                );
            }
            if changed & error_flags::TX_BUS_OFF != 0 {
                self.error(
                    err_status & error_flags::TX_BUS_OFF != 0,
                    status_bit::CAN_TX_BUS_OFF,
                    emergency_code::BUS_OFF_RECOVERED,
                    0,
                );
            }
            if changed & error_flags::TX_OVERFLOW != 0 {
                self.error(
                    err_status & error_flags::TX_OVERFLOW != 0,
                    status_bit::CAN_TX_OVERFLOW,
                    emergency_code::CAN_OVERRUN,
                    0,
                );
            }
            if changed & error_flags::TX_PDO_LATE != 0 {
                self.error(
                    err_status & error_flags::TX_PDO_LATE != 0,
                    status_bit::TPDO_OUTSIDE_WINDOW,
                    emergency_code::COMMUNICATION,
                    0,
                );
            }
            if changed & error_flags::RX_PASSIVE != 0 {
                self.error(
                    err_status & error_flags::RX_PASSIVE != 0,
                    status_bit::CAN_RX_BUS_PASSIVE,
                    emergency_code::CAN_PASSIVE,
                    0,
                );
            }
            if changed & error_flags::RX_OVERFLOW != 0 {
                self.error(
                    err_status & error_flags::RX_OVERFLOW != 0,
                    status_bit::CAN_RXB_OVERFLOW,
                    emergency_code::CAN_OVERRUN,
                    0,
                );
            }
        }

        // calculate the error register
        let register = critical_section::with(|cs| {
            let shared = self.shared.borrow_ref(cs);
            let bits = &shared.error_status_bits;
            let mut register = 0u8;
            if bits[5] != 0 {
                register |= register_bit::GENERIC;
            }
            if bits[2] != 0 || bits[3] != 0 {
                register |= register_bit::COMMUNICATION;
            }
            if bits[6..].iter().any(|&b| b != 0) {
                register |= register_bit::MANUFACTURER;
            }
            register
        });
        if let Some(err_reg) = self.error_register.load() {
            critical_section::with(|_| unsafe { err_reg.0.write(register) });
        }

        if self.producer_configured.load() {
            let inhibit_time = self.inhibit_time_us.load();
            let mut inhibit_timer = self.inhibit_timer_us.load();
            if inhibit_timer < inhibit_time {
                inhibit_timer = inhibit_timer.saturating_add(time_difference_us);
                self.inhibit_timer_us.store(inhibit_timer);
            }

            let tx_slot = self.tx_slot.load();
            let tx_full = can.tx_buffer_full(tx_slot);

            let dispatched = critical_section::with(|cs| {
                let mut shared = self.shared.borrow_ref_mut(cs);
                if shared.pp_ptr == shared.wr_ptr || inhibit_timer < inhibit_time || tx_full {
                    return None;
                }

                // add the error register to the pending emergency message
                let pp = shared.pp_ptr as usize;
                shared.fifo[pp].msg[2] = register;
                let entry = shared.fifo[pp];
                let next = if pp + 1 >= FIFO_LEN { 0 } else { pp + 1 };
                shared.pp_ptr = next as u8;

                let overflow = match shared.overflow {
                    Overflow::Raised => {
                        shared.overflow = Overflow::Clearing;
                        OverflowStep::Report
                    }
                    Overflow::Clearing if shared.pp_ptr == shared.wr_ptr => {
                        shared.overflow = Overflow::None;
                        OverflowStep::Clear
                    }
                    _ => OverflowStep::Keep,
                };
                Some((entry, overflow))
            });

            if let Some((entry, overflow)) = dispatched {
                self.inhibit_timer_us.store(0);

                if nmt_state.is_pre_or_operational() {
                    let mut data = [0u8; 8];
                    data[0..4].copy_from_slice(&entry.msg);
                    data[4..8].copy_from_slice(&entry.info);
                    can.send(tx_slot, &data).ok();
                }

                // report own emergency messages to the consumer callback
                if let Some(callback) = self.rx_callback.load() {
                    callback(
                        0,
                        u16::from_le_bytes([entry.msg[0], entry.msg[1]]),
                        register,
                        entry.msg[3],
                        u32::from_le_bytes(entry.info),
                    );
                }

                match overflow {
                    OverflowStep::Report => self.error_report(
                        status_bit::EMERGENCY_BUFFER_FULL,
                        emergency_code::GENERIC,
                        0,
                    ),
                    OverflowStep::Clear => {
                        self.error_reset(status_bit::EMERGENCY_BUFFER_FULL, 0)
                    }
                    OverflowStep::Keep => {}
                }
            } else if inhibit_timer < inhibit_time {
                if let Some(timer_next_us) = timer_next_us {
                    let pending = critical_section::with(|cs| {
                        let shared = self.shared.borrow_ref(cs);
                        shared.pp_ptr != shared.wr_ptr
                    });
                    if pending {
                        // check again once the inhibit time has elapsed
                        let diff = inhibit_time - inhibit_timer;
                        if *timer_next_us > diff {
                            *timer_next_us = diff;
                        }
                    }
                }
            }
        } else {
            // no producer: attach the error register to queued messages and
            // advance the post-process pointer without sending
            critical_section::with(|cs| {
                let mut shared = self.shared.borrow_ref_mut(cs);
                while shared.pp_ptr != shared.wr_ptr {
                    let pp = shared.pp_ptr as usize;
                    shared.fifo[pp].msg[2] = register;
                    let next = if pp + 1 >= FIFO_LEN { 0 } else { pp + 1 };
                    shared.pp_ptr = next as u8;
                }
            });
        }
    }

    fn effective_can_id(&self) -> u16 {
        let stored = self.producer_can_id.load();
        if stored == EMCY_BASE {
            EMCY_BASE + self.node_id.load() as u16
        } else {
            stored
        }
    }
}

impl Default for Emcy {
    fn default() -> Self {
        Self::new()
    }
}

fn emcy_context(stream: &OdStream) -> Result<&'static Emcy, OdError> {
    let object = stream.object.ok_or(OdError::DevIncompat)?;
    object.as_any().downcast_ref().ok_or(OdError::DevIncompat)
}

/// Custom read function for OD object "COB-ID EMCY"
fn od_read_1014(
    stream: &mut OdStream,
    sub_index: u8,
    buf: &mut [u8],
) -> Result<Transfer, OdError> {
    let em = emcy_context(stream)?;
    if sub_index != 0 || buf.len() < 4 {
        return Err(OdError::DevIncompat);
    }

    let mut cob_id = em.effective_can_id() as u32;
    if !em.producer_enabled.load() {
        cob_id |= 0x8000_0000;
    }
    buf[0..4].copy_from_slice(&cob_id.to_le_bytes());
    Ok(Transfer::Done(4))
}

/// Custom write function for OD object "COB-ID EMCY"
fn od_write_1014(stream: &mut OdStream, sub_index: u8, buf: &[u8]) -> Result<Transfer, OdError> {
    let em = emcy_context(stream)?;
    if sub_index != 0 {
        return Err(OdError::DevIncompat);
    }
    let bytes: [u8; 4] = buf.try_into().map_err(|_| OdError::TypeMismatch)?;
    let cob_id = u32::from_le_bytes(bytes);

    // verify the written value; the CAN id must not change while the
    // producer stays enabled
    let new_can_id = (cob_id & 0x7FF) as u16;
    let new_enabled = cob_id & 0x8000_0000 == 0 && new_can_id != 0;
    if cob_id & 0x7FFF_F800 != 0
        || (em.producer_enabled.load() && new_enabled && new_can_id != em.effective_can_id())
    {
        return Err(OdError::InvalidValue);
    }

    // store values. If the default CAN id is used, only the base value
    // without the node id goes to non-volatile memory.
    em.producer_enabled.store(new_enabled);
    let node_default = EMCY_BASE + em.node_id.load() as u16;
    em.producer_can_id.store(if new_can_id == node_default {
        EMCY_BASE
    } else {
        new_can_id
    });

    if new_enabled {
        if let Some(can) = em.can.load() {
            can.tx_buffer_init(em.tx_slot.load(), new_can_id, false, 8, false)
                .ok();
        }
    }

    // write the value through to the original OD location
    write_original(stream, sub_index, buf)
}

/// Custom write function for OD object "Inhibit time EMCY"
fn od_write_1015(stream: &mut OdStream, sub_index: u8, buf: &[u8]) -> Result<Transfer, OdError> {
    let em = emcy_context(stream)?;
    if sub_index != 0 {
        return Err(OdError::DevIncompat);
    }
    let bytes: [u8; 2] = buf.try_into().map_err(|_| OdError::TypeMismatch)?;
    let inhibit_100us = u16::from_le_bytes(bytes);

    em.inhibit_time_us.store(inhibit_100us as u32 * 100);
    em.inhibit_timer_us.store(0);

    write_original(stream, sub_index, buf)
}

/// Custom read function for OD object "Predefined error field"
fn od_read_1003(
    stream: &mut OdStream,
    sub_index: u8,
    buf: &mut [u8],
) -> Result<Transfer, OdError> {
    let em = emcy_context(stream)?;

    if sub_index == 0 {
        if buf.is_empty() {
            return Err(OdError::DevIncompat);
        }
        buf[0] = critical_section::with(|cs| em.shared.borrow_ref(cs).count);
        Ok(Transfer::Done(1))
    } else {
        if buf.len() < 4 {
            return Err(OdError::DevIncompat);
        }
        critical_section::with(|cs| {
            let shared = em.shared.borrow_ref(cs);
            if sub_index > shared.count {
                return Err(OdError::NoData);
            }
            // the newest error is reported on sub-index 1 and is stored
            // just behind the write pointer
            let mut index = shared.wr_ptr as i16 - sub_index as i16;
            if index < 0 {
                index += FIFO_LEN as i16;
            }
            buf[0..4].copy_from_slice(&shared.fifo[index as usize].msg);
            Ok(Transfer::Done(4))
        })
    }
}

/// Custom write function for OD object "Predefined error field"
fn od_write_1003(stream: &mut OdStream, sub_index: u8, buf: &[u8]) -> Result<Transfer, OdError> {
    let em = emcy_context(stream)?;
    if sub_index != 0 || buf.len() != 1 {
        return Err(OdError::DevIncompat);
    }
    if buf[0] != 0 {
        return Err(OdError::InvalidValue);
    }

    // clear the error history
    critical_section::with(|cs| em.shared.borrow_ref_mut(cs).count = 0);
    Ok(Transfer::Done(1))
}

/// Custom read function for the manufacturer status bits OD object
fn od_read_status_bits(
    stream: &mut OdStream,
    sub_index: u8,
    buf: &mut [u8],
) -> Result<Transfer, OdError> {
    let em = emcy_context(stream)?;
    if sub_index != 0 {
        return Err(OdError::DevIncompat);
    }

    // min(tracked size, caller buffer size, OD-declared length)
    let count = STATUS_BYTES.min(buf.len()).min(stream.data_length);

    critical_section::with(|cs| {
        let shared = em.shared.borrow_ref(cs);
        buf[0..count].copy_from_slice(&shared.error_status_bits[0..count]);
    });
    Ok(Transfer::Done(count))
}

/// Custom write function for the manufacturer status bits OD object
fn od_write_status_bits(
    stream: &mut OdStream,
    sub_index: u8,
    buf: &[u8],
) -> Result<Transfer, OdError> {
    let em = emcy_context(stream)?;
    if sub_index != 0 {
        return Err(OdError::DevIncompat);
    }

    // min(tracked size, caller buffer size, OD-declared length)
    let count = STATUS_BYTES.min(buf.len()).min(stream.data_length);

    critical_section::with(|cs| {
        let mut shared = em.shared.borrow_ref_mut(cs);
        shared.error_status_bits[0..count].copy_from_slice(&buf[0..count]);
    });
    Ok(Transfer::Done(count))
}

/// Receive callback registered on the driver for emergency COB-IDs
fn emcy_receive(object: &'static dyn Context, msg: &CanMessage) {
    let Some(em) = object.as_any().downcast_ref::<Emcy>() else {
        return;
    };

    // ignore sync messages, which also pass the receive mask
    let ident = msg.id().raw() as u16;
    if ident as u32 == SYNC_ID.raw() {
        return;
    }

    if let Some(callback) = em.rx_callback.load() {
        let data = &msg.data;
        let error_code = u16::from_le_bytes([data[0], data[1]]);
        let info_code = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
        callback(ident, error_code, data[2], data[3], info_code);
    }
}
