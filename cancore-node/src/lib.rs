//! Object dictionary core and emergency subsystem for a CANopen node
//!
//! cancore-node implements the two central pieces of a CANopen protocol
//! runtime: the object dictionary access layer through which every service
//! reads and writes configuration and live process data, and the Emergency
//! (EMCY) producer/consumer built on top of it. It is primarily intended to
//! be run on microcontrollers, so it is no_std compatible and performs no
//! heap allocation, instead working on statically allocated storage. It
//! provides the following features:
//!
//! * A catalog model for *object dictionary* entries (VAR, ARRAY and RECORD
//!   shapes), with binary-search lookup and per-sub-object resolution.
//! * Default byte-copy read/write with *segmented transfers* for values
//!   larger than one caller buffer, plus typed scalar getters and setters.
//! * A per-entry *IO extension* mechanism, letting services intercept
//!   access to their objects with their own read/write functions.
//! * The *Emergency* service: error status bitmap, bounded message FIFO
//!   with inhibit-time pacing, error register maintenance, error history
//!   (object 0x1003), CAN driver error monitoring with hysteresis, and an
//!   emergency consumer callback path.
//!
//! # Getting Started
//!
//! ## Object dictionary
//!
//! The object dictionary is an input artifact: a generator tool (or the
//! application, by hand) emits the backing-storage aggregates and the
//! `'static` table of [`od::OdEntry`] rows, sorted ascending by index. Two
//! storage aggregates are conventionally kept: one for values persisted
//! over communication reset, one for RAM-only values, so that a storage
//! subsystem can snapshot the former without touching live state.
//!
//! ## Accessing objects
//!
//! ```ignore
//! let entry = od::find(&OD_TABLE, 0x1017).unwrap();
//! let heartbeat_ms: u16 = od::get_value(entry, 0, false)?;
//! od::set_value(entry, 0, 500u16, false)?;
//! ```
//!
//! For large values, resolve the sub-object once and drive the stream until
//! it reports completion:
//!
//! ```ignore
//! let (info, mut io) = entry.get_sub(0, false)?;
//! loop {
//!     match (io.read)(&mut io.stream, 0, &mut chunk)? {
//!         Transfer::Partial(n) => consume(&chunk[..n]),
//!         Transfer::Done(n) => break consume(&chunk[..n]),
//!     }
//! }
//! ```
//!
//! ## Emergency service
//!
//! The application instantiates a static [`Emcy`] object, initializes it
//! with its OD entries and CAN buffer slots, and reports errors through it;
//! see the [`emcy`] module docs for a walkthrough. [`Emcy::process`] must
//! be called periodically (roughly every millisecond, or when signalled via
//! the process notify callback) to emit pending emergency frames.
//!
//! ## CAN driver
//!
//! Hardware access is abstracted behind the [`can::CanDriver`] trait, which
//! the application implements for its controller. The emergency module uses
//! one transmit buffer slot, optionally one receive filter slot, and the
//! driver's error status word.
#![cfg_attr(all(not(test), not(feature = "std")), no_std)]
#![warn(missing_docs, missing_debug_implementations)]

pub mod can;
pub mod emcy;
pub mod od;

// Re-export types used by generated catalogs and applications
pub use cancore_common as common;
pub use critical_section;

pub use emcy::{Emcy, EmcyInitError, EmcyObjects, EmcyProducerObjects};
