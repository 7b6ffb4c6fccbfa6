//! Object Dictionary access layer
//!
//! # Overview
//!
//! The object dictionary is the central shared data model of a node: every
//! service (SDO, PDO, EMCY, heartbeat) reads and writes its configuration and
//! live process data through it. Objects are identified by a 16-bit index and
//! come in three shapes:
//!
//! - VAR: A single variable of any type, accessed at sub-index 0
//! - ARRAY: Fixed-stride elements of one type on sub-indices 1-N, with a
//!   one byte count (usually the highest sub-index) on sub-index 0
//! - RECORD: A collection of heterogenous sub-objects, each with its own
//!   sub-index, type and attribute. Sub-indices need not be contiguous.
//!
//! The catalog itself is a `'static` slice of [`OdEntry`] rows, sorted
//! ascending by index, normally emitted by a generator tool together with the
//! backing storage aggregates. [`find`] locates an entry by binary search.
//!
//! # Access model
//!
//! [`OdEntry::get_sub`] resolves one sub-object into a ([`SubInfo`],
//! [`OdIo`]) pair. The `OdIo` holds a [`OdStream`] cursor plus a read and a
//! write function. For plain entries these are the default byte-copy
//! implementations ([`read_original`] / [`write_original`]) operating
//! directly on the entry's backing storage; values larger than the caller's
//! buffer are transferred over multiple calls, with
//! [`Transfer::Partial`] signalling that more calls are needed and the
//! stream's `data_offset` tracking progress.
//!
//! # IO extension
//!
//! Entries constructed with an [`OdExtension`] slot can have their I/O
//! intercepted by a service: [`OdEntry::install_extension`] binds a
//! type-erased user object and replacement read/write functions at service
//! init. Resolution with `od_orig = true` bypasses an installed extension
//! and yields the default pair, which is how services write values through
//! to the original OD location from inside their own callbacks.
//!
//! # Locking
//!
//! The default read and write functions copy bytes inside a critical
//! section. Extension functions may be called from multiple threads and must
//! take the same care when they touch shared state.

mod entry;
mod error;
mod extension;
mod stream;
mod value;

// Pull up public sub module definitions. The submodules provide some code
// organization, but shouldn't clutter the public API
pub use entry::*;
pub use error::*;
pub use extension::*;
pub use stream::*;
pub use value::*;
