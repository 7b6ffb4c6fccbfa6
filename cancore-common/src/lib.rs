//! Common functionality shared among the cancore crates.
//!
//! Most users will have no reason to depend on this crate directly, as it is
//! re-exported by `cancore-node`.
#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs, missing_copy_implementations)]

mod atomic_cell;
pub use atomic_cell::AtomicCell;
pub mod constants;
pub mod messages;
pub mod node_id;

pub use messages::{CanError, CanId, CanMessage, NmtState};
pub use node_id::NodeId;
