//! Catalog entry model and sub-entry resolution

use core::cell::UnsafeCell;
use core::ops::BitOr;

use super::{read_disabled, read_original, write_disabled, write_original};
use super::{OdError, OdExtension, OdIo, OdStream, PdoFlags};

/// Attribute bit-field of an OD sub-object
///
/// The individual flags are orthogonal and are combined with `|` in catalog
/// tables.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Attribute(u8);

impl Attribute {
    /// The SDO server may read from the variable
    pub const SDO_R: Attribute = Attribute(0x01);
    /// The SDO server may write to the variable
    pub const SDO_W: Attribute = Attribute(0x02);
    /// The SDO server may read from or write to the variable
    pub const SDO_RW: Attribute = Attribute(0x03);
    /// The variable is mappable into a TPDO
    pub const TPDO: Attribute = Attribute(0x04);
    /// The variable is mappable into an RPDO
    pub const RPDO: Attribute = Attribute(0x08);
    /// The variable is mappable into a transmitting SRDO
    pub const TSRDO: Attribute = Attribute(0x10);
    /// The variable is mappable into a receiving SRDO
    pub const RSRDO: Attribute = Attribute(0x20);
    /// The variable is wider than one byte, stored little-endian
    pub const MULTI_BYTE: Attribute = Attribute(0x40);
    /// A value shorter than the variable size may be written; the remaining
    /// bytes are padded with zero. Used for string types.
    pub const STR: Attribute = Attribute(0x80);

    /// An empty attribute set
    pub const fn none() -> Attribute {
        Attribute(0)
    }

    /// Combine two attribute sets, usable in const context
    pub const fn union(self, other: Attribute) -> Attribute {
        Attribute(self.0 | other.0)
    }

    /// Returns true if all flags in `flags` are set
    pub fn contains(&self, flags: Attribute) -> bool {
        self.0 & flags.0 == flags.0
    }

    /// Get the raw bit-field
    pub fn raw(&self) -> u8 {
        self.0
    }
}

impl BitOr for Attribute {
    type Output = Attribute;

    fn bitor(self, rhs: Attribute) -> Attribute {
        self.union(rhs)
    }
}

/// Interior-mutable backing storage for one catalog variable
///
/// Catalogs are `'static`, so writable variables need interior mutability.
/// The raw pointer handed to the descriptor tables is only ever dereferenced
/// by the default read/write functions, inside the OD lock.
#[derive(Debug)]
#[repr(transparent)]
pub struct OdData<T>(UnsafeCell<T>);

// Safety: all access to the contained value goes through critical sections,
// either via get/set here or via the default OD read/write functions.
unsafe impl<T: Send> Sync for OdData<T> {}

impl<T> OdData<T> {
    /// Create new backing storage holding `value`
    pub const fn new(value: T) -> Self {
        Self(UnsafeCell::new(value))
    }

    /// Get a raw byte pointer to the storage, for use in descriptor tables
    pub const fn as_ptr(&self) -> *mut u8 {
        self.0.get().cast()
    }
}

impl<T: Copy> OdData<T> {
    /// Atomically read the stored value
    pub fn get(&self) -> T {
        critical_section::with(|_| unsafe { *self.0.get() })
    }

    /// Atomically replace the stored value
    pub fn set(&self, value: T) {
        critical_section::with(|_| unsafe { *self.0.get() = value });
    }
}

/// Descriptor for a single variable, used for VAR entries
#[derive(Clone, Copy, Debug)]
pub struct VarObject {
    /// Pointer to the backing data, or null if no storage is specified
    pub data: *mut u8,
    /// Attribute bit-field
    pub attribute: Attribute,
    /// Data length in bytes, or 0 if the length is not specified
    pub data_length: usize,
}

/// Descriptor for an array of equally-typed variables, used for ARRAY entries
///
/// Sub-index 0 holds a one byte value (usually the highest sub-index);
/// sub-indices 1..=N address consecutive elements at `element_stride`
/// spacing.
#[derive(Clone, Copy, Debug)]
pub struct ArrayObject {
    /// Pointer to the one-byte sub-index 0 value
    pub data0: *mut u8,
    /// Attribute bit-field for sub-index 0
    pub attribute0: Attribute,
    /// Pointer to the first array element, or null
    pub data: *mut u8,
    /// Attribute bit-field for the array elements
    pub attribute: Attribute,
    /// Data length of one element in bytes
    pub element_length: usize,
    /// Spacing between consecutive elements in bytes
    pub element_stride: usize,
}

/// Descriptor for one sub-object of a RECORD entry
#[derive(Clone, Copy, Debug)]
pub struct RecordObject {
    /// Sub-index of this element
    pub sub_index: u8,
    /// Pointer to the backing data, or null
    pub data: *mut u8,
    /// Attribute bit-field
    pub attribute: Attribute,
    /// Data length in bytes
    pub data_length: usize,
}

// Safety: see OdData. Descriptor pointers refer to static storage and are
// only dereferenced under the OD lock.
unsafe impl Sync for RecordObject {}
unsafe impl Send for RecordObject {}

/// The shape-specific descriptor of an OD entry
#[derive(Clone, Copy, Debug)]
pub enum OdObject {
    /// A single variable at sub-index 0
    Var(VarObject),
    /// An array of variables with a common type
    Array(ArrayObject),
    /// A structure of heterogenous sub-objects
    Record(&'static [RecordObject]),
}

/// One row of the object dictionary catalog
#[allow(missing_debug_implementations)]
pub struct OdEntry {
    /// Object index
    pub index: u16,
    /// Number of sub-entries. 1 for VAR, highest sub-index + 1 for ARRAY;
    /// for RECORD this is the number of elements, which may be smaller than
    /// the highest sub-index if there are gaps.
    pub sub_count: u8,
    /// Shape-specific descriptor
    pub object: OdObject,
    /// IO extension slot. `Some` marks the entry as extendable; the slot
    /// contents are installed by the owning service at init.
    pub extension: Option<&'static OdExtension>,
}

// Safety: see RecordObject.
unsafe impl Sync for OdEntry {}
unsafe impl Send for OdEntry {}

/// Properties of one resolved sub-object, populated by [`OdEntry::get_sub`]
#[derive(Clone, Copy, Debug)]
pub struct SubInfo {
    /// Object index
    pub index: u16,
    /// Sub-index of the resolved sub-object
    pub sub_index: u8,
    /// Number of sub-entries in the parent entry
    pub sub_count: u8,
    /// Attribute bit-field of the sub-object
    pub attribute: Attribute,
    /// PDO flags of the entry's extension slot, if any
    pub pdo_flags: Option<&'static PdoFlags>,
}

/// Lookup an entry in the object dictionary catalog
///
/// Note: `od` must be sorted ascending by index
pub fn find(od: &[OdEntry], index: u16) -> Option<&OdEntry> {
    od.binary_search_by_key(&index, |e| e.index)
        .ok()
        .map(|i| &od[i])
}

impl OdEntry {
    /// Resolve one sub-object for I/O
    ///
    /// On success returns the sub-object properties and an [`OdIo`] whose
    /// stream cursor is reset to offset 0. With `od_orig` set, an installed
    /// IO extension is ignored and the returned functions access the
    /// original OD location; this is how extension callbacks write values
    /// through to the dictionary.
    pub fn get_sub(&self, sub_index: u8, od_orig: bool) -> Result<(SubInfo, OdIo), OdError> {
        let (data, attribute, data_length) = match &self.object {
            OdObject::Var(var) => {
                if sub_index > 0 {
                    return Err(OdError::SubNotExist);
                }
                (var.data, var.attribute, var.data_length)
            }
            OdObject::Array(arr) => {
                if sub_index >= self.sub_count {
                    return Err(OdError::SubNotExist);
                }
                if sub_index == 0 {
                    (arr.data0, arr.attribute0, 1)
                } else {
                    let data = if arr.data.is_null() {
                        core::ptr::null_mut()
                    } else {
                        // Safety: element offsets stay within the backing
                        // array, whose size the catalog generator derives
                        // from sub_count and element_stride
                        unsafe { arr.data.add(arr.element_stride * (sub_index as usize - 1)) }
                    };
                    (data, arr.attribute, arr.element_length)
                }
            }
            OdObject::Record(subs) => {
                let rec = subs
                    .iter()
                    .find(|r| r.sub_index == sub_index)
                    .ok_or(OdError::SubNotExist)?;
                (rec.data, rec.attribute, rec.data_length)
            }
        };

        let io = match self.extension {
            Some(ext) if !od_orig => OdIo {
                stream: OdStream {
                    data,
                    object: ext.object(),
                    data_length,
                    data_offset: 0,
                },
                read: ext.read_fn().unwrap_or(read_disabled),
                write: ext.write_fn().unwrap_or(write_disabled),
            },
            _ => OdIo {
                stream: OdStream {
                    data,
                    object: None,
                    data_length,
                    data_offset: 0,
                },
                read: read_original,
                write: write_original,
            },
        };

        let info = SubInfo {
            index: self.index,
            sub_index,
            sub_count: self.sub_count,
            attribute,
            pdo_flags: self.extension.and_then(|ext| ext.pdo_flags()),
        };

        Ok((info, io))
    }
}
