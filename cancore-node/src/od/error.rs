//! Return codes for object dictionary access

use int_enum::IntEnum;

/// Error codes returned from OD access functions
///
/// Each variant carries the corresponding CiA 301 SDO abort code as its
/// discriminant, so an SDO server can forward a failed OD access verbatim.
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntEnum)]
#[repr(u32)]
pub enum OdError {
    /// Out of memory
    OutOfMem = 0x0504_0005,
    /// Unsupported access to an object
    UnsuppAccess = 0x0601_0000,
    /// Attempt to read a write only object
    WriteOnly = 0x0601_0001,
    /// Attempt to write a read only object
    ReadOnly = 0x0601_0002,
    /// Object does not exist in the object dictionary
    IdxNotExist = 0x0602_0000,
    /// Object cannot be mapped to the PDO
    NoMap = 0x0604_0041,
    /// The number and length of objects would exceed the PDO length
    MapLen = 0x0604_0042,
    /// General parameter incompatibility reasons
    ParIncompat = 0x0604_0043,
    /// General internal incompatibility in the device
    DevIncompat = 0x0604_0047,
    /// Access failed due to hardware error
    Hw = 0x0606_0000,
    /// Data type does not match, length of service parameter does not match
    TypeMismatch = 0x0607_0010,
    /// Data type does not match, length of service parameter too high
    DataLong = 0x0607_0012,
    /// Data type does not match, length of service parameter too short
    DataShort = 0x0607_0013,
    /// Sub-index does not exist
    SubNotExist = 0x0609_0011,
    /// Invalid value for parameter (download only)
    InvalidValue = 0x0609_0030,
    /// Value of parameter written too high (download only)
    ValueHigh = 0x0609_0031,
    /// Value of parameter written too low (download only)
    ValueLow = 0x0609_0032,
    /// Maximum value is less than minimum value
    MaxLessMin = 0x0609_0036,
    /// Resource not available
    NoResource = 0x060A_0023,
    /// General error
    General = 0x0800_0000,
    /// Data cannot be transferred or stored to the application
    DataTransf = 0x0800_0020,
    /// Data cannot be transferred or stored because of local control
    DataLocCtrl = 0x0800_0021,
    /// Data cannot be transferred or stored because of the device state
    DataDevState = 0x0800_0022,
    /// Object dictionary not present or dynamic generation failed
    OdMissing = 0x0800_0023,
    /// No data available
    NoData = 0x0800_0024,
}

impl OdError {
    /// Get the CiA 301 SDO abort code for this error
    pub fn abort_code(self) -> u32 {
        self as u32
    }
}
