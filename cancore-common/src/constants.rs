//! Constants defining standard object indices
//!
//!

/// Object indices for standard communication profile objects
pub mod object_ids {
    /// The device type object index
    pub const DEVICE_TYPE: u16 = 0x1000;
    /// The error register object index
    pub const ERROR_REGISTER: u16 = 0x1001;
    /// The predefined error field (error history) object index
    pub const PREDEFINED_ERROR_FIELD: u16 = 0x1003;
    /// The COB-ID EMCY object index
    pub const COB_ID_EMCY: u16 = 0x1014;
    /// The inhibit time EMCY object index
    pub const INHIBIT_TIME_EMCY: u16 = 0x1015;
    /// The heartbeat producer time object index
    pub const HEARTBEAT_PRODUCER_TIME: u16 = 0x1017;
    /// The identity object index
    pub const IDENTITY: u16 = 0x1018;
}
