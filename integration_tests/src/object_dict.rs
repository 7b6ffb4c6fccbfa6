//! Object dictionary definition for the test node
//!
//! This module is written the way the catalog generator emits it: the
//! backing data is grouped into one aggregate for values persisted over
//! communication reset and one for RAM-only values, followed by the
//! extension slots and the entry table. The split lets a storage subsystem
//! snapshot the persistent aggregate without touching live RAM state.

use cancore_node::emcy::ERROR_STATUS_BITS;
use cancore_node::od::{
    ArrayObject, Attribute, OdData, OdEntry, OdExtension, OdObject, RecordObject, VarObject,
};

/// Backing storage of the identity object (0x1018)
#[derive(Debug)]
#[repr(C)]
pub struct OdIdentity {
    /// Highest supported sub-index
    pub highest_sub_index: OdData<u8>,
    /// Vendor ID assigned by CiA
    pub vendor_id: OdData<u32>,
    /// Manufacturer product code
    pub product_code: OdData<u32>,
    /// Product revision number
    pub revision_number: OdData<u32>,
    /// Device serial number
    pub serial_number: OdData<u32>,
}

/// Values persisted over communication reset
#[derive(Debug)]
#[repr(C)]
pub struct OdPersistComm {
    /// 0x1000 device type
    pub x1000_device_type: OdData<u32>,
    /// 0x1001 error register
    pub x1001_error_register: OdData<u8>,
    /// 0x1014 COB-ID EMCY
    pub x1014_cob_id_emcy: OdData<u32>,
    /// 0x1015 inhibit time EMCY, units of 100 us
    pub x1015_inhibit_time_emcy: OdData<u16>,
    /// 0x1017 producer heartbeat time in ms
    pub x1017_producer_heartbeat_time: OdData<u16>,
    /// 0x1018 identity object
    pub x1018_identity: OdIdentity,
}

/// RAM-only values
#[derive(Debug)]
#[repr(C)]
pub struct OdRam {
    /// 0x1003 sub 0, number of stored errors
    pub x1003_pre_defined_error_field_sub0: OdData<u8>,
    /// 0x1003 error history backing
    pub x1003_pre_defined_error_field: OdData<[u32; 8]>,
    /// 0x2000 application test value
    pub x2000_test_value: OdData<u32>,
    /// 0x2001 device label string
    pub x2001_device_label: OdData<[u8; 10]>,
    /// 0x2002 sub 0, number of calibration values
    pub x2002_calibration_sub0: OdData<u8>,
    /// 0x2002 calibration values
    pub x2002_calibration: OdData<[u16; 4]>,
    /// 0x2100 manufacturer error status bits
    pub x2100_error_status_bits: OdData<[u8; ERROR_STATUS_BITS / 8]>,
}

/// Persistent storage aggregate
pub static OD_PERSIST_COMM: OdPersistComm = OdPersistComm {
    x1000_device_type: OdData::new(0x0000_0000),
    x1001_error_register: OdData::new(0x00),
    x1014_cob_id_emcy: OdData::new(0x0000_0080),
    x1015_inhibit_time_emcy: OdData::new(0x0000),
    x1017_producer_heartbeat_time: OdData::new(0x0000),
    x1018_identity: OdIdentity {
        highest_sub_index: OdData::new(0x04),
        vendor_id: OdData::new(0x0000_0000),
        product_code: OdData::new(0x0000_0000),
        revision_number: OdData::new(0x0000_0000),
        serial_number: OdData::new(0x0000_0000),
    },
};

/// RAM storage aggregate
pub static OD_RAM: OdRam = OdRam {
    x1003_pre_defined_error_field_sub0: OdData::new(0x00),
    x1003_pre_defined_error_field: OdData::new([0; 8]),
    x2000_test_value: OdData::new(0x0000_0000),
    x2001_device_label: OdData::new(*b"cancore\0\0\0"),
    x2002_calibration_sub0: OdData::new(0x04),
    x2002_calibration: OdData::new([0; 4]),
    x2100_error_status_bits: OdData::new([0; ERROR_STATUS_BITS / 8]),
};

/// Extension slot for 0x1003, installed by the emergency service
pub static EXT_1003: OdExtension = OdExtension::new();
/// Extension slot for 0x1014, installed by the emergency service
pub static EXT_1014: OdExtension = OdExtension::new();
/// Extension slot for 0x1015, installed by the emergency service
pub static EXT_1015: OdExtension = OdExtension::new();
/// Extension slot for 0x2100, installed by the emergency service
pub static EXT_2100: OdExtension = OdExtension::new();

static OBJ_1018: [RecordObject; 5] = [
    RecordObject {
        sub_index: 0,
        data: OD_PERSIST_COMM.x1018_identity.highest_sub_index.as_ptr(),
        attribute: Attribute::SDO_R,
        data_length: 1,
    },
    RecordObject {
        sub_index: 1,
        data: OD_PERSIST_COMM.x1018_identity.vendor_id.as_ptr(),
        attribute: Attribute::SDO_R.union(Attribute::MULTI_BYTE),
        data_length: 4,
    },
    RecordObject {
        sub_index: 2,
        data: OD_PERSIST_COMM.x1018_identity.product_code.as_ptr(),
        attribute: Attribute::SDO_R.union(Attribute::MULTI_BYTE),
        data_length: 4,
    },
    RecordObject {
        sub_index: 3,
        data: OD_PERSIST_COMM.x1018_identity.revision_number.as_ptr(),
        attribute: Attribute::SDO_R.union(Attribute::MULTI_BYTE),
        data_length: 4,
    },
    RecordObject {
        sub_index: 4,
        data: OD_PERSIST_COMM.x1018_identity.serial_number.as_ptr(),
        attribute: Attribute::SDO_R.union(Attribute::MULTI_BYTE),
        data_length: 4,
    },
];

/// The object dictionary table, sorted ascending by index
pub static OD_TABLE: [OdEntry; 11] = [
    OdEntry {
        index: 0x1000,
        sub_count: 1,
        object: OdObject::Var(VarObject {
            data: OD_PERSIST_COMM.x1000_device_type.as_ptr(),
            attribute: Attribute::SDO_R.union(Attribute::MULTI_BYTE),
            data_length: 4,
        }),
        extension: None,
    },
    OdEntry {
        index: 0x1001,
        sub_count: 1,
        object: OdObject::Var(VarObject {
            data: OD_PERSIST_COMM.x1001_error_register.as_ptr(),
            attribute: Attribute::SDO_R,
            data_length: 1,
        }),
        extension: None,
    },
    OdEntry {
        index: 0x1003,
        sub_count: 9,
        object: OdObject::Array(ArrayObject {
            data0: OD_RAM.x1003_pre_defined_error_field_sub0.as_ptr(),
            attribute0: Attribute::SDO_RW,
            data: OD_RAM.x1003_pre_defined_error_field.as_ptr(),
            attribute: Attribute::SDO_R.union(Attribute::MULTI_BYTE),
            element_length: 4,
            element_stride: 4,
        }),
        extension: Some(&EXT_1003),
    },
    OdEntry {
        index: 0x1014,
        sub_count: 1,
        object: OdObject::Var(VarObject {
            data: OD_PERSIST_COMM.x1014_cob_id_emcy.as_ptr(),
            attribute: Attribute::SDO_RW.union(Attribute::MULTI_BYTE),
            data_length: 4,
        }),
        extension: Some(&EXT_1014),
    },
    OdEntry {
        index: 0x1015,
        sub_count: 1,
        object: OdObject::Var(VarObject {
            data: OD_PERSIST_COMM.x1015_inhibit_time_emcy.as_ptr(),
            attribute: Attribute::SDO_RW.union(Attribute::MULTI_BYTE),
            data_length: 2,
        }),
        extension: Some(&EXT_1015),
    },
    OdEntry {
        index: 0x1017,
        sub_count: 1,
        object: OdObject::Var(VarObject {
            data: OD_PERSIST_COMM.x1017_producer_heartbeat_time.as_ptr(),
            attribute: Attribute::SDO_RW.union(Attribute::MULTI_BYTE),
            data_length: 2,
        }),
        extension: None,
    },
    OdEntry {
        index: 0x1018,
        sub_count: 5,
        object: OdObject::Record(&OBJ_1018),
        extension: None,
    },
    OdEntry {
        index: 0x2000,
        sub_count: 1,
        object: OdObject::Var(VarObject {
            data: OD_RAM.x2000_test_value.as_ptr(),
            attribute: Attribute::SDO_RW
                .union(Attribute::TPDO)
                .union(Attribute::RPDO)
                .union(Attribute::MULTI_BYTE),
            data_length: 4,
        }),
        extension: None,
    },
    OdEntry {
        index: 0x2001,
        sub_count: 1,
        object: OdObject::Var(VarObject {
            data: OD_RAM.x2001_device_label.as_ptr(),
            attribute: Attribute::SDO_RW.union(Attribute::STR),
            data_length: 10,
        }),
        extension: None,
    },
    OdEntry {
        index: 0x2002,
        sub_count: 5,
        object: OdObject::Array(ArrayObject {
            data0: OD_RAM.x2002_calibration_sub0.as_ptr(),
            attribute0: Attribute::SDO_R,
            data: OD_RAM.x2002_calibration.as_ptr(),
            attribute: Attribute::SDO_RW.union(Attribute::MULTI_BYTE),
            element_length: 2,
            element_stride: 2,
        }),
        extension: None,
    },
    OdEntry {
        index: 0x2100,
        sub_count: 1,
        object: OdObject::Var(VarObject {
            data: OD_RAM.x2100_error_status_bits.as_ptr(),
            attribute: Attribute::SDO_RW,
            data_length: ERROR_STATUS_BITS / 8,
        }),
        extension: Some(&EXT_2100),
    },
];
