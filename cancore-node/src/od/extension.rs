//! Per-entry IO extension slots

use core::any::Any;

use cancore_common::AtomicCell;

use super::{OdEntry, OdError, OdReadFn, OdWriteFn};

/// Trait defining the requirements for type-erased extension user objects
///
/// A blanket implementation covers every `'static + Sync + Send` type, so a
/// service only needs to downcast inside its read/write functions:
/// `stream.object.unwrap().as_any().downcast_ref::<MyService>()`.
pub trait Context: Any + Sync + Send + 'static {
    /// Upcast to `Any` for downcasting to the concrete service type
    fn as_any<'a, 'b: 'a>(&'b self) -> &'a dyn Any;
}

impl<T: Any + Sync + Send + 'static> Context for T {
    fn as_any<'a, 'b: 'a>(&'b self) -> &'a dyn Any {
        self
    }
}

/// Per-sub-element PDO event flags attached to an extended entry
///
/// Bit 0 is set whenever an RPDO writes new data into the variable, and may
/// be cleared by the application. Bits 1.. are set by the corresponding TPDO
/// at the time it is sent, so up to 31 TPDOs can share one flags word.
#[derive(Debug, Default)]
pub struct PdoFlags(AtomicCell<u32>);

impl PdoFlags {
    /// Create a new cleared flags word
    pub const fn new() -> Self {
        Self(AtomicCell::new(0))
    }

    /// Set one flag bit
    pub fn set(&self, bit: u8) {
        if bit < 32 {
            // Unwrap: the update closure never returns None
            self.0.fetch_update(|f| Some(f | 1 << bit)).unwrap();
        }
    }

    /// Clear one flag bit
    pub fn clear(&self, bit: u8) {
        if bit < 32 {
            // Unwrap: the update closure never returns None
            self.0.fetch_update(|f| Some(f & !(1 << bit))).unwrap();
        }
    }

    /// Read one flag bit
    pub fn is_set(&self, bit: u8) -> bool {
        bit < 32 && self.0.load() & (1 << bit) != 0
    }

    /// Read the whole flags word
    pub fn load(&self) -> u32 {
        self.0.load()
    }
}

/// IO extension slot of an extendable OD entry
///
/// The slot is allocated by the catalog and filled exactly once, by the
/// service owning the entry, via [`OdEntry::install_extension`] at service
/// init. Until then (and for any function left as `None`), access through
/// the extension resolves to a stub failing with [`OdError::UnsuppAccess`].
#[allow(missing_debug_implementations)]
pub struct OdExtension {
    object: AtomicCell<Option<&'static dyn Context>>,
    read: AtomicCell<Option<OdReadFn>>,
    write: AtomicCell<Option<OdWriteFn>>,
    pdo_flags: Option<&'static PdoFlags>,
}

impl OdExtension {
    /// Create an empty extension slot
    pub const fn new() -> Self {
        Self {
            object: AtomicCell::new(None),
            read: AtomicCell::new(None),
            write: AtomicCell::new(None),
            pdo_flags: None,
        }
    }

    /// Create an empty extension slot coupled with a PDO flags word
    pub const fn with_pdo_flags(flags: &'static PdoFlags) -> Self {
        Self {
            object: AtomicCell::new(None),
            read: AtomicCell::new(None),
            write: AtomicCell::new(None),
            pdo_flags: Some(flags),
        }
    }

    pub(crate) fn object(&self) -> Option<&'static dyn Context> {
        self.object.load()
    }

    pub(crate) fn read_fn(&self) -> Option<OdReadFn> {
        self.read.load()
    }

    pub(crate) fn write_fn(&self) -> Option<OdWriteFn> {
        self.write.load()
    }

    pub(crate) fn pdo_flags(&self) -> Option<&'static PdoFlags> {
        self.pdo_flags
    }
}

impl Default for OdExtension {
    fn default() -> Self {
        Self::new()
    }
}

impl OdEntry {
    /// Install custom I/O on an extendable entry
    ///
    /// `object` is handed back to the installed functions through the
    /// stream. A function left as `None` disables that direction;
    /// [`read_original`](super::read_original) /
    /// [`write_original`](super::write_original) can be passed to keep the
    /// default behavior for one direction.
    ///
    /// Fails with [`OdError::ParIncompat`] if the entry has no extension
    /// slot. Intended to be called exactly once per entry during service
    /// init; concurrent installation is not supported.
    pub fn install_extension(
        &self,
        object: &'static dyn Context,
        read: Option<OdReadFn>,
        write: Option<OdWriteFn>,
    ) -> Result<(), OdError> {
        let ext = self.extension.ok_or(OdError::ParIncompat)?;
        ext.object.store(Some(object));
        ext.read.store(read);
        ext.write.store(write);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::{Attribute, OdObject, OdStream, Transfer, VarObject};
    use super::*;

    fn custom_read(
        stream: &mut OdStream,
        _sub: u8,
        buf: &mut [u8],
    ) -> Result<Transfer, OdError> {
        let value: &AtomicCell<u32> = stream
            .object
            .ok_or(OdError::DevIncompat)?
            .as_any()
            .downcast_ref()
            .ok_or(OdError::DevIncompat)?;
        if buf.len() < 4 {
            return Err(OdError::DevIncompat);
        }
        buf[0..4].copy_from_slice(&value.load().to_le_bytes());
        Ok(Transfer::Done(4))
    }

    fn custom_write(
        stream: &mut OdStream,
        _sub: u8,
        buf: &[u8],
    ) -> Result<Transfer, OdError> {
        let value: &AtomicCell<u32> = stream
            .object
            .ok_or(OdError::DevIncompat)?
            .as_any()
            .downcast_ref()
            .ok_or(OdError::DevIncompat)?;
        let bytes: [u8; 4] = buf.try_into().map_err(|_| OdError::TypeMismatch)?;
        value.store(u32::from_le_bytes(bytes));
        Ok(Transfer::Done(4))
    }

    fn leaked_extended_entry() -> (&'static OdEntry, *mut u8) {
        let backing = Box::leak(Box::new(super::super::OdData::new(0x11223344u32)));
        let ptr = backing.as_ptr();
        let ext = Box::leak(Box::new(OdExtension::new()));
        let entry = Box::leak(Box::new(OdEntry {
            index: 0x2005,
            sub_count: 1,
            object: OdObject::Var(VarObject {
                data: ptr,
                attribute: Attribute::SDO_RW | Attribute::MULTI_BYTE,
                data_length: 4,
            }),
            extension: Some(ext),
        }));
        (entry, ptr)
    }

    #[test]
    fn test_uninstalled_extension_is_disabled() {
        let (entry, _) = leaked_extended_entry();
        let (_, mut io) = entry.get_sub(0, false).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(
            Err(OdError::UnsuppAccess),
            (io.read)(&mut io.stream, 0, &mut buf)
        );
        assert_eq!(Err(OdError::UnsuppAccess), (io.write)(&mut io.stream, 0, &buf));
    }

    #[test]
    fn test_install_and_override() {
        let (entry, _) = leaked_extended_entry();
        let shadow = Box::leak(Box::new(AtomicCell::new(0xAABBCCDDu32)));
        entry
            .install_extension(shadow, Some(custom_read), Some(custom_write))
            .unwrap();

        // Extended access reads and writes the service state
        let (_, mut io) = entry.get_sub(0, false).unwrap();
        let mut buf = [0u8; 4];
        (io.read)(&mut io.stream, 0, &mut buf).unwrap();
        assert_eq!(0xAABBCCDDu32, u32::from_le_bytes(buf));

        (io.write)(&mut io.stream, 0, &0x55667788u32.to_le_bytes()).unwrap();
        assert_eq!(0x55667788, shadow.load());

        // od_orig access bypasses the extension and sees the OD value
        let (_, mut io) = entry.get_sub(0, true).unwrap();
        (io.read)(&mut io.stream, 0, &mut buf).unwrap();
        assert_eq!(0x11223344u32, u32::from_le_bytes(buf));

        (io.write)(&mut io.stream, 0, &0x01020304u32.to_le_bytes()).unwrap();
        let (_, mut io) = entry.get_sub(0, true).unwrap();
        (io.read)(&mut io.stream, 0, &mut buf).unwrap();
        assert_eq!(0x01020304u32, u32::from_le_bytes(buf));
        // The service state is untouched by the od_orig write
        assert_eq!(0x55667788, shadow.load());
    }

    #[test]
    fn test_install_on_plain_entry() {
        let entry = OdEntry {
            index: 0x2006,
            sub_count: 1,
            object: OdObject::Var(VarObject {
                data: core::ptr::null_mut(),
                attribute: Attribute::SDO_R,
                data_length: 1,
            }),
            extension: None,
        };
        let obj = Box::leak(Box::new(0u8));
        assert_eq!(
            Err(OdError::ParIncompat),
            entry.install_extension(obj, None, None)
        );
    }

    #[test]
    fn test_pdo_flags() {
        let flags = PdoFlags::new();
        assert!(!flags.is_set(0));
        flags.set(0);
        flags.set(5);
        assert!(flags.is_set(0));
        assert!(flags.is_set(5));
        assert_eq!(0b100001, flags.load());
        flags.clear(0);
        assert!(!flags.is_set(0));
        // Out of range bits are ignored
        flags.set(40);
        assert_eq!(0b100000, flags.load());
        assert!(!flags.is_set(40));
    }
}
