//! Typed getters and setters for scalar OD variables

use super::{OdEntry, OdError, Transfer};

/// A scalar type which can be stored in an OD variable
///
/// All scalars are stored little-endian regardless of host byte order.
pub trait OdScalar: Copy {
    /// Size of the encoded value in bytes
    const SIZE: usize;

    /// Decode a value from little-endian bytes. `bytes` has length `SIZE`.
    fn from_le_slice(bytes: &[u8]) -> Self;

    /// Encode the value into little-endian bytes. `bytes` has length `SIZE`.
    fn to_le_slice(self, bytes: &mut [u8]);
}

macro_rules! impl_od_scalar {
    ($($t:ty),*) => {
        $(
            impl OdScalar for $t {
                const SIZE: usize = core::mem::size_of::<$t>();

                fn from_le_slice(bytes: &[u8]) -> Self {
                    // Unwrap: callers always pass SIZE bytes
                    <$t>::from_le_bytes(bytes.try_into().unwrap())
                }

                fn to_le_slice(self, bytes: &mut [u8]) {
                    bytes.copy_from_slice(&self.to_le_bytes());
                }
            }
        )*
    };
}

impl_od_scalar!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

/// Get a scalar variable from the object dictionary
///
/// The variable's declared length must equal `size_of::<T>()`, otherwise the
/// access fails with [`OdError::TypeMismatch`]; the resolved read function is
/// invoked exactly once with a buffer of that size, so partial reads never
/// occur for a well-behaved entry. With `od_orig` set, a potential IO
/// extension is bypassed and the original OD value is returned.
pub fn get_value<T: OdScalar>(entry: &OdEntry, sub_index: u8, od_orig: bool) -> Result<T, OdError> {
    let (_, mut io) = entry.get_sub(sub_index, od_orig)?;
    if io.stream.data.is_null() {
        return Err(OdError::DevIncompat);
    }
    if io.stream.data_length != T::SIZE {
        return Err(OdError::TypeMismatch);
    }

    let mut buf = [0u8; 8];
    let buf = &mut buf[..T::SIZE];
    match (io.read)(&mut io.stream, sub_index, buf)? {
        Transfer::Done(_) => Ok(T::from_le_slice(buf)),
        // An exact-size buffer was supplied, so a partial outcome means the
        // entry's read function disagrees with its declared length
        Transfer::Partial(_) => Err(OdError::DevIncompat),
    }
}

/// Set a scalar variable in the object dictionary
///
/// Mirror of [`get_value`]; see there for the length contract and the
/// meaning of `od_orig`.
pub fn set_value<T: OdScalar>(
    entry: &OdEntry,
    sub_index: u8,
    value: T,
    od_orig: bool,
) -> Result<(), OdError> {
    let (_, mut io) = entry.get_sub(sub_index, od_orig)?;
    if io.stream.data_length != T::SIZE {
        return Err(OdError::TypeMismatch);
    }

    let mut buf = [0u8; 8];
    let buf = &mut buf[..T::SIZE];
    value.to_le_slice(buf);
    match (io.write)(&mut io.stream, sub_index, buf)? {
        Transfer::Done(_) => Ok(()),
        // see get_value: an exact-size buffer never writes partially
        Transfer::Partial(_) => Err(OdError::DevIncompat),
    }
}

/// Get the pointer to the memory holding an OD variable
///
/// The pointer always refers to the original OD location, even when an IO
/// extension is installed on the entry, and may be unaligned for the
/// variable's type.
pub fn get_ptr(entry: &OdEntry, sub_index: u8) -> Result<(*mut u8, usize), OdError> {
    let (_, io) = entry.get_sub(sub_index, true)?;
    if io.stream.data.is_null() || io.stream.data_length == 0 {
        return Err(OdError::DevIncompat);
    }
    Ok((io.stream.data, io.stream.data_length))
}
