//! Stream cursor and default byte-copy I/O

use super::{Context, OdError};

/// Outcome of a successful read or write call on an OD stream
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transfer {
    /// The buffer was exhausted before the variable; the number of bytes
    /// copied so far by this call. Further calls are required.
    Partial(usize),
    /// The transfer finished with this call; the number of bytes copied
    Done(usize),
}

impl Transfer {
    /// Number of bytes copied by the call
    pub fn bytes(&self) -> usize {
        match self {
            Transfer::Partial(n) | Transfer::Done(n) => *n,
        }
    }

    /// Returns true when the transfer completed
    pub fn is_done(&self) -> bool {
        matches!(self, Transfer::Done(_))
    }
}

/// IO stream state, used for read/write access to one OD variable
///
/// The cursor advances across calls during segmented transfers.
#[allow(missing_debug_implementations)]
#[derive(Clone, Copy)]
pub struct OdStream {
    /// Pointer to the original data location defined by the dictionary, or
    /// null if no storage is specified
    pub data: *mut u8,
    /// User object installed by the entry's IO extension, if any
    pub object: Option<&'static dyn Context>,
    /// Data length of the variable in bytes, or 0 if not specified
    pub data_length: usize,
    /// Position of already transferred data within the variable
    pub data_offset: usize,
}

impl OdStream {
    /// Restart a segmented transfer from the beginning
    ///
    /// Not required after a [`Transfer::Done`] result; only when abandoning
    /// a sequence of [`Transfer::Partial`] calls.
    pub fn restart(&mut self) {
        self.data_offset = 0;
    }
}

impl core::fmt::Debug for OdStream {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OdStream")
            .field("data", &self.data)
            .field("object", &self.object.map(|_| "<dyn Context>"))
            .field("data_length", &self.data_length)
            .field("data_offset", &self.data_offset)
            .finish()
    }
}

/// Signature of OD read functions
pub type OdReadFn = fn(&mut OdStream, u8, &mut [u8]) -> Result<Transfer, OdError>;
/// Signature of OD write functions
pub type OdWriteFn = fn(&mut OdStream, u8, &[u8]) -> Result<Transfer, OdError>;

/// The stream and I/O function pair for one resolved sub-object
///
/// Call the functions with the contained stream:
/// `(io.read)(&mut io.stream, sub, buf)`.
#[allow(missing_debug_implementations)]
#[derive(Clone, Copy)]
pub struct OdIo {
    /// Stream state passed to the read and write functions
    pub stream: OdStream,
    /// Read function: default byte-copy, an installed extension function,
    /// or the disabled stub
    pub read: OdReadFn,
    /// Write function, resolved like `read`
    pub write: OdWriteFn,
}

impl core::fmt::Debug for OdIo {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OdIo")
            .field("stream", &self.stream)
            .field("read", &(self.read as usize))
            .field("write", &(self.write as usize))
            .finish()
    }
}

/// Read from the original OD location
///
/// This is the default read function of every entry. Extension read
/// functions can call it to fall back to the plain dictionary value. If the
/// variable is larger than `buf`, the copy proceeds in segments:
/// intermediate calls return [`Transfer::Partial`] and advance the stream
/// offset, the final call resets it and returns [`Transfer::Done`].
pub fn read_original(
    stream: &mut OdStream,
    _sub_index: u8,
    buf: &mut [u8],
) -> Result<Transfer, OdError> {
    if stream.data.is_null() {
        return Err(OdError::SubNotExist);
    }

    let mut len = stream.data_length;
    let mut src = stream.data;
    let mut partial = false;

    // A previous partial call or an over-long variable means the data is
    // transferred in several segments
    if stream.data_offset > 0 || len > buf.len() {
        if stream.data_offset >= len {
            return Err(OdError::DevIncompat);
        }
        len -= stream.data_offset;
        // Safety: offset < data_length, checked above
        src = unsafe { src.add(stream.data_offset) };

        if len > buf.len() {
            len = buf.len();
            stream.data_offset += len;
            partial = true;
        } else {
            stream.data_offset = 0;
        }
    }

    critical_section::with(|_| unsafe {
        core::ptr::copy_nonoverlapping(src, buf.as_mut_ptr(), len);
    });

    if partial {
        Ok(Transfer::Partial(len))
    } else {
        Ok(Transfer::Done(len))
    }
}

/// Write to the original OD location
///
/// Mirror of [`read_original`]. A final call carrying more bytes than remain
/// in the variable fails with [`OdError::DataLong`] and leaves the variable
/// untouched.
pub fn write_original(
    stream: &mut OdStream,
    _sub_index: u8,
    buf: &[u8],
) -> Result<Transfer, OdError> {
    if stream.data.is_null() {
        return Err(OdError::SubNotExist);
    }

    let mut len = stream.data_length;
    let mut dst = stream.data;
    let mut partial = false;

    if stream.data_offset > 0 || len > buf.len() {
        if stream.data_offset >= len {
            return Err(OdError::DevIncompat);
        }
        len -= stream.data_offset;
        // Safety: offset < data_length, checked above
        dst = unsafe { dst.add(stream.data_offset) };

        if len > buf.len() {
            len = buf.len();
            stream.data_offset += len;
            partial = true;
        } else {
            stream.data_offset = 0;
        }
    }

    if len < buf.len() {
        // The variable is smaller than the supplied data
        return Err(OdError::DataLong);
    }

    critical_section::with(|_| unsafe {
        core::ptr::copy_nonoverlapping(buf.as_ptr(), dst, len);
    });

    if partial {
        Ok(Transfer::Partial(len))
    } else {
        Ok(Transfer::Done(len))
    }
}

/// Read stub for extended entries without an installed read function
pub fn read_disabled(
    _stream: &mut OdStream,
    _sub_index: u8,
    _buf: &mut [u8],
) -> Result<Transfer, OdError> {
    Err(OdError::UnsuppAccess)
}

/// Write stub for extended entries without an installed write function
pub fn write_disabled(
    _stream: &mut OdStream,
    _sub_index: u8,
    _buf: &[u8],
) -> Result<Transfer, OdError> {
    Err(OdError::UnsuppAccess)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream_over(data: &mut [u8]) -> OdStream {
        OdStream {
            data: data.as_mut_ptr(),
            object: None,
            data_length: data.len(),
            data_offset: 0,
        }
    }

    #[test]
    fn test_read_whole() {
        let mut backing = [1u8, 2, 3, 4];
        let mut stream = stream_over(&mut backing);
        let mut buf = [0u8; 4];
        assert_eq!(
            Ok(Transfer::Done(4)),
            read_original(&mut stream, 0, &mut buf)
        );
        assert_eq!([1, 2, 3, 4], buf);
        assert_eq!(0, stream.data_offset);
    }

    #[test]
    fn test_read_segmented_all_chunk_sizes() {
        let backing: Vec<u8> = (0..23).collect();
        for chunk in 1..=backing.len() {
            let mut data = backing.clone();
            let mut stream = stream_over(&mut data);
            let mut collected = Vec::new();
            let mut buf = vec![0u8; chunk];
            let mut last_offset = 0;
            loop {
                match read_original(&mut stream, 0, &mut buf).unwrap() {
                    Transfer::Partial(n) => {
                        assert_eq!(chunk, n);
                        assert!(stream.data_offset > last_offset);
                        last_offset = stream.data_offset;
                        collected.extend_from_slice(&buf[..n]);
                    }
                    Transfer::Done(n) => {
                        collected.extend_from_slice(&buf[..n]);
                        break;
                    }
                }
            }
            assert_eq!(backing, collected, "chunk size {chunk}");
            assert_eq!(0, stream.data_offset);
        }
    }

    #[test]
    fn test_write_segmented() {
        let mut backing = [0u8; 10];
        let mut stream = stream_over(&mut backing);
        let input = [10u8, 11, 12, 13, 14, 15, 16, 17, 18, 19];

        assert_eq!(
            Ok(Transfer::Partial(4)),
            write_original(&mut stream, 0, &input[0..4])
        );
        assert_eq!(4, stream.data_offset);
        assert_eq!(
            Ok(Transfer::Partial(4)),
            write_original(&mut stream, 0, &input[4..8])
        );
        assert_eq!(8, stream.data_offset);
        assert_eq!(
            Ok(Transfer::Done(2)),
            write_original(&mut stream, 0, &input[8..10])
        );
        assert_eq!(0, stream.data_offset);
        assert_eq!(input, backing);
    }

    #[test]
    fn test_write_too_long() {
        let mut backing = [7u8; 4];
        let mut stream = stream_over(&mut backing);
        let result = write_original(&mut stream, 0, &[0u8; 6]);
        assert_eq!(Err(OdError::DataLong), result);
        assert_eq!([7u8; 4], backing);
    }

    #[test]
    fn test_write_too_long_on_continuation() {
        let mut backing = [0u8; 6];
        let mut stream = stream_over(&mut backing);
        assert_eq!(
            Ok(Transfer::Partial(4)),
            write_original(&mut stream, 0, &[1u8; 4])
        );
        // 2 bytes remain, supplying 4 must be rejected
        assert_eq!(
            Err(OdError::DataLong),
            write_original(&mut stream, 0, &[2u8; 4])
        );
    }

    #[test]
    fn test_restart() {
        let mut backing = [0u8; 8];
        let mut stream = stream_over(&mut backing);
        assert_eq!(
            Ok(Transfer::Partial(4)),
            write_original(&mut stream, 0, &[1u8; 4])
        );
        stream.restart();
        assert_eq!(0, stream.data_offset);
        assert_eq!(
            Ok(Transfer::Done(8)),
            write_original(&mut stream, 0, &[2u8; 8])
        );
        assert_eq!([2u8; 8], backing);
    }

    #[test]
    fn test_null_data() {
        let mut stream = OdStream {
            data: core::ptr::null_mut(),
            object: None,
            data_length: 4,
            data_offset: 0,
        };
        let mut buf = [0u8; 4];
        assert_eq!(
            Err(OdError::SubNotExist),
            read_original(&mut stream, 0, &mut buf)
        );
        assert_eq!(
            Err(OdError::SubNotExist),
            write_original(&mut stream, 0, &buf)
        );
    }

    #[test]
    fn test_offset_beyond_length() {
        let mut backing = [0u8; 4];
        let mut stream = stream_over(&mut backing);
        stream.data_offset = 4;
        let mut buf = [0u8; 2];
        assert_eq!(
            Err(OdError::DevIncompat),
            read_original(&mut stream, 0, &mut buf)
        );
    }

    #[test]
    fn test_zero_length_variable() {
        // Variable length unspecified: a read completes with zero bytes
        let mut backing = [0u8; 1];
        let mut stream = stream_over(&mut backing);
        stream.data_length = 0;
        let mut buf = [0u8; 4];
        assert_eq!(
            Ok(Transfer::Done(0)),
            read_original(&mut stream, 0, &mut buf)
        );
    }
}
