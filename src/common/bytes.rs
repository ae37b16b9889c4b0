//! Bounds-checked fixed-width integer access into raw byte buffers
//!
//! Every read names its byte order explicitly; nothing depends on the host.
//! A read that would extend past the buffer fails with
//! [`PayloadError::OutOfRange`] and is never truncated or zero-padded.

use super::error::{PayloadError, PayloadResult};

/// Byte order of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Big,
    Little,
}

/// Fixed-width integers that can be read from and written to a buffer
pub trait Primitive: Sized + Copy {
    /// Encoded width in bytes
    const WIDTH: usize;

    /// Decode from exactly `WIDTH` bytes
    fn from_slice(endian: Endian, bytes: &[u8]) -> Self;

    /// Encode into exactly `WIDTH` bytes
    fn to_slice(self, endian: Endian, out: &mut [u8]);
}

macro_rules! impl_primitive {
    ($($t:ty),*) => {
        $(
            impl Primitive for $t {
                const WIDTH: usize = std::mem::size_of::<$t>();

                fn from_slice(endian: Endian, bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$t>()];
                    raw.copy_from_slice(bytes);
                    match endian {
                        Endian::Big => <$t>::from_be_bytes(raw),
                        Endian::Little => <$t>::from_le_bytes(raw),
                    }
                }

                fn to_slice(self, endian: Endian, out: &mut [u8]) {
                    let raw = match endian {
                        Endian::Big => self.to_be_bytes(),
                        Endian::Little => self.to_le_bytes(),
                    };
                    out.copy_from_slice(&raw);
                }
            }
        )*
    };
}

impl_primitive!(u8, u16, u32, u64, i32);

fn checked_range<T: Primitive>(offset: usize, len: usize) -> PayloadResult<std::ops::Range<usize>> {
    offset
        .checked_add(T::WIDTH)
        .filter(|&end| end <= len)
        .map(|end| offset..end)
        .ok_or_else(|| PayloadError::out_of_range(offset, T::WIDTH, len))
}

/// Read a `T` at `offset`
pub fn read<T: Primitive>(endian: Endian, offset: usize, buffer: &[u8]) -> PayloadResult<T> {
    let range = checked_range::<T>(offset, buffer.len())?;
    Ok(T::from_slice(endian, &buffer[range]))
}

/// Overwrite the `T` at `offset`
pub fn write<T: Primitive>(
    endian: Endian,
    offset: usize,
    buffer: &mut [u8],
    value: T,
) -> PayloadResult<()> {
    let range = checked_range::<T>(offset, buffer.len())?;
    value.to_slice(endian, &mut buffer[range]);
    Ok(())
}

/// Append a `T` to the end of `buffer`
pub fn push<T: Primitive>(endian: Endian, buffer: &mut Vec<u8>, value: T) {
    let start = buffer.len();
    buffer.resize(start + T::WIDTH, 0);
    value.to_slice(endian, &mut buffer[start..]);
}

/// Reader bound to one buffer and one byte order
///
/// Record decoders hold one of these for the duration of a decode call.
#[derive(Debug, Clone, Copy)]
pub struct ByteReader<'a> {
    buffer: &'a [u8],
    endian: Endian,
}

impl<'a> ByteReader<'a> {
    pub fn new(buffer: &'a [u8], endian: Endian) -> Self {
        Self { buffer, endian }
    }

    /// Big-endian reader (all current record types)
    pub fn big_endian(buffer: &'a [u8]) -> Self {
        Self::new(buffer, Endian::Big)
    }

    pub fn read<T: Primitive>(&self, offset: usize) -> PayloadResult<T> {
        read(self.endian, offset, self.buffer)
    }

    /// Borrow `len` bytes starting at `offset`
    pub fn slice(&self, offset: usize, len: usize) -> PayloadResult<&'a [u8]> {
        offset
            .checked_add(len)
            .filter(|&end| end <= self.buffer.len())
            .map(|end| &self.buffer[offset..end])
            .ok_or_else(|| PayloadError::out_of_range(offset, len, self.buffer.len()))
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}
