//! Bounds-checked little-endian primitive reads over byte buffers.
//!
//! Everything in the metadata format is little-endian. The helpers here are
//! the single place where raw bytes become typed values; all higher layers
//! ([`crate::file::parser::Parser`], table row decoding, heap access) funnel
//! through them so out-of-range reads surface uniformly as
//! [`crate::Error::OutOfBounds`].

use crate::Result;

/// Trait for primitive types that can be decoded from a little-endian byte
/// buffer.
///
/// Implemented for the fixed-width integers and floats the metadata format
/// uses. The associated `BYTES` constant drives bounds checking.
pub trait LeRead: Sized {
    /// Encoded width in bytes.
    const BYTES: usize;

    /// Decode `Self` from the start of `data`. `data` is guaranteed by the
    /// caller to hold at least `Self::BYTES` bytes.
    fn from_le_slice(data: &[u8]) -> Self;
}

macro_rules! impl_le_read {
    ($($t:ty),*) => {
        $(
            impl LeRead for $t {
                const BYTES: usize = std::mem::size_of::<$t>();

                fn from_le_slice(data: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$t>()];
                    raw.copy_from_slice(&data[..std::mem::size_of::<$t>()]);
                    <$t>::from_le_bytes(raw)
                }
            }
        )*
    };
}

impl_le_read!(u8, u16, u32, u64, i8, i16, i32, i64, f32, f64);

/// Read a `T` from the start of `data`.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if `data` is shorter than `T`.
pub fn read_le<T: LeRead>(data: &[u8]) -> Result<T> {
    if data.len() < T::BYTES {
        return Err(out_of_bounds_error!());
    }
    Ok(T::from_le_slice(data))
}

/// Read a `T` at `*offset`, advancing the offset past the value.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the read would cross the end of
/// `data`.
pub fn read_le_at<T: LeRead>(data: &[u8], offset: &mut usize) -> Result<T> {
    let end = offset
        .checked_add(T::BYTES)
        .ok_or(crate::Error::OutOfBounds)?;
    if end > data.len() {
        return Err(out_of_bounds_error!());
    }

    let value = T::from_le_slice(&data[*offset..]);
    *offset = end;
    Ok(value)
}

/// Read a 2- or 4-byte index at `*offset`, widening to `u32`.
///
/// Heap and table indices in the tables stream are 2 bytes wide unless the
/// referenced heap/table is large; the width is fixed once per image and
/// passed in as `is_large`.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the read would cross the end of
/// `data`.
pub fn read_le_at_dyn(data: &[u8], offset: &mut usize, is_large: bool) -> Result<u32> {
    if is_large {
        read_le_at::<u32>(data, offset)
    } else {
        Ok(u32::from(read_le_at::<u16>(data, offset)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_le_primitives() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        assert_eq!(read_le::<u8>(&data).unwrap(), 0x01);
        assert_eq!(read_le::<u16>(&data).unwrap(), 0x0201);
        assert_eq!(read_le::<u32>(&data).unwrap(), 0x0403_0201);
        assert_eq!(read_le::<u64>(&data).unwrap(), 0x0807_0605_0403_0201);
    }

    #[test]
    fn read_le_at_advances() {
        let data = [0x01, 0x00, 0x02, 0x00];
        let mut offset = 0;
        assert_eq!(read_le_at::<u16>(&data, &mut offset).unwrap(), 1);
        assert_eq!(read_le_at::<u16>(&data, &mut offset).unwrap(), 2);
        assert_eq!(offset, 4);
        assert!(read_le_at::<u16>(&data, &mut offset).is_err());
    }

    #[test]
    fn read_le_at_dyn_widths() {
        let data = [0xAA, 0xBB, 0xCC, 0xDD];
        let mut offset = 0;
        assert_eq!(read_le_at_dyn(&data, &mut offset, false).unwrap(), 0xBBAA);
        offset = 0;
        assert_eq!(
            read_le_at_dyn(&data, &mut offset, true).unwrap(),
            0xDDCC_BBAA
        );
    }

    #[test]
    fn out_of_bounds_is_reported() {
        let data = [0x01];
        assert!(read_le::<u32>(&data).is_err());
        let mut offset = usize::MAX;
        assert!(read_le_at::<u16>(&data, &mut offset).is_err());
    }
}
