//! The `#US` heap: UTF-16 string literals referenced by `ldstr`.

use widestring::U16String;

use crate::{file::parser::Parser, Result};

/// Accessor over the `#US` (user string) heap.
///
/// Each entry is a compressed-unsigned byte length followed by UTF-16 code
/// units and a single trailing kind byte (non-zero when the string contains
/// characters that need special handling, informational here). Entry
/// lengths are therefore odd for any non-empty string. The heap is walked
/// in full at load time.
///
/// Entries start at arbitrary byte offsets, so lookups decode the UTF-16
/// payload pairwise into an owned buffer; the interning cache in the module
/// layer makes this a once-per-literal cost.
pub struct UserStrings<'a> {
    data: &'a [u8],
}

impl<'a> UserStrings<'a> {
    /// Wrap and validate a `#US` heap.
    ///
    /// # Errors
    /// Returns [`crate::Error::BadImage`] if the entry walk does not land
    /// exactly on the heap end.
    pub fn from(data: &'a [u8]) -> Result<UserStrings<'a>> {
        let mut parser = Parser::new(data);
        while parser.has_more_data() {
            let length = parser.read_compressed_u32()?;
            parser
                .advance_by(length as usize)
                .map_err(|_| bad_image_error!("#US entry at {} overruns the heap", parser.pos()))?;
        }
        Ok(UserStrings { data })
    }

    /// Decode the user string starting at byte `index`, without the
    /// trailing kind byte.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for an offset beyond the heap
    /// and [`crate::Error::BadImage`] for a corrupt entry (even byte length
    /// on a non-empty string).
    pub fn get(&self, index: u32) -> Result<U16String> {
        let start = index as usize;
        if start >= self.data.len() {
            return Err(out_of_bounds_error!());
        }

        let mut parser = Parser::new(&self.data[start..]);
        let length = parser.read_compressed_u32()?;
        if length == 0 {
            return Ok(U16String::new());
        }
        if length % 2 == 0 {
            return Err(bad_image_error!(
                "#US entry at offset {} has even byte length {}",
                index,
                length
            ));
        }

        let bytes = parser.take(length as usize)?;
        let utf16 = &bytes[..bytes.len() - 1];

        let mut units = Vec::with_capacity(utf16.len() / 2);
        for pair in utf16.chunks_exact(2) {
            units.push(u16::from_le_bytes([pair[0], pair[1]]));
        }
        Ok(U16String::from_vec(units))
    }

    /// Convenience: decode the entry at `index` to an owned `String`.
    ///
    /// # Errors
    /// Propagates [`UserStrings::get`] failures; lossy for unpaired
    /// surrogates.
    pub fn get_string(&self, index: u32) -> Result<String> {
        Ok(self.get(index)?.to_string_lossy())
    }

    /// Heap size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the heap is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_offset() {
        // entry at 0: single NUL slot; entry at 1: "Hi" (4 bytes + kind)
        let data = [0x00, 0x05, b'H', 0x00, b'i', 0x00, 0x00];
        let us = UserStrings::from(&data).unwrap();
        assert_eq!(us.get_string(1).unwrap(), "Hi");
        assert_eq!(us.get(0).unwrap().len(), 0);
    }

    #[test]
    fn rejects_even_length_entry() {
        let data = [0x02, b'H', 0x00];
        let us = UserStrings::from(&data).unwrap();
        assert!(us.get(0).is_err());
    }

    #[test]
    fn rejects_overrunning_heap() {
        let data = [0x09, 0x00];
        assert!(UserStrings::from(&data).is_err());
    }
}
