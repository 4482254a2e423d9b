//! The `#Blob` heap: length-prefixed binary blobs (signatures, constants,
//! public keys, custom-attribute values).

use crate::{file::parser::Parser, Result};

/// Accessor over the `#Blob` heap.
///
/// Each entry is a compressed-unsigned length followed by that many bytes.
/// The heap is walked in full at load time; a heap whose entries do not
/// tile the declared size exactly is rejected before any signature is
/// decoded from it.
pub struct Blob<'a> {
    data: &'a [u8],
}

impl<'a> Blob<'a> {
    /// Wrap and validate a `#Blob` heap.
    ///
    /// # Errors
    /// Returns [`crate::Error::BadImage`] if the entry walk does not land
    /// exactly on the heap end.
    pub fn from(data: &'a [u8]) -> Result<Blob<'a>> {
        let mut parser = Parser::new(data);
        while parser.has_more_data() {
            let length = parser.read_compressed_u32()?;
            parser.advance_by(length as usize).map_err(|_| {
                bad_image_error!("#Blob entry at {} overruns the heap", parser.pos())
            })?;
        }
        Ok(Blob { data })
    }

    /// Look up the blob starting at byte `index`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for an offset beyond the heap
    /// and [`crate::Error::BadImage`] for a corrupt length prefix.
    pub fn get(&self, index: u32) -> Result<&'a [u8]> {
        let start = index as usize;
        if start >= self.data.len() {
            return Err(out_of_bounds_error!());
        }

        let mut parser = Parser::new(&self.data[start..]);
        let length = parser.read_compressed_u32()?;
        parser.take(length as usize)
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
        // empty blob, then [0xAA, 0xBB], then [0xCC]
        let data = [0x00, 0x02, 0xAA, 0xBB, 0x01, 0xCC];
        let blob = Blob::from(&data).unwrap();
        assert_eq!(blob.get(0).unwrap(), &[] as &[u8]);
        assert_eq!(blob.get(1).unwrap(), &[0xAA, 0xBB]);
        assert_eq!(blob.get(4).unwrap(), &[0xCC]);
    }

    #[test]
    fn rejects_overrunning_entry() {
        let data = [0x00, 0x05, 0xAA];
        assert!(Blob::from(&data).is_err());
    }

    #[test]
    fn get_checks_bounds() {
        let data = [0x00];
        let blob = Blob::from(&data).unwrap();
        assert!(blob.get(1).is_err());
    }
}
