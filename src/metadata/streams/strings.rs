//! The `#Strings` heap: NUL-terminated UTF-8 identifier names.

use crate::Result;

/// Accessor over the `#Strings` heap.
///
/// Table columns reference names by byte offset into this heap. Offset 0 is
/// always the empty string. The whole heap is validated once at load: it
/// must be a sequence of NUL-terminated strings that ends exactly at the
/// declared stream size, so later offset lookups can only fail on an offset
/// that points outside the heap or into a non-boundary position of a valid
/// string, never on missing termination.
pub struct Strings<'a> {
    data: &'a [u8],
}

impl<'a> Strings<'a> {
    /// Wrap and validate a `#Strings` heap.
    ///
    /// # Errors
    /// Returns [`crate::Error::BadImage`] if the heap is empty, does not
    /// start with a NUL byte, or its last string is unterminated.
    pub fn from(data: &'a [u8]) -> Result<Strings<'a>> {
        if data.is_empty() || data[0] != 0 {
            return Err(bad_image_error!("#Strings heap missing leading NUL"));
        }
        if data[data.len() - 1] != 0 {
            return Err(bad_image_error!("#Strings heap is not NUL-terminated"));
        }
        Ok(Strings { data })
    }

    /// Look up the string starting at byte `index`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for an offset beyond the heap
    /// and [`crate::Error::BadImage`] for invalid UTF-8.
    pub fn get(&self, index: u32) -> Result<&'a str> {
        let start = index as usize;
        if start >= self.data.len() {
            return Err(out_of_bounds_error!());
        }

        // Validation guarantees a NUL before the end of the heap.
        let end = self.data[start..]
            .iter()
            .position(|&b| b == 0)
            .map(|pos| start + pos)
            .ok_or_else(|| bad_image_error!("Unterminated string at offset {}", index))?;

        std::str::from_utf8(&self.data[start..end])
            .map_err(|_| bad_image_error!("Invalid UTF-8 in #Strings at offset {}", index))
    }

    /// Heap size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the heap holds nothing but the leading NUL.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.len() <= 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_offset() {
        let data = b"\0Object\0System\0";
        let strings = Strings::from(data).unwrap();
        assert_eq!(strings.get(0).unwrap(), "");
        assert_eq!(strings.get(1).unwrap(), "Object");
        assert_eq!(strings.get(8).unwrap(), "System");
        // Mid-string offsets are legal per format and yield the suffix.
        assert_eq!(strings.get(3).unwrap(), "ject");
    }

    #[test]
    fn rejects_malformed_heap() {
        assert!(Strings::from(b"").is_err());
        assert!(Strings::from(b"x\0").is_err());
        assert!(Strings::from(b"\0abc").is_err());
    }

    #[test]
    fn rejects_out_of_range_offset() {
        let strings = Strings::from(b"\0a\0").unwrap();
        assert!(strings.get(3).is_err());
    }
}
