//! Byte-level access to module images.
//!
//! A module reaches the loader either as an owned in-memory buffer (the
//! common hot-patch path, bytes downloaded or unpacked by the host) or as a
//! memory-mapped file. [`File`] unifies both behind a single `data()` view
//! so the raw image parser never cares about the backing storage.

pub(crate) mod io;
pub mod parser;
pub(crate) mod physical;

use std::path::Path;

use ouroboros::self_referencing;

use crate::{file::physical::Physical, Error::Empty, Result};

/// Backing storage for a loaded module image.
enum Backing {
    /// Owned buffer handed in by the host
    Memory(Vec<u8>),
    /// Read-only file mapping
    Mapped(Physical),
}

impl Backing {
    fn bytes(&self) -> &[u8] {
        match self {
            Backing::Memory(data) => data,
            Backing::Mapped(physical) => physical.data(),
        }
    }
}

/// One module image, immutable for the lifetime of the module.
///
/// The self-referencing layout keeps the backing storage and the borrowed
/// byte view in one movable value, so the raw image and all of its table
/// slices can reference the data without lifetime plumbing through every
/// metadata structure.
#[self_referencing]
pub struct File {
    backing: Backing,
    #[borrows(backing)]
    data: &'this [u8],
}

impl File {
    /// Map the module image at `path`.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] on I/O failure and
    /// [`crate::Error::Empty`] for an empty file.
    pub fn from_file(path: &Path) -> Result<File> {
        let physical = Physical::new(path)?;
        Ok(FileBuilder {
            backing: Backing::Mapped(physical),
            data_builder: |backing| backing.bytes(),
        }
        .build())
    }

    /// Take ownership of an in-memory module image.
    ///
    /// # Errors
    /// Returns [`crate::Error::Empty`] if `data` is empty.
    pub fn from_mem(data: Vec<u8>) -> Result<File> {
        if data.is_empty() {
            return Err(Empty);
        }
        Ok(FileBuilder {
            backing: Backing::Memory(data),
            data_builder: |backing| backing.bytes(),
        }
        .build())
    }

    /// The raw image bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        *self.borrow_data()
    }

    /// Image length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.borrow_data().len()
    }

    /// Returns `true` if the image holds no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.borrow_data().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_mem_rejects_empty() {
        assert!(matches!(File::from_mem(Vec::new()), Err(Empty)));
    }

    #[test]
    fn from_mem_round_trips() {
        let file = File::from_mem(vec![1, 2, 3]).unwrap();
        assert_eq!(file.data(), &[1, 2, 3]);
        assert_eq!(file.len(), 3);
    }
}
