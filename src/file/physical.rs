//! Memory-mapped file access for module images.
//!
//! Loading a patch module from disk maps the file read-only instead of
//! copying it; [`Physical`] owns the mapping for the lifetime of the module.

use std::{fs, path::Path};

use memmap2::Mmap;

use crate::{Error::Empty, Result};

/// A read-only memory mapping of a module image on disk.
pub struct Physical {
    /// The memory-mapped view of the underlying file
    data: Mmap,
}

impl Physical {
    /// Map the file at `path` into memory.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be opened or
    /// mapped, and [`crate::Error::Empty`] for zero-length files.
    pub fn new(path: impl AsRef<Path>) -> Result<Physical> {
        let file = fs::File::open(path)?;

        // Safety: the mapping is read-only and private; mutation of the file
        // by other processes is outside the supported model (same contract
        // the host runtime has for its own images).
        let mmap = unsafe { Mmap::map(&file) }?;
        if mmap.is_empty() {
            return Err(Empty);
        }

        Ok(Physical { data: mmap })
    }

    /// The mapped bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Length of the mapping in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the mapping is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
