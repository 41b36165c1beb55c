//! Physical file backend for memory-mapped I/O.
//!
//! This module provides the [`crate::file::physical::Physical`] backend that implements
//! the [`crate::file::Backend`] trait for accessing snapshot files from disk using
//! memory-mapped I/O. Captures of large heaps routinely run into the hundreds of
//! megabytes, so mapping the file avoids loading the entire content into memory
//! upfront while still allowing fast random access to any memory section.
//!
//! # Key Components
//!
//! - [`crate::file::physical::Physical`] - Main backend struct implementing [`crate::file::Backend`]
//! - [`crate::file::physical::Physical::new`] - Creates backend from file path with memory mapping
//!
//! The physical backend is ideal for production scenarios where snapshot files are
//! accessed from disk, complementing the in-memory backend for scenarios where capture
//! data is already loaded into memory.

use super::Backend;
use crate::{
    Error::{Error, FileError, OutOfBounds},
    Result,
};

use memmap2::Mmap;
use std::{fs, path::Path};

/// A file backend that uses memory-mapped I/O for efficient access to files on disk.
///
/// [`crate::file::physical::Physical`] provides a way to access large snapshot files by
/// mapping them directly into the process's virtual address space. This eliminates the
/// need to read the entire file into memory upfront and allows the operating system to
/// manage memory efficiently through demand paging.
///
/// The backend is particularly well-suited for heap captures, which can be large and
/// are accessed in a non-sequential pattern when resolving pointers across memory
/// sections. All access operations include bounds checking to ensure memory safety.
///
/// # Examples
///
/// ```rust,ignore
/// use heapscope::file::{Physical, Backend};
/// use std::path::Path;
///
/// let physical = Physical::new(Path::new("capture.heap"))?;
///
/// // Check the container magic
/// let magic = physical.data_slice(0, 4)?;
/// assert_eq!(magic, b"HSNP");
/// # Ok::<(), heapscope::Error>(())
/// ```
#[derive(Debug)]
pub struct Physical {
    /// Memory-mapped file data
    data: Mmap,
}

impl Physical {
    /// Create a new physical file backend by memory-mapping the specified file.
    ///
    /// This method opens the file at the given path and creates a memory mapping
    /// for it. The file is mapped as read-only and shared, allowing multiple
    /// processes to efficiently access the same file.
    ///
    /// # Arguments
    /// * `path` - Path to the snapshot file on disk. Accepts `&Path`, `&str`, `String`, or `PathBuf`.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be opened or
    /// [`crate::Error::Error`] if memory mapping fails.
    pub fn new(path: impl AsRef<Path>) -> Result<Physical> {
        let file = match fs::File::open(path) {
            Ok(file) => file,
            Err(error) => return Err(FileError(error)),
        };

        let mmap = match unsafe { Mmap::map(&file) } {
            Ok(mmap) => mmap,
            Err(error) => return Err(Error(error.to_string())),
        };

        Ok(Physical { data: mmap })
    }
}

impl Backend for Physical {
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let Some(offset_end) = offset.checked_add(len) else {
            return Err(OutOfBounds);
        };

        if offset_end > self.data.len() {
            return Err(OutOfBounds);
        }

        Ok(&self.data[offset..offset_end])
    }

    fn data(&self) -> &[u8] {
        self.data.as_ref()
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}
