//! Low-level byte stream parser for snapshot container decoding.
//!
//! This module provides the [`crate::file::parser::Parser`] type, a cursor-based binary
//! data parser designed for reading heap snapshot containers. It offers bounds-checked
//! access to binary data, typed little-endian reads, and helpers for the length-prefixed
//! structures the container format is built from.
//!
//! # Architecture
//!
//! The parser is built around a simple cursor-based model that maintains a position
//! within a byte slice:
//!
//! - **Position tracking** - Maintains current offset for sequential parsing operations
//! - **Bounds checking** - All operations validate data availability before reading
//! - **Type-safe reading** - Strongly typed methods for common data types
//!
//! # Usage Examples
//!
//! ```rust
//! use heapscope::Parser;
//!
//! let data = [0x01, 0x02, 0x03, 0x04];
//! let mut parser = Parser::new(&data);
//!
//! let value = parser.read_le::<u16>()?;
//! assert_eq!(value, 0x0201);
//! # Ok::<(), heapscope::Error>(())
//! ```

use crate::{
    file::io::{read_le_at, HeapIO},
    Error::OutOfBounds,
    Result,
};

/// A generic binary data parser for reading snapshot container structures.
///
/// `Parser` provides a cursor-based interface for reading little-endian binary data.
/// It maintains an internal position cursor and provides bounds checking to prevent
/// buffer overruns when reading malformed or truncated captures.
///
/// # Examples
///
/// ```rust,no_run
/// use heapscope::Parser;
///
/// let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
/// let mut parser = Parser::new(&data);
///
/// let first = parser.read_le::<u32>()?;
/// assert_eq!(first, 0x04030201);
///
/// parser.seek(6)?;
/// let last_bytes = parser.read_le::<u16>()?;
/// assert_eq!(last_bytes, 0x0807);
/// # Ok::<(), heapscope::Error>(())
/// ```
pub struct Parser<'a> {
    /// The binary data being parsed
    data: &'a [u8],
    /// Current position within the data buffer
    position: usize,
}

impl<'a> Parser<'a> {
    /// Create a new parser over the provided byte slice.
    ///
    /// # Arguments
    /// * `data` - The buffer to parse
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Parser { data, position: 0 }
    }

    /// Total length of the underlying buffer in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the underlying buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns `true` if there is at least one more byte to read.
    #[must_use]
    pub fn has_more_data(&self) -> bool {
        self.position < self.data.len()
    }

    /// Move the cursor to an absolute position.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `pos` is past the end of the buffer.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(OutOfBounds);
        }

        self.position = pos;
        Ok(())
    }

    /// Advance the cursor by `step` bytes without reading.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if advancing would move past the end.
    pub fn advance_by(&mut self, step: usize) -> Result<()> {
        let Some(target) = self.position.checked_add(step) else {
            return Err(OutOfBounds);
        };

        self.seek(target)
    }

    /// Current cursor position within the buffer.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// Number of bytes between the cursor and the end of the buffer.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    /// Verify that at least `needed` bytes remain to be read.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if fewer than `needed` bytes remain.
    pub fn ensure_remaining(&self, needed: usize) -> Result<()> {
        if self.remaining() < needed {
            return Err(OutOfBounds);
        }

        Ok(())
    }

    /// Read a primitive value in little-endian byte order, advancing the cursor.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
    pub fn read_le<T: HeapIO>(&mut self) -> Result<T> {
        read_le_at(self.data, &mut self.position)
    }

    /// Read `length` raw bytes, advancing the cursor.
    ///
    /// The returned slice borrows from the parsed buffer, no copy is made.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if fewer than `length` bytes remain.
    pub fn read_bytes(&mut self, length: usize) -> Result<&'a [u8]> {
        let Some(end) = self.position.checked_add(length) else {
            return Err(OutOfBounds);
        };

        if end > self.data.len() {
            return Err(OutOfBounds);
        }

        let bytes = &self.data[self.position..end];
        self.position = end;

        Ok(bytes)
    }

    /// Read a `u32`-length-prefixed UTF-8 string, advancing the cursor.
    ///
    /// This is the string encoding used throughout the snapshot container for type,
    /// field and object names.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the prefix or payload is truncated, or
    /// [`crate::Error::Malformed`] if the payload is not valid UTF-8.
    pub fn read_prefixed_string_utf8(&mut self) -> Result<String> {
        let length = self.read_le::<u32>()? as usize;
        let start = self.position;

        let string_data = self.read_bytes(length)?;

        String::from_utf8(string_data.to_vec()).map_err(|e| {
            malformed_error!(
                "Invalid UTF-8 string at offset {}-{}: {}",
                start,
                start + length,
                e.utf8_error()
            )
        })
    }
}
