//! Binary decoding of captured heap memory.
//!
//! This module turns raw addresses plus type metadata into typed values. It is
//! the layer between the snapshot's immutable byte sections and every analysis
//! that needs to understand what those bytes mean:
//!
//! - [`reader::MemoryReader`] - pointer reads, primitive formatting, array
//!   lengths, object sizes, managed string decoding
//! - [`hash::ContentHash`] / [`hash::ContentHasher`] - structural fingerprints
//!   for duplicate detection
//!
//! # Example
//!
//! ```rust,no_run
//! use heapscope::Snapshot;
//!
//! let snapshot = Snapshot::from_file("capture.heap".as_ref())?;
//! let reader = snapshot.reader();
//!
//! for object in snapshot.managed_objects() {
//!     if let Some(size) = reader.read_object_size(object.address, object.managed_type) {
//!         println!("0x{:x}: {} bytes", object.address, size);
//!     }
//! }
//! # Ok::<(), heapscope::Error>(())
//! ```

pub mod hash;
pub mod reader;

pub use hash::{ContentHash, ContentHasher};
pub use reader::MemoryReader;
