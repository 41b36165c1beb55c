// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(dead_code)]
//#![deny(unsafe_code)]
// - 'file/io.rs' reinterprets a fixed-size byte array as a byte slice when writing
// - 'file/physical.rs' uses mmap to map a file into memory

//! # heapscope
//!
//! A high-performance, cross-platform framework for analyzing managed heap memory snapshots.
//! Built in pure Rust, `heapscope` ingests a captured snapshot of a managed+native object
//! heap (GC handles, managed objects, native engine objects, static fields, raw memory
//! sections) and answers the questions that matter when hunting leaks and bloat: which
//! entities reference which others, what keeps an object alive, and which objects are
//! byte-for-byte duplicates of one another.
//!
//! ## Features
//!
//! - **📦 Efficient memory access** - Memory-mapped snapshot files with bounds-checked decoding
//! - **🔗 Connection graph** - Outgoing and incoming references for every entity, with a
//!   precomputed reverse adjacency built once at load
//! - **🌱 Root paths** - Breadth-first shortest path from any object back to a GC root
//! - **♻️ Duplicate detection** - 128-bit structural content hashing over field values
//! - **🌳 Lazy field expansion** - Navigate objects field by field without eager decoding
//! - **🛡️ Corruption tolerant** - Captured data is untrusted; bad layouts degrade into
//!   deduplicated diagnostics instead of aborting analysis
//!
//! ## Quick Start
//!
//! Add `heapscope` to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! heapscope = "0.2"
//! ```
//!
//! ### Using the Prelude
//!
//! For convenient access to the most commonly used types, import the prelude:
//!
//! ```rust,no_run
//! use heapscope::prelude::*;
//!
//! // Load and analyze a heap snapshot
//! let snapshot = Snapshot::from_file("capture.heap".as_ref())?;
//! println!("Found {} managed objects", snapshot.managed_objects().len());
//! # Ok::<(), heapscope::Error>(())
//! ```
//!
//! ### Basic Usage
//!
//! ```rust,no_run
//! use heapscope::{Snapshot, analysis::FieldTarget, snapshot::entities::{EntityRef, ManagedObjectIndex}};
//!
//! let snapshot = Snapshot::from_file("capture.heap".as_ref())?;
//!
//! // Why is object #0 alive?
//! let entity = EntityRef::Managed(ManagedObjectIndex::new(0));
//! if let Some(path) = snapshot.shortest_path_to_root(entity) {
//!     for node in &path.nodes {
//!         println!("  {}", node);
//!     }
//!     println!("rooted because: {}", path.reason);
//! }
//!
//! // What memory is wasted on duplicates?
//! let report = snapshot.find_duplicates(None);
//! println!("{} bytes wasted across {} groups",
//!          report.total_wasted_bytes, report.groups.len());
//!
//! // Decode an object field by field
//! let object = &snapshot.managed_objects()[0];
//! for child in snapshot.children(&FieldTarget::object(object.managed_type, object.address)) {
//!     println!("{}: {:?}", child.name, child.value);
//! }
//! # Ok::<(), heapscope::Error>(())
//! ```
//!
//! ## Architecture
//!
//! `heapscope` is organized into several key modules:
//!
//! - [`prelude`] - Convenient re-exports of commonly used types
//! - [`snapshot`] - Container decoding, the entity model, and derived indices
//! - [`heap`] - The binary memory decoder and content hashing
//! - [`analysis`] - Connection graph, root paths, duplicates, field expansion,
//!   and the background job queue
//! - [`Error`] and [`Result`] - Comprehensive error handling
//!
//! ### Loading Pipeline
//!
//! A capture flows through two stages. [`snapshot::RawSnapshot`] is the decoded
//! container: entity arrays exactly as captured, unlinked. [`Snapshot::initialize`]
//! validates the capture, builds the per-category address indices, resolves entity
//! cross-links (GC handle targets, managed/native pairing), enumerates static field
//! roots and runs the parallel connection scan. The result is immutable; every
//! query afterwards is a pure read, which makes sharing the snapshot across the
//! background worker and the caller's thread lock-free by construction.
//!
//! ### Analysis Queries
//!
//! The four presentation-facing queries are [`Snapshot::connections_of`],
//! [`Snapshot::shortest_path_to_root`], [`Snapshot::find_duplicates`] and
//! [`Snapshot::children`]. Long-running queries are meant to be driven through
//! [`analysis::JobQueue`], which coalesces superseded requests and supports
//! cooperative cancellation.
//!
//! ## Error Handling
//!
//! All operations return [`Result<T, Error>`](Result) with comprehensive error
//! information:
//!
//! ```rust,no_run
//! use heapscope::{Error, Snapshot};
//!
//! match Snapshot::from_file("capture.heap".as_ref()) {
//!     Ok(snapshot) => println!("Successfully loaded snapshot"),
//!     Err(Error::NotSupported) => println!("Container version not supported"),
//!     Err(Error::Malformed { message, .. }) => println!("Malformed capture: {}", message),
//!     Err(e) => println!("Other error: {}", e),
//! }
//! ```
//!
//! Lookup misses are values, not errors: a pointer into uncaptured memory returns
//! [`Option::None`] from every index, because that is a routine outcome of heap
//! analysis, and per-type layout corruption degrades into the deduplicating
//! [`snapshot::Diagnostics`] sink.
#[macro_use]
pub(crate) mod macros;

#[macro_use]
pub(crate) mod error;
pub(crate) mod file;

/// Shared functionality which is used in unit- and integration-tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
///
/// This module provides a curated selection of the most frequently used types
/// from across the heapscope library, allowing for convenient glob imports.
///
/// # Example
///
/// ```rust,no_run
/// use heapscope::prelude::*;
///
/// let snapshot = Snapshot::from_file("capture.heap".as_ref())?;
/// let report = snapshot.find_duplicates(None);
/// # Ok::<(), heapscope::Error>(())
/// ```
pub mod prelude;

/// Heap analysis: connection graph, root paths, duplicates, field expansion,
/// and the background job queue.
///
/// All queries in this module are pure functions of an analyzed
/// [`Snapshot`] and their arguments. See the module documentation for the
/// contract of each query.
pub mod analysis;

/// Binary decoding of captured heap memory.
///
/// Provides [`heap::MemoryReader`] for pointer reads, primitive formatting,
/// array lengths, object sizes and string decoding, plus the structural
/// [`heap::ContentHash`] used by duplicate detection.
pub mod heap;

/// Snapshot loading, the entity model and derived indices.
///
/// The entry points are [`snapshot::RawSnapshot`] (container decoding) and
/// [`Snapshot::initialize`] (validation plus index construction). See the
/// module documentation for the full loading pipeline.
pub mod snapshot;

/// `heapscope` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always
/// [`Error`]. This is used consistently throughout the crate for all fallible operations.
///
/// # Examples
///
/// ```rust,no_run
/// use heapscope::{Result, Snapshot};
///
/// fn load_snapshot(path: &str) -> Result<Snapshot> {
///     Snapshot::from_file(std::path::Path::new(path))
/// }
/// ```
pub type Result<T> = std::result::Result<T, Error>;

/// `heapscope` Error type
///
/// The main error type for all operations in this crate. Provides detailed error
/// information for snapshot parsing and analysis operations.
///
/// # Examples
///
/// ```rust,no_run
/// use heapscope::{Error, Snapshot};
///
/// match Snapshot::from_file("capture.heap".as_ref()) {
///     Ok(snapshot) => println!("Loaded successfully"),
///     Err(Error::NotSupported) => println!("Container version not supported"),
///     Err(Error::Malformed { message, .. }) => println!("Malformed: {}", message),
///     Err(e) => println!("Error: {}", e),
/// }
/// ```
pub use error::Error;

/// Main entry point for working with heap snapshots.
///
/// See [`snapshot::Snapshot`] for high-level analysis and entity access.
///
/// # Example
///
/// ```rust,no_run
/// use heapscope::Snapshot;
/// let snapshot = Snapshot::from_file("capture.heap".as_ref())?;
/// println!("Found {} managed objects", snapshot.managed_objects().len());
/// # Ok::<(), heapscope::Error>(())
/// ```
pub use snapshot::{RawSnapshot, Snapshot};

/// Provides access to low-level file and memory parsing utilities.
///
/// The [`Parser`] type is used for decoding snapshot container structures.
///
/// # Example
///
/// ```rust
/// use heapscope::Parser;
/// let data = [0x2A, 0x00, 0x00, 0x00];
/// let mut parser = Parser::new(&data);
/// assert_eq!(parser.read_le::<u32>()?, 42);
/// # Ok::<(), heapscope::Error>(())
/// ```
pub use file::{parser::Parser, Backend};
