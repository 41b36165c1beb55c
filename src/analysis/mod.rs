//! Heap analysis: the connection graph and the queries built on it.
//!
//! Everything in this module is a pure function of an analyzed
//! [`Snapshot`](crate::snapshot::Snapshot) and the query arguments; no analysis
//! mutates the snapshot. The heavy lifting (the forward and reverse connection
//! scan) happens once during initialize, so the per-query work here is cheap
//! enough for interactive use.
//!
//! # Key Components
//!
//! - [`connections`] - per-entity reference/referenced-by edges with a
//!   precomputed reverse adjacency
//! - [`roots`] - breadth-first shortest path from an entity to a GC root
//! - [`duplicates`] - content-hash grouping of structurally identical objects
//! - [`expansion`] - on-demand field tree expansion
//! - [`jobs`] - the background worker queue the presentation layer drives
//!
//! # Example
//!
//! ```rust,no_run
//! use heapscope::{Snapshot, snapshot::entities::{EntityRef, ManagedObjectIndex}};
//!
//! let snapshot = Snapshot::from_file("capture.heap".as_ref())?;
//! let entity = EntityRef::Managed(ManagedObjectIndex::new(0));
//!
//! let set = snapshot.connections_of(entity);
//! println!("{} out, {} in", set.references.len(), set.referenced_by.len());
//!
//! if let Some(path) = snapshot.shortest_path_to_root(entity) {
//!     println!("rooted through {} ({})", path.root().unwrap(), path.reason);
//! }
//! # Ok::<(), heapscope::Error>(())
//! ```

pub mod connections;
pub mod duplicates;
pub mod expansion;
pub mod jobs;
pub mod roots;

pub use connections::{Connection, ConnectionSet, FieldRef};
pub use duplicates::{DuplicateGroup, DuplicateReport};
pub use expansion::{ChildDescriptor, ChildKind, FieldSource, FieldTarget};
pub use jobs::{JobKind, JobQueue, StopToken};
pub use roots::{RootPath, RootReason};
