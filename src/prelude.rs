//! # heapscope Prelude
//!
//! This module re-exports the most commonly used types and traits for convenient
//! access when working with heap snapshots.
//!
//! ## Purpose
//!
//! The prelude eliminates repetitive imports for the most frequent operations:
//! loading a snapshot, walking its entities, querying the connection graph, and
//! running the whole-heap analyses.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use heapscope::prelude::*;
//!
//! let snapshot = Snapshot::from_file("capture.heap".as_ref())?;
//!
//! for (index, object) in snapshot.managed_objects().iter().enumerate() {
//!     let entity = EntityRef::Managed(ManagedObjectIndex::new(index as u32));
//!     if snapshot.shortest_path_to_root(entity).is_none() {
//!         println!("0x{:x} has no path to a root", object.address);
//!     }
//! }
//! # Ok::<(), heapscope::Error>(())
//! ```

pub use crate::{
    analysis::{
        ChildDescriptor, ChildKind, Connection, ConnectionSet, DuplicateGroup, DuplicateReport,
        FieldRef, FieldSource, FieldTarget, JobKind, JobQueue, RootPath, RootReason, StopToken,
    },
    heap::{ContentHash, MemoryReader},
    snapshot::{
        entities::{
            EntityKind, EntityRef, GcHandle, GcHandleIndex, HideFlags, ManagedObject,
            ManagedObjectIndex, ManagedTypeIndex, MemorySection, NativeObject, NativeObjectFlags,
            NativeObjectIndex, NativeTypeIndex, SectionIndex, StaticField, StaticFieldIndex,
        },
        index::AddressIndex,
        types::{
            FieldDescription, ManagedType, ManagedTypeFlags, NativeType, PrimitiveKind,
            VirtualMachineInfo,
        },
        Diagnostic, DiagnosticCategory, DiagnosticSeverity, Diagnostics, RawSnapshot, Snapshot,
    },
    Error, Parser, Result,
};
