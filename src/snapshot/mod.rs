//! Snapshot loading, entity model and derived indices.
//!
//! This module implements the load half of the engine: decoding a capture
//! container into a [`RawSnapshot`], then analyzing it into an immutable
//! [`Snapshot`] with every derived index built (address indices, entity
//! cross-links, static field roots, the connection graph).
//!
//! # Key Components
//!
//! ## Loading
//! - [`RawSnapshot`] - the capture's entity arrays exactly as decoded
//! - [`format`] - the binary container format
//! - [`Snapshot::initialize`] - validation plus index construction
//!
//! ## Entity Model
//! - [`entities`] - GC handles, managed/native objects, static fields, sections
//! - [`types`] - managed/native type metadata and VM layout constants
//!
//! ## Derived State
//! - [`index::AddressIndex`] - O(log n) address resolution per category
//! - [`diagnostics::Diagnostics`] - the deduplicating diagnostics sink
//!
//! # Immutability
//!
//! All entity arrays are populated once during load/initialize and are read-only
//! thereafter. Analysis queries ([`Snapshot::connections_of`],
//! [`Snapshot::shortest_path_to_root`], [`Snapshot::find_duplicates`],
//! [`Snapshot::children`]) are pure functions of this immutable state and their
//! arguments, which is what makes lock-free sharing with the background job
//! queue sound.
//!
//! # Example
//!
//! ```rust,no_run
//! use heapscope::Snapshot;
//!
//! let snapshot = Snapshot::from_file("capture.heap".as_ref())?;
//! println!(
//!     "{} managed objects across {} sections",
//!     snapshot.managed_objects().len(),
//!     snapshot.sections().len()
//! );
//! # Ok::<(), heapscope::Error>(())
//! ```

pub mod diagnostics;
pub mod entities;
pub mod format;
pub mod index;
pub mod types;

use std::path::Path;
use std::sync::atomic::AtomicBool;

use crate::{
    analysis::{
        connections::{ConnectionIndex, ConnectionSet},
        duplicates::{self, DuplicateReport},
        expansion::{self, ChildDescriptor, FieldTarget},
        roots::{self, RootPath},
    },
    file::{Backend, Memory, Physical},
    heap::reader::MemoryReader,
    snapshot::{
        entities::{
            EntityRef, GcHandle, ManagedObject, ManagedObjectIndex, ManagedTypeIndex,
            MemorySection, NativeObject, NativeObjectIndex, NativeTypeIndex, SectionIndex,
            StaticField,
        },
        index::AddressIndex,
        types::{
            instance_field_slots, ManagedType, NativeType, VirtualMachineInfo,
            CACHED_PTR_FIELD_NAME, TYPE_CHAIN_HOP_LIMIT,
        },
    },
    Result,
};

pub use diagnostics::{Diagnostic, DiagnosticCategory, DiagnosticSeverity, Diagnostics};

/// Native type names whose instances are backed by a user script; their
/// displayed type is overridden by the backing script's class name.
const SCRIPT_BACKED_NATIVE_TYPES: [&str; 2] = ["MonoBehaviour", "ScriptableObject"];

/// A decoded capture: the entity arrays exactly as the container recorded them,
/// before any cross-link resolution or index construction.
///
/// Cross-link fields on the contained entities (`gc_handle`, `managed_object`,
/// `native_object`) are `None` at this stage; [`Snapshot::initialize`] resolves
/// them.
#[derive(Debug)]
pub struct RawSnapshot {
    /// Global VM layout constants.
    pub vm: VirtualMachineInfo,
    /// Captured heap sections, not necessarily sorted.
    pub sections: Vec<MemorySection>,
    /// Managed type table.
    pub managed_types: Vec<ManagedType>,
    /// Native type table.
    pub native_types: Vec<NativeType>,
    /// Native engine objects.
    pub native_objects: Vec<NativeObject>,
    /// GC handle target addresses.
    pub gc_handle_targets: Vec<u64>,
    /// Managed heap objects.
    pub managed_objects: Vec<ManagedObject>,
}

impl RawSnapshot {
    /// Load and decode a snapshot container from disk.
    ///
    /// The file is memory-mapped; decoding copies chapter payloads into owned
    /// storage so the mapping does not outlive this call.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] when the file cannot be opened and
    /// [`crate::Error::Malformed`]/[`crate::Error::OutOfBounds`] when the
    /// container is corrupt or truncated.
    pub fn from_file(path: &Path) -> Result<RawSnapshot> {
        let backend = Physical::new(path)?;
        format::parse(backend.data())
    }

    /// Decode a snapshot container from a memory buffer.
    ///
    /// # Errors
    /// Same conditions as [`RawSnapshot::from_file`], minus file I/O.
    pub fn from_mem(data: Vec<u8>) -> Result<RawSnapshot> {
        let backend = Memory::new(data);
        format::parse(backend.data())
    }
}

/// Everything the decoder and the analyses need to read the snapshot: entity
/// arrays, type tables, the address index and the diagnostics sink.
///
/// Split out of [`Snapshot`] so that initialize can hand readers a fully built
/// core while the connection index is still under construction.
pub(crate) struct SnapshotCore {
    pub(crate) vm: VirtualMachineInfo,
    pub(crate) sections: Vec<MemorySection>,
    pub(crate) managed_types: Vec<ManagedType>,
    pub(crate) native_types: Vec<NativeType>,
    pub(crate) gc_handles: Vec<GcHandle>,
    pub(crate) managed_objects: Vec<ManagedObject>,
    pub(crate) native_objects: Vec<NativeObject>,
    pub(crate) static_fields: Vec<StaticField>,
    pub(crate) index: AddressIndex,
    pub(crate) diagnostics: Diagnostics,
}

impl SnapshotCore {
    pub(crate) fn reader(&self) -> MemoryReader<'_> {
        MemoryReader::heap(
            &self.vm,
            &self.sections,
            &self.managed_types,
            &self.index,
            &self.diagnostics,
        )
    }

    pub(crate) fn static_reader(&self, type_index: ManagedTypeIndex) -> Option<MemoryReader<'_>> {
        let ty = self.managed_types.get(type_index.index())?;
        Some(MemoryReader::static_blob(
            &self.vm,
            &self.sections,
            &self.managed_types,
            &self.index,
            &self.diagnostics,
            &ty.static_field_bytes,
        ))
    }
}

/// A fully analyzed, immutable heap snapshot.
///
/// Built once via [`Snapshot::initialize`]; every query afterwards is a pure
/// read. The four presentation-facing queries are [`Snapshot::connections_of`],
/// [`Snapshot::shortest_path_to_root`], [`Snapshot::find_duplicates`] and
/// [`Snapshot::children`].
pub struct Snapshot {
    core: SnapshotCore,
    connections: ConnectionIndex,
    /// Per native object: the backing script class name, for script-backed
    /// native types. Affects display and grouping only, never the graph.
    script_type_names: Vec<Option<String>>,
}

impl Snapshot {
    /// Load, decode and analyze a snapshot file.
    ///
    /// Convenience for [`RawSnapshot::from_file`] followed by
    /// [`Snapshot::initialize`].
    ///
    /// # Errors
    /// Any error of the two underlying steps.
    pub fn from_file(path: &Path) -> Result<Snapshot> {
        Snapshot::initialize(RawSnapshot::from_file(path)?)
    }

    /// Validate a raw capture and build every derived index.
    ///
    /// This performs, in order: VM constant validation, section ordering and
    /// overlap checks, entity cross-index validation, address index
    /// construction, GC handle and native-object cross-link resolution, static
    /// field enumeration, and the forward/reverse connection scan.
    ///
    /// Structural corruption is reported here as a single fatal error;
    /// per-object layout trouble found later degrades gracefully through the
    /// diagnostics sink instead.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] when the capture's structure is
    /// inconsistent (overlapping sections, out-of-range indices, bad VM
    /// constants).
    pub fn initialize(raw: RawSnapshot) -> Result<Snapshot> {
        let RawSnapshot {
            vm,
            mut sections,
            managed_types,
            native_types,
            mut native_objects,
            gc_handle_targets,
            mut managed_objects,
        } = raw;

        vm.validate()?;
        sections.sort_by_key(|s| s.start_address);
        validate_sections(&sections)?;
        validate_type_table(&managed_types)?;
        validate_native_links(&native_types, &native_objects)?;

        for object in &managed_objects {
            if object.managed_type.index() >= managed_types.len() {
                return Err(malformed_error!(
                    "Managed object at 0x{:x} references type {} of {}",
                    object.address,
                    object.managed_type,
                    managed_types.len()
                ));
            }
        }

        let diagnostics = Diagnostics::new();

        let object_addresses: Vec<u64> = managed_objects.iter().map(|o| o.address).collect();
        let native_addresses: Vec<u64> = native_objects.iter().map(|o| o.address).collect();
        let type_infos: Vec<u64> = managed_types.iter().map(|t| t.type_info_address).collect();
        let index = AddressIndex::build(
            &gc_handle_targets,
            &object_addresses,
            &native_addresses,
            &sections,
            &type_infos,
        );

        // GC handle resolution; when several handles pin one object, the first
        // handle wins the object-side back link.
        let gc_handles: Vec<GcHandle> = gc_handle_targets
            .iter()
            .map(|&target_address| GcHandle {
                target_address,
                managed_object: index.find_managed_object(target_address),
            })
            .collect();
        for (handle_index, handle) in gc_handles.iter().enumerate() {
            if let Some(object_index) = handle.managed_object {
                let object = &mut managed_objects[object_index.index()];
                if object.gc_handle.is_none() {
                    object.gc_handle =
                        Some(entities::GcHandleIndex::new(handle_index as u32));
                }
            }
        }

        // Managed <-> native pairing through the cached pointer field.
        {
            let reader = MemoryReader::heap(&vm, &sections, &managed_types, &index, &diagnostics);
            let pairings: Vec<Option<NativeObjectIndex>> = managed_objects
                .iter()
                .map(|object| {
                    let pointer = cached_native_pointer(&managed_types, &reader, object)?;
                    index.find_native_object(pointer)
                })
                .collect();

            for (object_index, native_index) in pairings.into_iter().enumerate() {
                let Some(native_index) = native_index else {
                    continue;
                };
                managed_objects[object_index].native_object = Some(native_index);
                let native = &mut native_objects[native_index.index()];
                if native.managed_object.is_none() {
                    native.managed_object =
                        Some(ManagedObjectIndex::new(object_index as u32));
                }
            }
        }

        // Static field slots live in their type's static blob; types without an
        // initialized blob contribute none.
        let mut static_fields = Vec::new();
        for (type_index, ty) in managed_types.iter().enumerate() {
            if ty.static_field_bytes.is_empty() {
                continue;
            }
            for (field_index, field) in ty.fields.iter().enumerate() {
                if field.is_static {
                    static_fields.push(StaticField {
                        class_type: ManagedTypeIndex::new(type_index as u32),
                        field_index: field_index as u32,
                    });
                }
            }
        }

        let core = SnapshotCore {
            vm,
            sections,
            managed_types,
            native_types,
            gc_handles,
            managed_objects,
            native_objects,
            static_fields,
            index,
            diagnostics,
        };

        let connections = ConnectionIndex::build(&core);
        let script_type_names = resolve_script_type_names(&core);

        Ok(Snapshot {
            core,
            connections,
            script_type_names,
        })
    }

    /// Global VM layout constants of the capture.
    #[must_use]
    pub fn vm(&self) -> &VirtualMachineInfo {
        &self.core.vm
    }

    /// Captured heap sections, ascending by start address.
    #[must_use]
    pub fn sections(&self) -> &[MemorySection] {
        &self.core.sections
    }

    /// The managed type table.
    #[must_use]
    pub fn managed_types(&self) -> &[ManagedType] {
        &self.core.managed_types
    }

    /// One managed type, when the index is in range.
    #[must_use]
    pub fn managed_type(&self, index: ManagedTypeIndex) -> Option<&ManagedType> {
        self.core.managed_types.get(index.index())
    }

    /// The native type table.
    #[must_use]
    pub fn native_types(&self) -> &[NativeType] {
        &self.core.native_types
    }

    /// All GC handles with resolved targets.
    #[must_use]
    pub fn gc_handles(&self) -> &[GcHandle] {
        &self.core.gc_handles
    }

    /// All managed objects with resolved cross-links.
    #[must_use]
    pub fn managed_objects(&self) -> &[ManagedObject] {
        &self.core.managed_objects
    }

    /// One managed object, when the index is in range.
    #[must_use]
    pub fn managed_object(&self, index: ManagedObjectIndex) -> Option<&ManagedObject> {
        self.core.managed_objects.get(index.index())
    }

    /// All native objects with resolved cross-links.
    #[must_use]
    pub fn native_objects(&self) -> &[NativeObject] {
        &self.core.native_objects
    }

    /// All static field slots, enumerated from the type table.
    #[must_use]
    pub fn static_fields(&self) -> &[StaticField] {
        &self.core.static_fields
    }

    /// The per-category address index.
    #[must_use]
    pub fn address_index(&self) -> &AddressIndex {
        &self.core.index
    }

    /// The diagnostics collected during initialize and analysis.
    #[must_use]
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.core.diagnostics
    }

    /// A decoder over the captured heap sections.
    #[must_use]
    pub fn reader(&self) -> MemoryReader<'_> {
        self.core.reader()
    }

    /// A decoder over `type_index`'s static field blob.
    ///
    /// Addresses passed to the returned reader index the blob directly, matching
    /// static field offsets.
    #[must_use]
    pub fn static_reader(&self, type_index: ManagedTypeIndex) -> Option<MemoryReader<'_>> {
        self.core.static_reader(type_index)
    }

    /// The outgoing and incoming connections of an entity.
    ///
    /// Served from the precomputed forward and reverse adjacency built during
    /// initialize; no per-query scanning.
    #[must_use]
    pub fn connections_of(&self, entity: EntityRef) -> ConnectionSet<'_> {
        self.connections.connections_of(entity)
    }

    /// All managed objects whose address falls inside the given section, in
    /// ascending address order.
    ///
    /// This is the occupancy view of a section; sections deliberately do not
    /// participate in [`Snapshot::connections_of`].
    #[must_use]
    pub fn objects_in_section(&self, section: SectionIndex) -> Vec<ManagedObjectIndex> {
        let Some(section) = self.core.sections.get(section.index()) else {
            return Vec::new();
        };
        self.core
            .index
            .managed_objects_in_range(section.start_address, section.end_address())
    }

    /// The shortest reference path from `start` back to a GC root.
    ///
    /// See [`crate::analysis::roots`] for the search semantics. Returns `None`
    /// when no root is reachable, which is a legitimate terminal state.
    #[must_use]
    pub fn shortest_path_to_root(&self, start: EntityRef) -> Option<RootPath> {
        roots::shortest_path_to_root(self, start)
    }

    /// Group reference-type managed objects by structural content hash.
    ///
    /// See [`crate::analysis::duplicates`]. The optional `stop` flag is checked
    /// cooperatively once per object.
    #[must_use]
    pub fn find_duplicates(&self, stop: Option<&AtomicBool>) -> DuplicateReport {
        duplicates::find_duplicates(self, stop)
    }

    /// Enumerate the immediate child fields of a (type, address) target.
    ///
    /// See [`crate::analysis::expansion`]. Pure and idempotent: identical
    /// targets produce identical descriptor lists.
    #[must_use]
    pub fn children(&self, target: &FieldTarget) -> Vec<ChildDescriptor> {
        expansion::children(self, target)
    }

    /// The display type name of a native object.
    ///
    /// For script-backed native types (`MonoBehaviour`, `ScriptableObject`) this
    /// is the backing script's class name resolved from the managed pair; for
    /// everything else it is the native type's own name.
    #[must_use]
    pub fn display_type_name(&self, index: NativeObjectIndex) -> Option<&str> {
        let native = self.core.native_objects.get(index.index())?;

        if let Some(Some(script)) = self.script_type_names.get(index.index()) {
            return Some(script.as_str());
        }

        self.core
            .native_types
            .get(native.native_type.index())
            .map(|t| t.name.as_str())
    }
}

fn validate_sections(sections: &[MemorySection]) -> Result<()> {
    for pair in sections.windows(2) {
        if pair[1].start_address < pair[0].end_address() {
            return Err(malformed_error!(
                "Memory sections overlap: [0x{:x}, 0x{:x}) and [0x{:x}, 0x{:x})",
                pair[0].start_address,
                pair[0].end_address(),
                pair[1].start_address,
                pair[1].end_address()
            ));
        }
    }
    Ok(())
}

fn validate_type_table(types: &[ManagedType]) -> Result<()> {
    for (index, ty) in types.iter().enumerate() {
        if let Some(link) = ty.base_or_element_type {
            if link.index() >= types.len() {
                return Err(malformed_error!(
                    "Type '{}' ({}) links to type {} of {}",
                    ty.name,
                    index,
                    link,
                    types.len()
                ));
            }
        }

        if ty.is_array() && (ty.base_or_element_type.is_none() || ty.array_rank.is_none()) {
            return Err(malformed_error!(
                "Array type '{}' ({}) without element type or rank",
                ty.name,
                index
            ));
        }

        for field in &ty.fields {
            if field.managed_type.index() >= types.len() {
                return Err(malformed_error!(
                    "Field '{}.{}' references type {} of {}",
                    ty.name,
                    field.name,
                    field.managed_type,
                    types.len()
                ));
            }
        }
    }
    Ok(())
}

fn validate_native_links(types: &[NativeType], objects: &[NativeObject]) -> Result<()> {
    for (index, ty) in types.iter().enumerate() {
        if let Some(base) = ty.base {
            if base.index() >= types.len() {
                return Err(malformed_error!(
                    "Native type '{}' ({}) links to type {} of {}",
                    ty.name,
                    index,
                    base,
                    types.len()
                ));
            }
        }
    }

    for object in objects {
        if object.native_type.index() >= types.len() {
            return Err(malformed_error!(
                "Native object '{}' references type {} of {}",
                object.name,
                object.native_type,
                types.len()
            ));
        }
    }

    Ok(())
}

/// The native pointer stored in a managed wrapper's cached-pointer field, when
/// the object's type carries one.
fn cached_native_pointer(
    types: &[ManagedType],
    reader: &MemoryReader<'_>,
    object: &ManagedObject,
) -> Option<u64> {
    let fields = instance_field_slots(types, object.managed_type);
    let slot = fields.slots.iter().find(|slot| {
        types[slot.owner.index()].fields[slot.field as usize].name == CACHED_PTR_FIELD_NAME
    })?;

    let field = &types[slot.owner.index()].fields[slot.field as usize];
    let pointer = reader.read_pointer(object.address.checked_add(u64::from(field.offset))?)?;
    (pointer != 0).then_some(pointer)
}

fn resolve_script_type_names(core: &SnapshotCore) -> Vec<Option<String>> {
    core.native_objects
        .iter()
        .map(|native| {
            if !is_script_backed(core, native.native_type) {
                return None;
            }
            let managed = native.managed_object?;
            let object = core.managed_objects.get(managed.index())?;
            core.managed_types
                .get(object.managed_type.index())
                .map(|t| t.name.clone())
        })
        .collect()
}

/// Whether a native type or any of its bases is one of the script-backed types.
fn is_script_backed(core: &SnapshotCore, type_index: NativeTypeIndex) -> bool {
    let mut current = Some(type_index);
    for _ in 0..TYPE_CHAIN_HOP_LIMIT {
        let Some(index) = current else {
            return false;
        };
        let Some(ty) = core.native_types.get(index.index()) else {
            return false;
        };
        if SCRIPT_BACKED_NATIVE_TYPES.contains(&ty.name.as_str()) {
            return true;
        }
        current = ty.base;
    }
    false
}
