//! The reference connection graph.
//!
//! For any entity this module answers "what does it reference" and "what
//! references it", with edges classified by the four linkable entity kinds. The
//! outgoing side is computed by scanning pointer-bearing field slots against the
//! captured bytes; the incoming side is served from a reverse-adjacency table
//! built once during initialize, because recomputing it per query would rescan
//! the whole heap for every lookup at hundreds of thousands of objects.
//!
//! # Edge Semantics
//!
//! - **GC handle** → the managed object it pins.
//! - **Managed object** → for every non-null pointer in its instance fields
//!   (inherited fields included, inline value types recursed, array elements
//!   scanned): the managed pointee, plus one edge per additional "face" the
//!   pointee carries (its GC handle, its native pair). A pointer that resolves
//!   to no managed object but to a native object yields a native edge.
//! - **Native object** → its managed wrapper, and that wrapper's GC handle.
//! - **Static field** → the managed object its slot currently points to.
//!
//! Memory sections are not part of this graph; their occupancy is a dedicated
//! query ([`crate::snapshot::Snapshot::objects_in_section`]).
//!
//! # Determinism
//!
//! Outgoing scans run in parallel but collect in entity-array order, and the
//! reverse table is filled in fixed kind-then-index order, so edge ordering is
//! stable run-to-run. The root path search relies on this for deterministic
//! tie-breaking.

use rayon::prelude::*;

use crate::snapshot::{
    entities::{EntityRef, GcHandleIndex, ManagedObjectIndex, ManagedTypeIndex, NativeObjectIndex, StaticFieldIndex},
    types::{instance_field_slots, is_enum_type, FieldDescription},
    SnapshotCore,
};
use crate::heap::reader::MemoryReader;

/// Recursion bound for inline value-type scans.
///
/// Captured metadata can describe self-referential value types; scans beyond
/// this depth are truncated.
const FIELD_SCAN_DEPTH_LIMIT: usize = 64;

/// Names the field on the referencing side that holds the pointer of a
/// connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldRef {
    /// The type declaring the field.
    pub owner: ManagedTypeIndex,
    /// Position within the declaring type's field array.
    pub field: u32,
}

/// A directed edge: `from` holds a reference to `to`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    /// The referencing entity.
    pub from: EntityRef,
    /// The referenced entity.
    pub to: EntityRef,
    /// The field holding the pointer, when the edge stems from a named field.
    /// `None` for array elements and handle/pairing edges.
    pub field: Option<FieldRef>,
}

/// The two edge lists of one entity.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionSet<'a> {
    /// Outgoing edges: entities this one references.
    pub references: &'a [Connection],
    /// Incoming edges: entities referencing this one.
    pub referenced_by: &'a [Connection],
}

const EMPTY: &[Connection] = &[];

/// Forward and reverse adjacency for all entities, built once at initialize.
pub(crate) struct ConnectionIndex {
    gc_handle_out: Vec<Vec<Connection>>,
    managed_out: Vec<Vec<Connection>>,
    native_out: Vec<Vec<Connection>>,
    static_out: Vec<Vec<Connection>>,

    gc_handle_in: Vec<Vec<Connection>>,
    managed_in: Vec<Vec<Connection>>,
    native_in: Vec<Vec<Connection>>,
    static_in: Vec<Vec<Connection>>,
}

impl ConnectionIndex {
    pub(crate) fn build(core: &SnapshotCore) -> ConnectionIndex {
        let reader = core.reader();

        // The managed scan dominates build time; objects scan in parallel and
        // collect back in array order to stay deterministic.
        let managed_out: Vec<Vec<Connection>> = (0..core.managed_objects.len())
            .into_par_iter()
            .map(|index| scan_managed_object(core, &reader, ManagedObjectIndex::new(index as u32)))
            .collect();

        let gc_handle_out: Vec<Vec<Connection>> = core
            .gc_handles
            .iter()
            .enumerate()
            .map(|(index, handle)| {
                let from = EntityRef::GcHandle(GcHandleIndex::new(index as u32));
                handle
                    .managed_object
                    .map(|target| Connection {
                        from,
                        to: EntityRef::Managed(target),
                        field: None,
                    })
                    .into_iter()
                    .collect()
            })
            .collect();

        let native_out: Vec<Vec<Connection>> = core
            .native_objects
            .iter()
            .enumerate()
            .map(|(index, native)| {
                let from = EntityRef::Native(NativeObjectIndex::new(index as u32));
                let mut edges = Vec::new();
                if let Some(managed) = native.managed_object {
                    edges.push(Connection {
                        from,
                        to: EntityRef::Managed(managed),
                        field: None,
                    });
                    if let Some(handle) = core.managed_objects[managed.index()].gc_handle {
                        edges.push(Connection {
                            from,
                            to: EntityRef::GcHandle(handle),
                            field: None,
                        });
                    }
                }
                edges
            })
            .collect();

        let static_out: Vec<Vec<Connection>> = core
            .static_fields
            .iter()
            .enumerate()
            .map(|(index, static_field)| {
                scan_static_field(core, StaticFieldIndex::new(index as u32), static_field)
            })
            .collect();

        let mut gc_handle_in = vec![Vec::new(); core.gc_handles.len()];
        let mut managed_in = vec![Vec::new(); core.managed_objects.len()];
        let mut native_in = vec![Vec::new(); core.native_objects.len()];
        let mut static_in = vec![Vec::new(); core.static_fields.len()];

        // Reverse table, filled in fixed kind-then-index order so incoming edge
        // lists have a stable, deterministic ordering.
        for lists in [&gc_handle_out, &managed_out, &native_out, &static_out] {
            for connections in lists {
                for connection in connections {
                    let target: Option<&mut Vec<Connection>> = match connection.to {
                        EntityRef::GcHandle(i) => gc_handle_in.get_mut(i.index()),
                        EntityRef::Managed(i) => managed_in.get_mut(i.index()),
                        EntityRef::Native(i) => native_in.get_mut(i.index()),
                        EntityRef::StaticField(i) => static_in.get_mut(i.index()),
                    };
                    if let Some(list) = target {
                        list.push(connection.clone());
                    }
                }
            }
        }

        ConnectionIndex {
            gc_handle_out,
            managed_out,
            native_out,
            static_out,
            gc_handle_in,
            managed_in,
            native_in,
            static_in,
        }
    }

    /// Both edge lists of `entity`; out-of-range indices yield empty lists.
    pub(crate) fn connections_of(&self, entity: EntityRef) -> ConnectionSet<'_> {
        let (out, incoming) = match entity {
            EntityRef::GcHandle(i) => (
                self.gc_handle_out.get(i.index()),
                self.gc_handle_in.get(i.index()),
            ),
            EntityRef::Managed(i) => (
                self.managed_out.get(i.index()),
                self.managed_in.get(i.index()),
            ),
            EntityRef::Native(i) => (
                self.native_out.get(i.index()),
                self.native_in.get(i.index()),
            ),
            EntityRef::StaticField(i) => (
                self.static_out.get(i.index()),
                self.static_in.get(i.index()),
            ),
        };

        ConnectionSet {
            references: out.map_or(EMPTY, Vec::as_slice),
            referenced_by: incoming.map_or(EMPTY, Vec::as_slice),
        }
    }
}

fn field_of<'a>(core: &'a SnapshotCore, owner: ManagedTypeIndex, field: u32) -> &'a FieldDescription {
    &core.managed_types[owner.index()].fields[field as usize]
}

fn scan_managed_object(
    core: &SnapshotCore,
    reader: &MemoryReader<'_>,
    object_index: ManagedObjectIndex,
) -> Vec<Connection> {
    let object = &core.managed_objects[object_index.index()];
    let from = EntityRef::Managed(object_index);
    let ty = &core.managed_types[object.managed_type.index()];

    let mut edges = Vec::new();
    if ty.is_array() {
        scan_array_elements(core, reader, from, object.address, object.managed_type, &mut edges);
    } else {
        scan_field_slots(
            core,
            reader,
            from,
            object.address,
            object.managed_type,
            false,
            0,
            &mut edges,
        );
    }

    edges
}

#[allow(clippy::too_many_arguments)]
fn scan_field_slots(
    core: &SnapshotCore,
    reader: &MemoryReader<'_>,
    from: EntityRef,
    base_address: u64,
    type_index: ManagedTypeIndex,
    inline: bool,
    depth: usize,
    edges: &mut Vec<Connection>,
) {
    if depth >= FIELD_SCAN_DEPTH_LIMIT {
        return;
    }

    let fields = instance_field_slots(&core.managed_types, type_index);
    if fields.truncated {
        let name = &core.managed_types[type_index.index()].name;
        core.diagnostics
            .invalid_layout(type_index, name, "inheritance chain exceeds hop limit");
    }

    let header = u64::from(core.vm.object_header_size);
    for slot in &fields.slots {
        let field = field_of(core, slot.owner, slot.field);
        let field_type = &core.managed_types[field.managed_type.index()];

        let Some(mut field_address) = base_address.checked_add(u64::from(field.offset)) else {
            continue;
        };
        if inline {
            let Some(adjusted) = field_address.checked_sub(header) else {
                continue;
            };
            field_address = adjusted;
        }

        if field_type.is_pointer_slot() {
            let Some(pointer) = reader.read_pointer(field_address) else {
                continue;
            };
            if pointer != 0 {
                emit_edges_for_pointer(
                    core,
                    from,
                    pointer,
                    Some(FieldRef {
                        owner: slot.owner,
                        field: slot.field,
                    }),
                    edges,
                );
            }
        } else if !field_type.is_primitive()
            && !is_enum_type(&core.managed_types, field.managed_type)
        {
            scan_field_slots(
                core,
                reader,
                from,
                field_address,
                field.managed_type,
                true,
                depth + 1,
                edges,
            );
        }
    }
}

fn scan_array_elements(
    core: &SnapshotCore,
    reader: &MemoryReader<'_>,
    from: EntityRef,
    address: u64,
    type_index: ManagedTypeIndex,
    edges: &mut Vec<Connection>,
) {
    let ty = &core.managed_types[type_index.index()];
    let Some(element_type_index) = ty.base_or_element_type else {
        return;
    };
    let element_type = &core.managed_types[element_type_index.index()];

    let scans_pointers = element_type.is_pointer_slot();
    let scans_structs = !scans_pointers
        && !element_type.is_primitive()
        && !is_enum_type(&core.managed_types, element_type_index);
    if !scans_pointers && !scans_structs {
        return;
    }

    let Some(total) = reader.read_array_total_length(address, type_index) else {
        return;
    };
    let Some(element_size) = reader.element_size(element_type_index) else {
        return;
    };
    let Some(data) = address.checked_add(u64::from(core.vm.array_header_size)) else {
        return;
    };

    // A corrupt length cannot describe more elements than the section holds;
    // clamp so garbage headers terminate.
    let capacity = core
        .index
        .find_section(data)
        .map(|s| core.sections[s.index()].end_address().saturating_sub(data))
        .unwrap_or(0)
        / u64::from(element_size.max(1));
    let count = total.min(capacity);

    for i in 0..count {
        let element_address = data + i * u64::from(element_size);
        if scans_pointers {
            let Some(pointer) = reader.read_pointer(element_address) else {
                continue;
            };
            if pointer != 0 {
                emit_edges_for_pointer(core, from, pointer, None, edges);
            }
        } else {
            scan_field_slots(
                core,
                reader,
                from,
                element_address,
                element_type_index,
                true,
                1,
                edges,
            );
        }
    }
}

/// Resolve a pointee and emit one edge per face it carries: the managed object
/// itself, its GC handle, its native pair. A pointer that is no managed object
/// but a known native object yields a single native edge.
fn emit_edges_for_pointer(
    core: &SnapshotCore,
    from: EntityRef,
    pointer: u64,
    field: Option<FieldRef>,
    edges: &mut Vec<Connection>,
) {
    if let Some(managed) = core.index.find_managed_object(pointer) {
        edges.push(Connection {
            from,
            to: EntityRef::Managed(managed),
            field,
        });

        let object = &core.managed_objects[managed.index()];
        if let Some(handle) = object.gc_handle {
            edges.push(Connection {
                from,
                to: EntityRef::GcHandle(handle),
                field,
            });
        }
        if let Some(native) = object.native_object {
            edges.push(Connection {
                from,
                to: EntityRef::Native(native),
                field,
            });
        }
    } else if let Some(native) = core.index.find_native_object(pointer) {
        edges.push(Connection {
            from,
            to: EntityRef::Native(native),
            field,
        });
    }
}

fn scan_static_field(
    core: &SnapshotCore,
    from_index: StaticFieldIndex,
    static_field: &crate::snapshot::entities::StaticField,
) -> Vec<Connection> {
    let field = field_of(core, static_field.class_type, static_field.field_index);
    let field_type = &core.managed_types[field.managed_type.index()];
    if !field_type.is_pointer_slot() {
        return Vec::new();
    }

    let Some(reader) = core.static_reader(static_field.class_type) else {
        return Vec::new();
    };
    let Some(pointer) = reader.read_pointer(u64::from(field.offset)) else {
        return Vec::new();
    };
    if pointer == 0 {
        return Vec::new();
    }

    let Some(managed) = core.index.find_managed_object(pointer) else {
        return Vec::new();
    };

    vec![Connection {
        from: EntityRef::StaticField(from_index),
        to: EntityRef::Managed(managed),
        field: Some(FieldRef {
            owner: static_field.class_type,
            field: static_field.field_index,
        }),
    }]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::entities::NativeObjectFlags;
    use crate::test::fixtures::{SectionWriter, SnapshotBuilder, TypeTableBuilder};

    #[test]
    fn gc_handle_references_its_target() {
        let mut builder = TypeTableBuilder::new();
        let object = builder.class("System.Object", &[]);
        let types = builder.build();

        let mut snapshot = SnapshotBuilder::new(types);
        let m = snapshot.object(0x1000, object);
        let h = snapshot.gc_handle(0x1000);
        let snapshot = snapshot.build();

        let handle_set = snapshot.connections_of(EntityRef::GcHandle(h));
        assert_eq!(handle_set.references.len(), 1);
        assert_eq!(handle_set.references[0].to, EntityRef::Managed(m));

        let object_set = snapshot.connections_of(EntityRef::Managed(m));
        assert!(object_set
            .referenced_by
            .iter()
            .any(|c| c.from == EntityRef::GcHandle(h)));
    }

    #[test]
    fn managed_field_reference_carries_field_attribution() {
        let mut builder = TypeTableBuilder::new();
        let object = builder.class("System.Object", &[]);
        let node = builder.class("Node", &[("next", 16, object, false)]);
        let types = builder.build();

        let mut section = SectionWriter::new(0x1000);
        section.put_u64(16, 0x2000); // a.next = b

        let mut snapshot = SnapshotBuilder::new(types);
        snapshot.section(section.finish());
        let a = snapshot.object(0x1000, node);
        let b = snapshot.object(0x2000, node);
        let snapshot = snapshot.build();

        let set = snapshot.connections_of(EntityRef::Managed(a));
        assert_eq!(set.references.len(), 1);
        assert_eq!(set.references[0].to, EntityRef::Managed(b));
        let field = set.references[0].field.expect("field attribution");
        assert_eq!(field.owner, node);

        let back = snapshot.connections_of(EntityRef::Managed(b));
        assert_eq!(back.referenced_by.len(), 1);
        assert_eq!(back.referenced_by[0].from, EntityRef::Managed(a));
    }

    #[test]
    fn pointee_faces_emit_one_edge_each() {
        let mut builder = TypeTableBuilder::new();
        let intptr = builder.primitive("System.IntPtr");
        let wrapper = builder.class("Wrapper", &[("m_CachedPtr", 16, intptr, false)]);
        let holder = builder.class("Holder", &[("target", 16, wrapper, false)]);
        let types = builder.build();

        let mut section = SectionWriter::new(0x1000);
        section.put_u64(16, 0x2000); // holder.target = wrapper
        section.put_u64(0x1000 + 16, 0x5000); // wrapper.m_CachedPtr = native

        let mut snapshot = SnapshotBuilder::new(types);
        snapshot.section(section.finish());
        let a = snapshot.object(0x1000, holder);
        let b = snapshot.object(0x2000, wrapper);
        let h = snapshot.gc_handle(0x2000);
        let nt = snapshot.native_type("Texture2D");
        let n = snapshot.native_object("tex", 0x5000, nt, NativeObjectFlags::empty());
        let snapshot = snapshot.build();

        let set = snapshot.connections_of(EntityRef::Managed(a));
        let targets: Vec<EntityRef> = set.references.iter().map(|c| c.to).collect();
        assert_eq!(
            targets,
            vec![
                EntityRef::Managed(b),
                EntityRef::GcHandle(h),
                EntityRef::Native(n)
            ],
            "managed, handle and native face of the same pointee"
        );
    }

    #[test]
    fn native_object_references_wrapper_and_handle() {
        let mut builder = TypeTableBuilder::new();
        let intptr = builder.primitive("System.IntPtr");
        let wrapper = builder.class("Wrapper", &[("m_CachedPtr", 16, intptr, false)]);
        let types = builder.build();

        let mut section = SectionWriter::new(0x1000);
        section.put_u64(16, 0x5000);

        let mut snapshot = SnapshotBuilder::new(types);
        snapshot.section(section.finish());
        let m = snapshot.object(0x1000, wrapper);
        let h = snapshot.gc_handle(0x1000);
        let nt = snapshot.native_type("GameObject");
        let n = snapshot.native_object("go", 0x5000, nt, NativeObjectFlags::empty());
        let snapshot = snapshot.build();

        let set = snapshot.connections_of(EntityRef::Native(n));
        let targets: Vec<EntityRef> = set.references.iter().map(|c| c.to).collect();
        assert_eq!(targets, vec![EntityRef::Managed(m), EntityRef::GcHandle(h)]);
    }

    #[test]
    fn static_field_references_its_pointee() {
        let mut builder = TypeTableBuilder::new();
        let object = builder.class("System.Object", &[]);
        let config = builder.class("Config", &[("instance", 0, object, true)]);
        builder.set_static_bytes(config, 0x2000_u64.to_le_bytes().to_vec());
        let types = builder.build();

        let mut snapshot = SnapshotBuilder::new(types);
        let m = snapshot.object(0x2000, object);
        let snapshot = snapshot.build();

        assert_eq!(snapshot.static_fields().len(), 1);
        let set = snapshot.connections_of(EntityRef::StaticField(
            crate::snapshot::entities::StaticFieldIndex::new(0),
        ));
        assert_eq!(set.references.len(), 1);
        assert_eq!(set.references[0].to, EntityRef::Managed(m));

        let back = snapshot.connections_of(EntityRef::Managed(m));
        assert_eq!(back.referenced_by.len(), 1);
        assert_eq!(back.referenced_by[0].from.kind(), crate::snapshot::entities::EntityKind::StaticField);
    }

    #[test]
    fn reference_array_elements_are_scanned() {
        let mut builder = TypeTableBuilder::new();
        let object = builder.class("System.Object", &[]);
        let array = builder.array_of(object, 1);
        let types = builder.build();

        let mut section = SectionWriter::new(0x1000);
        section.put_i32(24, 3); // length
        section.put_u64(32, 0x2000);
        section.put_u64(40, 0); // null, skipped
        section.put_u64(48, 0x3000);

        let mut snapshot = SnapshotBuilder::new(types);
        snapshot.section(section.finish());
        let a = snapshot.object(0x1000, array);
        let b = snapshot.object(0x2000, object);
        let c = snapshot.object(0x3000, object);
        let snapshot = snapshot.build();

        let set = snapshot.connections_of(EntityRef::Managed(a));
        let targets: Vec<EntityRef> = set.references.iter().map(|c| c.to).collect();
        assert_eq!(targets, vec![EntityRef::Managed(b), EntityRef::Managed(c)]);
        assert!(set.references.iter().all(|c| c.field.is_none()));
    }

    #[test]
    fn nested_value_type_fields_are_scanned() {
        let mut builder = TypeTableBuilder::new();
        let object = builder.class("System.Object", &[]);
        let pair = builder.value_type("Pair", &[("first", 16, object, false)]);
        let holder = builder.class("Holder", &[("pair", 16, pair, false)]);
        let types = builder.build();

        let mut section = SectionWriter::new(0x1000);
        // pair starts inline at 0x1010; first lives at 0x1010 + 16 - 16
        section.put_u64(16, 0x2000);

        let mut snapshot = SnapshotBuilder::new(types);
        snapshot.section(section.finish());
        let a = snapshot.object(0x1000, holder);
        let b = snapshot.object(0x2000, object);
        let snapshot = snapshot.build();

        let set = snapshot.connections_of(EntityRef::Managed(a));
        assert_eq!(set.references.len(), 1);
        assert_eq!(set.references[0].to, EntityRef::Managed(b));
    }

    #[test]
    fn dangling_pointers_produce_no_edges() {
        let mut builder = TypeTableBuilder::new();
        let object = builder.class("System.Object", &[]);
        let node = builder.class("Node", &[("next", 16, object, false)]);
        let types = builder.build();

        let mut section = SectionWriter::new(0x1000);
        section.put_u64(16, 0xDEAD_0000); // outside every index

        let mut snapshot = SnapshotBuilder::new(types);
        snapshot.section(section.finish());
        let a = snapshot.object(0x1000, node);
        let snapshot = snapshot.build();

        assert!(snapshot
            .connections_of(EntityRef::Managed(a))
            .references
            .is_empty());
    }
}
