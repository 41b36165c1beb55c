//! On-demand field expansion for tree views.
//!
//! A presentation layer showing an object as a tree cannot afford to decode the
//! whole reachable graph up front; it expands one node at a time. This module
//! enumerates the *immediate* children of a (type, address) target: a synthetic
//! base-class node, array elements, and one descriptor per field, classified into
//! array / primitive-or-enum / value-type / reference-type.
//!
//! Each descriptor carries a complete [`FieldTarget`] for its own expansion, so
//! the caller needs no decoding knowledge: feed a descriptor's target back into
//! [`children`] to expand it. Expansion is pure; identical targets always produce
//! identical descriptor lists.
//!
//! # Guards
//!
//! - Array expansion is capped at [`ARRAY_EXPAND_ELEMENT_LIMIT`] elements so a
//!   multi-million entry array stays tractable.
//! - Nesting depth is capped at [`FIELD_EXPANSION_DEPTH_LIMIT`]; a
//!   self-referential type truncates (yields no children) instead of erroring.
//!
//! # Byte Sources
//!
//! Instance fields decode from the heap; static fields decode from the owning
//! type's static blob, where field offsets index the blob directly. Descriptors
//! switch sources automatically: a pointer stored in a static slot yields a
//! heap-sourced child.

use crate::snapshot::{
    entities::ManagedTypeIndex,
    types::{instance_field_slots, is_enum_type, FieldDescription, ManagedType, ROOT_OBJECT_TYPE_NAME},
    Snapshot,
};
use crate::heap::reader::MemoryReader;

/// Upper bound on array elements materialized per expansion.
pub const ARRAY_EXPAND_ELEMENT_LIMIT: u64 = 16384;

/// Upper bound on expansion nesting depth.
///
/// Self-referential or deeply nested types truncate here rather than recursing
/// without bound.
pub const FIELD_EXPANSION_DEPTH_LIMIT: usize = 64;

/// Which backing bytes a target decodes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldSource {
    /// Captured heap memory.
    Heap,
    /// The static field blob of the given type; addresses are blob offsets.
    StaticBlob(ManagedTypeIndex),
}

/// A fully specified expansion target: what to decode, where, and how deep the
/// request already is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldTarget {
    /// The type to interpret the bytes as.
    pub managed_type: ManagedTypeIndex,
    /// Address of the data (heap address, or blob offset for static sources).
    pub address: u64,
    /// Byte source to decode from.
    pub source: FieldSource,
    /// Whether the address points at inline value-type data, whose field
    /// offsets are boxed-relative and need the object-header adjustment.
    pub inline: bool,
    /// Nesting depth of this target, checked against
    /// [`FIELD_EXPANSION_DEPTH_LIMIT`].
    pub depth: usize,
}

impl FieldTarget {
    /// Target for a heap object instance.
    #[must_use]
    pub fn object(managed_type: ManagedTypeIndex, address: u64) -> FieldTarget {
        FieldTarget {
            managed_type,
            address,
            source: FieldSource::Heap,
            inline: false,
            depth: 0,
        }
    }

    /// Target for a type's static fields.
    #[must_use]
    pub fn statics(managed_type: ManagedTypeIndex) -> FieldTarget {
        FieldTarget {
            managed_type,
            address: 0,
            source: FieldSource::StaticBlob(managed_type),
            inline: false,
            depth: 0,
        }
    }
}

/// Classification of one child descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildKind {
    /// Synthetic node grouping the fields inherited from the base type.
    BaseClass,
    /// An array-typed field or element.
    Array,
    /// A primitive or enum with a scalar rendering.
    Primitive,
    /// An inline value type.
    ValueType,
    /// A reference to another heap object.
    ReferenceType,
}

/// One expandable child of a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildDescriptor {
    /// Display name: field name, base type name, or element index like `[2]` /
    /// `[1,3]`.
    pub name: String,
    /// Classification of the child.
    pub kind: ChildKind,
    /// Scalar rendering when one exists (primitive values, pointer
    /// placeholders, string previews).
    pub value: Option<String>,
    /// Target to expand this child further.
    pub target: FieldTarget,
}

/// Enumerate the immediate children of `target`.
///
/// Returns an empty list for targets past the depth guard, for null references
/// and for unresolvable layouts; expansion never errors.
#[must_use]
pub fn children(snapshot: &Snapshot, target: &FieldTarget) -> Vec<ChildDescriptor> {
    if target.depth >= FIELD_EXPANSION_DEPTH_LIMIT {
        return Vec::new();
    }

    let Some(ty) = snapshot.managed_type(target.managed_type) else {
        return Vec::new();
    };

    if matches!(target.source, FieldSource::Heap) && target.address == 0 {
        return Vec::new();
    }

    let Some(reader) = reader_for(snapshot, target.source) else {
        return Vec::new();
    };

    if ty.is_array() {
        return array_children(snapshot, &reader, target, ty);
    }

    let list_statics = matches!(target.source, FieldSource::StaticBlob(_)) && !target.inline;
    let mut descriptors = Vec::new();

    if !list_statics {
        push_base_class_child(snapshot, target, ty, &mut descriptors);
    }

    let header = u64::from(snapshot.vm().object_header_size);
    for field in &ty.fields {
        if field.is_static != list_statics {
            continue;
        }

        let Some(mut field_address) = target.address.checked_add(u64::from(field.offset)) else {
            continue;
        };
        if target.inline {
            let Some(adjusted) = field_address.checked_sub(header) else {
                continue;
            };
            field_address = adjusted;
        }

        if let Some(descriptor) =
            describe_slot(snapshot, &reader, target, field, field_address)
        {
            descriptors.push(descriptor);
        }
    }

    descriptors
}

fn reader_for(snapshot: &Snapshot, source: FieldSource) -> Option<MemoryReader<'_>> {
    match source {
        FieldSource::Heap => Some(snapshot.reader()),
        FieldSource::StaticBlob(owner) => snapshot.static_reader(owner),
    }
}

/// The synthetic "base class" child: emitted first, only when the base is not
/// the root object type and actually carries instance fields.
fn push_base_class_child(
    snapshot: &Snapshot,
    target: &FieldTarget,
    ty: &ManagedType,
    descriptors: &mut Vec<ChildDescriptor>,
) {
    let Some(base) = ty.base_or_element_type else {
        return;
    };
    let Some(base_type) = snapshot.managed_type(base) else {
        return;
    };
    if base_type.name == ROOT_OBJECT_TYPE_NAME {
        return;
    }
    if instance_field_slots(snapshot.managed_types(), base).slots.is_empty() {
        return;
    }

    descriptors.push(ChildDescriptor {
        name: base_type.name.clone(),
        kind: ChildKind::BaseClass,
        value: None,
        target: FieldTarget {
            managed_type: base,
            address: target.address,
            source: target.source,
            inline: target.inline,
            depth: target.depth + 1,
        },
    });
}

/// Classify one field slot and produce its descriptor.
fn describe_slot(
    snapshot: &Snapshot,
    reader: &MemoryReader<'_>,
    target: &FieldTarget,
    field: &FieldDescription,
    field_address: u64,
) -> Option<ChildDescriptor> {
    let field_type = snapshot.managed_type(field.managed_type)?;
    let (kind, value, child_target) = classify_slot(
        snapshot,
        reader,
        target,
        field.managed_type,
        field_type,
        field_address,
    );

    Some(ChildDescriptor {
        name: field.name.clone(),
        kind,
        value,
        target: child_target,
    })
}

fn classify_slot(
    snapshot: &Snapshot,
    reader: &MemoryReader<'_>,
    target: &FieldTarget,
    slot_type_index: ManagedTypeIndex,
    slot_type: &ManagedType,
    slot_address: u64,
) -> (ChildKind, Option<String>, FieldTarget) {
    let depth = target.depth + 1;

    if slot_type.is_array() {
        let pointer = reader.read_pointer(slot_address).unwrap_or(0);
        let value = if pointer == 0 {
            Some("null".into())
        } else {
            Some(format!("0x{pointer:x}"))
        };
        return (
            ChildKind::Array,
            value,
            FieldTarget {
                managed_type: slot_type_index,
                address: pointer,
                source: FieldSource::Heap,
                inline: false,
                depth,
            },
        );
    }

    if slot_type.is_primitive() || is_enum_type(snapshot.managed_types(), slot_type_index) {
        return (
            ChildKind::Primitive,
            reader.read_field_value(slot_address, slot_type_index),
            FieldTarget {
                managed_type: slot_type_index,
                address: slot_address,
                source: target.source,
                inline: false,
                depth,
            },
        );
    }

    if slot_type.is_value_type() {
        return (
            ChildKind::ValueType,
            None,
            FieldTarget {
                managed_type: slot_type_index,
                address: slot_address,
                source: target.source,
                inline: true,
                depth,
            },
        );
    }

    // Reference type: dereference for the child target, prefer the pointee's
    // actual runtime type over the field's declared type.
    let value = reader.read_field_value(slot_address, slot_type_index);
    let pointer = reader.read_pointer(slot_address).unwrap_or(0);
    let runtime_type = if pointer != 0 {
        reader.read_object_type(pointer).unwrap_or(slot_type_index)
    } else {
        slot_type_index
    };

    (
        ChildKind::ReferenceType,
        value,
        FieldTarget {
            managed_type: runtime_type,
            address: pointer,
            source: FieldSource::Heap,
            inline: false,
            depth,
        },
    )
}

fn array_children(
    snapshot: &Snapshot,
    reader: &MemoryReader<'_>,
    target: &FieldTarget,
    ty: &ManagedType,
) -> Vec<ChildDescriptor> {
    let Some(rank) = ty.array_rank else {
        return Vec::new();
    };
    let Some(element_type_index) = ty.base_or_element_type else {
        return Vec::new();
    };
    let Some(element_type) = snapshot.managed_type(element_type_index) else {
        return Vec::new();
    };

    let mut dimensions = Vec::with_capacity(rank as usize);
    for dimension in 0..rank {
        let Some(length) = reader.read_array_length(target.address, target.managed_type, dimension)
        else {
            return Vec::new();
        };
        dimensions.push(u64::from(length));
    }

    let total: u64 = dimensions.iter().product();
    let count = total.min(ARRAY_EXPAND_ELEMENT_LIMIT);

    let Some(element_size) = reader.element_size(element_type_index) else {
        return Vec::new();
    };
    let Some(data) = target
        .address
        .checked_add(u64::from(snapshot.vm().array_header_size))
    else {
        return Vec::new();
    };

    let mut descriptors = Vec::with_capacity(count as usize);
    for i in 0..count {
        let element_address = data + i * u64::from(element_size);
        let (kind, value, mut child_target) = classify_slot(
            snapshot,
            reader,
            target,
            element_type_index,
            element_type,
            element_address,
        );

        // Inline elements sit in the array body, not behind a pointer.
        if matches!(kind, ChildKind::ValueType | ChildKind::Primitive) {
            child_target.source = FieldSource::Heap;
        }

        descriptors.push(ChildDescriptor {
            name: element_name(i, &dimensions),
            kind,
            value,
            target: child_target,
        });
    }

    descriptors
}

/// Element display name by rank: `[i]`, `[y,x]`, `[z,y,x]`; ranks past three
/// fall back to the flat scheme.
fn element_name(flat: u64, dimensions: &[u64]) -> String {
    match dimensions {
        [_] => format!("[{flat}]"),
        [_, inner] if *inner > 0 => {
            format!("[{},{}]", flat / inner, flat % inner)
        }
        [_, middle, inner] if *middle > 0 && *inner > 0 => {
            let plane = middle * inner;
            format!(
                "[{},{},{}]",
                flat / plane,
                (flat % plane) / inner,
                flat % inner
            )
        }
        _ => format!("[{flat}]"),
    }
}
