//! Type metadata for managed and native objects.
//!
//! This module carries everything the binary decoder needs to interpret raw heap
//! bytes: per-type field layouts, value/reference/array/pointer classification,
//! inheritance links, static field storage and the virtual machine's global layout
//! constants (pointer size, object header size, array header layout).
//!
//! # Key Components
//!
//! - [`ManagedType`] / [`FieldDescription`] - managed-side type and field layout
//! - [`NativeType`] - the engine's own flat type table
//! - [`VirtualMachineInfo`] - global layout constants, validated at load
//! - [`PrimitiveKind`] - the closed set of primitive value encodings
//!
//! Inheritance chains in a capture are untrusted data: a corrupt snapshot can
//! contain base-type cycles. Every chain walk in this module is bounded by
//! [`TYPE_CHAIN_HOP_LIMIT`] and reports truncation to the caller instead of
//! looping forever.

use bitflags::bitflags;
use strum::{Display, EnumIter};

use crate::snapshot::entities::ManagedTypeIndex;

/// Upper bound on base-type chain walks.
///
/// Captured type metadata is untrusted; a malformed capture may contain a cyclic
/// inheritance chain. Walks that exceed this limit are truncated and surfaced
/// through the diagnostics sink.
pub const TYPE_CHAIN_HOP_LIMIT: usize = 64;

/// Name of the managed root object type, whose synthetic base-class expansion
/// node is suppressed.
pub const ROOT_OBJECT_TYPE_NAME: &str = "System.Object";

/// Name of the managed enum base type.
pub const ENUM_BASE_TYPE_NAME: &str = "System.Enum";

/// Name of the managed string type.
pub const STRING_TYPE_NAME: &str = "System.String";

/// Name of the backing store field an enum's value lives in.
pub const ENUM_VALUE_FIELD_NAME: &str = "value__";

/// Name of the field linking a managed wrapper to its native engine object.
pub const CACHED_PTR_FIELD_NAME: &str = "m_CachedPtr";

bitflags! {
    /// Classification flags of a managed type.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ManagedTypeFlags: u32 {
        /// The type is a value type (stored inline, copied by value).
        const VALUE_TYPE = 1 << 0;
        /// The type is an array type; its element type is the base-or-element link.
        const ARRAY = 1 << 1;
        /// The type is an unmanaged pointer type.
        const POINTER = 1 << 2;
        /// The type is one of the built-in primitives.
        const PRIMITIVE = 1 << 3;
    }
}

/// A single field of a managed type.
#[derive(Debug, Clone)]
pub struct FieldDescription {
    /// Field name.
    pub name: String,
    /// Byte offset of the field. For instance fields this is relative to the
    /// object start (header included); for static fields it indexes the owning
    /// type's static field blob directly.
    pub offset: u32,
    /// The field's declared type.
    pub managed_type: ManagedTypeIndex,
    /// Whether the field is static.
    pub is_static: bool,
}

/// Metadata of one managed type.
#[derive(Debug, Clone)]
pub struct ManagedType {
    /// Fully qualified type name.
    pub name: String,
    /// Value/array/pointer/primitive classification.
    pub flags: ManagedTypeFlags,
    /// Instance size in bytes. Captures have been observed to carry negative
    /// sizes for array types; consumers must go through
    /// [`crate::heap::MemoryReader::read_object_size`] rather than trusting this
    /// value for arrays.
    pub size: i32,
    /// Address of the runtime's type info structure; object headers point here.
    pub type_info_address: u64,
    /// Base type, or element type when this is an array type.
    pub base_or_element_type: Option<ManagedTypeIndex>,
    /// Number of array dimensions; `None` when this is not an array type.
    pub array_rank: Option<u8>,
    /// Declared fields, instance and static.
    pub fields: Vec<FieldDescription>,
    /// Backing store of the type's static fields. Empty when the type has no
    /// initialized statics.
    pub static_field_bytes: Vec<u8>,
}

impl ManagedType {
    /// Whether instances are stored inline.
    #[must_use]
    pub fn is_value_type(&self) -> bool {
        self.flags.contains(ManagedTypeFlags::VALUE_TYPE)
    }

    /// Whether instances live on the managed heap behind a reference.
    #[must_use]
    pub fn is_reference_type(&self) -> bool {
        !self.is_value_type()
    }

    /// Whether this is an array type.
    #[must_use]
    pub fn is_array(&self) -> bool {
        self.flags.contains(ManagedTypeFlags::ARRAY)
    }

    /// Whether this is an unmanaged pointer type.
    #[must_use]
    pub fn is_pointer(&self) -> bool {
        self.flags.contains(ManagedTypeFlags::POINTER)
    }

    /// Whether this is a built-in primitive.
    #[must_use]
    pub fn is_primitive(&self) -> bool {
        self.flags.contains(ManagedTypeFlags::PRIMITIVE)
    }

    /// Whether a field slot of this type holds a pointer into the heap.
    ///
    /// True for reference types (classes, strings, arrays) and unmanaged
    /// pointer types; false for inline value types and primitives.
    #[must_use]
    pub fn is_pointer_slot(&self) -> bool {
        self.is_reference_type() || self.is_pointer()
    }
}

/// Metadata of one native engine type.
#[derive(Debug, Clone)]
pub struct NativeType {
    /// Type name as the engine reports it.
    pub name: String,
    /// Base type within the native type table.
    pub base: Option<crate::snapshot::entities::NativeTypeIndex>,
}

/// Global memory layout constants of the captured virtual machine.
///
/// These values parameterize all raw pointer arithmetic: where an object's field
/// block starts, where an array stores its per-dimension bounds, and how wide a
/// pointer is.
#[derive(Debug, Clone, Copy)]
pub struct VirtualMachineInfo {
    /// Pointer width in bytes; 4 or 8.
    pub pointer_size: u32,
    /// Bytes of header before an object's first instance field.
    pub object_header_size: u32,
    /// Bytes of header before an array's first element.
    pub array_header_size: u32,
    /// Offset of the per-dimension bounds block within an array header.
    pub array_bounds_offset_in_header: u32,
    /// Offset of the flat element count within an array header.
    pub array_size_offset_in_header: u32,
    /// Minimum allocation granularity of the managed heap allocator.
    pub allocation_granularity: u32,
}

impl VirtualMachineInfo {
    /// Validate the layout constants against each other.
    ///
    /// Runs once during snapshot load so that corrupt captures fail with a single
    /// clear error instead of thousands of downstream lookup misses.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] when the constants are inconsistent.
    pub fn validate(&self) -> crate::Result<()> {
        if self.pointer_size != 4 && self.pointer_size != 8 {
            return Err(malformed_error!(
                "Invalid pointer size {} (expected 4 or 8)",
                self.pointer_size
            ));
        }

        if self.object_header_size == 0 || self.object_header_size > 4096 {
            return Err(malformed_error!(
                "Implausible object header size {}",
                self.object_header_size
            ));
        }

        if self.array_header_size < self.object_header_size {
            return Err(malformed_error!(
                "Array header size {} smaller than object header size {}",
                self.array_header_size,
                self.object_header_size
            ));
        }

        if self.array_bounds_offset_in_header >= self.array_header_size
            || self.array_size_offset_in_header >= self.array_header_size
        {
            return Err(malformed_error!(
                "Array header offsets (bounds {}, size {}) outside array header of {} bytes",
                self.array_bounds_offset_in_header,
                self.array_size_offset_in_header,
                self.array_header_size
            ));
        }

        Ok(())
    }
}

/// The closed set of primitive value encodings the decoder can format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter)]
pub enum PrimitiveKind {
    /// `System.Boolean`, one byte.
    Boolean,
    /// `System.Char`, one UTF-16 code unit.
    Char,
    /// `System.SByte`.
    SByte,
    /// `System.Byte`.
    Byte,
    /// `System.Int16`.
    Int16,
    /// `System.UInt16`.
    UInt16,
    /// `System.Int32`.
    Int32,
    /// `System.UInt32`.
    UInt32,
    /// `System.Int64`.
    Int64,
    /// `System.UInt64`.
    UInt64,
    /// `System.Single`.
    Single,
    /// `System.Double`.
    Double,
    /// `System.IntPtr`, pointer sized.
    IntPtr,
    /// `System.UIntPtr`, pointer sized.
    UIntPtr,
}

impl PrimitiveKind {
    /// Map a fully qualified type name to its primitive kind.
    #[must_use]
    pub fn from_type_name(name: &str) -> Option<PrimitiveKind> {
        match name {
            "System.Boolean" => Some(PrimitiveKind::Boolean),
            "System.Char" => Some(PrimitiveKind::Char),
            "System.SByte" => Some(PrimitiveKind::SByte),
            "System.Byte" => Some(PrimitiveKind::Byte),
            "System.Int16" => Some(PrimitiveKind::Int16),
            "System.UInt16" => Some(PrimitiveKind::UInt16),
            "System.Int32" => Some(PrimitiveKind::Int32),
            "System.UInt32" => Some(PrimitiveKind::UInt32),
            "System.Int64" => Some(PrimitiveKind::Int64),
            "System.UInt64" => Some(PrimitiveKind::UInt64),
            "System.Single" => Some(PrimitiveKind::Single),
            "System.Double" => Some(PrimitiveKind::Double),
            "System.IntPtr" => Some(PrimitiveKind::IntPtr),
            "System.UIntPtr" => Some(PrimitiveKind::UIntPtr),
            _ => None,
        }
    }

    /// Encoded width in bytes under the given pointer size.
    #[must_use]
    pub fn byte_size(&self, pointer_size: u32) -> u32 {
        match self {
            PrimitiveKind::Boolean | PrimitiveKind::SByte | PrimitiveKind::Byte => 1,
            PrimitiveKind::Char | PrimitiveKind::Int16 | PrimitiveKind::UInt16 => 2,
            PrimitiveKind::Int32 | PrimitiveKind::UInt32 | PrimitiveKind::Single => 4,
            PrimitiveKind::Int64 | PrimitiveKind::UInt64 | PrimitiveKind::Double => 8,
            PrimitiveKind::IntPtr | PrimitiveKind::UIntPtr => pointer_size,
        }
    }
}

/// A resolved instance field slot: the declaring type plus the field's position
/// within that type's field array.
#[derive(Debug, Clone, Copy)]
pub struct FieldSlot {
    /// The type declaring the field.
    pub owner: ManagedTypeIndex,
    /// Position within the declaring type's field array.
    pub field: u32,
}

/// The instance fields of a type including inherited ones, base types first.
///
/// `truncated` is set when the base chain exceeded [`TYPE_CHAIN_HOP_LIMIT`],
/// which callers surface through the diagnostics sink.
#[derive(Debug, Clone)]
pub struct InheritedFields {
    /// Field slots in declaration order, outermost base type first.
    pub slots: Vec<FieldSlot>,
    /// Whether the chain walk was cut short by the hop limit.
    pub truncated: bool,
}

/// Collect the instance fields of `type_index` including inherited ones.
///
/// Base type fields come first so that field walks match the in-memory layout
/// order. Array types contribute no field slots.
#[must_use]
pub(crate) fn instance_field_slots(
    types: &[ManagedType],
    type_index: ManagedTypeIndex,
) -> InheritedFields {
    let mut chain = Vec::new();
    let mut current = Some(type_index);
    let mut truncated = false;

    for hop in 0.. {
        let Some(index) = current else { break };
        let Some(ty) = types.get(index.index()) else {
            break;
        };

        if hop >= TYPE_CHAIN_HOP_LIMIT {
            truncated = true;
            break;
        }

        if ty.is_array() {
            break;
        }

        chain.push(index);
        current = ty.base_or_element_type;
    }

    let mut slots = Vec::new();
    for owner in chain.iter().rev() {
        let ty = &types[owner.index()];
        for (field, description) in ty.fields.iter().enumerate() {
            if !description.is_static {
                slots.push(FieldSlot {
                    owner: *owner,
                    field: field as u32,
                });
            }
        }
    }

    InheritedFields { slots, truncated }
}

/// Whether `type_index` is an enum type (derives directly from `System.Enum`).
#[must_use]
pub(crate) fn is_enum_type(types: &[ManagedType], type_index: ManagedTypeIndex) -> bool {
    let Some(ty) = types.get(type_index.index()) else {
        return false;
    };

    ty.base_or_element_type
        .and_then(|base| types.get(base.index()))
        .is_some_and(|base| base.name == ENUM_BASE_TYPE_NAME)
}

/// The primitive backing type of an enum, via its `value__` field.
#[must_use]
pub(crate) fn enum_underlying_type(
    types: &[ManagedType],
    type_index: ManagedTypeIndex,
) -> Option<ManagedTypeIndex> {
    let ty = types.get(type_index.index())?;
    ty.fields
        .iter()
        .find(|f| !f.is_static && f.name == ENUM_VALUE_FIELD_NAME)
        .map(|f| f.managed_type)
}
