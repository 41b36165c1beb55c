//! On-demand binary decoding of captured heap memory.
//!
//! [`MemoryReader`] turns a raw address plus type metadata into typed values:
//! pointers, formatted primitive fields, array lengths, object sizes, managed
//! string contents and structural content hashes. It is the single place in the
//! crate that performs pointer arithmetic against captured bytes.
//!
//! # Byte Sources
//!
//! A reader decodes against one of two byte sources:
//!
//! - **Heap** - addresses resolve through the section index into captured heap
//!   memory. This is the source for all object instances.
//! - **Static blob** - addresses index a type's static field byte blob directly.
//!   Static fields have no heap address; their declared offsets are blob offsets.
//!
//! Operations that dereference pointers (string contents, array elements, object
//! headers) always chase them into the heap source, regardless of which source the
//! reader itself decodes from: a pointer stored in a static blob still points into
//! the heap.
//!
//! # Layout Conventions
//!
//! Instance field offsets are relative to the object start and include the object
//! header (the runtime's boxed layout convention). Reading an *inline* value type
//! (a struct stored in a field slot or array element) therefore subtracts
//! [`VirtualMachineInfo::object_header_size`] from its inner field offsets.
//! [`ManagedType::size`] is the unboxed data size for value types and the total
//! instance size for reference types.
//!
//! # Failure Semantics
//!
//! An address outside every captured section yields `None`, never an error; the
//! heap routinely contains pointers into uncaptured memory. A section that is too
//! short for a type's declared layout, or a negative size, is an invalid-layout
//! condition reported once per type through [`Diagnostics`] before yielding
//! `None`, so a single corrupt type cannot flood the sink.

use widestring::U16String;

use crate::{
    file::io::{read_le, HeapIO},
    heap::hash::{ContentHash, ContentHasher},
    snapshot::{
        diagnostics::Diagnostics,
        entities::{ManagedTypeIndex, MemorySection},
        index::AddressIndex,
        types::{
            enum_underlying_type, instance_field_slots, is_enum_type, ManagedType, PrimitiveKind,
            VirtualMachineInfo, STRING_TYPE_NAME,
        },
    },
};

/// Upper bound on array elements visited while hashing one array object.
///
/// Content hashes stay deterministic under the cap because the cap itself and the
/// full element count are both part of the hash input.
pub const ARRAY_HASH_ELEMENT_LIMIT: u64 = 65536;

/// Upper bound on UTF-16 code units decoded from a managed string.
pub const MAX_STRING_CHARS: usize = 65536;

/// Recursion bound for nested value-type walks during hashing.
///
/// Captured metadata can describe self-referential value types; walks beyond this
/// depth are truncated rather than recursing forever.
const HASH_RECURSION_LIMIT: usize = 64;

/// Type-identity marker mixed into hashes when a referenced object's header
/// cannot be resolved to a known type.
const UNRESOLVED_TYPE_MARKER: u32 = u32::MAX;

/// Which backing bytes a reader decodes from.
enum ByteSource<'a> {
    /// Captured heap memory, resolved through the section index.
    Heap,
    /// A type's static field blob, indexed by field offset.
    StaticBlob(&'a [u8]),
}

/// Decodes raw bytes at an address using the snapshot's type metadata.
///
/// Readers are cheap to construct and hold only borrows; obtain one via
/// [`Snapshot::reader`](crate::snapshot::Snapshot::reader) or
/// [`Snapshot::static_reader`](crate::snapshot::Snapshot::static_reader).
pub struct MemoryReader<'a> {
    vm: &'a VirtualMachineInfo,
    sections: &'a [MemorySection],
    types: &'a [ManagedType],
    index: &'a AddressIndex,
    diagnostics: &'a Diagnostics,
    source: ByteSource<'a>,
}

impl<'a> MemoryReader<'a> {
    pub(crate) fn heap(
        vm: &'a VirtualMachineInfo,
        sections: &'a [MemorySection],
        types: &'a [ManagedType],
        index: &'a AddressIndex,
        diagnostics: &'a Diagnostics,
    ) -> MemoryReader<'a> {
        MemoryReader {
            vm,
            sections,
            types,
            index,
            diagnostics,
            source: ByteSource::Heap,
        }
    }

    pub(crate) fn static_blob(
        vm: &'a VirtualMachineInfo,
        sections: &'a [MemorySection],
        types: &'a [ManagedType],
        index: &'a AddressIndex,
        diagnostics: &'a Diagnostics,
        blob: &'a [u8],
    ) -> MemoryReader<'a> {
        MemoryReader {
            vm,
            sections,
            types,
            index,
            diagnostics,
            source: ByteSource::StaticBlob(blob),
        }
    }

    /// A sibling reader over the heap source, used to chase pointers that were
    /// read out of a static blob.
    fn heap_view(&self) -> MemoryReader<'a> {
        MemoryReader {
            vm: self.vm,
            sections: self.sections,
            types: self.types,
            index: self.index,
            diagnostics: self.diagnostics,
            source: ByteSource::Heap,
        }
    }

    /// Raw bytes at `address`, or `None` when the range is not captured.
    fn bytes_at(&self, address: u64, len: usize) -> Option<&'a [u8]> {
        match self.source {
            ByteSource::Heap => {
                let section_index = self.index.find_section(address)?;
                let section = &self.sections[section_index.index()];
                let offset = (address - section.start_address) as usize;
                section.bytes.get(offset..offset.checked_add(len)?)
            }
            ByteSource::StaticBlob(blob) => {
                let offset = usize::try_from(address).ok()?;
                blob.get(offset..offset.checked_add(len)?)
            }
        }
    }

    /// Like [`Self::bytes_at`], but reports an invalid layout (once per type)
    /// when the address is captured yet too short for the requested range.
    fn bytes_at_reported(
        &self,
        address: u64,
        len: usize,
        type_index: ManagedTypeIndex,
    ) -> Option<&'a [u8]> {
        let bytes = self.bytes_at(address, len);
        if bytes.is_some() {
            return bytes;
        }

        // For a static blob the blob *is* the declared storage, so any failed
        // read there is a layout conflict, not a capture gap.
        let covered = match self.source {
            ByteSource::Heap => self.index.find_section(address).is_some(),
            ByteSource::StaticBlob(_) => true,
        };
        if covered {
            let name = self
                .types
                .get(type_index.index())
                .map_or("<unknown>", |t| t.name.as_str());
            self.diagnostics.invalid_layout(
                type_index,
                name,
                "declared field layout reads past the end of captured memory",
            );
        }

        None
    }

    fn read_scalar<T: HeapIO>(&self, address: u64) -> Option<T> {
        let bytes = self.bytes_at(address, std::mem::size_of::<T>())?;
        read_le::<T>(bytes).ok()
    }

    /// Read a pointer-sized value at `address`.
    ///
    /// Under a 4-byte pointer size the value is zero-extended to 64 bits.
    #[must_use]
    pub fn read_pointer(&self, address: u64) -> Option<u64> {
        if self.vm.pointer_size == 4 {
            self.read_scalar::<u32>(address).map(u64::from)
        } else {
            self.read_scalar::<u64>(address)
        }
    }

    /// Resolve the type of the object at `object_address` from its header.
    ///
    /// Object headers start with a pointer to the runtime's type info structure;
    /// this follows it and maps the target back through the type-info index.
    #[must_use]
    pub fn read_object_type(&self, object_address: u64) -> Option<ManagedTypeIndex> {
        let type_info = self.heap_view().read_pointer(object_address)?;
        self.index.find_managed_type_by_type_info(type_info)
    }

    /// Format the field value at `address` of declared type `type_index` as text.
    ///
    /// Primitives (and enums, via their backing primitive) are rendered by their
    /// declared width and signedness. String fields are dereferenced into a quoted
    /// preview. Other pointer and reference fields render as a symbolic
    /// `0x…`/`null` placeholder without dereferencing. Inline value types have no
    /// scalar rendering and yield `None`.
    #[must_use]
    pub fn read_field_value(&self, address: u64, type_index: ManagedTypeIndex) -> Option<String> {
        let ty = self.types.get(type_index.index())?;

        if ty.is_primitive() {
            if let Some(kind) = PrimitiveKind::from_type_name(&ty.name) {
                return self.format_primitive(address, kind);
            }
        }

        if is_enum_type(self.types, type_index) {
            let underlying = enum_underlying_type(self.types, type_index)?;
            let name = &self.types.get(underlying.index())?.name;
            let kind = PrimitiveKind::from_type_name(name)?;
            return self.format_primitive(address, kind);
        }

        if ty.name == STRING_TYPE_NAME {
            let pointer = self.read_pointer(address)?;
            if pointer == 0 {
                return Some("null".into());
            }
            return self
                .read_string(pointer)
                .map(|s| format!("\"{s}\""))
                .or(Some(format!("0x{pointer:x}")));
        }

        if ty.is_pointer_slot() {
            let pointer = self.read_pointer(address)?;
            if pointer == 0 {
                return Some("null".into());
            }
            return Some(format!("0x{pointer:x}"));
        }

        None
    }

    fn format_primitive(&self, address: u64, kind: PrimitiveKind) -> Option<String> {
        let text = match kind {
            PrimitiveKind::Boolean => {
                let value = self.read_scalar::<u8>(address)?;
                if value != 0 { "true".into() } else { "false".into() }
            }
            PrimitiveKind::Char => {
                let unit = self.read_scalar::<u16>(address)?;
                match char::from_u32(u32::from(unit)) {
                    Some(c) => format!("'{c}'"),
                    None => format!("'\\u{{{unit:04x}}}'"),
                }
            }
            PrimitiveKind::SByte => self.read_scalar::<i8>(address)?.to_string(),
            PrimitiveKind::Byte => self.read_scalar::<u8>(address)?.to_string(),
            PrimitiveKind::Int16 => self.read_scalar::<i16>(address)?.to_string(),
            PrimitiveKind::UInt16 => self.read_scalar::<u16>(address)?.to_string(),
            PrimitiveKind::Int32 => self.read_scalar::<i32>(address)?.to_string(),
            PrimitiveKind::UInt32 => self.read_scalar::<u32>(address)?.to_string(),
            PrimitiveKind::Int64 => self.read_scalar::<i64>(address)?.to_string(),
            PrimitiveKind::UInt64 => self.read_scalar::<u64>(address)?.to_string(),
            PrimitiveKind::Single => self.read_scalar::<f32>(address)?.to_string(),
            PrimitiveKind::Double => self.read_scalar::<f64>(address)?.to_string(),
            PrimitiveKind::IntPtr | PrimitiveKind::UIntPtr => {
                format!("0x{:x}", self.read_pointer(address)?)
            }
        };

        Some(text)
    }

    /// Decode the managed string object at `object_address`.
    ///
    /// Strings store a 32-bit code unit count after the object header, followed
    /// by UTF-16 code units. Decoding is capped at [`MAX_STRING_CHARS`] units;
    /// unpaired surrogates are replaced rather than rejected.
    #[must_use]
    pub fn read_string(&self, object_address: u64) -> Option<String> {
        let heap = self.heap_view();

        let length_address = object_address.checked_add(u64::from(self.vm.object_header_size))?;
        let length = heap.read_scalar::<i32>(length_address)?;
        if length < 0 {
            if let Some(type_index) = self.read_object_type(object_address) {
                let name = self
                    .types
                    .get(type_index.index())
                    .map_or("<unknown>", |t| t.name.as_str());
                self.diagnostics
                    .invalid_layout(type_index, name, "negative string length");
            }
            return None;
        }

        let units = (length as usize).min(MAX_STRING_CHARS);
        let bytes = heap.bytes_at(length_address.checked_add(4)?, units * 2)?;

        let mut code_units = Vec::with_capacity(units);
        for pair in bytes.chunks_exact(2) {
            code_units.push(u16::from_le_bytes([pair[0], pair[1]]));
        }

        Some(U16String::from_vec(code_units).to_string_lossy())
    }

    /// The element count of one array dimension; dimension 0 is the outermost.
    ///
    /// Rank-1 arrays store their flat count at the VM's array-size header offset;
    /// multi-dimensional arrays store one count per dimension in the bounds block.
    #[must_use]
    pub fn read_array_length(
        &self,
        address: u64,
        type_index: ManagedTypeIndex,
        dimension: u8,
    ) -> Option<u32> {
        let ty = self.types.get(type_index.index())?;
        let rank = ty.array_rank?;
        if dimension >= rank {
            return None;
        }

        let offset = if rank == 1 {
            u64::from(self.vm.array_size_offset_in_header)
        } else {
            u64::from(self.vm.array_bounds_offset_in_header) + u64::from(dimension) * 4
        };

        let bytes = self.bytes_at_reported(address.checked_add(offset)?, 4, type_index)?;
        let length = read_le::<i32>(bytes).ok()?;

        if length < 0 {
            self.diagnostics
                .invalid_layout(type_index, &ty.name, "negative array length");
            return None;
        }

        Some(length as u32)
    }

    /// The flat element count of an array: the product of all dimension counts.
    #[must_use]
    pub fn read_array_total_length(
        &self,
        address: u64,
        type_index: ManagedTypeIndex,
    ) -> Option<u64> {
        let ty = self.types.get(type_index.index())?;
        let rank = ty.array_rank?;

        let mut total: u64 = 1;
        for dimension in 0..rank {
            total = total.checked_mul(u64::from(self.read_array_length(
                address,
                type_index,
                dimension,
            )?))?;
        }

        Some(total)
    }

    /// Byte size of one element of `element_type` when stored in an array.
    ///
    /// Value-type elements are stored inline at their data size; reference
    /// elements are stored as pointers.
    #[must_use]
    pub fn element_size(&self, element_type: ManagedTypeIndex) -> Option<u32> {
        let ty = self.types.get(element_type.index())?;
        if ty.is_pointer_slot() {
            return Some(self.vm.pointer_size);
        }

        if ty.size <= 0 {
            self.diagnostics
                .invalid_layout(element_type, &ty.name, "non-positive value type size");
            return None;
        }

        Some(ty.size as u32)
    }

    /// Actual byte size of the object at `address`.
    ///
    /// Plain objects report their type's instance size; arrays report header plus
    /// element storage, which requires reading the captured length.
    #[must_use]
    pub fn read_object_size(&self, address: u64, type_index: ManagedTypeIndex) -> Option<u64> {
        let ty = self.types.get(type_index.index())?;

        if ty.is_array() {
            let element_type = ty.base_or_element_type?;
            let total = self.read_array_total_length(address, type_index)?;
            let element_size = u64::from(self.element_size(element_type)?);
            return u64::from(self.vm.array_header_size).checked_add(total.checked_mul(element_size)?);
        }

        if ty.size < 0 {
            self.diagnostics
                .invalid_layout(type_index, &ty.name, "negative instance size");
            return None;
        }

        Some(ty.size as u64)
    }

    /// Compute the structural content hash of the object at `address`.
    ///
    /// The walk visits instance fields with base type fields first, hashes
    /// primitive bytes directly, recurses into inline value types, hashes array
    /// elements up to [`ARRAY_HASH_ELEMENT_LIMIT`], and for referenced objects
    /// incorporates the pointee's type identity read from its header, never its
    /// address. Two objects with identical in-scope bytes therefore hash equally
    /// regardless of where they live.
    ///
    /// Returns `None` when the object's layout cannot be resolved against the
    /// captured bytes; the condition is reported once per type.
    #[must_use]
    pub fn compute_object_hash(
        &self,
        address: u64,
        type_index: ManagedTypeIndex,
    ) -> Option<ContentHash> {
        let ty = self.types.get(type_index.index())?;

        let mut hasher = ContentHasher::new();
        hasher.mix_u32(type_index.index() as u32);

        if ty.is_array() {
            self.hash_array(&mut hasher, address, type_index)?;
        } else {
            self.hash_fields(&mut hasher, address, type_index, false, 0)?;
        }

        Some(hasher.finalize())
    }

    fn hash_fields(
        &self,
        hasher: &mut ContentHasher,
        address: u64,
        type_index: ManagedTypeIndex,
        inline: bool,
        depth: usize,
    ) -> Option<()> {
        if depth >= HASH_RECURSION_LIMIT {
            // Self-referential value type metadata; truncate the walk.
            return Some(());
        }

        let fields = instance_field_slots(self.types, type_index);
        if fields.truncated {
            let name = &self.types[type_index.index()].name;
            self.diagnostics
                .invalid_layout(type_index, name, "inheritance chain exceeds hop limit");
        }

        for slot in &fields.slots {
            let field = &self.types[slot.owner.index()].fields[slot.field as usize];
            let field_type_index = field.managed_type;
            let field_type = self.types.get(field_type_index.index())?;

            let field_address = self.field_address(address, field.offset, inline, type_index)?;

            if field_type.is_pointer_slot() {
                let Some(pointer) = self.read_pointer(field_address) else {
                    self.report_unreadable(type_index);
                    return None;
                };
                if pointer == 0 {
                    hasher.mix_u64(0);
                } else {
                    hasher.mix_u32(self.pointee_type_identity(pointer));
                }
            } else if let Some(size) = self.primitive_width(field_type_index) {
                let bytes = self.bytes_at_reported(field_address, size as usize, type_index)?;
                hasher.mix_bytes(bytes);
            } else {
                // Inline value type
                self.hash_fields(hasher, field_address, field_type_index, true, depth + 1)?;
            }
        }

        Some(())
    }

    fn hash_array(
        &self,
        hasher: &mut ContentHasher,
        address: u64,
        type_index: ManagedTypeIndex,
    ) -> Option<()> {
        let ty = &self.types[type_index.index()];
        let Some(element_type_index) = ty.base_or_element_type else {
            self.diagnostics
                .invalid_layout(type_index, &ty.name, "array type without element type");
            return None;
        };
        let element_type = self.types.get(element_type_index.index())?;

        let total = self.read_array_total_length(address, type_index)?;
        hasher.mix_u64(total);

        let count = total.min(ARRAY_HASH_ELEMENT_LIMIT);
        let element_size = u64::from(self.element_size(element_type_index)?);
        let data = address.checked_add(u64::from(self.vm.array_header_size))?;

        if element_type.is_pointer_slot() {
            for i in 0..count {
                let Some(pointer) = self.read_pointer(data + i * element_size) else {
                    self.report_unreadable(type_index);
                    return None;
                };
                if pointer == 0 {
                    hasher.mix_u64(0);
                } else {
                    hasher.mix_u32(self.pointee_type_identity(pointer));
                }
            }
        } else if self.primitive_width(element_type_index).is_some() {
            // Primitive elements are one contiguous slab; hash it in one pass.
            let len = usize::try_from(count.checked_mul(element_size)?).ok()?;
            let bytes = self.bytes_at_reported(data, len, type_index)?;
            hasher.mix_bytes(bytes);
        } else {
            for i in 0..count {
                self.hash_fields(hasher, data + i * element_size, element_type_index, true, 1)?;
            }
        }

        Some(())
    }

    /// The identity mixed into hashes for a referenced object: its type's array
    /// position, or a marker when the header does not resolve.
    fn pointee_type_identity(&self, pointer: u64) -> u32 {
        self.read_object_type(pointer)
            .map_or(UNRESOLVED_TYPE_MARKER, |t| t.index() as u32)
    }

    /// Absolute address of a field slot, honoring the inline value-type offset
    /// adjustment.
    fn field_address(
        &self,
        base: u64,
        offset: u32,
        inline: bool,
        type_index: ManagedTypeIndex,
    ) -> Option<u64> {
        let address = base.checked_add(u64::from(offset))?;
        if !inline {
            return Some(address);
        }

        match address.checked_sub(u64::from(self.vm.object_header_size)) {
            Some(adjusted) => Some(adjusted),
            None => {
                let name = &self.types[type_index.index()].name;
                self.diagnostics.invalid_layout(
                    type_index,
                    name,
                    "field offset smaller than object header in inline context",
                );
                None
            }
        }
    }

    /// Width in bytes when `type_index` is a primitive or an enum, else `None`.
    fn primitive_width(&self, type_index: ManagedTypeIndex) -> Option<u32> {
        let ty = self.types.get(type_index.index())?;

        if ty.is_primitive() {
            if let Some(kind) = PrimitiveKind::from_type_name(&ty.name) {
                return Some(kind.byte_size(self.vm.pointer_size));
            }
        }

        if is_enum_type(self.types, type_index) {
            let underlying = enum_underlying_type(self.types, type_index)?;
            let name = &self.types.get(underlying.index())?.name;
            return PrimitiveKind::from_type_name(name).map(|k| k.byte_size(self.vm.pointer_size));
        }

        None
    }

    fn report_unreadable(&self, type_index: ManagedTypeIndex) {
        if let Some(ty) = self.types.get(type_index.index()) {
            self.diagnostics.invalid_layout(
                type_index,
                &ty.name,
                "pointer field outside captured memory",
            );
        }
    }
}
