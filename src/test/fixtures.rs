//! Builders for synthetic snapshots used across the test suite.
//!
//! Real captures are large and opaque; tests instead compose small heaps byte by
//! byte: a type table, memory sections with hand-placed objects, and optionally a
//! fully analyzed [`Snapshot`]. The builders mirror the layout conventions the
//! decoder expects (boxed field offsets, array headers, static blobs).

use crate::{
    heap::reader::MemoryReader,
    snapshot::{
        diagnostics::Diagnostics,
        entities::{
            GcHandleIndex, HideFlags, ManagedObject, ManagedObjectIndex, ManagedTypeIndex,
            MemorySection, NativeObject, NativeObjectFlags, NativeTypeIndex,
        },
        format::{CONTAINER_MAGIC, CONTAINER_VERSION},
        index::AddressIndex,
        types::{
            FieldDescription, ManagedType, ManagedTypeFlags, NativeType, PrimitiveKind,
            VirtualMachineInfo,
        },
        RawSnapshot, Snapshot,
    },
};

/// The virtual machine layout all fixtures assume: 64-bit pointers, 16 byte
/// object headers, 32 byte array headers with bounds at +16 and size at +24.
pub(crate) fn default_vm() -> VirtualMachineInfo {
    VirtualMachineInfo {
        pointer_size: 8,
        object_header_size: 16,
        array_header_size: 32,
        array_bounds_offset_in_header: 16,
        array_size_offset_in_header: 24,
        allocation_granularity: 8,
    }
}

/// Builds a managed type table, assigning each type a unique type-info address.
pub(crate) struct TypeTableBuilder {
    types: Vec<ManagedType>,
}

fn fields_from(specs: &[(&str, u32, ManagedTypeIndex, bool)]) -> Vec<FieldDescription> {
    specs
        .iter()
        .map(|&(name, offset, managed_type, is_static)| FieldDescription {
            name: name.into(),
            offset,
            managed_type,
            is_static,
        })
        .collect()
}

impl TypeTableBuilder {
    pub(crate) fn new() -> Self {
        TypeTableBuilder { types: Vec::new() }
    }

    fn push(&mut self, ty: ManagedType) -> ManagedTypeIndex {
        let index = ManagedTypeIndex::new(self.types.len() as u32);
        self.types.push(ty);
        index
    }

    fn next_type_info(&self) -> u64 {
        0x7F00_0000 + self.types.len() as u64 * 0x100
    }

    pub(crate) fn primitive(&mut self, name: &str) -> ManagedTypeIndex {
        let size = PrimitiveKind::from_type_name(name)
            .map_or(8, |k| k.byte_size(8)) as i32;
        let type_info_address = self.next_type_info();
        self.push(ManagedType {
            name: name.into(),
            flags: ManagedTypeFlags::VALUE_TYPE | ManagedTypeFlags::PRIMITIVE,
            size,
            type_info_address,
            base_or_element_type: None,
            array_rank: None,
            fields: Vec::new(),
            static_field_bytes: Vec::new(),
        })
    }

    pub(crate) fn class(
        &mut self,
        name: &str,
        fields: &[(&str, u32, ManagedTypeIndex, bool)],
    ) -> ManagedTypeIndex {
        let type_info_address = self.next_type_info();
        self.push(ManagedType {
            name: name.into(),
            flags: ManagedTypeFlags::empty(),
            size: 32,
            type_info_address,
            base_or_element_type: None,
            array_rank: None,
            fields: fields_from(fields),
            static_field_bytes: Vec::new(),
        })
    }

    pub(crate) fn class_with_base(
        &mut self,
        name: &str,
        base: ManagedTypeIndex,
        fields: &[(&str, u32, ManagedTypeIndex, bool)],
    ) -> ManagedTypeIndex {
        let index = self.class(name, fields);
        self.types[index.index()].base_or_element_type = Some(base);
        index
    }

    pub(crate) fn value_type(
        &mut self,
        name: &str,
        fields: &[(&str, u32, ManagedTypeIndex, bool)],
    ) -> ManagedTypeIndex {
        let type_info_address = self.next_type_info();
        self.push(ManagedType {
            name: name.into(),
            flags: ManagedTypeFlags::VALUE_TYPE,
            size: 16,
            type_info_address,
            base_or_element_type: None,
            array_rank: None,
            fields: fields_from(fields),
            static_field_bytes: Vec::new(),
        })
    }

    pub(crate) fn value_type_with_base(
        &mut self,
        name: &str,
        base: ManagedTypeIndex,
        fields: &[(&str, u32, ManagedTypeIndex, bool)],
    ) -> ManagedTypeIndex {
        let index = self.value_type(name, fields);
        self.types[index.index()].base_or_element_type = Some(base);
        index
    }

    pub(crate) fn string_type(&mut self) -> ManagedTypeIndex {
        let type_info_address = self.next_type_info();
        self.push(ManagedType {
            name: "System.String".into(),
            flags: ManagedTypeFlags::empty(),
            size: 24,
            type_info_address,
            base_or_element_type: None,
            array_rank: None,
            fields: Vec::new(),
            static_field_bytes: Vec::new(),
        })
    }

    pub(crate) fn array_of(&mut self, element: ManagedTypeIndex, rank: u8) -> ManagedTypeIndex {
        let name = format!(
            "{}[{}]",
            self.types[element.index()].name,
            ",".repeat(rank.saturating_sub(1) as usize)
        );
        let type_info_address = self.next_type_info();
        self.push(ManagedType {
            name,
            flags: ManagedTypeFlags::ARRAY,
            size: -1,
            type_info_address,
            base_or_element_type: Some(element),
            array_rank: Some(rank),
            fields: Vec::new(),
            static_field_bytes: Vec::new(),
        })
    }

    pub(crate) fn set_size(&mut self, index: ManagedTypeIndex, size: i32) {
        self.types[index.index()].size = size;
    }

    pub(crate) fn set_static_bytes(&mut self, index: ManagedTypeIndex, bytes: Vec<u8>) {
        self.types[index.index()].static_field_bytes = bytes;
    }

    pub(crate) fn build(self) -> Vec<ManagedType> {
        self.types
    }
}

/// Composes the bytes of one memory section, growing as values are placed.
pub(crate) struct SectionWriter {
    start: u64,
    bytes: Vec<u8>,
}

impl SectionWriter {
    pub(crate) fn new(start: u64) -> Self {
        SectionWriter {
            start,
            bytes: Vec::new(),
        }
    }

    fn ensure(&mut self, end: usize) {
        if self.bytes.len() < end {
            self.bytes.resize(end, 0);
        }
    }

    fn put_bytes(&mut self, offset: usize, value: &[u8]) {
        self.ensure(offset + value.len());
        self.bytes[offset..offset + value.len()].copy_from_slice(value);
    }

    pub(crate) fn put_u8(&mut self, offset: usize, value: u8) {
        self.put_bytes(offset, &[value]);
    }

    pub(crate) fn put_u16(&mut self, offset: usize, value: u16) {
        self.put_bytes(offset, &value.to_le_bytes());
    }

    pub(crate) fn put_i32(&mut self, offset: usize, value: i32) {
        self.put_bytes(offset, &value.to_le_bytes());
    }

    pub(crate) fn put_u32(&mut self, offset: usize, value: u32) {
        self.put_bytes(offset, &value.to_le_bytes());
    }

    pub(crate) fn put_i64(&mut self, offset: usize, value: i64) {
        self.put_bytes(offset, &value.to_le_bytes());
    }

    pub(crate) fn put_u64(&mut self, offset: usize, value: u64) {
        self.put_bytes(offset, &value.to_le_bytes());
    }

    pub(crate) fn put_f32(&mut self, offset: usize, value: f32) {
        self.put_bytes(offset, &value.to_le_bytes());
    }

    pub(crate) fn put_f64(&mut self, offset: usize, value: f64) {
        self.put_bytes(offset, &value.to_le_bytes());
    }

    /// Place an object header: a pointer to the type's runtime type info.
    pub(crate) fn put_object_header(&mut self, offset: usize, ty: &ManagedType) {
        self.put_u64(offset, ty.type_info_address);
    }

    pub(crate) fn finish(self) -> MemorySection {
        MemorySection {
            start_address: self.start,
            bytes: self.bytes,
        }
    }
}

/// A minimal decoding context: type table, sections and the address index, but
/// no connection analysis. Used by reader-level unit tests.
pub(crate) struct FixtureHeap {
    pub(crate) vm: VirtualMachineInfo,
    pub(crate) types: Vec<ManagedType>,
    pub(crate) sections: Vec<MemorySection>,
    pub(crate) index: AddressIndex,
    pub(crate) diagnostics: Diagnostics,
}

impl FixtureHeap {
    pub(crate) fn new(
        vm: VirtualMachineInfo,
        types: Vec<ManagedType>,
        sections: Vec<MemorySection>,
        objects: Vec<(u64, ManagedTypeIndex)>,
    ) -> Self {
        let object_addresses: Vec<u64> = objects.iter().map(|&(a, _)| a).collect();
        let type_infos: Vec<u64> = types.iter().map(|t| t.type_info_address).collect();
        let index = AddressIndex::build(&[], &object_addresses, &[], &sections, &type_infos);

        FixtureHeap {
            vm,
            types,
            sections,
            index,
            diagnostics: Diagnostics::new(),
        }
    }

    pub(crate) fn reader(&self) -> MemoryReader<'_> {
        MemoryReader::heap(
            &self.vm,
            &self.sections,
            &self.types,
            &self.index,
            &self.diagnostics,
        )
    }

    pub(crate) fn static_reader<'a>(&'a self, blob: &'a [u8]) -> MemoryReader<'a> {
        MemoryReader::static_blob(
            &self.vm,
            &self.sections,
            &self.types,
            &self.index,
            &self.diagnostics,
            blob,
        )
    }
}

/// Builds a [`RawSnapshot`] and runs it through
/// [`Snapshot::initialize`](crate::snapshot::Snapshot::initialize). This is the
/// fixture for graph, root path, duplicate and expansion tests.
pub(crate) struct SnapshotBuilder {
    vm: VirtualMachineInfo,
    types: Vec<ManagedType>,
    sections: Vec<MemorySection>,
    native_types: Vec<NativeType>,
    native_objects: Vec<NativeObject>,
    gc_handle_targets: Vec<u64>,
    managed_objects: Vec<ManagedObject>,
}

impl SnapshotBuilder {
    pub(crate) fn new(types: Vec<ManagedType>) -> Self {
        SnapshotBuilder {
            vm: default_vm(),
            types,
            sections: Vec::new(),
            native_types: Vec::new(),
            native_objects: Vec::new(),
            gc_handle_targets: Vec::new(),
            managed_objects: Vec::new(),
        }
    }

    pub(crate) fn section(&mut self, section: MemorySection) -> &mut Self {
        self.sections.push(section);
        self
    }

    pub(crate) fn object(&mut self, address: u64, ty: ManagedTypeIndex) -> ManagedObjectIndex {
        let index = ManagedObjectIndex::new(self.managed_objects.len() as u32);
        self.managed_objects.push(ManagedObject {
            address,
            managed_type: ty,
            size: None,
            gc_handle: None,
            native_object: None,
        });
        index
    }

    pub(crate) fn sized_object(
        &mut self,
        address: u64,
        ty: ManagedTypeIndex,
        size: u32,
    ) -> ManagedObjectIndex {
        let index = self.object(address, ty);
        self.managed_objects[index.index()].size = Some(size);
        index
    }

    pub(crate) fn gc_handle(&mut self, target: u64) -> GcHandleIndex {
        let index = GcHandleIndex::new(self.gc_handle_targets.len() as u32);
        self.gc_handle_targets.push(target);
        index
    }

    pub(crate) fn native_type(&mut self, name: &str) -> NativeTypeIndex {
        let index = NativeTypeIndex::new(self.native_types.len() as u32);
        self.native_types.push(NativeType {
            name: name.into(),
            base: None,
        });
        index
    }

    pub(crate) fn native_object(
        &mut self,
        name: &str,
        address: u64,
        ty: NativeTypeIndex,
        flags: NativeObjectFlags,
    ) -> crate::snapshot::entities::NativeObjectIndex {
        let index =
            crate::snapshot::entities::NativeObjectIndex::new(self.native_objects.len() as u32);
        self.native_objects.push(NativeObject {
            name: name.into(),
            address,
            size: 64,
            native_type: ty,
            instance_id: index.index() as i32 + 1,
            flags,
            hide_flags: HideFlags::empty(),
            managed_object: None,
        });
        index
    }

    pub(crate) fn build(self) -> Snapshot {
        Snapshot::initialize(RawSnapshot {
            vm: self.vm,
            sections: self.sections,
            managed_types: self.types,
            native_types: self.native_types,
            native_objects: self.native_objects,
            gc_handle_targets: self.gc_handle_targets,
            managed_objects: self.managed_objects,
        })
        .expect("fixture snapshot must initialize")
    }
}

/// Serializes snapshot containers for format-level tests.
pub(crate) struct ContainerWriter {
    pub(crate) version: u32,
    vm: VirtualMachineInfo,
    sections: Vec<Vec<u8>>,
    types: Vec<Vec<u8>>,
    native_types: Vec<Vec<u8>>,
    native_objects: Vec<Vec<u8>>,
    gc_handles: Vec<Vec<u8>>,
    managed_objects: Vec<Vec<u8>>,
}

fn push_str(buffer: &mut Vec<u8>, value: &str) {
    buffer.extend_from_slice(&(value.len() as u32).to_le_bytes());
    buffer.extend_from_slice(value.as_bytes());
}

impl ContainerWriter {
    pub(crate) fn new() -> Self {
        ContainerWriter {
            version: CONTAINER_VERSION,
            vm: default_vm(),
            sections: Vec::new(),
            types: Vec::new(),
            native_types: Vec::new(),
            native_objects: Vec::new(),
            gc_handles: Vec::new(),
            managed_objects: Vec::new(),
        }
    }

    pub(crate) fn section(&mut self, start: u64, bytes: Vec<u8>) {
        let mut record = Vec::new();
        record.extend_from_slice(&start.to_le_bytes());
        record.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
        record.extend_from_slice(&bytes);
        self.sections.push(record);
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn raw_type(
        &mut self,
        name: &str,
        flags: u32,
        size: i32,
        type_info: u64,
        base: i32,
        rank: u8,
        fields: &[(&str, u32, u32, bool)],
        static_bytes: &[u8],
    ) {
        let mut record = Vec::new();
        push_str(&mut record, name);
        record.extend_from_slice(&flags.to_le_bytes());
        record.extend_from_slice(&size.to_le_bytes());
        record.extend_from_slice(&type_info.to_le_bytes());
        record.extend_from_slice(&base.to_le_bytes());
        record.push(rank);
        record.extend_from_slice(&(fields.len() as u32).to_le_bytes());
        for &(field_name, offset, ty, is_static) in fields {
            push_str(&mut record, field_name);
            record.extend_from_slice(&offset.to_le_bytes());
            record.extend_from_slice(&ty.to_le_bytes());
            record.push(u8::from(is_static));
        }
        record.extend_from_slice(&(static_bytes.len() as u32).to_le_bytes());
        record.extend_from_slice(static_bytes);
        self.types.push(record);
    }

    pub(crate) fn native_type(&mut self, name: &str, base: i32) {
        let mut record = Vec::new();
        push_str(&mut record, name);
        record.extend_from_slice(&base.to_le_bytes());
        self.native_types.push(record);
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn native_object(
        &mut self,
        name: &str,
        address: u64,
        size: u64,
        ty: u32,
        instance_id: i32,
        flags: u8,
        hide_flags: u8,
    ) {
        let mut record = Vec::new();
        push_str(&mut record, name);
        record.extend_from_slice(&address.to_le_bytes());
        record.extend_from_slice(&size.to_le_bytes());
        record.extend_from_slice(&ty.to_le_bytes());
        record.extend_from_slice(&instance_id.to_le_bytes());
        record.push(flags);
        record.push(hide_flags);
        self.native_objects.push(record);
    }

    pub(crate) fn gc_handle(&mut self, target: u64) {
        self.gc_handles.push(target.to_le_bytes().to_vec());
    }

    pub(crate) fn managed_object(&mut self, address: u64, ty: u32, size: u32) {
        let mut record = Vec::new();
        record.extend_from_slice(&address.to_le_bytes());
        record.extend_from_slice(&ty.to_le_bytes());
        record.extend_from_slice(&size.to_le_bytes());
        self.managed_objects.push(record);
    }

    pub(crate) fn finish_header_only(&self) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&CONTAINER_MAGIC);
        data.extend_from_slice(&self.version.to_le_bytes());
        for value in [
            self.vm.pointer_size,
            self.vm.object_header_size,
            self.vm.array_header_size,
            self.vm.array_bounds_offset_in_header,
            self.vm.array_size_offset_in_header,
            self.vm.allocation_granularity,
        ] {
            data.extend_from_slice(&value.to_le_bytes());
        }
        data
    }

    pub(crate) fn finish(&self) -> Vec<u8> {
        let mut data = self.finish_header_only();
        for chapter in [
            &self.sections,
            &self.types,
            &self.native_types,
            &self.native_objects,
            &self.gc_handles,
            &self.managed_objects,
        ] {
            data.extend_from_slice(&(chapter.len() as u32).to_le_bytes());
            for record in chapter {
                data.extend_from_slice(record);
            }
        }
        data
    }
}
