//! Binary snapshot container decoding.
//!
//! A capture file is an opaque little-endian container produced by the capture
//! step. The layout is a fixed header followed by per-category chapters, each
//! length-prefixed:
//!
//! ```text
//! magic            b"HSNP"
//! version          u32 (currently 1)
//! vm info          6 x u32
//! sections         count, then per section: start u64, len u64, bytes
//! managed types    count, then per type: name, flags u32, size i32,
//!                  type info address u64, base-or-element i32, array rank u8,
//!                  fields (count, then name, offset u32, type u32, static u8),
//!                  static blob (len u32, bytes)
//! native types     count, then per type: name, base i32
//! native objects   count, then per object: name, address u64, size u64,
//!                  type u32, instance id i32, flags u8, hide flags u8
//! gc handles       count, then per handle: target address u64
//! managed objects  count, then per object: address u64, type u32, size u32
//!                  (0xFFFF_FFFF when the capture did not record a size)
//! ```
//!
//! Strings are `u32`-length-prefixed UTF-8. Index sentinels (`-1`) on the wire
//! are converted to [`Option`] at this boundary; nothing above this module ever
//! sees a sentinel integer.
//!
//! Structural corruption is detected here and in
//! [`Snapshot::initialize`](crate::snapshot::Snapshot::initialize) and reported
//! as a single fatal [`crate::Error`], rather than surfacing as thousands of
//! downstream lookup misses.

use crate::{
    file::parser::Parser,
    snapshot::{
        entities::{
            HideFlags, ManagedObject, ManagedTypeIndex, MemorySection, NativeObject,
            NativeObjectFlags, NativeTypeIndex,
        },
        types::{
            FieldDescription, ManagedType, ManagedTypeFlags, NativeType, VirtualMachineInfo,
        },
        RawSnapshot,
    },
    Error::NotSupported,
    Result,
};

/// Magic bytes at the start of every snapshot container.
pub const CONTAINER_MAGIC: [u8; 4] = *b"HSNP";

/// The container format version this crate understands.
pub const CONTAINER_VERSION: u32 = 1;

/// Smallest possible encoding of one record per chapter, used to reject
/// implausible chapter counts before allocating.
const MIN_SECTION_BYTES: usize = 16;
const MIN_TYPE_BYTES: usize = 29;
const MIN_NATIVE_TYPE_BYTES: usize = 8;
const MIN_NATIVE_OBJECT_BYTES: usize = 30;
const MIN_GC_HANDLE_BYTES: usize = 8;
const MIN_MANAGED_OBJECT_BYTES: usize = 16;

fn read_count(parser: &mut Parser<'_>, min_record_bytes: usize, what: &str) -> Result<usize> {
    let count = parser.read_le::<u32>()? as usize;

    // A count that cannot possibly fit in the remaining bytes means the file is
    // corrupt; fail before reserving memory for it.
    let Some(required) = count.checked_mul(min_record_bytes) else {
        return Err(malformed_error!("Implausible {} count {}", what, count));
    };
    if required > parser.remaining() {
        return Err(malformed_error!(
            "{} chapter declares {} records but only {} bytes remain",
            what,
            count,
            parser.remaining()
        ));
    }

    Ok(count)
}

fn read_optional_index(parser: &mut Parser<'_>, bound: usize, what: &str) -> Result<Option<u32>> {
    let raw = parser.read_le::<i32>()?;
    if raw < 0 {
        return Ok(None);
    }

    let index = raw as usize;
    if index >= bound {
        return Err(malformed_error!(
            "{} index {} out of range (have {})",
            what,
            index,
            bound
        ));
    }

    Ok(Some(raw as u32))
}

fn read_index(parser: &mut Parser<'_>, bound: usize, what: &str) -> Result<u32> {
    let raw = parser.read_le::<u32>()?;
    if raw as usize >= bound {
        return Err(malformed_error!(
            "{} index {} out of range (have {})",
            what,
            raw,
            bound
        ));
    }

    Ok(raw)
}

/// Decode a snapshot container from a byte buffer.
pub(crate) fn parse(data: &[u8]) -> Result<RawSnapshot> {
    if data.is_empty() {
        return Err(crate::Error::Empty);
    }

    let mut parser = Parser::new(data);

    let magic = parser.read_bytes(4)?;
    if magic != CONTAINER_MAGIC {
        return Err(malformed_error!(
            "Bad container magic {:02x?} (expected {:02x?})",
            magic,
            CONTAINER_MAGIC
        ));
    }

    let version = parser.read_le::<u32>()?;
    if version != CONTAINER_VERSION {
        return Err(NotSupported);
    }

    let vm = VirtualMachineInfo {
        pointer_size: parser.read_le::<u32>()?,
        object_header_size: parser.read_le::<u32>()?,
        array_header_size: parser.read_le::<u32>()?,
        array_bounds_offset_in_header: parser.read_le::<u32>()?,
        array_size_offset_in_header: parser.read_le::<u32>()?,
        allocation_granularity: parser.read_le::<u32>()?,
    };
    vm.validate()?;

    let sections = parse_sections(&mut parser)?;
    let managed_types = parse_managed_types(&mut parser)?;
    let native_types = parse_native_types(&mut parser)?;
    let native_objects = parse_native_objects(&mut parser, native_types.len())?;
    let gc_handle_targets = parse_gc_handles(&mut parser)?;
    let managed_objects = parse_managed_objects(&mut parser, managed_types.len())?;

    Ok(RawSnapshot {
        vm,
        sections,
        managed_types,
        native_types,
        native_objects,
        gc_handle_targets,
        managed_objects,
    })
}

fn parse_sections(parser: &mut Parser<'_>) -> Result<Vec<MemorySection>> {
    let count = read_count(parser, MIN_SECTION_BYTES, "section")?;

    let mut sections = Vec::with_capacity(count);
    for _ in 0..count {
        let start_address = parser.read_le::<u64>()?;
        let len = parser.read_le::<u64>()?;

        let Ok(len) = usize::try_from(len) else {
            return Err(malformed_error!("Section length {} does not fit memory", len));
        };

        let bytes = parser.read_bytes(len)?.to_vec();
        sections.push(MemorySection {
            start_address,
            bytes,
        });
    }

    Ok(sections)
}

fn parse_managed_types(parser: &mut Parser<'_>) -> Result<Vec<ManagedType>> {
    let count = read_count(parser, MIN_TYPE_BYTES, "managed type")?;

    let mut types = Vec::with_capacity(count);
    for _ in 0..count {
        let name = parser.read_prefixed_string_utf8()?;
        let flags = ManagedTypeFlags::from_bits_truncate(parser.read_le::<u32>()?);
        let size = parser.read_le::<i32>()?;
        let type_info_address = parser.read_le::<u64>()?;
        let base_or_element_type = read_optional_index(parser, count, "base-or-element type")?
            .map(ManagedTypeIndex::new);
        let rank = parser.read_le::<u8>()?;

        let array_rank = if flags.contains(ManagedTypeFlags::ARRAY) {
            if rank == 0 {
                return Err(malformed_error!("Array type '{}' with rank 0", name));
            }
            Some(rank)
        } else {
            None
        };

        let field_count = read_count(parser, 13, "field")?;
        let mut fields = Vec::with_capacity(field_count);
        for _ in 0..field_count {
            let field_name = parser.read_prefixed_string_utf8()?;
            let offset = parser.read_le::<u32>()?;
            let managed_type =
                ManagedTypeIndex::new(read_index(parser, count, "field type")?);
            let is_static = parser.read_le::<u8>()? != 0;

            fields.push(FieldDescription {
                name: field_name,
                offset,
                managed_type,
                is_static,
            });
        }

        let blob_len = parser.read_le::<u32>()? as usize;
        let static_field_bytes = parser.read_bytes(blob_len)?.to_vec();

        types.push(ManagedType {
            name,
            flags,
            size,
            type_info_address,
            base_or_element_type,
            array_rank,
            fields,
            static_field_bytes,
        });
    }

    Ok(types)
}

fn parse_native_types(parser: &mut Parser<'_>) -> Result<Vec<NativeType>> {
    let count = read_count(parser, MIN_NATIVE_TYPE_BYTES, "native type")?;

    let mut types = Vec::with_capacity(count);
    for _ in 0..count {
        let name = parser.read_prefixed_string_utf8()?;
        let base = read_optional_index(parser, count, "native base type")?.map(NativeTypeIndex::new);

        types.push(NativeType { name, base });
    }

    Ok(types)
}

fn parse_native_objects(parser: &mut Parser<'_>, type_count: usize) -> Result<Vec<NativeObject>> {
    let count = read_count(parser, MIN_NATIVE_OBJECT_BYTES, "native object")?;

    let mut objects = Vec::with_capacity(count);
    for _ in 0..count {
        let name = parser.read_prefixed_string_utf8()?;
        let address = parser.read_le::<u64>()?;
        let size = parser.read_le::<u64>()?;
        let native_type = NativeTypeIndex::new(read_index(parser, type_count, "native object type")?);
        let instance_id = parser.read_le::<i32>()?;
        let flags = NativeObjectFlags::from_bits_truncate(parser.read_le::<u8>()?);
        let hide_flags = HideFlags::from_bits_truncate(parser.read_le::<u8>()?);

        objects.push(NativeObject {
            name,
            address,
            size,
            native_type,
            instance_id,
            flags,
            hide_flags,
            managed_object: None,
        });
    }

    Ok(objects)
}

fn parse_gc_handles(parser: &mut Parser<'_>) -> Result<Vec<u64>> {
    let count = read_count(parser, MIN_GC_HANDLE_BYTES, "gc handle")?;

    let mut targets = Vec::with_capacity(count);
    for _ in 0..count {
        targets.push(parser.read_le::<u64>()?);
    }

    Ok(targets)
}

fn parse_managed_objects(parser: &mut Parser<'_>, type_count: usize) -> Result<Vec<ManagedObject>> {
    let count = read_count(parser, MIN_MANAGED_OBJECT_BYTES, "managed object")?;

    let mut objects = Vec::with_capacity(count);
    for _ in 0..count {
        let address = parser.read_le::<u64>()?;
        let managed_type =
            ManagedTypeIndex::new(read_index(parser, type_count, "managed object type")?);
        let raw_size = parser.read_le::<u32>()?;
        let size = (raw_size != u32::MAX).then_some(raw_size);

        objects.push(ManagedObject {
            address,
            managed_type,
            size,
            gc_handle: None,
            native_object: None,
        });
    }

    Ok(objects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::fixtures::ContainerWriter;

    #[test]
    fn empty_input() {
        assert!(matches!(parse(&[]), Err(crate::Error::Empty)));
    }

    #[test]
    fn bad_magic() {
        let data = b"NOPE\x01\x00\x00\x00";
        assert!(matches!(
            parse(data),
            Err(crate::Error::Malformed { .. })
        ));
    }

    #[test]
    fn unsupported_version() {
        let mut writer = ContainerWriter::new();
        writer.version = 99;
        let data = writer.finish();
        assert!(matches!(parse(&data), Err(NotSupported)));
    }

    #[test]
    fn minimal_container_round_trip() {
        let data = ContainerWriter::new().finish();
        let raw = parse(&data).unwrap();

        assert_eq!(raw.vm.pointer_size, 8);
        assert!(raw.sections.is_empty());
        assert!(raw.managed_types.is_empty());
        assert!(raw.managed_objects.is_empty());
    }

    #[test]
    fn section_bytes_survive() {
        let mut writer = ContainerWriter::new();
        writer.section(0x1000, vec![1, 2, 3, 4]);
        let raw = parse(&writer.finish()).unwrap();

        assert_eq!(raw.sections.len(), 1);
        assert_eq!(raw.sections[0].start_address, 0x1000);
        assert_eq!(raw.sections[0].bytes, vec![1, 2, 3, 4]);
    }

    #[test]
    fn truncated_chapter_is_rejected() {
        let mut writer = ContainerWriter::new();
        writer.section(0x1000, vec![0; 64]);
        let mut data = writer.finish();
        data.truncate(data.len() - 10);

        assert!(matches!(parse(&data), Err(crate::Error::OutOfBounds)));
    }

    #[test]
    fn implausible_count_is_rejected_before_allocation() {
        let mut data = ContainerWriter::new().finish_header_only();
        // Claim u32::MAX sections with no bytes behind the claim
        data.extend_from_slice(&u32::MAX.to_le_bytes());

        assert!(matches!(parse(&data), Err(crate::Error::Malformed { .. })));
    }

    #[test]
    fn field_type_out_of_range_is_rejected() {
        let mut writer = ContainerWriter::new();
        writer.raw_type("Broken", 0, 8, 0xAA00, -1, 0, &[("f", 16, 7, false)], &[]);
        assert!(matches!(
            parse(&writer.finish()),
            Err(crate::Error::Malformed { .. })
        ));
    }

    #[test]
    fn unknown_size_becomes_none() {
        let mut writer = ContainerWriter::new();
        writer.raw_type("System.Object", 0, 16, 0xAA00, -1, 0, &[], &[]);
        writer.managed_object(0x1000, 0, u32::MAX);
        let raw = parse(&writer.finish()).unwrap();

        assert_eq!(raw.managed_objects[0].size, None);
    }
}
