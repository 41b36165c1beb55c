//! Address indices for O(log n) entity resolution.
//!
//! Entity arrays in a capture are not sorted by address. Every pointer the decoder
//! dereferences has to answer "which entity lives at this address?", so the
//! initialize step builds one sorted `(address, array position)` projection per
//! entity category and resolves lookups by binary search. A fifth projection maps
//! runtime type-info addresses to managed types, which is how object headers are
//! resolved back to their type.
//!
//! Lookups return [`Option`]: an address outside any known range is a routine
//! outcome when analyzing a snapshot (pointers into uncaptured memory), never an
//! error.
//!
//! Build is O(n log n) per category; the per-category sorts run in parallel.

use rayon::join;

use crate::snapshot::entities::{
    GcHandleIndex, ManagedObjectIndex, ManagedTypeIndex, MemorySection, NativeObjectIndex,
    SectionIndex,
};

/// Sorted-array + binary-search index over every addressable entity category.
///
/// Built once from the raw entity arrays during
/// [`Snapshot::initialize`](crate::snapshot::Snapshot::initialize) and immutable
/// afterwards.
#[derive(Debug)]
pub struct AddressIndex {
    /// `(target_address, handle position)`, sorted.
    gc_handles: Vec<(u64, u32)>,
    /// `(object address, object position)`, sorted.
    managed_objects: Vec<(u64, u32)>,
    /// `(object address, object position)`, sorted.
    native_objects: Vec<(u64, u32)>,
    /// `(start, end, section position)`, sorted by start.
    sections: Vec<(u64, u64, u32)>,
    /// `(type info address, type position)`, sorted.
    type_infos: Vec<(u64, u32)>,
}

fn sorted_projection(addresses: impl Iterator<Item = u64>) -> Vec<(u64, u32)> {
    let mut projection: Vec<(u64, u32)> = addresses
        .enumerate()
        .map(|(index, address)| (address, index as u32))
        .collect();
    projection.sort_unstable();
    projection
}

/// Exact-match lookup in a sorted projection. When several entities share an
/// address, the one with the lowest array position wins, keeping results stable
/// run-to-run.
fn find_exact(projection: &[(u64, u32)], address: u64) -> Option<u32> {
    let first = projection.partition_point(|&(a, _)| a < address);
    match projection.get(first) {
        Some(&(a, index)) if a == address => Some(index),
        _ => None,
    }
}

impl AddressIndex {
    /// Build all projections from the raw entity arrays.
    pub(crate) fn build(
        gc_handle_targets: &[u64],
        managed_object_addresses: &[u64],
        native_object_addresses: &[u64],
        sections: &[MemorySection],
        type_info_addresses: &[u64],
    ) -> AddressIndex {
        let ((gc_handles, managed_objects), (native_objects, type_infos)) = join(
            || {
                join(
                    || sorted_projection(gc_handle_targets.iter().copied()),
                    || sorted_projection(managed_object_addresses.iter().copied()),
                )
            },
            || {
                join(
                    || sorted_projection(native_object_addresses.iter().copied()),
                    || sorted_projection(type_info_addresses.iter().copied()),
                )
            },
        );

        let mut section_ranges: Vec<(u64, u64, u32)> = sections
            .iter()
            .enumerate()
            .map(|(index, s)| (s.start_address, s.end_address(), index as u32))
            .collect();
        section_ranges.sort_unstable();

        AddressIndex {
            gc_handles,
            managed_objects,
            native_objects,
            sections: section_ranges,
            type_infos,
        }
    }

    /// The GC handle whose target is exactly `address`.
    #[must_use]
    pub fn find_gc_handle(&self, address: u64) -> Option<GcHandleIndex> {
        find_exact(&self.gc_handles, address).map(GcHandleIndex::new)
    }

    /// The managed object starting exactly at `address`.
    #[must_use]
    pub fn find_managed_object(&self, address: u64) -> Option<ManagedObjectIndex> {
        find_exact(&self.managed_objects, address).map(ManagedObjectIndex::new)
    }

    /// The native object at exactly `address`.
    #[must_use]
    pub fn find_native_object(&self, address: u64) -> Option<NativeObjectIndex> {
        find_exact(&self.native_objects, address).map(NativeObjectIndex::new)
    }

    /// The managed type whose runtime type-info structure lives at `address`.
    ///
    /// Object headers carry a pointer to their type's info structure; this is the
    /// index that turns such a pointer back into a type.
    #[must_use]
    pub fn find_managed_type_by_type_info(&self, address: u64) -> Option<ManagedTypeIndex> {
        find_exact(&self.type_infos, address).map(ManagedTypeIndex::new)
    }

    /// The memory section whose `[start, end)` range contains `address`.
    #[must_use]
    pub fn find_section(&self, address: u64) -> Option<SectionIndex> {
        let candidate = self.sections.partition_point(|&(start, _, _)| start <= address);
        let &(start, end, index) = self.sections.get(candidate.checked_sub(1)?)?;

        (address >= start && address < end).then(|| SectionIndex::new(index))
    }

    /// All managed objects whose address falls in `[start, end)`, in ascending
    /// address order.
    ///
    /// Used for the section occupancy view.
    #[must_use]
    pub fn managed_objects_in_range(&self, start: u64, end: u64) -> Vec<ManagedObjectIndex> {
        let lo = self.managed_objects.partition_point(|&(a, _)| a < start);
        let hi = self.managed_objects.partition_point(|&(a, _)| a < end);

        self.managed_objects[lo..hi]
            .iter()
            .map(|&(_, index)| ManagedObjectIndex::new(index))
            .collect()
    }
}
