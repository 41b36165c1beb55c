//! Duplicate object detection by structural content hash.
//!
//! A single linear pass hashes every reference-type managed object and buckets
//! them by [`ContentHash`]. Objects whose in-scope bytes are identical land in
//! the same bucket; buckets with at least two members are duplicate groups. All
//! but one instance per group could theoretically be interned or shared, so the
//! report prices each group at `(members - 1) × object size` of wasted memory.
//!
//! Value types and primitives are deliberately excluded: only reference types
//! are independently allocated, so only they are actionable as duplicates. The
//! restriction mirrors the capture tooling this format derives from.
//!
//! The hash pass is the most expensive whole-heap analysis in the crate; it runs
//! in parallel and honors a cooperative stop flag checked once per object.
//! Objects whose type layout cannot be resolved are skipped and surfaced as one
//! aggregated diagnostic, never as per-object errors.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;

use crate::{
    heap::hash::ContentHash,
    snapshot::{
        diagnostics::DiagnosticCategory,
        entities::{ManagedObjectIndex, ManagedTypeIndex},
        Snapshot,
    },
};

/// A set of structurally identical reference-type objects.
#[derive(Debug, Clone)]
pub struct DuplicateGroup {
    /// The shared content hash.
    pub hash: ContentHash,
    /// Members in entity-array order; always at least two.
    pub objects: Vec<ManagedObjectIndex>,
    /// The shared type of all members.
    pub managed_type: ManagedTypeIndex,
    /// Bytes of one member.
    pub object_size: u64,
    /// `(members - 1) × object_size`.
    pub wasted_bytes: u64,
}

/// Result of a duplicate scan.
#[derive(Debug, Clone, Default)]
pub struct DuplicateReport {
    /// Duplicate groups, largest waste first; ties in entity-array order.
    pub groups: Vec<DuplicateGroup>,
    /// Sum of wasted bytes over all groups.
    pub total_wasted_bytes: u64,
    /// Objects skipped because their layout could not be resolved.
    pub skipped_objects: usize,
    /// Whether the scan was cut short by the stop flag.
    pub stopped: bool,
}

/// Scan all managed objects and group structural duplicates.
///
/// `stop` is advisory: it is checked once per object, and a stopped scan
/// returns the (incomplete) groups found so far with
/// [`DuplicateReport::stopped`] set.
#[must_use]
pub fn find_duplicates(snapshot: &Snapshot, stop: Option<&AtomicBool>) -> DuplicateReport {
    let reader = snapshot.reader();
    let types = snapshot.managed_types();

    // Hash in parallel, collect in entity-array order so grouping stays
    // deterministic. None entries are objects that were filtered or skipped.
    let hashes: Vec<Option<(ManagedObjectIndex, ContentHash)>> = snapshot
        .managed_objects()
        .par_iter()
        .enumerate()
        .map(|(index, object)| {
            if stop.is_some_and(|s| s.load(Ordering::Relaxed)) {
                return None;
            }
            if object.address == 0 {
                return None;
            }

            let ty = types.get(object.managed_type.index())?;
            if ty.is_value_type() || ty.is_primitive() {
                return None;
            }

            reader
                .compute_object_hash(object.address, object.managed_type)
                .map(|hash| (ManagedObjectIndex::new(index as u32), hash))
        })
        .collect();

    let stopped = stop.is_some_and(|s| s.load(Ordering::Relaxed));

    let mut eligible = 0_usize;
    let mut buckets: HashMap<ContentHash, Vec<ManagedObjectIndex>> = HashMap::new();
    for entry in hashes.into_iter().flatten() {
        let (index, hash) = entry;
        eligible += 1;
        buckets.entry(hash).or_default().push(index);
    }

    // Everything reference-typed that produced no hash was skipped for layout
    // reasons; report the aggregate once.
    let reference_typed = snapshot
        .managed_objects()
        .iter()
        .filter(|object| {
            object.address != 0
                && types
                    .get(object.managed_type.index())
                    .is_some_and(|t| !t.is_value_type() && !t.is_primitive())
        })
        .count();
    let skipped_objects = if stopped {
        0
    } else {
        reference_typed - eligible
    };
    if skipped_objects > 0 {
        snapshot.diagnostics().warning(
            DiagnosticCategory::Object,
            format!("{skipped_objects} objects skipped during duplicate scan (unresolvable layout)"),
        );
    }

    let mut groups: Vec<DuplicateGroup> = buckets
        .into_iter()
        .filter(|(_, objects)| objects.len() >= 2)
        .map(|(hash, objects)| {
            let first = &snapshot.managed_objects()[objects[0].index()];
            let object_size = u64::from(first.size.unwrap_or(0)).max(
                reader
                    .read_object_size(first.address, first.managed_type)
                    .unwrap_or(0),
            );
            let wasted_bytes = (objects.len() as u64 - 1) * object_size;

            DuplicateGroup {
                hash,
                managed_type: first.managed_type,
                object_size,
                wasted_bytes,
                objects,
            }
        })
        .collect();

    groups.sort_by(|a, b| {
        b.wasted_bytes
            .cmp(&a.wasted_bytes)
            .then_with(|| a.objects[0].cmp(&b.objects[0]))
    });

    let total_wasted_bytes = groups.iter().map(|g| g.wasted_bytes).sum();

    DuplicateReport {
        groups,
        total_wasted_bytes,
        skipped_objects,
        stopped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::fixtures::{SectionWriter, SnapshotBuilder, TypeTableBuilder};

    /// Ten objects with value (1,1,1) and one outlier (2,1,1); `Vec3` here is a
    /// reference type carrying three floats.
    fn vec3_snapshot() -> (Snapshot, crate::snapshot::entities::ManagedTypeIndex) {
        let mut builder = TypeTableBuilder::new();
        let single = builder.primitive("System.Single");
        let vec3 = builder.class(
            "Vec3",
            &[
                ("x", 16, single, false),
                ("y", 20, single, false),
                ("z", 24, single, false),
            ],
        );
        builder.set_size(vec3, 28);
        let types = builder.build();

        let mut section = SectionWriter::new(0x1000);
        let mut snapshot = SnapshotBuilder::new(types);

        for i in 0..10_u64 {
            let base = i as usize * 0x100;
            section.put_f32(base + 16, 1.0);
            section.put_f32(base + 20, 1.0);
            section.put_f32(base + 24, 1.0);
        }
        let outlier_base = 10 * 0x100;
        section.put_f32(outlier_base + 16, 2.0);
        section.put_f32(outlier_base + 20, 1.0);
        section.put_f32(outlier_base + 24, 1.0);

        snapshot.section(section.finish());
        for i in 0..11_u64 {
            snapshot.sized_object(0x1000 + i * 0x100, vec3, 28);
        }

        (snapshot.build(), vec3)
    }

    #[test]
    fn groups_identical_objects_and_excludes_outlier() {
        let (snapshot, vec3) = vec3_snapshot();
        let report = snapshot.find_duplicates(None);

        assert_eq!(report.groups.len(), 1);
        let group = &report.groups[0];
        assert_eq!(group.objects.len(), 10);
        assert_eq!(group.managed_type, vec3);
        assert!(!group
            .objects
            .contains(&ManagedObjectIndex::new(10)), "outlier excluded");

        // Nine redundant copies of 28 bytes
        assert_eq!(group.object_size, 28);
        assert_eq!(group.wasted_bytes, 9 * 28);
        assert_eq!(report.total_wasted_bytes, 9 * 28);
        assert!(!report.stopped);
    }

    #[test]
    fn singleton_buckets_are_discarded() {
        let mut builder = TypeTableBuilder::new();
        let int32 = builder.primitive("System.Int32");
        let foo = builder.class("Foo", &[("x", 16, int32, false)]);
        let types = builder.build();

        let mut section = SectionWriter::new(0x1000);
        section.put_i32(16, 1);
        section.put_i32(0x100 + 16, 2);

        let mut snapshot = SnapshotBuilder::new(types);
        snapshot.section(section.finish());
        snapshot.object(0x1000, foo);
        snapshot.object(0x1100, foo);
        let snapshot = snapshot.build();

        let report = snapshot.find_duplicates(None);
        assert!(report.groups.is_empty());
        assert_eq!(report.total_wasted_bytes, 0);
    }

    #[test]
    fn value_types_and_primitives_are_excluded() {
        let mut builder = TypeTableBuilder::new();
        let single = builder.primitive("System.Single");
        let vec3_struct = builder.value_type(
            "Vec3Struct",
            &[("x", 16, single, false), ("y", 20, single, false)],
        );
        let types = builder.build();

        let mut section = SectionWriter::new(0x1000);
        for base in [0_usize, 0x100] {
            section.put_f32(base + 16, 1.0);
            section.put_f32(base + 20, 1.0);
        }

        let mut snapshot = SnapshotBuilder::new(types);
        snapshot.section(section.finish());
        snapshot.object(0x1000, vec3_struct);
        snapshot.object(0x1100, vec3_struct);
        let snapshot = snapshot.build();

        let report = snapshot.find_duplicates(None);
        assert!(
            report.groups.is_empty(),
            "boxed value types do not participate in duplicate detection"
        );
    }

    #[test]
    fn objects_of_different_types_never_share_a_group() {
        let mut builder = TypeTableBuilder::new();
        let int32 = builder.primitive("System.Int32");
        let foo = builder.class("Foo", &[("x", 16, int32, false)]);
        let bar = builder.class("Bar", &[("x", 16, int32, false)]);
        let types = builder.build();

        let mut section = SectionWriter::new(0x1000);
        for base in [0_usize, 0x100, 0x200, 0x300] {
            section.put_i32(base + 16, 5);
        }

        let mut snapshot = SnapshotBuilder::new(types);
        snapshot.section(section.finish());
        snapshot.object(0x1000, foo);
        snapshot.object(0x1100, foo);
        snapshot.object(0x1200, bar);
        snapshot.object(0x1300, bar);
        let snapshot = snapshot.build();

        let report = snapshot.find_duplicates(None);
        assert_eq!(report.groups.len(), 2);
        for group in &report.groups {
            let first_type = snapshot.managed_objects()[group.objects[0].index()].managed_type;
            assert!(group
                .objects
                .iter()
                .all(|o| snapshot.managed_objects()[o.index()].managed_type == first_type));
        }
    }

    #[test]
    fn unresolvable_objects_are_skipped_with_aggregate_diagnostic() {
        let mut builder = TypeTableBuilder::new();
        let int32 = builder.primitive("System.Int32");
        // Layout reads far past the captured section
        let broken = builder.class("Broken", &[("x", 0x8000, int32, false)]);
        let ok = builder.class("Ok", &[("x", 16, int32, false)]);
        let types = builder.build();

        let mut section = SectionWriter::new(0x1000);
        section.put_i32(16, 5);
        section.put_i32(0x100 + 16, 5);

        let mut snapshot = SnapshotBuilder::new(types);
        snapshot.section(section.finish());
        snapshot.object(0x1000, ok);
        snapshot.object(0x1100, ok);
        snapshot.object(0x1000, broken);
        snapshot.object(0x1100, broken);
        let snapshot = snapshot.build();

        let before = snapshot.diagnostics().len();
        let report = snapshot.find_duplicates(None);

        assert_eq!(report.groups.len(), 1, "healthy type still grouped");
        assert_eq!(report.skipped_objects, 2);
        assert!(snapshot.diagnostics().len() > before);
    }

    #[test]
    fn stop_flag_short_circuits() {
        let (snapshot, _) = vec3_snapshot();
        let stop = AtomicBool::new(true);

        let report = snapshot.find_duplicates(Some(&stop));
        assert!(report.stopped);
        assert!(report.groups.is_empty());
    }
}
