//! Entity model for captured heap snapshots.
//!
//! A snapshot contains five entity categories: GC handles, managed objects, native
//! engine objects, static field slots and raw memory sections. Entities are created
//! once when a capture is loaded and are immutable afterwards; every derived structure
//! (indices, connection graphs, hashes) is a pure function of this state.
//!
//! # Key Components
//!
//! - [`GcHandle`], [`ManagedObject`], [`NativeObject`], [`StaticField`],
//!   [`MemorySection`] - the entity categories
//! - [`EntityRef`] - a typed reference to any linkable entity, used as graph node
//! - [`NativeObjectFlags`] / [`HideFlags`] - native-side object state
//!
//! # Index Types
//!
//! Entity cross-links are expressed as dedicated index newtypes wrapped in [`Option`]
//! (e.g. `Option<ManagedObjectIndex>`), never as sentinel integers. The container
//! format on disk still uses `-1` sentinels for compactness; the boundary conversion
//! happens during parsing.

use std::fmt;

use bitflags::bitflags;

macro_rules! entity_index {
    ($(#[doc = $doc:expr])* $name:ident) => {
        $(#[doc = $doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(u32);

        impl $name {
            /// Wrap a raw array position.
            #[must_use]
            pub fn new(index: u32) -> Self {
                $name(index)
            }

            /// The raw array position this index refers to.
            #[must_use]
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "#{}", self.0)
            }
        }
    };
}

entity_index! {
    /// Position of a [`GcHandle`] within the snapshot's GC handle array.
    GcHandleIndex
}
entity_index! {
    /// Position of a [`ManagedObject`] within the snapshot's managed object array.
    ManagedObjectIndex
}
entity_index! {
    /// Position of a [`NativeObject`] within the snapshot's native object array.
    NativeObjectIndex
}
entity_index! {
    /// Position of a [`crate::snapshot::ManagedType`] within the snapshot's managed type array.
    ManagedTypeIndex
}
entity_index! {
    /// Position of a [`crate::snapshot::NativeType`] within the snapshot's native type array.
    NativeTypeIndex
}
entity_index! {
    /// Position of a [`StaticField`] within the snapshot's static field array.
    StaticFieldIndex
}
entity_index! {
    /// Position of a [`MemorySection`] within the snapshot's section array.
    SectionIndex
}

/// The entity categories that can participate in reference connections.
///
/// Memory sections are deliberately absent: they only take part in the dedicated
/// occupancy query, not in the general connection graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// A pinned/tracked handle the native runtime uses to keep a managed object alive.
    GcHandle,
    /// An instance on the garbage-collected heap.
    Managed,
    /// An instance in the host engine's own object system.
    Native,
    /// A static field slot stored in its owning type's static byte blob.
    StaticField,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::GcHandle => write!(f, "GCHandle"),
            EntityKind::Managed => write!(f, "Managed"),
            EntityKind::Native => write!(f, "Native"),
            EntityKind::StaticField => write!(f, "StaticField"),
        }
    }
}

/// A typed reference to any linkable snapshot entity.
///
/// This is the node type of the connection graph and the root path search. The
/// variant encodes the entity category, the payload its array position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityRef {
    /// Reference to a GC handle.
    GcHandle(GcHandleIndex),
    /// Reference to a managed heap object.
    Managed(ManagedObjectIndex),
    /// Reference to a native engine object.
    Native(NativeObjectIndex),
    /// Reference to a static field slot.
    StaticField(StaticFieldIndex),
}

impl EntityRef {
    /// The category this reference points into.
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityRef::GcHandle(_) => EntityKind::GcHandle,
            EntityRef::Managed(_) => EntityKind::Managed,
            EntityRef::Native(_) => EntityKind::Native,
            EntityRef::StaticField(_) => EntityKind::StaticField,
        }
    }

    /// The raw array position within the category.
    #[must_use]
    pub fn index(&self) -> usize {
        match self {
            EntityRef::GcHandle(i) => i.index(),
            EntityRef::Managed(i) => i.index(),
            EntityRef::Native(i) => i.index(),
            EntityRef::StaticField(i) => i.index(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind(), self.index())
    }
}

bitflags! {
    /// Lifetime and ownership state of a native engine object.
    ///
    /// `DONT_DESTROY_ON_LOAD` and `MANAGER` mark engine-held GC roots: objects the
    /// engine keeps alive independent of any reference chain.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NativeObjectFlags: u8 {
        /// The object is persistent (stored on disk as part of an asset).
        const PERSISTENT = 1 << 0;
        /// The object survives scene unloads.
        const DONT_DESTROY_ON_LOAD = 1 << 1;
        /// The object is an engine-internal manager singleton.
        const MANAGER = 1 << 2;
    }
}

bitflags! {
    /// Editor visibility flags carried by native objects.
    ///
    /// Purely informational for presentation; the analysis engine never branches
    /// on these.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HideFlags: u8 {
        /// Not shown in the hierarchy panel.
        const HIDE_IN_HIERARCHY = 1 << 0;
        /// Not shown in the inspector panel.
        const HIDE_IN_INSPECTOR = 1 << 1;
        /// Not saved to the scene in the editor.
        const DONT_SAVE_IN_EDITOR = 1 << 2;
        /// Not editable in the inspector.
        const NOT_EDITABLE = 1 << 3;
        /// Not saved to the scene in builds.
        const DONT_SAVE_IN_BUILD = 1 << 4;
        /// Not unloaded by unused-asset collection.
        const DONT_UNLOAD_UNUSED_ASSET = 1 << 5;
    }
}

/// A pinned/tracked handle the native runtime uses to keep a managed object
/// reachable from native code.
#[derive(Debug, Clone)]
pub struct GcHandle {
    /// Address of the managed object the handle pins.
    pub target_address: u64,
    /// The managed object at [`Self::target_address`], resolved during initialize.
    ///
    /// `None` when the target address lies outside the captured managed heap.
    pub managed_object: Option<ManagedObjectIndex>,
}

/// An instance on the garbage-collected heap, described by a type and field layout.
#[derive(Debug, Clone)]
pub struct ManagedObject {
    /// Start address of the object. Unique within the managed heap at capture time.
    pub address: u64,
    /// The object's type.
    pub managed_type: ManagedTypeIndex,
    /// Captured byte size, when the capture recorded one.
    pub size: Option<u32>,
    /// GC handle pinning this object, resolved during initialize.
    pub gc_handle: Option<GcHandleIndex>,
    /// Native engine object this instance wraps, resolved during initialize.
    pub native_object: Option<NativeObjectIndex>,
}

/// An instance in the host engine's own (non-garbage-collected) object system,
/// optionally paired with a managed wrapper.
#[derive(Debug, Clone)]
pub struct NativeObject {
    /// Name assigned by the engine.
    pub name: String,
    /// Address of the native object.
    pub address: u64,
    /// Byte size reported by the engine.
    pub size: u64,
    /// The object's native type.
    pub native_type: NativeTypeIndex,
    /// Engine instance id.
    pub instance_id: i32,
    /// Lifetime and ownership flags.
    pub flags: NativeObjectFlags,
    /// Editor visibility flags.
    pub hide_flags: HideFlags,
    /// The managed wrapper of this object, resolved during initialize.
    pub managed_object: Option<ManagedObjectIndex>,
}

impl NativeObject {
    /// Whether the engine holds this object alive independent of references,
    /// making it a GC root.
    #[must_use]
    pub fn is_engine_root(&self) -> bool {
        self.flags.intersects(
            NativeObjectFlags::DONT_DESTROY_ON_LOAD
                | NativeObjectFlags::MANAGER
                | NativeObjectFlags::PERSISTENT,
        )
    }
}

/// A static field slot.
///
/// Static fields have no heap address; their bytes live in the owning type's
/// static field blob at the field's declared offset.
#[derive(Debug, Clone, Copy)]
pub struct StaticField {
    /// The type declaring the field.
    pub class_type: ManagedTypeIndex,
    /// Position of the field within the declaring type's field array.
    pub field_index: u32,
}

/// A contiguous slab of the managed heap as captured.
///
/// Sections are stored in ascending start-address order and do not overlap,
/// which permits address resolution via binary search.
#[derive(Debug, Clone)]
pub struct MemorySection {
    /// First address covered by this section.
    pub start_address: u64,
    /// The captured bytes.
    pub bytes: Vec<u8>,
}

impl MemorySection {
    /// One past the last address covered by this section.
    #[must_use]
    pub fn end_address(&self) -> u64 {
        self.start_address + self.bytes.len() as u64
    }

    /// Whether `address` falls inside this section.
    #[must_use]
    pub fn contains(&self, address: u64) -> bool {
        address >= self.start_address && address < self.end_address()
    }
}
