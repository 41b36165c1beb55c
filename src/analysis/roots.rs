//! Shortest-path search from an object back to a GC root.
//!
//! "Why is this object still alive?" is answered by walking the `referenced_by`
//! relation backward from the object toward whatever keeps it reachable, until an
//! entity classified as a GC root is found: a static field slot, or a native
//! engine object the engine holds alive on its own (persistent, marked
//! don't-destroy-on-load, or a manager singleton).
//!
//! The search is a breadth-first traversal, which guarantees the returned path is
//! the shortest one; ties break by visitation order, which equals entity-array
//! order because the reverse adjacency lists are built deterministically. The
//! visited set is keyed by entity reference so cyclic heaps terminate, and the
//! hop count is bounded by [`ROOT_SEARCH_HOP_LIMIT`] as a final guard against
//! pathological captures.
//!
//! Finding no root is a legitimate terminal state, not a failure: a leaked
//! object in a corrupt capture may genuinely have no referencer chain to a root.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use crate::snapshot::{
    entities::{EntityRef, NativeObjectFlags},
    Snapshot,
};

/// Upper bound on BFS depth.
///
/// Reference chains in real heaps are far shorter; the bound only exists so a
/// corrupt capture cannot stall the search.
pub const ROOT_SEARCH_HOP_LIMIT: usize = 4096;

/// Why the terminal entity of a root path is a root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootReason {
    /// A static field slot keeps the chain alive.
    StaticField,
    /// A native object marked to survive scene unloads.
    DontDestroyOnLoad,
    /// An engine-internal manager singleton.
    Manager,
    /// A persistent (asset-backed) native object.
    Persistent,
}

impl fmt::Display for RootReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RootReason::StaticField => write!(f, "static field"),
            RootReason::DontDestroyOnLoad => write!(f, "don't destroy on load"),
            RootReason::Manager => write!(f, "engine manager"),
            RootReason::Persistent => write!(f, "persistent object"),
        }
    }
}

/// The shortest chain of referencers from an object to a GC root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootPath {
    /// Path nodes in order: the start entity first, the root last. A single
    /// element when the start is itself a root.
    pub nodes: Vec<EntityRef>,
    /// Why the last node is a root.
    pub reason: RootReason,
}

impl RootPath {
    /// Number of nodes on the path, including both endpoints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// A path always has at least the start node.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The root that terminates the path.
    #[must_use]
    pub fn root(&self) -> Option<EntityRef> {
        self.nodes.last().copied()
    }
}

/// Classify whether `entity` is a GC root, and why.
#[must_use]
pub fn classify_root(snapshot: &Snapshot, entity: EntityRef) -> Option<RootReason> {
    match entity {
        EntityRef::StaticField(_) => Some(RootReason::StaticField),
        EntityRef::Native(index) => {
            let native = snapshot.native_objects().get(index.index())?;
            if native.flags.contains(NativeObjectFlags::DONT_DESTROY_ON_LOAD) {
                Some(RootReason::DontDestroyOnLoad)
            } else if native.flags.contains(NativeObjectFlags::MANAGER) {
                Some(RootReason::Manager)
            } else if native.flags.contains(NativeObjectFlags::PERSISTENT) {
                Some(RootReason::Persistent)
            } else {
                None
            }
        }
        EntityRef::GcHandle(_) | EntityRef::Managed(_) => None,
    }
}

/// Breadth-first search from `start` to the nearest GC root.
///
/// Returns the path from `start` (inclusive) to the root, or `None` when no
/// root is reachable within [`ROOT_SEARCH_HOP_LIMIT`] hops.
#[must_use]
pub fn shortest_path_to_root(snapshot: &Snapshot, start: EntityRef) -> Option<RootPath> {
    if let Some(reason) = classify_root(snapshot, start) {
        return Some(RootPath {
            nodes: vec![start],
            reason,
        });
    }

    let mut queue: VecDeque<(EntityRef, usize)> = VecDeque::new();
    let mut predecessor: HashMap<EntityRef, EntityRef> = HashMap::new();

    queue.push_back((start, 0));
    predecessor.insert(start, start);

    while let Some((entity, depth)) = queue.pop_front() {
        if let Some(reason) = classify_root(snapshot, entity) {
            return Some(RootPath {
                nodes: reconstruct(&predecessor, start, entity),
                reason,
            });
        }

        if depth >= ROOT_SEARCH_HOP_LIMIT {
            continue;
        }

        for connection in snapshot.connections_of(entity).referenced_by {
            let referencer = connection.from;
            if predecessor.contains_key(&referencer) {
                continue;
            }
            predecessor.insert(referencer, entity);
            queue.push_back((referencer, depth + 1));
        }
    }

    None
}

fn reconstruct(
    predecessor: &HashMap<EntityRef, EntityRef>,
    start: EntityRef,
    root: EntityRef,
) -> Vec<EntityRef> {
    let mut nodes = vec![root];
    let mut current = root;

    while current != start {
        current = predecessor[&current];
        nodes.push(current);
    }

    nodes.reverse();
    nodes
}
