use crate::Aabb;
use arrayvec::ArrayVec;
use bitvec::prelude::*;
use std::ops::Range;

/// Hard ceiling on tree depth imposed by the key encoding below.
pub const MAX_TREE_DEPTH: u8 = 19;

/// 64-bit key identifying one node by its path from the root, for trees up
/// to depth 19 (the root itself is depth 0).
///
/// ```text
/// Bit layout
/// 00101 00 000 000 ... 000 000 001 101 100 000 001
///   |    |  19  18      7   6   5   4   3   2   1
///   |    |                               |
///   |    |                               octant indices, 3 bits per level
///   |    -- unused, always 0
///   -- depth
///
/// Bits 0-56:  octant indices. Each is the child octant taken at that level
///             of the descent; indices past the key's depth MUST be 000.
/// Bits 57-58: unused padding, always 0.
/// Bits 59-63: depth, also the number of valid octant indices.
/// ```
///
/// Because the whole path is in one ordered integer, keys double as stable
/// node identities: arena map keys in memory and deterministic file names on
/// disk, so any node's files can be located without loading its siblings.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeKey(u64);

impl NodeKey {
    const DEPTH_BITS_RANGE: Range<usize> = 59..64;
    const OCTANT_INDICES_RANGE: Range<usize> = 0..57;
    const OCTANT_INDEX_RANGE: Range<usize> = 0..3;
    const OCTANT_INDEX_SIZE: usize = 3;

    /// Key of the tree root.
    #[inline]
    pub fn root() -> Self {
        Self::default()
    }

    pub fn depth(&self) -> u8 {
        self.0.view_bits::<LocalBits>()[Self::DEPTH_BITS_RANGE].load()
    }

    /// Octant index taken at `depth` on the way to this node. `depth` is
    /// 1-based: `octant_at(1)` is the root's child octant.
    pub fn octant_at(&self, depth: u8) -> u8 {
        debug_assert!(depth > 0 && depth <= self.depth());
        self.0.view_bits::<LocalBits>()[Self::OCTANT_INDICES_RANGE]
            [Self::OCTANT_INDEX_SIZE * (depth - 1) as usize..][Self::OCTANT_INDEX_RANGE]
            .load()
    }

    /// Key of the child in the given octant.
    pub fn child(&self, octant: u8) -> NodeKey {
        assert!(octant < 8, "octant index out of range");
        assert!(self.depth() < MAX_TREE_DEPTH, "NodeKey overflow");

        let mut key = *self;
        let depth = key.depth() + 1;
        let bits = key.0.view_bits_mut::<LocalBits>();
        bits[Self::DEPTH_BITS_RANGE].store(depth);
        bits[Self::OCTANT_INDICES_RANGE][Self::OCTANT_INDEX_SIZE * (depth as usize - 1)..]
            [Self::OCTANT_INDEX_RANGE]
            .store(octant);
        key
    }

    /// Key of the parent, or `None` at the root.
    pub fn parent(&self) -> Option<NodeKey> {
        let depth = self.depth();
        if depth == 0 {
            return None;
        }
        let mut key = *self;
        let bits = key.0.view_bits_mut::<LocalBits>();
        bits[Self::OCTANT_INDICES_RANGE][Self::OCTANT_INDEX_SIZE * (depth as usize - 1)..]
            [Self::OCTANT_INDEX_RANGE]
            .store(0u8);
        bits[Self::DEPTH_BITS_RANGE].store(depth - 1);
        Some(key)
    }

    /// Proper ancestors from the immediate parent up to the root.
    pub fn ancestors(&self) -> impl Iterator<Item = NodeKey> {
        let mut current = *self;
        std::iter::from_fn(move || {
            current = current.parent()?;
            Some(current)
        })
    }

    /// Octant indices along the path from the root, in descent order.
    pub fn path(&self) -> ArrayVec<u8, { MAX_TREE_DEPTH as usize }> {
        (1..=self.depth()).map(|d| self.octant_at(d)).collect()
    }

    /// Bounding box of this node's region inside `root_bounds`, rebuilt by
    /// replaying the octant path. Deterministic in f64, so the same key
    /// always resolves to bit-identical bounds across runs.
    pub fn resolve_bounds(&self, root_bounds: &Aabb) -> Aabb {
        let mut bounds = *root_bounds;
        for octant in self.path() {
            bounds = bounds.octant(octant);
        }
        bounds
    }

    /// Deterministic file stem for this node: `"r"` for the root, then one
    /// octant digit per level (`r`, `r3`, `r30`, ...). This is the on-disk
    /// naming contract.
    pub fn file_stem(&self) -> String {
        let mut stem = String::with_capacity(1 + self.depth() as usize);
        stem.push('r');
        for octant in self.path() {
            stem.push(char::from(b'0' + octant));
        }
        stem
    }

    /// Raw key bits, used to derive per-node sampling seeds.
    #[inline]
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for NodeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.file_stem())
    }
}

#[test]
fn child_and_parent_round_trip() {
    let key = NodeKey::root().child(4).child(7).child(0).child(3);
    assert_eq!(key.depth(), 4);
    assert_eq!(key.octant_at(1), 4);
    assert_eq!(key.octant_at(2), 7);
    assert_eq!(key.octant_at(3), 0);
    assert_eq!(key.octant_at(4), 3);

    let parent = key.parent().unwrap();
    assert_eq!(parent.depth(), 3);
    assert_eq!(parent, NodeKey::root().child(4).child(7).child(0));
    assert_eq!(NodeKey::root().parent(), None);
}

#[test]
fn ancestors_walk_to_root() {
    let key = NodeKey::root().child(1).child(2).child(3);
    let chain: Vec<NodeKey> = key.ancestors().collect();
    assert_eq!(
        chain,
        vec![
            NodeKey::root().child(1).child(2),
            NodeKey::root().child(1),
            NodeKey::root(),
        ]
    );
}

#[test]
fn file_stems_are_deterministic() {
    assert_eq!(NodeKey::root().file_stem(), "r");
    assert_eq!(NodeKey::root().child(0).file_stem(), "r0");
    assert_eq!(NodeKey::root().child(4).child(7).file_stem(), "r47");
}

#[test]
fn sibling_keys_are_distinct() {
    let parent = NodeKey::root().child(5);
    let children: Vec<NodeKey> = (0..8).map(|i| parent.child(i)).collect();
    for i in 0..8 {
        for j in (i + 1)..8 {
            assert_ne!(children[i], children[j]);
        }
        assert_eq!(children[i].parent().unwrap(), parent);
    }
}

#[test]
fn resolve_bounds_replays_the_path() {
    use glam::DVec3;

    let root = Aabb::new(DVec3::splat(-8.0), DVec3::splat(8.0)).unwrap();
    // Octant 7 is the +x+y+z corner at every level
    let key = NodeKey::root().child(7).child(7);
    let bounds = key.resolve_bounds(&root);
    assert_eq!(bounds.min, DVec3::splat(4.0));
    assert_eq!(bounds.max, DVec3::splat(8.0));
}
