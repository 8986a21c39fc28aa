use crate::{
    check_extension, data_dir_for, node_exists_on_disk, write_node_meta, Aabb, DepthSpec,
    DiskStorage, Error, LodSampler, MemoryStorage, NodeKey, NodeStorage, Point, PointCloud,
    RawPointBuffer, Result, Slot, StorageKind, TreeMeta, DEFAULT_SAMPLE_FRACTION,
};
use ahash::AHashMap;
use glam::DVec3;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

/// Batch size `add_point_cloud` feeds through the point-batch API, so a
/// multi-gigabyte cloud never needs a single contiguous grouping pass.
const CLOUD_CHUNK_SIZE: usize = 65_536;

/// Default seed for LOD subsampling when the caller does not supply one.
const DEFAULT_LOD_SEED: u64 = 0x6372_6F75_746F_6E00;

/// One region of space: its bounds and the storage holding its points.
/// Children are not stored here; they live in the tree's arena keyed by
/// [`NodeKey`], or on disk until first traversal reaches them.
#[derive(Debug)]
struct Node {
    bounds: Aabb,
    storage: Box<dyn NodeStorage>,
}

/// Fixed-depth out-of-core octree over point records of type `P`.
///
/// Depth is decided at creation and never changes; leaves are the only nodes
/// that receive raw points, and they grow without bound rather than
/// re-splitting. Scalability comes from nodes being individual disk files,
/// loaded lazily and touched only when an operation actually reaches them.
///
/// Queries take `&mut self` because traversal materializes nodes from disk
/// into the in-memory arena on first visit. A tree instance is single-writer;
/// see the crate docs.
#[derive(Debug)]
pub struct Octree<P: Point> {
    meta: TreeMeta,
    bounds: Aabb,
    descriptor: PathBuf,
    data_dir: PathBuf,
    nodes: AHashMap<NodeKey, Node>,
    sampler: LodSampler,
    _point: PhantomData<P>,
}

impl<P: Point> Octree<P> {
    /// Create a new tree rooted at `path` (which must carry the `.octidx`
    /// extension). If a compatible tree already exists there it is opened
    /// instead; an incompatible one fails with [`Error::PathConflict`] and
    /// is left untouched.
    pub fn create(
        path: &Path,
        bounds: Aabb,
        depth_spec: DepthSpec,
        coord_system: &str,
        storage: StorageKind,
    ) -> Result<Self> {
        Self::create_seeded(path, bounds, depth_spec, coord_system, storage, DEFAULT_LOD_SEED)
    }

    /// [`Octree::create`] with an explicit LOD sampling seed, for callers
    /// that need reproducible summaries across separately built trees.
    pub fn create_seeded(
        path: &Path,
        bounds: Aabb,
        depth_spec: DepthSpec,
        coord_system: &str,
        storage: StorageKind,
        lod_seed: u64,
    ) -> Result<Self> {
        check_extension(path)?;
        let depth = depth_spec.resolve(&bounds)?;

        if path.exists() {
            let existing = TreeMeta::load(path)?;
            let fresh = TreeMeta::new(bounds, depth, coord_system.to_string(), storage, lod_seed);
            if !existing.compatible_with(&fresh) {
                return Err(Error::PathConflict {
                    path: path.display().to_string(),
                    reason: format!(
                        "existing tree has bounds {:?}..{:?} depth {} on {:?} storage, \
                         requested {:?}..{:?} depth {} on {:?} storage",
                        existing.bounds_min,
                        existing.bounds_max,
                        existing.depth,
                        existing.storage,
                        fresh.bounds_min,
                        fresh.bounds_max,
                        depth,
                        storage
                    ),
                });
            }
            debug!(path = %path.display(), "compatible tree already present, opening");
            return Self::open(path);
        }

        let meta = TreeMeta::new(bounds, depth, coord_system.to_string(), storage, lod_seed);
        let data_dir = data_dir_for(path);
        if storage == StorageKind::Disk {
            std::fs::create_dir_all(&data_dir)?;
        }

        let mut tree = Self {
            sampler: LodSampler::new(meta.lod_seed, DEFAULT_SAMPLE_FRACTION),
            meta,
            bounds,
            descriptor: path.to_path_buf(),
            data_dir,
            nodes: AHashMap::new(),
            _point: PhantomData,
        };
        tree.ensure_node(NodeKey::root())?;
        tree.meta.save(&tree.descriptor)?;
        debug!(path = %path.display(), depth, "created tree");
        Ok(tree)
    }

    /// Reopen a tree from its descriptor. Nodes are reconstructed lazily
    /// from disk as traversals first reach them.
    ///
    /// A memory-backed tree has no node files, so reopening one restores the
    /// geometry but none of its points; its per-depth counts start back at
    /// zero so introspection and queries stay in agreement.
    pub fn open(path: &Path) -> Result<Self> {
        let mut meta = TreeMeta::load(path)?;
        if meta.storage == StorageKind::Memory {
            meta.point_counts.fill(0);
        }
        let bounds = meta.bounding_box()?;
        let mut tree = Self {
            sampler: LodSampler::new(meta.lod_seed, DEFAULT_SAMPLE_FRACTION),
            meta,
            bounds,
            descriptor: path.to_path_buf(),
            data_dir: data_dir_for(path),
            nodes: AHashMap::new(),
            _point: PhantomData,
        };
        tree.ensure_node(NodeKey::root())?;
        debug!(path = %path.display(), depth = tree.meta.depth, "opened tree");
        Ok(tree)
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub fn bounding_box(&self) -> Aabb {
        self.bounds
    }

    pub fn depth(&self) -> u8 {
        self.meta.depth
    }

    pub fn coord_system(&self) -> &str {
        &self.meta.coord_system
    }

    /// Points stored at one depth level: raw points for the leaf level, LOD
    /// sample points for internal levels. Depths past the tree depth hold
    /// nothing.
    pub fn num_points_at_depth(&self, depth: u8) -> u64 {
        self.meta
            .point_counts
            .get(depth as usize)
            .copied()
            .unwrap_or(0)
    }

    /// Per-depth point counts, index 0 = root.
    pub fn num_points_per_depth(&self) -> &[u64] {
        &self.meta.point_counts
    }

    // ------------------------------------------------------------------
    // Node management
    // ------------------------------------------------------------------

    fn make_storage(&self, key: NodeKey) -> Box<dyn NodeStorage> {
        match self.meta.storage {
            StorageKind::Disk => Box::new(DiskStorage::new(&self.data_dir, key.file_stem())),
            StorageKind::Memory => Box::new(MemoryStorage::new()),
        }
    }

    /// Materialize a node into the arena if it already exists (in memory or
    /// on disk). Returns whether the node is present afterwards.
    fn touch_node(&mut self, key: NodeKey) -> Result<bool> {
        if self.nodes.contains_key(&key) {
            return Ok(true);
        }
        if self.meta.storage == StorageKind::Disk && node_exists_on_disk(&self.data_dir, key) {
            let node = Node {
                bounds: key.resolve_bounds(&self.bounds),
                storage: self.make_storage(key),
            };
            self.nodes.insert(key, node);
            trace!(node = %key, "materialized node from disk");
            return Ok(true);
        }
        Ok(false)
    }

    /// Materialize a node, creating it if it never existed. This is the only
    /// place new node descriptors are written to disk.
    fn ensure_node(&mut self, key: NodeKey) -> Result<()> {
        if self.touch_node(key)? {
            return Ok(());
        }
        let bounds = key.resolve_bounds(&self.bounds);
        if self.meta.storage == StorageKind::Disk {
            write_node_meta(&self.data_dir, key, &bounds)?;
        }
        let storage = self.make_storage(key);
        self.nodes.insert(key, Node { bounds, storage });
        trace!(node = %key, "created node");
        Ok(())
    }

    /// The leaf a position belongs to, by spatial descent from the root.
    ///
    /// Each level picks the octant via the half-open convention (a
    /// coordinate at the split plane goes to the high half), so positions on
    /// the root's outer max faces descend into the highest octant at every
    /// level and are never lost.
    pub fn locate_leaf(&self, position: DVec3) -> NodeKey {
        let mut key = NodeKey::root();
        let mut bounds = self.bounds;
        for _ in 0..self.meta.depth {
            let octant = bounds.octant_of(position);
            bounds = bounds.octant(octant);
            key = key.child(octant);
        }
        key
    }

    /// Points physically stored at one node: raw points for leaves, the LOD
    /// sample for internal nodes. Zero for nodes that were never created.
    pub fn node_point_count(&mut self, key: NodeKey) -> Result<u64> {
        if !self.touch_node(key)? {
            return Ok(0);
        }
        let slot = if key.depth() == self.meta.depth {
            Slot::Points
        } else {
            Slot::Lod
        };
        self.nodes[&key]
            .storage
            .point_count(slot, std::mem::size_of::<P>())
    }

    fn append_to_node(&mut self, key: NodeKey, slot: Slot, points: &[P]) -> Result<()> {
        let node = self
            .nodes
            .get_mut(&key)
            .expect("node must be materialized before append");
        node.storage.append(slot, bytemuck::cast_slice(points))
    }

    fn read_node(&mut self, key: NodeKey, slot: Slot) -> Result<Vec<P>> {
        let node = self
            .nodes
            .get(&key)
            .expect("node must be materialized before read");
        let bytes = node.storage.read_all(slot)?;
        Ok(bytes
            .chunks_exact(std::mem::size_of::<P>())
            .map(bytemuck::pod_read_unaligned)
            .collect())
    }

    // ------------------------------------------------------------------
    // Insertion
    // ------------------------------------------------------------------

    /// Route each point to its leaf and append it there.
    ///
    /// Points with non-finite coordinates are dropped, not errors; the
    /// returned count is how many were actually stored. Per-depth counts and
    /// the descriptor are updated before returning.
    pub fn add_points(&mut self, points: &[P]) -> Result<u64> {
        self.insert(points, false)
    }

    /// [`Octree::add_points`], plus a bounded random subsample of the new
    /// points merged into every ancestor's LOD summary, leaving the tree
    /// browsable at every resolution without a separate rebuild pass.
    ///
    /// Incremental merging lets summary quality drift from an exact
    /// bottom-up sample over many batches; [`Octree::rebuild_all_lod`]
    /// restores exactness.
    pub fn add_points_with_lod(&mut self, points: &[P]) -> Result<u64> {
        self.insert(points, true)
    }

    fn insert(&mut self, points: &[P], with_lod: bool) -> Result<u64> {
        let mut by_leaf: AHashMap<NodeKey, Vec<P>> = AHashMap::new();
        let mut dropped = 0u64;
        for point in points {
            if !point.position().is_finite() {
                dropped += 1;
                continue;
            }
            by_leaf.entry(self.locate_leaf(point.position())).or_default().push(*point);
        }
        if dropped > 0 {
            warn!(dropped, "dropped points with non-finite coordinates");
        }

        let sampler = self.sampler.clone();
        let mut stored = 0u64;
        for (leaf, batch) in &by_leaf {
            // Materialize the whole path; intermediate nodes come into
            // existence the first time a point descends through them.
            for ancestor in leaf.ancestors().collect::<Vec<_>>().into_iter().rev() {
                self.ensure_node(ancestor)?;
            }
            self.ensure_node(*leaf)?;

            self.append_to_node(*leaf, Slot::Points, batch)?;
            self.meta.point_counts[leaf.depth() as usize] += batch.len() as u64;
            stored += batch.len() as u64;

            if with_lod {
                for ancestor in leaf.ancestors() {
                    let sample = sampler.subsample(ancestor, batch);
                    if sample.is_empty() {
                        continue;
                    }
                    self.append_to_node(ancestor, Slot::Lod, &sample)?;
                    self.meta.point_counts[ancestor.depth() as usize] += sample.len() as u64;
                }
            }
        }

        self.meta.save(&self.descriptor)?;
        debug!(
            submitted = points.len(),
            stored,
            dropped,
            leaves = by_leaf.len(),
            with_lod,
            "inserted batch"
        );
        Ok(stored)
    }

    /// Insert a whole point-cloud record, internally chunked through the
    /// batch API. Returns the number of points stored, same contract as
    /// [`Octree::add_points`].
    pub fn add_point_cloud(&mut self, cloud: &PointCloud<P>) -> Result<u64> {
        let mut stored = 0;
        for chunk in cloud.points.chunks(CLOUD_CHUNK_SIZE) {
            stored += self.add_points(chunk)?;
        }
        Ok(stored)
    }

    /// [`Octree::add_point_cloud`] with LOD maintenance.
    pub fn add_point_cloud_with_lod(&mut self, cloud: &PointCloud<P>) -> Result<u64> {
        let mut stored = 0;
        for chunk in cloud.points.chunks(CLOUD_CHUNK_SIZE) {
            stored += self.add_points_with_lod(chunk)?;
        }
        Ok(stored)
    }

    /// Type-erased insertion: a schema-tagged byte buffer instead of typed
    /// records. Stores exactly what the typed path would have stored.
    pub fn add_raw(&mut self, buffer: &RawPointBuffer) -> Result<u64> {
        let points = buffer.to_points::<P>()?;
        self.add_points(&points)
    }

    /// Type-erased insertion with LOD maintenance.
    pub fn add_raw_with_lod(&mut self, buffer: &RawPointBuffer) -> Result<u64> {
        let points = buffer.to_points::<P>()?;
        self.add_points_with_lod(&points)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Whether a point falls inside the query box under the tree's boundary
    /// convention: half-open `[min, max)` per axis, except that a query face
    /// lying on (or beyond) the root's own max face is closed, mirroring how
    /// descent keeps points sitting exactly on the outer boundary.
    fn point_in_query(&self, p: DVec3, min: DVec3, max: DVec3) -> bool {
        let below_max = |c: f64, hi: f64, root_hi: f64| c < hi || (hi >= root_hi && c <= hi);
        p.x >= min.x
            && p.y >= min.y
            && p.z >= min.z
            && below_max(p.x, max.x, self.bounds.max.x)
            && below_max(p.y, max.y, self.bounds.max.y)
            && below_max(p.z, max.z, self.bounds.max.z)
    }

    /// All points inside `[min, max)` down to `max_depth`: raw points from
    /// leaves, LOD sample points from internal nodes cut off at `max_depth`.
    /// Subtrees whose bounds miss the query box are never read. Result
    /// order is unspecified.
    ///
    /// Any I/O failure aborts the whole query; no partial result is
    /// returned.
    pub fn query_box(&mut self, min: DVec3, max: DVec3, max_depth: u8) -> Result<Vec<P>> {
        let query = Aabb::new(min, max)?;
        let cutoff = max_depth.min(self.meta.depth);

        let mut out = Vec::new();
        let mut visited = 0usize;
        let mut stack = vec![NodeKey::root()];
        while let Some(key) = stack.pop() {
            if !self.touch_node(key)? {
                continue;
            }
            visited += 1;
            let node = &self.nodes[&key];
            if !node.bounds.intersects(&query) {
                continue;
            }
            let is_leaf = key.depth() == self.meta.depth;
            if key.depth() == cutoff || is_leaf {
                let slot = if is_leaf { Slot::Points } else { Slot::Lod };
                for point in self.read_node(key, slot)? {
                    if self.point_in_query(point.position(), min, max) {
                        out.push(point);
                    }
                }
            } else {
                for octant in 0..8 {
                    stack.push(key.child(octant));
                }
            }
        }
        trace!(visited, returned = out.len(), cutoff, "range query");
        Ok(out)
    }

    /// Type-erased range query. The buffer's element count equals the length
    /// [`Octree::query_box`] would return for the same arguments.
    pub fn query_box_raw(&mut self, min: DVec3, max: DVec3, max_depth: u8) -> Result<RawPointBuffer> {
        Ok(RawPointBuffer::from_points(&self.query_box(min, max, max_depth)?))
    }

    // ------------------------------------------------------------------
    // LOD rebuild
    // ------------------------------------------------------------------

    /// Recompute every internal node's LOD summary bottom-up from its
    /// children: leaves contribute their raw points, internal nodes their
    /// freshly rebuilt samples. Restores exact, reproducible summaries after
    /// many incremental [`Octree::add_points_with_lod`] batches.
    pub fn rebuild_all_lod(&mut self) -> Result<()> {
        if self.meta.depth == 0 {
            return Ok(());
        }
        // Internal-depth counts are re-derived from the rebuilt samples.
        for depth in 0..self.meta.depth as usize {
            self.meta.point_counts[depth] = 0;
        }
        let sampler = self.sampler.clone();
        self.rebuild_node(NodeKey::root(), &sampler)?;
        self.meta.save(&self.descriptor)?;
        debug!("rebuilt all LOD summaries");
        Ok(())
    }

    /// Post-order rebuild; returns the point set this subtree contributes to
    /// its parent's sample.
    fn rebuild_node(&mut self, key: NodeKey, sampler: &LodSampler) -> Result<Vec<P>> {
        if key.depth() == self.meta.depth {
            return self.read_node(key, Slot::Points);
        }

        let mut child_sets: Vec<Vec<P>> = Vec::new();
        for octant in 0..8 {
            let child = key.child(octant);
            if self.touch_node(child)? {
                child_sets.push(self.rebuild_node(child, sampler)?);
            }
        }
        let set_refs: Vec<&[P]> = child_sets.iter().map(Vec::as_slice).collect();
        let sample = sampler.sample(key, &set_refs);

        let node = self
            .nodes
            .get_mut(&key)
            .expect("internal node materialized during rebuild");
        node.storage.replace(Slot::Lod, bytemuck::cast_slice(&sample))?;
        self.meta.point_counts[key.depth() as usize] += sample.len() as u64;
        Ok(sample)
    }
}
