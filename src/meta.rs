use crate::{Aabb, Error, NodeKey, Result, StorageKind, MAX_TREE_DEPTH};
use glam::DVec3;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// File extension identifying a tree descriptor.
pub const DESCRIPTOR_EXTENSION: &str = "octidx";

/// Current on-disk descriptor layout version.
const DESCRIPTOR_VERSION: u32 = 1;

/// How deep a new tree should go: either an explicit depth, or a target leaf
/// edge length from which the depth is derived once and then fixed for the
/// life of the tree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DepthSpec {
    Depth(u8),
    /// Target leaf edge length; depth becomes the smallest `d` with
    /// `root_edge / 2^d <= resolution`.
    Resolution(f64),
}

impl DepthSpec {
    pub fn resolve(&self, root_bounds: &Aabb) -> Result<u8> {
        match *self {
            DepthSpec::Depth(d) => {
                if d > MAX_TREE_DEPTH {
                    return Err(Error::InvalidGeometry(format!(
                        "depth {d} exceeds maximum {MAX_TREE_DEPTH}"
                    )));
                }
                Ok(d)
            }
            DepthSpec::Resolution(resolution) => {
                if !resolution.is_finite() || resolution <= 0.0 {
                    return Err(Error::InvalidGeometry(format!(
                        "leaf resolution must be positive and finite, got {resolution}"
                    )));
                }
                let mut depth = 0u8;
                let mut edge = root_bounds.edge_length();
                while edge > resolution {
                    if depth == MAX_TREE_DEPTH {
                        return Err(Error::InvalidGeometry(format!(
                            "resolution {resolution} needs depth beyond maximum {MAX_TREE_DEPTH}"
                        )));
                    }
                    depth += 1;
                    edge *= 0.5;
                }
                Ok(depth)
            }
        }
    }
}

/// The tree descriptor: everything needed to reopen a tree without replaying
/// insertions. Serialized as JSON at the tree's `.octidx` path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeMeta {
    pub version: u32,
    pub bounds_min: [f64; 3],
    pub bounds_max: [f64; 3],
    pub depth: u8,
    /// Coordinate-system label, e.g. a geodetic frame name. Free-form.
    pub coord_system: String,
    pub storage: StorageKind,
    /// Seed for deterministic LOD subsampling.
    pub lod_seed: u64,
    /// Per-depth point counts, index 0 = root, maintained incrementally.
    pub point_counts: Vec<u64>,
}

impl TreeMeta {
    pub fn new(
        bounds: Aabb,
        depth: u8,
        coord_system: String,
        storage: StorageKind,
        lod_seed: u64,
    ) -> Self {
        Self {
            version: DESCRIPTOR_VERSION,
            bounds_min: bounds.min.to_array(),
            bounds_max: bounds.max.to_array(),
            depth,
            coord_system,
            storage,
            lod_seed,
            point_counts: vec![0; depth as usize + 1],
        }
    }

    pub fn bounding_box(&self) -> Result<Aabb> {
        Aabb::new(DVec3::from(self.bounds_min), DVec3::from(self.bounds_max))
    }

    /// True when another descriptor describes the same partition of space on
    /// the same backend. Coordinate-system labels and counts are allowed to
    /// differ; geometry, depth, and storage kind are not.
    pub fn compatible_with(&self, other: &TreeMeta) -> bool {
        self.bounds_min == other.bounds_min
            && self.bounds_max == other.bounds_max
            && self.depth == other.depth
            && self.storage == other.storage
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        check_extension(path)?;
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        check_extension(path)?;
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound {
                    path: path.display().to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Fail with [`Error::UnsupportedFormat`] unless the path carries the
/// descriptor extension.
pub fn check_extension(path: &Path) -> Result<()> {
    if path.extension().and_then(|ext| ext.to_str()) == Some(DESCRIPTOR_EXTENSION) {
        Ok(())
    } else {
        Err(Error::UnsupportedFormat {
            path: path.display().to_string(),
        })
    }
}

/// Directory holding every node file of the tree rooted at `descriptor`:
/// a sibling named `<stem>_data`.
pub fn data_dir_for(descriptor: &Path) -> PathBuf {
    let stem = descriptor
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "tree".to_string());
    descriptor.with_file_name(format!("{stem}_data"))
}

/// Per-node descriptor, written once when a node is first materialized.
///
/// Its presence is what marks a node as existing on disk, which is how a
/// reopened tree rediscovers children lazily without scanning payload files.
/// The bounds are redundant with the octant path but make node files
/// self-describing for external tooling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeMeta {
    pub bounds_min: [f64; 3],
    pub bounds_max: [f64; 3],
    pub depth: u8,
}

const NODE_META_EXTENSION: &str = "oct_node";

pub fn node_meta_path(data_dir: &Path, key: NodeKey) -> PathBuf {
    data_dir.join(format!("{}.{}", key.file_stem(), NODE_META_EXTENSION))
}

pub fn write_node_meta(data_dir: &Path, key: NodeKey, bounds: &Aabb) -> Result<()> {
    let meta = NodeMeta {
        bounds_min: bounds.min.to_array(),
        bounds_max: bounds.max.to_array(),
        depth: key.depth(),
    };
    fs::write(node_meta_path(data_dir, key), serde_json::to_vec(&meta)?)?;
    Ok(())
}

pub fn node_exists_on_disk(data_dir: &Path, key: NodeKey) -> bool {
    node_meta_path(data_dir, key).exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_box() -> Aabb {
        Aabb::new(DVec3::ZERO, DVec3::splat(16.0)).unwrap()
    }

    #[test]
    fn explicit_depth_passes_through() {
        assert_eq!(DepthSpec::Depth(5).resolve(&unit_box()).unwrap(), 5);
        assert!(DepthSpec::Depth(MAX_TREE_DEPTH + 1).resolve(&unit_box()).is_err());
    }

    #[test]
    fn resolution_derives_smallest_sufficient_depth() {
        // Root edge 16: depth 0 -> 16, 1 -> 8, 2 -> 4, 3 -> 2, 4 -> 1
        assert_eq!(DepthSpec::Resolution(16.0).resolve(&unit_box()).unwrap(), 0);
        assert_eq!(DepthSpec::Resolution(8.0).resolve(&unit_box()).unwrap(), 1);
        assert_eq!(DepthSpec::Resolution(5.0).resolve(&unit_box()).unwrap(), 2);
        assert_eq!(DepthSpec::Resolution(1.0).resolve(&unit_box()).unwrap(), 4);
        assert!(DepthSpec::Resolution(0.0).resolve(&unit_box()).is_err());
        assert!(DepthSpec::Resolution(-1.0).resolve(&unit_box()).is_err());
    }

    #[test]
    fn descriptor_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.octidx");
        let mut meta = TreeMeta::new(
            unit_box(),
            4,
            "EPSG:32633".to_string(),
            StorageKind::Disk,
            99,
        );
        meta.point_counts[4] = 1234;
        meta.save(&path).unwrap();

        let loaded = TreeMeta::load(&path).unwrap();
        assert_eq!(loaded.depth, 4);
        assert_eq!(loaded.coord_system, "EPSG:32633");
        assert_eq!(loaded.point_counts[4], 1234);
        assert_eq!(loaded.lod_seed, 99);
        assert!(loaded.compatible_with(&meta));
        assert_eq!(loaded.bounding_box().unwrap(), unit_box());
    }

    #[test]
    fn different_storage_kind_is_incompatible() {
        let disk = TreeMeta::new(unit_box(), 3, "local".to_string(), StorageKind::Disk, 7);
        let mut memory = disk.clone();
        memory.storage = StorageKind::Memory;
        assert!(!disk.compatible_with(&memory));
        assert!(disk.compatible_with(&disk.clone()));
    }

    #[test]
    fn wrong_extension_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.json");
        let meta = TreeMeta::new(unit_box(), 2, String::new(), StorageKind::Disk, 0);
        assert!(matches!(meta.save(&path), Err(Error::UnsupportedFormat { .. })));
        assert!(matches!(TreeMeta::load(&path), Err(Error::UnsupportedFormat { .. })));
    }

    #[test]
    fn missing_descriptor_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.octidx");
        assert!(matches!(TreeMeta::load(&path), Err(Error::NotFound { .. })));
    }

    #[test]
    fn data_dir_sits_next_to_descriptor() {
        let dir = data_dir_for(Path::new("/tmp/trees/scan.octidx"));
        assert_eq!(dir, Path::new("/tmp/trees/scan_data"));
    }

    #[test]
    fn node_meta_marks_existence() {
        let dir = tempfile::tempdir().unwrap();
        let key = NodeKey::root().child(2).child(6);
        assert!(!node_exists_on_disk(dir.path(), key));
        write_node_meta(dir.path(), key, &unit_box()).unwrap();
        assert!(node_exists_on_disk(dir.path(), key));
        assert!(dir.path().join("r26.oct_node").exists());
    }
}
