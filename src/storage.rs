use crate::Result;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Which of a node's two point sets a storage operation targets.
///
/// Leaves hold raw inserted points in [`Slot::Points`]; internal nodes hold
/// their level-of-detail summary in [`Slot::Lod`]. The slots are separate
/// files on disk so a summary read never touches leaf payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Points,
    Lod,
}

impl Slot {
    fn extension(self) -> &'static str {
        match self {
            Slot::Points => "oct_dat",
            Slot::Lod => "oct_lod",
        }
    }
}

/// Backend picked at tree creation, recorded in the descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    /// Per-node files; supports trees far larger than RAM.
    Disk,
    /// In-process buffers; fast, bounded by memory, nothing survives drop.
    Memory,
}

/// Append-only point container for a single node.
///
/// The trait works in raw bytes so one implementation serves every point
/// layout; the tree above it knows the record size and does the arithmetic.
/// Each node exclusively owns one backend instance.
pub trait NodeStorage: std::fmt::Debug {
    /// Append a byte span of whole point records.
    fn append(&mut self, slot: Slot, bytes: &[u8]) -> Result<()>;

    /// Read back everything in the slot. A slot never written to reads as
    /// empty, not as an error.
    fn read_all(&self, slot: Slot) -> Result<Vec<u8>>;

    /// Overwrite the slot's whole contents. Only the LOD rebuild path uses
    /// this; raw leaf data is append-only.
    fn replace(&mut self, slot: Slot, bytes: &[u8]) -> Result<()>;

    /// Stored size in bytes.
    fn byte_len(&self, slot: Slot) -> Result<u64>;

    /// Number of whole records of `point_size` bytes in the slot.
    fn point_count(&self, slot: Slot, point_size: usize) -> Result<u64> {
        Ok(self.byte_len(slot)? / point_size as u64)
    }
}

/// Disk-resident node storage: one file per slot, named from the node's
/// deterministic file stem inside the tree's data directory.
///
/// Appends open, write, and close the file each call, so data is on disk
/// after every batch. That per-call cost is an implementation parameter,
/// not part of the format contract.
#[derive(Debug)]
pub struct DiskStorage {
    dir: PathBuf,
    stem: String,
}

impl DiskStorage {
    pub fn new(dir: &Path, stem: String) -> Self {
        Self {
            dir: dir.to_path_buf(),
            stem,
        }
    }

    fn slot_path(&self, slot: Slot) -> PathBuf {
        self.dir.join(format!("{}.{}", self.stem, slot.extension()))
    }
}

impl NodeStorage for DiskStorage {
    fn append(&mut self, slot: Slot, bytes: &[u8]) -> Result<()> {
        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(self.slot_path(slot))?;
        file.write_all(bytes)?;
        Ok(())
    }

    fn read_all(&self, slot: Slot) -> Result<Vec<u8>> {
        match fs::read(self.slot_path(slot)) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn replace(&mut self, slot: Slot, bytes: &[u8]) -> Result<()> {
        fs::write(self.slot_path(slot), bytes)?;
        Ok(())
    }

    fn byte_len(&self, slot: Slot) -> Result<u64> {
        match fs::metadata(self.slot_path(slot)) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}

/// Memory-resident node storage, for small trees and staging scenarios.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    points: Vec<u8>,
    lod: Vec<u8>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn buf(&self, slot: Slot) -> &Vec<u8> {
        match slot {
            Slot::Points => &self.points,
            Slot::Lod => &self.lod,
        }
    }

    fn buf_mut(&mut self, slot: Slot) -> &mut Vec<u8> {
        match slot {
            Slot::Points => &mut self.points,
            Slot::Lod => &mut self.lod,
        }
    }
}

impl NodeStorage for MemoryStorage {
    fn append(&mut self, slot: Slot, bytes: &[u8]) -> Result<()> {
        self.buf_mut(slot).extend_from_slice(bytes);
        Ok(())
    }

    fn read_all(&self, slot: Slot) -> Result<Vec<u8>> {
        Ok(self.buf(slot).clone())
    }

    fn replace(&mut self, slot: Slot, bytes: &[u8]) -> Result<()> {
        let buf = self.buf_mut(slot);
        buf.clear();
        buf.extend_from_slice(bytes);
        Ok(())
    }

    fn byte_len(&self, slot: Slot) -> Result<u64> {
        Ok(self.buf(slot).len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(storage: &mut dyn NodeStorage) {
        assert_eq!(storage.byte_len(Slot::Points).unwrap(), 0);
        assert!(storage.read_all(Slot::Points).unwrap().is_empty());

        storage.append(Slot::Points, &[1, 2, 3, 4]).unwrap();
        storage.append(Slot::Points, &[5, 6]).unwrap();
        assert_eq!(storage.byte_len(Slot::Points).unwrap(), 6);
        assert_eq!(storage.point_count(Slot::Points, 2).unwrap(), 3);
        assert_eq!(storage.read_all(Slot::Points).unwrap(), vec![1, 2, 3, 4, 5, 6]);

        // Slots are independent
        assert_eq!(storage.byte_len(Slot::Lod).unwrap(), 0);
        storage.append(Slot::Lod, &[9]).unwrap();
        assert_eq!(storage.read_all(Slot::Lod).unwrap(), vec![9]);
        assert_eq!(storage.read_all(Slot::Points).unwrap().len(), 6);

        storage.replace(Slot::Lod, &[7, 8]).unwrap();
        assert_eq!(storage.read_all(Slot::Lod).unwrap(), vec![7, 8]);
    }

    #[test]
    fn memory_storage_contract() {
        let mut storage = MemoryStorage::new();
        exercise(&mut storage);
    }

    #[test]
    fn disk_storage_contract() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = DiskStorage::new(dir.path(), "r04".to_string());
        exercise(&mut storage);

        // Reopening the same stem sees the same bytes
        let reopened = DiskStorage::new(dir.path(), "r04".to_string());
        assert_eq!(reopened.read_all(Slot::Points).unwrap(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn disk_slots_map_to_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = DiskStorage::new(dir.path(), "r".to_string());
        storage.append(Slot::Points, &[1]).unwrap();
        storage.append(Slot::Lod, &[2]).unwrap();
        assert!(dir.path().join("r.oct_dat").exists());
        assert!(dir.path().join("r.oct_lod").exists());
    }
}
