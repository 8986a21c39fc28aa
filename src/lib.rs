//! Out-of-core octree index for point collections larger than memory.
//!
//! Space is partitioned into a fixed-depth octree whose nodes persist their
//! points to per-node files, so a tree can hold far more data than fits in
//! RAM while touching only the files a given operation needs. The crate
//! provides incremental bulk insertion, multi-resolution (level-of-detail)
//! summaries on internal nodes, and bounding-box range queries that skip
//! non-intersecting subtrees entirely.
//!
//! The usual flow: [`Octree::create`] a tree over a root bounding box with a
//! fixed depth (or a target leaf resolution), feed it batches through
//! [`Octree::add_points`] or [`Octree::add_points_with_lod`], then pull data
//! back with [`Octree::query_box`] at whatever depth the consumer can afford.
//! Reopening with [`Octree::open`] restores the whole structure from the
//! descriptor file without replaying insertions.
//!
//! A tree instance is single-writer and provides no internal locking;
//! distinct trees at distinct paths are fully independent.
#![warn(unused_extern_crates)]

pub use glam;

mod aabb;
pub use aabb::*;

mod node_key;
pub use node_key::*;

mod point;
pub use point::*;

mod cloud;
pub use cloud::*;

mod storage;
pub use storage::*;

mod lod;
pub use lod::*;

mod meta;
pub use meta::*;

mod tree;
pub use tree::*;

/// Errors surfaced by tree creation, insertion, and queries.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A descriptor already exists at the target path with a different
    /// bounding box, depth, or storage backend. Existing out-of-core data is
    /// never overwritten.
    #[error("incompatible tree already exists at {path}: {reason}")]
    PathConflict { path: String, reason: String },

    /// The descriptor path does not carry the expected `.octidx` extension.
    #[error("not an octree descriptor: {path}")]
    UnsupportedFormat { path: String },

    /// No descriptor file at the given path.
    #[error("no octree found at {path}")]
    NotFound { path: String },

    /// Degenerate or inverted bounding box.
    #[error("invalid bounding box: {0}")]
    InvalidGeometry(String),

    /// A type-erased buffer does not match the requested point layout.
    #[error("point schema mismatch: buffer holds {found}, requested {requested}")]
    SchemaMismatch { found: String, requested: String },

    /// A type-erased buffer's byte length is not a whole number of records.
    #[error("buffer of {len} bytes is not a whole number of {point_size}-byte records")]
    TruncatedBuffer { len: usize, point_size: usize },

    #[error("descriptor error: {0}")]
    Descriptor(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
