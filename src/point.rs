use crate::{Error, Result};
use bytemuck::{Pod, Zeroable};
use glam::DVec3;

/// A fixed-layout point record the tree can index.
///
/// The index reads only the position; everything else in the record is an
/// opaque payload stored and returned verbatim. `Pod` gives the index a
/// stable byte layout to append to node files without any per-point
/// serialization step.
pub trait Point: Pod {
    fn position(&self) -> DVec3;
}

/// Bare position record, the minimal indexable point.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PointXyz {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl PointXyz {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

impl Point for PointXyz {
    #[inline]
    fn position(&self) -> DVec3 {
        DVec3::new(self.x, self.y, self.z)
    }
}

impl From<DVec3> for PointXyz {
    fn from(p: DVec3) -> Self {
        Self { x: p.x, y: p.y, z: p.z }
    }
}

/// Position plus a color/intensity payload, the common scanner record shape.
/// The index never looks at the payload fields.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PointXyzRgba {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub rgba: [u8; 4],
    pub intensity: f32,
}

impl Point for PointXyzRgba {
    #[inline]
    fn position(&self) -> DVec3 {
        DVec3::new(self.x, self.y, self.z)
    }
}

/// Layout tag carried by a [`RawPointBuffer`] so the typed and type-erased
/// APIs can check they agree on what the bytes are.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointSchema {
    pub name: String,
    pub point_size: usize,
}

impl PointSchema {
    pub fn of<P: Point>() -> Self {
        Self {
            name: std::any::type_name::<P>().to_string(),
            point_size: std::mem::size_of::<P>(),
        }
    }
}

/// Schema-tagged byte buffer of point records.
///
/// This is the type-erased side of the API: consumers that are not compiled
/// against a concrete point layout move buffers in and out of the tree and
/// only ever rely on the element count, which is guaranteed to match what
/// the typed API would have produced for the same call.
#[derive(Debug, Clone)]
pub struct RawPointBuffer {
    schema: PointSchema,
    bytes: Vec<u8>,
}

impl RawPointBuffer {
    /// Build a buffer from raw record bytes and the schema describing them,
    /// for producers that never see the concrete point type. The byte length
    /// must be a whole number of records.
    pub fn new(schema: PointSchema, bytes: Vec<u8>) -> Result<Self> {
        if schema.point_size == 0 || bytes.len() % schema.point_size != 0 {
            return Err(Error::TruncatedBuffer {
                len: bytes.len(),
                point_size: schema.point_size,
            });
        }
        Ok(Self { schema, bytes })
    }

    pub fn from_points<P: Point>(points: &[P]) -> Self {
        Self {
            schema: PointSchema::of::<P>(),
            bytes: bytemuck::cast_slice(points).to_vec(),
        }
    }

    pub fn schema(&self) -> &PointSchema {
        &self.schema
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Number of point records in the buffer.
    pub fn len(&self) -> usize {
        debug_assert_eq!(self.bytes.len() % self.schema.point_size, 0);
        self.bytes.len() / self.schema.point_size
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Reinterpret the buffer as typed records, failing with
    /// [`Error::SchemaMismatch`] if the buffer was built from a different
    /// layout. Copies record-by-record, so the buffer's own alignment never
    /// matters.
    pub fn to_points<P: Point>(&self) -> Result<Vec<P>> {
        let requested = PointSchema::of::<P>();
        if self.schema != requested {
            return Err(Error::SchemaMismatch {
                found: self.schema.name.clone(),
                requested: requested.name,
            });
        }
        Ok(self
            .bytes
            .chunks_exact(self.schema.point_size)
            .map(bytemuck::pod_read_unaligned)
            .collect())
    }
}

#[test]
fn raw_buffer_round_trips() {
    let points = vec![
        PointXyz::new(1.0, 2.0, 3.0),
        PointXyz::new(-4.5, 0.0, 9.25),
    ];
    let buf = RawPointBuffer::from_points(&points);
    assert_eq!(buf.len(), 2);
    assert_eq!(buf.to_points::<PointXyz>().unwrap(), points);
}

#[test]
fn raw_buffer_builds_from_bare_bytes() {
    let points = vec![PointXyz::new(1.0, 2.0, 3.0), PointXyz::new(4.0, 5.0, 6.0)];
    let bytes = bytemuck::cast_slice(&points).to_vec();
    let buf = RawPointBuffer::new(PointSchema::of::<PointXyz>(), bytes).unwrap();
    assert_eq!(buf.len(), 2);
    assert_eq!(buf.to_points::<PointXyz>().unwrap(), points);
}

#[test]
fn ragged_byte_length_is_rejected() {
    let err = RawPointBuffer::new(PointSchema::of::<PointXyz>(), vec![0u8; 25]).unwrap_err();
    assert!(matches!(
        err,
        Error::TruncatedBuffer { len: 25, point_size } if point_size == std::mem::size_of::<PointXyz>()
    ));
}

#[test]
fn schema_mismatch_is_rejected() {
    let buf = RawPointBuffer::from_points(&[PointXyz::new(0.0, 0.0, 0.0)]);
    assert!(matches!(
        buf.to_points::<PointXyzRgba>(),
        Err(Error::SchemaMismatch { .. })
    ));
}

#[test]
fn payload_is_carried_verbatim() {
    let p = PointXyzRgba {
        x: 1.0,
        y: 2.0,
        z: 3.0,
        rgba: [10, 20, 30, 255],
        intensity: 0.75,
    };
    let buf = RawPointBuffer::from_points(&[p]);
    let back = buf.to_points::<PointXyzRgba>().unwrap();
    assert_eq!(back[0], p);
}
