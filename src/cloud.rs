use crate::Point;
use glam::DVec3;

/// A whole point-cloud record: a point set plus the acquisition metadata the
/// producing layer attached to it.
///
/// The index stores the points and ignores the metadata; it exists so bulk
/// callers can hand over a complete capture without unpacking it first.
#[derive(Debug, Clone)]
pub struct PointCloud<P: Point> {
    pub points: Vec<P>,
    /// Where the sensor sat when this cloud was captured, if known.
    pub sensor_origin: Option<DVec3>,
    /// Free-form label, e.g. a scan or pass identifier.
    pub name: Option<String>,
}

impl<P: Point> PointCloud<P> {
    pub fn new(points: Vec<P>) -> Self {
        Self {
            points,
            sensor_origin: None,
            name: None,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

impl<P: Point> From<Vec<P>> for PointCloud<P> {
    fn from(points: Vec<P>) -> Self {
        Self::new(points)
    }
}
