use crate::{Error, Result};
use glam::DVec3;

/// Axis-aligned bounding box in double precision.
///
/// Double precision matters here: trees are routinely rooted in large
/// projected or geocentric frames where f32 cannot separate neighboring
/// points, and octant bisection must reproduce the exact same split planes
/// every time a tree is reopened.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: DVec3,
    pub max: DVec3,
}

impl Aabb {
    /// Build a box from its corners, rejecting degenerate or inverted
    /// extents on any axis.
    pub fn new(min: DVec3, max: DVec3) -> Result<Self> {
        if !(min.x < max.x && min.y < max.y && min.z < max.z) {
            return Err(Error::InvalidGeometry(format!(
                "min {min:?} must be strictly below max {max:?} on every axis"
            )));
        }
        Ok(Self { min, max })
    }

    #[inline]
    pub fn center(&self) -> DVec3 {
        (self.min + self.max) * 0.5
    }

    #[inline]
    pub fn size(&self) -> DVec3 {
        self.max - self.min
    }

    /// Longest edge of the box, the quantity a leaf resolution is measured
    /// against when deriving tree depth.
    #[inline]
    pub fn edge_length(&self) -> f64 {
        let s = self.size();
        s.x.max(s.y).max(s.z)
    }

    /// Half-open containment: `min <= c < max` per axis.
    ///
    /// Sibling octants share split planes, so the half-open convention is
    /// what makes a point belong to exactly one of them. The global root's
    /// outer max boundary is the one deliberate exception and is handled by
    /// the descent logic, not here.
    #[inline]
    pub fn contains(&self, p: DVec3) -> bool {
        p.x >= self.min.x
            && p.x < self.max.x
            && p.y >= self.min.y
            && p.y < self.max.y
            && p.z >= self.min.z
            && p.z < self.max.z
    }

    /// Closed overlap test; boxes touching at a face still intersect.
    #[inline]
    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    /// Which child octant a position descends into. Bit 0 is x, bit 1 is y,
    /// bit 2 is z; a coordinate at or above the center picks the high half,
    /// so positions on the root's outer max faces keep resolving to a valid
    /// octant all the way down.
    #[inline]
    pub fn octant_of(&self, p: DVec3) -> u8 {
        let c = self.center();
        let mut octant = 0u8;
        if p.x >= c.x {
            octant |= 1;
        }
        if p.y >= c.y {
            octant |= 2;
        }
        if p.z >= c.z {
            octant |= 4;
        }
        octant
    }

    /// The sub-box for one octant index. The 8 octants bisect at the center
    /// and exactly tile the parent with no gaps or overlaps.
    pub fn octant(&self, index: u8) -> Aabb {
        debug_assert!(index < 8, "octant index out of range");
        let c = self.center();
        let (min_x, max_x) = if index & 1 == 0 { (self.min.x, c.x) } else { (c.x, self.max.x) };
        let (min_y, max_y) = if index & 2 == 0 { (self.min.y, c.y) } else { (c.y, self.max.y) };
        let (min_z, max_z) = if index & 4 == 0 { (self.min.z, c.z) } else { (c.z, self.max.z) };
        Aabb {
            min: DVec3::new(min_x, min_y, min_z),
            max: DVec3::new(max_x, max_y, max_z),
        }
    }
}

#[test]
fn rejects_degenerate_boxes() {
    assert!(Aabb::new(DVec3::ZERO, DVec3::ONE).is_ok());
    assert!(Aabb::new(DVec3::ONE, DVec3::ZERO).is_err());
    // Zero extent on a single axis is degenerate too
    assert!(Aabb::new(DVec3::ZERO, DVec3::new(1.0, 0.0, 1.0)).is_err());
}

#[test]
fn octants_tile_the_parent() {
    let parent = Aabb::new(DVec3::splat(-4.0), DVec3::new(4.0, 8.0, 12.0)).unwrap();
    let children: Vec<Aabb> = (0..8).map(|i| parent.octant(i)).collect();

    // Volumes sum to the parent volume
    let vol = |b: &Aabb| {
        let s = b.size();
        s.x * s.y * s.z
    };
    let total: f64 = children.iter().map(vol).sum();
    assert!((total - vol(&parent)).abs() < 1e-9);

    // No two children share interior: strict overlap check on every pair
    for i in 0..8 {
        for j in (i + 1)..8 {
            let (a, b) = (&children[i], &children[j]);
            let overlap_x = a.min.x < b.max.x && a.max.x > b.min.x;
            let overlap_y = a.min.y < b.max.y && a.max.y > b.min.y;
            let overlap_z = a.min.z < b.max.z && a.max.z > b.min.z;
            assert!(!(overlap_x && overlap_y && overlap_z), "octants {i} and {j} overlap");
        }
    }

    // Every child is the one octant_of picks for its own center
    for (i, child) in children.iter().enumerate() {
        assert_eq!(parent.octant_of(child.center()), i as u8);
    }
}

#[test]
fn half_open_containment() {
    let b = Aabb::new(DVec3::ZERO, DVec3::splat(2.0)).unwrap();
    assert!(b.contains(DVec3::ZERO));
    assert!(b.contains(DVec3::splat(1.999_999)));
    assert!(!b.contains(DVec3::splat(2.0)));
}

#[test]
fn touching_boxes_intersect() {
    let a = Aabb::new(DVec3::ZERO, DVec3::ONE).unwrap();
    let b = Aabb::new(DVec3::ONE, DVec3::splat(2.0)).unwrap();
    let c = Aabb::new(DVec3::new(1.5, 0.0, 0.0), DVec3::new(2.5, 1.0, 1.0)).unwrap();
    assert!(a.intersects(&b));
    assert!(b.intersects(&a));
    assert!(!a.intersects(&c));
}
