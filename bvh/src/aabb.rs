use glam::*;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Scales the exit distance of slab tests so that rounding never culls a box
/// whose surface is hit exactly.
const ROBUST_EXIT: f32 = 1.0 + 4.0 * f32::EPSILON;

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct Aabb {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl Display for Aabb {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "(min: ({}, {}, {}),  max: ({}, {}, {}))",
            self.min[0], self.min[1], self.min[2], self.max[0], self.max[1], self.max[2],
        )
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::empty()
    }
}

impl Aabb {
    pub const fn empty() -> Aabb {
        Aabb {
            min: [f32::INFINITY; 3],
            max: [f32::NEG_INFINITY; 3],
        }
    }

    pub fn from_points(points: &[Vec3]) -> Aabb {
        let mut aabb = Aabb::empty();
        for p in points {
            aabb.grow(*p);
        }
        aabb
    }

    pub fn is_empty(&self) -> bool {
        (0..3).any(|i| self.min[i] > self.max[i])
    }

    /// Slab test against a ray given its reciprocal direction. Returns the
    /// overlap of the box with `[t_near, t_far]`.
    #[inline(always)]
    pub fn intersect(&self, origin: Vec3, dir_inverse: Vec3, t_near: f32, t_far: f32) -> Option<(f32, f32)> {
        let (min, max) = self.points();

        let t1 = (min - origin) * dir_inverse;
        let t2 = (max - origin) * dir_inverse;

        let t_min = t1.min(t2);
        let t_max = t1.max(t2);

        let t_min = t_min.max_element().max(t_near);
        let t_max = (t_max.min_element() * ROBUST_EXIT).min(t_far);

        if t_min <= t_max {
            return Some((t_min, t_max));
        }

        None
    }

    pub fn grow(&mut self, pos: Vec3) {
        let (min, max) = self.points();
        self.min = min.min(pos).into();
        self.max = max.max(pos).into();
    }

    pub fn grow_bb(&mut self, aabb: &Aabb) {
        let (min, max) = self.points();
        let (b_min, b_max) = aabb.points();
        self.min = min.min(b_min).into();
        self.max = max.max(b_max).into();
    }

    pub fn offset_by(&mut self, delta: f32) {
        let delta = Vec3::splat(delta);
        let (min, max) = self.points();
        self.min = (min - delta).into();
        self.max = (max + delta).into();
    }

    pub fn union_of(&self, bb: &Self) -> Self {
        let mut union = *self;
        union.grow_bb(bb);
        union
    }

    /// True when `other` lies completely inside `self`. Empty boxes are
    /// contained in everything.
    pub fn contains(&self, other: &Aabb) -> bool {
        other.is_empty() || (0..3).all(|i| self.min[i] <= other.min[i] && other.max[i] <= self.max[i])
    }

    pub fn center(&self) -> Vec3 {
        let (min, max) = self.points();
        (min + max) * 0.5
    }

    /// Half the surface area, the measure the cost model works with.
    pub fn area(&self) -> f32 {
        if self.is_empty() {
            return 0.0;
        }

        let e = self.lengths();
        e.x * e.y + e.x * e.z + e.y * e.z
    }

    pub fn lengths(&self) -> Vec3 {
        Vec3::from(self.max) - Vec3::from(self.min)
    }

    pub fn all_corners(&self) -> [Vec3; 8] {
        let (min, max) = self.points();
        [
            min,
            Vec3::new(max.x, min.y, min.z),
            Vec3::new(min.x, max.y, min.z),
            Vec3::new(max.x, max.y, min.z),
            Vec3::new(min.x, min.y, max.z),
            Vec3::new(max.x, min.y, max.z),
            Vec3::new(min.x, max.y, max.z),
            max,
        ]
    }

    pub fn points(&self) -> (Vec3, Vec3) {
        (self.min.into(), self.max.into())
    }
}

impl From<(Vec3, Vec3)> for Aabb {
    fn from(v: (Vec3, Vec3)) -> Self {
        Aabb {
            min: v.0.into(),
            max: v.1.into(),
        }
    }
}

impl std::iter::FromIterator<Aabb> for Aabb {
    fn from_iter<I: IntoIterator<Item = Aabb>>(iter: I) -> Self {
        iter.into_iter().fold(Aabb::empty(), |acc, bb| acc.union_of(&bb))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ray::rcp_safe;

    #[test]
    fn empty_box_has_no_area() {
        let aabb = Aabb::empty();
        assert!(aabb.is_empty());
        assert_eq!(aabb.area(), 0.0);
        assert!(Aabb::from((Vec3::ZERO, Vec3::ONE)).contains(&aabb));
    }

    #[test]
    fn degenerate_box_is_not_empty() {
        let aabb = Aabb::from_points(&[Vec3::new(1.0, 2.0, 3.0)]);
        assert!(!aabb.is_empty());
        assert_eq!(aabb.area(), 0.0);
    }

    #[test]
    fn slab_test_with_axis_parallel_ray() {
        let aabb = Aabb::from((Vec3::splat(-1.0), Vec3::splat(1.0)));
        let origin = Vec3::new(0.5, 0.5, -5.0);
        let rdir = rcp_safe(Vec3::new(0.0, 0.0, 1.0));

        let (t0, t1) = aabb.intersect(origin, rdir, 0.0, f32::INFINITY).unwrap();
        assert!((t0 - 4.0).abs() < 1e-5);
        assert!((t1 - 6.0).abs() < 1e-4);
        assert!(!t0.is_nan() && !t1.is_nan());

        // Same ray shifted outside the box in x must miss.
        let origin = Vec3::new(1.5, 0.5, -5.0);
        assert!(aabb.intersect(origin, rdir, 0.0, f32::INFINITY).is_none());
    }

    #[test]
    fn slab_test_respects_interval() {
        let aabb = Aabb::from((Vec3::splat(-1.0), Vec3::splat(1.0)));
        let origin = Vec3::new(0.0, 0.0, -5.0);
        let rdir = rcp_safe(Vec3::Z);
        assert!(aabb.intersect(origin, rdir, 0.0, 3.0).is_none());
        assert!(aabb.intersect(origin, rdir, 7.0, 10.0).is_none());
        assert!(aabb.intersect(origin, rdir, 5.0, 10.0).is_some());
    }
}
