//! Contract between the builder and whatever owns the primitive arrays.
//!
//! The builder never stores scene data; it enumerates geometries through
//! [`Scene`], copies what leaves need, and reports progress back.

use glam::*;
use serde::{Deserialize, Serialize};

use crate::{Aabb, Frame, Ray};

/// Sub-segments a curve is approximated by during intersection.
pub const CURVE_SEGMENTS: usize = 8;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GeometryKind {
    Triangles,
    Curves,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Triangle {
    pub vertex0: Vec3,
    pub vertex1: Vec3,
    pub vertex2: Vec3,
}

impl Triangle {
    pub fn new(vertex0: Vec3, vertex1: Vec3, vertex2: Vec3) -> Self {
        Self {
            vertex0,
            vertex1,
            vertex2,
        }
    }

    pub fn bounds(&self) -> Aabb {
        Aabb::from_points(&[self.vertex0, self.vertex1, self.vertex2])
    }

    /// Möller-Trumbore. Returns `(t, u, v)` for hits with `t` in
    /// `[ray.t_near, ray.t_far)`.
    #[inline(always)]
    pub fn intersect(&self, ray: &Ray) -> Option<(f32, f32, f32)> {
        let edge1 = self.vertex1 - self.vertex0;
        let edge2 = self.vertex2 - self.vertex0;

        let p = ray.direction.cross(edge2);
        let det = edge1.dot(p);
        if det == 0.0 || !det.is_finite() {
            return None;
        }

        let inv_det = 1.0 / det;
        let s = ray.origin - self.vertex0;
        let u = s.dot(p) * inv_det;
        if !(0.0..=1.0).contains(&u) {
            return None;
        }

        let q = s.cross(edge1);
        let v = ray.direction.dot(q) * inv_det;
        if v < 0.0 || u + v > 1.0 {
            return None;
        }

        let t = edge2.dot(q) * inv_det;
        if t >= ray.t_near && t < ray.t_far {
            Some((t, u, v))
        } else {
            None
        }
    }
}

/// Cubic Bézier segment; `w` of each control point is the radius.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct BezierCurve {
    pub points: [Vec4; 4],
}

impl BezierCurve {
    pub fn new(points: [Vec4; 4]) -> Self {
        Self { points }
    }

    pub fn eval(&self, t: f32) -> Vec4 {
        let s = 1.0 - t;
        let [p0, p1, p2, p3] = self.points;
        p0 * (s * s * s) + p1 * (3.0 * s * s * t) + p2 * (3.0 * s * t * t) + p3 * (t * t * t)
    }

    /// Principal direction, used to orient bounding frames.
    pub fn direction(&self) -> Vec3 {
        self.points[3].truncate() - self.points[0].truncate()
    }

    pub fn max_radius(&self) -> f32 {
        self.points.iter().fold(0.0f32, |r, p| r.max(p.w.abs()))
    }

    pub fn bounds(&self) -> Aabb {
        let mut aabb = Aabb::empty();
        for p in self.points.iter() {
            aabb.grow(p.truncate());
        }
        aabb.offset_by(self.max_radius());
        aabb
    }

    /// Bounds of the curve expressed in `frame`.
    pub fn bounds_in(&self, frame: &Frame) -> Aabb {
        let mut aabb = Aabb::empty();
        for p in self.points.iter() {
            aabb.grow(frame.to_local(p.truncate()));
        }
        aabb.offset_by(self.max_radius());
        aabb
    }

    /// Intersects the curve as a chain of sphere-swept sub-segments. Returns
    /// `(t, u)` where `u` is the curve parameter of the hit sub-segment.
    pub fn intersect(&self, ray: &Ray) -> Option<(f32, f32)> {
        let length = ray.direction.length();
        if length == 0.0 || !length.is_finite() {
            return None;
        }
        let dir = ray.direction / length;

        let mut best: Option<(f32, f32)> = None;
        let mut t_far = ray.t_far;
        let mut a = self.eval(0.0);
        for i in 0..CURVE_SEGMENTS {
            let b = self.eval((i + 1) as f32 / CURVE_SEGMENTS as f32);
            let radius = a.w.abs().max(b.w.abs());
            if let Some(s) = capsule_intersect(ray.origin, dir, a.truncate(), b.truncate(), radius) {
                let t = s / length;
                if t >= ray.t_near && t < t_far {
                    t_far = t;
                    best = Some((t, (i as f32 + 0.5) / CURVE_SEGMENTS as f32));
                }
            }
            a = b;
        }
        best
    }
}

/// Entry distance of a normalized ray into a capsule, if any. The capsule is
/// the union of a finite cylinder and two spheres, so its entry is the
/// nearest entry over those parts.
fn capsule_intersect(ro: Vec3, rd: Vec3, pa: Vec3, pb: Vec3, radius: f32) -> Option<f32> {
    let mut best: Option<f32> = None;
    let mut keep = |t: f32| {
        if t.is_finite() {
            best = Some(best.map_or(t, |b: f32| b.min(t)));
        }
    };

    let ba = pb - pa;
    let oa = ro - pa;
    let baba = ba.dot(ba);
    let bard = ba.dot(rd);
    let baoa = ba.dot(oa);
    let rdoa = rd.dot(oa);
    let oaoa = oa.dot(oa);

    let a = baba - bard * bard;
    if baba > 0.0 && a > f32::EPSILON * baba {
        let b = baba * rdoa - baoa * bard;
        let c = baba * oaoa - baoa * baoa - radius * radius * baba;
        let h = b * b - a * c;
        if h >= 0.0 {
            let t = (-b - h.sqrt()) / a;
            let y = baoa + t * bard;
            if y > 0.0 && y < baba {
                keep(t);
            }
        }
    }

    for center in [pa, pb] {
        let oc = ro - center;
        let b = rd.dot(oc);
        let h = b * b - (oc.dot(oc) - radius * radius);
        if h >= 0.0 {
            keep(-b - h.sqrt());
        }
    }

    best
}

pub trait TriangleSet: Sync {
    fn len(&self) -> usize;

    fn triangle(&self, prim_id: u32) -> Triangle;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub trait CurveSet: Sync {
    fn len(&self) -> usize;

    fn curve(&self, prim_id: u32) -> BezierCurve;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Copy, Clone)]
pub enum Geometry<'a> {
    Triangles(&'a dyn TriangleSet),
    Curves(&'a dyn CurveSet),
}

impl<'a> Geometry<'a> {
    pub fn kind(&self) -> GeometryKind {
        match self {
            Geometry::Triangles(_) => GeometryKind::Triangles,
            Geometry::Curves(_) => GeometryKind::Curves,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Geometry::Triangles(set) => set.len(),
            Geometry::Curves(set) => set.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bounds(&self, prim_id: u32) -> Aabb {
        match self {
            Geometry::Triangles(set) => set.triangle(prim_id).bounds(),
            Geometry::Curves(set) => set.curve(prim_id).bounds(),
        }
    }
}

/// Scene collaborator. Geometry ids are stable indices; removed or disabled
/// geometries answer `None`.
pub trait Scene: Send + Sync {
    fn geometry_count(&self) -> usize;

    fn geometry(&self, geom_id: u32) -> Option<Geometry<'_>>;

    /// Static scenes let the builder drop temporary build data afterwards.
    fn is_static(&self) -> bool {
        true
    }

    /// Called while references are generated with the number of primitives
    /// just processed.
    fn progress(&self, _primitives: usize) {}
}

/// Number of live primitives of `kind` in the scene.
pub fn count_primitives(scene: &dyn Scene, kind: GeometryKind) -> usize {
    (0..scene.geometry_count() as u32)
        .filter_map(|id| scene.geometry(id))
        .filter(|geometry| geometry.kind() == kind)
        .map(|geometry| geometry.len())
        .sum()
}
