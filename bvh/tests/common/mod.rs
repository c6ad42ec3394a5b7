#![allow(dead_code)]

use glam::*;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rtaccel_bvh::*;

pub struct Tris(pub Vec<Triangle>);

impl TriangleSet for Tris {
    fn len(&self) -> usize {
        self.0.len()
    }

    fn triangle(&self, prim_id: u32) -> Triangle {
        self.0[prim_id as usize]
    }
}

pub struct Strands(pub Vec<BezierCurve>);

impl CurveSet for Strands {
    fn len(&self) -> usize {
        self.0.len()
    }

    fn curve(&self, prim_id: u32) -> BezierCurve {
        self.0[prim_id as usize]
    }
}

pub enum Slot {
    Triangles(Tris),
    Curves(Strands),
}

#[derive(Default)]
pub struct TestScene {
    pub slots: Vec<Slot>,
    pub is_static: bool,
}

impl TestScene {
    pub fn with_triangles(mut self, tris: Vec<Triangle>) -> Self {
        self.slots.push(Slot::Triangles(Tris(tris)));
        self
    }

    pub fn with_curves(mut self, curves: Vec<BezierCurve>) -> Self {
        self.slots.push(Slot::Curves(Strands(curves)));
        self
    }

    pub fn triangles(&self) -> impl Iterator<Item = (u32, u32, Triangle)> + '_ {
        self.slots.iter().enumerate().flat_map(|(geom_id, slot)| {
            let tris: &[Triangle] = match slot {
                Slot::Triangles(t) => &t.0,
                Slot::Curves(_) => &[],
            };
            tris.iter()
                .enumerate()
                .map(move |(prim_id, tri)| (geom_id as u32, prim_id as u32, *tri))
        })
    }

    pub fn curves(&self) -> impl Iterator<Item = (u32, u32, BezierCurve)> + '_ {
        self.slots.iter().enumerate().flat_map(|(geom_id, slot)| {
            let curves: &[BezierCurve] = match slot {
                Slot::Curves(c) => &c.0,
                Slot::Triangles(_) => &[],
            };
            curves
                .iter()
                .enumerate()
                .map(move |(prim_id, curve)| (geom_id as u32, prim_id as u32, *curve))
        })
    }
}

impl Scene for TestScene {
    fn geometry_count(&self) -> usize {
        self.slots.len()
    }

    fn geometry(&self, geom_id: u32) -> Option<Geometry<'_>> {
        match self.slots.get(geom_id as usize)? {
            Slot::Triangles(t) => Some(Geometry::Triangles(t)),
            Slot::Curves(c) => Some(Geometry::Curves(c)),
        }
    }

    fn is_static(&self) -> bool {
        self.is_static
    }
}

pub fn rng(seed: u64) -> SmallRng {
    SmallRng::seed_from_u64(seed)
}

fn random_point(rng: &mut SmallRng, center: Vec3, extent: f32) -> Vec3 {
    center
        + vec3(
            rng.gen_range(-extent..extent),
            rng.gen_range(-extent..extent),
            rng.gen_range(-extent..extent),
        )
}

/// Small triangles scattered in a cube around `center`.
pub fn random_triangles(rng: &mut SmallRng, count: usize, center: Vec3, extent: f32) -> Vec<Triangle> {
    (0..count)
        .map(|_| {
            let v0 = random_point(rng, center, extent);
            let v1 = v0 + random_point(rng, Vec3::ZERO, 0.25 * extent.max(1.0));
            let v2 = v0 + random_point(rng, Vec3::ZERO, 0.25 * extent.max(1.0));
            Triangle::new(v0, v1, v2)
        })
        .collect()
}

/// Thin, mostly parallel strands starting on a sphere and growing outwards.
pub fn hair_ball(rng: &mut SmallRng, count: usize, radius: f32) -> Vec<BezierCurve> {
    (0..count)
        .map(|_| {
            let dir = loop {
                let d = random_point(rng, Vec3::ZERO, 1.0);
                if d.length_squared() > 0.01 && d.length_squared() <= 1.0 {
                    break d.normalize();
                }
            };
            let root = dir * radius;
            let bend = random_point(rng, Vec3::ZERO, 0.05 * radius);
            let thickness = 0.01 * radius;
            BezierCurve::new([
                root.extend(thickness),
                (root + dir * 0.3 * radius + bend).extend(thickness),
                (root + dir * 0.6 * radius + bend * 2.0).extend(thickness),
                (root + dir * radius + bend * 3.0).extend(thickness * 0.5),
            ])
        })
        .collect()
}

/// Rays from points around `bounds` aimed at random points inside it.
pub fn random_rays(rng: &mut SmallRng, bounds: &Aabb, count: usize) -> Vec<Ray> {
    let center = bounds.center();
    let extent = bounds.lengths().max_element().max(1.0);
    (0..count)
        .map(|_| {
            let origin = random_point(rng, center, extent);
            let target = random_point(rng, center, 0.5 * extent);
            Ray::new(origin, target - origin)
        })
        .collect()
}

/// Closest distance over every triangle and curve of the scene.
pub fn brute_force(scene: &TestScene, kind: GeometryKind, ray: &Ray) -> Option<f32> {
    let mut best: Option<f32> = None;
    let mut keep = |t: f32| best = Some(best.map_or(t, |b: f32| b.min(t)));
    match kind {
        GeometryKind::Triangles => {
            for (_, _, tri) in scene.triangles() {
                if let Some((t, _, _)) = tri.intersect(ray) {
                    keep(t);
                }
            }
        }
        GeometryKind::Curves => {
            for (_, _, curve) in scene.curves() {
                if let Some((t, _)) = curve.intersect(ray) {
                    keep(t);
                }
            }
        }
    }
    best
}

pub fn approx_eq(a: f32, b: f32) -> bool {
    (a - b).abs() <= 1e-4 * a.abs().max(b.abs()).max(1.0)
}
