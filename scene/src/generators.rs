//! Procedural test content.

use glam::*;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rtaccel_bvh::Triangle;

use crate::{CurveSet, TriangleMesh};

/// Flat grid of `cells * cells` quads, two triangles each, in the `z = 0`
/// plane spanning `[0, size]` on x and y.
pub fn triangle_grid(cells: usize, size: f32) -> TriangleMesh {
    let cells = cells.max(1);
    let step = size / cells as f32;
    let row = cells + 1;

    let positions: Vec<Vec3> = (0..row * row)
        .map(|i| vec3((i % row) as f32 * step, (i / row) as f32 * step, 0.0))
        .collect();

    let mut indices = Vec::with_capacity(cells * cells * 2);
    for y in 0..cells {
        for x in 0..cells {
            let i = (y * row + x) as u32;
            let r = row as u32;
            indices.push([i, i + 1, i + r]);
            indices.push([i + 1, i + r + 1, i + r]);
        }
    }

    TriangleMesh::from_parts(positions, indices)
}

fn point_in_cube(rng: &mut SmallRng, center: Vec3, extent: f32) -> Vec3 {
    center
        + vec3(
            rng.gen_range(-extent..=extent),
            rng.gen_range(-extent..=extent),
            rng.gen_range(-extent..=extent),
        )
}

/// `count` small triangles scattered around `center`.
pub fn triangle_cluster(rng: &mut SmallRng, count: usize, center: Vec3, extent: f32, size: f32) -> TriangleMesh {
    let triangles: Vec<Triangle> = (0..count)
        .map(|_| {
            let v0 = point_in_cube(rng, center, extent);
            Triangle::new(
                v0,
                point_in_cube(rng, v0, size),
                point_in_cube(rng, v0, size),
            )
        })
        .collect();
    TriangleMesh::from_triangles(&triangles)
}

/// Two clusters of `count / 2` triangles, `distance` apart on the x axis.
pub fn two_clumps(seed: u64, count: usize, distance: f32) -> [TriangleMesh; 2] {
    let mut rng = SmallRng::seed_from_u64(seed);
    let half = distance * 0.5;
    let extent = (distance * 0.05).max(f32::EPSILON);
    [
        triangle_cluster(&mut rng, count / 2, vec3(-half, 0.0, 0.0), extent, extent * 0.1),
        triangle_cluster(&mut rng, count - count / 2, vec3(half, 0.0, 0.0), extent, extent * 0.1),
    ]
}

fn unit_direction(rng: &mut SmallRng) -> Vec3 {
    loop {
        let d = point_in_cube(rng, Vec3::ZERO, 1.0);
        let len2 = d.length_squared();
        if len2 > 1e-4 && len2 <= 1.0 {
            return d / len2.sqrt();
        }
    }
}

/// `count` strands rooted on a sphere of `radius`, growing outwards by
/// `length` with a slight random bend and tapering thickness.
pub fn hair_ball(seed: u64, count: usize, radius: f32, length: f32, thickness: f32) -> CurveSet {
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut points = Vec::with_capacity(count * 4);
    let mut curves = Vec::with_capacity(count);

    for _ in 0..count {
        let dir = unit_direction(&mut rng);
        let root = dir * radius;
        let bend = point_in_cube(&mut rng, Vec3::ZERO, 0.1 * length);

        curves.push(points.len() as u32);
        points.push(root.extend(thickness));
        points.push((root + dir * (length / 3.0) + bend * 0.3).extend(thickness * 0.8));
        points.push((root + dir * (2.0 * length / 3.0) + bend * 0.7).extend(thickness * 0.6));
        points.push((root + dir * length + bend).extend(thickness * 0.4));
    }

    CurveSet::from_parts(points, curves)
}
