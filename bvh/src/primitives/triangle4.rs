use glam::*;

use super::{fetch_triangle, LeafPrimitive, QueryContext};
use crate::{Aabb, BuildError, Frame, GeometryKind, Hit, PrimRef, Ray, Scene, Triangle, INVALID_ID};

const LANES: usize = 4;
const GEOM: usize = 9 * LANES;
const PRIM: usize = 10 * LANES;

/// Four triangles per block in structure-of-arrays order: nine coordinate
/// rows of four lanes, then geometry ids and primitive ids. Unused lanes carry
/// an invalid primitive id.
pub struct Triangle4;

impl Triangle4 {
    #[inline(always)]
    fn vertex(block: &[u32], vertex: usize, lane: usize) -> Vec3 {
        let row = vertex * 3;
        Vec3::new(
            f32::from_bits(block[row * LANES + lane]),
            f32::from_bits(block[(row + 1) * LANES + lane]),
            f32::from_bits(block[(row + 2) * LANES + lane]),
        )
    }

    #[inline(always)]
    fn triangle(block: &[u32], lane: usize) -> Triangle {
        Triangle::new(
            Self::vertex(block, 0, lane),
            Self::vertex(block, 1, lane),
            Self::vertex(block, 2, lane),
        )
    }

    #[inline(always)]
    fn valid(block: &[u32], lane: usize, ctx: &QueryContext) -> bool {
        block[PRIM + lane] != INVALID_ID && ctx.is_live(block[GEOM + lane])
    }
}

impl LeafPrimitive for Triangle4 {
    const NAME: &'static str = "triangle4";
    const KIND: GeometryKind = GeometryKind::Triangles;
    const BLOCK_SIZE: usize = LANES;
    const BLOCK_WORDS: usize = 11 * LANES;

    fn write_block(scene: &dyn Scene, prims: &[PrimRef], block: &mut [u32]) -> Result<(), BuildError> {
        for lane in 0..LANES {
            let prim = match prims.get(lane) {
                Some(prim) => prim,
                None => {
                    block[GEOM + lane] = INVALID_ID;
                    block[PRIM + lane] = INVALID_ID;
                    continue;
                }
            };

            let tri = fetch_triangle(scene, prim)?;
            for (vertex, v) in [tri.vertex0, tri.vertex1, tri.vertex2].iter().enumerate() {
                for axis in 0..3 {
                    block[(vertex * 3 + axis) * LANES + lane] = v[axis].to_bits();
                }
            }
            block[GEOM + lane] = prim.geom_id;
            block[PRIM + lane] = prim.prim_id;
        }
        Ok(())
    }

    #[inline(always)]
    fn intersect_block(block: &[u32], ray: &mut Ray, ctx: &QueryContext) -> bool {
        let mut hit = false;
        for lane in 0..LANES {
            if !Self::valid(block, lane, ctx) {
                continue;
            }
            if let Some((t, u, v)) = Self::triangle(block, lane).intersect(ray) {
                ray.record(
                    t,
                    Hit {
                        geom_id: block[GEOM + lane],
                        prim_id: block[PRIM + lane],
                        u,
                        v,
                    },
                );
                hit = true;
            }
        }
        hit
    }

    #[inline(always)]
    fn occluded_block(block: &[u32], ray: &Ray, ctx: &QueryContext) -> bool {
        (0..LANES).any(|lane| Self::valid(block, lane, ctx) && Self::triangle(block, lane).intersect(ray).is_some())
    }

    fn item(block: &[u32], lane: usize) -> Option<(u32, u32)> {
        if block[PRIM + lane] == INVALID_ID {
            None
        } else {
            Some((block[GEOM + lane], block[PRIM + lane]))
        }
    }

    fn item_bounds(block: &[u32], lane: usize, frame: &Frame) -> Aabb {
        let tri = Self::triangle(block, lane);
        Aabb::from_points(&[
            frame.to_local(tri.vertex0),
            frame.to_local(tri.vertex1),
            frame.to_local(tri.vertex2),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::test_scene::*;
    use crate::primitives::{create_leaf, for_each_leaf_item, intersect_leaf};
    use crate::{BlockAllocator, NodeRef};

    #[test]
    fn partial_block_marks_unused_lanes() {
        let tris: Vec<Triangle> = (0..5)
            .map(|i| {
                let z = 5.0 - i as f32;
                Triangle::new(Vec3::new(0.0, 0.0, z), Vec3::new(1.0, 0.0, z), Vec3::new(0.0, 1.0, z))
            })
            .collect();
        let scene = Mixed {
            tris: Tris(tris),
            curves: Curves(vec![]),
        };
        let prims: Vec<PrimRef> = scene
            .tris
            .0
            .iter()
            .enumerate()
            .map(|(i, t)| PrimRef::new(t.bounds(), 0, i as u32))
            .collect();

        let alloc = BlockAllocator::new(1024, None);
        let leaf = {
            let mut local = alloc.cached();
            create_leaf::<Triangle4>(&scene, &prims, &mut local).unwrap()
        };
        let arena = alloc.finish();
        let words = match leaf {
            NodeRef::Leaf(r) => arena.words(r),
            _ => panic!("expected a leaf"),
        };

        let mut count = 0;
        for_each_leaf_item::<Triangle4, _>(words, &Frame::IDENTITY, |_, _, _| count += 1);
        assert_eq!(count, 5);

        let mut ray = Ray::new(Vec3::new(0.1, 0.1, 0.0), Vec3::Z);
        assert!(intersect_leaf::<Triangle4>(words, &mut ray, &QueryContext::default()));
        let hit = ray.hit.unwrap();
        assert_eq!(hit.prim_id, 4);
        assert!((ray.t_far - 1.0).abs() < 1e-6);
    }
}
