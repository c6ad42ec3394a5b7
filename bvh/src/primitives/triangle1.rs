use super::{fetch_triangle, read_vec3, write_vec3, LeafPrimitive, QueryContext};
use crate::{Aabb, BuildError, Frame, GeometryKind, Hit, PrimRef, Ray, Scene, Triangle};

/// One triangle per block: three vertices then geometry and primitive id.
pub struct Triangle1;

impl Triangle1 {
    fn triangle(block: &[u32]) -> Triangle {
        Triangle::new(read_vec3(block, 0), read_vec3(block, 3), read_vec3(block, 6))
    }
}

impl LeafPrimitive for Triangle1 {
    const NAME: &'static str = "triangle1";
    const KIND: GeometryKind = GeometryKind::Triangles;
    const BLOCK_SIZE: usize = 1;
    const BLOCK_WORDS: usize = 11;

    fn write_block(scene: &dyn Scene, prims: &[PrimRef], block: &mut [u32]) -> Result<(), BuildError> {
        let prim = &prims[0];
        let tri = fetch_triangle(scene, prim)?;
        write_vec3(block, 0, tri.vertex0);
        write_vec3(block, 3, tri.vertex1);
        write_vec3(block, 6, tri.vertex2);
        block[9] = prim.geom_id;
        block[10] = prim.prim_id;
        Ok(())
    }

    #[inline(always)]
    fn intersect_block(block: &[u32], ray: &mut Ray, ctx: &QueryContext) -> bool {
        if !ctx.is_live(block[9]) {
            return false;
        }
        match Self::triangle(block).intersect(ray) {
            Some((t, u, v)) => {
                ray.record(
                    t,
                    Hit {
                        geom_id: block[9],
                        prim_id: block[10],
                        u,
                        v,
                    },
                );
                true
            }
            None => false,
        }
    }

    #[inline(always)]
    fn occluded_block(block: &[u32], ray: &Ray, ctx: &QueryContext) -> bool {
        ctx.is_live(block[9]) && Self::triangle(block).intersect(ray).is_some()
    }

    fn item(block: &[u32], _lane: usize) -> Option<(u32, u32)> {
        Some((block[9], block[10]))
    }

    fn item_bounds(block: &[u32], _lane: usize, frame: &Frame) -> Aabb {
        let tri = Self::triangle(block);
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
    use crate::primitives::{create_leaf, for_each_leaf_item, intersect_leaf, occluded_leaf};
    use crate::{BlockAllocator, Frame};
    use bitvec::prelude::*;
    use glam::*;

    fn scene() -> Mixed {
        Mixed {
            tris: Tris(vec![
                Triangle::new(Vec3::new(0.0, 0.0, 1.0), Vec3::new(1.0, 0.0, 1.0), Vec3::new(0.0, 1.0, 1.0)),
                Triangle::new(Vec3::new(0.0, 0.0, 2.0), Vec3::new(1.0, 0.0, 2.0), Vec3::new(0.0, 1.0, 2.0)),
            ]),
            curves: Curves(vec![]),
        }
    }

    #[test]
    fn leaf_reports_nearest_triangle() {
        let scene = scene();
        let prims: Vec<PrimRef> = (0..2)
            .rev()
            .map(|i| PrimRef::new(scene.tris.0[i].bounds(), 0, i as u32))
            .collect();

        let alloc = BlockAllocator::new(1024, None);
        let leaf = {
            let mut local = alloc.cached();
            create_leaf::<Triangle1>(&scene, &prims, &mut local).unwrap()
        };
        let arena = alloc.finish();
        let words = match leaf {
            crate::NodeRef::Leaf(r) => arena.words(r),
            _ => panic!("expected a leaf"),
        };
        assert_eq!(words[0], 2);

        let ctx = QueryContext::default();
        let mut ray = Ray::new(Vec3::new(0.2, 0.2, 0.0), Vec3::Z);
        assert!(intersect_leaf::<Triangle1>(words, &mut ray, &ctx));
        assert_eq!(ray.hit.unwrap().prim_id, 0);
        assert!((ray.t_far - 1.0).abs() < 1e-6);

        let mut ids = Vec::new();
        for_each_leaf_item::<Triangle1, _>(words, &Frame::IDENTITY, |g, p, bounds| {
            assert_eq!(bounds, scene.tris.0[p as usize].bounds());
            ids.push((g, p));
        });
        assert_eq!(ids, vec![(0, 1), (0, 0)]);

        let deleted = bitvec![1];
        let masked = QueryContext::new(&deleted);
        let ray = Ray::new(Vec3::new(0.2, 0.2, 0.0), Vec3::Z);
        assert!(!occluded_leaf::<Triangle1>(words, &ray, &masked));
        assert!(occluded_leaf::<Triangle1>(words, &ray, &ctx));
    }

    #[test]
    fn missing_geometry_is_an_error() {
        let scene = scene();
        let prims = [PrimRef::new(Aabb::empty(), 1, 0)];
        let alloc = BlockAllocator::new(1024, None);
        let mut local = alloc.cached();
        assert!(matches!(
            create_leaf::<Triangle1>(&scene, &prims, &mut local),
            Err(BuildError::MissingGeometry { geom_id: 1 })
        ));
    }
}
