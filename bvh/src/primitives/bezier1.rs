use glam::*;

use super::{fetch_curve, LeafPrimitive, QueryContext};
use crate::{Aabb, BezierCurve, BuildError, Frame, GeometryKind, Hit, PrimRef, Ray, Scene};

/// One cubic curve per block: four control points (`xyz` + radius) then
/// geometry and primitive id. Vertex data is copied so queries never touch
/// the scene.
pub struct Bezier1;

impl Bezier1 {
    #[inline(always)]
    fn curve(block: &[u32]) -> BezierCurve {
        let p = |i: usize| {
            Vec4::new(
                f32::from_bits(block[i * 4]),
                f32::from_bits(block[i * 4 + 1]),
                f32::from_bits(block[i * 4 + 2]),
                f32::from_bits(block[i * 4 + 3]),
            )
        };
        BezierCurve::new([p(0), p(1), p(2), p(3)])
    }
}

impl LeafPrimitive for Bezier1 {
    const NAME: &'static str = "bezier1";
    const KIND: GeometryKind = GeometryKind::Curves;
    const BLOCK_SIZE: usize = 1;
    const BLOCK_WORDS: usize = 18;
    const ORIENTABLE: bool = true;

    fn write_block(scene: &dyn Scene, prims: &[PrimRef], block: &mut [u32]) -> Result<(), BuildError> {
        let prim = &prims[0];
        let curve = fetch_curve(scene, prim).ok_or(BuildError::MissingGeometry { geom_id: prim.geom_id })?;
        for (i, p) in curve.points.iter().enumerate() {
            for (j, value) in p.to_array().iter().enumerate() {
                block[i * 4 + j] = value.to_bits();
            }
        }
        block[16] = prim.geom_id;
        block[17] = prim.prim_id;
        Ok(())
    }

    fn intersect_block(block: &[u32], ray: &mut Ray, ctx: &QueryContext) -> bool {
        if !ctx.is_live(block[16]) {
            return false;
        }
        match Self::curve(block).intersect(ray) {
            Some((t, u)) => {
                ray.record(
                    t,
                    Hit {
                        geom_id: block[16],
                        prim_id: block[17],
                        u,
                        v: 0.0,
                    },
                );
                true
            }
            None => false,
        }
    }

    fn occluded_block(block: &[u32], ray: &Ray, ctx: &QueryContext) -> bool {
        ctx.is_live(block[16]) && Self::curve(block).intersect(ray).is_some()
    }

    fn item(block: &[u32], _lane: usize) -> Option<(u32, u32)> {
        Some((block[16], block[17]))
    }

    fn item_bounds(block: &[u32], _lane: usize, frame: &Frame) -> Aabb {
        Self::curve(block).bounds_in(frame)
    }

    fn bounds_in_frame(scene: &dyn Scene, prim: &PrimRef, frame: &Frame) -> Aabb {
        match fetch_curve(scene, prim) {
            Some(curve) => curve.bounds_in(frame),
            None => frame.bounds_of(&prim.bounds),
        }
    }

    fn direction(scene: &dyn Scene, prim: &PrimRef) -> Vec3 {
        fetch_curve(scene, prim).map_or(Vec3::ZERO, |curve| curve.direction())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::test_scene::*;
    use crate::primitives::{create_leaf, for_each_leaf_item, intersect_leaf, occluded_leaf};
    use crate::{BlockAllocator, NodeRef};

    #[test]
    fn curve_leaf_round_trips_control_points() {
        let curve = BezierCurve::new([
            Vec4::new(0.0, 0.0, 0.0, 0.1),
            Vec4::new(0.0, 1.0, 0.0, 0.1),
            Vec4::new(0.0, 2.0, 0.0, 0.1),
            Vec4::new(0.0, 3.0, 0.0, 0.1),
        ]);
        let scene = Mixed {
            tris: Tris(vec![]),
            curves: Curves(vec![curve]),
        };
        let prims = [PrimRef::new(curve.bounds(), 1, 0)];

        let alloc = BlockAllocator::new(1024, None);
        let leaf = {
            let mut local = alloc.cached();
            create_leaf::<Bezier1>(&scene, &prims, &mut local).unwrap()
        };
        let arena = alloc.finish();
        let words = match leaf {
            NodeRef::Leaf(r) => arena.words(r),
            _ => panic!("expected a leaf"),
        };

        let frame = Frame::from_axis(curve.direction());
        for_each_leaf_item::<Bezier1, _>(words, &frame, |geom_id, prim_id, bounds| {
            assert_eq!((geom_id, prim_id), (1, 0));
            assert_eq!(bounds, curve.bounds_in(&frame));
        });
        assert_eq!(Bezier1::bounds_in_frame(&scene, &prims[0], &frame), curve.bounds_in(&frame));
        assert_eq!(Bezier1::direction(&scene, &prims[0]), Vec3::new(0.0, 3.0, 0.0));

        let mut ray = Ray::new(Vec3::new(0.0, 1.5, -1.0), Vec3::Z);
        assert!(intersect_leaf::<Bezier1>(words, &mut ray, &QueryContext::default()));
        assert!((ray.t_far - 0.9).abs() < 1e-3);
        assert_eq!(ray.hit.unwrap().geom_id, 1);

        let ray = Ray::new(Vec3::new(1.0, 1.5, -1.0), Vec3::Z);
        assert!(!occluded_leaf::<Bezier1>(words, &ray, &QueryContext::default()));
    }
}
