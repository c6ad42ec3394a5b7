use glam::*;
use rayon::prelude::*;

use crate::{Aabb, GeometryKind, Scene};

/// Number of words a reference occupies once its storage is reused by the
/// block allocator.
pub const PRIM_REF_WORDS: usize = std::mem::size_of::<PrimRef>() / 4;

/// Lightweight handle to one scene primitive: its world bounds plus ids.
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct PrimRef {
    pub bounds: Aabb,
    pub geom_id: u32,
    pub prim_id: u32,
}

impl PrimRef {
    pub fn new(bounds: Aabb, geom_id: u32, prim_id: u32) -> Self {
        Self {
            bounds,
            geom_id,
            prim_id,
        }
    }

    pub fn center(&self) -> Vec3 {
        self.bounds.center()
    }

    /// Combined id, ordered by geometry first.
    pub fn id64(&self) -> u64 {
        ((self.geom_id as u64) << 32) | self.prim_id as u64
    }
}

/// Aggregate information over a range of references.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct PrimInfo {
    pub geom_bounds: Aabb,
    pub cent_bounds: Aabb,
    pub count: usize,
}

impl Default for PrimInfo {
    fn default() -> Self {
        Self::empty()
    }
}

impl PrimInfo {
    pub const fn empty() -> Self {
        Self {
            geom_bounds: Aabb::empty(),
            cent_bounds: Aabb::empty(),
            count: 0,
        }
    }

    pub fn add(&mut self, prim: &PrimRef) {
        self.geom_bounds.grow_bb(&prim.bounds);
        self.cent_bounds.grow(prim.center());
        self.count += 1;
    }

    pub fn merge(mut self, other: PrimInfo) -> PrimInfo {
        self.geom_bounds.grow_bb(&other.geom_bounds);
        self.cent_bounds.grow_bb(&other.cent_bounds);
        self.count += other.count;
        self
    }

    pub fn from_prims(prims: &[PrimRef]) -> PrimInfo {
        prims.iter().fold(PrimInfo::empty(), |mut info, prim| {
            info.add(prim);
            info
        })
    }
}

/// Fills `prims` with one reference per live primitive of `kind`, ordered by
/// geometry id then primitive id. Degenerate primitives are kept. The vector
/// is reused so its capacity survives between builds.
pub fn create_prim_ref_array(scene: &dyn Scene, kind: GeometryKind, prims: &mut Vec<PrimRef>) -> PrimInfo {
    let geometries: Vec<(u32, usize)> = (0..scene.geometry_count() as u32)
        .filter_map(|id| scene.geometry(id).map(|g| (id, g)))
        .filter(|(_, g)| g.kind() == kind && !g.is_empty())
        .map(|(id, g)| (id, g.len()))
        .collect();

    let total: usize = geometries.iter().map(|(_, len)| *len).sum();
    prims.clear();
    prims.resize(total, PrimRef::new(Aabb::empty(), 0, 0));

    let mut slices = Vec::with_capacity(geometries.len());
    let mut rest = prims.as_mut_slice();
    for (geom_id, len) in geometries.iter() {
        let (head, tail) = rest.split_at_mut(*len);
        slices.push((*geom_id, head));
        rest = tail;
    }

    slices
        .into_par_iter()
        .map(|(geom_id, slice)| {
            let mut info = PrimInfo::empty();
            if let Some(geometry) = scene.geometry(geom_id) {
                for (prim_id, prim) in slice.iter_mut().enumerate() {
                    let prim_id = prim_id as u32;
                    *prim = PrimRef::new(geometry.bounds(prim_id), geom_id, prim_id);
                    info.add(prim);
                }
            }
            scene.progress(slice.len());
            info
        })
        .reduce(PrimInfo::empty, PrimInfo::merge)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Geometry, Triangle, TriangleSet};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Tris(Vec<Triangle>);

    impl TriangleSet for Tris {
        fn len(&self) -> usize {
            self.0.len()
        }

        fn triangle(&self, prim_id: u32) -> Triangle {
            self.0[prim_id as usize]
        }
    }

    struct TwoMeshes {
        meshes: Vec<Option<Tris>>,
        progress: AtomicUsize,
    }

    impl Scene for TwoMeshes {
        fn geometry_count(&self) -> usize {
            self.meshes.len()
        }

        fn geometry(&self, geom_id: u32) -> Option<Geometry<'_>> {
            self.meshes
                .get(geom_id as usize)
                .and_then(|m| m.as_ref())
                .map(|m| Geometry::Triangles(m as &dyn TriangleSet))
        }

        fn progress(&self, primitives: usize) {
            self.progress.fetch_add(primitives, Ordering::SeqCst);
        }
    }

    fn tri(offset: f32) -> Triangle {
        Triangle::new(
            Vec3::new(offset, 0.0, 0.0),
            Vec3::new(offset + 1.0, 0.0, 0.0),
            Vec3::new(offset, 1.0, 0.0),
        )
    }

    #[test]
    fn references_follow_geometry_order() {
        let scene = TwoMeshes {
            meshes: vec![
                Some(Tris(vec![tri(0.0), tri(2.0)])),
                None,
                Some(Tris(vec![tri(4.0), Triangle::new(Vec3::ONE, Vec3::ONE, Vec3::ONE)])),
            ],
            progress: AtomicUsize::new(0),
        };

        let mut prims = Vec::new();
        let info = create_prim_ref_array(&scene, GeometryKind::Triangles, &mut prims);

        assert_eq!(info.count, 4);
        assert_eq!(prims.len(), 4);
        let ids: Vec<(u32, u32)> = prims.iter().map(|p| (p.geom_id, p.prim_id)).collect();
        assert_eq!(ids, vec![(0, 0), (0, 1), (2, 0), (2, 1)]);
        assert_eq!(info.geom_bounds, prims.iter().map(|p| p.bounds).collect::<Aabb>());
        assert_eq!(scene.progress.load(Ordering::SeqCst), 4);

        // Degenerate triangle is retained with a point box.
        assert_eq!(prims[3].bounds.min, [1.0; 3]);
        assert_eq!(prims[3].bounds.max, [1.0; 3]);
    }

    #[test]
    fn filter_by_kind() {
        let scene = TwoMeshes {
            meshes: vec![Some(Tris(vec![tri(0.0)]))],
            progress: AtomicUsize::new(0),
        };
        let mut prims = vec![PrimRef::new(Aabb::empty(), 9, 9)];
        let info = create_prim_ref_array(&scene, GeometryKind::Curves, &mut prims);
        assert_eq!(info.count, 0);
        assert!(prims.is_empty());
    }
}
