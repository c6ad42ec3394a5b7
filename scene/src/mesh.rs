use glam::*;
use rayon::prelude::*;
use rtaccel_bvh::{Aabb, BezierCurve, Triangle};
use serde::{Deserialize, Serialize};

use crate::SceneError;

/// Indexed triangle mesh.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriangleMesh {
    positions: Vec<Vec3>,
    indices: Vec<[u32; 3]>,
    bounds: Aabb,
}

impl TriangleMesh {
    pub fn new(positions: Vec<Vec3>, indices: Vec<[u32; 3]>) -> Result<TriangleMesh, SceneError> {
        let count = positions.len();
        if let Some(index) = indices.iter().flatten().find(|&&i| i as usize >= count) {
            return Err(SceneError::IndexOutOfRange {
                index: *index as usize,
                count,
            });
        }

        Ok(Self::from_parts(positions, indices))
    }

    /// Indices must already be in range.
    pub(crate) fn from_parts(positions: Vec<Vec3>, indices: Vec<[u32; 3]>) -> TriangleMesh {
        let bounds = indices
            .par_iter()
            .map(|tri| Aabb::from_points(&tri.map(|i| positions[i as usize])))
            .reduce(Aabb::empty, |a, b| a.union_of(&b));

        TriangleMesh {
            positions,
            indices,
            bounds,
        }
    }

    /// Mesh of unconnected triangles, three vertices each.
    pub fn from_triangles(triangles: &[Triangle]) -> TriangleMesh {
        let mut positions = Vec::with_capacity(triangles.len() * 3);
        let mut indices = Vec::with_capacity(triangles.len());
        let mut bounds = Aabb::empty();
        for (i, tri) in triangles.iter().enumerate() {
            positions.extend_from_slice(&[tri.vertex0, tri.vertex1, tri.vertex2]);
            let first = (i * 3) as u32;
            indices.push([first, first + 1, first + 2]);
            bounds.grow_bb(&tri.bounds());
        }

        TriangleMesh {
            positions,
            indices,
            bounds,
        }
    }

    pub fn positions(&self) -> &[Vec3] {
        &self.positions
    }

    pub fn indices(&self) -> &[[u32; 3]] {
        &self.indices
    }

    pub fn bounds(&self) -> Aabb {
        self.bounds
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

impl rtaccel_bvh::TriangleSet for TriangleMesh {
    fn len(&self) -> usize {
        self.indices.len()
    }

    fn triangle(&self, prim_id: u32) -> Triangle {
        let [a, b, c] = self.indices[prim_id as usize];
        Triangle::new(
            self.positions[a as usize],
            self.positions[b as usize],
            self.positions[c as usize],
        )
    }
}

/// Cubic Bézier curves sharing one control point buffer. Each curve is
/// named by the index of its first of four consecutive control points; `w`
/// holds the radius.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CurveSet {
    points: Vec<Vec4>,
    curves: Vec<u32>,
    bounds: Aabb,
}

impl CurveSet {
    pub fn new(points: Vec<Vec4>, curves: Vec<u32>) -> Result<CurveSet, SceneError> {
        let count = points.len();
        if let Some(first) = curves.iter().find(|&&first| first as usize + 3 >= count) {
            return Err(SceneError::IndexOutOfRange {
                index: *first as usize + 3,
                count,
            });
        }

        Ok(Self::from_parts(points, curves))
    }

    pub(crate) fn from_parts(points: Vec<Vec4>, curves: Vec<u32>) -> CurveSet {
        let bounds = curves
            .iter()
            .map(|&first| Self::segment(&points, first).bounds())
            .collect();

        CurveSet { points, curves, bounds }
    }

    fn segment(points: &[Vec4], first: u32) -> BezierCurve {
        let first = first as usize;
        BezierCurve::new([points[first], points[first + 1], points[first + 2], points[first + 3]])
    }

    pub fn points(&self) -> &[Vec4] {
        &self.points
    }

    pub fn curves(&self) -> &[u32] {
        &self.curves
    }

    pub fn bounds(&self) -> Aabb {
        self.bounds
    }

    pub fn len(&self) -> usize {
        self.curves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.curves.is_empty()
    }
}

impl rtaccel_bvh::CurveSet for CurveSet {
    fn len(&self) -> usize {
        self.curves.len()
    }

    fn curve(&self, prim_id: u32) -> BezierCurve {
        Self::segment(&self.points, self.curves[prim_id as usize])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtaccel_bvh::{CurveSet as _, TriangleSet};

    #[test]
    fn mesh_rejects_dangling_indices() {
        let positions = vec![Vec3::ZERO, Vec3::X, Vec3::Y];
        assert!(TriangleMesh::new(positions.clone(), vec![[0, 1, 2]]).is_ok());
        match TriangleMesh::new(positions, vec![[0, 1, 3]]) {
            Err(SceneError::IndexOutOfRange { index: 3, count: 3 }) => (),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn mesh_shares_vertices() {
        let positions = vec![Vec3::ZERO, Vec3::X, Vec3::Y, Vec3::ONE];
        let mesh = TriangleMesh::new(positions, vec![[0, 1, 2], [1, 3, 2]]).unwrap();
        assert_eq!(TriangleSet::len(&mesh), 2);
        assert_eq!(mesh.triangle(1).vertex1, Vec3::ONE);
        assert_eq!(mesh.bounds(), Aabb::from((Vec3::ZERO, Vec3::new(1.0, 1.0, 1.0))));
    }

    #[test]
    fn curves_index_into_shared_points() {
        let points: Vec<Vec4> = (0..7).map(|i| Vec4::new(i as f32, 0.0, 0.0, 0.5)).collect();
        let set = CurveSet::new(points.clone(), vec![0, 3]).unwrap();
        assert_eq!(set.curve(1).points[0], points[3]);
        assert_eq!(set.bounds().min, [-0.5, -0.5, -0.5]);
        assert_eq!(set.bounds().max, [6.5, 0.5, 0.5]);
        assert!(CurveSet::new(points, vec![4]).is_err());
    }
}
