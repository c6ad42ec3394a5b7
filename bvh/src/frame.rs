use glam::*;
use serde::{Deserialize, Serialize};

use crate::Aabb;

/// Orthonormal basis used by oriented nodes. Points are taken into the frame
/// by projecting onto the three axes; the frame has no translation, so ray
/// distances are identical in world and local space.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub vx: Vec3,
    pub vy: Vec3,
    pub vz: Vec3,
}

impl Default for Frame {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Frame {
    pub const IDENTITY: Frame = Frame {
        vx: Vec3::X,
        vy: Vec3::Y,
        vz: Vec3::Z,
    };

    /// Builds a frame whose z axis points along `axis`. Falls back to the
    /// identity for zero-length or non-finite input.
    pub fn from_axis(axis: Vec3) -> Frame {
        if !axis.is_finite() || axis.length_squared() <= 1e-18 {
            return Self::IDENTITY;
        }

        let vz = axis.normalize();
        let vx = vz.any_orthonormal_vector();
        let vy = vz.cross(vx);
        Frame { vx, vy, vz }
    }

    pub fn from_rows(rows: [f32; 9]) -> Frame {
        Frame {
            vx: Vec3::new(rows[0], rows[1], rows[2]),
            vy: Vec3::new(rows[3], rows[4], rows[5]),
            vz: Vec3::new(rows[6], rows[7], rows[8]),
        }
    }

    pub fn rows(&self) -> [f32; 9] {
        [
            self.vx.x, self.vx.y, self.vx.z, self.vy.x, self.vy.y, self.vy.z, self.vz.x, self.vz.y,
            self.vz.z,
        ]
    }

    #[inline(always)]
    pub fn to_local(&self, p: Vec3) -> Vec3 {
        Vec3::new(self.vx.dot(p), self.vy.dot(p), self.vz.dot(p))
    }

    /// Bounds of a world space box expressed in this frame.
    pub fn bounds_of(&self, aabb: &Aabb) -> Aabb {
        if aabb.is_empty() {
            return Aabb::empty();
        }

        let mut local = Aabb::empty();
        for corner in aabb.all_corners().iter() {
            local.grow(self.to_local(*corner));
        }
        local
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_is_orthonormal() {
        for axis in [Vec3::X, Vec3::new(1.0, 2.0, 3.0), Vec3::new(-0.3, 0.0, 0.1), Vec3::NEG_Z] {
            let f = Frame::from_axis(axis);
            assert!((f.vx.length() - 1.0).abs() < 1e-5);
            assert!((f.vy.length() - 1.0).abs() < 1e-5);
            assert!((f.vz.length() - 1.0).abs() < 1e-5);
            assert!(f.vx.dot(f.vy).abs() < 1e-5);
            assert!(f.vx.dot(f.vz).abs() < 1e-5);
            assert!(f.vy.dot(f.vz).abs() < 1e-5);
            assert!((f.vz - axis.normalize()).length() < 1e-5);
        }
    }

    #[test]
    fn degenerate_axis_gives_identity() {
        assert_eq!(Frame::from_axis(Vec3::ZERO), Frame::IDENTITY);
        assert_eq!(Frame::from_axis(Vec3::new(f32::NAN, 0.0, 1.0)), Frame::IDENTITY);
    }

    #[test]
    fn projection_preserves_length() {
        let f = Frame::from_axis(Vec3::new(0.2, -1.0, 0.7));
        let p = Vec3::new(3.0, -2.0, 5.0);
        let local = f.to_local(p);
        assert!((local.length() - p.length()).abs() < 1e-4);
        assert!((local.z - p.dot(f.vz)).abs() < 1e-6);
        assert_eq!(Frame::from_rows(f.rows()), f);
    }
}
