use glam::*;

/// Marks "no geometry" in packet hit slots.
pub const INVALID_ID: u32 = u32::MAX;

/// Inputs closer to zero than this are replaced before taking the reciprocal.
const MIN_RCP_INPUT: f32 = 1e-18;

/// Reciprocal that never divides by zero: components closer to zero than
/// `MIN_RCP_INPUT` are replaced by a value of that magnitude carrying the
/// component's sign, so slab tests on axis-parallel rays never produce NaN.
#[inline(always)]
pub fn rcp_safe(v: Vec3) -> Vec3 {
    let fix = |x: f32| {
        if x.abs() < MIN_RCP_INPUT {
            MIN_RCP_INPUT.copysign(x)
        } else {
            x
        }
    };
    Vec3::ONE / Vec3::new(fix(v.x), fix(v.y), fix(v.z))
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Hit {
    pub geom_id: u32,
    pub prim_id: u32,
    pub u: f32,
    pub v: f32,
}

/// A single ray. Closest-hit queries shrink `t_far` to the hit distance and
/// fill `hit`; occlusion queries only ever set `terminated`.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
    pub t_near: f32,
    pub t_far: f32,
    pub hit: Option<Hit>,
    pub terminated: bool,
}

impl Ray {
    pub fn new(origin: Vec3, direction: Vec3) -> Ray {
        Self::segment(origin, direction, 0.0, f32::INFINITY)
    }

    pub fn segment(origin: Vec3, direction: Vec3, t_near: f32, t_far: f32) -> Ray {
        Ray {
            origin,
            direction,
            t_near,
            t_far,
            hit: None,
            terminated: false,
        }
    }

    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }

    /// Records a hit at distance `t`. Callers have already checked that `t`
    /// lies inside `[t_near, t_far)`.
    pub fn record(&mut self, t: f32, hit: Hit) {
        self.t_far = t;
        self.hit = Some(hit);
    }
}

/// Structure-of-arrays batch of `W` rays. Lanes are processed one at a time
/// against a shared tree; an active mask selects which lanes take part.
#[derive(Debug, Clone, PartialEq)]
pub struct RayPacket<const W: usize> {
    pub origin: [[f32; W]; 3],
    pub direction: [[f32; W]; 3],
    pub t_near: [f32; W],
    pub t_far: [f32; W],
    pub geom_id: [u32; W],
    pub prim_id: [u32; W],
    pub u: [f32; W],
    pub v: [f32; W],
    pub terminated: [bool; W],
}

pub type RayPacket4 = RayPacket<4>;
pub type RayPacket8 = RayPacket<8>;
pub type RayPacket16 = RayPacket<16>;

impl<const W: usize> Default for RayPacket<W> {
    fn default() -> Self {
        Self {
            origin: [[0.0; W]; 3],
            direction: [[0.0; W]; 3],
            t_near: [0.0; W],
            t_far: [f32::INFINITY; W],
            geom_id: [INVALID_ID; W],
            prim_id: [INVALID_ID; W],
            u: [0.0; W],
            v: [0.0; W],
            terminated: [false; W],
        }
    }
}

impl<const W: usize> RayPacket<W> {
    pub fn from_rays(rays: &[Ray; W]) -> Self {
        let mut packet = Self::default();
        for (lane, ray) in rays.iter().enumerate() {
            packet.set_ray(lane, ray);
        }
        packet
    }

    pub fn ray(&self, lane: usize) -> Ray {
        let hit = if self.geom_id[lane] == INVALID_ID {
            None
        } else {
            Some(Hit {
                geom_id: self.geom_id[lane],
                prim_id: self.prim_id[lane],
                u: self.u[lane],
                v: self.v[lane],
            })
        };

        Ray {
            origin: Vec3::new(self.origin[0][lane], self.origin[1][lane], self.origin[2][lane]),
            direction: Vec3::new(
                self.direction[0][lane],
                self.direction[1][lane],
                self.direction[2][lane],
            ),
            t_near: self.t_near[lane],
            t_far: self.t_far[lane],
            hit,
            terminated: self.terminated[lane],
        }
    }

    pub fn set_ray(&mut self, lane: usize, ray: &Ray) {
        for axis in 0..3 {
            self.origin[axis][lane] = ray.origin[axis];
            self.direction[axis][lane] = ray.direction[axis];
        }
        self.t_near[lane] = ray.t_near;
        self.t_far[lane] = ray.t_far;
        match ray.hit {
            Some(hit) => {
                self.geom_id[lane] = hit.geom_id;
                self.prim_id[lane] = hit.prim_id;
                self.u[lane] = hit.u;
                self.v[lane] = hit.v;
            }
            None => {
                self.geom_id[lane] = INVALID_ID;
                self.prim_id[lane] = INVALID_ID;
            }
        }
        self.terminated[lane] = ray.terminated;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_reciprocal_keeps_sign() {
        let r = rcp_safe(Vec3::new(0.0, -0.0, 2.0));
        assert!(r.x.is_finite() && r.x > 0.0);
        assert!(r.y.is_finite() && r.y < 0.0);
        assert_eq!(r.z, 0.5);
    }

    #[test]
    fn packet_lanes_round_trip() {
        let mut rays = [Ray::new(Vec3::ZERO, Vec3::Z); 4];
        rays[2].origin = Vec3::new(1.0, 2.0, 3.0);
        rays[3].record(
            4.0,
            Hit {
                geom_id: 1,
                prim_id: 7,
                u: 0.25,
                v: 0.5,
            },
        );

        let packet = RayPacket4::from_rays(&rays);
        for lane in 0..4 {
            assert_eq!(packet.ray(lane), rays[lane]);
        }
    }
}
