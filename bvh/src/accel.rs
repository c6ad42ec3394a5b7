use bitvec::prelude::*;
use log::{debug, warn};
use rayon::prelude::*;
use std::sync::Arc;

use crate::primitives::{LeafPrimitive, QueryContext};
use crate::traverse::{intersect_packet, occluded_packet};
use crate::{
    Aabb, BuildError, BuildSettings, Bvh, BvhStats, Ray, RayPacket, RayPacket16, RayPacket4, RayPacket8,
    SahBuilder, Scene,
};

/// Query and build entry points shared by every primitive kind.
pub trait Accel: Send + Sync {
    fn name(&self) -> &'static str;

    fn build(&mut self) -> Result<(), BuildError>;

    fn intersect(&self, ray: &mut Ray) -> bool;

    fn occluded(&self, ray: &mut Ray) -> bool;

    fn intersect_stream(&self, rays: &mut [Ray]);

    fn occluded_stream(&self, rays: &mut [Ray]);

    fn bounds(&self) -> Aabb;

    fn delete_geometry(&mut self, geom_id: u32);

    fn clear(&mut self);

    fn statistics(&self) -> BvhStats;
}

/// Owns a tree over one primitive kind of a scene together with the builder
/// that produced it.
pub struct AccelInstance<P: LeafPrimitive> {
    scene: Arc<dyn Scene>,
    bvh: Bvh<P>,
    builder: Option<SahBuilder<P>>,
    deleted: BitVec,
}

impl<P: LeafPrimitive> AccelInstance<P> {
    pub fn new(scene: Arc<dyn Scene>, settings: BuildSettings) -> Self {
        Self {
            scene,
            bvh: Bvh::empty(),
            builder: Some(SahBuilder::new(settings)),
            deleted: BitVec::new(),
        }
    }

    pub fn bvh(&self) -> &Bvh<P> {
        &self.bvh
    }

    pub fn scene(&self) -> &Arc<dyn Scene> {
        &self.scene
    }

    pub fn is_empty(&self) -> bool {
        self.bvh.is_empty()
    }

    pub fn bounds(&self) -> Aabb {
        self.bvh.bounds()
    }

    /// Rebuilds on the global rayon pool.
    pub fn build(&mut self) -> Result<(), BuildError> {
        let builder = self.builder.as_mut().ok_or(BuildError::Immutable)?;
        self.deleted.clear();
        let result = builder.build(&*self.scene, &mut self.bvh);
        self.finish_build(result)
    }

    /// Rebuilds on a dedicated pool of `thread_count` workers, zero meaning
    /// one per logical core. `thread_index` identifies the calling thread.
    pub fn build_with_threads(&mut self, thread_index: usize, thread_count: usize) -> Result<(), BuildError> {
        let thread_count = if thread_count == 0 {
            num_cpus::get()
        } else {
            thread_count
        };
        if thread_index >= thread_count {
            return Err(BuildError::InvalidSettings(format!(
                "thread index {} outside a pool of {} threads",
                thread_index, thread_count
            )));
        }

        let builder = self.builder.as_mut().ok_or(BuildError::Immutable)?;
        debug!("{}: build from thread {} on {} workers", P::NAME, thread_index, thread_count);
        let pool = rayon::ThreadPoolBuilder::new().num_threads(thread_count).build()?;

        self.deleted.clear();
        let scene = &*self.scene;
        let bvh = &mut self.bvh;
        let result = pool.install(|| builder.build(scene, bvh));
        self.finish_build(result)
    }

    fn finish_build(&mut self, result: Result<(), BuildError>) -> Result<(), BuildError> {
        if let Err(e) = &result {
            warn!("{}: build failed, structure left empty: {}", P::NAME, e);
            self.bvh.clear();
        }
        result
    }

    /// Releases the builder. The current tree stays queryable, further builds
    /// fail with [`BuildError::Immutable`].
    pub fn immutable(&mut self) {
        self.builder = None;
    }

    pub fn is_immutable(&self) -> bool {
        self.builder.is_none()
    }

    /// Hides the primitives of `geom_id` from queries until the next build.
    pub fn delete_geometry(&mut self, geom_id: u32) {
        let index = geom_id as usize;
        if index >= self.deleted.len() {
            self.deleted.resize(index + 1, false);
        }
        self.deleted.set(index, true);
    }

    pub fn clear(&mut self) {
        self.bvh.clear();
        self.deleted.clear();
    }

    fn context(&self) -> QueryContext<'_> {
        QueryContext::new(&self.deleted)
    }

    pub fn intersect(&self, ray: &mut Ray) -> bool {
        self.bvh.intersect(ray, &self.context())
    }

    pub fn occluded(&self, ray: &mut Ray) -> bool {
        self.bvh.occluded(ray, &self.context())
    }

    pub fn intersect_packet<const W: usize>(&self, valid: &[bool; W], packet: &mut RayPacket<W>) {
        intersect_packet(&self.bvh, valid, packet, &self.context());
    }

    pub fn occluded_packet<const W: usize>(&self, valid: &[bool; W], packet: &mut RayPacket<W>) {
        occluded_packet(&self.bvh, valid, packet, &self.context());
    }

    pub fn intersect4(&self, valid: &[bool; 4], packet: &mut RayPacket4) {
        self.intersect_packet(valid, packet);
    }

    pub fn intersect8(&self, valid: &[bool; 8], packet: &mut RayPacket8) {
        self.intersect_packet(valid, packet);
    }

    pub fn intersect16(&self, valid: &[bool; 16], packet: &mut RayPacket16) {
        self.intersect_packet(valid, packet);
    }

    pub fn occluded4(&self, valid: &[bool; 4], packet: &mut RayPacket4) {
        self.occluded_packet(valid, packet);
    }

    pub fn occluded8(&self, valid: &[bool; 8], packet: &mut RayPacket8) {
        self.occluded_packet(valid, packet);
    }

    pub fn occluded16(&self, valid: &[bool; 16], packet: &mut RayPacket16) {
        self.occluded_packet(valid, packet);
    }

    pub fn intersect_stream(&self, rays: &mut [Ray]) {
        let ctx = self.context();
        rays.par_iter_mut().for_each(|ray| {
            self.bvh.intersect(ray, &ctx);
        });
    }

    pub fn occluded_stream(&self, rays: &mut [Ray]) {
        let ctx = self.context();
        rays.par_iter_mut().for_each(|ray| {
            self.bvh.occluded(ray, &ctx);
        });
    }
}

impl<P: LeafPrimitive> Accel for AccelInstance<P> {
    fn name(&self) -> &'static str {
        P::NAME
    }

    fn build(&mut self) -> Result<(), BuildError> {
        AccelInstance::build(self)
    }

    fn intersect(&self, ray: &mut Ray) -> bool {
        AccelInstance::intersect(self, ray)
    }

    fn occluded(&self, ray: &mut Ray) -> bool {
        AccelInstance::occluded(self, ray)
    }

    fn intersect_stream(&self, rays: &mut [Ray]) {
        AccelInstance::intersect_stream(self, rays)
    }

    fn occluded_stream(&self, rays: &mut [Ray]) {
        AccelInstance::occluded_stream(self, rays)
    }

    fn bounds(&self) -> Aabb {
        AccelInstance::bounds(self)
    }

    fn delete_geometry(&mut self, geom_id: u32) {
        AccelInstance::delete_geometry(self, geom_id)
    }

    fn clear(&mut self) {
        AccelInstance::clear(self)
    }

    fn statistics(&self) -> BvhStats {
        self.bvh.statistics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::test_scene::*;
    use crate::primitives::{Bezier1, Triangle1};
    use crate::{BezierCurve, Triangle};
    use glam::*;

    fn scene() -> Arc<dyn Scene> {
        let tris = (0..64)
            .map(|i| {
                let x = i as f32;
                Triangle::new(vec3(x, 0.0, 0.0), vec3(x + 0.5, 0.0, 0.0), vec3(x, 1.0, 0.0))
            })
            .collect();
        let curves = (0..8)
            .map(|i| {
                let x = i as f32 * 2.0;
                BezierCurve::new([
                    vec4(x, 0.0, 5.0, 0.1),
                    vec4(x, 1.0, 5.0, 0.1),
                    vec4(x, 2.0, 5.0, 0.1),
                    vec4(x, 3.0, 5.0, 0.1),
                ])
            })
            .collect();
        Arc::new(Mixed {
            tris: Tris(tris),
            curves: Curves(curves),
        })
    }

    #[test]
    fn unbuilt_instance_misses_everything() {
        let accel = AccelInstance::<Triangle1>::new(scene(), BuildSettings::default());
        let mut ray = Ray::new(vec3(3.2, 0.2, -1.0), Vec3::Z);
        assert!(accel.is_empty());
        assert!(!accel.intersect(&mut ray));
        assert!(!accel.occluded(&mut ray));
    }

    #[test]
    fn deleted_geometry_is_hidden_until_rebuild() {
        let mut accel = AccelInstance::<Triangle1>::new(scene(), BuildSettings::default());
        accel.build().unwrap();

        let ray = Ray::new(vec3(3.2, 0.2, -1.0), Vec3::Z);
        assert!(accel.occluded(&mut ray.clone()));

        accel.delete_geometry(0);
        assert!(!accel.occluded(&mut ray.clone()));
        assert!(!accel.intersect(&mut ray.clone()));

        accel.build().unwrap();
        let mut hit = ray;
        assert!(accel.intersect(&mut hit));
        assert_eq!(hit.hit.map(|h| h.prim_id), Some(3));
    }

    #[test]
    fn immutable_instance_refuses_to_build() {
        let mut accel = AccelInstance::<Bezier1>::new(scene(), BuildSettings::default());
        accel.build().unwrap();
        accel.immutable();
        assert!(accel.is_immutable());
        assert!(matches!(accel.build(), Err(BuildError::Immutable)));
        assert!(matches!(accel.build_with_threads(0, 2), Err(BuildError::Immutable)));

        let mut ray = Ray::new(vec3(4.0, 1.5, 0.0), Vec3::Z);
        assert!(accel.intersect(&mut ray));
        assert_eq!(ray.hit.map(|h| h.geom_id), Some(1));
    }

    #[test]
    fn thread_index_must_fit_the_pool() {
        let mut accel = AccelInstance::<Triangle1>::new(scene(), BuildSettings::default());
        assert!(matches!(
            accel.build_with_threads(4, 4),
            Err(BuildError::InvalidSettings(_))
        ));
        accel.build_with_threads(1, 2).unwrap();
        assert_eq!(accel.bvh().prim_count(), 64);
    }

    #[test]
    fn failed_build_leaves_empty_structure() {
        let settings = BuildSettings::default().with_memory_limit(64);
        let mut accel = AccelInstance::<Triangle1>::new(scene(), settings);
        assert!(matches!(accel.build(), Err(BuildError::OutOfMemory { .. })));
        assert!(accel.is_empty());
        assert!(accel.bounds().is_empty());
    }

    #[test]
    fn clear_drops_the_tree() {
        let mut accel = AccelInstance::<Triangle1>::new(scene(), BuildSettings::default());
        accel.build().unwrap();
        assert!(!accel.is_empty());
        accel.clear();
        assert!(accel.is_empty());
        assert_eq!(accel.statistics().leaves, 0);
    }
}
