use glam::*;
use rtaccel_bvh::{Accel, AccelInstance, Bezier1, BuildSettings, Ray, Triangle1, Triangle4};
use rtaccel_scene::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[test]
fn builds_over_generated_content() {
    let progress = Arc::new(AtomicUsize::new(0));
    let counter = progress.clone();

    let mut scene = Scene::new();
    scene.set_progress_callback(move |n| {
        counter.fetch_add(n, Ordering::Relaxed);
    });
    let [left, right] = two_clumps(1, 2000, 200.0);
    scene.add_mesh(left);
    scene.add_mesh(right);
    scene.add_curves(hair_ball(2, 500, 5.0, 3.0, 0.02));
    let scene = Arc::new(scene);

    let mut tris = AccelInstance::<Triangle4>::new(scene.clone(), BuildSettings::default());
    tris.build().unwrap();
    assert_eq!(tris.bvh().prim_count(), 2000);
    assert!(tris.bvh().validate().is_ok());
    assert_eq!(progress.load(Ordering::Relaxed), 2000);

    let mut curves = AccelInstance::<Bezier1>::new(scene.clone(), BuildSettings::default());
    curves.build_with_threads(0, 2).unwrap();
    assert_eq!(curves.bvh().prim_count(), 500);
    assert!(curves.bvh().validate().is_ok());
    assert!(curves.bounds().min[0] > -9.0 && curves.bounds().max[0] < 9.0);
}

#[test]
fn grid_answers_primary_and_shadow_rays() {
    let mut scene = Scene::new();
    let grid = scene.add_mesh(triangle_grid(32, 8.0));
    let scene = Arc::new(scene);

    let mut accel: Box<dyn Accel> = Box::new(AccelInstance::<Triangle1>::new(scene, BuildSettings::default()));
    accel.build().unwrap();
    assert_eq!(accel.statistics().primitives, 32 * 32 * 2);

    let mut rays: Vec<Ray> = (0..64)
        .map(|i| {
            let x = (i % 8) as f32 + 0.3;
            let y = (i / 8) as f32 + 0.6;
            Ray::new(vec3(x, y, 4.0), -Vec3::Z)
        })
        .collect();
    accel.intersect_stream(&mut rays);
    for ray in rays.iter() {
        let hit = ray.hit.expect("grid covers every ray");
        assert_eq!(hit.geom_id, grid as u32);
        assert!((ray.t_far - 4.0).abs() < 1e-5);
    }

    let mut shadow: Vec<Ray> = rays
        .iter()
        .map(|ray| Ray::segment(ray.at(ray.t_far) + Vec3::Z * 1e-3, Vec3::Z, 0.0, 10.0))
        .collect();
    accel.occluded_stream(&mut shadow);
    assert!(shadow.iter().all(|ray| !ray.terminated));
}

#[test]
fn disabled_geometry_drops_out_of_rebuilds() {
    let mut scene = Scene::new();
    scene.set_static(false);
    let [left, right] = two_clumps(5, 400, 50.0);
    let a = scene.add_mesh(left);
    scene.add_mesh(right);
    scene.set_enabled(a, false).unwrap();

    let mut accel = AccelInstance::<Triangle4>::new(Arc::new(scene), BuildSettings::default());
    accel.build().unwrap();
    assert_eq!(accel.bvh().prim_count(), 200);
    assert!(accel.bounds().min[0] > 0.0);
}
