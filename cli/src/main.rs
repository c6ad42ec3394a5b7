use clap::{value_parser, Arg, Command};
use glam::*;
use log::{info, trace};
use rtaccel_bvh::{
    Accel, AccelInstance, Aabb, Bezier1, BuildError, BuildSettings, LeafPrimitive, Ray, Triangle1, Triangle4,
};
use rtaccel_scene::{hair_ball, triangle_grid, two_clumps, Scene};
use std::error::Error;
use std::sync::Arc;
use std::time::Instant;

fn create<P: LeafPrimitive>(
    scene: Arc<Scene>,
    settings: BuildSettings,
    threads: usize,
) -> Result<Box<dyn Accel>, BuildError> {
    let mut accel = AccelInstance::<P>::new(scene, settings);
    accel.build_with_threads(0, threads)?;
    accel.immutable();
    Ok(Box::new(accel))
}

fn create_scene(primitive: &str, count: usize, seed: u64) -> Scene {
    let mut scene = Scene::new();
    scene.set_progress_callback(|n| trace!("referenced {} primitives", n));

    if primitive.starts_with("bezier") {
        scene.add_curves(hair_ball(seed, count, 4.0, 3.0, 0.01));
    } else {
        let [left, right] = two_clumps(seed, count, 20.0);
        scene.add_mesh(left);
        scene.add_mesh(right);
        scene.add_mesh(triangle_grid(64, 40.0));
    }
    scene
}

/// Pinhole camera in front of `bounds`, looking down +z.
fn primary_rays(bounds: &Aabb, width: usize, height: usize) -> Vec<Ray> {
    let center = bounds.center();
    let extent = bounds.lengths().max_element().max(1.0);
    let origin = vec3(center.x, center.y, bounds.min[2] - extent);
    let aspect = width as f32 / height as f32;

    (0..width * height)
        .map(|i| {
            let x = ((i % width) as f32 + 0.5) / width as f32 * 2.0 - 1.0;
            let y = ((i / width) as f32 + 0.5) / height as f32 * 2.0 - 1.0;
            let target = center + vec3(x * aspect, -y, 0.0) * (0.6 * extent);
            Ray::new(origin, (target - origin).normalize())
        })
        .collect()
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let matches = Command::new("rtaccel")
        .version("0.1.0")
        .about("Builds a SAH BVH over a procedural scene and traces rays through it")
        .arg(
            Arg::new("primitive")
                .short('p')
                .long("primitive")
                .value_parser(["triangle1", "triangle4", "bezier1"])
                .default_value("triangle4")
                .help("leaf primitive layout"),
        )
        .arg(
            Arg::new("count")
                .short('n')
                .long("count")
                .value_parser(value_parser!(usize))
                .default_value("100000")
                .help("number of generated primitives"),
        )
        .arg(
            Arg::new("threads")
                .short('t')
                .long("threads")
                .value_parser(value_parser!(usize))
                .default_value("0")
                .help("build threads, 0 for one per core"),
        )
        .arg(
            Arg::new("branching")
                .short('b')
                .long("branching")
                .value_parser(value_parser!(usize))
                .default_value("4")
                .help("node branching factor"),
        )
        .arg(
            Arg::new("width")
                .long("width")
                .value_parser(value_parser!(usize))
                .default_value("640"),
        )
        .arg(
            Arg::new("height")
                .long("height")
                .value_parser(value_parser!(usize))
                .default_value("480"),
        )
        .arg(
            Arg::new("seed")
                .short('s')
                .long("seed")
                .value_parser(value_parser!(u64))
                .default_value("1"),
        )
        .get_matches();

    let primitive = matches
        .get_one::<String>("primitive")
        .map(String::as_str)
        .unwrap_or("triangle4");
    let arg = |name: &str, default: usize| matches.get_one::<usize>(name).copied().unwrap_or(default);
    let count = arg("count", 100_000);
    let threads = arg("threads", 0);
    let width = arg("width", 640).max(1);
    let height = arg("height", 480).max(1);
    let seed = matches.get_one::<u64>("seed").copied().unwrap_or(1);

    let scene = Arc::new(create_scene(primitive, count, seed));
    let settings = BuildSettings::default().with_branching_factor(arg("branching", 4));

    let timer = Instant::now();
    let accel = match primitive {
        "triangle1" => create::<Triangle1>(scene, settings, threads)?,
        "bezier1" => create::<Bezier1>(scene, settings, threads)?,
        _ => create::<Triangle4>(scene, settings, threads)?,
    };
    info!(
        "{} ready in {:.2} ms: {}",
        accel.name(),
        timer.elapsed().as_secs_f64() * 1000.0,
        accel.statistics()
    );

    let mut rays = primary_rays(&accel.bounds(), width, height);
    let timer = Instant::now();
    accel.intersect_stream(&mut rays);
    let elapsed = timer.elapsed().as_secs_f64();
    let hits: Vec<&Ray> = rays.iter().filter(|ray| ray.hit.is_some()).collect();
    info!(
        "primary: {} of {} rays hit, {:.2} Mrays/s",
        hits.len(),
        rays.len(),
        rays.len() as f64 / elapsed.max(1e-9) / 1e6
    );

    let light = vec3(0.3, 1.0, -0.5).normalize();
    let mut shadow: Vec<Ray> = hits
        .iter()
        .map(|ray| Ray::segment(ray.at(ray.t_far * 0.9999), light, 1e-3, f32::INFINITY))
        .collect();
    let timer = Instant::now();
    accel.occluded_stream(&mut shadow);
    let elapsed = timer.elapsed().as_secs_f64();
    let blocked = shadow.iter().filter(|ray| ray.terminated).count();
    info!(
        "shadow: {} of {} rays occluded, {:.2} Mrays/s",
        blocked,
        shadow.len(),
        shadow.len() as f64 / elapsed.max(1e-9) / 1e6
    );

    Ok(())
}
