use criterion::{black_box, criterion_group, criterion_main, Criterion};
use glam::*;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rtaccel_bvh::*;
use std::sync::Arc;

struct Soup(Vec<Triangle>);

impl TriangleSet for Soup {
    fn len(&self) -> usize {
        self.0.len()
    }

    fn triangle(&self, prim_id: u32) -> Triangle {
        self.0[prim_id as usize]
    }
}

impl Scene for Soup {
    fn geometry_count(&self) -> usize {
        1
    }

    fn geometry(&self, _geom_id: u32) -> Option<Geometry<'_>> {
        Some(Geometry::Triangles(self))
    }
}

fn soup(count: usize, space: f32) -> Soup {
    let mut rng = SmallRng::seed_from_u64(7);
    let mut point = |extent: f32| {
        vec3(
            rng.gen_range(-extent..extent),
            rng.gen_range(-extent..extent),
            rng.gen_range(-extent..extent),
        )
    };
    Soup(
        (0..count)
            .map(|_| {
                let v0 = point(space);
                Triangle::new(v0, v0 + point(1.0), v0 + point(1.0))
            })
            .collect(),
    )
}

fn criterion_benchmark(c: &mut Criterion) {
    let scene = Arc::new(soup(black_box(100_000), black_box(1000.0)));

    c.bench_function("triangle4 sah build", |b| {
        let mut accel = AccelInstance::<Triangle4>::new(scene.clone(), BuildSettings::default());
        b.iter(|| accel.build())
    });

    c.bench_function("triangle4 sah build, finished ranges reused", |b| {
        let settings = BuildSettings::default().with_finished_range_threshold(RangeThreshold::Items(256));
        let mut accel = AccelInstance::<Triangle4>::new(scene.clone(), settings);
        b.iter(|| accel.build())
    });

    let mut accel = AccelInstance::<Triangle4>::new(scene.clone(), BuildSettings::default());
    let _ = accel.build();
    let mut rng = SmallRng::seed_from_u64(11);
    let rays: Vec<Ray> = (0..10_000)
        .map(|_| {
            let origin = vec3(0.0, 0.0, -2000.0);
            let target = vec3(rng.gen_range(-1000.0..1000.0), rng.gen_range(-1000.0..1000.0), 0.0);
            Ray::new(origin, target - origin)
        })
        .collect();

    c.bench_function("triangle4 closest hit stream", |b| {
        b.iter(|| {
            let mut batch = rays.clone();
            accel.intersect_stream(&mut batch);
            batch
        })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
