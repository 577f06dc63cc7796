use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use kornia_pnp as kpnp;
use kpnp::nalgebra::{Isometry3, Point2, Point3, Vector3};
use kpnp::{Camera, PinholeCamera};
use rand::seq::SliceRandom;
use rand::{rngs::StdRng, Rng, SeedableRng};

type PnpDataset = (Vec<Point3<f64>>, Vec<Point2<f64>>);

fn camera() -> PinholeCamera<f64> {
    PinholeCamera::new(1280, 960, 800.0, 800.0, 640.0, 480.0).unwrap()
}

fn generate_cube_dataset_with_seed(
    camera: &PinholeCamera<f64>,
    num_points: usize,
    noise_px: f64,
    seed: u64,
) -> PnpDataset {
    // mild rotation, object about 5 units in front of the camera
    let pose_if = Isometry3::new(Vector3::new(0.2, -0.1, 5.0), Vector3::new(0.1, -0.15, 0.05));

    let mut rng = StdRng::seed_from_u64(seed);
    let world: Vec<_> = (0..num_points)
        .map(|_| {
            Point3::new(
                rng.random_range(-0.5..0.5),
                rng.random_range(-0.5..0.5),
                rng.random_range(-0.5..0.5),
            )
        })
        .collect();

    let image = world
        .iter()
        .map(|p| {
            let projected = camera.project_to_image_if(&pose_if, p);
            Point2::new(
                projected.x + rng.random_range(-noise_px..noise_px),
                projected.y + rng.random_range(-noise_px..noise_px),
            )
        })
        .collect();

    (world, image)
}

fn inject_outliers_random(image: &mut [Point2<f64>], fraction: f64, seed: u64) {
    let num_out = (fraction.clamp(0.0, 1.0) * image.len() as f64) as usize;
    let mut rng = StdRng::seed_from_u64(seed);
    let mut idxs: Vec<usize> = (0..image.len()).collect();
    idxs.shuffle(&mut rng);
    for &i in idxs.iter().take(num_out) {
        let angle = rng.random_range(0.0..(2.0 * std::f64::consts::PI));
        let radius = rng.random_range(300.0..800.0);
        image[i].x += radius * angle.cos();
        image[i].y += radius * angle.sin();
    }
}

fn bench_p3p(c: &mut Criterion) {
    let camera = camera();
    let (world, image) = generate_cube_dataset_with_seed(&camera, 3, 0.0, 7);
    let objects = [world[0], world[1], world[2]];
    let images = [image[0], image[1], image[2]];

    c.bench_function("p3p_poses", |b| {
        b.iter(|| {
            let poses = kpnp::p3p::poses(&camera, &objects, &images);
            std::hint::black_box(poses);
        });
    });
}

fn bench_pnp(c: &mut Criterion) {
    let camera = camera();
    let mut group = c.benchmark_group("pnp_p3p");
    for &n in &[8usize, 32, 128, 512] {
        let (world, image) = generate_cube_dataset_with_seed(&camera, n, 0.5, 42);
        let params = kpnp::PnPParams::new().with_random_seed(42);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| {
                let res = kpnp::solve_pnp(
                    &camera,
                    &world,
                    &image,
                    kpnp::PnPMethod::P3P(params.clone()),
                )
                .unwrap();
                std::hint::black_box(res);
            });
        });
    }
    group.finish();
}

fn bench_ransac(c: &mut Criterion) {
    let camera = camera();
    let mut group = c.benchmark_group("pnp_ransac");
    for &n in &[32usize, 128, 512, 2048] {
        let seed = 10_000u64 + n as u64;
        let (world, mut image) = generate_cube_dataset_with_seed(&camera, n, 0.5, seed);
        inject_outliers_random(&mut image, 0.20, seed.wrapping_add(12345));

        let params = kpnp::RansacParams {
            max_iterations: 200,
            reproj_threshold_px: 3.0,
            confidence: 0.99,
            random_seed: Some(seed),
            refine: true,
        };

        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| {
                let res = kpnp::solve_p3p_ransac(&camera, &world, &image, &params).unwrap();
                std::hint::black_box(res);
            });
        });
    }
    group.finish();
}

fn bench_robust_error(c: &mut Criterion) {
    let camera = camera();
    let mut group = c.benchmark_group("robust_error");
    for &n in &[32usize, 256, 1024] {
        let (_, small) = generate_cube_dataset_with_seed(&camera, n, 0.0, 1);
        let (_, large) = generate_cube_dataset_with_seed(&camera, n, 1.0, 1);
        for determination in [
            kpnp::ErrorDetermination::Positional,
            kpnp::ErrorDetermination::Approximated,
        ] {
            group.bench_with_input(
                BenchmarkId::new(format!("{determination:?}"), n),
                &n,
                |b, _| {
                    b.iter(|| {
                        let error = kpnp::averaged_robust_error(
                            &small,
                            n,
                            &large,
                            kpnp::Estimator::Huber,
                            determination,
                            None,
                        );
                        std::hint::black_box(error);
                    });
                },
            );
        }
    }
    group.finish();
}

criterion_group!(benches, bench_p3p, bench_pnp, bench_ransac, bench_robust_error);
criterion_main!(benches);
