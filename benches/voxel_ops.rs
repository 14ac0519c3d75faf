//! Benchmarks for the core device operations
//!
//! All benches need a GPU adapter and are skipped quietly without one.
//!
//! Author: Moroya Sakamoto

use criterion::{criterion_group, criterion_main, Criterion};
use glam::Vec3;
use voxelcarve::prelude::*;

fn bench_voxel_ops(c: &mut Criterion) {
    let Ok(mut engine) = GpuEngine::new() else {
        eprintln!("no gpu adapter, skipping benches");
        return;
    };

    let dim = GridDim::new(128, 128, 128);
    let res = 0.25;
    let shape = Shape::Cylinder {
        origin: Vec3::splat(16.0),
        axis: Vec3::Z,
        radius: 9.0,
        height: 24.0,
    };
    let mask = engine.create_grid(ElemType::U32, dim, res, Vec3::ZERO);
    fill_shape(&mut engine, &mask, &shape, RoundPolicy::Outward).unwrap();

    c.bench_function("fill_shape_128", |b| {
        b.iter(|| fill_shape(&mut engine, &mask, &shape, RoundPolicy::Outward).unwrap())
    });

    c.bench_function("reduce_sum_128", |b| {
        b.iter(|| engine.reduce_sum(&mask).unwrap())
    });

    let probe = Shape::Cylinder {
        origin: Vec3::new(18.0, 16.0, 16.0),
        axis: Vec3::X,
        radius: 4.0,
        height: 10.0,
    };
    c.bench_function("count_in_shape_128", |b| {
        b.iter(|| count_in_shape(&mut engine, &mask, &probe, RoundPolicy::Nearest).unwrap())
    });

    let small = engine.create_grid(ElemType::U32, GridDim::new(64, 64, 64), res, Vec3::ZERO);
    fill_shape(&mut engine, &small, &shape, RoundPolicy::Nearest).unwrap();
    c.bench_function("dist_field_64", |b| {
        b.iter(|| dist_field(&mut engine, &small).unwrap())
    });
    c.bench_function("connected_regions_64", |b| {
        b.iter(|| connected_regions(&mut engine, &small, 4).unwrap())
    });

    // End-to-end planner round: build the tracking state once, then time
    // batched queries against it
    let tdim = GridDim::new(64, 64, 64);
    let stock = rasterize_occupancy(
        &[Shape::OrientedBox {
            center: Vec3::splat(8.0),
            half_axes: [Vec3::X * 6.0, Vec3::Y * 6.0, Vec3::Z * 6.0],
        }],
        tdim,
        res,
        Vec3::ZERO,
    );
    let target = rasterize_occupancy(
        &[Shape::OrientedBox {
            center: Vec3::splat(8.0),
            half_axes: [Vec3::X * 3.0, Vec3::Y * 3.0, Vec3::Z * 3.0],
        }],
        tdim,
        res,
        Vec3::ZERO,
    );
    let query_engine = GpuEngine::new().unwrap();
    let mut tracking = TrackingGrid::from_work_and_target(query_engine, &stock, &target).unwrap();
    let queries: Vec<ShapeQuery> = (0..32)
        .map(|i| ShapeQuery {
            shape: Shape::Cylinder {
                origin: Vec3::new(2.0 + 0.4 * i as f32, 8.0, 8.0),
                axis: Vec3::Z,
                radius: 0.5,
                height: 4.0,
            },
            kind: if i % 2 == 0 {
                QueryKind::HasWork
            } else {
                QueryKind::Blocked
            },
            policy: RoundPolicy::Nearest,
        })
        .collect();
    c.bench_function("parallel_query_32", |b| {
        b.iter(|| tracking.parallel_query(&queries).unwrap())
    });
}

criterion_group!(benches, bench_voxel_ops);
criterion_main!(benches);
