//! Geometry-operation tests: host/device SDF parity, rasterization,
//! distance fields, region labelling, histograms, axis bounds
//!
//! Author: Moroya Sakamoto

mod common;

use common::{engine, has_gpu};
use glam::Vec3;
use voxelcarve::prelude::*;

const DIM: GridDim = GridDim { nx: 16, ny: 16, nz: 16 };
const RES: f32 = 0.5;
const OFFSET: Vec3 = Vec3::new(-4.0, -4.0, -4.0);

fn test_shapes() -> Vec<Shape> {
    vec![
        Shape::Cylinder {
            origin: Vec3::new(0.1, -0.2, 0.3),
            axis: Vec3::Z,
            radius: 1.37,
            height: 3.1,
        },
        Shape::ExtrudedSlot {
            p: Vec3::new(-1.5, 0.0, 0.0),
            q: Vec3::new(1.5, 0.7, 0.0),
            axis: Vec3::Z,
            radius: 0.61,
            height: 2.3,
        },
        Shape::OrientedBox {
            center: Vec3::new(0.2, 0.2, -0.1),
            half_axes: [
                Vec3::new(1.1, 1.1, 0.0),
                Vec3::new(-0.7, 0.7, 0.0),
                Vec3::new(0.0, 0.0, 1.3),
            ],
        },
    ]
}

#[test]
fn test_sdf_host_device_parity() {
    if !has_gpu() {
        eprintln!("no gpu adapter, skipping");
        return;
    }
    let mut eng = engine();
    for shape in &test_shapes() {
        let dst = eng.create_grid(ElemType::F32, DIM, RES, OFFSET);
        sample_sdf(&mut eng, &dst, shape).unwrap();
        let dev = eng.download::<f32>(&dst).unwrap();
        let host = HostGrid::<f32>::new(DIM, RES, OFFSET);
        for iz in 0..DIM.nz {
            for iy in 0..DIM.ny {
                for ix in 0..DIM.nx {
                    let p = host.voxel_center(ix, iy, iz);
                    let want = shape.distance(p);
                    let got = dev[host.index(ix, iy, iz)];
                    let tol = 1e-4 * want.abs().max(1.0);
                    assert!(
                        (want - got).abs() < tol,
                        "{shape:?} at {p:?}: host {want} device {got}"
                    );
                }
            }
        }
    }
}

#[test]
fn test_fill_policies_match_host_rule() {
    if !has_gpu() {
        eprintln!("no gpu adapter, skipping");
        return;
    }
    let mut eng = engine();
    let host = HostGrid::<u8>::new(DIM, RES, OFFSET);
    for shape in &test_shapes() {
        for policy in [RoundPolicy::Inward, RoundPolicy::Outward, RoundPolicy::Nearest] {
            let mask = eng.create_grid(ElemType::U32, DIM, RES, OFFSET);
            fill_shape(&mut eng, &mask, shape, policy).unwrap();
            let device_count = eng.reduce_sum(&mask).unwrap();

            // Band the host count so a cell whose center sits within float
            // noise of the boundary cannot flip the comparison
            let off = policy.boundary_offset(RES);
            let (mut lo, mut hi) = (0u32, 0u32);
            for iz in 0..DIM.nz {
                for iy in 0..DIM.ny {
                    for ix in 0..DIM.nx {
                        let d = shape.distance(host.voxel_center(ix, iy, iz));
                        if d <= off - 1e-4 {
                            lo += 1;
                        }
                        if d <= off + 1e-4 {
                            hi += 1;
                        }
                    }
                }
            }
            assert!(
                (lo..=hi).contains(&device_count),
                "{shape:?} {policy:?}: device {device_count} outside host band {lo}..={hi}"
            );
        }
    }
    // Inward never sets more cells than Outward
    let shape = &test_shapes()[0];
    let inner = eng.create_grid(ElemType::U32, DIM, RES, OFFSET);
    let outer = eng.create_grid(ElemType::U32, DIM, RES, OFFSET);
    fill_shape(&mut eng, &inner, shape, RoundPolicy::Inward).unwrap();
    fill_shape(&mut eng, &outer, shape, RoundPolicy::Outward).unwrap();
    assert!(eng.reduce_sum(&inner).unwrap() <= eng.reduce_sum(&outer).unwrap());
}

#[test]
fn test_fill_shapes_union() {
    if !has_gpu() {
        eprintln!("no gpu adapter, skipping");
        return;
    }
    let mut eng = engine();
    let a = Shape::OrientedBox {
        center: Vec3::new(-2.0, -2.0, -2.0),
        half_axes: [Vec3::X, Vec3::Y, Vec3::Z],
    };
    let b = Shape::OrientedBox {
        center: Vec3::new(2.0, 2.0, 2.0),
        half_axes: [Vec3::X, Vec3::Y, Vec3::Z],
    };
    let mask = eng.create_grid(ElemType::U32, DIM, RES, OFFSET);
    fill_shape(&mut eng, &mask, &a, RoundPolicy::Nearest).unwrap();
    let na = eng.reduce_sum(&mask).unwrap();
    fill_shape(&mut eng, &mask, &b, RoundPolicy::Nearest).unwrap();
    let nb = eng.reduce_sum(&mask).unwrap();
    fill_shapes(&mut eng, &mask, &[a, b], RoundPolicy::Nearest).unwrap();
    assert_eq!(eng.reduce_sum(&mask).unwrap(), na + nb);
    // Refilling clears previous content rather than accumulating
    fill_shape(&mut eng, &mask, &a, RoundPolicy::Nearest).unwrap();
    assert_eq!(eng.reduce_sum(&mask).unwrap(), na);
}

#[test]
fn test_dist_field_single_seed() {
    if !has_gpu() {
        eprintln!("no gpu adapter, skipping");
        return;
    }
    let mut eng = engine();
    let dim = GridDim::new(17, 17, 17);
    let mut seed = HostGrid::<u32>::new(dim, 1.0, Vec3::ZERO);
    seed.set(8, 8, 8, 1);
    let mask = eng.upload(&seed);
    let dist = dist_field(&mut eng, &mask).unwrap();
    let d = eng.download::<f32>(&dist).unwrap();
    let origin = seed.voxel_center(8, 8, 8);
    for &(ix, iy, iz) in &[(8, 8, 8), (10, 8, 8), (8, 3, 8), (0, 0, 0), (16, 16, 16), (2, 9, 14)] {
        let want = (seed.voxel_center(ix, iy, iz) - origin).length();
        let got = d[seed.index(ix, iy, iz)];
        assert!(
            (want - got).abs() < 1e-3,
            "({ix},{iy},{iz}): want {want} got {got}"
        );
    }
}

#[test]
fn test_dist_field_empty_mask_is_far() {
    if !has_gpu() {
        eprintln!("no gpu adapter, skipping");
        return;
    }
    let mut eng = engine();
    let mask = eng.create_grid(ElemType::U32, GridDim::new(8, 8, 8), 1.0, Vec3::ZERO);
    let dist = dist_field(&mut eng, &mask).unwrap();
    let d = eng.download::<f32>(&dist).unwrap();
    assert!(d.iter().all(|&v| v > 1e20));
}

#[test]
fn test_connected_regions_line() {
    if !has_gpu() {
        eprintln!("no gpu adapter, skipping");
        return;
    }
    let mut eng = engine();
    let dim = GridDim::new(5, 1, 1);
    let mask = eng.upload(&HostGrid::from_data(
        vec![1u32, 1, 0, 1, 0],
        dim,
        1.0,
        Vec3::ZERO,
    ));
    let labels = connected_regions(&mut eng, &mask, 4).unwrap();
    let l = eng.download::<u32>(&labels).unwrap();
    assert_eq!(l, vec![0, 0, u32::MAX, 3, u32::MAX]);
}

#[test]
fn test_regions_and_histogram() {
    if !has_gpu() {
        eprintln!("no gpu adapter, skipping");
        return;
    }
    let mut eng = engine();
    // 2x2x2: cells 0,1,3 form one component (0-1 along x, 1-3 along y);
    // cell 6 is isolated
    let dim = GridDim::new(2, 2, 2);
    let mask = eng.upload(&HostGrid::from_data(
        vec![1u32, 1, 0, 1, 0, 0, 1, 0],
        dim,
        1.0,
        Vec3::ZERO,
    ));
    let labels = connected_regions(&mut eng, &mask, 4).unwrap();
    let hist = top4_labels(&mut eng, &labels).unwrap();
    assert!(!hist.overflow);
    assert_eq!(hist.entries, vec![(0, 3), (6, 1)]);
    assert_eq!(hist.largest(), Some((0, 3)));
}

#[test]
fn test_histogram_empty_mask() {
    if !has_gpu() {
        eprintln!("no gpu adapter, skipping");
        return;
    }
    let mut eng = engine();
    let mask = eng.create_grid(ElemType::U32, GridDim::new(4, 4, 4), 1.0, Vec3::ZERO);
    let labels = connected_regions(&mut eng, &mask, 4).unwrap();
    let hist = top4_labels(&mut eng, &labels).unwrap();
    assert!(hist.entries.is_empty());
    assert!(!hist.overflow);
}

#[test]
fn test_bound_of_axis() {
    if !has_gpu() {
        eprintln!("no gpu adapter, skipping");
        return;
    }
    let mut eng = engine();
    let dim = GridDim::new(8, 8, 8);
    let res = 0.5;
    let mut host = HostGrid::<u32>::new(dim, res, Vec3::ZERO);
    host.set(2, 3, 4, 1);
    host.set(6, 3, 4, 1);
    let mask = eng.upload(&host);
    let b = res * 3.0_f32.sqrt() * 0.5;

    let (lo, hi) = bound_of_axis(&mut eng, &mask, Vec3::X).unwrap().unwrap();
    assert!((lo - (1.25 - b)).abs() < 1e-4);
    assert!((hi - (3.25 + b)).abs() < 1e-4);

    let (lo, hi) = bound_of_axis(&mut eng, &mask, Vec3::Y).unwrap().unwrap();
    assert!((lo - (1.75 - b)).abs() < 1e-4);
    assert!((hi - (1.75 + b)).abs() < 1e-4);

    let empty = eng.create_grid(ElemType::U32, dim, res, Vec3::ZERO);
    assert_eq!(bound_of_axis(&mut eng, &empty, Vec3::X).unwrap(), None);
}

#[test]
fn test_count_in_shape_vs_brute_force() {
    if !has_gpu() {
        eprintln!("no gpu adapter, skipping");
        return;
    }
    let mut eng = engine();
    let stock = test_shapes()[0];
    let mask = eng.create_grid(ElemType::U32, DIM, RES, OFFSET);
    fill_shape(&mut eng, &mask, &stock, RoundPolicy::Outward).unwrap();

    let probe = Shape::Cylinder {
        origin: Vec3::new(0.6, 0.1, 0.4),
        axis: Vec3::X,
        radius: 0.83,
        height: 2.9,
    };
    for policy in [RoundPolicy::Inward, RoundPolicy::Outward, RoundPolicy::Nearest] {
        let got = count_in_shape(&mut eng, &mask, &probe, policy).unwrap();

        let host = HostGrid::<u8>::new(DIM, RES, OFFSET);
        let stock_off = RoundPolicy::Outward.boundary_offset(RES);
        let probe_off = policy.boundary_offset(RES);
        let (mut lo, mut hi) = (0u32, 0u32);
        for iz in 0..DIM.nz {
            for iy in 0..DIM.ny {
                for ix in 0..DIM.nx {
                    let p = host.voxel_center(ix, iy, iz);
                    if stock.distance(p) > stock_off {
                        continue;
                    }
                    let d = probe.distance(p);
                    if d <= probe_off - 1e-4 {
                        lo += 1;
                    }
                    if d <= probe_off + 1e-4 {
                        hi += 1;
                    }
                }
            }
        }
        assert!(
            (lo..=hi).contains(&got),
            "{policy:?}: device {got} outside host band {lo}..={hi}"
        );
    }
}

#[test]
fn test_count_in_far_shape_is_zero() {
    if !has_gpu() {
        eprintln!("no gpu adapter, skipping");
        return;
    }
    let mut eng = engine();
    let mask = eng.create_grid(ElemType::U32, DIM, RES, OFFSET);
    fill_shape(&mut eng, &mask, &test_shapes()[0], RoundPolicy::Outward).unwrap();
    // Entirely outside the grid; every coarse block rejects
    let far = Shape::Cylinder {
        origin: Vec3::splat(100.0),
        axis: Vec3::Z,
        radius: 1.0,
        height: 2.0,
    };
    assert_eq!(
        count_in_shape(&mut eng, &mask, &far, RoundPolicy::Outward).unwrap(),
        0
    );
}
