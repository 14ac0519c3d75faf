//! Engine-level tests: reductions, compaction, typed dispatch validation
//!
//! Author: Moroya Sakamoto

mod common;

use common::{engine, has_gpu};
use glam::Vec3;
use voxelcarve::prelude::*;

fn ones_grid(dim: GridDim) -> HostGrid<u32> {
    HostGrid::from_data(vec![1u32; dim.count()], dim, 1.0, Vec3::ZERO)
}

#[test]
fn test_reduce_sum_sizes() {
    if !has_gpu() {
        eprintln!("no gpu adapter, skipping");
        return;
    }
    let mut eng = engine();
    // One element, one level, level boundary, two levels, three levels
    for dim in [
        GridDim::new(1, 1, 1),
        GridDim::new(127, 1, 1),
        GridDim::new(128, 1, 1),
        GridDim::new(129, 1, 1),
        GridDim::new(11, 13, 17),
        GridDim::new(64, 64, 64),
    ] {
        let grid = eng.upload(&ones_grid(dim));
        assert_eq!(eng.reduce_sum(&grid).unwrap(), dim.count() as u32, "{dim:?}");
    }
}

#[test]
fn test_reduce_sum_values() {
    if !has_gpu() {
        eprintln!("no gpu adapter, skipping");
        return;
    }
    let mut eng = engine();
    let dim = GridDim::new(10, 10, 7);
    let data: Vec<u32> = (0..dim.count() as u32).map(|i| i % 5).collect();
    let expected: u32 = data.iter().sum();
    let grid = eng.upload(&HostGrid::from_data(data, dim, 1.0, Vec3::ZERO));
    assert_eq!(eng.reduce_sum(&grid).unwrap(), expected);
}

#[test]
fn test_reduce_minmax() {
    if !has_gpu() {
        eprintln!("no gpu adapter, skipping");
        return;
    }
    let mut eng = engine();
    let dim = GridDim::new(300, 1, 1);
    let data: Vec<[f32; 4]> = (0..300)
        .map(|i| {
            let v = i as f32 * 0.25 - 30.0;
            [v, v, 0.0, 0.0]
        })
        .collect();
    let grid = eng.upload(&HostGrid::from_data(data, dim, 1.0, Vec3::ZERO));
    let (mn, mx) = eng.reduce_minmax(&grid).unwrap();
    assert!((mn + 30.0).abs() < 1e-6);
    assert!((mx - (299.0 * 0.25 - 30.0)).abs() < 1e-6);
}

#[test]
fn test_pack_indices() {
    if !has_gpu() {
        eprintln!("no gpu adapter, skipping");
        return;
    }
    let mut eng = engine();
    let dim = GridDim::new(600, 1, 1);
    let set = [3u32, 77, 501, 599];
    let mut data = vec![0u32; dim.count()];
    for &i in &set {
        data[i as usize] = 1;
    }
    let grid = eng.upload(&HostGrid::from_data(data, dim, 1.0, Vec3::ZERO));
    let count = eng.reduce_sum(&grid).unwrap();
    assert_eq!(count, set.len() as u32);
    let mut indices = eng.pack(&grid, count).unwrap();
    // Append order is nondeterministic
    indices.sort_unstable();
    assert_eq!(indices, set);
}

#[test]
fn test_pack_empty_mask() {
    if !has_gpu() {
        eprintln!("no gpu adapter, skipping");
        return;
    }
    let mut eng = engine();
    let dim = GridDim::new(64, 1, 1);
    let grid = eng.upload(&HostGrid::from_data(vec![0u32; 64], dim, 1.0, Vec3::ZERO));
    assert!(eng.pack(&grid, 0).unwrap().is_empty());
}

#[test]
fn test_dispatch_rejects_aliasing() {
    if !has_gpu() {
        eprintln!("no gpu adapter, skipping");
        return;
    }
    let mut eng = engine();
    let g = eng.create_grid(ElemType::U32, GridDim::new(8, 8, 8), 1.0, Vec3::ZERO);
    let err = eng.map(KernelId::IllegalMask, &g, &g, None).unwrap_err();
    assert!(matches!(err, KernelError::AliasedGrids { .. }), "{err}");
}

#[test]
fn test_dispatch_rejects_wrong_element() {
    if !has_gpu() {
        eprintln!("no gpu adapter, skipping");
        return;
    }
    let mut eng = engine();
    let dim = GridDim::new(8, 8, 8);
    let floats = eng.create_grid(ElemType::F32, dim, 1.0, Vec3::ZERO);
    let mask = eng.create_grid(ElemType::U32, dim, 1.0, Vec3::ZERO);
    let err = eng.map(KernelId::IllegalMask, &floats, &mask, None).unwrap_err();
    assert!(matches!(err, KernelError::ElementMismatch { .. }), "{err}");
}

#[test]
fn test_dispatch_rejects_geometry_mismatch() {
    if !has_gpu() {
        eprintln!("no gpu adapter, skipping");
        return;
    }
    let mut eng = engine();
    let a = eng.create_grid(ElemType::U32, GridDim::new(8, 8, 8), 1.0, Vec3::ZERO);
    let b = eng.create_grid(ElemType::U32, GridDim::new(8, 8, 4), 1.0, Vec3::ZERO);
    let dst = eng.create_grid(ElemType::U32, GridDim::new(8, 8, 8), 1.0, Vec3::ZERO);
    let err = eng
        .map2(KernelId::ReversalMask, &a, &b, &dst, None)
        .unwrap_err();
    assert!(matches!(err, KernelError::GridMismatch { .. }), "{err}");
}

#[test]
fn test_dispatch_rejects_wrong_family_and_params() {
    if !has_gpu() {
        eprintln!("no gpu adapter, skipping");
        return;
    }
    let mut eng = engine();
    let dim = GridDim::new(8, 8, 8);
    let a = eng.create_grid(ElemType::U32, dim, 1.0, Vec3::ZERO);
    let b = eng.create_grid(ElemType::U32, dim, 1.0, Vec3::ZERO);

    let err = eng.update(KernelId::IllegalMask, &a, None).unwrap_err();
    assert!(matches!(err, KernelError::WrongFamily { .. }), "{err}");

    // BlockedMask requires its protection-plane parameter block
    let err = eng.map(KernelId::BlockedMask, &a, &b, None).unwrap_err();
    assert!(matches!(err, KernelError::MissingParams { .. }), "{err}");

    // IllegalMask takes none
    let p = [0u8; 16];
    let err = eng.map(KernelId::IllegalMask, &a, &b, Some(&p)).unwrap_err();
    assert!(matches!(err, KernelError::UnexpectedParams { .. }), "{err}");
}

#[test]
fn test_download_type_checked() {
    if !has_gpu() {
        eprintln!("no gpu adapter, skipping");
        return;
    }
    let mut eng = engine();
    let g = eng.create_grid(ElemType::U32, GridDim::new(4, 4, 4), 1.0, Vec3::ZERO);
    let err = eng.download::<f32>(&g).unwrap_err();
    assert!(matches!(err, KernelError::DownloadMismatch { .. }), "{err}");
    // Fresh grids read back zeroed
    let data = eng.download::<u32>(&g).unwrap();
    assert!(data.iter().all(|&v| v == 0));
}

#[test]
fn test_create_grid_rejects_oversized() {
    if !has_gpu() {
        eprintln!("no gpu adapter, skipping");
        return;
    }
    let mut eng = engine();
    // 2^33 voxels cannot be addressed through the u32 meta field
    let huge = GridDim::new(4096, 4096, 512);
    let r = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        eng.create_grid(ElemType::U32, huge, 1.0, Vec3::ZERO)
    }));
    assert!(r.is_err(), "oversized grid must be rejected");
}

#[test]
fn test_upload_download_round_trip() {
    if !has_gpu() {
        eprintln!("no gpu adapter, skipping");
        return;
    }
    let mut eng = engine();
    let dim = GridDim::new(9, 5, 3);
    let data: Vec<u32> = (0..dim.count() as u32).map(|i| i.wrapping_mul(2654435761)).collect();
    let grid = eng.upload(&HostGrid::from_data(data.clone(), dim, 0.5, Vec3::ONE));
    assert_eq!(grid.dim(), dim);
    assert_eq!(eng.download::<u32>(&grid).unwrap(), data);
}
