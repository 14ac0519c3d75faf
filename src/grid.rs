//! Host-resident voxel grids
//!
//! Dense 3D arrays flat-indexed `ix + iy*nx + iz*nx*ny`, with a fixed cell
//! edge length (resolution) and world offset. Voxel `(ix, iy, iz)` occupies
//! `[ofs + i*res, ofs + (i+1)*res)` with its center at `ofs + (i+0.5)*res`.
//!
//! Host grids are owned by CPU collaborators (STL import, visualization);
//! the engine owns all device-resident grids exclusively.
//!
//! Author: Moroya Sakamoto

use glam::Vec3;
use rayon::prelude::*;

use crate::types::Shape;

/// Occupancy code: no material
pub const OCC_EMPTY: u8 = 0;
/// Occupancy code: boundary passes through the voxel
pub const OCC_PARTIAL: u8 = 128;
/// Occupancy code: voxel entirely inside the material
pub const OCC_FULL: u8 = 255;

/// Grid dimensions (voxel counts along each axis)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridDim {
    /// Voxel count along X
    pub nx: u32,
    /// Voxel count along Y
    pub ny: u32,
    /// Voxel count along Z
    pub nz: u32,
}

impl GridDim {
    /// Create a dimension triple
    pub fn new(nx: u32, ny: u32, nz: u32) -> Self {
        Self { nx, ny, nz }
    }

    /// Total voxel count
    #[inline(always)]
    pub fn count(&self) -> usize {
        self.nx as usize * self.ny as usize * self.nz as usize
    }
}

/// Host-resident dense voxel grid
///
/// Read and written by value on the CPU; upload to a
/// [`DeviceGrid`](crate::geometry::DeviceGrid) to run kernels against it.
#[derive(Debug, Clone)]
pub struct HostGrid<T> {
    /// Flat voxel data, X-major
    pub data: Vec<T>,
    dim: GridDim,
    res: f32,
    offset: Vec3,
}

impl<T> HostGrid<T> {
    /// Grid dimensions
    #[inline(always)]
    pub fn dim(&self) -> GridDim {
        self.dim
    }

    /// Cell edge length
    #[inline(always)]
    pub fn res(&self) -> f32 {
        self.res
    }

    /// World offset of the grid's minimum corner
    #[inline(always)]
    pub fn offset(&self) -> Vec3 {
        self.offset
    }

    /// Flat index of voxel `(ix, iy, iz)` (bounds-unchecked)
    #[inline(always)]
    pub fn index(&self, ix: u32, iy: u32, iz: u32) -> usize {
        ix as usize
            + iy as usize * self.dim.nx as usize
            + iz as usize * self.dim.nx as usize * self.dim.ny as usize
    }

    /// Set the value at voxel `(ix, iy, iz)`
    #[inline(always)]
    pub fn set(&mut self, ix: u32, iy: u32, iz: u32, value: T) {
        let i = self.index(ix, iy, iz);
        self.data[i] = value;
    }

    /// World-space center of voxel `(ix, iy, iz)`
    #[inline(always)]
    pub fn voxel_center(&self, ix: u32, iy: u32, iz: u32) -> Vec3 {
        self.offset + (Vec3::new(ix as f32, iy as f32, iz as f32) + Vec3::splat(0.5)) * self.res
    }

    /// Whether two grids share dimensions, resolution and offset
    pub fn compatible_with<U: Copy + Default>(&self, other: &HostGrid<U>) -> bool {
        self.dim == other.dim
            && (self.res - other.res).abs() < 1e-9
            && (self.offset - other.offset).length() < 1e-9
    }
}

impl<T: Copy> HostGrid<T> {
    /// Value at voxel `(ix, iy, iz)`
    #[inline(always)]
    pub fn get(&self, ix: u32, iy: u32, iz: u32) -> T {
        self.data[self.index(ix, iy, iz)]
    }
}

impl<T: Copy + Default> HostGrid<T> {
    /// Create a grid filled with the default value
    pub fn new(dim: GridDim, res: f32, offset: Vec3) -> Self {
        Self {
            data: vec![T::default(); dim.count()],
            dim,
            res,
            offset,
        }
    }

    /// Create a grid from existing flat data (must match `dim.count()`)
    pub fn from_data(data: Vec<T>, dim: GridDim, res: f32, offset: Vec3) -> Self {
        assert_eq!(data.len(), dim.count(), "data length must match dimensions");
        Self {
            data,
            dim,
            res,
            offset,
        }
    }
}

/// Rasterize shapes into an occupancy grid on the host
///
/// Z-slab parallel over rayon. A voxel is `OCC_FULL` when its center is at
/// least the circumscribing-sphere radius inside the nearest shape,
/// `OCC_PARTIAL` when the boundary may pass through it, `OCC_EMPTY`
/// otherwise. Collaborators use this to build work/target grids from shape
/// lists; tests use it as the brute-force reference for device
/// rasterization.
pub fn rasterize_occupancy(shapes: &[Shape], dim: GridDim, res: f32, offset: Vec3) -> HostGrid<u8> {
    let mut grid = HostGrid::<u8>::new(dim, res, offset);
    let b = res * 3.0_f32.sqrt() * 0.5;
    let slice = dim.nx as usize * dim.ny as usize;
    let nx = dim.nx as usize;

    grid.data
        .par_chunks_mut(slice)
        .enumerate()
        .for_each(|(iz, slab)| {
            let z = offset.z + (iz as f32 + 0.5) * res;
            for iy in 0..dim.ny as usize {
                let y = offset.y + (iy as f32 + 0.5) * res;
                let row = iy * nx;
                for ix in 0..nx {
                    let p = Vec3::new(offset.x + (ix as f32 + 0.5) * res, y, z);
                    let d = shapes
                        .iter()
                        .map(|s| s.distance(p))
                        .fold(f32::INFINITY, f32::min);
                    slab[row + ix] = if d <= -b {
                        OCC_FULL
                    } else if d <= b {
                        OCC_PARTIAL
                    } else {
                        OCC_EMPTY
                    };
                }
            }
        });

    grid
}
