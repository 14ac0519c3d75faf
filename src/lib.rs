//! # voxelcarve
//!
//! GPU voxel removal simulation for subtractive fabrication.
//!
//! Tracks progressive material removal on a dense 3D voxel grid to validate
//! and drive tool-path planning for a wire/grinding CNC process. Given a
//! target shape and a stock ("work") shape it maintains a combined per-voxel
//! state, commits removal operations transactionally with safety checks, and
//! answers fast spatial queries for an external path planner.
//!
//! ## Features
//!
//! - **Kernel Framework**: closed catalog of WGSL compute kernels (map,
//!   map2, tree reduction, stream compaction) over typed device buffers
//! - **Voxel Geometry**: shape rasterization, jump-flood distance fields,
//!   connected-component labeling, approximate top-4 label histograms,
//!   two-level shape-overlap counting
//! - **Tracking**: transactional removal commits with reversal, overcut and
//!   fragment checks; derived query caches; batched planner queries
//!
//! ## Example
//!
//! ```no_run
//! use voxelcarve::prelude::*;
//! use glam::Vec3;
//!
//! let engine = GpuEngine::new().unwrap();
//! let dim = GridDim::new(64, 64, 64);
//! let stock = Shape::OrientedBox {
//!     center: Vec3::splat(8.0),
//!     half_axes: [Vec3::X * 8.0, Vec3::Y * 8.0, Vec3::Z * 8.0],
//! };
//! let target = Shape::Cylinder {
//!     origin: Vec3::splat(8.0),
//!     axis: Vec3::Z,
//!     radius: 4.0,
//!     height: 12.0,
//! };
//! let work = rasterize_occupancy(&[stock], dim, 0.25, Vec3::ZERO);
//! let goal = rasterize_occupancy(&[target], dim, 0.25, Vec3::ZERO);
//! let mut tracking = TrackingGrid::from_work_and_target(engine, &work, &goal).unwrap();
//!
//! // Planner proposes a removal; the tracking layer validates and commits.
//! let cut = Shape::Cylinder {
//!     origin: Vec3::new(2.0, 2.0, 8.0),
//!     axis: Vec3::Z,
//!     radius: 1.0,
//!     height: 16.0,
//! };
//! let removed_mm3 = tracking.commit_removal(&[cut], &[cut], false).unwrap();
//! println!("removed {removed_mm3} mm^3");
//! ```
//!
//! Author: Moroya Sakamoto

#![warn(missing_docs)]

pub mod geometry;
pub mod grid;
pub mod kernel;
pub mod primitives;
pub mod tracking;
pub mod types;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude - commonly used types and functions
pub mod prelude {
    pub use crate::geometry::{
        bound_of_axis, connected_regions, count_in_shape, dist_field, fill_shape, fill_shapes,
        sample_sdf, top4_labels, DeviceGrid, ElemType, LabelHistogram,
    };
    pub use crate::grid::{
        rasterize_occupancy, GridDim, HostGrid, OCC_EMPTY, OCC_FULL, OCC_PARTIAL,
    };
    pub use crate::kernel::{GpuEngine, KernelError, KernelId, ReduceOp, SlotCursor};
    pub use crate::tracking::{CellState, QueryKind, ShapeQuery, TrackError, TrackingGrid};
    pub use crate::types::{RoundPolicy, Shape};
}
