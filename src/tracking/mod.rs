//! Removal tracking over work and target grids
//!
//! [`TrackingGrid`] combines a work-stock occupancy grid and a target
//! occupancy grid into one per-cell state grid on the device, then answers
//! the planner's questions: where is material still to remove, where must
//! the tool not go, and what does committing one removal step do. Commits
//! are transactional; a step that would detach a large fragment or cut
//! protected material leaves the state exactly as it was.
//!
//! Author: Moroya Sakamoto

use glam::Vec3;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::geometry::{
    connected_regions, count_in_shape, dist_field, encode_count_blocks, fill_shapes, ElemType,
    DeviceGrid,
};
use crate::grid::{GridDim, HostGrid, OCC_PARTIAL};
use crate::kernel::{
    reduce_levels, GpuEngine, KernelError, KernelId, ReduceOp, SlotCursor, TAG_RESULTS,
    TAG_SNAPSHOT,
};
use crate::types::{RoundPolicy, Shape};

/// Min-propagation sweep rounds used when labelling components
const REGION_ROUNDS: u32 = 4;

/// Combined per-cell state of target and remaining work material
///
/// The raw codes are fixed; they are what the state kernels read and
/// write, and what [`TrackingGrid::download_state`] decodes.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellState {
    /// Target material, never to be removed
    FullDone = 0,
    /// Outside both target and work
    EmptyDone = 1,
    /// Work material entirely outside the target, still present
    EmptyRemaining = 2,
    /// Target surface cell already cut to its final partial fill
    PartialDone = 3,
    /// Target surface cell still carrying full work material
    PartialRemaining = 4,
}

impl CellState {
    /// Decode a raw device code
    pub fn from_raw(v: u32) -> Option<CellState> {
        Some(match v {
            0 => CellState::FullDone,
            1 => CellState::EmptyDone,
            2 => CellState::EmptyRemaining,
            3 => CellState::PartialDone,
            4 => CellState::PartialRemaining,
            _ => return None,
        })
    }

    /// Whether material remains to be removed in this state
    pub fn has_work(self) -> bool {
        matches!(self, CellState::EmptyRemaining | CellState::PartialRemaining)
    }
}

/// Tracking failures
#[derive(Debug, Error)]
pub enum TrackError {
    /// Engine or dispatch failure
    #[error(transparent)]
    Kernel(#[from] KernelError),
    /// Work and target grids differ in dimensions, resolution or offset
    #[error("work and target grids have mismatched geometry")]
    IncompatibleGrids,
    /// The target holds material where the work stock has none
    #[error("target is not achievable from the work stock ({cells} conflicting cells)")]
    UnachievableTarget {
        /// Number of conflicting cells
        cells: u32,
    },
    /// The guaranteed-removal shape is not contained in the maximal one
    #[error("min shape exceeds max shape in {cells} cells")]
    MinMaxReversal {
        /// Number of cells set in min but not in max
        cells: u32,
    },
    /// The maximal removal shape touches protected material
    #[error("removal would cut {cells} protected cells")]
    Overcut {
        /// Number of protected cells inside the max shape
        cells: u32,
        /// Flat indices of the violating cells
        indices: Vec<u32>,
    },
    /// A removal would detach a fragment too large to be debris
    #[error(
        "removal would detach a fragment of {cells} cells, at least half \
         the largest remaining region ({largest} cells)"
    )]
    LargeFragment {
        /// Size of the detached fragment
        cells: u32,
        /// Size of the largest remaining region
        largest: u32,
    },
    /// More disconnected work regions after a removal than can be tracked
    #[error("more than four disconnected work regions after removal")]
    FragmentOverflow,
    /// The state grid holds a code outside the state machine
    #[error("corrupt state value {value} at cell {index}")]
    CorruptState {
        /// Flat cell index
        index: usize,
        /// Raw device code
        value: u32,
    },
}

/// What a shape query asks about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    /// Does the shape still contain removable material?
    HasWork,
    /// Does the shape touch cells the tool must not cut?
    Blocked,
}

/// One shape query for [`TrackingGrid::parallel_query`]
#[derive(Debug, Clone, Copy)]
pub struct ShapeQuery {
    /// Shape to test
    pub shape: Shape,
    /// Question being asked
    pub kind: QueryKind,
    /// Rounding policy for cell membership
    pub policy: RoundPolicy,
}

/// Device-resident removal tracking state
#[derive(Debug)]
pub struct TrackingGrid {
    engine: GpuEngine,
    state: DeviceGrid,
    dist: DeviceGrid,
    has_work: DeviceGrid,
    blocked: DeviceGrid,
    min_mask: DeviceGrid,
    max_mask: DeviceGrid,
    check: DeviceGrid,
    protect_z: f32,
}

impl TrackingGrid {
    /// Build the tracking state from work-stock and target occupancy grids
    ///
    /// Rejects geometry mismatches and targets that require material the
    /// stock does not have. The target surface distance field is computed
    /// once here and stays fixed for the session.
    pub fn from_work_and_target(
        mut engine: GpuEngine,
        work: &HostGrid<u8>,
        target: &HostGrid<u8>,
    ) -> Result<Self, TrackError> {
        if !work.compatible_with(target) {
            return Err(TrackError::IncompatibleGrids);
        }
        let dim = work.dim();
        let res = work.res();
        let offset = work.offset();

        let widen = |g: &HostGrid<u8>| {
            let data = g.data.iter().map(|&v| u32::from(v)).collect();
            HostGrid::from_data(data, dim, res, offset)
        };
        let target_codes = engine.upload(&widen(target));
        let work_codes = engine.upload(&widen(work));

        let state = engine.create_grid(ElemType::U32, dim, res, offset);
        engine.map2(KernelId::CombineState, &target_codes, &work_codes, &state, None)?;

        let check = engine.create_grid(ElemType::U32, dim, res, offset);
        engine.map(KernelId::IllegalMask, &state, &check, None)?;
        let cells = engine.reduce_sum(&check)?;
        if cells > 0 {
            return Err(TrackError::UnachievableTarget { cells });
        }

        let surf: Vec<u32> = target
            .data
            .iter()
            .map(|&v| u32::from(v == OCC_PARTIAL))
            .collect();
        let surface = engine.upload(&HostGrid::from_data(surf, dim, res, offset));
        let dist = dist_field(&mut engine, &surface)?;

        let has_work = engine.create_grid(ElemType::U32, dim, res, offset);
        let blocked = engine.create_grid(ElemType::U32, dim, res, offset);
        let min_mask = engine.create_grid(ElemType::U32, dim, res, offset);
        let max_mask = engine.create_grid(ElemType::U32, dim, res, offset);

        let mut this = Self {
            engine,
            state,
            dist,
            has_work,
            blocked,
            min_mask,
            max_mask,
            check,
            protect_z: f32::NEG_INFINITY,
        };
        this.refresh_caches()?;
        info!(nx = dim.nx, ny = dim.ny, nz = dim.nz, res, "tracking grid ready");
        Ok(this)
    }

    /// Grid dimensions
    pub fn dim(&self) -> GridDim {
        self.state.dim()
    }

    /// Cell edge length
    pub fn res(&self) -> f32 {
        self.state.res()
    }

    /// World offset of the minimum corner
    pub fn offset(&self) -> Vec3 {
        self.state.offset()
    }

    /// Current protection plane height
    pub fn protect_z(&self) -> f32 {
        self.protect_z
    }

    /// The engine backing this grid
    pub fn engine(&mut self) -> &mut GpuEngine {
        &mut self.engine
    }

    /// Number of cells still carrying removable material
    pub fn remaining_work_cells(&mut self) -> Result<u32, TrackError> {
        Ok(self.engine.reduce_sum(&self.has_work)?)
    }

    /// Freeze all remaining work below a Z plane as done and mark it
    /// protected
    ///
    /// The plane only ever rises: a call with a lower `z` than the current
    /// plane is a no-op, and material frozen by an earlier, higher plane
    /// stays frozen. Used when the part below a cut line has been parted
    /// off and must not be touched again.
    pub fn set_protected_work_below_z(&mut self, z: f32) -> Result<(), TrackError> {
        if z <= self.protect_z {
            return Ok(());
        }
        self.protect_z = z;
        let p = [z, 0.0, 0.0, 0.0f32];
        self.engine
            .update(KernelId::FreezeBelow, &self.state, Some(bytemuck::cast_slice(&p)))?;
        self.refresh_caches()?;
        Ok(())
    }

    /// Commit one removal step and return the removed volume
    ///
    /// `min` is the union of shapes the step is guaranteed to remove
    /// (rasterized inward), `max` the union it may touch (rasterized
    /// outward). The commit is staged: the min/max containment and overcut
    /// checks run before any state changes, and the fragment pass
    /// afterwards rolls the state back if it fails. Fragments smaller than
    /// half the largest remaining region are finalized as debris and
    /// logged; their volume is not part of the return value.
    pub fn commit_removal(
        &mut self,
        min: &[Shape],
        max: &[Shape],
        ignore_overcut: bool,
    ) -> Result<f64, TrackError> {
        fill_shapes(&mut self.engine, &self.min_mask, min, RoundPolicy::Inward)?;
        fill_shapes(&mut self.engine, &self.max_mask, max, RoundPolicy::Outward)?;

        self.engine
            .map2(KernelId::ReversalMask, &self.min_mask, &self.max_mask, &self.check, None)?;
        let cells = self.engine.reduce_sum(&self.check)?;
        if cells > 0 {
            return Err(TrackError::MinMaxReversal { cells });
        }

        let p = [self.protect_z, 0.0, 0.0, 0.0f32];
        self.engine.map2(
            KernelId::OvercutMask,
            &self.max_mask,
            &self.state,
            &self.check,
            Some(bytemuck::cast_slice(&p)),
        )?;
        let cells = self.engine.reduce_sum(&self.check)?;
        if cells > 0 {
            let indices = self.engine.pack(&self.check, cells)?;
            if !ignore_overcut {
                return Err(TrackError::Overcut { cells, indices });
            }
            warn!(cells, ?indices, "committing removal over protected material");
        }

        self.engine
            .map2(KernelId::RemovableMask, &self.state, &self.min_mask, &self.check, None)?;
        let half_cells = self.engine.reduce_sum(&self.check)?;
        if half_cells == 0 {
            return Ok(0.0);
        }

        // Snapshot for rollback if the fragment pass rejects the step
        let snap = self
            .engine
            .scratch(ElemType::U32, self.state.len(), TAG_SNAPSHOT);
        let mut encoder = self.engine.begin_encoder();
        encoder.copy_buffer_to_buffer(&self.state.buffer, 0, &snap, 0, 4 * self.state.len());
        self.engine.submit(encoder);

        self.engine
            .update2(KernelId::CommitApply, &self.state, &self.min_mask, None)?;

        self.engine
            .map(KernelId::HasWorkMask, &self.state, &self.has_work, None)?;
        let regions = connected_regions(&mut self.engine, &self.has_work, REGION_ROUNDS)?;
        let hist = crate::geometry::top4_labels(&mut self.engine, &regions)?;
        if hist.overflow {
            self.rollback(&snap)?;
            return Err(TrackError::FragmentOverflow);
        }
        // Fallen debris must be small relative to the workpiece; a
        // detached piece of at least half the largest region is breakage
        if let Some((_, largest)) = hist.largest() {
            for &(_, cells) in hist.entries.iter().skip(1) {
                if u64::from(cells) * 2 >= u64::from(largest) {
                    self.rollback(&snap)?;
                    return Err(TrackError::LargeFragment { cells, largest });
                }
            }
        }

        let res3 = f64::from(self.res()).powi(3);
        for &(label, cells) in hist.entries.iter().skip(1) {
            let lp = [label, 0u32, 0, 0];
            self.engine.update2(
                KernelId::FinalizeLabel,
                &self.state,
                &regions,
                Some(bytemuck::cast_slice(&lp)),
            )?;
            warn!(
                label,
                cells,
                volume = f64::from(cells) * res3,
                "finalized detached debris region"
            );
        }

        self.refresh_caches()?;
        Ok(f64::from(half_cells) * 0.5 * res3)
    }

    /// Whether a shape still contains removable material
    pub fn query_has_work(&mut self, shape: &Shape, policy: RoundPolicy) -> Result<bool, TrackError> {
        Ok(count_in_shape(&mut self.engine, &self.has_work, shape, policy)? > 0)
    }

    /// Whether a shape touches cells the tool must not cut
    pub fn query_blocked(&mut self, shape: &Shape, policy: RoundPolicy) -> Result<bool, TrackError> {
        Ok(count_in_shape(&mut self.engine, &self.blocked, shape, policy)? > 0)
    }

    /// Answer a batch of shape queries with one readback
    ///
    /// All counting and reduction work is encoded back to back, split
    /// across submissions only when the uniform pool runs out, and the
    /// per-query counts come home in a single mapped buffer.
    pub fn parallel_query(&mut self, queries: &[ShapeQuery]) -> Result<Vec<bool>, TrackError> {
        if queries.is_empty() {
            return Ok(Vec::new());
        }
        let nblocks = crate::geometry::block_count(self.dim());
        let per_query = 1 + reduce_levels(nblocks);
        let results = self
            .engine
            .scratch(ElemType::U32, queries.len() as u64, TAG_RESULTS);
        let mut encoder = self.engine.begin_encoder();
        let mut slots = SlotCursor::new();
        for (i, q) in queries.iter().enumerate() {
            if slots.remaining() < per_query {
                self.engine.submit(encoder);
                encoder = self.engine.begin_encoder();
                slots.reset();
            }
            let mask = match q.kind {
                QueryKind::HasWork => &self.has_work,
                QueryKind::Blocked => &self.blocked,
            };
            let (blocks, n) = encode_count_blocks(
                &mut self.engine,
                mask,
                &q.shape,
                q.policy,
                &mut encoder,
                &mut slots,
            )?;
            let out = self
                .engine
                .encode_reduce(ReduceOp::SumU32, blocks, n, &mut encoder, &mut slots)?;
            encoder.copy_buffer_to_buffer(&out, 0, &results, 4 * i as u64, 4);
        }
        self.engine.submit(encoder);
        let bytes = self
            .engine
            .read_back(&results, 0, 4 * queries.len() as u64)?;
        let counts: &[u32] = bytemuck::cast_slice(&bytes);
        Ok(counts.iter().map(|&c| c > 0).collect())
    }

    /// Download per-cell deviation values for remaining work
    ///
    /// Done cells hold `-1`; remaining cells hold their distance to the
    /// target surface plus a half-voxel-diagonal slack, or `0` when the
    /// cell sits on the surface itself. With `exclude_protected`,
    /// remaining cells below the protection plane also hold `-1`.
    pub fn extract_work_with_deviation(
        &mut self,
        exclude_protected: bool,
    ) -> Result<HostGrid<f32>, TrackError> {
        let dim = self.dim();
        let res = self.res();
        let offset = self.offset();
        let dev = self.engine.create_grid(ElemType::F32, dim, res, offset);
        let p = [
            u32::from(exclude_protected),
            self.protect_z.to_bits(),
            0,
            0,
        ];
        self.engine.map2(
            KernelId::DeviationExtract,
            &self.state,
            &self.dist,
            &dev,
            Some(bytemuck::cast_slice(&p)),
        )?;
        let data = self.engine.download::<f32>(&dev)?;
        Ok(HostGrid::from_data(data, dim, res, offset))
    }

    /// Download and decode the full state grid
    pub fn download_state(&mut self) -> Result<Vec<CellState>, TrackError> {
        let raw = self.engine.download::<u32>(&self.state)?;
        raw.iter()
            .enumerate()
            .map(|(index, &value)| {
                CellState::from_raw(value).ok_or(TrackError::CorruptState { index, value })
            })
            .collect()
    }

    fn rollback(&mut self, snap: &wgpu::Buffer) -> Result<(), TrackError> {
        let mut encoder = self.engine.begin_encoder();
        encoder.copy_buffer_to_buffer(snap, 0, &self.state.buffer, 0, 4 * self.state.len());
        self.engine.submit(encoder);
        self.engine
            .map(KernelId::HasWorkMask, &self.state, &self.has_work, None)?;
        Ok(())
    }

    fn refresh_caches(&mut self) -> Result<(), KernelError> {
        self.engine
            .map(KernelId::HasWorkMask, &self.state, &self.has_work, None)?;
        let p = [self.protect_z, 0.0, 0.0, 0.0f32];
        self.engine.map(
            KernelId::BlockedMask,
            &self.state,
            &self.blocked,
            Some(bytemuck::cast_slice(&p)),
        )?;
        Ok(())
    }
}
