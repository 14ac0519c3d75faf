//! Device-resident grids and geometric bulk operations
//!
//! A [`DeviceGrid`] is a GPU storage buffer plus the grid geometry it was
//! allocated with (dimensions, resolution, world offset) and a unique id
//! used for aliasing checks. The free functions here compose catalog
//! kernels into the mid-level operations the tracking layer is built from:
//! shape rasterization, SDF sampling, jump-flood distance fields,
//! connected-component labelling, label histograms, axis bounds and
//! two-level shape counting.
//!
//! Author: Moroya Sakamoto

use std::sync::Arc;

use bytemuck::Pod;
use glam::Vec3;

use crate::grid::GridDim;
use crate::kernel::{GpuEngine, KernelError, KernelId, ReduceOp, SlotCursor};
use crate::kernel::{TAG_PING, TAG_PONG, TAG_PROJECT};
use crate::types::{RoundPolicy, Shape};

/// Element type of a device grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElemType {
    /// One `u32` per voxel (masks, states, labels, counts)
    U32,
    /// One `f32` per voxel (distances, deviations)
    F32,
    /// One `vec4<f32>` per voxel (seed positions, projection pairs)
    Vec4F,
    /// One 8-word label histogram per voxel
    Hist8,
}

impl ElemType {
    /// Element size in bytes
    pub fn size(self) -> u64 {
        match self {
            ElemType::U32 | ElemType::F32 => 4,
            ElemType::Vec4F => 16,
            ElemType::Hist8 => 32,
        }
    }
}

/// Host element types that can be uploaded to / downloaded from a grid
pub trait GridElem: Pod {
    /// Device element type this maps onto
    const ELEM: ElemType;
}

impl GridElem for u32 {
    const ELEM: ElemType = ElemType::U32;
}

impl GridElem for f32 {
    const ELEM: ElemType = ElemType::F32;
}

impl GridElem for [f32; 4] {
    const ELEM: ElemType = ElemType::Vec4F;
}

impl GridElem for [u32; 8] {
    const ELEM: ElemType = ElemType::Hist8;
}

/// Device-resident voxel grid
///
/// Cloning is cheap (the buffer is shared); the id moves with the clone,
/// so a clone still counts as the same grid for aliasing checks.
#[derive(Clone)]
pub struct DeviceGrid {
    pub(crate) buffer: Arc<wgpu::Buffer>,
    pub(crate) meta: Arc<wgpu::Buffer>,
    pub(crate) id: u64,
    pub(crate) elem: ElemType,
    pub(crate) dim: GridDim,
    pub(crate) res: f32,
    pub(crate) offset: Vec3,
}

impl DeviceGrid {
    /// Element type
    #[inline(always)]
    pub fn elem(&self) -> ElemType {
        self.elem
    }

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

    /// World offset of the minimum corner
    #[inline(always)]
    pub fn offset(&self) -> Vec3 {
        self.offset
    }

    /// Total voxel count
    #[inline(always)]
    pub fn len(&self) -> u64 {
        self.dim.count() as u64
    }

    /// Whether the grid holds zero voxels
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for DeviceGrid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceGrid")
            .field("id", &self.id)
            .field("elem", &self.elem)
            .field("dim", &self.dim)
            .field("res", &self.res)
            .field("offset", &self.offset)
            .finish()
    }
}

/// Top label histogram of a region grid
///
/// At most four (label, cell count) entries, sorted by descending count.
/// `overflow` is set when more than four distinct labels were present, in
/// which case the entries cover only part of the grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelHistogram {
    /// (label, cell count), largest region first
    pub entries: Vec<(u32, u32)>,
    /// More than four distinct labels were seen
    pub overflow: bool,
}

impl LabelHistogram {
    /// The largest region, if any label was present
    pub fn largest(&self) -> Option<(u32, u32)> {
        self.entries.first().copied()
    }
}

/// Pack a shape and boundary offset into the 16-scalar parameter block
pub(crate) fn pack_shape(shape: &Shape, boundary_offset: f32) -> [f32; 16] {
    let mut p = [0.0f32; 16];
    match *shape {
        Shape::Cylinder {
            origin,
            axis,
            radius,
            height,
        } => {
            p[0..3].copy_from_slice(&origin.to_array());
            p[3] = radius;
            p[4..7].copy_from_slice(&axis.to_array());
            p[7] = height;
            p[15] = 0.0;
        }
        Shape::ExtrudedSlot {
            p: a,
            q,
            axis,
            radius,
            height,
        } => {
            p[0..3].copy_from_slice(&a.to_array());
            p[3] = radius;
            p[4..7].copy_from_slice(&q.to_array());
            p[7] = height;
            p[8..11].copy_from_slice(&axis.to_array());
            p[15] = 1.0;
        }
        Shape::OrientedBox { center, half_axes } => {
            p[0..3].copy_from_slice(&center.to_array());
            p[4..7].copy_from_slice(&half_axes[0].to_array());
            p[8..11].copy_from_slice(&half_axes[1].to_array());
            p[12..15].copy_from_slice(&half_axes[2].to_array());
            p[15] = 2.0;
        }
    }
    p[11] = boundary_offset;
    p
}

/// Encode an OR-rasterization of one shape into a `u32` mask grid
pub(crate) fn encode_fill_shape(
    engine: &mut GpuEngine,
    dst: &DeviceGrid,
    shape: &Shape,
    policy: RoundPolicy,
    encoder: &mut wgpu::CommandEncoder,
    slots: &mut SlotCursor,
) -> Result<(), KernelError> {
    let params = pack_shape(shape, policy.boundary_offset(dst.res()));
    engine.encode_kernel(
        KernelId::FillShape,
        &[&dst.buffer],
        Some(dst.meta.as_ref()),
        Some(bytemuck::cast_slice(&params)),
        dst.len(),
        encoder,
        slots,
    )
}

/// Rasterize one shape into a mask grid, clearing it first
///
/// A voxel is set when its center's signed distance is within the policy's
/// boundary offset: `Inward` sets only voxels entirely inside the shape,
/// `Outward` every voxel the shape may touch.
pub fn fill_shape(
    engine: &mut GpuEngine,
    dst: &DeviceGrid,
    shape: &Shape,
    policy: RoundPolicy,
) -> Result<(), KernelError> {
    fill_shapes(engine, dst, std::slice::from_ref(shape), policy)
}

/// Rasterize the union of several shapes into a mask grid
///
/// Fills are OR-writes, so shape order does not matter. Each shape takes
/// one uniform slot; long lists are split across submissions.
pub fn fill_shapes(
    engine: &mut GpuEngine,
    dst: &DeviceGrid,
    shapes: &[Shape],
    policy: RoundPolicy,
) -> Result<(), KernelError> {
    if dst.elem() != ElemType::U32 {
        return Err(KernelError::ElementMismatch {
            kernel: KernelId::FillShape,
            expected: ElemType::U32,
            actual: dst.elem(),
        });
    }
    let mut encoder = engine.begin_encoder();
    encoder.clear_buffer(&dst.buffer, 0, None);
    let mut slots = SlotCursor::new();
    for shape in shapes {
        if slots.remaining() == 0 {
            engine.submit(encoder);
            encoder = engine.begin_encoder();
            slots.reset();
        }
        encode_fill_shape(engine, dst, shape, policy, &mut encoder, &mut slots)?;
    }
    engine.submit(encoder);
    Ok(())
}

/// Sample a shape's raw SDF at every voxel center into an `f32` grid
pub fn sample_sdf(
    engine: &mut GpuEngine,
    dst: &DeviceGrid,
    shape: &Shape,
) -> Result<(), KernelError> {
    if dst.elem() != ElemType::F32 {
        return Err(KernelError::ElementMismatch {
            kernel: KernelId::SdfSample,
            expected: ElemType::F32,
            actual: dst.elem(),
        });
    }
    let params = pack_shape(shape, 0.0);
    let mut encoder = engine.begin_encoder();
    let mut slots = SlotCursor::new();
    engine.encode_kernel(
        KernelId::SdfSample,
        &[&dst.buffer],
        Some(dst.meta.as_ref()),
        Some(bytemuck::cast_slice(&params)),
        dst.len(),
        &mut encoder,
        &mut slots,
    )?;
    engine.submit(encoder);
    Ok(())
}

/// Coarse block count of a grid (4^3 voxels per block)
pub(crate) fn block_count(dim: GridDim) -> u64 {
    let bx = u64::from(dim.nx.div_ceil(4));
    let by = u64::from(dim.ny.div_ceil(4));
    let bz = u64::from(dim.nz.div_ceil(4));
    bx * by * bz
}

/// Encode the coarse/fine counting pass; returns the per-block count
/// buffer and its length, ready for a sum reduction
pub(crate) fn encode_count_blocks(
    engine: &mut GpuEngine,
    mask: &DeviceGrid,
    shape: &Shape,
    policy: RoundPolicy,
    encoder: &mut wgpu::CommandEncoder,
    slots: &mut SlotCursor,
) -> Result<(Arc<wgpu::Buffer>, u64), KernelError> {
    if mask.elem() != ElemType::U32 {
        return Err(KernelError::ElementMismatch {
            kernel: KernelId::CountInShape,
            expected: ElemType::U32,
            actual: mask.elem(),
        });
    }
    let nblocks = block_count(mask.dim());
    let blocks = engine.scratch(ElemType::U32, nblocks, crate::kernel::TAG_BLOCKS);
    let params = pack_shape(shape, policy.boundary_offset(mask.res()));
    engine.encode_kernel(
        KernelId::CountInShape,
        &[&mask.buffer, &blocks],
        Some(mask.meta.as_ref()),
        Some(bytemuck::cast_slice(&params)),
        nblocks,
        encoder,
        slots,
    )?;
    Ok((blocks, nblocks))
}

/// Count the set cells of a mask whose centers fall inside a shape under
/// a rounding policy
///
/// Runs a coarse pass over 4^3 blocks first; a block whose center is
/// provably outside the offset shape is rejected without touching its
/// voxels.
pub fn count_in_shape(
    engine: &mut GpuEngine,
    mask: &DeviceGrid,
    shape: &Shape,
    policy: RoundPolicy,
) -> Result<u32, KernelError> {
    let mut encoder = engine.begin_encoder();
    let mut slots = SlotCursor::new();
    let (blocks, nblocks) = encode_count_blocks(engine, mask, shape, policy, &mut encoder, &mut slots)?;
    let out = engine.encode_reduce(ReduceOp::SumU32, blocks, nblocks, &mut encoder, &mut slots)?;
    engine.submit(encoder);
    let bytes = engine.read_back(&out, 0, 4)?;
    Ok(*bytemuck::from_bytes::<u32>(&bytes))
}

/// Euclidean distance field from the set cells of a mask
///
/// Jump-flood over the 26 neighbours with power-of-two step halving,
/// then a final pass converting the propagated seed positions to
/// distances. Cells unreached by any seed hold a large finite value.
/// The result is approximate near equidistant boundaries, which is
/// acceptable for deviation reporting.
pub fn dist_field(engine: &mut GpuEngine, mask: &DeviceGrid) -> Result<DeviceGrid, KernelError> {
    if mask.elem() != ElemType::U32 {
        return Err(KernelError::ElementMismatch {
            kernel: KernelId::SeedFromMask,
            expected: ElemType::U32,
            actual: mask.elem(),
        });
    }
    let n = mask.len();
    let ping = engine.scratch(ElemType::Vec4F, n, TAG_PING);
    let pong = engine.scratch(ElemType::Vec4F, n, TAG_PONG);
    let meta = mask.meta.clone();

    let mut encoder = engine.begin_encoder();
    let mut slots = SlotCursor::new();
    engine.encode_kernel(
        KernelId::SeedFromMask,
        &[&mask.buffer, &ping],
        Some(meta.as_ref()),
        None,
        n,
        &mut encoder,
        &mut slots,
    )?;

    let d = mask.dim();
    let max_dim = d.nx.max(d.ny).max(d.nz);
    let mut step = (max_dim.next_power_of_two() / 2).max(1);
    let mut src = ping;
    let mut dst = pong;
    loop {
        if slots.remaining() == 0 {
            engine.submit(encoder);
            encoder = engine.begin_encoder();
            slots.reset();
        }
        let p = [step, 0u32, 0, 0];
        engine.encode_kernel(
            KernelId::JumpFloodPass,
            &[&src, &dst],
            Some(meta.as_ref()),
            Some(bytemuck::cast_slice(&p)),
            n,
            &mut encoder,
            &mut slots,
        )?;
        std::mem::swap(&mut src, &mut dst);
        if step == 1 {
            break;
        }
        step /= 2;
    }

    let out = engine.create_grid(ElemType::F32, mask.dim(), mask.res(), mask.offset());
    engine.encode_kernel(
        KernelId::DistFromSeed,
        &[&src, &out.buffer],
        Some(meta.as_ref()),
        None,
        n,
        &mut encoder,
        &mut slots,
    )?;
    engine.submit(encoder);
    Ok(out)
}

/// Label the face-connected components of a mask
///
/// Each set cell starts as its own flat index; `rounds` rounds of
/// forward/backward min-propagation sweeps along X, Y and Z converge
/// every component to its minimum member index. Unset cells hold the
/// `u32::MAX` sentinel. Four rounds label any component whose shape a
/// machining step can realistically produce; pathological spirals would
/// need more.
pub fn connected_regions(
    engine: &mut GpuEngine,
    mask: &DeviceGrid,
    rounds: u32,
) -> Result<DeviceGrid, KernelError> {
    let labels = engine.create_grid(ElemType::U32, mask.dim(), mask.res(), mask.offset());
    let mut encoder = engine.begin_encoder();
    let mut slots = SlotCursor::new();
    engine.encode_map(KernelId::RegionInit, mask, &labels, None, &mut encoder, &mut slots)?;
    for _ in 0..rounds {
        engine.encode_sweep(KernelId::SweepX, &labels, &mut encoder, &mut slots)?;
        engine.encode_sweep(KernelId::SweepY, &labels, &mut encoder, &mut slots)?;
        engine.encode_sweep(KernelId::SweepZ, &labels, &mut encoder, &mut slots)?;
    }
    engine.submit(encoder);
    Ok(labels)
}

/// Histogram the labels of a region grid, keeping the four largest
pub fn top4_labels(
    engine: &mut GpuEngine,
    labels: &DeviceGrid,
) -> Result<LabelHistogram, KernelError> {
    let hist = engine.create_grid(ElemType::Hist8, labels.dim(), labels.res(), labels.offset());
    engine.map(KernelId::HistInit, labels, &hist, None)?;
    let raw = engine.reduce_hist(&hist)?;
    let overflow = raw[7] & 0x8000_0000 != 0;
    let mut entries: Vec<(u32, u32)> = (0..4)
        .map(|k| (raw[k], raw[4 + k] & !0x8000_0000))
        .filter(|&(label, count)| label != u32::MAX && count > 0)
        .collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1));
    Ok(LabelHistogram { entries, overflow })
}

/// Extent of a mask's set cells along a direction
///
/// Projects every set voxel center onto `dir` (assumed unit length) and
/// reduces to the min/max, expanded by the voxel circumscribing-sphere
/// radius so the returned interval covers the voxels, not just their
/// centers. `None` when the mask is empty.
pub fn bound_of_axis(
    engine: &mut GpuEngine,
    mask: &DeviceGrid,
    dir: Vec3,
) -> Result<Option<(f32, f32)>, KernelError> {
    if mask.elem() != ElemType::U32 {
        return Err(KernelError::ElementMismatch {
            kernel: KernelId::ProjectAxis,
            expected: ElemType::U32,
            actual: mask.elem(),
        });
    }
    let n = mask.len();
    let proj = engine.scratch(ElemType::Vec4F, n, TAG_PROJECT);
    let p = [dir.x, dir.y, dir.z, 0.0f32];
    let mut encoder = engine.begin_encoder();
    let mut slots = SlotCursor::new();
    engine.encode_kernel(
        KernelId::ProjectAxis,
        &[&mask.buffer, &proj],
        Some(mask.meta.as_ref()),
        Some(bytemuck::cast_slice(&p)),
        n,
        &mut encoder,
        &mut slots,
    )?;
    let out = engine.encode_reduce(ReduceOp::MinMax, proj, n, &mut encoder, &mut slots)?;
    engine.submit(encoder);
    let bytes = engine.read_back(&out, 0, 16)?;
    let v = *bytemuck::from_bytes::<[f32; 4]>(&bytes);
    if v[0] > v[1] {
        return Ok(None);
    }
    let b = mask.res() * 3.0_f32.sqrt() * 0.5;
    Ok(Some((v[0] - b, v[1] + b)))
}
