//! GPU compute engine
//!
//! [`GpuEngine`] owns the wgpu device and queue, the compiled pipeline
//! cache, a pool of scratch buffers keyed by element type and length, and
//! a bounded pool of 64-byte parameter uniforms. All dispatch goes through
//! the closed [`KernelId`] catalog; the typed entry points (`map`, `map2`,
//! `update`, `update2`) validate element types, grid geometry and aliasing
//! against the catalog before any command is encoded.
//!
//! Parameter uniforms are written with `Queue::write_buffer`, which takes
//! effect at the next submit. Each parameterized dispatch in a submission
//! therefore takes a fresh slot from a [`SlotCursor`]; the pool holds at
//! most [`MAX_UNIFORM_SLOTS`] buffers, and multi-pass operations split
//! their work across submissions when the cursor runs out.
//!
//! Grid sizes are bounded by `u32` total voxel counts; the flat element
//! count travels to kernels in the grid meta uniform.
//!
//! Author: Moroya Sakamoto

mod catalog;

use std::collections::HashMap;
use std::sync::Arc;

use glam::Vec3;
use thiserror::Error;
use wgpu::util::DeviceExt;

use crate::geometry::{DeviceGrid, ElemType, GridElem};
use crate::grid::{GridDim, HostGrid};

pub use catalog::{KernelFamily, KernelId};

/// Size of the parameter uniform pool
pub const MAX_UNIFORM_SLOTS: usize = 10;

/// Size of one parameter uniform (16 scalars)
const UNIFORM_SLOT_BYTES: u64 = 64;

/// Scratch buffer tag: reduction partials
pub(crate) const TAG_REDUCE: u8 = 0;
/// Scratch buffer tags: jump-flood ping/pong
pub(crate) const TAG_PING: u8 = 1;
pub(crate) const TAG_PONG: u8 = 2;
/// Scratch buffer tag: axis projection pairs
pub(crate) const TAG_PROJECT: u8 = 3;
/// Scratch buffer tag: coarse block counts
pub(crate) const TAG_BLOCKS: u8 = 4;
/// Scratch buffer tag: state snapshot for transactional commits
pub(crate) const TAG_SNAPSHOT: u8 = 5;
/// Scratch buffer tag: batched query results
pub(crate) const TAG_RESULTS: u8 = 6;

/// Engine and dispatch failures
#[derive(Debug, Error)]
pub enum KernelError {
    /// No GPU adapter is available
    #[error("no compatible gpu adapter found")]
    NoAdapter,
    /// The adapter refused the device request
    #[error("device request failed: {0}")]
    Device(#[from] wgpu::RequestDeviceError),
    /// A grid's element type does not match the kernel's catalog entry
    #[error("{kernel:?}: expected {expected:?} elements, got {actual:?}")]
    ElementMismatch {
        /// Kernel being dispatched
        kernel: KernelId,
        /// Element type the catalog requires
        expected: ElemType,
        /// Element type of the grid passed in
        actual: ElemType,
    },
    /// Input and output grids differ in dimensions, resolution or offset
    #[error("{kernel:?}: input and output grids have different geometry")]
    GridMismatch {
        /// Kernel being dispatched
        kernel: KernelId,
    },
    /// The same grid was passed as both an input and the output
    #[error("{kernel:?}: input and output must be distinct grids")]
    AliasedGrids {
        /// Kernel being dispatched
        kernel: KernelId,
    },
    /// The kernel does not belong to the family of the entry point used
    #[error("{kernel:?} is not a {family:?} kernel")]
    WrongFamily {
        /// Kernel being dispatched
        kernel: KernelId,
        /// Family the entry point dispatches
        family: KernelFamily,
    },
    /// The kernel requires a parameter block and none was given
    #[error("{kernel:?} requires a parameter block")]
    MissingParams {
        /// Kernel being dispatched
        kernel: KernelId,
    },
    /// The kernel takes no parameter block but one was given
    #[error("{kernel:?} takes no parameter block")]
    UnexpectedParams {
        /// Kernel being dispatched
        kernel: KernelId,
    },
    /// More parameterized dispatches in one submission than the pool holds
    #[error("uniform pool exhausted (more than 10 parameter blocks in one submission)")]
    UniformPoolExhausted,
    /// A typed download does not match the grid's element type
    #[error("download expected {expected:?} elements, grid holds {actual:?}")]
    DownloadMismatch {
        /// Element type of the requested host vector
        expected: ElemType,
        /// Element type of the device grid
        actual: ElemType,
    },
    /// Mapping a staging buffer for readback failed
    #[error("readback failed: {0}")]
    ReadBack(String),
}

/// Cursor over the parameter uniform pool for one submission
///
/// Reset (or recreate) after every `submit`; a dispatch that needs a
/// parameter block takes the next slot, and running past the pool size is
/// an error rather than a silent overwrite.
#[derive(Debug)]
pub struct SlotCursor {
    next: usize,
}

impl SlotCursor {
    /// Cursor at the first slot
    pub fn new() -> Self {
        Self { next: 0 }
    }

    /// Cursor starting at a later slot (earlier ones are reserved)
    pub fn starting_at(slot: usize) -> Self {
        Self { next: slot }
    }

    /// Slots still available in this submission
    pub fn remaining(&self) -> usize {
        MAX_UNIFORM_SLOTS.saturating_sub(self.next)
    }

    /// Rewind to the first slot (call only after a submit)
    pub fn reset(&mut self) {
        self.next = 0;
    }

    fn take(&mut self) -> Result<usize, KernelError> {
        if self.next >= MAX_UNIFORM_SLOTS {
            return Err(KernelError::UniformPoolExhausted);
        }
        let s = self.next;
        self.next += 1;
        Ok(s)
    }
}

impl Default for SlotCursor {
    fn default() -> Self {
        Self::new()
    }
}

/// Reduction operator over a device grid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    /// Sum of `u32` elements
    SumU32,
    /// Component-wise (min, max) of projection pairs
    MinMax,
    /// 4-slot label histogram merge
    Hist8,
}

impl ReduceOp {
    fn kernel(self) -> KernelId {
        match self {
            ReduceOp::SumU32 => KernelId::ReduceSumU32,
            ReduceOp::MinMax => KernelId::ReduceMinMax,
            ReduceOp::Hist8 => KernelId::ReduceHist8,
        }
    }

    fn elem(self) -> ElemType {
        match self {
            ReduceOp::SumU32 => ElemType::U32,
            ReduceOp::MinMax => ElemType::Vec4F,
            ReduceOp::Hist8 => ElemType::Hist8,
        }
    }
}

/// Number of kernel passes a tree reduction of `len` elements takes
pub(crate) fn reduce_levels(len: u64) -> usize {
    let mut n = len;
    let mut levels = 0;
    while n > 1 {
        n = n.div_ceil(256);
        levels += 1;
    }
    levels
}

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct GridMetaRaw {
    dims: [u32; 4],
    origin: [f32; 4],
}

#[derive(Debug)]
struct UniformPool {
    bufs: Vec<wgpu::Buffer>,
}

impl UniformPool {
    fn slot(&mut self, device: &wgpu::Device, i: usize) -> &wgpu::Buffer {
        while self.bufs.len() <= i {
            self.bufs.push(device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("param-uniform"),
                size: UNIFORM_SLOT_BYTES,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }));
        }
        &self.bufs[i]
    }
}

/// GPU compute engine owning the device, pipelines and buffer pools
#[derive(Debug)]
pub struct GpuEngine {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_info: wgpu::AdapterInfo,
    pipelines: HashMap<KernelId, wgpu::ComputePipeline>,
    scratch: HashMap<(ElemType, u64, u8), Arc<wgpu::Buffer>>,
    uniforms: UniformPool,
    next_grid_id: u64,
}

impl GpuEngine {
    /// Acquire the highest-performance adapter and create the engine
    pub fn new() -> Result<Self, KernelError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or(KernelError::NoAdapter)?;
        let adapter_info = adapter.get_info();
        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("voxelcarve-device"),
                required_features: wgpu::Features::empty(),
                required_limits: adapter.limits(),
                memory_hints: wgpu::MemoryHints::Performance,
            },
            None,
        ))?;
        tracing::info!(
            adapter = %adapter_info.name,
            backend = ?adapter_info.backend,
            "gpu engine ready"
        );
        Ok(Self {
            device,
            queue,
            adapter_info,
            pipelines: HashMap::new(),
            scratch: HashMap::new(),
            uniforms: UniformPool { bufs: Vec::new() },
            next_grid_id: 0,
        })
    }

    /// Adapter the engine is running on
    pub fn device_info(&self) -> &wgpu::AdapterInfo {
        &self.adapter_info
    }

    /// Allocate a zero-initialized device grid
    ///
    /// Panics if the total voxel count exceeds `u32::MAX`; the flat count
    /// travels to kernels in a `u32` field of the grid meta uniform.
    pub fn create_grid(&mut self, elem: ElemType, dim: GridDim, res: f32, offset: Vec3) -> DeviceGrid {
        assert!(
            u32::try_from(dim.count()).is_ok(),
            "grid voxel count {} exceeds the u32 addressing range",
            dim.count()
        );
        let total = dim.count() as u64;
        let buffer = Arc::new(self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("voxel-grid"),
            size: elem.size() * total,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        }));
        let raw = GridMetaRaw {
            dims: [dim.nx, dim.ny, dim.nz, total as u32],
            origin: [offset.x, offset.y, offset.z, res],
        };
        let meta = Arc::new(self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("grid-meta"),
            contents: bytemuck::bytes_of(&raw),
            usage: wgpu::BufferUsages::UNIFORM,
        }));
        self.next_grid_id += 1;
        DeviceGrid {
            buffer,
            meta,
            id: self.next_grid_id,
            elem,
            dim,
            res,
            offset,
        }
    }

    /// Upload a host grid into a freshly allocated device grid
    pub fn upload<T: GridElem>(&mut self, host: &HostGrid<T>) -> DeviceGrid {
        let grid = self.create_grid(T::ELEM, host.dim(), host.res(), host.offset());
        self.queue
            .write_buffer(&grid.buffer, 0, bytemuck::cast_slice(&host.data));
        grid
    }

    /// Download a device grid's full contents
    pub fn download<T: GridElem>(&mut self, grid: &DeviceGrid) -> Result<Vec<T>, KernelError> {
        if grid.elem() != T::ELEM {
            return Err(KernelError::DownloadMismatch {
                expected: T::ELEM,
                actual: grid.elem(),
            });
        }
        let bytes = self.read_back(&grid.buffer, 0, grid.elem().size() * grid.len())?;
        Ok(bytemuck::cast_slice(&bytes).to_vec())
    }

    /// Start a new command encoder
    pub fn begin_encoder(&self) -> wgpu::CommandEncoder {
        self.device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None })
    }

    /// Submit an encoder's commands to the queue
    pub fn submit(&self, encoder: wgpu::CommandEncoder) {
        self.queue.submit(Some(encoder.finish()));
    }

    /// Dispatch a `Map` kernel: `dst[i] = f(src[i])`
    pub fn map(
        &mut self,
        id: KernelId,
        src: &DeviceGrid,
        dst: &DeviceGrid,
        params: Option<&[u8]>,
    ) -> Result<(), KernelError> {
        let mut encoder = self.begin_encoder();
        let mut slots = SlotCursor::new();
        self.encode_map(id, src, dst, params, &mut encoder, &mut slots)?;
        self.submit(encoder);
        Ok(())
    }

    /// Encode a `Map` dispatch into an open encoder
    pub fn encode_map(
        &mut self,
        id: KernelId,
        src: &DeviceGrid,
        dst: &DeviceGrid,
        params: Option<&[u8]>,
        encoder: &mut wgpu::CommandEncoder,
        slots: &mut SlotCursor,
    ) -> Result<(), KernelError> {
        let (is, os) = id.map_io().ok_or(KernelError::WrongFamily {
            kernel: id,
            family: KernelFamily::Map,
        })?;
        check_elem(id, is, src)?;
        check_elem(id, os, dst)?;
        check_geometry(id, src, dst)?;
        if src.id == dst.id {
            return Err(KernelError::AliasedGrids { kernel: id });
        }
        check_params(id, params)?;
        let meta = id.needs_meta().then(|| src.meta.clone());
        self.encode_kernel(
            id,
            &[&src.buffer, &dst.buffer],
            meta.as_deref(),
            params,
            src.len(),
            encoder,
            slots,
        )
    }

    /// Dispatch a `Map2` kernel: `dst[i] = f(a[i], b[i])`
    pub fn map2(
        &mut self,
        id: KernelId,
        a: &DeviceGrid,
        b: &DeviceGrid,
        dst: &DeviceGrid,
        params: Option<&[u8]>,
    ) -> Result<(), KernelError> {
        let mut encoder = self.begin_encoder();
        let mut slots = SlotCursor::new();
        self.encode_map2(id, a, b, dst, params, &mut encoder, &mut slots)?;
        self.submit(encoder);
        Ok(())
    }

    /// Encode a `Map2` dispatch into an open encoder
    pub fn encode_map2(
        &mut self,
        id: KernelId,
        a: &DeviceGrid,
        b: &DeviceGrid,
        dst: &DeviceGrid,
        params: Option<&[u8]>,
        encoder: &mut wgpu::CommandEncoder,
        slots: &mut SlotCursor,
    ) -> Result<(), KernelError> {
        let (ia, ib, os) = id.map2_io().ok_or(KernelError::WrongFamily {
            kernel: id,
            family: KernelFamily::Map2,
        })?;
        check_elem(id, ia, a)?;
        check_elem(id, ib, b)?;
        check_elem(id, os, dst)?;
        check_geometry(id, a, dst)?;
        check_geometry(id, b, dst)?;
        if a.id == dst.id || b.id == dst.id {
            return Err(KernelError::AliasedGrids { kernel: id });
        }
        check_params(id, params)?;
        let meta = id.needs_meta().then(|| dst.meta.clone());
        self.encode_kernel(
            id,
            &[&a.buffer, &b.buffer, &dst.buffer],
            meta.as_deref(),
            params,
            dst.len(),
            encoder,
            slots,
        )
    }

    /// Dispatch an `Update` kernel mutating a grid in place
    pub fn update(
        &mut self,
        id: KernelId,
        grid: &DeviceGrid,
        params: Option<&[u8]>,
    ) -> Result<(), KernelError> {
        if id.family() != KernelFamily::Update {
            return Err(KernelError::WrongFamily {
                kernel: id,
                family: KernelFamily::Update,
            });
        }
        check_elem(id, ElemType::U32, grid)?;
        check_params(id, params)?;
        let mut encoder = self.begin_encoder();
        let mut slots = SlotCursor::new();
        let meta = id.needs_meta().then(|| grid.meta.clone());
        self.encode_kernel(
            id,
            &[&grid.buffer],
            meta.as_deref(),
            params,
            grid.len(),
            &mut encoder,
            &mut slots,
        )?;
        self.submit(encoder);
        Ok(())
    }

    /// Dispatch an `Update2` kernel mutating `data` in place with a
    /// read-only auxiliary grid
    pub fn update2(
        &mut self,
        id: KernelId,
        data: &DeviceGrid,
        aux: &DeviceGrid,
        params: Option<&[u8]>,
    ) -> Result<(), KernelError> {
        if id.family() != KernelFamily::Update2 {
            return Err(KernelError::WrongFamily {
                kernel: id,
                family: KernelFamily::Update2,
            });
        }
        check_elem(id, ElemType::U32, data)?;
        check_elem(id, ElemType::U32, aux)?;
        check_geometry(id, aux, data)?;
        if data.id == aux.id {
            return Err(KernelError::AliasedGrids { kernel: id });
        }
        check_params(id, params)?;
        let mut encoder = self.begin_encoder();
        let mut slots = SlotCursor::new();
        self.encode_kernel(
            id,
            &[&data.buffer, &aux.buffer],
            None,
            params,
            data.len(),
            &mut encoder,
            &mut slots,
        )?;
        self.submit(encoder);
        Ok(())
    }

    /// Encode one monotonic min-propagation sweep (one thread per line)
    pub(crate) fn encode_sweep(
        &mut self,
        id: KernelId,
        grid: &DeviceGrid,
        encoder: &mut wgpu::CommandEncoder,
        slots: &mut SlotCursor,
    ) -> Result<(), KernelError> {
        let d = grid.dim();
        let lines = match id {
            KernelId::SweepX => d.ny as u64 * d.nz as u64,
            KernelId::SweepY => d.nx as u64 * d.nz as u64,
            KernelId::SweepZ => d.nx as u64 * d.ny as u64,
            _ => {
                return Err(KernelError::WrongFamily {
                    kernel: id,
                    family: KernelFamily::Sweep,
                })
            }
        };
        check_elem(id, ElemType::U32, grid)?;
        self.encode_kernel(
            id,
            &[&grid.buffer],
            Some(grid.meta.as_ref()),
            None,
            lines,
            encoder,
            slots,
        )
    }

    /// Encode the levels of a tree reduction; returns the buffer holding
    /// the single final element
    pub(crate) fn encode_reduce(
        &mut self,
        op: ReduceOp,
        src: Arc<wgpu::Buffer>,
        len: u64,
        encoder: &mut wgpu::CommandEncoder,
        slots: &mut SlotCursor,
    ) -> Result<Arc<wgpu::Buffer>, KernelError> {
        let mut cur = src;
        let mut n = len;
        while n > 1 {
            let out = n.div_ceil(256);
            let dst = self.scratch(op.elem(), out, TAG_REDUCE);
            let p = [n as u32, 0, 0, 0];
            self.encode_kernel(
                op.kernel(),
                &[&cur, &dst],
                None,
                Some(bytemuck::cast_slice(&p)),
                n,
                encoder,
                slots,
            )?;
            cur = dst;
            n = out;
        }
        Ok(cur)
    }

    /// Sum a `u32` grid on the device
    pub fn reduce_sum(&mut self, grid: &DeviceGrid) -> Result<u32, KernelError> {
        check_elem(KernelId::ReduceSumU32, ElemType::U32, grid)?;
        let mut encoder = self.begin_encoder();
        let mut slots = SlotCursor::new();
        let out = self.encode_reduce(
            ReduceOp::SumU32,
            grid.buffer.clone(),
            grid.len(),
            &mut encoder,
            &mut slots,
        )?;
        self.submit(encoder);
        let bytes = self.read_back(&out, 0, 4)?;
        Ok(*bytemuck::from_bytes::<u32>(&bytes))
    }

    /// (min, max) of a projection-pair grid
    pub fn reduce_minmax(&mut self, grid: &DeviceGrid) -> Result<(f32, f32), KernelError> {
        check_elem(KernelId::ReduceMinMax, ElemType::Vec4F, grid)?;
        let mut encoder = self.begin_encoder();
        let mut slots = SlotCursor::new();
        let out = self.encode_reduce(
            ReduceOp::MinMax,
            grid.buffer.clone(),
            grid.len(),
            &mut encoder,
            &mut slots,
        )?;
        self.submit(encoder);
        let bytes = self.read_back(&out, 0, 16)?;
        let v = *bytemuck::from_bytes::<[f32; 4]>(&bytes);
        Ok((v[0], v[1]))
    }

    /// Merge a label-histogram grid down to one raw 8-word histogram
    pub fn reduce_hist(&mut self, grid: &DeviceGrid) -> Result<[u32; 8], KernelError> {
        check_elem(KernelId::ReduceHist8, ElemType::Hist8, grid)?;
        let mut encoder = self.begin_encoder();
        let mut slots = SlotCursor::new();
        let out = self.encode_reduce(
            ReduceOp::Hist8,
            grid.buffer.clone(),
            grid.len(),
            &mut encoder,
            &mut slots,
        )?;
        self.submit(encoder);
        let bytes = self.read_back(&out, 0, 32)?;
        Ok(*bytemuck::from_bytes::<[u32; 8]>(&bytes))
    }

    /// Collect the flat indices of set mask cells
    ///
    /// `expected` is the known set-cell count (from a prior `reduce_sum`);
    /// the output is truncated to it if the mask changed in between.
    pub fn pack(&mut self, mask: &DeviceGrid, expected: u32) -> Result<Vec<u32>, KernelError> {
        check_elem(KernelId::PackIndices, ElemType::U32, mask)?;
        let dst = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("pack-indices"),
            size: 4 * u64::from(expected.max(1)),
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let counter = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("pack-counter"),
            size: 4,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self.begin_encoder();
        encoder.clear_buffer(&counter, 0, None);
        let mut slots = SlotCursor::new();
        self.encode_kernel(
            KernelId::PackIndices,
            &[&mask.buffer, &dst, &counter],
            None,
            None,
            mask.len(),
            &mut encoder,
            &mut slots,
        )?;
        self.submit(encoder);
        let n = *bytemuck::from_bytes::<u32>(&self.read_back(&counter, 0, 4)?);
        let n = n.min(expected);
        if n == 0 {
            return Ok(Vec::new());
        }
        let bytes = self.read_back(&dst, 0, 4 * u64::from(n))?;
        Ok(bytemuck::cast_slice(&bytes).to_vec())
    }

    /// Zero a device grid's contents
    pub fn clear_grid(&mut self, grid: &DeviceGrid) {
        let mut encoder = self.begin_encoder();
        encoder.clear_buffer(&grid.buffer, 0, None);
        self.submit(encoder);
    }

    /// Cached scratch buffer for a given element type, length and role
    pub(crate) fn scratch(&mut self, elem: ElemType, len: u64, tag: u8) -> Arc<wgpu::Buffer> {
        let key = (elem, len, tag);
        if let Some(b) = self.scratch.get(&key) {
            return b.clone();
        }
        let buf = Arc::new(self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("scratch"),
            size: elem.size() * len,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        }));
        self.scratch.insert(key, buf.clone());
        buf
    }

    /// Encode one catalog dispatch: storages in binding order, then the
    /// grid meta uniform, then a pool slot holding the parameter block
    pub(crate) fn encode_kernel(
        &mut self,
        id: KernelId,
        storages: &[&wgpu::Buffer],
        meta: Option<&wgpu::Buffer>,
        params: Option<&[u8]>,
        threads: u64,
        encoder: &mut wgpu::CommandEncoder,
        slots: &mut SlotCursor,
    ) -> Result<(), KernelError> {
        let pipeline = Self::pipeline_for(&self.device, &mut self.pipelines, id);
        let mut entries = Vec::with_capacity(storages.len() + 2);
        for (i, buf) in storages.iter().enumerate() {
            entries.push(wgpu::BindGroupEntry {
                binding: i as u32,
                resource: buf.as_entire_binding(),
            });
        }
        let mut binding = storages.len() as u32;
        if let Some(m) = meta {
            entries.push(wgpu::BindGroupEntry {
                binding,
                resource: m.as_entire_binding(),
            });
            binding += 1;
        }
        if let Some(bytes) = params {
            let slot = slots.take()?;
            let buf = self.uniforms.slot(&self.device, slot);
            self.queue.write_buffer(buf, 0, bytes);
            entries.push(wgpu::BindGroupEntry {
                binding,
                resource: buf.as_entire_binding(),
            });
        }
        let layout = pipeline.get_bind_group_layout(0);
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: None,
            layout: &layout,
            entries: &entries,
        });
        let (gx, gy) = groups_for(threads);
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: None,
            timestamp_writes: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(gx, gy, 1);
        Ok(())
    }

    fn pipeline_for<'a>(
        device: &wgpu::Device,
        cache: &'a mut HashMap<KernelId, wgpu::ComputePipeline>,
        id: KernelId,
    ) -> &'a wgpu::ComputePipeline {
        cache.entry(id).or_insert_with(|| {
            let name = format!("{id:?}");
            let source = format!("{}{}", catalog::PRELUDE, id.source());
            let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&name),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(&name),
                layout: None,
                module: &module,
                entry_point: Some("main"),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            })
        })
    }

    /// Copy a buffer range to a staging buffer and map it for reading
    pub(crate) fn read_back(
        &self,
        buffer: &wgpu::Buffer,
        offset: u64,
        size: u64,
    ) -> Result<Vec<u8>, KernelError> {
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback-staging"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self.begin_encoder();
        encoder.copy_buffer_to_buffer(buffer, offset, &staging, 0, size);
        self.submit(encoder);

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |r| {
            let _ = tx.send(r);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);
        match rx.recv() {
            Ok(Ok(())) => {
                let data = slice.get_mapped_range().to_vec();
                staging.unmap();
                Ok(data)
            }
            Ok(Err(e)) => Err(KernelError::ReadBack(e.to_string())),
            Err(_) => Err(KernelError::ReadBack("map callback dropped".into())),
        }
    }
}

fn check_elem(id: KernelId, expected: ElemType, grid: &DeviceGrid) -> Result<(), KernelError> {
    if grid.elem() != expected {
        return Err(KernelError::ElementMismatch {
            kernel: id,
            expected,
            actual: grid.elem(),
        });
    }
    Ok(())
}

fn check_geometry(id: KernelId, a: &DeviceGrid, b: &DeviceGrid) -> Result<(), KernelError> {
    let same = a.dim() == b.dim()
        && (a.res() - b.res()).abs() < 1e-9
        && (a.offset() - b.offset()).length() < 1e-9;
    if !same {
        return Err(KernelError::GridMismatch { kernel: id });
    }
    Ok(())
}

fn check_params(id: KernelId, params: Option<&[u8]>) -> Result<(), KernelError> {
    match (id.has_params(), params.is_some()) {
        (true, false) => Err(KernelError::MissingParams { kernel: id }),
        (false, true) => Err(KernelError::UnexpectedParams { kernel: id }),
        _ => Ok(()),
    }
}

/// Fold a flat thread count into a (x, y) workgroup grid under the 65535
/// per-dimension dispatch limit
fn groups_for(threads: u64) -> (u32, u32) {
    let total = threads.div_ceil(256).max(1);
    if total <= 65535 {
        (total as u32, 1)
    } else {
        let gy = total.div_ceil(65535);
        let gx = total.div_ceil(gy);
        (gx as u32, gy as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_groups_small() {
        assert_eq!(groups_for(1), (1, 1));
        assert_eq!(groups_for(256), (1, 1));
        assert_eq!(groups_for(257), (2, 1));
        assert_eq!(groups_for(0), (1, 1));
    }

    #[test]
    fn test_groups_split() {
        // 256 * 65536 threads needs 65536 groups, one too many for x alone
        let (gx, gy) = groups_for(256 * 65536);
        assert!(gx <= 65535 && gy <= 65535);
        assert!(u64::from(gx) * u64::from(gy) >= 65536);
    }

    #[test]
    fn test_reduce_levels() {
        assert_eq!(reduce_levels(0), 0);
        assert_eq!(reduce_levels(1), 0);
        assert_eq!(reduce_levels(2), 1);
        assert_eq!(reduce_levels(256), 1);
        assert_eq!(reduce_levels(257), 2);
        assert_eq!(reduce_levels(65536), 2);
        assert_eq!(reduce_levels(65537), 3);
    }

    #[test]
    fn test_slot_cursor_bounds() {
        let mut c = SlotCursor::new();
        for i in 0..MAX_UNIFORM_SLOTS {
            assert_eq!(c.take().unwrap(), i);
        }
        assert!(matches!(c.take(), Err(KernelError::UniformPoolExhausted)));
        c.reset();
        assert_eq!(c.remaining(), MAX_UNIFORM_SLOTS);
        let c = SlotCursor::starting_at(8);
        assert_eq!(c.remaining(), 2);
    }
}
