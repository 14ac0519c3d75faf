//! Closed, statically enumerated kernel catalog
//!
//! Every compute kernel the engine can dispatch is listed in [`KernelId`];
//! each entry pairs a fixed WGSL body with a shared prelude (grid
//! addressing and the three shape SDFs). Pipelines are compiled from these
//! sources on first use and cached for the process lifetime.
//!
//! Kernel bodies are short pure per-element expressions; purity is what
//! makes parallel dispatch safe and is a caller obligation, not verified
//! here. Binding order is fixed: storage buffers first, then the grid meta
//! uniform, then the parameter uniform.
//!
//! The WGSL SDF functions must stay in lockstep with `src/primitives`.
//!
//! Author: Moroya Sakamoto

use crate::geometry::ElemType;

/// Identifier of one compiled compute kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelId {
    /// OR-rasterize one shape into a u32 mask grid
    FillShape,
    /// Write the raw SDF value of one shape at every voxel center
    SdfSample,
    /// Two-level coarse/fine shape-overlap counting (one thread per 4^3 block)
    CountInShape,
    /// Combine target/work occupancy codes into the cell state
    CombineState,
    /// 1 where the combined state is the illegal sentinel
    IllegalMask,
    /// 1 where the cell still has material to remove
    HasWorkMask,
    /// 1 where the tool must not touch (finished target material or below
    /// the protection plane)
    BlockedMask,
    /// Freeze remaining cells below a Z plane into done
    FreezeBelow,
    /// Transition remaining cells covered by the min mask to done
    CommitApply,
    /// Finalize every remaining cell carrying one region label
    FinalizeLabel,
    /// Half-voxel removal weight where the min mask covers remaining work
    /// (2 for a full work voxel, 1 for a partial one)
    RemovableMask,
    /// 1 where the min mask is set but the max mask is not
    ReversalMask,
    /// 1 where the max mask overlaps protected material
    OvercutMask,
    /// Seed grid for the jump flood: voxel center where the mask is set
    SeedFromMask,
    /// One jump-flood pass over the 26 neighbours at the current step
    JumpFloodPass,
    /// Distance from each voxel center to its propagated seed
    DistFromSeed,
    /// Initial region labels: flat index where the mask is set, else sentinel
    RegionInit,
    /// Monotonic min-propagation sweep along X (forward then backward)
    SweepX,
    /// Monotonic min-propagation sweep along Y
    SweepY,
    /// Monotonic min-propagation sweep along Z
    SweepZ,
    /// Per-cell 4-slot label histogram seed
    HistInit,
    /// Project set cells onto a direction as (d, d) pairs for minmax
    ProjectAxis,
    /// Per-voxel deviation value for work extraction
    DeviationExtract,
    /// Tree-reduction level: u32 sum
    ReduceSumU32,
    /// Tree-reduction level: component-wise (min, max) of vec4 pairs
    ReduceMinMax,
    /// Tree-reduction level: 4-slot label histogram merge
    ReduceHist8,
    /// Stream compaction: append flat indices of set mask cells
    PackIndices,
}

/// Broad dispatch family of a kernel (fixes its binding plan)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelFamily {
    /// One output storage buffer written per element
    Generate,
    /// One input, one distinct output
    Map,
    /// Two inputs, one distinct output
    Map2,
    /// One buffer updated in place (each thread touches only its element)
    Update,
    /// One buffer updated in place plus one read-only auxiliary input
    Update2,
    /// One thread owns a whole grid line (in-place, line-serial)
    Sweep,
    /// One reduction level: input buffer to `ceil(n/256)` partials
    Reduce,
    /// Mask + payload append with an atomic counter
    Pack,
    /// One thread per 4^3 block, coarse/fine counting
    Count,
}

impl KernelId {
    /// Dispatch family
    pub fn family(self) -> KernelFamily {
        use KernelId::*;
        match self {
            FillShape | SdfSample => KernelFamily::Generate,
            CountInShape => KernelFamily::Count,
            CombineState | RemovableMask | ReversalMask | OvercutMask | DeviationExtract => {
                KernelFamily::Map2
            }
            IllegalMask | HasWorkMask | BlockedMask | SeedFromMask | JumpFloodPass
            | DistFromSeed | RegionInit | HistInit | ProjectAxis => KernelFamily::Map,
            FreezeBelow => KernelFamily::Update,
            CommitApply | FinalizeLabel => KernelFamily::Update2,
            SweepX | SweepY | SweepZ => KernelFamily::Sweep,
            ReduceSumU32 | ReduceMinMax | ReduceHist8 => KernelFamily::Reduce,
            PackIndices => KernelFamily::Pack,
        }
    }

    /// Input/output element types of a `Map` kernel
    pub(crate) fn map_io(self) -> Option<(ElemType, ElemType)> {
        use KernelId::*;
        Some(match self {
            IllegalMask | HasWorkMask | BlockedMask | RegionInit => (ElemType::U32, ElemType::U32),
            SeedFromMask | ProjectAxis => (ElemType::U32, ElemType::Vec4F),
            JumpFloodPass => (ElemType::Vec4F, ElemType::Vec4F),
            DistFromSeed => (ElemType::Vec4F, ElemType::F32),
            HistInit => (ElemType::U32, ElemType::Hist8),
            _ => return None,
        })
    }

    /// Input/input/output element types of a `Map2` kernel
    pub(crate) fn map2_io(self) -> Option<(ElemType, ElemType, ElemType)> {
        use KernelId::*;
        Some(match self {
            CombineState | RemovableMask | ReversalMask | OvercutMask => {
                (ElemType::U32, ElemType::U32, ElemType::U32)
            }
            DeviationExtract => (ElemType::U32, ElemType::F32, ElemType::F32),
            _ => return None,
        })
    }

    /// Whether the kernel binds the grid meta uniform
    pub(crate) fn needs_meta(self) -> bool {
        use KernelId::*;
        matches!(
            self,
            FillShape
                | SdfSample
                | CountInShape
                | BlockedMask
                | FreezeBelow
                | OvercutMask
                | SeedFromMask
                | JumpFloodPass
                | DistFromSeed
                | SweepX
                | SweepY
                | SweepZ
                | ProjectAxis
                | DeviationExtract
        )
    }

    /// Whether the kernel binds a parameter uniform from the pool
    pub(crate) fn has_params(self) -> bool {
        use KernelId::*;
        matches!(
            self,
            FillShape
                | SdfSample
                | CountInShape
                | BlockedMask
                | FreezeBelow
                | FinalizeLabel
                | OvercutMask
                | JumpFloodPass
                | ProjectAxis
                | DeviationExtract
                | ReduceSumU32
                | ReduceMinMax
                | ReduceHist8
        )
    }

    /// WGSL body (bindings + entry point); compiled after [`PRELUDE`]
    pub(crate) fn source(self) -> &'static str {
        use KernelId::*;
        match self {
            FillShape => FILL_SHAPE,
            SdfSample => SDF_SAMPLE,
            CountInShape => COUNT_IN_SHAPE,
            CombineState => COMBINE_STATE,
            IllegalMask => ILLEGAL_MASK,
            HasWorkMask => HAS_WORK_MASK,
            BlockedMask => BLOCKED_MASK,
            FreezeBelow => FREEZE_BELOW,
            CommitApply => COMMIT_APPLY,
            FinalizeLabel => FINALIZE_LABEL,
            RemovableMask => REMOVABLE_MASK,
            ReversalMask => REVERSAL_MASK,
            OvercutMask => OVERCUT_MASK,
            SeedFromMask => SEED_FROM_MASK,
            JumpFloodPass => JUMP_FLOOD_PASS,
            DistFromSeed => DIST_FROM_SEED,
            RegionInit => REGION_INIT,
            SweepX => SWEEP_X,
            SweepY => SWEEP_Y,
            SweepZ => SWEEP_Z,
            HistInit => HIST_INIT,
            ProjectAxis => PROJECT_AXIS,
            DeviationExtract => DEVIATION_EXTRACT,
            ReduceSumU32 => REDUCE_SUM_U32,
            ReduceMinMax => REDUCE_MINMAX,
            ReduceHist8 => REDUCE_HIST8,
            PackIndices => PACK_INDICES,
        }
    }
}

/// Shared WGSL prelude: grid addressing, shape SDFs, state constants
pub(crate) const PRELUDE: &str = r#"
const SENTINEL: u32 = 0xffffffffu;
const ILLEGAL_STATE: u32 = 0xffffffffu;
const BIG_F: f32 = 1.0e30;

// Combined cell states; must match tracking::CellState
const FULL_DONE: u32 = 0u;
const EMPTY_DONE: u32 = 1u;
const EMPTY_REMAINING: u32 = 2u;
const PARTIAL_DONE: u32 = 3u;
const PARTIAL_REMAINING: u32 = 4u;

// Host occupancy codes
const OCC_EMPTY: u32 = 0u;
const OCC_PARTIAL: u32 = 128u;
const OCC_FULL: u32 = 255u;

struct GridMeta {
    dims: vec4<u32>,   // nx, ny, nz, total
    origin: vec4<f32>, // world offset xyz, voxel resolution in w
};

// Shape parameter packing (16 scalars):
//   cylinder (kind 0): d0.xyz origin, d0.w radius, d1.xyz axis, d1.w height
//   slot     (kind 1): d0.xyz p, d0.w radius, d1.xyz q, d1.w height, d2.xyz axis
//   box      (kind 2): d0.xyz center, d1.xyz / d2.xyz / d3.xyz half axes
//   d2.w = boundary offset, d3.w = kind
struct ShapeParams {
    d0: vec4<f32>,
    d1: vec4<f32>,
    d2: vec4<f32>,
    d3: vec4<f32>,
};

fn cell_coord(i: u32, m: GridMeta) -> vec3<u32> {
    let nx = m.dims.x;
    return vec3<u32>(i % nx, (i / nx) % m.dims.y, i / (nx * m.dims.y));
}

fn cell_index(c: vec3<u32>, m: GridMeta) -> u32 {
    return c.x + c.y * m.dims.x + c.z * m.dims.x * m.dims.y;
}

fn cell_center(c: vec3<u32>, m: GridMeta) -> vec3<f32> {
    return m.origin.xyz + (vec3<f32>(c) + vec3<f32>(0.5)) * m.origin.w;
}

// The SDFs below mirror src/primitives operation-for-operation.

fn sd_cylinder(p: vec3<f32>, origin: vec3<f32>, axis: vec3<f32>, radius: f32, height: f32) -> f32 {
    let w = p - origin;
    let t = dot(w, axis);
    let d = vec2<f32>(length(w - axis * t) - radius, abs(t) - 0.5 * height);
    return min(max(d.x, d.y), 0.0) + length(max(d, vec2<f32>(0.0)));
}

fn sd_slot(p: vec3<f32>, a: vec3<f32>, b: vec3<f32>, axis: vec3<f32>, radius: f32, height: f32) -> f32 {
    let w = p - a;
    let t = dot(w, axis);
    let w2 = w - axis * t;
    let ba = b - a;
    let h = clamp(dot(w2, ba) / dot(ba, ba), 0.0, 1.0);
    let d = vec2<f32>(length(w2 - ba * h) - radius, abs(t) - 0.5 * height);
    return min(max(d.x, d.y), 0.0) + length(max(d, vec2<f32>(0.0)));
}

fn sd_oriented_box(p: vec3<f32>, center: vec3<f32>, hx: vec3<f32>, hy: vec3<f32>, hz: vec3<f32>) -> f32 {
    let w = p - center;
    let ex = length(hx);
    let ey = length(hy);
    let ez = length(hz);
    let q = vec3<f32>(
        abs(dot(w, hx)) / ex - ex,
        abs(dot(w, hy)) / ey - ey,
        abs(dot(w, hz)) / ez - ez,
    );
    return length(max(q, vec3<f32>(0.0))) + min(max(q.x, max(q.y, q.z)), 0.0);
}

fn sd_shape(p: vec3<f32>, s: ShapeParams) -> f32 {
    let kind = u32(s.d3.w);
    if kind == 0u {
        return sd_cylinder(p, s.d0.xyz, s.d1.xyz, s.d0.w, s.d1.w);
    }
    if kind == 1u {
        return sd_slot(p, s.d0.xyz, s.d1.xyz, s.d2.xyz, s.d0.w, s.d1.w);
    }
    return sd_oriented_box(p, s.d0.xyz, s.d1.xyz, s.d2.xyz, s.d3.xyz);
}

// Large dispatches fold the workgroup grid into a flat id; bounds are
// checked against the real element count in every kernel.
fn linear_id(wid: vec3<u32>, nwg: vec3<u32>, lid: vec3<u32>) -> u32 {
    return (wid.y * nwg.x + wid.x) * 256u + lid.x;
}

fn linear_group(wid: vec3<u32>, nwg: vec3<u32>) -> u32 {
    return wid.y * nwg.x + wid.x;
}
"#;

const FILL_SHAPE: &str = r#"
@group(0) @binding(0) var<storage, read_write> dst: array<u32>;
@group(0) @binding(1) var<uniform> gmeta: GridMeta;
@group(0) @binding(2) var<uniform> shape: ShapeParams;

@compute @workgroup_size(256)
fn main(@builtin(workgroup_id) wid: vec3<u32>,
        @builtin(num_workgroups) nwg: vec3<u32>,
        @builtin(local_invocation_id) lid: vec3<u32>) {
    let i = linear_id(wid, nwg, lid);
    if i >= gmeta.dims.w { return; }
    let p = cell_center(cell_coord(i, gmeta), gmeta);
    if sd_shape(p, shape) <= shape.d2.w {
        dst[i] = 1u;
    }
}
"#;

const SDF_SAMPLE: &str = r#"
@group(0) @binding(0) var<storage, read_write> dst: array<f32>;
@group(0) @binding(1) var<uniform> gmeta: GridMeta;
@group(0) @binding(2) var<uniform> shape: ShapeParams;

@compute @workgroup_size(256)
fn main(@builtin(workgroup_id) wid: vec3<u32>,
        @builtin(num_workgroups) nwg: vec3<u32>,
        @builtin(local_invocation_id) lid: vec3<u32>) {
    let i = linear_id(wid, nwg, lid);
    if i >= gmeta.dims.w { return; }
    let p = cell_center(cell_coord(i, gmeta), gmeta);
    dst[i] = sd_shape(p, shape);
}
"#;

const COUNT_IN_SHAPE: &str = r#"
@group(0) @binding(0) var<storage, read> mask: array<u32>;
@group(0) @binding(1) var<storage, read_write> dst: array<u32>;
@group(0) @binding(2) var<uniform> gmeta: GridMeta;
@group(0) @binding(3) var<uniform> shape: ShapeParams;

@compute @workgroup_size(256)
fn main(@builtin(workgroup_id) wid: vec3<u32>,
        @builtin(num_workgroups) nwg: vec3<u32>,
        @builtin(local_invocation_id) lid: vec3<u32>) {
    let b = linear_id(wid, nwg, lid);
    let bd = (gmeta.dims.xyz + vec3<u32>(3u)) / vec3<u32>(4u);
    if b >= bd.x * bd.y * bd.z { return; }
    let bc = vec3<u32>(b % bd.x, (b / bd.x) % bd.y, b / (bd.x * bd.y));
    let res = gmeta.origin.w;
    let centre = gmeta.origin.xyz + (vec3<f32>(bc) * 4.0 + vec3<f32>(2.0)) * res;
    let off = shape.d2.w;
    // Half diagonal of a 4-voxel block is 2*sqrt(3)*res; a block whose
    // center is farther than that (plus the requested offset) cannot
    // contain any hit.
    if sd_shape(centre, shape) > off + 3.4641016 * res {
        dst[b] = 0u;
        return;
    }
    var cnt = 0u;
    for (var dz = 0u; dz < 4u; dz = dz + 1u) {
        let z = bc.z * 4u + dz;
        if z >= gmeta.dims.z { continue; }
        for (var dy = 0u; dy < 4u; dy = dy + 1u) {
            let y = bc.y * 4u + dy;
            if y >= gmeta.dims.y { continue; }
            for (var dx = 0u; dx < 4u; dx = dx + 1u) {
                let x = bc.x * 4u + dx;
                if x >= gmeta.dims.x { continue; }
                let i = x + y * gmeta.dims.x + z * gmeta.dims.x * gmeta.dims.y;
                if mask[i] != 0u {
                    let p = cell_center(vec3<u32>(x, y, z), gmeta);
                    if sd_shape(p, shape) <= off {
                        cnt = cnt + 1u;
                    }
                }
            }
        }
    }
    dst[b] = cnt;
}
"#;

const COMBINE_STATE: &str = r#"
@group(0) @binding(0) var<storage, read> src_a: array<u32>; // target codes
@group(0) @binding(1) var<storage, read> src_b: array<u32>; // work codes
@group(0) @binding(2) var<storage, read_write> dst: array<u32>;

@compute @workgroup_size(256)
fn main(@builtin(workgroup_id) wid: vec3<u32>,
        @builtin(num_workgroups) nwg: vec3<u32>,
        @builtin(local_invocation_id) lid: vec3<u32>) {
    let i = linear_id(wid, nwg, lid);
    if i >= arrayLength(&dst) { return; }
    let t = src_a[i];
    let w = src_b[i];
    var s = ILLEGAL_STATE;
    if t == OCC_FULL {
        if w == OCC_FULL { s = FULL_DONE; }
    } else if t == OCC_PARTIAL {
        if w == OCC_FULL {
            s = PARTIAL_REMAINING;
        } else if w == OCC_PARTIAL {
            s = PARTIAL_DONE;
        }
    } else {
        if w == OCC_EMPTY {
            s = EMPTY_DONE;
        } else {
            s = EMPTY_REMAINING;
        }
    }
    dst[i] = s;
}
"#;

const ILLEGAL_MASK: &str = r#"
@group(0) @binding(0) var<storage, read> src: array<u32>;
@group(0) @binding(1) var<storage, read_write> dst: array<u32>;

@compute @workgroup_size(256)
fn main(@builtin(workgroup_id) wid: vec3<u32>,
        @builtin(num_workgroups) nwg: vec3<u32>,
        @builtin(local_invocation_id) lid: vec3<u32>) {
    let i = linear_id(wid, nwg, lid);
    if i >= arrayLength(&dst) { return; }
    dst[i] = u32(src[i] == ILLEGAL_STATE);
}
"#;

const HAS_WORK_MASK: &str = r#"
@group(0) @binding(0) var<storage, read> src: array<u32>;
@group(0) @binding(1) var<storage, read_write> dst: array<u32>;

@compute @workgroup_size(256)
fn main(@builtin(workgroup_id) wid: vec3<u32>,
        @builtin(num_workgroups) nwg: vec3<u32>,
        @builtin(local_invocation_id) lid: vec3<u32>) {
    let i = linear_id(wid, nwg, lid);
    if i >= arrayLength(&dst) { return; }
    let s = src[i];
    dst[i] = u32(s == EMPTY_REMAINING || s == PARTIAL_REMAINING);
}
"#;

const BLOCKED_MASK: &str = r#"
struct BlockedParams {
    protect_z: f32,
    _p0: f32,
    _p1: f32,
    _p2: f32,
};

@group(0) @binding(0) var<storage, read> src: array<u32>;
@group(0) @binding(1) var<storage, read_write> dst: array<u32>;
@group(0) @binding(2) var<uniform> gmeta: GridMeta;
@group(0) @binding(3) var<uniform> params: BlockedParams;

@compute @workgroup_size(256)
fn main(@builtin(workgroup_id) wid: vec3<u32>,
        @builtin(num_workgroups) nwg: vec3<u32>,
        @builtin(local_invocation_id) lid: vec3<u32>) {
    let i = linear_id(wid, nwg, lid);
    if i >= gmeta.dims.w { return; }
    let s = src[i];
    let c = cell_center(cell_coord(i, gmeta), gmeta);
    dst[i] = u32(s == FULL_DONE || s == PARTIAL_DONE || c.z < params.protect_z);
}
"#;

const FREEZE_BELOW: &str = r#"
struct FreezeParams {
    protect_z: f32,
    _p0: f32,
    _p1: f32,
    _p2: f32,
};

@group(0) @binding(0) var<storage, read_write> data: array<u32>;
@group(0) @binding(1) var<uniform> gmeta: GridMeta;
@group(0) @binding(2) var<uniform> params: FreezeParams;

@compute @workgroup_size(256)
fn main(@builtin(workgroup_id) wid: vec3<u32>,
        @builtin(num_workgroups) nwg: vec3<u32>,
        @builtin(local_invocation_id) lid: vec3<u32>) {
    let i = linear_id(wid, nwg, lid);
    if i >= gmeta.dims.w { return; }
    let c = cell_center(cell_coord(i, gmeta), gmeta);
    if c.z >= params.protect_z { return; }
    let s = data[i];
    if s == EMPTY_REMAINING {
        data[i] = EMPTY_DONE;
    } else if s == PARTIAL_REMAINING {
        data[i] = PARTIAL_DONE;
    }
}
"#;

const COMMIT_APPLY: &str = r#"
@group(0) @binding(0) var<storage, read_write> data: array<u32>; // states
@group(0) @binding(1) var<storage, read> aux: array<u32>;        // min mask

@compute @workgroup_size(256)
fn main(@builtin(workgroup_id) wid: vec3<u32>,
        @builtin(num_workgroups) nwg: vec3<u32>,
        @builtin(local_invocation_id) lid: vec3<u32>) {
    let i = linear_id(wid, nwg, lid);
    if i >= arrayLength(&data) { return; }
    if aux[i] == 0u { return; }
    let s = data[i];
    if s == EMPTY_REMAINING {
        data[i] = EMPTY_DONE;
    } else if s == PARTIAL_REMAINING {
        data[i] = PARTIAL_DONE;
    }
}
"#;

const FINALIZE_LABEL: &str = r#"
struct LabelParams {
    label: u32,
    _p0: u32,
    _p1: u32,
    _p2: u32,
};

@group(0) @binding(0) var<storage, read_write> data: array<u32>; // states
@group(0) @binding(1) var<storage, read> aux: array<u32>;        // labels
@group(0) @binding(2) var<uniform> params: LabelParams;

@compute @workgroup_size(256)
fn main(@builtin(workgroup_id) wid: vec3<u32>,
        @builtin(num_workgroups) nwg: vec3<u32>,
        @builtin(local_invocation_id) lid: vec3<u32>) {
    let i = linear_id(wid, nwg, lid);
    if i >= arrayLength(&data) { return; }
    if aux[i] != params.label { return; }
    let s = data[i];
    if s == EMPTY_REMAINING {
        data[i] = EMPTY_DONE;
    } else if s == PARTIAL_REMAINING {
        data[i] = PARTIAL_DONE;
    }
}
"#;

const REMOVABLE_MASK: &str = r#"
@group(0) @binding(0) var<storage, read> src_a: array<u32>; // states
@group(0) @binding(1) var<storage, read> src_b: array<u32>; // min mask
@group(0) @binding(2) var<storage, read_write> dst: array<u32>;

@compute @workgroup_size(256)
fn main(@builtin(workgroup_id) wid: vec3<u32>,
        @builtin(num_workgroups) nwg: vec3<u32>,
        @builtin(local_invocation_id) lid: vec3<u32>) {
    let i = linear_id(wid, nwg, lid);
    if i >= arrayLength(&dst) { return; }
    var w = 0u;
    if src_b[i] != 0u {
        let s = src_a[i];
        // Half-voxel units: a full work voxel loses two halves, a partial
        // one loses the half above the target surface.
        if s == EMPTY_REMAINING {
            w = 2u;
        } else if s == PARTIAL_REMAINING {
            w = 1u;
        }
    }
    dst[i] = w;
}
"#;

const REVERSAL_MASK: &str = r#"
@group(0) @binding(0) var<storage, read> src_a: array<u32>; // min mask
@group(0) @binding(1) var<storage, read> src_b: array<u32>; // max mask
@group(0) @binding(2) var<storage, read_write> dst: array<u32>;

@compute @workgroup_size(256)
fn main(@builtin(workgroup_id) wid: vec3<u32>,
        @builtin(num_workgroups) nwg: vec3<u32>,
        @builtin(local_invocation_id) lid: vec3<u32>) {
    let i = linear_id(wid, nwg, lid);
    if i >= arrayLength(&dst) { return; }
    dst[i] = u32(src_a[i] != 0u && src_b[i] == 0u);
}
"#;

const OVERCUT_MASK: &str = r#"
struct OvercutParams {
    protect_z: f32,
    _p0: f32,
    _p1: f32,
    _p2: f32,
};

@group(0) @binding(0) var<storage, read> src_a: array<u32>; // max mask
@group(0) @binding(1) var<storage, read> src_b: array<u32>; // states
@group(0) @binding(2) var<storage, read_write> dst: array<u32>;
@group(0) @binding(3) var<uniform> gmeta: GridMeta;
@group(0) @binding(4) var<uniform> params: OvercutParams;

@compute @workgroup_size(256)
fn main(@builtin(workgroup_id) wid: vec3<u32>,
        @builtin(num_workgroups) nwg: vec3<u32>,
        @builtin(local_invocation_id) lid: vec3<u32>) {
    let i = linear_id(wid, nwg, lid);
    if i >= gmeta.dims.w { return; }
    let s = src_b[i];
    let c = cell_center(cell_coord(i, gmeta), gmeta);
    let is_protected = s == FULL_DONE || s == PARTIAL_DONE || c.z < params.protect_z;
    dst[i] = u32(src_a[i] != 0u && is_protected);
}
"#;

const SEED_FROM_MASK: &str = r#"
@group(0) @binding(0) var<storage, read> src: array<u32>;
@group(0) @binding(1) var<storage, read_write> dst: array<vec4<f32>>;
@group(0) @binding(2) var<uniform> gmeta: GridMeta;

@compute @workgroup_size(256)
fn main(@builtin(workgroup_id) wid: vec3<u32>,
        @builtin(num_workgroups) nwg: vec3<u32>,
        @builtin(local_invocation_id) lid: vec3<u32>) {
    let i = linear_id(wid, nwg, lid);
    if i >= gmeta.dims.w { return; }
    if src[i] != 0u {
        dst[i] = vec4<f32>(cell_center(cell_coord(i, gmeta), gmeta), 1.0);
    } else {
        dst[i] = vec4<f32>(0.0);
    }
}
"#;

const JUMP_FLOOD_PASS: &str = r#"
struct JfaParams {
    step: u32,
    _p0: u32,
    _p1: u32,
    _p2: u32,
};

@group(0) @binding(0) var<storage, read> src: array<vec4<f32>>;
@group(0) @binding(1) var<storage, read_write> dst: array<vec4<f32>>;
@group(0) @binding(2) var<uniform> gmeta: GridMeta;
@group(0) @binding(3) var<uniform> params: JfaParams;

@compute @workgroup_size(256)
fn main(@builtin(workgroup_id) wid: vec3<u32>,
        @builtin(num_workgroups) nwg: vec3<u32>,
        @builtin(local_invocation_id) lid: vec3<u32>) {
    let i = linear_id(wid, nwg, lid);
    if i >= gmeta.dims.w { return; }
    let c = cell_coord(i, gmeta);
    let pos = cell_center(c, gmeta);
    var best = src[i];
    var best_d = BIG_F;
    if best.w != 0.0 {
        best_d = distance(pos, best.xyz);
    }
    let s = i32(params.step);
    for (var dz = -1; dz <= 1; dz = dz + 1) {
        for (var dy = -1; dy <= 1; dy = dy + 1) {
            for (var dx = -1; dx <= 1; dx = dx + 1) {
                if dx == 0 && dy == 0 && dz == 0 { continue; }
                let nc = vec3<i32>(c) + vec3<i32>(dx, dy, dz) * s;
                if nc.x < 0 || nc.y < 0 || nc.z < 0 { continue; }
                if nc.x >= i32(gmeta.dims.x) || nc.y >= i32(gmeta.dims.y) || nc.z >= i32(gmeta.dims.z) {
                    continue;
                }
                let cand = src[cell_index(vec3<u32>(nc), gmeta)];
                if cand.w != 0.0 {
                    let d = distance(pos, cand.xyz);
                    if d < best_d {
                        best_d = d;
                        best = cand;
                    }
                }
            }
        }
    }
    dst[i] = best;
}
"#;

const DIST_FROM_SEED: &str = r#"
@group(0) @binding(0) var<storage, read> src: array<vec4<f32>>;
@group(0) @binding(1) var<storage, read_write> dst: array<f32>;
@group(0) @binding(2) var<uniform> gmeta: GridMeta;

@compute @workgroup_size(256)
fn main(@builtin(workgroup_id) wid: vec3<u32>,
        @builtin(num_workgroups) nwg: vec3<u32>,
        @builtin(local_invocation_id) lid: vec3<u32>) {
    let i = linear_id(wid, nwg, lid);
    if i >= gmeta.dims.w { return; }
    let s = src[i];
    if s.w == 0.0 {
        dst[i] = BIG_F;
    } else {
        dst[i] = distance(cell_center(cell_coord(i, gmeta), gmeta), s.xyz);
    }
}
"#;

const REGION_INIT: &str = r#"
@group(0) @binding(0) var<storage, read> src: array<u32>;
@group(0) @binding(1) var<storage, read_write> dst: array<u32>;

@compute @workgroup_size(256)
fn main(@builtin(workgroup_id) wid: vec3<u32>,
        @builtin(num_workgroups) nwg: vec3<u32>,
        @builtin(local_invocation_id) lid: vec3<u32>) {
    let i = linear_id(wid, nwg, lid);
    if i >= arrayLength(&dst) { return; }
    dst[i] = select(SENTINEL, i, src[i] != 0u);
}
"#;

const SWEEP_X: &str = r#"
@group(0) @binding(0) var<storage, read_write> data: array<u32>;
@group(0) @binding(1) var<uniform> gmeta: GridMeta;

@compute @workgroup_size(256)
fn main(@builtin(workgroup_id) wid: vec3<u32>,
        @builtin(num_workgroups) nwg: vec3<u32>,
        @builtin(local_invocation_id) lid: vec3<u32>) {
    let line = linear_id(wid, nwg, lid);
    if line >= gmeta.dims.y * gmeta.dims.z { return; }
    let y = line % gmeta.dims.y;
    let z = line / gmeta.dims.y;
    let base = y * gmeta.dims.x + z * gmeta.dims.x * gmeta.dims.y;
    var carry = SENTINEL;
    for (var x = 0u; x < gmeta.dims.x; x = x + 1u) {
        let i = base + x;
        let v = data[i];
        if v == SENTINEL {
            carry = SENTINEL;
        } else {
            let m = min(v, carry);
            data[i] = m;
            carry = m;
        }
    }
    carry = SENTINEL;
    for (var r = 0u; r < gmeta.dims.x; r = r + 1u) {
        let i = base + gmeta.dims.x - 1u - r;
        let v = data[i];
        if v == SENTINEL {
            carry = SENTINEL;
        } else {
            let m = min(v, carry);
            data[i] = m;
            carry = m;
        }
    }
}
"#;

const SWEEP_Y: &str = r#"
@group(0) @binding(0) var<storage, read_write> data: array<u32>;
@group(0) @binding(1) var<uniform> gmeta: GridMeta;

@compute @workgroup_size(256)
fn main(@builtin(workgroup_id) wid: vec3<u32>,
        @builtin(num_workgroups) nwg: vec3<u32>,
        @builtin(local_invocation_id) lid: vec3<u32>) {
    let line = linear_id(wid, nwg, lid);
    if line >= gmeta.dims.x * gmeta.dims.z { return; }
    let x = line % gmeta.dims.x;
    let z = line / gmeta.dims.x;
    let base = x + z * gmeta.dims.x * gmeta.dims.y;
    let stride = gmeta.dims.x;
    var carry = SENTINEL;
    for (var y = 0u; y < gmeta.dims.y; y = y + 1u) {
        let i = base + y * stride;
        let v = data[i];
        if v == SENTINEL {
            carry = SENTINEL;
        } else {
            let m = min(v, carry);
            data[i] = m;
            carry = m;
        }
    }
    carry = SENTINEL;
    for (var r = 0u; r < gmeta.dims.y; r = r + 1u) {
        let i = base + (gmeta.dims.y - 1u - r) * stride;
        let v = data[i];
        if v == SENTINEL {
            carry = SENTINEL;
        } else {
            let m = min(v, carry);
            data[i] = m;
            carry = m;
        }
    }
}
"#;

const SWEEP_Z: &str = r#"
@group(0) @binding(0) var<storage, read_write> data: array<u32>;
@group(0) @binding(1) var<uniform> gmeta: GridMeta;

@compute @workgroup_size(256)
fn main(@builtin(workgroup_id) wid: vec3<u32>,
        @builtin(num_workgroups) nwg: vec3<u32>,
        @builtin(local_invocation_id) lid: vec3<u32>) {
    let line = linear_id(wid, nwg, lid);
    if line >= gmeta.dims.x * gmeta.dims.y { return; }
    let x = line % gmeta.dims.x;
    let y = line / gmeta.dims.x;
    let base = x + y * gmeta.dims.x;
    let stride = gmeta.dims.x * gmeta.dims.y;
    var carry = SENTINEL;
    for (var z = 0u; z < gmeta.dims.z; z = z + 1u) {
        let i = base + z * stride;
        let v = data[i];
        if v == SENTINEL {
            carry = SENTINEL;
        } else {
            let m = min(v, carry);
            data[i] = m;
            carry = m;
        }
    }
    carry = SENTINEL;
    for (var r = 0u; r < gmeta.dims.z; r = r + 1u) {
        let i = base + (gmeta.dims.z - 1u - r) * stride;
        let v = data[i];
        if v == SENTINEL {
            carry = SENTINEL;
        } else {
            let m = min(v, carry);
            data[i] = m;
            carry = m;
        }
    }
}
"#;

const HIST_INIT: &str = r#"
struct Hist8 {
    labels: array<u32, 4>,
    counts: array<u32, 4>,
};

@group(0) @binding(0) var<storage, read> src: array<u32>;
@group(0) @binding(1) var<storage, read_write> dst: array<Hist8>;

@compute @workgroup_size(256)
fn main(@builtin(workgroup_id) wid: vec3<u32>,
        @builtin(num_workgroups) nwg: vec3<u32>,
        @builtin(local_invocation_id) lid: vec3<u32>) {
    let i = linear_id(wid, nwg, lid);
    if i >= arrayLength(&dst) { return; }
    var h: Hist8;
    for (var k = 0u; k < 4u; k = k + 1u) {
        h.labels[k] = SENTINEL;
        h.counts[k] = 0u;
    }
    let l = src[i];
    if l != SENTINEL {
        h.labels[0] = l;
        h.counts[0] = 1u;
    }
    dst[i] = h;
}
"#;

const PROJECT_AXIS: &str = r#"
struct AxisParams {
    dir: vec4<f32>,
};

@group(0) @binding(0) var<storage, read> src: array<u32>;
@group(0) @binding(1) var<storage, read_write> dst: array<vec4<f32>>;
@group(0) @binding(2) var<uniform> gmeta: GridMeta;
@group(0) @binding(3) var<uniform> params: AxisParams;

@compute @workgroup_size(256)
fn main(@builtin(workgroup_id) wid: vec3<u32>,
        @builtin(num_workgroups) nwg: vec3<u32>,
        @builtin(local_invocation_id) lid: vec3<u32>) {
    let i = linear_id(wid, nwg, lid);
    if i >= gmeta.dims.w { return; }
    if src[i] != 0u {
        let d = dot(cell_center(cell_coord(i, gmeta), gmeta), params.dir.xyz);
        dst[i] = vec4<f32>(d, d, 0.0, 0.0);
    } else {
        // Reduction identity: never wins against a real projection
        dst[i] = vec4<f32>(BIG_F, -BIG_F, 0.0, 0.0);
    }
}
"#;

const DEVIATION_EXTRACT: &str = r#"
struct DevParams {
    exclude_protected: u32,
    protect_z: f32,
    _p0: f32,
    _p1: f32,
};

@group(0) @binding(0) var<storage, read> src_a: array<u32>; // states
@group(0) @binding(1) var<storage, read> src_b: array<f32>; // target distance field
@group(0) @binding(2) var<storage, read_write> dst: array<f32>;
@group(0) @binding(3) var<uniform> gmeta: GridMeta;
@group(0) @binding(4) var<uniform> params: DevParams;

@compute @workgroup_size(256)
fn main(@builtin(workgroup_id) wid: vec3<u32>,
        @builtin(num_workgroups) nwg: vec3<u32>,
        @builtin(local_invocation_id) lid: vec3<u32>) {
    let i = linear_id(wid, nwg, lid);
    if i >= gmeta.dims.w { return; }
    let s = src_a[i];
    if s == FULL_DONE || s == EMPTY_DONE || s == PARTIAL_DONE {
        dst[i] = -1.0;
        return;
    }
    if params.exclude_protected != 0u {
        let c = cell_center(cell_coord(i, gmeta), gmeta);
        if c.z < params.protect_z {
            dst[i] = -1.0;
            return;
        }
    }
    let d = src_b[i];
    if d <= 0.0 {
        dst[i] = 0.0;
    } else {
        // Half voxel diagonal: conservative slack bounding discretization
        // error via the triangle inequality.
        dst[i] = d + 0.8660254 * gmeta.origin.w;
    }
}
"#;

const REDUCE_SUM_U32: &str = r#"
struct ReduceParams {
    len: u32,
    _p0: u32,
    _p1: u32,
    _p2: u32,
};

@group(0) @binding(0) var<storage, read> src: array<u32>;
@group(0) @binding(1) var<storage, read_write> dst: array<u32>;
@group(0) @binding(2) var<uniform> params: ReduceParams;

var<workgroup> sh: array<u32, 256>;

@compute @workgroup_size(256)
fn main(@builtin(workgroup_id) wid: vec3<u32>,
        @builtin(num_workgroups) nwg: vec3<u32>,
        @builtin(local_invocation_id) lid: vec3<u32>) {
    let i = linear_id(wid, nwg, lid);
    let g = linear_group(wid, nwg);
    var v = 0u;
    if i < params.len {
        v = src[i];
    }
    sh[lid.x] = v;
    workgroupBarrier();
    var s = 128u;
    loop {
        if s == 0u { break; }
        if lid.x < s {
            sh[lid.x] = sh[lid.x] + sh[lid.x + s];
        }
        workgroupBarrier();
        s = s >> 1u;
    }
    let out_n = (params.len + 255u) / 256u;
    if lid.x == 0u && g < out_n {
        dst[g] = sh[0];
    }
}
"#;

const REDUCE_MINMAX: &str = r#"
struct ReduceParams {
    len: u32,
    _p0: u32,
    _p1: u32,
    _p2: u32,
};

@group(0) @binding(0) var<storage, read> src: array<vec4<f32>>;
@group(0) @binding(1) var<storage, read_write> dst: array<vec4<f32>>;
@group(0) @binding(2) var<uniform> params: ReduceParams;

var<workgroup> sh: array<vec4<f32>, 256>;

@compute @workgroup_size(256)
fn main(@builtin(workgroup_id) wid: vec3<u32>,
        @builtin(num_workgroups) nwg: vec3<u32>,
        @builtin(local_invocation_id) lid: vec3<u32>) {
    let i = linear_id(wid, nwg, lid);
    let g = linear_group(wid, nwg);
    var v = vec4<f32>(BIG_F, -BIG_F, 0.0, 0.0);
    if i < params.len {
        v = src[i];
    }
    sh[lid.x] = v;
    workgroupBarrier();
    var s = 128u;
    loop {
        if s == 0u { break; }
        if lid.x < s {
            let a = sh[lid.x];
            let b = sh[lid.x + s];
            sh[lid.x] = vec4<f32>(min(a.x, b.x), max(a.y, b.y), 0.0, 0.0);
        }
        workgroupBarrier();
        s = s >> 1u;
    }
    let out_n = (params.len + 255u) / 256u;
    if lid.x == 0u && g < out_n {
        dst[g] = sh[0];
    }
}
"#;

const REDUCE_HIST8: &str = r#"
struct ReduceParams {
    len: u32,
    _p0: u32,
    _p1: u32,
    _p2: u32,
};

struct Hist8 {
    labels: array<u32, 4>,
    counts: array<u32, 4>,
};

const OVERFLOW_BIT: u32 = 0x80000000u;

@group(0) @binding(0) var<storage, read> src: array<Hist8>;
@group(0) @binding(1) var<storage, read_write> dst: array<Hist8>;
@group(0) @binding(2) var<uniform> params: ReduceParams;

var<workgroup> sh: array<Hist8, 256>;

// Merge two 4-slot histograms: add into a matching slot, otherwise take an
// empty slot, otherwise drop the increment and raise the overflow flag
// carried in the top bit of the last count.
fn hist_merge(a0: Hist8, b0: Hist8) -> Hist8 {
    var a = a0;
    var b = b0;
    var ovf = ((a.counts[3] | b.counts[3]) & OVERFLOW_BIT) != 0u;
    a.counts[3] = a.counts[3] & ~OVERFLOW_BIT;
    b.counts[3] = b.counts[3] & ~OVERFLOW_BIT;
    for (var j = 0u; j < 4u; j = j + 1u) {
        let lb = b.labels[j];
        let cb = b.counts[j];
        if lb == SENTINEL || cb == 0u { continue; }
        var placed = false;
        for (var k = 0u; k < 4u; k = k + 1u) {
            if a.labels[k] == lb {
                a.counts[k] = a.counts[k] + cb;
                placed = true;
                break;
            }
        }
        if !placed {
            for (var k = 0u; k < 4u; k = k + 1u) {
                if a.labels[k] == SENTINEL {
                    a.labels[k] = lb;
                    a.counts[k] = cb;
                    placed = true;
                    break;
                }
            }
        }
        if !placed {
            ovf = true;
        }
    }
    if ovf {
        a.counts[3] = a.counts[3] | OVERFLOW_BIT;
    }
    return a;
}

@compute @workgroup_size(256)
fn main(@builtin(workgroup_id) wid: vec3<u32>,
        @builtin(num_workgroups) nwg: vec3<u32>,
        @builtin(local_invocation_id) lid: vec3<u32>) {
    let i = linear_id(wid, nwg, lid);
    let g = linear_group(wid, nwg);
    var v: Hist8;
    for (var k = 0u; k < 4u; k = k + 1u) {
        v.labels[k] = SENTINEL;
        v.counts[k] = 0u;
    }
    if i < params.len {
        v = src[i];
    }
    sh[lid.x] = v;
    workgroupBarrier();
    var s = 128u;
    loop {
        if s == 0u { break; }
        if lid.x < s {
            sh[lid.x] = hist_merge(sh[lid.x], sh[lid.x + s]);
        }
        workgroupBarrier();
        s = s >> 1u;
    }
    let out_n = (params.len + 255u) / 256u;
    if lid.x == 0u && g < out_n {
        dst[g] = sh[0];
    }
}
"#;

const PACK_INDICES: &str = r#"
@group(0) @binding(0) var<storage, read> mask: array<u32>;
@group(0) @binding(1) var<storage, read_write> dst: array<u32>;
@group(0) @binding(2) var<storage, read_write> counter: atomic<u32>;

@compute @workgroup_size(256)
fn main(@builtin(workgroup_id) wid: vec3<u32>,
        @builtin(num_workgroups) nwg: vec3<u32>,
        @builtin(local_invocation_id) lid: vec3<u32>) {
    let i = linear_id(wid, nwg, lid);
    if i >= arrayLength(&mask) { return; }
    if mask[i] != 0u {
        let slot = atomicAdd(&counter, 1u);
        if slot < arrayLength(&dst) {
            dst[slot] = i;
        }
    }
}
"#;
