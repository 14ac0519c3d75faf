//! Shared helpers for GPU-backed integration tests
//!
//! Author: Moroya Sakamoto

use voxelcarve::prelude::*;

/// Whether a GPU adapter is available; tests bail out quietly when not
pub fn has_gpu() -> bool {
    GpuEngine::new().is_ok()
}

/// Fresh engine for a test body (call after `has_gpu`)
pub fn engine() -> GpuEngine {
    GpuEngine::new().expect("adapter disappeared between probe and test")
}
