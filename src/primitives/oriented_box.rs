//! Oriented box SDF from three mutually orthogonal half-extent vectors
//!
//! Author: Moroya Sakamoto

use glam::Vec3;

/// Signed distance to an oriented box
///
/// # Arguments
/// * `point` - Point to evaluate
/// * `center` - Box center
/// * `half_axes` - Three mutually orthogonal half-extent vectors; each
///   vector's direction is a box axis and its length the half-extent
///
/// # Returns
/// Signed distance (negative inside, positive outside)
#[inline(always)]
pub fn sdf_oriented_box(point: Vec3, center: Vec3, half_axes: &[Vec3; 3]) -> f32 {
    let w = point - center;
    let ex = half_axes[0].length();
    let ey = half_axes[1].length();
    let ez = half_axes[2].length();
    // Per-axis projected absolute offset minus half-extent
    let q = Vec3::new(
        w.dot(half_axes[0]).abs() / ex - ex,
        w.dot(half_axes[1]).abs() / ey - ey,
        w.dot(half_axes[2]).abs() / ez - ez,
    );
    q.max(Vec3::ZERO).length() + q.x.max(q.y.max(q.z)).min(0.0)
}
