//! Capped cylinder SDF with free origin and axis
//!
//! Author: Moroya Sakamoto

use glam::{Vec2, Vec3};

/// Signed distance to a capped cylinder
///
/// # Arguments
/// * `point` - Point to evaluate
/// * `origin` - Center of the cylinder (mid-height on the axis)
/// * `axis` - Unit axis direction
/// * `radius` - Cylinder radius
/// * `height` - Full cylinder height
///
/// # Returns
/// Signed distance (negative inside, positive outside)
#[inline(always)]
pub fn sdf_cylinder(point: Vec3, origin: Vec3, axis: Vec3, radius: f32, height: f32) -> f32 {
    let w = point - origin;
    let t = w.dot(axis);
    // 1D axis interval distance combined with 2D radial distance
    let d = Vec2::new((w - axis * t).length() - radius, t.abs() - 0.5 * height);
    d.x.max(d.y).min(0.0) + d.max(Vec2::ZERO).length()
}
