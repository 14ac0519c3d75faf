//! Extruded slot SDF (stadium profile swept along an extrusion axis)
//!
//! A slot is the volume covered by a disc of radius `r` moving along the
//! segment `a..b`, extruded symmetrically along `axis` (which must be
//! perpendicular to `b - a`). This is the cut volume of one straight wire
//! sweep.
//!
//! Author: Moroya Sakamoto

use glam::{Vec2, Vec3};

/// Signed distance to an extruded slot
///
/// # Arguments
/// * `point` - Point to evaluate
/// * `a` - Start of the sweep segment
/// * `b` - End of the sweep segment
/// * `axis` - Unit extrusion axis, perpendicular to `b - a`
/// * `radius` - Slot (wire) radius
/// * `height` - Full extrusion height, centered on the segment plane
///
/// # Returns
/// Signed distance (negative inside, positive outside)
#[inline(always)]
pub fn sdf_slot(point: Vec3, a: Vec3, b: Vec3, axis: Vec3, radius: f32, height: f32) -> f32 {
    let w = point - a;
    let t = w.dot(axis);
    // 2D capsule distance to the segment, in the plane perpendicular to axis
    let w2 = w - axis * t;
    let ba = b - a;
    let h = (w2.dot(ba) / ba.dot(ba)).clamp(0.0, 1.0);
    let d = Vec2::new((w2 - ba * h).length() - radius, t.abs() - 0.5 * height);
    d.x.max(d.y).min(0.0) + d.max(Vec2::ZERO).length()
}
