//! Core types shared by the geometry and tracking layers
//!
//! Defines the closed `Shape` union the planner sends, and the rounding
//! policy controlling conservative discretization of continuous shape
//! boundaries.
//!
//! Author: Moroya Sakamoto

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::primitives::{sdf_cylinder, sdf_oriented_box, sdf_slot};

/// Removal-volume shape descriptor
///
/// Exactly three variants exist; each has a closed-form SDF (negative
/// inside) evaluated identically on host and device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Shape {
    /// Capped cylinder
    Cylinder {
        /// Center of the cylinder (mid-height on the axis)
        origin: Vec3,
        /// Unit axis direction
        axis: Vec3,
        /// Radius
        radius: f32,
        /// Full height
        height: f32,
    },
    /// Stadium profile swept from `p` to `q`, extruded along `axis`
    ExtrudedSlot {
        /// Start of the sweep segment
        p: Vec3,
        /// End of the sweep segment
        q: Vec3,
        /// Unit extrusion axis, perpendicular to `q - p`
        axis: Vec3,
        /// Slot (wire) radius
        radius: f32,
        /// Full extrusion height, centered on the segment plane
        height: f32,
    },
    /// Box with arbitrary orientation
    OrientedBox {
        /// Box center
        center: Vec3,
        /// Three mutually orthogonal half-extent vectors
        half_axes: [Vec3; 3],
    },
}

impl Shape {
    /// Signed distance from `point` to this shape's surface (negative inside)
    #[inline]
    pub fn distance(&self, point: Vec3) -> f32 {
        match self {
            Shape::Cylinder {
                origin,
                axis,
                radius,
                height,
            } => sdf_cylinder(point, *origin, *axis, *radius, *height),
            Shape::ExtrudedSlot {
                p,
                q,
                axis,
                radius,
                height,
            } => sdf_slot(point, *p, *q, *axis, *radius, *height),
            Shape::OrientedBox { center, half_axes } => {
                sdf_oriented_box(point, *center, half_axes)
            }
        }
    }
}

/// Conservative discretization policy for a continuous shape boundary
///
/// The boundary offset magnitude is the voxel circumscribing-sphere radius
/// `res * sqrt(3) / 2`, which guarantees conservative containment:
/// `Inward` only accepts voxels entirely inside the shape, `Outward`
/// accepts every voxel the shape may touch, `Nearest` tests the center.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundPolicy {
    /// Voxel must be entirely inside the shape
    Inward,
    /// Voxel may touch the shape anywhere
    Outward,
    /// Voxel center inside the shape
    Nearest,
}

impl RoundPolicy {
    /// Signed boundary offset the SDF at the voxel center is compared against
    #[inline]
    pub fn boundary_offset(self, res: f32) -> f32 {
        let b = res * 3.0_f32.sqrt() * 0.5;
        match self {
            RoundPolicy::Inward => -b,
            RoundPolicy::Outward => b,
            RoundPolicy::Nearest => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_distance_dispatch() {
        let cyl = Shape::Cylinder {
            origin: Vec3::ZERO,
            axis: Vec3::Z,
            radius: 1.0,
            height: 2.0,
        };
        assert!(cyl.distance(Vec3::ZERO) < 0.0);
        assert!(cyl.distance(Vec3::new(5.0, 0.0, 0.0)) > 0.0);

        let slot = Shape::ExtrudedSlot {
            p: Vec3::ZERO,
            q: Vec3::X,
            axis: Vec3::Z,
            radius: 0.5,
            height: 1.0,
        };
        assert!(slot.distance(Vec3::new(0.5, 0.0, 0.0)) < 0.0);

        let bx = Shape::OrientedBox {
            center: Vec3::ZERO,
            half_axes: [Vec3::X, Vec3::Y, Vec3::Z],
        };
        assert!(bx.distance(Vec3::ZERO) < 0.0);
    }

    #[test]
    fn test_policy_offsets() {
        let res = 2.0;
        let b = res * 3.0_f32.sqrt() * 0.5;
        assert!((RoundPolicy::Outward.boundary_offset(res) - b).abs() < 1e-6);
        assert!((RoundPolicy::Inward.boundary_offset(res) + b).abs() < 1e-6);
        assert_eq!(RoundPolicy::Nearest.boundary_offset(res), 0.0);
    }

    #[test]
    fn test_shape_serde_round_trip() {
        let shape = Shape::ExtrudedSlot {
            p: Vec3::ZERO,
            q: Vec3::new(3.0, 0.0, 0.0),
            axis: Vec3::Z,
            radius: 0.15,
            height: 40.0,
        };
        let json = serde_json::to_string(&shape).unwrap();
        let back: Shape = serde_json::from_str(&json).unwrap();
        assert_eq!(shape, back);
    }
}
