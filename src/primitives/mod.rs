//! Closed-form SDFs for the three removal-volume primitives
//!
//! Each shape has a signed distance function (negative inside) built from
//! the same interval/radial combinator: `min(max(dx, dy), 0) + |max(d, 0)|`.
//! The WGSL copies of these functions in the kernel catalog must stay in
//! lockstep operation-for-operation, so host and device evaluation agree
//! within floating tolerance.
//!
//! Author: Moroya Sakamoto

mod cylinder;
mod oriented_box;
mod slot;

pub use cylinder::sdf_cylinder;
pub use oriented_box::sdf_oriented_box;
pub use slot::sdf_slot;
