//! Bilateral lock constraints between two DOF blocks, or between a block and
//! ground.
//!
//! The locked point is the origin of endpoint `a`. Its position is tracked on
//! `b` through a lever arm captured at initialization, and the relative
//! orientation is locked against the one captured at the same time.
//! Jacobians are expressed in velocity coordinates (absolute linear velocity,
//! local angular velocity).

use nalgebra::{Matrix3, SMatrix, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::frame::{Pose, rotation_vector, skew};
use crate::item::DofRef;

pub type LinkJacobian = SMatrix<f64, 6, 6>;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinkAnchor {
    /// Position of `a` in the frame of `b` (absolute when locked to ground)
    pub lever: Vector3<f64>,
    /// Orientation of `a` relative to `b`
    pub rel_rot: UnitQuaternion<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub name: String,
    pub a: DofRef,
    /// `None` locks `a` to ground
    pub b: Option<DofRef>,
    /// Locked components: x, y, z, rx, ry, rz
    pub mask: [bool; 6],
    pub reactions: Vec<f64>,
    pub anchor: Option<LinkAnchor>,
}

impl Link {
    /// Locks all six relative DOF between `a` and `b`.
    pub fn lock(name: impl Into<String>, a: DofRef, b: DofRef) -> Self {
        Self::build(name.into(), a, Some(b))
    }

    /// Locks all six DOF of `a` to ground.
    pub fn lock_to_ground(name: impl Into<String>, a: DofRef) -> Self {
        Self::build(name.into(), a, None)
    }

    fn build(name: String, a: DofRef, b: Option<DofRef>) -> Self {
        Self {
            name,
            a,
            b,
            mask: [true; 6],
            reactions: vec![0.0; 6],
            anchor: None,
        }
    }

    pub fn with_mask(mut self, mask: [bool; 6]) -> Self {
        self.mask = mask;
        self.reactions = vec![0.0; self.n_constraints()];
        self
    }

    pub fn n_constraints(&self) -> usize {
        self.mask.iter().filter(|m| **m).count()
    }

    pub fn locks_rotation(&self) -> bool {
        self.mask[3..].iter().any(|m| *m)
    }

    /// Indices (0..6) of the active rows.
    pub fn active_rows(&self) -> impl Iterator<Item = usize> + '_ {
        (0..6).filter(|i| self.mask[*i])
    }

    pub fn is_initialized(&self) -> bool {
        self.anchor.is_some()
    }

    /// Captures the lever arm and relative orientation from the given poses.
    pub fn initialize(&mut self, a: &Pose, b: Option<&Pose>) {
        let (pb, rb) = ground_or(b);
        self.anchor = Some(LinkAnchor {
            lever: rb.inverse() * (a.pos - pb),
            rel_rot: rb.inverse() * a.rot,
        });
        self.reactions = vec![0.0; self.n_constraints()];
    }

    fn anchor(&self) -> LinkAnchor {
        self.anchor.unwrap_or(LinkAnchor {
            lever: Vector3::zeros(),
            rel_rot: UnitQuaternion::identity(),
        })
    }

    /// Full six-component violation (translation, then rotation vector).
    pub fn violation(&self, a: &Pose, b: Option<&Pose>) -> [f64; 6] {
        let anchor = self.anchor();
        let (pb, rb) = ground_or(b);
        let ct = a.pos - pb - rb * anchor.lever;
        let cr = rotation_vector(&(anchor.rel_rot.inverse() * rb.inverse() * a.rot));
        [ct.x, ct.y, ct.z, cr.x, cr.y, cr.z]
    }

    /// Full 6×6 Jacobians with respect to `[v; w_loc]` of `a` and `b`.
    pub fn jacobians(&self, a: &Pose, b: Option<&Pose>) -> (LinkJacobian, LinkJacobian) {
        let anchor = self.anchor();
        let (_, rb) = ground_or(b);
        let rb = rb.to_rotation_matrix().into_inner();
        let ra = a.rotation_matrix();
        let rel_t = anchor.rel_rot.to_rotation_matrix().into_inner().transpose();

        let mut ja = LinkJacobian::zeros();
        ja.fixed_view_mut::<3, 3>(0, 0).copy_from(&Matrix3::identity());
        ja.fixed_view_mut::<3, 3>(3, 3)
            .copy_from(&(rel_t * rb.transpose() * ra));

        let mut jb = LinkJacobian::zeros();
        jb.fixed_view_mut::<3, 3>(0, 0).copy_from(&(-Matrix3::identity()));
        jb.fixed_view_mut::<3, 3>(0, 3)
            .copy_from(&(rb * skew(&anchor.lever)));
        jb.fixed_view_mut::<3, 3>(3, 3).copy_from(&(-rel_t));
        (ja, jb)
    }
}

fn ground_or(b: Option<&Pose>) -> (Vector3<f64>, UnitQuaternion<f64>) {
    match b {
        Some(pose) => (pose.pos, pose.rot),
        None => (Vector3::zeros(), UnitQuaternion::identity()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::ItemId;
    use approx::assert_relative_eq;

    #[test]
    fn violation_is_zero_at_initialization() {
        let a = Pose::new(Vector3::new(1.0, 2.0, 0.0), UnitQuaternion::from_euler_angles(0.1, 0.0, 0.3));
        let b = Pose::new(Vector3::new(-1.0, 0.5, 0.2), UnitQuaternion::from_euler_angles(0.0, 0.4, 0.0));
        let mut link = Link::lock("l", DofRef::Body(ItemId(0)), DofRef::Body(ItemId(1)));
        link.initialize(&a, Some(&b));
        for c in link.violation(&a, Some(&b)) {
            assert!(c.abs() < 1e-12);
        }
    }

    #[test]
    fn jacobian_matches_finite_difference_on_b_rotation() {
        let a = Pose::new(Vector3::new(1.0, 0.0, 0.0), UnitQuaternion::identity());
        let b = Pose::new(Vector3::zeros(), UnitQuaternion::from_euler_angles(0.2, -0.1, 0.05));
        let mut link = Link::lock("l", DofRef::Body(ItemId(0)), DofRef::Body(ItemId(1)));
        link.initialize(&a, Some(&b));

        let h = 1e-7;
        let (_, jb) = link.jacobians(&a, Some(&b));
        for k in 0..3 {
            let mut w = Vector3::zeros();
            w[k] = h;
            let b2 = Pose::new(b.pos, b.rot * UnitQuaternion::from_scaled_axis(w));
            let c = link.violation(&a, Some(&b2));
            for row in 0..6 {
                assert_relative_eq!(c[row] / h, jb[(row, 3 + k)], epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn mask_selects_rows() {
        let link = Link::lock_to_ground("g", DofRef::Body(ItemId(0)))
            .with_mask([false, true, true, false, false, false]);
        assert_eq!(link.n_constraints(), 2);
        assert_eq!(link.active_rows().collect::<Vec<_>>(), vec![1, 2]);
        assert!(!link.locks_rotation());
    }
}
