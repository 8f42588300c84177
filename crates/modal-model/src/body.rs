//! Rigid bodies: 7 coordinates, 6 DOF.

use nalgebra::{DMatrix, Matrix3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::frame::{FrameMoving, Pose};
use crate::state::{BlockKind, StateBlock};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RigidBody {
    pub name: String,
    pub frame: FrameMoving,
    pub reference: Pose,
    pub mass: f64,
    /// Inertia tensor about the center of mass, in the local frame
    pub inertia: Matrix3<f64>,
    /// Fixed bodies carry no DOF and act as ground for links and elements
    pub fixed: bool,
}

impl RigidBody {
    pub fn new(name: impl Into<String>, pos: Vector3<f64>, rot: UnitQuaternion<f64>) -> Self {
        Self {
            name: name.into(),
            frame: FrameMoving::new(pos, rot),
            reference: Pose::new(pos, rot),
            mass: 1.0,
            inertia: Matrix3::identity(),
            fixed: false,
        }
    }

    pub fn with_mass(mut self, mass: f64) -> Self {
        self.mass = mass;
        self
    }

    pub fn with_inertia(mut self, inertia: Matrix3<f64>) -> Self {
        self.inertia = inertia;
        self
    }

    pub fn with_principal_inertia(self, ixx: f64, iyy: f64, izz: f64) -> Self {
        self.with_inertia(Matrix3::from_diagonal(&Vector3::new(ixx, iyy, izz)))
    }

    pub fn fixed(mut self, fixed: bool) -> Self {
        self.fixed = fixed;
        self
    }

    pub fn has_dofs(&self) -> bool {
        !self.fixed
    }
}

impl StateBlock for RigidBody {
    fn kind(&self) -> BlockKind {
        BlockKind::Frame
    }

    fn gather_state(&self, x: &mut [f64], v: &mut [f64]) {
        self.frame.gather_coords(x);
        self.frame.gather_velocity(v);
    }

    fn scatter_state(&mut self, x: &[f64], v: &[f64]) {
        self.frame.scatter_coords(x);
        self.frame.scatter_velocity(v);
    }

    fn gather_acceleration(&self, a: &mut [f64]) {
        self.frame.gather_acceleration(a);
    }

    fn scatter_acceleration(&mut self, a: &[f64]) {
        self.frame.scatter_acceleration(a);
    }

    fn mass_block(&self) -> DMatrix<f64> {
        let mut m = DMatrix::zeros(6, 6);
        m.fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&(Matrix3::identity() * self.mass));
        m.fixed_view_mut::<3, 3>(3, 3).copy_from(&self.inertia);
        m
    }

    fn mass(&self) -> f64 {
        self.mass
    }

    fn position(&self) -> Vector3<f64> {
        self.frame.pos
    }

    fn pose(&self) -> Pose {
        self.frame.pose()
    }

    fn reference(&self) -> &Pose {
        &self.reference
    }

    fn set_reference_configuration(&mut self) {
        self.reference = self.frame.pose();
    }

    fn remove_mass(&mut self) {
        self.mass = 0.0;
        self.inertia = Matrix3::zeros();
    }

    fn set_no_speed_no_acceleration(&mut self) {
        self.frame.set_no_speed_no_acceleration();
    }

    fn load_residual_f(&self, r: &mut [f64], c: f64, gravity: &Vector3<f64>) {
        let weight = gravity * self.mass;
        let w = self.frame.wvel_loc;
        let gyro = -w.cross(&(self.inertia * w));
        for i in 0..3 {
            r[i] += c * weight[i];
            r[3 + i] += c * gyro[i];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mass_block_holds_mass_and_inertia() {
        let body = RigidBody::new("b", Vector3::zeros(), UnitQuaternion::identity())
            .with_mass(3.0)
            .with_principal_inertia(0.1, 0.2, 0.3);
        let m = body.mass_block();
        assert_eq!(m[(0, 0)], 3.0);
        assert_eq!(m[(2, 2)], 3.0);
        assert_eq!(m[(3, 3)], 0.1);
        assert_eq!(m[(5, 5)], 0.3);
        assert_eq!(m[(0, 3)], 0.0);
    }

    #[test]
    fn gyroscopic_torque_vanishes_for_spherical_inertia() {
        let mut body = RigidBody::new("b", Vector3::zeros(), UnitQuaternion::identity())
            .with_principal_inertia(2.0, 2.0, 2.0);
        body.frame.wvel_loc = Vector3::new(1.0, 2.0, 3.0);
        let mut r = [0.0; 6];
        body.load_residual_f(&mut r, 1.0, &Vector3::zeros());
        assert!(r.iter().all(|v| v.abs() < 1e-14));
    }
}
