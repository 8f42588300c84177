//! FEA nodes with lumped mass.
//!
//! - `Xyz`: three translational DOF (3 coordinates)
//! - `XyzRot`: translations plus rotations (7 coordinates, 6 DOF)

use nalgebra::{DMatrix, Matrix3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::frame::{FrameMoving, Pose};
use crate::state::{BlockKind, StateBlock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Xyz,
    XyzRot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeaNode {
    pub kind: NodeKind,
    /// Orientation and angular terms are unused for `Xyz` nodes
    pub frame: FrameMoving,
    pub reference: Pose,
    pub mass: f64,
    pub inertia: Matrix3<f64>,
}

impl FeaNode {
    pub fn xyz(pos: Vector3<f64>) -> Self {
        Self {
            kind: NodeKind::Xyz,
            frame: FrameMoving::new(pos, UnitQuaternion::identity()),
            reference: Pose::new(pos, UnitQuaternion::identity()),
            mass: 0.0,
            inertia: Matrix3::zeros(),
        }
    }

    pub fn xyzrot(pos: Vector3<f64>, rot: UnitQuaternion<f64>) -> Self {
        Self {
            kind: NodeKind::XyzRot,
            frame: FrameMoving::new(pos, rot),
            reference: Pose::new(pos, rot),
            mass: 0.0,
            inertia: Matrix3::zeros(),
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
}

impl StateBlock for FeaNode {
    fn kind(&self) -> BlockKind {
        match self.kind {
            NodeKind::Xyz => BlockKind::Point,
            NodeKind::XyzRot => BlockKind::Frame,
        }
    }

    fn gather_state(&self, x: &mut [f64], v: &mut [f64]) {
        match self.kind {
            NodeKind::Xyz => {
                x[..3].copy_from_slice(self.frame.pos.as_slice());
                v[..3].copy_from_slice(self.frame.pos_dt.as_slice());
            }
            NodeKind::XyzRot => {
                self.frame.gather_coords(x);
                self.frame.gather_velocity(v);
            }
        }
    }

    fn scatter_state(&mut self, x: &[f64], v: &[f64]) {
        match self.kind {
            NodeKind::Xyz => {
                self.frame.pos = Vector3::new(x[0], x[1], x[2]);
                self.frame.pos_dt = Vector3::new(v[0], v[1], v[2]);
            }
            NodeKind::XyzRot => {
                self.frame.scatter_coords(x);
                self.frame.scatter_velocity(v);
            }
        }
    }

    fn gather_acceleration(&self, a: &mut [f64]) {
        match self.kind {
            NodeKind::Xyz => a[..3].copy_from_slice(self.frame.pos_dtdt.as_slice()),
            NodeKind::XyzRot => self.frame.gather_acceleration(a),
        }
    }

    fn scatter_acceleration(&mut self, a: &[f64]) {
        match self.kind {
            NodeKind::Xyz => self.frame.pos_dtdt = Vector3::new(a[0], a[1], a[2]),
            NodeKind::XyzRot => self.frame.scatter_acceleration(a),
        }
    }

    fn mass_block(&self) -> DMatrix<f64> {
        let n = StateBlock::kind(self).coords_w();
        let mut m = DMatrix::zeros(n, n);
        m.fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&(Matrix3::identity() * self.mass));
        if self.kind == NodeKind::XyzRot {
            m.fixed_view_mut::<3, 3>(3, 3).copy_from(&self.inertia);
        }
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
        for i in 0..3 {
            r[i] += c * weight[i];
        }
        if self.kind == NodeKind::XyzRot {
            let w = self.frame.wvel_loc;
            let gyro = -w.cross(&(self.inertia * w));
            for i in 0..3 {
                r[3 + i] += c * gyro[i];
            }
        }
    }
}
