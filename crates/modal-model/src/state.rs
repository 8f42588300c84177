//! State vector layout.
//!
//! A state `x` stacks the coordinates of every block (3 for a point, 7 for a
//! frame: position plus quaternion). A state delta `v` stacks the velocity
//! coordinates (3 for a point, 6 for a frame: linear velocity plus local
//! angular velocity). Increments on frames are applied on the right, so a
//! rotational delta is always expressed in the local frame.

use nalgebra::{DMatrix, DVector, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::frame::{Pose, from_rotation_vector, read_quaternion, rotation_vector, write_quaternion};

pub type State = DVector<f64>;
pub type StateDelta = DVector<f64>;

/// Shape of one state block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockKind {
    /// Three translational DOF
    Point,
    /// Three translational and three rotational DOF
    Frame,
}

impl BlockKind {
    /// Number of position coordinates.
    pub fn coords(self) -> usize {
        match self {
            BlockKind::Point => 3,
            BlockKind::Frame => 7,
        }
    }

    /// Number of velocity coordinates.
    pub fn coords_w(self) -> usize {
        match self {
            BlockKind::Point => 3,
            BlockKind::Frame => 6,
        }
    }
}

/// `x_new = x ⊕ dv` for one block.
pub fn increment_block(kind: BlockKind, x_new: &mut [f64], x: &[f64], dv: &[f64]) {
    for i in 0..3 {
        x_new[i] = x[i] + dv[i];
    }
    if kind == BlockKind::Frame {
        let q_old = read_quaternion(&x[3..7]);
        let delta = from_rotation_vector(&Vector3::new(dv[3], dv[4], dv[5]));
        let q_new = UnitQuaternion::new_normalize(q_old.into_inner() * delta.into_inner());
        write_quaternion(&q_new, &mut x_new[3..7]);
    }
}

/// `dv = x_new ⊖ x` for one block.
pub fn get_increment_block(kind: BlockKind, dv: &mut [f64], x_new: &[f64], x: &[f64]) {
    for i in 0..3 {
        dv[i] = x_new[i] - x[i];
    }
    if kind == BlockKind::Frame {
        let q_old = UnitQuaternion::new_normalize(read_quaternion(&x[3..7]).into_inner());
        let q_new = UnitQuaternion::new_normalize(read_quaternion(&x_new[3..7]).into_inner());
        let theta = rotation_vector(&(q_old.inverse() * q_new));
        dv[3..6].copy_from_slice(theta.as_slice());
    }
}

/// Position and orientation of a block read from a state slice.
pub fn pose_from_coords(kind: BlockKind, x: &[f64]) -> Pose {
    let pos = Vector3::new(x[0], x[1], x[2]);
    match kind {
        BlockKind::Point => Pose::new(pos, UnitQuaternion::identity()),
        BlockKind::Frame => Pose::new(pos, read_quaternion(&x[3..7])),
    }
}

/// An item that owns a block of the state.
pub trait StateBlock {
    fn kind(&self) -> BlockKind;

    fn gather_state(&self, x: &mut [f64], v: &mut [f64]);

    fn scatter_state(&mut self, x: &[f64], v: &[f64]);

    fn gather_acceleration(&self, a: &mut [f64]);

    fn scatter_acceleration(&mut self, a: &[f64]);

    /// Lumped mass block in velocity coordinates (`coords_w × coords_w`).
    fn mass_block(&self) -> DMatrix<f64>;

    fn mass(&self) -> f64;

    fn position(&self) -> Vector3<f64>;

    /// Current pose (orientation is identity for points).
    fn pose(&self) -> Pose;

    /// Configuration the elastic displacements are measured from.
    fn reference(&self) -> &Pose;

    fn set_reference_configuration(&mut self);

    fn remove_mass(&mut self);

    fn set_no_speed_no_acceleration(&mut self);

    /// Adds `c * F`: gravity plus gyroscopic torque for frames.
    fn load_residual_f(&self, r: &mut [f64], c: f64, gravity: &Vector3<f64>);

    /// Current velocity coordinates.
    fn velocity(&self) -> DVector<f64> {
        let n = self.kind().coords_w();
        let mut x = vec![0.0; self.kind().coords()];
        let mut v = vec![0.0; n];
        self.gather_state(&mut x, &mut v);
        DVector::from_vec(v)
    }

    /// Displacement from the reference configuration in velocity coordinates.
    fn displacement(&self) -> DVector<f64> {
        let pose = self.pose();
        let reference = self.reference();
        let du = pose.pos - reference.pos;
        match self.kind() {
            BlockKind::Point => DVector::from_column_slice(du.as_slice()),
            BlockKind::Frame => {
                let theta = rotation_vector(&(reference.rot.inverse() * pose.rot));
                DVector::from_iterator(6, du.iter().chain(theta.iter()).copied())
            }
        }
    }
}
