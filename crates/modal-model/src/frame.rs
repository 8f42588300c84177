//! Coordinate frames, poses and the small rotation helpers shared by every
//! crate in the workspace.
//!
//! Quaternions are stored in state vectors as `[w, i, j, k]`. Angular
//! velocities and accelerations of frames are always expressed in the local
//! frame, linear ones in the absolute frame (the "mixed" basis).

use nalgebra::{Matrix3, Quaternion, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// Skew-symmetric cross-product matrix, so that `skew(a) * b == a.cross(&b)`.
pub fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

/// Rotation vector (axis times angle) of a unit quaternion.
pub fn rotation_vector(q: &UnitQuaternion<f64>) -> Vector3<f64> {
    q.scaled_axis()
}

/// Unit quaternion from a rotation vector (exponential map).
pub fn from_rotation_vector(v: &Vector3<f64>) -> UnitQuaternion<f64> {
    UnitQuaternion::from_scaled_axis(*v)
}

/// Reads a `[w, i, j, k]` quaternion without renormalizing it.
pub fn read_quaternion(x: &[f64]) -> UnitQuaternion<f64> {
    UnitQuaternion::new_unchecked(Quaternion::new(x[0], x[1], x[2], x[3]))
}

/// Writes a quaternion as `[w, i, j, k]`.
pub fn write_quaternion(q: &UnitQuaternion<f64>, x: &mut [f64]) {
    x[0] = q.w;
    x[1] = q.i;
    x[2] = q.j;
    x[3] = q.k;
}

/// Position and orientation, without derivatives.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub pos: Vector3<f64>,
    pub rot: UnitQuaternion<f64>,
}

impl Pose {
    pub fn new(pos: Vector3<f64>, rot: UnitQuaternion<f64>) -> Self {
        Self { pos, rot }
    }

    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        self.rot.to_rotation_matrix().into_inner()
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::new(Vector3::zeros(), UnitQuaternion::identity())
    }
}

/// A frame with first and second time derivatives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameMoving {
    pub pos: Vector3<f64>,
    pub rot: UnitQuaternion<f64>,
    pub pos_dt: Vector3<f64>,
    /// Angular velocity in the local frame
    pub wvel_loc: Vector3<f64>,
    pub pos_dtdt: Vector3<f64>,
    /// Angular acceleration in the local frame
    pub wacc_loc: Vector3<f64>,
}

impl Default for FrameMoving {
    fn default() -> Self {
        Self::new(Vector3::zeros(), UnitQuaternion::identity())
    }
}

impl FrameMoving {
    /// Frame at rest at the given pose.
    pub fn new(pos: Vector3<f64>, rot: UnitQuaternion<f64>) -> Self {
        Self {
            pos,
            rot,
            pos_dt: Vector3::zeros(),
            wvel_loc: Vector3::zeros(),
            pos_dtdt: Vector3::zeros(),
            wacc_loc: Vector3::zeros(),
        }
    }

    pub fn pose(&self) -> Pose {
        Pose::new(self.pos, self.rot)
    }

    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        self.rot.to_rotation_matrix().into_inner()
    }

    /// Angular velocity expressed in the absolute frame.
    pub fn wvel_abs(&self) -> Vector3<f64> {
        self.rot * self.wvel_loc
    }

    /// Writes `[pos; quaternion]` (7 values).
    pub fn gather_coords(&self, x: &mut [f64]) {
        x[..3].copy_from_slice(self.pos.as_slice());
        write_quaternion(&self.rot, &mut x[3..7]);
    }

    pub fn scatter_coords(&mut self, x: &[f64]) {
        self.pos = Vector3::new(x[0], x[1], x[2]);
        self.rot = read_quaternion(&x[3..7]);
    }

    /// Writes `[pos_dt; wvel_loc]` (6 values).
    pub fn gather_velocity(&self, v: &mut [f64]) {
        v[..3].copy_from_slice(self.pos_dt.as_slice());
        v[3..6].copy_from_slice(self.wvel_loc.as_slice());
    }

    pub fn scatter_velocity(&mut self, v: &[f64]) {
        self.pos_dt = Vector3::new(v[0], v[1], v[2]);
        self.wvel_loc = Vector3::new(v[3], v[4], v[5]);
    }

    /// Writes `[pos_dtdt; wacc_loc]` (6 values).
    pub fn gather_acceleration(&self, a: &mut [f64]) {
        a[..3].copy_from_slice(self.pos_dtdt.as_slice());
        a[3..6].copy_from_slice(self.wacc_loc.as_slice());
    }

    pub fn scatter_acceleration(&mut self, a: &[f64]) {
        self.pos_dtdt = Vector3::new(a[0], a[1], a[2]);
        self.wacc_loc = Vector3::new(a[3], a[4], a[5]);
    }

    pub fn set_no_speed_no_acceleration(&mut self) {
        self.pos_dt = Vector3::zeros();
        self.wvel_loc = Vector3::zeros();
        self.pos_dtdt = Vector3::zeros();
        self.wacc_loc = Vector3::zeros();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn skew_matches_cross_product() {
        let a = Vector3::new(1.0, -2.0, 0.5);
        let b = Vector3::new(0.3, 4.0, -1.0);
        assert_relative_eq!(skew(&a) * b, a.cross(&b), epsilon = 1e-14);
        assert_relative_eq!(skew(&a).transpose(), -skew(&a), epsilon = 1e-14);
    }

    #[test]
    fn rotation_vector_roundtrip() {
        let v = Vector3::new(0.2, -0.1, 0.4);
        let q = from_rotation_vector(&v);
        assert_relative_eq!(rotation_vector(&q), v, epsilon = 1e-12);
    }

    #[test]
    fn frame_coords_roundtrip_is_exact() {
        let frame = FrameMoving::new(
            Vector3::new(1.0, 2.0, 3.0),
            UnitQuaternion::from_euler_angles(0.1, 0.2, 0.3),
        );
        let mut x = [0.0; 7];
        frame.gather_coords(&mut x);

        let mut other = FrameMoving::default();
        other.scatter_coords(&x);
        assert_eq!(other.pos, frame.pos);
        assert_eq!(other.rot.coords, frame.rot.coords);
    }
}
