//! Floating frame tracking.
//!
//! Boundary frames are stacked as `[pos; rotation vector]` 6-blocks (and
//! their velocities as `[pos_dt; w_loc]`), then blended with the fixed
//! selection matrix `S`.

use nalgebra::{DMatrix, DVector, Vector3};

use modal_model::frame::{from_rotation_vector, read_quaternion, rotation_vector};
use modal_model::{Assembly, DofBlock, FrameMoving, Pose, RoleSet};

/// Stacked boundary configuration, velocity and acceleration.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundarySample {
    /// `[pos; rotvec]` per boundary frame
    pub positions: DVector<f64>,
    /// `[pos_dt; wvel_loc]` per boundary frame
    pub velocities: DVector<f64>,
    /// `[pos_dtdt; wacc_loc]` per boundary frame
    pub accelerations: DVector<f64>,
    /// Current pose of every boundary frame
    pub poses: Vec<Pose>,
}

impl BoundarySample {
    /// Reads the boundary frames of `assembly`. Every block in `blocks` must
    /// be a 6-DOF frame.
    pub fn from_assembly(assembly: &Assembly, blocks: &[DofBlock]) -> Self {
        let counts = assembly.counts(modal_model::Role::Boundary);
        let mut x = DVector::zeros(counts.coords);
        let mut v = DVector::zeros(counts.coords_w);
        let mut a = DVector::zeros(counts.coords_w);
        assembly.state_gather(RoleSet::Boundary, 0, &mut x, 0, &mut v);
        assembly.state_gather_acceleration(RoleSet::Boundary, 0, &mut a);

        let n = blocks.len();
        let mut positions = DVector::zeros(6 * n);
        let mut velocities = DVector::zeros(6 * n);
        let mut accelerations = DVector::zeros(6 * n);
        let mut poses = Vec::with_capacity(n);
        for (i, block) in blocks.iter().enumerate() {
            let (ox, ow) = (block.offset_x, block.offset_w);
            let pos = Vector3::new(x[ox], x[ox + 1], x[ox + 2]);
            let rot = read_quaternion(&x.as_slice()[ox + 3..ox + 7]);
            positions.fixed_rows_mut::<3>(6 * i).copy_from(&pos);
            positions
                .fixed_rows_mut::<3>(6 * i + 3)
                .copy_from(&rotation_vector(&rot));
            velocities.rows_mut(6 * i, 6).copy_from(&v.rows(ow, 6));
            accelerations.rows_mut(6 * i, 6).copy_from(&a.rows(ow, 6));
            poses.push(Pose::new(pos, rot));
        }
        Self {
            positions,
            velocities,
            accelerations,
            poses,
        }
    }

    pub fn len(&self) -> usize {
        self.poses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.poses.is_empty()
    }
}

/// `F = S·x_B`, with velocity and acceleration blended the same way.
pub fn blend_frame(selection: &DMatrix<f64>, sample: &BoundarySample) -> FrameMoving {
    let p = selection * &sample.positions;
    let v = selection * &sample.velocities;
    let a = selection * &sample.accelerations;
    let mut frame = FrameMoving::new(
        Vector3::new(p[0], p[1], p[2]),
        from_rotation_vector(&Vector3::new(p[3], p[4], p[5])),
    );
    frame.scatter_velocity(v.as_slice());
    frame.scatter_acceleration(a.as_slice());
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::selection_matrix;
    use approx::assert_relative_eq;
    use modal_model::{RigidBody, Role};
    use nalgebra::UnitQuaternion;

    #[test]
    fn single_body_frame_coincides_with_body() {
        let mut asm = Assembly::new();
        let rot = UnitQuaternion::from_euler_angles(0.1, 0.2, -0.3);
        let mut body = RigidBody::new("b", Vector3::new(1.0, 2.0, 3.0), rot).with_mass(2.0);
        body.frame.pos_dt = Vector3::new(0.5, 0.0, 0.0);
        body.frame.wvel_loc = Vector3::new(0.0, 0.0, 1.5);
        asm.add(Role::Boundary, body);
        asm.setup();

        let blocks = asm.blocks(RoleSet::Boundary);
        let sample = BoundarySample::from_assembly(&asm, &blocks);
        let s = selection_matrix(&DVector::from_element(1, 1.0));
        let frame = blend_frame(&s, &sample);

        assert_relative_eq!(frame.pos, Vector3::new(1.0, 2.0, 3.0), epsilon = 1e-12);
        assert!(frame.rot.angle_to(&rot) < 1e-12);
        assert_relative_eq!(frame.pos_dt.x, 0.5, epsilon = 1e-12);
        assert_relative_eq!(frame.wvel_loc.z, 1.5, epsilon = 1e-12);
    }

    #[test]
    fn two_bodies_blend_to_midpoint() {
        let mut asm = Assembly::new();
        asm.add(
            Role::Boundary,
            RigidBody::new("a", Vector3::zeros(), UnitQuaternion::identity()),
        );
        asm.add(
            Role::Boundary,
            RigidBody::new("b", Vector3::new(2.0, 0.0, 0.0), UnitQuaternion::identity()),
        );
        asm.setup();

        let blocks = asm.blocks(RoleSet::Boundary);
        let sample = BoundarySample::from_assembly(&asm, &blocks);
        let s = selection_matrix(&DVector::from_vec(vec![0.5, 0.5]));
        let frame = blend_frame(&s, &sample);
        assert_relative_eq!(frame.pos.x, 1.0, epsilon = 1e-12);
    }
}
