//! Transformation matrices between the floating frame, the boundary frames,
//! the internal blocks and the local (frame-aligned) basis.
//!
//! Velocity coordinates of a frame are `[v_abs; w_loc]`. The local basis of a
//! reduced model rotates the translational part by `R_F`, so
//! `x_abs = P_BI·x_loc` with `P_BI = blockdiag(R_F, I₃, R_F, …)`.

use nalgebra::{DMatrix, Matrix3};
use nalgebra_sparse::{CooMatrix, CsrMatrix};

use modal_model::frame::skew;
use modal_model::{BlockKind, FrameMoving, Pose};

/// Pose and layout of one block inside its partition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockPose {
    pub kind: BlockKind,
    /// Velocity offset relative to the start of the partition
    pub offset_w: usize,
    pub pose: Pose,
}

/// Frame-dependent transformation matrices of a reduced model.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameTransforms {
    /// Boundary velocities produced by a rigid motion of F (n_bw × 6)
    pub p_b1: DMatrix<f64>,
    /// Local → absolute rotation of the boundary velocities (n_bw × n_bw)
    pub p_b2: DMatrix<f64>,
    /// Internal velocities produced by a rigid motion of F (n_iw × 6)
    pub p_i1: DMatrix<f64>,
    /// Local → absolute rotation of the internal velocities (n_iw × n_iw)
    pub p_i2: DMatrix<f64>,
    /// `blockdiag(P_B2, I)` on boundary + modal coordinates
    pub p_w: DMatrix<f64>,
    /// Removes the rigid motion of F from the boundary coordinates
    pub y: DMatrix<f64>,
    /// `[[S, 0], [0, I]]`, (6 + n_m) × (n_bw + n_m)
    pub u: DMatrix<f64>,
}

/// Rows of `[I, -skew(r - r_F)·R_F; 0, Rᵗ·R_F]` for one block; 3-DOF
/// blocks keep the translational rows only.
fn rigid_rows(block: &BlockPose, frame: &FrameMoving) -> DMatrix<f64> {
    let r_f = frame.rotation_matrix();
    let n = block.kind.coords_w();
    let mut rows = DMatrix::zeros(n, 6);
    rows.fixed_view_mut::<3, 3>(0, 0).copy_from(&Matrix3::identity());
    rows.fixed_view_mut::<3, 3>(0, 3)
        .copy_from(&(-skew(&(block.pose.pos - frame.pos)) * r_f));
    if block.kind == BlockKind::Frame {
        rows.fixed_view_mut::<3, 3>(3, 3)
            .copy_from(&(block.pose.rotation_matrix().transpose() * r_f));
    }
    rows
}

fn partition_size(blocks: &[BlockPose]) -> usize {
    blocks
        .iter()
        .map(|b| b.offset_w + b.kind.coords_w())
        .max()
        .unwrap_or(0)
}

fn rigid_matrix(blocks: &[BlockPose], frame: &FrameMoving) -> DMatrix<f64> {
    let mut p = DMatrix::zeros(partition_size(blocks), 6);
    for block in blocks {
        let rows = rigid_rows(block, frame);
        p.view_mut((block.offset_w, 0), (rows.nrows(), 6)).copy_from(&rows);
    }
    p
}

fn rotation_matrix(blocks: &[BlockPose], frame: &FrameMoving) -> DMatrix<f64> {
    let r_f = frame.rotation_matrix();
    let n = partition_size(blocks);
    let mut p = DMatrix::identity(n, n);
    for block in blocks {
        p.fixed_view_mut::<3, 3>(block.offset_w, block.offset_w).copy_from(&r_f);
    }
    p
}

impl FrameTransforms {
    pub fn build(
        frame: &FrameMoving,
        selection: &DMatrix<f64>,
        boundary: &[BlockPose],
        internal: &[BlockPose],
        n_modes: usize,
    ) -> Self {
        let p_b1 = rigid_matrix(boundary, frame);
        let p_b2 = rotation_matrix(boundary, frame);
        let p_i1 = rigid_matrix(internal, frame);
        let p_i2 = rotation_matrix(internal, frame);

        let n_bw = p_b2.nrows();
        let n = n_bw + n_modes;

        let mut p_w = DMatrix::identity(n, n);
        p_w.view_mut((0, 0), (n_bw, n_bw)).copy_from(&p_b2);

        let mut y = DMatrix::identity(n, n);
        let rigid_free = DMatrix::identity(n_bw, n_bw) - &p_b1 * selection;
        y.view_mut((0, 0), (n_bw, n_bw))
            .copy_from(&(p_b2.transpose() * rigid_free));

        let mut u = DMatrix::zeros(6 + n_modes, n);
        u.view_mut((0, 0), (6, n_bw)).copy_from(selection);
        u.view_mut((6, n_bw), (n_modes, n_modes)).fill_with_identity();

        Self {
            p_b1,
            p_b2,
            p_i1,
            p_i2,
            p_w,
            y,
            u,
        }
    }

    pub fn n_boundary_w(&self) -> usize {
        self.p_b2.nrows()
    }

    pub fn n_modes(&self) -> usize {
        self.u.nrows() - 6
    }
}

/// Sparse `P_BI`: `R_F` on the translational 3×3 block of every block,
/// identity elsewhere. Blocks must cover `0..n` contiguously.
pub fn local_basis(blocks: &[BlockPose], n: usize, frame: &FrameMoving) -> CsrMatrix<f64> {
    let r_f = frame.rotation_matrix();
    let mut coo = CooMatrix::new(n, n);
    for block in blocks {
        let o = block.offset_w;
        for i in 0..3 {
            for j in 0..3 {
                if r_f[(i, j)] != 0.0 {
                    coo.push(o + i, o + j, r_f[(i, j)]);
                }
            }
        }
        for k in 3..block.kind.coords_w() {
            coo.push(o + k, o + k, 1.0);
        }
    }
    CsrMatrix::from(&coo)
}

/// `P_BIᵗ·A·P_BI`.
pub fn to_local(matrix: &CsrMatrix<f64>, basis: &CsrMatrix<f64>) -> CsrMatrix<f64> {
    let basis_t = basis.transpose();
    &(&basis_t * matrix) * basis
}

/// `Cq·P_BI`.
pub fn constraints_to_local(cq: &CsrMatrix<f64>, basis: &CsrMatrix<f64>) -> CsrMatrix<f64> {
    cq * basis
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use modal_model::descriptor::csr_to_dense;
    use nalgebra::{DVector, UnitQuaternion, Vector3};

    fn frame_at(pos: Vector3<f64>, rot: UnitQuaternion<f64>) -> FrameMoving {
        FrameMoving::new(pos, rot)
    }

    #[test]
    fn rigid_motion_of_frame_moves_boundary_point() {
        let frame = frame_at(Vector3::zeros(), UnitQuaternion::identity());
        let block = BlockPose {
            kind: BlockKind::Frame,
            offset_w: 0,
            pose: Pose::new(Vector3::new(1.0, 0.0, 0.0), UnitQuaternion::identity()),
        };
        let p = rigid_matrix(&[block], &frame);
        // Spin of F about z: the point at x=1 moves along +y
        let v = &p * DVector::from_vec(vec![0.0, 0.0, 0.0, 0.0, 0.0, 1.0]);
        assert_relative_eq!(v[1], 1.0, epsilon = 1e-12);
        assert_relative_eq!(v[5], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn point_blocks_keep_translational_rows() {
        let frame = frame_at(Vector3::zeros(), UnitQuaternion::identity());
        let blocks = [
            BlockPose {
                kind: BlockKind::Point,
                offset_w: 0,
                pose: Pose::default(),
            },
            BlockPose {
                kind: BlockKind::Frame,
                offset_w: 3,
                pose: Pose::default(),
            },
        ];
        assert_eq!(rigid_matrix(&blocks, &frame).shape(), (9, 6));
        assert_eq!(rotation_matrix(&blocks, &frame).shape(), (9, 9));
    }

    #[test]
    fn y_removes_frame_motion() {
        let frame = frame_at(Vector3::new(0.5, 0.0, 0.0), UnitQuaternion::from_euler_angles(0.0, 0.0, 0.4));
        let boundary = [
            BlockPose {
                kind: BlockKind::Frame,
                offset_w: 0,
                pose: Pose::new(Vector3::zeros(), frame.rot),
            },
            BlockPose {
                kind: BlockKind::Frame,
                offset_w: 6,
                pose: Pose::new(Vector3::new(1.0, 0.0, 0.0), frame.rot),
            },
        ];
        let s = crate::selection::selection_matrix(&DVector::from_vec(vec![0.5, 0.5]));
        let t = FrameTransforms::build(&frame, &s, &boundary, &[], 2);
        assert_eq!(t.y.shape(), (14, 14));
        assert_eq!(t.u.shape(), (8, 14));

        // A rigid velocity of the whole boundary gives no deformation
        let w = DVector::from_vec(vec![0.1, -0.2, 0.3, 0.0, 0.0, 0.7]);
        let mut v = DVector::zeros(14);
        v.rows_mut(0, 12).copy_from(&(&t.p_b1 * &w));
        let deformation = &t.y * v;
        assert!(deformation.norm() < 1e-12);
    }

    #[test]
    fn local_basis_is_a_rotation() {
        let frame = frame_at(Vector3::zeros(), UnitQuaternion::from_euler_angles(0.3, -0.2, 0.1));
        let blocks = [
            BlockPose {
                kind: BlockKind::Frame,
                offset_w: 0,
                pose: Pose::default(),
            },
            BlockPose {
                kind: BlockKind::Point,
                offset_w: 6,
                pose: Pose::default(),
            },
        ];
        let p = csr_to_dense(&local_basis(&blocks, 9, &frame));
        assert_relative_eq!(p.transpose() * &p, DMatrix::identity(9, 9), epsilon = 1e-12);
        assert_relative_eq!(p[(3, 3)], 1.0);
    }
}
