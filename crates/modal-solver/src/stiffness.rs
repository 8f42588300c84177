//! Elastic terms of a reduced model on a moving floating frame.
//!
//! The elastic displacement `displ_loc` of every boundary frame is measured
//! relative to F and compared with the same quantity at the reduction
//! configuration. Projected through `Y`, `K_red` gives the material stiffness
//! `Km_sup`. The elastic forces `g_loc`, rotated with F, add the geometric
//! stiffness `Kg_sup`.

use nalgebra::{DMatrix, DVector, Matrix3, Vector3};

use modal_model::frame::{rotation_vector, skew};
use modal_model::{FrameMoving, Pose};

use crate::transforms::FrameTransforms;

#[derive(Debug, Clone, PartialEq)]
pub struct StiffnessTerms {
    pub displ_loc: DVector<f64>,
    /// `K_red·displ_loc`
    pub g_loc: DVector<f64>,
    pub km_sup: DMatrix<f64>,
    pub kg_sup: DMatrix<f64>,
    pub rm_sup: DMatrix<f64>,
}

/// Reference data of the reduction.
pub struct ElasticReference<'a> {
    pub frame0: &'a Pose,
    /// Boundary frame poses at the reduction configuration
    pub boundary0: &'a [Pose],
    pub selection: &'a DMatrix<f64>,
}

/// Elastic displacement of boundary frames plus modal coordinates.
pub fn local_displacement(
    frame: &FrameMoving,
    reference: &ElasticReference<'_>,
    boundary: &[Pose],
    modal_q: &DVector<f64>,
) -> DVector<f64> {
    let nb = 6 * boundary.len();
    let mut displ = DVector::zeros(nb + modal_q.len());
    displ.rows_mut(nb, modal_q.len()).copy_from(modal_q);

    let r_f = frame.rotation_matrix();
    let r_f0 = reference.frame0.rotation_matrix();
    let theta_f = rotation_vector(&(reference.frame0.rot.inverse() * frame.rot));
    for (i, (pose, pose0)) in boundary.iter().zip(reference.boundary0).enumerate() {
        let trans = r_f.transpose() * (pose.pos - frame.pos) - r_f0.transpose() * (pose0.pos - reference.frame0.pos);
        let rot = rotation_vector(&(pose0.rot.inverse() * pose.rot))
            - pose.rotation_matrix().transpose() * (r_f * theta_f);
        displ.fixed_rows_mut::<3>(6 * i).copy_from(&trans);
        displ.fixed_rows_mut::<3>(6 * i + 3).copy_from(&rot);
    }
    displ
}

pub fn stiffness_terms(
    k_red: &DMatrix<f64>,
    r_red: &DMatrix<f64>,
    transforms: &FrameTransforms,
    frame: &FrameMoving,
    reference: &ElasticReference<'_>,
    boundary: &[Pose],
    modal_q: &DVector<f64>,
) -> StiffnessTerms {
    let displ_loc = local_displacement(frame, reference, boundary, modal_q);
    let g_loc = k_red * &displ_loc;
    let y = &transforms.y;
    let y_t = y.transpose();
    let km_sup = &y_t * k_red * y;
    let rm_sup = &y_t * r_red * y;

    let nb = transforms.n_boundary_w();
    let n = k_red.nrows();
    let r_f = frame.rotation_matrix();
    let mut xi_f1 = Matrix3::zeros();
    let mut xi_f3 = Matrix3::zeros();
    let mut xi_h = DMatrix::zeros(6, nb);
    let mut xi_v = DMatrix::zeros(nb, 6);
    for (i, pose) in boundary.iter().enumerate() {
        let o = 6 * i;
        let f = Vector3::new(g_loc[o], g_loc[o + 1], g_loc[o + 2]);
        let m = Vector3::new(g_loc[o + 3], g_loc[o + 4], g_loc[o + 5]);
        let r_b = pose.rotation_matrix();
        xi_f1 += r_f * skew(&f);
        xi_f3 += skew(&f) * r_f.transpose() * skew(&(pose.pos - frame.pos)) * r_f - skew(&(r_f.transpose() * (r_b * m)));
        xi_h.fixed_view_mut::<3, 3>(3, o)
            .copy_from(&(skew(&f) * r_f.transpose()));
        xi_h.fixed_view_mut::<3, 3>(3, o + 3)
            .copy_from(&(r_f.transpose() * r_b * skew(&m)));
        xi_v.fixed_view_mut::<3, 3>(o, 3).copy_from(&(-r_f * skew(&f)));
    }
    let mut xi_f = DMatrix::zeros(6, 6);
    xi_f.fixed_view_mut::<3, 3>(0, 3).copy_from(&xi_f1);
    xi_f.fixed_view_mut::<3, 3>(3, 0).copy_from(&xi_f1.transpose());
    xi_f.fixed_view_mut::<3, 3>(3, 3).copy_from(&xi_f3);

    let s = reference.selection;
    let mut kg_sup = DMatrix::zeros(n, n);
    kg_sup
        .view_mut((0, 0), (nb, nb))
        .copy_from(&(s.transpose() * &xi_f * s + s.transpose() * &xi_h + &xi_v * s));

    StiffnessTerms {
        displ_loc,
        g_loc,
        km_sup,
        kg_sup,
        rm_sup,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::selection_matrix;
    use crate::transforms::BlockPose;
    use approx::assert_relative_eq;
    use modal_model::BlockKind;
    use nalgebra::UnitQuaternion;

    #[test]
    fn rigid_motion_produces_no_elastic_displacement() {
        let p0 = [
            Pose::new(Vector3::new(-1.0, 0.0, 0.0), UnitQuaternion::identity()),
            Pose::new(Vector3::new(1.0, 0.0, 0.0), UnitQuaternion::identity()),
        ];
        let frame0 = Pose::default();
        let s = selection_matrix(&DVector::from_vec(vec![0.5, 0.5]));

        // Rotate and translate everything together
        let q = UnitQuaternion::from_euler_angles(0.0, 0.0, 0.6);
        let shift = Vector3::new(3.0, -2.0, 1.0);
        let moved: Vec<Pose> = p0.iter().map(|p| Pose::new(q * p.pos + shift, q * p.rot)).collect();
        let frame = FrameMoving::new(shift, q);

        let reference = ElasticReference {
            frame0: &frame0,
            boundary0: &p0,
            selection: &s,
        };
        let displ = local_displacement(&frame, &reference, &moved, &DVector::zeros(1));
        assert!(displ.norm() < 1e-12);
    }

    #[test]
    fn stretch_gives_elastic_force() {
        let p0 = [
            Pose::new(Vector3::new(-1.0, 0.0, 0.0), UnitQuaternion::identity()),
            Pose::new(Vector3::new(1.0, 0.0, 0.0), UnitQuaternion::identity()),
        ];
        let frame0 = Pose::default();
        let s = selection_matrix(&DVector::from_vec(vec![0.5, 0.5]));
        let stretched = [
            Pose::new(Vector3::new(-1.1, 0.0, 0.0), UnitQuaternion::identity()),
            Pose::new(Vector3::new(1.1, 0.0, 0.0), UnitQuaternion::identity()),
        ];
        let frame = FrameMoving::default();
        let boundary: Vec<BlockPose> = stretched
            .iter()
            .enumerate()
            .map(|(i, p)| BlockPose {
                kind: BlockKind::Frame,
                offset_w: 6 * i,
                pose: *p,
            })
            .collect();
        let t = FrameTransforms::build(&frame, &s, &boundary, &[], 0);

        // Axial spring k between the two frames
        let k = 100.0;
        let mut k_red = DMatrix::zeros(12, 12);
        k_red[(0, 0)] = k;
        k_red[(6, 6)] = k;
        k_red[(0, 6)] = -k;
        k_red[(6, 0)] = -k;
        let reference = ElasticReference {
            frame0: &frame0,
            boundary0: &p0,
            selection: &s,
        };
        let terms = stiffness_terms(&k_red, &DMatrix::zeros(12, 12), &t, &frame, &reference, &stretched, &DVector::zeros(0));
        assert_relative_eq!(terms.g_loc[0], -20.0, epsilon = 1e-9);
        assert_relative_eq!(terms.g_loc[6], 20.0, epsilon = 1e-9);
        assert_relative_eq!(terms.km_sup[(0, 0)], k, epsilon = 1e-9);
        assert_eq!(terms.kg_sup.shape(), (12, 12));
    }
}
