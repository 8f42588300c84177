//! Inertial terms of a reduced model on a moving floating frame.
//!
//! The reduced mass `M_red` lives in the local basis of F. Seen from the
//! absolute boundary coordinates it produces, besides `M_sup`, velocity- and
//! acceleration-dependent contributions: inertial damping `Ri_sup`, inertial
//! stiffness `Ki_sup` and the quadratic-velocity force `g_quad`.

use nalgebra::{DMatrix, DVector, Matrix3, Vector3};

use modal_model::FrameMoving;
use modal_model::frame::skew;

use crate::transforms::FrameTransforms;

#[derive(Debug, Clone, PartialEq)]
pub struct InertialTerms {
    pub m_sup: DMatrix<f64>,
    pub ri_sup: DMatrix<f64>,
    pub ki_sup: DMatrix<f64>,
    /// Quadratic-velocity force, subtracted from the residual
    pub g_quad: DVector<f64>,
}

fn segment(v: &DVector<f64>, start: usize) -> Vector3<f64> {
    Vector3::new(v[start], v[start + 1], v[start + 2])
}

fn put(m: &mut DMatrix<f64>, row: usize, col: usize, block: &Matrix3<f64>) {
    m.fixed_view_mut::<3, 3>(row, col).copy_from(block);
}

/// Computes the inertial terms for reduced velocities `v_mod` and
/// accelerations `a_mod` (boundary + modal, absolute/mixed basis).
pub fn inertial_terms(
    m_red: &DMatrix<f64>,
    transforms: &FrameTransforms,
    frame: &FrameMoving,
    v_mod: &DVector<f64>,
    a_mod: &DVector<f64>,
) -> InertialTerms {
    let nb = transforms.n_boundary_w();
    let nm = transforms.n_modes();
    let n = nb + nm;
    let p_w = &transforms.p_w;
    let p_w_t = p_w.transpose();
    let u = &transforms.u;
    let r_f_t = frame.rotation_matrix().transpose();
    let w_f = skew(&frame.wvel_loc);

    let mut v_mat = DMatrix::zeros(n, 6 + nm);
    let mut o_b = DMatrix::zeros(n, n);
    let mut o_f = DMatrix::zeros(n, n);
    for o in (0..nb).step_by(6) {
        put(&mut v_mat, o, 3, &skew(&(r_f_t * segment(v_mod, o))));
        put(&mut o_b, o + 3, o + 3, &skew(&segment(v_mod, o + 3)));
        put(&mut o_f, o, o, &w_f);
    }

    let momen = m_red * (&p_w_t * v_mod);
    let centr = m_red * (&p_w_t * a_mod);
    let momen_f = &o_f * &momen;
    let vu = &v_mat * u;
    let coriolis = m_red * (&vu * v_mod);

    let mut v_acc = DMatrix::zeros(n, 6 + nm);
    let mut v_rmom = DMatrix::zeros(n, 6 + nm);
    let mut v_f = DMatrix::zeros(n, 6 + nm);
    let mut o_thetamom = DMatrix::zeros(n, n);
    for o in (0..nb).step_by(6) {
        put(&mut v_acc, o, 3, &skew(&(r_f_t * segment(a_mod, o))));
        put(&mut v_rmom, o, 3, &skew(&segment(&momen, o)));
        put(&mut o_thetamom, o + 3, o + 3, &skew(&segment(&momen, o + 3)));
        let sum = skew(&segment(&centr, o)) + skew(&segment(&momen_f, o)) + skew(&segment(&coriolis, o));
        put(&mut v_f, o, 3, &sum);
    }

    let m_sup = p_w * m_red * &p_w_t;

    let of_m = &o_f * m_red - m_red * &o_f;
    let ob_m = &o_b * m_red;
    let ri_1 = p_w * (m_red * &v_mat - &v_rmom) * u;
    let ri_sup = p_w * &of_m * &p_w_t + &ri_1 - ri_1.transpose() + &ob_m * &p_w_t - &o_thetamom;

    let ki_sup = p_w * &of_m * &vu - vu.transpose() * m_red * &vu + &ob_m * &vu - p_w * &v_f * u
        + p_w * m_red * &v_acc * u
        + u.transpose() * v_rmom.transpose() * &vu;

    let pw_m_vu = p_w * m_red * &vu;
    let g_quad = (p_w * &o_f * m_red * &p_w_t + &ob_m * &p_w_t + &pw_m_vu - pw_m_vu.transpose()) * v_mod;

    InertialTerms {
        m_sup,
        ri_sup,
        ki_sup,
        g_quad,
    }
}
