//! Selection matrix: how the floating frame follows the boundary.
//!
//! The frame is a weighted blend `F = S·x_B` of the boundary frames, with one
//! weight α_i per boundary frame. The weights are the least-squares solution
//! of `Σ α_i·p_i = com` subject to `Σ α_i = 1`, so at the reduction
//! configuration the frame origin sits as close as the boundary allows to
//! the center of mass of the whole assembly.

use nalgebra::{DMatrix, DVector, Matrix3, Vector3};

use crate::error::{ModalError, Result};

const PSEUDO_INVERSE_EPS: f64 = 1e-12;

/// Weights α of the boundary frames located at `positions`.
///
/// Solves the bordered normal equations
/// `[PᵗP 1; 1ᵗ 0]·[α; μ] = [Pᵗ·com; 1]` with an SVD pseudo-inverse, which
/// also covers coincident or collinear boundary frames.
pub fn selection_weights(positions: &[Vector3<f64>], com: &Vector3<f64>) -> Result<DVector<f64>> {
    let n = positions.len();
    if n == 0 {
        return Err(ModalError::Configuration(
            "a floating frame needs at least one boundary frame".into(),
        ));
    }

    let mut a = DMatrix::zeros(n + 1, n + 1);
    let mut rhs = DVector::zeros(n + 1);
    for i in 0..n {
        for j in 0..n {
            a[(i, j)] = positions[i].dot(&positions[j]);
        }
        a[(i, n)] = 1.0;
        a[(n, i)] = 1.0;
        rhs[i] = positions[i].dot(com);
    }
    rhs[n] = 1.0;

    let solution = a
        .svd(true, true)
        .solve(&rhs, PSEUDO_INVERSE_EPS)
        .map_err(|e| ModalError::Configuration(format!("selection weights: {e}")))?;
    Ok(solution.rows(0, n).into_owned())
}

/// `S` (6 × 6n): `α_i·I₃` on the translational and on the rotational
/// diagonal block of boundary frame `i`.
pub fn selection_matrix(weights: &DVector<f64>) -> DMatrix<f64> {
    let n = weights.len();
    let mut s = DMatrix::zeros(6, 6 * n);
    for (i, alpha) in weights.iter().enumerate() {
        let block = Matrix3::identity() * *alpha;
        s.fixed_view_mut::<3, 3>(0, 6 * i).copy_from(&block);
        s.fixed_view_mut::<3, 3>(3, 6 * i + 3).copy_from(&block);
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn single_frame_gets_full_weight() {
        let w = selection_weights(&[Vector3::new(3.0, -1.0, 2.0)], &Vector3::zeros()).unwrap();
        assert_relative_eq!(w[0], 1.0, epsilon = 1e-10);
    }

    #[test]
    fn weights_sum_to_one_and_hit_reachable_center() {
        let positions = [Vector3::new(0.0, 0.0, 0.0), Vector3::new(2.0, 0.0, 0.0)];
        let com = Vector3::new(0.5, 0.0, 0.0);
        let w = selection_weights(&positions, &com).unwrap();
        assert_relative_eq!(w.sum(), 1.0, epsilon = 1e-10);
        let blended = positions[0] * w[0] + positions[1] * w[1];
        assert_relative_eq!(blended, com, epsilon = 1e-10);
    }

    #[test]
    fn coincident_frames_share_weight() {
        let p = Vector3::new(1.0, 1.0, 0.0);
        let w = selection_weights(&[p, p], &Vector3::zeros()).unwrap();
        assert_relative_eq!(w.sum(), 1.0, epsilon = 1e-10);
        assert_relative_eq!(w[0], w[1], epsilon = 1e-10);
    }

    #[test]
    fn matrix_places_weights_on_diagonal_blocks() {
        let s = selection_matrix(&DVector::from_vec(vec![0.25, 0.75]));
        assert_eq!(s.shape(), (6, 12));
        assert_eq!(s[(0, 0)], 0.25);
        assert_eq!(s[(5, 5)], 0.25);
        assert_eq!(s[(1, 7)], 0.75);
        assert_eq!(s[(4, 10)], 0.75);
        assert_eq!(s[(0, 3)], 0.0);
    }

    #[test]
    fn empty_boundary_is_rejected() {
        assert!(selection_weights(&[], &Vector3::zeros()).is_err());
    }
}
