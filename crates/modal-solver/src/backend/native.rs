//! Native backend using nalgebra only.
//!
//! This is the default backend. It supports:
//! - Dense LU decomposition of the bordered (KKT) step system
//! - Cholesky-transformed SymmetricEigen for the undamped modes
//! - Schur decomposition plus inverse iteration for the damped modes

use super::generalized;
use super::traits::*;
use crate::config::{ModalSolveDamped, ModalSolveUndamped};
use crate::modes::ModeSet;
use nalgebra::{DMatrix, DVector, SymmetricEigen};

/// Native solver backend using nalgebra for all numerical operations.
///
/// Suitable for reduced models and small-to-medium full assemblies.
pub struct NativeBackend;

pub(crate) fn symmetric_kernel(matrix: DMatrix<f64>) -> Option<(DVector<f64>, DMatrix<f64>)> {
    SymmetricEigen::try_new(matrix, f64::EPSILON, 0).map(|e| (e.eigenvalues, e.eigenvectors))
}

/// Dense `[H Cqᵗ; Cq 0]` and `[rhs; constraint_rhs]`.
pub(crate) fn bordered_dense(system: &LinearSystemData) -> (DMatrix<f64>, DVector<f64>) {
    let n = system.num_dofs;
    let nc = system.constraint_jacobian.nrows;
    let mut kkt = DMatrix::zeros(n + nc, n + nc);
    for k in 0..system.matrix.nnz() {
        kkt[(system.matrix.row_indices[k], system.matrix.col_indices[k])] += system.matrix.values[k];
    }
    let cq = &system.constraint_jacobian;
    for k in 0..cq.nnz() {
        let (i, j) = (cq.row_indices[k], cq.col_indices[k]);
        kkt[(n + i, j)] += cq.values[k];
        kkt[(j, n + i)] += cq.values[k];
    }
    let mut rhs = DVector::zeros(n + nc);
    rhs.rows_mut(0, n).copy_from(&system.rhs);
    rhs.rows_mut(n, nc).copy_from(&system.constraint_rhs);
    (kkt, rhs)
}

impl LinearSolver for NativeBackend {
    fn solve_linear(
        &self,
        system: &LinearSystemData,
    ) -> Result<(DVector<f64>, SolveInfo), BackendError> {
        let (kkt, rhs) = bordered_dense(system);

        // LU decomposition and solve
        let u = kkt
            .clone()
            .lu()
            .solve(&rhs)
            .ok_or(BackendError("Singular matrix in LU decomposition".into()))?;
        let residual = (&kkt * &u - &rhs).norm();

        Ok((
            u,
            SolveInfo {
                iterations: 1,
                residual_norm: Some(residual),
                solver_name: "nalgebra-LU".to_string(),
            },
        ))
    }
}

impl EigenSolver for NativeBackend {
    fn solve_undamped(
        &self,
        system: &EigenSystemData,
        settings: &ModalSolveUndamped,
    ) -> Result<(ModeSet, SolveInfo), BackendError> {
        generalized::solve_undamped(
            system,
            settings,
            &symmetric_kernel,
            "nalgebra-Cholesky+SymmetricEigen",
        )
    }

    fn solve_damped(
        &self,
        system: &EigenSystemData,
        settings: &ModalSolveDamped,
    ) -> Result<(ModeSet, SolveInfo), BackendError> {
        generalized::solve_damped(system, settings, &symmetric_kernel, "nalgebra")
    }
}

impl SolverBackend for NativeBackend {
    fn name(&self) -> &str {
        "native-nalgebra"
    }
}
