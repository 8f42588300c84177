//! Backend delegating the dense symmetric eigen kernel to LAPACK.
//!
//! Constraint elimination, the damped companion solve and the bordered
//! linear solve are shared with the native backend.

use super::generalized;
use super::native::{NativeBackend, symmetric_kernel};
use super::traits::*;
use crate::config::{ModalSolveDamped, ModalSolveUndamped};
use crate::modes::ModeSet;
use nalgebra::{DMatrix, DVector};
use nalgebra_lapack::SymmetricEigen;

pub struct LapackBackend;

fn lapack_kernel(matrix: DMatrix<f64>) -> Option<(DVector<f64>, DMatrix<f64>)> {
    let n = matrix.nrows();
    if n == 0 {
        return symmetric_kernel(matrix);
    }
    SymmetricEigen::try_new(matrix).map(|e| (e.eigenvalues, e.eigenvectors))
}

impl LinearSolver for LapackBackend {
    fn solve_linear(
        &self,
        system: &LinearSystemData,
    ) -> Result<(DVector<f64>, SolveInfo), BackendError> {
        NativeBackend.solve_linear(system)
    }
}

impl EigenSolver for LapackBackend {
    fn solve_undamped(
        &self,
        system: &EigenSystemData,
        settings: &ModalSolveUndamped,
    ) -> Result<(ModeSet, SolveInfo), BackendError> {
        generalized::solve_undamped(system, settings, &lapack_kernel, "lapack-dsyev")
    }

    fn solve_damped(
        &self,
        system: &EigenSystemData,
        settings: &ModalSolveDamped,
    ) -> Result<(ModeSet, SolveInfo), BackendError> {
        generalized::solve_damped(system, settings, &lapack_kernel, "lapack-dsyev")
    }
}

impl SolverBackend for LapackBackend {
    fn name(&self) -> &str {
        "lapack"
    }
}
