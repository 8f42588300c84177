//! Backend trait definitions for the numerical kernels.
//!
//! These traits abstract over the library used for the global operations of
//! a modal assembly: the bordered linear solve of a time step and the
//! constrained eigen solves that produce the mode set. Block-level algebra
//! (frame transforms, skew blocks) stays in nalgebra.

use nalgebra::DVector;
use nalgebra_sparse::CsrMatrix;

use crate::config::{ModalSolveDamped, ModalSolveUndamped};
use crate::modes::ModeSet;

/// Error type for backend operations.
#[derive(Debug, Clone)]
pub struct BackendError(pub String);

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for BackendError {}

impl From<String> for BackendError {
    fn from(s: String) -> Self {
        BackendError(s)
    }
}

impl From<&str> for BackendError {
    fn from(s: &str) -> Self {
        BackendError(s.to_string())
    }
}

/// Sparse matrix in COO (coordinate/triplet) format.
///
/// This is the interchange format between the assembly layer and a solver
/// backend.
#[derive(Debug, Clone, Default)]
pub struct SparseTripletsF64 {
    pub nrows: usize,
    pub ncols: usize,
    pub row_indices: Vec<usize>,
    pub col_indices: Vec<usize>,
    pub values: Vec<f64>,
}

impl SparseTripletsF64 {
    /// Number of non-zero entries.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    pub fn zeros(nrows: usize, ncols: usize) -> Self {
        Self {
            nrows,
            ncols,
            ..Default::default()
        }
    }

    pub fn from_csr(matrix: &CsrMatrix<f64>) -> Self {
        let mut triplets = Self::zeros(matrix.nrows(), matrix.ncols());
        for (i, j, v) in matrix.triplet_iter() {
            triplets.row_indices.push(i);
            triplets.col_indices.push(j);
            triplets.values.push(*v);
        }
        triplets
    }

    /// Dense copy; duplicate entries are summed.
    pub fn to_dense(&self) -> nalgebra::DMatrix<f64> {
        let mut dense = nalgebra::DMatrix::zeros(self.nrows, self.ncols);
        for k in 0..self.nnz() {
            dense[(self.row_indices[k], self.col_indices[k])] += self.values[k];
        }
        dense
    }
}

/// A bordered linear system `[H Cqᵗ; Cq 0]·[v; -λ] = [r; -qc]`.
///
/// Produced by a time stepper, consumed by any `LinearSolver` backend.
pub struct LinearSystemData {
    /// `H = Mf·M + Rf·R + Kf·K`, square in velocity coordinates
    pub matrix: SparseTripletsF64,
    /// Constraint Jacobian, `n_constraints × num_dofs`
    pub constraint_jacobian: SparseTripletsF64,
    /// Right-hand side of the velocity rows
    pub rhs: DVector<f64>,
    /// Right-hand side of the constraint rows (`-qc`)
    pub constraint_rhs: DVector<f64>,
    pub num_dofs: usize,
}

/// A constrained eigen system `(λ²·M + λ·R + K)·v = 0`, `Cq·v = 0`.
///
/// `damping` is ignored by the undamped solve.
pub struct EigenSystemData {
    pub stiffness: SparseTripletsF64,
    pub mass: SparseTripletsF64,
    pub damping: Option<SparseTripletsF64>,
    pub constraint_jacobian: SparseTripletsF64,
    pub num_dofs: usize,
}

/// Solver convergence and diagnostic info.
#[derive(Debug, Clone)]
pub struct SolveInfo {
    /// Number of iterations (1 for direct solvers)
    pub iterations: usize,
    /// Final residual norm (if available)
    pub residual_norm: Option<f64>,
    /// Human-readable solver name (e.g., "nalgebra-LU")
    pub solver_name: String,
}

/// Trait for a linear solver backend.
pub trait LinearSolver: Send + Sync {
    /// Solve the bordered system and return `[v; -λ]`.
    fn solve_linear(
        &self,
        system: &LinearSystemData,
    ) -> Result<(DVector<f64>, SolveInfo), BackendError>;
}

/// Trait for a constrained eigen solver backend.
pub trait EigenSolver: Send + Sync {
    /// `K·v = λ·M·v` restricted to `Cq·v = 0`, modes mass-normalized.
    fn solve_undamped(
        &self,
        system: &EigenSystemData,
        settings: &ModalSolveUndamped,
    ) -> Result<(ModeSet, SolveInfo), BackendError>;

    /// Quadratic problem with damping, one mode per conjugate pair.
    fn solve_damped(
        &self,
        system: &EigenSystemData,
        settings: &ModalSolveDamped,
    ) -> Result<(ModeSet, SolveInfo), BackendError>;
}

/// Combined backend providing both linear and eigenvalue solvers.
pub trait SolverBackend: LinearSolver + EigenSolver {
    /// Human-readable name of this backend.
    fn name(&self) -> &str;
}
