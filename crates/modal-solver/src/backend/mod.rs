//! Numerical backend abstraction layer.
//!
//! This module provides trait-based interfaces for the bordered linear solve
//! and the constrained eigen solves, so the modal assembly and the time
//! stepper stay backend-agnostic.
//!
//! # Backends
//!
//! - **Native** (default): pure nalgebra. Dense LU, Cholesky-transformed
//!   symmetric eigen solve, Schur decomposition for the damped problem.
//! - **LAPACK** (optional, `--features lapack`): same pipeline with the
//!   symmetric eigen step delegated to nalgebra-lapack.
//!
//! # Architecture
//!
//! ```text
//! Items (nalgebra DMatrix blocks)
//!         │
//!         ▼
//! SystemDescriptor (COO → CSR)
//!         │
//!         ▼
//! Backend Trait Layer (LinearSolver, EigenSolver)
//!    ┌────┴────┐
//!    ▼         ▼
//! Native    LAPACK
//! Backend   Backend
//! ```

mod generalized;
#[cfg(feature = "lapack")]
pub mod lapack;
pub mod native;
pub mod traits;

#[cfg(feature = "lapack")]
pub use lapack::LapackBackend;
pub use native::NativeBackend;
pub use traits::*;

/// Returns the default solver backend based on enabled features.
///
/// With `--features lapack`: returns `LapackBackend`.
/// Without: returns `NativeBackend`.
pub fn default_backend() -> Box<dyn SolverBackend> {
    #[cfg(feature = "lapack")]
    {
        Box::new(LapackBackend)
    }
    #[cfg(not(feature = "lapack"))]
    {
        Box::new(NativeBackend)
    }
}
