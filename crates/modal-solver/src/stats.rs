//! Timings and diagnostics of one reduction.

use std::fmt;
use std::time::Duration;

/// Wall-clock breakdown and quality figures of a committed reduction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReductionStats {
    /// `setup_initial` + `setup` of the full assembly
    pub setup: Duration,
    /// Full matrices, floating frame and change of basis
    pub assembly: Duration,
    pub eigen: Duration,
    /// Static/dynamic modes and reduced matrices
    pub reduction: Duration,
    /// Relative internal force of the six rigid motions, see
    /// [`rigid_mode_residual`](crate::reduction::rigid_mode_residual)
    pub rigid_mode_residual: f64,
    pub n_modes: usize,
    pub n_boundary_w: usize,
    pub n_internal_w: usize,
    pub solver_name: String,
}

impl ReductionStats {
    pub fn total(&self) -> Duration {
        self.setup + self.assembly + self.eigen + self.reduction
    }

    /// Size of the reduced velocity vector.
    pub fn reduced_size(&self) -> usize {
        self.n_boundary_w + self.n_modes
    }
}

impl fmt::Display for ReductionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} + {} DOF -> {} + {} modes in {:.3?} (setup {:.3?}, assembly {:.3?}, eigen {:.3?} [{}], reduction {:.3?}), rigid residual {:.3e}",
            self.n_boundary_w,
            self.n_internal_w,
            self.n_boundary_w,
            self.n_modes,
            self.total(),
            self.setup,
            self.assembly,
            self.eigen,
            self.solver_name,
            self.reduction,
            self.rigid_mode_residual
        )
    }
}
