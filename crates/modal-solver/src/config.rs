//! Settings for eigen solves, reduction, dumps and time stepping.

use serde::{Deserialize, Serialize};

/// Settings of the undamped constrained eigen solve `K·v = λ·M·v`, `Cq·v = 0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModalSolveUndamped {
    /// Number of modes to return
    pub n_modes: usize,
    /// Modes are sorted by the distance of λ from `(2π·base_freq)²` (Hz)
    pub base_freq: f64,
    pub tolerance: f64,
    pub max_iterations: usize,
    pub verbose: bool,
}

impl Default for ModalSolveUndamped {
    fn default() -> Self {
        Self {
            n_modes: 10,
            base_freq: 0.0,
            tolerance: 1e-10,
            max_iterations: 500,
            verbose: false,
        }
    }
}

impl ModalSolveUndamped {
    pub fn new(n_modes: usize) -> Self {
        Self {
            n_modes,
            ..Default::default()
        }
    }

    pub fn with_base_freq(mut self, base_freq: f64) -> Self {
        self.base_freq = base_freq;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// `(2π·base_freq)²`, the eigenvalue modes are sorted around.
    pub fn target_eigenvalue(&self) -> f64 {
        (2.0 * std::f64::consts::PI * self.base_freq).powi(2)
    }
}

/// Settings of the damped (quadratic) eigen solve
/// `(λ²·M + λ·R + K)·v = 0`, `Cq·v = 0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModalSolveDamped {
    pub n_modes: usize,
    /// Modes are sorted by the distance of |λ| from `2π·base_freq`
    pub base_freq: f64,
    pub tolerance: f64,
    pub max_iterations: usize,
    pub verbose: bool,
}

impl Default for ModalSolveDamped {
    fn default() -> Self {
        Self {
            n_modes: 10,
            base_freq: 0.0,
            tolerance: 1e-10,
            max_iterations: 500,
            verbose: false,
        }
    }
}

impl ModalSolveDamped {
    pub fn new(n_modes: usize) -> Self {
        Self {
            n_modes,
            ..Default::default()
        }
    }

    pub fn with_base_freq(mut self, base_freq: f64) -> Self {
        self.base_freq = base_freq;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModalAssemblyConfig {
    /// Reconstruct internal items from the modal coordinates at every update
    pub internal_nodes_update: bool,
    /// Relative residual above which the rigid-mode check warns
    pub rigid_mode_tolerance: f64,
    pub verbose: bool,
}

impl Default for ModalAssemblyConfig {
    fn default() -> Self {
        Self {
            internal_nodes_update: true,
            rigid_mode_tolerance: 1e-6,
            verbose: false,
        }
    }
}

/// Which matrices `dump_subassembly_matrices` writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DumpFlags {
    pub mass: bool,
    pub stiffness: bool,
    pub damping: bool,
    pub constraint_jacobian: bool,
}

impl DumpFlags {
    pub const ALL: DumpFlags = DumpFlags {
        mass: true,
        stiffness: true,
        damping: true,
        constraint_jacobian: true,
    };
}

impl Default for DumpFlags {
    fn default() -> Self {
        Self::ALL
    }
}

/// Linearized implicit Euler settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EulerImplicitConfig {
    /// Time step size
    pub step: f64,
    /// Maximum constraint stabilization speed `|C/h|`
    pub recovery_clamp: f64,
}

impl Default for EulerImplicitConfig {
    fn default() -> Self {
        Self {
            step: 1e-3,
            recovery_clamp: 0.1,
        }
    }
}

impl EulerImplicitConfig {
    pub fn new(step: f64) -> Self {
        Self {
            step,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_eigenvalue_matches_circular_frequency() {
        let settings = ModalSolveUndamped::new(4).with_base_freq(1.0);
        let w = 2.0 * std::f64::consts::PI;
        assert!((settings.target_eigenvalue() - w * w).abs() < 1e-12);
        assert_eq!(ModalSolveUndamped::default().target_eigenvalue(), 0.0);
    }

    #[test]
    fn defaults_keep_internal_nodes_updated() {
        let config = ModalAssemblyConfig::default();
        assert!(config.internal_nodes_update);
        assert_eq!(DumpFlags::default(), DumpFlags::ALL);
    }
}
