//! Linearized implicit Euler stepper over the [`Integrable`] protocol.
//!
//! One step solves the bordered velocity-level system
//!
//! ```text
//! [ M + h·R + h²·K   Cqᵗ ] [ v_new ]   [ h·F + M·v              ]
//! [ Cq               0   ] [ -h·λ  ] = [ -(clamp(C/h) + Ct)     ]
//! ```
//!
//! then advances `x_new = x ⊕ h·v_new`. Full and reduced modal assemblies
//! are stepped the same way: the system decides which matrices it injects.

use nalgebra::DVector;
use tracing::debug;

use modal_model::{Integrable, SystemDescriptor};

use crate::backend::{LinearSystemData, SolveInfo, SolverBackend, SparseTripletsF64, default_backend};
use crate::config::EulerImplicitConfig;
use crate::error::{ModalError, Result};

pub struct EulerImplicitLinearized {
    config: EulerImplicitConfig,
    backend: Box<dyn SolverBackend>,
}

impl EulerImplicitLinearized {
    pub fn new(config: EulerImplicitConfig) -> Self {
        Self {
            config,
            backend: default_backend(),
        }
    }

    pub fn with_backend(mut self, backend: Box<dyn SolverBackend>) -> Self {
        self.backend = backend;
        self
    }

    pub fn config(&self) -> &EulerImplicitConfig {
        &self.config
    }

    /// Advances `system` by one step of `config.step`.
    pub fn step(&self, system: &mut dyn Integrable) -> Result<SolveInfo> {
        let h = self.config.step;
        if h <= 0.0 {
            return Err(ModalError::Configuration(format!("time step must be positive, got {h}")));
        }
        let n = system.n_coords_w();
        let nc = system.n_constraints();

        let mut x = DVector::zeros(system.n_coords());
        let mut v = DVector::zeros(n);
        let time = system.int_state_gather(0, &mut x, 0, &mut v);

        let mut rhs = DVector::zeros(n);
        system.int_load_residual_f(0, &mut rhs, h);
        system.int_load_residual_mv(0, &mut rhs, &v, 1.0);

        let mut qc = DVector::zeros(nc);
        system.int_load_constraint_c(0, &mut qc, 1.0 / h, true, self.config.recovery_clamp);
        system.int_load_constraint_ct(0, &mut qc, 1.0);

        system.krm_matrices_load(h * h, h, 1.0);
        let mut desc = SystemDescriptor::new();
        system.inject_variables(0, &mut desc);
        system.inject_krm_matrices(0, &mut desc);
        system.inject_constraints(0, 0, &mut desc);
        desc.set_mass_factor(1.0);

        let data = LinearSystemData {
            matrix: SparseTripletsF64::from_csr(&desc.system_matrix(n)),
            constraint_jacobian: SparseTripletsF64::from_csr(&desc.constraint_jacobian(nc, n)),
            rhs,
            constraint_rhs: -qc,
            num_dofs: n,
        };
        let (solution, info) = self.backend.solve_linear(&data)?;

        let v_new = solution.rows(0, n).into_owned();
        let reactions = solution.rows(n, nc) * (-1.0 / h);
        let acceleration = (&v_new - &v) / h;
        let mut x_new = x.clone();
        system.int_state_increment(0, &mut x_new, &x, 0, &(&v_new * h));

        // Accelerations first: the state scatter runs the update that
        // reconstructs internal items from them.
        system.int_state_scatter_acceleration(0, &acceleration);
        system.int_state_scatter(0, &x_new, 0, &v_new, time + h, true);
        system.int_state_scatter_reactions(0, &reactions);

        debug!(
            time = time + h,
            n_dofs = n,
            n_constraints = nc,
            residual = ?info.residual_norm,
            "implicit Euler step"
        );
        Ok(info)
    }

    /// Steps until `system.time()` reaches `end_time`.
    pub fn advance_to(&self, system: &mut dyn Integrable, end_time: f64) -> Result<usize> {
        let mut steps = 0;
        while system.time() + 0.5 * self.config.step <= end_time {
            self.step(system)?;
            steps += 1;
        }
        Ok(steps)
    }
}
