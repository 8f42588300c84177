//! The time-integration protocol every simulated system implements.
//!
//! Offsets passed to each hook locate the system inside the global state,
//! velocity and constraint vectors. A stepper only talks to this trait.

use nalgebra::DVector;

use crate::descriptor::SystemDescriptor;
use crate::state::{State, StateDelta};

pub trait Integrable {
    /// Number of position coordinates.
    fn n_coords(&self) -> usize;

    /// Number of velocity coordinates.
    fn n_coords_w(&self) -> usize;

    /// Number of bilateral constraint rows.
    fn n_constraints(&self) -> usize;

    fn time(&self) -> f64;

    /// Copies positions and velocities out. Returns the current time.
    fn int_state_gather(&self, off_x: usize, x: &mut State, off_v: usize, v: &mut StateDelta) -> f64;

    /// Copies positions and velocities in, then calls `update`.
    fn int_state_scatter(
        &mut self,
        off_x: usize,
        x: &State,
        off_v: usize,
        v: &StateDelta,
        time: f64,
        full_update: bool,
    );

    fn int_state_gather_acceleration(&self, off_a: usize, a: &mut StateDelta);

    fn int_state_scatter_acceleration(&mut self, off_a: usize, a: &StateDelta);

    fn int_state_gather_reactions(&self, off_l: usize, l: &mut DVector<f64>);

    fn int_state_scatter_reactions(&mut self, off_l: usize, l: &DVector<f64>);

    /// `x_new = x ⊕ dv`.
    fn int_state_increment(&self, off_x: usize, x_new: &mut State, x: &State, off_v: usize, dv: &StateDelta);

    /// `dv = x_new ⊖ x`.
    fn int_state_get_increment(
        &self,
        off_x: usize,
        x_new: &State,
        x: &State,
        off_v: usize,
        dv: &mut StateDelta,
    );

    /// `R += c·F`.
    fn int_load_residual_f(&self, off: usize, r: &mut DVector<f64>, c: f64);

    /// `R += c·M·w`.
    fn int_load_residual_mv(&self, off: usize, r: &mut DVector<f64>, w: &DVector<f64>, c: f64);

    /// `R += c·Cqᵗ·L`.
    fn int_load_residual_cql(
        &self,
        off_v: usize,
        off_l: usize,
        r: &mut DVector<f64>,
        l: &DVector<f64>,
        c: f64,
    );

    /// `Qc += c·C`, optionally clamped.
    fn int_load_constraint_c(
        &self,
        off_l: usize,
        qc: &mut DVector<f64>,
        c: f64,
        do_clamp: bool,
        recovery_clamp: f64,
    );

    /// `Qc += c·Ct`.
    fn int_load_constraint_ct(&self, off_l: usize, qc: &mut DVector<f64>, c: f64);

    fn inject_variables(&self, off_w: usize, desc: &mut SystemDescriptor);

    fn inject_constraints(&self, off_w: usize, off_l: usize, desc: &mut SystemDescriptor);

    /// Prepares the `Kf·K + Rf·R + Mf·M` blocks for `inject_krm_matrices`.
    fn krm_matrices_load(&mut self, kf: f64, rf: f64, mf: f64);

    fn inject_krm_matrices(&self, off_w: usize, desc: &mut SystemDescriptor);

    fn update(&mut self, full_update: bool);
}
