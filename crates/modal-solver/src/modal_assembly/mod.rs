//! The modal assembly controller.
//!
//! A [`ModalAssembly`] wraps an [`Assembly`] whose items are tagged boundary
//! or internal, and runs in one of two states:
//!
//! - **Full**: every hook fans out to boundary and internal items.
//! - **Reduced**: after [`ModalAssembly::switch_modal_reduction_on`], the
//!   state is `[boundary; modal_q]`. Internal items are a derived quantity,
//!   expanded from the modal coordinates when `internal_nodes_update` is set.
//!
//! The transition is one-way. A reduction either commits a complete
//! [`ReducedModel`] or fails without touching the assembly.
//!
//! ```text
//! x = [ x_B (7 per frame) | modal_q ]      v = [ v_B (6 per frame) | modal_q_dt ]
//! ```

mod persist;
mod reduce;
mod state;

pub use reduce::ModalMatrices;

use nalgebra::{DVector, Matrix3, Vector3};
use nalgebra_sparse::CsrMatrix;
use tracing::{debug, warn};

use modal_model::descriptor::dense_to_csr;
use modal_model::{Assembly, FrameMoving, Integrable, RoleSet, Scope, State, SystemDescriptor};

use crate::backend::{
    EigenSystemData, SolveInfo, SolverBackend, SparseTripletsF64, default_backend,
};
use crate::config::{DumpFlags, ModalAssemblyConfig, ModalSolveDamped, ModalSolveUndamped};
use crate::error::{ModalError, Result};
use crate::modes::ModeSet;
use crate::reduction::ReducedModel;
use crate::stats::ReductionStats;

use reduce::ReducedRuntime;

/// Refills `custom_f_modal` (one entry per mode) at every reduced-mode update.
pub trait CustomForceModalCallback: Send {
    fn evaluate(&mut self, force: &mut DVector<f64>, assembly: &ModalAssembly);
}

/// Refills `custom_f_full` (boundary + internal velocity rows) at every
/// reduced-mode update.
pub trait CustomForceFullCallback: Send {
    fn evaluate(&mut self, force: &mut DVector<f64>, assembly: &ModalAssembly);
}

impl<F> CustomForceModalCallback for F
where
    F: FnMut(&mut DVector<f64>, &ModalAssembly) + Send,
{
    fn evaluate(&mut self, force: &mut DVector<f64>, assembly: &ModalAssembly) {
        self(force, assembly)
    }
}

impl<F> CustomForceFullCallback for F
where
    F: FnMut(&mut DVector<f64>, &ModalAssembly) + Send,
{
    fn evaluate(&mut self, force: &mut DVector<f64>, assembly: &ModalAssembly) {
        self(force, assembly)
    }
}

/// Factors of the last `krm_matrices_load`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct KrmFactors {
    kf: f64,
    rf: f64,
    mf: f64,
}

pub struct ModalAssembly {
    assembly: Assembly,
    config: ModalAssemblyConfig,
    backend: Box<dyn SolverBackend>,
    reduced: Option<ReducedModel>,
    runtime: Option<ReducedRuntime>,
    modes: Option<ModeSet>,
    /// State the modes were computed at, used by overlays and resets
    modes_assembly_x0: State,
    modal_q: DVector<f64>,
    modal_q_dt: DVector<f64>,
    modal_q_dtdt: DVector<f64>,
    custom_f_modal: DVector<f64>,
    custom_f_full: DVector<f64>,
    modal_force_callback: Option<Box<dyn CustomForceModalCallback>>,
    full_force_callback: Option<Box<dyn CustomForceFullCallback>>,
    krm_factors: KrmFactors,
    /// `kf·K + rf·R + mf·M` of the reduced level, built by `krm_matrices_load`
    krm_block: Option<nalgebra::DMatrix<f64>>,
    stats: Option<ReductionStats>,
    n_coords: usize,
    n_coords_w: usize,
    n_constraints: usize,
}

impl ModalAssembly {
    /// Wraps `assembly` with the default configuration and backend.
    pub fn new(assembly: Assembly) -> Self {
        Self {
            assembly,
            config: ModalAssemblyConfig::default(),
            backend: default_backend(),
            reduced: None,
            runtime: None,
            modes: None,
            modes_assembly_x0: DVector::zeros(0),
            modal_q: DVector::zeros(0),
            modal_q_dt: DVector::zeros(0),
            modal_q_dtdt: DVector::zeros(0),
            custom_f_modal: DVector::zeros(0),
            custom_f_full: DVector::zeros(0),
            modal_force_callback: None,
            full_force_callback: None,
            krm_factors: KrmFactors {
                kf: 0.0,
                rf: 0.0,
                mf: 0.0,
            },
            krm_block: None,
            stats: None,
            n_coords: 0,
            n_coords_w: 0,
            n_constraints: 0,
        }
    }

    pub fn with_config(mut self, config: ModalAssemblyConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_backend(mut self, backend: Box<dyn SolverBackend>) -> Self {
        self.backend = backend;
        self
    }

    // ------------------------------------------------------------------
    // Accessors

    pub fn assembly(&self) -> &Assembly {
        &self.assembly
    }

    /// Mutable access to the items. Changing membership of a reduced
    /// assembly invalidates its reduced model.
    pub fn assembly_mut(&mut self) -> &mut Assembly {
        &mut self.assembly
    }

    pub fn config(&self) -> &ModalAssemblyConfig {
        &self.config
    }

    pub fn set_internal_nodes_update(&mut self, update: bool) {
        self.config.internal_nodes_update = update;
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn is_modal(&self) -> bool {
        self.reduced.is_some()
    }

    pub fn reduced_model(&self) -> Option<&ReducedModel> {
        self.reduced.as_ref()
    }

    /// Matrices consumed by the integrator in reduced mode.
    pub fn modal_matrices(&self) -> Option<&ModalMatrices> {
        self.runtime.as_ref().map(|r| &r.matrices)
    }

    /// Floating frame of the last reduced-mode update.
    pub fn floating_frame(&self) -> Option<&FrameMoving> {
        self.runtime.as_ref().map(|r| &r.frame)
    }

    pub fn modes(&self) -> Option<&ModeSet> {
        self.modes.as_ref()
    }

    pub fn stats(&self) -> Option<&ReductionStats> {
        self.stats.as_ref()
    }

    pub fn n_modes(&self) -> usize {
        self.reduced.as_ref().map_or(0, |r| r.n_modes)
    }

    pub fn modal_q(&self) -> &DVector<f64> {
        &self.modal_q
    }

    pub fn modal_q_dt(&self) -> &DVector<f64> {
        &self.modal_q_dt
    }

    pub fn modal_q_dtdt(&self) -> &DVector<f64> {
        &self.modal_q_dtdt
    }

    /// Forces added to the modal rows of the residual (reduced mode).
    pub fn custom_f_modal_mut(&mut self) -> &mut DVector<f64> {
        &mut self.custom_f_modal
    }

    /// Forces on the boundary + internal velocity rows of the full model.
    /// Projected onto the reduced coordinates in reduced mode.
    pub fn custom_f_full_mut(&mut self) -> &mut DVector<f64> {
        &mut self.custom_f_full
    }

    pub fn custom_f_modal(&self) -> &DVector<f64> {
        &self.custom_f_modal
    }

    pub fn custom_f_full(&self) -> &DVector<f64> {
        &self.custom_f_full
    }

    pub fn set_custom_force_modal_callback(&mut self, callback: impl CustomForceModalCallback + 'static) {
        self.modal_force_callback = Some(Box::new(callback));
    }

    pub fn set_custom_force_full_callback(&mut self, callback: impl CustomForceFullCallback + 'static) {
        self.full_force_callback = Some(Box::new(callback));
    }

    // ------------------------------------------------------------------
    // Setup

    /// Initializes link references and numbers the state.
    pub fn setup_initial(&mut self) -> Result<()> {
        self.assembly.setup_initial()?;
        self.setup();
        Ok(())
    }

    /// Recomputes offsets and counts for the current level. Idempotent.
    pub fn setup(&mut self) {
        self.assembly.setup();
        let boundary = self.assembly.counts(modal_model::Role::Boundary);
        let internal = self.assembly.counts(modal_model::Role::Internal);
        let n_modes = self.n_modes();

        if self.is_modal() {
            self.n_coords = boundary.coords + n_modes;
            self.n_coords_w = boundary.coords_w + n_modes;
            self.n_constraints = boundary.constraints;
        } else {
            self.n_coords = boundary.coords + internal.coords;
            self.n_coords_w = boundary.coords_w + internal.coords_w;
            self.n_constraints = boundary.constraints + internal.constraints;
        }

        let n_full = boundary.coords_w + internal.coords_w;
        if self.custom_f_full.len() != n_full {
            self.custom_f_full = DVector::zeros(n_full);
        }
        if self.custom_f_modal.len() != n_modes {
            self.custom_f_modal = DVector::zeros(n_modes);
        }
        debug!(
            modal = self.is_modal(),
            n_coords = self.n_coords,
            n_coords_w = self.n_coords_w,
            n_constraints = self.n_constraints,
            "modal assembly setup"
        );
    }

    // ------------------------------------------------------------------
    // Full matrices and queries

    fn full_matrix(&self, kf: f64, rf: f64, mf: f64) -> CsrMatrix<f64> {
        let mut desc = SystemDescriptor::new();
        self.assembly.inject_variables(RoleSet::All, 0, &mut desc);
        self.assembly
            .inject_krm_matrices(Scope::ALL, 0, &mut desc, kf, rf, mf);
        desc.set_mass_factor(mf);
        desc.system_matrix(self.n_coords_w)
    }

    fn reduced_matrix(&self, pick: impl Fn(&ModalMatrices) -> &nalgebra::DMatrix<f64>) -> Option<CsrMatrix<f64>> {
        self.runtime.as_ref().map(|r| dense_to_csr(pick(&r.matrices)))
    }

    /// Mass matrix at the current level: full-order in full mode, boundary
    /// + modal in reduced mode.
    pub fn get_subassembly_mass_matrix(&self) -> CsrMatrix<f64> {
        match self.reduced_matrix(|m| &m.mass) {
            Some(m) => m,
            None => self.full_matrix(0.0, 0.0, 1.0),
        }
    }

    pub fn get_subassembly_stiffness_matrix(&self) -> CsrMatrix<f64> {
        match self.reduced_matrix(|m| &m.stiffness) {
            Some(k) => k,
            None => self.full_matrix(1.0, 0.0, 0.0),
        }
    }

    pub fn get_subassembly_damping_matrix(&self) -> CsrMatrix<f64> {
        match self.reduced_matrix(|m| &m.damping) {
            Some(r) => r,
            None => self.full_matrix(0.0, 1.0, 0.0),
        }
    }

    pub fn get_subassembly_constraint_jacobian_matrix(&self) -> CsrMatrix<f64> {
        if let Some(cq) = self.reduced_matrix(|m| &m.constraint_jacobian) {
            return cq;
        }
        let mut desc = SystemDescriptor::new();
        self.assembly
            .inject_constraints(RoleSet::All, 0, 0, &mut desc);
        desc.constraint_jacobian(self.n_constraints, self.n_coords_w)
    }

    /// Writes `prefix_M.dat`, `prefix_K.dat`, `prefix_R.dat` and
    /// `prefix_Cq.dat` as sparse Matlab triplets.
    pub fn dump_subassembly_matrices(&self, flags: DumpFlags, prefix: &str) -> Result<()> {
        if flags.mass {
            modal_io::write_sparse_matlab(format!("{prefix}_M.dat"), &self.get_subassembly_mass_matrix())?;
        }
        if flags.stiffness {
            modal_io::write_sparse_matlab(format!("{prefix}_K.dat"), &self.get_subassembly_stiffness_matrix())?;
        }
        if flags.damping {
            modal_io::write_sparse_matlab(format!("{prefix}_R.dat"), &self.get_subassembly_damping_matrix())?;
        }
        if flags.constraint_jacobian {
            modal_io::write_sparse_matlab(
                format!("{prefix}_Cq.dat"),
                &self.get_subassembly_constraint_jacobian_matrix(),
            )?;
        }
        Ok(())
    }

    /// Writes the reduction operators, the reduced matrices and the modal
    /// matrices in dense Matlab format.
    pub fn dump_reduced_matrices(&self, prefix: &str) -> Result<()> {
        let (Some(reduced), Some(runtime)) = (&self.reduced, &self.runtime) else {
            return Err(ModalError::Configuration(
                "reduced matrices are only available after a modal reduction".to_string(),
            ));
        };
        let dense = [
            ("Psi", &reduced.psi),
            ("Psi_S", &reduced.psi_s),
            ("Psi_D", &reduced.psi_d),
            ("M_red", &reduced.m_red),
            ("K_red", &reduced.k_red),
            ("R_red", &reduced.r_red),
            ("Cq_red", &reduced.cq_red),
            ("modal_M", &runtime.matrices.mass),
            ("modal_K", &runtime.matrices.stiffness),
            ("modal_R", &runtime.matrices.damping),
            ("modal_Cq", &runtime.matrices.constraint_jacobian),
        ];
        for (name, matrix) in dense {
            modal_io::write_dense_matlab(format!("{prefix}_{name}.dat"), matrix)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Modes

    fn eigen_system(&self, with_damping: bool) -> EigenSystemData {
        EigenSystemData {
            stiffness: SparseTripletsF64::from_csr(&self.get_subassembly_stiffness_matrix()),
            mass: SparseTripletsF64::from_csr(&self.get_subassembly_mass_matrix()),
            damping: with_damping
                .then(|| SparseTripletsF64::from_csr(&self.get_subassembly_damping_matrix())),
            constraint_jacobian: SparseTripletsF64::from_csr(
                &self.get_subassembly_constraint_jacobian_matrix(),
            ),
            num_dofs: self.n_coords_w,
        }
    }

    fn store_modes(&mut self, modes: ModeSet, info: &SolveInfo) -> &ModeSet {
        let mut x0 = DVector::zeros(self.n_coords);
        let mut v = DVector::zeros(self.n_coords_w);
        self.int_state_gather(0, &mut x0, 0, &mut v);
        self.modes_assembly_x0 = x0;
        debug!(
            n_modes = modes.len(),
            solver = %info.solver_name,
            frequencies = ?modes.frequencies,
            "modes computed"
        );
        self.modes.insert(modes)
    }

    /// Undamped modes of the current level (full or reduced) in the
    /// absolute basis.
    pub fn compute_modes(&mut self, settings: &ModalSolveUndamped) -> Result<&ModeSet> {
        let system = self.eigen_system(false);
        let (modes, info) = self
            .backend
            .solve_undamped(&system, settings)
            .map_err(|e| ModalError::EigenSolver(e.0))?;
        Ok(self.store_modes(modes, &info))
    }

    /// Complex modes of the quadratic problem with the current damping.
    pub fn compute_modes_damped(&mut self, settings: &ModalSolveDamped) -> Result<&ModeSet> {
        let system = self.eigen_system(true);
        let (modes, info) = self
            .backend
            .solve_damped(&system, settings)
            .map_err(|e| ModalError::EigenSolver(e.0))?;
        Ok(self.store_modes(modes, &info))
    }

    /// Undamped modes of externally supplied matrices.
    pub fn compute_modes_external_data(
        &mut self,
        mass: &CsrMatrix<f64>,
        stiffness: &CsrMatrix<f64>,
        constraint_jacobian: &CsrMatrix<f64>,
        settings: &ModalSolveUndamped,
    ) -> Result<&ModeSet> {
        let system = EigenSystemData {
            stiffness: SparseTripletsF64::from_csr(stiffness),
            mass: SparseTripletsF64::from_csr(mass),
            damping: None,
            constraint_jacobian: SparseTripletsF64::from_csr(constraint_jacobian),
            num_dofs: mass.nrows(),
        };
        let (modes, info) = self
            .backend
            .solve_undamped(&system, settings)
            .map_err(|e| ModalError::EigenSolver(e.0))?;
        Ok(self.store_modes(modes, &info))
    }

    // ------------------------------------------------------------------
    // State overlays and resets

    /// Rotation that takes a mode's translational rows to the absolute
    /// basis: `R_F` on the boundary blocks in reduced mode.
    fn overlay_rotation(&self) -> Matrix3<f64> {
        self.runtime
            .as_ref()
            .map_or_else(Matrix3::identity, |r| r.frame.rotation_matrix())
    }

    /// Sets the state to `x0 ⊕ amplitude·(sin(phase)·Re(v) + cos(phase)·Im(v))`
    /// along mode `index`, with zero velocity.
    ///
    /// A mode set computed for a different level (its rows differ from the
    /// current velocity count) is ignored and only an update is run.
    pub fn set_full_state_with_mode_overlay(&mut self, index: usize, phase: f64, amplitude: f64) -> Result<()> {
        let available = self.modes.as_ref().map_or(0, ModeSet::len);
        if index >= available {
            self.update(true);
            return Err(ModalError::ModeIndexOutOfRange { index, available });
        }
        let Some(modes) = self.modes.as_ref() else {
            return Err(ModalError::ModeIndexOutOfRange { index, available });
        };
        if modes.n_dofs() != self.n_coords_w || self.modes_assembly_x0.len() != self.n_coords {
            self.update(true);
            return Ok(());
        }

        let column = modes.vectors.column(index);
        let (sin, cos) = phase.sin_cos();
        let mut dx = DVector::from_iterator(
            column.len(),
            column.iter().map(|v| amplitude * (sin * v.re + cos * v.im)),
        );
        let rotation = self.overlay_rotation();
        let roles = if self.is_modal() { RoleSet::Boundary } else { RoleSet::All };
        for block in self.assembly.blocks(roles) {
            let o = block.offset_w;
            let translation = rotation * Vector3::new(dx[o], dx[o + 1], dx[o + 2]);
            dx.fixed_rows_mut::<3>(o).copy_from(&translation);
        }

        let mut x_new = self.modes_assembly_x0.clone();
        self.int_state_increment(0, &mut x_new, &self.modes_assembly_x0, 0, &dx);
        let v = DVector::zeros(self.n_coords_w);
        let time = self.assembly.time();
        self.int_state_scatter(0, &x_new, 0, &v, time, true);
        Ok(())
    }

    /// Full mode: back to the state the modes were computed at. Reduced
    /// mode: boundary back to the reduction reference, modal coordinates to
    /// zero and internal items reconstructed. Velocities are zeroed.
    pub fn set_full_state_reset(&mut self) {
        let time = self.assembly.time();
        let v = DVector::zeros(self.n_coords_w);
        match &self.reduced {
            Some(reduced) => {
                let mut x = DVector::zeros(self.n_coords);
                x.rows_mut(0, reduced.n_boundary_x)
                    .copy_from(&reduced.boundary_reference());
                self.modal_q_dtdt.fill(0.0);
                self.int_state_scatter(0, &x, 0, &v, time, true);
                if let Err(error) = self.set_internal_state_with_modes(true) {
                    warn!(%error, "internal items not reset");
                }
            }
            None => {
                if self.modes_assembly_x0.len() != self.n_coords {
                    return;
                }
                let x0 = self.modes_assembly_x0.clone();
                self.int_state_scatter(0, &x0, 0, &v, time, true);
            }
        }
    }

    /// Zeroes the velocities and accelerations of every item and of the
    /// modal coordinates.
    pub fn set_no_speed_no_acceleration(&mut self) {
        self.assembly.set_no_speed_no_acceleration(RoleSet::All);
        self.modal_q_dt.fill(0.0);
        self.modal_q_dtdt.fill(0.0);
        self.refresh_runtime_or_warn();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modal_model::{DofRef, FeaNode, Link, Mesh, RigidBody, Role, SpringElement};
    use nalgebra::UnitQuaternion;

    fn body_with_spring_node(k: f64, m: f64) -> ModalAssembly {
        let mut asm = Assembly::new();
        let body = asm.add(
            Role::Boundary,
            RigidBody::new("hub", Vector3::zeros(), UnitQuaternion::identity()),
        );
        asm.add(Role::Boundary, Link::lock_to_ground("ground", DofRef::Body(body)));
        let mut mesh = Mesh::new("tip");
        mesh.add_node(FeaNode::xyz(Vector3::new(1.0, 0.0, 0.0)).with_mass(m));
        let mesh_id = asm.add(Role::Internal, mesh);
        if let Some(mesh) = asm.mesh_mut(mesh_id) {
            mesh.add_element(SpringElement::new(DofRef::Body(body), DofRef::Node(mesh_id, 0), k));
        }
        asm.add(
            Role::Internal,
            Link::lock_to_ground("rail", DofRef::Node(mesh_id, 0))
                .with_mask([false, true, true, false, false, false]),
        );
        let mut modal = ModalAssembly::new(asm);
        modal.setup_initial().unwrap();
        modal
    }

    #[test]
    fn setup_counts_full_level() {
        let modal = body_with_spring_node(100.0, 2.0);
        assert_eq!(modal.n_coords, 10);
        assert_eq!(modal.n_coords_w, 9);
        assert_eq!(modal.n_constraints, 8);
        assert_eq!(modal.custom_f_full.len(), 9);
        assert!(modal.custom_f_modal.is_empty());
        assert!(!modal.is_modal());
    }

    #[test]
    fn full_matrices_are_boundary_first() {
        let modal = body_with_spring_node(100.0, 2.0);
        let m = modal_model::descriptor::csr_to_dense(&modal.get_subassembly_mass_matrix());
        let k = modal_model::descriptor::csr_to_dense(&modal.get_subassembly_stiffness_matrix());
        assert_eq!(m.shape(), (9, 9));
        assert_eq!(m[(0, 0)], 1.0);
        assert_eq!(m[(6, 6)], 2.0);
        assert_eq!(k[(6, 6)], 100.0);
        assert_eq!(k[(0, 6)], -100.0);
        let cq = modal.get_subassembly_constraint_jacobian_matrix();
        assert_eq!((cq.nrows(), cq.ncols()), (8, 9));
    }

    #[test]
    fn full_level_modes_match_spring_mass() {
        let mut modal = body_with_spring_node(100.0, 4.0);
        let modes = modal.compute_modes(&ModalSolveUndamped::new(1)).unwrap();
        let expected = (100.0_f64 / 4.0).sqrt() / (2.0 * std::f64::consts::PI);
        assert!((modes.frequencies[0] - expected).abs() / expected < 1e-9);
        assert_eq!(modal.modes_assembly_x0.len(), 10);
    }

    #[test]
    fn overlay_moves_along_mode_and_reset_restores() {
        let mut modal = body_with_spring_node(100.0, 4.0);
        modal.compute_modes(&ModalSolveUndamped::new(1)).unwrap();
        modal
            .set_full_state_with_mode_overlay(0, std::f64::consts::FRAC_PI_2, 1.0)
            .unwrap();
        let mut x = DVector::zeros(10);
        let mut v = DVector::zeros(9);
        modal.int_state_gather(0, &mut x, 0, &mut v);
        // mass-normalized: |v| = 1/sqrt(m)
        assert!(((x[7] - 1.0).abs() - 0.5).abs() < 1e-9);

        modal.set_full_state_reset();
        modal.int_state_gather(0, &mut x, 0, &mut v);
        assert!((x[7] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn overlay_beyond_mode_count_is_an_error() {
        let mut modal = body_with_spring_node(100.0, 4.0);
        let err = modal.set_full_state_with_mode_overlay(0, 0.0, 1.0).unwrap_err();
        assert!(matches!(err, ModalError::ModeIndexOutOfRange { index: 0, available: 0 }));

        modal.compute_modes(&ModalSolveUndamped::new(1)).unwrap();
        let err = modal.set_full_state_with_mode_overlay(3, 0.0, 1.0).unwrap_err();
        assert!(matches!(err, ModalError::ModeIndexOutOfRange { index: 3, available: 1 }));
    }

    #[test]
    fn dump_writes_requested_files() {
        let modal = body_with_spring_node(100.0, 4.0);
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("sub");
        let prefix = prefix.to_string_lossy();
        let flags = DumpFlags {
            damping: false,
            ..DumpFlags::ALL
        };
        modal.dump_subassembly_matrices(flags, &prefix).unwrap();
        assert!(dir.path().join("sub_M.dat").exists());
        assert!(dir.path().join("sub_Cq.dat").exists());
        assert!(!dir.path().join("sub_R.dat").exists());
        assert!(modal.dump_reduced_matrices(&prefix).is_err());
    }
}
