//! Switching a modal assembly to reduced coordinates, and keeping the
//! reduced-level matrices current.
//!
//! The reduction runs strictly in order:
//!
//! ```text
//! mass center -> S -> F -> P_BI -> local M, K, R, Cq -> eigen solve
//!     -> frame transforms -> Psi_S, Psi_D -> M_red, K_red, R_red, Cq_red
//! ```
//!
//! Every step returns new values. Nothing on `self` changes until the last
//! step succeeded.

use std::time::Instant;

use nalgebra::{DMatrix, DVector, Vector3};
use nalgebra_sparse::CsrMatrix;
use tracing::{debug, info, warn};

use modal_model::descriptor::csr_to_dense;
use modal_model::state::pose_from_coords;
use modal_model::{Assembly, BlockKind, DofBlock, FrameMoving, ItemKind, Pose, Role, RoleSet};

use super::ModalAssembly;
use crate::backend::{EigenSystemData, SparseTripletsF64};
use crate::config::ModalSolveUndamped;
use crate::damping::DampingModel;
use crate::error::{ModalError, Result};
use crate::floating_frame::{BoundarySample, blend_frame};
use crate::inertial::inertial_terms;
use crate::reduction::{
    ComponentModeReducer, LocalMatrices, Partition, ReducedModel, rigid_mode_residual,
};
use crate::selection::{selection_matrix, selection_weights};
use crate::stats::ReductionStats;
use crate::stiffness::{ElasticReference, stiffness_terms};
use crate::transforms::{BlockPose, FrameTransforms, constraints_to_local, local_basis, to_local};

/// Matrices of the reduced level (boundary + modal coordinates, absolute
/// basis), recomputed at every update.
#[derive(Debug, Clone, PartialEq)]
pub struct ModalMatrices {
    /// `P_W·M_red·P_Wᵗ`
    pub mass: DMatrix<f64>,
    /// Corotated, geometric and inertial stiffness
    pub stiffness: DMatrix<f64>,
    /// Corotated and inertial (gyroscopic) damping
    pub damping: DMatrix<f64>,
    /// `Cq_red·P_Wᵗ`
    pub constraint_jacobian: DMatrix<f64>,
    /// `Yᵗ·g_loc + Rm·v + g_quad`, subtracted from the residual
    pub internal_force: DVector<f64>,
    /// Elastic forces in the local basis
    pub g_loc: DVector<f64>,
    /// Quadratic velocity forces
    pub g_quad: DVector<f64>,
}

/// State-dependent part of a reduced assembly.
#[derive(Debug, Clone)]
pub(super) struct ReducedRuntime {
    pub frame: FrameMoving,
    pub transforms: FrameTransforms,
    pub matrices: ModalMatrices,
}

/// Blocks of one partition with their current poses. Velocity offsets are
/// made relative to `base_w`.
fn block_poses(assembly: &Assembly, blocks: &[DofBlock], base_w: usize) -> Result<Vec<BlockPose>> {
    blocks
        .iter()
        .map(|b| {
            let pose = assembly
                .pose_of(&b.dof)
                .ok_or_else(|| ModalError::Configuration(format!("no pose for block {:?}", b.dof)))?;
            Ok(BlockPose {
                kind: b.kind,
                offset_w: b.offset_w - base_w,
                pose,
            })
        })
        .collect()
}

/// Floating frame and transforms for the current boundary state.
fn current_transforms(
    assembly: &Assembly,
    reduced: &ReducedModel,
) -> Result<(BoundarySample, FrameMoving, FrameTransforms)> {
    let boundary_blocks = assembly.blocks(RoleSet::Boundary);
    let sample = BoundarySample::from_assembly(assembly, &boundary_blocks);
    let frame = blend_frame(&reduced.selection, &sample);
    let boundary = block_poses(assembly, &boundary_blocks, 0)?;
    let internal = block_poses(
        assembly,
        &assembly.blocks(RoleSet::Internal),
        reduced.n_boundary_w(),
    )?;
    let transforms = FrameTransforms::build(&frame, &reduced.selection, &boundary, &internal, reduced.n_modes);
    Ok((sample, frame, transforms))
}

impl ModalAssembly {
    /// Reduces the assembly with the matrices of its own items.
    ///
    /// Does nothing when the assembly is already reduced.
    pub fn switch_modal_reduction_on(
        &mut self,
        settings: &ModalSolveUndamped,
        damping: &dyn DampingModel,
    ) -> Result<()> {
        if self.is_modal() {
            return Ok(());
        }
        self.validate_boundary()?;
        self.setup_initial()?;
        let mass = self.get_subassembly_mass_matrix();
        let stiffness = self.get_subassembly_stiffness_matrix();
        let constraints = self.get_subassembly_constraint_jacobian_matrix();
        self.switch_modal_reduction_on_with_matrices(&mass, &stiffness, &constraints, settings, damping)
    }

    fn validate_boundary(&self) -> Result<()> {
        let boundary = self.assembly.blocks(RoleSet::Boundary);
        if boundary.is_empty() {
            return Err(ModalError::Configuration(
                "a modal reduction needs at least one boundary body or node".to_string(),
            ));
        }
        if let Some(block) = boundary.iter().find(|b| b.kind != BlockKind::Frame) {
            return Err(ModalError::Configuration(format!(
                "boundary block {:?} has 3 DOF, boundary items need 6 DOF",
                block.dof
            )));
        }
        let foreign = self
            .assembly
            .foreign_references(RoleSet::Boundary, &[ItemKind::Link]);
        if !foreign.is_empty() {
            return Err(ModalError::Configuration(format!(
                "boundary links reference internal items {foreign:?}"
            )));
        }
        Ok(())
    }

    /// Reduces the assembly with externally supplied full-order matrices
    /// (boundary rows and columns first, absolute basis). The damping
    /// matrix is always taken from the items.
    ///
    /// Does nothing when the assembly is already reduced. On error the
    /// assembly is left as it was.
    pub fn switch_modal_reduction_on_with_matrices(
        &mut self,
        mass: &CsrMatrix<f64>,
        stiffness: &CsrMatrix<f64>,
        constraint_jacobian: &CsrMatrix<f64>,
        settings: &ModalSolveUndamped,
        damping: &dyn DampingModel,
    ) -> Result<()> {
        if self.is_modal() {
            return Ok(());
        }

        let started = Instant::now();
        self.validate_boundary()?;
        self.assembly.setup_initial()?;
        self.setup();
        let setup_time = started.elapsed();

        // Full matrices in the local basis
        let started = Instant::now();
        let boundary = self.assembly.counts(Role::Boundary);
        let internal = self.assembly.counts(Role::Internal);
        let n = boundary.coords_w + internal.coords_w;
        let n_c = boundary.constraints + internal.constraints;
        for (name, matrix, rows) in [("mass", mass, n), ("stiffness", stiffness, n), ("constraint", constraint_jacobian, n_c)] {
            if matrix.nrows() != rows || matrix.ncols() != n {
                return Err(ModalError::Configuration(format!(
                    "{name} matrix is {}x{}, expected {rows}x{n}",
                    matrix.nrows(),
                    matrix.ncols()
                )));
            }
        }

        let mut x_ref = DVector::zeros(boundary.coords + internal.coords);
        let mut v = DVector::zeros(n);
        self.assembly.state_gather(RoleSet::All, 0, &mut x_ref, 0, &mut v);

        let boundary_blocks = self.assembly.blocks(RoleSet::Boundary);
        let internal_blocks = self.assembly.blocks(RoleSet::Internal);
        let sample = BoundarySample::from_assembly(&self.assembly, &boundary_blocks);
        let (total_mass, center) = self.assembly.mass_center(RoleSet::All);
        let center = if total_mass > 0.0 {
            center
        } else {
            sample.poses.first().map_or_else(Vector3::zeros, |p| p.pos)
        };
        let positions: Vec<Vector3<f64>> = sample.poses.iter().map(|p| p.pos).collect();
        let selection = selection_matrix(&selection_weights(&positions, &center)?);
        let frame = blend_frame(&selection, &sample);

        let all_blocks = block_poses(&self.assembly, &self.assembly.blocks(RoleSet::All), 0)?;
        let basis = local_basis(&all_blocks, n, &frame);
        let damping_full = self.get_subassembly_damping_matrix();
        let mass_loc = to_local(mass, &basis);
        let stiffness_loc = to_local(stiffness, &basis);
        let constraints_loc = constraints_to_local(constraint_jacobian, &basis);
        let local = LocalMatrices {
            mass: csr_to_dense(&mass_loc),
            stiffness: csr_to_dense(&stiffness_loc),
            damping: csr_to_dense(&to_local(&damping_full, &basis)),
            constraint_jacobian: csr_to_dense(&constraints_loc),
        };
        let assembly_time = started.elapsed();
        debug!(
            total_mass,
            ?center,
            frame = ?frame.pos,
            "floating frame at reduction"
        );

        // Modes of the full local system
        let started = Instant::now();
        let system = EigenSystemData {
            stiffness: SparseTripletsF64::from_csr(&stiffness_loc),
            mass: SparseTripletsF64::from_csr(&mass_loc),
            damping: None,
            constraint_jacobian: SparseTripletsF64::from_csr(&constraints_loc),
            num_dofs: n,
        };
        let (modes, info) = self
            .backend
            .solve_undamped(&system, settings)
            .map_err(|e| ModalError::EigenSolver(e.0))?;
        let eigen_time = started.elapsed();

        // Component mode synthesis
        let started = Instant::now();
        let n_modes = modes.len();
        let boundary_poses = block_poses(&self.assembly, &boundary_blocks, 0)?;
        let internal_poses = block_poses(&self.assembly, &internal_blocks, boundary.coords_w)?;
        let transforms = FrameTransforms::build(&frame, &selection, &boundary_poses, &internal_poses, n_modes);
        let partition = Partition {
            n_boundary_w: boundary.coords_w,
            n_internal_w: internal.coords_w,
            n_boundary_constraints: boundary.constraints,
            n_internal_constraints: internal.constraints,
        };
        let reduction = ComponentModeReducer::new(partition, &local).reduce(&modes.real_vectors(), damping)?;

        let mut rigid = DMatrix::zeros(n, 6);
        rigid.rows_mut(0, boundary.coords_w).copy_from(&transforms.p_b1);
        rigid
            .rows_mut(boundary.coords_w, internal.coords_w)
            .copy_from(&transforms.p_i1);
        let rigid_loc = csr_to_dense(&basis).transpose() * rigid;
        let residual = rigid_mode_residual(&local.stiffness, &rigid_loc, boundary.coords_w);
        if residual > self.config.rigid_mode_tolerance {
            warn!(
                residual,
                tolerance = self.config.rigid_mode_tolerance,
                "rigid motion of the floating frame produces internal elastic forces"
            );
        }
        let reduction_time = started.elapsed();

        // Commit
        self.assembly.remove_mass(RoleSet::All);
        self.reduced = Some(ReducedModel {
            partition,
            n_boundary_x: boundary.coords,
            n_internal_x: internal.coords,
            n_modes,
            selection,
            frame0: frame.pose(),
            x_ref: x_ref.clone(),
            psi: reduction.psi,
            psi_s: reduction.psi_s,
            psi_d: reduction.psi_d,
            m_red: reduction.m_red,
            k_red: reduction.k_red,
            r_red: reduction.r_red,
            cq_red: reduction.cq_red,
            rigid_mode_residual: residual,
        });
        // Full-order modes no longer match the reduced coordinates
        self.modes = None;
        self.modes_assembly_x0 = x_ref;
        self.modal_q = DVector::zeros(n_modes);
        self.modal_q_dt = DVector::zeros(n_modes);
        self.modal_q_dtdt = DVector::zeros(n_modes);
        self.krm_block = None;
        self.setup();
        self.refresh_runtime()?;

        let stats = ReductionStats {
            setup: setup_time,
            assembly: assembly_time,
            eigen: eigen_time,
            reduction: reduction_time,
            rigid_mode_residual: residual,
            n_modes,
            n_boundary_w: boundary.coords_w,
            n_internal_w: internal.coords_w,
            solver_name: info.solver_name,
        };
        info!(
            n_modes,
            damping = damping.name(),
            reduced_size = stats.reduced_size(),
            "modal reduction committed: {stats}"
        );
        self.stats = Some(stats);
        Ok(())
    }

    /// Expands the internal items from the boundary increment and the modal
    /// coordinates, measured from the reduction reference:
    ///
    /// ```text
    /// Δx_I = P_I2·(Psi_S·P_B2ᵗ·Δx_B + Psi_D·q)
    /// v_I  = P_I2·(Psi_S·P_B2ᵗ·v_B  + Psi_D·q_dt)
    /// ```
    ///
    /// Accelerations are expanded too when `full_update` is set. Does
    /// nothing in full mode.
    pub fn set_internal_state_with_modes(&mut self, full_update: bool) -> Result<()> {
        let Some(reduced) = self.reduced.as_ref() else {
            return Ok(());
        };
        let (_, _, t) = current_transforms(&self.assembly, reduced)?;
        let nb = reduced.n_boundary_w();
        let ni = reduced.n_internal_w();
        let expand = |boundary: DVector<f64>, modal: &DVector<f64>| -> DVector<f64> {
            &t.p_i2 * (&reduced.psi_s * (t.p_b2.transpose() * boundary) + &reduced.psi_d * modal)
        };

        let mut x = reduced.x_ref.clone();
        let mut v = DVector::zeros(nb + ni);
        self.assembly.state_gather(RoleSet::Boundary, 0, &mut x, 0, &mut v);
        let mut dx = DVector::zeros(nb + ni);
        self.assembly
            .state_get_increment(RoleSet::Boundary, 0, &x, &reduced.x_ref, 0, &mut dx);

        let dx_internal = expand(dx.rows(0, nb).into_owned(), &self.modal_q);
        dx.rows_mut(nb, ni).copy_from(&dx_internal);
        let v_internal = expand(v.rows(0, nb).into_owned(), &self.modal_q_dt);
        v.rows_mut(nb, ni).copy_from(&v_internal);

        let mut x_new = reduced.x_ref.clone();
        self.assembly
            .state_increment(RoleSet::Internal, 0, &mut x_new, &reduced.x_ref, 0, &dx);

        let accelerations = full_update.then(|| {
            let mut a = DVector::zeros(nb + ni);
            self.assembly.state_gather_acceleration(RoleSet::Boundary, 0, &mut a);
            let a_internal = expand(a.rows(0, nb).into_owned(), &self.modal_q_dtdt);
            a.rows_mut(nb, ni).copy_from(&a_internal);
            a
        });

        self.assembly.state_scatter(RoleSet::Internal, 0, &x_new, 0, &v);
        if let Some(a) = accelerations {
            self.assembly.state_scatter_acceleration(RoleSet::Internal, 0, &a);
        }
        Ok(())
    }

    fn run_custom_force_callbacks(&mut self) {
        if let Some(mut callback) = self.modal_force_callback.take() {
            let mut force = std::mem::replace(&mut self.custom_f_modal, DVector::zeros(0));
            callback.evaluate(&mut force, self);
            self.custom_f_modal = force;
            self.modal_force_callback = Some(callback);
        }
        if let Some(mut callback) = self.full_force_callback.take() {
            let mut force = std::mem::replace(&mut self.custom_f_full, DVector::zeros(0));
            callback.evaluate(&mut force, self);
            self.custom_f_full = force;
            self.full_force_callback = Some(callback);
        }
    }

    /// Reduced-mode update: internal reconstruction, custom forces, then
    /// frame, transforms and modal matrices for the current state.
    pub(super) fn refresh(&mut self, full_update: bool) {
        if !self.is_modal() {
            return;
        }
        if self.config.internal_nodes_update {
            if let Err(error) = self.set_internal_state_with_modes(full_update) {
                warn!(%error, "internal items not reconstructed");
            }
        }
        self.run_custom_force_callbacks();
        self.refresh_runtime_or_warn();
    }

    /// Infallible form of [`refresh_runtime`](Self::refresh_runtime) for
    /// the integration hooks. The previous runtime is kept on error.
    pub(super) fn refresh_runtime_or_warn(&mut self) {
        if let Err(error) = self.refresh_runtime() {
            warn!(%error, "modal matrices not refreshed");
        }
    }

    /// Recomputes the floating frame, the transforms and the modal
    /// matrices. S and the reduced model stay fixed.
    pub(super) fn refresh_runtime(&mut self) -> Result<()> {
        let Some(reduced) = self.reduced.as_ref() else {
            self.runtime = None;
            return Ok(());
        };
        let (sample, frame, transforms) = current_transforms(&self.assembly, reduced)?;
        let nb = reduced.n_boundary_w();
        let nm = reduced.n_modes;

        let mut v_mod = DVector::zeros(nb + nm);
        v_mod.rows_mut(0, nb).copy_from(&sample.velocities);
        v_mod.rows_mut(nb, nm).copy_from(&self.modal_q_dt);
        let mut a_mod = DVector::zeros(nb + nm);
        a_mod.rows_mut(0, nb).copy_from(&sample.accelerations);
        a_mod.rows_mut(nb, nm).copy_from(&self.modal_q_dtdt);

        let boundary0: Vec<Pose> = self
            .assembly
            .blocks(RoleSet::Boundary)
            .iter()
            .map(|b| pose_from_coords(b.kind, &reduced.x_ref.as_slice()[b.offset_x..b.offset_x + b.kind.coords()]))
            .collect();
        let reference = ElasticReference {
            frame0: &reduced.frame0,
            boundary0: &boundary0,
            selection: &reduced.selection,
        };

        let inertial = inertial_terms(&reduced.m_red, &transforms, &frame, &v_mod, &a_mod);
        let elastic = stiffness_terms(
            &reduced.k_red,
            &reduced.r_red,
            &transforms,
            &frame,
            &reference,
            &sample.poses,
            &self.modal_q,
        );

        let internal_force =
            transforms.y.transpose() * &elastic.g_loc + &elastic.rm_sup * &v_mod + &inertial.g_quad;
        let matrices = ModalMatrices {
            mass: inertial.m_sup,
            stiffness: elastic.km_sup + elastic.kg_sup + inertial.ki_sup,
            damping: elastic.rm_sup + inertial.ri_sup,
            constraint_jacobian: &reduced.cq_red * transforms.p_w.transpose(),
            internal_force,
            g_loc: elastic.g_loc,
            g_quad: inertial.g_quad,
        };
        self.runtime = Some(ReducedRuntime {
            frame,
            transforms,
            matrices,
        });
        Ok(())
    }
}
