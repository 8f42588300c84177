//! Time-integration hooks of a modal assembly.
//!
//! In full mode every hook fans out to boundary and internal items. In
//! reduced mode the items in play are the boundary ones, followed by the
//! modal block `[modal_q | modal_q_dt]`.

use nalgebra::{DMatrix, DVector};

use modal_model::{Integrable, KrmBlock, Role, RoleSet, Scope, State, StateDelta, SystemDescriptor, VariableBlock};

use super::{KrmFactors, ModalAssembly};

impl ModalAssembly {
    /// `(n_bx, n_bw)` of the boundary partition.
    fn boundary_sizes(&self) -> (usize, usize) {
        let counts = self.assembly.counts(Role::Boundary);
        (counts.coords, counts.coords_w)
    }

    /// Roles the item fan-outs visit at the current level.
    fn level_roles(&self) -> RoleSet {
        if self.is_modal() { RoleSet::Boundary } else { RoleSet::All }
    }

    /// Adds `c·custom_f_full` projected onto the reduced coordinates:
    ///
    /// ```text
    /// F_B += P_B2·Psi_Sᵗ·P_I2ᵗ·F_I     F_q += Psi_Dᵗ·P_I2ᵗ·F_I
    /// ```
    fn load_projected_full_force(&self, off: usize, r: &mut DVector<f64>, c: f64) {
        let (Some(reduced), Some(runtime)) = (&self.reduced, &self.runtime) else {
            return;
        };
        let nb = reduced.n_boundary_w();
        let ni = reduced.n_internal_w();
        let nm = reduced.n_modes;
        if self.custom_f_full.len() != nb + ni {
            return;
        }
        let t = &runtime.transforms;
        let f_b = self.custom_f_full.rows(0, nb);
        let f_i_loc = t.p_i2.transpose() * self.custom_f_full.rows(nb, ni);
        let boundary = f_b + &t.p_b2 * (reduced.psi_s.transpose() * &f_i_loc);
        let modal = reduced.psi_d.transpose() * &f_i_loc;
        let mut rows = r.rows_mut(off, nb + nm);
        rows.rows_mut(0, nb).axpy(c, &boundary, 1.0);
        rows.rows_mut(nb, nm).axpy(c, &modal, 1.0);
    }
}

impl Integrable for ModalAssembly {
    fn n_coords(&self) -> usize {
        self.n_coords
    }

    fn n_coords_w(&self) -> usize {
        self.n_coords_w
    }

    fn n_constraints(&self) -> usize {
        self.n_constraints
    }

    fn time(&self) -> f64 {
        self.assembly.time()
    }

    fn int_state_gather(&self, off_x: usize, x: &mut State, off_v: usize, v: &mut StateDelta) -> f64 {
        self.assembly.state_gather(self.level_roles(), off_x, x, off_v, v);
        if self.is_modal() {
            let (nbx, nbw) = self.boundary_sizes();
            let nm = self.n_modes();
            x.rows_mut(off_x + nbx, nm).copy_from(&self.modal_q);
            v.rows_mut(off_v + nbw, nm).copy_from(&self.modal_q_dt);
        }
        self.assembly.time()
    }

    fn int_state_scatter(
        &mut self,
        off_x: usize,
        x: &State,
        off_v: usize,
        v: &StateDelta,
        time: f64,
        full_update: bool,
    ) {
        self.assembly.state_scatter(self.level_roles(), off_x, x, off_v, v);
        if self.is_modal() {
            let (nbx, nbw) = self.boundary_sizes();
            let nm = self.n_modes();
            self.modal_q.copy_from(&x.rows(off_x + nbx, nm));
            self.modal_q_dt.copy_from(&v.rows(off_v + nbw, nm));
        }
        self.assembly.set_time(time);
        self.update(full_update);
    }

    fn int_state_gather_acceleration(&self, off_a: usize, a: &mut StateDelta) {
        self.assembly.state_gather_acceleration(self.level_roles(), off_a, a);
        if self.is_modal() {
            let (_, nbw) = self.boundary_sizes();
            a.rows_mut(off_a + nbw, self.n_modes()).copy_from(&self.modal_q_dtdt);
        }
    }

    fn int_state_scatter_acceleration(&mut self, off_a: usize, a: &StateDelta) {
        self.assembly.state_scatter_acceleration(self.level_roles(), off_a, a);
        if self.is_modal() {
            let (_, nbw) = self.boundary_sizes();
            let nm = self.n_modes();
            self.modal_q_dtdt.copy_from(&a.rows(off_a + nbw, nm));
        }
    }

    fn int_state_gather_reactions(&self, off_l: usize, l: &mut DVector<f64>) {
        self.assembly.gather_reactions(self.level_roles(), off_l, l);
    }

    fn int_state_scatter_reactions(&mut self, off_l: usize, l: &DVector<f64>) {
        self.assembly.scatter_reactions(self.level_roles(), off_l, l);
    }

    fn int_state_increment(&self, off_x: usize, x_new: &mut State, x: &State, off_v: usize, dv: &StateDelta) {
        self.assembly
            .state_increment(self.level_roles(), off_x, x_new, x, off_v, dv);
        if self.is_modal() {
            let (nbx, nbw) = self.boundary_sizes();
            for i in 0..self.n_modes() {
                x_new[off_x + nbx + i] = x[off_x + nbx + i] + dv[off_v + nbw + i];
            }
        }
    }

    fn int_state_get_increment(
        &self,
        off_x: usize,
        x_new: &State,
        x: &State,
        off_v: usize,
        dv: &mut StateDelta,
    ) {
        self.assembly
            .state_get_increment(self.level_roles(), off_x, x_new, x, off_v, dv);
        if self.is_modal() {
            let (nbx, nbw) = self.boundary_sizes();
            for i in 0..self.n_modes() {
                dv[off_v + nbw + i] = x_new[off_x + nbx + i] - x[off_x + nbx + i];
            }
        }
    }

    fn int_load_residual_f(&self, off: usize, r: &mut DVector<f64>, c: f64) {
        let Some(runtime) = &self.runtime else {
            self.assembly.load_residual_f(Scope::ALL, off, r, c);
            if self.custom_f_full.len() == self.n_coords_w {
                r.rows_mut(off, self.n_coords_w).axpy(c, &self.custom_f_full, 1.0);
            }
            return;
        };

        // Boundary bodies and nodes only; elastic forces come from the modal
        // matrices.
        self.assembly
            .load_residual_f(Scope::new(RoleSet::Boundary, false), off, r, c);
        let n = self.n_coords_w;
        r.rows_mut(off, n)
            .axpy(-c, &runtime.matrices.internal_force, 1.0);

        let (_, nbw) = self.boundary_sizes();
        let nm = self.n_modes();
        if self.custom_f_modal.len() == nm {
            r.rows_mut(off + nbw, nm).axpy(c, &self.custom_f_modal, 1.0);
        }
        self.load_projected_full_force(off, r, c);
    }

    fn int_load_residual_mv(&self, off: usize, r: &mut DVector<f64>, w: &DVector<f64>, c: f64) {
        match &self.runtime {
            Some(runtime) => {
                let n = self.n_coords_w;
                let mw = &runtime.matrices.mass * w.rows(off, n);
                r.rows_mut(off, n).axpy(c, &mw, 1.0);
            }
            None => self.assembly.load_residual_mv(Scope::ALL, off, r, w, c),
        }
    }

    fn int_load_residual_cql(&self, off_v: usize, off_l: usize, r: &mut DVector<f64>, l: &DVector<f64>, c: f64) {
        self.assembly
            .load_residual_cql(self.level_roles(), off_v, off_l, r, l, c);
    }

    fn int_load_constraint_c(
        &self,
        off_l: usize,
        qc: &mut DVector<f64>,
        c: f64,
        do_clamp: bool,
        recovery_clamp: f64,
    ) {
        self.assembly
            .load_constraint_c(self.level_roles(), off_l, qc, c, do_clamp, recovery_clamp);
    }

    fn int_load_constraint_ct(&self, off_l: usize, qc: &mut DVector<f64>, c: f64) {
        self.assembly
            .load_constraint_ct(self.level_roles(), off_l, qc, c);
    }

    fn inject_variables(&self, off_w: usize, desc: &mut SystemDescriptor) {
        self.assembly.inject_variables(self.level_roles(), off_w, desc);
        if self.is_modal() {
            // Modal mass lives in the KRM block of the reduced level
            let (_, nbw) = self.boundary_sizes();
            let nm = self.n_modes();
            if nm > 0 {
                desc.insert_variables(VariableBlock {
                    offset: off_w + nbw,
                    mass: DMatrix::zeros(nm, nm),
                });
            }
        }
    }

    fn inject_constraints(&self, off_w: usize, off_l: usize, desc: &mut SystemDescriptor) {
        self.assembly
            .inject_constraints(self.level_roles(), off_w, off_l, desc);
    }

    fn krm_matrices_load(&mut self, kf: f64, rf: f64, mf: f64) {
        self.krm_factors = KrmFactors { kf, rf, mf };
        self.krm_block = self.runtime.as_ref().map(|runtime| {
            let m = &runtime.matrices;
            &m.stiffness * kf + &m.damping * rf + &m.mass * mf
        });
    }

    fn inject_krm_matrices(&self, off_w: usize, desc: &mut SystemDescriptor) {
        match &self.krm_block {
            Some(matrix) if self.is_modal() => desc.insert_krm_block(KrmBlock {
                indices: (off_w..off_w + matrix.nrows()).collect(),
                matrix: matrix.clone(),
            }),
            _ => {
                let KrmFactors { kf, rf, mf } = self.krm_factors;
                self.assembly
                    .inject_krm_matrices(Scope::ALL, off_w, desc, kf, rf, mf);
            }
        }
    }

    fn update(&mut self, full_update: bool) {
        self.refresh(full_update);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModalSolveUndamped;
    use crate::damping::NoDamping;
    use approx::assert_relative_eq;
    use modal_model::descriptor::csr_to_dense;
    use modal_model::{Assembly, DofRef, FeaNode, ForceItem, Link, Mesh, RigidBody, SpringElement};
    use nalgebra::{UnitQuaternion, Vector3};

    /// Free hub with a sprung tip node on a rail along x.
    fn sprung_tip(k: f64, m: f64, n_modes: usize) -> ModalAssembly {
        let mut asm = Assembly::new();
        let body = asm.add(
            Role::Boundary,
            RigidBody::new("hub", Vector3::zeros(), UnitQuaternion::identity()).with_mass(3.0),
        );
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
        modal
            .switch_modal_reduction_on(&ModalSolveUndamped::new(n_modes), &NoDamping)
            .unwrap();
        modal
    }

    fn gather(modal: &ModalAssembly) -> (DVector<f64>, DVector<f64>) {
        let mut x = DVector::zeros(modal.n_coords());
        let mut v = DVector::zeros(modal.n_coords_w());
        modal.int_state_gather(0, &mut x, 0, &mut v);
        (x, v)
    }

    #[test]
    fn reduced_state_appends_modal_coordinates() {
        let mut modal = sprung_tip(100.0, 1.0, 1);
        assert_eq!(modal.n_coords(), 8);
        assert_eq!(modal.n_coords_w(), 7);
        assert_eq!(modal.n_constraints(), 0);

        let (mut x, mut v) = gather(&modal);
        x[7] = 0.25;
        v[6] = -1.5;
        modal.int_state_scatter(0, &x, 0, &v, 0.5, false);
        assert_eq!(modal.modal_q()[0], 0.25);
        assert_eq!(modal.modal_q_dt()[0], -1.5);
        assert_eq!(modal.time(), 0.5);

        let (x2, v2) = gather(&modal);
        assert_eq!(x2, x);
        assert_eq!(v2, v);
    }

    #[test]
    fn increment_is_additive_on_modal_rows() {
        let modal = sprung_tip(100.0, 1.0, 1);
        let (x, _) = gather(&modal);
        let mut dv = DVector::zeros(7);
        dv[0] = 0.1;
        dv[6] = 0.3;
        let mut x_new = x.clone();
        modal.int_state_increment(0, &mut x_new, &x, 0, &dv);
        assert_relative_eq!(x_new[0], 0.1, epsilon = 1e-15);
        assert_relative_eq!(x_new[7], 0.3, epsilon = 1e-15);

        let mut back = DVector::zeros(7);
        modal.int_state_get_increment(0, &x_new, &x, 0, &mut back);
        assert_relative_eq!(back, dv, epsilon = 1e-12);
    }

    #[test]
    fn residual_vanishes_at_rest() {
        let modal = sprung_tip(100.0, 1.0, 1);
        let mut r = DVector::zeros(7);
        modal.int_load_residual_f(0, &mut r, 1.0);
        assert!(r.norm() < 1e-10);
    }

    #[test]
    fn modal_rows_carry_custom_modal_force() {
        let mut modal = sprung_tip(100.0, 1.0, 1);
        modal.custom_f_modal_mut()[0] = 2.0;
        let mut r = DVector::zeros(9);
        modal.int_load_residual_f(2, &mut r, 0.5);
        assert_relative_eq!(r[2 + 6], 1.0, epsilon = 1e-12);
        assert_eq!(r[0], 0.0);
    }

    #[test]
    fn full_force_on_boundary_passes_through() {
        let mut modal = sprung_tip(100.0, 1.0, 0);
        modal.custom_f_full_mut()[1] = 4.0;
        let mut r = DVector::zeros(6);
        modal.int_load_residual_f(0, &mut r, 1.0);
        assert_relative_eq!(r[1], 4.0, epsilon = 1e-12);
    }

    #[test]
    fn internal_full_force_is_projected_on_the_static_mode() {
        let mut modal = sprung_tip(100.0, 1.0, 0);
        // x force on the tip node: the static mode carries it to the hub
        modal.custom_f_full_mut()[6] = 1.0;
        let mut r = DVector::zeros(6);
        modal.int_load_residual_f(0, &mut r, 1.0);
        assert_relative_eq!(r[0], 1.0, epsilon = 1e-9);
    }

    #[test]
    fn mv_uses_the_modal_mass() {
        let modal = sprung_tip(100.0, 2.0, 0);
        let w = DVector::from_element(6, 1.0);
        let mut r = DVector::zeros(6);
        modal.int_load_residual_mv(0, &mut r, &w, 1.0);
        // hub 3 + tip 2 translate together along x
        assert_relative_eq!(r[0], 5.0, epsilon = 1e-9);
    }

    #[test]
    fn krm_block_covers_the_reduced_level() {
        let mut modal = sprung_tip(100.0, 1.0, 1);
        modal.krm_matrices_load(0.0, 0.0, 1.0);
        let mut desc = SystemDescriptor::new();
        modal.inject_variables(0, &mut desc);
        modal.inject_krm_matrices(0, &mut desc);
        desc.set_mass_factor(1.0);
        let h = csr_to_dense(&desc.system_matrix(7));
        let m = &modal.modal_matrices().unwrap().mass;
        assert_relative_eq!(h, m.clone(), epsilon = 1e-12);
    }

    #[test]
    fn full_mode_fans_out_to_every_item() {
        let mut asm = Assembly::new();
        let body = asm.add(
            Role::Boundary,
            RigidBody::new("a", Vector3::zeros(), UnitQuaternion::identity()).with_mass(2.0),
        );
        asm.add(
            Role::Internal,
            ForceItem::new("push", DofRef::Body(body), Vector3::new(0.0, 0.0, 3.0)),
        );
        let mut modal = ModalAssembly::new(asm);
        modal.setup_initial().unwrap();
        let mut r = DVector::zeros(6);
        modal.int_load_residual_f(0, &mut r, 1.0);
        assert_relative_eq!(r[2], 3.0, epsilon = 1e-12);

        modal.custom_f_full_mut()[0] = 1.0;
        let mut r = DVector::zeros(6);
        modal.int_load_residual_f(0, &mut r, 2.0);
        assert_relative_eq!(r[0], 2.0, epsilon = 1e-12);
    }
}
