//! Craig-Bampton/Herting component mode reduction.
//!
//! With the local matrices partitioned boundary-first and the constraint
//! rows split into boundary links (`Cq_B`) and internal links (`Cq_I`):
//!
//! ```text
//! K_IIc = [K_II  Cq_IIᵗ]      Psi_S = -head(K_IIc⁻¹·[K_IB; Cq_IB])
//!         [Cq_II   0   ]      Psi_D = -head(K_IIc⁻¹·[M_IB·V_B + M_II·V_I; 0])
//!
//! Psi = [I      0    ]        M_red = Psiᵗ·M·Psi, K_red = Psiᵗ·K·Psi
//!       [Psi_S  Psi_D]        Cq_red = Cq_B·Psi
//! ```
//!
//! `K_IIc` is factored once. The static and dynamic right-hand sides are
//! solved column by column on the rayon pool against that factorization.

use nalgebra::{DMatrix, DVector, Dyn, LU};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use modal_model::Pose;

use crate::damping::{DampingContext, DampingModel};
use crate::error::{ModalError, Result};

/// Full matrices in the local basis, boundary rows/columns first.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalMatrices {
    pub mass: DMatrix<f64>,
    pub stiffness: DMatrix<f64>,
    pub damping: DMatrix<f64>,
    /// Boundary link rows first, then internal link rows
    pub constraint_jacobian: DMatrix<f64>,
}

/// Sizes of the boundary and internal partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub n_boundary_w: usize,
    pub n_internal_w: usize,
    pub n_boundary_constraints: usize,
    pub n_internal_constraints: usize,
}

/// Output of [`ComponentModeReducer::reduce`].
#[derive(Debug, Clone, PartialEq)]
pub struct Reduction {
    pub psi: DMatrix<f64>,
    pub psi_s: DMatrix<f64>,
    pub psi_d: DMatrix<f64>,
    pub m_red: DMatrix<f64>,
    pub k_red: DMatrix<f64>,
    pub r_red: DMatrix<f64>,
    pub cq_red: DMatrix<f64>,
}

/// Everything a reduced assembly keeps from its reduction. Immutable until
/// the next reduction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReducedModel {
    pub partition: Partition,
    pub n_boundary_x: usize,
    pub n_internal_x: usize,
    pub n_modes: usize,
    /// Selection matrix `S` (6 × n_bw)
    pub selection: DMatrix<f64>,
    /// Floating frame at the reduction configuration
    pub frame0: Pose,
    /// Boundary + internal coordinates at the reduction configuration
    pub x_ref: DVector<f64>,
    pub psi: DMatrix<f64>,
    pub psi_s: DMatrix<f64>,
    pub psi_d: DMatrix<f64>,
    pub m_red: DMatrix<f64>,
    pub k_red: DMatrix<f64>,
    pub r_red: DMatrix<f64>,
    pub cq_red: DMatrix<f64>,
    pub rigid_mode_residual: f64,
}

impl ReducedModel {
    pub fn n_boundary_w(&self) -> usize {
        self.partition.n_boundary_w
    }

    pub fn n_internal_w(&self) -> usize {
        self.partition.n_internal_w
    }

    /// Size of the reduced velocity vector (boundary + modal).
    pub fn n_reduced_w(&self) -> usize {
        self.partition.n_boundary_w + self.n_modes
    }

    /// Boundary coordinates at the reduction configuration.
    pub fn boundary_reference(&self) -> DVector<f64> {
        self.x_ref.rows(0, self.n_boundary_x).into_owned()
    }
}

pub struct ComponentModeReducer<'a> {
    partition: Partition,
    local: &'a LocalMatrices,
}

fn solve_columns(lu: &LU<f64, Dyn, Dyn>, rhs: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    let columns: Option<Vec<DVector<f64>>> = (0..rhs.ncols())
        .into_par_iter()
        .map(|j| lu.solve(&rhs.column(j).into_owned()))
        .collect();
    let columns = columns?;
    if columns.is_empty() {
        return Some(DMatrix::zeros(rhs.nrows(), 0));
    }
    Some(DMatrix::from_columns(&columns))
}

impl<'a> ComponentModeReducer<'a> {
    pub fn new(partition: Partition, local: &'a LocalMatrices) -> Self {
        Self { partition, local }
    }

    /// Reduces with the dynamic modes `modes` (real, n_bw + n_iw rows).
    pub fn reduce(&self, modes: &DMatrix<f64>, damping: &dyn DampingModel) -> Result<Reduction> {
        let Partition {
            n_boundary_w: nb,
            n_internal_w: ni,
            n_boundary_constraints: nbc,
            n_internal_constraints: nic,
        } = self.partition;
        let nm = modes.ncols();
        let m = &self.local.mass;
        let k = &self.local.stiffness;
        let cq = &self.local.constraint_jacobian;

        if modes.nrows() != nb + ni || cq.nrows() != nbc + nic {
            return Err(ModalError::Configuration(format!(
                "reduction sizes disagree: {} mode rows for {} DOF, {} constraint rows for {}",
                modes.nrows(),
                nb + ni,
                cq.nrows(),
                nbc + nic
            )));
        }

        let (psi_s, psi_d) = if ni == 0 {
            (DMatrix::zeros(0, nb), DMatrix::zeros(0, nm))
        } else {
            let size = ni + nic;
            let mut k_iic = DMatrix::zeros(size, size);
            k_iic.view_mut((0, 0), (ni, ni)).copy_from(&k.view((nb, nb), (ni, ni)));
            let cq_ii = cq.view((nbc, nb), (nic, ni));
            k_iic.view_mut((ni, 0), (nic, ni)).copy_from(&cq_ii);
            k_iic.view_mut((0, ni), (ni, nic)).copy_from(&cq_ii.transpose());

            let lu = k_iic.lu();
            if !lu.is_invertible() {
                return Err(ModalError::SingularBorderedStiffness { size });
            }

            // [static | dynamic] right-hand sides, solved in one parallel pass
            let mut rhs = DMatrix::zeros(size, nb + nm);
            rhs.view_mut((0, 0), (ni, nb)).copy_from(&k.view((nb, 0), (ni, nb)));
            rhs.view_mut((ni, 0), (nic, nb)).copy_from(&cq.view((nbc, 0), (nic, nb)));
            let inertia = m.view((nb, 0), (ni, nb)) * modes.rows(0, nb) + m.view((nb, nb), (ni, ni)) * modes.rows(nb, ni);
            rhs.view_mut((0, nb), (ni, nm)).copy_from(&inertia);

            let solution = solve_columns(&lu, &rhs)
                .filter(|s| s.iter().all(|v| v.is_finite()))
                .ok_or(ModalError::SingularBorderedStiffness { size })?;
            debug!(size, rhs = nb + nm, "bordered internal solve");
            (
                -solution.view((0, 0), (ni, nb)),
                -solution.view((0, nb), (ni, nm)),
            )
        };

        let mut psi = DMatrix::zeros(nb + ni, nb + nm);
        psi.view_mut((0, 0), (nb, nb)).fill_with_identity();
        psi.view_mut((nb, 0), (ni, nb)).copy_from(&psi_s);
        psi.view_mut((nb, nb), (ni, nm)).copy_from(&psi_d);

        let psi_t = psi.transpose();
        let m_red = &psi_t * m * &psi;
        let k_red = &psi_t * k * &psi;
        let cq_red = cq.rows(0, nbc) * &psi;
        let r_red = damping.compute_r(&DampingContext {
            m_red: &m_red,
            k_red: &k_red,
            psi: &psi,
            r_loc: &self.local.damping,
            n_boundary_w: nb,
            n_modes: nm,
        });
        debug!(
            m_red = m_red.norm(),
            k_red = k_red.norm(),
            r_red = r_red.norm(),
            damping = damping.name(),
            "reduced matrices"
        );

        Ok(Reduction {
            psi,
            psi_s,
            psi_d,
            m_red,
            k_red,
            r_red,
            cq_red,
        })
    }
}

/// Relative size of the internal elastic forces produced by the six rigid
/// motions of the floating frame, `‖(K·Φ)_I‖ / (‖K‖·‖Φ‖)`.
///
/// `rigid` holds the rigid motions in the local basis (n_bw + n_iw × 6).
pub fn rigid_mode_residual(stiffness: &DMatrix<f64>, rigid: &DMatrix<f64>, n_boundary_w: usize) -> f64 {
    let n = stiffness.nrows();
    let forces = stiffness * rigid;
    let internal = forces.rows(n_boundary_w, n - n_boundary_w).norm();
    let scale = stiffness.norm() * rigid.norm();
    if scale > 0.0 { internal / scale } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::damping::{NoDamping, ReductionDamping};
    use approx::assert_relative_eq;

    /// Three unit masses in a line, springs k between neighbours; DOF 0 is
    /// the boundary.
    fn chain(k: f64) -> LocalMatrices {
        LocalMatrices {
            mass: DMatrix::identity(3, 3),
            stiffness: DMatrix::from_row_slice(3, 3, &[k, -k, 0.0, -k, 2.0 * k, -k, 0.0, -k, k]),
            damping: DMatrix::identity(3, 3) * 0.1,
            constraint_jacobian: DMatrix::zeros(0, 3),
        }
    }

    fn partition(nbc: usize, nic: usize) -> Partition {
        Partition {
            n_boundary_w: 1,
            n_internal_w: 2,
            n_boundary_constraints: nbc,
            n_internal_constraints: nic,
        }
    }

    #[test]
    fn static_modes_reproduce_rigid_translation() {
        let local = chain(10.0);
        let reducer = ComponentModeReducer::new(partition(0, 0), &local);
        // Internal part of K is non-singular once the boundary is held
        let out = reducer.reduce(&DMatrix::zeros(3, 0), &NoDamping).unwrap();
        assert_relative_eq!(out.psi_s[(0, 0)], 1.0, epsilon = 1e-12);
        assert_relative_eq!(out.psi_s[(1, 0)], 1.0, epsilon = 1e-12);
        // Rigid translation carries the whole mass and no stiffness
        assert_relative_eq!(out.m_red[(0, 0)], 3.0, epsilon = 1e-12);
        assert_relative_eq!(out.k_red[(0, 0)], 0.0, epsilon = 1e-10);
    }

    #[test]
    fn internal_constraints_border_the_solve() {
        let mut local = chain(10.0);
        // Lock the last mass to ground
        local.constraint_jacobian = DMatrix::from_row_slice(1, 3, &[0.0, 0.0, 1.0]);
        let reducer = ComponentModeReducer::new(partition(0, 1), &local);
        let out = reducer.reduce(&DMatrix::zeros(3, 0), &NoDamping).unwrap();
        assert_relative_eq!(out.psi_s[(0, 0)], 0.5, epsilon = 1e-12);
        assert_relative_eq!(out.psi_s[(1, 0)], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn dynamic_modes_extend_psi() {
        let local = chain(10.0);
        let modes = DMatrix::from_row_slice(3, 1, &[0.0, 1.0, 1.0]);
        let reducer = ComponentModeReducer::new(partition(0, 0), &local);
        let out = reducer.reduce(&modes, &ReductionDamping).unwrap();
        assert_eq!(out.psi.shape(), (3, 2));
        assert_eq!(out.m_red.shape(), (2, 2));
        assert_eq!(out.r_red.shape(), (2, 2));
        assert_relative_eq!(out.m_red, out.m_red.transpose(), epsilon = 1e-12);
        assert!(out.r_red[(1, 1)] > 0.0);
    }

    #[test]
    fn floating_internal_partition_is_singular() {
        let local = LocalMatrices {
            mass: DMatrix::identity(2, 2),
            stiffness: DMatrix::zeros(2, 2),
            damping: DMatrix::zeros(2, 2),
            constraint_jacobian: DMatrix::zeros(0, 2),
        };
        let partition = Partition {
            n_boundary_w: 1,
            n_internal_w: 1,
            n_boundary_constraints: 0,
            n_internal_constraints: 0,
        };
        let err = ComponentModeReducer::new(partition, &local)
            .reduce(&DMatrix::zeros(2, 0), &NoDamping)
            .unwrap_err();
        assert!(matches!(err, ModalError::SingularBorderedStiffness { size: 1 }));
    }

    #[test]
    fn rigid_residual_vanishes_for_translation() {
        let local = chain(5.0);
        let rigid = DMatrix::from_element(3, 1, 1.0);
        assert!(rigid_mode_residual(&local.stiffness, &rigid, 1) < 1e-14);
        let bent = DMatrix::from_row_slice(3, 1, &[0.0, 1.0, 0.0]);
        assert!(rigid_mode_residual(&local.stiffness, &bent, 1) > 0.1);
    }
}
