//! Damping of the reduced model.
//!
//! The reducer leaves `R_red` to a [`DampingModel`]. Models see the reduced
//! mass and stiffness, the projection `Psi` and the full local damping.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

/// Everything a damping model may use to build `R_red`.
pub struct DampingContext<'a> {
    pub m_red: &'a DMatrix<f64>,
    pub k_red: &'a DMatrix<f64>,
    pub psi: &'a DMatrix<f64>,
    /// Full damping in the local basis (boundary + internal)
    pub r_loc: &'a DMatrix<f64>,
    pub n_boundary_w: usize,
    pub n_modes: usize,
}

/// Strategy producing the reduced damping matrix `R_red`.
pub trait DampingModel: Send + Sync {
    fn compute_r(&self, ctx: &DampingContext<'_>) -> DMatrix<f64>;

    fn name(&self) -> &str;
}

/// `R_red = 0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NoDamping;

impl DampingModel for NoDamping {
    fn compute_r(&self, ctx: &DampingContext<'_>) -> DMatrix<f64> {
        DMatrix::zeros(ctx.m_red.nrows(), ctx.m_red.ncols())
    }

    fn name(&self) -> &str {
        "none"
    }
}

/// `R_red = α·M_red + β·K_red`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RayleighDamping {
    pub alpha: f64,
    pub beta: f64,
}

impl RayleighDamping {
    pub fn new(alpha: f64, beta: f64) -> Self {
        Self { alpha, beta }
    }
}

impl DampingModel for RayleighDamping {
    fn compute_r(&self, ctx: &DampingContext<'_>) -> DMatrix<f64> {
        ctx.m_red * self.alpha + ctx.k_red * self.beta
    }

    fn name(&self) -> &str {
        "rayleigh"
    }
}

/// Damping ratio per mode, placed on the modal diagonal as
/// `2·ζ_i·sqrt(k_i·m_i)`. Modes past the end of `ratios` reuse the last one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModalRatioDamping {
    pub ratios: Vec<f64>,
}

impl ModalRatioDamping {
    pub fn new(ratios: Vec<f64>) -> Self {
        Self { ratios }
    }

    /// The same ratio for every mode.
    pub fn uniform(ratio: f64) -> Self {
        Self { ratios: vec![ratio] }
    }

    fn ratio(&self, mode: usize) -> f64 {
        self.ratios
            .get(mode)
            .or(self.ratios.last())
            .copied()
            .unwrap_or(0.0)
    }
}

impl DampingModel for ModalRatioDamping {
    fn compute_r(&self, ctx: &DampingContext<'_>) -> DMatrix<f64> {
        let mut r = DMatrix::zeros(ctx.m_red.nrows(), ctx.m_red.ncols());
        for j in 0..ctx.n_modes {
            let i = ctx.n_boundary_w + j;
            let m = ctx.m_red[(i, i)].max(0.0);
            let k = ctx.k_red[(i, i)].max(0.0);
            r[(i, i)] = 2.0 * self.ratio(j) * (k * m).sqrt();
        }
        r
    }

    fn name(&self) -> &str {
        "modal-ratio"
    }
}

/// `R_red = Psiᵗ·R_loc·Psi`: keeps the damping of the elements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ReductionDamping;

impl DampingModel for ReductionDamping {
    fn compute_r(&self, ctx: &DampingContext<'_>) -> DMatrix<f64> {
        ctx.psi.transpose() * ctx.r_loc * ctx.psi
    }

    fn name(&self) -> &str {
        "reduction"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn context<'a>(
        m: &'a DMatrix<f64>,
        k: &'a DMatrix<f64>,
        psi: &'a DMatrix<f64>,
        r: &'a DMatrix<f64>,
    ) -> DampingContext<'a> {
        DampingContext {
            m_red: m,
            k_red: k,
            psi,
            r_loc: r,
            n_boundary_w: 1,
            n_modes: 2,
        }
    }

    #[test]
    fn rayleigh_combines_mass_and_stiffness() {
        let m = DMatrix::from_diagonal_element(3, 3, 2.0);
        let k = DMatrix::from_diagonal_element(3, 3, 10.0);
        let psi = DMatrix::identity(3, 3);
        let r = DMatrix::zeros(3, 3);
        let out = RayleighDamping::new(0.5, 0.01).compute_r(&context(&m, &k, &psi, &r));
        assert_relative_eq!(out[(1, 1)], 1.1, epsilon = 1e-12);
    }

    #[test]
    fn modal_ratio_fills_modal_diagonal_only() {
        let m = DMatrix::from_diagonal(&nalgebra::DVector::from_vec(vec![1.0, 1.0, 4.0]));
        let k = DMatrix::from_diagonal(&nalgebra::DVector::from_vec(vec![0.0, 100.0, 100.0]));
        let psi = DMatrix::identity(3, 3);
        let r = DMatrix::zeros(3, 3);
        let out = ModalRatioDamping::uniform(0.05).compute_r(&context(&m, &k, &psi, &r));
        assert_eq!(out[(0, 0)], 0.0);
        assert_relative_eq!(out[(1, 1)], 2.0 * 0.05 * 10.0, epsilon = 1e-12);
        assert_relative_eq!(out[(2, 2)], 2.0 * 0.05 * 20.0, epsilon = 1e-12);
    }

    #[test]
    fn missing_ratio_reuses_last() {
        let damping = ModalRatioDamping::new(vec![0.01, 0.02]);
        assert_eq!(damping.ratio(5), 0.02);
        assert_eq!(ModalRatioDamping::default().ratio(0), 0.0);
    }

    #[test]
    fn reduction_projects_full_damping() {
        let m = DMatrix::zeros(2, 2);
        let k = DMatrix::zeros(2, 2);
        let psi = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 0.0, 1.0, 0.5, 0.5]);
        let r = DMatrix::identity(3, 3);
        let out = ReductionDamping.compute_r(&context(&m, &k, &psi, &r));
        assert_relative_eq!(out[(0, 0)], 1.25, epsilon = 1e-12);
        assert_relative_eq!(out[(0, 1)], 0.25, epsilon = 1e-12);
    }
}
