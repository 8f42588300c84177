//! Constrained eigen algorithms shared by the backends.
//!
//! Constraints are eliminated with an orthonormal basis `Z` of the null
//! space of `Cq`, so every problem is solved on `Zᵗ·K·Z`, `Zᵗ·M·Z`.
//! Backends differ only in the dense symmetric eigen kernel they plug in.
//!
//! This gives the same eigenpairs as the bordered form
//! `[[K, Cqᵗ],[Cq, 0]]·[v; μ] = λ·[[M, 0],[0, 0]]·[v; μ]`: for `v = Z·y`
//! the residual `K·v − λ·M·v` lies in the range of `Cqᵗ`, and `μ` is the
//! multiplier that cancels it.

use nalgebra::{Cholesky, Complex, DMatrix, DVector};
use tracing::{debug, warn};

use super::traits::{BackendError, EigenSystemData, SolveInfo};
use crate::config::{ModalSolveDamped, ModalSolveUndamped};
use crate::modes::ModeSet;

/// Dense symmetric eigen kernel: eigenvalues and orthonormal eigenvectors.
pub(crate) type SymmetricKernel<'a> = &'a dyn Fn(DMatrix<f64>) -> Option<(DVector<f64>, DMatrix<f64>)>;

const NULL_SPACE_RTOL: f64 = 1e-9;

fn symmetrize(m: DMatrix<f64>) -> DMatrix<f64> {
    (&m + m.transpose()) * 0.5
}

/// Orthonormal basis of `{v : Cq·v = 0}`.
pub(crate) fn constraint_null_space(
    cq: &DMatrix<f64>,
    n: usize,
    kernel: SymmetricKernel<'_>,
) -> Result<DMatrix<f64>, BackendError> {
    if cq.nrows() == 0 || cq.norm() == 0.0 {
        return Ok(DMatrix::identity(n, n));
    }
    let (values, vectors) = kernel(cq.transpose() * cq)
        .ok_or(BackendError("Eigen decomposition of CqᵗCq did not converge".into()))?;
    let threshold = NULL_SPACE_RTOL * values.amax();
    let kept: Vec<usize> = (0..n).filter(|i| values[*i] <= threshold).collect();
    Ok(DMatrix::from_fn(n, kept.len(), |i, j| vectors[(i, kept[j])]))
}

fn dense_parts(system: &EigenSystemData) -> (DMatrix<f64>, DMatrix<f64>, DMatrix<f64>) {
    let n = system.num_dofs;
    let mut cq = system.constraint_jacobian.to_dense();
    if cq.ncols() != n {
        let rows = cq.nrows();
        cq = cq.resize(rows, n, 0.0);
    }
    (system.stiffness.to_dense(), system.mass.to_dense(), cq)
}

/// Indices of `keys` ordered by increasing key, truncated to `count`.
fn closest(keys: &[f64], count: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..keys.len()).collect();
    order.sort_by(|a, b| keys[*a].total_cmp(&keys[*b]));
    order.truncate(count);
    order
}

/// `K·v = λ·M·v`, `Cq·v = 0`.
///
/// Uses `M = L·Lᵗ` on the constrained subspace. When `M` is only
/// semi-definite there (massless coordinates), falls back to the shifted
/// inverse problem `M·v = μ·(K + σ·M)·v` and drops the infinite roots.
pub(crate) fn solve_undamped(
    system: &EigenSystemData,
    settings: &ModalSolveUndamped,
    kernel: SymmetricKernel<'_>,
    solver_name: &str,
) -> Result<(ModeSet, SolveInfo), BackendError> {
    let n = system.num_dofs;
    let info = SolveInfo {
        iterations: 1,
        residual_norm: None,
        solver_name: solver_name.to_string(),
    };
    if settings.n_modes == 0 || n == 0 {
        return Ok((ModeSet::empty(n), info));
    }

    let (k, m, cq) = dense_parts(system);
    let z = constraint_null_space(&cq, n, kernel)?;
    if z.ncols() < settings.n_modes {
        return Err(format!(
            "Requested {} modes but the constrained system has {} free coordinates",
            settings.n_modes,
            z.ncols()
        )
        .into());
    }
    let kz = symmetrize(z.transpose() * &k * &z);
    let mz = symmetrize(z.transpose() * &m * &z);
    debug!(dofs = n, free = z.ncols(), "constrained eigen problem");

    let (lambdas, phis) = match Cholesky::new(mz.clone()) {
        Some(chol) => {
            let l = chol.l();
            let l_inv_k = l
                .solve_lower_triangular(&kz)
                .ok_or(BackendError("Singular Cholesky factor of M".into()))?;
            let k_star = l
                .solve_lower_triangular(&l_inv_k.transpose())
                .ok_or(BackendError("Singular Cholesky factor of M".into()))?;
            let (values, psi) = kernel(symmetrize(k_star))
                .ok_or(BackendError("Symmetric eigen solve did not converge".into()))?;
            let phi = l
                .tr_solve_lower_triangular(&psi)
                .ok_or(BackendError("Singular Cholesky factor of M".into()))?;
            (values.iter().copied().collect::<Vec<_>>(), phi)
        }
        None => {
            warn!("mass matrix is not positive definite on the constrained subspace, using a shifted solve");
            shifted_solve(&kz, &mz, kernel)?
        }
    };

    if lambdas.len() < settings.n_modes {
        return Err(format!(
            "Requested {} modes but only {} finite eigenvalues exist",
            settings.n_modes,
            lambdas.len()
        )
        .into());
    }

    let target = settings.target_eigenvalue();
    let keys: Vec<f64> = lambdas.iter().map(|l| (l - target).abs()).collect();
    let order = closest(&keys, settings.n_modes);
    let eigenvalues: Vec<f64> = order.iter().map(|i| lambdas[*i]).collect();
    let selected = DMatrix::from_fn(phis.nrows(), order.len(), |i, j| phis[(i, order[j])]);
    let vectors = &z * selected;

    let residual = (&k * &vectors - &m * &vectors * DMatrix::from_diagonal(&DVector::from_column_slice(&eigenvalues)))
        .norm();
    if settings.verbose {
        for (i, l) in eigenvalues.iter().enumerate() {
            debug!(mode = i, lambda = *l, "undamped mode");
        }
    }

    Ok((
        ModeSet::from_real(&eigenvalues, &vectors),
        SolveInfo {
            residual_norm: Some(residual),
            ..info
        },
    ))
}

fn shifted_solve(
    kz: &DMatrix<f64>,
    mz: &DMatrix<f64>,
    kernel: SymmetricKernel<'_>,
) -> Result<(Vec<f64>, DMatrix<f64>), BackendError> {
    let m_norm = mz.norm();
    if m_norm == 0.0 {
        return Err("Mass matrix vanishes on the constrained subspace".into());
    }
    let sigma = match kz.norm() / m_norm {
        s if s > 0.0 => s,
        _ => 1.0,
    };
    let chol = Cholesky::new(kz + mz * sigma)
        .ok_or(BackendError("Neither M nor K + σM is positive definite".into()))?;
    let l = chol.l();
    let l_inv_m = l
        .solve_lower_triangular(mz)
        .ok_or(BackendError("Singular Cholesky factor of K + σM".into()))?;
    let b = l
        .solve_lower_triangular(&l_inv_m.transpose())
        .ok_or(BackendError("Singular Cholesky factor of K + σM".into()))?;
    let (mu, psi) = kernel(symmetrize(b)).ok_or(BackendError("Symmetric eigen solve did not converge".into()))?;

    let mu_max = mu.amax();
    let kept: Vec<usize> = (0..mu.len()).filter(|i| mu[*i] > NULL_SPACE_RTOL * mu_max).collect();
    let lambdas = kept.iter().map(|i| 1.0 / mu[*i] - sigma).collect();
    let psi_kept = DMatrix::from_fn(psi.nrows(), kept.len(), |i, j| psi[(i, kept[j])] / mu[kept[j]].sqrt());
    let phi = l
        .tr_solve_lower_triangular(&psi_kept)
        .ok_or(BackendError("Singular Cholesky factor of K + σM".into()))?;
    Ok((lambdas, phi))
}

/// `(λ²·M + λ·R + K)·v = 0`, `Cq·v = 0` through the first-order companion
/// form on the constrained subspace.
///
/// Roots come from a real Schur decomposition; each vector is refined by
/// complex inverse iteration. Only roots with `Im(λ) ≥ 0` are kept.
pub(crate) fn solve_damped(
    system: &EigenSystemData,
    settings: &ModalSolveDamped,
    kernel: SymmetricKernel<'_>,
    solver_name: &str,
) -> Result<(ModeSet, SolveInfo), BackendError> {
    let n = system.num_dofs;
    if settings.n_modes == 0 || n == 0 {
        return Ok((
            ModeSet::empty(n),
            SolveInfo {
                iterations: 0,
                residual_norm: None,
                solver_name: solver_name.to_string(),
            },
        ));
    }

    let (k, m, cq) = dense_parts(system);
    let r = system
        .damping
        .as_ref()
        .map(|d| d.to_dense())
        .unwrap_or_else(|| DMatrix::zeros(n, n));
    let z = constraint_null_space(&cq, n, kernel)?;
    let nz = z.ncols();
    if nz == 0 {
        return Err("Constraints leave no free coordinates".into());
    }
    let kz = z.transpose() * &k * &z;
    let mz = z.transpose() * &m * &z;
    let rz = z.transpose() * &r * &z;

    let m_inv = mz
        .lu()
        .try_inverse()
        .ok_or(BackendError("Damped modes need M invertible on the constrained subspace".into()))?;

    let mut a = DMatrix::zeros(2 * nz, 2 * nz);
    a.view_mut((0, nz), (nz, nz)).fill_with_identity();
    a.view_mut((nz, 0), (nz, nz)).copy_from(&(-&m_inv * &kz));
    a.view_mut((nz, nz), (nz, nz)).copy_from(&(-&m_inv * &rz));

    let schur = a
        .clone()
        .try_schur(settings.tolerance.min(f64::EPSILON.sqrt()), settings.max_iterations)
        .ok_or(BackendError("Schur decomposition did not converge".into()))?;
    let roots = schur.complex_eigenvalues();

    let scale = roots.iter().map(|l| l.norm()).fold(1.0, f64::max);
    let upper: Vec<Complex<f64>> = roots
        .iter()
        .copied()
        .filter(|l| l.im >= -settings.tolerance * scale)
        .collect();
    if upper.len() < settings.n_modes {
        return Err(format!(
            "Requested {} damped modes but only {} roots exist",
            settings.n_modes,
            upper.len()
        )
        .into());
    }

    let target = 2.0 * std::f64::consts::PI * settings.base_freq;
    let keys: Vec<f64> = upper.iter().map(|l| (l.norm() - target).abs()).collect();
    let order = closest(&keys, settings.n_modes);

    let ac = a.map(|v| Complex::new(v, 0.0));
    let zc = z.map(|v| Complex::new(v, 0.0));
    let mut eigenvalues = Vec::with_capacity(order.len());
    let mut vectors = DMatrix::zeros(n, order.len());
    for (col, i) in order.iter().enumerate() {
        let lambda = upper[*i];
        let x = inverse_iteration(&ac, lambda, settings.tolerance)?;
        let phi = &zc * x.rows(0, nz);
        let pivot = phi.iter().copied().max_by(|p, q| p.norm().total_cmp(&q.norm())).unwrap_or(Complex::new(1.0, 0.0));
        let phi = if pivot.norm() > 0.0 { phi.map(|c| c / pivot) } else { phi };
        vectors.set_column(col, &phi);
        eigenvalues.push(lambda);
        if settings.verbose {
            debug!(mode = col, re = lambda.re, im = lambda.im, "damped mode");
        }
    }

    Ok((
        ModeSet::from_complex(eigenvalues, vectors),
        SolveInfo {
            iterations: order.len(),
            residual_norm: None,
            solver_name: format!("{solver_name}+Schur"),
        },
    ))
}

fn inverse_iteration(
    a: &DMatrix<Complex<f64>>,
    lambda: Complex<f64>,
    tolerance: f64,
) -> Result<DVector<Complex<f64>>, BackendError> {
    let n = a.nrows();
    let delta = tolerance.max(1e-10) * (1.0 + lambda.norm());
    let shift = lambda + Complex::new(delta, delta);
    let mut shifted = a.clone();
    for i in 0..n {
        shifted[(i, i)] -= shift;
    }
    let lu = shifted.lu();
    let mut x = DVector::from_element(n, Complex::new(1.0, 0.0));
    for _ in 0..3 {
        let y = lu
            .solve(&x)
            .ok_or(BackendError("Inverse iteration hit a singular shift".into()))?;
        let norm = y.norm();
        if norm == 0.0 || !norm.is_finite() {
            return Err("Inverse iteration diverged".into());
        }
        x = y.map(|c| c / norm);
    }
    Ok(x)
}
