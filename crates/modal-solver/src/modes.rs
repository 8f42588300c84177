//! Mode sets returned by the eigen solvers.

use nalgebra::{Complex, DMatrix, DVector};

/// Eigenvalues and eigenvectors of a constrained (possibly damped) system.
///
/// Undamped solves store `λ = ω²` as a real eigenvalue and real vectors;
/// damped solves store the complex root `λ = -ζω ± iω√(1-ζ²)` with
/// non-negative imaginary part.
#[derive(Debug, Clone, PartialEq)]
pub struct ModeSet {
    pub eigenvalues: DVector<Complex<f64>>,
    /// One column per mode, one row per velocity coordinate
    pub vectors: DMatrix<Complex<f64>>,
    /// Natural frequencies in Hz
    pub frequencies: Vec<f64>,
    pub damping_ratios: Vec<f64>,
}

impl ModeSet {
    /// A set with no modes for a system of `n_dofs` coordinates.
    pub fn empty(n_dofs: usize) -> Self {
        Self {
            eigenvalues: DVector::zeros(0),
            vectors: DMatrix::zeros(n_dofs, 0),
            frequencies: Vec::new(),
            damping_ratios: Vec::new(),
        }
    }

    /// Builds an undamped set from `λ = ω²` and real vectors.
    pub fn from_real(eigenvalues: &[f64], vectors: &DMatrix<f64>) -> Self {
        let frequencies = eigenvalues
            .iter()
            .map(|l| l.max(0.0).sqrt() / (2.0 * std::f64::consts::PI))
            .collect();
        Self {
            eigenvalues: DVector::from_iterator(
                eigenvalues.len(),
                eigenvalues.iter().map(|l| Complex::new(*l, 0.0)),
            ),
            vectors: vectors.map(|v| Complex::new(v, 0.0)),
            frequencies,
            damping_ratios: vec![0.0; eigenvalues.len()],
        }
    }

    /// Builds a damped set from complex roots and complex vectors.
    pub fn from_complex(eigenvalues: Vec<Complex<f64>>, vectors: DMatrix<Complex<f64>>) -> Self {
        let frequencies = eigenvalues
            .iter()
            .map(|l| l.norm() / (2.0 * std::f64::consts::PI))
            .collect();
        let damping_ratios = eigenvalues
            .iter()
            .map(|l| if l.norm() > 0.0 { -l.re / l.norm() } else { 0.0 })
            .collect();
        Self {
            eigenvalues: DVector::from_vec(eigenvalues),
            vectors,
            frequencies,
            damping_ratios,
        }
    }

    pub fn len(&self) -> usize {
        self.eigenvalues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.eigenvalues.is_empty()
    }

    pub fn n_dofs(&self) -> usize {
        self.vectors.nrows()
    }

    /// Real parts of the vectors, used as the dynamic modes of a reduction.
    pub fn real_vectors(&self) -> DMatrix<f64> {
        self.vectors.map(|v| v.re)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn real_set_reports_hz() {
        let w = 2.0 * std::f64::consts::PI * 3.0;
        let set = ModeSet::from_real(&[w * w, -1e-12], &DMatrix::identity(2, 2));
        assert!((set.frequencies[0] - 3.0).abs() < 1e-12);
        assert_eq!(set.frequencies[1], 0.0);
        assert_eq!(set.damping_ratios, vec![0.0, 0.0]);
    }

    #[test]
    fn complex_set_reports_damping_ratio() {
        let zeta: f64 = 0.05;
        let w = 10.0;
        let root = Complex::new(-zeta * w, w * (1.0 - zeta * zeta).sqrt());
        let set = ModeSet::from_complex(vec![root], DMatrix::zeros(1, 1));
        assert!((set.damping_ratios[0] - zeta).abs() < 1e-12);
        assert!((set.frequencies[0] * 2.0 * std::f64::consts::PI - w).abs() < 1e-9);
    }
}
