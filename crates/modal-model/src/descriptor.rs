//! Bookkeeping of unknowns, constraint rows and Jacobian blocks.
//!
//! Items register their variable blocks, their `K·Kf + R·Rf + M·Mf` blocks and
//! their constraint rows here. The descriptor then converts them to sparse
//! matrix form by accumulating COO entries and converting to CSR.

use nalgebra::DMatrix;
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use std::collections::HashMap;

/// A block of unknowns with its mass matrix.
#[derive(Debug, Clone)]
pub struct VariableBlock {
    pub offset: usize,
    pub mass: DMatrix<f64>,
}

impl VariableBlock {
    pub fn ndof(&self) -> usize {
        self.mass.nrows()
    }
}

/// A dense Jacobian block scattered to `indices` (rows and columns).
#[derive(Debug, Clone)]
pub struct KrmBlock {
    pub indices: Vec<usize>,
    pub matrix: DMatrix<f64>,
}

/// One bilateral constraint row, as sparse `(column, value)` entries.
#[derive(Debug, Clone)]
pub struct ConstraintRow {
    pub offset: usize,
    pub entries: Vec<(usize, f64)>,
}

#[derive(Debug, Clone)]
pub struct SystemDescriptor {
    variables: Vec<VariableBlock>,
    krm_blocks: Vec<KrmBlock>,
    constraints: Vec<ConstraintRow>,
    mass_factor: f64,
}

impl Default for SystemDescriptor {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemDescriptor {
    pub fn new() -> Self {
        Self {
            variables: Vec::new(),
            krm_blocks: Vec::new(),
            constraints: Vec::new(),
            mass_factor: 0.0,
        }
    }

    pub fn insert_variables(&mut self, block: VariableBlock) {
        self.variables.push(block);
    }

    pub fn insert_krm_block(&mut self, block: KrmBlock) {
        self.krm_blocks.push(block);
    }

    pub fn insert_constraint(&mut self, row: ConstraintRow) {
        self.constraints.push(row);
    }

    /// Scaling applied to variable masses when building the system matrix.
    pub fn set_mass_factor(&mut self, factor: f64) {
        self.mass_factor = factor;
    }

    pub fn variables(&self) -> &[VariableBlock] {
        &self.variables
    }

    pub fn krm_blocks(&self) -> &[KrmBlock] {
        &self.krm_blocks
    }

    pub fn constraints(&self) -> &[ConstraintRow] {
        &self.constraints
    }

    pub fn num_dofs(&self) -> usize {
        let from_vars = self.variables.iter().map(|v| v.offset + v.ndof());
        let from_krm = self
            .krm_blocks
            .iter()
            .flat_map(|b| b.indices.iter().map(|i| i + 1));
        from_vars.chain(from_krm).max().unwrap_or(0)
    }

    pub fn num_constraints(&self) -> usize {
        self.constraints.iter().map(|c| c.offset + 1).max().unwrap_or(0)
    }

    /// `Σ KRM blocks + mass_factor · Σ variable masses` as an `n × n` CSR matrix.
    pub fn system_matrix(&self, n: usize) -> CsrMatrix<f64> {
        let mut entry_map: HashMap<(usize, usize), f64> = HashMap::new();

        for block in &self.krm_blocks {
            for (il, &ig) in block.indices.iter().enumerate() {
                for (jl, &jg) in block.indices.iter().enumerate() {
                    *entry_map.entry((ig, jg)).or_insert(0.0) += block.matrix[(il, jl)];
                }
            }
        }

        if self.mass_factor != 0.0 {
            for var in &self.variables {
                for i in 0..var.ndof() {
                    for j in 0..var.ndof() {
                        *entry_map
                            .entry((var.offset + i, var.offset + j))
                            .or_insert(0.0) += self.mass_factor * var.mass[(i, j)];
                    }
                }
            }
        }

        csr_from_entries(n, n, entry_map)
    }

    /// Constraint Jacobian `Cq` as an `n_rows × n_cols` CSR matrix.
    pub fn constraint_jacobian(&self, n_rows: usize, n_cols: usize) -> CsrMatrix<f64> {
        let mut entry_map: HashMap<(usize, usize), f64> = HashMap::new();
        for row in &self.constraints {
            for &(col, value) in &row.entries {
                *entry_map.entry((row.offset, col)).or_insert(0.0) += value;
            }
        }
        csr_from_entries(n_rows, n_cols, entry_map)
    }
}

/// Drops exact zeros and out-of-range entries, then converts COO to CSR.
fn csr_from_entries(
    nrows: usize,
    ncols: usize,
    entry_map: HashMap<(usize, usize), f64>,
) -> CsrMatrix<f64> {
    let mut rows = Vec::with_capacity(entry_map.len());
    let mut cols = Vec::with_capacity(entry_map.len());
    let mut values = Vec::with_capacity(entry_map.len());

    for ((i, j), v) in entry_map {
        if v != 0.0 && i < nrows && j < ncols {
            rows.push(i);
            cols.push(j);
            values.push(v);
        }
    }

    // Indices are range-checked above, so building the COO cannot fail.
    match CooMatrix::try_from_triplets(nrows, ncols, rows, cols, values) {
        Ok(coo) => CsrMatrix::from(&coo),
        Err(_) => CsrMatrix::zeros(nrows, ncols),
    }
}

/// Dense copy of a CSR matrix.
pub fn csr_to_dense(matrix: &CsrMatrix<f64>) -> DMatrix<f64> {
    let mut dense = DMatrix::zeros(matrix.nrows(), matrix.ncols());
    for (row_idx, row) in matrix.row_iter().enumerate() {
        for (&col_idx, &value) in row.col_indices().iter().zip(row.values().iter()) {
            dense[(row_idx, col_idx)] += value;
        }
    }
    dense
}

/// Sparse copy of a dense matrix, dropping exact zeros.
pub fn dense_to_csr(matrix: &DMatrix<f64>) -> CsrMatrix<f64> {
    let mut entry_map = HashMap::new();
    for j in 0..matrix.ncols() {
        for i in 0..matrix.nrows() {
            let v = matrix[(i, j)];
            if v != 0.0 {
                entry_map.insert((i, j), v);
            }
        }
    }
    csr_from_entries(matrix.nrows(), matrix.ncols(), entry_map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlapping_blocks_are_summed() {
        let mut desc = SystemDescriptor::new();
        desc.insert_krm_block(KrmBlock {
            indices: vec![0, 1],
            matrix: DMatrix::from_row_slice(2, 2, &[1.0, -1.0, -1.0, 1.0]),
        });
        desc.insert_krm_block(KrmBlock {
            indices: vec![1, 2],
            matrix: DMatrix::from_row_slice(2, 2, &[2.0, -2.0, -2.0, 2.0]),
        });
        let k = csr_to_dense(&desc.system_matrix(3));
        assert_eq!(k[(1, 1)], 3.0);
        assert_eq!(k[(0, 2)], 0.0);
        assert_eq!(desc.num_dofs(), 3);
    }

    #[test]
    fn mass_factor_scales_variable_masses() {
        let mut desc = SystemDescriptor::new();
        desc.insert_variables(VariableBlock {
            offset: 1,
            mass: DMatrix::identity(2, 2) * 4.0,
        });
        assert_eq!(desc.system_matrix(3).nnz(), 0);
        desc.set_mass_factor(0.5);
        let m = csr_to_dense(&desc.system_matrix(3));
        assert_eq!(m[(1, 1)], 2.0);
        assert_eq!(m[(2, 2)], 2.0);
        assert_eq!(m[(0, 0)], 0.0);
    }

    #[test]
    fn constraint_rows_build_jacobian() {
        let mut desc = SystemDescriptor::new();
        desc.insert_constraint(ConstraintRow {
            offset: 0,
            entries: vec![(0, 1.0), (3, -1.0)],
        });
        desc.insert_constraint(ConstraintRow {
            offset: 1,
            entries: vec![(2, 1.0)],
        });
        let cq = csr_to_dense(&desc.constraint_jacobian(desc.num_constraints(), 4));
        assert_eq!(cq.shape(), (2, 4));
        assert_eq!(cq[(0, 3)], -1.0);
        assert_eq!(cq[(1, 2)], 1.0);
    }
}
