//! ASCII matrix dumps readable from Matlab/Octave.
//!
//! Sparse matrices are written as `row col value` triplets (1-based), one per
//! line, so `spconvert(load(file))` rebuilds them. Dense matrices are written
//! row by row. Values carry 12 significant digits.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use nalgebra::DMatrix;
use nalgebra_sparse::CsrMatrix;

use crate::error::Result;

/// Writes `matrix` as sparse Matlab triplets.
///
/// An explicit zero is written at `(nrows, ncols)` when that entry is not
/// stored, so the loaded matrix keeps its full size.
pub fn write_sparse_matlab(path: impl AsRef<Path>, matrix: &CsrMatrix<f64>) -> Result<()> {
    let mut out = create(path.as_ref())?;
    let mut has_last = false;
    for (row_idx, row) in matrix.row_iter().enumerate() {
        for (&col_idx, &value) in row.col_indices().iter().zip(row.values()) {
            writeln!(out, "{} {} {:.11e}", row_idx + 1, col_idx + 1, value)?;
            has_last |= row_idx + 1 == matrix.nrows() && col_idx + 1 == matrix.ncols();
        }
    }
    if !has_last && matrix.nrows() > 0 && matrix.ncols() > 0 {
        writeln!(out, "{} {} {:.11e}", matrix.nrows(), matrix.ncols(), 0.0)?;
    }
    out.flush()?;
    Ok(())
}

/// Writes `matrix` densely, one row per line.
pub fn write_dense_matlab(path: impl AsRef<Path>, matrix: &DMatrix<f64>) -> Result<()> {
    let mut out = create(path.as_ref())?;
    for i in 0..matrix.nrows() {
        let line: Vec<String> = matrix.row(i).iter().map(|v| format!("{v:.11e}")).collect();
        writeln!(out, "{}", line.join(" "))?;
    }
    out.flush()?;
    Ok(())
}

fn create(path: &Path) -> Result<BufWriter<fs::File>> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    Ok(BufWriter::new(fs::File::create(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use modal_model::descriptor::dense_to_csr;

    #[test]
    fn sparse_dump_writes_one_based_triplets() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("K.dat");
        let dense = DMatrix::from_row_slice(2, 3, &[4.0, 0.0, -1.5, 0.0, 2.0, 0.0]);
        write_sparse_matlab(&path, &dense_to_csr(&dense)).expect("dump");

        let text = fs::read_to_string(&path).expect("read back");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "1 1 4.00000000000e0");
        assert!(lines[1].starts_with("1 3 -1.5"));
        assert_eq!(lines[3], "2 3 0.00000000000e0");
    }

    #[test]
    fn dense_dump_keeps_shape() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("sub").join("Psi.dat");
        let m = DMatrix::from_fn(3, 2, |i, j| (i * 2 + j) as f64 * 0.5);
        write_dense_matlab(&path, &m).expect("dump");

        let text = fs::read_to_string(&path).expect("read back");
        let parsed: Vec<Vec<f64>> = text
            .lines()
            .map(|l| l.split_whitespace().map(|v| v.parse().expect("number")).collect())
            .collect();
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed[2], vec![2.0, 2.5]);
    }
}
