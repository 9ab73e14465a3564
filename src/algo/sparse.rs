//! Sparse matrices and an iterative SPD solver.
//!
//! The scale field and the final position refinement both reduce to
//! `(L + λ·W) x = λ·W·t` where `L` is a weighted graph Laplacian and `W` a
//! non-negative diagonal. Those systems are symmetric positive definite as
//! soon as every connected component carries at least one anchor, so a
//! Jacobi-preconditioned conjugate gradient is all that is needed.

use nalgebra::DVector;

use crate::error::{MeshError, Result};

/// Compressed Sparse Row (CSR) matrix.
#[derive(Debug, Clone)]
pub struct CsrMatrix {
    rows: usize,
    cols: usize,
    /// `row_ptr[i]..row_ptr[i + 1]` indexes the entries of row `i`.
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
    values: Vec<f64>,
}

impl CsrMatrix {
    /// Create a CSR matrix from triplets (row, col, value).
    ///
    /// Duplicate entries at the same (row, col) are summed.
    pub fn from_triplets(rows: usize, cols: usize, mut triplets: Vec<(usize, usize, f64)>) -> Self {
        triplets.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

        let mut row_ptr = vec![0usize; rows + 1];
        let mut col_idx: Vec<usize> = Vec::with_capacity(triplets.len());
        let mut values: Vec<f64> = Vec::with_capacity(triplets.len());
        let mut last: Option<(usize, usize)> = None;

        for (row, col, val) in triplets {
            debug_assert!(row < rows && col < cols, "triplet out of bounds");
            if last == Some((row, col)) {
                if let Some(v) = values.last_mut() {
                    *v += val;
                }
                continue;
            }
            col_idx.push(col);
            values.push(val);
            row_ptr[row + 1] += 1;
            last = Some((row, col));
        }
        for r in 0..rows {
            row_ptr[r + 1] += row_ptr[r];
        }

        Self {
            rows,
            cols,
            row_ptr,
            col_idx,
            values,
        }
    }

    /// Get the number of rows.
    #[inline]
    pub fn nrows(&self) -> usize {
        self.rows
    }

    /// Get the number of columns.
    #[inline]
    pub fn ncols(&self) -> usize {
        self.cols
    }

    /// Get the number of stored entries.
    #[inline]
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Diagonal entries (zero where nothing is stored).
    pub fn diagonal(&self) -> DVector<f64> {
        let mut d = DVector::zeros(self.rows.min(self.cols));
        for i in 0..d.len() {
            for k in self.row_ptr[i]..self.row_ptr[i + 1] {
                if self.col_idx[k] == i {
                    d[i] += self.values[k];
                }
            }
        }
        d
    }

    /// Multiply matrix by vector: y = A * x.
    pub fn mul_vec(&self, x: &DVector<f64>) -> DVector<f64> {
        assert_eq!(x.len(), self.cols, "Vector dimension mismatch");

        let mut y = DVector::zeros(self.rows);
        for i in 0..self.rows {
            let mut sum = 0.0;
            for k in self.row_ptr[i]..self.row_ptr[i + 1] {
                sum += self.values[k] * x[self.col_idx[k]];
            }
            y[i] = sum;
        }
        y
    }
}

/// Solve `A x = b` with Jacobi-preconditioned conjugate gradients.
///
/// `A` must be symmetric positive definite. `x0` seeds the iteration; the
/// previous field values are usually an excellent starting point.
pub fn conjugate_gradient(
    a: &CsrMatrix,
    b: &DVector<f64>,
    x0: Option<&DVector<f64>>,
    max_iter: usize,
    tolerance: f64,
) -> Result<DVector<f64>> {
    let n = b.len();
    assert_eq!(a.nrows(), n, "Matrix-vector dimension mismatch");
    assert_eq!(a.ncols(), n, "Matrix must be square");

    let mut x = match x0 {
        Some(x0) => x0.clone(),
        None => DVector::zeros(n),
    };

    let b_norm = b.norm();
    if b_norm < 1e-15 {
        return Ok(DVector::zeros(n));
    }

    let inv_diag = a
        .diagonal()
        .map(|d| if d.abs() > 1e-15 { 1.0 / d } else { 1.0 });

    let mut r = b - a.mul_vec(&x);
    if r.norm() / b_norm < tolerance {
        return Ok(x);
    }
    let mut z = r.component_mul(&inv_diag);
    let mut p = z.clone();
    let mut rz = r.dot(&z);

    for _ in 0..max_iter {
        let ap = a.mul_vec(&p);
        let p_ap = p.dot(&ap);
        if p_ap.abs() < 1e-30 {
            break;
        }
        let alpha = rz / p_ap;
        x += alpha * &p;
        r -= alpha * &ap;

        if r.norm() / b_norm < tolerance {
            return Ok(x);
        }

        z = r.component_mul(&inv_diag);
        let rz_new = r.dot(&z);
        let beta = rz_new / rz;
        p = &z + beta * &p;
        rz = rz_new;
    }

    if r.norm() / b_norm < tolerance.sqrt() {
        // Loose convergence is good enough for geometric refinement.
        return Ok(x);
    }
    Err(MeshError::ConvergenceFailed {
        iterations: max_iter,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csr_from_triplets_with_duplicates() {
        let triplets = vec![
            (0, 0, 2.0),
            (0, 0, 2.0),
            (0, 1, 1.0),
            (1, 0, 1.0),
            (1, 1, 3.0),
        ];
        let a = CsrMatrix::from_triplets(2, 2, triplets);
        assert_eq!(a.nnz(), 4);

        let y = a.mul_vec(&DVector::from_vec(vec![1.0, 0.0]));
        assert!((y[0] - 4.0).abs() < 1e-10);
        assert!((y[1] - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_csr_empty_rows() {
        let a = CsrMatrix::from_triplets(3, 3, vec![(2, 2, 5.0)]);
        let y = a.mul_vec(&DVector::from_vec(vec![1.0, 1.0, 1.0]));
        assert_eq!(y[0], 0.0);
        assert_eq!(y[1], 0.0);
        assert_eq!(y[2], 5.0);
        assert_eq!(a.diagonal()[2], 5.0);
    }

    #[test]
    fn test_cg_simple() {
        // [4 1; 1 3] x = [1; 2]  =>  x = (1/11, 7/11)
        let triplets = vec![(0, 0, 4.0), (0, 1, 1.0), (1, 0, 1.0), (1, 1, 3.0)];
        let a = CsrMatrix::from_triplets(2, 2, triplets);
        let b = DVector::from_vec(vec![1.0, 2.0]);

        let x = conjugate_gradient(&a, &b, None, 100, 1e-10).unwrap();
        assert!((x[0] - 1.0 / 11.0).abs() < 1e-8);
        assert!((x[1] - 7.0 / 11.0).abs() < 1e-8);
    }

    #[test]
    fn test_cg_regularized_path_laplacian() {
        // Path graph Laplacian + identity anchors toward t = (0, 1, 2, 3).
        let n = 4;
        let mut triplets = Vec::new();
        for i in 0..n - 1 {
            triplets.push((i, i, 1.0));
            triplets.push((i + 1, i + 1, 1.0));
            triplets.push((i, i + 1, -1.0));
            triplets.push((i + 1, i, -1.0));
        }
        for i in 0..n {
            triplets.push((i, i, 1.0));
        }
        let a = CsrMatrix::from_triplets(n, n, triplets);
        let b = DVector::from_vec(vec![0.0, 1.0, 2.0, 3.0]);

        let x = conjugate_gradient(&a, &b, None, 100, 1e-12).unwrap();
        let residual = a.mul_vec(&x) - &b;
        assert!(residual.norm() < 1e-8);
        // A linear ramp is in the kernel of the interior Laplacian rows.
        assert!((x[1] - 1.0).abs() < 0.5);
    }
}
