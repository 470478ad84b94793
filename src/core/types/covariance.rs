//! Dense covariance storage for solved variables.

use nalgebra::{DMatrix, Matrix2};
use serde::{Deserialize, Serialize};

/// Square covariance matrix of one variable (3x3 pose, 2x2 point, 4x4 line).
///
/// Stored row-major so snapshots serialize without pulling in nalgebra's
/// serde support.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Covariance {
    dim: usize,
    data: Vec<f64>,
}

impl Covariance {
    /// Create a zero covariance matrix.
    pub fn zero(dim: usize) -> Self {
        Self {
            dim,
            data: vec![0.0; dim * dim],
        }
    }

    /// Create a diagonal covariance from variances.
    pub fn diagonal(variances: &[f64]) -> Self {
        let dim = variances.len();
        let mut cov = Self::zero(dim);
        for (i, v) in variances.iter().enumerate() {
            cov.data[i * dim + i] = *v;
        }
        cov
    }

    /// Copy out of a dense matrix.
    pub fn from_matrix(m: &DMatrix<f64>) -> Self {
        let dim = m.nrows();
        let mut data = Vec::with_capacity(dim * dim);
        for r in 0..dim {
            for c in 0..dim {
                data.push(m[(r, c)]);
            }
        }
        Self { dim, data }
    }

    /// Dense matrix view.
    pub fn to_matrix(&self) -> DMatrix<f64> {
        DMatrix::from_row_slice(self.dim, self.dim, &self.data)
    }

    /// Matrix dimension.
    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Element at (row, col).
    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.dim + col]
    }

    /// Upper-left 2x2 block (position covariance for poses and points).
    pub fn position_block(&self) -> Matrix2<f64> {
        if self.dim < 2 {
            return Matrix2::zeros();
        }
        Matrix2::new(self.get(0, 0), self.get(0, 1), self.get(1, 0), self.get(1, 1))
    }

    /// Sum of the diagonal.
    pub fn trace(&self) -> f64 {
        (0..self.dim).map(|i| self.get(i, i)).sum()
    }

    /// Raw row-major data.
    #[inline]
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagonal_and_block() {
        let cov = Covariance::diagonal(&[0.1, 0.2, 0.05]);
        assert_eq!(cov.dim(), 3);
        assert_eq!(cov.get(2, 2), 0.05);
        assert_eq!(cov.position_block()[(1, 1)], 0.2);
        assert!((cov.trace() - 0.35).abs() < 1e-12);
    }

    #[test]
    fn test_matrix_roundtrip() {
        let m = DMatrix::from_row_slice(2, 2, &[1.0, 0.5, 0.5, 2.0]);
        let cov = Covariance::from_matrix(&m);
        assert_eq!(cov.as_slice(), &[1.0, 0.5, 0.5, 2.0]);
        assert_eq!(cov.to_matrix(), m);
    }
}
