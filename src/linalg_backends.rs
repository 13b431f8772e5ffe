// src/linalg_backends.rs

use ndarray::{Array1, Array2};
use ndarray_linalg::{Eigh as NdLinalgEigh, QR as NdLinalgQR, SVDInto as NdLinalgSVDInto, UPLO};

use crate::error::{PcaError, PcaResult};

/// Output of a symmetric eigendecomposition.
#[derive(Debug)]
pub struct EighOutput {
    /// Eigenvalues in ascending order.
    pub eigenvalues: Array1<f64>,
    /// Eigenvectors as columns of the matrix.
    /// eigenvectors.column(i) corresponds to eigenvalues[i].
    pub eigenvectors: Array2<f64>,
}

impl EighOutput {
    /// Eigenpairs sorted by descending eigenvalue.
    ///
    /// Ties keep the backend's order, which is not guaranteed to be stable across
    /// LAPACK implementations.
    pub fn into_descending_pairs(self) -> Vec<(f64, Array1<f64>)> {
        let mut pairs: Vec<(f64, Array1<f64>)> = self
            .eigenvalues
            .into_iter()
            .zip(self.eigenvectors.columns().into_iter().map(|col| col.to_owned()))
            .collect();
        pairs.sort_by(|(a, _), (b, _)| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
        pairs
    }
}

/// Trait for symmetric eigendecomposition (similar to LAPACK's DSYEVD).
/// Implementers expect `matrix` to be symmetric; only the upper triangle is read.
pub trait BackendEigh {
    fn eigh_upper(&self, matrix: &Array2<f64>) -> PcaResult<EighOutput>;
}

/// Trait for QR decomposition, focusing on retrieving the Q factor.
pub trait BackendQR {
    fn qr_q_factor(&self, matrix: &Array2<f64>) -> PcaResult<Array2<f64>>;
}

/// Output of a Singular Value Decomposition.
#[derive(Debug)]
pub struct SVDOutput {
    pub u: Option<Array2<f64>>,
    pub s: Array1<f64>,
    pub vt: Option<Array2<f64>>,
}

/// Trait for Singular Value Decomposition.
pub trait BackendSVD {
    fn svd_into(&self, matrix: Array2<f64>, compute_u: bool, compute_v: bool) -> PcaResult<SVDOutput>;
}

/// `ndarray-linalg` (LAPACK) implementation of the backend traits.
#[derive(Debug, Default, Copy, Clone)]
pub struct NdarrayLinAlgBackend;

fn linalg_error(context: &str, err: ndarray_linalg::error::LinalgError) -> PcaError {
    PcaError::Linalg(format!("{}: {}", context, err))
}

impl BackendEigh for NdarrayLinAlgBackend {
    fn eigh_upper(&self, matrix: &Array2<f64>) -> PcaResult<EighOutput> {
        if matrix.nrows() != matrix.ncols() {
            return Err(PcaError::Linalg(format!(
                "Matrix must be square for eigendecomposition, got {}x{}.",
                matrix.nrows(),
                matrix.ncols()
            )));
        }
        if matrix.is_empty() {
            return Ok(EighOutput { eigenvalues: Array1::zeros(0), eigenvectors: Array2::zeros((0, 0)) });
        }
        let (eigenvalues, eigenvectors) = matrix
            .eigh(UPLO::Upper)
            .map_err(|e| linalg_error("symmetric eigendecomposition failed", e))?;
        Ok(EighOutput { eigenvalues, eigenvectors })
    }
}

impl BackendQR for NdarrayLinAlgBackend {
    fn qr_q_factor(&self, matrix: &Array2<f64>) -> PcaResult<Array2<f64>> {
        let (q_factor, _r) = matrix.qr().map_err(|e| linalg_error("QR decomposition failed", e))?;
        Ok(q_factor)
    }
}

impl BackendSVD for NdarrayLinAlgBackend {
    fn svd_into(&self, matrix: Array2<f64>, compute_u: bool, compute_v: bool) -> PcaResult<SVDOutput> {
        let (u, s, vt) = matrix
            .svd_into(compute_u, compute_v)
            .map_err(|e| linalg_error("singular value decomposition failed", e))?;
        Ok(SVDOutput { u, s, vt })
    }
}

/// Determinant of a 3x3 matrix.
pub fn det3(m: &Array2<f64>) -> f64 {
    m[[0, 0]] * (m[[1, 1]] * m[[2, 2]] - m[[1, 2]] * m[[2, 1]])
        - m[[0, 1]] * (m[[1, 0]] * m[[2, 2]] - m[[1, 2]] * m[[2, 0]])
        + m[[0, 2]] * (m[[1, 0]] * m[[2, 1]] - m[[1, 1]] * m[[2, 0]])
}
