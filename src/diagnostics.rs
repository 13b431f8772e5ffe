// src/diagnostics.rs

use ndarray::{Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Non-fatal conditions collected during a pipeline run or a batch reconstruction.
///
/// These are reported alongside an otherwise complete result; none of them aborts a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PipelineWarning {
    /// More components were requested than the data supports.
    ComponentsClamped { requested: usize, available: usize },
    /// Two retained eigenvalues are nearly equal; their eigenvectors are not uniquely defined.
    NearDegenerateEigenvalues { component: usize, relative_gap: f64 },
    /// The reference-atom cross-covariance has (near) rank deficiency for this frame.
    NearSingularAlignment { frame: usize, singular_value_ratio: f64 },
    /// The four chirality reference atoms are (nearly) coplanar.
    DegenerateChirality { frame: Option<usize>, detail: String },
    /// The reconstructed squared distances are not embeddable in 3D without clipping.
    NegativeMdsEigenvalues { frame: Option<usize>, most_negative: f64, relative_magnitude: f64 },
}

impl fmt::Display for PipelineWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineWarning::ComponentsClamped { requested, available } => write!(
                f,
                "requested {} components but only {} are available; clamped",
                requested, available
            ),
            PipelineWarning::NearDegenerateEigenvalues { component, relative_gap } => write!(
                f,
                "eigenvalues of components {} and {} differ by a relative {:.3e}; their directions are not unique",
                component,
                component + 1,
                relative_gap
            ),
            PipelineWarning::NearSingularAlignment { frame, singular_value_ratio } => write!(
                f,
                "frame {}: near-singular alignment (singular value ratio {:.3e})",
                frame, singular_value_ratio
            ),
            PipelineWarning::DegenerateChirality { frame, detail } => match frame {
                Some(idx) => write!(f, "frame {}: degenerate chirality, {}", idx, detail),
                None => write!(f, "degenerate chirality, {}", detail),
            },
            PipelineWarning::NegativeMdsEigenvalues { frame, most_negative, relative_magnitude } => {
                let prefix = frame.map(|idx| format!("frame {}: ", idx)).unwrap_or_default();
                write!(
                    f,
                    "{}MDS eigenvalue {:.3e} (relative {:.3e}) clipped; distances are not exactly embeddable in 3D",
                    prefix, most_negative, relative_magnitude
                )
            }
        }
    }
}

/// Quality metrics of a fitted model, computed once per pipeline run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FitDiagnostics {
    /// ||I - V^T V||_F of the retained basis.
    pub basis_orthogonality_error: Option<f64>,
    /// ||X - X_k||_F / ||X||_F of the centred feature matrix reconstructed from k components.
    pub relative_reconstruction_error: Option<f64>,
    /// Cumulative explained variance of the retained components.
    pub retained_variance_fraction: f64,
}

/// Frobenius norm of a matrix.
pub fn compute_frob_norm_f64(matrix: &ArrayView2<f64>) -> f64 {
    matrix.iter().map(|&x| x * x).sum::<f64>().sqrt()
}

/// Computes orthogonality error ||I - Q^T Q||_F for an f64 matrix.
pub fn compute_orthogonality_error_f64(q_matrix: &ArrayView2<f64>) -> Option<f64> {
    if q_matrix.nrows() == 0 || q_matrix.ncols() == 0 {
        return None;
    }
    let qtq = q_matrix.t().dot(q_matrix);
    let identity = Array2::<f64>::eye(qtq.nrows());
    let diff = identity - qtq;
    Some(compute_frob_norm_f64(&diff.view()))
}

/// Relative error ||A - B||_F / ||A||_F; `Some(0.0)` when both are (near) zero.
pub fn compute_relative_error_f64(original: &ArrayView2<f64>, approximation: &ArrayView2<f64>) -> Option<f64> {
    if original.dim() != approximation.dim() || original.is_empty() {
        return None;
    }
    let diff = original - approximation;
    let norm_diff = compute_frob_norm_f64(&diff.view());
    let norm_original = compute_frob_norm_f64(original);
    if norm_original < 1e-12 {
        if norm_diff < 1e-12 {
            Some(0.0)
        } else {
            Some(f64::INFINITY)
        }
    } else {
        Some(norm_diff / norm_original)
    }
}

/// Flags adjacent eigenvalues whose relative gap is below `relative_tolerance`.
pub fn near_degenerate_eigenvalues(eigenvalues: &ArrayView1<f64>, relative_tolerance: f64) -> Vec<PipelineWarning> {
    let largest = eigenvalues.iter().cloned().fold(0.0_f64, f64::max);
    if largest <= 0.0 {
        return Vec::new();
    }
    eigenvalues
        .windows(2)
        .into_iter()
        .enumerate()
        .filter_map(|(idx, pair)| {
            let gap = (pair[0] - pair[1]).abs() / largest;
            // Components with no variance are not interesting to report.
            if pair[1] > 1e-12 * largest && gap < relative_tolerance {
                Some(PipelineWarning::NearDegenerateEigenvalues { component: idx, relative_gap: gap })
            } else {
                None
            }
        })
        .collect()
}
