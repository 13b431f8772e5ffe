// src/alignment.rs
// Kabsch superposition of trajectory frames onto a reference frame.
// The SVD sign step keeps det(R) = +1 so aligned frames never change handedness.

use log::{info, trace, warn};
use ndarray::{Array1, Array2, Array3, ArrayView2, ArrayView3, Axis};
use rayon::prelude::*;

use crate::diagnostics::PipelineWarning;
use crate::error::{PcaError, PcaResult};
use crate::linalg_backends::{det3, BackendSVD, NdarrayLinAlgBackend};

/// Second/first singular value ratio of the cross-covariance below which the optimal
/// rotation is not unique (all atoms (nearly) collinear).
const NEAR_SINGULAR_ALIGNMENT_RATIO: f64 = 1e-10;

/// Optimal rotation of a centred mobile structure onto a centred reference.
#[derive(Debug, Clone)]
pub struct KabschFit {
    /// Proper rotation (det +1), applied to column vectors: `p ≈ R q`.
    pub rotation: Array2<f64>,
    /// Singular values of the 3x3 cross-covariance, descending.
    pub singular_values: Array1<f64>,
}

impl KabschFit {
    pub fn singular_value_ratio(&self) -> f64 {
        if self.singular_values[0] <= f64::MIN_POSITIVE {
            0.0
        } else {
            self.singular_values[1] / self.singular_values[0]
        }
    }
}

/// One frame superposed onto the reference.
#[derive(Debug, Clone)]
pub struct Superposition {
    pub coordinates: Array2<f64>,
    pub rotation: Array2<f64>,
    pub rmsd: f64,
    pub singular_value_ratio: f64,
}

/// All frames of a trajectory superposed onto one reference frame.
#[derive(Debug, Clone)]
pub struct AlignedTrajectory {
    /// Shape `(n_frames, n_atoms, 3)`, same frame order as the input.
    pub coordinates: Array3<f64>,
    pub rmsd_to_reference: Array1<f64>,
    pub warnings: Vec<PipelineWarning>,
}

pub fn centroid(frame: &ArrayView2<f64>) -> Array1<f64> {
    frame.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(3))
}

/// Root-mean-square deviation between two frames with identical atom order.
pub fn rmsd(a: &ArrayView2<f64>, b: &ArrayView2<f64>) -> f64 {
    if a.nrows() == 0 || a.dim() != b.dim() {
        return f64::INFINITY;
    }
    let sum_sq: f64 = a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum();
    (sum_sq / a.nrows() as f64).sqrt()
}

/// Computes the optimal proper rotation R minimising sum |R q_i - p_i|^2.
///
/// Uses the SVD of H = Q^T P = U S V^T and R = V diag(1, 1, d) U^T with
/// d = sign(det(V U^T)), which turns an improper solution into the best proper one.
pub fn kabsch_rotation(reference_centered: &ArrayView2<f64>, mobile_centered: &ArrayView2<f64>) -> PcaResult<KabschFit> {
    if reference_centered.dim() != mobile_centered.dim() || reference_centered.ncols() != 3 {
        return Err(PcaError::InputShape(format!(
            "cannot superpose structures of shapes {:?} and {:?}",
            mobile_centered.dim(),
            reference_centered.dim()
        )));
    }
    let cross_covariance = mobile_centered.t().dot(reference_centered);
    let svd = NdarrayLinAlgBackend.svd_into(cross_covariance, true, true)?;
    let u = svd.u.ok_or_else(|| PcaError::Linalg("Kabsch SVD did not return U".into()))?;
    let vt = svd.vt.ok_or_else(|| PcaError::Linalg("Kabsch SVD did not return V^T".into()))?;
    let v = vt.t();

    let mut correction = Array2::<f64>::eye(3);
    if det3(&v.dot(&u.t())) < 0.0 {
        correction[[2, 2]] = -1.0;
    }
    let rotation = v.dot(&correction).dot(&u.t());
    Ok(KabschFit { rotation, singular_values: svd.s })
}

/// Superposes `mobile` onto `reference` (both N x 3, same atom order).
pub fn superpose(reference: &ArrayView2<f64>, mobile: &ArrayView2<f64>) -> PcaResult<Superposition> {
    let ref_centroid = centroid(reference);
    let mob_centroid = centroid(mobile);
    let ref_centered = reference - &ref_centroid;
    let mob_centered = mobile - &mob_centroid;

    let fit = kabsch_rotation(&ref_centered.view(), &mob_centered.view())?;
    let mut coordinates = mob_centered.dot(&fit.rotation.t());
    coordinates += &ref_centroid;
    let rmsd = rmsd(&coordinates.view(), reference);
    let singular_value_ratio = fit.singular_value_ratio();
    Ok(Superposition { coordinates, rotation: fit.rotation, rmsd, singular_value_ratio })
}

/// Superposes every frame onto `coordinates[reference_frame]`.
///
/// # Errors
/// `InputShape` for fewer than 3 atoms (alignment is ill-defined) and `Configuration`
/// for an out-of-range reference frame.
pub fn align_trajectory(coordinates: &ArrayView3<f64>, reference_frame: usize) -> PcaResult<AlignedTrajectory> {
    let (n_frames, n_atoms, _) = coordinates.dim();
    if n_atoms < 3 {
        return Err(PcaError::InputShape(format!(
            "alignment needs at least 3 atoms, trajectory has {}",
            n_atoms
        )));
    }
    if reference_frame >= n_frames {
        return Err(PcaError::Configuration(format!(
            "reference frame {} out of range for {} frames",
            reference_frame, n_frames
        )));
    }

    info!("Aligning {} frames ({} atoms) onto frame {}.", n_frames, n_atoms, reference_frame);
    let start_time = std::time::Instant::now();
    let reference = coordinates.index_axis(Axis(0), reference_frame);

    let superpositions: Vec<Superposition> = (0..n_frames)
        .into_par_iter()
        .map(|idx| superpose(&reference, &coordinates.index_axis(Axis(0), idx)))
        .collect::<PcaResult<Vec<_>>>()?;

    let mut aligned = Array3::<f64>::zeros((n_frames, n_atoms, 3));
    let mut rmsd_to_reference = Array1::<f64>::zeros(n_frames);
    let mut warnings = Vec::new();
    for (idx, sup) in superpositions.into_iter().enumerate() {
        trace!("Frame {}: RMSD to reference {:.6} after superposition.", idx, sup.rmsd);
        if sup.singular_value_ratio < NEAR_SINGULAR_ALIGNMENT_RATIO {
            warn!(
                "Frame {}: near-singular alignment (singular value ratio {:.3e}); rotation is not unique.",
                idx, sup.singular_value_ratio
            );
            warnings.push(PipelineWarning::NearSingularAlignment {
                frame: idx,
                singular_value_ratio: sup.singular_value_ratio,
            });
        }
        aligned.index_axis_mut(Axis(0), idx).assign(&sup.coordinates);
        rmsd_to_reference[idx] = sup.rmsd;
    }

    info!("Aligned trajectory in {:?}.", start_time.elapsed());
    Ok(AlignedTrajectory { coordinates: aligned, rmsd_to_reference, warnings })
}
