// src/inverse.rs
// Back-transformation from PC space to 3D structures.
// Distance features go through classical MDS; stored chirality signs pick between the
// embedding and its mirror image. Synthetic points take the handedness of the nearest
// definite frame in retained PC space, lower index on ties, Positive when none is definite.

use log::{debug, info, trace, warn};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::diagnostics::PipelineWarning;
use crate::error::{PcaError, PcaResult};
use crate::features::{chirality, pair_count, Chirality, ChiralityReference, FeatureTransform};
use crate::linalg_backends::{BackendEigh, NdarrayLinAlgBackend};
use crate::pca::PCA;

/// Default relative magnitude above which negative MDS eigenvalues are reported.
pub const DEFAULT_MDS_NEGATIVE_TOLERANCE: f64 = 1e-6;

/// Which handedness a reconstructed structure must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChiralityTarget {
    /// The stored sign of trajectory frame `i`.
    Stored(usize),
    Fixed(Chirality),
    NearestFrame,
}

/// How the chirality of a reconstruction was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChiralityResolution {
    /// Cartesian reconstructions keep their handedness.
    NotRequired,
    Matched,
    /// The MDS embedding had the wrong handedness and was mirrored through x = 0.
    Reflected,
}

/// Result of classical MDS on one squared-distance vector.
#[derive(Debug, Clone)]
pub struct MdsEmbedding {
    /// Centred N x 3 coordinates.
    pub coordinates: Array2<f64>,
    /// All eigenvalues of the double-centred matrix, descending.
    pub eigenvalues: Array1<f64>,
    /// Smallest eigenvalue if negative, else 0.
    pub most_negative_eigenvalue: f64,
    pub warning: Option<PipelineWarning>,
}

#[derive(Debug, Clone)]
pub struct Reconstruction {
    pub coordinates: Array2<f64>,
    pub chirality: ChiralityResolution,
    pub warnings: Vec<PipelineWarning>,
}

/// Reconstruction of several frames. Frames with undefined chirality are `None` and
/// explained by a warning; the rest of the batch is unaffected.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchReconstruction {
    pub frames: Vec<Option<Array2<f64>>>,
    pub warnings: Vec<PipelineWarning>,
}

/// Structures along one principal axis, all other components at the dataset mean.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentSweep {
    pub component: usize,
    /// Score values along the axis, from the observed minimum to maximum.
    pub values: Array1<f64>,
    pub frames: Vec<Option<Array2<f64>>>,
    pub warnings: Vec<PipelineWarning>,
}

/// Feature vector for a point in PC space. Missing trailing components are zero.
pub fn reconstruct_features(model: &PCA, scores: &ArrayView1<f64>) -> PcaResult<Array1<f64>> {
    let features = model.inverse_transform(&scores.view().insert_axis(Axis(0)))?;
    Ok(features.index_axis_move(Axis(0), 0))
}

/// Classical multidimensional scaling of a unique-pair squared-distance vector into 3D.
///
/// Builds the symmetric squared-distance matrix, double-centres it
/// (`B = -1/2 J D^2 J`) and scales the top three eigenvectors by `sqrt(max(lambda, 0))`.
/// Negative eigenvalues larger than `negative_tolerance * lambda_max` mean the distances
/// are not exactly Euclidean in 3D; they are clipped and reported in the `warning`.
pub fn classical_mds(
    squared_distances: &ArrayView1<f64>,
    n_atoms: usize,
    negative_tolerance: f64,
) -> PcaResult<MdsEmbedding> {
    if squared_distances.len() != pair_count(n_atoms) {
        return Err(PcaError::InputShape(format!(
            "{} squared distances do not describe {} atoms (expected {})",
            squared_distances.len(),
            n_atoms,
            pair_count(n_atoms)
        )));
    }

    let mut d2 = Array2::<f64>::zeros((n_atoms, n_atoms));
    let mut k = 0;
    for i in 0..n_atoms {
        for j in (i + 1)..n_atoms {
            d2[[i, j]] = squared_distances[k];
            d2[[j, i]] = squared_distances[k];
            k += 1;
        }
    }

    let row_means = d2.mean_axis(Axis(1)).unwrap_or_else(|| Array1::zeros(n_atoms));
    let grand_mean = row_means.mean().unwrap_or(0.0);
    let b = Array2::from_shape_fn((n_atoms, n_atoms), |(i, j)| {
        -0.5 * (d2[[i, j]] - row_means[i] - row_means[j] + grand_mean)
    });

    let pairs = NdarrayLinAlgBackend.eigh_upper(&b)?.into_descending_pairs();
    let eigenvalues = Array1::from_iter(pairs.iter().map(|(val, _)| *val));
    let largest = eigenvalues.get(0).copied().unwrap_or(0.0).max(0.0);
    let smallest = eigenvalues.iter().last().copied().unwrap_or(0.0);
    let most_negative_eigenvalue = smallest.min(0.0);

    let warning = if most_negative_eigenvalue < 0.0 && largest > 0.0 {
        let relative_magnitude = -most_negative_eigenvalue / largest;
        (relative_magnitude > negative_tolerance).then(|| PipelineWarning::NegativeMdsEigenvalues {
            frame: None,
            most_negative: most_negative_eigenvalue,
            relative_magnitude,
        })
    } else {
        None
    };

    let mut coordinates = Array2::<f64>::zeros((n_atoms, 3));
    for (dim, (val, vec)) in pairs.iter().take(3).enumerate() {
        let factor = val.max(0.0).sqrt();
        coordinates.column_mut(dim).assign(&(vec * factor));
    }
    Ok(MdsEmbedding { coordinates, eigenvalues, most_negative_eigenvalue, warning })
}

/// Per-frame chirality data recorded during the forward pass.
#[derive(Debug, Clone, Copy)]
pub struct ChiralityTracking<'a> {
    pub reference: ChiralityReference,
    pub signs: &'a [Chirality],
    pub tolerance: f64,
}

/// Everything needed to turn PC coordinates back into structures.
///
/// Borrows a fitted model read-only, so independent reconstructions may run
/// concurrently.
#[derive(Debug, Clone, Copy)]
pub struct InverseTransform<'a> {
    pub model: &'a PCA,
    pub features: &'a FeatureTransform,
    /// Scores of the trajectory frames, shape (n_frames, k).
    pub projected: &'a Array2<f64>,
    pub chirality: Option<ChiralityTracking<'a>>,
    pub mds_negative_tolerance: f64,
}

impl<'a> InverseTransform<'a> {
    /// Reconstructs one point of PC space.
    ///
    /// # Errors
    /// `DegenerateGeometry` when the target sign or the reconstructed reference atoms are
    /// (nearly) coplanar; `Configuration` for an out-of-range `Stored` frame or a
    /// distance model without chirality tracking.
    pub fn reconstruct(&self, scores: &ArrayView1<f64>, target: ChiralityTarget) -> PcaResult<Reconstruction> {
        let frame = match target {
            ChiralityTarget::Stored(idx) => Some(idx),
            _ => None,
        };
        self.reconstruct_with_frame(scores, target, frame)
    }

    fn reconstruct_with_frame(
        &self,
        scores: &ArrayView1<f64>,
        target: ChiralityTarget,
        frame: Option<usize>,
    ) -> PcaResult<Reconstruction> {
        let n_atoms = self.features.n_atoms();
        let features = reconstruct_features(self.model, scores)?;

        match self.features {
            FeatureTransform::Cartesian(_) => {
                let mut coordinates = features.into_shape_with_order((n_atoms, 3))?;
                self.features.unweight_frame(&mut coordinates);
                Ok(Reconstruction { coordinates, chirality: ChiralityResolution::NotRequired, warnings: Vec::new() })
            }
            FeatureTransform::Distance(_) => {
                let tracking = self.chirality.ok_or_else(|| {
                    PcaError::Configuration("distance reconstruction requires chirality tracking".into())
                })?;
                let desired = self.resolve_target(scores, target, &tracking)?;
                if !desired.is_definite() {
                    return Err(PcaError::DegenerateGeometry {
                        frame,
                        detail: "target chirality is undefined (reference atoms coplanar)".into(),
                    });
                }

                // Truncation can push small squared distances below zero.
                let squared = features.mapv(|d| d.max(0.0));
                let mds = classical_mds(&squared.view(), n_atoms, self.mds_negative_tolerance)?;
                let mut warnings = Vec::new();
                if let Some(PipelineWarning::NegativeMdsEigenvalues { most_negative, relative_magnitude, .. }) =
                    mds.warning
                {
                    warn!(
                        "Frame {:?}: negative MDS eigenvalue {:.3e} (relative {:.3e}) clipped.",
                        frame, most_negative, relative_magnitude
                    );
                    warnings.push(PipelineWarning::NegativeMdsEigenvalues { frame, most_negative, relative_magnitude });
                }

                let mut coordinates = mds.coordinates;
                self.features.unweight_frame(&mut coordinates);
                let candidate = chirality(&coordinates.view(), &tracking.reference, tracking.tolerance)?;
                if !candidate.is_definite() {
                    return Err(PcaError::DegenerateGeometry {
                        frame,
                        detail: "reconstructed reference atoms are coplanar".into(),
                    });
                }
                let resolution = if candidate == desired {
                    ChiralityResolution::Matched
                } else {
                    coordinates.column_mut(0).mapv_inplace(|x| -x);
                    ChiralityResolution::Reflected
                };
                trace!("Frame {:?}: chirality {:?} ({:?}).", frame, desired, resolution);
                Ok(Reconstruction { coordinates, chirality: resolution, warnings })
            }
        }
    }

    fn resolve_target(
        &self,
        scores: &ArrayView1<f64>,
        target: ChiralityTarget,
        tracking: &ChiralityTracking<'_>,
    ) -> PcaResult<Chirality> {
        match target {
            ChiralityTarget::Fixed(c) => Ok(c),
            ChiralityTarget::Stored(idx) => tracking.signs.get(idx).copied().ok_or_else(|| {
                PcaError::Configuration(format!(
                    "frame {} out of range for {} stored chirality signs",
                    idx,
                    tracking.signs.len()
                ))
            }),
            ChiralityTarget::NearestFrame => Ok(self.nearest_frame_chirality(scores, tracking)),
        }
    }

    /// Sign of the nearest frame with a definite chirality; `Positive` if there is none.
    fn nearest_frame_chirality(&self, scores: &ArrayView1<f64>, tracking: &ChiralityTracking<'_>) -> Chirality {
        let mut best: Option<(f64, Chirality)> = None;
        for (row, sign) in self.projected.outer_iter().zip(tracking.signs.iter()) {
            if !sign.is_definite() {
                continue;
            }
            let dist: f64 = row
                .iter()
                .enumerate()
                .map(|(c, &r)| {
                    let s = scores.get(c).copied().unwrap_or(0.0);
                    (r - s) * (r - s)
                })
                .sum();
            if best.map_or(true, |(d, _)| dist < d) {
                best = Some((dist, *sign));
            }
        }
        best.map_or(Chirality::Positive, |(_, sign)| sign)
    }

    /// Reconstructs trajectory frames from their stored scores, in the given order.
    ///
    /// Per-frame degeneracies become `None` plus a warning. Other failures abort.
    pub fn reconstruct_frames(&self, indices: &[usize]) -> PcaResult<BatchReconstruction> {
        let n_frames = self.projected.nrows();
        if let Some(&bad) = indices.iter().find(|&&idx| idx >= n_frames) {
            return Err(PcaError::Configuration(format!(
                "frame {} out of range for {} frames",
                bad, n_frames
            )));
        }
        info!("Reconstructing {} frames from {} components.", indices.len(), self.model.n_components());
        let start_time = std::time::Instant::now();

        let results: Vec<PcaResult<Reconstruction>> = indices
            .par_iter()
            .map(|&idx| self.reconstruct_with_frame(&self.projected.row(idx), ChiralityTarget::Stored(idx), Some(idx)))
            .collect();
        let batch = collect_batch(results)?;
        info!("Reconstructed frames in {:?}.", start_time.elapsed());
        Ok(batch)
    }

    /// Sweeps `component` over `steps` evenly spaced values between its observed minimum
    /// and maximum, holding every other component at zero.
    pub fn sweep_component(&self, component: usize, steps: usize) -> PcaResult<ComponentSweep> {
        let k = self.model.n_components();
        if component >= k {
            return Err(PcaError::Configuration(format!(
                "component {} out of range for a {}-component model",
                component, k
            )));
        }
        if steps < 2 {
            return Err(PcaError::Configuration(format!("a sweep needs at least 2 steps, got {}", steps)));
        }
        let column = self.projected.column(component);
        let lo = column.iter().copied().fold(f64::INFINITY, f64::min);
        let hi = column.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let values = Array1::linspace(lo, hi, steps);
        debug!("Sweeping component {} over [{:.4}, {:.4}] in {} steps.", component, lo, hi, steps);

        let results: Vec<PcaResult<Reconstruction>> = values
            .as_slice()
            .unwrap_or(&[])
            .par_iter()
            .map(|&value| {
                let mut scores = Array1::<f64>::zeros(k);
                scores[component] = value;
                self.reconstruct_with_frame(&scores.view(), ChiralityTarget::NearestFrame, None)
            })
            .collect();
        let batch = collect_batch(results)?;
        Ok(ComponentSweep { component, values, frames: batch.frames, warnings: batch.warnings })
    }
}

fn collect_batch(results: Vec<PcaResult<Reconstruction>>) -> PcaResult<BatchReconstruction> {
    let mut batch = BatchReconstruction::default();
    for result in results {
        match result {
            Ok(rec) => {
                batch.warnings.extend(rec.warnings);
                batch.frames.push(Some(rec.coordinates));
            }
            Err(PcaError::DegenerateGeometry { frame, detail }) => {
                warn!("Skipping frame {:?}: {}.", frame, detail);
                batch.warnings.push(PipelineWarning::DegenerateChirality { frame, detail });
                batch.frames.push(None);
            }
            Err(other) => return Err(other),
        }
    }
    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{Representation, DEFAULT_CHIRALITY_TOLERANCE};
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn molecule() -> Array2<f64> {
        array![
            [0.0, 0.0, 0.0],
            [1.5, 0.0, 0.0],
            [0.2, 1.4, 0.0],
            [0.3, 0.4, 1.2],
            [-0.8, -0.6, 0.5]
        ]
    }

    #[test]
    fn mds_reproduces_euclidean_distances() {
        let transform = FeatureTransform::new(Representation::Distances, 5, None).unwrap();
        let d2 = transform.encode_frame(&molecule().view()).unwrap();
        let mds = classical_mds(&d2.view(), 5, DEFAULT_MDS_NEGATIVE_TOLERANCE).unwrap();
        assert!(mds.warning.is_none());
        let back = transform.encode_frame(&mds.coordinates.view()).unwrap();
        for (a, b) in back.iter().zip(d2.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-9);
        }
        // The embedding is centred.
        for c in mds.coordinates.sum_axis(Axis(0)).iter() {
            assert_abs_diff_eq!(*c, 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn non_euclidean_distances_are_flagged() {
        // d(0,1)^2 = 10 violates the triangle inequality through atom 2.
        let d2 = array![10.0, 1.0, 1.0, 1.0, 1.0, 1.0];
        let mds = classical_mds(&d2.view(), 4, DEFAULT_MDS_NEGATIVE_TOLERANCE).unwrap();
        assert!(mds.most_negative_eigenvalue < 0.0);
        assert!(matches!(mds.warning, Some(PipelineWarning::NegativeMdsEigenvalues { .. })));
    }

    #[test]
    fn mds_rejects_wrong_length() {
        let d2 = array![1.0, 2.0];
        assert!(matches!(classical_mds(&d2.view(), 4, 1e-6), Err(PcaError::InputShape(_))));
    }

    #[test]
    fn batch_collection_skips_degenerate_frames() {
        let results = vec![
            Ok(Reconstruction {
                coordinates: Array2::zeros((4, 3)),
                chirality: ChiralityResolution::Matched,
                warnings: Vec::new(),
            }),
            Err(PcaError::DegenerateGeometry { frame: Some(1), detail: "planar".into() }),
        ];
        let batch = collect_batch(results).unwrap();
        assert_eq!(batch.frames.len(), 2);
        assert!(batch.frames[0].is_some());
        assert!(batch.frames[1].is_none());
        assert_eq!(
            batch.warnings,
            vec![PipelineWarning::DegenerateChirality { frame: Some(1), detail: "planar".into() }]
        );
    }

    #[test]
    fn nearest_frame_prefers_definite_signs() {
        let transform = FeatureTransform::new(Representation::Distances, 5, None).unwrap();
        let model = PCA::new();
        let projected = array![[0.0], [1.0], [5.0]];
        let signs = [Chirality::Degenerate, Chirality::Negative, Chirality::Positive];
        let inverse = InverseTransform {
            model: &model,
            features: &transform,
            projected: &projected,
            chirality: Some(ChiralityTracking {
                reference: ChiralityReference::new([0, 1, 2, 3], 5).unwrap(),
                signs: &signs,
                tolerance: DEFAULT_CHIRALITY_TOLERANCE,
            }),
            mds_negative_tolerance: DEFAULT_MDS_NEGATIVE_TOLERANCE,
        };
        let tracking = inverse.chirality.unwrap();
        assert_eq!(inverse.nearest_frame_chirality(&array![0.1].view(), &tracking), Chirality::Negative);
        assert_eq!(inverse.nearest_frame_chirality(&array![4.0].view(), &tracking), Chirality::Positive);
        // Equidistant from frames 1 and 2: the lower index wins.
        assert_eq!(inverse.nearest_frame_chirality(&array![3.0].view(), &tracking), Chirality::Negative);
    }
}
