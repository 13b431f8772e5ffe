// src/features.rs
// Per-frame feature vectors and chirality signs.
// Cartesians: flattened (optionally mass-weighted) coordinates, length 3N.
// Distances: squared interatomic distances in upper-triangle row-major order
// (0,1), (0,2), ..., (0,N-1), (1,2), ..., length N(N-1)/2.

use log::{debug, info};
use ndarray::{Array1, Array2, ArrayView2, ArrayView3, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{PcaError, PcaResult};

/// Default relative tolerance below which a signed volume counts as planar.
pub const DEFAULT_CHIRALITY_TOLERANCE: f64 = 1e-6;

/// Which geometric representation PCA is applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Representation {
    Cartesians,
    Distances,
}

impl Representation {
    /// Feature-vector length for a molecule of `n_atoms` atoms.
    pub fn feature_dimension(&self, n_atoms: usize) -> usize {
        match self {
            Representation::Cartesians => 3 * n_atoms,
            Representation::Distances => pair_count(n_atoms),
        }
    }
}

impl fmt::Display for Representation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Representation::Cartesians => write!(f, "cartesians"),
            Representation::Distances => write!(f, "distances"),
        }
    }
}

impl FromStr for Representation {
    type Err = PcaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cartesians" | "cartesian" => Ok(Representation::Cartesians),
            "distances" | "distance" => Ok(Representation::Distances),
            other => Err(PcaError::Configuration(format!(
                "unknown representation '{}', expected 'cartesians' or 'distances'",
                other
            ))),
        }
    }
}

/// Number of unique atom pairs.
pub fn pair_count(n_atoms: usize) -> usize {
    n_atoms * n_atoms.saturating_sub(1) / 2
}

/// Position of the pair `(i, j)`, `i < j`, in a distance feature vector.
pub fn pair_index(i: usize, j: usize, n_atoms: usize) -> usize {
    debug_assert!(i < j && j < n_atoms);
    i * n_atoms - i * (i + 1) / 2 + (j - i - 1)
}

/// Handedness of four reference atoms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Chirality {
    Positive,
    Negative,
    /// The four atoms are (nearly) coplanar; the sign is undefined.
    Degenerate,
}

impl Chirality {
    pub fn sign(&self) -> i8 {
        match self {
            Chirality::Positive => 1,
            Chirality::Negative => -1,
            Chirality::Degenerate => 0,
        }
    }

    pub fn is_definite(&self) -> bool {
        !matches!(self, Chirality::Degenerate)
    }

    pub fn mirrored(&self) -> Self {
        match self {
            Chirality::Positive => Chirality::Negative,
            Chirality::Negative => Chirality::Positive,
            Chirality::Degenerate => Chirality::Degenerate,
        }
    }

    /// Classifies a signed volume; `|volume| <= tolerance * scale` is degenerate.
    pub fn from_signed_volume(volume: f64, scale: f64, tolerance: f64) -> Self {
        if !volume.is_finite() || volume.abs() <= tolerance * scale {
            Chirality::Degenerate
        } else if volume > 0.0 {
            Chirality::Positive
        } else {
            Chirality::Negative
        }
    }
}

/// Four distinct atom indices `(a, b, c, d)` defining the chirality volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChiralityReference([usize; 4]);

impl ChiralityReference {
    pub fn new(indices: [usize; 4], n_atoms: usize) -> PcaResult<Self> {
        if let Some(&bad) = indices.iter().find(|&&idx| idx >= n_atoms) {
            return Err(PcaError::Configuration(format!(
                "chirality reference atom {} out of range for {} atoms",
                bad, n_atoms
            )));
        }
        for i in 0..4 {
            for j in (i + 1)..4 {
                if indices[i] == indices[j] {
                    return Err(PcaError::Configuration(format!(
                        "chirality reference atoms must be distinct, got {:?}",
                        indices
                    )));
                }
            }
        }
        Ok(Self(indices))
    }

    pub fn indices(&self) -> [usize; 4] {
        self.0
    }
}

fn check_reference_frame(n_atoms: usize, n_dims: usize, reference: &ChiralityReference) -> PcaResult<()> {
    let highest = reference.indices().iter().copied().max().unwrap_or(0);
    if n_dims != 3 || highest >= n_atoms {
        return Err(PcaError::InputShape(format!(
            "frames of shape ({}, {}) cannot hold chirality reference atoms {:?}",
            n_atoms,
            n_dims,
            reference.indices()
        )));
    }
    Ok(())
}

/// Signed volume `(b-a) . ((c-a) x (d-a))` and the product of the three edge lengths.
///
/// # Errors
/// `InputShape` if the frame is not `N x 3` with every reference atom in range.
pub fn signed_volume(frame: &ArrayView2<f64>, reference: &ChiralityReference) -> PcaResult<(f64, f64)> {
    check_reference_frame(frame.nrows(), frame.ncols(), reference)?;
    Ok(signed_volume_unchecked(frame, reference))
}

fn signed_volume_unchecked(frame: &ArrayView2<f64>, reference: &ChiralityReference) -> (f64, f64) {
    let [a, b, c, d] = reference.indices();
    let edge = |idx: usize| -> [f64; 3] {
        [
            frame[[idx, 0]] - frame[[a, 0]],
            frame[[idx, 1]] - frame[[a, 1]],
            frame[[idx, 2]] - frame[[a, 2]],
        ]
    };
    let (u, v, w) = (edge(b), edge(c), edge(d));
    let cross = [
        v[1] * w[2] - v[2] * w[1],
        v[2] * w[0] - v[0] * w[2],
        v[0] * w[1] - v[1] * w[0],
    ];
    let volume = u[0] * cross[0] + u[1] * cross[1] + u[2] * cross[2];
    let norm = |x: [f64; 3]| (x[0] * x[0] + x[1] * x[1] + x[2] * x[2]).sqrt();
    (volume, norm(u) * norm(v) * norm(w))
}

/// Chirality of one frame.
pub fn chirality(frame: &ArrayView2<f64>, reference: &ChiralityReference, tolerance: f64) -> PcaResult<Chirality> {
    let (volume, scale) = signed_volume(frame, reference)?;
    Ok(Chirality::from_signed_volume(volume, scale, tolerance))
}

/// Chirality of every frame of a `(n_frames, n_atoms, 3)` tensor, in frame order.
pub fn chirality_signs(
    coordinates: &ArrayView3<f64>,
    reference: &ChiralityReference,
    tolerance: f64,
) -> PcaResult<Vec<Chirality>> {
    let (n_frames, n_atoms, n_dims) = coordinates.dim();
    check_reference_frame(n_atoms, n_dims, reference)?;
    let signs: Vec<Chirality> = (0..n_frames)
        .into_par_iter()
        .map(|idx| {
            let (volume, scale) = signed_volume_unchecked(&coordinates.index_axis(Axis(0), idx), reference);
            Chirality::from_signed_volume(volume, scale, tolerance)
        })
        .collect();
    let degenerate = signs.iter().filter(|s| !s.is_definite()).count();
    debug!(
        "Computed chirality signs for {} frames ({} degenerate) from atoms {:?}.",
        n_frames,
        degenerate,
        reference.indices()
    );
    Ok(signs)
}

/// Flattened, optionally mass-weighted Cartesian coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartesianFeatures {
    n_atoms: usize,
    /// Per-atom sqrt(mass) factors when mass-weighted.
    atom_weights: Option<Array1<f64>>,
}

/// Unique squared interatomic distances, optionally of mass-weighted coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistanceFeatures {
    n_atoms: usize,
    atom_weights: Option<Array1<f64>>,
}

/// The feature map selected for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FeatureTransform {
    Cartesian(CartesianFeatures),
    Distance(DistanceFeatures),
}

impl FeatureTransform {
    /// Builds the transform; `masses` enables mass-weighting.
    pub fn new(representation: Representation, n_atoms: usize, masses: Option<&[f64]>) -> PcaResult<Self> {
        let atom_weights = match masses {
            Some(m) => {
                if m.len() != n_atoms {
                    return Err(PcaError::InputShape(format!(
                        "{} atomic masses given for {} atoms",
                        m.len(),
                        n_atoms
                    )));
                }
                if m.iter().any(|&mass| !mass.is_finite() || mass <= 0.0) {
                    return Err(PcaError::Configuration("atomic masses must be positive and finite".into()));
                }
                Some(Array1::from_iter(m.iter().map(|mass| mass.sqrt())))
            }
            None => None,
        };
        Ok(match representation {
            Representation::Cartesians => FeatureTransform::Cartesian(CartesianFeatures { n_atoms, atom_weights }),
            Representation::Distances => {
                if n_atoms < 4 {
                    return Err(PcaError::Configuration(format!(
                        "distance representation needs at least 4 atoms for chirality tracking, got {}",
                        n_atoms
                    )));
                }
                FeatureTransform::Distance(DistanceFeatures { n_atoms, atom_weights })
            }
        })
    }

    pub fn representation(&self) -> Representation {
        match self {
            FeatureTransform::Cartesian(_) => Representation::Cartesians,
            FeatureTransform::Distance(_) => Representation::Distances,
        }
    }

    pub fn n_atoms(&self) -> usize {
        match self {
            FeatureTransform::Cartesian(c) => c.n_atoms,
            FeatureTransform::Distance(d) => d.n_atoms,
        }
    }

    pub fn dimension(&self) -> usize {
        self.representation().feature_dimension(self.n_atoms())
    }

    pub fn atom_weights(&self) -> Option<&Array1<f64>> {
        match self {
            FeatureTransform::Cartesian(c) => c.atom_weights.as_ref(),
            FeatureTransform::Distance(d) => d.atom_weights.as_ref(),
        }
    }

    pub fn is_mass_weighted(&self) -> bool {
        self.atom_weights().is_some()
    }

    /// Coordinates in the space the features are computed from.
    ///
    /// For mass-weighted distances the frame is first centred on its sqrt(m)-weighted
    /// centroid, which puts the weighted structure's centroid at the origin. Classical
    /// MDS returns a centred embedding, so this is what makes un-weighting exact.
    pub(crate) fn weighted_frame(&self, frame: &ArrayView2<f64>) -> Array2<f64> {
        let Some(weights) = self.atom_weights() else {
            return frame.to_owned();
        };
        let mut weighted = frame.to_owned();
        if let FeatureTransform::Distance(_) = self {
            let total: f64 = weights.sum();
            let weighted_centroid = weights.dot(frame) / total;
            weighted -= &weighted_centroid;
        }
        for (mut row, &w) in weighted.outer_iter_mut().zip(weights.iter()) {
            row *= w;
        }
        weighted
    }

    /// Divides each atom's coordinates by its weight, in place.
    pub(crate) fn unweight_frame(&self, frame: &mut Array2<f64>) {
        if let Some(weights) = self.atom_weights() {
            for (mut row, &w) in frame.outer_iter_mut().zip(weights.iter()) {
                row /= w;
            }
        }
    }

    /// Feature vector of one `N x 3` frame.
    ///
    /// # Errors
    /// `InputShape` if the frame does not have `n_atoms` rows of 3 coordinates.
    pub fn encode_frame(&self, frame: &ArrayView2<f64>) -> PcaResult<Array1<f64>> {
        if frame.dim() != (self.n_atoms(), 3) {
            return Err(PcaError::InputShape(format!(
                "frame of shape {:?} does not match a {}-atom feature transform",
                frame.dim(),
                self.n_atoms()
            )));
        }
        Ok(self.encode_unchecked(frame))
    }

    fn encode_unchecked(&self, frame: &ArrayView2<f64>) -> Array1<f64> {
        let weighted = self.weighted_frame(frame);
        match self {
            FeatureTransform::Cartesian(_) => Array1::from_iter(weighted.iter().copied()),
            FeatureTransform::Distance(d) => {
                let n = d.n_atoms;
                let mut features = Array1::<f64>::zeros(pair_count(n));
                let mut k = 0;
                for i in 0..n {
                    for j in (i + 1)..n {
                        let diff = &weighted.row(i) - &weighted.row(j);
                        features[k] = diff.dot(&diff);
                        k += 1;
                    }
                }
                features
            }
        }
    }

    /// Feature matrix `(n_frames, D)`; row i always corresponds to frame i.
    pub fn feature_matrix(&self, coordinates: &ArrayView3<f64>) -> PcaResult<Array2<f64>> {
        let (n_frames, n_atoms, n_dims) = coordinates.dim();
        if n_atoms != self.n_atoms() || n_dims != 3 {
            return Err(PcaError::InputShape(format!(
                "coordinates of shape {:?} do not match a {}-atom feature transform",
                coordinates.dim(),
                self.n_atoms()
            )));
        }
        info!(
            "Building {} feature matrix ({} frames x {} features, mass-weighted: {}).",
            self.representation(),
            n_frames,
            self.dimension(),
            self.is_mass_weighted()
        );
        let mut features = Array2::<f64>::zeros((n_frames, self.dimension()));
        features
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .zip(coordinates.axis_iter(Axis(0)).into_par_iter())
            .for_each(|(mut row, frame)| row.assign(&self.encode_unchecked(&frame)));
        Ok(features)
    }
}
