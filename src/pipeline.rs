// src/pipeline.rs

use log::{info, warn};
use ndarray::{Array1, Array2, Array3, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::alignment::align_trajectory;
use crate::diagnostics::{compute_orthogonality_error_f64, compute_relative_error_f64, FitDiagnostics, PipelineWarning};
use crate::error::{PcaError, PcaResult};
use crate::features::{
    chirality_signs, Chirality, ChiralityReference, FeatureTransform, Representation, DEFAULT_CHIRALITY_TOLERANCE,
};
use crate::inverse::{
    BatchReconstruction, ChiralityTarget, ChiralityTracking, ComponentSweep, InverseTransform, Reconstruction,
    DEFAULT_MDS_NEGATIVE_TOLERANCE,
};
use crate::masses::atomic_masses;
use crate::pca::PCA;
use crate::trajectory::Trajectory;
use crate::xyz::{read_xyz, write_xyz_file};

/// Which PCA solver fits the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PcaSolver {
    /// Exact eigendecomposition (covariance or Gram matrix).
    Exact,
    /// Randomized SVD; `n_oversamples == 0` picks an adaptive oversampling.
    Randomized { n_oversamples: usize, seed: Option<u64> },
}

/// Configuration of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Target number of principal components (k).
    pub n_components: usize,
    pub representation: Representation,
    /// Weight coordinates by sqrt(atomic mass) before building features.
    pub mass_weighted: bool,
    /// Atom indices (a, b, c, d) whose signed volume tracks chirality. Required for
    /// the distance representation.
    pub chirality_reference: Option<[usize; 4]>,
    /// Store a reconstructed sweep of every retained component in the results.
    pub normal_mode_sweep: bool,
    pub sweep_steps: usize,
    /// Frame every other frame is superposed onto.
    pub reference_frame: usize,
    /// Scale every feature to unit variance before PCA.
    pub standardize_features: bool,
    pub solver: PcaSolver,
    pub chirality_tolerance: f64,
    pub mds_negative_eigenvalue_tolerance: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            n_components: 2,
            representation: Representation::Cartesians,
            mass_weighted: false,
            chirality_reference: None,
            normal_mode_sweep: false,
            sweep_steps: 20,
            reference_frame: 0,
            standardize_features: false,
            solver: PcaSolver::Exact,
            chirality_tolerance: DEFAULT_CHIRALITY_TOLERANCE,
            mds_negative_eigenvalue_tolerance: DEFAULT_MDS_NEGATIVE_TOLERANCE,
        }
    }
}

impl PipelineConfig {
    /// Checks the configuration against a molecule of `n_atoms` atoms.
    ///
    /// # Errors
    /// `Configuration` for k = 0, a missing or invalid chirality reference, too few sweep
    /// steps or invalid tolerances; `InputShape` for fewer than 3 atoms.
    pub fn validate(&self, n_atoms: usize) -> PcaResult<()> {
        if self.n_components == 0 {
            return Err(PcaError::Configuration("n_components must be at least 1".into()));
        }
        if n_atoms < 3 {
            return Err(PcaError::InputShape(format!(
                "alignment needs at least 3 atoms, molecule has {}",
                n_atoms
            )));
        }
        if self.normal_mode_sweep && self.sweep_steps < 2 {
            return Err(PcaError::Configuration(format!(
                "sweep_steps must be at least 2, got {}",
                self.sweep_steps
            )));
        }
        for (name, value) in [
            ("chirality_tolerance", self.chirality_tolerance),
            ("mds_negative_eigenvalue_tolerance", self.mds_negative_eigenvalue_tolerance),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(PcaError::Configuration(format!("{} must be finite and non-negative, got {}", name, value)));
            }
        }
        match (self.representation, self.chirality_reference) {
            (Representation::Distances, None) => Err(PcaError::Configuration(
                "the distance representation needs a chirality_reference to resolve mirror images".into(),
            )),
            (_, Some(indices)) => ChiralityReference::new(indices, n_atoms).map(|_| ()),
            (Representation::Cartesians, None) => Ok(()),
        }
    }
}

/// Everything a run produces. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultsBundle {
    pub config: PipelineConfig,
    pub elements: Vec<String>,
    pub segment_lengths: Vec<usize>,
    pub atom_masses: Option<Vec<f64>>,
    pub feature_transform: FeatureTransform,
    pub model: PCA,
    /// Scores of every frame, shape (n_frames, k), in input order.
    pub projected: Array2<f64>,
    pub chirality_reference: Option<ChiralityReference>,
    /// Chirality of every input frame, computed before alignment.
    pub chirality_signs: Option<Vec<Chirality>>,
    pub aligned_coordinates: Array3<f64>,
    pub rmsd_to_reference: Array1<f64>,
    pub diagnostics: FitDiagnostics,
    pub warnings: Vec<PipelineWarning>,
    pub component_sweeps: Vec<ComponentSweep>,
}

impl ResultsBundle {
    pub fn n_frames(&self) -> usize {
        self.projected.nrows()
    }

    pub fn n_atoms(&self) -> usize {
        self.elements.len()
    }

    pub fn n_components(&self) -> usize {
        self.model.n_components()
    }

    pub fn explained_variance_ratio(&self) -> Array1<f64> {
        self.model
            .explained_variance_ratio()
            .unwrap_or_else(|| Array1::zeros(self.n_components()))
    }

    pub fn cumulative_explained_variance(&self) -> Array1<f64> {
        self.model
            .cumulative_explained_variance()
            .unwrap_or_else(|| Array1::zeros(self.n_components()))
    }

    /// Read-only view used by all reconstruction methods.
    pub fn inverse(&self) -> InverseTransform<'_> {
        let chirality = match (&self.chirality_reference, &self.chirality_signs) {
            (Some(reference), Some(signs)) => Some(ChiralityTracking {
                reference: *reference,
                signs: signs.as_slice(),
                tolerance: self.config.chirality_tolerance,
            }),
            _ => None,
        };
        InverseTransform {
            model: &self.model,
            features: &self.feature_transform,
            projected: &self.projected,
            chirality,
            mds_negative_tolerance: self.config.mds_negative_eigenvalue_tolerance,
        }
    }

    /// Reconstructs an arbitrary point of the retained PC space.
    pub fn reconstruct(&self, scores: &ArrayView1<f64>, target: ChiralityTarget) -> PcaResult<Reconstruction> {
        self.inverse().reconstruct(scores, target)
    }

    /// Reconstructs trajectory frame `index` from its scores and stored chirality.
    pub fn reconstruct_frame(&self, index: usize) -> PcaResult<Reconstruction> {
        if index >= self.n_frames() {
            return Err(PcaError::Configuration(format!(
                "frame {} out of range for {} frames",
                index,
                self.n_frames()
            )));
        }
        self.reconstruct(&self.projected.row(index), ChiralityTarget::Stored(index))
    }

    pub fn reconstruct_frames(&self, indices: &[usize]) -> PcaResult<BatchReconstruction> {
        self.inverse().reconstruct_frames(indices)
    }

    pub fn sweep_component(&self, component: usize, steps: usize) -> PcaResult<ComponentSweep> {
        self.inverse().sweep_component(component, steps)
    }

    /// Writes a sweep of `component` as a multi-frame XYZ file; returns the number of
    /// frames written. Frames whose chirality could not be resolved are left out.
    pub fn write_component_sweep_xyz<P: AsRef<Path>>(&self, component: usize, steps: usize, path: P) -> PcaResult<usize> {
        let sweep = self.sweep_component(component, steps)?;
        let mut frames = Vec::new();
        let mut comments = Vec::new();
        for (value, frame) in sweep.values.iter().zip(sweep.frames.iter()) {
            if let Some(coords) = frame {
                frames.push(coords.view());
                comments.push(format!("PC{} = {:.6}", component + 1, value));
            }
        }
        if frames.is_empty() {
            return Err(PcaError::DegenerateGeometry {
                frame: None,
                detail: format!("no frame of the component {} sweep could be reconstructed", component),
            });
        }
        let stacked = ndarray::stack(Axis(0), &frames)?;
        write_xyz_file(path.as_ref(), &self.elements, stacked.view(), &comments)?;
        info!("Wrote {} sweep frames of component {} to {:?}.", frames.len(), component, path.as_ref());
        Ok(frames.len())
    }

    /// Saves the bundle with bincode.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> PcaResult<()> {
        let mut writer = BufWriter::new(File::create(path.as_ref())?);
        bincode::serde::encode_into_std_write(self, &mut writer, bincode::config::standard())
            .map_err(|e| PcaError::Serialization(format!("Failed to serialize results bundle: {}", e)))?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> PcaResult<Self> {
        let mut reader = BufReader::new(File::open(path.as_ref())?);
        let bundle: ResultsBundle = bincode::serde::decode_from_std_read(&mut reader, bincode::config::standard())
            .map_err(|e| PcaError::Serialization(format!("Failed to deserialize results bundle: {}", e)))?;
        if bundle.projected.ncols() != bundle.model.n_components()
            || bundle.aligned_coordinates.dim().0 != bundle.projected.nrows()
        {
            return Err(PcaError::Serialization("Loaded results bundle has inconsistent dimensions.".into()));
        }
        Ok(bundle)
    }
}

/// Result of [`run_pipeline`].
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub results: ResultsBundle,
    /// Name derived from the input and the configuration, e.g. `irc_distances_mw_k3`.
    pub output_identifier: String,
}

/// `<stem>_<cartesians|distances>[_mw]_k<k>` for the input path and configuration.
pub fn output_identifier<P: AsRef<Path>>(path: P, config: &PipelineConfig) -> String {
    let stem = path
        .as_ref()
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "trajectory".to_string());
    format!(
        "{}_{}{}_k{}",
        stem,
        config.representation,
        if config.mass_weighted { "_mw" } else { "" },
        config.n_components
    )
}

/// Reads an XYZ trajectory and runs the full analysis on it.
pub fn run_pipeline<P: AsRef<Path>>(path: P, config: &PipelineConfig) -> PcaResult<PipelineRun> {
    info!("Running trajectory PCA on {:?}.", path.as_ref());
    let trajectory = read_xyz(path.as_ref())?;
    let results = run_on_trajectory(&trajectory, config)?;
    Ok(PipelineRun { results, output_identifier: output_identifier(path, config) })
}

/// Runs ingestion-independent stages on an in-memory trajectory.
///
/// Configuration and input problems are reported before any numeric work. Non-fatal
/// per-frame conditions end up in [`ResultsBundle::warnings`].
pub fn run_on_trajectory(trajectory: &Trajectory, config: &PipelineConfig) -> PcaResult<ResultsBundle> {
    let n_atoms = trajectory.n_atoms();
    let n_frames = trajectory.n_frames();
    config.validate(n_atoms)?;
    if config.reference_frame >= n_frames {
        return Err(PcaError::Configuration(format!(
            "reference frame {} out of range for {} frames",
            config.reference_frame, n_frames
        )));
    }
    if n_frames < 2 {
        return Err(PcaError::InputShape(format!("PCA needs at least 2 frames, got {}", n_frames)));
    }
    let atom_masses = if config.mass_weighted {
        Some(atomic_masses(trajectory.elements())?)
    } else {
        None
    };
    let chirality_reference = config
        .chirality_reference
        .map(|indices| ChiralityReference::new(indices, n_atoms))
        .transpose()?;
    let feature_transform = FeatureTransform::new(config.representation, n_atoms, atom_masses.as_deref())?;

    let start_time = std::time::Instant::now();
    info!(
        "Trajectory PCA: {} frames, {} atoms, {} features ({}), k = {}.",
        n_frames,
        n_atoms,
        feature_transform.dimension(),
        config.representation,
        config.n_components
    );

    let raw = trajectory.coordinates().view();
    let mut warnings = Vec::new();

    let signs = chirality_reference
        .map(|reference| chirality_signs(&raw, &reference, config.chirality_tolerance))
        .transpose()?;
    if let Some(signs) = &signs {
        for (idx, sign) in signs.iter().enumerate() {
            if !sign.is_definite() {
                warn!("Frame {}: chirality reference atoms are coplanar; sign undefined.", idx);
                warnings.push(PipelineWarning::DegenerateChirality {
                    frame: Some(idx),
                    detail: "reference atoms coplanar in the input frame".into(),
                });
            }
        }
    }

    let aligned = align_trajectory(&raw, config.reference_frame)?;
    warnings.extend(aligned.warnings.iter().cloned());

    // Squared distances do not depend on the superposition.
    let feature_matrix = match config.representation {
        Representation::Cartesians => feature_transform.feature_matrix(&aligned.coordinates.view())?,
        Representation::Distances => feature_transform.feature_matrix(&raw)?,
    };

    let mut model = if config.standardize_features { PCA::standardized() } else { PCA::new() };
    let projected = match config.solver {
        PcaSolver::Exact => {
            warnings.extend(model.fit(feature_matrix.clone(), config.n_components, None)?);
            model.transform(feature_matrix.clone())?
        }
        PcaSolver::Randomized { n_oversamples, seed } => {
            let (scores, fit_warnings) =
                model.rfit(feature_matrix.clone(), config.n_components, n_oversamples, seed, None)?;
            warnings.extend(fit_warnings);
            scores
        }
    };

    let diagnostics = fit_diagnostics(&model, &feature_matrix, &projected)?;
    info!(
        "Retained {} components explaining {:.4} of the variance (relative reconstruction error {:?}).",
        model.n_components(),
        diagnostics.retained_variance_fraction,
        diagnostics.relative_reconstruction_error
    );

    let mut bundle = ResultsBundle {
        config: config.clone(),
        elements: trajectory.elements().to_vec(),
        segment_lengths: trajectory.segment_lengths().to_vec(),
        atom_masses,
        feature_transform,
        model,
        projected,
        chirality_reference,
        chirality_signs: signs,
        aligned_coordinates: aligned.coordinates,
        rmsd_to_reference: aligned.rmsd_to_reference,
        diagnostics,
        warnings,
        component_sweeps: Vec::new(),
    };

    if config.normal_mode_sweep {
        let sweeps = (0..bundle.n_components())
            .map(|component| bundle.sweep_component(component, config.sweep_steps))
            .collect::<PcaResult<Vec<_>>>()?;
        for sweep in &sweeps {
            bundle.warnings.extend(sweep.warnings.iter().cloned());
        }
        bundle.component_sweeps = sweeps;
    }

    info!("Trajectory PCA finished in {:?} with {} warning(s).", start_time.elapsed(), bundle.warnings.len());
    Ok(bundle)
}

fn fit_diagnostics(model: &PCA, feature_matrix: &Array2<f64>, projected: &Array2<f64>) -> PcaResult<FitDiagnostics> {
    let basis_orthogonality_error = model.rotation().and_then(|r| compute_orthogonality_error_f64(&r.view()));
    let approximation = model.inverse_transform(&projected.view())?;
    let relative_reconstruction_error = match model.mean() {
        Some(mean) => {
            let centered = feature_matrix - mean;
            let centered_approximation = approximation - mean;
            compute_relative_error_f64(&centered.view(), &centered_approximation.view())
        }
        None => None,
    };
    let retained_variance_fraction = model
        .cumulative_explained_variance()
        .and_then(|c| c.iter().last().copied())
        .unwrap_or(0.0);
    Ok(FitDiagnostics { basis_orthogonality_error, relative_reconstruction_error, retained_variance_fraction })
}
