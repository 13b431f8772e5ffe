// Principal component analysis (PCA) of per-frame feature matrices

use log::{debug, info, warn};
use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::Rng;
use rand::SeedableRng; // For ChaCha8Rng::seed_from_u64
use rand_chacha::ChaCha8Rng;
use rand_distr::Normal;

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::diagnostics::{near_degenerate_eigenvalues, PipelineWarning};
use crate::error::{PcaError, PcaResult};
use crate::linalg_backends::{BackendEigh, BackendQR, BackendSVD, NdarrayLinAlgBackend};

/// Standard deviations below this are treated as constant features when standardising.
const SCALE_SANITIZATION_THRESHOLD: f64 = 1e-9;
/// Eigenvalues at or below this fraction of the largest are numerically zero.
const ZERO_EIGENVALUE_RELATIVE: f64 = 1e-12;
/// Relative gap below which two retained eigenvalues are reported as near-degenerate.
const NEAR_DEGENERATE_RELATIVE_GAP: f64 = 1e-6;

/// Principal component analysis (PCA) model.
///
/// Holds the mean, scale and rotation (principal axes) learned from a feature matrix of
/// shape `(n_frames, n_features)`, together with the full eigenvalue spectrum and the
/// total variance so that explained-variance ratios are exact even when only a few
/// components are retained. A fitted model is never mutated by projection or
/// back-projection, so it can be shared across threads.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PCA {
    /// Principal axes as unit columns. Shape: (n_features, k_components)
    rotation: Option<Array2<f64>>,
    /// Shape: (n_features)
    mean: Option<Array1<f64>>,
    /// Positive per-feature divisors; all ones unless the model standardises features.
    /// Shape: (n_features)
    scale: Option<Array1<f64>>,
    /// Eigenvalues of the retained components, descending. Shape: (k_components)
    explained_variance: Option<Array1<f64>>,
    /// Every eigenvalue the solver computed, descending and clipped at zero.
    eigenvalue_spectrum: Option<Array1<f64>>,
    /// Trace of the covariance matrix of the (scaled) data.
    total_variance: Option<f64>,
    standardize: bool,
}

impl Default for PCA {
    fn default() -> Self {
        Self::new()
    }
}

impl PCA {
    /// Creates an unfitted model that only centres features.
    ///
    /// Geometric features share one unit (Å or Å²), so centring alone keeps their
    /// relative magnitudes meaningful.
    ///
    /// ```
    /// use traj_pca::PCA;
    /// let pca = PCA::new();
    /// assert_eq!(pca.n_components(), 0);
    /// ```
    pub fn new() -> Self {
        Self {
            rotation: None,
            mean: None,
            scale: None,
            explained_variance: None,
            eigenvalue_spectrum: None,
            total_variance: None,
            standardize: false,
        }
    }

    /// Creates an unfitted model that centres and scales every feature to unit variance.
    /// Features with near-zero standard deviation keep a scale of 1.0.
    pub fn standardized() -> Self {
        Self { standardize: true, ..Self::new() }
    }

    /// Creates a model from a pre-computed rotation, mean and standard deviations.
    ///
    /// Standard deviations that are not strictly positive are sanitised to 1.0. The
    /// model has no eigenvalues, so variance ratios are unavailable.
    ///
    /// # Errors
    /// `InputShape` if the feature dimensions disagree, `Configuration` if a standard
    /// deviation is not finite.
    pub fn with_model(
        rotation: Array2<f64>,
        mean: Array1<f64>,
        raw_standard_deviations: Array1<f64>,
    ) -> PcaResult<Self> {
        let d_features = rotation.nrows();
        if mean.len() != d_features || raw_standard_deviations.len() != d_features {
            return Err(PcaError::InputShape(format!(
                "Feature dimensions of rotation ({}), mean ({}), and raw_standard_deviations ({}) must match.",
                d_features,
                mean.len(),
                raw_standard_deviations.len()
            )));
        }
        if raw_standard_deviations.iter().any(|&val| !val.is_finite()) {
            return Err(PcaError::Configuration(
                "raw_standard_deviations contains non-finite (NaN or infinity) values.".into(),
            ));
        }
        let sanitized_scale_vector =
            raw_standard_deviations.mapv(|val| if val > SCALE_SANITIZATION_THRESHOLD { val } else { 1.0 });
        let standardize = sanitized_scale_vector.iter().any(|&val| val != 1.0);

        Ok(Self {
            rotation: Some(rotation),
            mean: Some(mean),
            scale: Some(sanitized_scale_vector),
            explained_variance: None,
            eigenvalue_spectrum: None,
            total_variance: None,
            standardize,
        })
    }

    pub fn mean(&self) -> Option<&Array1<f64>> {
        self.mean.as_ref()
    }

    pub fn scale(&self) -> Option<&Array1<f64>> {
        self.scale.as_ref()
    }

    /// Principal axes, shape (n_features, k_components).
    pub fn rotation(&self) -> Option<&Array2<f64>> {
        self.rotation.as_ref()
    }

    /// Eigenvalues of the retained components, largest first.
    pub fn explained_variance(&self) -> Option<&Array1<f64>> {
        self.explained_variance.as_ref()
    }

    /// All eigenvalues computed during the fit, for scree-style diagnostics.
    pub fn eigenvalue_spectrum(&self) -> Option<&Array1<f64>> {
        self.eigenvalue_spectrum.as_ref()
    }

    pub fn total_variance(&self) -> Option<f64> {
        self.total_variance
    }

    pub fn is_standardized(&self) -> bool {
        self.standardize
    }

    pub fn n_components(&self) -> usize {
        self.rotation.as_ref().map_or(0, |r| r.ncols())
    }

    pub fn n_features(&self) -> usize {
        self.mean.as_ref().map_or(0, |m| m.len())
    }

    /// Retained eigenvalues divided by the total variance.
    pub fn explained_variance_ratio(&self) -> Option<Array1<f64>> {
        let ev = self.explained_variance.as_ref()?;
        let total = self.total_variance?;
        Some(ratio_of_total(ev, total))
    }

    /// Running sum of [`PCA::explained_variance_ratio`]; reaches 1.0 when every
    /// component with non-zero variance is retained.
    pub fn cumulative_explained_variance(&self) -> Option<Array1<f64>> {
        let ratios = self.explained_variance_ratio()?;
        let mut running = 0.0;
        Some(ratios.mapv(|r| {
            running += r;
            running
        }))
    }

    /// The full eigenvalue spectrum divided by the total variance.
    pub fn spectrum_ratio(&self) -> Option<Array1<f64>> {
        let spectrum = self.eigenvalue_spectrum.as_ref()?;
        let total = self.total_variance?;
        Some(ratio_of_total(spectrum, total))
    }

    /// Centres (and optionally scales) `data` in place, storing mean and scale.
    /// Returns the total variance of the result.
    fn center_and_scale(&mut self, data: &mut Array2<f64>) -> PcaResult<f64> {
        let n_samples = data.nrows();
        let mean_vector = data
            .mean_axis(Axis(0))
            .ok_or_else(|| PcaError::InputShape("Failed to compute mean of the data.".into()))?;
        *data -= &mean_vector;
        self.mean = Some(mean_vector);

        let scale_vector = if self.standardize {
            data.map_axis(Axis(0), |column| column.std(0.0))
                .mapv(|val| if val.is_finite() && val > SCALE_SANITIZATION_THRESHOLD { val } else { 1.0 })
        } else {
            Array1::ones(data.ncols())
        };
        if self.standardize {
            *data /= &scale_vector;
        }
        self.scale = Some(scale_vector);

        let sum_sq: f64 = data.iter().map(|&x| x * x).sum();
        Ok(sum_sq / (n_samples - 1) as f64)
    }

    /// Checks shape and finiteness shared by `fit` and `rfit`.
    fn validate_training_data(data: &Array2<f64>, n_components: usize) -> PcaResult<()> {
        if data.nrows() == 0 || data.ncols() == 0 {
            return Err(PcaError::InputShape("Input data_matrix has zero samples or zero features.".into()));
        }
        if data.nrows() < 2 {
            return Err(PcaError::InputShape(format!(
                "PCA needs at least 2 frames, got {}.",
                data.nrows()
            )));
        }
        if n_components == 0 {
            return Err(PcaError::Configuration("Number of requested components must be greater than 0.".into()));
        }
        if data.iter().any(|v| !v.is_finite()) {
            return Err(PcaError::NumericInstability("feature matrix contains non-finite values".into()));
        }
        Ok(())
    }

    /// Fits the model with an exact eigendecomposition.
    ///
    /// Uses the covariance matrix when `n_features <= n_samples` and the Gram matrix
    /// otherwise (the "Gram trick"). Components are ordered by descending eigenvalue and
    /// signed so that each axis's largest-magnitude loading is positive. On the Gram
    /// path, directions with numerically zero eigenvalue cannot be recovered and are
    /// dropped, so fewer than `min(n_samples, n_features)` components may be available.
    ///
    /// * `data_matrix` - shape (n_samples, n_features); consumed.
    /// * `n_components` - number of components to retain; clamped to what is available.
    /// * `tolerance` - optional fraction of the largest eigenvalue below which components
    ///   are excluded.
    ///
    /// # Errors
    /// `InputShape` for fewer than 2 samples, `Configuration` for `n_components == 0`,
    /// `NumericInstability` for non-finite data or data without any variance, `Linalg`
    /// if the eigendecomposition fails.
    ///
    /// Returns the non-fatal conditions met while fitting.
    pub fn fit(
        &mut self,
        mut data_matrix: Array2<f64>,
        n_components: usize,
        tolerance: Option<f64>,
    ) -> PcaResult<Vec<PipelineWarning>> {
        Self::validate_training_data(&data_matrix, n_components)?;
        let (n_samples, n_features) = data_matrix.dim();
        let start_time = std::time::Instant::now();
        info!(
            "Fitting exact PCA on {} samples x {} features ({} path).",
            n_samples,
            n_features,
            if n_features <= n_samples { "covariance" } else { "Gram" }
        );

        let total_variance = self.center_and_scale(&mut data_matrix)?;
        let scaled_data_matrix = data_matrix;
        let backend = NdarrayLinAlgBackend;

        let (spectrum, axes): (Vec<f64>, Vec<Array1<f64>>) = if n_features <= n_samples {
            let mut cov_matrix = scaled_data_matrix.t().dot(&scaled_data_matrix);
            cov_matrix /= (n_samples - 1) as f64;
            let eig_pairs = backend.eigh_upper(&cov_matrix)?.into_descending_pairs();
            let spectrum: Vec<f64> = eig_pairs.iter().map(|(v, _)| v.max(0.0)).collect();
            let axes = eig_pairs.into_iter().map(|(_, vec)| vec).collect();
            (spectrum, axes)
        } else {
            let mut gram_matrix = scaled_data_matrix.dot(&scaled_data_matrix.t());
            gram_matrix /= (n_samples - 1) as f64;
            let eig_pairs = backend.eigh_upper(&gram_matrix)?.into_descending_pairs();
            let spectrum: Vec<f64> = eig_pairs.iter().map(|(v, _)| v.max(0.0)).collect();
            let largest = spectrum.first().copied().unwrap_or(0.0);
            // V_k = X^T u_k / sqrt(lambda_k (N-1)); only defined for non-zero lambda_k.
            let axes = eig_pairs
                .into_iter()
                .take_while(|(val, _)| *val > ZERO_EIGENVALUE_RELATIVE * largest && *val > 0.0)
                .map(|(val, u_col)| {
                    let mut axis = scaled_data_matrix.t().dot(&u_col);
                    axis /= (val * (n_samples - 1) as f64).sqrt();
                    normalize_in_place(&mut axis);
                    axis
                })
                .collect();
            (spectrum, axes)
        };

        let largest = spectrum.first().copied().unwrap_or(0.0);
        if largest <= 0.0 || !largest.is_finite() {
            return Err(PcaError::NumericInstability(
                "feature matrix has no variance; no principal components exist".into(),
            ));
        }
        let mut available = axes.len();
        if let Some(tol_val) = tolerance {
            let threshold = largest * tol_val.clamp(0.0, 1.0);
            available = available.min(spectrum.iter().take_while(|&&val| val > threshold).count());
        }

        let mut warnings = Vec::new();
        let final_rank = clamp_components(n_components, available, &mut warnings);

        let mut rotation_matrix = if final_rank == 0 {
            Array2::zeros((n_features, 0))
        } else {
            let views: Vec<ArrayView1<f64>> = axes.iter().take(final_rank).map(|v| v.view()).collect();
            ndarray::stack(Axis(1), &views)?
        };
        apply_sign_convention(&mut rotation_matrix);
        let explained = Array1::from_iter(spectrum.iter().take(final_rank).copied());
        warnings.extend(report_near_degenerate(&explained));

        self.rotation = Some(rotation_matrix);
        self.explained_variance = Some(explained);
        self.eigenvalue_spectrum = Some(Array1::from(spectrum));
        self.total_variance = Some(total_variance);
        info!(
            "Exact PCA retained {} components in {:?}.",
            final_rank,
            start_time.elapsed()
        );
        Ok(warnings)
    }

    /// Fits the model with a randomized SVD (Halko, Martinsson, Tropp, 2011) and returns
    /// the scores of the training data.
    ///
    /// The sketch has `n_components + p` columns, where `p` is `n_oversamples` (at least 4)
    /// or, when `n_oversamples == 0`, ~10% of `n_components` clamped to `5..=20`. Two
    /// power iterations refine the basis. When `n_features > n_samples` the transpose is
    /// sketched instead. Explained variances are squared singular values over `N - 1`,
    /// and the total variance is exact.
    ///
    /// # Errors
    /// As [`PCA::fit`]; additionally `Linalg` if a QR or SVD step fails.
    pub fn rfit(
        &mut self,
        mut x_input_data: Array2<f64>,
        n_components_requested: usize,
        n_oversamples: usize,
        seed: Option<u64>,
        tol: Option<f64>,
    ) -> PcaResult<(Array2<f64>, Vec<PipelineWarning>)> {
        Self::validate_training_data(&x_input_data, n_components_requested)?;
        let (n_samples, n_features) = x_input_data.dim();
        let start_time = std::time::Instant::now();
        info!(
            "Fitting randomized PCA on {} samples x {} features (k = {}).",
            n_samples, n_features, n_components_requested
        );

        let total_variance = self.center_and_scale(&mut x_input_data)?;
        let centered_scaled_data_a = x_input_data;
        let max_possible_rank = n_samples.min(n_features);

        const RFIT_ADAPTIVE_P_LOWER_BOUND: usize = 5;
        const RFIT_ADAPTIVE_P_UPPER_BOUND: usize = 20;
        const RFIT_MINIMUM_ROBUST_P_FLOOR: usize = 4;
        const N_POWER_ITERATIONS: usize = 2;

        let p_to_use = if n_oversamples == 0 {
            ((n_components_requested as f64 * 0.1).ceil() as usize)
                .clamp(RFIT_ADAPTIVE_P_LOWER_BOUND, RFIT_ADAPTIVE_P_UPPER_BOUND)
        } else {
            n_oversamples.max(RFIT_MINIMUM_ROBUST_P_FLOOR)
        };
        let l_sketch_components = (n_components_requested + p_to_use).min(max_possible_rank).max(1);
        debug!("Randomized sketch width {} (oversampling {}).", l_sketch_components, p_to_use);

        let mut rng = match seed {
            Some(s) => ChaCha8Rng::seed_from_u64(s),
            None => ChaCha8Rng::from_rng(rand::thread_rng())
                .map_err(|e| PcaError::Configuration(format!("Failed to initialize RNG: {}", e)))?,
        };
        let normal = Normal::new(0.0, 1.0)
            .map_err(|e| PcaError::NumericInstability(format!("Failed to create Normal distribution: {}", e)))?;
        let backend = NdarrayLinAlgBackend;

        // Tall case sketches A, wide case sketches A^T; `operator` is the matrix whose
        // column space holds the principal axes after projection.
        let wide = n_features > n_samples;
        let operator: ArrayView2<f64> = if wide { centered_scaled_data_a.t() } else { centered_scaled_data_a.view() };
        let omega = Array2::from_shape_fn((operator.ncols(), l_sketch_components), |_| rng.sample(normal));

        let mut q_basis = backend.qr_q_factor(&operator.dot(&omega))?;
        for _ in 0..N_POWER_ITERATIONS {
            let w_ortho_basis = backend.qr_q_factor(&operator.t().dot(&q_basis))?;
            q_basis = backend.qr_q_factor(&operator.dot(&w_ortho_basis))?;
        }
        if q_basis.ncols() == 0 {
            return Err(PcaError::NumericInstability("randomized sketch collapsed to zero columns".into()));
        }

        let (singular_values, rotation_sketch) = if wide {
            // B = Q^T A^T (L x N); axes = Q U_B.
            let b_projected = q_basis.t().dot(&operator);
            let svd = backend.svd_into(b_projected, true, false)?;
            let u_b = svd.u.ok_or_else(|| PcaError::Linalg("SVD U_B not computed".into()))?;
            (svd.s, q_basis.dot(&u_b))
        } else {
            // B' = Q'^T A (L x D); axes = V_B'.
            let b_projected = q_basis.t().dot(&operator);
            let svd = backend.svd_into(b_projected, false, true)?;
            let vt = svd.vt.ok_or_else(|| PcaError::Linalg("SVD V_B^T not computed".into()))?;
            (svd.s, vt.t().to_owned())
        };

        let largest = singular_values.get(0).copied().unwrap_or(0.0);
        if largest <= SCALE_SANITIZATION_THRESHOLD {
            return Err(PcaError::NumericInstability(
                "feature matrix has no variance; no principal components exist".into(),
            ));
        }
        let mut available = singular_values
            .iter()
            .take_while(|&&s_val| s_val > largest * ZERO_EIGENVALUE_RELATIVE.sqrt())
            .count()
            .min(rotation_sketch.ncols());
        if let Some(tolerance_value) = tol {
            if tolerance_value > 0.0 && tolerance_value < 1.0 {
                let threshold = tolerance_value * largest;
                available = available.min(singular_values.iter().take_while(|&&s| s > threshold).count());
            }
        }

        let mut warnings = Vec::new();
        let n_components_to_keep = clamp_components(n_components_requested, available, &mut warnings);

        let mut final_rotation_matrix = rotation_sketch.slice(s![.., ..n_components_to_keep]).to_owned();
        for mut column_vec in final_rotation_matrix.columns_mut() {
            let norm_value = column_vec.dot(&column_vec).sqrt();
            if norm_value > SCALE_SANITIZATION_THRESHOLD {
                column_vec /= norm_value;
            }
        }
        apply_sign_convention(&mut final_rotation_matrix);

        let spectrum = singular_values.mapv(|s_val| s_val.powi(2) / (n_samples - 1) as f64);
        let explained = spectrum.slice(s![..n_components_to_keep]).to_owned();
        warnings.extend(report_near_degenerate(&explained));

        let scores = centered_scaled_data_a.dot(&final_rotation_matrix);
        self.rotation = Some(final_rotation_matrix);
        self.explained_variance = Some(explained);
        self.eigenvalue_spectrum = Some(spectrum);
        self.total_variance = Some(total_variance);
        info!(
            "Randomized PCA retained {} components in {:?}.",
            n_components_to_keep,
            start_time.elapsed()
        );
        Ok((scores, warnings))
    }

    fn fitted_parts(&self) -> PcaResult<(&Array2<f64>, &Array1<f64>, &Array1<f64>)> {
        let rotation = self
            .rotation
            .as_ref()
            .ok_or_else(|| PcaError::NotFitted("Rotation matrix not set. Fit or load a model first.".into()))?;
        let mean = self
            .mean
            .as_ref()
            .ok_or_else(|| PcaError::NotFitted("Mean vector not set. Fit or load a model first.".into()))?;
        let scale = self
            .scale
            .as_ref()
            .ok_or_else(|| PcaError::NotFitted("Scale vector not set. Fit or load a model first.".into()))?;
        Ok((rotation, mean, scale))
    }

    /// Projects rows of `x` (shape (m, n_features)) onto the principal axes.
    ///
    /// # Errors
    /// `NotFitted` without a model, `InputShape` on a feature-dimension mismatch.
    pub fn transform(&self, mut x: Array2<f64>) -> PcaResult<Array2<f64>> {
        let (rotation_matrix, mean_vector, scale_vector) = self.fitted_parts()?;
        if x.ncols() != mean_vector.len() {
            return Err(PcaError::InputShape(format!(
                "Input data feature dimension ({}) does not match model's feature dimension ({}).",
                x.ncols(),
                mean_vector.len()
            )));
        }
        if x.nrows() == 0 {
            return Ok(Array2::zeros((0, rotation_matrix.ncols())));
        }
        for mut row in x.axis_iter_mut(Axis(0)) {
            ndarray::Zip::from(&mut row)
                .and(mean_vector)
                .and(scale_vector)
                .for_each(|val_ref, &m_val, &s_val| {
                    *val_ref = (*val_ref - m_val) / s_val;
                });
        }
        Ok(x.dot(rotation_matrix))
    }

    /// Maps PC scores back to feature space: `scores . R^T`, un-scaled, plus the mean.
    ///
    /// `scores` may have fewer columns than the model has components; the missing
    /// trailing components are taken as zero (the dataset mean along those axes).
    pub fn inverse_transform(&self, scores: &ArrayView2<f64>) -> PcaResult<Array2<f64>> {
        let (rotation_matrix, mean_vector, scale_vector) = self.fitted_parts()?;
        let n_given = scores.ncols();
        if n_given > rotation_matrix.ncols() {
            return Err(PcaError::InputShape(format!(
                "{} score columns given but the model has {} components.",
                n_given,
                rotation_matrix.ncols()
            )));
        }
        let mut features = scores.dot(&rotation_matrix.slice(s![.., ..n_given]).t());
        features *= scale_vector;
        features += mean_vector;
        Ok(features)
    }

    /// Saves the model with bincode.
    ///
    /// # Errors
    /// `NotFitted` if rotation, mean or scale is missing; `Io` or `Serialization` on
    /// write failures.
    pub fn save_model<P: AsRef<Path>>(&self, path: P) -> PcaResult<()> {
        self.fitted_parts()?;
        let mut writer = BufWriter::new(File::create(path.as_ref())?);
        bincode::serde::encode_into_std_write(self, &mut writer, bincode::config::standard())
            .map_err(|e| PcaError::Serialization(format!("Failed to serialize PCA model: {}", e)))?;
        Ok(())
    }

    /// Loads a model written by [`PCA::save_model`] and checks its consistency.
    pub fn load_model<P: AsRef<Path>>(path: P) -> PcaResult<Self> {
        let mut reader = BufReader::new(File::open(path.as_ref())?);
        let pca_model: PCA = bincode::serde::decode_from_std_read(&mut reader, bincode::config::standard())
            .map_err(|e| PcaError::Serialization(format!("Failed to deserialize PCA model: {}", e)))?;
        pca_model.validate_loaded()?;
        Ok(pca_model)
    }

    fn validate_loaded(&self) -> PcaResult<()> {
        let (rotation, mean, scale) = self.fitted_parts()?;
        if rotation.nrows() != mean.len() || mean.len() != scale.len() {
            return Err(PcaError::Serialization(format!(
                "Loaded PCA model has inconsistent feature dimensions: rotation_features={}, mean_features={}, scale_features={}",
                rotation.nrows(),
                mean.len(),
                scale.len()
            )));
        }
        if scale.iter().any(|&val| !val.is_finite() || val <= 0.0) {
            return Err(PcaError::Serialization(
                "Loaded PCA model's scale vector contains non-positive or non-finite values.".into(),
            ));
        }
        if let Some(ev) = self.explained_variance.as_ref() {
            if ev.len() != rotation.ncols() {
                return Err(PcaError::Serialization(format!(
                    "Loaded PCA model has {} explained variances for {} components.",
                    ev.len(),
                    rotation.ncols()
                )));
            }
            if ev.iter().any(|&val| !val.is_finite() || val < 0.0) {
                return Err(PcaError::Serialization(
                    "Loaded PCA model's explained_variance contains negative or non-finite values.".into(),
                ));
            }
        }
        Ok(())
    }
}

fn ratio_of_total(values: &Array1<f64>, total: f64) -> Array1<f64> {
    if total > 0.0 {
        values / total
    } else {
        Array1::zeros(values.len())
    }
}

fn normalize_in_place(axis: &mut Array1<f64>) {
    let norm = axis.dot(axis).sqrt();
    if norm > SCALE_SANITIZATION_THRESHOLD {
        *axis /= norm;
    } else {
        axis.fill(0.0);
    }
}

/// Clamps the requested component count to the available one, recording a warning.
fn clamp_components(requested: usize, available: usize, warnings: &mut Vec<PipelineWarning>) -> usize {
    if requested > available {
        warn!(
            "Requested {} components but only {} are available; clamping.",
            requested, available
        );
        warnings.push(PipelineWarning::ComponentsClamped { requested, available });
        available
    } else {
        requested
    }
}

/// Flips each axis so that its largest-magnitude loading is positive.
pub(crate) fn apply_sign_convention(rotation: &mut Array2<f64>) {
    for mut column in rotation.columns_mut() {
        let pivot = column
            .iter()
            .copied()
            .fold(0.0_f64, |best, x| if x.abs() > best.abs() { x } else { best });
        if pivot < 0.0 {
            column.mapv_inplace(|x| -x);
        }
    }
}

fn report_near_degenerate(explained: &Array1<f64>) -> Vec<PipelineWarning> {
    let warnings = near_degenerate_eigenvalues(&explained.view(), NEAR_DEGENERATE_RELATIVE_GAP);
    for w in &warnings {
        warn!("{}; accepting the solver's choice of basis.", w);
    }
    warnings
}
