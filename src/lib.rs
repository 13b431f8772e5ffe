// Principal component analysis of molecular trajectories

#![doc = include_str!("../README.md")]

pub mod alignment;
pub mod diagnostics;
pub mod error;
pub mod features;
pub mod inverse;
pub mod linalg_backends;
pub mod masses;
pub mod pca;
pub mod pipeline;
pub mod trajectory;
pub mod xyz;

pub use diagnostics::{FitDiagnostics, PipelineWarning};
pub use error::{PcaError, PcaResult};
pub use features::{Chirality, ChiralityReference, FeatureTransform, Representation};
pub use inverse::{
    BatchReconstruction, ChiralityResolution, ChiralityTarget, ComponentSweep, InverseTransform, Reconstruction,
};
pub use pca::PCA;
pub use pipeline::{output_identifier, run_on_trajectory, run_pipeline, PcaSolver, PipelineConfig, PipelineRun, ResultsBundle};
pub use trajectory::{Frame, Trajectory};
