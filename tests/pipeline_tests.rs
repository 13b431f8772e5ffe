use approx::assert_abs_diff_eq;
use ndarray::{array, s, Array1, Array2, Array3, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tempfile::NamedTempFile;

use traj_pca::alignment::superpose;
use traj_pca::features::chirality_signs;
use traj_pca::xyz::{parse_xyz, read_xyz};
use traj_pca::{
    run_on_trajectory, run_pipeline, Chirality, ChiralityReference, ChiralityResolution, ChiralityTarget, PcaError,
    PcaSolver, PipelineConfig, PipelineWarning, Representation, ResultsBundle, Trajectory,
};

const ELEMENTS: [&str; 6] = ["C", "O", "N", "H", "H", "Cl"];

fn base_molecule() -> Array2<f64> {
    array![
        [0.0, 0.0, 0.0],
        [1.5, 0.0, 0.0],
        [0.2, 1.4, 0.0],
        [0.3, 0.4, 1.2],
        [-0.8, -0.6, 0.5],
        [1.1, 1.0, -0.7]
    ]
}

fn random_rotation(rng: &mut ChaCha8Rng) -> Array2<f64> {
    let q: Vec<f64> = (0..4).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let norm = q.iter().map(|x| x * x).sum::<f64>().sqrt();
    let (w, x, y, z) = (q[0] / norm, q[1] / norm, q[2] / norm, q[3] / norm);
    array![
        [1.0 - 2.0 * (y * y + z * z), 2.0 * (x * y - w * z), 2.0 * (x * z + w * y)],
        [2.0 * (x * y + w * z), 1.0 - 2.0 * (x * x + z * z), 2.0 * (y * z - w * x)],
        [2.0 * (x * z - w * y), 2.0 * (y * z + w * x), 1.0 - 2.0 * (x * x + y * y)]
    ]
}

/// Perturbed copies of the base molecule, each randomly rotated and translated.
/// Frames from `mirror_from` on are mirror images (y negated before the rigid motion).
fn chiral_trajectory(n_frames: usize, seed: u64, mirror_from: Option<usize>) -> Trajectory {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let base = base_molecule();
    let mut coordinates = Array3::<f64>::zeros((n_frames, base.nrows(), 3));
    for f in 0..n_frames {
        let mut frame = base.mapv(|x| x + rng.gen_range(-0.1..0.1));
        if mirror_from.map_or(false, |m| f >= m) {
            frame.column_mut(1).mapv_inplace(|y| -y);
        }
        let rotation = random_rotation(&mut rng);
        let shift = Array1::from_shape_fn(3, |_| rng.gen_range(-5.0..5.0));
        let moved = frame.dot(&rotation.t()) + &shift;
        coordinates.index_axis_mut(Axis(0), f).assign(&moved);
    }
    let elements = ELEMENTS.iter().map(|e| e.to_string()).collect();
    Trajectory::from_coordinates(elements, coordinates).unwrap()
}

fn distance_config(k: usize, mass_weighted: bool) -> PipelineConfig {
    PipelineConfig {
        n_components: k,
        representation: Representation::Distances,
        mass_weighted,
        chirality_reference: Some([0, 1, 2, 3]),
        ..Default::default()
    }
}

fn assert_frames_close(a: &Array2<f64>, b: &Array2<f64>, epsilon: f64) {
    assert_eq!(a.dim(), b.dim());
    for (x, y) in a.iter().zip(b.iter()) {
        assert_abs_diff_eq!(x, y, epsilon = epsilon);
    }
}

#[test]
fn cartesian_round_trip_without_truncation() {
    let trajectory = chiral_trajectory(30, 1, None);
    for mass_weighted in [false, true] {
        let config = PipelineConfig { n_components: 18, mass_weighted, ..Default::default() };
        let results = run_on_trajectory(&trajectory, &config).unwrap();
        assert_eq!(results.n_components(), 18);
        for idx in [0, 7, 29] {
            let rec = results.reconstruct_frame(idx).unwrap();
            assert_eq!(rec.chirality, ChiralityResolution::NotRequired);
            let aligned = results.aligned_coordinates.index_axis(Axis(0), idx).to_owned();
            assert_frames_close(&rec.coordinates, &aligned, 1e-8);
        }
        let cumulative = results.cumulative_explained_variance();
        assert_abs_diff_eq!(cumulative[17], 1.0, epsilon = 1e-10);
    }
}

#[test]
fn aligned_frames_match_the_input_up_to_rigid_motion() {
    let trajectory = chiral_trajectory(12, 2, None);
    let results = run_on_trajectory(&trajectory, &PipelineConfig::default()).unwrap();
    for idx in 0..12 {
        let aligned = results.aligned_coordinates.index_axis(Axis(0), idx);
        let raw = trajectory.frame_view(idx).unwrap();
        let sup = superpose(&aligned, &raw).unwrap();
        assert!(sup.rmsd < 1e-10);
    }
    assert_abs_diff_eq!(results.rmsd_to_reference[0], 0.0, epsilon = 1e-10);
}

#[test]
fn distance_round_trip_restores_each_enantiomer() {
    let trajectory = chiral_trajectory(40, 3, Some(20));
    for mass_weighted in [false, true] {
        let results = run_on_trajectory(&trajectory, &distance_config(15, mass_weighted)).unwrap();
        let signs = results.chirality_signs.as_ref().unwrap();
        assert!(signs[..20].iter().all(|s| *s == Chirality::Positive));
        assert!(signs[20..].iter().all(|s| *s == Chirality::Negative));

        let reference = results.chirality_reference.unwrap();
        let indices: Vec<usize> = (0..40).collect();
        let batch = results.reconstruct_frames(&indices).unwrap();
        assert!(batch.warnings.is_empty(), "{:?}", batch.warnings);
        for (idx, frame) in batch.frames.iter().enumerate() {
            let coords = frame.as_ref().unwrap();
            let raw = trajectory.frame_view(idx).unwrap();
            let sup = superpose(&raw, &coords.view()).unwrap();
            assert!(sup.rmsd < 1e-6, "frame {} rmsd {}", idx, sup.rmsd);

            let rebuilt = Array3::from_shape_vec((1, 6, 3), coords.iter().copied().collect()).unwrap();
            let sign = chirality_signs(&rebuilt.view(), &reference, 1e-6).unwrap()[0];
            assert_eq!(sign, signs[idx]);
        }
    }
}

#[test]
fn forcing_the_other_hand_gives_the_mirror_image() {
    let trajectory = chiral_trajectory(25, 4, None);
    let results = run_on_trajectory(&trajectory, &distance_config(15, false)).unwrap();
    let scores = results.projected.row(3);
    let same = results.reconstruct(&scores, ChiralityTarget::Fixed(Chirality::Positive)).unwrap();
    let mirrored = results.reconstruct(&scores, ChiralityTarget::Fixed(Chirality::Negative)).unwrap();
    assert_ne!(same.chirality, mirrored.chirality);

    let raw = trajectory.frame_view(3).unwrap();
    assert!(superpose(&raw, &same.coordinates.view()).unwrap().rmsd < 1e-6);
    assert!(superpose(&raw, &mirrored.coordinates.view()).unwrap().rmsd > 1e-2);
}

#[test]
fn right_triangle_single_component() {
    let u = array![2.0, -1.0, 0.0] / 5.0_f64.sqrt();
    let mut coordinates = Array3::<f64>::zeros((3, 3, 3));
    for (f, t) in [-1.0, 0.0, 1.0].iter().enumerate() {
        let mut frame = array![[0.0, 0.0, 0.0], [3.0, 0.0, 0.0], [0.0, 3.0, 0.0]];
        frame.row_mut(1).scaled_add(*t, &u);
        coordinates.index_axis_mut(Axis(0), f).assign(&frame);
    }
    let trajectory = Trajectory::from_coordinates(vec!["C".into(), "C".into(), "C".into()], coordinates).unwrap();
    let config = PipelineConfig { n_components: 1, ..Default::default() };
    let results = run_on_trajectory(&trajectory, &config).unwrap();

    let expected = 6.0_f64.sqrt() / 3.0;
    assert_abs_diff_eq!(results.projected[[0, 0]], -expected, epsilon = 1e-9);
    assert_abs_diff_eq!(results.projected[[1, 0]], 0.0, epsilon = 1e-9);
    assert_abs_diff_eq!(results.projected[[2, 0]], expected, epsilon = 1e-9);
    assert_abs_diff_eq!(results.model.explained_variance().unwrap()[0], 2.0 / 3.0, epsilon = 1e-9);
    assert_abs_diff_eq!(results.explained_variance_ratio()[0], 1.0, epsilon = 1e-9);

    // Rank one data: one component reproduces every aligned frame.
    for idx in 0..3 {
        let rec = results.reconstruct_frame(idx).unwrap();
        let aligned = results.aligned_coordinates.index_axis(Axis(0), idx).to_owned();
        assert_frames_close(&rec.coordinates, &aligned, 1e-9);
    }
}

#[test]
fn truncation_never_improves_reconstruction() {
    let trajectory = chiral_trajectory(30, 5, None);
    let mut previous = f64::INFINITY;
    for k in [1, 3, 6, 12] {
        let config = PipelineConfig { n_components: k, ..Default::default() };
        let results = run_on_trajectory(&trajectory, &config).unwrap();
        let err = results.diagnostics.relative_reconstruction_error.unwrap();
        assert!(err <= previous + 1e-12);
        previous = err;
        let ratios = results.explained_variance_ratio();
        for pair in ratios.windows(2) {
            assert!(pair[0] + 1e-12 >= pair[1]);
        }
        assert!(results.diagnostics.basis_orthogonality_error.unwrap() < 1e-9);
    }
}

#[test]
fn too_many_components_are_clamped_with_a_warning() {
    // 4 frames of 6 atoms: Gram path with at most 3 components.
    let trajectory = chiral_trajectory(4, 6, None);
    let config = PipelineConfig { n_components: 10, ..Default::default() };
    let results = run_on_trajectory(&trajectory, &config).unwrap();
    assert_eq!(results.n_components(), 3);
    assert!(results
        .warnings
        .contains(&PipelineWarning::ComponentsClamped { requested: 10, available: 3 }));
}

#[test]
fn coplanar_reference_frames_are_skipped_not_fatal() {
    let trajectory = chiral_trajectory(20, 7, None);
    let mut coordinates = trajectory.coordinates().clone();
    {
        let mut frame = coordinates.index_axis_mut(Axis(0), 5);
        let a = frame.row(0).to_owned();
        let b = frame.row(1).to_owned();
        let c = frame.row(2).to_owned();
        let in_plane = &a + &((&b - &a) * 0.4) + &((&c - &a) * 0.7);
        frame.row_mut(3).assign(&in_plane);
    }
    let trajectory = Trajectory::from_coordinates(trajectory.elements().to_vec(), coordinates).unwrap();
    let results = run_on_trajectory(&trajectory, &distance_config(15, false)).unwrap();
    assert_eq!(results.chirality_signs.as_ref().unwrap()[5], Chirality::Degenerate);
    assert!(results
        .warnings
        .iter()
        .any(|w| matches!(w, PipelineWarning::DegenerateChirality { frame: Some(5), .. })));

    let batch = results.reconstruct_frames(&[4, 5, 6]).unwrap();
    assert!(batch.frames[0].is_some());
    assert!(batch.frames[1].is_none());
    assert!(batch.frames[2].is_some());
    assert!(matches!(results.reconstruct_frame(5), Err(PcaError::DegenerateGeometry { frame: Some(5), .. })));
}

#[test]
fn truncated_distance_reconstructions_report_negative_mds_eigenvalues() {
    // Atom 4 moves along a line through the centroid of a fixed tetrahedron. Its squared
    // distances are quadratic in the displacement; with one component only the linear
    // part survives, so the end frames lose 1/3 A^2 on every distance to atom 4 and
    // need an imaginary coordinate.
    let fixed = array![[0.0, 0.0, 0.0], [1.5, 0.0, 0.0], [0.0, 1.5, 0.0], [0.0, 0.0, 1.5]];
    let centre = array![0.375, 0.375, 0.375];
    let direction = array![1.0, -1.0, 0.0] / 2.0_f64.sqrt();
    let mut coordinates = Array3::<f64>::zeros((3, 5, 3));
    for (f, t) in [-1.0, 0.0, 1.0].iter().enumerate() {
        let mut frame = coordinates.index_axis_mut(Axis(0), f);
        frame.slice_mut(s![..4, ..]).assign(&fixed);
        frame.row_mut(4).assign(&(&centre + &(&direction * *t)));
    }
    let elements = ["C", "C", "C", "C", "H"].iter().map(|e| e.to_string()).collect();
    let trajectory = Trajectory::from_coordinates(elements, coordinates).unwrap();
    let results = run_on_trajectory(&trajectory, &distance_config(1, false)).unwrap();
    assert_eq!(results.n_components(), 1);

    let batch = results.reconstruct_frames(&[0, 1, 2]).unwrap();
    assert!(batch.frames.iter().all(|f| f.is_some()));
    for frame in [0, 2] {
        assert!(
            batch.warnings.iter().any(|w| matches!(
                w,
                PipelineWarning::NegativeMdsEigenvalues { frame: Some(idx), most_negative, .. }
                    if *idx == frame && *most_negative < 0.0
            )),
            "no negative-eigenvalue warning for frame {}: {:?}",
            frame,
            batch.warnings
        );
    }
    // The middle frame gains distance instead, which stays embeddable.
    assert!(!batch
        .warnings
        .iter()
        .any(|w| matches!(w, PipelineWarning::NegativeMdsEigenvalues { frame: Some(1), .. })));
}

#[test]
fn configuration_errors_abort_before_numeric_work() {
    let trajectory = chiral_trajectory(6, 8, None);

    let no_reference = PipelineConfig { representation: Representation::Distances, ..Default::default() };
    assert!(matches!(run_on_trajectory(&trajectory, &no_reference), Err(PcaError::Configuration(_))));

    let bad_reference = PipelineConfig { chirality_reference: Some([0, 1, 1, 2]), ..distance_config(2, false) };
    assert!(matches!(run_on_trajectory(&trajectory, &bad_reference), Err(PcaError::Configuration(_))));

    let zero_k = PipelineConfig { n_components: 0, ..Default::default() };
    assert!(matches!(run_on_trajectory(&trajectory, &zero_k), Err(PcaError::Configuration(_))));

    let far_reference = PipelineConfig { reference_frame: 6, ..Default::default() };
    assert!(matches!(run_on_trajectory(&trajectory, &far_reference), Err(PcaError::Configuration(_))));

    let unknown = Trajectory::from_coordinates(
        vec!["C".into(), "Xx".into(), "H".into()],
        Array3::from_shape_fn((3, 3, 3), |(f, a, d)| (f + a * d) as f64),
    )
    .unwrap();
    let weighted = PipelineConfig { mass_weighted: true, ..Default::default() };
    assert!(matches!(run_on_trajectory(&unknown, &weighted), Err(PcaError::Configuration(_))));

    let single = Trajectory::from_coordinates(
        ELEMENTS.iter().map(|e| e.to_string()).collect(),
        base_molecule().insert_axis(Axis(0)),
    )
    .unwrap();
    assert!(matches!(run_on_trajectory(&single, &PipelineConfig::default()), Err(PcaError::InputShape(_))));
}

#[test]
fn component_sweep_spans_the_observed_range_and_exports_xyz() {
    let trajectory = chiral_trajectory(30, 9, None);
    let config = PipelineConfig { normal_mode_sweep: true, sweep_steps: 7, ..distance_config(3, true) };
    let results = run_on_trajectory(&trajectory, &config).unwrap();
    assert_eq!(results.component_sweeps.len(), 3);

    let sweep = &results.component_sweeps[0];
    assert_eq!(sweep.values.len(), 7);
    let column = results.projected.column(0);
    let lo = column.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = column.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    assert_abs_diff_eq!(sweep.values[0], lo, epsilon = 1e-12);
    assert_abs_diff_eq!(sweep.values[6], hi, epsilon = 1e-12);
    // All frames share one hand, so every synthetic structure takes it.
    let reference = ChiralityReference::new([0, 1, 2, 3], 6).unwrap();
    for frame in sweep.frames.iter().flatten() {
        let stacked = frame.clone().insert_axis(Axis(0));
        assert_eq!(chirality_signs(&stacked.view(), &reference, 1e-6).unwrap()[0], Chirality::Positive);
    }

    let file = NamedTempFile::new().unwrap();
    let written = results.write_component_sweep_xyz(1, 5, file.path()).unwrap();
    assert_eq!(written, 5);
    let back = read_xyz(file.path()).unwrap();
    assert_eq!(back.n_frames(), 5);
    assert_eq!(back.elements(), results.elements.as_slice());
    assert!(back.comments()[0].starts_with("PC2 = "));
}

#[test]
fn segments_and_frame_order_are_preserved() {
    let text = "\
3
seg A 0
O 0.00 0.00 0.00
H 0.96 0.00 0.00
H -0.24 0.93 0.00
3
seg A 1
O 0.00 0.00 0.00
H 0.98 0.00 0.00
H -0.25 0.95 0.00

3
seg B 0
O 0.00 0.00 0.00
H 1.00 0.00 0.00
H -0.26 0.97 0.00
3
seg B 1
O 0.00 0.00 0.00
H 1.02 0.00 0.00
H -0.27 0.99 0.00
";
    let trajectory = parse_xyz(text).unwrap();
    let results = run_on_trajectory(&trajectory, &PipelineConfig { n_components: 2, ..Default::default() }).unwrap();
    assert_eq!(results.segment_lengths, vec![2, 2]);
    assert_eq!(results.projected.nrows(), 4);
    // Bond stretching grows monotonically along the trajectory, so PC1 is monotone.
    let pc1 = results.projected.column(0);
    let increasing = pc1.windows(2).into_iter().all(|w| w[1] > w[0]);
    let decreasing = pc1.windows(2).into_iter().all(|w| w[1] < w[0]);
    assert!(increasing || decreasing, "{:?}", pc1);
}

#[test]
fn randomized_solver_agrees_with_exact_solver() {
    let trajectory = chiral_trajectory(50, 10, None);
    let exact = run_on_trajectory(&trajectory, &PipelineConfig { n_components: 3, ..Default::default() }).unwrap();
    let randomized = run_on_trajectory(
        &trajectory,
        &PipelineConfig {
            n_components: 3,
            solver: PcaSolver::Randomized { n_oversamples: 15, seed: Some(7) },
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(randomized.projected.dim(), (50, 3));
    let a = exact.explained_variance_ratio();
    let b = randomized.explained_variance_ratio();
    assert_abs_diff_eq!(a[0], b[0], epsilon = 1e-6);
}

#[test]
fn results_bundle_and_pipeline_entry_point_round_trip_through_files() {
    let trajectory = chiral_trajectory(10, 11, None);
    let mut xyz = NamedTempFile::new().unwrap();
    traj_pca::xyz::write_xyz(&mut xyz, trajectory.elements(), trajectory.coordinates().view(), trajectory.comments())
        .unwrap();

    let config = distance_config(4, false);
    let run = run_pipeline(xyz.path(), &config).unwrap();
    assert!(run.output_identifier.ends_with("_distances_k4"));

    let saved = NamedTempFile::new().unwrap();
    run.results.save(saved.path()).unwrap();
    let loaded = ResultsBundle::load(saved.path()).unwrap();
    assert_eq!(loaded.projected, run.results.projected);
    assert_eq!(loaded.chirality_signs, run.results.chirality_signs);
    assert_eq!(loaded.model, run.results.model);

    let before = run.results.reconstruct_frame(2).unwrap();
    let after = loaded.reconstruct_frame(2).unwrap();
    assert_frames_close(&before.coordinates, &after.coordinates, 1e-12);
    assert_eq!(loaded.projected.slice(s![.., ..2]).dim(), (10, 2));
}
