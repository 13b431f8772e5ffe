// src/trajectory.rs
// Frames are stored as one (n_frames, n_atoms, 3) tensor. Atom order defines the
// correspondence between frames and the meaning of every distance-feature index.

use ndarray::{s, Array2, Array3, ArrayView2, Axis};
use std::ops::Range;

use crate::error::{PcaError, PcaResult};

/// A single molecular structure: atom labels with Cartesian coordinates (N x 3).
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub elements: Vec<String>,
    pub coordinates: Array2<f64>,
    pub comment: String,
}

impl Frame {
    pub fn new(elements: Vec<String>, coordinates: Array2<f64>) -> PcaResult<Self> {
        if coordinates.ncols() != 3 || coordinates.nrows() != elements.len() {
            return Err(PcaError::InputShape(format!(
                "frame has {} labels but coordinates of shape {:?}; expected ({}, 3)",
                elements.len(),
                coordinates.dim(),
                elements.len()
            )));
        }
        Ok(Self { elements, coordinates, comment: String::new() })
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    pub fn n_atoms(&self) -> usize {
        self.elements.len()
    }
}

/// Ordered sequence of frames, possibly a concatenation of several sub-trajectories.
#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory {
    elements: Vec<String>,
    coordinates: Array3<f64>,
    segment_lengths: Vec<usize>,
    comments: Vec<String>,
}

impl Trajectory {
    /// Builds a single-segment trajectory from frames.
    ///
    /// # Errors
    /// `InputShape` when there are no frames, when atom counts differ, or when the atom
    /// labels at some index differ between frames.
    pub fn from_frames(frames: Vec<Frame>) -> PcaResult<Self> {
        let first = frames
            .first()
            .ok_or_else(|| PcaError::InputShape("trajectory contains no frames".into()))?;
        let n_atoms = first.n_atoms();
        let elements = first.elements.clone();

        let mut coordinates = Array3::<f64>::zeros((frames.len(), n_atoms, 3));
        let mut comments = Vec::with_capacity(frames.len());
        for (idx, frame) in frames.iter().enumerate() {
            if frame.n_atoms() != n_atoms {
                return Err(PcaError::InputShape(format!(
                    "frame {} has {} atoms, expected {} (atom count must be constant across a trajectory)",
                    idx,
                    frame.n_atoms(),
                    n_atoms
                )));
            }
            if frame.coordinates.dim() != (n_atoms, 3) {
                return Err(PcaError::InputShape(format!(
                    "frame {} has coordinates of shape {:?}, expected ({}, 3)",
                    idx,
                    frame.coordinates.dim(),
                    n_atoms
                )));
            }
            if let Some(atom) = frame.elements.iter().zip(&elements).position(|(a, b)| a != b) {
                return Err(PcaError::InputShape(format!(
                    "frame {} atom {} is '{}' but frame 0 has '{}'; atom order must be preserved",
                    idx, atom, frame.elements[atom], elements[atom]
                )));
            }
            coordinates.index_axis_mut(Axis(0), idx).assign(&frame.coordinates);
            comments.push(frame.comment.clone());
        }

        Ok(Self { elements, coordinates, segment_lengths: vec![frames.len()], comments })
    }

    /// Wraps an existing coordinate tensor of shape `(n_frames, n_atoms, 3)`.
    pub fn from_coordinates(elements: Vec<String>, coordinates: Array3<f64>) -> PcaResult<Self> {
        let (n_frames, n_atoms, n_dims) = coordinates.dim();
        if n_frames == 0 {
            return Err(PcaError::InputShape("trajectory contains no frames".into()));
        }
        if n_dims != 3 || n_atoms != elements.len() {
            return Err(PcaError::InputShape(format!(
                "coordinate tensor of shape {:?} does not match {} atom labels",
                coordinates.dim(),
                elements.len()
            )));
        }
        Ok(Self {
            elements,
            coordinates,
            segment_lengths: vec![n_frames],
            comments: vec![String::new(); n_frames],
        })
    }

    /// Replaces the segment boundaries; lengths must sum to the frame count.
    pub fn with_segment_lengths(mut self, lengths: Vec<usize>) -> PcaResult<Self> {
        let total: usize = lengths.iter().sum();
        if total != self.n_frames() || lengths.iter().any(|&len| len == 0) {
            return Err(PcaError::InputShape(format!(
                "segment lengths {:?} must be positive and sum to the frame count {}",
                lengths,
                self.n_frames()
            )));
        }
        self.segment_lengths = lengths;
        Ok(self)
    }

    /// Concatenates sub-trajectories, recording one segment per input segment.
    pub fn concatenate(parts: Vec<Trajectory>) -> PcaResult<Self> {
        let first = parts
            .first()
            .ok_or_else(|| PcaError::InputShape("no trajectories to concatenate".into()))?;
        let elements = first.elements.clone();
        for (idx, part) in parts.iter().enumerate() {
            if part.n_atoms() != elements.len() {
                return Err(PcaError::InputShape(format!(
                    "sub-trajectory {} has {} atoms, expected {}",
                    idx,
                    part.n_atoms(),
                    elements.len()
                )));
            }
            if part.elements != elements {
                return Err(PcaError::InputShape(format!(
                    "sub-trajectory {} uses a different atom ordering than sub-trajectory 0",
                    idx
                )));
            }
        }

        let views: Vec<_> = parts.iter().map(|p| p.coordinates.view()).collect();
        let coordinates = ndarray::concatenate(Axis(0), &views)?;
        let segment_lengths = parts.iter().flat_map(|p| p.segment_lengths.iter().copied()).collect();
        let comments = parts.iter().flat_map(|p| p.comments.iter().cloned()).collect();
        Ok(Self { elements, coordinates, segment_lengths, comments })
    }

    pub fn n_frames(&self) -> usize {
        self.coordinates.len_of(Axis(0))
    }

    pub fn n_atoms(&self) -> usize {
        self.elements.len()
    }

    pub fn elements(&self) -> &[String] {
        &self.elements
    }

    pub fn coordinates(&self) -> &Array3<f64> {
        &self.coordinates
    }

    pub fn segment_lengths(&self) -> &[usize] {
        &self.segment_lengths
    }

    pub fn comments(&self) -> &[String] {
        &self.comments
    }

    /// Frame index ranges of each segment, in order.
    pub fn segment_ranges(&self) -> Vec<Range<usize>> {
        let mut start = 0;
        self.segment_lengths
            .iter()
            .map(|&len| {
                let range = start..start + len;
                start += len;
                range
            })
            .collect()
    }

    pub fn frame_view(&self, index: usize) -> Option<ArrayView2<'_, f64>> {
        (index < self.n_frames()).then(|| self.coordinates.slice(s![index, .., ..]))
    }

    pub fn frame(&self, index: usize) -> Option<Frame> {
        self.frame_view(index).map(|view| Frame {
            elements: self.elements.clone(),
            coordinates: view.to_owned(),
            comment: self.comments.get(index).cloned().unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn water(shift: f64) -> Frame {
        Frame::new(
            vec!["O".into(), "H".into(), "H".into()],
            array![[0.0, 0.0, shift], [0.757, 0.586, 0.0], [-0.757, 0.586, 0.0]],
        )
        .unwrap()
    }

    #[test]
    fn builds_tensor_in_frame_order() {
        let traj = Trajectory::from_frames(vec![water(0.0), water(1.0), water(2.0)]).unwrap();
        assert_eq!(traj.n_frames(), 3);
        assert_eq!(traj.n_atoms(), 3);
        assert_eq!(traj.coordinates()[[2, 0, 2]], 2.0);
        assert_eq!(traj.segment_lengths(), &[3]);
    }

    #[test]
    fn rejects_inconsistent_atom_counts() {
        let short = Frame::new(vec!["O".into()], array![[0.0, 0.0, 0.0]]).unwrap();
        let err = Trajectory::from_frames(vec![water(0.0), short]).unwrap_err();
        assert!(matches!(err, PcaError::InputShape(_)));
    }

    #[test]
    fn rejects_coordinates_that_disagree_with_labels() {
        let labels = vec!["O".to_string(), "H".to_string(), "H".to_string()];
        // A single row would otherwise broadcast onto every atom.
        let one_row = Frame { elements: labels.clone(), coordinates: array![[1.0, 2.0, 3.0]], comment: String::new() };
        let err = Trajectory::from_frames(vec![water(0.0), one_row]).unwrap_err();
        assert!(matches!(err, PcaError::InputShape(_)));

        let two_columns = Frame { elements: labels.clone(), coordinates: Array2::zeros((3, 2)), comment: String::new() };
        assert!(matches!(Trajectory::from_frames(vec![two_columns]), Err(PcaError::InputShape(_))));

        let two_rows = Frame { elements: labels, coordinates: Array2::zeros((2, 3)), comment: String::new() };
        assert!(matches!(Trajectory::from_frames(vec![water(0.0), two_rows]), Err(PcaError::InputShape(_))));
    }

    #[test]
    fn rejects_reordered_atoms() {
        let mut swapped = water(0.0);
        swapped.elements.swap(0, 1);
        assert!(Trajectory::from_frames(vec![water(0.0), swapped]).is_err());
    }

    #[test]
    fn concatenation_records_segments() {
        let a = Trajectory::from_frames(vec![water(0.0), water(1.0)]).unwrap();
        let b = Trajectory::from_frames(vec![water(2.0), water(3.0), water(4.0)]).unwrap();
        let joined = Trajectory::concatenate(vec![a, b]).unwrap();
        assert_eq!(joined.n_frames(), 5);
        assert_eq!(joined.segment_lengths(), &[2, 3]);
        assert_eq!(joined.segment_ranges(), vec![0..2, 2..5]);
        assert_eq!(joined.frame(3).unwrap().coordinates[[0, 2]], 3.0);
    }

    #[test]
    fn segment_lengths_must_sum_to_frame_count() {
        let traj = Trajectory::from_frames(vec![water(0.0), water(1.0), water(2.0)]).unwrap();
        assert!(traj.clone().with_segment_lengths(vec![1, 1]).is_err());
        assert!(traj.with_segment_lengths(vec![1, 2]).is_ok());
    }
}
