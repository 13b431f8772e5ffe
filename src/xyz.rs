// src/xyz.rs
// Multi-frame XYZ reading and writing. Blank lines between frame blocks start a new
// segment; extra columns after x y z are ignored.

use log::debug;
use ndarray::{Array2, ArrayView3, Axis};
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use crate::error::{PcaError, PcaResult};
use crate::trajectory::{Frame, Trajectory};

/// Parses multi-frame XYZ text.
///
/// # Errors
/// `Parse` for malformed counts, coordinates or truncated frames (with the 1-based line
/// number); `InputShape` when frames disagree in atom count or ordering.
pub fn parse_xyz(text: &str) -> PcaResult<Trajectory> {
    let lines: Vec<&str> = text.lines().collect();
    let mut frames = Vec::new();
    let mut segment_lengths = Vec::new();
    let mut current_segment = 0usize;
    let mut cursor = 0usize;

    loop {
        let mut saw_blank = false;
        while cursor < lines.len() && lines[cursor].trim().is_empty() {
            saw_blank = true;
            cursor += 1;
        }
        if cursor >= lines.len() {
            break;
        }
        if saw_blank && current_segment > 0 {
            segment_lengths.push(current_segment);
            current_segment = 0;
        }

        let count_line = cursor + 1;
        let n_atoms: usize = lines[cursor]
            .trim()
            .parse()
            .map_err(|_| PcaError::parse(count_line, format!("invalid atom count '{}'", lines[cursor].trim())))?;
        if n_atoms == 0 {
            return Err(PcaError::parse(count_line, "frame declares zero atoms"));
        }
        if n_atoms > lines.len().saturating_sub(cursor + 2) {
            return Err(PcaError::parse(
                count_line,
                format!(
                    "truncated frame: expected comment line and {} atom lines, found {}",
                    n_atoms,
                    lines.len().saturating_sub(cursor + 1)
                ),
            ));
        }

        let comment = lines[cursor + 1].trim().to_string();
        let mut elements = Vec::with_capacity(n_atoms);
        let mut coordinates = Array2::<f64>::zeros((n_atoms, 3));
        for atom in 0..n_atoms {
            let line_idx = cursor + 2 + atom;
            let parts: Vec<&str> = lines[line_idx].split_whitespace().collect();
            if parts.len() < 4 {
                return Err(PcaError::parse(
                    line_idx + 1,
                    format!("expected 'label x y z', found '{}'", lines[line_idx].trim()),
                ));
            }
            elements.push(parts[0].to_string());
            for dim in 0..3 {
                coordinates[[atom, dim]] = parts[dim + 1].parse().map_err(|_| {
                    PcaError::parse(line_idx + 1, format!("invalid coordinate '{}'", parts[dim + 1]))
                })?;
            }
        }

        frames.push(Frame { elements, coordinates, comment });
        current_segment += 1;
        cursor += 2 + n_atoms;
    }
    if current_segment > 0 {
        segment_lengths.push(current_segment);
    }

    debug!("Parsed {} XYZ frames in {} segment(s).", frames.len(), segment_lengths.len());
    Trajectory::from_frames(frames)?.with_segment_lengths(segment_lengths)
}

/// Reads a multi-frame XYZ file.
pub fn read_xyz<P: AsRef<Path>>(path: P) -> PcaResult<Trajectory> {
    let mut text = String::new();
    File::open(path.as_ref())?.read_to_string(&mut text)?;
    parse_xyz(&text)
}

/// Reads several XYZ files and concatenates them, one segment per file.
pub fn read_xyz_segments<P: AsRef<Path>>(paths: &[P]) -> PcaResult<Trajectory> {
    let parts = paths
        .iter()
        .map(|p| {
            let traj = read_xyz(p)?;
            let n_frames = traj.n_frames();
            traj.with_segment_lengths(vec![n_frames])
        })
        .collect::<PcaResult<Vec<_>>>()?;
    Trajectory::concatenate(parts)
}

/// Writes frames of shape `(n_frames, n_atoms, 3)` in XYZ format.
///
/// `comments` may be shorter than the number of frames; missing comments are left empty.
pub fn write_xyz<W: Write>(
    writer: &mut W,
    elements: &[String],
    frames: ArrayView3<f64>,
    comments: &[String],
) -> PcaResult<()> {
    let (_, n_atoms, n_dims) = frames.dim();
    if n_atoms != elements.len() || n_dims != 3 {
        return Err(PcaError::InputShape(format!(
            "cannot write frames of shape {:?} with {} atom labels",
            frames.dim(),
            elements.len()
        )));
    }
    for (idx, frame) in frames.axis_iter(Axis(0)).enumerate() {
        writeln!(writer, "{}", n_atoms)?;
        let comment = comments.get(idx).map(|c| c.replace(['\n', '\r'], " ")).unwrap_or_default();
        writeln!(writer, "{}", comment)?;
        for (label, pos) in elements.iter().zip(frame.outer_iter()) {
            writeln!(writer, "{:<3} {:>16.10} {:>16.10} {:>16.10}", label, pos[0], pos[1], pos[2])?;
        }
    }
    Ok(())
}

/// Writes frames to an XYZ file, replacing it if it exists.
pub fn write_xyz_file<P: AsRef<Path>>(
    path: P,
    elements: &[String],
    frames: ArrayView3<f64>,
    comments: &[String],
) -> PcaResult<()> {
    let mut writer = BufWriter::new(File::create(path.as_ref())?);
    write_xyz(&mut writer, elements, frames, comments)?;
    writer.flush()?;
    Ok(())
}
