use crate::{
    enums::{Plane, SortBy},
    error::VolumeError,
    plane::DirectionCosines,
    slice::{SliceDecoder, SliceRecord},
    volume::{MIN_INTENSITY_RANGE, Volume},
};

use ndarray::{Array3, ArrayViewMut2, Axis};
use rayon::prelude::*;
use std::{
    cmp::Ordering,
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info};

/// Relative tolerance when comparing pixel spacing between slices.
const SPACING_TOLERANCE: f64 = 1e-6;

#[derive(Clone, Debug)]
pub struct ConvertOptions {
    pub sort_by: SortBy,
    /// Intensity range below which the volume counts as degenerate.
    pub min_range: f32,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            sort_by: SortBy::FileName,
            min_range: MIN_INTENSITY_RANGE,
        }
    }
}

/// A rescaled volume that has not been reoriented yet, together with the
/// orientation of the series it came from.
#[derive(Clone, Debug)]
pub struct LoadedSeries {
    pub volume: Volume,
    pub plane: Plane,
    pub direction_cosines: DirectionCosines,
}

/// Width, height, pixel spacing and slice spacing every slice must share.
#[derive(Clone, Copy, Debug)]
struct Geometry {
    width: usize,
    height: usize,
    pixel_spacing: (f64, f64),
    slice_spacing: f64,
}

impl Geometry {
    fn of(slice: &SliceRecord) -> Self {
        Self {
            width: slice.width(),
            height: slice.height(),
            pixel_spacing: slice.pixel_spacing,
            slice_spacing: slice.slice_spacing,
        }
    }

    fn check(&self, slice: &SliceRecord, path: &Path) -> Result<(), VolumeError> {
        let inconsistent = |detail: String| VolumeError::InconsistentGeometry {
            path: path.to_path_buf(),
            detail,
        };
        if (slice.width(), slice.height()) != (self.width, self.height) {
            return Err(inconsistent(format!(
                "{}x{} pixels, expected {}x{}",
                slice.width(),
                slice.height(),
                self.width,
                self.height
            )));
        }
        let (dx, dy) = slice.pixel_spacing;
        if !spacing_eq(dx, self.pixel_spacing.0) || !spacing_eq(dy, self.pixel_spacing.1) {
            return Err(inconsistent(format!(
                "pixel spacing {dx}x{dy}, expected {}x{}",
                self.pixel_spacing.0, self.pixel_spacing.1
            )));
        }
        if !spacing_eq(slice.slice_spacing, self.slice_spacing) {
            return Err(inconsistent(format!(
                "slice spacing {}, expected {}",
                slice.slice_spacing, self.slice_spacing
            )));
        }
        Ok(())
    }
}

fn spacing_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= SPACING_TOLERANCE * a.abs().max(b.abs()).max(1.0)
}

pub struct VolumeLoader;

impl VolumeLoader {
    /// Load every slice file in `path` into a rescaled volume
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::InputEmpty`] if the directory holds no slice
    /// files, and otherwise any error from [`VolumeLoader::load_from_file_paths`].
    pub fn load_from_directory(
        path: impl AsRef<Path>,
        decoder: &impl SliceDecoder,
        options: &ConvertOptions,
    ) -> Result<LoadedSeries, VolumeError> {
        let paths = Self::list_slice_files(path.as_ref())?;
        if paths.is_empty() {
            return Err(VolumeError::InputEmpty {
                directory: path.as_ref().to_path_buf(),
            });
        }
        Self::load_from_file_paths(&paths, decoder, options)
    }

    /// Load slices into a rescaled volume
    ///
    /// # Arguments
    ///
    /// * `paths` - Slice files, in depth order unless `options.sort_by` says otherwise
    /// * `decoder` - Turns each file into a [`SliceRecord`]
    /// * `options` - Ordering and degeneracy threshold
    ///
    /// # Errors
    ///
    /// Fails on the first slice that cannot be decoded or does not match the
    /// first slice's geometry, and if the stacked intensities are degenerate.
    pub fn load_from_file_paths(
        paths: &[PathBuf],
        decoder: &impl SliceDecoder,
        options: &ConvertOptions,
    ) -> Result<LoadedSeries, VolumeError> {
        if paths.is_empty() {
            return Err(VolumeError::InputEmpty {
                directory: PathBuf::new(),
            });
        }
        info!(slices = paths.len(), sort_by = ?options.sort_by, "loading series");

        let (first, data) = match options.sort_by {
            SortBy::FileName => Self::stack_in_file_order(paths, decoder)?,
            SortBy::SlicePosition => Self::stack_by_position(paths, decoder)?,
        };

        let plane = Plane::from_direction_cosines(&first.direction_cosines);
        let (dx, dy) = first.pixel_spacing;
        let (width, height, depth) = data.dim();
        let axis_scale =
            Volume::axis_scale_for([dx, dy, first.slice_spacing], [width, height, depth]);
        info!(?plane, width, height, depth, ?axis_scale, "series stacked");

        let volume = Volume::new(data, axis_scale).rescaled(options.min_range)?;
        Ok(LoadedSeries {
            volume,
            plane,
            direction_cosines: first.direction_cosines,
        })
    }

    /// Regular, non-hidden files in `directory`, naturally sorted by name.
    pub fn list_slice_files(directory: &Path) -> Result<Vec<PathBuf>, VolumeError> {
        let mut paths: Vec<_> = fs::read_dir(directory)?
            .filter_map(Result::ok)
            .filter(|entry| !entry.file_name().to_string_lossy().starts_with('.'))
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();

        paths.sort_by(|a, b| natural_cmp(&Self::file_name(a), &Self::file_name(b)));
        Ok(paths)
    }

    /// Directory holding `file`; the current directory for a bare file name.
    pub fn directory_of(file: &Path) -> PathBuf {
        file.parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
    }

    fn file_name(path: &Path) -> String {
        path.file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn decode(decoder: &impl SliceDecoder, path: &Path) -> Result<SliceRecord, VolumeError> {
        debug!(path = %path.display(), "decoding slice");
        decoder
            .decode(path)
            .map_err(|source| VolumeError::DecodeFailure {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Stack slices with depth index = position in `paths`. The first slice
    /// is decoded up front to size the grid; the rest are decoded in
    /// parallel, each straight into its own z-slab.
    fn stack_in_file_order(
        paths: &[PathBuf],
        decoder: &impl SliceDecoder,
    ) -> Result<(SliceRecord, Array3<f32>), VolumeError> {
        let first = Self::decode(decoder, &paths[0])?;
        let geometry = Geometry::of(&first);
        let mut data = Array3::<f32>::zeros((geometry.width, geometry.height, paths.len()));
        Self::place(data.index_axis_mut(Axis(2), 0), &first);

        data.axis_iter_mut(Axis(2))
            .into_par_iter()
            .zip(paths.par_iter())
            .skip(1)
            .try_for_each(|(slab, path)| {
                let slice = Self::decode(decoder, path)?;
                geometry.check(&slice, path)?;
                Self::place(slab, &slice);
                Ok::<_, VolumeError>(())
            })?;

        Ok((first, data))
    }

    /// Stack slices ordered by their position along the slice normal. If any
    /// slice has no position the order of `paths` is kept.
    fn stack_by_position(
        paths: &[PathBuf],
        decoder: &impl SliceDecoder,
    ) -> Result<(SliceRecord, Array3<f32>), VolumeError> {
        let mut slices = paths
            .par_iter()
            .map(|path| Ok((path, Self::decode(decoder, path)?)))
            .collect::<Result<Vec<_>, VolumeError>>()?;

        let positions: Option<Vec<f64>> = slices
            .iter()
            .map(|(_, slice)| slice.position_along_normal())
            .collect();
        match positions {
            Some(positions) => {
                let mut keyed: Vec<_> = positions.into_iter().zip(slices).collect();
                keyed.sort_by(|a, b| a.0.total_cmp(&b.0));
                slices = keyed.into_iter().map(|(_, slice)| slice).collect();
            }
            None => info!("slice positions incomplete, keeping file name order"),
        }

        let geometry = Geometry::of(&slices[0].1);
        let mut data = Array3::<f32>::zeros((geometry.width, geometry.height, slices.len()));
        data.axis_iter_mut(Axis(2))
            .into_par_iter()
            .zip(slices.par_iter())
            .try_for_each(|(slab, (path, slice))| {
                geometry.check(slice, path)?;
                Self::place(slab, slice);
                Ok::<_, VolumeError>(())
            })?;

        let (_, first) = slices.swap_remove(0);
        Ok((first, data))
    }

    /// Write a slice's calibrated intensities into a `[x, y]` slab; image rows
    /// run along y.
    fn place(mut slab: ArrayViewMut2<'_, f32>, slice: &SliceRecord) {
        slab.assign(&slice.calibrated().t());
    }
}

/// Compare strings treating runs of ASCII digits as numbers.
///
/// `slice2` sorts before `slice10`. Equal numbers with different leading
/// zeros fall back to plain string order so the result stays total.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let left = digit_runs(a);
    let right = digit_runs(b);
    for (l, r) in left.iter().zip(&right) {
        let is_number = |s: &str| s.as_bytes()[0].is_ascii_digit();
        let ordering = if is_number(l) && is_number(r) {
            let l = l.trim_start_matches('0');
            let r = r.trim_start_matches('0');
            l.len().cmp(&r.len()).then_with(|| l.cmp(r))
        } else {
            l.cmp(r)
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    left.len().cmp(&right.len()).then_with(|| a.cmp(b))
}

/// Split into maximal runs that are either all ASCII digits or contain none.
fn digit_runs(s: &str) -> Vec<&str> {
    let mut runs = Vec::new();
    let mut start = 0;
    let mut previous: Option<bool> = None;
    for (i, c) in s.char_indices() {
        let digit = c.is_ascii_digit();
        if previous.is_some_and(|p| p != digit) {
            runs.push(&s[start..i]);
            start = i;
        }
        previous = Some(digit);
    }
    if start < s.len() {
        runs.push(&s[start..]);
    }
    runs
}
