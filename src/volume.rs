use crate::error::VolumeError;

use ndarray::parallel::prelude::*;
use ndarray::{Array3, Axis};

/// Smallest intensity range a volume may span and still be rescaled.
pub const MIN_INTENSITY_RANGE: f32 = 1e-5;

/// Dense scalar volume indexed `[x, y, z]`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Volume {
    pub data: Array3<f32>,
    /// Relative physical extent of each axis, smallest axis = 1.0.
    pub axis_scale: [f32; 3],
}

impl Volume {
    pub fn new(data: Array3<f32>, axis_scale: [f32; 3]) -> Self {
        Self { data, axis_scale }
    }

    /// Get the dimensions of the volume `[x, y, z]`
    pub fn resolution(&self) -> [usize; 3] {
        let (x, y, z) = self.data.dim();
        [x, y, z]
    }

    /// Aspect ratio of a volume with the given voxel spacing and dimensions.
    ///
    /// Each axis extent is `spacing * dim / 2`; all three are divided by the
    /// smallest so that axis comes out as exactly 1.0.
    pub fn axis_scale_for(spacing: [f64; 3], resolution: [usize; 3]) -> [f32; 3] {
        let extents: [f64; 3] =
            std::array::from_fn(|i| spacing[i] * resolution[i] as f64 / 2.0);
        let min_extent = extents.iter().copied().fold(f64::INFINITY, f64::min);
        extents.map(|extent| (extent / min_extent) as f32)
    }

    /// Global `(min, max)` intensity.
    pub fn intensity_range(&self) -> (f32, f32) {
        self.data
            .par_iter()
            .fold(
                || (f32::INFINITY, f32::NEG_INFINITY),
                |(lo, hi), &v| (lo.min(v), hi.max(v)),
            )
            .reduce(
                || (f32::INFINITY, f32::NEG_INFINITY),
                |(a_lo, a_hi), (b_lo, b_hi)| (a_lo.min(b_lo), a_hi.max(b_hi)),
            )
    }

    /// Map intensities linearly onto `[0, 1]`.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::DegenerateVolume`] if `max - min` is below
    /// `min_range`.
    pub fn rescaled(mut self, min_range: f32) -> Result<Self, VolumeError> {
        let (min, max) = self.intensity_range();
        let range = max - min;
        if range.is_nan() || range < min_range {
            return Err(VolumeError::DegenerateVolume {
                range,
                epsilon: min_range,
            });
        }
        self.data.par_mapv_inplace(|v| (v - min) / range);
        Ok(self)
    }

    /// Mirror the volume along `axis`.
    pub fn flipped(mut self, axis: Axis) -> Self {
        self.data.invert_axis(axis);
        self
    }

    /// Reorder the axes so that new axis `i` is old axis `axes[i]`. The axis
    /// scale follows the data.
    pub fn permuted(self, axes: [usize; 3]) -> Self {
        Self {
            data: self.data.permuted_axes(axes),
            axis_scale: axes.map(|i| self.axis_scale[i]),
        }
    }

    /// Copy into row-major layout if flips or permutations left the data
    /// strided.
    pub fn into_standard_layout(self) -> Self {
        if self.data.is_standard_layout() {
            return self;
        }
        Self {
            data: self.data.as_standard_layout().into_owned(),
            axis_scale: self.axis_scale,
        }
    }
}
