//! # DICOM volume export
//!
//! This crate reconstructs a single 3D scalar volume from an ordered series
//! of DICOM cross-sections and writes it as a flat binary file for a volume
//! viewer.
//!
//! The pipeline is a straight line:
//!
//!  1. The slice files of a directory are listed in natural file-name order,
//!     which defines the depth axis.
//!  2. The first slice's direction cosines pick the acquisition plane:
//!     - Axial
//!     - Coronal
//!     - Sagittal
//!  3. Every slice is calibrated (`slope * raw + intercept`) and written into
//!     its own z-slab. Slices are decoded in parallel using rayon.
//!  4. The whole volume is rescaled to `[0, 1]`.
//!  5. Flips and axis permutations bring any plane into one fixed viewing
//!     orientation.
//!  6. The volume is serialized: an ASCII axis-scale line, an ASCII
//!     resolution line, then little-endian `f32` voxels with x varying
//!     fastest.
//!
//! All slices are assumed to come from one series. Slices whose dimensions or
//! pixel spacing disagree with the first slice abort the conversion.
//!
//! The [`quantize`] module holds a standalone k-means intensity quantizer
//! that is not part of the pipeline.
//!
//! # Examples
//!
//! ## Converting a directory of DICOM files
//!
//! ```no_run
//! # use dicom_volume_export::convert;
//! let volume = convert("dicom").expect("should have converted the series");
//! volume
//!     .save("temp/initial_volume.txt")
//!     .expect("should have written the volume file");
//! ```

pub mod enums;
pub mod error;
pub mod orientation;
pub mod plane;
pub mod quantize;
mod serializer;
pub mod slice;
pub mod volume;
pub mod volume_loader;

pub use enums::{Plane, SortBy};
pub use error::{DecodeError, VolumeError};
pub use orientation::OrientationNormalizer;
pub use slice::{DicomSliceDecoder, SliceDecoder, SliceRecord};
pub use volume::Volume;
pub use volume_loader::{ConvertOptions, LoadedSeries, VolumeLoader};

use std::path::Path;

/// Convert the DICOM series in `directory` into a normalized volume.
pub fn convert(directory: impl AsRef<Path>) -> Result<Volume, VolumeError> {
    convert_with(directory, &DicomSliceDecoder, &ConvertOptions::default())
}

/// [`convert`] with a custom slice decoder and options.
pub fn convert_with(
    directory: impl AsRef<Path>,
    decoder: &impl SliceDecoder,
    options: &ConvertOptions,
) -> Result<Volume, VolumeError> {
    let LoadedSeries {
        volume,
        plane,
        direction_cosines,
    } = VolumeLoader::load_from_directory(directory, decoder, options)?;
    Ok(OrientationNormalizer::normalize(
        volume,
        plane,
        &direction_cosines,
    ))
}
