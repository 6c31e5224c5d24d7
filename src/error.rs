use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VolumeError {
    #[error("No slice files found in {}", directory.display())]
    InputEmpty { directory: PathBuf },

    #[error("Failed to decode slice {}: {source}", path.display())]
    DecodeFailure {
        path: PathBuf,
        #[source]
        source: DecodeError,
    },

    #[error("Inconsistent geometry in slice {}: {detail}", path.display())]
    InconsistentGeometry { path: PathBuf, detail: String },

    #[error("Degenerate volume: intensity range {range} is below {epsilon}")]
    DegenerateVolume { range: f32, epsilon: f32 },

    #[error("Malformed volume file: {0}")]
    MalformedHeader(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure to turn a single file into a [`SliceRecord`].
///
/// [`SliceRecord`]: crate::slice::SliceRecord
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("DICOM error: {0}")]
    Read(#[from] dicom::object::ReadError),

    #[error("missing required field {0}")]
    MissingField(&'static str),

    #[error("invalid value for {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("pixel data could not be decoded: {0}")]
    PixelData(String),
}
