/// Anatomical plane a slice series was acquired in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Plane {
    Axial,
    Coronal,
    Sagittal,
}

/// How slice files are ordered along the depth axis.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortBy {
    /// Natural sort of the file names. This is the ordering the volume
    /// format's consumers expect.
    #[default]
    FileName,
    /// Projection of ImagePositionPatient onto the slice normal. Falls back
    /// to `FileName` when any slice lacks a position.
    SlicePosition,
}
