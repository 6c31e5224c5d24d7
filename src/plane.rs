use crate::enums::Plane;

/// Row direction followed by column direction, as stored in
/// ImageOrientationPatient.
pub type DirectionCosines = [f64; 6];

const CORONAL_PATTERN: [i32; 6] = [1, 0, 0, 0, 0, 1];
const SAGITTAL_PATTERN: [i32; 6] = [0, 1, 0, 0, 0, 1];
const AXIAL_PATTERN: [i32; 6] = [1, 0, 0, 0, 1, 0];

/// Round every cosine to the nearest integer, keeping its sign.
pub fn round_cosines(cosines: &DirectionCosines) -> [i32; 6] {
    cosines.map(|c| c.round() as i32)
}

impl Plane {
    /// Classify a slice by its direction cosines.
    ///
    /// Signs are ignored and each component is rounded to the nearest
    /// integer before matching. Oblique or otherwise unrecognized
    /// orientations are treated as axial.
    pub fn from_direction_cosines(cosines: &DirectionCosines) -> Self {
        let pattern = round_cosines(cosines).map(i32::abs);
        if pattern == CORONAL_PATTERN {
            Plane::Coronal
        } else if pattern == SAGITTAL_PATTERN {
            Plane::Sagittal
        } else {
            // AXIAL_PATTERN and everything else
            Plane::Axial
        }
    }

    /// Signed direction cosines the output orientation is defined against.
    pub fn reference_cosines(self) -> [i32; 6] {
        match self {
            Plane::Axial => AXIAL_PATTERN,
            Plane::Sagittal => [0, 1, 0, 0, 0, -1],
            Plane::Coronal => [1, 0, 0, 0, 0, -1],
        }
    }
}
