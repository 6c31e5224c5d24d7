//! Brings a volume from whatever plane and cosine signs it was acquired with
//! into the single orientation the volume file uses.
//!
//! The steps always run in the same order:
//!
//! 1. Sign correction: at most one flip of axis 0 (driven by the row
//!    cosines) and at most one flip of axis 1 (driven by the column cosines).
//! 2. Plane specific axis permutation.
//! 3. Flip of axis 1, turning image rows-down into display-up.
//! 4. 180° rotation in the plane of axes 0 and 2.

use crate::{
    enums::Plane,
    plane::{DirectionCosines, round_cosines},
    volume::Volume,
};

use ndarray::Axis;
use tracing::debug;

pub struct OrientationNormalizer;

impl OrientationNormalizer {
    pub fn normalize(volume: Volume, plane: Plane, cosines: &DirectionCosines) -> Volume {
        let volume = Self::correct_signs(volume, plane, cosines);
        let volume = volume.permuted(Self::permutation(plane));
        let volume = volume.flipped(Axis(1));
        Self::rotate_half_turn(volume).into_standard_layout()
    }

    /// Axis order applied for each plane: new axis `i` is old axis `[i]`.
    pub fn permutation(plane: Plane) -> [usize; 3] {
        match plane {
            Plane::Axial => [0, 2, 1],
            Plane::Sagittal => [2, 1, 0],
            Plane::Coronal => [0, 1, 2],
        }
    }

    /// Flip axis 0 and/or axis 1 when the measured row/column cosines point
    /// against the plane's reference direction.
    ///
    /// Each triple triggers at most one flip: the first component where both
    /// vectors are nonzero and disagree in sign decides, the rest are not
    /// looked at.
    pub fn correct_signs(volume: Volume, plane: Plane, cosines: &DirectionCosines) -> Volume {
        let measured = round_cosines(cosines);
        let reference = plane.reference_cosines();

        let mut volume = volume;
        if Self::first_sign_mismatch(&measured[..3], &reference[..3]).is_some() {
            debug!(row = ?&measured[..3], ?plane, "row cosines oppose reference, flipping x");
            volume = volume.flipped(Axis(0));
        }
        if Self::first_sign_mismatch(&measured[3..], &reference[3..]).is_some() {
            debug!(column = ?&measured[3..], ?plane, "column cosines oppose reference, flipping y");
            volume = volume.flipped(Axis(1));
        }
        volume
    }

    /// Index of the first component where both values are nonzero and differ.
    pub fn first_sign_mismatch(measured: &[i32], reference: &[i32]) -> Option<usize> {
        measured
            .iter()
            .zip(reference)
            .position(|(&m, &r)| m != 0 && r != 0 && m != r)
    }

    fn rotate_half_turn(volume: Volume) -> Volume {
        volume.flipped(Axis(0)).flipped(Axis(2))
    }
}
