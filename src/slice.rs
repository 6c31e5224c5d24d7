use crate::{error::DecodeError, plane::DirectionCosines};

use dicom::{
    core::Tag,
    object::{FileDicomObject, InMemDicomObject, open_file},
    pixeldata::{ConvertOptions, ModalityLutOption, PixelDecoder},
};
use dicom_dictionary_std::tags;
use ndarray::{Array2, s};
use std::path::Path;

/// One decoded cross-section together with the geometry needed to place it
/// in a volume.
#[derive(Clone, Debug)]
pub struct SliceRecord {
    /// Raw stored samples, `rows x columns`.
    pub pixels: Array2<f32>,
    pub direction_cosines: DirectionCosines,
    /// `(dx, dy)`
    pub pixel_spacing: (f64, f64),
    pub slice_spacing: f64,
    pub rescale_slope: f64,
    pub rescale_intercept: f64,
    /// ImagePositionPatient, if present. Only used for positional sorting.
    pub position: Option<[f64; 3]>,
}

impl SliceRecord {
    pub fn width(&self) -> usize {
        self.pixels.ncols()
    }

    pub fn height(&self) -> usize {
        self.pixels.nrows()
    }

    /// `slope * raw + intercept`, evaluated in double precision.
    pub fn calibrated(&self) -> Array2<f32> {
        let (slope, intercept) = (self.rescale_slope, self.rescale_intercept);
        self.pixels
            .mapv(|raw| (slope * f64::from(raw) + intercept) as f32)
    }

    /// Distance of the slice origin along the slice normal.
    pub fn position_along_normal(&self) -> Option<f64> {
        let [rx, ry, rz, cx, cy, cz] = self.direction_cosines;
        let normal = [ry * cz - rz * cy, rz * cx - rx * cz, rx * cy - ry * cx];
        self.position
            .map(|p| p[0] * normal[0] + p[1] * normal[1] + p[2] * normal[2])
    }
}

/// Turns one file into a [`SliceRecord`].
pub trait SliceDecoder: Sync {
    fn decode(&self, path: &Path) -> Result<SliceRecord, DecodeError>;
}

/// Decodes DICOM files with dicom-rs.
#[derive(Clone, Copy, Debug, Default)]
pub struct DicomSliceDecoder;

impl SliceDecoder for DicomSliceDecoder {
    fn decode(&self, path: &Path) -> Result<SliceRecord, DecodeError> {
        let dicom_object = open_file(path)?;

        let direction_cosines = Self::multi_float::<6>(
            &dicom_object,
            tags::IMAGE_ORIENTATION_PATIENT,
            "ImageOrientationPatient",
        )?;
        // PixelSpacing[0] is taken as the x spacing, matching existing volume files.
        let [dx, dy] =
            Self::multi_float::<2>(&dicom_object, tags::PIXEL_SPACING, "PixelSpacing")?;
        let slice_spacing = Self::float(&dicom_object, tags::SLICE_THICKNESS, "SliceThickness")
            .or_else(|_| {
                Self::float(
                    &dicom_object,
                    tags::SPACING_BETWEEN_SLICES,
                    "SpacingBetweenSlices",
                )
            })?;
        let rescale_slope = Self::float(&dicom_object, tags::RESCALE_SLOPE, "RescaleSlope")?;
        let rescale_intercept =
            Self::float(&dicom_object, tags::RESCALE_INTERCEPT, "RescaleIntercept")?;
        let position = Self::multi_float::<3>(
            &dicom_object,
            tags::IMAGE_POSITION_PATIENT,
            "ImagePositionPatient",
        )
        .ok();

        Ok(SliceRecord {
            pixels: Self::decode_image(&dicom_object)?,
            direction_cosines,
            pixel_spacing: (dx, dy),
            slice_spacing,
            rescale_slope,
            rescale_intercept,
            position,
        })
    }
}

impl DicomSliceDecoder {
    fn decode_image(
        dicom_object: &FileDicomObject<InMemDicomObject>,
    ) -> Result<Array2<f32>, DecodeError> {
        let pixel_data = dicom_object
            .decode_pixel_data()
            .map_err(|e| DecodeError::PixelData(e.to_string()))?;
        // Rescale is applied later from the tags, so keep the stored values.
        let options = ConvertOptions::new().with_modality_lut(ModalityLutOption::None);
        pixel_data
            .to_ndarray_with_options::<f32>(&options)
            .map(|arr| arr.slice_move(s![0, .., .., 0]))
            .map_err(|e| DecodeError::PixelData(e.to_string()))
    }

    fn float(
        dicom_object: &FileDicomObject<InMemDicomObject>,
        tag: Tag,
        field: &'static str,
    ) -> Result<f64, DecodeError> {
        dicom_object
            .element(tag)
            .map_err(|_| DecodeError::MissingField(field))?
            .to_float64()
            .map_err(|e| DecodeError::InvalidField {
                field,
                reason: e.to_string(),
            })
    }

    fn multi_float<const N: usize>(
        dicom_object: &FileDicomObject<InMemDicomObject>,
        tag: Tag,
        field: &'static str,
    ) -> Result<[f64; N], DecodeError> {
        let values = dicom_object
            .element(tag)
            .map_err(|_| DecodeError::MissingField(field))?
            .to_multi_float64()
            .map_err(|e| DecodeError::InvalidField {
                field,
                reason: e.to_string(),
            })?;
        let found = values.len();
        values.try_into().map_err(|_| DecodeError::InvalidField {
            field,
            reason: format!("expected {N} values, found {found}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn record(pixels: Array2<f32>, slope: f64, intercept: f64) -> SliceRecord {
        SliceRecord {
            pixels,
            direction_cosines: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            pixel_spacing: (0.5, 0.5),
            slice_spacing: 2.0,
            rescale_slope: slope,
            rescale_intercept: intercept,
            position: None,
        }
    }

    #[test]
    fn calibrated_applies_slope_and_intercept() {
        let slice = record(array![[0.0, 1000.0], [24.0, 2048.0]], 1.0, -1024.0);
        assert_eq!(
            slice.calibrated(),
            array![[-1024.0, -24.0], [-1000.0, 1024.0]]
        );

        let slice = record(array![[10.0, 20.0, 30.0]], 0.5, 3.0);
        assert_eq!(slice.calibrated(), array![[8.0, 13.0, 18.0]]);
        assert_eq!((slice.width(), slice.height()), (3, 1));
    }

    #[test]
    fn position_projects_onto_normal() {
        let mut slice = record(Array2::zeros((1, 1)), 1.0, 0.0);
        assert!(slice.position_along_normal().is_none());

        slice.position = Some([-120.0, 40.0, 17.5]);
        assert_relative_eq!(slice.position_along_normal().unwrap(), 17.5);

        // Sagittal: row along y, column along -z, normal along -x.
        slice.direction_cosines = [0.0, 1.0, 0.0, 0.0, 0.0, -1.0];
        assert_relative_eq!(slice.position_along_normal().unwrap(), 120.0);
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = DicomSliceDecoder.decode(&dir.path().join("missing.dcm"));
        assert!(matches!(result, Err(DecodeError::Read(_))));
    }

    mod dicom_files {
        use super::*;
        use dicom::{
            core::{DataElement, PrimitiveValue, VR},
            object::FileMetaTableBuilder,
            transfer_syntax::entries::EXPLICIT_VR_LITTLE_ENDIAN,
        };
        use std::path::PathBuf;

        const CT_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.2";

        fn decimals(values: &[&str]) -> PrimitiveValue {
            PrimitiveValue::Strs(values.iter().map(|v| v.to_string()).collect())
        }

        fn put_decimals(obj: &mut InMemDicomObject, tag: Tag, values: &[&str]) {
            obj.put(DataElement::new(tag, VR::DS, decimals(values)));
        }

        fn put_u16(obj: &mut InMemDicomObject, tag: Tag, value: u16) {
            obj.put(DataElement::new(tag, VR::US, PrimitiveValue::from(value)));
        }

        /// A 2x3 unsigned 16-bit CT slice with slope 2 and intercept -1024.
        fn ct_slice() -> InMemDicomObject {
            let mut obj = InMemDicomObject::new_empty();
            obj.put(DataElement::new(
                tags::SOP_CLASS_UID,
                VR::UI,
                PrimitiveValue::from(CT_IMAGE_STORAGE),
            ));
            put_decimals(
                &mut obj,
                tags::IMAGE_ORIENTATION_PATIENT,
                &["1", "0", "0", "0", "1", "0"],
            );
            put_decimals(&mut obj, tags::IMAGE_POSITION_PATIENT, &["-100", "-50", "25"]);
            put_decimals(&mut obj, tags::PIXEL_SPACING, &["0.75", "0.5"]);
            put_decimals(&mut obj, tags::SLICE_THICKNESS, &["1.25"]);
            put_decimals(&mut obj, tags::RESCALE_SLOPE, &["2"]);
            put_decimals(&mut obj, tags::RESCALE_INTERCEPT, &["-1024"]);
            put_u16(&mut obj, tags::ROWS, 2);
            put_u16(&mut obj, tags::COLUMNS, 3);
            put_u16(&mut obj, tags::SAMPLES_PER_PIXEL, 1);
            put_u16(&mut obj, tags::BITS_ALLOCATED, 16);
            put_u16(&mut obj, tags::BITS_STORED, 16);
            put_u16(&mut obj, tags::HIGH_BIT, 15);
            put_u16(&mut obj, tags::PIXEL_REPRESENTATION, 0);
            obj.put(DataElement::new(
                tags::PHOTOMETRIC_INTERPRETATION,
                VR::CS,
                PrimitiveValue::from("MONOCHROME2"),
            ));
            obj.put(DataElement::new(
                tags::PIXEL_DATA,
                VR::OW,
                PrimitiveValue::U16([0_u16, 1, 2, 10, 11, 12].into_iter().collect()),
            ));
            obj
        }

        fn write(dir: &Path, name: &str, obj: InMemDicomObject) -> PathBuf {
            let path = dir.join(name);
            obj.with_meta(
                FileMetaTableBuilder::new()
                    .transfer_syntax(EXPLICIT_VR_LITTLE_ENDIAN.uid())
                    .media_storage_sop_class_uid(CT_IMAGE_STORAGE)
                    .media_storage_sop_instance_uid("1.2.826.0.1.3680043.2.1125.1"),
            )
            .unwrap()
            .write_to_file(&path)
            .unwrap();
            path
        }

        #[test]
        fn decodes_stored_samples_and_geometry() {
            let dir = tempfile::tempdir().unwrap();
            let path = write(dir.path(), "slice.dcm", ct_slice());

            let slice = DicomSliceDecoder.decode(&path).unwrap();
            assert_eq!((slice.width(), slice.height()), (3, 2));
            // Stored values, with no modality LUT applied on decode.
            assert_eq!(slice.pixels, array![[0.0, 1.0, 2.0], [10.0, 11.0, 12.0]]);
            assert_eq!(
                slice.calibrated(),
                array![[-1024.0, -1022.0, -1020.0], [-1004.0, -1002.0, -1000.0]]
            );
            assert_eq!(slice.direction_cosines, [1.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
            assert_eq!(slice.pixel_spacing, (0.75, 0.5));
            assert_relative_eq!(slice.slice_spacing, 1.25);
            assert_eq!(slice.position, Some([-100.0, -50.0, 25.0]));
        }

        #[test]
        fn missing_rescale_tags_are_reported_by_name() {
            let dir = tempfile::tempdir().unwrap();

            let mut obj = ct_slice();
            obj.remove_element(tags::RESCALE_SLOPE);
            let path = write(dir.path(), "no_slope.dcm", obj);
            assert!(matches!(
                DicomSliceDecoder.decode(&path),
                Err(DecodeError::MissingField("RescaleSlope"))
            ));

            let mut obj = ct_slice();
            obj.remove_element(tags::RESCALE_INTERCEPT);
            let path = write(dir.path(), "no_intercept.dcm", obj);
            assert!(matches!(
                DicomSliceDecoder.decode(&path),
                Err(DecodeError::MissingField("RescaleIntercept"))
            ));
        }

        #[test]
        fn spacing_between_slices_replaces_missing_thickness() {
            let dir = tempfile::tempdir().unwrap();

            let mut obj = ct_slice();
            obj.remove_element(tags::SLICE_THICKNESS);
            put_decimals(&mut obj, tags::SPACING_BETWEEN_SLICES, &["2.5"]);
            let path = write(dir.path(), "fallback.dcm", obj);
            assert_relative_eq!(DicomSliceDecoder.decode(&path).unwrap().slice_spacing, 2.5);

            let mut obj = ct_slice();
            obj.remove_element(tags::SLICE_THICKNESS);
            let path = write(dir.path(), "neither.dcm", obj);
            assert!(matches!(
                DicomSliceDecoder.decode(&path),
                Err(DecodeError::MissingField("SpacingBetweenSlices"))
            ));
        }

        #[test]
        fn wrong_value_counts_are_invalid() {
            let dir = tempfile::tempdir().unwrap();

            let mut obj = ct_slice();
            put_decimals(
                &mut obj,
                tags::IMAGE_ORIENTATION_PATIENT,
                &["1", "0", "0", "0", "1"],
            );
            let path = write(dir.path(), "short_orientation.dcm", obj);
            assert!(matches!(
                DicomSliceDecoder.decode(&path),
                Err(DecodeError::InvalidField { field: "ImageOrientationPatient", .. })
            ));

            let mut obj = ct_slice();
            put_decimals(&mut obj, tags::PIXEL_SPACING, &["0.75", "0.5", "0.25"]);
            let path = write(dir.path(), "long_spacing.dcm", obj);
            assert!(matches!(
                DicomSliceDecoder.decode(&path),
                Err(DecodeError::InvalidField { field: "PixelSpacing", .. })
            ));
        }

        #[test]
        fn position_is_optional() {
            let dir = tempfile::tempdir().unwrap();
            let mut obj = ct_slice();
            obj.remove_element(tags::IMAGE_POSITION_PATIENT);
            let path = write(dir.path(), "unplaced.dcm", obj);

            let slice = DicomSliceDecoder.decode(&path).unwrap();
            assert!(slice.position.is_none());
            assert_eq!(slice.pixels.dim(), (2, 3));
        }
    }
}
