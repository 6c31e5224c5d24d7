//! Flat volume file: two ASCII header lines followed by raw voxels.
//!
//! ```text
//! <scale x> <scale y> <scale z>\n
//! <res x> <res y> <res z>\n
//! <res x * res y * res z little-endian f32, x fastest, then y, then z>
//! ```

use crate::{error::VolumeError, volume::Volume};

use ndarray::parallel::prelude::*;
use ndarray::{Array3, Axis, ShapeBuilder};
use std::{
    fs::{self, File},
    io::{self, BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};
use tracing::info;

impl Volume {
    /// Write the header and voxel body to `writer`.
    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<(), VolumeError> {
        let [sx, sy, sz] = self.axis_scale;
        let [rx, ry, rz] = self.resolution();
        write!(writer, "{sx:?} {sy:?} {sz:?}\n{rx} {ry} {rz}\n")?;

        // One buffer per z plane, each traversed y-major with x fastest.
        let planes: Vec<Vec<u8>> = self
            .data
            .axis_iter(Axis(2))
            .into_par_iter()
            .map(|plane| {
                let mut bytes = Vec::with_capacity(plane.len() * 4);
                for value in plane.t().iter() {
                    bytes.extend_from_slice(&value.to_le_bytes());
                }
                bytes
            })
            .collect();
        for bytes in &planes {
            writer.write_all(bytes)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Save to `path`, creating parent directories as needed.
    ///
    /// The file is written under a temporary name next to `path` and only
    /// renamed into place once complete, so a failed save never leaves a
    /// truncated volume behind.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), VolumeError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let partial = Self::partial_path(path)?;

        let result = File::create(&partial)
            .map_err(VolumeError::from)
            .and_then(|file| self.write_to(BufWriter::new(file)))
            .and_then(|()| fs::rename(&partial, path).map_err(VolumeError::from));
        if result.is_err() {
            let _ = fs::remove_file(&partial);
        } else {
            info!(path = %path.display(), resolution = ?self.resolution(), "volume written");
        }
        result
    }

    /// Parse a volume previously written by [`Volume::write_to`].
    pub fn read_from<R: BufRead>(mut reader: R) -> Result<Self, VolumeError> {
        let axis_scale: [f32; 3] = Self::parse_header_line(&mut reader, "axis scale")?;
        let [rx, ry, rz]: [usize; 3] = Self::parse_header_line(&mut reader, "resolution")?;

        let mut body = Vec::new();
        reader.read_to_end(&mut body)?;
        let expected = rx * ry * rz * 4;
        if body.len() != expected {
            return Err(VolumeError::MalformedHeader(format!(
                "expected {expected} bytes of voxel data, found {}",
                body.len()
            )));
        }

        let values: Vec<f32> = body
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        let data = Array3::from_shape_vec((rx, ry, rz).f(), values)
            .map_err(|e| VolumeError::MalformedHeader(e.to_string()))?;

        Ok(Volume::new(data, axis_scale).into_standard_layout())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, VolumeError> {
        Self::read_from(BufReader::new(File::open(path)?))
    }

    fn parse_header_line<R: BufRead, T: std::str::FromStr>(
        reader: &mut R,
        name: &str,
    ) -> Result<[T; 3], VolumeError> {
        let mut line = String::new();
        reader.read_line(&mut line)?;
        let values = line
            .split_whitespace()
            .map(str::parse)
            .collect::<Result<Vec<T>, _>>()
            .map_err(|_| VolumeError::MalformedHeader(format!("unparsable {name}: {line:?}")))?;
        values.try_into().map_err(|_| {
            VolumeError::MalformedHeader(format!("{name} needs three values: {line:?}"))
        })
    }

    fn partial_path(path: &Path) -> Result<PathBuf, VolumeError> {
        let name = path.file_name().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a file path", path.display()),
            )
        })?;
        let mut partial = name.to_os_string();
        partial.push(".partial");
        Ok(path.with_file_name(partial))
    }
}
