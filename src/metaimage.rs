//! Uncompressed MetaImage (.mha/.mhd) reading and writing.
//!
//! Covers exactly what the elastix exchange needs: little-endian binary
//! scalar volumes (`fixed.mha`, `moving.mha`, `result.mhd`) and 3-channel
//! displacement fields (`deformationField.mhd`), with either inline
//! (`ElementDataFile = LOCAL`) or sibling `.raw` payloads.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use nalgebra::{Matrix3, Point3, Vector3};

use crate::error::{Error, Result};
use crate::transform::DisplacementField;
use crate::volume::{ScalarType, Volume, VoxelData};

/// Serialize a volume as a single-file `.mha`, uncompressed.
pub fn write_volume(volume: &Volume, path: &Path) -> Result<()> {
    let mut out = header_common(
        volume.dims(),
        volume.origin(),
        volume.spacing(),
        volume.direction(),
    );
    writeln!(out, "ElementType = {}", volume.scalar_type().met_name()).ok();
    writeln!(out, "ElementDataFile = LOCAL").ok();

    let mut bytes = out.into_bytes();
    append_scalars(&mut bytes, volume.data());
    fs::write(path, bytes)?;
    Ok(())
}

/// Serialize a displacement field as a single-file `.mhd` with inline data,
/// 3 float channels per voxel, matching the transformix output layout.
pub fn write_displacement_field(field: &DisplacementField, path: &Path) -> Result<()> {
    let mut out = header_common(field.dims, &field.origin, &field.spacing, &field.direction);
    writeln!(out, "ElementNumberOfChannels = 3").ok();
    writeln!(out, "ElementType = MET_FLOAT").ok();
    writeln!(out, "ElementDataFile = LOCAL").ok();

    let mut bytes = out.into_bytes();
    bytes.reserve(field.vectors.len() * 12);
    for v in &field.vectors {
        for i in 0..3 {
            bytes.extend_from_slice(&(v[i] as f32).to_le_bytes());
        }
    }
    fs::write(path, bytes)?;
    Ok(())
}

/// Load a scalar volume from a `.mha` or `.mhd` (+ raw) file. The volume is
/// named after the file stem.
pub fn read_volume(path: &Path) -> Result<Volume> {
    let (header, data) = read_parts(path)?;
    if header.channels()? != 1 {
        return Err(header.err("expected a single-channel scalar image"));
    }
    let dims = header.dims()?;
    let scalar_type = header.element_type()?;
    let count = dims[0] * dims[1] * dims[2];
    let expected = count * scalar_type.size_in_bytes();
    if data.len() < expected {
        return Err(header.err(format!(
            "voxel data truncated: expected {expected} bytes, found {}",
            data.len()
        )));
    }
    let voxels = decode_scalars(&data[..expected], scalar_type);
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(Volume::new(
        name,
        dims,
        header.origin()?,
        header.spacing()?,
        header.direction()?,
        voxels,
    ))
}

/// Load a dense displacement field (3-channel float or double image).
pub fn read_displacement_field(path: &Path) -> Result<DisplacementField> {
    let (header, data) = read_parts(path)?;
    if header.channels()? != 3 {
        return Err(header.err("expected a 3-channel displacement field"));
    }
    let dims = header.dims()?;
    let scalar_type = header.element_type()?;
    let count = dims[0] * dims[1] * dims[2];
    let expected = count * 3 * scalar_type.size_in_bytes();
    if data.len() < expected {
        return Err(header.err(format!(
            "vector data truncated: expected {expected} bytes, found {}",
            data.len()
        )));
    }
    let components: Vec<f64> = match scalar_type {
        ScalarType::Float => data[..expected]
            .chunks_exact(4)
            .map(|c| f64::from(f32::from_le_bytes([c[0], c[1], c[2], c[3]])))
            .collect(),
        ScalarType::Double => data[..expected]
            .chunks_exact(8)
            .map(|c| {
                f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]])
            })
            .collect(),
        other => {
            return Err(header.err(format!(
                "unsupported displacement element type {}",
                other.met_name()
            )))
        }
    };
    let vectors = components
        .chunks_exact(3)
        .map(|c| Vector3::new(c[0], c[1], c[2]))
        .collect();
    Ok(DisplacementField {
        dims,
        origin: header.origin()?,
        spacing: header.spacing()?,
        direction: header.direction()?,
        vectors,
    })
}

fn header_common(
    dims: [usize; 3],
    origin: &Point3<f64>,
    spacing: &Vector3<f64>,
    direction: &Matrix3<f64>,
) -> String {
    let mut out = String::new();
    writeln!(out, "ObjectType = Image").ok();
    writeln!(out, "NDims = 3").ok();
    writeln!(out, "BinaryData = True").ok();
    writeln!(out, "BinaryDataByteOrderMSB = False").ok();
    writeln!(out, "CompressedData = False").ok();
    let mut matrix = String::new();
    for r in 0..3 {
        for c in 0..3 {
            if !matrix.is_empty() {
                matrix.push(' ');
            }
            write!(matrix, "{}", direction[(r, c)]).ok();
        }
    }
    writeln!(out, "TransformMatrix = {matrix}").ok();
    writeln!(out, "Offset = {} {} {}", origin.x, origin.y, origin.z).ok();
    writeln!(out, "CenterOfRotation = 0 0 0").ok();
    writeln!(
        out,
        "ElementSpacing = {} {} {}",
        spacing.x, spacing.y, spacing.z
    )
    .ok();
    writeln!(out, "DimSize = {} {} {}", dims[0], dims[1], dims[2]).ok();
    out
}

fn append_scalars(bytes: &mut Vec<u8>, data: &VoxelData) {
    match data {
        VoxelData::U8(v) => bytes.extend_from_slice(v),
        VoxelData::I16(v) => {
            for x in v {
                bytes.extend_from_slice(&x.to_le_bytes());
            }
        }
        VoxelData::U16(v) => {
            for x in v {
                bytes.extend_from_slice(&x.to_le_bytes());
            }
        }
        VoxelData::I32(v) => {
            for x in v {
                bytes.extend_from_slice(&x.to_le_bytes());
            }
        }
        VoxelData::F32(v) => {
            for x in v {
                bytes.extend_from_slice(&x.to_le_bytes());
            }
        }
        VoxelData::F64(v) => {
            for x in v {
                bytes.extend_from_slice(&x.to_le_bytes());
            }
        }
    }
}

fn decode_scalars(bytes: &[u8], scalar_type: ScalarType) -> VoxelData {
    match scalar_type {
        ScalarType::UChar => VoxelData::U8(bytes.to_vec()),
        ScalarType::Short => VoxelData::I16(
            bytes
                .chunks_exact(2)
                .map(|c| i16::from_le_bytes([c[0], c[1]]))
                .collect(),
        ),
        ScalarType::UShort => VoxelData::U16(
            bytes
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]))
                .collect(),
        ),
        ScalarType::Int => VoxelData::I32(
            bytes
                .chunks_exact(4)
                .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        ),
        ScalarType::Float => VoxelData::F32(
            bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        ),
        ScalarType::Double => VoxelData::F64(
            bytes
                .chunks_exact(8)
                .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                .collect(),
        ),
    }
}

struct Header {
    path: PathBuf,
    fields: Vec<(String, String)>,
}

impl Header {
    fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn err(&self, reason: impl Into<String>) -> Error {
        Error::format(&self.path, reason)
    }

    fn dims(&self) -> Result<[usize; 3]> {
        let raw = self
            .get("DimSize")
            .ok_or_else(|| self.err("missing DimSize"))?;
        let parts: Vec<usize> = raw
            .split_whitespace()
            .map(str::parse)
            .collect::<std::result::Result<_, _>>()
            .map_err(|_| self.err(format!("bad DimSize: {raw}")))?;
        if parts.len() != 3 {
            return Err(self.err(format!("bad DimSize: {raw}")));
        }
        Ok([parts[0], parts[1], parts[2]])
    }

    fn floats(&self, key: &str, expected: usize) -> Result<Option<Vec<f64>>> {
        let Some(raw) = self.get(key) else {
            return Ok(None);
        };
        let parts: Vec<f64> = raw
            .split_whitespace()
            .map(str::parse)
            .collect::<std::result::Result<_, _>>()
            .map_err(|_| self.err(format!("bad {key}: {raw}")))?;
        if parts.len() != expected {
            return Err(self.err(format!("bad {key}: {raw}")));
        }
        Ok(Some(parts))
    }

    fn origin(&self) -> Result<Point3<f64>> {
        Ok(match self.floats("Offset", 3)? {
            Some(v) => Point3::new(v[0], v[1], v[2]),
            None => Point3::origin(),
        })
    }

    fn spacing(&self) -> Result<Vector3<f64>> {
        Ok(match self.floats("ElementSpacing", 3)? {
            Some(v) => Vector3::new(v[0], v[1], v[2]),
            None => Vector3::new(1.0, 1.0, 1.0),
        })
    }

    fn direction(&self) -> Result<Matrix3<f64>> {
        Ok(match self.floats("TransformMatrix", 9)? {
            Some(v) => Matrix3::from_row_slice(&v),
            None => Matrix3::identity(),
        })
    }

    fn channels(&self) -> Result<usize> {
        match self.get("ElementNumberOfChannels") {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| self.err(format!("bad ElementNumberOfChannels: {raw}"))),
            None => Ok(1),
        }
    }

    fn element_type(&self) -> Result<ScalarType> {
        let raw = self
            .get("ElementType")
            .ok_or_else(|| self.err("missing ElementType"))?;
        ScalarType::from_met_name(raw)
            .ok_or_else(|| self.err(format!("unsupported ElementType: {raw}")))
    }

    fn validate(&self) -> Result<()> {
        if let Some(ndims) = self.get("NDims") {
            if ndims.trim() != "3" {
                return Err(self.err(format!("unsupported NDims: {ndims}")));
            }
        }
        if self.get("BinaryData").is_some_and(|v| v.trim() != "True") {
            return Err(self.err("only binary data is supported"));
        }
        if self
            .get("BinaryDataByteOrderMSB")
            .is_some_and(|v| v.trim() == "True")
        {
            return Err(self.err("big-endian data is not supported"));
        }
        if self
            .get("CompressedData")
            .is_some_and(|v| v.trim() == "True")
        {
            return Err(self.err("compressed data is not supported"));
        }
        Ok(())
    }
}

/// Parse the header and return it together with the raw payload bytes,
/// resolving an external `ElementDataFile` against the header's directory.
fn read_parts(path: &Path) -> Result<(Header, Vec<u8>)> {
    let bytes = fs::read(path)?;
    let mut header = Header {
        path: path.to_path_buf(),
        fields: Vec::new(),
    };
    let mut pos = 0usize;
    let mut data_file: Option<String> = None;
    while pos < bytes.len() {
        let end = bytes[pos..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|i| pos + i)
            .unwrap_or(bytes.len());
        let line = String::from_utf8_lossy(&bytes[pos..end]);
        pos = end + 1;
        let Some((key, value)) = line.split_once('=') else {
            return Err(header.err(format!("malformed header line: {}", line.trim())));
        };
        let key = key.trim().to_string();
        let value = value.trim().to_string();
        let is_data_file = key == "ElementDataFile";
        if is_data_file {
            data_file = Some(value.clone());
        }
        header.fields.push((key, value));
        if is_data_file {
            break;
        }
    }
    let data_file = data_file.ok_or_else(|| header.err("missing ElementDataFile"))?;
    header.validate()?;
    let data = if data_file == "LOCAL" {
        bytes[pos.min(bytes.len())..].to_vec()
    } else {
        let sibling = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.join(&data_file),
            _ => PathBuf::from(&data_file),
        };
        fs::read(sibling)?
    };
    Ok((header, data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tempfile::TempDir;

    fn sample_volume() -> Volume {
        Volume::new(
            "sample",
            [2, 2, 1],
            Point3::new(1.0, -2.5, 3.0),
            Vector3::new(0.5, 0.5, 2.0),
            Matrix3::identity(),
            VoxelData::I16(vec![10, -20, 30, -40]),
        )
    }

    #[test]
    fn volume_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vol.mha");
        let vol = sample_volume();
        write_volume(&vol, &path).unwrap();
        let loaded = read_volume(&path).unwrap();
        assert_eq!(loaded.dims(), vol.dims());
        assert_eq!(loaded.data(), vol.data());
        assert_relative_eq!(loaded.origin(), vol.origin());
        assert_relative_eq!(loaded.spacing(), vol.spacing());
        assert_eq!(loaded.name(), "vol");
    }

    #[test]
    fn displacement_field_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("deformationField.mhd");
        let field = DisplacementField {
            dims: [2, 1, 1],
            origin: Point3::new(0.0, 0.0, 0.0),
            spacing: Vector3::new(1.0, 1.0, 1.0),
            direction: Matrix3::identity(),
            vectors: vec![Vector3::new(0.5, -1.25, 2.0), Vector3::new(0.0, 0.75, -0.5)],
        };
        write_displacement_field(&field, &path).unwrap();
        let loaded = read_displacement_field(&path).unwrap();
        assert_eq!(loaded.dims, field.dims);
        assert_eq!(loaded.vectors, field.vectors);
    }

    #[test]
    fn reads_external_raw_payload() {
        let dir = TempDir::new().unwrap();
        let header_path = dir.path().join("vol.mhd");
        let header = "ObjectType = Image\nNDims = 3\nBinaryData = True\n\
                      BinaryDataByteOrderMSB = False\nCompressedData = False\n\
                      DimSize = 2 1 1\nElementType = MET_UCHAR\n\
                      ElementDataFile = vol.raw\n";
        fs::write(&header_path, header).unwrap();
        fs::write(dir.path().join("vol.raw"), [7u8, 9u8]).unwrap();
        let loaded = read_volume(&header_path).unwrap();
        assert_eq!(loaded.data(), &VoxelData::U8(vec![7, 9]));
        assert_relative_eq!(loaded.spacing(), &Vector3::new(1.0, 1.0, 1.0));
    }

    #[test]
    fn rejects_compressed_data() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vol.mhd");
        let header = "ObjectType = Image\nNDims = 3\nBinaryData = True\n\
                      CompressedData = True\nDimSize = 1 1 1\n\
                      ElementType = MET_UCHAR\nElementDataFile = LOCAL\n";
        fs::write(&path, header).unwrap();
        assert!(matches!(read_volume(&path), Err(Error::Format { .. })));
    }

    #[test]
    fn truncated_payload_is_a_format_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vol.mhd");
        let header = "ObjectType = Image\nNDims = 3\nBinaryData = True\n\
                      DimSize = 4 4 4\nElementType = MET_SHORT\n\
                      ElementDataFile = LOCAL\n";
        fs::write(&path, header).unwrap();
        assert!(matches!(read_volume(&path), Err(Error::Format { .. })));
    }
}
