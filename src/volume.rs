//! Volume entity: 3-D scalar image data with physical-space metadata.
//!
//! A volume combines a voxel buffer with origin, spacing and a direction
//! matrix mapping voxel indices to physical coordinates. Scalar types follow
//! the MetaImage element types the external engine reads and writes.

use nalgebra::{Matrix3, Point3, Vector3};

/// Scalar element type of a voxel buffer, named after the MetaImage
/// `ElementType` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    UChar,
    Short,
    UShort,
    Int,
    Float,
    Double,
}

impl ScalarType {
    pub fn met_name(self) -> &'static str {
        match self {
            ScalarType::UChar => "MET_UCHAR",
            ScalarType::Short => "MET_SHORT",
            ScalarType::UShort => "MET_USHORT",
            ScalarType::Int => "MET_INT",
            ScalarType::Float => "MET_FLOAT",
            ScalarType::Double => "MET_DOUBLE",
        }
    }

    pub fn from_met_name(name: &str) -> Option<Self> {
        match name {
            "MET_UCHAR" => Some(ScalarType::UChar),
            "MET_SHORT" => Some(ScalarType::Short),
            "MET_USHORT" => Some(ScalarType::UShort),
            "MET_INT" => Some(ScalarType::Int),
            "MET_FLOAT" => Some(ScalarType::Float),
            "MET_DOUBLE" => Some(ScalarType::Double),
            _ => None,
        }
    }

    pub fn size_in_bytes(self) -> usize {
        match self {
            ScalarType::UChar => 1,
            ScalarType::Short | ScalarType::UShort => 2,
            ScalarType::Int | ScalarType::Float => 4,
            ScalarType::Double => 8,
        }
    }
}

/// Voxel buffer, one variant per supported scalar type.
#[derive(Debug, Clone, PartialEq)]
pub enum VoxelData {
    U8(Vec<u8>),
    I16(Vec<i16>),
    U16(Vec<u16>),
    I32(Vec<i32>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl VoxelData {
    pub fn scalar_type(&self) -> ScalarType {
        match self {
            VoxelData::U8(_) => ScalarType::UChar,
            VoxelData::I16(_) => ScalarType::Short,
            VoxelData::U16(_) => ScalarType::UShort,
            VoxelData::I32(_) => ScalarType::Int,
            VoxelData::F32(_) => ScalarType::Float,
            VoxelData::F64(_) => ScalarType::Double,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            VoxelData::U8(v) => v.len(),
            VoxelData::I16(v) => v.len(),
            VoxelData::U16(v) => v.len(),
            VoxelData::I32(v) => v.len(),
            VoxelData::F32(v) => v.len(),
            VoxelData::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Voxel value widened to f64, for casting and comparisons.
    pub fn value(&self, i: usize) -> f64 {
        match self {
            VoxelData::U8(v) => f64::from(v[i]),
            VoxelData::I16(v) => f64::from(v[i]),
            VoxelData::U16(v) => f64::from(v[i]),
            VoxelData::I32(v) => f64::from(v[i]),
            VoxelData::F32(v) => f64::from(v[i]),
            VoxelData::F64(v) => v[i],
        }
    }
}

/// 3-D scalar image with physical geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    name: String,
    dims: [usize; 3],
    origin: Point3<f64>,
    spacing: Vector3<f64>,
    direction: Matrix3<f64>,
    data: VoxelData,
}

impl Volume {
    pub fn new(
        name: impl Into<String>,
        dims: [usize; 3],
        origin: Point3<f64>,
        spacing: Vector3<f64>,
        direction: Matrix3<f64>,
        data: VoxelData,
    ) -> Self {
        debug_assert_eq!(dims[0] * dims[1] * dims[2], data.len());
        Self {
            name: name.into(),
            dims,
            origin,
            spacing,
            direction,
            data,
        }
    }

    /// Empty placeholder volume, used as a reusable scratch output that a
    /// registration call overwrites in place.
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dims: [0, 0, 0],
            origin: Point3::origin(),
            spacing: Vector3::new(1.0, 1.0, 1.0),
            direction: Matrix3::identity(),
            data: VoxelData::I16(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    pub fn voxel_count(&self) -> usize {
        self.dims[0] * self.dims[1] * self.dims[2]
    }

    pub fn origin(&self) -> &Point3<f64> {
        &self.origin
    }

    pub fn spacing(&self) -> &Vector3<f64> {
        &self.spacing
    }

    pub fn direction(&self) -> &Matrix3<f64> {
        &self.direction
    }

    pub fn data(&self) -> &VoxelData {
        &self.data
    }

    pub fn scalar_type(&self) -> ScalarType {
        self.data.scalar_type()
    }

    /// Overwrite image data and geometry from another volume, keeping this
    /// volume's name.
    pub fn assign(&mut self, other: &Volume) {
        self.dims = other.dims;
        self.origin = other.origin;
        self.spacing = other.spacing;
        self.direction = other.direction;
        self.data = other.data.clone();
    }

    /// Recast the voxel buffer to 16-bit signed integers, rounding and
    /// clamping. No-op when the buffer already holds shorts.
    pub fn cast_to_short(&mut self) {
        if self.scalar_type() == ScalarType::Short {
            return;
        }
        let n = self.data.len();
        let mut out = Vec::with_capacity(n);
        for i in 0..n {
            let v = self.data.value(i).round();
            out.push(v.clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16);
        }
        self.data = VoxelData::I16(out);
    }

    /// Copy origin and spacing from another volume. The direction matrix is
    /// left untouched; the engine's resampler never alters it.
    pub fn copy_geometry_from(&mut self, other: &Volume) {
        self.origin = other.origin;
        self.spacing = other.spacing;
    }
}
