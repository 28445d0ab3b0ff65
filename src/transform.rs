//! Spatial transform entity: rigid/affine matrix or dense displacement
//! field, directed from one volume's space to another's.

use nalgebra::{Matrix3, Matrix4, Point3, Vector3};

use crate::error::{Error, Result};

/// Dense per-voxel displacement field on its own sampling grid.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplacementField {
    pub dims: [usize; 3],
    pub origin: Point3<f64>,
    pub spacing: Vector3<f64>,
    pub direction: Matrix3<f64>,
    pub vectors: Vec<Vector3<f64>>,
}

impl DisplacementField {
    pub fn voxel_count(&self) -> usize {
        self.dims[0] * self.dims[1] * self.dims[2]
    }
}

/// Spatial mapping between two volume spaces.
///
/// A displacement field carries an `inverted` flag instead of being
/// numerically inverted: flipping the flag flips which space is source and
/// which is target, the way a transform node can be read to-parent or
/// from-parent.
#[derive(Debug, Clone, PartialEq)]
pub enum Transform {
    Linear(Matrix4<f64>),
    Displacement {
        field: DisplacementField,
        inverted: bool,
    },
}

impl Transform {
    pub fn identity() -> Self {
        Transform::Linear(Matrix4::identity())
    }

    pub fn from_displacement_field(field: DisplacementField) -> Self {
        Transform::Displacement {
            field,
            inverted: false,
        }
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, Transform::Linear(m) if *m == Matrix4::identity())
    }

    /// Flip the transform direction in place.
    pub fn invert(&mut self) -> Result<()> {
        match self {
            Transform::Linear(m) => {
                *m = m.try_inverse().ok_or(Error::SingularTransform)?;
            }
            Transform::Displacement { inverted, .. } => {
                *inverted = !*inverted;
            }
        }
        Ok(())
    }

    pub fn inverted(&self) -> Result<Transform> {
        let mut out = self.clone();
        out.invert()?;
        Ok(out)
    }
}
