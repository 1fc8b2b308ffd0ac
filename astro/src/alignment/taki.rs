//! Exact-fit mapper from two or three alignment points

use nalgebra::{Matrix2, Vector2};

use super::{AlignmentPoint, Cartesian, PointingMapper};
use crate::error::{AstroError, AstroResult};

/// Threshold for considering a determinant as zero
const DETERMINANT_EPSILON: f64 = 1e-10;

pub(crate) fn invert(matrix: &Matrix2<f64>, context: &'static str) -> AstroResult<Matrix2<f64>> {
    let det = matrix.determinant();
    let singular = AstroError::SingularMatrix {
        context,
        determinant: det,
    };
    if det.abs() < DETERMINANT_EPSILON {
        return Err(singular);
    }
    matrix.try_inverse().ok_or(singular)
}

fn vector(c: &Cartesian) -> Vector2<f64> {
    Vector2::new(c.x, c.y)
}

fn cartesian(v: &Vector2<f64>) -> Cartesian {
    Cartesian::new(v.x, v.y)
}

// Third point of a pair: the first baseline turned 90° about the first point
fn perpendicular(a: &Cartesian, b: &Cartesian) -> Cartesian {
    Cartesian::new(a.x - (b.y - a.y), a.y + (b.x - a.x))
}

/// Linear map of the difference vectors of the reference triangle plus a
/// translation:
///
/// ```text
/// mount = T (catalog - c1) + m1,   T = [m2-m1 m3-m1] [c2-c1 c3-c1]^-1
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct TakiTransform {
    matrix: Matrix2<f64>,
    inverse: Matrix2<f64>,
    catalog_origin: Vector2<f64>,
    mount_origin: Vector2<f64>,
}

impl TakiTransform {
    /// Solve from the first two or three selected points. With two points
    /// the result is a similarity transform.
    pub fn from_points(points: &[&AlignmentPoint]) -> AstroResult<Self> {
        let catalog: Vec<Cartesian> = points.iter().map(|p| p.target_cartesian).collect();
        let mount: Vec<Cartesian> = points.iter().map(|p| p.aligned_cartesian).collect();
        Self::from_pairs(&catalog, &mount)
    }

    /// Solve from matched catalog and mount plane positions
    pub fn from_pairs(catalog: &[Cartesian], mount: &[Cartesian]) -> AstroResult<Self> {
        let available = catalog.len().min(mount.len());
        if available < 2 {
            return Err(AstroError::NotEnoughPoints {
                needed: 2,
                available,
            });
        }

        let (c3, m3) = if available >= 3 {
            (catalog[2], mount[2])
        } else {
            (
                perpendicular(&catalog[0], &catalog[1]),
                perpendicular(&mount[0], &mount[1]),
            )
        };

        let c1 = vector(&catalog[0]);
        let m1 = vector(&mount[0]);
        let p = Matrix2::from_columns(&[vector(&catalog[1]) - c1, vector(&c3) - c1]);
        let q = Matrix2::from_columns(&[vector(&mount[1]) - m1, vector(&m3) - m1]);

        let matrix = q * invert(&p, "Taki catalog triangle")?;
        let inverse = invert(&matrix, "Taki transform")?;

        Ok(Self {
            matrix,
            inverse,
            catalog_origin: c1,
            mount_origin: m1,
        })
    }

    pub fn matrix(&self) -> &Matrix2<f64> {
        &self.matrix
    }
}

impl PointingMapper for TakiTransform {
    fn to_mount(&self, catalog: Cartesian) -> Cartesian {
        cartesian(&(self.matrix * (vector(&catalog) - self.catalog_origin) + self.mount_origin))
    }

    fn to_sky(&self, mount: Cartesian) -> Cartesian {
        cartesian(&(self.inverse * (vector(&mount) - self.mount_origin) + self.catalog_origin))
    }
}
