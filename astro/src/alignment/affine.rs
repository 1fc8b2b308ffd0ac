//! Least-squares affine mapper over three or more alignment points

use nalgebra::{Matrix2, Vector2};

use super::taki::invert;
use super::{AlignmentPoint, Cartesian, PointingMapper};
use crate::error::{AstroError, AstroResult};

/// 2-D affine transform `u = a x + b y + tx`, `v = c x + d y + ty`
#[derive(Debug, Clone, PartialEq)]
pub struct AffineTransform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub tx: f64,
    pub ty: f64,
    inverse: Matrix2<f64>,
}

impl AffineTransform {
    /// Fit catalog -> mount over all given points
    pub fn fit(points: &[&AlignmentPoint]) -> AstroResult<Self> {
        let catalog: Vec<Cartesian> = points.iter().map(|p| p.target_cartesian).collect();
        let mount: Vec<Cartesian> = points.iter().map(|p| p.aligned_cartesian).collect();
        Self::fit_pairs(&catalog, &mount)
    }

    /// Least-squares fit from matched plane positions.
    ///
    /// Solved on mean-centered data: the linear part is
    /// `S_mc * S_cc^-1` and the translation carries the catalog centroid
    /// onto the mount centroid.
    pub fn fit_pairs(catalog: &[Cartesian], mount: &[Cartesian]) -> AstroResult<Self> {
        let n = catalog.len().min(mount.len());
        if n < 3 {
            return Err(AstroError::NotEnoughPoints {
                needed: 3,
                available: n,
            });
        }

        let to_vec = |c: &Cartesian| Vector2::new(c.x, c.y);
        let catalog_mean = catalog[..n].iter().map(to_vec).sum::<Vector2<f64>>() / n as f64;
        let mount_mean = mount[..n].iter().map(to_vec).sum::<Vector2<f64>>() / n as f64;

        let mut s_cc = Matrix2::<f64>::zeros();
        let mut s_mc = Matrix2::<f64>::zeros();
        for (c, m) in catalog[..n].iter().zip(&mount[..n]) {
            let dc = to_vec(c) - catalog_mean;
            let dm = to_vec(m) - mount_mean;
            s_cc += dc * dc.transpose();
            s_mc += dm * dc.transpose();
        }

        // Scale-free collinearity check before inverting
        let trace = s_cc.trace();
        let det = s_cc.determinant();
        if trace <= 0.0 || det.abs() < 1e-10 * trace * trace {
            return Err(AstroError::SingularMatrix {
                context: "affine normal equations",
                determinant: det,
            });
        }

        let linear = s_mc * invert(&s_cc, "affine normal equations")?;
        let inverse = invert(&linear, "affine transform")?;
        let t = mount_mean - linear * catalog_mean;

        Ok(Self {
            a: linear[(0, 0)],
            b: linear[(0, 1)],
            c: linear[(1, 0)],
            d: linear[(1, 1)],
            tx: t.x,
            ty: t.y,
            inverse,
        })
    }

    pub fn apply(&self, p: Cartesian) -> Cartesian {
        Cartesian::new(
            self.a * p.x + self.b * p.y + self.tx,
            self.c * p.x + self.d * p.y + self.ty,
        )
    }

    pub fn apply_inverse(&self, p: Cartesian) -> Cartesian {
        let v = self.inverse * Vector2::new(p.x - self.tx, p.y - self.ty);
        Cartesian::new(v.x, v.y)
    }
}

impl PointingMapper for AffineTransform {
    fn to_mount(&self, catalog: Cartesian) -> Cartesian {
        self.apply(catalog)
    }

    fn to_sky(&self, mount: Cartesian) -> Cartesian {
        self.apply_inverse(mount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_fit_recovers_parameters() {
        let catalog = [
            Cartesian::new(0.0, 0.0),
            Cartesian::new(10.0, 0.0),
            Cartesian::new(0.0, 10.0),
            Cartesian::new(7.0, -3.0),
        ];
        let truth = |p: &Cartesian| Cartesian::new(1.01 * p.x - 0.02 * p.y + 0.5, 0.03 * p.x + 0.99 * p.y - 1.5);
        let mount: Vec<Cartesian> = catalog.iter().map(truth).collect();

        let t = AffineTransform::fit_pairs(&catalog, &mount).unwrap();
        assert!((t.a - 1.01).abs() < 1e-9);
        assert!((t.b + 0.02).abs() < 1e-9);
        assert!((t.c - 0.03).abs() < 1e-9);
        assert!((t.d - 0.99).abs() < 1e-9);
        assert!((t.tx - 0.5).abs() < 1e-9);
        assert!((t.ty + 1.5).abs() < 1e-9);

        let sample = Cartesian::new(-4.0, 6.5);
        let back = t.to_sky(t.to_mount(sample));
        assert!(back.distance_sq(&sample) < 1e-18);
    }

    #[test]
    fn test_least_squares_averages_noise() {
        // Pure translation with symmetric +/- noise on the x offsets
        let catalog = [
            Cartesian::new(0.0, 0.0),
            Cartesian::new(10.0, 0.0),
            Cartesian::new(0.0, 10.0),
            Cartesian::new(10.0, 10.0),
        ];
        let noise = [0.1, -0.1, -0.1, 0.1];
        let mount: Vec<Cartesian> = catalog
            .iter()
            .zip(noise)
            .map(|(c, e)| Cartesian::new(c.x + 2.0 + e, c.y))
            .collect();

        let t = AffineTransform::fit_pairs(&catalog, &mount).unwrap();
        assert!((t.tx - 2.0).abs() < 1e-9, "tx={}", t.tx);
        assert!((t.a - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_collinear_is_singular() {
        let catalog = [
            Cartesian::new(0.0, 0.0),
            Cartesian::new(100.0, 100.0),
            Cartesian::new(200.0, 200.0),
        ];
        assert!(matches!(
            AffineTransform::fit_pairs(&catalog, &catalog),
            Err(AstroError::SingularMatrix { .. })
        ));
    }

    #[test]
    fn test_needs_three_points() {
        let two = [Cartesian::new(0.0, 0.0), Cartesian::new(1.0, 0.0)];
        assert!(matches!(
            AffineTransform::fit_pairs(&two, &two),
            Err(AstroError::NotEnoughPoints { needed: 3, available: 2 })
        ));
    }
}
