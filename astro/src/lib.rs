//! Coordinate, time and pointing-model math for a German equatorial mount
//!
//! Everything in this crate is pure and deterministic. Time enters only as an
//! explicit UTC instant or a local sidereal time, so callers can replay a goto
//! plan against a fixed clock.
//!
//! ## Contents
//!
//! - Range normalization (`range24`, `range360`, `range_ha`, ...)
//! - Julian day and apparent local sidereal time
//! - Axis position <-> hour angle / declination conversions, hemisphere and
//!   pier-side aware
//! - Alt/Az <-> HA/Dec spherical-triangle solver
//! - Alignment point store, nearest-point selection, Taki and affine mappers

pub mod alignment;
mod axis;
mod error;
mod ranges;
mod sphere;
mod time;
mod types;

pub use alignment::{
    check_point_in_triangle, nearest_points, AffineTransform, AlignmentModel, AlignmentPoint,
    Cartesian, MapperKind, MappingOptions, MeridianSide, Plane, PointFilter, PointQuery,
    PointingMapper, Quadrant, TakiTransform,
};
pub use axis::*;
pub use error::{AstroError, AstroResult};
pub use ranges::*;
pub use sphere::*;
pub use time::*;
pub use types::*;
