//! Alignment (pointing) model
//!
//! Calibration points pair a catalog target with the axis position the mount
//! actually had to reach to center it. Points are projected onto a polar
//! "cartesian" plane around the pole: the angle comes from the RA axis hour
//! value and the radius is the distance from the visible pole in degrees.
//! The quadrant filter, the triangle containment test and both mappers work
//! in that plane.

mod affine;
mod selection;
mod taki;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::axis::{
    axis_degrees, axis_hours, axis_position_from_hours, axis_to_equatorial,
    dec_axis_position_from_dec, dec_from_axis_degrees, equatorial_to_axis,
};
use crate::error::{AstroError, AstroResult};
use crate::ranges::{range24, HRS_RAD, RAD_HRS};
use crate::sphere::equatorial_to_altaz;
use crate::types::{
    AltAzCoordinate, AxisFrame, AxisPosition, EquatorialCoordinate, Hemisphere, PierSide,
    SiteLocation,
};

pub use affine::AffineTransform;
pub use selection::{check_point_in_triangle, nearest_points};
pub use taki::TakiTransform;

/// Default upper bound on stored points
pub const DEFAULT_MAX_POINTS: usize = 100;

/// A new point closer than this (cartesian degrees) to an existing point on
/// the same pier replaces it
pub const REPLACE_RADIUS: f64 = 2.0;

// ============================================================================
// Cartesian plane
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Cartesian {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Quadrant {
    First,
    Second,
    Third,
    Fourth,
}

impl Cartesian {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Project an axis position onto the polar plane
    pub fn from_axis(frame: &AxisFrame, position: &AxisPosition) -> Self {
        let theta = axis_hours(frame.zero.ra, position.ra, frame.hemisphere) * HRS_RAD;
        let (dec, _) = dec_from_axis_degrees(axis_degrees(
            frame.zero.dec,
            position.dec,
            frame.hemisphere,
        ));
        let r = match frame.hemisphere {
            Hemisphere::North => 90.0 - dec,
            Hemisphere::South => 90.0 + dec,
        };
        Self::new(r * theta.cos(), r * theta.sin())
    }

    /// Axis position for a point on the plane, reached on the given pier
    pub fn to_axis(&self, frame: &AxisFrame, pier: PierSide) -> AxisPosition {
        let hours = range24(self.y.atan2(self.x) * RAD_HRS);
        let r = self.x.hypot(self.y);
        let dec = match frame.hemisphere {
            Hemisphere::North => 90.0 - r,
            Hemisphere::South => r - 90.0,
        };
        AxisPosition {
            ra: axis_position_from_hours(frame.zero.ra, hours, frame.hemisphere),
            dec: dec_axis_position_from_dec(dec, pier, frame.zero.dec, frame.hemisphere),
        }
    }

    pub fn distance_sq(&self, other: &Cartesian) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    pub fn quadrant(&self) -> Quadrant {
        match (self.x >= 0.0, self.y >= 0.0) {
            (true, true) => Quadrant::First,
            (false, true) => Quadrant::Second,
            (false, false) => Quadrant::Third,
            (true, false) => Quadrant::Fourth,
        }
    }
}

// ============================================================================
// Points and queries
// ============================================================================

/// Side of the meridian a horizontal position is on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MeridianSide {
    East,
    West,
}

impl MeridianSide {
    pub fn of(altaz: &AltAzCoordinate) -> Self {
        if altaz.az < 180.0 {
            MeridianSide::East
        } else {
            MeridianSide::West
        }
    }
}

/// Restricts which stored points may serve a query
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PointFilter {
    #[default]
    AllPoints,
    SameMeridianSide,
    LocalQuadrant,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MapperKind {
    #[default]
    Taki,
    Affine,
}

/// Which half of each point a query is matched against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plane {
    /// Catalog targets (catalog -> mount direction)
    Catalog,
    /// Aligned positions (mount -> catalog direction)
    Mount,
}

/// How the model selects points and which mapper it builds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingOptions {
    pub mapper: MapperKind,
    pub filter: PointFilter,
    /// Only use points taken on the query's pier side, ranked by cartesian
    /// distance instead of sky distance
    pub local_to_pier: bool,
    /// Search the nearest points for a triangle containing the target
    pub triangle_search: bool,
}

impl Default for MappingOptions {
    fn default() -> Self {
        Self {
            mapper: MapperKind::Taki,
            filter: PointFilter::AllPoints,
            local_to_pier: false,
            triangle_search: true,
        }
    }
}

/// One calibration sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentPoint {
    pub target: EquatorialCoordinate,
    pub target_axis: AxisPosition,
    pub aligned_axis: AxisPosition,
    pub target_cartesian: Cartesian,
    pub aligned_cartesian: Cartesian,
    pub altaz: AltAzCoordinate,
    pub pier: PierSide,
    /// Local sidereal time of the observation, hours
    pub lst: f64,
    pub timestamp: DateTime<Utc>,
}

impl AlignmentPoint {
    /// Build a point from a synced target and the axis position that
    /// centered it. The catalog axis position is computed on the pier the
    /// mount was actually on.
    pub fn new(
        frame: &AxisFrame,
        site: &SiteLocation,
        target: EquatorialCoordinate,
        aligned_axis: AxisPosition,
        lst: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let (_, pier) = axis_to_equatorial(frame, &aligned_axis, lst);
        let target_axis = equatorial_to_axis(frame, &target, lst, pier);
        Self {
            target,
            target_axis,
            aligned_axis,
            target_cartesian: Cartesian::from_axis(frame, &target_axis),
            aligned_cartesian: Cartesian::from_axis(frame, &aligned_axis),
            altaz: equatorial_to_altaz(site, &target, lst),
            pier,
            lst,
            timestamp,
        }
    }

    /// Constant axis offset this point alone implies
    pub fn offset(&self) -> AxisPosition {
        self.aligned_axis - self.target_axis
    }

    pub(crate) fn cartesian(&self, plane: Plane) -> Cartesian {
        match plane {
            Plane::Catalog => self.target_cartesian,
            Plane::Mount => self.aligned_cartesian,
        }
    }
}

/// A position to correct, with everything point selection needs
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointQuery {
    pub cartesian: Cartesian,
    pub altaz: AltAzCoordinate,
    pub pier: PierSide,
    pub plane: Plane,
    pub filter: PointFilter,
    pub local_to_pier: bool,
    pub triangle_search: bool,
}

impl PointQuery {
    pub fn new(
        cartesian: Cartesian,
        altaz: AltAzCoordinate,
        pier: PierSide,
        plane: Plane,
        options: &MappingOptions,
    ) -> Self {
        Self {
            cartesian,
            altaz,
            pier,
            plane,
            filter: options.filter,
            local_to_pier: options.local_to_pier,
            triangle_search: options.triangle_search,
        }
    }
}

/// A solved correction between the catalog and mount planes
pub trait PointingMapper {
    /// Catalog plane -> mount plane
    fn to_mount(&self, catalog: Cartesian) -> Cartesian;

    /// Mount plane -> catalog plane
    fn to_sky(&self, mount: Cartesian) -> Cartesian;
}

// ============================================================================
// Model
// ============================================================================

/// The stored calibration points and the mapping built from them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentModel {
    points: Vec<AlignmentPoint>,
    max_points: usize,
}

impl Default for AlignmentModel {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_POINTS)
    }
}

impl AlignmentModel {
    pub fn new(max_points: usize) -> Self {
        Self {
            points: Vec::new(),
            max_points: max_points.max(1),
        }
    }

    pub fn points(&self) -> &[AlignmentPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Add a point, replacing a close neighbour on the same pier.
    /// Returns the index the point was stored at.
    pub fn add(&mut self, point: AlignmentPoint) -> AstroResult<usize> {
        let radius_sq = REPLACE_RADIUS * REPLACE_RADIUS;
        let existing = self.points.iter().position(|p| {
            p.pier == point.pier && p.target_cartesian.distance_sq(&point.target_cartesian) < radius_sq
        });

        if let Some(index) = existing {
            debug!("Replacing alignment point {} with {}", index, point.target);
            self.points[index] = point;
            return Ok(index);
        }

        if self.points.len() >= self.max_points {
            return Err(AstroError::ModelFull {
                max: self.max_points,
            });
        }

        debug!("Adding alignment point {} ({} stored)", point.target, self.points.len() + 1);
        self.points.push(point);
        Ok(self.points.len() - 1)
    }

    pub fn remove(&mut self, index: usize) -> AstroResult<AlignmentPoint> {
        if index >= self.points.len() {
            return Err(AstroError::NoSuchPoint(index));
        }
        Ok(self.points.remove(index))
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }

    /// Up to three points best suited to correct the query position
    pub fn nearest_points(&self, query: &PointQuery) -> Vec<&AlignmentPoint> {
        nearest_points(&self.points, query)
    }

    /// Correct a raw catalog axis position into the position the mount must
    /// reach. With no points the position is returned unchanged.
    pub fn catalog_to_mount(
        &self,
        frame: &AxisFrame,
        target_axis: AxisPosition,
        pier: PierSide,
        altaz: AltAzCoordinate,
        options: &MappingOptions,
    ) -> AxisPosition {
        self.correct(frame, target_axis, pier, altaz, options, Plane::Catalog)
    }

    /// Map an observed mount axis position back to the catalog axis position
    /// it corresponds to
    pub fn mount_to_catalog(
        &self,
        frame: &AxisFrame,
        mount_axis: AxisPosition,
        pier: PierSide,
        altaz: AltAzCoordinate,
        options: &MappingOptions,
    ) -> AxisPosition {
        self.correct(frame, mount_axis, pier, altaz, options, Plane::Mount)
    }

    fn correct(
        &self,
        frame: &AxisFrame,
        position: AxisPosition,
        pier: PierSide,
        altaz: AltAzCoordinate,
        options: &MappingOptions,
        plane: Plane,
    ) -> AxisPosition {
        if self.points.is_empty() {
            return position;
        }

        let cartesian = Cartesian::from_axis(frame, &position);
        let query = PointQuery::new(cartesian, altaz, pier, plane, options);
        let selected = self.nearest_points(&query);

        let Some(nearest) = selected.first() else {
            return position;
        };

        if selected.len() >= 2 {
            match self.build_mapper(&selected, &query, options) {
                Ok(mapper) => {
                    let mapped = match plane {
                        Plane::Catalog => mapper.to_mount(cartesian),
                        Plane::Mount => mapper.to_sky(cartesian),
                    };
                    return mapped.to_axis(frame, pier);
                }
                Err(e) => debug!("Alignment mapper unavailable, using one-star offset: {}", e),
            }
        }

        match plane {
            Plane::Catalog => position + nearest.offset(),
            Plane::Mount => position - nearest.offset(),
        }
    }

    fn build_mapper(
        &self,
        selected: &[&AlignmentPoint],
        query: &PointQuery,
        options: &MappingOptions,
    ) -> AstroResult<Box<dyn PointingMapper>> {
        if options.mapper == MapperKind::Affine {
            let candidates = selection::filtered(&self.points, query);
            if candidates.len() >= 3 {
                return Ok(Box::new(AffineTransform::fit(&candidates)?));
            }
        }
        Ok(Box::new(TakiTransform::from_points(selected)?))
    }
}
