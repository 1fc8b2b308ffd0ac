//! Nearest-point selection and the triangle containment test

use std::cmp::Ordering;

use super::{AlignmentPoint, Cartesian, MeridianSide, PointFilter, PointQuery};
use crate::ranges::DEG_RAD;
use crate::types::AltAzCoordinate;

/// Candidates considered by the triangle search
pub const TRIANGLE_CANDIDATES: usize = 50;

/// Relative tolerance on the sub-triangle area sum
const AREA_TOLERANCE: f64 = 1e-4;

fn triangle_area(a: &Cartesian, b: &Cartesian, c: &Cartesian) -> f64 {
    ((b.x - a.x) * (c.y - a.y) - (c.x - a.x) * (b.y - a.y)).abs() * 0.5
}

/// True when `p` lies inside (or on the edge of) triangle `a b c`.
///
/// The three sub-triangles formed with `p` cover the whole triangle exactly
/// when `p` is inside it. Degenerate triangles contain nothing.
pub fn check_point_in_triangle(p: &Cartesian, a: &Cartesian, b: &Cartesian, c: &Cartesian) -> bool {
    let whole = triangle_area(a, b, c);
    if whole < 1e-9 {
        return false;
    }
    let parts = triangle_area(p, b, c) + triangle_area(a, p, c) + triangle_area(a, b, p);
    (parts - whole).abs() <= AREA_TOLERANCE * whole.max(1.0)
}

// Monotonic in the great-circle separation, cheaper than acos
fn sky_distance(a: &AltAzCoordinate, b: &AltAzCoordinate) -> f64 {
    let (alt1, alt2) = (a.alt * DEG_RAD, b.alt * DEG_RAD);
    let daz = (a.az - b.az) * DEG_RAD;
    1.0 - (alt1.sin() * alt2.sin() + alt1.cos() * alt2.cos() * daz.cos())
}

fn distance(point: &AlignmentPoint, query: &PointQuery) -> f64 {
    if query.local_to_pier {
        point.cartesian(query.plane).distance_sq(&query.cartesian)
    } else {
        sky_distance(&point.altaz, &query.altaz)
    }
}

/// Points allowed to serve the query, in storage order
pub(crate) fn filtered<'a>(points: &'a [AlignmentPoint], query: &PointQuery) -> Vec<&'a AlignmentPoint> {
    let quadrant = query.cartesian.quadrant();
    let side = MeridianSide::of(&query.altaz);

    points
        .iter()
        .filter(|p| !query.local_to_pier || p.pier == query.pier)
        .filter(|p| match query.filter {
            PointFilter::AllPoints => true,
            PointFilter::SameMeridianSide => MeridianSide::of(&p.altaz) == side,
            PointFilter::LocalQuadrant => p.cartesian(query.plane).quadrant() == quadrant,
        })
        .collect()
}

/// Select up to three points for correcting the query position.
///
/// With more than three candidates and the triangle search enabled, the
/// first triangle (in `i < j < k` order over the nearest candidates) that
/// contains the query is returned. Otherwise, or when no triangle contains
/// it, the three nearest points are returned, nearest first.
pub fn nearest_points<'a>(points: &'a [AlignmentPoint], query: &PointQuery) -> Vec<&'a AlignmentPoint> {
    let mut ranked: Vec<(f64, &AlignmentPoint)> = filtered(points, query)
        .into_iter()
        .map(|p| (distance(p, query), p))
        .collect();
    ranked.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));

    if ranked.len() <= 3 {
        return ranked.into_iter().map(|(_, p)| p).collect();
    }

    if query.triangle_search {
        let near: Vec<&AlignmentPoint> = ranked
            .iter()
            .take(TRIANGLE_CANDIDATES)
            .map(|(_, p)| *p)
            .collect();
        let target = query.cartesian;
        let n = near.len();

        for i in 0..n {
            for j in (i + 1)..n {
                for k in (j + 1)..n {
                    let a = near[i].cartesian(query.plane);
                    let b = near[j].cartesian(query.plane);
                    let c = near[k].cartesian(query.plane);
                    if check_point_in_triangle(&target, &a, &b, &c) {
                        return vec![near[i], near[j], near[k]];
                    }
                }
            }
        }
    }

    ranked.into_iter().take(3).map(|(_, p)| p).collect()
}
