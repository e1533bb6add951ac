// src/shape_analysis.rs - Polygon geometry for candidate regions

use imageproc::geometry::{contour_area, convex_hull};
use imageproc::point::Point;
use nalgebra::Vector2;
use serde::Serialize;

/// A rectangle of arbitrary rotation, as produced by [`min_area_rect`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RotatedRect {
    pub center: (f64, f64),
    /// Extent along the rectangle's first edge direction, in pixels
    pub width: f64,
    /// Extent perpendicular to `width`, in pixels
    pub height: f64,
    /// Angle of the first edge direction in degrees, in [0, 180)
    pub angle_deg: f64,
    /// Corners in drawing order
    pub corners: [(f64, f64); 4],
}

impl RotatedRect {
    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    /// Longer side over shorter side; 1.0 when the shorter side is zero
    pub fn aspect_ratio(&self) -> f64 {
        let (long, short) = if self.width >= self.height {
            (self.width, self.height)
        } else {
            (self.height, self.width)
        };
        if short > 0.0 {
            long / short
        } else {
            1.0
        }
    }
}

/// Convex hull of a point set, without repeated points
///
/// Duplicates are removed first; contours of one-pixel-wide strokes revisit
/// points and the Graham scan expects each point once.
pub fn hull_of(points: &[Point<i32>]) -> Vec<Point<i32>> {
    let mut unique: Vec<Point<i32>> = points.to_vec();
    unique.sort_by_key(|p| (p.x, p.y));
    unique.dedup();
    convex_hull(unique)
}

/// Contour area over convex hull area; 0 when the hull has no area
pub fn calculate_solidity(points: &[Point<i32>]) -> f64 {
    let hull_area = contour_area(&hull_of(points));
    if hull_area > 0.0 {
        contour_area(points) / hull_area
    } else {
        0.0
    }
}

/// Minimum-area enclosing rectangle at any rotation (rotating calipers)
///
/// Runs on the integer hull but keeps the rectangle in floating point;
/// `imageproc::geometry::min_area_rect` rounds corners outward to whole
/// pixels, which inflates the sides of rotated rectangles. Returns `None`
/// for an empty point set. One or two distinct points give a rectangle with
/// zero height.
pub fn min_area_rect(points: &[Point<i32>]) -> Option<RotatedRect> {
    let hull: Vec<Vector2<f64>> = hull_of(points)
        .into_iter()
        .map(|p| Vector2::new(p.x as f64, p.y as f64))
        .collect();

    match hull.len() {
        0 => None,
        1 => Some(rect_from_frame(&hull, Vector2::new(1.0, 0.0))),
        _ => {
            let mut best: Option<RotatedRect> = None;
            for i in 0..hull.len() {
                let edge = hull[(i + 1) % hull.len()] - hull[i];
                let length = edge.norm();
                if length == 0.0 {
                    continue;
                }
                let rect = rect_from_frame(&hull, edge / length);
                if best.map_or(true, |b| rect.area() < b.area()) {
                    best = Some(rect);
                }
            }
            best
        }
    }
}

/// Tightest rectangle around `hull` whose first axis is the unit vector `u`
fn rect_from_frame(hull: &[Vector2<f64>], u: Vector2<f64>) -> RotatedRect {
    let v = Vector2::new(-u.y, u.x);

    let (mut min_u, mut max_u) = (f64::INFINITY, f64::NEG_INFINITY);
    let (mut min_v, mut max_v) = (f64::INFINITY, f64::NEG_INFINITY);
    for p in hull {
        let pu = p.dot(&u);
        let pv = p.dot(&v);
        min_u = min_u.min(pu);
        max_u = max_u.max(pu);
        min_v = min_v.min(pv);
        max_v = max_v.max(pv);
    }

    let corner = |a: f64, b: f64| {
        let c = u * a + v * b;
        (c.x, c.y)
    };
    let center = u * ((min_u + max_u) / 2.0) + v * ((min_v + max_v) / 2.0);

    let mut angle_deg = u.y.atan2(u.x).to_degrees();
    if angle_deg < 0.0 {
        angle_deg += 180.0;
    }
    if angle_deg >= 180.0 {
        angle_deg -= 180.0;
    }

    RotatedRect {
        center: (center.x, center.y),
        width: max_u - min_u,
        height: max_v - min_v,
        angle_deg,
        corners: [
            corner(min_u, min_v),
            corner(max_u, min_v),
            corner(max_u, max_v),
            corner(min_u, max_v),
        ],
    }
}

/// Quadrilateral for an axis-aligned box given by its corner coordinates
pub fn box_to_polygon(x1: i32, y1: i32, x2: i32, y2: i32) -> Vec<Point<i32>> {
    vec![
        Point::new(x1, y1),
        Point::new(x2, y1),
        Point::new(x2, y2),
        Point::new(x1, y2),
    ]
}
