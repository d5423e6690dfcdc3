//! Closed contour types and cleanup.

use strata_math::{classify_corner, Corner, Point2};

/// A 2D polygon (closed path).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Polygon {
    /// Vertices of the polygon in order.
    pub points: Vec<Point2>,
}

impl Polygon {
    /// Create a new polygon from points.
    pub fn new(points: Vec<Point2>) -> Self {
        Self { points }
    }

    /// Check if the polygon is empty.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Number of vertices.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Signed area of the polygon.
    /// Positive for counter-clockwise, negative for clockwise.
    pub fn signed_area(&self) -> f64 {
        let n = self.points.len();
        if n < 3 {
            return 0.0;
        }
        let mut area = 0.0;
        for i in 0..n {
            let j = (i + 1) % n;
            area += self.points[i].x * self.points[j].y;
            area -= self.points[j].x * self.points[i].y;
        }
        area / 2.0
    }

    /// Is the polygon counter-clockwise?
    pub fn is_ccw(&self) -> bool {
        self.signed_area() > 0.0
    }

    /// Perimeter length.
    pub fn perimeter(&self) -> f64 {
        let n = self.points.len();
        if n < 2 {
            return 0.0;
        }
        let mut length = 0.0;
        for i in 0..n {
            let j = (i + 1) % n;
            length += (self.points[j] - self.points[i]).norm();
        }
        length
    }

    /// Offset the contour into (positive) or away from (negative) the material.
    ///
    /// Material lies left of every edge: outer contours are CCW, holes CW. A
    /// positive distance therefore shrinks outer contours and grows holes.
    pub fn offset(&self, distance: f64) -> Option<Self> {
        if self.points.len() < 3 {
            return None;
        }

        let n = self.points.len();
        let mut offset_points = Vec::with_capacity(n);

        for i in 0..n {
            let prev = (i + n - 1) % n;
            let next = (i + 1) % n;

            let p0 = self.points[prev];
            let p1 = self.points[i];
            let p2 = self.points[next];

            let e1 = (p1 - p0).normalize();
            let e2 = (p2 - p1).normalize();

            let n1 = Point2::new(-e1.y, e1.x);
            let n2 = Point2::new(-e2.y, e2.x);

            let bisector = (n1.coords + n2.coords).normalize();

            // Stretch along the bisector so both adjacent edges move by `distance`
            let dot = n1.coords.dot(&bisector);
            let offset_dist = if dot.abs() > 0.001 {
                distance / dot
            } else {
                distance
            };

            // Limit offset to avoid self-intersection at sharp corners
            let max_offset = distance.abs() * 2.0;
            let clamped_offset = offset_dist.clamp(-max_offset, max_offset);

            offset_points.push(Point2::new(
                p1.x + bisector.x * clamped_offset,
                p1.y + bisector.y * clamped_offset,
            ));
        }

        // An inset wider than the contour turns most edges around
        let reversed = (0..n)
            .filter(|&i| {
                let j = (i + 1) % n;
                let original = self.points[j] - self.points[i];
                let moved = offset_points[j] - offset_points[i];
                original.dot(&moved) <= 0.0
            })
            .count();

        let result = Polygon::new(offset_points);
        if result.signed_area().abs() < 1e-10
            || result.is_ccw() != self.is_ccw()
            || reversed * 2 > n
        {
            return None;
        }

        Some(result)
    }

    /// Remove vertices that lie closer than `min_segment` to their predecessor
    /// or deviate less than `max_deviation` from the line through their neighbours.
    ///
    /// A polygon left with fewer than three vertices is cleared.
    pub fn simplify(&mut self, min_segment: f64, max_deviation: f64) {
        let n = self.points.len();
        if n < 3 {
            self.points.clear();
            return;
        }

        let mut kept: Vec<Point2> = Vec::with_capacity(n);
        for i in 0..n {
            let p = self.points[i];
            let next = self.points[(i + 1) % n];
            let prev = kept.last().copied().unwrap_or(self.points[n - 1]);

            if (p - prev).norm() < min_segment {
                continue;
            }
            if distance_to_line(&p, &prev, &next) < max_deviation {
                continue;
            }
            kept.push(p);
        }

        if kept.len() < 3 {
            kept.clear();
        }
        self.points = kept;
    }

    /// Remove duplicate vertices and spikes where the contour doubles back on itself.
    pub fn remove_degenerate_verts(&mut self) {
        loop {
            let n = self.points.len();
            if n < 3 {
                self.points.clear();
                return;
            }
            let degenerate = (0..n).find(|&i| {
                let prev = self.points[(i + n - 1) % n];
                let p = self.points[i];
                let next = self.points[(i + 1) % n];
                let a = p - prev;
                let b = next - p;
                if a.norm() < 1e-9 {
                    return true;
                }
                let cross = a.x * b.y - a.y * b.x;
                cross.abs() < 1e-9 * a.norm() * b.norm().max(1.0) && a.dot(&b) < 0.0
            });
            match degenerate {
                Some(i) => {
                    self.points.remove(i);
                }
                None => return,
            }
        }
    }

    /// Rotate the vertex order so that the contour starts at `start`.
    pub fn rotate_start(&mut self, start: usize) {
        if start < self.points.len() {
            self.points.rotate_left(start);
        }
    }

    /// Index of the first vertex at which the contour turns through an obtuse corner.
    ///
    /// The corner at vertex 0 is checked first, then vertices in order.
    pub fn first_obtuse_corner(&self) -> Option<usize> {
        let n = self.points.len();
        if n < 3 {
            return None;
        }
        (0..n).find(|&i| {
            let prev = self.points[(i + n - 1) % n];
            let next = self.points[(i + 1) % n];
            classify_corner(&prev, &self.points[i], &next) == Corner::Obtuse
        })
    }
}

/// Perpendicular distance from `p` to the line through `a` and `b`.
fn distance_to_line(p: &Point2, a: &Point2, b: &Point2) -> f64 {
    let ab = b - a;
    let len = ab.norm();
    if len < 1e-12 {
        return (p - a).norm();
    }
    let ap = p - a;
    (ab.x * ap.y - ab.y * ap.x).abs() / len
}
