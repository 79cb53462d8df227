//! Sectors: spatial regions used to select grid points
//!
//! Sectors answer one question, whether a point lies inside. Grids use them to
//! compute index subsets (see [`crate::grid::Grid::subdomain`]) for map
//! integration and region-of-interest queries.
//!
//! Planar sectors (`Rect`, `Circle`, `Polygon`) ignore the z coordinate;
//! `Box` is fully three dimensional.
//!
//! ## Example
//!
//! ```rust
//! use sonomap_core::geometry::Point3;
//! use sonomap_core::sector::{Sector, SectorShape};
//!
//! let circle = Sector::new(SectorShape::Circle { x: 0.0, y: 0.0, r: 0.1 });
//! assert!(circle.contains(&Point3::new(0.05, 0.0, 1.0)));
//! assert!(!circle.contains(&Point3::new(0.2, 0.0, 1.0)));
//! ```

use serde::{Deserialize, Serialize};

use crate::geometry::Point3;

/// Geometric shape of a sector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SectorShape {
    /// Axis-aligned rectangle in the x/y plane
    Rect {
        x_min: f64,
        x_max: f64,
        y_min: f64,
        y_max: f64,
    },
    /// Circle in the x/y plane
    Circle { x: f64, y: f64, r: f64 },
    /// Closed polygon in the x/y plane, given by its vertices
    Polygon { vertices: Vec<(f64, f64)> },
    /// Axis-aligned box
    Box { min: Point3, max: Point3 },
}

/// A single sector with border handling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sector {
    pub shape: SectorShape,
    /// Points on the border count as inside
    pub include_border: bool,
    /// Tolerance for the border test
    pub abs_tol: f64,
    /// Return the point nearest to the center when no point is inside
    pub default_nearest: bool,
}

impl Sector {
    pub fn new(shape: SectorShape) -> Self {
        Self {
            shape,
            include_border: true,
            abs_tol: 1e-12,
            default_nearest: true,
        }
    }

    pub fn include_border(mut self, include: bool) -> Self {
        self.include_border = include;
        self
    }

    pub fn default_nearest(mut self, nearest: bool) -> Self {
        self.default_nearest = nearest;
        self
    }

    pub fn contains(&self, p: &Point3) -> bool {
        let tol = if self.include_border {
            self.abs_tol
        } else {
            -self.abs_tol
        };
        match &self.shape {
            SectorShape::Rect {
                x_min,
                x_max,
                y_min,
                y_max,
            } => {
                p.x >= x_min - tol && p.x <= x_max + tol && p.y >= y_min - tol && p.y <= y_max + tol
            }
            SectorShape::Circle { x, y, r } => {
                let d = ((p.x - x).powi(2) + (p.y - y).powi(2)).sqrt();
                d <= r + tol
            }
            SectorShape::Polygon { vertices } => {
                let dist = edge_distance(vertices, p.x, p.y);
                if dist <= self.abs_tol {
                    return self.include_border;
                }
                point_in_polygon(vertices, p.x, p.y)
            }
            SectorShape::Box { min, max } => {
                p.x >= min.x - tol
                    && p.x <= max.x + tol
                    && p.y >= min.y - tol
                    && p.y <= max.y + tol
                    && p.z >= min.z - tol
                    && p.z <= max.z + tol
            }
        }
    }

    /// Reference point for the nearest-point fallback
    pub fn center(&self) -> Option<Point3> {
        if !self.default_nearest {
            return None;
        }
        match &self.shape {
            SectorShape::Rect {
                x_min,
                x_max,
                y_min,
                y_max,
            } => Some(Point3::new((x_min + x_max) / 2.0, (y_min + y_max) / 2.0, 0.0)),
            SectorShape::Circle { x, y, .. } => Some(Point3::new(*x, *y, 0.0)),
            SectorShape::Polygon { vertices } if !vertices.is_empty() => {
                let n = vertices.len() as f64;
                let (sx, sy) = vertices
                    .iter()
                    .fold((0.0, 0.0), |(ax, ay), (x, y)| (ax + x, ay + y));
                Some(Point3::new(sx / n, sy / n, 0.0))
            }
            SectorShape::Polygon { .. } => None,
            SectorShape::Box { min, max } => Some((*min + *max) * 0.5),
        }
    }

    /// True when the fallback distance ignores z.
    pub(crate) fn is_planar(&self) -> bool {
        !matches!(self.shape, SectorShape::Box { .. })
    }
}

/// How member sectors of a [`MultiSector`] combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Combine {
    /// Inside any member
    #[default]
    Union,
    /// Inside every member
    Intersection,
}

/// Combination of several sectors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiSector {
    pub sectors: Vec<Sector>,
    pub combine: Combine,
}

impl MultiSector {
    pub fn union(sectors: Vec<Sector>) -> Self {
        Self {
            sectors,
            combine: Combine::Union,
        }
    }

    pub fn intersection(sectors: Vec<Sector>) -> Self {
        Self {
            sectors,
            combine: Combine::Intersection,
        }
    }

    pub fn contains(&self, p: &Point3) -> bool {
        match self.combine {
            Combine::Union => self.sectors.iter().any(|s| s.contains(p)),
            Combine::Intersection => {
                !self.sectors.is_empty() && self.sectors.iter().all(|s| s.contains(p))
            }
        }
    }
}

/// Region accepted by [`crate::grid::Grid::subdomain`]
pub trait Region {
    fn contains(&self, p: &Point3) -> bool;
    /// Fallback reference used when no grid point is inside.
    fn fallback(&self) -> Option<(Point3, bool)> {
        None
    }
}

impl Region for Sector {
    fn contains(&self, p: &Point3) -> bool {
        Sector::contains(self, p)
    }

    fn fallback(&self) -> Option<(Point3, bool)> {
        self.center().map(|c| (c, self.is_planar()))
    }
}

impl Region for MultiSector {
    fn contains(&self, p: &Point3) -> bool {
        MultiSector::contains(self, p)
    }
}

/// Ray casting, even-odd rule
fn point_in_polygon(vertices: &[(f64, f64)], x: f64, y: f64) -> bool {
    let n = vertices.len();
    if n < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (xi, yi) = vertices[i];
        let (xj, yj) = vertices[j];
        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Smallest distance from (x, y) to any polygon edge
fn edge_distance(vertices: &[(f64, f64)], x: f64, y: f64) -> f64 {
    let n = vertices.len();
    let mut best = f64::INFINITY;
    for i in 0..n {
        let (ax, ay) = vertices[i];
        let (bx, by) = vertices[(i + 1) % n];
        let (dx, dy) = (bx - ax, by - ay);
        let len2 = dx * dx + dy * dy;
        let t = if len2 > 0.0 {
            (((x - ax) * dx + (y - ay) * dy) / len2).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let (px, py) = (ax + t * dx, ay + t * dy);
        best = best.min(((x - px).powi(2) + (y - py).powi(2)).sqrt());
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(x: f64, y: f64) -> Point3 {
        Point3::new(x, y, 0.0)
    }

    #[test]
    fn test_rect_border() {
        let s = Sector::new(SectorShape::Rect {
            x_min: 0.0,
            x_max: 1.0,
            y_min: 0.0,
            y_max: 1.0,
        });
        assert!(s.contains(&p(0.5, 0.5)));
        assert!(s.contains(&p(1.0, 0.5)));
        assert!(!s.clone().include_border(false).contains(&p(1.0, 0.5)));
        assert!(!s.contains(&p(1.1, 0.5)));
    }

    #[test]
    fn test_circle() {
        let s = Sector::new(SectorShape::Circle { x: 1.0, y: 1.0, r: 0.5 });
        assert!(s.contains(&p(1.2, 1.2)));
        assert!(s.contains(&p(1.5, 1.0)));
        assert!(!s.contains(&p(1.6, 1.0)));
        assert_eq!(s.center(), Some(p(1.0, 1.0)));
    }

    #[test]
    fn test_polygon_triangle() {
        let s = Sector::new(SectorShape::Polygon {
            vertices: vec![(0.0, 0.0), (2.0, 0.0), (0.0, 2.0)],
        });
        assert!(s.contains(&p(0.5, 0.5)));
        assert!(s.contains(&p(1.0, 1.0)), "hypotenuse is border");
        assert!(!s.contains(&p(1.5, 1.5)));
        assert!(!s.include_border(false).contains(&p(1.0, 0.0)));
    }

    #[test]
    fn test_box() {
        let s = Sector::new(SectorShape::Box {
            min: Point3::new(-1.0, -1.0, 0.5),
            max: Point3::new(1.0, 1.0, 1.5),
        });
        assert!(s.contains(&Point3::new(0.0, 0.0, 1.0)));
        assert!(!s.contains(&Point3::new(0.0, 0.0, 2.0)));
        assert!(!s.is_planar());
    }

    #[test]
    fn test_multi_sector() {
        let a = Sector::new(SectorShape::Circle { x: 0.0, y: 0.0, r: 1.0 });
        let b = Sector::new(SectorShape::Circle { x: 1.0, y: 0.0, r: 1.0 });
        let union = MultiSector::union(vec![a.clone(), b.clone()]);
        let inter = MultiSector::intersection(vec![a, b]);
        assert!(union.contains(&p(-0.9, 0.0)));
        assert!(!inter.contains(&p(-0.9, 0.0)));
        assert!(inter.contains(&p(0.5, 0.0)));
        assert!(!MultiSector::intersection(vec![]).contains(&p(0.0, 0.0)));
    }
}
