//! Focus grids
//!
//! A grid is an ordered, finite set of focus points. Every map produced by a
//! beamformer has one value per grid point in exactly this order.
//!
//! | Grid          | Points                                         |
//! |---------------|------------------------------------------------|
//! | `RectGrid`    | plane z = const, x-major then y                |
//! | `RectGrid3D`  | box, x-major then y then z                     |
//! | `ImportGrid`  | explicit point list                            |
//! | `MergeGrid`   | concatenation of other grids, order preserved  |
//!
//! ## Example
//!
//! ```rust
//! use sonomap_core::grid::{Grid, RectGrid};
//!
//! let grid = RectGrid::new(-0.2, 0.2, -0.2, 0.2, 1.0, 0.1).unwrap();
//! assert_eq!(grid.shape(), vec![5, 5]);
//! assert_eq!(grid.size(), 25);
//! let (ix, iy) = grid.index(0.0, 0.1).unwrap();
//! assert_eq!((ix, iy), (2, 3));
//! ```

use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;

use crate::cache::ContentHasher;
use crate::geometry::Point3;
use crate::sector::Region;
use crate::types::{BeamError, BeamResult};

/// Ordered set of focus points
pub trait Grid: Debug + Send + Sync {
    /// Focus points in stable order.
    fn points(&self) -> Vec<Point3>;

    /// Number of focus points.
    fn size(&self) -> usize;

    /// Shape for reshaping a flat map; `[size]` for unstructured grids.
    fn shape(&self) -> Vec<usize> {
        vec![self.size()]
    }

    /// Content digest, part of every downstream fingerprint.
    fn digest(&self) -> String;

    /// Indices of the points inside a region.
    ///
    /// When no point is inside and the region provides a fallback reference,
    /// the single point nearest to that reference is returned.
    fn subdomain(&self, region: &dyn Region) -> Vec<usize> {
        let points = self.points();
        let inside: Vec<usize> = points
            .iter()
            .enumerate()
            .filter(|(_, p)| region.contains(p))
            .map(|(i, _)| i)
            .collect();
        if !inside.is_empty() {
            return inside;
        }
        match region.fallback() {
            Some((center, planar)) => nearest_index(&points, &center, planar)
                .into_iter()
                .collect(),
            None => Vec::new(),
        }
    }
}

fn nearest_index(points: &[Point3], target: &Point3, planar: bool) -> Option<usize> {
    points
        .iter()
        .map(|p| {
            let mut d = *p - *target;
            if planar {
                d.z = 0.0;
            }
            d.norm()
        })
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(i, _)| i)
}

/// Number of grid steps between two limits, matching the increment as
/// closely as possible.
fn steps(min: f64, max: f64, increment: f64) -> usize {
    (((max - min).abs() + increment) / increment).round().max(1.0) as usize
}

fn axis(min: f64, max: f64, n: usize) -> Vec<f64> {
    if n == 1 {
        return vec![min];
    }
    (0..n)
        .map(|i| min + (max - min) * i as f64 / (n - 1) as f64)
        .collect()
}

fn check_limits(name: &str, min: f64, max: f64) -> BeamResult<()> {
    if !(min.is_finite() && max.is_finite()) || min > max {
        return Err(BeamError::config(format!(
            "{} limits must be finite with min <= max, got [{}, {}]",
            name, min, max
        )));
    }
    Ok(())
}

fn check_increment(increment: f64) -> BeamResult<()> {
    if !(increment.is_finite() && increment > 0.0) {
        return Err(BeamError::config(format!(
            "grid increment must be positive, got {}",
            increment
        )));
    }
    Ok(())
}

/// Axis index of a coordinate, rounding to the nearest step.
fn axis_index(name: &str, v: f64, min: f64, max: f64, n: usize) -> BeamResult<usize> {
    if v < min - 1e-12 || v > max + 1e-12 {
        return Err(BeamError::config(format!(
            "{} = {} is outside the grid range [{}, {}]",
            name, v, min, max
        )));
    }
    if n == 1 {
        return Ok(0);
    }
    let step = (max - min) / (n - 1) as f64;
    Ok((((v - min) / step) + 0.5).floor().min((n - 1) as f64) as usize)
}

/// Regular rectangular grid in a plane of constant z
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RectGrid {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
    pub z: f64,
    pub increment: f64,
}

impl RectGrid {
    pub fn new(
        x_min: f64,
        x_max: f64,
        y_min: f64,
        y_max: f64,
        z: f64,
        increment: f64,
    ) -> BeamResult<Self> {
        check_limits("x", x_min, x_max)?;
        check_limits("y", y_min, y_max)?;
        check_increment(increment)?;
        if !z.is_finite() {
            return Err(BeamError::config("grid z must be finite"));
        }
        Ok(Self {
            x_min,
            x_max,
            y_min,
            y_max,
            z,
            increment,
        })
    }

    pub fn nx(&self) -> usize {
        steps(self.x_min, self.x_max, self.increment)
    }

    pub fn ny(&self) -> usize {
        steps(self.y_min, self.y_max, self.increment)
    }

    /// Grid indices `(ix, iy)` of the point nearest to `(x, y)`.
    pub fn index(&self, x: f64, y: f64) -> BeamResult<(usize, usize)> {
        Ok((
            axis_index("x", x, self.x_min, self.x_max, self.nx())?,
            axis_index("y", y, self.y_min, self.y_max, self.ny())?,
        ))
    }

    /// Flat index of the point nearest to `(x, y)`.
    pub fn flat_index(&self, x: f64, y: f64) -> BeamResult<usize> {
        let (ix, iy) = self.index(x, y)?;
        Ok(ix * self.ny() + iy)
    }

    /// Map extent `(x_min, x_max, y_min, y_max)` including half a cell border.
    pub fn extent(&self) -> (f64, f64, f64, f64) {
        let h = self.increment / 2.0;
        (self.x_min - h, self.x_max + h, self.y_min - h, self.y_max + h)
    }
}

impl Grid for RectGrid {
    fn points(&self) -> Vec<Point3> {
        let xs = axis(self.x_min, self.x_max, self.nx());
        let ys = axis(self.y_min, self.y_max, self.ny());
        let mut out = Vec::with_capacity(xs.len() * ys.len());
        for &x in &xs {
            for &y in &ys {
                out.push(Point3::new(x, y, self.z));
            }
        }
        out
    }

    fn size(&self) -> usize {
        self.nx() * self.ny()
    }

    fn shape(&self) -> Vec<usize> {
        vec![self.nx(), self.ny()]
    }

    fn digest(&self) -> String {
        ContentHasher::new("RectGrid")
            .field("x", &[self.x_min, self.x_max])
            .field("y", &[self.y_min, self.y_max])
            .field("z", &self.z)
            .field("increment", &self.increment)
            .finish()
    }
}

/// Grid spacing of a [`RectGrid3D`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Increment {
    Uniform(f64),
    PerAxis([f64; 3]),
}

impl Increment {
    fn per_axis(&self) -> [f64; 3] {
        match *self {
            Increment::Uniform(v) => [v, v, v],
            Increment::PerAxis(v) => v,
        }
    }
}

/// Regular three-dimensional grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RectGrid3D {
    pub min: Point3,
    pub max: Point3,
    pub increment: Increment,
}

impl RectGrid3D {
    pub fn new(min: Point3, max: Point3, increment: Increment) -> BeamResult<Self> {
        check_limits("x", min.x, max.x)?;
        check_limits("y", min.y, max.y)?;
        check_limits("z", min.z, max.z)?;
        for inc in increment.per_axis() {
            check_increment(inc)?;
        }
        Ok(Self {
            min,
            max,
            increment,
        })
    }

    fn counts(&self) -> [usize; 3] {
        let inc = self.increment.per_axis();
        [
            steps(self.min.x, self.max.x, inc[0]),
            steps(self.min.y, self.max.y, inc[1]),
            steps(self.min.z, self.max.z, inc[2]),
        ]
    }

    /// Grid indices `(ix, iy, iz)` of the point nearest to `(x, y, z)`.
    pub fn index(&self, x: f64, y: f64, z: f64) -> BeamResult<(usize, usize, usize)> {
        let [nx, ny, nz] = self.counts();
        Ok((
            axis_index("x", x, self.min.x, self.max.x, nx)?,
            axis_index("y", y, self.min.y, self.max.y, ny)?,
            axis_index("z", z, self.min.z, self.max.z, nz)?,
        ))
    }

    /// Flat index of the point nearest to `(x, y, z)`.
    pub fn flat_index(&self, x: f64, y: f64, z: f64) -> BeamResult<usize> {
        let [_, ny, nz] = self.counts();
        let (ix, iy, iz) = self.index(x, y, z)?;
        Ok((ix * ny + iy) * nz + iz)
    }
}

impl Grid for RectGrid3D {
    fn points(&self) -> Vec<Point3> {
        let [nx, ny, nz] = self.counts();
        let xs = axis(self.min.x, self.max.x, nx);
        let ys = axis(self.min.y, self.max.y, ny);
        let zs = axis(self.min.z, self.max.z, nz);
        let mut out = Vec::with_capacity(nx * ny * nz);
        for &x in &xs {
            for &y in &ys {
                for &z in &zs {
                    out.push(Point3::new(x, y, z));
                }
            }
        }
        out
    }

    fn size(&self) -> usize {
        self.counts().iter().product()
    }

    fn shape(&self) -> Vec<usize> {
        self.counts().to_vec()
    }

    fn digest(&self) -> String {
        ContentHasher::new("RectGrid3D")
            .field("min", &self.min)
            .field("max", &self.max)
            .field("increment", &self.increment.per_axis())
            .finish()
    }
}

/// Grid from an explicit list of points
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportGrid {
    points: Vec<Point3>,
}

impl ImportGrid {
    pub fn new(points: Vec<Point3>) -> BeamResult<Self> {
        if points.is_empty() {
            return Err(BeamError::config("grid must contain at least one point"));
        }
        if points.iter().any(|p| !p.is_finite()) {
            return Err(BeamError::config("grid points must be finite"));
        }
        Ok(Self { points })
    }

    pub fn from_xyz(points: &[[f64; 3]]) -> BeamResult<Self> {
        Self::new(points.iter().copied().map(Point3::from).collect())
    }
}

impl Grid for ImportGrid {
    fn points(&self) -> Vec<Point3> {
        self.points.clone()
    }

    fn size(&self) -> usize {
        self.points.len()
    }

    fn digest(&self) -> String {
        ContentHasher::new("ImportGrid")
            .field("points", &self.points)
            .finish()
    }
}

/// Concatenation of several grids
#[derive(Debug, Clone)]
pub struct MergeGrid {
    grids: Vec<Arc<dyn Grid>>,
}

impl MergeGrid {
    pub fn new(grids: Vec<Arc<dyn Grid>>) -> BeamResult<Self> {
        if grids.is_empty() {
            return Err(BeamError::config("merge grid needs at least one grid"));
        }
        Ok(Self { grids })
    }

    /// Index range each member occupies in the merged point list.
    pub fn ranges(&self) -> Vec<std::ops::Range<usize>> {
        let mut start = 0;
        self.grids
            .iter()
            .map(|g| {
                let r = start..start + g.size();
                start = r.end;
                r
            })
            .collect()
    }
}

impl Grid for MergeGrid {
    fn points(&self) -> Vec<Point3> {
        self.grids.iter().flat_map(|g| g.points()).collect()
    }

    fn size(&self) -> usize {
        self.grids.iter().map(|g| g.size()).sum()
    }

    fn digest(&self) -> String {
        let digests: Vec<String> = self.grids.iter().map(|g| g.digest()).collect();
        ContentHasher::new("MergeGrid")
            .field("grids", &digests)
            .finish()
    }
}
