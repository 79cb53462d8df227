//! Array geometry and propagation environment
//!
//! Provides the Cartesian point type, the immutable microphone array, and the
//! homogeneous free-field environment that turns geometry into distances.

use serde::{Deserialize, Serialize};

use crate::cache::{ContentHasher, HashValue};
use crate::types::{BeamError, BeamResult};

/// Default speed of sound in air at ~20 °C, m/s
pub const DEFAULT_SPEED_OF_SOUND: f64 = 343.0;

/// Cartesian position (or direction) in meters
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn origin() -> Self {
        Self::default()
    }

    /// Distance to another point in meters
    pub fn distance_to(&self, other: &Point3) -> f64 {
        (*self - *other).norm()
    }

    pub fn norm(&self) -> f64 {
        self.dot(self).sqrt()
    }

    pub fn dot(&self, other: &Point3) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn cross(&self, other: &Point3) -> Point3 {
        Point3::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }

    /// Unit vector in the same direction; the zero vector stays zero.
    pub fn normalized(&self) -> Point3 {
        let n = self.norm();
        if n < 1e-15 {
            return Point3::origin();
        }
        *self * (1.0 / n)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl std::ops::Add for Point3 {
    type Output = Point3;
    fn add(self, rhs: Self) -> Point3 {
        Point3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl std::ops::Sub for Point3 {
    type Output = Point3;
    fn sub(self, rhs: Self) -> Point3 {
        Point3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl std::ops::Mul<f64> for Point3 {
    type Output = Point3;
    fn mul(self, rhs: f64) -> Point3 {
        Point3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl From<[f64; 3]> for Point3 {
    fn from(p: [f64; 3]) -> Self {
        Point3::new(p[0], p[1], p[2])
    }
}

impl HashValue for Point3 {
    fn hash_into(&self, hasher: &mut sha2::Sha256) {
        self.x.hash_into(hasher);
        self.y.hash_into(hasher);
        self.z.hash_into(hasher);
    }
}

/// Microphone array: ordered, immutable set of sensor positions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MicGeometry {
    positions: Vec<Point3>,
}

impl MicGeometry {
    /// Create an array from sensor positions.
    pub fn new(positions: Vec<Point3>) -> BeamResult<Self> {
        if positions.is_empty() {
            return Err(BeamError::config("microphone array must not be empty"));
        }
        if let Some(i) = positions.iter().position(|p| !p.is_finite()) {
            return Err(BeamError::config(format!(
                "microphone {} has a non-finite position",
                i
            )));
        }
        Ok(Self { positions })
    }

    /// Create an array from `[x, y, z]` triples.
    pub fn from_xyz(positions: &[[f64; 3]]) -> BeamResult<Self> {
        Self::new(positions.iter().copied().map(Point3::from).collect())
    }

    /// Number of microphones
    pub fn num_mics(&self) -> usize {
        self.positions.len()
    }

    pub fn positions(&self) -> &[Point3] {
        &self.positions
    }

    /// Geometric center of the array
    pub fn center(&self) -> Point3 {
        let sum = self
            .positions
            .iter()
            .fold(Point3::origin(), |acc, p| acc + *p);
        sum * (1.0 / self.positions.len() as f64)
    }

    /// Largest distance between any two microphones
    pub fn aperture(&self) -> f64 {
        let mut max = 0.0f64;
        for (i, a) in self.positions.iter().enumerate() {
            for b in &self.positions[i + 1..] {
                max = max.max(a.distance_to(b));
            }
        }
        max
    }

    /// Content digest of the position set
    pub fn digest(&self) -> String {
        ContentHasher::new("MicGeometry")
            .field("positions", &self.positions)
            .finish()
    }
}

/// Homogeneous, quiescent propagation medium
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    speed_of_sound: f64,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            speed_of_sound: DEFAULT_SPEED_OF_SOUND,
        }
    }
}

impl Environment {
    pub fn new(speed_of_sound: f64) -> BeamResult<Self> {
        if !(speed_of_sound.is_finite() && speed_of_sound > 0.0) {
            return Err(BeamError::config(format!(
                "speed of sound must be positive, got {}",
                speed_of_sound
            )));
        }
        Ok(Self { speed_of_sound })
    }

    pub fn speed_of_sound(&self) -> f64 {
        self.speed_of_sound
    }

    /// Wavenumber k = 2πf/c
    pub fn wavenumber(&self, freq: f64) -> f64 {
        2.0 * std::f64::consts::PI * freq / self.speed_of_sound
    }

    /// Distances from every point to every microphone, `[points × mics]` row-major.
    pub fn distances(&self, points: &[Point3], mics: &MicGeometry) -> Vec<f64> {
        let mut out = Vec::with_capacity(points.len() * mics.num_mics());
        for p in points {
            out.extend(mics.positions().iter().map(|m| p.distance_to(m)));
        }
        out
    }

    /// Distance from every point to a single reference position.
    pub fn distances_to(&self, points: &[Point3], reference: &Point3) -> Vec<f64> {
        points.iter().map(|p| p.distance_to(reference)).collect()
    }

    pub fn digest(&self) -> String {
        ContentHasher::new("Environment")
            .field("c", &self.speed_of_sound)
            .finish()
    }
}
