//! Steering vectors
//!
//! Complex weights that focus the array on one grid point. With `rm` the
//! microphone-to-point distance, `r0` the reference-to-point distance and
//! `k = 2πf/c`:
//!
//! | Formulation    | `h_m`                                   |
//! |----------------|-----------------------------------------|
//! | `Classic`      | `exp(-jk(rm - r0)) / N`                 |
//! | `Inverse`      | `(rm / r0) · exp(-jk(rm - r0)) / N`     |
//! | `TrueLevel`    | `a_m / Σ|a|²`                           |
//! | `TrueLocation` | `a_m / sqrt(N · Σ|a|²)`                 |
//!
//! where `a_m = (r0 / rm) · exp(-jk(rm - r0))` is the transfer vector of a
//! monopole of unit strength at the reference distance. The beamformer
//! output is `h^H C h`.
//!
//! Amplitude terms clamp distances to [`MIN_DISTANCE`]; phases use the
//! unclamped distances.

use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::cache::{ContentHasher, HashValue};
use crate::geometry::{Environment, MicGeometry, Point3};
use crate::grid::Grid;
use crate::types::{BeamError, BeamResult};

/// Lower bound applied to distances in amplitude terms
pub const MIN_DISTANCE: f64 = 1e-6;

/// Steering vector formulation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SteerType {
    /// (I) plain phase shift
    #[default]
    Classic,
    /// (II) inverse distance weighting
    Inverse,
    /// (III) correct source level at the reference
    TrueLevel,
    /// (IV) correct source location
    TrueLocation,
}

impl SteerType {
    pub fn name(&self) -> &'static str {
        match self {
            SteerType::Classic => "classic",
            SteerType::Inverse => "inverse",
            SteerType::TrueLevel => "true level",
            SteerType::TrueLocation => "true location",
        }
    }
}

impl fmt::Display for SteerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Reference for levels and phases
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reference {
    /// Reference position; `r0` is the distance from it to each grid point
    Position(Point3),
    /// Fixed reference distance for every grid point
    Distance(f64),
}

impl Default for Reference {
    fn default() -> Self {
        Reference::Position(Point3::origin())
    }
}

impl HashValue for Reference {
    fn hash_into(&self, hasher: &mut sha2::Sha256) {
        match self {
            Reference::Position(p) => {
                "position".hash_into(hasher);
                p.hash_into(hasher);
            }
            Reference::Distance(d) => {
                "distance".hash_into(hasher);
                d.hash_into(hasher);
            }
        }
    }
}

/// Builder for [`SteeringVector`]
#[derive(Debug)]
pub struct SteeringVectorBuilder {
    mics: Arc<MicGeometry>,
    grid: Arc<dyn Grid>,
    env: Environment,
    reference: Reference,
    steer_type: SteerType,
}

impl SteeringVectorBuilder {
    pub fn environment(mut self, env: Environment) -> Self {
        self.env = env;
        self
    }

    pub fn reference(mut self, reference: Reference) -> Self {
        self.reference = reference;
        self
    }

    pub fn steer_type(mut self, steer_type: SteerType) -> Self {
        self.steer_type = steer_type;
        self
    }

    /// Validate and precompute the distance tables.
    pub fn build(self) -> BeamResult<SteeringVector> {
        let points = self.grid.points();
        if points.is_empty() {
            return Err(BeamError::config("steering needs a non-empty grid"));
        }
        let r0 = match self.reference {
            Reference::Position(p) => {
                if !p.is_finite() {
                    return Err(BeamError::config("reference position must be finite"));
                }
                self.env.distances_to(&points, &p)
            }
            Reference::Distance(d) => {
                if !(d.is_finite() && d > 0.0) {
                    return Err(BeamError::config(format!(
                        "reference distance must be positive, got {}",
                        d
                    )));
                }
                vec![d; points.len()]
            }
        };
        let rm = self.env.distances(&points, &self.mics);
        let digest = ContentHasher::new("SteeringVector")
            .field("steer_type", self.steer_type.name())
            .field("reference", &self.reference)
            .field("mics", &self.mics.digest())
            .field("grid", &self.grid.digest())
            .field("environment", &self.env.digest())
            .finish();
        tracing::debug!(
            steer_type = %self.steer_type,
            grid_points = points.len(),
            mics = self.mics.num_mics(),
            "steering distances computed"
        );
        Ok(SteeringVector {
            mics: self.mics,
            grid: self.grid,
            env: self.env,
            reference: self.reference,
            steer_type: self.steer_type,
            rm,
            r0,
            digest,
        })
    }
}

/// Steering and transfer vectors for every grid point
#[derive(Debug, Clone)]
pub struct SteeringVector {
    mics: Arc<MicGeometry>,
    grid: Arc<dyn Grid>,
    env: Environment,
    reference: Reference,
    steer_type: SteerType,
    /// `[points × mics]`
    rm: Vec<f64>,
    r0: Vec<f64>,
    digest: String,
}

impl SteeringVector {
    pub fn builder(mics: Arc<MicGeometry>, grid: Arc<dyn Grid>) -> SteeringVectorBuilder {
        SteeringVectorBuilder {
            mics,
            grid,
            env: Environment::default(),
            reference: Reference::default(),
            steer_type: SteerType::default(),
        }
    }

    /// Same geometry with another formulation.
    pub fn with_steer_type(&self, steer_type: SteerType) -> BeamResult<Self> {
        SteeringVector::builder(self.mics.clone(), self.grid.clone())
            .environment(self.env)
            .reference(self.reference)
            .steer_type(steer_type)
            .build()
    }

    pub fn mics(&self) -> &Arc<MicGeometry> {
        &self.mics
    }

    pub fn grid(&self) -> &Arc<dyn Grid> {
        &self.grid
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    pub fn reference(&self) -> Reference {
        self.reference
    }

    pub fn steer_type(&self) -> SteerType {
        self.steer_type
    }

    pub fn num_mics(&self) -> usize {
        self.mics.num_mics()
    }

    pub fn grid_size(&self) -> usize {
        self.r0.len()
    }

    /// Microphone distances of grid point `g`
    pub fn rm(&self, g: usize) -> &[f64] {
        let m = self.num_mics();
        &self.rm[g * m..(g + 1) * m]
    }

    /// Reference distance of grid point `g`
    pub fn r0(&self, g: usize) -> f64 {
        self.r0[g]
    }

    /// Digest over formulation, reference and the geometry digests.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Transfer vector `a` of grid point `g`.
    pub fn transfer(&self, freq: f64, g: usize) -> Vec<Complex64> {
        let k = self.env.wavenumber(freq);
        let r0 = self.r0[g];
        let r0c = r0.max(MIN_DISTANCE);
        self.rm(g)
            .iter()
            .map(|&rm| Complex64::from_polar(r0c / rm.max(MIN_DISTANCE), -k * (rm - r0)))
            .collect()
    }

    /// Transfer vectors of every grid point.
    pub fn transfer_all(&self, freq: f64) -> Vec<Vec<Complex64>> {
        (0..self.grid_size()).map(|g| self.transfer(freq, g)).collect()
    }

    /// Steering vector `h` of grid point `g`.
    pub fn steer(&self, freq: f64, g: usize) -> Vec<Complex64> {
        let n = self.num_mics() as f64;
        let k = self.env.wavenumber(freq);
        let r0 = self.r0[g];
        let r0c = r0.max(MIN_DISTANCE);
        let rm = self.rm(g);
        match self.steer_type {
            SteerType::Classic => rm
                .iter()
                .map(|&r| Complex64::from_polar(1.0 / n, -k * (r - r0)))
                .collect(),
            SteerType::Inverse => rm
                .iter()
                .map(|&r| Complex64::from_polar(r.max(MIN_DISTANCE) / r0c / n, -k * (r - r0)))
                .collect(),
            SteerType::TrueLevel | SteerType::TrueLocation => {
                let a = self.transfer(freq, g);
                let power: f64 = a.iter().map(|z| z.norm_sqr()).sum();
                let norm = match self.steer_type {
                    SteerType::TrueLevel => power,
                    _ => (n * power).sqrt(),
                };
                a.into_iter().map(|z| z / norm).collect()
            }
        }
    }

    /// Steering vectors of every grid point.
    pub fn steer_all(&self, freq: f64) -> Vec<Vec<Complex64>> {
        (0..self.grid_size()).map(|g| self.steer(freq, g)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{ImportGrid, RectGrid};
    use crate::linalg::{dot_conj, norm_sqr};
    use approx::assert_relative_eq;

    fn mics() -> Arc<MicGeometry> {
        Arc::new(
            MicGeometry::from_xyz(&[
                [-0.2, -0.2, 0.0],
                [0.2, -0.2, 0.0],
                [0.2, 0.2, 0.0],
                [-0.2, 0.2, 0.0],
                [0.05, 0.0, 0.0],
            ])
            .unwrap(),
        )
    }

    fn grid() -> Arc<dyn Grid> {
        Arc::new(RectGrid::new(-0.3, 0.3, -0.3, 0.3, 0.8, 0.1).unwrap())
    }

    fn steering(t: SteerType) -> SteeringVector {
        SteeringVector::builder(mics(), grid())
            .steer_type(t)
            .build()
            .unwrap()
    }

    #[test]
    fn test_classic_normalization() {
        let sv = steering(SteerType::Classic);
        let h = sv.steer(2000.0, 7);
        assert_eq!(h.len(), 5);
        for z in &h {
            assert_relative_eq!(z.norm(), 0.2, epsilon = 1e-12);
        }
        // e^H e / N² = 1/N
        assert_relative_eq!(norm_sqr(&h), 0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_true_level_unit_gain() {
        let sv = steering(SteerType::TrueLevel);
        for g in [0, 12, 48] {
            let h = sv.steer(3000.0, g);
            let a = sv.transfer(3000.0, g);
            let gain = dot_conj(&h, &a);
            assert_relative_eq!(gain.re, 1.0, epsilon = 1e-12);
            assert_relative_eq!(gain.im, 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_true_location_norm() {
        let sv = steering(SteerType::TrueLocation);
        let h = sv.steer(1500.0, 20);
        assert_relative_eq!(norm_sqr(&h), 1.0 / 5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_inverse_weights_grow_with_distance() {
        let sv = steering(SteerType::Inverse);
        let g = 0;
        let h = sv.steer(1000.0, g);
        let rm = sv.rm(g);
        let r0 = sv.r0(g);
        for (z, r) in h.iter().zip(rm) {
            assert_relative_eq!(z.norm(), r / r0 / 5.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_transfer_phase_convention() {
        let sv = steering(SteerType::Classic);
        let k = sv.environment().wavenumber(1000.0);
        let a = sv.transfer(1000.0, 3);
        let rm = sv.rm(3);
        let r0 = sv.r0(3);
        let expected = Complex64::from_polar(r0 / rm[1], -k * (rm[1] - r0));
        assert_relative_eq!(a[1].re, expected.re, epsilon = 1e-12);
        assert_relative_eq!(a[1].im, expected.im, epsilon = 1e-12);
    }

    #[test]
    fn test_reference_at_grid_point_stays_finite() {
        let grid: Arc<dyn Grid> = Arc::new(ImportGrid::from_xyz(&[[0.0, 0.0, 0.0]]).unwrap());
        for t in [
            SteerType::Classic,
            SteerType::Inverse,
            SteerType::TrueLevel,
            SteerType::TrueLocation,
        ] {
            let sv = SteeringVector::builder(mics(), grid.clone())
                .steer_type(t)
                .build()
                .unwrap();
            assert_eq!(sv.r0(0), 0.0);
            assert!(sv.steer(1000.0, 0).iter().all(|z| z.is_finite()));
            assert!(sv.transfer(1000.0, 0).iter().all(|z| z.is_finite()));
        }
    }

    #[test]
    fn test_mic_at_grid_point_stays_finite() {
        let grid: Arc<dyn Grid> = Arc::new(ImportGrid::from_xyz(&[[0.2, 0.2, 0.0]]).unwrap());
        let sv = SteeringVector::builder(mics(), grid)
            .steer_type(SteerType::TrueLevel)
            .build()
            .unwrap();
        assert_eq!(sv.rm(0)[2], 0.0);
        let h = sv.steer(1000.0, 0);
        assert!(h.iter().all(|z| z.is_finite()));
        // coincident mic dominates the weighting
        assert!(h[2].norm() > h[0].norm());
    }

    #[test]
    fn test_reference_distance() {
        let sv = SteeringVector::builder(mics(), grid())
            .reference(Reference::Distance(1.0))
            .build()
            .unwrap();
        assert_eq!(sv.r0(0), 1.0);
        assert_eq!(sv.r0(30), 1.0);
        assert!(SteeringVector::builder(mics(), grid())
            .reference(Reference::Distance(0.0))
            .build()
            .is_err());
    }

    #[test]
    fn test_digest_sensitivity() {
        let a = steering(SteerType::Classic);
        let b = steering(SteerType::Classic);
        let c = steering(SteerType::TrueLevel);
        let d = SteeringVector::builder(mics(), grid())
            .environment(Environment::new(340.0).unwrap())
            .build()
            .unwrap();
        assert_eq!(a.digest(), b.digest());
        assert_ne!(a.digest(), c.digest());
        assert_ne!(a.digest(), d.digest());
        assert_eq!(a.with_steer_type(SteerType::TrueLevel).unwrap().digest(), c.digest());
    }
}
