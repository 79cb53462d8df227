//! Point source emitters
//!
//! An emitter reports where it is and what it radiates. The signal is the
//! pressure at 1 m from the source at emission time `t`; the engine applies
//! propagation.

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use sonomap_core::cache::ContentHasher;
use sonomap_core::trajectory::{Trajectory, TrajectoryState};

use crate::config::SimError;

/// Emitted time before `t = 0` available to noise emitters, seconds
pub const PRE_ROLL_S: f64 = 0.1;

/// Point source in a scenario
pub trait Emitter: Send + Sync {
    fn state_at(&self, t: f64) -> TrajectoryState;

    /// Pressure at 1 m from the source at emission time `t`.
    fn signal(&self, t: f64) -> f64;

    fn id(&self) -> String;

    /// Content digest of every parameter that shapes the signal
    fn digest(&self) -> String;
}

/// Pure tone
#[derive(Debug, Clone, PartialEq)]
pub struct SineEmitter {
    id: String,
    freq_hz: f64,
    amplitude: f64,
    phase_rad: f64,
    trajectory: Trajectory,
}

impl SineEmitter {
    pub fn new(id: impl Into<String>, freq_hz: f64, amplitude: f64, trajectory: Trajectory) -> Self {
        Self {
            id: id.into(),
            freq_hz,
            amplitude,
            phase_rad: 0.0,
            trajectory,
        }
    }

    pub fn phase(mut self, phase_rad: f64) -> Self {
        self.phase_rad = phase_rad;
        self
    }
}

impl Emitter for SineEmitter {
    fn state_at(&self, t: f64) -> TrajectoryState {
        self.trajectory.state_at(t)
    }

    fn signal(&self, t: f64) -> f64 {
        self.amplitude * (2.0 * std::f64::consts::PI * self.freq_hz * t + self.phase_rad).sin()
    }

    fn id(&self) -> String {
        self.id.clone()
    }

    fn digest(&self) -> String {
        ContentHasher::new("SineEmitter")
            .field("freq_hz", &self.freq_hz)
            .field("amplitude", &self.amplitude)
            .field("phase_rad", &self.phase_rad)
            .field("trajectory", &self.trajectory.digest())
            .finish()
    }
}

/// Gaussian white noise, rendered once from a seeded generator
///
/// The signal is tabulated at `sample_rate` from `-PRE_ROLL_S` to the end of
/// the scenario and linearly interpolated in between; it is zero outside.
#[derive(Debug, Clone)]
pub struct NoiseEmitter {
    id: String,
    rms: f64,
    seed: u64,
    sample_rate: f64,
    samples: Vec<f64>,
    trajectory: Trajectory,
}

impl NoiseEmitter {
    pub fn new(
        id: impl Into<String>,
        rms: f64,
        seed: u64,
        sample_rate: f64,
        duration_s: f64,
        trajectory: Trajectory,
    ) -> Result<Self, SimError> {
        if !(rms.is_finite() && rms >= 0.0) {
            return Err(SimError::InvalidConfig(format!("noise rms must be non-negative, got {}", rms)));
        }
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(SimError::InvalidConfig("noise sample rate must be positive".to_string()));
        }
        let normal = Normal::new(0.0, rms).map_err(|e| SimError::InvalidConfig(e.to_string()))?;
        let mut rng = StdRng::seed_from_u64(seed);
        let len = ((duration_s.max(0.0) + PRE_ROLL_S) * sample_rate).ceil() as usize + 2;
        let samples = (0..len).map(|_| normal.sample(&mut rng)).collect();
        Ok(Self {
            id: id.into(),
            rms,
            seed,
            sample_rate,
            samples,
            trajectory,
        })
    }
}

impl Emitter for NoiseEmitter {
    fn state_at(&self, t: f64) -> TrajectoryState {
        self.trajectory.state_at(t)
    }

    fn signal(&self, t: f64) -> f64 {
        let pos = (t + PRE_ROLL_S) * self.sample_rate;
        if pos < 0.0 {
            return 0.0;
        }
        let i = pos.floor() as usize;
        if i + 1 >= self.samples.len() {
            return 0.0;
        }
        let frac = pos - pos.floor();
        (1.0 - frac) * self.samples[i] + frac * self.samples[i + 1]
    }

    fn id(&self) -> String {
        self.id.clone()
    }

    fn digest(&self) -> String {
        ContentHasher::new("NoiseEmitter")
            .field("rms", &self.rms)
            .field("seed", &self.seed)
            .field("sample_rate", &self.sample_rate)
            .field("len", &self.samples.len())
            .field("trajectory", &self.trajectory.digest())
            .finish()
    }
}
