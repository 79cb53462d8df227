//! Scenario engine: multi-emitter microphone signals
//!
//! Each microphone sample at time `t` sums, over the emitters, the signal
//! emitted at the retarded time `τ` with `t - τ = |x_m - s(τ)| / c`:
//!
//! ```text
//! p_m(t) = Σ_e q_e(τ) / (r · (1 - M_r)),    M_r = v(τ)·(x_m - s(τ)) / (r c)
//! ```
//!
//! `q_e` is the pressure at 1 m. Gaussian sensor noise is added last.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use sonomap_core::cache::ContentHasher;
use sonomap_core::geometry::{Environment, MicGeometry, Point3};
use sonomap_core::source::{BlockSource, SampleBlock};
use sonomap_core::types::BeamResult;

use crate::config::{ScenarioConfig, SimError};
use crate::emitter::Emitter;

/// Fixed-point iterations for the retarded time
const RETARDED_ITERATIONS: usize = 50;
/// Emitter distances below this are clamped, meters
const MIN_DISTANCE: f64 = 1e-6;
/// Floor of the Doppler denominator `1 - M_r`
const MIN_CONVECTIVE: f64 = 1e-6;

/// Per-emitter status at a given time
#[derive(Debug, Clone, PartialEq)]
pub struct EmitterStatus {
    pub id: String,
    pub position: Point3,
    /// Distance to the array center
    pub distance_m: f64,
    /// Speed over the speed of sound
    pub mach: f64,
}

/// Renders the microphone signals of a scenario block by block
pub struct ScenarioEngine {
    config: ScenarioConfig,
    mics: Arc<MicGeometry>,
    env: Environment,
    emitters: Vec<Box<dyn Emitter>>,
    rng: StdRng,
    noise: Option<Normal<f64>>,
    current_sample: usize,
}

impl std::fmt::Debug for ScenarioEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScenarioEngine")
            .field("config", &self.config)
            .field("mics", &self.mics.num_mics())
            .field("emitters", &self.emitters.iter().map(|e| e.id()).collect::<Vec<_>>())
            .field("current_sample", &self.current_sample)
            .finish()
    }
}

impl ScenarioEngine {
    pub fn new(
        config: ScenarioConfig,
        mics: Arc<MicGeometry>,
        env: Environment,
        emitters: Vec<Box<dyn Emitter>>,
    ) -> Result<Self, SimError> {
        config.validate()?;
        let noise = if config.noise_std > 0.0 {
            Some(Normal::new(0.0, config.noise_std).map_err(|e| SimError::InvalidConfig(e.to_string()))?)
        } else {
            None
        };
        tracing::debug!(
            emitters = emitters.len(),
            mics = mics.num_mics(),
            samples = config.total_samples(),
            "scenario prepared"
        );
        Ok(Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            mics,
            env,
            emitters,
            noise,
            current_sample: 0,
        })
    }

    pub fn config(&self) -> &ScenarioConfig {
        &self.config
    }

    /// Pressure at `mic` at time `t`, without sensor noise.
    pub fn pressure(&self, mic: &Point3, t: f64) -> f64 {
        let c = self.env.speed_of_sound();
        self.emitters
            .iter()
            .map(|e| {
                let tau = self.retarded_time(e.as_ref(), mic, t);
                let state = e.state_at(tau);
                let offset = *mic - state.position;
                let r = offset.norm().max(MIN_DISTANCE);
                let mach = state.velocity.dot(&offset) / (r * c);
                e.signal(tau) / (r * (1.0 - mach).max(MIN_CONVECTIVE))
            })
            .sum()
    }

    /// Emission time of the sound that reaches `mic` at `t`.
    fn retarded_time(&self, emitter: &dyn Emitter, mic: &Point3, t: f64) -> f64 {
        let c = self.env.speed_of_sound();
        let mut tau = t - emitter.state_at(t).position.distance_to(mic) / c;
        for _ in 0..RETARDED_ITERATIONS {
            let next = t - emitter.state_at(tau).position.distance_to(mic) / c;
            let done = (next - tau).abs() < 1e-13;
            tau = next;
            if done {
                break;
            }
        }
        tau
    }

    pub fn emitter_status(&self, t: f64) -> Vec<EmitterStatus> {
        let center = self.mics.center();
        let c = self.env.speed_of_sound();
        self.emitters
            .iter()
            .map(|e| {
                let state = e.state_at(t);
                EmitterStatus {
                    id: e.id(),
                    position: state.position,
                    distance_m: state.position.distance_to(&center),
                    mach: state.velocity.norm() / c,
                }
            })
            .collect()
    }

    /// Fraction of the scenario rendered so far
    pub fn progress(&self) -> f64 {
        let total = self.config.total_samples();
        if total == 0 {
            1.0
        } else {
            self.current_sample as f64 / total as f64
        }
    }

    pub fn is_done(&self) -> bool {
        self.current_sample >= self.config.total_samples()
    }
}

impl BlockSource for ScenarioEngine {
    fn sample_rate(&self) -> f64 {
        self.config.sample_rate
    }

    fn channel_count(&self) -> usize {
        self.mics.num_mics()
    }

    fn num_samples(&self) -> Option<usize> {
        Some(self.config.total_samples())
    }

    fn next_block(&mut self, max_len: usize) -> BeamResult<Option<SampleBlock>> {
        let remaining = self.config.total_samples().saturating_sub(self.current_sample);
        let len = remaining.min(max_len).min(self.config.block_size);
        if len == 0 {
            return Ok(None);
        }
        let channels = self.mics.num_mics();
        let mut data = Vec::with_capacity(len * channels);
        for i in 0..len {
            let t = (self.current_sample + i) as f64 / self.config.sample_rate;
            for mic in self.mics.positions() {
                data.push(self.pressure(mic, t));
            }
        }
        if let Some(noise) = &self.noise {
            for v in data.iter_mut() {
                *v += noise.sample(&mut self.rng);
            }
        }
        self.current_sample += len;
        SampleBlock::new(data, channels).map(Some)
    }

    fn reset(&mut self) -> BeamResult<()> {
        self.current_sample = 0;
        self.rng = StdRng::seed_from_u64(self.config.seed);
        Ok(())
    }

    fn digest(&self) -> String {
        let emitters: Vec<String> = self.emitters.iter().map(|e| e.digest()).collect();
        ContentHasher::new("ScenarioEngine")
            .field("duration_s", &self.config.duration_s)
            .field("sample_rate", &self.config.sample_rate)
            .field("noise_std", &self.config.noise_std)
            .field("seed", &self.config.seed)
            .field("mics", &self.mics.digest())
            .field("env", &self.env.digest())
            .field("emitters", &emitters)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::{NoiseEmitter, SineEmitter};
    use approx::assert_relative_eq;
    use sonomap_core::source::read_channels;
    use sonomap_core::trajectory::Trajectory;

    fn mics() -> Arc<MicGeometry> {
        Arc::new(MicGeometry::from_xyz(&[[0.0, 0.0, 0.0], [0.5, 0.0, 0.0]]).unwrap())
    }

    fn config(duration_s: f64) -> ScenarioConfig {
        ScenarioConfig {
            duration_s,
            sample_rate: 8000.0,
            block_size: 100,
            ..Default::default()
        }
    }

    #[test]
    fn test_static_tone_delay_and_spreading() {
        let src = Point3::new(0.0, 0.0, 2.0);
        let tone = SineEmitter::new("tone", 200.0, 1.0, Trajectory::Static { position: src });
        let engine = ScenarioEngine::new(config(0.01), mics(), Environment::default(), vec![Box::new(tone)]).unwrap();
        let mic = Point3::new(0.5, 0.0, 0.0);
        let r = src.distance_to(&mic);
        let t = 0.0123;
        let expected = (2.0 * std::f64::consts::PI * 200.0 * (t - r / 343.0)).sin() / r;
        assert_relative_eq!(engine.pressure(&mic, t), expected, epsilon = 1e-9);
    }

    #[test]
    fn test_approaching_source_is_amplified() {
        // constant source strength, moving straight toward the microphone
        struct Dc(Trajectory);
        impl Emitter for Dc {
            fn state_at(&self, t: f64) -> sonomap_core::trajectory::TrajectoryState {
                self.0.state_at(t)
            }
            fn signal(&self, _t: f64) -> f64 {
                1.0
            }
            fn id(&self) -> String {
                "dc".into()
            }
            fn digest(&self) -> String {
                "dc".into()
            }
        }
        let v = 34.3;
        let traj = Trajectory::Linear {
            start: Point3::new(0.0, 0.0, 10.0),
            velocity: Point3::new(0.0, 0.0, -v),
        };
        let engine = ScenarioEngine::new(config(0.01), mics(), Environment::default(), vec![Box::new(Dc(traj))]).unwrap();
        let p = engine.pressure(&Point3::origin(), 0.1);
        // emission at τ with 10 - v τ = c (0.1 - τ)
        let tau = (10.0 - 343.0 * 0.1) / (v - 343.0);
        let r = 10.0 - v * tau;
        assert_relative_eq!(p, 1.0 / (r * 0.9), max_relative = 1e-9);
    }

    #[test]
    fn test_block_source_contract() {
        let tone = SineEmitter::new("tone", 500.0, 1.0, Trajectory::Static {
            position: Point3::new(0.0, 0.0, 1.0),
        });
        let mut engine = ScenarioEngine::new(
            ScenarioConfig {
                noise_std: 0.1,
                ..config(0.05)
            },
            mics(),
            Environment::default(),
            vec![Box::new(tone)],
        )
        .unwrap();
        assert_eq!(engine.channel_count(), 2);
        assert_eq!(engine.num_samples(), Some(400));
        let block = engine.next_block(1000).unwrap().unwrap();
        assert_eq!(block.len(), 100);
        engine.reset().unwrap();
        let first = read_channels(&mut engine, 64).unwrap();
        assert_eq!(first[0].len(), 400);
        assert!(engine.is_done());
        assert_eq!(engine.progress(), 1.0);
        engine.reset().unwrap();
        assert_eq!(read_channels(&mut engine, 128).unwrap(), first);
    }

    #[test]
    fn test_digest_tracks_emitters() {
        let make = |seed: u64| {
            let noise = NoiseEmitter::new("n", 1.0, seed, 8000.0, 0.01, Trajectory::Static {
                position: Point3::new(0.0, 0.0, 1.0),
            })
            .unwrap();
            ScenarioEngine::new(config(0.01), mics(), Environment::default(), vec![Box::new(noise)]).unwrap()
        };
        assert_eq!(make(1).digest(), make(1).digest());
        assert_ne!(make(1).digest(), make(2).digest());
    }

    #[test]
    fn test_emitter_status() {
        let tone = SineEmitter::new("car", 500.0, 1.0, Trajectory::Linear {
            start: Point3::new(-1.0, 0.0, 3.0),
            velocity: Point3::new(34.3, 0.0, 0.0),
        });
        let engine = ScenarioEngine::new(config(0.01), mics(), Environment::default(), vec![Box::new(tone)]).unwrap();
        let status = engine.emitter_status(0.0);
        assert_eq!(status[0].id, "car");
        assert_relative_eq!(status[0].mach, 0.1, epsilon = 1e-12);
        assert_relative_eq!(status[0].distance_m, (1.25f64.powi(2) + 9.0).sqrt(), epsilon = 1e-12);
    }
}
