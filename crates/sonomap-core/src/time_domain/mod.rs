//! Time-domain beamforming
//!
//! ```text
//! BlockSource (mics) ──▶ TimeBeamformer ──▶ BlockSource (grid points) ──▶ SectorIntegrator
//!                    └─▶ CleanT ──▶ BlockMaps
//! ```
//!
//! All stages share one delay convention: output sample `n` belongs to the
//! emission time `n / fs` at the focus point, and the microphone signal is
//! read at the arrival time `n + rm·fs/c`. Moving focus grids are
//! re-evaluated for every output sample.

mod clean_t;
mod delay_sum;
mod integrator;

pub use clean_t::{BlockMaps, CleanT};
pub use delay_sum::{const_power_weights, GridMotion, TimeBeamformer, TimeMode, Weights};
pub use integrator::SectorIntegrator;

#[cfg(test)]
pub(crate) mod testutil {
    use crate::source::MemorySource;
    use crate::steering::SteeringVector;

    pub const FS: f64 = 51200.0;

    /// Microphone signals of a static source at grid point `g`.
    ///
    /// The source emits a sum of sines with unit amplitude at the reference
    /// distance; component `i` has phase `1.3·i`.
    pub fn simulate(steer: &SteeringVector, g: usize, n: usize, freqs: &[f64]) -> MemorySource {
        let c = steer.environment().speed_of_sound();
        let r0 = steer.r0(g);
        let channels = steer
            .rm(g)
            .iter()
            .map(|rm| {
                (0..n)
                    .map(|k| {
                        let t = k as f64 / FS - rm / c;
                        freqs
                            .iter()
                            .enumerate()
                            .map(|(i, f)| (2.0 * std::f64::consts::PI * f * t + 1.3 * i as f64).sin())
                            .sum::<f64>()
                            * r0
                            / rm
                    })
                    .collect()
            })
            .collect();
        MemorySource::from_channels(channels, FS).unwrap()
    }
}
