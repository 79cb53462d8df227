//! CLEAN in the time domain
//!
//! The microphone signals are processed in blocks of output samples. Within
//! a block, each iteration beamforms the residual signals, picks the grid
//! point with the largest mean output power, reconstructs its source signal
//! and removes the propagated contribution from the residual:
//!
//! ```text
//! v[n]          = damp · y_g*[n]
//! x_m(n + d_m) -= v[n] · r0 / rm / (1 - M_r)
//! ```
//!
//! The removal spreads each sample onto the two neighbouring input samples
//! with the linear interpolation weights. The block map holds the mean
//! power of the accumulated source signals.

use std::sync::Arc;
use std::time::Duration;

use crate::beamformer::{
    apply_loop_settings, argmax, check_loop_gain, duration_ns, IterationMonitor, SourceMap,
};
use crate::cache::{ArrayRecord, Cache, CachePolicy, Cacheable, DType, Fingerprint};
use crate::config::SolverConfig;
use crate::geometry::Point3;
use crate::source::{read_channels, BlockSource};
use crate::steering::SteeringVector;
use crate::trajectory::Trajectory;
use crate::types::{BeamError, BeamResult};

use super::delay_sum::{interpolate, Focus, GridMotion, TimeMode, Weights, READ_LEN};

/// Per-block maps, `[blocks × grid points]`
#[derive(Debug, Clone, PartialEq)]
pub struct BlockMaps {
    sample_rate: f64,
    block_len: usize,
    grid_size: usize,
    values: Vec<f64>,
}

impl BlockMaps {
    pub fn new(sample_rate: f64, block_len: usize, grid_size: usize, values: Vec<f64>) -> BeamResult<Self> {
        if grid_size == 0 || values.len() % grid_size != 0 {
            return Err(BeamError::shape(
                "block maps",
                grid_size * (values.len() / grid_size.max(1)),
                values.len(),
            ));
        }
        Ok(Self {
            sample_rate,
            block_len,
            grid_size,
            values,
        })
    }

    pub fn len(&self) -> usize {
        self.values.len() / self.grid_size
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn grid_size(&self) -> usize {
        self.grid_size
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn block_len(&self) -> usize {
        self.block_len
    }

    pub fn map(&self, block: usize) -> &[f64] {
        &self.values[block * self.grid_size..(block + 1) * self.grid_size]
    }

    /// Emission time of the first sample in `block`.
    pub fn start_time(&self, block: usize) -> f64 {
        (block * self.block_len) as f64 / self.sample_rate
    }

    /// Average over all blocks.
    pub fn mean(&self) -> SourceMap {
        let mut out = vec![0.0; self.grid_size];
        for b in 0..self.len() {
            for (o, v) in out.iter_mut().zip(self.map(b)) {
                *o += v;
            }
        }
        let blocks = self.len().max(1) as f64;
        SourceMap::new(out.into_iter().map(|v| v / blocks).collect())
    }
}

impl Cacheable for BlockMaps {
    fn to_record(&self) -> ArrayRecord {
        ArrayRecord::real(vec![self.len(), self.grid_size], self.values.clone())
            .with_attr("sample_rate", self.sample_rate)
            .with_attr("block_len", self.block_len as f64)
    }

    fn from_record(record: ArrayRecord) -> BeamResult<Self> {
        record.check(DType::Real, 2)?;
        let sample_rate = record.attr("sample_rate")?;
        let block_len = record.attr("block_len")? as usize;
        Self::new(sample_rate, block_len, record.shape[1], record.values)
    }
}

/// Time-domain CLEAN
#[derive(Debug, Clone)]
pub struct CleanT {
    steer: Arc<SteeringVector>,
    /// Power measure for the peak search; `Squared { r_diag: true }` is CLEAN-T²
    pub mode: TimeMode,
    pub weights: Weights,
    pub motion: Option<GridMotion>,
    /// Output samples per map
    pub block_len: usize,
    /// Loop gain
    pub damp: f64,
    pub n_iter: usize,
    /// Stop once the peak power falls to `stop` times the first peak of the block
    pub stop: f64,
    pub max_duration: Option<Duration>,
    pub cache_policy: Option<CachePolicy>,
}

impl CleanT {
    pub fn new(steer: Arc<SteeringVector>) -> Self {
        Self {
            steer,
            mode: TimeMode::Plain,
            weights: Weights::None,
            motion: None,
            block_len: 1024,
            damp: 0.6,
            n_iter: 100,
            stop: 1e-3,
            max_duration: None,
            cache_policy: None,
        }
    }

    pub fn mode(mut self, mode: TimeMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn weights(mut self, weights: Weights) -> Self {
        self.weights = weights;
        self
    }

    pub fn trajectory(mut self, trajectory: Trajectory) -> Self {
        self.motion = Some(GridMotion {
            trajectory,
            rvec: self.motion.take().and_then(|m| m.rvec),
        });
        self
    }

    pub fn rvec(mut self, rvec: Point3) -> BeamResult<Self> {
        let Some(motion) = self.motion.as_mut() else {
            return Err(BeamError::config("rvec needs a trajectory for the focus grid"));
        };
        motion.rvec = Some(rvec);
        Ok(self)
    }

    pub fn block_len(mut self, block_len: usize) -> Self {
        self.block_len = block_len;
        self
    }

    pub fn damp(mut self, damp: f64) -> Self {
        self.damp = damp;
        self
    }

    pub fn n_iter(mut self, n_iter: usize) -> Self {
        self.n_iter = n_iter;
        self
    }

    pub fn stop(mut self, stop: f64) -> Self {
        self.stop = stop;
        self
    }

    pub fn max_duration(mut self, limit: Duration) -> Self {
        self.max_duration = Some(limit);
        self
    }

    /// Apply the configured overrides; `tol` does not apply.
    pub fn with_solver(mut self, solver: &SolverConfig) -> Self {
        apply_loop_settings(solver, &mut self.n_iter, &mut self.damp, &mut self.stop, &mut self.max_duration);
        self
    }

    pub fn cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = Some(policy);
        self
    }

    pub fn steer(&self) -> &Arc<SteeringVector> {
        &self.steer
    }

    pub fn validate(&self) -> BeamResult<()> {
        check_loop_gain("CLEAN-T", self.damp, self.stop)?;
        if self.block_len == 0 {
            return Err(BeamError::config("CLEAN-T block length must be positive"));
        }
        Ok(())
    }

    pub fn fingerprint(&self, source: &dyn BlockSource) -> Fingerprint {
        Fingerprint::builder("CleanT")
            .param("mode", &self.mode)
            .param("weights", self.weights.name())
            .param("motion", &self.motion.as_ref().map(|m| m.digest()))
            .param("block_len", &self.block_len)
            .param("damp", &self.damp)
            .param("n_iter", &self.n_iter)
            .param("stop", &self.stop)
            .param("max_duration_ns", &duration_ns(self.max_duration))
            .data(self.steer.digest())
            .data(&source.digest())
            .build()
    }

    /// Block maps of `source`, through the cache.
    pub fn result(&self, source: &mut dyn BlockSource, cache: &Cache) -> BeamResult<Arc<BlockMaps>> {
        self.validate()?;
        let fp = self.fingerprint(source);
        let policy = cache.resolve(self.cache_policy);
        cache.get_or_compute(&fp, policy, || self.compute(source))
    }

    /// Read `source` to its end and deconvolve block by block.
    pub fn compute(&self, source: &mut dyn BlockSource) -> BeamResult<BlockMaps> {
        self.validate()?;
        let steer = &self.steer;
        if source.channel_count() != steer.num_mics() {
            return Err(BeamError::shape("CLEAN-T channels", steer.num_mics(), source.channel_count()));
        }
        let fs = source.sample_rate();
        let mut residual = read_channels(source, READ_LEN)?;
        let total = residual.first().map_or(0, Vec::len);
        let mic_weights = self.weights.compute(steer.mics());
        let grid_points = steer.grid().points();
        let fixed = match self.motion {
            Some(_) => None,
            None => Some(Arc::new(Focus::from_steer(steer, &mic_weights).in_samples(fs))),
        };
        let focus_at = |n: usize| match (&fixed, &self.motion) {
            (Some(f), _) => f.clone(),
            (None, Some(motion)) => Arc::new(Focus::moving(steer, motion, &grid_points, &mic_weights, fs, n)),
            (None, None) => Arc::new(Focus::from_steer(steer, &mic_weights).in_samples(fs)),
        };

        let mut values = Vec::new();
        let mut start = 0;
        loop {
            let mut focuses = Vec::with_capacity(self.block_len);
            for n in start..start + self.block_len {
                let focus = focus_at(n);
                if focus.last_index(n) >= total {
                    break;
                }
                focuses.push(focus);
            }
            if focuses.is_empty() {
                break;
            }
            let map = self.clean_block(&mut residual, start, &focuses)?;
            values.extend(map);
            start += focuses.len();
            if focuses.len() < self.block_len {
                break;
            }
        }
        tracing::debug!(
            blocks = values.len() / steer.grid_size().max(1),
            samples = total,
            moving = self.motion.is_some(),
            "clean-t finished"
        );
        BlockMaps::new(fs, self.block_len, steer.grid_size(), values)
    }

    /// Deconvolve output samples `start..start + focuses.len()`.
    fn clean_block(&self, residual: &mut [Vec<f64>], start: usize, focuses: &[Arc<Focus>]) -> BeamResult<Vec<f64>> {
        let points = self.steer.grid_size();
        let len = focuses.len();
        let mut signals = vec![vec![0.0; len]; points];

        let mut output = vec![vec![0.0; len]; points];
        let mut powers = self.beamform(residual, start, focuses, &mut output);
        let Some((_, first_peak)) = argmax(&powers) else {
            return Ok(vec![0.0; points]);
        };

        let mut monitor = IterationMonitor::new("CLEAN-T", self.n_iter, self.max_duration);
        monitor.begin(&powers)?;
        let mut it = 0;
        let mut converged = false;
        while monitor.within_budget(it) {
            let Some((g, peak)) = argmax(&powers) else { break };
            if peak <= 0.0 || peak <= self.stop * first_peak {
                converged = true;
                break;
            }
            for (k, focus) in focuses.iter().enumerate() {
                let v = self.damp * output[g][k];
                signals[g][k] += v;
                let offset = (start + k) as f64;
                for ((x, d), gain) in residual.iter_mut().zip(focus.delays(g)).zip(focus.gains(g)) {
                    let pos = offset + d;
                    let i = pos.floor();
                    let frac = pos - i;
                    let i = i as usize;
                    x[i] -= (1.0 - frac) * gain * v;
                    x[i + 1] -= frac * gain * v;
                }
            }
            powers = self.beamform(residual, start, focuses, &mut output);
            it += 1;
            monitor.check(it, &powers)?;
        }
        if converged {
            monitor.converged(it);
        } else {
            monitor.exhausted(it);
        }
        tracing::trace!(start, iterations = it, "clean-t block done");

        Ok(signals
            .iter()
            .map(|s| s.iter().map(|v| v * v).sum::<f64>() / len as f64)
            .collect())
    }

    /// Beamform the residual into `output`; returns the mean power per point.
    fn beamform(&self, residual: &[Vec<f64>], start: usize, focuses: &[Arc<Focus>], output: &mut [Vec<f64>]) -> Vec<f64> {
        let len = focuses.len() as f64;
        let mut powers = vec![0.0; output.len()];
        for (k, focus) in focuses.iter().enumerate() {
            let offset = (start + k) as f64;
            for (g, (out, power)) in output.iter_mut().zip(powers.iter_mut()).enumerate() {
                let mut sum = 0.0;
                let mut auto = 0.0;
                for ((x, d), coeff) in residual.iter().zip(focus.delays(g)).zip(focus.coeffs(g)) {
                    let t = coeff * interpolate(x, offset + d);
                    sum += t;
                    auto += t * t;
                }
                out[k] = sum;
                *power += match self.mode {
                    TimeMode::Squared { r_diag: true } => sum * sum - auto,
                    TimeMode::Plain | TimeMode::Squared { r_diag: false } => sum * sum,
                };
            }
        }
        powers.iter().map(|p| p / len).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beamformer::testutil::steer;
    use crate::source::MemorySource;
    use crate::steering::SteerType;
    use crate::time_domain::testutil::{simulate, FS};

    const FREQS: [f64; 5] = [2000.0, 2900.0, 3700.0, 4600.0, 5300.0];

    #[test]
    fn test_finds_static_source() {
        let sv = steer(SteerType::Classic);
        let mut src = simulate(&sv, 18, 2048, &FREQS);
        let maps = CleanT::new(sv).compute(&mut src).unwrap();
        // 2048 inputs less the largest delay leave one full and one partial block
        assert_eq!(maps.len(), 2);
        assert_eq!(maps.grid_size(), 25);
        let mean = maps.mean();
        let (peak, value) = mean.peak().unwrap();
        assert_eq!(peak, 18);
        // five unit sines carry a mean power of 2.5
        assert!(value > 1.8 && value < 3.2, "power {value}");
        assert!(value > 0.8 * mean.sum());
    }

    #[test]
    fn test_squared_mode_finds_static_source() {
        let sv = steer(SteerType::Classic);
        let mut src = simulate(&sv, 6, 1600, &FREQS);
        let maps = CleanT::new(sv)
            .mode(TimeMode::Squared { r_diag: true })
            .block_len(512)
            .compute(&mut src)
            .unwrap();
        for b in 0..maps.len() {
            let map = SourceMap::new(maps.map(b).to_vec());
            assert_eq!(map.peak().unwrap().0, 6, "block {b}");
        }
        assert_eq!(maps.start_time(1), 512.0 / FS);
    }

    #[test]
    fn test_zero_iterations_leave_empty_maps() {
        let sv = steer(SteerType::Classic);
        let mut src = simulate(&sv, 3, 1200, &FREQS);
        let maps = CleanT::new(sv).n_iter(0).compute(&mut src).unwrap();
        assert!(!maps.is_empty());
        assert!(maps.mean().values().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_silence_gives_zero_maps() {
        let sv = steer(SteerType::Classic);
        let mut src = MemorySource::from_channels(vec![vec![0.0; 1100]; 9], FS).unwrap();
        let maps = CleanT::new(sv).compute(&mut src).unwrap();
        assert_eq!(maps.len(), 1);
        assert!(maps.map(0).iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_result_is_cached() {
        let sv = steer(SteerType::Classic);
        let cache = Cache::in_memory();
        let clean = CleanT::new(sv.clone()).block_len(512);
        let mut src = simulate(&sv, 12, 1200, &FREQS);
        let first = clean.result(&mut src, &cache).unwrap();
        src.reset().unwrap();
        let second = clean.result(&mut src, &cache).unwrap();
        assert_eq!(first, second);
        let stats = cache.stats();
        assert_eq!(stats.computes, 1);
        assert_eq!(stats.memory_hits, 1);

        let record = first.to_record();
        assert_eq!(BlockMaps::from_record(record).unwrap(), *first);
    }

    #[test]
    fn test_parameters_change_fingerprint() {
        let sv = steer(SteerType::Classic);
        let src = simulate(&sv, 12, 400, &FREQS);
        let a = CleanT::new(sv.clone()).fingerprint(&src);
        let b = CleanT::new(sv.clone()).damp(0.5).fingerprint(&src);
        let c = CleanT::new(sv.clone()).mode(TimeMode::Squared { r_diag: true }).fingerprint(&src);
        let d = CleanT::new(sv).max_duration(Duration::from_secs(1)).fingerprint(&src);
        assert_ne!(a.key(), b.key());
        assert_ne!(a.key(), c.key());
        assert_ne!(a.key(), d.key());
    }

    #[test]
    fn test_with_solver_overrides_set_fields() {
        let sv = steer(SteerType::Classic);
        let bf = CleanT::new(sv).with_solver(&SolverConfig {
            n_iter: Some(12),
            damp: Some(0.4),
            ..Default::default()
        });
        assert_eq!(bf.n_iter, 12);
        assert_eq!(bf.damp, 0.4);
        assert_eq!(bf.stop, 1e-3);
    }

    #[test]
    fn test_validation() {
        let sv = steer(SteerType::Classic);
        assert!(CleanT::new(sv.clone()).damp(0.0).validate().is_err());
        assert!(CleanT::new(sv.clone()).stop(-1.0).validate().is_err());
        assert!(CleanT::new(sv.clone()).block_len(0).validate().is_err());
        assert!(CleanT::new(sv.clone()).rvec(Point3::new(0.0, 0.0, 1.0)).is_err());
        let mut two = MemorySource::from_channels(vec![vec![0.0; 10]; 2], FS).unwrap();
        assert!(matches!(
            CleanT::new(sv).compute(&mut two),
            Err(BeamError::DataShape { .. })
        ));
    }
}
