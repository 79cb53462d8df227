//! Streaming time-domain delay-and-sum
//!
//! Output sample `n` of grid point `g` is the signal emitted at `g` at time
//! `n / fs`, reconstructed from the microphone signals at the arrival times
//! `n + rm·fs/c` with linear interpolation:
//!
//! ```text
//! y_g[n] = Σ_m c_gm · x_m(n + d_gm),    c_gm = w_m / ((Σ_k w_k / rk²) · r0 · rm)
//! ```
//!
//! A source of pressure `q` at the reference distance is reproduced with
//! unit gain. The beamformer is itself a [`BlockSource`] whose channels are
//! the grid points, so it chains into a [`super::SectorIntegrator`] or any
//! other block consumer.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cache::{ContentHasher, HashValue};
use crate::geometry::{MicGeometry, Point3};
use crate::source::{BlockSource, SampleBlock};
use crate::steering::{Reference, SteeringVector, MIN_DISTANCE};
use crate::trajectory::{moving_frame, Trajectory};
use crate::types::{BeamError, BeamResult};

/// Default number of input samples pulled from the source per read
pub(crate) const READ_LEN: usize = 2048;

/// Floor of the Doppler denominator `1 - M_r`
const MIN_CONVECTIVE: f64 = 1e-6;

/// Output of a time-domain beamformer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeMode {
    /// Reconstructed source signal
    #[default]
    Plain,
    /// Squared signal; `r_diag` removes the microphone autopowers
    Squared { r_diag: bool },
}

impl HashValue for TimeMode {
    fn hash_into(&self, hasher: &mut sha2::Sha256) {
        match self {
            TimeMode::Plain => "plain".hash_into(hasher),
            TimeMode::Squared { r_diag } => {
                "squared".hash_into(hasher);
                r_diag.hash_into(hasher);
            }
        }
    }
}

impl TimeMode {
    /// Combine the per-microphone contributions of one grid point.
    pub(crate) fn combine(&self, contributions: &[f64]) -> f64 {
        let sum: f64 = contributions.iter().sum();
        match self {
            TimeMode::Plain => sum,
            TimeMode::Squared { r_diag: false } => sum * sum,
            TimeMode::Squared { r_diag: true } => {
                let auto: f64 = contributions.iter().map(|t| t * t).sum();
                (sum * sum - auto).clamp(1e-100, 1e100)
            }
        }
    }
}

/// Spatial microphone weighting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Weights {
    #[default]
    None,
    /// Equal power per unit array area
    ConstPower,
}

impl Weights {
    pub fn name(&self) -> &'static str {
        match self {
            Weights::None => "none",
            Weights::ConstPower => "power",
        }
    }

    /// Weight of every microphone.
    pub fn compute(&self, mics: &MicGeometry) -> Vec<f64> {
        match self {
            Weights::None => vec![1.0; mics.num_mics()],
            Weights::ConstPower => const_power_weights(mics),
        }
    }
}

/// Weights that equalise the array power per annulus area.
///
/// Radii relative to the outermost microphone are rounded to 0.1. Each
/// distinct ring gets `sqrt(annulus area / microphones on the ring)`, with
/// annuli bounded halfway between neighbouring rings. Weights are
/// normalised to a mean of one over the rings.
pub fn const_power_weights(mics: &MicGeometry) -> Vec<f64> {
    let radii: Vec<f64> = mics.positions().iter().map(|p| p.norm()).collect();
    let r_max = radii.iter().copied().fold(0.0, f64::max);
    if r_max <= 0.0 {
        return vec![1.0; radii.len()];
    }
    let rel: Vec<f64> = radii.iter().map(|r| (r / r_max * 10.0).round() / 10.0).collect();
    let mut rings = rel.clone();
    rings.sort_by(f64::total_cmp);
    rings.dedup();
    if rings.len() < 2 {
        return vec![1.0; radii.len()];
    }

    let mids: Vec<f64> = rings.windows(2).map(|w| 0.5 * (w[0] + w[1])).collect();
    let last_mid = mids[mids.len() - 1];
    let outer = 1.5 * rings[rings.len() - 1] - 0.5 * last_mid;
    let mut edges = Vec::with_capacity(rings.len() + 1);
    edges.push(0.0);
    edges.extend_from_slice(&mids);
    edges.push(outer);

    let ring_of = |r: f64| rings.iter().position(|x| *x == r).unwrap_or(0);
    let mut count = vec![0usize; rings.len()];
    for r in &rel {
        count[ring_of(*r)] += 1;
    }
    let ring_weights: Vec<f64> = (0..rings.len())
        .map(|k| ((edges[k + 1].powi(2) - edges[k].powi(2)) / count[k] as f64).sqrt())
        .collect();
    let mean = ring_weights.iter().sum::<f64>() / ring_weights.len() as f64;
    rel.iter().map(|r| ring_weights[ring_of(*r)] / mean).collect()
}

/// Delays and interpolation coefficients for one focus position
#[derive(Debug, Clone)]
pub(crate) struct Focus {
    mics: usize,
    /// `[points × mics]`, all below
    delays: Vec<f64>,
    coeffs: Vec<f64>,
    /// Pressure at each microphone per unit pressure at the reference distance
    gains: Vec<f64>,
    min_delay: f64,
    max_delay: f64,
}

impl Focus {
    /// Focus for explicit point positions moving with `velocity`.
    pub(crate) fn new(
        points: &[Point3],
        mics: &MicGeometry,
        reference: Reference,
        weights: &[f64],
        seconds_per_meter: f64,
        velocity: Point3,
    ) -> Self {
        let m = mics.num_mics();
        let mut focus = Self::with_capacity(m, points.len());
        for p in points {
            let rm: Vec<f64> = mics.positions().iter().map(|mic| p.distance_to(mic)).collect();
            let r0 = match reference {
                Reference::Position(r) => p.distance_to(&r),
                Reference::Distance(d) => d,
            };
            let convective: Vec<f64> = mics
                .positions()
                .iter()
                .zip(&rm)
                .map(|(mic, r)| {
                    let mach = velocity.dot(&(*mic - *p)) / r.max(MIN_DISTANCE) * seconds_per_meter;
                    1.0 / (1.0 - mach).max(MIN_CONVECTIVE)
                })
                .collect();
            focus.push_point(&rm, r0, weights, seconds_per_meter, &convective);
        }
        focus.finish()
    }

    /// Focus of a moving grid for output sample `n`, delays in samples.
    pub(crate) fn moving(
        steer: &SteeringVector,
        motion: &GridMotion,
        grid_points: &[Point3],
        weights: &[f64],
        sample_rate: f64,
        n: usize,
    ) -> Self {
        let t = n as f64 / sample_rate;
        let positions = motion.positions(grid_points, t);
        let velocity = motion.trajectory.state_at(t).velocity;
        let spm = 1.0 / steer.environment().speed_of_sound();
        Self::new(&positions, steer.mics(), steer.reference(), weights, spm, velocity).in_samples(sample_rate)
    }

    /// Focus on the static grid of a steering vector.
    pub(crate) fn from_steer(steer: &SteeringVector, weights: &[f64]) -> Self {
        let spm = 1.0 / steer.environment().speed_of_sound();
        let still = vec![1.0; steer.num_mics()];
        let mut focus = Self::with_capacity(steer.num_mics(), steer.grid_size());
        for g in 0..steer.grid_size() {
            focus.push_point(steer.rm(g), steer.r0(g), weights, spm, &still);
        }
        focus.finish()
    }

    fn with_capacity(mics: usize, points: usize) -> Self {
        Self {
            mics,
            delays: Vec::with_capacity(points * mics),
            coeffs: Vec::with_capacity(points * mics),
            gains: Vec::with_capacity(points * mics),
            min_delay: 0.0,
            max_delay: 0.0,
        }
    }

    fn push_point(&mut self, rm: &[f64], r0: f64, weights: &[f64], scale: f64, convective: &[f64]) {
        let r0 = r0.max(MIN_DISTANCE);
        let norm: f64 = rm
            .iter()
            .zip(weights)
            .map(|(r, w)| w / r.max(MIN_DISTANCE).powi(2))
            .sum::<f64>()
            * r0;
        for ((r, w), conv) in rm.iter().zip(weights).zip(convective) {
            let rc = r.max(MIN_DISTANCE);
            self.delays.push(r * scale);
            self.coeffs.push(w / (norm * rc));
            self.gains.push(r0 / rc * conv);
        }
    }

    fn finish(mut self) -> Self {
        let min_delay = self.delays.iter().copied().fold(f64::INFINITY, f64::min);
        self.min_delay = if min_delay.is_finite() { min_delay } else { 0.0 };
        self.max_delay = self.delays.iter().copied().fold(0.0, f64::max);
        self
    }

    /// Convert delays from seconds to samples.
    pub(crate) fn in_samples(mut self, sample_rate: f64) -> Self {
        for d in &mut self.delays {
            *d *= sample_rate;
        }
        self.min_delay *= sample_rate;
        self.max_delay *= sample_rate;
        self
    }

    pub(crate) fn points(&self) -> usize {
        self.delays.len() / self.mics.max(1)
    }

    pub(crate) fn delays(&self, g: usize) -> &[f64] {
        &self.delays[g * self.mics..(g + 1) * self.mics]
    }

    pub(crate) fn coeffs(&self, g: usize) -> &[f64] {
        &self.coeffs[g * self.mics..(g + 1) * self.mics]
    }

    pub(crate) fn gains(&self, g: usize) -> &[f64] {
        &self.gains[g * self.mics..(g + 1) * self.mics]
    }

    pub(crate) fn min_delay(&self) -> f64 {
        self.min_delay
    }

    /// Highest input index needed for output sample `n`.
    pub(crate) fn last_index(&self, n: usize) -> usize {
        n + self.max_delay.floor() as usize + 1
    }
}

/// Linear interpolation at a fractional position.
#[inline]
pub(crate) fn interpolate(x: &[f64], pos: f64) -> f64 {
    let i = pos.floor();
    let frac = pos - i;
    let i = i as usize;
    (1.0 - frac) * x[i] + frac * x[i + 1]
}

/// Moving focus grid: translated along a trajectory, optionally rotated
#[derive(Debug, Clone, PartialEq)]
pub struct GridMotion {
    pub trajectory: Trajectory,
    /// Rotate the grid with the direction of motion; the grid y axis is
    /// `rvec × velocity`
    pub rvec: Option<Point3>,
}

impl GridMotion {
    /// Grid point positions at time `t`.
    pub fn positions(&self, points: &[Point3], t: f64) -> Vec<Point3> {
        let state = self.trajectory.state_at(t);
        let frame = self.rvec.and_then(|r| moving_frame(&state.velocity, &r));
        points
            .iter()
            .map(|p| match frame {
                Some([dx, dy, dz]) => state.position + dx * p.x + dy * p.y + dz * p.z,
                None => state.position + *p,
            })
            .collect()
    }

    pub fn digest(&self) -> String {
        ContentHasher::new("GridMotion")
            .field("trajectory", &self.trajectory.digest())
            .field("rvec", &self.rvec)
            .finish()
    }
}

/// Streaming time-domain beamformer
pub struct TimeBeamformer {
    source: Box<dyn BlockSource>,
    steer: Arc<SteeringVector>,
    weights: Weights,
    mode: TimeMode,
    motion: Option<GridMotion>,
    read_len: usize,
    state: Option<StreamState>,
}

struct StreamState {
    mic_weights: Vec<f64>,
    grid_points: Vec<Point3>,
    fixed: Option<Arc<Focus>>,
    /// Per channel, starting at absolute sample `start`
    buffer: Vec<Vec<f64>>,
    start: usize,
    exhausted: bool,
    next_output: usize,
}

impl std::fmt::Debug for TimeBeamformer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeBeamformer")
            .field("steer", &self.steer.digest())
            .field("weights", &self.weights)
            .field("mode", &self.mode)
            .field("motion", &self.motion)
            .finish()
    }
}

impl TimeBeamformer {
    pub fn new(source: Box<dyn BlockSource>, steer: Arc<SteeringVector>) -> BeamResult<Self> {
        if source.channel_count() != steer.num_mics() {
            return Err(BeamError::shape(
                "time beamformer channels",
                steer.num_mics(),
                source.channel_count(),
            ));
        }
        Ok(Self {
            source,
            steer,
            weights: Weights::None,
            mode: TimeMode::Plain,
            motion: None,
            read_len: READ_LEN,
            state: None,
        })
    }

    pub fn weights(mut self, weights: Weights) -> Self {
        self.weights = weights;
        self.state = None;
        self
    }

    pub fn mode(mut self, mode: TimeMode) -> Self {
        self.mode = mode;
        self
    }

    /// Move the focus grid along a trajectory.
    pub fn trajectory(mut self, trajectory: Trajectory) -> Self {
        self.motion = Some(GridMotion {
            trajectory,
            rvec: self.motion.take().and_then(|m| m.rvec),
        });
        self.state = None;
        self
    }

    /// Rotate a moving grid; requires [`Self::trajectory`].
    pub fn rvec(mut self, rvec: Point3) -> BeamResult<Self> {
        let Some(motion) = self.motion.as_mut() else {
            return Err(BeamError::config("rvec needs a trajectory for the focus grid"));
        };
        motion.rvec = Some(rvec);
        self.state = None;
        Ok(self)
    }

    pub fn steer(&self) -> &Arc<SteeringVector> {
        &self.steer
    }

    pub fn time_mode(&self) -> TimeMode {
        self.mode
    }

    fn prepare(&mut self) {
        if self.state.is_some() {
            return;
        }
        let steer = &self.steer;
        let mic_weights = self.weights.compute(steer.mics());
        let fixed = match self.motion {
            Some(_) => None,
            None => Some(Arc::new(
                Focus::from_steer(steer, &mic_weights).in_samples(self.source.sample_rate()),
            )),
        };
        tracing::debug!(
            grid_points = steer.grid_size(),
            mics = steer.num_mics(),
            moving = self.motion.is_some(),
            weights = self.weights.name(),
            "time beamformer prepared"
        );
        self.state = Some(StreamState {
            mic_weights,
            grid_points: steer.grid().points(),
            fixed,
            buffer: vec![Vec::new(); steer.num_mics()],
            start: 0,
            exhausted: false,
            next_output: 0,
        });
    }
}

impl StreamState {
    fn focus_at(
        &self,
        steer: &SteeringVector,
        motion: Option<&GridMotion>,
        sample_rate: f64,
        n: usize,
    ) -> Arc<Focus> {
        match (&self.fixed, motion) {
            (Some(fixed), _) => fixed.clone(),
            (None, Some(motion)) => Arc::new(Focus::moving(
                steer,
                motion,
                &self.grid_points,
                &self.mic_weights,
                sample_rate,
                n,
            )),
            (None, None) => Arc::new(Focus::from_steer(steer, &self.mic_weights).in_samples(sample_rate)),
        }
    }

    /// Buffer input up to absolute index `last`; false once the source ends first.
    fn fill_until(&mut self, source: &mut dyn BlockSource, last: usize, read_len: usize) -> BeamResult<bool> {
        let channels = self.buffer.len();
        while self.start + self.buffer[0].len() <= last {
            if self.exhausted {
                return Ok(false);
            }
            match source.next_block(read_len)? {
                Some(block) => {
                    if block.channels() != channels {
                        return Err(BeamError::shape("time beamformer block", channels, block.channels()));
                    }
                    for i in 0..block.len() {
                        for (buf, v) in self.buffer.iter_mut().zip(block.frame(i)) {
                            buf.push(*v);
                        }
                    }
                }
                None => self.exhausted = true,
            }
        }
        Ok(true)
    }

    /// Drop samples before absolute index `index` once enough have piled up.
    fn discard_before(&mut self, index: usize, min_chunk: usize) {
        if index > self.start + min_chunk {
            let drop = (index - self.start).min(self.buffer[0].len());
            for buf in &mut self.buffer {
                buf.drain(..drop);
            }
            self.start += drop;
        }
    }
}

impl BlockSource for TimeBeamformer {
    fn sample_rate(&self) -> f64 {
        self.source.sample_rate()
    }

    fn channel_count(&self) -> usize {
        self.steer.grid_size()
    }

    fn num_samples(&self) -> Option<usize> {
        if self.motion.is_some() {
            return None;
        }
        let fs = self.source.sample_rate();
        let c = self.steer.environment().speed_of_sound();
        let total = self.source.num_samples()?;
        let max_delay = (0..self.steer.grid_size())
            .flat_map(|g| self.steer.rm(g).iter().copied())
            .fold(0.0, f64::max)
            * fs
            / c;
        Some(total.saturating_sub(max_delay.floor() as usize + 1))
    }

    fn next_block(&mut self, max_len: usize) -> BeamResult<Option<SampleBlock>> {
        self.prepare();
        let fs = self.source.sample_rate();
        let points = self.steer.grid_size();
        let Some(state) = self.state.as_mut() else {
            return Ok(None);
        };
        let mut out = Vec::with_capacity(max_len * points);
        let mut contributions = vec![0.0; self.steer.num_mics()];
        let mut produced = 0;

        while produced < max_len {
            let n = state.next_output;
            let focus = state.focus_at(&self.steer, self.motion.as_ref(), fs, n);
            if !state.fill_until(self.source.as_mut(), focus.last_index(n), self.read_len)? {
                break;
            }
            let offset = n as f64 - state.start as f64;
            for g in 0..focus.points() {
                for (m, (d, coeff)) in focus.delays(g).iter().zip(focus.coeffs(g)).enumerate() {
                    contributions[m] = coeff * interpolate(&state.buffer[m], offset + d);
                }
                out.push(self.mode.combine(&contributions));
            }
            state.next_output += 1;
            produced += 1;
            // delays change by less than one sample per output sample
            state.discard_before(n + focus.min_delay().floor() as usize, self.read_len);
        }
        if produced == 0 {
            return Ok(None);
        }
        SampleBlock::new(out, points).map(Some)
    }

    fn reset(&mut self) -> BeamResult<()> {
        self.source.reset()?;
        self.state = None;
        Ok(())
    }

    fn digest(&self) -> String {
        ContentHasher::new("TimeBeamformer")
            .field("steer", &self.steer.digest())
            .field("source", &self.source.digest())
            .field("weights", self.weights.name())
            .field("mode", &self.mode)
            .field("motion", &self.motion.as_ref().map(|m| m.digest()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beamformer::testutil::steer;
    use crate::beamformer::argmax;
    use crate::source::{read_channels, MemorySource};
    use crate::steering::SteerType;
    use crate::time_domain::testutil::{simulate, FS};
    use approx::assert_relative_eq;

    // ========================================================================
    // Weights and output modes
    // ========================================================================

    #[test]
    fn test_const_power_weights_ring_and_center() {
        let sv = steer(SteerType::Classic);
        let w = const_power_weights(sv.mics());
        // rings at relative radius 0 and 1, annulus edges 0, 0.5, 1.25
        let center = 0.5;
        let ring = ((1.25f64.powi(2) - 0.25) / 8.0).sqrt();
        assert_relative_eq!(w[8] / w[0], center / ring, epsilon = 1e-12);
        assert_relative_eq!(w[8] + w[0], 2.0, epsilon = 1e-12);
        for m in 1..8 {
            assert_relative_eq!(w[m], w[0], epsilon = 1e-12);
        }
    }

    #[test]
    fn test_const_power_weights_single_ring() {
        let mics = MicGeometry::from_xyz(&[[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [-1.0, 0.0, 0.0]]).unwrap();
        assert_eq!(const_power_weights(&mics), vec![1.0; 3]);
    }

    #[test]
    fn test_mode_combine() {
        assert_eq!(TimeMode::Plain.combine(&[1.0, 2.0]), 3.0);
        assert_eq!(TimeMode::Squared { r_diag: false }.combine(&[1.0, 2.0]), 9.0);
        assert_eq!(TimeMode::Squared { r_diag: true }.combine(&[1.0, 2.0]), 4.0);
        // cancelling contributions clip to the floor
        assert_eq!(TimeMode::Squared { r_diag: true }.combine(&[1.0, -1.0]), 1e-100);
    }

    // ========================================================================
    // Streaming beamformer
    // ========================================================================

    #[test]
    fn test_plain_output_reconstructs_source_signal() {
        let sv = steer(SteerType::Classic);
        let src = simulate(&sv, 7, 2048, &[1000.0]);
        let mut bf = TimeBeamformer::new(Box::new(src), sv).unwrap();
        let expected_len = bf.num_samples().unwrap();
        let out = read_channels(&mut bf, 300).unwrap();
        assert_eq!(out.len(), 25);
        assert_eq!(out[7].len(), expected_len);
        for (n, y) in out[7].iter().enumerate() {
            let q = (2.0 * std::f64::consts::PI * 1000.0 * n as f64 / FS).sin();
            assert!((y - q).abs() < 5e-3, "sample {n}: {y} vs {q}");
        }
    }

    #[test]
    fn test_squared_output_peaks_at_source() {
        let sv = steer(SteerType::Classic);
        for r_diag in [false, true] {
            let src = simulate(&sv, 18, 2048, &[2000.0, 2900.0, 3700.0, 4600.0, 5300.0]);
            let mut bf = TimeBeamformer::new(Box::new(src), sv.clone())
                .unwrap()
                .mode(TimeMode::Squared { r_diag });
            let out = read_channels(&mut bf, 512).unwrap();
            let power: Vec<f64> = out.iter().map(|ch| ch.iter().sum::<f64>() / ch.len() as f64).collect();
            assert_eq!(argmax(&power).unwrap().0, 18, "r_diag = {r_diag}");
        }
    }

    #[test]
    fn test_block_size_does_not_change_output() {
        let sv = steer(SteerType::Classic);
        let run = |len: usize| {
            let src = simulate(&sv, 3, 1500, &[1500.0, 4100.0]);
            let mut bf = TimeBeamformer::new(Box::new(src), sv.clone()).unwrap();
            read_channels(&mut bf, len).unwrap()
        };
        assert_eq!(run(1), run(777));
    }

    #[test]
    fn test_resting_trajectory_matches_static_grid() {
        let sv = steer(SteerType::Classic);
        let fixed = {
            let mut bf = TimeBeamformer::new(Box::new(simulate(&sv, 12, 1024, &[2500.0])), sv.clone()).unwrap();
            read_channels(&mut bf, 256).unwrap()
        };
        let moving = {
            let mut bf = TimeBeamformer::new(Box::new(simulate(&sv, 12, 1024, &[2500.0])), sv.clone())
                .unwrap()
                .trajectory(Trajectory::Static {
                    position: Point3::origin(),
                });
            assert_eq!(bf.num_samples(), None);
            read_channels(&mut bf, 256).unwrap()
        };
        assert_eq!(fixed[0].len(), moving[0].len());
        for (a, b) in fixed.iter().zip(&moving) {
            for (x, y) in a.iter().zip(b) {
                assert_relative_eq!(x, y, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_reset_replays_stream() {
        let sv = steer(SteerType::Classic);
        let mut bf = TimeBeamformer::new(Box::new(simulate(&sv, 5, 800, &[3000.0])), sv).unwrap();
        let first = read_channels(&mut bf, 128).unwrap();
        bf.reset().unwrap();
        assert_eq!(read_channels(&mut bf, 64).unwrap(), first);
    }

    #[test]
    fn test_grid_rotation_follows_motion() {
        let motion = GridMotion {
            trajectory: Trajectory::Linear {
                start: Point3::new(0.0, 0.0, 1.0),
                velocity: Point3::new(0.0, 5.0, 0.0),
            },
            rvec: Some(Point3::new(0.0, 0.0, 1.0)),
        };
        let p = motion.positions(&[Point3::new(1.0, 0.0, 0.0)], 0.0);
        assert_relative_eq!(p[0].x, 0.0, epsilon = 1e-12);
        assert_relative_eq!(p[0].y, 1.0, epsilon = 1e-12);
        assert_relative_eq!(p[0].z, 1.0, epsilon = 1e-12);
        let translated = GridMotion { rvec: None, ..motion };
        let q = translated.positions(&[Point3::new(1.0, 0.0, 0.0)], 0.2);
        assert_relative_eq!(q[0].x, 1.0, epsilon = 1e-12);
        assert_relative_eq!(q[0].y, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_configuration_errors() {
        let sv = steer(SteerType::Classic);
        let two = MemorySource::from_channels(vec![vec![0.0; 10]; 2], FS).unwrap();
        assert!(matches!(
            TimeBeamformer::new(Box::new(two), sv.clone()),
            Err(BeamError::DataShape { .. })
        ));
        let bf = TimeBeamformer::new(Box::new(simulate(&sv, 0, 100, &[1000.0])), sv).unwrap();
        assert!(matches!(bf.rvec(Point3::new(0.0, 0.0, 1.0)), Err(BeamError::Configuration(_))));
    }

    #[test]
    fn test_short_input_yields_nothing() {
        let sv = steer(SteerType::Classic);
        // the largest delay, about 170 samples, exceeds the input length
        let mut bf = TimeBeamformer::new(Box::new(simulate(&sv, 0, 100, &[1000.0])), sv).unwrap();
        assert_eq!(bf.num_samples(), Some(0));
        assert!(bf.next_block(64).unwrap().is_none());
    }
}
