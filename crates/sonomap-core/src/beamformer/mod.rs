//! # Frequency-Domain Beamformers
//!
//! Every beamformer maps one cross-spectral matrix and a set of steering
//! vectors to one value per grid point. [`Beamformer::result`] evaluates
//! every bin held by a [`CrossSpectra`] and caches the resulting
//! [`SourceMaps`] under a fingerprint of the algorithm parameters, the
//! steering digest and the CSM digest.
//!
//! | Variant        | Output                                   | Needs PSF |
//! |----------------|------------------------------------------|-----------|
//! | `DelaySum`     | `h^H C h`                                | no        |
//! | `Functional`   | `|h|² (u^H C^{1/γ} u)^γ`                 | no        |
//! | `Capon`        | `1 / (g^H C^{-1} g)`                     | no        |
//! | `Eig`          | delay-and-sum of one eigenmode           | no        |
//! | `Music`        | noise-subspace pseudo spectrum           | no        |
//! | `Damas`        | Gauss-Seidel NNLS of `PSF x = b`         | yes       |
//! | `DamasPlus`    | accelerated projected gradient, L1       | yes       |
//! | `Clean`        | PSF peak subtraction                     | yes       |
//! | `CleanSc`      | source-coherence peak subtraction        | no        |
//! | `Gib`          | reweighted minimum-norm inverse          | no        |
//! | `Cmf`          | non-negative CSM fit                     | no        |
//!
//! ## Example
//!
//! ```rust,ignore
//! let bf = BeamformerKind::DelaySum(DelaySum::new(BeamformerBase::new(steer)));
//! let maps = bf.result(&csm, &cache)?;
//! let map = maps.synthetic(4000.0, 3)?;  // third-octave band
//! let levels = map.to_db();
//! ```

mod base;
mod clean;
mod cmf;
mod damas;
mod gib;
pub mod solver;

pub use base::{Capon, DelaySum, Eig, Functional, Music};
pub use clean::{Clean, CleanSc};
pub(crate) use clean::{apply_loop_settings, check_loop_gain};
pub use cmf::{Cmf, CmfMethod};
pub use damas::{Damas, DamasPlus};
pub use gib::Gib;
pub use solver::{IterationMonitor, IterationState};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{ArrayRecord, Cache, CachePolicy, Cacheable, DType, Fingerprint, FingerprintBuilder};
use crate::linalg::CMatrix;
use crate::psf::{PointSpreadFunction, PsfCalcMode};
use crate::spectra::CrossSpectra;
use crate::steering::SteeringVector;
use crate::types::{level_db, BeamError, BeamResult};

/// Settings shared by every frequency-domain beamformer
#[derive(Debug, Clone)]
pub struct BeamformerBase {
    pub steer: Arc<SteeringVector>,
    /// Remove the CSM main diagonal
    pub r_diag: bool,
    /// Overrides the cache default for this beamformer
    pub cache_policy: Option<CachePolicy>,
}

impl BeamformerBase {
    pub fn new(steer: Arc<SteeringVector>) -> Self {
        Self {
            steer,
            r_diag: false,
            cache_policy: None,
        }
    }

    pub fn r_diag(mut self, r_diag: bool) -> Self {
        self.r_diag = r_diag;
        self
    }

    pub fn cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = Some(policy);
        self
    }

    /// Delay-and-sum map of one CSM, honoring `r_diag`.
    pub fn delay_and_sum(&self, csm: &CMatrix, freq: f64) -> Vec<f64> {
        let n = self.steer.num_mics() as f64;
        let diag = csm.diag();
        (0..self.steer.grid_size())
            .map(|g| {
                let h = self.steer.steer(freq, g);
                let b = csm.quad_form(&h).re;
                if self.r_diag && n > 1.0 {
                    let auto: f64 = h.iter().zip(&diag).map(|(z, d)| z.norm_sqr() * d).sum();
                    (b - auto) * n / (n - 1.0)
                } else {
                    b
                }
            })
            .collect()
    }

    fn check_csm(&self, csm: &CMatrix) -> BeamResult<()> {
        if csm.n() != self.steer.num_mics() {
            return Err(BeamError::shape("csm channels", self.steer.num_mics(), csm.n()));
        }
        Ok(())
    }
}

/// PSF source for the deconvolution beamformers
#[derive(Debug, Clone, Default)]
pub struct PsfSettings {
    pub calc_mode: PsfCalcMode,
    /// Steering used for the PSF; defaults to the beamformer's own
    pub steer: Option<Arc<SteeringVector>>,
}

impl PsfSettings {
    fn steer(&self, base: &BeamformerBase) -> BeamResult<Arc<SteeringVector>> {
        let Some(steer) = &self.steer else {
            return Ok(base.steer.clone());
        };
        if steer.steer_type() != base.steer.steer_type() {
            return Err(BeamError::config(format!(
                "psf steering '{}' differs from beamformer steering '{}'",
                steer.steer_type(),
                base.steer.steer_type()
            )));
        }
        if steer.digest() != base.steer.digest() {
            return Err(BeamError::config(
                "psf steering geometry differs from the beamformer geometry",
            ));
        }
        Ok(steer.clone())
    }

    fn psf(&self, base: &BeamformerBase, freq: f64) -> BeamResult<PointSpreadFunction> {
        let mut psf = PointSpreadFunction::new(self.steer(base)?, freq)?
            .r_diag(base.r_diag)
            .calc_mode(self.calc_mode);
        if let Some(policy) = base.cache_policy {
            psf = psf.cache_policy(policy);
        }
        Ok(psf)
    }
}

/// Common contract of the frequency-domain beamformers
pub trait Beamformer: fmt::Debug + Send + Sync {
    /// Class name used as the cache class
    fn name(&self) -> &'static str;

    fn base(&self) -> &BeamformerBase;

    /// Add the algorithm parameters to a fingerprint.
    fn add_params(&self, fp: FingerprintBuilder) -> FingerprintBuilder;

    /// Reject invalid parameter combinations.
    fn validate(&self) -> BeamResult<()> {
        Ok(())
    }

    /// Map for a single CSM at frequency `freq`.
    fn compute(&self, csm: &CMatrix, freq: f64, cache: &Cache) -> BeamResult<Vec<f64>>;

    fn fingerprint(&self, spectra: &CrossSpectra) -> Fingerprint {
        let fp = Fingerprint::builder(self.name()).param("r_diag", &self.base().r_diag);
        self.add_params(fp)
            .data(self.base().steer.digest())
            .data(spectra.digest())
            .build()
    }

    /// Maps for every bin of `spectra`, through the cache.
    fn result(&self, spectra: &CrossSpectra, cache: &Cache) -> BeamResult<Arc<SourceMaps>> {
        self.validate()?;
        let base = self.base();
        if spectra.num_channels() != base.steer.num_mics() {
            return Err(BeamError::shape(
                "csm channels",
                base.steer.num_mics(),
                spectra.num_channels(),
            ));
        }
        let fp = self.fingerprint(spectra);
        let policy = cache.resolve(base.cache_policy);
        cache.get_or_compute(&fp, policy, || {
            tracing::debug!(
                beamformer = self.name(),
                bins = spectra.len(),
                grid_points = base.steer.grid_size(),
                "evaluating beamformer"
            );
            let maps = evaluate_bins(self, spectra, cache)?;
            SourceMaps::new(spectra.freqs(), spectra.sample_rate() / spectra.block_size() as f64, maps)
        })
    }
}

#[cfg(feature = "parallel")]
fn evaluate_bins<B: Beamformer + ?Sized>(
    bf: &B,
    spectra: &CrossSpectra,
    cache: &Cache,
) -> BeamResult<Vec<Vec<f64>>> {
    use rayon::prelude::*;
    (0..spectra.len())
        .into_par_iter()
        .map(|i| compute_checked(bf, spectra, i, cache))
        .collect()
}

#[cfg(not(feature = "parallel"))]
fn evaluate_bins<B: Beamformer + ?Sized>(
    bf: &B,
    spectra: &CrossSpectra,
    cache: &Cache,
) -> BeamResult<Vec<Vec<f64>>> {
    (0..spectra.len())
        .map(|i| compute_checked(bf, spectra, i, cache))
        .collect()
}

fn compute_checked<B: Beamformer + ?Sized>(
    bf: &B,
    spectra: &CrossSpectra,
    i: usize,
    cache: &Cache,
) -> BeamResult<Vec<f64>> {
    let csm = spectra.matrix(i);
    bf.base().check_csm(csm)?;
    bf.compute(csm, spectra.frequency(i), cache)
}

/// Closed set of frequency-domain beamformers
#[derive(Debug, Clone)]
pub enum BeamformerKind {
    DelaySum(DelaySum),
    Functional(Functional),
    Capon(Capon),
    Eig(Eig),
    Music(Music),
    Damas(Damas),
    DamasPlus(DamasPlus),
    Clean(Clean),
    CleanSc(CleanSc),
    Gib(Gib),
    Cmf(Cmf),
}

impl BeamformerKind {
    fn inner(&self) -> &dyn Beamformer {
        match self {
            BeamformerKind::DelaySum(b) => b,
            BeamformerKind::Functional(b) => b,
            BeamformerKind::Capon(b) => b,
            BeamformerKind::Eig(b) => b,
            BeamformerKind::Music(b) => b,
            BeamformerKind::Damas(b) => b,
            BeamformerKind::DamasPlus(b) => b,
            BeamformerKind::Clean(b) => b,
            BeamformerKind::CleanSc(b) => b,
            BeamformerKind::Gib(b) => b,
            BeamformerKind::Cmf(b) => b,
        }
    }
}

impl Beamformer for BeamformerKind {
    fn name(&self) -> &'static str {
        self.inner().name()
    }

    fn base(&self) -> &BeamformerBase {
        self.inner().base()
    }

    fn add_params(&self, fp: FingerprintBuilder) -> FingerprintBuilder {
        self.inner().add_params(fp)
    }

    fn validate(&self) -> BeamResult<()> {
        self.inner().validate()
    }

    fn compute(&self, csm: &CMatrix, freq: f64, cache: &Cache) -> BeamResult<Vec<f64>> {
        self.inner().compute(csm, freq, cache)
    }
}

/// Per-bin maps `[bins × grid points]`
#[derive(Debug, Clone, PartialEq)]
pub struct SourceMaps {
    freqs: Vec<f64>,
    bin_width: f64,
    grid_size: usize,
    values: Vec<f64>,
}

impl SourceMaps {
    pub fn new(freqs: Vec<f64>, bin_width: f64, maps: Vec<Vec<f64>>) -> BeamResult<Self> {
        if freqs.len() != maps.len() {
            return Err(BeamError::shape("source maps bins", freqs.len(), maps.len()));
        }
        let grid_size = maps.first().map_or(0, |m| m.len());
        if let Some(bad) = maps.iter().find(|m| m.len() != grid_size) {
            return Err(BeamError::shape("source map size", grid_size, bad.len()));
        }
        Ok(Self {
            freqs,
            bin_width,
            grid_size,
            values: maps.concat(),
        })
    }

    pub fn freqs(&self) -> &[f64] {
        &self.freqs
    }

    /// Number of bins
    pub fn len(&self) -> usize {
        self.freqs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.freqs.is_empty()
    }

    pub fn grid_size(&self) -> usize {
        self.grid_size
    }

    /// Map of bin `i`
    pub fn map(&self, i: usize) -> &[f64] {
        &self.values[i * self.grid_size..(i + 1) * self.grid_size]
    }

    /// Flat `[bins × grid points]` values.
    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    /// Sum of the maps in a band around `freq`.
    ///
    /// `num = 0` selects the single bin nearest to `freq`; `num = n`
    /// sums the bins of the 1/n octave band `[f·2^(-1/2n), f·2^(1/2n))`.
    /// A band that holds no bin yields a zero map and a warning.
    pub fn synthetic(&self, freq: f64, num: u32) -> BeamResult<SourceMap> {
        if !(freq.is_finite() && freq >= 0.0) {
            return Err(BeamError::config(format!(
                "synthetic frequency must be non-negative, got {}",
                freq
            )));
        }
        let mut out = vec![0.0; self.grid_size];
        let selected: Vec<usize> = if num == 0 {
            let nearest = self
                .freqs
                .iter()
                .enumerate()
                .min_by(|a, b| (a.1 - freq).abs().total_cmp(&(b.1 - freq).abs()))
                .filter(|(_, f)| (*f - freq).abs() <= 0.5 * self.bin_width)
                .map(|(i, _)| i);
            nearest.into_iter().collect()
        } else {
            let half = 0.5 / num as f64;
            let (lo, hi) = (freq * 2f64.powf(-half), freq * 2f64.powf(half));
            (0..self.freqs.len())
                .filter(|&i| self.freqs[i] >= lo && self.freqs[i] < hi)
                .collect()
        };
        if selected.is_empty() {
            tracing::warn!(freq, num, "no frequency bin in the requested band; returning zeros");
        }
        for i in selected {
            for (o, v) in out.iter_mut().zip(self.map(i)) {
                *o += v;
            }
        }
        Ok(SourceMap::new(out))
    }
}

impl Cacheable for SourceMaps {
    // one row per bin: [freq, map..]
    fn to_record(&self) -> ArrayRecord {
        let mut values = Vec::with_capacity(self.len() * (self.grid_size + 1));
        for i in 0..self.len() {
            values.push(self.freqs[i]);
            values.extend_from_slice(self.map(i));
        }
        ArrayRecord::real(vec![self.len(), self.grid_size + 1], values)
            .with_attr("bin_width", self.bin_width)
    }

    fn from_record(record: ArrayRecord) -> BeamResult<Self> {
        record.check(DType::Real, 2)?;
        let width = record.shape[1];
        if width == 0 {
            return Err(BeamError::CacheConsistency("source maps without columns".into()));
        }
        let bin_width = record.attr("bin_width")?;
        let (freqs, maps) = record
            .values
            .chunks(width)
            .map(|row| (row[0], row[1..].to_vec()))
            .unzip();
        Self::new(freqs, bin_width, maps)
    }
}

/// One value per grid point
#[derive(Debug, Clone, PartialEq)]
pub struct SourceMap {
    values: Vec<f64>,
}

impl SourceMap {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn into_values(self) -> Vec<f64> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn sum(&self) -> f64 {
        self.values.iter().sum()
    }

    /// Index and value of the maximum.
    pub fn peak(&self) -> Option<(usize, f64)> {
        argmax(&self.values)
    }

    /// Levels in dB re 20 µPa.
    pub fn to_db(&self) -> Vec<f64> {
        self.values.iter().map(|v| level_db(*v)).collect()
    }
}

/// Index and value of the largest element.
/// Wall-clock budget as a fingerprint parameter; a budgeted solve may stop
/// early, so its result must not be shared with an unbudgeted one.
pub(crate) fn duration_ns(limit: Option<Duration>) -> Option<u64> {
    limit.map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
}

pub(crate) fn argmax(values: &[f64]) -> Option<(usize, f64)> {
    values
        .iter()
        .copied()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(&b.1))
}


#[cfg(test)]
mod tests {
    use super::*;
    use super::testutil::steer;
    use crate::steering::SteerType;
    use approx::assert_relative_eq;

    fn maps() -> SourceMaps {
        // 100 Hz spacing, bins 10..20
        let freqs: Vec<f64> = (10..20).map(|k| k as f64 * 100.0).collect();
        let maps = freqs.iter().map(|f| vec![*f / 1000.0, 1.0]).collect();
        SourceMaps::new(freqs, 100.0, maps).unwrap()
    }

    #[test]
    fn test_synthetic_single_bin() {
        let m = maps();
        let s = m.synthetic(1230.0, 0).unwrap();
        assert_relative_eq!(s.values()[0], 1.2);
        // outside the held bins
        let z = m.synthetic(5000.0, 0).unwrap();
        assert_eq!(z.values(), &[0.0, 0.0]);
    }

    #[test]
    fn test_synthetic_octave_band() {
        let m = maps();
        // octave around 1500 Hz: [1061, 2121)
        let s = m.synthetic(1500.0, 1).unwrap();
        assert_relative_eq!(s.values()[1], 9.0);
        // third octave around 1000 Hz: [891, 1122)
        let t = m.synthetic(1000.0, 3).unwrap();
        assert_relative_eq!(t.values()[1], 2.0);
        assert_relative_eq!(t.values()[0], 2.1, epsilon = 1e-12);
    }

    #[test]
    fn test_source_maps_record_round_trip() {
        let m = maps();
        let back = SourceMaps::from_record(m.to_record()).unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn test_source_map_helpers() {
        let map = SourceMap::new(vec![4e-10, 4e-8, 0.0]);
        assert_eq!(map.peak(), Some((1, 4e-8)));
        let db = map.to_db();
        assert_relative_eq!(db[0], 0.0, epsilon = 1e-12);
        assert_relative_eq!(db[1], 20.0, epsilon = 1e-12);
        assert!(db[2].is_finite());
    }

    #[test]
    fn test_psf_steering_mismatch() {
        let base = BeamformerBase::new(steer(SteerType::Classic));
        let settings = PsfSettings {
            calc_mode: PsfCalcMode::Single,
            steer: Some(steer(SteerType::TrueLevel)),
        };
        assert!(matches!(
            settings.psf(&base, 1000.0),
            Err(BeamError::Configuration(_))
        ));
        let same = PsfSettings {
            calc_mode: PsfCalcMode::Single,
            steer: Some(steer(SteerType::Classic)),
        };
        assert!(same.psf(&base, 1000.0).is_ok());
    }

    #[test]
    fn test_delay_and_sum_r_diag_of_diagonal_csm() {
        // uncorrelated equal-power noise: diagonal removal leaves nothing
        let base = BeamformerBase::new(steer(SteerType::Classic)).r_diag(true);
        let csm = CMatrix::identity(9);
        for v in base.delay_and_sum(&csm, 1000.0) {
            assert_relative_eq!(v, 0.0, epsilon = 1e-15);
        }
        let plain = BeamformerBase::new(steer(SteerType::Classic));
        for v in plain.delay_and_sum(&csm, 1000.0) {
            assert_relative_eq!(v, 1.0 / 9.0, epsilon = 1e-15);
        }
    }
}
