//! Cross-spectral matrix estimation
//!
//! Welch-style averaged periodograms of all channel pairs. Blocks are pulled
//! from a [`BlockSource`] in stream order into a per-channel buffer; every
//! `hop = block_size - round(overlap * block_size)` samples one frame is
//! windowed, transformed and its outer product accumulated.
//!
//! ## Scaling
//!
//! ```text
//! C_k = 2 / (N · Σw² · frames) · Σ_frames X_k X_k^H
//! ```
//!
//! so that summing the diagonal over all one-sided bins gives the mean
//! squared signal of each channel (exact for zero-mean signals without DC
//! or Nyquist content). A cosine of amplitude `A` centred on bin `k` and
//! analysed with a rectangular window yields `C_k[i,i] = A²/2`.
//!
//! ## Example
//!
//! ```rust
//! use sonomap_core::cache::Cache;
//! use sonomap_core::source::MemorySource;
//! use sonomap_core::spectra::PowerSpectra;
//! use sonomap_core::window::Window;
//!
//! let fs = 1024.0;
//! let x: Vec<f64> = (0..1024)
//!     .map(|i| (2.0 * std::f64::consts::PI * 64.0 * i as f64 / fs).cos())
//!     .collect();
//! let mut source = MemorySource::from_channels(vec![x.clone(), x], fs).unwrap();
//!
//! let ps = PowerSpectra::builder()
//!     .block_size(128)
//!     .window(Window::Rectangular)
//!     .build()
//!     .unwrap();
//! let csm = ps.csm(&mut source, &Cache::disabled()).unwrap();
//! let bin = csm.bin_index(64.0).unwrap();
//! assert!((csm.matrix(bin).get(0, 0).re - 0.5).abs() < 1e-9);
//! ```

use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};

use crate::cache::{ArrayRecord, Cache, CachePolicy, Cacheable, ContentHasher, DType, Fingerprint};
use crate::fft_utils::{rfft_frequencies, RealFft};
use crate::linalg::{CMatrix, HermitianEigen};
use crate::source::BlockSource;
use crate::types::{BeamError, BeamResult};
use crate::window::Window;

/// Requested analysis frequency range
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrequencyRange {
    /// Every one-sided bin, DC to Nyquist
    #[default]
    Full,
    /// Half-open bin index range `low..high`
    Indices { low: usize, high: usize },
    /// Closed frequency range in Hz
    Hz { low: f64, high: f64 },
}

/// CSM estimator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerSpectra {
    /// FFT length in samples
    pub block_size: usize,
    /// Block overlap fraction in `[0, 1)`
    pub overlap: f64,
    pub window: Window,
    pub freq_range: FrequencyRange,
    /// Overrides the cache default for this estimator
    pub cache_policy: Option<CachePolicy>,
}

impl Default for PowerSpectra {
    fn default() -> Self {
        Self {
            block_size: 128,
            overlap: 0.0,
            window: Window::Rectangular,
            freq_range: FrequencyRange::Full,
            cache_policy: None,
        }
    }
}

/// Builder for [`PowerSpectra`]
#[derive(Debug, Clone, Default)]
pub struct PowerSpectraBuilder {
    inner: PowerSpectra,
}

impl PowerSpectraBuilder {
    pub fn block_size(mut self, block_size: usize) -> Self {
        self.inner.block_size = block_size;
        self
    }

    pub fn overlap(mut self, overlap: f64) -> Self {
        self.inner.overlap = overlap;
        self
    }

    pub fn window(mut self, window: Window) -> Self {
        self.inner.window = window;
        self
    }

    pub fn freq_range(mut self, range: FrequencyRange) -> Self {
        self.inner.freq_range = range;
        self
    }

    pub fn cache_policy(mut self, policy: CachePolicy) -> Self {
        self.inner.cache_policy = Some(policy);
        self
    }

    /// Validate and build.
    pub fn build(self) -> BeamResult<PowerSpectra> {
        self.inner.validate()?;
        Ok(self.inner)
    }
}

impl PowerSpectra {
    pub fn builder() -> PowerSpectraBuilder {
        PowerSpectraBuilder::default()
    }

    /// Check the parameters that do not depend on a source.
    pub fn validate(&self) -> BeamResult<()> {
        if self.block_size < 2 {
            return Err(BeamError::config(format!(
                "block size must be at least 2, got {}",
                self.block_size
            )));
        }
        if !(self.overlap.is_finite() && (0.0..1.0).contains(&self.overlap)) {
            return Err(BeamError::config(format!(
                "overlap must be in [0, 1), got {}",
                self.overlap
            )));
        }
        if let FrequencyRange::Hz { low, high } = self.freq_range {
            if !(low.is_finite() && high.is_finite()) || low > high {
                return Err(BeamError::config(format!(
                    "invalid frequency range [{}, {}] Hz",
                    low, high
                )));
            }
        }
        Ok(())
    }

    /// Samples between consecutive frames.
    pub fn hop(&self) -> usize {
        let overlap = (self.overlap * self.block_size as f64).round() as usize;
        self.block_size.saturating_sub(overlap).max(1)
    }

    /// Number of one-sided bins.
    pub fn num_bins(&self) -> usize {
        self.block_size / 2 + 1
    }

    /// Bin center frequencies for every one-sided bin.
    pub fn fftfreq(&self, sample_rate: f64) -> Vec<f64> {
        rfft_frequencies(self.block_size, sample_rate)
    }

    /// Half-open bin range `(ind_low, ind_high)` for the configured range.
    ///
    /// Derived from the current block size, sample rate and range on every
    /// call.
    pub fn bin_range(&self, sample_rate: f64) -> BeamResult<(usize, usize)> {
        self.validate()?;
        let nbins = self.num_bins();
        let (low, high) = match self.freq_range {
            FrequencyRange::Full => (0, nbins),
            FrequencyRange::Indices { low, high } => (low, high.min(nbins)),
            FrequencyRange::Hz { low, high } => {
                let df = sample_rate / self.block_size as f64;
                let lo = (low / df - 1e-9).ceil().max(0.0) as usize;
                let hi = ((high / df + 1e-9).floor().max(-1.0) + 1.0) as usize;
                (lo, hi.min(nbins))
            }
        };
        if low >= high {
            return Err(BeamError::config(format!(
                "frequency range {:?} selects no bin (block size {}, fs {} Hz)",
                self.freq_range, self.block_size, sample_rate
            )));
        }
        Ok((low, high))
    }

    /// Bin indices in range.
    pub fn indices(&self, sample_rate: f64) -> BeamResult<Vec<usize>> {
        let (lo, hi) = self.bin_range(sample_rate)?;
        Ok((lo..hi).collect())
    }

    /// Frequencies of the bins in range.
    pub fn frequencies(&self, sample_rate: f64) -> BeamResult<Vec<f64>> {
        let (lo, hi) = self.bin_range(sample_rate)?;
        Ok(self.fftfreq(sample_rate)[lo..hi].to_vec())
    }

    fn fingerprint(&self, class: &str, source: &dyn BlockSource) -> BeamResult<Fingerprint> {
        let (lo, hi) = self.bin_range(source.sample_rate())?;
        Ok(Fingerprint::builder(class)
            .param("block_size", &self.block_size)
            .param("overlap", &self.overlap)
            .param("window", self.window.name())
            .param("ind_low", &lo)
            .param("ind_high", &hi)
            .data(&source.digest())
            .build())
    }

    /// Cross-spectral matrices for every bin in range, through the cache.
    pub fn csm(&self, source: &mut dyn BlockSource, cache: &Cache) -> BeamResult<Arc<CrossSpectra>> {
        let fp = self.fingerprint("PowerSpectra", source)?;
        let policy = cache.resolve(self.cache_policy);
        cache.get_or_compute(&fp, policy, || self.compute_csm(source))
    }

    /// Eigendecomposition of every CSM in range, through the cache.
    pub fn eigen(&self, source: &mut dyn BlockSource, cache: &Cache) -> BeamResult<Arc<EigenSpectra>> {
        let fp = self.fingerprint("EigenSpectra", source)?;
        let policy = cache.resolve(self.cache_policy);
        let csm = self.csm(source, cache)?;
        cache.get_or_compute(&fp, policy, || Ok(EigenSpectra::from_csm(&csm)))
    }

    /// Estimate the CSM without touching any cache.
    pub fn compute_csm(&self, source: &mut dyn BlockSource) -> BeamResult<CrossSpectra> {
        self.validate()?;
        let fs = source.sample_rate();
        let channels = source.channel_count();
        let bs = self.block_size;
        if let Some(n) = source.num_samples() {
            if bs > n {
                return Err(BeamError::config(format!(
                    "block size {} exceeds stream length {}",
                    bs, n
                )));
            }
        }
        let (lo, hi) = self.bin_range(fs)?;
        let hop = self.hop();
        tracing::debug!(
            block_size = bs,
            hop,
            window = %self.window,
            ind_low = lo,
            ind_high = hi,
            channels,
            "estimating cross-spectral matrix"
        );

        source.reset()?;
        let window = self.window.generate(bs);
        let mut fft = RealFft::new(bs);
        let mut acc = vec![CMatrix::zeros(channels); hi - lo];
        let mut spectra = vec![vec![Complex64::new(0.0, 0.0); channels]; hi - lo];
        let mut buffers: Vec<Vec<f64>> = vec![Vec::with_capacity(2 * bs); channels];
        let mut frames = 0usize;

        while let Some(block) = source.next_block(bs)? {
            if block.channels() != channels {
                return Err(BeamError::shape("cross-spectral matrix", channels, block.channels()));
            }
            for i in 0..block.len() {
                for (buf, v) in buffers.iter_mut().zip(block.frame(i)) {
                    buf.push(*v);
                }
            }
            while buffers.first().map_or(false, |b| b.len() >= bs) {
                for (ch, buf) in buffers.iter().enumerate() {
                    let bins = fft.process_windowed(&buf[..bs], &window);
                    for (b, k) in (lo..hi).enumerate() {
                        spectra[b][ch] = bins[k];
                    }
                }
                for (m, s) in acc.iter_mut().zip(&spectra) {
                    m.add_outer_upper(s, 1.0);
                }
                frames += 1;
                for buf in buffers.iter_mut() {
                    buf.drain(..hop.min(buf.len()));
                }
            }
        }

        if frames == 0 {
            return Err(BeamError::config(format!(
                "block size {} exceeds stream length; no frame could be formed",
                bs
            )));
        }

        let scale = 2.0 / (bs as f64 * self.window.power_sum(bs) * frames as f64);
        for m in acc.iter_mut() {
            m.scale(scale);
            m.mirror_upper();
        }
        tracing::debug!(frames, bins = acc.len(), "cross-spectral matrix complete");

        CrossSpectra::from_matrices(fs, bs, lo, frames, acc)
    }
}

/// Cross-spectral matrices over a contiguous bin range
#[derive(Debug, Clone)]
pub struct CrossSpectra {
    sample_rate: f64,
    block_size: usize,
    ind_low: usize,
    frames: usize,
    matrices: Vec<CMatrix>,
    digest: OnceLock<String>,
}

impl CrossSpectra {
    /// Assemble from per-bin matrices starting at bin `ind_low`.
    pub fn from_matrices(
        sample_rate: f64,
        block_size: usize,
        ind_low: usize,
        frames: usize,
        matrices: Vec<CMatrix>,
    ) -> BeamResult<Self> {
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(BeamError::config(format!(
                "sample rate must be positive, got {}",
                sample_rate
            )));
        }
        if matrices.is_empty() {
            return Err(BeamError::config("cross spectra need at least one bin"));
        }
        if ind_low + matrices.len() > block_size / 2 + 1 {
            return Err(BeamError::shape(
                "cross spectra bins",
                block_size / 2 + 1 - ind_low.min(block_size / 2 + 1),
                matrices.len(),
            ));
        }
        let n = matrices[0].n();
        if let Some(bad) = matrices.iter().find(|m| m.n() != n) {
            return Err(BeamError::shape("cross spectra channels", n, bad.n()));
        }
        Ok(Self {
            sample_rate,
            block_size,
            ind_low,
            frames,
            matrices,
            digest: OnceLock::new(),
        })
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of frames averaged
    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn num_channels(&self) -> usize {
        self.matrices[0].n()
    }

    /// Number of bins held
    pub fn len(&self) -> usize {
        self.matrices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matrices.is_empty()
    }

    /// Half-open absolute bin range
    pub fn bin_range(&self) -> (usize, usize) {
        (self.ind_low, self.ind_low + self.matrices.len())
    }

    /// Absolute bin indices held
    pub fn indices(&self) -> Vec<usize> {
        (self.ind_low..self.ind_low + self.matrices.len()).collect()
    }

    pub fn frequency(&self, i: usize) -> f64 {
        (self.ind_low + i) as f64 * self.sample_rate / self.block_size as f64
    }

    /// Frequencies of the bins held
    pub fn freqs(&self) -> Vec<f64> {
        (0..self.matrices.len()).map(|i| self.frequency(i)).collect()
    }

    /// Local index of the bin nearest to `freq`, if it is held.
    pub fn bin_index(&self, freq: f64) -> Option<usize> {
        let df = self.sample_rate / self.block_size as f64;
        let k = (freq / df).round();
        if k < self.ind_low as f64 {
            return None;
        }
        let i = k as usize - self.ind_low;
        (i < self.matrices.len()).then_some(i)
    }

    /// Matrix of local bin `i`.
    pub fn matrix(&self, i: usize) -> &CMatrix {
        &self.matrices[i]
    }

    pub fn matrices(&self) -> &[CMatrix] {
        &self.matrices
    }

    /// Content digest, the upstream key of every beamformer result.
    pub fn digest(&self) -> &str {
        self.digest.get_or_init(|| {
            let mut h = ContentHasher::new("CrossSpectra")
                .field("sample_rate", &self.sample_rate)
                .field("block_size", &self.block_size)
                .field("ind_low", &self.ind_low);
            for m in &self.matrices {
                for z in m.as_slice() {
                    h.write("re", &z.re);
                    h.write("im", &z.im);
                }
            }
            h.finish()
        })
    }
}

impl Cacheable for CrossSpectra {
    fn to_record(&self) -> ArrayRecord {
        let n = self.num_channels();
        let values: Vec<Complex64> = self
            .matrices
            .iter()
            .flat_map(|m| m.as_slice().iter().copied())
            .collect();
        ArrayRecord::complex(vec![self.matrices.len(), n, n], &values)
            .with_attr("sample_rate", self.sample_rate)
            .with_attr("block_size", self.block_size as f64)
            .with_attr("ind_low", self.ind_low as f64)
            .with_attr("frames", self.frames as f64)
    }

    fn from_record(record: ArrayRecord) -> BeamResult<Self> {
        record.check(DType::Complex, 3)?;
        let (bins, n) = (record.shape[0], record.shape[1]);
        if record.shape[2] != n {
            return Err(BeamError::CacheConsistency(format!(
                "cross spectra must be square, got {}x{}",
                n, record.shape[2]
            )));
        }
        let values = record.complex_values();
        let matrices = values
            .chunks(n * n)
            .take(bins)
            .map(|c| CMatrix::from_vec(n, c.to_vec()))
            .collect::<BeamResult<Vec<_>>>()?;
        Self::from_matrices(
            record.attr("sample_rate")?,
            record.attr("block_size")? as usize,
            record.attr("ind_low")? as usize,
            record.attr("frames")? as usize,
            matrices,
        )
        .map_err(|e| BeamError::CacheConsistency(e.to_string()))
    }
}

/// Per-bin eigendecomposition of a [`CrossSpectra`]
#[derive(Debug, Clone)]
pub struct EigenSpectra {
    freqs: Vec<f64>,
    decompositions: Vec<HermitianEigen>,
}

impl EigenSpectra {
    pub fn from_csm(csm: &CrossSpectra) -> Self {
        Self {
            freqs: csm.freqs(),
            decompositions: csm.matrices().iter().map(|m| m.hermitian_eigen()).collect(),
        }
    }

    pub fn freqs(&self) -> &[f64] {
        &self.freqs
    }

    pub fn len(&self) -> usize {
        self.decompositions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decompositions.is_empty()
    }

    /// Eigenvalues of bin `i`, ascending.
    pub fn eigenvalues(&self, i: usize) -> &[f64] {
        &self.decompositions[i].values
    }

    pub fn decomposition(&self, i: usize) -> &HermitianEigen {
        &self.decompositions[i]
    }
}

impl Cacheable for EigenSpectra {
    // per bin: n rows of [v_i0 .. v_i(n-1), λ_i]
    fn to_record(&self) -> ArrayRecord {
        let n = self.decompositions.first().map_or(0, |d| d.values.len());
        let mut values = Vec::with_capacity(self.len() * n * (n + 1));
        for d in &self.decompositions {
            for i in 0..n {
                values.extend_from_slice(&d.vectors.row(i)[..n]);
                values.push(Complex64::new(d.values[i], 0.0));
            }
        }
        let mut record = ArrayRecord::complex(vec![self.len(), n, n + 1], &values);
        for (i, f) in self.freqs.iter().enumerate() {
            record = record.with_attr(&format!("freq_{}", i), *f);
        }
        record
    }

    fn from_record(record: ArrayRecord) -> BeamResult<Self> {
        record.check(DType::Complex, 3)?;
        let (bins, n) = (record.shape[0], record.shape[1]);
        if record.shape[2] != n + 1 {
            return Err(BeamError::CacheConsistency(format!(
                "eigen spectra rows must hold {} values, got {}",
                n + 1,
                record.shape[2]
            )));
        }
        let values = record.complex_values();
        let mut freqs = Vec::with_capacity(bins);
        let mut decompositions = Vec::with_capacity(bins);
        for (b, chunk) in values.chunks(n * (n + 1)).take(bins).enumerate() {
            freqs.push(record.attr(&format!("freq_{}", b))?);
            let mut vectors = Vec::with_capacity(n * n);
            let mut eigenvalues = Vec::with_capacity(n);
            for row in chunk.chunks(n + 1) {
                vectors.extend_from_slice(&row[..n]);
                eigenvalues.push(row[n].re);
            }
            decompositions.push(HermitianEigen {
                values: eigenvalues,
                vectors: CMatrix::from_vec(n, vectors)?,
            });
        }
        Ok(Self {
            freqs,
            decompositions,
        })
    }
}
