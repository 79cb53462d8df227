//! Direct (non-iterative) beamformers

use crate::cache::{Cache, FingerprintBuilder};
use crate::linalg::{dot_conj, norm_sqr, CMatrix};
use crate::types::{BeamError, BeamResult};

use super::{Beamformer, BeamformerBase};

/// Conventional delay-and-sum
#[derive(Debug, Clone)]
pub struct DelaySum {
    pub base: BeamformerBase,
}

impl DelaySum {
    pub fn new(base: BeamformerBase) -> Self {
        Self { base }
    }
}

impl Beamformer for DelaySum {
    fn name(&self) -> &'static str {
        "BeamformerBase"
    }

    fn base(&self) -> &BeamformerBase {
        &self.base
    }

    fn add_params(&self, fp: FingerprintBuilder) -> FingerprintBuilder {
        fp
    }

    fn compute(&self, csm: &CMatrix, freq: f64, _cache: &Cache) -> BeamResult<Vec<f64>> {
        Ok(self.base.delay_and_sum(csm, freq))
    }
}

/// Functional beamforming with exponent `gamma`.
///
/// `gamma = 1` reproduces delay-and-sum; larger values narrow the main lobe
/// and suppress sidelobes while keeping the peak level.
#[derive(Debug, Clone)]
pub struct Functional {
    pub base: BeamformerBase,
    pub gamma: f64,
}

impl Functional {
    pub fn new(base: BeamformerBase) -> Self {
        Self { base, gamma: 4.0 }
    }

    pub fn gamma(mut self, gamma: f64) -> Self {
        self.gamma = gamma;
        self
    }
}

impl Beamformer for Functional {
    fn name(&self) -> &'static str {
        "BeamformerFunctional"
    }

    fn base(&self) -> &BeamformerBase {
        &self.base
    }

    fn add_params(&self, fp: FingerprintBuilder) -> FingerprintBuilder {
        fp.param("gamma", &self.gamma)
    }

    fn validate(&self) -> BeamResult<()> {
        if self.base.r_diag {
            return Err(BeamError::config(
                "functional beamforming requires the CSM diagonal (r_diag = false)",
            ));
        }
        if !(self.gamma.is_finite() && self.gamma > 0.0) {
            return Err(BeamError::config(format!(
                "gamma must be positive, got {}",
                self.gamma
            )));
        }
        Ok(())
    }

    fn compute(&self, csm: &CMatrix, freq: f64, _cache: &Cache) -> BeamResult<Vec<f64>> {
        self.validate()?;
        let inv_gamma = 1.0 / self.gamma;
        let root = csm
            .hermitian_eigen()
            .reconstruct(|l| l.max(0.0).powf(inv_gamma));
        let steer = &self.base.steer;
        Ok((0..steer.grid_size())
            .map(|g| {
                let h = steer.steer(freq, g);
                let hh = norm_sqr(&h);
                if hh == 0.0 {
                    return 0.0;
                }
                let u: Vec<_> = h.iter().map(|z| z / hh.sqrt()).collect();
                hh * root.quad_form(&u).re.max(0.0).powf(self.gamma)
            })
            .collect())
    }
}

/// Minimum-variance (Capon) beamformer
#[derive(Debug, Clone)]
pub struct Capon {
    pub base: BeamformerBase,
}

impl Capon {
    pub fn new(base: BeamformerBase) -> Self {
        Self { base }
    }
}

impl Beamformer for Capon {
    fn name(&self) -> &'static str {
        "BeamformerCapon"
    }

    fn base(&self) -> &BeamformerBase {
        &self.base
    }

    fn add_params(&self, fp: FingerprintBuilder) -> FingerprintBuilder {
        fp
    }

    fn validate(&self) -> BeamResult<()> {
        if self.base.r_diag {
            return Err(BeamError::config("Capon beamforming requires r_diag = false"));
        }
        Ok(())
    }

    fn compute(&self, csm: &CMatrix, freq: f64, _cache: &Cache) -> BeamResult<Vec<f64>> {
        self.validate()?;
        let load = (1e-12 * csm.trace()).max(1e-300);
        let inv = csm.with_diagonal_loading(load).inverse()?;
        let steer = &self.base.steer;
        Ok((0..steer.grid_size())
            .map(|g| {
                let h = steer.steer(freq, g);
                let hh = norm_sqr(&h);
                let w: Vec<_> = h.iter().map(|z| z / hh).collect();
                let d = inv.quad_form(&w).re;
                if d > 0.0 {
                    1.0 / d
                } else {
                    0.0
                }
            })
            .collect())
    }
}

/// Delay-and-sum of a single CSM eigenmode
#[derive(Debug, Clone)]
pub struct Eig {
    pub base: BeamformerBase,
    /// Eigenvalue index in ascending order; `None` selects the strongest
    pub mode: Option<usize>,
}

impl Eig {
    pub fn new(base: BeamformerBase) -> Self {
        Self { base, mode: None }
    }

    pub fn mode(mut self, mode: usize) -> Self {
        self.mode = Some(mode);
        self
    }
}

impl Beamformer for Eig {
    fn name(&self) -> &'static str {
        "BeamformerEig"
    }

    fn base(&self) -> &BeamformerBase {
        &self.base
    }

    fn add_params(&self, fp: FingerprintBuilder) -> FingerprintBuilder {
        fp.param("mode", &self.mode)
    }

    fn validate(&self) -> BeamResult<()> {
        let n = self.base.steer.num_mics();
        match self.mode {
            Some(k) if k >= n => Err(BeamError::config(format!(
                "eigenmode {} out of range for {} microphones",
                k, n
            ))),
            _ => Ok(()),
        }
    }

    fn compute(&self, csm: &CMatrix, freq: f64, _cache: &Cache) -> BeamResult<Vec<f64>> {
        self.validate()?;
        let eig = csm.hermitian_eigen();
        let k = self.mode.unwrap_or_else(|| eig.max_index());
        let lambda = eig.values[k];
        let v = eig.vector(k);
        let n = v.len() as f64;
        let steer = &self.base.steer;
        Ok((0..steer.grid_size())
            .map(|g| {
                let h = steer.steer(freq, g);
                let b = lambda * dot_conj(&h, &v).norm_sqr();
                if self.base.r_diag && n > 1.0 {
                    let auto: f64 = h
                        .iter()
                        .zip(&v)
                        .map(|(x, y)| x.norm_sqr() * y.norm_sqr())
                        .sum();
                    (b - lambda * auto) * n / (n - 1.0)
                } else {
                    b
                }
            })
            .collect())
    }
}

/// MUSIC pseudo spectrum
#[derive(Debug, Clone)]
pub struct Music {
    pub base: BeamformerBase,
    /// Assumed number of sources
    pub n_sources: usize,
}

impl Music {
    pub fn new(base: BeamformerBase) -> Self {
        Self { base, n_sources: 1 }
    }

    pub fn n_sources(mut self, n: usize) -> Self {
        self.n_sources = n;
        self
    }
}

impl Beamformer for Music {
    fn name(&self) -> &'static str {
        "BeamformerMusic"
    }

    fn base(&self) -> &BeamformerBase {
        &self.base
    }

    fn add_params(&self, fp: FingerprintBuilder) -> FingerprintBuilder {
        fp.param("n_sources", &self.n_sources)
    }

    fn validate(&self) -> BeamResult<()> {
        let n = self.base.steer.num_mics();
        if self.n_sources == 0 || self.n_sources >= n {
            return Err(BeamError::config(format!(
                "MUSIC needs 1..{} sources for {} microphones, got {}",
                n - 1,
                n,
                self.n_sources
            )));
        }
        Ok(())
    }

    fn compute(&self, csm: &CMatrix, freq: f64, _cache: &Cache) -> BeamResult<Vec<f64>> {
        self.validate()?;
        let eig = csm.hermitian_eigen();
        let n = eig.values.len();
        let lambda_max = eig.values[n - 1];
        let noise: Vec<_> = (0..n - self.n_sources).map(|k| eig.vector(k)).collect();
        let steer = &self.base.steer;
        Ok((0..steer.grid_size())
            .map(|g| {
                let h = steer.steer(freq, g);
                let hh = norm_sqr(&h).sqrt();
                let u: Vec<_> = h.iter().map(|z| z / hh).collect();
                let den: f64 = noise.iter().map(|v| dot_conj(&u, v).norm_sqr()).sum();
                lambda_max / den.max(1e-12)
            })
            .collect())
    }
}
