//! Peak-subtraction deconvolution
//!
//! [`Clean`] works on the delay-and-sum map with PSF columns fetched on
//! demand. [`CleanSc`] works on the CSM itself and removes the part of the
//! CSM coherent with each peak, so it needs no PSF.

use std::time::Duration;

use num_complex::Complex64;

use crate::cache::{Cache, FingerprintBuilder};
use crate::config::SolverConfig;
use crate::linalg::CMatrix;
use crate::types::{BeamError, BeamResult};

use super::solver::IterationMonitor;
use super::{argmax, duration_ns, Beamformer, BeamformerBase, PsfSettings};

/// Fixed-point refinements of the coherent component when the diagonal is removed
const R_DIAG_REFINEMENTS: usize = 20;

/// PSF-based CLEAN
#[derive(Debug, Clone)]
pub struct Clean {
    pub base: BeamformerBase,
    pub psf: PsfSettings,
    /// Loop gain
    pub damp: f64,
    pub n_iter: usize,
    /// Stop once the residual peak falls to `stop` times the initial peak
    pub stop: f64,
    pub max_duration: Option<Duration>,
}

impl Clean {
    pub fn new(base: BeamformerBase) -> Self {
        Self {
            base,
            psf: PsfSettings::default(),
            damp: 0.6,
            n_iter: 100,
            stop: 1e-3,
            max_duration: None,
        }
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

    pub fn psf(mut self, psf: PsfSettings) -> Self {
        self.psf = psf;
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
}

/// Shared by the CLEAN variants, which take the same loop settings.
pub(crate) fn apply_loop_settings(
    solver: &SolverConfig,
    n_iter: &mut usize,
    damp: &mut f64,
    stop: &mut f64,
    max_duration: &mut Option<Duration>,
) {
    if let Some(v) = solver.n_iter {
        *n_iter = v;
    }
    if let Some(v) = solver.damp {
        *damp = v;
    }
    if let Some(v) = solver.stop {
        *stop = v;
    }
    if let Some(limit) = solver.max_duration() {
        *max_duration = Some(limit);
    }
}

pub(crate) fn check_loop_gain(algorithm: &str, damp: f64, stop: f64) -> BeamResult<()> {
    if !(damp > 0.0 && damp <= 1.0) {
        return Err(BeamError::config(format!(
            "{} damping must be in (0, 1], got {}",
            algorithm, damp
        )));
    }
    if !(stop.is_finite() && stop >= 0.0) {
        return Err(BeamError::config(format!(
            "{} stop factor must be non-negative, got {}",
            algorithm, stop
        )));
    }
    Ok(())
}

impl Beamformer for Clean {
    fn name(&self) -> &'static str {
        "BeamformerClean"
    }

    fn base(&self) -> &BeamformerBase {
        &self.base
    }

    fn add_params(&self, fp: FingerprintBuilder) -> FingerprintBuilder {
        fp.param("damp", &self.damp)
            .param("n_iter", &self.n_iter)
            .param("stop", &self.stop)
            .param("max_duration_ns", &duration_ns(self.max_duration))
    }

    fn validate(&self) -> BeamResult<()> {
        check_loop_gain("CLEAN", self.damp, self.stop)?;
        self.psf.steer(&self.base).map(|_| ())
    }

    fn compute(&self, csm: &CMatrix, freq: f64, cache: &Cache) -> BeamResult<Vec<f64>> {
        self.validate()?;
        let mut dirty = self.base.delay_and_sum(csm, freq);
        let psf = self.psf.psf(&self.base, freq)?;
        let mut clean = vec![0.0; dirty.len()];

        let mut monitor = IterationMonitor::new("CLEAN", self.n_iter, self.max_duration);
        monitor.begin(&clean)?;
        monitor.guard(0, &dirty)?;
        let Some((_, initial_peak)) = argmax(&dirty) else {
            return Ok(clean);
        };
        let budget: f64 = dirty.iter().filter(|v| **v > 0.0).sum();
        let mut total = 0.0;

        let mut it = 0;
        while monitor.within_budget(it) {
            let Some((i, peak)) = argmax(&dirty) else { break };
            if peak <= 0.0 || peak <= self.stop * initial_peak {
                monitor.converged(it);
                return Ok(clean);
            }
            let col = psf.column(i, cache)?;
            let norm = col.values()[i];
            if norm <= 0.0 {
                tracing::warn!(freq, point = i, "psf has no response at its own source; stopping");
                break;
            }
            let mut component = self.damp * peak;
            let capped = total + component >= budget;
            if capped {
                component = (budget - total).max(0.0);
            }
            clean[i] += component;
            total += component;
            for (d, p) in dirty.iter_mut().zip(col.values()) {
                *d -= component * p / norm;
            }
            it += 1;
            monitor.check(it, &clean)?;
            monitor.guard(it, &dirty)?;
            if capped {
                tracing::debug!(freq, iterations = it, "clean power reached the dirty map power");
                monitor.converged(it);
                return Ok(clean);
            }
        }
        monitor.exhausted(it);
        Ok(clean)
    }
}

/// CLEAN based on spatial source coherence
#[derive(Debug, Clone)]
pub struct CleanSc {
    pub base: BeamformerBase,
    pub damp: f64,
    pub n_iter: usize,
    pub stop: f64,
    pub max_duration: Option<Duration>,
}

impl CleanSc {
    pub fn new(base: BeamformerBase) -> Self {
        Self {
            base,
            damp: 0.6,
            n_iter: 100,
            stop: 1e-3,
            max_duration: None,
        }
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

    fn powers(&self, d: &CMatrix, h: &[Vec<Complex64>]) -> Vec<f64> {
        let diag = d.diag();
        h.iter()
            .map(|hg| {
                let p = d.quad_form(hg).re;
                if self.base.r_diag {
                    p - hg.iter().zip(&diag).map(|(z, c)| z.norm_sqr() * c).sum::<f64>()
                } else {
                    p
                }
            })
            .collect()
    }

    /// Component of `d` coherent with steering `h` at peak power `pmax`.
    fn coherent(&self, d: &CMatrix, h: &[Complex64], pmax: f64) -> Vec<Complex64> {
        let dh: Vec<Complex64> = d.mul_vec(h).into_iter().map(|z| z / pmax).collect();
        if !self.base.r_diag {
            return dh;
        }
        let h_abs: Vec<f64> = h.iter().map(|z| z.norm_sqr()).collect();
        let mut hh = dh.clone();
        for _ in 0..R_DIAG_REFINEMENTS {
            let big_h: Vec<f64> = hh.iter().map(|z| z.norm_sqr()).collect();
            let norm = (1.0 + h_abs.iter().zip(&big_h).map(|(a, b)| a * b).sum::<f64>()).sqrt();
            hh = dh
                .iter()
                .zip(&big_h)
                .zip(h)
                .map(|((x, bh), hm)| (*x + *hm * *bh) / norm)
                .collect();
        }
        hh
    }
}

impl Beamformer for CleanSc {
    fn name(&self) -> &'static str {
        "BeamformerCleansc"
    }

    fn base(&self) -> &BeamformerBase {
        &self.base
    }

    fn add_params(&self, fp: FingerprintBuilder) -> FingerprintBuilder {
        fp.param("damp", &self.damp)
            .param("n_iter", &self.n_iter)
            .param("stop", &self.stop)
            .param("max_duration_ns", &duration_ns(self.max_duration))
    }

    fn validate(&self) -> BeamResult<()> {
        check_loop_gain("CLEAN-SC", self.damp, self.stop)
    }

    fn compute(&self, csm: &CMatrix, freq: f64, _cache: &Cache) -> BeamResult<Vec<f64>> {
        self.validate()?;
        let h = self.base.steer.steer_all(freq);
        let mut d = if self.base.r_diag {
            csm.without_diagonal()
        } else {
            csm.clone()
        };
        let mut powers = self.powers(&d, &h);
        let mut clean = vec![0.0; h.len()];

        let mut monitor = IterationMonitor::new("CLEAN-SC", self.n_iter, self.max_duration);
        monitor.begin(&clean)?;
        monitor.guard(0, &powers)?;
        let Some((_, initial_peak)) = argmax(&powers) else {
            return Ok(clean);
        };
        let mut it = 0;
        while monitor.within_budget(it) {
            let Some((j, pmax)) = argmax(&powers) else { break };
            if pmax <= 0.0 || pmax <= self.stop * initial_peak {
                monitor.converged(it);
                return Ok(clean);
            }
            let hh = self.coherent(&d, &h[j], pmax);
            d.add_outer(&hh, -self.damp * pmax);
            if self.base.r_diag {
                d = d.without_diagonal();
            }
            clean[j] += self.damp * pmax;
            powers = self.powers(&d, &h);
            it += 1;
            monitor.check(it, &clean)?;
            monitor.guard(it, &powers)?;
        }
        monitor.exhausted(it);
        Ok(clean)
    }
}
