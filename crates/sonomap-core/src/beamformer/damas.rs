//! DAMAS deconvolution
//!
//! Both variants solve `A x = b` for a non-negative source distribution `x`,
//! where `A` is the PSF (`A[n][m]` = response at `n` to a unit source at
//! `m`) and `b` the delay-and-sum map.
//!
//! - [`Damas`]: damped Gauss-Seidel sweeps clipped at zero
//!   `x_n ← max(0, (1-d)·x_n + d·(b_n - Σ_{m≠n} A_nm x_m) / A_nn)`
//! - [`DamasPlus`]: accelerated projected gradient on
//!   `½‖A x - b‖² + α Σ x` with step `1/L`, `L` from a power iteration

use std::time::Duration;

use crate::cache::{Cache, FingerprintBuilder};
use crate::config::SolverConfig;
use crate::linalg::CMatrix;
use crate::psf::PsfMatrix;
use crate::types::{BeamError, BeamResult};

use super::solver::{clip_negative, IterationMonitor};
use super::{duration_ns, Beamformer, BeamformerBase, PsfSettings};

/// Gauss-Seidel DAMAS
#[derive(Debug, Clone)]
pub struct Damas {
    pub base: BeamformerBase,
    pub psf: PsfSettings,
    /// Maximum number of sweeps
    pub n_iter: usize,
    /// Relaxation factor in (0, 1]
    pub damp: f64,
    /// Stop when the largest update is at most `tol · max(x)`
    pub tol: f64,
    pub max_duration: Option<Duration>,
}

impl Damas {
    pub fn new(base: BeamformerBase) -> Self {
        Self {
            base,
            psf: PsfSettings::default(),
            n_iter: 100,
            damp: 1.0,
            tol: 1e-6,
            max_duration: None,
        }
    }

    pub fn n_iter(mut self, n_iter: usize) -> Self {
        self.n_iter = n_iter;
        self
    }

    pub fn damp(mut self, damp: f64) -> Self {
        self.damp = damp;
        self
    }

    pub fn tol(mut self, tol: f64) -> Self {
        self.tol = tol;
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

    /// Apply the configured overrides; `stop` does not apply.
    pub fn with_solver(mut self, solver: &SolverConfig) -> Self {
        if let Some(n_iter) = solver.n_iter {
            self.n_iter = n_iter;
        }
        if let Some(damp) = solver.damp {
            self.damp = damp;
        }
        if let Some(tol) = solver.tol {
            self.tol = tol;
        }
        if let Some(limit) = solver.max_duration() {
            self.max_duration = Some(limit);
        }
        self
    }

    /// Solve for a given PSF and dirty map.
    pub fn solve(&self, psf: &PsfMatrix, b: &[f64]) -> BeamResult<Vec<f64>> {
        let n = psf.size();
        if b.len() != n {
            return Err(BeamError::shape("damas dirty map", n, b.len()));
        }
        let mut x = vec![0.0; n];
        let mut monitor = IterationMonitor::new("DAMAS", self.n_iter, self.max_duration);
        monitor.begin(&x)?;
        monitor.guard(0, b)?;

        let mut it = 0;
        while monitor.within_budget(it) {
            let mut max_update = 0.0f64;
            for i in 0..n {
                let a_ii = psf.get(i, i);
                if a_ii <= 0.0 {
                    continue;
                }
                let mut s = b[i];
                for (m, xm) in x.iter().enumerate() {
                    if m != i {
                        s -= psf.get(i, m) * xm;
                    }
                }
                let updated = clip_negative((1.0 - self.damp) * x[i] + self.damp * s / a_ii);
                max_update = max_update.max((updated - x[i]).abs());
                x[i] = updated;
            }
            it += 1;
            monitor.check(it, &x)?;
            let peak = x.iter().copied().fold(0.0, f64::max);
            if max_update <= self.tol * peak {
                monitor.converged(it);
                return Ok(x);
            }
        }
        monitor.exhausted(it);
        Ok(x)
    }
}

impl Beamformer for Damas {
    fn name(&self) -> &'static str {
        "BeamformerDamas"
    }

    fn base(&self) -> &BeamformerBase {
        &self.base
    }

    fn add_params(&self, fp: FingerprintBuilder) -> FingerprintBuilder {
        fp.param("n_iter", &self.n_iter)
            .param("damp", &self.damp)
            .param("tol", &self.tol)
            .param("max_duration_ns", &duration_ns(self.max_duration))
    }

    fn validate(&self) -> BeamResult<()> {
        if !(self.damp > 0.0 && self.damp <= 1.0) {
            return Err(BeamError::config(format!(
                "DAMAS damping must be in (0, 1], got {}",
                self.damp
            )));
        }
        if !(self.tol.is_finite() && self.tol >= 0.0) {
            return Err(BeamError::config("DAMAS tolerance must be non-negative"));
        }
        self.psf.steer(&self.base).map(|_| ())
    }

    fn compute(&self, csm: &CMatrix, freq: f64, cache: &Cache) -> BeamResult<Vec<f64>> {
        self.validate()?;
        let b = self.base.delay_and_sum(csm, freq);
        let psf = self.psf.psf(&self.base, freq)?.full(cache)?;
        self.solve(&psf, &b)
    }
}

/// DAMAS solved by accelerated projected gradient with an L1 penalty
#[derive(Debug, Clone)]
pub struct DamasPlus {
    pub base: BeamformerBase,
    pub psf: PsfSettings,
    /// Weight of the `Σ x` penalty relative to the dirty map maximum
    pub alpha: f64,
    pub n_iter: usize,
    pub tol: f64,
    pub max_duration: Option<Duration>,
}

impl DamasPlus {
    pub fn new(base: BeamformerBase) -> Self {
        Self {
            base,
            psf: PsfSettings::default(),
            alpha: 0.0,
            n_iter: 500,
            tol: 1e-8,
            max_duration: None,
        }
    }

    pub fn alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn n_iter(mut self, n_iter: usize) -> Self {
        self.n_iter = n_iter;
        self
    }

    pub fn tol(mut self, tol: f64) -> Self {
        self.tol = tol;
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

    /// Apply the configured overrides; `damp` and `stop` do not apply.
    pub fn with_solver(mut self, solver: &SolverConfig) -> Self {
        if let Some(n_iter) = solver.n_iter {
            self.n_iter = n_iter;
        }
        if let Some(tol) = solver.tol {
            self.tol = tol;
        }
        if let Some(limit) = solver.max_duration() {
            self.max_duration = Some(limit);
        }
        self
    }

    pub fn solve(&self, psf: &PsfMatrix, b: &[f64]) -> BeamResult<Vec<f64>> {
        let n = psf.size();
        if b.len() != n {
            return Err(BeamError::shape("damas dirty map", n, b.len()));
        }
        let apply = |x: &[f64]| -> Vec<f64> {
            let mut out = vec![0.0; n];
            for (m, xm) in x.iter().enumerate() {
                if *xm != 0.0 {
                    for (o, a) in out.iter_mut().zip(psf.column(m)) {
                        *o += a * xm;
                    }
                }
            }
            out
        };
        let apply_t = |r: &[f64]| -> Vec<f64> {
            (0..n)
                .map(|m| psf.column(m).iter().zip(r).map(|(a, v)| a * v).sum())
                .collect()
        };

        let mut x = vec![0.0; n];
        let mut monitor = IterationMonitor::new("DAMAS+", self.n_iter, self.max_duration);
        monitor.begin(&x)?;
        monitor.guard(0, b)?;

        // Lipschitz constant of the gradient: largest eigenvalue of AᵀA
        let mut v = vec![1.0 / (n as f64).sqrt(); n];
        let mut lipschitz = 0.0;
        for _ in 0..30 {
            let w = apply_t(&apply(&v));
            let norm = w.iter().map(|x| x * x).sum::<f64>().sqrt();
            if norm == 0.0 {
                break;
            }
            lipschitz = norm;
            v = w.into_iter().map(|x| x / norm).collect();
        }
        if lipschitz == 0.0 {
            monitor.converged(0);
            return Ok(x);
        }
        let step = 1.0 / (1.01 * lipschitz);
        let penalty = self.alpha * b.iter().copied().fold(0.0, f64::max);

        let mut y = x.clone();
        let mut t = 1.0f64;

        let mut it = 0;
        while monitor.within_budget(it) {
            let residual: Vec<f64> = apply(&y).iter().zip(b).map(|(a, bb)| a - bb).collect();
            let grad = apply_t(&residual);
            let next: Vec<f64> = y
                .iter()
                .zip(&grad)
                .map(|(yi, gi)| clip_negative(yi - step * (gi + penalty)))
                .collect();
            let t_next = 0.5 * (1.0 + (1.0 + 4.0 * t * t).sqrt());
            let beta = (t - 1.0) / t_next;
            let mut max_update = 0.0f64;
            for i in 0..n {
                max_update = max_update.max((next[i] - x[i]).abs());
                y[i] = clip_negative(next[i] + beta * (next[i] - x[i]));
            }
            x = next;
            t = t_next;
            it += 1;
            monitor.check(it, &x)?;
            let peak = x.iter().copied().fold(0.0, f64::max);
            if max_update <= self.tol * peak {
                monitor.converged(it);
                return Ok(x);
            }
        }
        monitor.exhausted(it);
        Ok(x)
    }
}

impl Beamformer for DamasPlus {
    fn name(&self) -> &'static str {
        "BeamformerDamasPlus"
    }

    fn base(&self) -> &BeamformerBase {
        &self.base
    }

    fn add_params(&self, fp: FingerprintBuilder) -> FingerprintBuilder {
        fp.param("alpha", &self.alpha)
            .param("n_iter", &self.n_iter)
            .param("tol", &self.tol)
            .param("max_duration_ns", &duration_ns(self.max_duration))
    }

    fn validate(&self) -> BeamResult<()> {
        if !(self.alpha.is_finite() && self.alpha >= 0.0) {
            return Err(BeamError::config(format!(
                "DAMAS+ alpha must be non-negative, got {}",
                self.alpha
            )));
        }
        if !(self.tol.is_finite() && self.tol >= 0.0) {
            return Err(BeamError::config("DAMAS+ tolerance must be non-negative"));
        }
        self.psf.steer(&self.base).map(|_| ())
    }

    fn compute(&self, csm: &CMatrix, freq: f64, cache: &Cache) -> BeamResult<Vec<f64>> {
        self.validate()?;
        let b = self.base.delay_and_sum(csm, freq);
        let psf = self.psf.psf(&self.base, freq)?.full(cache)?;
        self.solve(&psf, &b)
    }
}
