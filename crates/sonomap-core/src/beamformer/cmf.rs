//! Covariance matrix fitting
//!
//! Fits the CSM with a non-negative sum of point-source models:
//!
//! ```text
//! min_q ‖C - Σ_g q_g a_g a_g^H‖_F² + α Σ_g q_g,    q ≥ 0
//! ```
//!
//! Expanding the Frobenius norm gives the real quadratic
//! `qᵀ G q - 2 bᵀ q + α Σ q` with `G_gh = |a_g^H a_h|²` and
//! `b_g = a_g^H C a_g`. With `r_diag` only the off-diagonal CSM entries are
//! fitted and the autopower terms drop out of both.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::{Cache, FingerprintBuilder, HashValue};
use crate::config::SolverConfig;
use crate::linalg::{dot_conj, CMatrix};
use crate::types::{BeamError, BeamResult};

use super::solver::{clip_negative, IterationMonitor};
use super::{duration_ns, Beamformer, BeamformerBase};

/// Solver for the non-negative fit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmfMethod {
    /// Cyclic coordinate descent; the objective never increases
    #[default]
    Nnls,
    /// Projected gradient with a fixed `1/L` step
    ProjectedGradient,
}

impl CmfMethod {
    pub fn name(&self) -> &'static str {
        match self {
            CmfMethod::Nnls => "nnls",
            CmfMethod::ProjectedGradient => "projected_gradient",
        }
    }
}

impl HashValue for CmfMethod {
    fn hash_into(&self, hasher: &mut sha2::Sha256) {
        self.name().hash_into(hasher);
    }
}

#[derive(Debug, Clone)]
pub struct Cmf {
    pub base: BeamformerBase,
    pub method: CmfMethod,
    /// Sparsity weight relative to `max(b)`
    pub alpha: f64,
    pub max_iter: usize,
    /// Stop when the largest update is at most `tol · max(q)`
    pub tol: f64,
    pub max_duration: Option<Duration>,
}

impl Cmf {
    pub fn new(base: BeamformerBase) -> Self {
        Self {
            base,
            method: CmfMethod::Nnls,
            alpha: 0.0,
            max_iter: 500,
            tol: 1e-8,
            max_duration: None,
        }
    }

    pub fn method(mut self, method: CmfMethod) -> Self {
        self.method = method;
        self
    }

    pub fn alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    pub fn max_duration(mut self, limit: Duration) -> Self {
        self.max_duration = Some(limit);
        self
    }

    /// Apply the configured overrides; `n_iter` sets `max_iter`, `damp`
    /// and `stop` do not apply.
    pub fn with_solver(mut self, solver: &SolverConfig) -> Self {
        if let Some(n_iter) = solver.n_iter {
            self.max_iter = n_iter;
        }
        if let Some(tol) = solver.tol {
            self.tol = tol;
        }
        if let Some(limit) = solver.max_duration() {
            self.max_duration = Some(limit);
        }
        self
    }

    /// Gram matrix (row-major `[G × G]`) and right-hand side of the fit.
    fn normal_equations(&self, csm: &CMatrix, freq: f64) -> (Vec<f64>, Vec<f64>) {
        let a = self.base.steer.transfer_all(freq);
        let n = a.len();
        let mags: Vec<Vec<f64>> = a
            .iter()
            .map(|ag| ag.iter().map(|z| z.norm_sqr()).collect())
            .collect();
        let diag = csm.diag();

        let mut gram = vec![0.0; n * n];
        for g in 0..n {
            for h in g..n {
                let mut v = dot_conj(&a[g], &a[h]).norm_sqr();
                if self.base.r_diag {
                    v -= mags[g].iter().zip(&mags[h]).map(|(x, y)| x * y).sum::<f64>();
                }
                gram[g * n + h] = v;
                gram[h * n + g] = v;
            }
        }
        let b = a
            .iter()
            .zip(&mags)
            .map(|(ag, mg)| {
                let v = csm.quad_form(ag).re;
                if self.base.r_diag {
                    v - mg.iter().zip(&diag).map(|(x, c)| x * c).sum::<f64>()
                } else {
                    v
                }
            })
            .collect();
        (gram, b)
    }

    fn solve(&self, gram: &[f64], b: &[f64]) -> BeamResult<Vec<f64>> {
        let penalty = 0.5 * self.alpha * b.iter().copied().fold(0.0, f64::max);
        match self.method {
            CmfMethod::Nnls => coordinate_descent(gram, b, penalty, self.max_iter, self.tol, self.max_duration),
            CmfMethod::ProjectedGradient => {
                projected_gradient(gram, b, penalty, self.max_iter, self.tol, self.max_duration)
            }
        }
    }
}

/// Minimise `½ qᵀ G q - bᵀ q + penalty Σ q` over `q ≥ 0` one coordinate at a time.
fn coordinate_descent(
    gram: &[f64],
    b: &[f64],
    penalty: f64,
    max_iter: usize,
    tol: f64,
    max_duration: Option<Duration>,
) -> BeamResult<Vec<f64>> {
    let n = b.len();
    let mut q = vec![0.0; n];
    let mut monitor = IterationMonitor::new("CMF", max_iter, max_duration);
    monitor.begin(&q)?;
    monitor.guard(0, b)?;
    let mut it = 0;
    while monitor.within_budget(it) {
        let mut max_update = 0.0f64;
        for g in 0..n {
            let g_gg = gram[g * n + g];
            if g_gg <= 0.0 {
                continue;
            }
            let row = &gram[g * n..(g + 1) * n];
            let cross: f64 = row.iter().zip(&q).map(|(x, y)| x * y).sum::<f64>() - g_gg * q[g];
            let updated = clip_negative((b[g] - penalty - cross) / g_gg);
            max_update = max_update.max((updated - q[g]).abs());
            q[g] = updated;
        }
        it += 1;
        monitor.check(it, &q)?;
        let peak = q.iter().copied().fold(0.0, f64::max);
        if max_update <= tol * peak {
            monitor.converged(it);
            return Ok(q);
        }
    }
    monitor.exhausted(it);
    Ok(q)
}

fn projected_gradient(
    gram: &[f64],
    b: &[f64],
    penalty: f64,
    max_iter: usize,
    tol: f64,
    max_duration: Option<Duration>,
) -> BeamResult<Vec<f64>> {
    let n = b.len();
    let apply = |x: &[f64]| -> Vec<f64> {
        gram.chunks(n)
            .map(|row| row.iter().zip(x).map(|(a, v)| a * v).sum())
            .collect()
    };
    let mut q = vec![0.0; n];
    let mut monitor = IterationMonitor::new("CMF", max_iter, max_duration);
    monitor.begin(&q)?;
    monitor.guard(0, b)?;

    let mut v = vec![1.0 / (n as f64).sqrt(); n];
    let mut lipschitz = 0.0;
    for _ in 0..30 {
        let w = apply(&v);
        let norm = w.iter().map(|x| x * x).sum::<f64>().sqrt();
        if norm == 0.0 {
            break;
        }
        lipschitz = norm;
        v = w.into_iter().map(|x| x / norm).collect();
    }
    if lipschitz == 0.0 {
        monitor.converged(0);
        return Ok(q);
    }
    let step = 1.0 / (1.01 * lipschitz);

    let mut it = 0;
    while monitor.within_budget(it) {
        let gq = apply(&q);
        let mut max_update = 0.0f64;
        for g in 0..n {
            let updated = clip_negative(q[g] - step * (gq[g] - b[g] + penalty));
            max_update = max_update.max((updated - q[g]).abs());
            q[g] = updated;
        }
        it += 1;
        monitor.check(it, &q)?;
        let peak = q.iter().copied().fold(0.0, f64::max);
        if max_update <= tol * peak {
            monitor.converged(it);
            return Ok(q);
        }
    }
    monitor.exhausted(it);
    Ok(q)
}

impl Beamformer for Cmf {
    fn name(&self) -> &'static str {
        "BeamformerCMF"
    }

    fn base(&self) -> &BeamformerBase {
        &self.base
    }

    fn add_params(&self, fp: FingerprintBuilder) -> FingerprintBuilder {
        fp.param("method", &self.method)
            .param("alpha", &self.alpha)
            .param("max_iter", &self.max_iter)
            .param("tol", &self.tol)
            .param("max_duration_ns", &duration_ns(self.max_duration))
    }

    fn validate(&self) -> BeamResult<()> {
        if !(self.alpha.is_finite() && self.alpha >= 0.0) {
            return Err(BeamError::config(format!(
                "CMF alpha must be non-negative, got {}",
                self.alpha
            )));
        }
        if !(self.tol.is_finite() && self.tol >= 0.0) {
            return Err(BeamError::config("CMF tolerance must be non-negative"));
        }
        Ok(())
    }

    fn compute(&self, csm: &CMatrix, freq: f64, _cache: &Cache) -> BeamResult<Vec<f64>> {
        self.validate()?;
        let (gram, b) = self.normal_equations(csm, freq);
        self.solve(&gram, &b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beamformer::argmax;
    use crate::beamformer::testutil::{nan_csm, point_source_csm, steer};
    use crate::cache::Fingerprint;
    use crate::steering::SteerType;
    use approx::assert_relative_eq;

    const F: f64 = 3000.0;

    // SPD system with minimiser [2, 0, 1]
    fn banded() -> (Vec<f64>, Vec<f64>) {
        (
            vec![1.0, 0.5, 0.1, 0.5, 1.0, 0.5, 0.1, 0.5, 1.0],
            vec![2.1, 1.5, 1.2],
        )
    }

    fn objective(gram: &[f64], b: &[f64], q: &[f64]) -> f64 {
        let n = b.len();
        let mut f = 0.0;
        for g in 0..n {
            for h in 0..n {
                f += 0.5 * q[g] * gram[g * n + h] * q[h];
            }
            f -= b[g] * q[g];
        }
        f
    }

    #[test]
    fn test_coordinate_descent_banded() {
        let (gram, b) = banded();
        let q = coordinate_descent(&gram, &b, 0.0, 500, 1e-10, None).unwrap();
        assert_relative_eq!(q[0], 2.0, epsilon = 1e-6);
        assert_relative_eq!(q[1], 0.0, epsilon = 1e-6);
        assert_relative_eq!(q[2], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_coordinate_descent_is_monotone() {
        let (gram, b) = banded();
        let mut last = 0.0;
        for iters in 1..8 {
            let q = coordinate_descent(&gram, &b, 0.0, iters, 0.0, None).unwrap();
            let f = objective(&gram, &b, &q);
            assert!(f <= last + 1e-12);
            last = f;
        }
    }

    #[test]
    fn test_projected_gradient_banded() {
        let (gram, b) = banded();
        let q = projected_gradient(&gram, &b, 0.0, 5000, 1e-12, None).unwrap();
        assert_relative_eq!(q[0], 2.0, epsilon = 1e-4);
        assert_relative_eq!(q[2], 1.0, epsilon = 1e-4);
        assert!(q.iter().all(|v| *v >= 0.0));
    }

    #[test]
    fn test_cmf_point_source_on_array() {
        let sv = steer(SteerType::Classic);
        let csm = point_source_csm(&sv, F, 12, 1.0, 0.0);
        for method in [CmfMethod::Nnls, CmfMethod::ProjectedGradient] {
            let q = Cmf::new(BeamformerBase::new(sv.clone()))
                .method(method)
                .compute(&csm, F, &Cache::disabled())
                .unwrap();
            assert!(q.iter().all(|v| v.is_finite() && *v >= 0.0));
            assert_eq!(argmax(&q).unwrap().0, 12, "{}", method.name());
        }
    }

    #[test]
    fn test_cmf_off_diagonal_fit_ignores_noise() {
        // diagonal-only CSM leaves nothing to fit once autopowers are dropped
        let sv = steer(SteerType::Classic);
        let q = Cmf::new(BeamformerBase::new(sv).r_diag(true))
            .compute(&CMatrix::identity(9), F, &Cache::disabled())
            .unwrap();
        assert!(q.iter().all(|v| v.abs() < 1e-12));
    }

    #[test]
    fn test_cmf_tol_and_budget_in_fingerprint() {
        let sv = steer(SteerType::Classic);
        let key = |c: &Cmf| c.add_params(Fingerprint::builder("x")).build().key();
        let a = Cmf::new(BeamformerBase::new(sv.clone()));
        let b = Cmf::new(BeamformerBase::new(sv.clone())).tol(1e-4);
        let c = Cmf::new(BeamformerBase::new(sv)).max_duration(Duration::from_millis(10));
        assert_eq!(b.tol, 1e-4);
        assert_ne!(key(&a), key(&b));
        assert_ne!(key(&a), key(&c));
    }

    #[test]
    fn test_cmf_with_solver_maps_iterations() {
        let solver = SolverConfig {
            n_iter: Some(75),
            damp: Some(0.2),
            tol: Some(1e-6),
            ..Default::default()
        };
        let bf = Cmf::new(BeamformerBase::new(steer(SteerType::Classic))).with_solver(&solver);
        assert_eq!(bf.max_iter, 75);
        assert_eq!(bf.tol, 1e-6);
        assert_eq!(bf.alpha, 0.0);
    }

    #[test]
    fn test_cmf_non_finite_csm() {
        let sv = steer(SteerType::Classic);
        let csm = nan_csm(&sv, F);
        for method in [CmfMethod::Nnls, CmfMethod::ProjectedGradient] {
            let err = Cmf::new(BeamformerBase::new(sv.clone()))
                .method(method)
                .compute(&csm, F, &Cache::disabled())
                .unwrap_err();
            assert!(
                matches!(err, BeamError::NumericalDivergence { algorithm: "CMF", .. }),
                "{}",
                method.name()
            );
        }
    }

    #[test]
    fn test_cmf_method_in_fingerprint() {
        let sv = steer(SteerType::Classic);
        let a = Cmf::new(BeamformerBase::new(sv.clone()));
        let b = Cmf::new(BeamformerBase::new(sv)).method(CmfMethod::ProjectedGradient);
        let key = |c: &Cmf| c.add_params(Fingerprint::builder("x")).build().key();
        assert_ne!(key(&a), key(&b));
    }
}
