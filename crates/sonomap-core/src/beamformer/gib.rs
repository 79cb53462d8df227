//! Generalized inverse beamforming
//!
//! Each significant eigenmode `y = sqrt(λ) v` of the CSM is explained by
//! grid source strengths `q` through an iteratively reweighted,
//! regularised minimum-norm inverse:
//!
//! ```text
//! q = W A^H (A W A^H + α I)^{-1} y,    W = diag(|q|^{2-p})
//! ```
//!
//! `A` holds the transfer vectors as columns. Source powers are summed
//! over modes.

use num_complex::Complex64;

use crate::cache::{Cache, FingerprintBuilder};
use crate::linalg::{dot_conj, CMatrix};
use crate::types::{BeamError, BeamResult};

use super::{Beamformer, BeamformerBase};

/// Relative loading that keeps `A W A^H` invertible when `alpha` is zero
const MIN_LOADING: f64 = 1e-12;

#[derive(Debug, Clone)]
pub struct Gib {
    pub base: BeamformerBase,
    /// Modes with `λ ≤ eps·λ_max` are skipped
    pub eps: f64,
    /// Norm of the reweighting, in (0, 2]
    pub pnorm: f64,
    /// Reweighting passes
    pub n_iter: usize,
    /// Tikhonov weight relative to `trace(A W A^H) / M`
    pub alpha: f64,
}

impl Gib {
    pub fn new(base: BeamformerBase) -> Self {
        Self {
            base,
            eps: 0.05,
            pnorm: 1.0,
            n_iter: 10,
            alpha: 0.0,
        }
    }

    pub fn eps(mut self, eps: f64) -> Self {
        self.eps = eps;
        self
    }

    pub fn pnorm(mut self, pnorm: f64) -> Self {
        self.pnorm = pnorm;
        self
    }

    pub fn n_iter(mut self, n_iter: usize) -> Self {
        self.n_iter = n_iter;
        self
    }

    pub fn alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    fn solve_mode(&self, a: &[Vec<Complex64>], y: &[Complex64]) -> BeamResult<Vec<Complex64>> {
        let m = y.len();
        let mut w = vec![1.0; a.len()];
        let mut q = vec![Complex64::new(0.0, 0.0); a.len()];
        for pass in 0..self.n_iter.max(1) {
            let mut k = CMatrix::zeros(m);
            for (ag, wg) in a.iter().zip(&w) {
                if *wg > 0.0 {
                    k.add_outer(ag, *wg);
                }
            }
            let scale = k.trace() / m as f64;
            if scale <= 0.0 {
                break;
            }
            let z = k
                .with_diagonal_loading((self.alpha + MIN_LOADING) * scale)
                .solve(y)?;
            for ((qg, ag), wg) in q.iter_mut().zip(a).zip(&w) {
                *qg = dot_conj(ag, &z) * *wg;
            }
            if q.iter().any(|v| !v.is_finite()) {
                return Err(BeamError::NumericalDivergence {
                    algorithm: "GIB",
                    iteration: pass,
                    last_valid: Vec::new(),
                });
            }
            let exponent = 2.0 - self.pnorm;
            for (wg, qg) in w.iter_mut().zip(&q) {
                *wg = qg.norm().powf(exponent);
            }
        }
        Ok(q)
    }
}

impl Beamformer for Gib {
    fn name(&self) -> &'static str {
        "BeamformerGIB"
    }

    fn base(&self) -> &BeamformerBase {
        &self.base
    }

    fn add_params(&self, fp: FingerprintBuilder) -> FingerprintBuilder {
        fp.param("eps", &self.eps)
            .param("pnorm", &self.pnorm)
            .param("n_iter", &self.n_iter)
            .param("alpha", &self.alpha)
    }

    fn validate(&self) -> BeamResult<()> {
        if !(0.0..1.0).contains(&self.eps) {
            return Err(BeamError::config(format!(
                "GIB eps must be in [0, 1), got {}",
                self.eps
            )));
        }
        if !(self.pnorm > 0.0 && self.pnorm <= 2.0) {
            return Err(BeamError::config(format!(
                "GIB pnorm must be in (0, 2], got {}",
                self.pnorm
            )));
        }
        if !(self.alpha.is_finite() && self.alpha >= 0.0) {
            return Err(BeamError::config("GIB alpha must be non-negative"));
        }
        Ok(())
    }

    fn compute(&self, csm: &CMatrix, freq: f64, _cache: &Cache) -> BeamResult<Vec<f64>> {
        self.validate()?;
        let steer = &self.base.steer;
        let mut map = vec![0.0; steer.grid_size()];
        let eig = if self.base.r_diag {
            csm.without_diagonal().hermitian_eigen()
        } else {
            csm.hermitian_eigen()
        };
        let lambda_max = eig.values[eig.max_index()];
        if lambda_max <= 0.0 {
            return Ok(map);
        }
        let a = steer.transfer_all(freq);
        let mut modes = 0;
        for (k, &lambda) in eig.values.iter().enumerate() {
            if lambda <= 0.0 || lambda <= self.eps * lambda_max {
                continue;
            }
            let y: Vec<Complex64> = eig.vector(k).into_iter().map(|v| v * lambda.sqrt()).collect();
            let q = self.solve_mode(&a, &y).map_err(|e| match e {
                BeamError::NumericalDivergence { iteration, .. } => BeamError::NumericalDivergence {
                    algorithm: "GIB",
                    iteration,
                    last_valid: map.clone(),
                },
                other => other,
            })?;
            for (o, qg) in map.iter_mut().zip(&q) {
                *o += qg.norm_sqr();
            }
            modes += 1;
        }
        tracing::trace!(freq, modes, "gib modes solved");
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beamformer::argmax;
    use crate::beamformer::testutil::{point_source_csm, steer};
    use crate::steering::SteerType;

    const F: f64 = 3000.0;

    #[test]
    fn test_gib_locates_single_source() {
        let sv = steer(SteerType::Classic);
        let csm = point_source_csm(&sv, F, 12, 1.0, 0.0);
        let map = Gib::new(BeamformerBase::new(sv)).compute(&csm, F, &Cache::disabled()).unwrap();
        let (peak, value) = argmax(&map).unwrap();
        assert_eq!(peak, 12);
        assert!(value > 0.5);
        assert!(map.iter().all(|v| v.is_finite() && *v >= 0.0));
    }

    #[test]
    fn test_gib_zero_csm_is_empty() {
        let sv = steer(SteerType::Classic);
        let map = Gib::new(BeamformerBase::new(sv))
            .compute(&CMatrix::zeros(9), F, &Cache::disabled())
            .unwrap();
        assert!(map.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_gib_regularisation_keeps_map_finite() {
        let sv = steer(SteerType::Classic);
        let csm = point_source_csm(&sv, F, 4, 1.0, 0.1);
        let map = Gib::new(BeamformerBase::new(sv))
            .eps(0.0)
            .alpha(0.1)
            .pnorm(2.0)
            .compute(&csm, F, &Cache::disabled())
            .unwrap();
        assert!(map.iter().all(|v| v.is_finite() && *v >= 0.0));
        assert!(map.iter().sum::<f64>() > 0.0);
    }

    #[test]
    fn test_gib_validation() {
        let sv = steer(SteerType::Classic);
        assert!(Gib::new(BeamformerBase::new(sv.clone())).eps(1.0).validate().is_err());
        assert!(Gib::new(BeamformerBase::new(sv.clone())).pnorm(0.0).validate().is_err());
        assert!(Gib::new(BeamformerBase::new(sv.clone())).pnorm(2.5).validate().is_err());
        assert!(Gib::new(BeamformerBase::new(sv)).alpha(-0.1).validate().is_err());
    }
}
