//! Iteration bookkeeping for the deconvolution solvers
//!
//! ```text
//! Initialized ──begin──▶ Iterating ──┬──▶ Converged
//!                                    ├──▶ MaxIterations   (n_iter or max_duration reached)
//!                                    └──▶ Failed          (non-finite value)
//! ```
//!
//! A failed solve never returns a map: the monitor turns the first
//! non-finite working array into [`BeamError::NumericalDivergence`] carrying
//! the last finite iterate.

use std::time::{Duration, Instant};

use crate::types::{BeamError, BeamResult};

/// Solver state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationState {
    Initialized,
    Iterating { iteration: usize },
    Converged { iterations: usize },
    MaxIterations { iterations: usize },
    Failed { iteration: usize },
}

impl IterationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            IterationState::Converged { .. }
                | IterationState::MaxIterations { .. }
                | IterationState::Failed { .. }
        )
    }
}

/// Tracks budget, convergence and divergence of one solve
#[derive(Debug)]
pub struct IterationMonitor {
    algorithm: &'static str,
    n_iter: usize,
    max_duration: Option<Duration>,
    started: Instant,
    state: IterationState,
    last_valid: Vec<f64>,
}

impl IterationMonitor {
    pub fn new(algorithm: &'static str, n_iter: usize, max_duration: Option<Duration>) -> Self {
        Self {
            algorithm,
            n_iter,
            max_duration,
            started: Instant::now(),
            state: IterationState::Initialized,
            last_valid: Vec::new(),
        }
    }

    pub fn state(&self) -> IterationState {
        self.state
    }

    /// Record the starting iterate.
    pub fn begin(&mut self, initial: &[f64]) -> BeamResult<()> {
        self.started = Instant::now();
        self.last_valid.clear();
        self.check(0, initial)?;
        self.state = IterationState::Iterating { iteration: 0 };
        Ok(())
    }

    /// True while iteration `iteration` may still run.
    pub fn within_budget(&self, iteration: usize) -> bool {
        if iteration >= self.n_iter {
            return false;
        }
        match self.max_duration {
            Some(limit) => self.started.elapsed() < limit,
            None => true,
        }
    }

    /// Validate the iterate after `iteration`; remember it when finite.
    pub fn check(&mut self, iteration: usize, x: &[f64]) -> BeamResult<()> {
        if x.iter().all(|v| v.is_finite()) {
            self.last_valid.clear();
            self.last_valid.extend_from_slice(x);
            self.state = IterationState::Iterating { iteration };
            return Ok(());
        }
        self.fail(iteration)
    }

    /// Validate working data that is not the iterate itself (dirty map,
    /// residual powers). The recorded iterate stays the last valid one.
    pub fn guard(&mut self, iteration: usize, values: &[f64]) -> BeamResult<()> {
        if values.iter().all(|v| v.is_finite()) {
            return Ok(());
        }
        self.fail(iteration)
    }

    fn fail(&mut self, iteration: usize) -> BeamResult<()> {
        self.state = IterationState::Failed { iteration };
        tracing::error!(
            algorithm = self.algorithm,
            iteration,
            "non-finite value in solver state"
        );
        Err(BeamError::NumericalDivergence {
            algorithm: self.algorithm,
            iteration,
            last_valid: self.last_valid.clone(),
        })
    }

    pub fn converged(&mut self, iterations: usize) {
        self.state = IterationState::Converged { iterations };
        tracing::trace!(algorithm = self.algorithm, iterations, "solver converged");
    }

    /// Budget exhausted before convergence.
    pub fn exhausted(&mut self, iterations: usize) {
        self.state = IterationState::MaxIterations { iterations };
        tracing::debug!(
            algorithm = self.algorithm,
            iterations,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "solver stopped on iteration budget"
        );
    }
}

/// Projection onto `v ≥ 0` that leaves NaN in place for the monitor to see.
pub(crate) fn clip_negative(v: f64) -> f64 {
    if v < 0.0 {
        0.0
    } else {
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        let mut m = IterationMonitor::new("test", 3, None);
        assert_eq!(m.state(), IterationState::Initialized);
        m.begin(&[0.0, 1.0]).unwrap();
        assert_eq!(m.state(), IterationState::Iterating { iteration: 0 });
        assert!(m.within_budget(2));
        assert!(!m.within_budget(3));
        m.converged(2);
        assert!(m.state().is_terminal());
    }

    #[test]
    fn test_divergence_carries_last_valid() {
        let mut m = IterationMonitor::new("test", 10, None);
        m.begin(&[1.0, 2.0]).unwrap();
        m.check(1, &[3.0, 4.0]).unwrap();
        let err = m.check(2, &[f64::NAN, 4.0]).unwrap_err();
        match err {
            BeamError::NumericalDivergence {
                algorithm,
                iteration,
                last_valid,
            } => {
                assert_eq!(algorithm, "test");
                assert_eq!(iteration, 2);
                assert_eq!(last_valid, vec![3.0, 4.0]);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(m.state(), IterationState::Failed { iteration: 2 });
    }

    #[test]
    fn test_guard_keeps_recorded_iterate() {
        let mut m = IterationMonitor::new("test", 10, None);
        m.begin(&[0.0, 0.0]).unwrap();
        m.guard(0, &[1.0, 2.0]).unwrap();
        let err = m.guard(0, &[f64::INFINITY, 2.0]).unwrap_err();
        assert!(matches!(
            err,
            BeamError::NumericalDivergence { iteration: 0, ref last_valid, .. } if *last_valid == vec![0.0, 0.0]
        ));
        assert_eq!(m.state(), IterationState::Failed { iteration: 0 });
    }

    #[test]
    fn test_clip_negative_keeps_nan() {
        assert_eq!(clip_negative(-2.0), 0.0);
        assert_eq!(clip_negative(3.0), 3.0);
        assert!(clip_negative(f64::NAN).is_nan());
        // f64::max would hide it
        assert_eq!(f64::NAN.max(0.0), 0.0);
    }

    #[test]
    fn test_time_budget() {
        let mut m = IterationMonitor::new("test", usize::MAX, Some(Duration::ZERO));
        m.begin(&[]).unwrap();
        assert!(!m.within_budget(0));
        m.exhausted(0);
        assert_eq!(m.state(), IterationState::MaxIterations { iterations: 0 });
    }
}
