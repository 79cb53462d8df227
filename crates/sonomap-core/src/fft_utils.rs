//! FFT utilities for block-wise spectral estimation
//!
//! Wraps a planned forward `rustfft` transform for real input blocks and
//! returns the one-sided spectrum (bins `0..=N/2`).
//!
//! ## Example
//!
//! ```rust
//! use sonomap_core::fft_utils::RealFft;
//!
//! let mut fft = RealFft::new(8);
//! let spectrum = fft.process(&[1.0; 8]);
//! assert_eq!(spectrum.len(), 5);
//! assert!((spectrum[0].re - 8.0).abs() < 1e-12);
//! ```

use num_complex::Complex64;
use rustfft::{Fft, FftPlanner};
use std::fmt;
use std::sync::Arc;

/// Forward FFT of real blocks with reusable buffers
pub struct RealFft {
    size: usize,
    fft: Arc<dyn Fft<f64>>,
    buffer: Vec<Complex64>,
    scratch: Vec<Complex64>,
}

impl fmt::Debug for RealFft {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealFft").field("size", &self.size).finish()
    }
}

impl RealFft {
    /// Create a processor for blocks of `size` samples
    pub fn new(size: usize) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(size);
        let scratch = vec![Complex64::new(0.0, 0.0); fft.get_inplace_scratch_len()];
        Self {
            size,
            fft,
            buffer: vec![Complex64::new(0.0, 0.0); size],
            scratch,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of one-sided bins, `N/2 + 1`
    pub fn num_bins(&self) -> usize {
        self.size / 2 + 1
    }

    /// One-sided spectrum of a real block.
    ///
    /// Shorter input is zero padded, longer input truncated.
    pub fn process(&mut self, input: &[f64]) -> &[Complex64] {
        for (i, slot) in self.buffer.iter_mut().enumerate() {
            *slot = Complex64::new(input.get(i).copied().unwrap_or(0.0), 0.0);
        }
        self.fft.process_with_scratch(&mut self.buffer, &mut self.scratch);
        &self.buffer[..self.size / 2 + 1]
    }

    /// One-sided spectrum of a windowed block.
    pub fn process_windowed(&mut self, input: &[f64], window: &[f64]) -> &[Complex64] {
        for (i, slot) in self.buffer.iter_mut().enumerate() {
            let x = input.get(i).copied().unwrap_or(0.0);
            let w = window.get(i).copied().unwrap_or(0.0);
            *slot = Complex64::new(x * w, 0.0);
        }
        self.fft.process_with_scratch(&mut self.buffer, &mut self.scratch);
        &self.buffer[..self.size / 2 + 1]
    }
}

/// Bin center frequencies `k * fs / n` for `k = 0..=n/2`.
pub fn rfft_frequencies(n: usize, sample_rate: f64) -> Vec<f64> {
    if n == 0 {
        return vec![];
    }
    (0..=n / 2)
        .map(|k| k as f64 * sample_rate / n as f64)
        .collect()
}
