//! Analysis windows for block-wise spectral estimation
//!
//! | Window      | Main Lobe | Sidelobe Level | Use Case                          |
//! |-------------|-----------|----------------|-----------------------------------|
//! | Rectangular | Narrowest | -13 dB         | tones exactly on a bin, transients |
//! | Hanning     | Medium    | -32 dB         | general purpose (default choice)  |
//! | Hamming     | Medium    | -43 dB         | close-in sidelobe suppression     |
//! | Bartlett    | Medium    | -27 dB         | legacy comparisons                |
//! | Blackman    | Wide      | -58 dB         | high dynamic range                |
//!
//! All windows are symmetric (denominator `N - 1`).

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;

/// Window function type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Window {
    /// No windowing
    #[default]
    Rectangular,
    /// 0.5 - 0.5*cos(2πn/(N-1))
    Hanning,
    /// 0.54 - 0.46*cos(2πn/(N-1))
    Hamming,
    /// 1 - |2n/(N-1) - 1|
    Bartlett,
    /// 0.42 - 0.5*cos(2πn/(N-1)) + 0.08*cos(4πn/(N-1))
    Blackman,
}

impl Window {
    /// Window coefficients for the given length.
    pub fn generate(&self, length: usize) -> Vec<f64> {
        if length == 0 {
            return vec![];
        }
        if length == 1 {
            return vec![1.0];
        }
        let m = (length - 1) as f64;
        (0..length)
            .map(|n| {
                let x = n as f64 / m;
                match self {
                    Window::Rectangular => 1.0,
                    Window::Hanning => 0.5 - 0.5 * (2.0 * PI * x).cos(),
                    Window::Hamming => 0.54 - 0.46 * (2.0 * PI * x).cos(),
                    Window::Bartlett => 1.0 - (2.0 * x - 1.0).abs(),
                    Window::Blackman => {
                        0.42 - 0.5 * (2.0 * PI * x).cos() + 0.08 * (4.0 * PI * x).cos()
                    }
                }
            })
            .collect()
    }

    /// Sum of squared coefficients, the power normalization of a periodogram.
    pub fn power_sum(&self, length: usize) -> f64 {
        self.generate(length).iter().map(|w| w * w).sum()
    }

    /// Name used in fingerprints and configuration files.
    pub fn name(&self) -> &'static str {
        match self {
            Window::Rectangular => "Rectangular",
            Window::Hanning => "Hanning",
            Window::Hamming => "Hamming",
            Window::Bartlett => "Bartlett",
            Window::Blackman => "Blackman",
        }
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_symmetry() {
        for w in [
            Window::Hanning,
            Window::Hamming,
            Window::Bartlett,
            Window::Blackman,
        ] {
            let c = w.generate(33);
            for i in 0..16 {
                assert_relative_eq!(c[i], c[32 - i], epsilon = 1e-12);
            }
            assert_relative_eq!(c[16], 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_endpoints() {
        assert_relative_eq!(Window::Hanning.generate(8)[0], 0.0, epsilon = 1e-15);
        assert_relative_eq!(Window::Hamming.generate(8)[0], 0.08, epsilon = 1e-12);
        assert_relative_eq!(Window::Bartlett.generate(8)[7], 0.0, epsilon = 1e-15);
        assert_relative_eq!(Window::Blackman.generate(8)[0], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_power_sum() {
        assert_relative_eq!(Window::Rectangular.power_sum(64), 64.0);
        // Hanning power sum approaches 3N/8
        let p = Window::Hanning.power_sum(1024);
        assert!((p / 1024.0 - 0.375).abs() < 1e-3);
    }

    #[test]
    fn test_degenerate_lengths() {
        assert!(Window::Hanning.generate(0).is_empty());
        assert_eq!(Window::Hanning.generate(1), vec![1.0]);
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&Window::Hanning).unwrap();
        assert_eq!(json, "\"Hanning\"");
        assert_eq!(Window::Blackman.to_string(), "Blackman");
    }
}
