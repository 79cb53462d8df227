//! Dense complex linear algebra for array-sized matrices
//!
//! Cross-spectral matrices are small (one row per microphone), so a flat
//! row-major `Vec<Complex64>` with hand-written kernels is enough:
//!
//! - Hermitian eigendecomposition by cyclic complex Jacobi rotations
//! - Gauss-Jordan inversion and linear solve with partial pivoting
//! - quadratic forms `h^H A h` used by every frequency-domain beamformer

use num_complex::Complex64;

use crate::types::{BeamError, BeamResult};

const ZERO: Complex64 = Complex64 { re: 0.0, im: 0.0 };
const ONE: Complex64 = Complex64 { re: 1.0, im: 0.0 };

/// Maximum Jacobi sweeps before giving up on further refinement
const MAX_SWEEPS: usize = 64;

/// `Σ conj(a_i) b_i`
pub fn dot_conj(a: &[Complex64], b: &[Complex64]) -> Complex64 {
    a.iter().zip(b).map(|(x, y)| x.conj() * y).sum()
}

/// `Σ |a_i|²`
pub fn norm_sqr(a: &[Complex64]) -> f64 {
    a.iter().map(|x| x.norm_sqr()).sum()
}

/// Square complex matrix, row-major
#[derive(Debug, Clone, PartialEq)]
pub struct CMatrix {
    n: usize,
    data: Vec<Complex64>,
}

impl CMatrix {
    pub fn zeros(n: usize) -> Self {
        Self {
            n,
            data: vec![ZERO; n * n],
        }
    }

    pub fn identity(n: usize) -> Self {
        let mut m = Self::zeros(n);
        for i in 0..n {
            m.data[i * n + i] = ONE;
        }
        m
    }

    pub fn from_vec(n: usize, data: Vec<Complex64>) -> BeamResult<Self> {
        if data.len() != n * n {
            return Err(BeamError::shape("matrix", n * n, data.len()));
        }
        Ok(Self { n, data })
    }

    /// Rank-one matrix `v v^H`
    pub fn outer(v: &[Complex64]) -> Self {
        let mut m = Self::zeros(v.len());
        m.add_outer(v, 1.0);
        m
    }

    /// Dimension
    pub fn n(&self) -> usize {
        self.n
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> Complex64 {
        self.data[i * self.n + j]
    }

    #[inline]
    pub fn set(&mut self, i: usize, j: usize, v: Complex64) {
        self.data[i * self.n + j] = v;
    }

    pub fn as_slice(&self) -> &[Complex64] {
        &self.data
    }

    pub fn row(&self, i: usize) -> &[Complex64] {
        &self.data[i * self.n..(i + 1) * self.n]
    }

    /// `self += scale * v v^H`
    pub fn add_outer(&mut self, v: &[Complex64], scale: f64) {
        let n = self.n;
        for i in 0..n {
            let vi = v[i] * scale;
            for j in 0..n {
                self.data[i * n + j] += vi * v[j].conj();
            }
        }
    }

    /// `self += scale * v v^H`, upper triangle only
    pub fn add_outer_upper(&mut self, v: &[Complex64], scale: f64) {
        let n = self.n;
        for i in 0..n {
            let vi = v[i] * scale;
            for j in i..n {
                self.data[i * n + j] += vi * v[j].conj();
            }
        }
    }

    /// Fill the lower triangle from the conjugated upper triangle and force
    /// a real diagonal, making the matrix exactly Hermitian.
    pub fn mirror_upper(&mut self) {
        let n = self.n;
        for i in 0..n {
            self.data[i * n + i].im = 0.0;
            for j in i + 1..n {
                self.data[j * n + i] = self.data[i * n + j].conj();
            }
        }
    }

    pub fn scale(&mut self, s: f64) {
        for v in self.data.iter_mut() {
            *v *= s;
        }
    }

    /// Real part of the diagonal
    pub fn diag(&self) -> Vec<f64> {
        (0..self.n).map(|i| self.data[i * self.n + i].re).collect()
    }

    pub fn trace(&self) -> f64 {
        self.diag().iter().sum()
    }

    /// Largest element magnitude
    pub fn max_abs(&self) -> f64 {
        self.data.iter().map(|v| v.norm()).fold(0.0, f64::max)
    }

    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.re.is_finite() && v.im.is_finite())
    }

    /// Hermitian within `tol` relative to the largest element.
    pub fn is_hermitian(&self, tol: f64) -> bool {
        let limit = tol * self.max_abs().max(f64::MIN_POSITIVE);
        let n = self.n;
        for i in 0..n {
            for j in i..n {
                if (self.get(i, j) - self.get(j, i).conj()).norm() > limit {
                    return false;
                }
            }
        }
        true
    }

    /// `A v`
    pub fn mul_vec(&self, v: &[Complex64]) -> Vec<Complex64> {
        (0..self.n)
            .map(|i| self.row(i).iter().zip(v).map(|(a, b)| a * b).sum())
            .collect()
    }

    /// `h^H A h`
    pub fn quad_form(&self, h: &[Complex64]) -> Complex64 {
        dot_conj(h, &self.mul_vec(h))
    }

    /// Copy with `load` added to the diagonal
    pub fn with_diagonal_loading(&self, load: f64) -> Self {
        let mut m = self.clone();
        for i in 0..self.n {
            m.data[i * self.n + i] += load;
        }
        m
    }

    /// Copy with the diagonal set to zero
    pub fn without_diagonal(&self) -> Self {
        let mut m = self.clone();
        for i in 0..self.n {
            m.data[i * self.n + i] = ZERO;
        }
        m
    }

    /// Matrix product `A B`
    pub fn matmul(&self, other: &CMatrix) -> BeamResult<CMatrix> {
        if other.n != self.n {
            return Err(BeamError::shape("matmul", self.n, other.n));
        }
        let n = self.n;
        let mut out = CMatrix::zeros(n);
        for i in 0..n {
            for k in 0..n {
                let a = self.data[i * n + k];
                if a == ZERO {
                    continue;
                }
                for j in 0..n {
                    out.data[i * n + j] += a * other.data[k * n + j];
                }
            }
        }
        Ok(out)
    }

    /// Inverse via Gauss-Jordan elimination with partial pivoting.
    pub fn inverse(&self) -> BeamResult<CMatrix> {
        let n = self.n;
        let w = 2 * n;
        let mut aug = vec![ZERO; n * w];

        // Build augmented matrix [A | I]
        for i in 0..n {
            aug[i * w..i * w + n].copy_from_slice(self.row(i));
            aug[i * w + n + i] = ONE;
        }

        let scale = self.max_abs().max(f64::MIN_POSITIVE);
        for col in 0..n {
            let (pivot_row, pivot_abs) = (col..n)
                .map(|r| (r, aug[r * w + col].norm()))
                .fold((col, -1.0), |best, cur| if cur.1 > best.1 { cur } else { best });
            if pivot_abs <= 1e-14 * scale {
                return Err(BeamError::config(format!(
                    "matrix is singular (pivot {:.3e} in column {})",
                    pivot_abs, col
                )));
            }

            if pivot_row != col {
                for j in 0..w {
                    aug.swap(col * w + j, pivot_row * w + j);
                }
            }

            let pivot = aug[col * w + col];
            for j in 0..w {
                aug[col * w + j] /= pivot;
            }

            for row in 0..n {
                if row != col {
                    let factor = aug[row * w + col];
                    if factor == ZERO {
                        continue;
                    }
                    for j in 0..w {
                        let val = aug[col * w + j];
                        aug[row * w + j] -= factor * val;
                    }
                }
            }
        }

        let mut out = CMatrix::zeros(n);
        for i in 0..n {
            out.data[i * n..(i + 1) * n].copy_from_slice(&aug[i * w + n..(i + 1) * w]);
        }
        Ok(out)
    }

    /// Solve `A x = b`.
    pub fn solve(&self, b: &[Complex64]) -> BeamResult<Vec<Complex64>> {
        if b.len() != self.n {
            return Err(BeamError::shape("solve", self.n, b.len()));
        }
        Ok(self.inverse()?.mul_vec(b))
    }

    /// Eigendecomposition of a Hermitian matrix.
    ///
    /// Only the upper triangle is trusted; the lower one is taken as its
    /// conjugate. Eigenvalues are returned in ascending order.
    pub fn hermitian_eigen(&self) -> HermitianEigen {
        let n = self.n;
        let mut a = self.clone();
        a.mirror_upper();
        let mut v = CMatrix::identity(n);

        let total: f64 = a.data.iter().map(|x| x.norm_sqr()).sum();
        let threshold = 1e-30 * total.max(f64::MIN_POSITIVE);

        for _ in 0..MAX_SWEEPS {
            let mut off = 0.0;
            for i in 0..n {
                for j in i + 1..n {
                    off += a.data[i * n + j].norm_sqr();
                }
            }
            if off <= threshold {
                break;
            }

            for p in 0..n.saturating_sub(1) {
                for q in p + 1..n {
                    let apq = a.data[p * n + q];
                    let mag = apq.norm();
                    if mag <= f64::MIN_POSITIVE {
                        continue;
                    }
                    // phase rotation makes a_pq real and positive
                    let phase = apq / mag;
                    for k in 0..n {
                        a.data[k * n + q] *= phase.conj();
                        v.data[k * n + q] *= phase.conj();
                    }
                    for k in 0..n {
                        a.data[q * n + k] *= phase;
                    }

                    let app = a.data[p * n + p].re;
                    let aqq = a.data[q * n + q].re;
                    let theta = (aqq - app) / (2.0 * mag);
                    let sign = if theta >= 0.0 { 1.0 } else { -1.0 };
                    let t = sign / (theta.abs() + (theta * theta + 1.0).sqrt());
                    let c = 1.0 / (t * t + 1.0).sqrt();
                    let s = t * c;

                    for k in 0..n {
                        let akp = a.data[k * n + p];
                        let akq = a.data[k * n + q];
                        a.data[k * n + p] = akp * c - akq * s;
                        a.data[k * n + q] = akp * s + akq * c;

                        let vkp = v.data[k * n + p];
                        let vkq = v.data[k * n + q];
                        v.data[k * n + p] = vkp * c - vkq * s;
                        v.data[k * n + q] = vkp * s + vkq * c;
                    }
                    for k in 0..n {
                        let apk = a.data[p * n + k];
                        let aqk = a.data[q * n + k];
                        a.data[p * n + k] = apk * c - aqk * s;
                        a.data[q * n + k] = apk * s + aqk * c;
                    }
                    a.data[p * n + q] = ZERO;
                    a.data[q * n + p] = ZERO;
                }
            }
        }

        let mut order: Vec<usize> = (0..n).collect();
        let diag = a.diag();
        order.sort_by(|&i, &j| diag[i].total_cmp(&diag[j]));

        let values = order.iter().map(|&i| diag[i]).collect();
        let mut vectors = CMatrix::zeros(n);
        for (col, &src) in order.iter().enumerate() {
            for k in 0..n {
                vectors.data[k * n + col] = v.data[k * n + src];
            }
        }
        HermitianEigen { values, vectors }
    }
}

/// Result of [`CMatrix::hermitian_eigen`]
#[derive(Debug, Clone)]
pub struct HermitianEigen {
    /// Eigenvalues, ascending
    pub values: Vec<f64>,
    /// Eigenvectors as columns, same order as `values`
    pub vectors: CMatrix,
}

impl HermitianEigen {
    /// Eigenvector `k` as an owned vector
    pub fn vector(&self, k: usize) -> Vec<Complex64> {
        let n = self.vectors.n;
        (0..n).map(|i| self.vectors.data[i * n + k]).collect()
    }

    /// `V f(Λ) V^H`
    pub fn reconstruct(&self, f: impl Fn(f64) -> f64) -> CMatrix {
        let n = self.vectors.n;
        let mut out = CMatrix::zeros(n);
        for k in 0..n {
            let w = f(self.values[k]);
            if w == 0.0 {
                continue;
            }
            out.add_outer(&self.vector(k), w);
        }
        out
    }

    /// Index of the largest eigenvalue
    pub fn max_index(&self) -> usize {
        self.values.len().saturating_sub(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn c(re: f64, im: f64) -> Complex64 {
        Complex64::new(re, im)
    }

    fn test_matrix() -> CMatrix {
        // Hermitian positive definite
        let mut m = CMatrix::zeros(3);
        m.add_outer(&[c(1.0, 0.0), c(0.0, 1.0), c(0.5, -0.5)], 2.0);
        m.add_outer(&[c(0.3, 0.2), c(1.0, 0.0), c(-0.4, 0.1)], 1.0);
        m.with_diagonal_loading(0.1)
    }

    // ========================================================================
    // Eigendecomposition
    // ========================================================================

    #[test]
    fn test_eigen_reconstructs_matrix() {
        let m = test_matrix();
        let eig = m.hermitian_eigen();
        assert!(eig.values.windows(2).all(|w| w[0] <= w[1]));
        let back = eig.reconstruct(|l| l);
        for i in 0..3 {
            for j in 0..3 {
                assert!((back.get(i, j) - m.get(i, j)).norm() < 1e-10);
            }
        }
    }

    #[test]
    fn test_eigenvectors_orthonormal() {
        let eig = test_matrix().hermitian_eigen();
        for a in 0..3 {
            for b in 0..3 {
                let d = dot_conj(&eig.vector(a), &eig.vector(b));
                let expected = if a == b { 1.0 } else { 0.0 };
                assert_relative_eq!(d.re, expected, epsilon = 1e-10);
                assert_relative_eq!(d.im, 0.0, epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn test_eigen_rank_one() {
        let v = [c(1.0, 0.0), c(0.0, 1.0), c(-1.0, 0.0), c(0.0, -1.0)];
        let m = CMatrix::outer(&v);
        let eig = m.hermitian_eigen();
        assert_relative_eq!(eig.values[3], 4.0, epsilon = 1e-10);
        for k in 0..3 {
            assert_relative_eq!(eig.values[k], 0.0, epsilon = 1e-10);
        }
        // leading eigenvector is parallel to v
        let proj = dot_conj(&eig.vector(3), &v).norm();
        assert_relative_eq!(proj, 2.0, epsilon = 1e-10);
    }

    #[test]
    fn test_eigen_diagonal_and_trivial() {
        let mut m = CMatrix::zeros(2);
        m.set(0, 0, c(3.0, 0.0));
        m.set(1, 1, c(1.0, 0.0));
        let eig = m.hermitian_eigen();
        assert_eq!(eig.values, vec![1.0, 3.0]);
        assert_eq!(eig.max_index(), 1);

        let eig = CMatrix::zeros(1).hermitian_eigen();
        assert_eq!(eig.values, vec![0.0]);
    }

    // ========================================================================
    // Inverse / solve
    // ========================================================================

    #[test]
    fn test_inverse() {
        let m = test_matrix();
        let inv = m.inverse().unwrap();
        let prod = m.matmul(&inv).unwrap();
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((prod.get(i, j) - c(expected, 0.0)).norm() < 1e-10);
            }
        }
    }

    #[test]
    fn test_singular_inverse_fails() {
        let m = CMatrix::outer(&[c(1.0, 0.0), c(1.0, 0.0)]);
        assert!(matches!(m.inverse(), Err(BeamError::Configuration(_))));
    }

    #[test]
    fn test_solve() {
        let m = test_matrix();
        let x = vec![c(1.0, -1.0), c(0.5, 0.0), c(0.0, 2.0)];
        let b = m.mul_vec(&x);
        let solved = m.solve(&b).unwrap();
        for (s, e) in solved.iter().zip(&x) {
            assert!((s - e).norm() < 1e-10);
        }
        assert!(m.solve(&b[..2]).is_err());
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    #[test]
    fn test_quad_form_and_hermitian() {
        let m = test_matrix();
        assert!(m.is_hermitian(1e-12));
        let h = [c(0.2, 0.1), c(-0.3, 0.0), c(0.0, 0.7)];
        let q = m.quad_form(&h);
        assert!(q.re > 0.0);
        assert_relative_eq!(q.im, 0.0, epsilon = 1e-12);

        let mut upper = CMatrix::zeros(2);
        upper.add_outer_upper(&[c(1.0, 0.0), c(0.0, 1.0)], 1.0);
        assert!(!upper.is_hermitian(1e-12));
        upper.mirror_upper();
        assert!(upper.is_hermitian(0.0));
        assert_eq!(upper, CMatrix::outer(&[c(1.0, 0.0), c(0.0, 1.0)]));
    }

    #[test]
    fn test_without_diagonal() {
        let m = test_matrix().without_diagonal();
        assert_eq!(m.trace(), 0.0);
        assert!(m.get(0, 1).norm() > 0.0);
    }
}
