//! Point spread function
//!
//! `psf[g, s]` is the delay-and-sum output at grid point `g` for a unit
//! source at grid point `s`:
//!
//! ```text
//! psf[g, s] = |h_g^H a_s|²
//! psf[g, s] = (|h_g^H a_s|² - Σ_m |h_gm|² |a_sm|²) · N / (N - 1)    (r_diag)
//! ```
//!
//! Columns are computed on demand and persisted through the cache under
//! class `PointSpreadFunction`. A column computed alone is stored as its own
//! record (fingerprint with a `column` parameter); a request covering the
//! whole grid is stored once as a `[grid × grid]` matrix record.
//!
//! | Mode       | Behaviour                                                  |
//! |------------|------------------------------------------------------------|
//! | `Single`   | compute only the requested columns                         |
//! | `Full`     | compute every column on first use                          |
//! | `ReadOnly` | serve stored columns only; a missing column is an error    |

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::cache::{
    ArrayRecord, Cache, CachePolicy, Cacheable, DType, Fingerprint, FingerprintBuilder,
};
use crate::linalg::dot_conj;
use crate::steering::SteeringVector;
use crate::types::{BeamError, BeamResult};

/// Column calculation strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PsfCalcMode {
    #[default]
    Single,
    Full,
    ReadOnly,
}

/// One PSF column: the map of a unit source at grid point `index`
#[derive(Debug, Clone, PartialEq)]
pub struct PsfColumn {
    index: usize,
    values: Vec<f64>,
}

impl PsfColumn {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Cacheable for PsfColumn {
    fn to_record(&self) -> ArrayRecord {
        ArrayRecord::real(vec![self.values.len()], self.values.clone())
            .with_attr("index", self.index as f64)
    }

    fn from_record(record: ArrayRecord) -> BeamResult<Self> {
        record.check(DType::Real, 1)?;
        let index = record.attr("index")?;
        if !(index.is_finite() && index >= 0.0 && index.fract() == 0.0) {
            return Err(BeamError::CacheConsistency(format!(
                "psf column index must be a non-negative integer, got {}",
                index
            )));
        }
        Ok(Self {
            index: index as usize,
            values: record.values,
        })
    }
}

/// Complete `[grid × grid]` PSF
#[derive(Debug, Clone, PartialEq)]
pub struct PsfMatrix {
    n: usize,
    /// column-major: column `s` is `values[s*n..(s+1)*n]`
    values: Vec<f64>,
}

impl PsfMatrix {
    /// Matrix from its columns, e.g. a measured PSF.
    pub fn from_columns(columns: Vec<Vec<f64>>) -> BeamResult<Self> {
        let n = columns.len();
        if let Some(bad) = columns.iter().find(|c| c.len() != n) {
            return Err(BeamError::shape("psf column length", n, bad.len()));
        }
        Ok(Self {
            n,
            values: columns.concat(),
        })
    }

    pub fn size(&self) -> usize {
        self.n
    }

    /// Response at `g` to a unit source at `s`.
    pub fn get(&self, g: usize, s: usize) -> f64 {
        self.values[s * self.n + g]
    }

    /// Column `s`: the map of a unit source at `s`.
    pub fn column(&self, s: usize) -> &[f64] {
        &self.values[s * self.n..(s + 1) * self.n]
    }
}

impl Cacheable for PsfMatrix {
    fn to_record(&self) -> ArrayRecord {
        ArrayRecord::real(vec![self.n, self.n], self.values.clone())
    }

    fn from_record(record: ArrayRecord) -> BeamResult<Self> {
        record.check(DType::Real, 2)?;
        let n = record.shape[0];
        if record.shape[1] != n {
            return Err(BeamError::CacheConsistency(format!(
                "psf record must be square, got {}x{}",
                n, record.shape[1]
            )));
        }
        Ok(Self {
            n,
            values: record.values,
        })
    }
}

/// Point spread function at one frequency
#[derive(Debug)]
pub struct PointSpreadFunction {
    steer: Arc<SteeringVector>,
    freq: f64,
    r_diag: bool,
    calc_mode: PsfCalcMode,
    cache_policy: Option<CachePolicy>,
    /// one slot per grid point, filled as columns become known
    state: Mutex<Vec<Option<Arc<PsfColumn>>>>,
}

impl PointSpreadFunction {
    pub fn new(steer: Arc<SteeringVector>, freq: f64) -> BeamResult<Self> {
        if !(freq.is_finite() && freq >= 0.0) {
            return Err(BeamError::config(format!(
                "psf frequency must be non-negative, got {}",
                freq
            )));
        }
        Ok(Self {
            steer,
            freq,
            r_diag: false,
            calc_mode: PsfCalcMode::Single,
            cache_policy: None,
            state: Mutex::new(Vec::new()),
        })
    }

    /// Remove the autopower terms, as a delay-and-sum with `r_diag` does.
    pub fn r_diag(mut self, r_diag: bool) -> Self {
        self.r_diag = r_diag;
        self
    }

    pub fn calc_mode(mut self, mode: PsfCalcMode) -> Self {
        self.calc_mode = mode;
        self
    }

    pub fn cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = Some(policy);
        self
    }

    pub fn steer(&self) -> &Arc<SteeringVector> {
        &self.steer
    }

    pub fn freq(&self) -> f64 {
        self.freq
    }

    /// Fingerprint of the complete matrix record.
    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint_builder().build()
    }

    /// Fingerprint of the record holding column `s` alone.
    pub fn column_fingerprint(&self, s: usize) -> Fingerprint {
        self.fingerprint_builder().param("column", &s).build()
    }

    fn fingerprint_builder(&self) -> FingerprintBuilder {
        Fingerprint::builder("PointSpreadFunction")
            .param("freq", &self.freq)
            .param("r_diag", &self.r_diag)
            .data(self.steer.digest())
    }

    /// Requested columns, computing what is missing according to the mode.
    pub fn columns(&self, indices: &[usize], cache: &Cache) -> BeamResult<Vec<Arc<PsfColumn>>> {
        let n = self.steer.grid_size();
        if let Some(&bad) = indices.iter().find(|&&s| s >= n) {
            return Err(BeamError::shape("psf column index", n, bad));
        }
        self.ensure(indices, cache)
    }

    /// A single column.
    pub fn column(&self, s: usize, cache: &Cache) -> BeamResult<Arc<PsfColumn>> {
        let mut cols = self.columns(&[s], cache)?;
        cols.pop()
            .ok_or_else(|| BeamError::shape("psf column count", 1, 0))
    }

    /// The complete matrix.
    pub fn full(&self, cache: &Cache) -> BeamResult<PsfMatrix> {
        let all: Vec<usize> = (0..self.steer.grid_size()).collect();
        let columns = self.ensure(&all, cache)?;
        let n = columns.len();
        let mut values = Vec::with_capacity(n * n);
        for col in &columns {
            values.extend_from_slice(col.values());
        }
        Ok(PsfMatrix { n, values })
    }

    fn ensure(&self, indices: &[usize], cache: &Cache) -> BeamResult<Vec<Arc<PsfColumn>>> {
        let n = self.steer.grid_size();
        let policy = cache.resolve(self.cache_policy);
        let mut state = self.state.lock();
        if state.len() != n {
            *state = vec![None; n];
        }

        let mut targets: Vec<usize> = match self.calc_mode {
            PsfCalcMode::Full => (0..n).collect(),
            _ => indices.to_vec(),
        };
        targets.sort_unstable();
        targets.dedup();
        let whole = targets.len() == n;

        let reads = !matches!(policy, CachePolicy::Never | CachePolicy::Overwrite);
        if reads && targets.iter().any(|&s| state[s].is_none()) {
            if whole {
                self.load_matrix(cache, &mut state)?;
                self.load_columns(cache, &targets, &mut state)?;
            } else {
                self.load_columns(cache, &targets, &mut state)?;
                if targets.iter().any(|&s| state[s].is_none()) {
                    self.load_matrix(cache, &mut state)?;
                }
            }
        }

        let missing: Vec<usize> = targets
            .iter()
            .copied()
            .filter(|&s| state[s].is_none())
            .collect();
        if let (PsfCalcMode::ReadOnly, Some(s)) = (self.calc_mode, missing.first()) {
            return Err(BeamError::config(format!(
                "psf column {} is not stored and calc mode is read-only",
                s
            )));
        }

        if !missing.is_empty() {
            tracing::debug!(
                freq = self.freq,
                columns = missing.len(),
                mode = ?self.calc_mode,
                "computing psf columns"
            );
            let h = self.steer.steer_all(self.freq);
            if whole {
                for &s in &missing {
                    state[s] = Some(Arc::new(self.compute_column(&h, s)));
                }
                let mut values = Vec::with_capacity(n * n);
                for col in state.iter().flatten() {
                    values.extend_from_slice(col.values());
                }
                cache.store(&self.fingerprint(), policy, PsfMatrix { n, values });
            } else {
                for &s in &missing {
                    let col = self.compute_column(&h, s);
                    state[s] = Some(cache.store(&self.column_fingerprint(s), policy, col));
                }
            }
        }

        indices
            .iter()
            .map(|&s| {
                state[s]
                    .clone()
                    .ok_or_else(|| BeamError::config(format!("psf column {} is unavailable", s)))
            })
            .collect()
    }

    /// Fill empty slots from a stored matrix record.
    fn load_matrix(&self, cache: &Cache, state: &mut [Option<Arc<PsfColumn>>]) -> BeamResult<()> {
        let fp = self.fingerprint();
        let n = state.len();
        match cache.load::<PsfMatrix>(&fp) {
            Ok(Some(stored)) if stored.size() == n => {
                for (s, slot) in state.iter_mut().enumerate() {
                    if slot.is_none() {
                        *slot = Some(Arc::new(PsfColumn {
                            index: s,
                            values: stored.column(s).to_vec(),
                        }));
                    }
                }
            }
            Ok(Some(stored)) => {
                tracing::warn!(fingerprint = %fp, stored = stored.size(), expected = n, "psf entry has the wrong size; ignoring");
            }
            Ok(None) => {}
            Err(e) if self.calc_mode == PsfCalcMode::ReadOnly => return Err(e),
            Err(e) => {
                tracing::warn!(fingerprint = %fp, error = %e, "unreadable psf entry; recomputing");
            }
        }
        Ok(())
    }

    /// Fill empty target slots from stored column records.
    fn load_columns(
        &self,
        cache: &Cache,
        targets: &[usize],
        state: &mut [Option<Arc<PsfColumn>>],
    ) -> BeamResult<()> {
        let n = state.len();
        for &s in targets {
            if state[s].is_some() {
                continue;
            }
            let fp = self.column_fingerprint(s);
            match cache.load::<PsfColumn>(&fp) {
                Ok(Some(col)) if col.index() == s && col.len() == n => state[s] = Some(col),
                Ok(Some(col)) => {
                    tracing::warn!(fingerprint = %fp, index = col.index(), len = col.len(), "psf column entry does not match the grid; ignoring");
                }
                Ok(None) => {}
                Err(e) if self.calc_mode == PsfCalcMode::ReadOnly => return Err(e),
                Err(e) => {
                    tracing::warn!(fingerprint = %fp, error = %e, "unreadable psf column entry; recomputing");
                }
            }
        }
        Ok(())
    }

    fn compute_column(&self, h: &[Vec<num_complex::Complex64>], s: usize) -> PsfColumn {
        let a = self.steer.transfer(self.freq, s);
        let nm = a.len() as f64;
        let values = h
            .iter()
            .map(|hg| {
                let p = dot_conj(hg, &a).norm_sqr();
                if self.r_diag && nm > 1.0 {
                    let auto: f64 = hg
                        .iter()
                        .zip(&a)
                        .map(|(x, y)| x.norm_sqr() * y.norm_sqr())
                        .sum();
                    (p - auto) * nm / (nm - 1.0)
                } else {
                    p
                }
            })
            .collect();
        PsfColumn { index: s, values }
    }
}
