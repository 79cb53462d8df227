//! On-disk cache records
//!
//! Each entry is a pair of files under `<root>/<class>/`:
//!
//! - `<key>.json`: metadata (format name, version, fingerprint parts,
//!   shape, dtype, scalar attributes, creation time)
//! - `<key>.bin`: payload, little-endian `f64` values
//!
//! Writes go to temporary files that are renamed into place, so a reader
//! never observes a half-written entry. The metadata file is renamed last and
//! marks the entry as complete.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use num_complex::Complex64;

use super::fingerprint::Fingerprint;
use crate::types::{BeamError, BeamResult};

/// Record format name written into every metadata file
pub const FORMAT_NAME: &str = "sonomap-cache";
/// Record format version; entries with another version are rejected
pub const FORMAT_VERSION: u32 = 1;

/// Maximum allowed class name length
const MAX_ID_LENGTH: usize = 128;

/// Element type of a cached array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Real,
    /// Interleaved `re, im` pairs
    Complex,
}

/// Flat numeric array with shape and scalar attributes
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayRecord {
    pub shape: Vec<usize>,
    pub dtype: DType,
    pub values: Vec<f64>,
    pub attrs: BTreeMap<String, f64>,
}

impl ArrayRecord {
    pub fn real(shape: Vec<usize>, values: Vec<f64>) -> Self {
        Self {
            shape,
            dtype: DType::Real,
            values,
            attrs: BTreeMap::new(),
        }
    }

    pub fn complex(shape: Vec<usize>, values: &[Complex64]) -> Self {
        Self {
            shape,
            dtype: DType::Complex,
            values: values.iter().flat_map(|c| [c.re, c.im]).collect(),
            attrs: BTreeMap::new(),
        }
    }

    pub fn with_attr(mut self, name: &str, value: f64) -> Self {
        self.attrs.insert(name.to_string(), value);
        self
    }

    /// Attribute lookup that fails with a consistency error when absent.
    pub fn attr(&self, name: &str) -> BeamResult<f64> {
        self.attrs.get(name).copied().ok_or_else(|| {
            BeamError::CacheConsistency(format!("cache record lacks attribute '{}'", name))
        })
    }

    /// Number of `f64` values implied by shape and dtype.
    pub fn expected_len(&self) -> usize {
        let n: usize = self.shape.iter().product();
        match self.dtype {
            DType::Real => n,
            DType::Complex => 2 * n,
        }
    }

    /// Verify dtype, rank and payload length against what a reader expects.
    pub fn check(&self, dtype: DType, rank: usize) -> BeamResult<()> {
        if self.dtype != dtype {
            return Err(BeamError::CacheConsistency(format!(
                "expected {:?} data, found {:?}",
                dtype, self.dtype
            )));
        }
        if self.shape.len() != rank {
            return Err(BeamError::CacheConsistency(format!(
                "expected rank {} array, found shape {:?}",
                rank, self.shape
            )));
        }
        if self.values.len() != self.expected_len() {
            return Err(BeamError::CacheConsistency(format!(
                "shape {:?} needs {} values, found {}",
                self.shape,
                self.expected_len(),
                self.values.len()
            )));
        }
        Ok(())
    }

    /// Values reassembled as complex numbers.
    pub fn complex_values(&self) -> Vec<Complex64> {
        self.values
            .chunks_exact(2)
            .map(|c| Complex64::new(c[0], c[1]))
            .collect()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct EntryMeta {
    format: String,
    version: u32,
    class: String,
    key: String,
    params_digest: String,
    data_digest: String,
    shape: Vec<usize>,
    dtype: DType,
    attrs: BTreeMap<String, f64>,
    created: String,
}

/// Validate a class name for use as a directory.
fn validate_path_id(id: &str) -> BeamResult<()> {
    if id.is_empty() || id.len() > MAX_ID_LENGTH {
        return Err(BeamError::config(format!(
            "cache class name must be 1..={} characters",
            MAX_ID_LENGTH
        )));
    }
    if id.starts_with('.') {
        return Err(BeamError::config("cache class name cannot start with '.'"));
    }
    if let Some(c) = id
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && *c != '-' && *c != '_')
    {
        return Err(BeamError::config(format!(
            "invalid character '{}' in cache class name",
            c
        )));
    }
    Ok(())
}

/// Directory of persisted cache entries
#[derive(Debug, Clone)]
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    /// Open (and create) a writable store.
    pub fn open(root: impl AsRef<Path>) -> BeamResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Open a store without touching the filesystem.
    pub fn open_existing(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn paths(&self, fp: &Fingerprint) -> BeamResult<(PathBuf, PathBuf)> {
        validate_path_id(fp.class())?;
        let dir = self.root.join(fp.class());
        let key = fp.key();
        Ok((dir.join(format!("{}.json", key)), dir.join(format!("{}.bin", key))))
    }

    pub fn contains(&self, fp: &Fingerprint) -> bool {
        self.paths(fp).map(|(meta, _)| meta.exists()).unwrap_or(false)
    }

    /// Read an entry; `Ok(None)` when absent.
    pub fn load(&self, fp: &Fingerprint) -> BeamResult<Option<ArrayRecord>> {
        let (meta_path, data_path) = self.paths(fp)?;
        if !meta_path.exists() {
            return Ok(None);
        }

        let meta: EntryMeta = serde_json::from_reader(BufReader::new(File::open(&meta_path)?))?;
        if meta.format != FORMAT_NAME || meta.version != FORMAT_VERSION {
            return Err(BeamError::CacheConsistency(format!(
                "{}: unsupported record format {} v{}",
                meta_path.display(),
                meta.format,
                meta.version
            )));
        }
        if meta.class != fp.class() || meta.key != fp.key() {
            return Err(BeamError::CacheConsistency(format!(
                "{}: record belongs to {} ({})",
                meta_path.display(),
                meta.class,
                meta.key
            )));
        }

        let mut bytes = Vec::new();
        BufReader::new(File::open(&data_path)?).read_to_end(&mut bytes)?;
        if bytes.len() % 8 != 0 {
            return Err(BeamError::CacheConsistency(format!(
                "{}: payload of {} bytes is not a whole number of f64 values",
                data_path.display(),
                bytes.len()
            )));
        }
        let values: Vec<f64> = bytes
            .chunks_exact(8)
            .map(|b| f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
            .collect();

        let record = ArrayRecord {
            shape: meta.shape,
            dtype: meta.dtype,
            values,
            attrs: meta.attrs,
        };
        if record.values.len() != record.expected_len() {
            return Err(BeamError::CacheConsistency(format!(
                "{}: shape {:?} needs {} values, payload has {}",
                data_path.display(),
                record.shape,
                record.expected_len(),
                record.values.len()
            )));
        }
        Ok(Some(record))
    }

    /// Write an entry, replacing any previous one.
    pub fn save(&self, fp: &Fingerprint, record: &ArrayRecord) -> BeamResult<()> {
        if record.values.len() != record.expected_len() {
            return Err(BeamError::CacheConsistency(format!(
                "refusing to store shape {:?} with {} values",
                record.shape,
                record.values.len()
            )));
        }
        let (meta_path, data_path) = self.paths(fp)?;
        if let Some(dir) = meta_path.parent() {
            fs::create_dir_all(dir)?;
        }

        let data_tmp = data_path.with_extension("bin.tmp");
        {
            let mut w = BufWriter::new(File::create(&data_tmp)?);
            for v in &record.values {
                w.write_all(&v.to_le_bytes())?;
            }
            w.flush()?;
        }
        fs::rename(&data_tmp, &data_path)?;

        let meta = EntryMeta {
            format: FORMAT_NAME.to_string(),
            version: FORMAT_VERSION,
            class: fp.class().to_string(),
            key: fp.key(),
            params_digest: fp.params_digest().to_string(),
            data_digest: fp.data_digest().to_string(),
            shape: record.shape.clone(),
            dtype: record.dtype,
            attrs: record.attrs.clone(),
            created: chrono::Utc::now().to_rfc3339(),
        };
        let meta_tmp = meta_path.with_extension("json.tmp");
        {
            let mut w = BufWriter::new(File::create(&meta_tmp)?);
            serde_json::to_writer_pretty(&mut w, &meta)?;
            w.flush()?;
        }
        fs::rename(&meta_tmp, &meta_path)?;
        Ok(())
    }

    /// Remove every entry; returns the number of removed records.
    pub fn clear(&self) -> BeamResult<usize> {
        if !self.root.exists() {
            return Ok(0);
        }
        let mut removed = 0;
        for class_dir in fs::read_dir(&self.root)? {
            let class_dir = class_dir?.path();
            if !class_dir.is_dir() {
                continue;
            }
            for entry in fs::read_dir(&class_dir)? {
                let path = entry?.path();
                if path.extension().map(|e| e == "json").unwrap_or(false) {
                    removed += 1;
                }
                fs::remove_file(&path)?;
            }
            fs::remove_dir(&class_dir)?;
        }
        Ok(removed)
    }
}
