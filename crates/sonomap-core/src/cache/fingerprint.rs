//! Fingerprints: composite keys identifying a cacheable computation
//!
//! A fingerprint is built from three parts:
//!
//! - the **class** of the computation (`"PowerSpectra"`, `"BeamformerBase"`, ...)
//! - an ordered digest of every parameter that influences the result
//! - the digest of the upstream data the computation consumes
//!
//! The cache key is the SHA-256 over all three, so changing any single
//! parameter or any upstream input changes the key.
//!
//! ```rust
//! use sonomap_core::cache::Fingerprint;
//!
//! let a = Fingerprint::builder("PowerSpectra")
//!     .param("block_size", &128usize)
//!     .param("overlap", &0.5)
//!     .data("feedbeef")
//!     .build();
//! let b = Fingerprint::builder("PowerSpectra")
//!     .param("block_size", &256usize)
//!     .param("overlap", &0.5)
//!     .data("feedbeef")
//!     .build();
//! assert_ne!(a.key(), b.key());
//! ```

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A value that can be fed into a [`ContentHasher`].
pub trait HashValue {
    fn hash_into(&self, hasher: &mut Sha256);
}

impl HashValue for f64 {
    fn hash_into(&self, hasher: &mut Sha256) {
        // -0.0 and 0.0 describe the same configuration
        let v = if *self == 0.0 { 0.0f64 } else { *self };
        hasher.update(v.to_bits().to_le_bytes());
    }
}

impl HashValue for u64 {
    fn hash_into(&self, hasher: &mut Sha256) {
        hasher.update(self.to_le_bytes());
    }
}

impl HashValue for usize {
    fn hash_into(&self, hasher: &mut Sha256) {
        (*self as u64).hash_into(hasher);
    }
}

impl HashValue for i64 {
    fn hash_into(&self, hasher: &mut Sha256) {
        hasher.update(self.to_le_bytes());
    }
}

impl HashValue for bool {
    fn hash_into(&self, hasher: &mut Sha256) {
        hasher.update([*self as u8]);
    }
}

impl HashValue for str {
    fn hash_into(&self, hasher: &mut Sha256) {
        self.len().hash_into(hasher);
        hasher.update(self.as_bytes());
    }
}

impl HashValue for String {
    fn hash_into(&self, hasher: &mut Sha256) {
        self.as_str().hash_into(hasher);
    }
}

impl<T: HashValue> HashValue for [T] {
    fn hash_into(&self, hasher: &mut Sha256) {
        self.len().hash_into(hasher);
        for v in self {
            v.hash_into(hasher);
        }
    }
}

impl<T: HashValue> HashValue for Vec<T> {
    fn hash_into(&self, hasher: &mut Sha256) {
        self.as_slice().hash_into(hasher);
    }
}

impl<T: HashValue, const N: usize> HashValue for [T; N] {
    fn hash_into(&self, hasher: &mut Sha256) {
        self.as_slice().hash_into(hasher);
    }
}

impl<T: HashValue> HashValue for Option<T> {
    fn hash_into(&self, hasher: &mut Sha256) {
        match self {
            None => hasher.update([0u8]),
            Some(v) => {
                hasher.update([1u8]);
                v.hash_into(hasher);
            }
        }
    }
}

impl<T: HashValue + ?Sized> HashValue for &T {
    fn hash_into(&self, hasher: &mut Sha256) {
        (**self).hash_into(hasher);
    }
}

/// Incremental SHA-256 over named fields.
///
/// Field names are hashed along with values so that reordering or renaming
/// parameters yields a different digest.
#[derive(Clone)]
pub struct ContentHasher {
    inner: Sha256,
}

impl ContentHasher {
    /// Start a digest tagged with a type name.
    pub fn new(tag: &str) -> Self {
        let mut inner = Sha256::new();
        tag.hash_into(&mut inner);
        Self { inner }
    }

    /// Add a named field (builder style).
    pub fn field<V: HashValue + ?Sized>(mut self, name: &str, value: &V) -> Self {
        self.write(name, value);
        self
    }

    /// Add a named field in place.
    pub fn write<V: HashValue + ?Sized>(&mut self, name: &str, value: &V) {
        name.hash_into(&mut self.inner);
        value.hash_into(&mut self.inner);
    }

    /// Hex-encoded digest.
    pub fn finish(self) -> String {
        hex::encode(self.inner.finalize())
    }
}

/// Composite cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    class: String,
    params_digest: String,
    data_digest: String,
}

impl Fingerprint {
    /// Start building a fingerprint for a computation class.
    pub fn builder(class: &str) -> FingerprintBuilder {
        FingerprintBuilder {
            class: class.to_string(),
            params: ContentHasher::new(class),
            data: Vec::new(),
        }
    }

    /// Computation class.
    pub fn class(&self) -> &str {
        &self.class
    }

    /// Digest of the ordered parameter set.
    pub fn params_digest(&self) -> &str {
        &self.params_digest
    }

    /// Digest of the upstream data.
    pub fn data_digest(&self) -> &str {
        &self.data_digest
    }

    /// Cache key (hex SHA-256 over class, parameters and data).
    pub fn key(&self) -> String {
        ContentHasher::new("fingerprint")
            .field("class", &self.class)
            .field("params", &self.params_digest)
            .field("data", &self.data_digest)
            .finish()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.class, &self.key()[..12])
    }
}

/// Builder for [`Fingerprint`].
pub struct FingerprintBuilder {
    class: String,
    params: ContentHasher,
    data: Vec<String>,
}

impl FingerprintBuilder {
    /// Add a parameter that influences the result.
    pub fn param<V: HashValue + ?Sized>(mut self, name: &str, value: &V) -> Self {
        self.params.write(name, value);
        self
    }

    /// Add an upstream data digest.
    pub fn data(mut self, digest: &str) -> Self {
        self.data.push(digest.to_string());
        self
    }

    pub fn build(self) -> Fingerprint {
        let data_digest = ContentHasher::new("data").field("digests", &self.data).finish();
        Fingerprint {
            class: self.class,
            params_digest: self.params.finish(),
            data_digest,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> FingerprintBuilder {
        Fingerprint::builder("PowerSpectra")
            .param("block_size", &128usize)
            .param("window", "Hanning")
    }

    #[test]
    fn test_identical_inputs_identical_key() {
        let a = base().data("abc").build();
        let b = base().data("abc").build();
        assert_eq!(a, b);
        assert_eq!(a.key(), b.key());
        assert_eq!(a.key().len(), 64);
    }

    #[test]
    fn test_each_part_changes_key() {
        let reference = base().data("abc").build().key();

        let other_data = base().data("abd").build().key();
        assert_ne!(reference, other_data, "data digest must affect key");

        let other_param = Fingerprint::builder("PowerSpectra")
            .param("block_size", &256usize)
            .param("window", "Hanning")
            .data("abc")
            .build()
            .key();
        assert_ne!(reference, other_param, "parameter must affect key");

        let other_class = Fingerprint::builder("EigenSpectra")
            .param("block_size", &128usize)
            .param("window", "Hanning")
            .data("abc")
            .build()
            .key();
        assert_ne!(reference, other_class, "class must affect key");
    }

    #[test]
    fn test_field_names_matter() {
        let a = ContentHasher::new("t").field("low", &1usize).finish();
        let b = ContentHasher::new("t").field("high", &1usize).finish();
        assert_ne!(a, b);
    }

    #[test]
    fn test_negative_zero_normalized() {
        let a = ContentHasher::new("t").field("x", &0.0f64).finish();
        let b = ContentHasher::new("t").field("x", &-0.0f64).finish();
        assert_eq!(a, b);
    }

    #[test]
    fn test_option_and_slices() {
        let none = ContentHasher::new("t").field("v", &None::<f64>).finish();
        let some = ContentHasher::new("t").field("v", &Some(0.0)).finish();
        assert_ne!(none, some);

        let a = ContentHasher::new("t").field("v", &[1.0, 2.0][..]).finish();
        let b = ContentHasher::new("t").field("v", &[2.0, 1.0][..]).finish();
        assert_ne!(a, b, "order must matter");
    }
}
