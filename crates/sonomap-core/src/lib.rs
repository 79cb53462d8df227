//! # Acoustic Beamforming Engine
//!
//! This crate maps sound sources from microphone array recordings. It
//! estimates cross-spectral matrices from multichannel signals, focuses
//! the array on a grid of candidate locations, and deconvolves the
//! resulting maps with the array's point spread function.
//!
//! ## Overview
//!
//! - **Spectra**: Welch-averaged cross-spectral matrices and their eigendecomposition
//! - **Steering**: Four transfer vector formulations, shared across a computation chain
//! - **Beamformers**: Delay-and-sum, Capon, MUSIC, DAMAS, CLEAN-SC, GIB, CMF and more
//! - **Time domain**: Streaming delay-and-sum with moving focus grids, CLEAN-T
//! - **Cache**: Fingerprinted memory and disk cache for every derived result
//!
//! ## Signal Flow
//!
//! ```text
//! BlockSource ─▶ PowerSpectra ─▶ CrossSpectra ─▶ Beamformer ─▶ SourceMaps ─▶ SourceMap
//!                                                    ▲
//! MicGeometry + Grid + Environment ─▶ SteeringVector ┴─▶ PointSpreadFunction
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use sonomap_core::beamformer::{Beamformer, BeamformerBase, DelaySum};
//! use sonomap_core::cache::Cache;
//! use sonomap_core::geometry::MicGeometry;
//! use sonomap_core::grid::{Grid, RectGrid};
//! use sonomap_core::source::MemorySource;
//! use sonomap_core::spectra::PowerSpectra;
//! use sonomap_core::steering::SteeringVector;
//!
//! # fn main() -> sonomap_core::types::BeamResult<()> {
//! let mics = Arc::new(MicGeometry::from_xyz(&[[0.0, 0.0, 0.0], [0.1, 0.0, 0.0], [0.0, 0.1, 0.0]])?);
//! let grid: Arc<dyn Grid> = Arc::new(RectGrid::new(-0.5, 0.5, -0.5, 0.5, 1.0, 0.05)?);
//! let steer = Arc::new(SteeringVector::builder(mics, grid).build()?);
//!
//! let mut source = MemorySource::from_channels(vec![vec![0.0; 4096]; 3], 51200.0)?;
//! let cache = Cache::in_memory();
//! let csm = PowerSpectra::builder().block_size(256).build()?.csm(&mut source, &cache)?;
//!
//! let maps = DelaySum::new(BeamformerBase::new(steer)).result(&csm, &cache)?;
//! let third_octave = maps.synthetic(4000.0, 3)?;
//! println!("peak at {:?}", third_octave.peak());
//! # Ok(())
//! # }
//! ```

pub mod beamformer;
pub mod cache;
pub mod config;
pub mod fft_utils;
pub mod geometry;
pub mod grid;
pub mod linalg;
pub mod observe;
pub mod psf;
pub mod sector;
pub mod source;
pub mod spectra;
pub mod steering;
pub mod time_domain;
pub mod trajectory;
pub mod types;
pub mod window;

pub use beamformer::{Beamformer, BeamformerBase, BeamformerKind, SourceMap, SourceMaps};
pub use cache::{Cache, CacheConfig, CachePolicy};
pub use config::{ConfigError, SolverConfig, SonomapConfig};
pub use geometry::{Environment, MicGeometry, Point3};
pub use grid::Grid;
pub use source::{BlockSource, MemorySource, SampleBlock};
pub use spectra::{CrossSpectra, PowerSpectra};
pub use steering::{Reference, SteerType, SteeringVector};
pub use types::{BeamError, BeamResult, Complex};
