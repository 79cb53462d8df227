//! # Point Source Scenarios
//!
//! Renders free-field point sources at the microphones of an array and
//! exposes the result as a [`BlockSource`](sonomap_core::source::BlockSource):
//!
//! - **Emitters**: sine tones and seeded white noise, static or moving
//! - **Propagation**: retarded time, spherical spreading and the convective
//!   amplification `1 / (1 - M_r)` of moving sources
//! - **Noise**: uncorrelated Gaussian sensor noise from a seeded generator
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use sonomap_core::geometry::{Environment, MicGeometry, Point3};
//! use sonomap_core::source::read_channels;
//! use sonomap_core::trajectory::Trajectory;
//! use sonomap_sim::{ScenarioConfig, ScenarioEngine, SineEmitter};
//!
//! let mics = Arc::new(MicGeometry::from_xyz(&[[0.0, 0.0, 0.0], [0.2, 0.0, 0.0]]).unwrap());
//! let tone = SineEmitter::new("tone", 1000.0, 1.0, Trajectory::Static {
//!     position: Point3::new(0.0, 0.0, 1.0),
//! });
//! let mut engine = ScenarioEngine::new(
//!     ScenarioConfig::default(),
//!     mics,
//!     Environment::default(),
//!     vec![Box::new(tone)],
//! )
//! .unwrap();
//! let channels = read_channels(&mut engine, 1024).unwrap();
//! ```

pub mod config;
pub mod emitter;
pub mod engine;

pub use config::{ScenarioConfig, SimError};
pub use emitter::{Emitter, NoiseEmitter, SineEmitter};
pub use engine::{EmitterStatus, ScenarioEngine};
