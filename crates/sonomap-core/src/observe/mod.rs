//! # Observability
//!
//! Every stage reports through `tracing` macros:
//!
//! - `debug!` when a stage evaluates (spectra, beamformer, PSF columns)
//! - `info!` when a cache entry is written
//! - `warn!` on cache fallbacks and iteration caps
//! - `error!` when a solver diverges
//!
//! The library never installs a subscriber itself. Applications call
//! [`init_logging`] once at startup, usually with the `logging` section of
//! [`crate::config::SonomapConfig`].

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat, LogLevel};
