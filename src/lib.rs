//! # labscope
//!
//! Microscope control application: instrument drivers behind a uniform
//! settings interface and measurements that coordinate them.
//!
//! ## Crate Structure
//!
//! - **`config`**: [`config::LabscopeConfig`], loaded with Figment from TOML
//!   plus `LABSCOPE_` environment overrides, and its validation.
//! - **`tracing_setup`**: `tracing-subscriber` initialisation (pretty,
//!   compact or JSON output, `RUST_LOG` aware).
//! - **`app`**: [`app::MicroscopeApp`], which builds the configured hardware
//!   and measurements and starts runs with a full settings snapshot.
//!
//! The building blocks live in the workspace crates, re-exported here:
//! [`core`] (settings and capabilities), [`drivers`], [`storage`] and
//! [`experiment`].

pub mod app;
pub mod config;
pub mod tracing_setup;

pub use app::MicroscopeApp;
pub use config::LabscopeConfig;

/// Settings, capabilities and the hardware component lifecycle.
pub use labscope_core as core;
/// Measurement files and loaders.
pub use labscope_storage as storage;
/// Measurements and the runner.
pub use labscope_experiment as experiment;

/// Instrument drivers.
pub mod drivers {
    pub use labscope_driver_andor as andor;
    pub use labscope_driver_mcl as mcl;
    pub use labscope_driver_mock as mock;
}
