//! Measurement file storage for labscope.
//!
//! A measurement writes into one [`MeasurementFile`]: HDF5 when the
//! `storage_hdf5` feature is enabled, otherwise a single JSON document. Both
//! share the same layout:
//!
//! ```text
//! /                                   attrs: time_id, measurement
//! /app/settings                       attrs: application settings
//! /hardware/<hw>/settings             attrs: one group per component
//! /measurement/<name>/settings        attrs: measurement settings
//! /measurement/<name>/<dataset>       f64 arrays
//! ```
//!
//! [`loaders`] reads either format back.

pub mod document;
pub mod error;
pub mod file;
#[cfg(feature = "storage_hdf5")]
pub mod hdf5_file;
#[cfg(feature = "storage_json")]
pub mod json_file;
pub mod loaders;
pub mod provenance;

pub use document::{ArrayData, Document};
pub use error::{StorageError, StorageResult};
pub use file::{create_file, measurement_file_name, MeasurementFile, StorageFormat};
#[cfg(feature = "storage_hdf5")]
pub use hdf5_file::Hdf5File;
#[cfg(feature = "storage_json")]
pub use json_file::JsonFile;
pub use loaders::{
    find_settings, load, load_settings, measurement_name, LoadedMeasurement, NumberGenData,
    Settings, SlowScanData, DEFAULT_SETTINGS_PATTERN,
};
pub use provenance::{open_measurement_file, Provenance};
