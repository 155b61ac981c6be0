use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "storage_hdf5")]
    #[error("HDF5 error: {0}")]
    Hdf5(#[from] hdf5::Error),

    #[error("Attribute '{0}' cannot be stored: {1}")]
    InvalidAttribute(String, String),

    #[error("Dataset '{0}' not found")]
    DatasetNotFound(String),

    #[error("Dataset '{0}' already exists")]
    DatasetExists(String),

    #[error("Dataset '{dataset}': expected {expected} values, got {got}")]
    ShapeMismatch {
        dataset: String,
        expected: usize,
        got: usize,
    },

    #[error("Dataset '{dataset}': index {index:?} out of range for shape {shape:?}")]
    IndexOutOfRange {
        dataset: String,
        index: Vec<usize>,
        shape: Vec<usize>,
    },

    #[error("Dataset '{0}' was not created extendable")]
    NotExtendable(String),

    #[error("File {0} is already closed")]
    Closed(PathBuf),

    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(PathBuf),

    #[error("No measurement group in {0}")]
    NoMeasurement(PathBuf),

    #[error("Storage backend '{0}' not enabled in this build")]
    BackendNotEnabled(&'static str),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;
