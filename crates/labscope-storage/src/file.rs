//! Writer interface shared by the storage backends.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{StorageError, StorageResult};

/// On-disk format of a measurement file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageFormat {
    #[default]
    Json,
    Hdf5,
}

impl StorageFormat {
    pub fn extension(self) -> &'static str {
        match self {
            StorageFormat::Json => "json",
            StorageFormat::Hdf5 => "h5",
        }
    }

    /// Format implied by a file suffix.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "json" => Some(StorageFormat::Json),
            "h5" | "hdf5" => Some(StorageFormat::Hdf5),
            _ => None,
        }
    }

    pub fn is_enabled(self) -> bool {
        match self {
            StorageFormat::Json => cfg!(feature = "storage_json"),
            StorageFormat::Hdf5 => cfg!(feature = "storage_hdf5"),
        }
    }
}

impl std::str::FromStr for StorageFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(StorageFormat::Json),
            "h5" | "hdf5" => Ok(StorageFormat::Hdf5),
            other => Err(format!("unknown storage format '{other}'")),
        }
    }
}

/// `{%y%m%d_%H%M%S}_{measurement}.{ext}`
pub fn measurement_file_name(
    time: DateTime<Local>,
    measurement: &str,
    format: StorageFormat,
) -> String {
    format!(
        "{}_{}.{}",
        time.format("%y%m%d_%H%M%S"),
        measurement,
        format.extension()
    )
}

/// A measurement file open for writing.
///
/// Groups are created implicitly by the paths that use them. Datasets hold
/// f64 values in row-major order; `write_at` addresses a sub-array by a
/// prefix of leading indices (`[k, j, i]` selects one spectrum of a
/// `[frames, Nv, Nh, pixels]` map).
pub trait MeasurementFile: Send {
    fn path(&self) -> &Path;

    fn set_attr(&mut self, group: &str, key: &str, value: Value) -> StorageResult<()>;

    /// Fixed-shape dataset filled with zeros.
    fn create_dataset(&mut self, path: &str, shape: &[usize]) -> StorageResult<()>;

    /// Dataset whose leading dimension grows through [`resize`](Self::resize).
    fn create_extendable_dataset(
        &mut self,
        path: &str,
        row_shape: &[usize],
        initial_len: usize,
    ) -> StorageResult<()>;

    /// Replace the whole content of an existing dataset.
    fn write_dataset(&mut self, path: &str, values: &[f64]) -> StorageResult<()>;

    fn write_at(&mut self, path: &str, index: &[usize], values: &[f64]) -> StorageResult<()>;

    fn resize(&mut self, path: &str, len: usize) -> StorageResult<()>;

    /// Current length of the leading dimension.
    fn len(&self, path: &str) -> StorageResult<usize>;

    fn flush(&mut self) -> StorageResult<()>;

    /// Flush and release the file. Further writes fail with `Closed`.
    fn close(&mut self) -> StorageResult<()>;

    fn is_closed(&self) -> bool;

    /// Create `path` with the given shape and fill it in one go.
    fn create_and_write(&mut self, path: &str, shape: &[usize], values: &[f64]) -> StorageResult<()> {
        self.create_dataset(path, shape)?;
        self.write_dataset(path, values)
    }

    /// Store a settings snapshot as the attributes of `<group>/settings`.
    fn write_settings(&mut self, group: &str, settings: &Map<String, Value>) -> StorageResult<()> {
        let group = crate::document::normalize(group);
        let settings_group = if group.is_empty() {
            "settings".to_string()
        } else {
            format!("{group}/settings")
        };
        for (key, value) in settings {
            self.set_attr(&settings_group, key, value.clone())?;
        }
        Ok(())
    }
}

pub(crate) fn ensure_open(closed: bool, path: &Path) -> StorageResult<()> {
    if closed {
        Err(StorageError::Closed(PathBuf::from(path)))
    } else {
        Ok(())
    }
}

/// Create a file of the requested format at `path`.
pub fn create_file(path: &Path, format: StorageFormat) -> StorageResult<Box<dyn MeasurementFile>> {
    match format {
        #[cfg(feature = "storage_json")]
        StorageFormat::Json => Ok(Box::new(crate::json_file::JsonFile::create(path)?)),
        #[cfg(not(feature = "storage_json"))]
        StorageFormat::Json => Err(StorageError::BackendNotEnabled("storage_json")),
        #[cfg(feature = "storage_hdf5")]
        StorageFormat::Hdf5 => Ok(Box::new(crate::hdf5_file::Hdf5File::create(path)?)),
        #[cfg(not(feature = "storage_hdf5"))]
        StorageFormat::Hdf5 => {
            let _ = path;
            Err(StorageError::BackendNotEnabled("storage_hdf5"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn file_name_layout() {
        let t = Local.with_ymd_and_hms(2024, 3, 7, 9, 5, 2).unwrap();
        assert_eq!(
            measurement_file_name(t, "example_2d_scan", StorageFormat::Hdf5),
            "240307_090502_example_2d_scan.h5"
        );
        assert_eq!(
            measurement_file_name(t, "number_gen_readout", StorageFormat::Json),
            "240307_090502_number_gen_readout.json"
        );
    }

    #[test]
    fn format_from_suffix_and_name() {
        assert_eq!(
            StorageFormat::from_path(Path::new("a/b.h5")),
            Some(StorageFormat::Hdf5)
        );
        assert_eq!(
            StorageFormat::from_path(Path::new("b.json")),
            Some(StorageFormat::Json)
        );
        assert_eq!(StorageFormat::from_path(Path::new("b.csv")), None);
        assert_eq!("HDF5".parse::<StorageFormat>(), Ok(StorageFormat::Hdf5));
        assert!("csv".parse::<StorageFormat>().is_err());
    }
}
