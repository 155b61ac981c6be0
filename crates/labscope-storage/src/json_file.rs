//! JSON backend: the whole file is one [`Document`] kept in memory and
//! rewritten atomically (temp file + rename) on every flush.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info};

use crate::document::{normalize, ArrayData, Document};
use crate::error::{StorageError, StorageResult};
use crate::file::{ensure_open, MeasurementFile};

pub struct JsonFile {
    path: PathBuf,
    doc: Document,
    dirty: bool,
    closed: bool,
}

impl std::fmt::Debug for JsonFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonFile")
            .field("path", &self.path)
            .field("datasets", &self.doc.datasets.len())
            .field("closed", &self.closed)
            .finish()
    }
}

impl JsonFile {
    /// Create the file immediately so a name clash surfaces at open time.
    pub fn create(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut file = Self {
            path: path.to_path_buf(),
            doc: Document::default(),
            dirty: true,
            closed: false,
        };
        file.flush()?;
        info!(path = %path.display(), "Created JSON measurement file");
        Ok(file)
    }

    pub fn read(path: &Path) -> StorageResult<Document> {
        let text = fs::read_to_string(path)?;
        let doc: Document = serde_json::from_str(&text)?;
        doc.validate()?;
        Ok(doc)
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    fn dataset_mut(&mut self, path: &str) -> StorageResult<(String, &mut ArrayData)> {
        let key = normalize(path);
        let ds = self
            .doc
            .datasets
            .get_mut(&key)
            .ok_or_else(|| StorageError::DatasetNotFound(key.clone()))?;
        Ok((key, ds))
    }

    fn insert(&mut self, path: &str, array: ArrayData) -> StorageResult<()> {
        ensure_open(self.closed, &self.path)?;
        let key = normalize(path);
        if self.doc.datasets.contains_key(&key) {
            return Err(StorageError::DatasetExists(key));
        }
        self.doc.datasets.insert(key, array);
        self.dirty = true;
        Ok(())
    }
}

impl MeasurementFile for JsonFile {
    fn path(&self) -> &Path {
        &self.path
    }

    fn set_attr(&mut self, group: &str, key: &str, value: Value) -> StorageResult<()> {
        ensure_open(self.closed, &self.path)?;
        self.doc
            .attrs
            .entry(normalize(group))
            .or_default()
            .insert(key.to_string(), value);
        self.dirty = true;
        Ok(())
    }

    fn create_dataset(&mut self, path: &str, shape: &[usize]) -> StorageResult<()> {
        self.insert(path, ArrayData::zeros(shape))
    }

    fn create_extendable_dataset(
        &mut self,
        path: &str,
        row_shape: &[usize],
        initial_len: usize,
    ) -> StorageResult<()> {
        let mut shape = vec![initial_len];
        shape.extend_from_slice(row_shape);
        let mut array = ArrayData::zeros(&shape);
        array.extendable = true;
        self.insert(path, array)
    }

    fn write_dataset(&mut self, path: &str, values: &[f64]) -> StorageResult<()> {
        ensure_open(self.closed, &self.path)?;
        let (key, ds) = self.dataset_mut(path)?;
        if ds.data.len() != values.len() {
            return Err(StorageError::ShapeMismatch {
                dataset: key,
                expected: ds.data.len(),
                got: values.len(),
            });
        }
        ds.data.copy_from_slice(values);
        self.dirty = true;
        Ok(())
    }

    fn write_at(&mut self, path: &str, index: &[usize], values: &[f64]) -> StorageResult<()> {
        ensure_open(self.closed, &self.path)?;
        let (key, ds) = self.dataset_mut(path)?;
        ds.write_at(&key, index, values)?;
        self.dirty = true;
        Ok(())
    }

    fn resize(&mut self, path: &str, len: usize) -> StorageResult<()> {
        ensure_open(self.closed, &self.path)?;
        let (key, ds) = self.dataset_mut(path)?;
        ds.resize(&key, len)?;
        debug!(dataset = %key, len, "Resized dataset");
        self.dirty = true;
        Ok(())
    }

    fn len(&self, path: &str) -> StorageResult<usize> {
        let key = normalize(path);
        self.doc
            .datasets
            .get(&key)
            .map(ArrayData::len)
            .ok_or(StorageError::DatasetNotFound(key))
    }

    fn flush(&mut self) -> StorageResult<()> {
        ensure_open(self.closed, &self.path)?;
        if !self.dirty {
            return Ok(());
        }
        let tmp = self.path.with_extension("json.tmp");
        {
            let mut out = fs::File::create(&tmp)?;
            serde_json::to_writer(&mut out, &self.doc)?;
            out.flush()?;
            out.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        self.dirty = false;
        Ok(())
    }

    fn close(&mut self) -> StorageResult<()> {
        if self.closed {
            return Ok(());
        }
        self.flush()?;
        self.closed = true;
        info!(path = %self.path.display(), "Closed JSON measurement file");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for JsonFile {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("failed to close {} on drop: {e}", self.path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn written_values_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.json");
        let mut f = JsonFile::create(&path).unwrap();
        f.set_attr("", "measurement", json!("example_2d_scan")).unwrap();
        f.create_dataset("measurement/example_2d_scan/signal_map", &[1, 2, 2, 3])
            .unwrap();
        f.write_at(
            "measurement/example_2d_scan/signal_map",
            &[0, 1, 0],
            &[1.0, 2.0, 3.0],
        )
        .unwrap();
        f.close().unwrap();

        let doc = JsonFile::read(&path).unwrap();
        assert_eq!(doc.root_attrs().unwrap()["measurement"], json!("example_2d_scan"));
        let map = doc.dataset("measurement/example_2d_scan/signal_map").unwrap();
        assert_eq!(map.shape, vec![1, 2, 2, 3]);
        assert_eq!(map.at(&[0, 1, 0]).unwrap(), &[1.0, 2.0, 3.0]);
        assert_eq!(map.at(&[0, 0, 0]).unwrap(), &[0.0, 0.0, 0.0]);
        assert!(!dir.path().join("run.json.tmp").exists());
    }

    #[test]
    fn extendable_dataset_grows() {
        let dir = TempDir::new().unwrap();
        let mut f = JsonFile::create(&dir.path().join("y.json")).unwrap();
        f.create_extendable_dataset("m/y", &[], 3).unwrap();
        assert_eq!(f.len("m/y").unwrap(), 3);
        f.resize("m/y", 6).unwrap();
        f.write_at("m/y", &[5], &[7.0]).unwrap();
        assert_eq!(f.len("m/y").unwrap(), 6);
        assert_eq!(f.document().dataset("m/y").unwrap().data[5], 7.0);

        f.create_dataset("m/fixed", &[2]).unwrap();
        assert!(matches!(
            f.resize("m/fixed", 4),
            Err(StorageError::NotExtendable(_))
        ));
    }

    #[test]
    fn errors_on_bad_writes() {
        let dir = TempDir::new().unwrap();
        let mut f = JsonFile::create(&dir.path().join("e.json")).unwrap();
        f.create_dataset("a", &[2, 2]).unwrap();
        assert!(matches!(
            f.create_dataset("/a/", &[1]),
            Err(StorageError::DatasetExists(_))
        ));
        assert!(matches!(
            f.write_dataset("a", &[1.0]),
            Err(StorageError::ShapeMismatch { expected: 4, got: 1, .. })
        ));
        assert!(matches!(
            f.write_at("a", &[2], &[1.0, 1.0]),
            Err(StorageError::IndexOutOfRange { .. })
        ));
        assert!(matches!(
            f.write_dataset("missing", &[]),
            Err(StorageError::DatasetNotFound(_))
        ));
        f.close().unwrap();
        assert!(matches!(
            f.set_attr("", "k", json!(1)),
            Err(StorageError::Closed(_))
        ));
        f.close().unwrap();
    }

    #[test]
    fn settings_land_in_settings_group() {
        let dir = TempDir::new().unwrap();
        let mut f = JsonFile::create(&dir.path().join("s.json")).unwrap();
        let mut settings = serde_json::Map::new();
        settings.insert("N".into(), json!(101));
        f.write_settings("measurement/number_gen_readout", &settings)
            .unwrap();
        assert_eq!(
            f.document().attrs["measurement/number_gen_readout/settings"]["N"],
            json!(101)
        );
    }
}
