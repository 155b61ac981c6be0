//! HDF5 backend (`storage_hdf5`).
//!
//! Attributes are stored as JSON text in variable-length unicode scalars so
//! nested settings (calibration tables, choice lists) survive unchanged.
//! Extendable datasets are chunked along the leading dimension and grown
//! with `resize`. All calls block; async callers go through
//! `labscope_core::run_blocking`.

use std::path::{Path, PathBuf};

use hdf5::types::VarLenUnicode;
use hdf5::{Dataset, Group, Hyperslab, Selection, SimpleExtents, SliceOrIndex};
use serde_json::Value;
use tracing::{debug, info};

use crate::document::{normalize, split_path, ArrayData, Document};
use crate::error::{StorageError, StorageResult};
use crate::file::{ensure_open, MeasurementFile};

/// Rows per chunk of a 1-d extendable dataset.
const CHUNK_LEN: usize = 1024;

pub struct Hdf5File {
    path: PathBuf,
    file: Option<hdf5::File>,
}

impl std::fmt::Debug for Hdf5File {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hdf5File")
            .field("path", &self.path)
            .field("closed", &self.file.is_none())
            .finish()
    }
}

impl Hdf5File {
    pub fn create(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = hdf5::File::create(path)?;
        info!(path = %path.display(), "Created HDF5 measurement file");
        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
        })
    }

    /// Load every attribute and dataset into memory.
    pub fn read(path: &Path) -> StorageResult<Document> {
        let file = hdf5::File::open(path)?;
        let mut doc = Document::default();
        read_group(&file, &mut doc)?;
        doc.validate()?;
        Ok(doc)
    }

    fn file(&self) -> StorageResult<&hdf5::File> {
        self.file
            .as_ref()
            .ok_or_else(|| StorageError::Closed(self.path.clone()))
    }

    /// Open `path`, creating missing groups one level at a time.
    fn ensure_group(&self, path: &str) -> StorageResult<Group> {
        let file = self.file()?;
        let path = normalize(path);
        let mut current = String::new();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(part);
            if !file.link_exists(&current) {
                file.create_group(&current)?;
            }
        }
        if path.is_empty() {
            Ok(file.group("/")?)
        } else {
            Ok(file.group(&path)?)
        }
    }

    fn dataset(&self, path: &str) -> StorageResult<Dataset> {
        let file = self.file()?;
        let key = normalize(path);
        if !file.link_exists(&key) {
            return Err(StorageError::DatasetNotFound(key));
        }
        Ok(file.dataset(&key)?)
    }

    fn create(&self, path: &str, shape: &[usize], resizable: bool) -> StorageResult<()> {
        let key = normalize(path);
        if self.file()?.link_exists(&key) {
            return Err(StorageError::DatasetExists(key));
        }
        let (group, name) = split_path(&key);
        let group = self.ensure_group(&group)?;
        if resizable {
            let mut chunk = shape.to_vec();
            chunk[0] = if shape.len() == 1 { CHUNK_LEN } else { 1 };
            for c in chunk.iter_mut() {
                *c = (*c).max(1);
            }
            group
                .new_dataset::<f64>()
                .chunk(chunk)
                .shape(SimpleExtents::resizable(shape.to_vec()))
                .create(name.as_str())?;
        } else {
            group
                .new_dataset::<f64>()
                .shape(shape.to_vec())
                .create(name.as_str())?;
        }
        debug!(dataset = %key, ?shape, resizable, "Created dataset");
        Ok(())
    }
}

impl MeasurementFile for Hdf5File {
    fn path(&self) -> &Path {
        &self.path
    }

    fn set_attr(&mut self, group: &str, key: &str, value: Value) -> StorageResult<()> {
        let group = self.ensure_group(group)?;
        let text: VarLenUnicode = value
            .to_string()
            .parse()
            .map_err(|e| StorageError::InvalidAttribute(key.to_string(), format!("{e}")))?;
        if group.attr_names()?.iter().any(|n| n == key) {
            group.attr(key)?.write_scalar(&text)?;
        } else {
            group
                .new_attr::<VarLenUnicode>()
                .create(key)?
                .write_scalar(&text)?;
        }
        Ok(())
    }

    fn create_dataset(&mut self, path: &str, shape: &[usize]) -> StorageResult<()> {
        self.create(path, shape, false)
    }

    fn create_extendable_dataset(
        &mut self,
        path: &str,
        row_shape: &[usize],
        initial_len: usize,
    ) -> StorageResult<()> {
        let mut shape = vec![initial_len];
        shape.extend_from_slice(row_shape);
        self.create(path, &shape, true)
    }

    fn write_dataset(&mut self, path: &str, values: &[f64]) -> StorageResult<()> {
        let ds = self.dataset(path)?;
        if ds.size() != values.len() {
            return Err(StorageError::ShapeMismatch {
                dataset: normalize(path),
                expected: ds.size(),
                got: values.len(),
            });
        }
        ds.write_raw(values)?;
        Ok(())
    }

    fn write_at(&mut self, path: &str, index: &[usize], values: &[f64]) -> StorageResult<()> {
        let ds = self.dataset(path)?;
        let shape = ds.shape();
        let key = normalize(path);
        let probe = ArrayData {
            shape: shape.clone(),
            extendable: false,
            data: Vec::new(),
        };
        // bounds and size check without touching the data
        let (_, len) = probe.block(index).ok_or_else(|| StorageError::IndexOutOfRange {
            dataset: key.clone(),
            index: index.to_vec(),
            shape: shape.clone(),
        })?;
        if values.len() != len {
            return Err(StorageError::ShapeMismatch {
                dataset: key,
                expected: len,
                got: values.len(),
            });
        }

        if index.len() == shape.len() {
            let mut sel: Vec<SliceOrIndex> = index[..index.len() - 1]
                .iter()
                .map(|&i| SliceOrIndex::Index(i))
                .collect();
            let last = index[index.len() - 1];
            sel.push((last..last + 1).into());
            ds.write_slice(values, Selection::from(Hyperslab::from(sel)))?;
            return Ok(());
        }

        // write one innermost row at a time
        let row_len = shape[shape.len() - 1];
        let row_dims = &shape[index.len()..shape.len() - 1];
        let rows: usize = row_dims.iter().product();
        for (r, row) in values.chunks(row_len.max(1)).enumerate().take(rows) {
            let mut sel: Vec<SliceOrIndex> =
                index.iter().map(|&i| SliceOrIndex::Index(i)).collect();
            let mut rem = r;
            let mut inner = Vec::with_capacity(row_dims.len());
            for &d in row_dims.iter().rev() {
                inner.push(rem % d);
                rem /= d;
            }
            sel.extend(inner.into_iter().rev().map(SliceOrIndex::Index));
            sel.push((0..row_len).into());
            ds.write_slice(row, Selection::from(Hyperslab::from(sel)))?;
        }
        Ok(())
    }

    fn resize(&mut self, path: &str, len: usize) -> StorageResult<()> {
        let ds = self.dataset(path)?;
        if !ds.is_chunked() {
            return Err(StorageError::NotExtendable(normalize(path)));
        }
        let mut shape = ds.shape();
        shape[0] = len;
        ds.resize(shape)?;
        Ok(())
    }

    fn len(&self, path: &str) -> StorageResult<usize> {
        Ok(self.dataset(path)?.shape().first().copied().unwrap_or(0))
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.file()?.flush()?;
        Ok(())
    }

    fn close(&mut self) -> StorageResult<()> {
        if let Some(file) = self.file.take() {
            file.flush()?;
            file.close()?;
            info!(path = %self.path.display(), "Closed HDF5 measurement file");
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.file.is_none()
    }
}

impl Drop for Hdf5File {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("failed to close {} on drop: {e}", self.path.display());
        }
    }
}

fn read_attrs(group: &Group, doc: &mut Document) -> StorageResult<()> {
    let names = group.attr_names()?;
    if names.is_empty() {
        return Ok(());
    }
    let attrs = doc.attrs.entry(normalize(&group.name())).or_default();
    for name in names {
        let text: VarLenUnicode = group.attr(&name)?.read_scalar()?;
        let value = serde_json::from_str(text.as_str())
            .unwrap_or_else(|_| Value::String(text.as_str().to_string()));
        attrs.insert(name, value);
    }
    Ok(())
}

fn read_group(group: &Group, doc: &mut Document) -> StorageResult<()> {
    read_attrs(group, doc)?;
    for ds in group.datasets()? {
        let data = ds.read_raw::<f64>()?;
        doc.datasets.insert(
            normalize(&ds.name()),
            ArrayData {
                shape: ds.shape(),
                extendable: ds.is_chunked(),
                data,
            },
        );
    }
    for child in group.groups()? {
        read_group(&child, doc)?;
    }
    Ok(())
}
