//! In-memory image of a measurement file.
//!
//! Groups are addressed by slash-separated paths without a leading slash;
//! the root group is `""`. Both backends load into [`Document`], so the
//! loaders work the same on either format.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{StorageError, StorageResult};

pub const FORMAT_NAME: &str = "labscope-json";
pub const FORMAT_VERSION: u32 = 1;

/// Strip leading / trailing slashes so `"/app/settings/"` and
/// `"app/settings"` address the same group.
pub fn normalize(path: &str) -> String {
    path.trim_matches('/').to_string()
}

/// Parent group and leaf name of a dataset path.
pub fn split_path(path: &str) -> (String, String) {
    let path = normalize(path);
    match path.rsplit_once('/') {
        Some((group, name)) => (group.to_string(), name.to_string()),
        None => (String::new(), path),
    }
}

/// Row-major N-dimensional f64 array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayData {
    pub shape: Vec<usize>,
    /// Leading dimension may grow.
    #[serde(default)]
    pub extendable: bool,
    pub data: Vec<f64>,
}

impl ArrayData {
    pub fn zeros(shape: &[usize]) -> Self {
        Self {
            shape: shape.to_vec(),
            extendable: false,
            data: vec![0.0; shape.iter().product()],
        }
    }

    pub fn from_vec(data: Vec<f64>) -> Self {
        Self {
            shape: vec![data.len()],
            extendable: false,
            data,
        }
    }

    /// Length of the leading dimension.
    pub fn len(&self) -> usize {
        self.shape.first().copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Offset and length of the sub-array addressed by a leading index.
    pub fn block(&self, index: &[usize]) -> Option<(usize, usize)> {
        if index.len() > self.shape.len() {
            return None;
        }
        let mut offset = 0;
        for (k, (&i, &n)) in index.iter().zip(&self.shape).enumerate() {
            if i >= n {
                return None;
            }
            let stride: usize = self.shape[k + 1..].iter().product();
            offset += i * stride;
        }
        let len = self.shape[index.len()..].iter().product();
        Some((offset, len))
    }

    /// Sub-array at a leading index (`&[k, j, i]` of a 4-d array is a row).
    pub fn at(&self, index: &[usize]) -> Option<&[f64]> {
        self.block(index)
            .and_then(|(offset, len)| self.data.get(offset..offset + len))
    }

    /// Data length must match the shape; files read from disk are checked here.
    pub fn validate(&self, name: &str) -> StorageResult<()> {
        let expected: usize = self.shape.iter().product();
        if self.data.len() != expected {
            return Err(StorageError::ShapeMismatch {
                dataset: name.to_string(),
                expected,
                got: self.data.len(),
            });
        }
        Ok(())
    }

    /// Overwrite the sub-array at a leading index.
    pub fn write_at(&mut self, name: &str, index: &[usize], values: &[f64]) -> StorageResult<()> {
        let (offset, len) = self.block(index).ok_or_else(|| StorageError::IndexOutOfRange {
            dataset: name.to_string(),
            index: index.to_vec(),
            shape: self.shape.clone(),
        })?;
        if values.len() != len {
            return Err(StorageError::ShapeMismatch {
                dataset: name.to_string(),
                expected: len,
                got: values.len(),
            });
        }
        let got = self.data.len();
        let target = self
            .data
            .get_mut(offset..offset + len)
            .ok_or_else(|| StorageError::ShapeMismatch {
                dataset: name.to_string(),
                expected: offset + len,
                got,
            })?;
        target.copy_from_slice(values);
        Ok(())
    }

    /// Change the leading dimension, zero-filling new rows.
    pub fn resize(&mut self, name: &str, len: usize) -> StorageResult<()> {
        if !self.extendable {
            return Err(StorageError::NotExtendable(name.to_string()));
        }
        let row: usize = self.shape[1..].iter().product();
        self.shape[0] = len;
        self.data.resize(len * row, 0.0);
        Ok(())
    }
}

/// Everything stored in one measurement file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub format: String,
    pub version: u32,
    /// Attributes per group path.
    pub attrs: BTreeMap<String, Map<String, Value>>,
    /// Datasets by full path.
    pub datasets: BTreeMap<String, ArrayData>,
}

impl Default for Document {
    fn default() -> Self {
        Self {
            format: FORMAT_NAME.to_string(),
            version: FORMAT_VERSION,
            attrs: BTreeMap::new(),
            datasets: BTreeMap::new(),
        }
    }
}

impl Document {
    /// Check every dataset against its shape.
    pub fn validate(&self) -> StorageResult<()> {
        for (path, array) in &self.datasets {
            array.validate(path)?;
        }
        Ok(())
    }

    pub fn root_attrs(&self) -> Option<&Map<String, Value>> {
        self.attrs.get("")
    }

    pub fn dataset(&self, path: &str) -> Option<&ArrayData> {
        self.datasets.get(&normalize(path))
    }

    /// Every group path, including implicit parents of datasets and attrs.
    pub fn groups(&self) -> BTreeSet<String> {
        let mut groups = BTreeSet::new();
        let mut add_parents = |path: &str, include_self: bool| {
            let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
            let end = if include_self { parts.len() } else { parts.len().saturating_sub(1) };
            for n in 1..=end {
                groups.insert(parts[..n].join("/"));
            }
        };
        for group in self.attrs.keys() {
            add_parents(group, true);
        }
        for dataset in self.datasets.keys() {
            add_parents(dataset, false);
        }
        groups
    }

    /// Names of the direct child groups of `parent`.
    pub fn child_groups(&self, parent: &str) -> Vec<String> {
        let parent = normalize(parent);
        let prefix = if parent.is_empty() {
            String::new()
        } else {
            format!("{parent}/")
        };
        self.groups()
            .into_iter()
            .filter_map(|g| {
                let rest = g.strip_prefix(&prefix)?;
                (!rest.is_empty() && !rest.contains('/')).then(|| rest.to_string())
            })
            .collect()
    }
}
