//! Measurement trait and the context a run executes in.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use labscope_core::{run_blocking, Parameter, ParameterSet, SharedDevice};
use labscope_storage::{open_measurement_file, MeasurementFile, Provenance, StorageFormat};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

/// An acquisition routine run on a worker task by
/// [`MeasurementRunner`](crate::runner::MeasurementRunner).
#[async_trait]
pub trait Measurement: Send + Sync {
    /// Name used for the data group and the file name.
    fn name(&self) -> &str;

    fn settings(&self) -> &ParameterSet;

    /// Acquire until done or until `ctx` is interrupted.
    async fn run(&self, ctx: &MeasurementContext) -> Result<()>;
}

/// Polite stop request shared between the runner and a running measurement.
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn set(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn clear(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    /// Sleep for `seconds`, returning early with `true` when interrupted.
    pub async fn sleep(&self, seconds: f64) -> bool {
        let notified = self.notify.notified();
        if self.is_set() {
            return true;
        }
        if seconds <= 0.0 || !seconds.is_finite() {
            tokio::task::yield_now().await;
            return self.is_set();
        }
        tokio::select! {
            _ = notified => true,
            _ = tokio::time::sleep(Duration::from_secs_f64(seconds)) => self.is_set(),
        }
    }
}

/// Where measurement files go.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageTarget {
    pub dir: PathBuf,
    pub format: StorageFormat,
}

impl Default for StorageTarget {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data"),
            format: StorageFormat::default(),
        }
    }
}

/// Everything a run needs from the application.
#[derive(Debug, Clone)]
pub struct MeasurementContext {
    pub interrupt: InterruptFlag,
    /// Percent complete.
    pub progress: Parameter<f64>,
    pub storage: StorageTarget,
    /// App and hardware settings; the measurement part is filled on `open_file`.
    pub provenance: Provenance,
}

impl MeasurementContext {
    pub fn new(storage: StorageTarget, provenance: Provenance) -> Self {
        Self {
            interrupt: InterruptFlag::new(),
            progress: Parameter::new("progress", 0.0).with_unit("%"),
            storage,
            provenance,
        }
    }

    pub fn interrupted(&self) -> bool {
        self.interrupt.is_set()
    }

    pub fn set_progress(&self, percent: f64) {
        self.progress.store(percent);
    }

    /// Create a data file for `name` with the current settings snapshot.
    pub async fn open_file(&self, name: &str, settings: &ParameterSet) -> Result<DataFile> {
        let mut provenance = self.provenance.clone();
        provenance.measurement_name = name.to_string();
        provenance.measurement = settings.snapshot()?;
        let group = provenance.measurement_group();
        let target = self.storage.clone();
        let file = tokio::task::spawn_blocking(move || {
            open_measurement_file(&target.dir, target.format, &provenance)
        })
        .await
        .map_err(|e| anyhow!("file open task failed: {e}"))??;
        Ok(DataFile {
            inner: Arc::new(Mutex::new(file)),
            group,
        })
    }
}

/// Open measurement file; dataset names are relative to the measurement group.
#[derive(Clone)]
pub struct DataFile {
    inner: SharedDevice<Box<dyn MeasurementFile>>,
    group: String,
}

impl std::fmt::Debug for DataFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataFile")
            .field("path", &self.path())
            .field("group", &self.group)
            .finish()
    }
}

impl DataFile {
    pub fn path(&self) -> PathBuf {
        self.inner.lock().path().to_path_buf()
    }

    fn dataset(&self, name: &str) -> String {
        format!("{}/{}", self.group, name)
    }

    pub async fn create_dataset(&self, name: &str, shape: Vec<usize>) -> Result<()> {
        let path = self.dataset(name);
        run_blocking(&self.inner, move |f| Ok(f.create_dataset(&path, &shape)?)).await
    }

    pub async fn create_extendable(&self, name: &str, initial_len: usize) -> Result<()> {
        let path = self.dataset(name);
        run_blocking(&self.inner, move |f| {
            Ok(f.create_extendable_dataset(&path, &[], initial_len)?)
        })
        .await
    }

    /// Create a dataset of `shape` holding `values`.
    pub async fn write(&self, name: &str, shape: Vec<usize>, values: Vec<f64>) -> Result<()> {
        let path = self.dataset(name);
        run_blocking(&self.inner, move |f| {
            Ok(f.create_and_write(&path, &shape, &values)?)
        })
        .await
    }

    pub async fn write_at(&self, name: &str, index: Vec<usize>, values: Vec<f64>) -> Result<()> {
        let path = self.dataset(name);
        run_blocking(&self.inner, move |f| Ok(f.write_at(&path, &index, &values)?)).await
    }

    pub async fn resize(&self, name: &str, len: usize) -> Result<()> {
        let path = self.dataset(name);
        run_blocking(&self.inner, move |f| Ok(f.resize(&path, len)?)).await
    }

    pub async fn len(&self, name: &str) -> Result<usize> {
        let path = self.dataset(name);
        run_blocking(&self.inner, move |f| Ok(f.len(&path)?)).await
    }

    pub async fn flush(&self) -> Result<()> {
        run_blocking(&self.inner, |f| Ok(f.flush()?)).await
    }

    pub async fn close(&self) -> Result<()> {
        run_blocking(&self.inner, |f| Ok(f.close()?)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn interrupt_wakes_sleep() {
        let flag = InterruptFlag::new();
        let f = flag.clone();
        let sleeper = tokio::spawn(async move { f.sleep(60.0).await });
        tokio::task::yield_now().await;
        flag.set();
        assert!(sleeper.await.unwrap());
        assert!(flag.sleep(60.0).await);
        flag.clear();
        assert!(!flag.sleep(0.001).await);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn zero_sleep_lets_other_tasks_run() {
        let flag = InterruptFlag::new();
        let f = flag.clone();
        tokio::spawn(async move { f.set() });
        let mut polls = 0;
        while !flag.sleep(0.0).await {
            polls += 1;
        }
        assert!(polls < 10);
    }
}
