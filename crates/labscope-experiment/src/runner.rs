//! Runs one measurement at a time on a worker task.
//!
//! ```text
//! ┌──────┐  start()  ┌─────────┐  interrupt()  ┌──────────────┐
//! │ Idle │──────────▶│ Running │──────────────▶│ Interrupting │
//! └──────┘           └────┬────┘               └──────┬───────┘
//!    ▲                    │ finished / error          │
//!    └────────────────────┴───────────────────────────┘
//! ```
//!
//! Errors are logged and end the run; there is no retry.

use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use labscope_core::Parameter;
use labscope_storage::Provenance;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, Instrument};

use crate::measurement::{InterruptFlag, Measurement, MeasurementContext, StorageTarget};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Interrupting,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Idle => write!(f, "idle"),
            RunState::Running => write!(f, "running"),
            RunState::Interrupting => write!(f, "interrupting"),
        }
    }
}

pub struct MeasurementRunner {
    measurement: Arc<dyn Measurement>,
    state: Arc<RwLock<RunState>>,
    interrupt: InterruptFlag,
    progress: Parameter<f64>,
    task: Mutex<Option<JoinHandle<Result<()>>>>,
}

/// Returns the runner to `Idle` when the worker ends, including by panic.
struct IdleOnDrop(Arc<RwLock<RunState>>);

impl Drop for IdleOnDrop {
    fn drop(&mut self) {
        *self.0.write() = RunState::Idle;
    }
}

impl MeasurementRunner {
    pub fn new(measurement: Arc<dyn Measurement>) -> Self {
        Self {
            measurement,
            state: Arc::new(RwLock::new(RunState::Idle)),
            interrupt: InterruptFlag::new(),
            progress: Parameter::new("progress", 0.0).with_unit("%"),
            task: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        self.measurement.name()
    }

    pub fn measurement(&self) -> &Arc<dyn Measurement> {
        &self.measurement
    }

    pub fn state(&self) -> RunState {
        *self.state.read()
    }

    pub fn progress(&self) -> &Parameter<f64> {
        &self.progress
    }

    /// Spawn the run. Fails if a previous run has not finished.
    pub fn start(&self, storage: StorageTarget, provenance: Provenance) -> Result<()> {
        {
            let mut state = self.state.write();
            if *state != RunState::Idle {
                bail!("Cannot start {}: measurement is {}", self.name(), *state);
            }
            *state = RunState::Running;
        }
        self.interrupt.clear();
        self.progress.store(0.0);

        let ctx = MeasurementContext {
            interrupt: self.interrupt.clone(),
            progress: self.progress.clone(),
            storage,
            provenance,
        };
        let measurement = self.measurement.clone();
        let state = self.state.clone();
        info!(measurement = %measurement.name(), "Measurement started");

        let handle = tokio::spawn(async move {
            let _idle = IdleOnDrop(state);
            let result = measurement.run(&ctx).await;
            match &result {
                Ok(()) if ctx.interrupted() => {
                    info!(measurement = %measurement.name(), "Measurement interrupted")
                }
                Ok(()) => info!(measurement = %measurement.name(), "Measurement finished"),
                Err(e) => error!(measurement = %measurement.name(), "Measurement failed: {e:#}"),
            }
            result
        }
        .in_current_span());
        *self.task.lock() = Some(handle);
        Ok(())
    }

    /// Ask the running measurement to stop at its next check.
    pub fn interrupt(&self) {
        let mut state = self.state.write();
        if *state == RunState::Running {
            *state = RunState::Interrupting;
            self.interrupt.set();
            info!(measurement = %self.name(), "Interrupt requested");
        }
    }

    /// Wait for the current run and return its result. Ok when nothing runs.
    pub async fn wait(&self) -> Result<()> {
        let handle = self.task.lock().take();
        match handle {
            Some(handle) => handle
                .await
                .map_err(|e| anyhow!("measurement task failed: {e}"))?,
            None => Ok(()),
        }
    }

    /// Start and wait.
    pub async fn run(&self, storage: StorageTarget, provenance: Provenance) -> Result<()> {
        self.start(storage, provenance)?;
        self.wait().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use labscope_core::ParameterSet;
    use tracing_test::traced_test;

    struct Waiter {
        settings: ParameterSet,
        fail: bool,
    }

    #[async_trait]
    impl Measurement for Waiter {
        fn name(&self) -> &str {
            "waiter"
        }

        fn settings(&self) -> &ParameterSet {
            &self.settings
        }

        async fn run(&self, ctx: &MeasurementContext) -> Result<()> {
            if self.fail {
                bail!("detector went away");
            }
            while !ctx.interrupt.sleep(0.01).await {}
            ctx.set_progress(50.0);
            Ok(())
        }
    }

    fn runner(fail: bool) -> MeasurementRunner {
        MeasurementRunner::new(Arc::new(Waiter {
            settings: ParameterSet::new(),
            fail,
        }))
    }

    #[tokio::test]
    async fn interrupt_stops_run() {
        let r = runner(false);
        r.start(StorageTarget::default(), Provenance::default()).unwrap();
        assert_eq!(r.state(), RunState::Running);
        assert!(r
            .start(StorageTarget::default(), Provenance::default())
            .is_err());

        r.interrupt();
        assert_eq!(r.state(), RunState::Interrupting);
        r.wait().await.unwrap();
        assert_eq!(r.state(), RunState::Idle);
        assert_eq!(r.progress().get(), 50.0);

        // restartable after finishing
        r.start(StorageTarget::default(), Provenance::default()).unwrap();
        r.interrupt();
        r.wait().await.unwrap();
    }

    #[tokio::test]
    #[traced_test]
    async fn errors_end_the_run() {
        let r = runner(true);
        let err = r
            .run(StorageTarget::default(), Provenance::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("detector went away"));
        assert_eq!(r.state(), RunState::Idle);
        assert!(logs_contain("Measurement failed"));
        r.wait().await.unwrap();
    }

    struct Boom {
        settings: ParameterSet,
    }

    #[async_trait]
    impl Measurement for Boom {
        fn name(&self) -> &str {
            "boom"
        }

        fn settings(&self) -> &ParameterSet {
            &self.settings
        }

        async fn run(&self, ctx: &MeasurementContext) -> Result<()> {
            let samples: Vec<f64> = Vec::new();
            let index = samples.len() + 1;
            ctx.set_progress(samples[index]);
            Ok(())
        }
    }

    #[tokio::test]
    async fn panicking_run_returns_to_idle() {
        let r = MeasurementRunner::new(Arc::new(Boom {
            settings: ParameterSet::new(),
        }));
        let err = r
            .run(StorageTarget::default(), Provenance::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("measurement task failed"));
        assert_eq!(r.state(), RunState::Idle);

        // a later start is accepted
        let err = r
            .run(StorageTarget::default(), Provenance::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("measurement task failed"));
        assert_eq!(r.state(), RunState::Idle);
    }

    #[test]
    fn interrupt_when_idle_is_noop() {
        let r = runner(false);
        r.interrupt();
        assert_eq!(r.state(), RunState::Idle);
    }
}
