//! Simulated spectroscopy CCD.
//!
//! Produces a `rows × pixels` buffer containing a Gaussian emission line on
//! top of a dark level. The line amplitude comes from an optional probe
//! closure, which lets tests make the signal depend on where a stage is.
//!
//! In instant mode the detector reports `Acquiring` for a fixed number of
//! status polls before turning `Idle`; in realistic mode it stays busy for
//! exposure plus readout time.

use anyhow::{bail, Result};
use async_trait::async_trait;
use labscope_core::hardware::{ComponentBase, HardwareComponent};
use labscope_core::{AcquisitionStatus, Parameter, ParameterSet, SpectrumAcquisition};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::common::{ErrorConfig, MockMode, MockRng, TimingConfig};

type Probe = Arc<dyn Fn() -> f64 + Send + Sync>;

#[derive(Debug)]
enum CcdState {
    Idle,
    Acquiring {
        started: Instant,
        polls_left: u32,
    },
}

/// Simulated CCD behind the `andor_ccd` settings.
pub struct MockCcd {
    base: ComponentBase,
    pub exposure_time: Parameter<f64>,
    pub ccd_status: Parameter<String>,
    pub rows: Parameter<i64>,
    pub pixels: Parameter<i64>,
    pub dark_level: Parameter<f64>,
    mode: MockMode,
    timing: TimingConfig,
    busy_polls: u32,
    probe: Option<Probe>,
    errors: ErrorConfig,
    rng: MockRng,
    state: Mutex<CcdState>,
    buffer: Mutex<Vec<Vec<f64>>>,
    acquisitions: AtomicU64,
    interrupts: AtomicU64,
}

impl MockCcd {
    pub const NAME: &'static str = "andor_ccd";

    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> MockCcdBuilder {
        MockCcdBuilder::default()
    }

    /// Completed acquisitions since construction.
    pub fn acquisition_count(&self) -> u64 {
        self.acquisitions.load(Ordering::SeqCst)
    }

    /// Calls to `interrupt_acquisition` since construction.
    pub fn interrupt_count(&self) -> u64 {
        self.interrupts.load(Ordering::SeqCst)
    }

    fn render(&self) -> Vec<Vec<f64>> {
        let rows = self.rows.get().max(1) as usize;
        let pixels = self.pixels.get().max(1) as usize;
        let amplitude = self.probe.as_ref().map(|p| p()).unwrap_or(1000.0);
        let dark = self.dark_level.get();
        let center = pixels as f64 / 2.0;
        let width = pixels as f64 / 40.0;

        (0..rows)
            .map(|_| {
                (0..pixels)
                    .map(|px| {
                        let x = (px as f64 - center) / width;
                        dark + amplitude * (-0.5 * x * x).exp() + self.rng.gaussian(1.0)
                    })
                    .collect()
            })
            .collect()
    }

    fn finish(&self) {
        let frame = self.render();
        *self.buffer.lock() = frame;
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        self.ccd_status.store("IDLE".to_string());
    }
}

impl Default for MockCcd {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`MockCcd`]
#[derive(Default)]
pub struct MockCcdBuilder {
    mode: MockMode,
    busy_polls: Option<u32>,
    pixels: Option<i64>,
    rows: Option<i64>,
    probe: Option<Probe>,
    errors: Option<ErrorConfig>,
    seed: Option<u64>,
}

impl MockCcdBuilder {
    pub fn mode(mut self, mode: MockMode) -> Self {
        self.mode = mode;
        self
    }

    /// Status polls answered with `Acquiring` in instant mode.
    pub fn busy_polls(mut self, polls: u32) -> Self {
        self.busy_polls = Some(polls);
        self
    }

    pub fn pixels(mut self, pixels: i64) -> Self {
        self.pixels = Some(pixels);
        self
    }

    pub fn rows(mut self, rows: i64) -> Self {
        self.rows = Some(rows);
        self
    }

    pub fn probe(mut self, probe: impl Fn() -> f64 + Send + Sync + 'static) -> Self {
        self.probe = Some(Arc::new(probe));
        self
    }

    pub fn errors(mut self, errors: ErrorConfig) -> Self {
        self.errors = Some(errors);
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn build(self) -> MockCcd {
        let mut base = ComponentBase::new(MockCcd::NAME);
        let exposure_time = base.add(
            Parameter::new("exposure_time", 0.01)
                .with_unit("s")
                .with_range(1e-5, 1e3),
        );
        let ccd_status = base.add(Parameter::new("ccd_status", "IDLE".to_string()).read_only());
        let rows = base.add(Parameter::new("rows", self.rows.unwrap_or(4)).with_range(1, 2048));
        let pixels =
            base.add(Parameter::new("pixels", self.pixels.unwrap_or(1600)).with_range(1, 4096));
        let dark_level = base.add(Parameter::new("dark_level", 100.0).with_unit("counts"));

        MockCcd {
            base,
            exposure_time,
            ccd_status,
            rows,
            pixels,
            dark_level,
            mode: self.mode,
            timing: if self.mode.is_realistic() {
                TimingConfig::ccd()
            } else {
                TimingConfig::default()
            },
            busy_polls: self.busy_polls.unwrap_or(2),
            probe: self.probe,
            errors: self.errors.unwrap_or_default(),
            rng: MockRng::new(self.seed),
            state: Mutex::new(CcdState::Idle),
            buffer: Mutex::new(Vec::new()),
            acquisitions: AtomicU64::new(0),
            interrupts: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl HardwareComponent for MockCcd {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn settings(&self) -> &ParameterSet {
        &self.base.settings
    }

    async fn connect(&self) -> Result<()> {
        self.base.mark_connected(true);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if !self.is_connected() {
            return Ok(());
        }
        self.interrupt_acquisition().await?;
        self.base.release();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.base.is_connected()
    }
}

#[async_trait]
impl SpectrumAcquisition for MockCcd {
    async fn start_acquisition(&self) -> Result<()> {
        if !self.is_connected() {
            bail!(labscope_core::ScopeError::NotConnected(MockCcd::NAME.into()));
        }
        self.errors.check_operation("mock_ccd", "start_acquisition")?;
        *self.state.lock() = CcdState::Acquiring {
            started: Instant::now(),
            polls_left: self.busy_polls,
        };
        self.ccd_status.store("ACQUIRING".to_string());
        Ok(())
    }

    async fn status(&self) -> Result<AcquisitionStatus> {
        self.errors.check_operation("mock_ccd", "status")?;
        let done = {
            let mut state = self.state.lock();
            match &mut *state {
                CcdState::Idle => return Ok(AcquisitionStatus::Idle),
                CcdState::Acquiring {
                    started,
                    polls_left,
                } => {
                    let finished = if self.mode.is_realistic() {
                        let busy = Duration::from_secs_f64(self.exposure_time.get())
                            + self.timing.readout();
                        started.elapsed() >= busy
                    } else if *polls_left == 0 {
                        true
                    } else {
                        *polls_left -= 1;
                        false
                    };
                    if finished {
                        *state = CcdState::Idle;
                    }
                    finished
                }
            }
        };
        if done {
            self.finish();
            Ok(AcquisitionStatus::Idle)
        } else {
            Ok(AcquisitionStatus::Acquiring)
        }
    }

    async fn acquired_data(&self) -> Result<Vec<Vec<f64>>> {
        let buffer = self.buffer.lock().clone();
        if buffer.is_empty() {
            bail!("no completed acquisition in buffer");
        }
        Ok(buffer)
    }

    async fn interrupt_acquisition(&self) -> Result<()> {
        self.interrupts.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        if matches!(*state, CcdState::Acquiring { .. }) {
            debug!("mock CCD acquisition aborted");
        }
        *state = CcdState::Idle;
        drop(state);
        self.ccd_status.store("IDLE".to_string());
        Ok(())
    }

    fn pixel_count(&self) -> usize {
        self.pixels.get().max(1) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ErrorScenario;

    async fn acquire(ccd: &MockCcd) -> (u32, Vec<Vec<f64>>) {
        ccd.start_acquisition().await.unwrap();
        let mut polls = 0;
        while ccd.status().await.unwrap() == AcquisitionStatus::Acquiring {
            polls += 1;
        }
        (polls, ccd.acquired_data().await.unwrap())
    }

    #[tokio::test]
    async fn instant_mode_reports_busy_then_idle() {
        let ccd = MockCcd::builder().busy_polls(3).pixels(64).rows(2).seed(1).build();
        ccd.connect().await.unwrap();

        let (polls, data) = acquire(&ccd).await;
        assert_eq!(polls, 3);
        assert_eq!(data.len(), 2);
        assert_eq!(data[0].len(), 64);
        assert_eq!(ccd.acquisition_count(), 1);
        assert_eq!(ccd.ccd_status.get(), "IDLE");

        // peak at the centre, dark level at the edge
        assert!(data[0][32] > 900.0);
        assert!((data[0][0] - 100.0).abs() < 10.0);
    }

    #[tokio::test]
    async fn probe_sets_amplitude() {
        let ccd = MockCcd::builder()
            .busy_polls(0)
            .pixels(32)
            .probe(|| 10.0)
            .seed(2)
            .build();
        ccd.connect().await.unwrap();
        let (_, data) = acquire(&ccd).await;
        assert!(data[0][16] < 120.0);
    }

    #[tokio::test]
    async fn requires_connection_and_injects_faults() {
        let ccd = MockCcd::builder()
            .errors(ErrorConfig::scenario(ErrorScenario::FailAfterN {
                operation: "start_acquisition",
                count: 1,
            }))
            .build();
        assert!(ccd.start_acquisition().await.is_err());

        ccd.connect().await.unwrap();
        assert!(ccd.start_acquisition().await.is_ok());
        let err = ccd.start_acquisition().await.unwrap_err();
        assert!(err.to_string().contains("Injected failure"));
    }

    #[tokio::test]
    async fn interrupt_returns_to_idle() {
        let ccd = MockCcd::builder().busy_polls(100).build();
        ccd.connect().await.unwrap();
        ccd.start_acquisition().await.unwrap();
        assert_eq!(ccd.status().await.unwrap(), AcquisitionStatus::Acquiring);
        ccd.interrupt_acquisition().await.unwrap();
        assert_eq!(ccd.status().await.unwrap(), AcquisitionStatus::Idle);
        assert_eq!(ccd.interrupt_count(), 1);
        assert!(ccd.acquired_data().await.is_err());
    }
}
