//! Hardware capabilities
//!
//! Fine-grained traits that drivers implement for what they actually support.
//! Measurements are written against these bounds rather than concrete drivers:
//! the slow scan only needs two [`Movable`] axes and a
//! [`SpectrumAcquisition`] detector.
//!
//! Each capability trait is async (`#[async_trait]`), `Send + Sync`, and
//! returns `anyhow::Result`.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::parameter::ParameterSet;

/// Capability: single-axis positioning.
///
/// Positions are in the axis' native units (micrometres for the MCL stages).
#[async_trait]
pub trait Movable: Send + Sync {
    /// Move to an absolute position.
    async fn move_abs(&self, position: f64) -> Result<()>;

    /// Move relative to the current position.
    async fn move_rel(&self, distance: f64) -> Result<()> {
        let current = self.position().await?;
        self.move_abs(current + distance).await
    }

    /// Current position.
    async fn position(&self) -> Result<f64>;

    /// Wait for motion to finish.
    ///
    /// Drivers whose moves block until complete return immediately.
    async fn wait_settled(&self) -> Result<()> {
        Ok(())
    }

    /// Stop motion.
    async fn stop(&self) -> Result<()> {
        anyhow::bail!("Stop not supported by this device")
    }
}

/// Capability: single scalar readout.
#[async_trait]
pub trait Readable: Send + Sync {
    async fn read(&self) -> Result<f64>;
}

/// Capability: tunable centre wavelength (spectrometers, tunable lasers).
#[async_trait]
pub trait WavelengthTunable: Send + Sync {
    /// Set the centre wavelength in nanometres.
    async fn set_wavelength(&self, wavelength_nm: f64) -> Result<()>;

    async fn get_wavelength(&self) -> Result<f64>;

    /// Valid range in nanometres.
    fn wavelength_range(&self) -> (f64, f64);
}

/// Detector acquisition state as reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcquisitionStatus {
    Idle,
    Acquiring,
}

/// Capability: start/poll/read acquisition of a spectrum buffer.
///
/// The buffer is `rows × pixels`; callers average over rows to obtain a
/// single spectrum.
#[async_trait]
pub trait SpectrumAcquisition: Send + Sync {
    async fn start_acquisition(&self) -> Result<()>;

    async fn status(&self) -> Result<AcquisitionStatus>;

    /// Buffer of the last completed acquisition.
    async fn acquired_data(&self) -> Result<Vec<Vec<f64>>>;

    /// Abort any running acquisition. Must be safe to call when idle.
    async fn interrupt_acquisition(&self) -> Result<()>;

    /// Number of pixels per spectrum.
    fn pixel_count(&self) -> usize;
}

/// Capability: exposes a set of named settings.
pub trait Parameterized: Send + Sync {
    fn parameters(&self) -> &ParameterSet;
}
