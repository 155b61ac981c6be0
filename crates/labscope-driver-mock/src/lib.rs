//! Simulated instruments for labscope.
//!
//! - [`NumberGenHw`]: the `number_gen` random/sine generator component
//! - [`MockCcd`]: spectroscopy CCD implementing `SpectrumAcquisition`
//! - [`MockAxis`]: positioning axis implementing `Movable`, with optional backlash
//!
//! All devices run in [`MockMode::Instant`] by default, which removes every
//! delay for unit tests.

pub mod common;
pub mod mock_axis;
pub mod mock_ccd;
pub mod number_gen;

pub use common::{ErrorConfig, ErrorScenario, MockMode, MockRng, TimingConfig};
pub use mock_axis::{AxisLimits, LimitBehavior, MockAxis};
pub use mock_ccd::MockCcd;
pub use number_gen::{NumberGenDev, NumberGenHw};
