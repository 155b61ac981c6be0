//! Measurements for labscope.
//!
//! A [`Measurement`] is started by a [`MeasurementRunner`], which owns the
//! worker task, the interrupt flag and the progress parameter. Runs that
//! save data open one file through the [`MeasurementContext`] with the app,
//! hardware and measurement settings written up front.

pub mod measurement;
pub mod number_gen_readout;
pub mod raster;
pub mod runner;
pub mod slow_scan;

pub use measurement::{DataFile, InterruptFlag, Measurement, MeasurementContext, StorageTarget};
pub use number_gen_readout::{
    NumberGenReadout, NumberGenReadoutExtendable, NumberGenReadoutSimple, ReadoutSettings,
};
pub use raster::{linspace, RasterScan, RasterSettings, ScanPixel, ScanType};
pub use runner::{MeasurementRunner, RunState};
pub use slow_scan::{average_rows, SlowScan2D};
