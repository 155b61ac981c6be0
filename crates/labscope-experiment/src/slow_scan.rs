//! 2D slow scan: step a stage over a raster and record one spectrum per
//! pixel.
//!
//! Per pixel the scan moves the stage (slow move with optional backlash
//! correction at line starts, plain move otherwise), waits `settle_time`,
//! starts an acquisition and polls the detector every `poll_interval` until
//! it is idle. The averaged spectrum, minus the background when enabled,
//! is summed into `display_image_map` and written to `signal_map`. The
//! acquisition is interrupted after every pixel, including failed ones.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{anyhow, bail, ensure, Result};
use async_trait::async_trait;
use labscope_core::{AcquisitionStatus, Movable, Parameter, ParameterSet, SpectrumAcquisition};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::measurement::{DataFile, InterruptFlag, Measurement, MeasurementContext};
use crate::raster::{RasterScan, RasterSettings, ScanPixel};

/// Column-wise mean over the rows of a detector buffer.
pub fn average_rows(buffer: &[Vec<f64>]) -> Result<Vec<f64>> {
    let first = buffer
        .first()
        .ok_or_else(|| anyhow!("detector returned an empty buffer"))?;
    let len = first.len();
    ensure!(
        buffer.iter().all(|row| row.len() == len),
        "detector buffer rows differ in length"
    );
    let mut out = vec![0.0; len];
    for row in buffer {
        for (acc, x) in out.iter_mut().zip(row) {
            *acc += x;
        }
    }
    let rows = buffer.len() as f64;
    out.iter_mut().for_each(|x| *x /= rows);
    Ok(out)
}

pub struct SlowScan2D {
    settings: ParameterSet,
    pub raster: RasterSettings,
    pub save_h5: Parameter<bool>,
    pub h_axis: Parameter<String>,
    pub v_axis: Parameter<String>,
    pub backlash_correction: Parameter<bool>,
    /// Undershoot distance for the backlash approach.
    pub backlash: Parameter<f64>,
    pub settle_time: Parameter<f64>,
    pub poll_interval: Parameter<f64>,
    pub subtract_background: Parameter<bool>,
    /// Summed signal per pixel, `n_frames × Nv × Nh` row-major.
    pub display_image_map: Parameter<Vec<f64>>,
    axes: BTreeMap<String, Arc<dyn Movable>>,
    detector: Arc<dyn SpectrumAcquisition>,
    background: RwLock<Option<Vec<f64>>>,
}

impl SlowScan2D {
    pub const NAME: &'static str = "example_2d_scan";

    pub fn new(detector: Arc<dyn SpectrumAcquisition>) -> Self {
        let mut settings = ParameterSet::new();
        let raster = RasterSettings::register(&mut settings);
        let save_h5 = settings.add(Parameter::new("save_h5", true));
        let h_axis = settings.add(
            Parameter::new("h_axis", "x".to_string()).with_string_choices(["x", "y"]),
        );
        let v_axis = settings.add(
            Parameter::new("v_axis", "y".to_string()).with_string_choices(["x", "y"]),
        );
        let backlash_correction = settings.add(Parameter::new("backlash_correction", false));
        let backlash = settings.add(
            Parameter::new("backlash", 5.0)
                .with_unit("um")
                .with_range(0.0, 1000.0),
        );
        let settle_time = settings.add(
            Parameter::new("settle_time", 0.01)
                .with_unit("s")
                .with_range(0.0, 60.0),
        );
        let poll_interval = settings.add(
            Parameter::new("poll_interval", 0.01)
                .with_unit("s")
                .with_range(0.0, 10.0),
        );
        let subtract_background = settings.add(Parameter::new("subtract_background", false));
        Self {
            settings,
            raster,
            save_h5,
            h_axis,
            v_axis,
            backlash_correction,
            backlash,
            settle_time,
            poll_interval,
            subtract_background,
            display_image_map: Parameter::new("display_image_map", Vec::new()).read_only(),
            axes: BTreeMap::new(),
            detector,
            background: RwLock::new(None),
        }
    }

    /// Make an axis selectable as `h_axis` / `v_axis`.
    pub fn with_axis(mut self, name: impl Into<String>, axis: Arc<dyn Movable>) -> Self {
        self.axes.insert(name.into(), axis);
        let names: Vec<(String, String)> =
            self.axes.keys().map(|n| (n.clone(), n.clone())).collect();
        self.h_axis.change_choices(names.clone());
        self.v_axis.change_choices(names);
        self
    }

    fn axis(&self, name: &str) -> Result<Arc<dyn Movable>> {
        self.axes
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("no stage axis named '{name}'"))
    }

    pub fn background(&self) -> Option<Vec<f64>> {
        self.background.read().clone()
    }

    pub fn clear_background(&self) {
        *self.background.write() = None;
    }

    /// Record one spectrum as the background.
    pub async fn acquire_background(&self) -> Result<Vec<f64>> {
        let spectrum = self
            .acquire_spectrum(&InterruptFlag::new())
            .await?
            .ok_or_else(|| anyhow!("background acquisition interrupted"))?;
        info!(pixels = spectrum.len(), "Background acquired");
        *self.background.write() = Some(spectrum.clone());
        Ok(spectrum)
    }

    /// Start, poll until idle, average rows. `None` when interrupted first.
    /// The detector is always told to stop afterwards.
    async fn acquire_spectrum(&self, interrupt: &InterruptFlag) -> Result<Option<Vec<f64>>> {
        let poll = self.poll_interval.get();
        let acquired: Result<Option<Vec<f64>>> = async {
            debug!("starting acq");
            self.detector.start_acquisition().await?;
            loop {
                if interrupt.is_set() {
                    return Ok(None);
                }
                match self.detector.status().await? {
                    AcquisitionStatus::Idle => {
                        let buffer = self.detector.acquired_data().await?;
                        return average_rows(&buffer).map(Some);
                    }
                    AcquisitionStatus::Acquiring => {
                        interrupt.sleep(poll).await;
                    }
                }
            }
        }
        .await;
        let stopped = self.detector.interrupt_acquisition().await;
        let spectrum = acquired?;
        stopped?;
        Ok(spectrum)
    }

    fn apply_background(&self, spectrum: &mut [f64]) -> Result<()> {
        if !self.subtract_background.get() {
            return Ok(());
        }
        let background = self.background.read();
        let bg = background
            .as_ref()
            .ok_or_else(|| anyhow!("subtract_background is set but no background was acquired"))?;
        ensure!(
            bg.len() == spectrum.len(),
            "background has {} pixels, spectrum has {}",
            bg.len(),
            spectrum.len()
        );
        for (s, b) in spectrum.iter_mut().zip(bg.iter()) {
            *s -= b;
        }
        Ok(())
    }

    async fn move_to(
        &self,
        h_axis: &dyn Movable,
        v_axis: &dyn Movable,
        h: f64,
        v: f64,
    ) -> Result<()> {
        h_axis.move_abs(h).await?;
        v_axis.move_abs(v).await?;
        h_axis.wait_settled().await?;
        v_axis.wait_settled().await
    }

    /// Approach from below by `backlash` when correction is enabled.
    async fn move_slow(
        &self,
        h_axis: &dyn Movable,
        v_axis: &dyn Movable,
        h: f64,
        v: f64,
    ) -> Result<()> {
        if self.backlash_correction.get() {
            let b = self.backlash.get();
            debug!(h, v, backlash = b, "backlash approach");
            self.move_to(h_axis, v_axis, h - b, v - b).await?;
        }
        self.move_to(h_axis, v_axis, h, v).await
    }

    async fn write_geometry(
        &self,
        file: &DataFile,
        scan: &RasterScan,
        pixels: &[ScanPixel],
    ) -> Result<()> {
        let n = pixels.len();
        file.write("h_array", vec![scan.nh], scan.h_array()).await?;
        file.write("v_array", vec![scan.nv], scan.v_array()).await?;
        file.write("range_extent", vec![4], scan.range_extent().to_vec())
            .await?;
        file.write(
            "scan_h_positions",
            vec![n],
            pixels.iter().map(|p| p.h).collect(),
        )
        .await?;
        file.write(
            "scan_v_positions",
            vec![n],
            pixels.iter().map(|p| p.v).collect(),
        )
        .await?;
        file.write(
            "scan_slow_move",
            vec![n],
            pixels
                .iter()
                .map(|p| if p.slow_move { 1.0 } else { 0.0 })
                .collect(),
        )
        .await?;
        file.write(
            "scan_index_array",
            vec![n, 3],
            pixels
                .iter()
                .flat_map(|p| [p.k as f64, p.j as f64, p.i as f64])
                .collect(),
        )
        .await
    }

    async fn scan(
        &self,
        ctx: &MeasurementContext,
        scan: &RasterScan,
        pixels: &[ScanPixel],
        file: Option<&DataFile>,
    ) -> Result<()> {
        let h_axis = self.axis(&self.h_axis.get())?;
        let v_axis = self.axis(&self.v_axis.get())?;
        let [_, nv, nh] = scan.scan_shape();
        let mut display = vec![0.0; scan.pixel_count()];
        self.display_image_map.store(display.clone());

        let Some(first) = pixels.first() else {
            return Ok(());
        };
        self.move_slow(h_axis.as_ref(), v_axis.as_ref(), first.h, first.v)
            .await?;

        let total = pixels.len();
        for (n, px) in pixels.iter().enumerate() {
            if ctx.interrupted() {
                break;
            }
            ctx.set_progress(n as f64 * 100.0 / total as f64);

            if px.slow_move {
                self.move_slow(h_axis.as_ref(), v_axis.as_ref(), px.h, px.v)
                    .await?;
                if let Some(file) = file {
                    file.flush().await?;
                }
            } else {
                self.move_to(h_axis.as_ref(), v_axis.as_ref(), px.h, px.v)
                    .await?;
            }
            if ctx.interrupt.sleep(self.settle_time.get()).await {
                break;
            }

            let Some(mut signal) = self.acquire_spectrum(&ctx.interrupt).await? else {
                break;
            };
            self.apply_background(&mut signal)?;

            display[(px.k * nv + px.j) * nh + px.i] = signal.iter().sum();
            self.display_image_map.store(display.clone());

            if let Some(file) = file {
                file.write_at("signal_map", vec![px.k, px.j, px.i], signal)
                    .await?;
            }
        }
        if !ctx.interrupted() {
            ctx.set_progress(100.0);
        }
        Ok(())
    }
}

#[async_trait]
impl Measurement for SlowScan2D {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn settings(&self) -> &ParameterSet {
        &self.settings
    }

    async fn run(&self, ctx: &MeasurementContext) -> Result<()> {
        let scan = self.raster.geometry()?;
        if self.h_axis.get() == self.v_axis.get() {
            bail!("h_axis and v_axis are both '{}'", self.h_axis.get());
        }
        if self.subtract_background.get() && self.background.read().is_none() {
            bail!("subtract_background is set but no background was acquired");
        }
        let pixels = scan.pixels();
        let spectrum_len = self.detector.pixel_count();
        info!(
            pixels = pixels.len(),
            spectrum_len,
            scan_type = ?scan.scan_type,
            "Slow scan starting"
        );

        let file = if self.save_h5.get() {
            let file = ctx.open_file(Self::NAME, self.settings()).await?;
            self.write_geometry(&file, &scan, &pixels).await?;
            let [frames, nv, nh] = scan.scan_shape();
            file.create_dataset("signal_map", vec![frames, nv, nh, spectrum_len])
                .await?;
            Some(file)
        } else {
            None
        };

        let result = self.scan(ctx, &scan, &pixels, file.as_ref()).await;
        if let Err(e) = &result {
            warn!("Slow scan stopped: {e:#}");
        }
        if let Some(file) = file {
            file.close().await?;
            info!(path = %file.path().display(), "Slow scan saved");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_are_averaged() {
        let avg = average_rows(&[vec![1.0, 2.0], vec![3.0, 6.0]]).unwrap();
        assert_eq!(avg, vec![2.0, 4.0]);
        assert!(average_rows(&[]).is_err());
        assert!(average_rows(&[vec![1.0], vec![1.0, 2.0]]).is_err());
    }
}
