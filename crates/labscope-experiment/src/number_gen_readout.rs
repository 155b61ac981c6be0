//! Readouts of the `number_gen` sine channel.
//!
//! All three share the settings `sampling_period` (s), `N` and `save_h5`, and
//! publish the in-memory buffer through the `y` parameter for live display.
//!
//! - [`NumberGenReadout`]: runs until interrupted, overwriting a ring of `N`
//!   samples in a fixed-size dataset, flushed after every sample.
//! - [`NumberGenReadoutSimple`]: takes `N` samples and saves them at the end.
//! - [`NumberGenReadoutExtendable`]: runs until interrupted, appending every
//!   sample to a dataset grown `N` rows at a time.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use labscope_core::{Parameter, ParameterSet, Readable};
use tracing::{debug, info};

use crate::measurement::{DataFile, Measurement, MeasurementContext};

/// Settings common to the readouts.
#[derive(Debug)]
pub struct ReadoutSettings {
    pub settings: ParameterSet,
    pub sampling_period: Parameter<f64>,
    pub n: Parameter<i64>,
    pub save_h5: Parameter<bool>,
}

impl ReadoutSettings {
    fn new() -> Self {
        let mut settings = ParameterSet::new();
        let sampling_period = settings.add(
            Parameter::new("sampling_period", 0.1)
                .with_unit("s")
                .with_range(0.0, 3600.0),
        );
        let n = settings.add(Parameter::new("N", 101_i64).with_range(1, 100_000_000));
        let save_h5 = settings.add(Parameter::new("save_h5", true));
        Self {
            settings,
            sampling_period,
            n,
            save_h5,
        }
    }

    fn len(&self) -> usize {
        self.n.get().max(1) as usize
    }
}

fn live_buffer() -> Parameter<Vec<f64>> {
    Parameter::new("y", vec![1.0; 101]).read_only()
}

/// Close the file even when the acquisition loop failed.
async fn finish(name: &str, file: Option<DataFile>, result: Result<()>) -> Result<()> {
    info!(measurement = name, "Finishing");
    if let Some(file) = file {
        file.close().await?;
        info!(measurement = name, path = %file.path().display(), "Saved");
    }
    result
}

/// Continuous readout into a ring buffer of `N` samples.
pub struct NumberGenReadout {
    pub readout: ReadoutSettings,
    pub y: Parameter<Vec<f64>>,
    hw: Arc<dyn Readable>,
}

impl NumberGenReadout {
    pub const NAME: &'static str = "number_gen_readout";

    pub fn new(hw: Arc<dyn Readable>) -> Self {
        Self {
            readout: ReadoutSettings::new(),
            y: live_buffer(),
            hw,
        }
    }

    async fn acquire(
        &self,
        ctx: &MeasurementContext,
        file: Option<&DataFile>,
        y: &mut [f64],
    ) -> Result<()> {
        let n = y.len();
        let mut i = 0;
        while !ctx.interrupted() {
            i %= n;
            ctx.set_progress(i as f64 * 100.0 / n as f64);

            y[i] = self.hw.read().await?;
            self.y.store(y.to_vec());

            if let Some(file) = file {
                file.write_at("y", vec![i], vec![y[i]]).await?;
                file.flush().await?;
            }

            if ctx
                .interrupt
                .sleep(self.readout.sampling_period.get())
                .await
            {
                break;
            }
            i += 1;
        }
        Ok(())
    }
}

#[async_trait]
impl Measurement for NumberGenReadout {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn settings(&self) -> &ParameterSet {
        &self.readout.settings
    }

    async fn run(&self, ctx: &MeasurementContext) -> Result<()> {
        let n = self.readout.len();
        let mut y = vec![1.0; n];
        self.y.store(y.clone());

        let file = if self.readout.save_h5.get() {
            let file = ctx.open_file(Self::NAME, self.settings()).await?;
            file.create_dataset("y", vec![n]).await?;
            Some(file)
        } else {
            None
        };

        let result = self.acquire(ctx, file.as_ref(), &mut y).await;
        finish(Self::NAME, file, result).await
    }
}

/// `N` samples, saved in one go when done.
pub struct NumberGenReadoutSimple {
    pub readout: ReadoutSettings,
    pub y: Parameter<Vec<f64>>,
    hw: Arc<dyn Readable>,
}

impl NumberGenReadoutSimple {
    pub const NAME: &'static str = "number_gen_readout_simple";

    pub fn new(hw: Arc<dyn Readable>) -> Self {
        Self {
            readout: ReadoutSettings::new(),
            y: live_buffer(),
            hw,
        }
    }
}

#[async_trait]
impl Measurement for NumberGenReadoutSimple {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn settings(&self) -> &ParameterSet {
        &self.readout.settings
    }

    async fn run(&self, ctx: &MeasurementContext) -> Result<()> {
        let n = self.readout.len();
        let mut y = vec![1.0; n];
        self.y.store(y.clone());

        for i in 0..n {
            y[i] = self.hw.read().await?;
            self.y.store(y.clone());

            let interrupted = ctx
                .interrupt
                .sleep(self.readout.sampling_period.get())
                .await;
            ctx.set_progress(i as f64 * 100.0 / n as f64);
            if interrupted {
                debug!(samples = i + 1, "readout interrupted");
                break;
            }
        }

        if self.readout.save_h5.get() {
            let file = ctx.open_file(Self::NAME, self.settings()).await?;
            let result = file.write("y", vec![n], y).await;
            finish(Self::NAME, Some(file), result).await?;
        }
        Ok(())
    }
}

/// Continuous readout appended to an extendable dataset.
pub struct NumberGenReadoutExtendable {
    pub readout: ReadoutSettings,
    pub y: Parameter<Vec<f64>>,
    hw: Arc<dyn Readable>,
}

impl NumberGenReadoutExtendable {
    pub const NAME: &'static str = "number_gen_readout_extendable_dataset";

    pub fn new(hw: Arc<dyn Readable>) -> Self {
        Self {
            readout: ReadoutSettings::new(),
            y: live_buffer(),
            hw,
        }
    }

    async fn acquire(
        &self,
        ctx: &MeasurementContext,
        file: Option<&DataFile>,
        y: &mut [f64],
    ) -> Result<()> {
        let n = y.len();
        let mut i = 0;
        let mut i_extended = 0;
        while !ctx.interrupted() {
            i %= n;
            ctx.set_progress(i as f64 * 100.0 / n as f64);

            let val = self.hw.read().await?;
            y[i] = val;
            self.y.store(y.to_vec());

            if let Some(file) = file {
                if i_extended >= file.len("y").await? {
                    file.resize("y", i_extended + n).await?;
                }
                file.write_at("y", vec![i_extended], vec![val]).await?;
                file.flush().await?;
            }

            if ctx
                .interrupt
                .sleep(self.readout.sampling_period.get())
                .await
            {
                break;
            }
            i += 1;
            i_extended += 1;
        }
        Ok(())
    }
}

#[async_trait]
impl Measurement for NumberGenReadoutExtendable {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn settings(&self) -> &ParameterSet {
        &self.readout.settings
    }

    async fn run(&self, ctx: &MeasurementContext) -> Result<()> {
        let n = self.readout.len();
        let mut y = vec![1.0; n];
        self.y.store(y.clone());

        let file = if self.readout.save_h5.get() {
            let file = ctx.open_file(Self::NAME, self.settings()).await?;
            file.create_extendable("y", n).await?;
            Some(file)
        } else {
            None
        };

        let result = self.acquire(ctx, file.as_ref(), &mut y).await;
        finish(Self::NAME, file, result).await
    }
}
