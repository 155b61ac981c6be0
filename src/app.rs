//! Microscope application
//!
//! [`MicroscopeApp`] builds the hardware components and measurements named in
//! a [`LabscopeConfig`], applies their initial settings and owns one
//! [`MeasurementRunner`] per measurement. Every run gets a [`Provenance`]
//! holding the application settings and a snapshot of every component.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use labscope_core::{
    HardwareComponent, Movable, Parameter, ParameterSet, Parameterized, Readable,
    SpectrumAcquisition,
};
use labscope_driver_andor::AndorSpecHw;
use labscope_driver_mcl::{MclXyStageHw, MclXyzStageHw};
use labscope_driver_mock::{AxisLimits, MockAxis, MockCcd, MockMode, NumberGenHw};
use labscope_experiment::{
    Measurement, MeasurementRunner, NumberGenReadout, NumberGenReadoutExtendable,
    NumberGenReadoutSimple, SlowScan2D, StorageTarget,
};
use labscope_storage::{Provenance, StorageFormat};
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::{HardwareDefinition, LabscopeConfig, MeasurementDefinition};

/// Settings table of the `mock_xy_stage` hardware type.
#[derive(Debug, Clone, Deserialize)]
struct MockStageSettings {
    #[serde(default)]
    backlash: f64,
    #[serde(default)]
    mode: MockMode,
    #[serde(default = "default_travel_min")]
    min: f64,
    #[serde(default = "default_travel_max")]
    max: f64,
}

fn default_travel_min() -> f64 {
    0.0
}

fn default_travel_max() -> f64 {
    300.0
}

struct HardwareEntry {
    component: Arc<dyn HardwareComponent>,
    connect_on_startup: bool,
}

/// Hardware, measurements and application settings of one microscope.
pub struct MicroscopeApp {
    settings: ParameterSet,
    pub save_dir: Parameter<String>,
    pub data_format: Parameter<String>,
    hardware: Vec<HardwareEntry>,
    readables: BTreeMap<String, Arc<dyn Readable>>,
    detectors: BTreeMap<String, Arc<dyn SpectrumAcquisition>>,
    axes: BTreeMap<String, Arc<dyn Movable>>,
    /// Simulated axes have settings but no component lifecycle.
    mock_axes: Vec<Arc<MockAxis>>,
    measurements: BTreeMap<String, Arc<MeasurementRunner>>,
    scans: BTreeMap<String, Arc<SlowScan2D>>,
}

impl std::fmt::Debug for MicroscopeApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MicroscopeApp")
            .field("hardware", &self.hardware_names())
            .field("axes", &self.axis_names())
            .field("measurements", &self.measurement_names())
            .finish_non_exhaustive()
    }
}

impl MicroscopeApp {
    /// Build everything the configuration enables and apply initial settings.
    ///
    /// Nothing is connected yet; see [`MicroscopeApp::connect_startup`].
    pub async fn from_config(config: &LabscopeConfig) -> Result<Self> {
        config.validate().map_err(anyhow::Error::msg)?;

        let mut settings = ParameterSet::new();
        settings.add(Parameter::new("app_name", config.application.name.clone()).read_only());
        let save_dir = settings.add(Parameter::new(
            "save_dir",
            config.storage.save_dir.display().to_string(),
        ));
        let data_format = settings.add(
            Parameter::new("data_format", config.storage.format.to_lowercase())
                .with_string_choices(["json", "hdf5"]),
        );

        let mut app = Self {
            settings,
            save_dir,
            data_format,
            hardware: Vec::new(),
            readables: BTreeMap::new(),
            detectors: BTreeMap::new(),
            axes: BTreeMap::new(),
            mock_axes: Vec::new(),
            measurements: BTreeMap::new(),
            scans: BTreeMap::new(),
        };

        for hw in config.enabled_hardware() {
            app.add_hardware(hw)
                .await
                .with_context(|| format!("failed to set up hardware '{}'", hw.r#type))?;
        }
        for m in config.enabled_measurements() {
            app.add_measurement(m)
                .await
                .with_context(|| format!("failed to set up measurement '{}'", m.r#type))?;
        }

        info!(
            hardware = app.hardware.len(),
            axes = app.axes.len(),
            measurements = app.measurements.len(),
            "Application assembled"
        );
        Ok(app)
    }

    async fn add_hardware(&mut self, def: &HardwareDefinition) -> Result<()> {
        let component: Arc<dyn HardwareComponent> = match def.r#type.as_str() {
            NumberGenHw::NAME => {
                let hw = Arc::new(NumberGenHw::new());
                self.readables
                    .insert(NumberGenHw::NAME.to_string(), hw.clone());
                hw
            }
            MockCcd::NAME => {
                let hw = Arc::new(MockCcd::new());
                self.detectors.insert(MockCcd::NAME.to_string(), hw.clone());
                hw
            }
            AndorSpecHw::NAME => Arc::new(AndorSpecHw::new()),
            MclXyStageHw::NAME => {
                let hw = Arc::new(MclXyStageHw::new());
                for (logical, name) in [("X", "x"), ("Y", "y")] {
                    let axis = hw
                        .axis(logical)
                        .ok_or_else(|| anyhow!("stage has no axis {logical}"))?;
                    self.insert_axis(name, Arc::new(axis))?;
                }
                hw
            }
            MclXyzStageHw::NAME => {
                let hw = Arc::new(MclXyzStageHw::new());
                self.insert_axis("z", Arc::new(hw.z_axis()))?;
                hw
            }
            "mock_xy_stage" => {
                let cfg: MockStageSettings = def
                    .settings
                    .clone()
                    .try_into()
                    .context("invalid mock_xy_stage settings")?;
                for name in ["x", "y"] {
                    let axis = Arc::new(
                        MockAxis::builder(name)
                            .backlash(cfg.backlash)
                            .mode(cfg.mode)
                            .limits(AxisLimits::hard_stop(cfg.min, cfg.max))
                            .build(),
                    );
                    self.insert_axis(name, axis.clone())?;
                    self.mock_axes.push(axis);
                }
                info!(backlash = cfg.backlash, "Simulated XY stage added");
                return Ok(());
            }
            other => bail!("unknown hardware type '{other}'"),
        };

        component.settings().apply_toml(&def.settings).await?;
        info!(hardware = %component.name(), "Hardware added");
        self.hardware.push(HardwareEntry {
            component,
            connect_on_startup: def.connect_on_startup,
        });
        Ok(())
    }

    fn insert_axis(&mut self, name: &str, axis: Arc<dyn Movable>) -> Result<()> {
        if self.axes.insert(name.to_string(), axis).is_some() {
            bail!("axis '{name}' is provided by more than one stage");
        }
        Ok(())
    }

    async fn add_measurement(&mut self, def: &MeasurementDefinition) -> Result<()> {
        let source = def.source_or_default();
        let measurement: Arc<dyn Measurement> = match def.r#type.as_str() {
            NumberGenReadout::NAME => Arc::new(NumberGenReadout::new(self.readable(source)?)),
            NumberGenReadoutSimple::NAME => {
                Arc::new(NumberGenReadoutSimple::new(self.readable(source)?))
            }
            NumberGenReadoutExtendable::NAME => {
                Arc::new(NumberGenReadoutExtendable::new(self.readable(source)?))
            }
            SlowScan2D::NAME => {
                let detector = self
                    .detectors
                    .get(source)
                    .cloned()
                    .ok_or_else(|| anyhow!("no detector named '{source}'"))?;
                let mut scan = SlowScan2D::new(detector);
                for (name, axis) in &self.axes {
                    scan = scan.with_axis(name.clone(), axis.clone());
                }
                let scan = Arc::new(scan);
                self.scans.insert(SlowScan2D::NAME.to_string(), scan.clone());
                scan
            }
            other => bail!("unknown measurement type '{other}'"),
        };

        measurement.settings().apply_toml(&def.settings).await?;
        let name = measurement.name().to_string();
        info!(measurement = %name, source, "Measurement added");
        self.measurements
            .insert(name, Arc::new(MeasurementRunner::new(measurement)));
        Ok(())
    }

    fn readable(&self, name: &str) -> Result<Arc<dyn Readable>> {
        self.readables
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("no readable hardware named '{name}'"))
    }

    pub fn settings(&self) -> &ParameterSet {
        &self.settings
    }

    pub fn hardware(&self, name: &str) -> Option<Arc<dyn HardwareComponent>> {
        self.hardware
            .iter()
            .find(|e| e.component.name() == name)
            .map(|e| e.component.clone())
    }

    /// Component names in connection order.
    pub fn hardware_names(&self) -> Vec<String> {
        self.hardware
            .iter()
            .map(|e| e.component.name().to_string())
            .collect()
    }

    pub fn axis(&self, name: &str) -> Option<Arc<dyn Movable>> {
        self.axes.get(name).cloned()
    }

    pub fn axis_names(&self) -> Vec<String> {
        self.axes.keys().cloned().collect()
    }

    pub fn measurement(&self, name: &str) -> Option<Arc<MeasurementRunner>> {
        self.measurements.get(name).cloned()
    }

    pub fn measurement_names(&self) -> Vec<String> {
        self.measurements.keys().cloned().collect()
    }

    fn runner(&self, name: &str) -> Result<Arc<MeasurementRunner>> {
        self.measurement(name)
            .ok_or_else(|| anyhow!("no measurement named '{name}'"))
    }

    /// Connect the components marked `connect_on_startup`.
    pub async fn connect_startup(&self) -> Result<()> {
        for entry in self.hardware.iter().filter(|e| e.connect_on_startup) {
            entry
                .component
                .connect()
                .await
                .with_context(|| format!("failed to connect {}", entry.component.name()))?;
        }
        Ok(())
    }

    pub async fn connect_all(&self) -> Result<()> {
        for entry in &self.hardware {
            if entry.component.is_connected() {
                continue;
            }
            entry
                .component
                .connect()
                .await
                .with_context(|| format!("failed to connect {}", entry.component.name()))?;
        }
        Ok(())
    }

    /// Disconnect in reverse order. Errors are logged and the rest still run.
    pub async fn disconnect_all(&self) -> Result<()> {
        let mut failed = Vec::new();
        for entry in self.hardware.iter().rev() {
            if let Err(e) = entry.component.disconnect().await {
                warn!(hardware = %entry.component.name(), "Disconnect failed: {e:#}");
                failed.push(entry.component.name().to_string());
            }
        }
        if !failed.is_empty() {
            bail!("failed to disconnect: {}", failed.join(", "));
        }
        Ok(())
    }

    pub fn storage_target(&self) -> Result<StorageTarget> {
        let format: StorageFormat = self
            .data_format
            .get()
            .parse()
            .map_err(anyhow::Error::msg)?;
        Ok(StorageTarget {
            dir: self.save_dir.get().into(),
            format,
        })
    }

    /// Settings of the app, every component and the named measurement.
    pub fn provenance(&self, measurement: &str) -> Result<Provenance> {
        let runner = self.runner(measurement)?;
        let mut provenance = Provenance::new(runner.name());
        provenance.app = self.settings.snapshot()?;
        for entry in &self.hardware {
            provenance.hardware.insert(
                entry.component.name().to_string(),
                entry.component.settings().snapshot()?,
            );
        }
        for axis in &self.mock_axes {
            provenance.hardware.insert(
                format!("mock_axis_{}", axis.name()),
                axis.parameters().snapshot()?,
            );
        }
        provenance.measurement = runner.measurement().settings().snapshot()?;
        Ok(provenance)
    }

    /// Start a measurement on its worker task.
    pub fn start_measurement(&self, name: &str) -> Result<()> {
        let runner = self.runner(name)?;
        runner.start(self.storage_target()?, self.provenance(name)?)
    }

    pub fn interrupt_measurement(&self, name: &str) -> Result<()> {
        self.runner(name)?.interrupt();
        Ok(())
    }

    /// Wait for a started measurement and return its result.
    pub async fn wait_measurement(&self, name: &str) -> Result<()> {
        self.runner(name)?.wait().await
    }

    pub async fn run_measurement(&self, name: &str) -> Result<()> {
        self.start_measurement(name)?;
        self.wait_measurement(name).await
    }

    /// Take the background spectrum of a scan measurement.
    pub async fn acquire_background(&self, scan: &str) -> Result<Vec<f64>> {
        let scan = self
            .scans
            .get(scan)
            .ok_or_else(|| anyhow!("no scan measurement named '{scan}'"))?;
        scan.acquire_background().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(toml: &str) -> LabscopeConfig {
        LabscopeConfig::from_toml_str(toml).unwrap()
    }

    #[tokio::test]
    async fn builds_components_and_axes() {
        let app = MicroscopeApp::from_config(&config(
            r#"
            [[hardware]]
            type = "number_gen"
            [[hardware]]
            type = "andor_ccd"
            [[hardware]]
            type = "mock_xy_stage"
            settings = { backlash = 2.0 }
            [[measurements]]
            type = "example_2d_scan"
            settings = { h_axis = "y", v_axis = "x" }
            [[measurements]]
            type = "number_gen_readout_simple"
            "#,
        ))
        .await
        .unwrap();

        assert_eq!(app.hardware_names(), vec!["number_gen", "andor_ccd"]);
        assert_eq!(app.axis_names(), vec!["x", "y"]);
        assert_eq!(
            app.measurement_names(),
            vec!["example_2d_scan", "number_gen_readout_simple"]
        );

        let scan = app.measurement("example_2d_scan").unwrap();
        let h_axis: Parameter<String> = scan.measurement().settings().get_typed("h_axis").unwrap();
        assert_eq!(h_axis.get(), "y");
    }

    #[tokio::test]
    async fn scan_without_detector_is_rejected() {
        let err = MicroscopeApp::from_config(&config(
            "[[measurements]]\ntype = \"example_2d_scan\"",
        ))
        .await
        .unwrap_err();
        assert!(format!("{err:#}").contains("no detector named 'andor_ccd'"));
    }

    #[tokio::test]
    async fn unknown_setting_fails_build() {
        let result = MicroscopeApp::from_config(&config(
            "[[hardware]]\ntype = \"number_gen\"\nsettings = { volume = 11 }",
        ))
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn provenance_collects_every_component() {
        let app = MicroscopeApp::from_config(&config(
            r#"
            [application]
            name = "bench"
            [[hardware]]
            type = "number_gen"
            [[hardware]]
            type = "mock_xy_stage"
            [[measurements]]
            type = "number_gen_readout"
            "#,
        ))
        .await
        .unwrap();

        let provenance = app.provenance("number_gen_readout").unwrap();
        assert_eq!(provenance.measurement_name, "number_gen_readout");
        assert_eq!(provenance.app["app_name"], "bench");
        assert!(provenance.hardware.contains_key("number_gen"));
        assert!(provenance.hardware.contains_key("mock_axis_x"));
        assert_eq!(provenance.measurement["N"], 101);
        assert!(app.provenance("missing").is_err());
    }
}
