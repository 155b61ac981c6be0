//! `andor_spec` hardware component.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use labscope_core::hardware::{run_blocking, ComponentBase, HardwareComponent, SharedDevice};
use labscope_core::{Parameter, ParameterSet, ScopeError, WavelengthTunable};
use parking_lot::{Mutex, RwLock};
use tracing::info;

use crate::calibration::{GratingCalibration, DEFAULT_CALIBRATION_ROW};
use crate::device::AndorShamrockSpec;
use crate::sdk::{Flipper, Port, ShamrockSdk, Slit};

/// Creates a fresh SDK handle on every connect.
pub type SdkFactory = Arc<dyn Fn() -> Result<Box<dyn ShamrockSdk>> + Send + Sync>;

/// SDK chosen by the enabled features: the vendor library when compiled in,
/// otherwise the simulated instrument.
pub fn default_sdk_factory() -> SdkFactory {
    #[cfg(feature = "shamrock_sdk")]
    {
        Arc::new(|| {
            let lib = crate::library::ShamrockLibrary::load()?;
            Ok(Box::new(lib) as Box<dyn ShamrockSdk>)
        })
    }
    #[cfg(all(not(feature = "shamrock_sdk"), feature = "mock"))]
    {
        Arc::new(|| Ok(Box::new(crate::mock::MockShamrock::new()) as Box<dyn ShamrockSdk>))
    }
    #[cfg(not(any(feature = "shamrock_sdk", feature = "mock")))]
    {
        Arc::new(|| Err(ScopeError::FeatureNotEnabled("shamrock_sdk".into()).into()))
    }
}

const PORT_CHOICES: [&str; 2] = ["direct", "side"];
const WL_RANGE: (f64, f64) = (-100.0, 2000.0);

fn default_calibration_table() -> Vec<Vec<f64>> {
    vec![DEFAULT_CALIBRATION_ROW.to_vec(); 4]
}

/// Andor Shamrock spectrometer behind the `andor_spec` settings.
pub struct AndorSpecHw {
    base: ComponentBase,
    pub dev_id: Parameter<i64>,
    pub serial_num: Parameter<String>,
    pub center_wl: Parameter<f64>,
    pub turret: Parameter<i64>,
    pub grating_id: Parameter<i64>,
    pub grating_name: Parameter<String>,
    pub input_flipper: Parameter<String>,
    pub output_flipper: Parameter<String>,
    pub focus_mirror: Parameter<i64>,
    pub slit_input_side: Parameter<f64>,
    pub grating_calib_side_in: Parameter<Vec<Vec<f64>>>,
    pub grating_calib_direct_in: Parameter<Vec<Vec<f64>>>,
    /// Detector offsets keyed by (entrance, exit) port.
    pub det_offsets: Vec<(Port, Port, Parameter<i64>)>,
    /// Grating offsets for gratings 1..=4.
    pub grating_offsets: Vec<(i32, Parameter<i64>)>,
    factory: SdkFactory,
    device: RwLock<Option<SharedDevice<AndorShamrockSpec>>>,
}

impl AndorSpecHw {
    pub const NAME: &'static str = "andor_spec";

    pub fn new() -> Self {
        Self::with_sdk_factory(default_sdk_factory())
    }

    pub fn with_sdk_factory(factory: SdkFactory) -> Self {
        let mut base = ComponentBase::new(Self::NAME);
        let dev_id = base.add(Parameter::new("dev_id", 0i64).with_range(0, 16));
        let serial_num = base.add(Parameter::new("serial_num", String::new()).read_only());
        let center_wl = base.add(
            Parameter::new("center_wl", 0.0)
                .with_unit("nm")
                .with_range(WL_RANGE.0, WL_RANGE.1)
                .reread_from_hardware_after_write(),
        );
        let turret = base.add(Parameter::new("turret", 0i64).read_only());
        let grating_id = base.add(
            Parameter::new("grating_id", 1i64)
                .with_dtype("enum")
                .with_choices((1..=6).map(|i| (i.to_string(), i)).collect()),
        );
        let grating_name = base.add(Parameter::new("grating_name", String::new()).read_only());
        let input_flipper = base.add(
            Parameter::new("input_flipper", "direct".to_string()).with_string_choices(PORT_CHOICES),
        );
        let output_flipper = base.add(
            Parameter::new("output_flipper", "direct".to_string())
                .with_string_choices(PORT_CHOICES),
        );
        let focus_mirror = base.add(Parameter::new("focus_mirror", 0i64).with_unit("steps"));
        let slit_input_side = base.add(
            Parameter::new("slit_input_side", 100.0)
                .with_unit("um")
                .with_range(10.0, 2500.0),
        );
        let grating_calib_side_in = base.add(
            Parameter::new("grating_calib_side_in", default_calibration_table())
                .with_dtype("array"),
        );
        let grating_calib_direct_in = base.add(
            Parameter::new("grating_calib_direct_in", default_calibration_table())
                .with_dtype("array"),
        );

        let mut det_offsets = Vec::new();
        for entrance in [Port::Direct, Port::Side] {
            for exit in [Port::Direct, Port::Side] {
                let name = format!("det_offset_{}_{}", entrance.as_str(), exit.as_str());
                let p = base.add(Parameter::new(name, 0i64).with_range(-240000, 240000));
                det_offsets.push((entrance, exit, p));
            }
        }
        let grating_offsets = (1..=4)
            .map(|g| {
                let p = base.add(
                    Parameter::new(format!("grating_offset_{g}"), 0i64).with_range(-20000, 20000),
                );
                (g, p)
            })
            .collect();

        Self {
            base,
            dev_id,
            serial_num,
            center_wl,
            turret,
            grating_id,
            grating_name,
            input_flipper,
            output_flipper,
            focus_mirror,
            slit_input_side,
            grating_calib_side_in,
            grating_calib_direct_in,
            det_offsets,
            grating_offsets,
            factory,
            device: RwLock::new(None),
        }
    }

    pub fn device(&self) -> Option<SharedDevice<AndorShamrockSpec>> {
        self.device.read().clone()
    }

    /// Detector offset setting for an (entrance, exit) port pair.
    pub fn det_offset(&self, entrance: Port, exit: Port) -> Option<&Parameter<i64>> {
        self.det_offsets
            .iter()
            .find(|(e, x, _)| *e == entrance && *x == exit)
            .map(|(_, _, p)| p)
    }

    /// Wavelength (nm) of each detector pixel for the current grating,
    /// input port and centre wavelength.
    pub fn wl_calibration(&self, px_indices: &[f64], binning: u32, m_order: i32) -> Result<Vec<f64>> {
        let table = if self.input_flipper.get() == "side" {
            self.grating_calib_side_in.get()
        } else {
            self.grating_calib_direct_in.get()
        };
        let grating = self.grating_id.get();
        let row = usize::try_from(grating - 1)
            .ok()
            .and_then(|i| table.get(i))
            .ok_or_else(|| anyhow!("no calibration row for grating {grating}"))?;
        let cal = GratingCalibration::from_row(row)?;
        Ok(cal.wavelengths(px_indices, self.center_wl.get(), binning, m_order))
    }

    fn bind(&self, dev: &SharedDevice<AndorShamrockSpec>) {
        let d = dev.clone();
        self.serial_num.connect_to_hardware_read(move || {
            let d = d.clone();
            Box::pin(async move { run_blocking(&d, |s| Ok(s.serial_number.clone())).await })
        });

        let (r, w) = (dev.clone(), dev.clone());
        self.center_wl.connect_to_hardware(
            move || {
                let d = r.clone();
                Box::pin(async move { run_blocking(&d, |s| s.wavelength()).await })
            },
            move |wl| {
                let d = w.clone();
                Box::pin(async move { run_blocking(&d, move |s| s.set_wavelength(wl)).await })
            },
        );

        let d = dev.clone();
        self.turret.connect_to_hardware_read(move || {
            let d = d.clone();
            Box::pin(async move { run_blocking(&d, |s| Ok(s.turret()? as i64)).await })
        });

        // changing grating updates its label and re-reads the focus mirror,
        // which the turret re-homes on every grating move
        let (r, w) = (dev.clone(), dev.clone());
        let grating_name = self.grating_name.clone();
        let focus_mirror = self.focus_mirror.clone();
        self.grating_id.connect_to_hardware(
            move || {
                let d = r.clone();
                Box::pin(async move { run_blocking(&d, |s| Ok(s.grating()? as i64)).await })
            },
            move |g| {
                let d = w.clone();
                let grating_name = grating_name.clone();
                let focus_mirror = focus_mirror.clone();
                Box::pin(async move {
                    let name = run_blocking(&d, move |s| {
                        s.set_grating(g as i32)?;
                        Ok(s.grating_name(g as i32).unwrap_or_default().to_string())
                    })
                    .await?;
                    grating_name.store(name);
                    if focus_mirror.has_hardware_reader() {
                        focus_mirror.read_from_hardware().await?;
                    }
                    Ok(())
                })
            },
        );

        for (param, flipper) in [
            (&self.input_flipper, Flipper::Input),
            (&self.output_flipper, Flipper::Output),
        ] {
            let (r, w) = (dev.clone(), dev.clone());
            param.connect_to_hardware(
                move || {
                    let d = r.clone();
                    Box::pin(async move {
                        run_blocking(&d, move |s| Ok(s.flipper_mirror(flipper)?.as_str().to_string()))
                            .await
                    })
                },
                move |name| {
                    let d = w.clone();
                    Box::pin(async move {
                        let port = Port::parse(&name)
                            .ok_or_else(|| ScopeError::ParameterInvalidChoice(name.clone()))?;
                        run_blocking(&d, move |s| s.set_flipper_mirror(flipper, port)).await
                    })
                },
            );
        }

        let (r, w) = (dev.clone(), dev.clone());
        self.focus_mirror.connect_to_hardware(
            move || {
                let d = r.clone();
                Box::pin(async move {
                    run_blocking(&d, |s| Ok(s.focus_mirror_position()? as i64)).await
                })
            },
            move |pos| {
                let d = w.clone();
                Box::pin(async move {
                    run_blocking(&d, move |s| s.set_focus_mirror_position_abs(pos as i32)).await
                })
            },
        );

        let (r, w) = (dev.clone(), dev.clone());
        self.slit_input_side.connect_to_hardware(
            move || {
                let d = r.clone();
                Box::pin(async move { run_blocking(&d, |s| s.slit_width(Slit::InputSide)).await })
            },
            move |width| {
                let d = w.clone();
                Box::pin(async move {
                    run_blocking(&d, move |s| s.set_slit_width(Slit::InputSide, width)).await
                })
            },
        );

        for (entrance, exit, param) in &self.det_offsets {
            let (entrance, exit) = (*entrance, *exit);
            let (r, w) = (dev.clone(), dev.clone());
            param.connect_to_hardware(
                move || {
                    let d = r.clone();
                    Box::pin(async move {
                        run_blocking(&d, move |s| Ok(s.detector_offset(entrance, exit)? as i64))
                            .await
                    })
                },
                move |offset| {
                    let d = w.clone();
                    Box::pin(async move {
                        run_blocking(&d, move |s| {
                            s.set_detector_offset(entrance, exit, offset as i32)
                        })
                        .await
                    })
                },
            );
        }

        for (grating, param) in &self.grating_offsets {
            let grating = *grating;
            let (r, w) = (dev.clone(), dev.clone());
            param.connect_to_hardware(
                move || {
                    let d = r.clone();
                    Box::pin(async move {
                        run_blocking(&d, move |s| Ok(s.grating_offset(grating)? as i64)).await
                    })
                },
                move |offset| {
                    let d = w.clone();
                    Box::pin(async move {
                        run_blocking(&d, move |s| s.set_grating_offset(grating, offset as i32))
                            .await
                    })
                },
            );
        }
    }
}

impl Default for AndorSpecHw {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HardwareComponent for AndorSpecHw {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn settings(&self) -> &ParameterSet {
        &self.base.settings
    }

    async fn connect(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        let factory = self.factory.clone();
        let dev_id = self.dev_id.get() as i32;
        let debug = self.base.debug_mode.get();
        let spec = tokio::task::spawn_blocking(move || {
            let sdk = factory()?;
            AndorShamrockSpec::open(sdk, dev_id, debug)
        })
        .await
        .map_err(|e| anyhow!("Shamrock open task failed: {e}"))?
        .context("failed to open Shamrock spectrograph")?;

        let installed: Vec<(i32, String)> = spec
            .gratings
            .iter()
            .map(|(n, name)| (*n, name.clone()))
            .collect();
        let grating_count = installed.len();
        let dev: SharedDevice<AndorShamrockSpec> = Arc::new(Mutex::new(spec));

        self.grating_id.change_choices(
            installed
                .into_iter()
                .map(|(n, name)| (format!("{n}: {name}"), n as i64))
                .collect(),
        );
        self.bind(&dev);
        *self.device.write() = Some(dev.clone());
        self.base.mark_connected(true);

        // offsets of gratings not on the turret cannot be read
        for (grating, param) in &self.grating_offsets {
            if *grating as usize > grating_count {
                param.disconnect_from_hardware();
            }
        }
        // the slit is optional hardware
        let slit_fitted = dev
            .lock()
            .slit_present
            .get(&(Slit::InputSide as i32))
            .copied()
            .unwrap_or(false);
        if !slit_fitted {
            self.slit_input_side.disconnect_from_hardware();
        }

        self.read_from_hardware().await?;
        let grating = self.grating_id.get() as i32;
        let name = dev.lock().grating_name(grating).unwrap_or_default().to_string();
        self.grating_name.store(name);
        info!(serial = %self.serial_num.get(), "andor_spec connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let Some(dev) = self.device.write().take() else {
            return Ok(());
        };
        self.base.release();
        run_blocking(&dev, |s| s.close()).await?;
        info!("andor_spec disconnected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.base.is_connected()
    }
}

#[async_trait]
impl WavelengthTunable for AndorSpecHw {
    async fn set_wavelength(&self, wavelength_nm: f64) -> Result<()> {
        self.center_wl.set(wavelength_nm).await
    }

    async fn get_wavelength(&self) -> Result<f64> {
        self.center_wl.read_from_hardware().await
    }

    fn wavelength_range(&self) -> (f64, f64) {
        WL_RANGE
    }
}
